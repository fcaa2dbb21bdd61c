use async_trait::async_trait;
use disttask_domain::{
    entities::{ManagedNode, BACKGROUND_ROLE},
    repositories::NodeRepository,
};
use disttask_errors::{DistTaskError, DistTaskResult};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info, instrument};

use super::push_in_list;

pub struct SqliteNodeRepository {
    pool: SqlitePool,
    cpu_count: i64,
}

impl SqliteNodeRepository {
    /// `cpu_count` 为本节点上报的 CPU 数
    pub fn new(pool: SqlitePool, cpu_count: i64) -> Self {
        Self { pool, cpu_count }
    }
}

pub(crate) async fn all_nodes(conn: &mut SqliteConnection) -> DistTaskResult<Vec<ManagedNode>> {
    let rows = sqlx::query("SELECT host, role, cpu_count FROM dist_framework_meta ORDER BY host")
        .fetch_all(&mut *conn)
        .await
        .map_err(DistTaskError::Database)?;

    rows.iter()
        .map(|row| -> DistTaskResult<ManagedNode> {
            Ok(ManagedNode {
                id: row.try_get("host")?,
                role: row.try_get("role")?,
                cpu_count: row.try_get("cpu_count")?,
            })
        })
        .collect()
}

/// 存在后台角色节点时只使用它们，否则使用未设置角色的节点
pub(crate) fn filter_managed_nodes(nodes: Vec<ManagedNode>) -> Vec<ManagedNode> {
    let (background, rest): (Vec<_>, Vec<_>) = nodes
        .into_iter()
        .partition(|node| node.role == BACKGROUND_ROLE);
    if !background.is_empty() {
        return background;
    }
    rest.into_iter().filter(|node| node.role.is_empty()).collect()
}

pub(crate) async fn cpu_count_of_managed_node(conn: &mut SqliteConnection) -> DistTaskResult<i64> {
    let nodes = filter_managed_nodes(all_nodes(conn).await?);
    if nodes.is_empty() {
        return Err(DistTaskError::NoManagedNodes);
    }
    nodes
        .iter()
        .find(|node| node.cpu_count > 0)
        .map(|node| node.cpu_count)
        .ok_or(DistTaskError::NoUsableCapacity)
}

#[async_trait]
impl NodeRepository for SqliteNodeRepository {
    #[instrument(skip(self), fields(cpu_count = self.cpu_count))]
    async fn init_meta(&self, node_id: &str, role: &str) -> DistTaskResult<()> {
        sqlx::query(
            r#"
            INSERT INTO dist_framework_meta (host, role, cpu_count)
            VALUES ($1, $2, $3)
            ON CONFLICT(host) DO UPDATE SET
                role = excluded.role,
                cpu_count = excluded.cpu_count
            "#,
        )
        .bind(node_id)
        .bind(role)
        .bind(self.cpu_count)
        .execute(&self.pool)
        .await
        .map_err(DistTaskError::Database)?;

        info!("初始化节点信息成功: {}", node_id);
        Ok(())
    }

    #[instrument(skip(self), fields(cpu_count = self.cpu_count))]
    async fn recover_meta(&self, node_id: &str, role: &str) -> DistTaskResult<()> {
        sqlx::query(
            r#"
            INSERT INTO dist_framework_meta (host, role, cpu_count)
            VALUES ($1, $2, $3)
            ON CONFLICT(host) DO UPDATE SET cpu_count = excluded.cpu_count
            "#,
        )
        .bind(node_id)
        .bind(role)
        .bind(self.cpu_count)
        .execute(&self.pool)
        .await
        .map_err(DistTaskError::Database)?;

        debug!("恢复节点信息成功: {}", node_id);
        Ok(())
    }

    async fn get_all_nodes(&self) -> DistTaskResult<Vec<ManagedNode>> {
        let mut conn = self.pool.acquire().await?;
        all_nodes(&mut conn).await
    }

    async fn get_managed_nodes(&self) -> DistTaskResult<Vec<ManagedNode>> {
        let mut conn = self.pool.acquire().await?;
        Ok(filter_managed_nodes(all_nodes(&mut conn).await?))
    }

    async fn get_cpu_count_of_managed_node(&self) -> DistTaskResult<i64> {
        let mut conn = self.pool.acquire().await?;
        cpu_count_of_managed_node(&mut conn).await
    }

    #[instrument(skip(self))]
    async fn delete_dead_nodes(&self, node_ids: &[String]) -> DistTaskResult<()> {
        if node_ids.is_empty() {
            return Ok(());
        }

        let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM dist_framework_meta WHERE host");
        push_in_list(&mut builder, node_ids.iter().map(String::as_str));

        let mut tx = self.pool.begin().await?;
        let result = builder.build().execute(&mut *tx).await?;
        tx.commit().await?;

        info!("清理失效节点 {} 个", result.rows_affected());
        Ok(())
    }
}
