use std::io::Write;

use disttask::entities::{Step, Subtask, TaskState, TaskType};
use disttask::{bootstrap, DistTaskError};
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_bootstrap_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("disttask.db");
    let mut file = NamedTempFile::with_suffix(".toml").unwrap();
    writeln!(
        file,
        r#"
[database]
url = "sqlite://{}?mode=rwc"
max_connections = 2
min_connections = 1

[storage]
cpu_count = 4

[logging]
level = "debug"
format = "json"
"#,
        db_path.display()
    )
    .unwrap();

    let manager = bootstrap(Some(file.path().to_str().unwrap())).await.unwrap();
    manager.nodes().init_meta("node-1", "").await.unwrap();

    let err = manager
        .tasks()
        .create_task("too-big", TaskType::Example, 5, b"")
        .await
        .unwrap_err();
    assert!(matches!(err, DistTaskError::ConcurrencyExceedsCapacity { .. }));

    let id = manager
        .tasks()
        .create_task("job", TaskType::Example, 4, b"")
        .await
        .unwrap();
    let task = manager.tasks().get_task_by_id(id).await.unwrap();
    let subtasks = vec![Subtask::new(Step(1), id, TaskType::Example, "node-1", 4, vec![], 1)];
    manager
        .transitions()
        .switch_task_step(&task, TaskState::Running, Step(1), &subtasks)
        .await
        .unwrap();

    assert_eq!(manager.subtasks().get_active_subtasks(id).await.unwrap().len(), 1);
    assert_eq!(
        manager.tasks().get_used_slots_on_nodes().await.unwrap().get("node-1"),
        Some(&4)
    );
    manager.close().await;

    // 缺失的配置文件直接报错
    assert!(bootstrap(Some("/nonexistent/disttask.toml")).await.is_err());
}
