//! 配置管理
//!
//! 加载顺序：
//! 1. 各配置项的默认值
//! 2. 配置文件（TOML 格式）
//! 3. 环境变量覆盖（前缀 `DISTTASK_`，层级分隔符 `__`）

pub mod models;

pub use models::*;

#[cfg(test)]
mod tests;
