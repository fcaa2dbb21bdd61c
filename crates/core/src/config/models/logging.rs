use serde::{Deserialize, Serialize};

const SUPPORTED_FORMATS: [&str; 2] = ["json", "pretty"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.level.is_empty() {
            return Err(anyhow::anyhow!("日志级别不能为空"));
        }

        if !SUPPORTED_FORMATS.contains(&self.format.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的日志格式: {}，支持的格式: {:?}",
                self.format,
                SUPPORTED_FORMATS
            ));
        }

        Ok(())
    }
}
