use anyhow::{anyhow, Result};
use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};

use crate::VigilConfig;

/// 配置文件名
pub const CONFIG_FILE: &str = "vigil.toml";

/// 默认环境变量前缀，例如 `VIGIL__LOGGING__LEVEL=debug`
pub const ENV_PREFIX: &str = "VIGIL";

/// 配置加载器
pub struct ConfigLoader {
    config_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    /// 创建配置加载器
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// 加载配置，文件不存在时使用默认值，环境变量覆盖文件中的值
    pub fn load(&self) -> Result<VigilConfig> {
        let config_path = self.config_path();

        let config = Config::builder()
            .add_source(
                File::new(
                    config_path.to_str().ok_or_else(|| anyhow!("Invalid config path"))?,
                    FileFormat::Toml,
                )
                .required(false),
            )
            .add_source(
                Environment::with_prefix(&self.env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// 加载并校验配置
    pub fn validate(&self) -> Result<VigilConfig> {
        let config = self.load()?;
        config.validate()?;
        Ok(config)
    }
}
