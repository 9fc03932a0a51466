use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{
    fs::{read_to_string, write},
    path::PathBuf,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Deliver [crate::event::EntityEvent]s to subscribers.
    pub emit_events: bool,
    /// Prefix of temp keys generated for String key properties.
    pub temp_string_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            emit_events: true,
            temp_string_prefix: "tmp-".to_string(),
        }
    }
}

impl CacheConfig {
    /// Parse a `[cache]` table. A document without one yields the defaults.
    pub fn from_toml_str(content: &str) -> Result<CacheConfig, CacheError> {
        let mut doc: BTreeMap<String, toml::Value> = toml::from_str(content)?;
        match doc.remove("cache") {
            Some(table) => Ok(table.try_into()?),
            None => Ok(CacheConfig::default()),
        }
    }
}

pub trait ConfigProvider: Send + Sync {
    fn get_config(&self) -> Result<CacheConfig, CacheError>;
    fn set_config(&self, config: &CacheConfig) -> Result<(), CacheError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TomlConfigProvider {
    path: PathBuf,
}

impl TomlConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlConfigProvider { path }
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn get_config(&self) -> Result<CacheConfig, CacheError> {
        tracing::debug!("Attempting to read cache config from: {:?}", &self.path);
        if !self.path.exists() {
            tracing::debug!("Config file not found, using default cache config.");
            return Ok(CacheConfig::default());
        }
        let content = read_to_string(&self.path)?;
        CacheConfig::from_toml_str(&content)
    }

    /// Rewrites the `[cache]` table, keeping any other tables already in the file.
    fn set_config(&self, config: &CacheConfig) -> Result<(), CacheError> {
        tracing::debug!("Attempting to write cache config to: {:?}", &self.path);
        let mut doc: BTreeMap<String, toml::Value> = if self.path.exists() {
            toml::from_str(&read_to_string(&self.path)?)?
        } else {
            BTreeMap::new()
        };
        doc.insert("cache".to_string(), toml::Value::try_from(config)?);
        write(&self.path, toml::to_string(&doc)?)?;
        Ok(())
    }
}
