use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Elasticsearch,
    Tantivy,
}

/// When writes become visible to search on the Elasticsearch backend.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// Left to the engine's refresh interval.
    #[default]
    None,
    Immediate,
    WaitFor,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub engine: Engine,
    pub elasticsearch_url: String,
    pub index_name: String,
    pub number_of_shards: u32,
    pub number_of_replicas: u32,
    pub title_analyzer: Option<String>,
    #[serde(default)]
    pub refresh: RefreshPolicy,
    /// In-memory index when unset.
    pub tantivy_index_path: Option<String>,
    pub log_level: String,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false));

        Self::from_builder(builder)
    }

    /// Finishes a layered builder; environment variables prefixed
    /// `ITEM_SEARCH_` always win.
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let s = builder
            .add_source(Environment::with_prefix("ITEM_SEARCH").try_parsing(true))
            .build()?;

        s.try_deserialize()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: Engine::Elasticsearch,
            elasticsearch_url: "http://localhost:9200".to_string(),
            index_name: "item".to_string(),
            number_of_shards: 1,
            number_of_replicas: 0,
            title_analyzer: None,
            refresh: RefreshPolicy::None,
            tantivy_index_path: None,
            log_level: "info".to_string(),
        }
    }
}
