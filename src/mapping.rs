//! Index settings and the Item mapping.

use crate::config::AppConfig;
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct IndexSettings {
    pub name: String,
    pub number_of_shards: u32,
    pub number_of_replicas: u32,
    /// Analyzer for `title`; the engine default when unset.
    pub title_analyzer: Option<String>,
}

impl IndexSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            number_of_shards: 1,
            number_of_replicas: 0,
            title_analyzer: None,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            name: config.index_name.clone(),
            number_of_shards: config.number_of_shards,
            number_of_replicas: config.number_of_replicas,
            title_analyzer: config.title_analyzer.clone(),
        }
    }

    /// Field mapping for `Item` documents.
    ///
    /// `title` is analyzed for full-text search, `category` and `brand` are
    /// keywords for exact filtering and bucketing, `price` is numeric, and
    /// `imageUrl` is stored but not indexed.
    pub fn mapping(&self) -> Value {
        let mut title = json!({ "type": "text" });
        if let Some(analyzer) = &self.title_analyzer {
            title["analyzer"] = json!(analyzer);
        }

        json!({
            "properties": {
                "id": { "type": "long" },
                "title": title,
                "category": { "type": "keyword" },
                "brand": { "type": "keyword" },
                "price": { "type": "double" },
                "imageUrl": { "type": "keyword", "index": false }
            }
        })
    }

    /// Body for the create-index call.
    pub fn index_definition(&self) -> Value {
        json!({
            "settings": {
                "number_of_shards": self.number_of_shards,
                "number_of_replicas": self.number_of_replicas
            },
            "mappings": self.mapping()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_definition_structure() {
        let settings = IndexSettings::new("item");
        let definition = settings.index_definition();

        assert_eq!(definition["settings"]["number_of_shards"], 1);
        assert_eq!(definition["settings"]["number_of_replicas"], 0);

        let props = &definition["mappings"]["properties"];
        assert_eq!(props["id"]["type"], "long");
        assert_eq!(props["title"]["type"], "text");
        assert!(props["title"].get("analyzer").is_none());
        assert_eq!(props["category"]["type"], "keyword");
        assert_eq!(props["brand"]["type"], "keyword");
        assert_eq!(props["price"]["type"], "double");
        assert_eq!(props["imageUrl"]["index"], false);
    }

    #[test]
    fn test_title_analyzer_from_config() {
        let config = AppConfig {
            index_name: "catalogue".to_string(),
            number_of_shards: 2,
            title_analyzer: Some("ik_max_word".to_string()),
            ..AppConfig::default()
        };
        let settings = IndexSettings::from_config(&config);

        assert_eq!(settings.name, "catalogue");
        assert_eq!(settings.index_definition()["settings"]["number_of_shards"], 2);
        assert_eq!(
            settings.mapping()["properties"]["title"]["analyzer"],
            "ik_max_word"
        );
    }
}
