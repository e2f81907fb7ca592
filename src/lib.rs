//! Repository-style access to `Item` documents stored in a search engine.
//!
//! [`ItemRepository`] is implemented over Elasticsearch
//! ([`ElasticsearchSearcher`]) and over an embedded tantivy index
//! ([`TantivySearcher`]). Queries, pagination and aggregations are typed
//! values in [`query`] and [`aggregation`]; both backends accept the same ones.

pub mod aggregation;
pub mod bulk;
pub mod config;
pub mod error;
pub mod item;
pub mod mapping;
pub mod page;
pub mod query;
pub mod repository;
pub mod search_clients;

use std::sync::Arc;

pub use crate::aggregation::{
    AggregationRequest, AggregationResult, Aggregations, Bucket, MetricAggregation, MetricKind,
    TermsAggregation,
};
pub use crate::bulk::{BulkItemOutcome, BulkResponse};
pub use crate::config::{AppConfig, Engine, RefreshPolicy};
pub use crate::error::AppError;
pub use crate::item::Item;
pub use crate::mapping::IndexSettings;
pub use crate::page::Page;
pub use crate::query::{BoolQuery, NativeQuery, PageRequest, Query, Sort, SortOrder};
pub use crate::repository::ItemRepository;
pub use crate::search_clients::{elasticsearch::ElasticsearchSearcher, tantivy::TantivySearcher};

/// Opens the backend selected by `config.engine`.
pub fn open_repository(config: &AppConfig) -> Result<Arc<dyn ItemRepository>, AppError> {
    let repository: Arc<dyn ItemRepository> = match config.engine {
        Engine::Elasticsearch => Arc::new(ElasticsearchSearcher::new(config)?),
        Engine::Tantivy => Arc::new(TantivySearcher::new(config)?),
    };
    Ok(repository)
}
