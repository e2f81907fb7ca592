use crate::bulk::BulkResponse;
use crate::error::AppError;
use crate::item::Item;
use crate::page::Page;
use crate::query::{NativeQuery, Query};
use async_trait::async_trait;

/// Persistence and retrieval of [`Item`] documents over a search backend.
///
/// Every call is a plain request/response against the backend; nothing is
/// cached, retried, or translated. Whether a write is visible to the very next
/// search depends on the backend's refresh behaviour.
#[async_trait]
pub trait ItemRepository: Send + Sync {
    /// Creates the index with its settings and mapping. Returns `false` when
    /// it already existed.
    async fn create_index(&self) -> Result<bool, AppError>;
    async fn put_mapping(&self) -> Result<(), AppError>;
    /// Returns `false` when there was no index to drop.
    async fn delete_index(&self) -> Result<bool, AppError>;
    /// Makes every prior write visible to search.
    async fn refresh(&self) -> Result<(), AppError>;

    /// Inserts the item, or overwrites the document with the same id.
    async fn save(&self, item: &Item) -> Result<(), AppError>;
    /// Batch upsert. Per-document failures are reported in the response,
    /// not as an `Err`.
    async fn save_all(&self, items: &[Item]) -> Result<BulkResponse, AppError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Item>, AppError>;
    async fn exists_by_id(&self, id: i64) -> Result<bool, AppError>;
    async fn count(&self) -> Result<u64, AppError>;
    async fn find_all(&self) -> Result<Vec<Item>, AppError>;

    /// Every match for `query`, in relevance order.
    async fn search(&self, query: &Query) -> Result<Vec<Item>, AppError>;
    async fn search_page(&self, query: &NativeQuery) -> Result<Page<Item>, AppError>;

    /// Returns `false` when no such document existed.
    async fn delete_by_id(&self, id: i64) -> Result<bool, AppError>;
    async fn delete_all(&self) -> Result<(), AppError>;

    /// Items with `min <= price <= max`.
    async fn find_by_price_between(&self, min: f64, max: f64) -> Result<Vec<Item>, AppError> {
        log::debug!("Finding items priced between {} and {}", min, max);
        self.search(&Query::between("price", min, max)).await
    }
}
