use crate::aggregation::{aggs_to_es, Aggregations};
use crate::bulk::BulkResponse;
use crate::config::{AppConfig, RefreshPolicy};
use crate::error::AppError;
use crate::item::Item;
use crate::mapping::IndexSettings;
use crate::page::Page;
use crate::query::{NativeQuery, Query};
use crate::repository::ItemRepository;
use async_trait::async_trait;
use elasticsearch::{
    http::request::JsonBody,
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
    indices::{
        IndicesCreateParts, IndicesDeleteParts, IndicesExistsParts, IndicesPutMappingParts,
        IndicesRefreshParts,
    },
    params::Refresh,
    BulkParts, CountParts, DeleteByQueryParts, DeleteParts, Elasticsearch, GetParts, IndexParts,
    SearchParts,
};
use serde_json::{json, Value};
use url::Url;

const NOT_FOUND: u16 = 404;

pub struct ElasticsearchSearcher {
    client: Elasticsearch,
    settings: IndexSettings,
    refresh: RefreshPolicy,
}

impl ElasticsearchSearcher {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        log::debug!("Creating Elasticsearch client for URL: {}", config.elasticsearch_url);
        let url = Url::parse(&config.elasticsearch_url)?;
        let conn_pool = SingleNodeConnectionPool::new(url);
        let transport = TransportBuilder::new(conn_pool).disable_proxy().build()?;
        let client = Elasticsearch::new(transport);
        log::trace!("Elasticsearch client created successfully.");
        Ok(Self::with_client(
            client,
            IndexSettings::from_config(config),
            config.refresh,
        ))
    }

    /// Uses an already configured client.
    pub fn with_client(client: Elasticsearch, settings: IndexSettings, refresh: RefreshPolicy) -> Self {
        Self {
            client,
            settings,
            refresh,
        }
    }

    fn index_name(&self) -> &str {
        &self.settings.name
    }

    fn refresh_param(policy: RefreshPolicy) -> Option<Refresh> {
        match policy {
            RefreshPolicy::None => None,
            RefreshPolicy::Immediate => Some(Refresh::True),
            RefreshPolicy::WaitFor => Some(Refresh::WaitFor),
        }
    }

    fn build_search_body(query: &NativeQuery) -> Value {
        let mut body = json!({
            "query": query.query.to_es(),
            "track_total_hits": true
        });

        if query.fetch_hits {
            body["from"] = json!(query.pageable.offset());
            body["size"] = json!(query.pageable.size);
        } else {
            body["size"] = json!(0);
        }

        if !query.sorts.is_empty() {
            body["sort"] = Value::Array(query.sorts.iter().map(|s| s.to_es()).collect());
        }

        if !query.aggregations.is_empty() {
            body["aggs"] = aggs_to_es(&query.aggregations);
        }

        body
    }

    fn extract_total(response: &Value) -> Result<u64, AppError> {
        let total = &response["hits"]["total"];
        // 7.x+ reports {"value": n, "relation": ...}; 6.x a bare number
        total
            .as_u64()
            .or_else(|| total["value"].as_u64())
            .ok_or_else(|| AppError::MalformedResponse("response has no hits.total".to_string()))
    }

    fn extract_items(response: &Value) -> Result<Vec<Item>, AppError> {
        let hits = response["hits"]["hits"]
            .as_array()
            .ok_or_else(|| AppError::MalformedResponse("response has no hits".to_string()))?;

        let mut items = Vec::with_capacity(hits.len());
        for hit in hits {
            let source = hit.get("_source").ok_or_else(|| {
                AppError::MalformedResponse(format!("hit {} has no _source", hit["_id"]))
            })?;
            items.push(serde_json::from_value(source.clone())?);
        }
        Ok(items)
    }

    fn parse_page(query: &NativeQuery, response: &Value) -> Result<Page<Item>, AppError> {
        let total = Self::extract_total(response)?;
        let content = if query.fetch_hits {
            Self::extract_items(response)?
        } else {
            Vec::new()
        };

        let page = Page::new(content, query.pageable.page, query.pageable.size, total);
        if query.aggregations.is_empty() {
            return Ok(page);
        }

        let aggregations = Aggregations::parse_es(&query.aggregations, &response["aggregations"])?;
        Ok(page.with_aggregations(aggregations))
    }

    /// A 404 on a single-document call means "no such document" only when
    /// the engine says so (`found: false` on get, `result: not_found` on
    /// delete). Any other 404, such as a missing index, is an error.
    fn check_missing_document(body: &Value) -> Result<(), AppError> {
        let document_missing = body.get("found") == Some(&Value::Bool(false))
            || body.get("result").and_then(Value::as_str) == Some("not_found");
        if document_missing {
            Ok(())
        } else {
            Err(AppError::Status {
                status: NOT_FOUND,
                body: body.to_string(),
            })
        }
    }

    /// Fetches the raw get response for `id`, or `None` when the document
    /// does not exist.
    async fn get_document(&self, id: i64, with_source: bool) -> Result<Option<Value>, AppError> {
        let doc_id = id.to_string();
        let mut request = self.client.get(GetParts::IndexId(self.index_name(), &doc_id));
        if !with_source {
            request = request._source(&["false"]);
        }
        let response = request.send().await?;

        if response.status_code().as_u16() == NOT_FOUND {
            let body = response.json::<Value>().await?;
            Self::check_missing_document(&body)?;
            log::trace!("No document with id {} in '{}'", id, self.index_name());
            return Ok(None);
        }

        let body = response.error_for_status_code()?.json::<Value>().await?;
        if body.get("found") == Some(&Value::Bool(false)) {
            return Ok(None);
        }
        Ok(Some(body))
    }

    async fn run_search(&self, body: Value) -> Result<Value, AppError> {
        log::trace!("Elasticsearch search body: {}", body);
        let response = self
            .client
            .search(SearchParts::Index(&[self.index_name()]))
            .body(body)
            .send()
            .await?
            .error_for_status_code()?;

        let body = response.json::<Value>().await?;
        log::trace!("Elasticsearch search response: {:?}", body);
        Ok(body)
    }

    async fn count_matching(&self, query: &Query) -> Result<u64, AppError> {
        let response = self
            .client
            .count(CountParts::Index(&[self.index_name()]))
            .body(json!({ "query": query.to_es() }))
            .send()
            .await?
            .error_for_status_code()?;

        let body = response.json::<Value>().await?;
        body["count"]
            .as_u64()
            .ok_or_else(|| AppError::MalformedResponse("count response has no count".to_string()))
    }

    /// Counts the matches, then fetches that many in one request.
    async fn fetch_all(&self, query: &Query) -> Result<Vec<Item>, AppError> {
        let total = self.count_matching(query).await?;
        if total == 0 {
            return Ok(Vec::new());
        }

        let response = self
            .run_search(json!({
                "query": query.to_es(),
                "from": 0,
                "size": total
            }))
            .await?;
        Self::extract_items(&response)
    }
}

#[async_trait]
impl ItemRepository for ElasticsearchSearcher {
    async fn create_index(&self) -> Result<bool, AppError> {
        log::debug!("Checking if Elasticsearch index '{}' exists.", self.index_name());
        let index_exists = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[self.index_name()]))
            .send()
            .await?
            .status_code()
            .is_success();

        if index_exists {
            log::debug!("Elasticsearch index '{}' already exists.", self.index_name());
            return Ok(false);
        }

        log::info!("Elasticsearch index '{}' does not exist. Creating it.", self.index_name());
        self.client
            .indices()
            .create(IndicesCreateParts::Index(self.index_name()))
            .body(self.settings.index_definition())
            .send()
            .await?
            .error_for_status_code()?;
        log::info!("Elasticsearch index '{}' created successfully.", self.index_name());

        Ok(true)
    }

    async fn put_mapping(&self) -> Result<(), AppError> {
        log::debug!("Applying item mapping to index '{}'.", self.index_name());
        self.client
            .indices()
            .put_mapping(IndicesPutMappingParts::Index(&[self.index_name()]))
            .body(self.settings.mapping())
            .send()
            .await?
            .error_for_status_code()?;
        Ok(())
    }

    async fn delete_index(&self) -> Result<bool, AppError> {
        let response = self
            .client
            .indices()
            .delete(IndicesDeleteParts::Index(&[self.index_name()]))
            .send()
            .await?;

        if response.status_code().as_u16() == NOT_FOUND {
            log::debug!("Elasticsearch index '{}' did not exist.", self.index_name());
            return Ok(false);
        }
        response.error_for_status_code()?;
        log::info!("Elasticsearch index '{}' deleted.", self.index_name());
        Ok(true)
    }

    async fn refresh(&self) -> Result<(), AppError> {
        self.client
            .indices()
            .refresh(IndicesRefreshParts::Index(&[self.index_name()]))
            .send()
            .await?
            .error_for_status_code()?;
        Ok(())
    }

    async fn save(&self, item: &Item) -> Result<(), AppError> {
        log::debug!("Indexing item {} into '{}'", item.id, self.index_name());
        let id = item.document_id();
        let mut request = self
            .client
            .index(IndexParts::IndexId(self.index_name(), &id))
            .body(item);
        if let Some(refresh) = Self::refresh_param(self.refresh) {
            request = request.refresh(refresh);
        }

        request.send().await?.error_for_status_code()?;
        Ok(())
    }

    async fn save_all(&self, items: &[Item]) -> Result<BulkResponse, AppError> {
        if items.is_empty() {
            return Ok(BulkResponse::default());
        }
        log::debug!("Bulk indexing {} items into '{}'", items.len(), self.index_name());

        let mut body: Vec<JsonBody<Value>> = Vec::with_capacity(items.len() * 2);
        for item in items {
            body.push(json!({ "index": { "_id": item.document_id() } }).into());
            body.push(serde_json::to_value(item)?.into());
        }

        let mut request = self
            .client
            .bulk(BulkParts::Index(self.index_name()))
            .body(body);
        if let Some(refresh) = Self::refresh_param(self.refresh) {
            request = request.refresh(refresh);
        }

        let response = request.send().await?.error_for_status_code()?;
        let body = response.json::<Value>().await?;
        let bulk = BulkResponse::from_es(&body)?;
        if bulk.errors {
            log::debug!(
                "Bulk request into '{}' reported {} failed items",
                self.index_name(),
                bulk.failures().count()
            );
        }
        Ok(bulk)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Item>, AppError> {
        match self.get_document(id, true).await? {
            Some(body) => match body.get("_source") {
                Some(source) => Ok(Some(serde_json::from_value(source.clone())?)),
                None => Err(AppError::MalformedResponse(format!(
                    "document {} returned without _source",
                    id
                ))),
            },
            None => Ok(None),
        }
    }

    async fn exists_by_id(&self, id: i64) -> Result<bool, AppError> {
        Ok(self.get_document(id, false).await?.is_some())
    }

    async fn count(&self) -> Result<u64, AppError> {
        self.count_matching(&Query::MatchAll).await
    }

    async fn find_all(&self) -> Result<Vec<Item>, AppError> {
        let items = self.fetch_all(&Query::MatchAll).await?;
        log::debug!("Found {} items in '{}'", items.len(), self.index_name());
        Ok(items)
    }

    async fn search(&self, query: &Query) -> Result<Vec<Item>, AppError> {
        log::debug!("Searching '{}' with query: {:?}", self.index_name(), query);
        let items = self.fetch_all(query).await?;
        log::debug!("Found {} items for query: {:?}", items.len(), query);
        Ok(items)
    }

    async fn search_page(&self, query: &NativeQuery) -> Result<Page<Item>, AppError> {
        log::debug!(
            "Searching '{}' page {} (size {}) with query: {:?}",
            self.index_name(),
            query.pageable.page,
            query.pageable.size,
            query.query
        );
        let response = self.run_search(Self::build_search_body(query)).await?;
        Self::parse_page(query, &response)
    }

    async fn delete_by_id(&self, id: i64) -> Result<bool, AppError> {
        let doc_id = id.to_string();
        let mut request = self
            .client
            .delete(DeleteParts::IndexId(self.index_name(), &doc_id));
        if let Some(refresh) = Self::refresh_param(self.refresh) {
            request = request.refresh(refresh);
        }

        let response = request.send().await?;
        if response.status_code().as_u16() == NOT_FOUND {
            let body = response.json::<Value>().await?;
            Self::check_missing_document(&body)?;
            return Ok(false);
        }
        response.error_for_status_code()?;
        log::debug!("Deleted item {} from '{}'", id, self.index_name());
        Ok(true)
    }

    async fn delete_all(&self) -> Result<(), AppError> {
        log::debug!("Deleting every document in '{}'", self.index_name());
        self.client
            .delete_by_query(DeleteByQueryParts::Index(&[self.index_name()]))
            .body(json!({ "query": Query::MatchAll.to_es() }))
            .refresh(self.refresh != RefreshPolicy::None)
            .send()
            .await?
            .error_for_status_code()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{MetricAggregation, TermsAggregation};
    use crate::query::{PageRequest, Sort};

    fn search_response() -> Value {
        json!({
            "took": 3,
            "timed_out": false,
            "hits": {
                "total": { "value": 3, "relation": "eq" },
                "hits": [
                    { "_index": "item", "_id": "2", "_score": null, "_source": {
                        "id": 2, "title": "Xiaomi MIX3", "category": "phone", "brand": "Xiaomi",
                        "price": 3299.0, "imageUrl": "http://www.xiaomi.com"
                    } },
                    { "_index": "item", "_id": "1", "_score": null, "_source": {
                        "id": 1, "title": "Xiaomi 11", "category": "phone", "brand": "Xiaomi",
                        "price": 3999.0, "imageUrl": "http://www.xiaomi.com"
                    } }
                ]
            },
            "aggregations": {
                "group_by_brand": {
                    "buckets": [
                        { "key": "Xiaomi", "doc_count": 2, "price_avg": { "value": 3649.0 } },
                        { "key": "Huawei", "doc_count": 1, "price_avg": { "value": 5499.0 } }
                    ]
                }
            }
        })
    }

    fn brand_query() -> NativeQuery {
        NativeQuery::builder()
            .query(Query::matching("title", "Xiaomi TV"))
            .pageable(PageRequest::of(0, 2))
            .sort(Sort::asc("price"))
            .aggregation(
                TermsAggregation::new("group_by_brand", "brand")
                    .sub_aggregation(MetricAggregation::avg("price_avg", "price")),
            )
            .build()
    }

    #[test]
    fn test_refresh_param() {
        assert!(ElasticsearchSearcher::refresh_param(RefreshPolicy::None).is_none());
        assert!(matches!(
            ElasticsearchSearcher::refresh_param(RefreshPolicy::Immediate),
            Some(Refresh::True)
        ));
        assert!(matches!(
            ElasticsearchSearcher::refresh_param(RefreshPolicy::WaitFor),
            Some(Refresh::WaitFor)
        ));
    }

    #[test]
    fn test_build_search_body() {
        let body = ElasticsearchSearcher::build_search_body(&brand_query());

        assert_eq!(body["query"]["match"]["title"]["query"], "Xiaomi TV");
        assert_eq!(body["from"], 0);
        assert_eq!(body["size"], 2);
        assert_eq!(body["track_total_hits"], true);
        assert_eq!(body["sort"][0]["price"]["order"], "asc");
        assert_eq!(body["aggs"]["group_by_brand"]["terms"]["field"], "brand");
        assert_eq!(
            body["aggs"]["group_by_brand"]["aggs"]["price_avg"]["avg"]["field"],
            "price"
        );
    }

    #[test]
    fn test_build_search_body_offsets_later_pages() {
        let query = NativeQuery::builder()
            .pageable(PageRequest::of(3, 5))
            .build();
        let body = ElasticsearchSearcher::build_search_body(&query);

        assert_eq!(body["from"], 15);
        assert_eq!(body["size"], 5);
        assert!(body.get("sort").is_none());
        assert!(body.get("aggs").is_none());
        assert!(body["query"]["match_all"].is_object());
    }

    #[test]
    fn test_build_search_body_without_hits() {
        let query = NativeQuery::builder()
            .aggregation(TermsAggregation::new("group_by_brand", "brand"))
            .without_hits()
            .build();
        let body = ElasticsearchSearcher::build_search_body(&query);

        assert_eq!(body["size"], 0);
        assert!(body.get("from").is_none());
    }

    #[test]
    fn test_parse_page() {
        let page = ElasticsearchSearcher::parse_page(&brand_query(), &search_response()).unwrap();

        assert_eq!(page.total_elements, 3);
        assert_eq!(page.total_pages(), 2);
        assert_eq!(page.content.len(), 2);
        assert_eq!(page.content[0].id, 2);
        assert_eq!(page.content[0].image_url, "http://www.xiaomi.com");

        let brands = page
            .aggregation("group_by_brand")
            .and_then(|a| a.as_terms())
            .unwrap();
        assert_eq!(brands.buckets.len(), 2);
        assert_eq!(brands.bucket("Xiaomi").unwrap().metric("price_avg"), Some(3649.0));
    }

    #[test]
    fn test_parse_page_without_hits_keeps_totals() {
        let query = NativeQuery::builder().without_hits().build();
        let mut response = search_response();
        response["hits"]["hits"] = json!([]);

        let page = ElasticsearchSearcher::parse_page(&query, &response).unwrap();
        assert!(page.content.is_empty());
        assert_eq!(page.total_elements, 3);
        assert!(page.aggregations.is_none());
    }

    #[test]
    fn test_extract_total_legacy_format() {
        let response = json!({ "hits": { "total": 7, "hits": [] } });
        assert_eq!(ElasticsearchSearcher::extract_total(&response).unwrap(), 7);
    }

    #[test]
    fn test_extract_items_rejects_missing_hits() {
        let result = ElasticsearchSearcher::extract_items(&json!({ "error": "boom" }));
        assert!(matches!(result, Err(AppError::MalformedResponse(_))));
    }

    #[test]
    fn test_extract_items_propagates_type_mismatch() {
        let response = json!({ "hits": { "hits": [
            { "_id": "9", "_source": { "id": "not-a-number" } }
        ] } });
        let result = ElasticsearchSearcher::extract_items(&response);
        assert!(matches!(result, Err(AppError::Json(_))));
    }

    #[test]
    fn test_new_rejects_bad_url() {
        let config = AppConfig {
            elasticsearch_url: "not a url".to_string(),
            ..AppConfig::default()
        };
        assert!(matches!(
            ElasticsearchSearcher::new(&config),
            Err(AppError::Url(_))
        ));
    }

    #[test]
    fn test_missing_document_is_absent() {
        let get = json!({ "_index": "item", "_id": "1", "found": false });
        assert!(ElasticsearchSearcher::check_missing_document(&get).is_ok());

        let delete = json!({ "_index": "item", "_id": "1", "_version": 1, "result": "not_found" });
        assert!(ElasticsearchSearcher::check_missing_document(&delete).is_ok());
    }

    #[test]
    fn test_missing_index_is_an_error() {
        let body = json!({
            "error": { "type": "index_not_found_exception", "reason": "no such index [item]" },
            "status": 404
        });
        match ElasticsearchSearcher::check_missing_document(&body) {
            Err(AppError::Status { status, body }) => {
                assert_eq!(status, 404);
                assert!(body.contains("index_not_found_exception"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
