//! Runs against a live engine. Start one on localhost:9200 (or point
//! `ITEM_SEARCH_ELASTICSEARCH_URL` elsewhere) and run with `--ignored`.

use item_search::{
    AppConfig, AppError, ElasticsearchSearcher, Item, ItemRepository, MetricAggregation,
    NativeQuery, PageRequest, Query, RefreshPolicy, Sort, TermsAggregation,
};

async fn fresh_repository(index_name: &str) -> ElasticsearchSearcher {
    let config = AppConfig {
        elasticsearch_url: std::env::var("ITEM_SEARCH_ELASTICSEARCH_URL")
            .unwrap_or_else(|_| "http://localhost:9200".to_string()),
        index_name: index_name.to_string(),
        refresh: RefreshPolicy::WaitFor,
        ..AppConfig::default()
    };
    let repository = ElasticsearchSearcher::new(&config).unwrap();
    repository.delete_index().await.unwrap();
    assert!(repository.create_index().await.unwrap());
    assert!(!repository.create_index().await.unwrap());
    repository.put_mapping().await.unwrap();
    repository
}

fn catalogue() -> Vec<Item> {
    vec![
        Item::new(1, "Xiaomi 11", "phone", "Xiaomi", 3999.0, "http://www.xiaomi.com"),
        Item::new(2, "Xiaomi MIX3", "phone", "Xiaomi", 3299.0, "http://www.xiaomi.com"),
        Item::new(3, "Huawei Mate40", "phone", "Huawei", 5499.0, "http://www.huawei.com"),
        Item::new(4, "Xiaomi TV 4A", "tv", "Xiaomi", 1999.0, "http://www.xiaomi.com"),
    ]
}

#[tokio::test]
#[ignore]
async fn save_and_find() {
    let repository = fresh_repository("item_it_save").await;
    let item = catalogue().remove(0);

    repository.save(&item).await.unwrap();
    let updated = Item {
        price: 3799.0,
        ..item.clone()
    };
    repository.save(&updated).await.unwrap();

    assert_eq!(repository.find_by_id(1).await.unwrap(), Some(updated));
    assert!(repository.exists_by_id(1).await.unwrap());
    assert_eq!(repository.find_by_id(99).await.unwrap(), None);

    repository.delete_index().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn bulk_save_then_query() {
    let repository = fresh_repository("item_it_query").await;
    let response = repository.save_all(&catalogue()).await.unwrap();
    assert!(!response.errors);
    assert_eq!(response.succeeded(), catalogue().len());

    let mut all = repository.find_all().await.unwrap();
    all.sort_by_key(|i| i.id);
    assert_eq!(all, catalogue());

    let between = repository.find_by_price_between(3000.0, 4000.0).await.unwrap();
    let mut ids: Vec<i64> = between.iter().map(|i| i.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2]);

    let page = repository
        .search_page(
            &NativeQuery::builder()
                .query(Query::matching("title", "Xiaomi"))
                .pageable(PageRequest::of(0, 2))
                .sort(Sort::asc("price"))
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(page.total_elements, 3);
    assert_eq!(page.content.len(), 2);
    assert_eq!(page.content[0].id, 4);

    let page = repository
        .search_page(
            &NativeQuery::builder()
                .aggregation(
                    TermsAggregation::new("group_by_brand", "brand")
                        .sub_aggregation(MetricAggregation::avg("price_avg", "price")),
                )
                .without_hits()
                .build(),
        )
        .await
        .unwrap();
    let brands = page
        .aggregations
        .as_ref()
        .and_then(|a| a.terms("group_by_brand"))
        .unwrap();
    let xiaomi = brands.bucket("Xiaomi").unwrap();
    assert_eq!(xiaomi.doc_count, 3);
    assert!((xiaomi.metric("price_avg").unwrap() - 3099.0).abs() < 1e-6);

    repository.delete_all().await.unwrap();
    assert_eq!(repository.count().await.unwrap(), 0);
    repository.delete_index().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn missing_index_is_an_error() {
    let repository = fresh_repository("item_it_missing").await;
    repository.delete_index().await.unwrap();

    assert!(matches!(
        repository.find_by_id(1).await,
        Err(AppError::Status { status: 404, .. })
    ));
    assert!(repository.exists_by_id(1).await.is_err());
    assert!(repository.delete_by_id(1).await.is_err());
}
