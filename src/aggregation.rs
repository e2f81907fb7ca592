//! Bucket and metric aggregations.
//!
//! The set of supported shapes is closed: a terms aggregation (optionally
//! carrying nested aggregations per bucket) or a single-value metric. Results
//! come back as the matching [`AggregationResult`] variant, so callers pick
//! the shape with [`Aggregations::terms`] / [`Aggregations::metric`] instead
//! of casting.

use crate::error::AppError;
use crate::item::Item;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};

pub const DEFAULT_TERMS_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Avg,
    Sum,
    Min,
    Max,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Avg => "avg",
            MetricKind::Sum => "sum",
            MetricKind::Min => "min",
            MetricKind::Max => "max",
        }
    }

    fn apply(&self, values: &[f64]) -> Option<f64> {
        match self {
            MetricKind::Sum => Some(values.iter().sum()),
            _ if values.is_empty() => None,
            MetricKind::Avg => Some(values.iter().sum::<f64>() / values.len() as f64),
            MetricKind::Min => values.iter().copied().reduce(f64::min),
            MetricKind::Max => values.iter().copied().reduce(f64::max),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricAggregation {
    pub name: String,
    pub kind: MetricKind,
    pub field: String,
}

impl MetricAggregation {
    pub fn new(name: impl Into<String>, kind: MetricKind, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            field: field.into(),
        }
    }

    pub fn avg(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(name, MetricKind::Avg, field)
    }

    pub fn sum(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(name, MetricKind::Sum, field)
    }

    pub fn min(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(name, MetricKind::Min, field)
    }

    pub fn max(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(name, MetricKind::Max, field)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TermsAggregation {
    pub name: String,
    pub field: String,
    pub size: usize,
    pub sub_aggregations: Vec<AggregationRequest>,
}

impl TermsAggregation {
    pub fn new(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            size: DEFAULT_TERMS_SIZE,
            sub_aggregations: Vec::new(),
        }
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn sub_aggregation(mut self, sub: impl Into<AggregationRequest>) -> Self {
        self.sub_aggregations.push(sub.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregationRequest {
    Terms(TermsAggregation),
    Metric(MetricAggregation),
}

impl From<TermsAggregation> for AggregationRequest {
    fn from(t: TermsAggregation) -> Self {
        AggregationRequest::Terms(t)
    }
}

impl From<MetricAggregation> for AggregationRequest {
    fn from(m: MetricAggregation) -> Self {
        AggregationRequest::Metric(m)
    }
}

impl AggregationRequest {
    pub fn name(&self) -> &str {
        match self {
            AggregationRequest::Terms(t) => &t.name,
            AggregationRequest::Metric(m) => &m.name,
        }
    }

    /// The request body for this aggregation, without its name.
    pub fn to_es(&self) -> Value {
        match self {
            AggregationRequest::Terms(t) => {
                let mut body = json!({
                    "terms": { "field": t.field, "size": t.size }
                });
                if !t.sub_aggregations.is_empty() {
                    body["aggs"] = aggs_to_es(&t.sub_aggregations);
                }
                body
            }
            AggregationRequest::Metric(m) => json!({
                m.kind.as_str(): { "field": m.field }
            }),
        }
    }

    /// Reads this aggregation's result out of an engine response fragment.
    pub fn parse_es(&self, value: &Value) -> Result<AggregationResult, AppError> {
        match self {
            AggregationRequest::Terms(t) => {
                let raw_buckets = value["buckets"].as_array().ok_or_else(|| {
                    AppError::MalformedResponse(format!(
                        "aggregation '{}' has no terms buckets",
                        t.name
                    ))
                })?;

                let mut buckets = Vec::with_capacity(raw_buckets.len());
                for raw in raw_buckets {
                    let key = match (&raw["key_as_string"], &raw["key"]) {
                        (Value::String(s), _) | (_, Value::String(s)) => s.clone(),
                        (_, Value::Null) => {
                            return Err(AppError::MalformedResponse(format!(
                                "bucket without key in aggregation '{}'",
                                t.name
                            )))
                        }
                        (_, other) => other.to_string(),
                    };
                    let doc_count = raw["doc_count"].as_u64().unwrap_or(0);
                    let aggregations = Aggregations::parse_es(&t.sub_aggregations, raw)?;
                    buckets.push(Bucket {
                        key,
                        doc_count,
                        aggregations,
                    });
                }

                Ok(AggregationResult::Terms(TermsResult {
                    buckets,
                    sum_other_doc_count: value["sum_other_doc_count"].as_u64().unwrap_or(0),
                }))
            }
            AggregationRequest::Metric(m) => {
                if value.get("value").is_none() {
                    return Err(AppError::MalformedResponse(format!(
                        "aggregation '{}' has no metric value",
                        m.name
                    )));
                }
                Ok(AggregationResult::Metric(MetricResult {
                    value: value["value"].as_f64(),
                }))
            }
        }
    }

    /// Evaluates this aggregation over an already-filtered set of items.
    pub fn compute(&self, items: &[&Item]) -> Result<AggregationResult, AppError> {
        match self {
            AggregationRequest::Terms(t) => {
                let mut groups: BTreeMap<String, Vec<&Item>> = BTreeMap::new();
                for item in items {
                    let value = item
                        .field(&t.field)
                        .ok_or_else(|| AppError::UnknownField(t.field.clone()))?;
                    groups.entry(value.to_key()).or_default().push(*item);
                }

                // count desc, key asc; BTreeMap already yields keys ascending
                let mut grouped: Vec<(String, Vec<&Item>)> = groups.into_iter().collect();
                grouped.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

                let mut buckets = Vec::new();
                let mut sum_other_doc_count = 0u64;
                for (i, (key, members)) in grouped.into_iter().enumerate() {
                    if i >= t.size {
                        sum_other_doc_count += members.len() as u64;
                        continue;
                    }
                    let mut aggregations = Aggregations::default();
                    for sub in &t.sub_aggregations {
                        aggregations.insert(sub.name(), sub.compute(&members)?);
                    }
                    buckets.push(Bucket {
                        key,
                        doc_count: members.len() as u64,
                        aggregations,
                    });
                }

                Ok(AggregationResult::Terms(TermsResult {
                    buckets,
                    sum_other_doc_count,
                }))
            }
            AggregationRequest::Metric(m) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    let value = item
                        .field(&m.field)
                        .ok_or_else(|| AppError::UnknownField(m.field.clone()))?;
                    let number = value.as_f64().ok_or_else(|| {
                        AppError::invalid_field(
                            &m.field,
                            format!("{} requires a numeric field", m.kind.as_str()),
                        )
                    })?;
                    values.push(number);
                }
                Ok(AggregationResult::Metric(MetricResult {
                    value: m.kind.apply(&values),
                }))
            }
        }
    }
}

/// `{"name": body, ...}` for a list of requests.
pub fn aggs_to_es(requests: &[AggregationRequest]) -> Value {
    let mut aggs = Map::new();
    for request in requests {
        aggs.insert(request.name().to_string(), request.to_es());
    }
    Value::Object(aggs)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AggregationResult {
    Terms(TermsResult),
    Metric(MetricResult),
}

impl AggregationResult {
    pub fn as_terms(&self) -> Option<&TermsResult> {
        match self {
            AggregationResult::Terms(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_metric(&self) -> Option<&MetricResult> {
        match self {
            AggregationResult::Metric(m) => Some(m),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermsResult {
    pub buckets: Vec<Bucket>,
    /// Documents that fell into buckets beyond the requested size.
    pub sum_other_doc_count: u64,
}

impl TermsResult {
    pub fn bucket(&self, key: &str) -> Option<&Bucket> {
        self.buckets.iter().find(|b| b.key == key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricResult {
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub key: String,
    pub doc_count: u64,
    pub aggregations: Aggregations,
}

impl Bucket {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.aggregations.metric(name).and_then(|m| m.value)
    }
}

/// Aggregation results keyed by request name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Aggregations(HashMap<String, AggregationResult>);

impl Aggregations {
    pub fn insert(&mut self, name: impl Into<String>, result: AggregationResult) {
        self.0.insert(name.into(), result);
    }

    pub fn get(&self, name: &str) -> Option<&AggregationResult> {
        self.0.get(name)
    }

    pub fn terms(&self, name: &str) -> Option<&TermsResult> {
        self.get(name).and_then(AggregationResult::as_terms)
    }

    pub fn metric(&self, name: &str) -> Option<&MetricResult> {
        self.get(name).and_then(AggregationResult::as_metric)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses every requested aggregation out of `container`, which is the
    /// response's `aggregations` object or a bucket holding sub-aggregations.
    pub fn parse_es(requests: &[AggregationRequest], container: &Value) -> Result<Self, AppError> {
        let mut parsed = Aggregations::default();
        for request in requests {
            let fragment = container.get(request.name()).ok_or_else(|| {
                AppError::MalformedResponse(format!(
                    "aggregation '{}' missing from response",
                    request.name()
                ))
            })?;
            parsed.insert(request.name(), request.parse_es(fragment)?);
        }
        Ok(parsed)
    }

    pub fn compute(requests: &[AggregationRequest], items: &[&Item]) -> Result<Self, AppError> {
        let mut computed = Aggregations::default();
        for request in requests {
            computed.insert(request.name(), request.compute(items)?);
        }
        Ok(computed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items() -> Vec<Item> {
        vec![
            Item::new(1, "Xiaomi 11", "phone", "Xiaomi", 3999.0, "http://www.xiaomi.com"),
            Item::new(2, "Xiaomi MIX3", "phone", "Xiaomi", 3299.0, "http://www.xiaomi.com"),
            Item::new(3, "Huawei Mate40", "phone", "Huawei", 5499.0, "http://www.huawei.com"),
            Item::new(4, "Apple iPhone", "phone", "Apple", 6999.0, "http://www.apple.com"),
        ]
    }

    fn brand_avg() -> AggregationRequest {
        TermsAggregation::new("group_by_brand", "brand")
            .sub_aggregation(MetricAggregation::avg("price_avg", "price"))
            .into()
    }

    #[test]
    fn test_terms_request_dsl() {
        let dsl = aggs_to_es(&[brand_avg()]);
        assert_eq!(dsl["group_by_brand"]["terms"]["field"], "brand");
        assert_eq!(dsl["group_by_brand"]["terms"]["size"], DEFAULT_TERMS_SIZE);
        assert_eq!(
            dsl["group_by_brand"]["aggs"]["price_avg"],
            json!({ "avg": { "field": "price" } })
        );
    }

    #[test]
    fn test_compute_terms_with_avg() {
        let items = items();
        let refs: Vec<&Item> = items.iter().collect();
        let result = brand_avg().compute(&refs).unwrap();
        let terms = result.as_terms().unwrap();

        assert_eq!(terms.buckets.len(), 3);
        // Xiaomi has two documents so it leads; the singletons follow by key
        assert_eq!(terms.buckets[0].key, "Xiaomi");
        assert_eq!(terms.buckets[0].doc_count, 2);
        assert_eq!(terms.buckets[0].metric("price_avg"), Some(3649.0));
        assert_eq!(terms.buckets[1].key, "Apple");
        assert_eq!(terms.buckets[2].key, "Huawei");
        assert_eq!(terms.bucket("Huawei").unwrap().metric("price_avg"), Some(5499.0));
        assert_eq!(terms.sum_other_doc_count, 0);
    }

    #[test]
    fn test_compute_terms_size_limits_buckets() {
        let items = items();
        let refs: Vec<&Item> = items.iter().collect();
        let request: AggregationRequest = TermsAggregation::new("brands", "brand").size(1).into();
        let result = request.compute(&refs).unwrap();
        let terms = result.as_terms().unwrap();

        assert_eq!(terms.buckets.len(), 1);
        assert_eq!(terms.sum_other_doc_count, 2);
    }

    #[test]
    fn test_metric_edge_cases() {
        assert_eq!(MetricKind::Avg.apply(&[]), None);
        assert_eq!(MetricKind::Max.apply(&[]), None);
        assert_eq!(MetricKind::Sum.apply(&[]), Some(0.0));
        assert_eq!(MetricKind::Min.apply(&[3.0, 1.0, 2.0]), Some(1.0));
        assert_eq!(MetricKind::Max.apply(&[3.0, 1.0, 2.0]), Some(3.0));
    }

    #[test]
    fn test_metric_on_text_field_is_rejected() {
        let items = items();
        let refs: Vec<&Item> = items.iter().collect();
        let request: AggregationRequest = MetricAggregation::avg("bad", "brand").into();
        assert!(matches!(
            request.compute(&refs),
            Err(AppError::InvalidFieldUsage { .. })
        ));

        let request: AggregationRequest = TermsAggregation::new("bad", "colour").into();
        assert!(matches!(request.compute(&refs), Err(AppError::UnknownField(_))));
    }

    #[test]
    fn test_parse_es_response() {
        let response = json!({
            "group_by_brand": {
                "doc_count_error_upper_bound": 0,
                "sum_other_doc_count": 0,
                "buckets": [
                    { "key": "Xiaomi", "doc_count": 2, "price_avg": { "value": 3649.0 } },
                    { "key": "Huawei", "doc_count": 1, "price_avg": { "value": 5499.0 } }
                ]
            }
        });
        let parsed = Aggregations::parse_es(&[brand_avg()], &response).unwrap();
        let terms = parsed.terms("group_by_brand").unwrap();

        assert_eq!(terms.buckets.len(), 2);
        assert_eq!(terms.buckets[0].key, "Xiaomi");
        assert_eq!(terms.buckets[0].doc_count, 2);
        assert_eq!(terms.buckets[0].metric("price_avg"), Some(3649.0));
        assert!(parsed.metric("group_by_brand").is_none());
    }

    #[test]
    fn test_parse_es_numeric_keys_and_null_metric() {
        let request: AggregationRequest = TermsAggregation::new("by_id", "id")
            .sub_aggregation(MetricAggregation::max("top", "price"))
            .into();
        let fragment = json!({
            "buckets": [ { "key": 2, "doc_count": 1, "top": { "value": null } } ]
        });
        let result = request.parse_es(&fragment).unwrap();
        let bucket = &result.as_terms().unwrap().buckets[0];

        assert_eq!(bucket.key, "2");
        assert_eq!(bucket.metric("top"), None);
        assert!(bucket.aggregations.metric("top").is_some());
    }

    #[test]
    fn test_numeric_bucket_keys_agree_across_backends() {
        let items = items();
        let refs: Vec<&Item> = items.iter().collect();
        let request: AggregationRequest = TermsAggregation::new("by_price", "price").into();

        let computed = request.compute(&refs).unwrap();
        let parsed = request
            .parse_es(&json!({
                "buckets": [ { "key": 3299.0, "doc_count": 1 } ]
            }))
            .unwrap();

        let parsed_key = &parsed.as_terms().unwrap().buckets[0].key;
        assert_eq!(parsed_key, "3299.0");
        assert!(computed.as_terms().unwrap().bucket(parsed_key).is_some());
    }

    #[test]
    fn test_parse_es_shape_mismatch() {
        let missing = Aggregations::parse_es(&[brand_avg()], &json!({}));
        assert!(matches!(missing, Err(AppError::MalformedResponse(_))));

        // a metric body where terms buckets were requested
        let wrong = brand_avg().parse_es(&json!({ "value": 1.0 }));
        assert!(matches!(wrong, Err(AppError::MalformedResponse(_))));
    }
}
