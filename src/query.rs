//! Typed query values.
//!
//! These replace both method-name-derived queries and engine-specific
//! builder objects. Each backend translates them: the Elasticsearch client
//! serializes them into the query DSL via [`Query::to_es`], the embedded
//! backend compiles them into tantivy queries.

use crate::aggregation::AggregationRequest;
use serde_json::{json, Map, Value};

pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    MatchAll,
    /// Analyzed full-text match on one field.
    Match { field: String, text: String },
    /// Exact match on a keyword field.
    Term { field: String, value: String },
    /// Numeric range, both bounds inclusive when present.
    Range {
        field: String,
        gte: Option<f64>,
        lte: Option<f64>,
    },
    Bool(BoolQuery),
}

impl Default for Query {
    fn default() -> Self {
        Query::MatchAll
    }
}

impl Query {
    pub fn match_all() -> Self {
        Query::MatchAll
    }

    pub fn matching(field: impl Into<String>, text: impl Into<String>) -> Self {
        Query::Match {
            field: field.into(),
            text: text.into(),
        }
    }

    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Query::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn range(field: impl Into<String>, gte: Option<f64>, lte: Option<f64>) -> Self {
        Query::Range {
            field: field.into(),
            gte,
            lte,
        }
    }

    /// `min <= field <= max`.
    pub fn between(field: impl Into<String>, min: f64, max: f64) -> Self {
        Query::range(field, Some(min), Some(max))
    }

    pub fn to_es(&self) -> Value {
        match self {
            Query::MatchAll => json!({ "match_all": {} }),
            Query::Match { field, text } => json!({
                "match": { field.as_str(): { "query": text } }
            }),
            Query::Term { field, value } => json!({
                "term": { field.as_str(): value }
            }),
            Query::Range { field, gte, lte } => {
                let mut bounds = Map::new();
                if let Some(gte) = gte {
                    bounds.insert("gte".to_string(), json!(gte));
                }
                if let Some(lte) = lte {
                    bounds.insert("lte".to_string(), json!(lte));
                }
                json!({ "range": { field.as_str(): bounds } })
            }
            Query::Bool(b) => b.to_es(),
        }
    }
}

impl From<BoolQuery> for Query {
    fn from(b: BoolQuery) -> Self {
        Query::Bool(b)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolQuery {
    pub must: Vec<Query>,
    pub filter: Vec<Query>,
    pub should: Vec<Query>,
    pub must_not: Vec<Query>,
}

impl BoolQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(mut self, query: Query) -> Self {
        self.must.push(query);
        self
    }

    pub fn filter(mut self, query: Query) -> Self {
        self.filter.push(query);
        self
    }

    pub fn should(mut self, query: Query) -> Self {
        self.should.push(query);
        self
    }

    pub fn must_not(mut self, query: Query) -> Self {
        self.must_not.push(query);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
            && self.filter.is_empty()
            && self.should.is_empty()
            && self.must_not.is_empty()
    }

    fn to_es(&self) -> Value {
        let mut body = Map::new();
        for (key, clauses) in [
            ("must", &self.must),
            ("filter", &self.filter),
            ("should", &self.should),
            ("must_not", &self.must_not),
        ] {
            if !clauses.is_empty() {
                body.insert(
                    key.to_string(),
                    Value::Array(clauses.iter().map(Query::to_es).collect()),
                );
            }
        }
        json!({ "bool": body })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

impl std::str::FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("unknown sort order '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }

    pub fn to_es(&self) -> Value {
        json!({ self.field.as_str(): { "order": self.order.as_str() } })
    }
}

/// Zero-based page number and page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: usize,
    pub size: usize,
}

impl PageRequest {
    /// A size of zero is treated as one.
    pub fn of(page: usize, size: usize) -> Self {
        Self {
            page,
            size: size.max(1),
        }
    }

    pub fn offset(&self) -> usize {
        self.page * self.size
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::of(0, DEFAULT_PAGE_SIZE)
    }
}

/// A query with paging, sorting and aggregations attached.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NativeQuery {
    pub query: Query,
    pub pageable: PageRequest,
    pub sorts: Vec<Sort>,
    pub aggregations: Vec<AggregationRequest>,
    /// When false, no documents are fetched; only totals and aggregations.
    pub fetch_hits: bool,
}

impl NativeQuery {
    pub fn builder() -> NativeQueryBuilder {
        NativeQueryBuilder::default()
    }
}

#[derive(Debug, Clone)]
pub struct NativeQueryBuilder {
    inner: NativeQuery,
}

impl Default for NativeQueryBuilder {
    fn default() -> Self {
        Self {
            inner: NativeQuery {
                fetch_hits: true,
                ..NativeQuery::default()
            },
        }
    }
}

impl NativeQueryBuilder {
    pub fn query(mut self, query: Query) -> Self {
        self.inner.query = query;
        self
    }

    pub fn pageable(mut self, pageable: PageRequest) -> Self {
        self.inner.pageable = pageable;
        self
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.inner.sorts.push(sort);
        self
    }

    pub fn aggregation(mut self, aggregation: impl Into<AggregationRequest>) -> Self {
        self.inner.aggregations.push(aggregation.into());
        self
    }

    pub fn without_hits(mut self) -> Self {
        self.inner.fetch_hits = false;
        self
    }

    pub fn build(self) -> NativeQuery {
        self.inner
    }
}
