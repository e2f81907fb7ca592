//! Outcome of a batch save.
//!
//! The repository hands this back as the engine reported it and does not
//! act on partial failures. Callers that care inspect [`BulkResponse::failures`].

use crate::error::AppError;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkItemOutcome {
    pub id: String,
    pub status: u16,
    /// `created`, `updated`, ... as reported by the engine.
    pub result: Option<String>,
    pub error: Option<String>,
}

impl BulkItemOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkResponse {
    pub errors: bool,
    pub items: Vec<BulkItemOutcome>,
}

impl BulkResponse {
    pub fn from_items(items: Vec<BulkItemOutcome>) -> Self {
        Self {
            errors: items.iter().any(|i| !i.is_success()),
            items,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &BulkItemOutcome> {
        self.items.iter().filter(|i| !i.is_success())
    }

    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.is_success()).count()
    }

    /// Reads a `_bulk` API response body.
    pub fn from_es(body: &Value) -> Result<Self, AppError> {
        let raw_items = body["items"]
            .as_array()
            .ok_or_else(|| AppError::MalformedResponse("bulk response has no items".to_string()))?;

        let mut items = Vec::with_capacity(raw_items.len());
        for raw in raw_items {
            // each entry is keyed by its action: {"index": {...}}
            let action = raw
                .as_object()
                .and_then(|o| o.values().next())
                .ok_or_else(|| {
                    AppError::MalformedResponse(format!("unexpected bulk item: {}", raw))
                })?;

            items.push(BulkItemOutcome {
                id: action["_id"].as_str().unwrap_or_default().to_string(),
                status: action["status"].as_u64().unwrap_or(0) as u16,
                result: action["result"].as_str().map(str::to_string),
                error: action.get("error").map(|e| match &e["reason"] {
                    Value::String(reason) => reason.clone(),
                    _ => e.to_string(),
                }),
            });
        }

        Ok(Self {
            errors: body["errors"].as_bool().unwrap_or(false),
            items,
        })
    }
}
