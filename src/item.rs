// src/item.rs

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A single catalogue entry. `id` is also the document key in the index.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: i64,
    pub title: String,
    pub category: String,
    pub brand: String,
    pub price: f64,
    pub image_url: String,
}

impl Item {
    pub fn new(
        id: i64,
        title: impl Into<String>,
        category: impl Into<String>,
        brand: impl Into<String>,
        price: f64,
        image_url: impl Into<String>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            category: category.into(),
            brand: brand.into(),
            price,
            image_url: image_url.into(),
        }
    }

    /// Document key used by the engine.
    pub fn document_id(&self) -> String {
        self.id.to_string()
    }

    /// Looks a field up by its indexed (JSON) name.
    pub fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        match name {
            "id" => Some(FieldValue::Long(self.id)),
            "title" => Some(FieldValue::Text(&self.title)),
            "category" => Some(FieldValue::Text(&self.category)),
            "brand" => Some(FieldValue::Text(&self.brand)),
            "price" => Some(FieldValue::Double(self.price)),
            "imageUrl" => Some(FieldValue::Text(&self.image_url)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Long(i64),
    Double(f64),
    Text(&'a str),
}

impl FieldValue<'_> {
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            FieldValue::Long(v) => Some(v as f64),
            FieldValue::Double(v) => Some(v),
            FieldValue::Text(_) => None,
        }
    }

    /// String form used as a terms bucket key, matching how a JSON number
    /// key prints (`3299.0` for a double, `2` for a long).
    pub fn to_key(&self) -> String {
        match self {
            FieldValue::Long(v) => v.to_string(),
            FieldValue::Double(v) => serde_json::Number::from_f64(*v)
                .map(|n| n.to_string())
                .unwrap_or_else(|| v.to_string()),
            FieldValue::Text(s) => s.to_string(),
        }
    }

    /// Total order over values of the same field. Numbers sort before text.
    pub fn total_cmp(&self, other: &FieldValue<'_>) -> Ordering {
        match (self, other) {
            (FieldValue::Text(a), FieldValue::Text(b)) => a.cmp(b),
            (FieldValue::Text(_), _) => Ordering::Greater,
            (_, FieldValue::Text(_)) => Ordering::Less,
            (a, b) => {
                // both numeric here
                let a = a.as_f64().unwrap_or_default();
                let b = b.as_f64().unwrap_or_default();
                a.total_cmp(&b)
            }
        }
    }
}
