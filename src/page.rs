use crate::aggregation::{AggregationResult, Aggregations};
use serde::ser::{Serialize, SerializeStruct, Serializer};

/// One page of a paginated search, plus any aggregations that were requested.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub content: Vec<T>,
    /// Zero-based page number.
    pub number: usize,
    pub size: usize,
    /// Size of the whole matching set, not of this page.
    pub total_elements: u64,
    pub aggregations: Option<Aggregations>,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, number: usize, size: usize, total_elements: u64) -> Self {
        Self {
            content,
            number,
            size,
            total_elements,
            aggregations: None,
        }
    }

    pub fn with_aggregations(mut self, aggregations: Aggregations) -> Self {
        self.aggregations = Some(aggregations);
        self
    }

    pub fn total_pages(&self) -> u64 {
        if self.size == 0 {
            return 1;
        }
        let size = self.size as u64;
        (self.total_elements + size - 1) / size
    }

    pub fn has_next(&self) -> bool {
        ((self.number as u64) + 1) < self.total_pages()
    }

    pub fn content(&self) -> &[T] {
        &self.content
    }

    pub fn into_content(self) -> Vec<T> {
        self.content
    }

    pub fn aggregation(&self, name: &str) -> Option<&AggregationResult> {
        self.aggregations.as_ref().and_then(|a| a.get(name))
    }
}

impl<T: Serialize> Serialize for Page<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.aggregations.is_some() { 6 } else { 5 };
        let mut state = serializer.serialize_struct("Page", len)?;
        state.serialize_field("content", &self.content)?;
        state.serialize_field("number", &self.number)?;
        state.serialize_field("size", &self.size)?;
        state.serialize_field("total_elements", &self.total_elements)?;
        state.serialize_field("total_pages", &self.total_pages())?;
        match &self.aggregations {
            Some(aggregations) => state.serialize_field("aggregations", aggregations)?,
            None => state.skip_field("aggregations")?,
        }
        state.end()
    }
}
