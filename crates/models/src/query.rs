use crate::{Condition, SchemaId};
use serde::{Deserialize, Serialize};

/// One requested sort key, named by dotted attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeOrder {
    pub attr: String,
    #[serde(default)]
    pub descending: bool,
}

/// 1-based pagination request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page: u32,
    pub items_per_page: u32,
}

impl Page {
    /// Clamp both members into `[1, max_page_size]`.
    pub fn clamp(&self, max_page_size: u32) -> Page {
        Page {
            page: self.page.max(1),
            items_per_page: self.items_per_page.clamp(1, max_page_size),
        }
    }

    pub fn limit(&self) -> i64 {
        self.items_per_page as i64
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.items_per_page as i64
    }
}

impl Default for Page {
    fn default() -> Self {
        Page {
            page: 1,
            items_per_page: 50,
        }
    }
}

/// A condition query over one schema's records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordQuery {
    pub schema_id: SchemaId,
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub order: Vec<AttributeOrder>,
    #[serde(default)]
    pub page: Page,
}

impl RecordQuery {
    pub fn new(schema_id: SchemaId) -> Self {
        Self {
            schema_id,
            condition: None,
            order: Vec::new(),
            page: Page::default(),
        }
    }
}

/// One page of results with pagination metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPage<T> {
    pub data: Vec<T>,
    pub total_records: u64,
    pub total_pages: u64,
    pub current_page: u32,
}

impl<T> ResultPage<T> {
    pub fn empty(page: &Page) -> Self {
        Self {
            data: Vec::new(),
            total_records: 0,
            total_pages: 0,
            current_page: page.page,
        }
    }

    pub fn new(data: Vec<T>, total_records: u64, page: &Page) -> Self {
        Self {
            data,
            total_records,
            total_pages: total_records.div_ceil(page.items_per_page.max(1) as u64),
            current_page: page.page,
        }
    }

    /// Map the payload type, keeping pagination metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> ResultPage<U> {
        ResultPage {
            data: self.data.into_iter().map(f).collect(),
            total_records: self.total_records,
            total_pages: self.total_pages,
            current_page: self.current_page,
        }
    }
}
