//! Server-side processing contract of the DataTables grid plugin.

use serde::{Deserialize, Serialize};
use utoipa::IntoParams;

const DEFAULT_PAGE_LENGTH: i64 = 10;
const MAX_PAGE_LENGTH: i64 = 1000;

/// Query parameters sent by DataTables (`search[value]`, `order[0][column]`,
/// ...). Unknown parameters such as `columns[i][data]` are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DataTableQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draw: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    /// Page size; `-1` requests every row (capped).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<i64>,
    #[serde(default, rename = "search[value]", alias = "search", skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, rename = "order[0][column]", skip_serializing_if = "Option::is_none")]
    pub order_column: Option<usize>,
    #[serde(default, rename = "order[0][dir]", skip_serializing_if = "Option::is_none")]
    pub order_dir: Option<String>,
}

/// Sanitised paging window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub draw: i64,
    pub offset: i64,
    pub limit: i64,
    pub search: Option<String>,
    pub order_column: Option<usize>,
    pub descending: bool,
}

impl DataTableQuery {
    pub fn page(&self) -> Page {
        let limit = match self.length {
            Some(-1) => MAX_PAGE_LENGTH,
            Some(len) if len > 0 => len.min(MAX_PAGE_LENGTH),
            _ => DEFAULT_PAGE_LENGTH,
        };

        Page {
            draw: self.draw.unwrap_or(0).max(0),
            offset: self.start.unwrap_or(0).max(0),
            limit,
            search: crate::utils::like_pattern(self.search.as_deref()),
            order_column: self.order_column,
            descending: self
                .order_dir
                .as_deref()
                .map(|dir| dir.eq_ignore_ascii_case("desc"))
                .unwrap_or(false),
        }
    }
}

impl Page {
    /// `ORDER BY` over a whitelist; out-of-range indexes fall back to the first column.
    pub fn order_by(&self, columns: &[&str]) -> String {
        let column = self
            .order_column
            .and_then(|idx| columns.get(idx))
            .or_else(|| columns.first())
            .copied()
            .unwrap_or("rowid");
        let dir = if self.descending { "DESC" } else { "ASC" };
        format!("ORDER BY {column} {dir}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTableResponse<T> {
    pub draw: i64,
    pub records_total: i64,
    pub records_filtered: i64,
    pub data: Vec<T>,
}

impl<T> DataTableResponse<T> {
    pub fn new(page: &Page, records_total: i64, records_filtered: i64, data: Vec<T>) -> Self {
        Self {
            draw: page.draw,
            records_total,
            records_filtered,
            data,
        }
    }
}
