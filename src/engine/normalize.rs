//! Conversion of native result shapes into `columns` + column-aligned `rows`.
//!
//! Null handling differs per backend and is kept that way: text backends
//! turn missing cells into `""`, structured backends into JSON `null`.
//! Duplicate column names are passed through untouched.

use serde_json::Value;

/// Split a text page whose first row is the header.
///
/// A page with no rows at all has no header, so it yields no columns.
pub fn split_header(mut rows: Vec<Vec<Option<String>>>) -> (Vec<String>, Vec<Vec<Option<String>>>) {
    if rows.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let header = rows.remove(0);
    let columns = header.into_iter().map(Option::unwrap_or_default).collect();
    (columns, rows)
}

/// Text cells to JSON strings, each row padded or cut to `width`.
pub fn text_rows(width: usize, rows: Vec<Vec<Option<String>>>) -> Vec<Vec<Value>> {
    rows.into_iter()
        .map(|row| {
            let mut cells: Vec<Value> = row
                .into_iter()
                .take(width)
                .map(|cell| Value::String(cell.unwrap_or_default()))
                .collect();
            cells.resize(width, Value::String(String::new()));
            cells
        })
        .collect()
}

/// Structured rows padded or cut to `width`, missing cells as `null`.
pub fn structured_rows(width: usize, rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    rows.into_iter()
        .map(|mut row| {
            row.resize(width, Value::Null);
            row
        })
        .collect()
}
