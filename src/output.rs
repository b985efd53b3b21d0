use crate::engine::{EngineKind, QueryResult};
use crate::error::TablesError;
use serde::Serialize;
use std::collections::BTreeMap;

/// Stdout shape for raised errors.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub status: &'static str,
    pub kind: &'static str,
    pub error: String,
}

impl ErrorEnvelope {
    pub fn from_error(err: &TablesError) -> Self {
        Self {
            status: "error",
            kind: err.kind(),
            error: err.to_string(),
        }
    }
}

fn to_pretty<T: Serialize>(value: &T) -> Result<String, TablesError> {
    serde_json::to_string_pretty(value).map_err(|e| TablesError::Format {
        message: e.to_string(),
    })
}

pub fn render_result(result: &QueryResult) -> Result<String, TablesError> {
    to_pretty(result)
}

pub fn render_engine_status(status: &BTreeMap<EngineKind, bool>) -> Result<String, TablesError> {
    to_pretty(status)
}

pub fn render_error(err: &TablesError) -> String {
    let envelope = ErrorEnvelope::from_error(err);
    to_pretty(&envelope).unwrap_or_else(|_| envelope.error.clone())
}

/// Print a rendered document to stdout.
pub fn print_result(json: &str) {
    println!("{}", json);
}

/// Print error to stderr in the contract format `error: <category>: <message>`,
/// and the JSON envelope to stdout.
pub fn print_error(err: &TablesError) {
    eprintln!("error: {}", err);
    println!("{}", render_error(err));
}
