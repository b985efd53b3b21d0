//! Access policy applied before any backend is contacted.
//!
//! Two independent gates:
//! - [`enforce`] classifies SQL text and rejects forbidden operation keywords
//!   for the caller's [`AccessMode`];
//! - [`WriteGate`] is the server-level switch that disables every mutating
//!   entry point unless writes were enabled at startup.

use crate::classify::{self, OperationSet};
use crate::error::TablesError;
use std::fmt;
use std::future::Future;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Reject any write operation.
    ReadOnly,
    /// Allow ordinary writes, reject destructive ones.
    ReadWrite,
}

impl AccessMode {
    pub(crate) fn forbidden_label(&self) -> &'static str {
        match self {
            AccessMode::ReadOnly => "write",
            AccessMode::ReadWrite => "destructive",
        }
    }

    fn forbids(&self, op: &str) -> bool {
        match self {
            AccessMode::ReadOnly => classify::is_write(op),
            AccessMode::ReadWrite => classify::is_destructive(op),
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::ReadOnly => f.write_str("read-only"),
            AccessMode::ReadWrite => f.write_str("write"),
        }
    }
}

/// Classify `sql` and reject it if any top-level operation is forbidden in `mode`.
///
/// The error lists every disallowed keyword found, not just the first.
pub fn enforce(sql: &str, mode: AccessMode) -> Result<OperationSet, TablesError> {
    let operations = classify::operations(sql);
    let disallowed: OperationSet = operations
        .iter()
        .filter(|op| mode.forbids(op))
        .cloned()
        .collect();

    if disallowed.is_empty() {
        debug!(?operations, %mode, "query passed policy check");
        Ok(operations)
    } else {
        warn!(?disallowed, %mode, "query rejected by policy");
        Err(TablesError::Policy { mode, disallowed })
    }
}

/// Check-then-call: run `call` only if `sql` passes [`enforce`] for `mode`.
pub async fn guarded<F, Fut, T>(sql: &str, mode: AccessMode, call: F) -> Result<T, TablesError>
where
    F: FnOnce(OperationSet) -> Fut,
    Fut: Future<Output = Result<T, TablesError>>,
{
    let operations = enforce(sql, mode)?;
    call(operations).await
}

/// Server-wide write switch, fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct WriteGate {
    allow_write: bool,
}

impl WriteGate {
    pub fn new(allow_write: bool) -> Self {
        Self { allow_write }
    }

    pub fn allows_write(&self) -> bool {
        self.allow_write
    }

    pub fn check(&self, operation: &str) -> Result<(), TablesError> {
        if self.allow_write {
            Ok(())
        } else {
            Err(TablesError::WriteDisabled {
                operation: operation.to_string(),
            })
        }
    }

    /// Run `call` only when writes are enabled; the body never starts otherwise.
    pub async fn guard<F, Fut, T>(&self, operation: &str, call: F) -> Result<T, TablesError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, TablesError>>,
    {
        self.check(operation)?;
        call().await
    }
}
