use crate::arn::TableReference;
use crate::clients::ClientFactory;
use crate::config::EngineSettings;
use crate::engine::duckdb::LocalDuckDb;
use crate::engine::iceberg::RestCatalogSession;
use crate::engine::{
    AthenaEngine, DuckDbEngine, EngineAdapter, EngineKind, IcebergEngine, QueryResult, SparkEngine,
};
use crate::error::TablesError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Queries at least this long never take the low-latency route.
const SHORT_QUERY_CHARS: usize = 500;

/// Structural hints used for engine selection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct QueryShape {
    join: bool,
    group_by: bool,
    window: bool,
    cte: bool,
}

impl QueryShape {
    fn of(sql: &str) -> Self {
        let words: Vec<String> = sql
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .filter(|w| !w.is_empty())
            .map(|w| w.to_ascii_uppercase())
            .collect();
        let has = |word: &str| words.iter().any(|w| w == word);
        Self {
            join: has("JOIN"),
            group_by: words.windows(2).any(|pair| pair[0] == "GROUP" && pair[1] == "BY"),
            window: has("WINDOW") || has("OVER"),
            cte: has("WITH"),
        }
    }

    fn is_complex(&self) -> bool {
        self.join || self.group_by || self.window || self.cte
    }
}

/// Owns the registered adapters and routes each query to one of them.
///
/// The registry is fixed after construction.
pub struct EngineManager {
    engines: BTreeMap<EngineKind, EngineAdapter>,
    cancel: CancellationToken,
}

impl EngineManager {
    /// Build every configured adapter. Kinds whose construction fails are left out.
    pub fn from_settings(settings: &EngineSettings, clients: Arc<dyn ClientFactory>) -> Self {
        let cancel = CancellationToken::new();
        let mut adapters: Vec<Result<EngineAdapter, (EngineKind, TablesError)>> = vec![
            DuckDbEngine::new(
                settings.duckdb.clone(),
                Arc::clone(&clients),
                Arc::new(LocalDuckDb::new()),
            )
            .map(EngineAdapter::DuckDb)
            .map_err(|e| (EngineKind::DuckDb, e)),
            AthenaEngine::new(settings.athena.clone(), Arc::clone(&clients))
                .map(|e| EngineAdapter::Athena(e.with_cancellation(cancel.clone())))
                .map_err(|e| (EngineKind::Athena, e)),
        ];

        if let Some(spark) = &settings.spark {
            adapters.push(
                SparkEngine::new(spark.clone(), Arc::clone(&clients))
                    .map(|e| EngineAdapter::Spark(e.with_cancellation(cancel.clone())))
                    .map_err(|e| (EngineKind::Spark, e)),
            );
        }
        if let Some(iceberg) = &settings.iceberg {
            let session = Arc::new(RestCatalogSession::new(iceberg.clone()));
            adapters.push(
                IcebergEngine::new(iceberg.clone(), session)
                    .map(EngineAdapter::Iceberg)
                    .map_err(|e| (EngineKind::Iceberg, e)),
            );
        }

        let mut engines = BTreeMap::new();
        for adapter in adapters {
            match adapter {
                Ok(adapter) => {
                    info!(engine = %adapter.kind(), "engine initialized");
                    engines.insert(adapter.kind(), adapter);
                }
                Err((kind, e)) => warn!(engine = %kind, error = %e, "engine not available"),
            }
        }

        Self { engines, cancel }
    }

    /// Registry from ready-made adapters. Later duplicates of a kind replace earlier ones.
    pub fn with_engines(adapters: impl IntoIterator<Item = EngineAdapter>) -> Self {
        let engines = adapters
            .into_iter()
            .map(|adapter| (adapter.kind(), adapter))
            .collect();
        Self {
            engines,
            cancel: CancellationToken::new(),
        }
    }

    /// Share `cancel` with callers that need to abandon in-flight polls.
    ///
    /// Only adapters built by [`EngineManager::from_settings`] observe this token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn registered(&self) -> Vec<EngineKind> {
        self.engines.keys().copied().collect()
    }

    pub fn is_registered(&self, kind: EngineKind) -> bool {
        self.engines.contains_key(&kind)
    }

    pub fn iceberg(&self) -> Option<&IcebergEngine> {
        match self.engines.get(&EngineKind::Iceberg) {
            Some(EngineAdapter::Iceberg(engine)) => Some(engine),
            _ => None,
        }
    }

    /// Pick an engine: a registered preference wins, otherwise route by query shape.
    pub fn select_engine(&self, sql: &str, preference: Option<EngineKind>) -> EngineKind {
        if let Some(kind) = preference
            && self.is_registered(kind)
        {
            return kind;
        }

        let shape = QueryShape::of(sql);
        let selected = if !shape.join
            && !shape.group_by
            && sql.chars().count() < SHORT_QUERY_CHARS
            && self.is_registered(EngineKind::DuckDb)
        {
            EngineKind::DuckDb
        } else if shape.is_complex() && self.is_registered(EngineKind::Athena) {
            EngineKind::Athena
        } else if self.is_registered(EngineKind::DuckDb) {
            EngineKind::DuckDb
        } else {
            self.engines
                .keys()
                .next()
                .copied()
                .unwrap_or_else(|| preference.unwrap_or(EngineKind::DuckDb))
        };
        debug!(?preference, ?shape, engine = %selected, "engine selected");
        selected
    }

    /// Run on the selected engine. Never fails; an unregistered engine yields an error result.
    pub async fn execute_query(
        &self,
        table: &TableReference,
        sql: &str,
        preference: Option<EngineKind>,
        limit: Option<usize>,
    ) -> QueryResult {
        let kind = self.select_engine(sql, preference);
        match self.engines.get(&kind) {
            Some(engine) => engine.execute(table, sql, limit).await,
            None => QueryResult::error(kind, format!("Engine {} is not available", kind), 0.0),
        }
    }

    /// Reachability of every registered engine.
    pub async fn test_engines(&self) -> BTreeMap<EngineKind, bool> {
        let mut results = BTreeMap::new();
        for (kind, engine) in &self.engines {
            results.insert(*kind, engine.test_connection().await);
        }
        results
    }
}
