use std::sync::Arc;

use batchledger_core::{LedgerError, LedgerResult};
use batchledger_events::{EventSink, NoopEventSink};
use batchledger_inventory::{AllocationStrategy, StockEvent, StrategyRegistry};

use crate::config::LedgerConfig;
use crate::store::{LedgerStore, Transaction};

/// Shared collaborators of every ledger service.
///
/// Cloning is cheap; all services built from one context see the same store,
/// sink and strategy registry.
#[derive(Clone)]
pub struct LedgerContext {
    store: Arc<dyn LedgerStore>,
    sink: Arc<dyn EventSink<StockEvent>>,
    registry: Arc<StrategyRegistry>,
    config: LedgerConfig,
}

impl core::fmt::Debug for LedgerContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LedgerContext")
            .field("strategies", &self.registry.list_names())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LedgerContext {
    pub fn new(store: Arc<dyn LedgerStore>, sink: Arc<dyn EventSink<StockEvent>>, config: LedgerConfig) -> Self {
        Self {
            store,
            sink,
            registry: Arc::new(StrategyRegistry::with_defaults()),
            config,
        }
    }

    /// Context that drops every event.
    pub fn without_events(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> Self {
        Self::new(store, Arc::new(NoopEventSink), config)
    }

    pub fn with_registry(mut self, registry: StrategyRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn store(&self) -> &dyn LedgerStore {
        self.store.as_ref()
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Resolve `name`, or the configured default when `None`.
    pub fn strategy(&self, name: Option<&str>) -> LedgerResult<Arc<dyn AllocationStrategy>> {
        self.registry.get(name.unwrap_or(&self.config.default_strategy))
    }

    /// Run `work` as one unit of work.
    ///
    /// - an error from `work` discards everything it staged
    /// - a version conflict at commit re-runs `work` from scratch, up to
    ///   `max_commit_attempts` times
    /// - recorded events are emitted only after the commit succeeds
    pub fn transact<T, F>(&self, operation: &'static str, mut work: F) -> LedgerResult<T>
    where
        F: FnMut(&mut Transaction<'_>) -> LedgerResult<T>,
    {
        let max_attempts = self.config.max_commit_attempts.max(1);
        let mut attempt = 1;
        loop {
            let mut tx = Transaction::new(self.store.as_ref());
            let value = work(&mut tx)?;
            let (changes, events) = tx.into_parts();
            let rows = changes.len();

            match self.store.commit(changes) {
                Ok(()) => {
                    tracing::debug!(operation, attempt, rows, "ledger transaction committed");
                    for event in events {
                        self.sink.emit(event);
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let err = LedgerError::from(err);
                    if !err.is_retryable() || attempt >= max_attempts {
                        return Err(err);
                    }
                    tracing::warn!(operation, attempt, max_attempts, error = %err, "commit conflict, retrying");
                    attempt += 1;
                }
            }
        }
    }
}
