//! Allocation orderings and the registry that names them.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use batchledger_core::{AggregateRoot, LedgerError, LedgerResult};

use crate::batch::Batch;

/// A batch ordering policy.
///
/// Implementations only define `compare`; `sort_batches` is a stable sort over
/// a copy, so the input is never reordered and equal keys keep a
/// deterministic order.
pub trait AllocationStrategy: Send + Sync + core::fmt::Debug {
    /// Registry key (lowercase).
    fn name(&self) -> &str;

    fn compare(&self, a: &Batch, b: &Batch) -> Ordering;

    fn sort_batches(&self, batches: &[Batch]) -> Vec<Batch> {
        let mut ordered = batches.to_vec();
        ordered.sort_by(|a, b| self.compare(a, b));
        ordered
    }
}

fn tie_break(a: &Batch, b: &Batch) -> Ordering {
    a.batch_no()
        .cmp(b.batch_no())
        .then_with(|| a.id().cmp(b.id()))
}

/// First received, first out.
#[derive(Debug, Default, Clone, Copy)]
pub struct Fifo;

impl AllocationStrategy for Fifo {
    fn name(&self) -> &str {
        "fifo"
    }

    fn compare(&self, a: &Batch, b: &Batch) -> Ordering {
        a.create_time()
            .cmp(&b.create_time())
            .then_with(|| tie_break(a, b))
    }
}

/// Last received, first out.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lifo;

impl AllocationStrategy for Lifo {
    fn name(&self) -> &str {
        "lifo"
    }

    fn compare(&self, a: &Batch, b: &Batch) -> Ordering {
        b.create_time()
            .cmp(&a.create_time())
            .then_with(|| tie_break(a, b))
    }
}

/// First expiring, first out. Undated batches go last.
#[derive(Debug, Default, Clone, Copy)]
pub struct Fefo;

impl AllocationStrategy for Fefo {
    fn name(&self) -> &str {
        "fefo"
    }

    fn compare(&self, a: &Batch, b: &Batch) -> Ordering {
        let by_expiry = match (a.expiry_date(), b.expiry_date()) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_expiry
            .then_with(|| a.create_time().cmp(&b.create_time()))
            .then_with(|| tie_break(a, b))
    }
}

/// Explicit name → strategy map, populated at startup.
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    strategies: BTreeMap<String, Arc<dyn AllocationStrategy>>,
}

impl StrategyRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `fifo`, `lifo` and `fefo`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Fifo);
        registry.register(Lifo);
        registry.register(Fefo);
        registry
    }

    /// Register a strategy under its name, returning any strategy it replaced.
    pub fn register<S>(&mut self, strategy: S) -> Option<Arc<dyn AllocationStrategy>>
    where
        S: AllocationStrategy + 'static,
    {
        let key = strategy.name().to_ascii_lowercase();
        self.strategies.insert(key, Arc::new(strategy))
    }

    /// Look up a strategy by name (case-insensitive).
    pub fn get(&self, name: &str) -> LedgerResult<Arc<dyn AllocationStrategy>> {
        self.strategies
            .get(&name.trim().to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| {
                LedgerError::invalid_argument(format!(
                    "unknown allocation strategy '{name}' (registered: {})",
                    self.list_names().join(", ")
                ))
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(&name.trim().to_ascii_lowercase())
    }

    /// Registered names, sorted.
    pub fn list_names(&self) -> Vec<String> {
        self.strategies.keys().cloned().collect()
    }
}
