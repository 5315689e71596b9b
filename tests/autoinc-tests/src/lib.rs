use anyhow::Result;
use async_trait::async_trait;
use autoinc::backend::memory;
use autoinc::store::*;
use autoinc::{item, CounterConfig, ErrorKind, HistoryConfig, Item};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Barrier;
use tracing::info;

pub const COUNTER_TABLE: &str = "autoincrement";
pub const WIDGET_TABLE: &str = "widgets";
pub const HISTORY_TABLE: &str = "widgetHistory";

fn schemas() -> Vec<TableSchema> {
    vec![
        TableSchema::new(COUNTER_TABLE, ["tableName"]),
        TableSchema::new(WIDGET_TABLE, ["widgetID"]),
        TableSchema::new(HISTORY_TABLE, ["widgetID", "version"]),
    ]
}

pub struct Builder {
    limits: Limits,
}
impl Builder {
    fn new() -> Self {
        Self {
            limits: Limits::default(),
        }
    }

    pub fn with_max_item_size(self, n: u64) -> Self {
        Self {
            limits: Limits {
                max_item_size: n,
                ..self.limits
            },
        }
    }

    pub fn memory(self) -> Result<Arc<memory::Backend>> {
        let db = memory::Backend::new().with_limits(self.limits);
        for schema in schemas() {
            db.create_table(schema)?;
        }
        Ok(Arc::new(db))
    }

    pub fn redb(self) -> Result<Arc<autoinc::backend::redb::Backend>> {
        let mem = redb::backends::InMemoryBackend::new();
        let db = redb::Database::builder().create_with_backend(mem)?;
        let db = autoinc::backend::redb::Backend::new(db)?.with_limits(self.limits);
        for schema in schemas() {
            db.create_table(schema)?;
        }
        Ok(Arc::new(db))
    }
}

pub fn builder() -> Builder {
    Builder::new()
}

/// In-memory store with the widget tables.
pub fn memory_store() -> Result<Arc<memory::Backend>> {
    builder().memory()
}

/// Counter for the widgets table: `autoincrement{tableName="widgets"}.counter`.
pub fn counter_config() -> CounterConfig {
    CounterConfig::new(
        COUNTER_TABLE,
        item! { "tableName" => WIDGET_TABLE },
        WIDGET_TABLE,
        "widgetID",
    )
}

/// Version history of `widgets{widgetID=id}`.
pub fn history_config(id: i64) -> HistoryConfig {
    HistoryConfig::new(WIDGET_TABLE, item! { "widgetID" => id }, HISTORY_TABLE)
}

/// All the items in the table.
pub async fn scan<S: Store + ?Sized>(store: &S, table: &str) -> Result<Vec<Item>> {
    store.query(table, &Item::new()).await
}

/// `Racing` makes the first `n` reads wait for each other
/// so that `n` concurrent allocations start from the same state.
/// Later reads yield once so that retries interleave.
pub struct Racing<S> {
    inner: Arc<S>,
    barrier: Barrier,
    gated: AtomicUsize,
    attempts: AtomicUsize,
    conflicts: AtomicUsize,
}
impl<S: Store> Racing<S> {
    pub fn new(inner: Arc<S>, n: usize) -> Self {
        Self {
            inner,
            barrier: Barrier::new(n),
            gated: AtomicUsize::new(n),
            attempts: AtomicUsize::new(0),
            conflicts: AtomicUsize::new(0),
        }
    }

    /// Number of conditional writes tried.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of conditional writes rejected by their condition.
    pub fn conflicts(&self) -> usize {
        self.conflicts.load(Ordering::SeqCst)
    }

    fn record(&self, conditional: bool, res: &Result<()>) {
        if !conditional {
            return;
        }
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = res {
            if ErrorKind::of(e) == ErrorKind::Conflict {
                self.conflicts.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}
#[async_trait]
impl<S: Store> Store for Racing<S> {
    async fn get(&self, table: &str, key: &Item) -> Result<Option<Item>> {
        let out = self.inner.get(table, key).await?;
        let gated = self
            .gated
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if gated {
            self.barrier.wait().await;
        } else {
            tokio::task::yield_now().await;
        }
        Ok(out)
    }

    async fn put(&self, op: ConditionalPut) -> Result<()> {
        let conditional = op.condition != Condition::None;
        let res = self.inner.put(op).await;
        self.record(conditional, &res);
        res
    }

    async fn transact_write(&self, ops: Vec<ConditionalPut>) -> Result<()> {
        let conditional = ops.iter().any(|op| op.condition != Condition::None);
        let res = self.inner.transact_write(ops).await;
        self.record(conditional, &res);
        if res.is_err() {
            info!("transaction failed (attempts={})", self.attempts());
        }
        res
    }

    async fn query(&self, table: &str, prefix: &Item) -> Result<Vec<Item>> {
        self.inner.query(table, prefix).await
    }
}
