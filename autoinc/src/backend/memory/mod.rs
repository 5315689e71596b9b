use crate as autoinc;

mod table;

use anyhow::{bail, ensure, Result};
use async_trait::async_trait;
use autoinc::store::*;
use autoinc::{Error, Item, Value};
use spin::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use table::Table;
use tracing::info;

/// `Backend` keeps every table in memory behind a single lock.
/// Every operation holds the lock from the condition check to the last insert
/// so conditional puts and transactions are atomic.
#[derive(Clone)]
pub struct Backend {
    tables: Arc<Mutex<HashMap<String, Table>>>,
    limits: Limits,
}
impl Default for Backend {
    fn default() -> Self {
        Self::new()
    }
}
impl Backend {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(HashMap::new())),
            limits: Limits::default(),
        }
    }

    pub fn with_limits(self, limits: Limits) -> Self {
        Self { limits, ..self }
    }

    pub fn create_table(&self, schema: TableSchema) -> Result<()> {
        let mut tables = self.tables.lock();
        ensure!(
            !tables.contains_key(&schema.name),
            Error::TableExists(schema.name.clone())
        );
        info!("create table {} (key={:?})", schema.name, schema.key);
        tables.insert(schema.name.clone(), Table::new(schema));
        Ok(())
    }
}

fn table<'a>(tables: &'a HashMap<String, Table>, name: &str) -> Result<&'a Table> {
    match tables.get(name) {
        Some(x) => Ok(x),
        None => bail!(Error::TableNotFound(name.to_owned())),
    }
}

#[async_trait]
impl Store for Backend {
    async fn get(&self, table_name: &str, key: &Item) -> Result<Option<Item>> {
        let tables = self.tables.lock();
        let tbl = table(&tables, table_name)?;
        let key = tbl.schema().key_of(key)?;
        Ok(tbl.get(&key).cloned())
    }

    async fn put(&self, op: ConditionalPut) -> Result<()> {
        self.limits.check_item(&op.table, &op.item)?;

        let mut tables = self.tables.lock();
        let tbl = match tables.get_mut(&op.table) {
            Some(x) => x,
            None => bail!(Error::TableNotFound(op.table)),
        };
        let key = tbl.schema().key_of(&op.item)?;
        ensure!(
            op.condition.holds(tbl.get(&key)),
            Error::ConditionalCheckFailed(op.table)
        );
        tbl.insert(key, op.item);
        Ok(())
    }

    async fn transact_write(&self, ops: Vec<ConditionalPut>) -> Result<()> {
        self.limits.check_transaction(&ops)?;

        let mut tables = self.tables.lock();

        let mut keys = vec![];
        for op in &ops {
            let tbl = table(&tables, &op.table)?;
            keys.push((op.table.clone(), tbl.schema().key_of(&op.item)?));
        }
        ensure_distinct(&keys)?;

        for (op, (_, key)) in ops.iter().zip(&keys) {
            let tbl = table(&tables, &op.table)?;
            ensure!(
                op.condition.holds(tbl.get(key)),
                Error::TransactionCanceled(op.table.clone())
            );
        }

        for (op, (_, key)) in ops.into_iter().zip(keys) {
            if let Some(tbl) = tables.get_mut(&op.table) {
                tbl.insert(key, op.item);
            }
        }
        Ok(())
    }

    async fn query(&self, table_name: &str, prefix: &Item) -> Result<Vec<Item>> {
        let tables = self.tables.lock();
        let tbl = table(&tables, table_name)?;
        let prefix = tbl.schema().prefix_of(prefix)?;
        Ok(tbl.query(&prefix))
    }
}
