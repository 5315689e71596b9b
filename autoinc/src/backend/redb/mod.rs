use crate as autoinc;

use anyhow::{bail, ensure, Result};
use async_trait::async_trait;
use autoinc::store::*;
use autoinc::{Error, Item, Value};
use redb::{Database, ReadableTable, TableDefinition};
use spin::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

mod value;

/// Table name -> encoded `TableSchema`.
const SCHEMA: TableDefinition<&str, &[u8]> = TableDefinition::new("autoinc.schema");

/// Encoded key values -> encoded item.
fn table_def(name: &str) -> TableDefinition<'_, &'static [u8], &'static [u8]> {
    TableDefinition::new(name)
}

/// `Backend` stores every table in a redb database.
/// Conditional writes are evaluated inside a redb write transaction,
/// which redb runs one at a time.
pub struct Backend {
    db: Arc<Database>,
    schemas: Mutex<HashMap<String, TableSchema>>,
    limits: Limits,
}
impl Backend {
    /// Open the store. Tables created before are loaded from the database.
    pub fn new(redb: redb::Database) -> Result<Self> {
        let db = Arc::new(redb);

        let mut schemas = HashMap::new();
        let tx = db.begin_write()?;
        {
            let tbl = tx.open_table(SCHEMA)?;
            for e in tbl.iter()? {
                let (name, bin) = e?;
                let schema: TableSchema = value::desr(bin.value())?;
                schemas.insert(name.value().to_owned(), schema);
            }
        }
        tx.commit()?;
        info!("opened redb store ({} tables)", schemas.len());

        Ok(Self {
            db,
            schemas: Mutex::new(schemas),
            limits: Limits::default(),
        })
    }

    pub fn with_limits(self, limits: Limits) -> Self {
        Self { limits, ..self }
    }

    pub fn create_table(&self, schema: TableSchema) -> Result<()> {
        let mut schemas = self.schemas.lock();
        ensure!(
            !schemas.contains_key(&schema.name),
            Error::TableExists(schema.name.clone())
        );

        let tx = self.db.begin_write()?;
        {
            let mut tbl = tx.open_table(SCHEMA)?;
            tbl.insert(schema.name.as_str(), value::ser(&schema)?.as_slice())?;
            let _ = tx.open_table(table_def(&schema.name))?;
        }
        tx.commit()?;

        info!("create table {} (key={:?})", schema.name, schema.key);
        schemas.insert(schema.name.clone(), schema);
        Ok(())
    }

    fn schema(&self, table: &str) -> Result<TableSchema> {
        match self.schemas.lock().get(table) {
            Some(x) => Ok(x.clone()),
            None => bail!(Error::TableNotFound(table.to_owned())),
        }
    }

    /// Encoded key and item of a put.
    fn encode(&self, op: &ConditionalPut) -> Result<(Vec<Value>, Vec<u8>, Vec<u8>)> {
        let key = self.schema(&op.table)?.key_of(&op.item)?;
        let k = value::ser(&key)?;
        let v = value::ser(&op.item)?;
        Ok((key, k, v))
    }
}

#[async_trait]
impl Store for Backend {
    async fn get(&self, table: &str, key: &Item) -> Result<Option<Item>> {
        let k = value::ser(&self.schema(table)?.key_of(key)?)?;

        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(table_def(table))?;
        match tbl.get(k.as_slice())? {
            Some(bin) => Ok(Some(value::desr(bin.value())?)),
            None => Ok(None),
        }
    }

    async fn put(&self, op: ConditionalPut) -> Result<()> {
        self.limits.check_item(&op.table, &op.item)?;
        let (_, k, v) = self.encode(&op)?;

        let tx = self.db.begin_write()?;
        let applied = {
            let mut tbl = tx.open_table(table_def(&op.table))?;
            let cur: Option<Item> = match tbl.get(k.as_slice())? {
                Some(bin) => Some(value::desr(bin.value())?),
                None => None,
            };
            if op.condition.holds(cur.as_ref()) {
                tbl.insert(k.as_slice(), v.as_slice())?;
                true
            } else {
                false
            }
        };
        if !applied {
            tx.abort()?;
            bail!(Error::ConditionalCheckFailed(op.table));
        }
        tx.commit()?;
        Ok(())
    }

    async fn transact_write(&self, ops: Vec<ConditionalPut>) -> Result<()> {
        self.limits.check_transaction(&ops)?;

        let mut keys = vec![];
        let mut rows = vec![];
        for op in &ops {
            let (key, k, v) = self.encode(op)?;
            keys.push((op.table.clone(), key));
            rows.push((k, v));
        }
        ensure_distinct(&keys)?;

        let tx = self.db.begin_write()?;
        let mut failed = None;
        for (op, (k, _)) in ops.iter().zip(&rows) {
            let tbl = tx.open_table(table_def(&op.table))?;
            let cur: Option<Item> = match tbl.get(k.as_slice())? {
                Some(bin) => Some(value::desr(bin.value())?),
                None => None,
            };
            if !op.condition.holds(cur.as_ref()) {
                failed = Some(op.table.clone());
                break;
            }
        }
        if let Some(table) = failed {
            tx.abort()?;
            bail!(Error::TransactionCanceled(table));
        }

        for (op, (k, v)) in ops.iter().zip(&rows) {
            let mut tbl = tx.open_table(table_def(&op.table))?;
            tbl.insert(k.as_slice(), v.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn query(&self, table: &str, prefix: &Item) -> Result<Vec<Item>> {
        let prefix = self.schema(table)?.prefix_of(prefix)?;

        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(table_def(table))?;
        let mut out = vec![];
        for e in tbl.iter()? {
            let (k, v) = e?;
            let key: Vec<Value> = value::desr(k.value())?;
            if key.starts_with(&prefix) {
                let item: Item = value::desr(v.value())?;
                out.push((key, item));
            }
        }
        // Encoded keys don't sort like the values they encode.
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out.into_iter().map(|(_, x)| x).collect())
    }
}
