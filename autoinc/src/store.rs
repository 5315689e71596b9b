use super::*;

/// DynamoDB compatible limits.
pub const MAX_ITEM_SIZE: u64 = 400 * 1024;
pub const MAX_TRANSACT_ITEMS: usize = 100;

/// Precondition of a write, evaluated against the item currently stored under the same key.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub enum Condition {
    /// Always holds.
    None,
    /// There is no item under the key.
    ItemNotExists,
    /// The attribute is absent. This also holds if the item doesn't exist.
    AttributeNotExists(String),
    /// The item exists and the attribute equals the value.
    AttributeEquals(String, Value),
}
impl Condition {
    pub fn holds(&self, cur: Option<&Item>) -> bool {
        match self {
            Condition::None => true,
            Condition::ItemNotExists => cur.is_none(),
            Condition::AttributeNotExists(name) => cur.map_or(true, |x| !x.contains_key(name)),
            Condition::AttributeEquals(name, v) => {
                cur.and_then(|x| x.get(name)).map_or(false, |x| x == v)
            }
        }
    }
}

/// Write the whole item if the condition holds.
#[derive(Clone, Debug)]
pub struct ConditionalPut {
    pub table: String,
    pub item: Item,
    pub condition: Condition,
}
impl ConditionalPut {
    /// Unconditional put.
    pub fn new(table: impl Into<String>, item: Item) -> Self {
        Self {
            table: table.into(),
            item,
            condition: Condition::None,
        }
    }

    pub fn with_condition(self, condition: Condition) -> Self {
        Self { condition, ..self }
    }
}

/// `Store` is the key-value store the allocators are built on.
///
/// Implementations must be linearizable per item: a conditional write
/// evaluates its condition and applies the item as one step, and
/// a read returns the result of every write acknowledged before it.
#[async_trait]
pub trait Store: Sync + Send + 'static {
    /// Point read. Only the key attributes of `key` are used.
    async fn get(&self, table: &str, key: &Item) -> Result<Option<Item>>;

    /// Put the item if the condition holds, otherwise fail with `Error::ConditionalCheckFailed`.
    async fn put(&self, op: ConditionalPut) -> Result<()>;

    /// Apply all the puts or none of them.
    /// If any condition fails, fail with `Error::TransactionCanceled`.
    async fn transact_write(&self, ops: Vec<ConditionalPut>) -> Result<()>;

    /// Items whose leading key attributes equal `prefix`, in key order.
    async fn query(&self, table: &str, prefix: &Item) -> Result<Vec<Item>>;
}

/// Name and key attributes of a table.
/// Items are ordered by their key values in the order of `key`.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub key: Vec<String>,
}
impl TableSchema {
    pub fn new(name: impl Into<String>, key: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            key: key.into_iter().map(Into::into).collect(),
        }
    }

    /// Values of the key attributes of `item`.
    pub fn key_of(&self, item: &Item) -> Result<Vec<Value>> {
        let mut out = vec![];
        for attr in &self.key {
            match item.get(attr) {
                Some(v) => out.push(v.clone()),
                None => bail!(Error::MissingKeyAttribute {
                    table: self.name.clone(),
                    attribute: attr.clone(),
                }),
            }
        }
        Ok(out)
    }

    /// Leading key values given by `prefix`.
    /// Every attribute of `prefix` must be one of the leading key attributes.
    pub fn prefix_of(&self, prefix: &Item) -> Result<Vec<Value>> {
        for attr in prefix.keys() {
            ensure!(
                self.key.contains(attr),
                Error::NotKeyAttribute {
                    table: self.name.clone(),
                    attribute: attr.clone(),
                }
            );
        }
        let mut out = vec![];
        for attr in &self.key {
            match prefix.get(attr) {
                Some(v) => out.push(v.clone()),
                None => break,
            }
        }
        ensure!(
            out.len() == prefix.len(),
            Error::MissingKeyAttribute {
                table: self.name.clone(),
                attribute: self.key[out.len()].clone(),
            }
        );
        Ok(out)
    }
}

/// Size and count limits checked before anything is written.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Limits {
    pub max_item_size: u64,
    pub max_transact_items: usize,
}
impl Default for Limits {
    fn default() -> Self {
        Self {
            max_item_size: MAX_ITEM_SIZE,
            max_transact_items: MAX_TRANSACT_ITEMS,
        }
    }
}
impl Limits {
    pub fn check_item(&self, table: &str, item: &Item) -> Result<()> {
        let size = item_size(item)?;
        ensure!(
            size <= self.max_item_size,
            Error::ItemTooLarge {
                table: table.to_owned(),
                size,
                limit: self.max_item_size,
            }
        );
        Ok(())
    }

    pub fn check_transaction(&self, ops: &[ConditionalPut]) -> Result<()> {
        ensure!(
            ops.len() <= self.max_transact_items,
            Error::TooManyTransactItems {
                n: ops.len(),
                limit: self.max_transact_items,
            }
        );
        for op in ops {
            self.check_item(&op.table, &op.item)?;
        }
        Ok(())
    }
}

/// Encoded size of an item.
pub fn item_size(item: &Item) -> Result<u64> {
    Ok(bincode::serialized_size(item)?)
}

/// Fail if two puts in one transaction address the same item.
pub fn ensure_distinct(keys: &[(String, Vec<Value>)]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for (table, key) in keys {
        ensure!(
            seen.insert((table, key)),
            Error::DuplicateTransactItem(table.clone())
        );
    }
    Ok(())
}
