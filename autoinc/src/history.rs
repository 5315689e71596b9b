use super::*;

use crate::protocol::Sequence;

/// Configuration of `HistoryAllocator`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Table holding the owner record.
    pub owner_table: String,
    /// Key of the owner record.
    pub sequence_key: Item,
    /// Table the snapshots are appended to.
    /// Its key is the key attributes of the owner followed by the version attribute.
    pub history_table: String,
    pub version_attribute: String,
    /// An owner record without the version attribute is at this version.
    pub initial_value: i64,
    /// Give up after this many conflicts. Unbounded if `None`.
    pub max_attempts: Option<u32>,
}
impl HistoryConfig {
    pub fn new(
        owner_table: impl Into<String>,
        sequence_key: Item,
        history_table: impl Into<String>,
    ) -> Self {
        Self {
            owner_table: owner_table.into(),
            sequence_key,
            history_table: history_table.into(),
            version_attribute: "version".to_owned(),
            initial_value: 1,
            max_attempts: None,
        }
    }

    pub fn with_version_attribute(self, name: impl Into<String>) -> Self {
        Self {
            version_attribute: name.into(),
            ..self
        }
    }

    pub fn with_initial_value(self, v: i64) -> Self {
        Self {
            initial_value: v,
            ..self
        }
    }

    pub fn with_max_attempts(self, n: u32) -> Self {
        Self {
            max_attempts: Some(n),
            ..self
        }
    }
}

/// `HistoryAllocator` versions a record in place
/// and keeps every version as an immutable snapshot in a history table.
///
/// The owner update and the snapshot are written in one transaction
/// so a version is either in both places or in neither.
/// There is no unguarded mode: every writer takes part in the same optimistic loop.
pub struct HistoryAllocator<S: Store + ?Sized> {
    store: Arc<S>,
    config: HistoryConfig,
    label: String,
}
impl<S: Store + ?Sized> HistoryAllocator<S> {
    pub fn new(store: Arc<S>, config: HistoryConfig) -> Self {
        let label = describe(&config.owner_table, &config.sequence_key);
        Self {
            store,
            config,
            label,
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Overlay `attributes` on the owner record, advance its version and record the snapshot.
    /// The version attribute in `attributes` is ignored.
    pub async fn allocate(&self, attributes: Item) -> Result<i64> {
        let seq = HistorySequence {
            this: self,
            attributes: &attributes,
        };
        protocol::allocate(&seq, Mode::Guarded, self.config.max_attempts).await
    }

    /// The owner record.
    pub async fn get(&self) -> Result<Option<Item>> {
        self.store
            .get(&self.config.owner_table, &self.config.sequence_key)
            .await
    }

    /// The version stored in the owner record.
    /// `None` if the owner doesn't exist or was never versioned.
    pub async fn last_version(&self) -> Result<Option<i64>> {
        let owner = self.get().await?;
        match owner.as_ref().and_then(|x| x.get(&self.config.version_attribute)) {
            None => Ok(None),
            Some(v) => match v.as_int() {
                Some(x) => Ok(Some(x)),
                None => bail!(Error::NotANumber(self.config.version_attribute.clone())),
            },
        }
    }

    /// All snapshots of the owner, oldest first.
    pub async fn history(&self) -> Result<Vec<Item>> {
        self.store
            .query(&self.config.history_table, &self.config.sequence_key)
            .await
    }
}

struct HistorySequence<'a, S: Store + ?Sized> {
    this: &'a HistoryAllocator<S>,
    attributes: &'a Item,
}
#[async_trait]
impl<S: Store + ?Sized> Sequence for HistorySequence<'_, S> {
    /// The owner record.
    type State = Option<Item>;

    fn label(&self) -> &str {
        &self.this.label
    }

    fn initial_value(&self) -> i64 {
        self.this.config.initial_value
    }

    async fn read_state(&self) -> Result<Option<Item>> {
        self.this.get().await
    }

    fn current_value(&self, owner: &Option<Item>) -> Result<Option<i64>> {
        let attr = &self.this.config.version_attribute;
        match owner.as_ref().and_then(|x| x.get(attr)) {
            // An unversioned owner is at the initial version.
            None => Ok(Some(self.this.config.initial_value)),
            Some(v) => match v.as_int() {
                Some(x) => Ok(Some(x)),
                None => bail!(Error::NotANumber(attr.clone())),
            },
        }
    }

    fn condition(&self, owner: &Option<Item>) -> Condition {
        let attr = self.this.config.version_attribute.clone();
        match owner.as_ref().and_then(|x| x.get(&attr)) {
            None => Condition::AttributeNotExists(attr),
            Some(v) => Condition::AttributeEquals(attr, v.clone()),
        }
    }

    async fn write(&self, owner: Option<Item>, next: i64, condition: Condition) -> Result<()> {
        let config = &self.this.config;

        let mut owner = merge(&owner.unwrap_or_default(), self.attributes);
        // The key and the version belong to the allocator.
        owner = merge(&owner, &config.sequence_key);
        owner.insert(config.version_attribute.clone(), Value::Int(next));

        let snapshot = owner.clone();
        let ops = vec![
            ConditionalPut::new(&config.owner_table, owner).with_condition(condition),
            ConditionalPut::new(&config.history_table, snapshot),
        ];
        self.this.store.transact_write(ops).await
    }
}
