use super::*;

use crate::protocol::Sequence;

/// Configuration of `CounterAllocator`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CounterConfig {
    /// Table holding the counter record.
    pub counter_table: String,
    /// Key of the counter record.
    pub sequence_key: Item,
    /// Attribute of the counter record holding the last allocated value.
    pub value_attribute: String,
    /// Table the allocated records are created in.
    pub target_table: String,
    /// Key attribute of the target table. The allocated ID is stored here.
    pub target_key_attribute: String,
    pub initial_value: i64,
    pub mode: Mode,
    /// If true, the counter record also carries the attributes of the last created target record.
    pub mirror_target: bool,
    /// Give up after this many conflicts in `Guarded` mode. Unbounded if `None`.
    pub max_attempts: Option<u32>,
}
impl CounterConfig {
    pub fn new(
        counter_table: impl Into<String>,
        sequence_key: Item,
        target_table: impl Into<String>,
        target_key_attribute: impl Into<String>,
    ) -> Self {
        Self {
            counter_table: counter_table.into(),
            sequence_key,
            value_attribute: "counter".to_owned(),
            target_table: target_table.into(),
            target_key_attribute: target_key_attribute.into(),
            initial_value: 1,
            mode: Mode::Guarded,
            mirror_target: false,
            max_attempts: None,
        }
    }

    pub fn with_value_attribute(self, name: impl Into<String>) -> Self {
        Self {
            value_attribute: name.into(),
            ..self
        }
    }

    pub fn with_initial_value(self, v: i64) -> Self {
        Self {
            initial_value: v,
            ..self
        }
    }

    pub fn with_mode(self, mode: Mode) -> Self {
        Self { mode, ..self }
    }

    pub fn with_mirror_target(self, b: bool) -> Self {
        Self {
            mirror_target: b,
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

/// `CounterAllocator` numbers newly created records with a sequence
/// kept in a separate counter record.
///
/// The counter is advanced first and the target record is written afterwards.
/// If the target write fails, the counter is not rolled back
/// and the allocated ID is skipped.
pub struct CounterAllocator<S: Store + ?Sized> {
    store: Arc<S>,
    config: CounterConfig,
    label: String,
}
impl<S: Store + ?Sized> CounterAllocator<S> {
    pub fn new(store: Arc<S>, config: CounterConfig) -> Self {
        let label = describe(&config.counter_table, &config.sequence_key);
        Self {
            store,
            config,
            label,
        }
    }

    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    /// Allocate the next ID and create a target record `attributes + {key: ID}`.
    pub async fn allocate(&self, attributes: Item) -> Result<i64> {
        let seq = CounterSequence {
            this: self,
            attributes: &attributes,
        };
        let id = protocol::allocate(&seq, self.config.mode, self.config.max_attempts).await?;

        let target = merge(
            &attributes,
            &item! { self.config.target_key_attribute.as_str() => id },
        );
        if let Err(e) = self
            .store
            .put(ConditionalPut::new(&self.config.target_table, target))
            .await
        {
            warn!(
                "{} advanced to {id} but the target record could not be written: {e}",
                self.label
            );
            return Err(e);
        }
        Ok(id)
    }

    /// The value stored in the counter record.
    pub async fn last_allocated(&self) -> Result<Option<i64>> {
        let counter = self
            .store
            .get(&self.config.counter_table, &self.config.sequence_key)
            .await?;
        read_counter(counter.as_ref(), &self.config.value_attribute)
    }
}

fn read_counter(counter: Option<&Item>, attr: &str) -> Result<Option<i64>> {
    match counter.and_then(|x| x.get(attr)) {
        None => Ok(None),
        Some(v) => match v.as_int() {
            Some(x) => Ok(Some(x)),
            None => bail!(Error::NotANumber(attr.to_owned())),
        },
    }
}

struct CounterSequence<'a, S: Store + ?Sized> {
    this: &'a CounterAllocator<S>,
    attributes: &'a Item,
}
#[async_trait]
impl<S: Store + ?Sized> Sequence for CounterSequence<'_, S> {
    /// The last allocated value.
    type State = Option<i64>;

    fn label(&self) -> &str {
        &self.this.label
    }

    fn initial_value(&self) -> i64 {
        self.this.config.initial_value
    }

    async fn read_state(&self) -> Result<Option<i64>> {
        self.this.last_allocated().await
    }

    fn current_value(&self, state: &Option<i64>) -> Result<Option<i64>> {
        Ok(*state)
    }

    fn condition(&self, state: &Option<i64>) -> Condition {
        let attr = self.this.config.value_attribute.clone();
        match state {
            // Also holds when the counter record doesn't exist yet.
            None => Condition::AttributeNotExists(attr),
            Some(v) => Condition::AttributeEquals(attr, Value::Int(*v)),
        }
    }

    async fn write(&self, _state: Option<i64>, next: i64, condition: Condition) -> Result<()> {
        let config = &self.this.config;
        let mut counter = if config.mirror_target {
            merge(self.attributes, &config.sequence_key)
        } else {
            config.sequence_key.clone()
        };
        counter.insert(config.value_attribute.clone(), Value::Int(next));

        let op = ConditionalPut::new(&config.counter_table, counter).with_condition(condition);
        self.this.store.put(op).await
    }
}
