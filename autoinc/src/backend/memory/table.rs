use super::*;

/// Rows of a table ordered by their key values.
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<Vec<Value>, Item>,
}
impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn get(&self, key: &[Value]) -> Option<&Item> {
        self.rows.get(key)
    }

    pub fn insert(&mut self, key: Vec<Value>, item: Item) {
        self.rows.insert(key, item);
    }

    pub fn query(&self, prefix: &[Value]) -> Vec<Item> {
        self.rows
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, v)| v.clone())
            .collect()
    }
}
