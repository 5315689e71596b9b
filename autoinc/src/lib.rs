#![deny(unused_must_use)]

//! Gap-free sequence allocation on top of a key-value store which only offers
//! conditional writes.
//!
//! - [`CounterAllocator`] keeps the sequence in a dedicated counter record and
//!   stamps every newly created target record with the next value.
//! - [`HistoryAllocator`] uses the version attribute of an owner record as the
//!   sequence and appends a snapshot to a history table on every update.
//!
//! Both are driven by the same optimistic loop in [`protocol`].

/// Build an `Item` from `name => value` pairs.
#[macro_export]
macro_rules! item {
    () => {
        $crate::Item::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut item = $crate::Item::new();
        $(
            item.insert(::std::string::String::from($name), $crate::Value::from($value));
        )+
        item
    }};
}

mod error;
pub use error::{Error, ErrorKind};

/// Storage abstraction consumed by the allocators.
pub mod store;

/// Implementations of `Store`.
pub mod backend;

/// The read-compute-write loop shared by the allocators.
pub mod protocol;
pub use protocol::Mode;

mod counter;
pub use counter::{CounterAllocator, CounterConfig};

mod history;
pub use history::{HistoryAllocator, HistoryConfig};

use anyhow::{bail, ensure, Result};
use async_trait::async_trait;
use bytes::Bytes;
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use store::{Condition, ConditionalPut, Store};
use tracing::{debug, warn};

/// Attribute value.
/// Values of different variants never compare equal.
#[derive(
    Serialize, Deserialize, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display, From,
)]
pub enum Value {
    #[display("{_0}")]
    Int(i64),
    #[display("{_0:?}")]
    Str(String),
    #[display("{_0}")]
    Bool(bool),
    #[display("<{} bytes>", _0.len())]
    Bytes(Bytes),
}
impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(x) => Some(*x),
            _ => None,
        }
    }
}
impl From<i32> for Value {
    fn from(x: i32) -> Self {
        Value::Int(x as i64)
    }
}
impl From<&str> for Value {
    fn from(x: &str) -> Self {
        Value::Str(x.to_owned())
    }
}
impl From<Vec<u8>> for Value {
    fn from(x: Vec<u8>) -> Self {
        Value::Bytes(x.into())
    }
}

/// A record is a set of named attributes.
/// Keys are records too: they carry only the key attributes.
pub type Item = BTreeMap<String, Value>;

/// Overlay `top` on `base`.
/// Attributes present in both take the value from `top`.
pub fn merge(base: &Item, top: &Item) -> Item {
    let mut out = base.clone();
    for (k, v) in top {
        out.insert(k.clone(), v.clone());
    }
    out
}

/// Human readable form of a key, used in logs.
pub fn describe(table: &str, key: &Item) -> String {
    let attrs: Vec<String> = key.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{table}{{{}}}", attrs.join(","))
}
