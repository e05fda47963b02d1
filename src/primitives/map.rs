//! Map primitive.
//!
//! A replicated ordered map from `Value` to `Value`. Each entry is its own
//! conflict key, so transactions touching different keys of the same map
//! do not conflict.

use std::collections::BTreeMap;
use std::sync::Arc;
use tessel_concurrency::{Runtime, Txn, VersionedObjectManager};
use tessel_core::{Applied, Result, StateMachine, StreamId, TesselError, Value};

/// Map state machine
///
/// Methods: `put(k, v)`, `remove(k)`, `clear()`. `restore(entries)`
/// replaces the whole map and exists to undo `clear`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SmrMap {
    entries: BTreeMap<Value, Value>,
}

impl SmrMap {
    /// Value stored under `key`
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Whether `key` is present
    pub fn contains_key(&self, key: &Value) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter()
    }

    fn encode_entries(entries: &BTreeMap<Value, Value>) -> Value {
        Value::Array(
            entries
                .iter()
                .map(|(k, v)| Value::Array(vec![k.clone(), v.clone()]))
                .collect(),
        )
    }

    fn decode_entries(value: &Value) -> Result<BTreeMap<Value, Value>> {
        let pairs = value
            .as_array()
            .ok_or_else(|| TesselError::invalid_state("restore expects an array of pairs"))?;
        pairs
            .iter()
            .map(|pair| match pair.as_array() {
                Some([k, v]) => Ok((k.clone(), v.clone())),
                _ => Err(TesselError::invalid_state("restore entry is not a pair")),
            })
            .collect()
    }
}

fn arg<'a>(method: &str, args: &'a [Value], index: usize) -> Result<&'a Value> {
    args.get(index).ok_or_else(|| {
        TesselError::invalid_state(format!("{} is missing argument {}", method, index))
    })
}

impl StateMachine for SmrMap {
    fn apply(&mut self, method: &str, args: &[Value]) -> Result<Applied> {
        match method {
            "put" => {
                let key = arg(method, args, 0)?.clone();
                let value = arg(method, args, 1)?.clone();
                let previous = self.entries.insert(key.clone(), value);
                let applied = Applied::none().with_result(previous.clone());
                Ok(match previous {
                    Some(old) => applied.with_undo("put", vec![key, old]),
                    None => applied.with_undo("remove", vec![key]),
                })
            }
            "remove" => {
                let key = arg(method, args, 0)?.clone();
                let previous = self.entries.remove(&key);
                let applied = Applied::none().with_result(previous.clone());
                Ok(match previous {
                    Some(old) => applied.with_undo("put", vec![key, old]),
                    None => applied.with_undo("remove", vec![key]),
                })
            }
            "clear" => {
                let old = std::mem::take(&mut self.entries);
                Ok(Applied::none()
                    .with_result(old.len() as i64)
                    .with_undo("restore", vec![Self::encode_entries(&old)]))
            }
            "restore" => {
                let entries = Self::decode_entries(arg(method, args, 0)?)?;
                let old = std::mem::replace(&mut self.entries, entries);
                Ok(Applied::none().with_undo("restore", vec![Self::encode_entries(&old)]))
            }
            other => Err(TesselError::unsupported(format!("map has no method {}", other))),
        }
    }
}

/// Typed handle over a map object
///
/// Reads and writes of one key use that key as their conflict key; `clear`
/// and whole-map reads conflict with everything on the stream.
#[derive(Debug, Clone)]
pub struct SharedMap {
    manager: Arc<VersionedObjectManager<SmrMap>>,
}

impl SharedMap {
    /// Open the map living on `stream`
    pub fn open(runtime: &Runtime, stream: StreamId) -> Self {
        Self {
            manager: runtime.object::<SmrMap>(stream).open(),
        }
    }

    /// Underlying object manager
    pub fn manager(&self) -> &Arc<VersionedObjectManager<SmrMap>> {
        &self.manager
    }

    /// Value under `key`
    pub fn get(&self, txn: Option<&Txn>, key: impl Into<Value>) -> Result<Option<Value>> {
        let key = [key.into()];
        self.manager
            .access(txn, Some(&key[..]), |map| map.get(&key[0]).cloned())
    }

    /// Number of entries
    pub fn len(&self, txn: Option<&Txn>) -> Result<usize> {
        self.manager.access(txn, Some(&[][..]), SmrMap::len)
    }

    /// Whether the map is empty
    pub fn is_empty(&self, txn: Option<&Txn>) -> Result<bool> {
        Ok(self.len(txn)? == 0)
    }

    /// Every key, in order
    pub fn keys(&self, txn: Option<&Txn>) -> Result<Vec<Value>> {
        self.manager
            .access(txn, Some(&[][..]), |map| map.entries.keys().cloned().collect())
    }

    /// Store `value` under `key`, returning the previous value
    pub fn put(
        &self,
        txn: Option<&Txn>,
        key: impl Into<Value>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>> {
        let key = key.into();
        self.update(txn, "put", vec![key.clone(), value.into()], Some(key))
    }

    /// Remove `key`, returning the value it held
    pub fn remove(&self, txn: Option<&Txn>, key: impl Into<Value>) -> Result<Option<Value>> {
        let key = key.into();
        self.update(txn, "remove", vec![key.clone()], Some(key))
    }

    /// Remove every entry, returning how many there were
    pub fn clear(&self, txn: Option<&Txn>) -> Result<usize> {
        match self.update(txn, "clear", Vec::new(), None)? {
            Some(Value::Int(n)) => Ok(n as usize),
            other => Err(TesselError::invalid_state(format!(
                "map clear returned {:?}",
                other
            ))),
        }
    }

    fn update(
        &self,
        txn: Option<&Txn>,
        method: &str,
        args: Vec<Value>,
        key: Option<Value>,
    ) -> Result<Option<Value>> {
        let keys: Vec<Value> = key.into_iter().collect();
        let address = self
            .manager
            .log_update(txn, method, args, Some(&keys[..]), true)?;
        let result = self
            .manager
            .get_upcall_result(txn, address, Some(&keys[..]))?;
        Ok(result.filter(|v| !v.is_null()))
    }
}
