//! Shared key-value table bridging the robot loop and an external logger.
//!
//! Entries are overwritten, never appended. Each write bumps a table-wide
//! sequence number so a flusher can forward only what changed since its last
//! pass. All access goes through one critical-section lock and never awaits,
//! so the control loop can read and publish inside its cycle budget.
//!
//! Keys the robot publishes can be reserved; remote writers go through
//! [`NetworkTable::put_remote`], which refuses them.

use alloc::{
    string::{String, ToString},
    vec::Vec,
};
use core::cell::RefCell;

use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

/// Value stored under a table key.
///
/// Serialized untagged: a JSON number or a JSON array of numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableValue {
    Double(f64),
    DoubleArray(Vec<f64>),
}

impl TableValue {
    fn same_type(&self, other: &TableValue) -> bool {
        matches!(
            (self, other),
            (TableValue::Double(_), TableValue::Double(_))
                | (TableValue::DoubleArray(_), TableValue::DoubleArray(_))
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    /// The key already holds a value of a different type.
    TypeMismatch { key: String },
    /// The key is reserved for the robot and cannot be written remotely.
    ReadOnly { key: String },
}

/// One changed entry as pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryUpdate {
    pub k: String,
    pub v: TableValue,
    pub seq: u64,
}

struct Entry {
    value: TableValue,
    seq: u64,
}

struct Inner {
    entries: HashMap<String, Entry>,
    reserved: Vec<String>,
    seq: u64,
}

pub struct NetworkTable {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Inner>>,
}

impl Default for NetworkTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkTable {
    pub fn new() -> Self {
        NetworkTable {
            inner: Mutex::new(RefCell::new(Inner {
                entries: HashMap::new(),
                reserved: Vec::new(),
                seq: 0,
            })),
        }
    }

    /// Read a scalar, falling back to `default` when the key is missing or
    /// holds an array.
    pub fn get_double(
        &self,
        key: &str,
        default: f64,
    ) -> f64 {
        self.inner.lock(|cell| match cell.borrow().entries.get(key) {
            Some(Entry {
                value: TableValue::Double(v),
                ..
            }) => *v,
            _ => default,
        })
    }

    pub fn get_double_array(
        &self,
        key: &str,
    ) -> Option<Vec<f64>> {
        self.inner.lock(|cell| match cell.borrow().entries.get(key) {
            Some(Entry {
                value: TableValue::DoubleArray(v),
                ..
            }) => Some(v.clone()),
            _ => None,
        })
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<TableValue> {
        self.inner
            .lock(|cell| cell.borrow().entries.get(key).map(|e| e.value.clone()))
    }

    pub fn set_double(
        &self,
        key: &str,
        value: f64,
    ) -> Result<(), TableError> {
        self.put(key, TableValue::Double(value))
    }

    /// Overwrite an array entry in a single step.
    pub fn set_double_array(
        &self,
        key: &str,
        values: &[f64],
    ) -> Result<(), TableError> {
        self.put(key, TableValue::DoubleArray(values.to_vec()))
    }

    pub fn put(
        &self,
        key: &str,
        value: TableValue,
    ) -> Result<(), TableError> {
        self.inner.lock(|cell| {
            let mut guard = cell.borrow_mut();
            let inner = &mut *guard;
            let seq = inner.seq + 1;
            match inner.entries.get_mut(key) {
                Some(entry) if !entry.value.same_type(&value) => {
                    return Err(TableError::TypeMismatch {
                        key: key.to_string(),
                    });
                }
                Some(entry) => {
                    entry.value = value;
                    entry.seq = seq;
                }
                None => {
                    inner.entries.insert(key.to_string(), Entry { value, seq });
                }
            }
            inner.seq = seq;
            Ok(())
        })
    }

    /// Mark `key` as written only by the robot.
    pub fn reserve(
        &self,
        key: &str,
    ) {
        self.inner.lock(|cell| {
            let mut inner = cell.borrow_mut();
            if !inner.reserved.iter().any(|k| k == key) {
                inner.reserved.push(key.to_string());
            }
        })
    }

    pub fn is_reserved(
        &self,
        key: &str,
    ) -> bool {
        self.inner
            .lock(|cell| cell.borrow().reserved.iter().any(|k| k == key))
    }

    /// Write on behalf of a remote client. Reserved keys are refused.
    pub fn put_remote(
        &self,
        key: &str,
        value: TableValue,
    ) -> Result<(), TableError> {
        if self.is_reserved(key) {
            return Err(TableError::ReadOnly {
                key: key.to_string(),
            });
        }
        self.put(key, value)
    }

    /// Sequence number of the last write to `key`.
    pub fn revision(
        &self,
        key: &str,
    ) -> Option<u64> {
        self.inner
            .lock(|cell| cell.borrow().entries.get(key).map(|e| e.seq))
    }

    /// Sequence number of the last write to any key.
    pub fn sequence(&self) -> u64 {
        self.inner.lock(|cell| cell.borrow().seq)
    }

    /// Entries written after `seq`, ordered by write, and the current
    /// sequence number to pass on the next call.
    pub fn updates_since(
        &self,
        seq: u64,
    ) -> (Vec<EntryUpdate>, u64) {
        self.inner.lock(|cell| {
            let inner = cell.borrow();
            let mut updates: Vec<EntryUpdate> = inner
                .entries
                .iter()
                .filter(|(_, e)| e.seq > seq)
                .map(|(k, e)| EntryUpdate {
                    k: k.clone(),
                    v: e.value.clone(),
                    seq: e.seq,
                })
                .collect();
            updates.sort_by_key(|u| u.seq);
            (updates, inner.seq)
        })
    }

    pub fn snapshot(&self) -> Vec<EntryUpdate> {
        self.updates_since(0).0
    }
}
