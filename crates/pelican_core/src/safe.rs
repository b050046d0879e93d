// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

//! A mapping whose values are only reachable through visitor callbacks run
//! under the map lock, so no alias can outlive the lock hold. Keys are
//! unique and keep their original insertion order across updates.

use std::{collections::HashMap, sync::Mutex};

/// A concurrency-safe map from string keys to values with stable insertion
/// order and positional access.
///
/// Visiting operations return `Some` with the visitor's result when the key
/// (or index) exists and `None` otherwise, without invoking the visitor.
/// Visitors must not re-enter the map.
#[derive(Debug)]
pub struct SafeMap<V> {
    inner: Mutex<Inner<V>>,
}

#[derive(Debug)]
struct Inner<V> {
    order: Vec<String>,
    values: HashMap<String, V>,
}

impl<V> Default for SafeMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> SafeMap<V> {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                order: Vec::new(),
                values: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<V>> {
        self.inner.lock().expect("safe map lock poisoned")
    }

    /// Inserts or updates the value for `key`. An updated key keeps its
    /// original position.
    pub fn set(&self, key: &str, value: V) {
        let mut inner = self.lock();
        if inner.values.insert(key.to_owned(), value).is_none() {
            inner.order.push(key.to_owned());
        }
    }

    /// Returns whether `key` is present.
    pub fn has(&self, key: &str) -> bool {
        self.lock().values.contains_key(key)
    }

    /// Returns whether any entry satisfies `pred`.
    pub fn has_where(&self, pred: impl Fn(&str, &V) -> bool) -> bool {
        let inner = self.lock();
        inner
            .order
            .iter()
            .any(|key| pred(key, &inner.values[key]))
    }

    /// Visits the value for `key` under the lock.
    pub fn get<R>(&self, key: &str, visit: impl FnOnce(&V) -> R) -> Option<R> {
        let inner = self.lock();
        inner.values.get(key).map(visit)
    }

    /// Visits the `idx`-th surviving entry in insertion order.
    pub fn index<R>(&self, idx: usize, visit: impl FnOnce(&str, &V) -> R) -> Option<R> {
        let inner = self.lock();
        let key = inner.order.get(idx)?;
        Some(visit(key, &inner.values[key]))
    }

    /// Atomically removes the entry for `key` and visits the removed value.
    pub fn get_and_delete<R>(&self, key: &str, visit: impl FnOnce(V) -> R) -> Option<R> {
        let mut inner = self.lock();
        let value = inner.values.remove(key)?;
        inner.order.retain(|k| k != key);
        Some(visit(value))
    }

    /// Visits a consistent snapshot of all values in insertion order.
    pub fn values<R>(&self, visit: impl FnOnce(&[&V]) -> R) -> R {
        let inner = self.lock();
        let snapshot: Vec<&V> = inner.order.iter().map(|key| &inner.values[key]).collect();
        visit(&snapshot)
    }

    /// Visits every entry in insertion order. The map must not be modified
    /// from within the visitor.
    pub fn for_each(&self, mut visit: impl FnMut(&str, &V)) {
        let inner = self.lock();
        for key in &inner.order {
            visit(key, &inner.values[key]);
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().order.is_empty()
    }
}
