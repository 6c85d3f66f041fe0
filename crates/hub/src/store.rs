//! Keyed in-memory record store backing the finance, crop and equipment
//! services. Records never leave the process.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{FarmError, FarmResult};

/// Anything kept in a [`Store`].
pub trait Record: Clone {
    /// Entity name used in error messages ("transaction", "crop", ...).
    const KIND: &'static str;

    fn id(&self) -> &str;
}

#[derive(Debug)]
pub struct Store<T> {
    items: RwLock<HashMap<String, T>>,
}

impl<T> Default for Store<T> {
    fn default() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Record> Store<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, item: T) -> FarmResult<T> {
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
        if items.contains_key(item.id()) {
            return Err(FarmError::duplicate(T::KIND, item.id()));
        }
        items.insert(item.id().to_string(), item.clone());
        Ok(item)
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    /// Every record, ordered by id.
    pub fn list(&self) -> Vec<T> {
        self.filter(|_| true)
    }

    pub fn filter(&self, mut pred: impl FnMut(&T) -> bool) -> Vec<T> {
        let items = self.items.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<T> = items.values().filter(|t| pred(t)).cloned().collect();
        out.sort_by(|a, b| a.id().cmp(b.id()));
        out
    }

    /// Mutate one record in place. `f` runs under the write lock; if it
    /// fails the record is left untouched.
    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut T) -> FarmResult<R>) -> FarmResult<R> {
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
        let item = items
            .get_mut(id)
            .ok_or_else(|| FarmError::not_found(T::KIND, id))?;
        let mut draft = item.clone();
        let out = f(&mut draft)?;
        *item = draft;
        Ok(out)
    }

    pub fn remove(&self, id: &str) -> FarmResult<T> {
        self.items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .ok_or_else(|| FarmError::not_found(T::KIND, id))
    }

    pub fn len(&self) -> usize {
        self.items.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
