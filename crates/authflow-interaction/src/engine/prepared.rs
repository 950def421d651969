use std::fmt;
use std::sync::{Arc, Mutex};

use authflow_core::error::{AuthflowError, Result};

/// Transient node state filled in by `prepare`.
///
/// Never serialized: a decoded node starts empty and is refilled on replay.
pub struct Prepared<T> {
    cell: Mutex<Option<Arc<T>>>,
}

impl<T> Prepared<T> {
    pub fn new() -> Self {
        Self {
            cell: Mutex::new(None),
        }
    }

    pub fn set(&self, value: T) {
        let mut cell = self.cell.lock().unwrap_or_else(|e| e.into_inner());
        *cell = Some(Arc::new(value));
    }

    /// The prepared value, or `NotPrepared` naming the owning node kind.
    pub fn get(&self, kind: &'static str) -> Result<Arc<T>> {
        self.cell
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(AuthflowError::NotPrepared(kind))
    }

    pub fn is_prepared(&self) -> bool {
        self.cell.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

impl<T> Default for Prepared<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Prepared<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Mutex::new(self.cell.lock().unwrap_or_else(|e| e.into_inner()).clone()),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Prepared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.cell.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(value) => f.debug_tuple("Prepared").field(value).finish(),
            None => f.write_str("Prepared(<empty>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unprepared_read_fails() {
        let cell: Prepared<u32> = Prepared::default();
        assert!(!cell.is_prepared());
        assert!(matches!(
            cell.get("authentication_begin"),
            Err(AuthflowError::NotPrepared("authentication_begin"))
        ));
    }

    #[test]
    fn test_set_replaces_value() {
        let cell = Prepared::new();
        cell.set(1);
        cell.set(2);
        assert_eq!(*cell.get("n").unwrap(), 2);
        assert_eq!(*cell.clone().get("n").unwrap(), 2);
    }
}
