//! Callable registry
//!
//! Hands out one [`TracedCallable`] per (module, name). Identities are
//! stable FNV hashes; anonymous operations are salted so two of them never
//! share an identity, and a hash collision between different names is
//! resolved by probing the next free id.

use crate::record::{generate_callable_id, TracedCallable};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct CallableRegistry {
    callables: Mutex<HashMap<u64, Arc<TracedCallable>>>,
    anonymous: AtomicU64,
}

impl CallableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity for `module.name`, created on first registration
    pub fn register(&self, module: &str, name: &str) -> Arc<TracedCallable> {
        let mut id = if name.is_empty() {
            let salt = self.anonymous.fetch_add(1, Ordering::Relaxed);
            generate_callable_id(module, &format!("<anonymous#{}>", salt))
        } else {
            generate_callable_id(module, name)
        };

        let mut callables = self
            .callables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        while let Some(existing) = callables.get(&id) {
            if !name.is_empty() && existing.module == module && existing.name == name {
                return Arc::clone(existing);
            }
            id = id.wrapping_add(1);
        }

        let callable = Arc::new(TracedCallable {
            id,
            module: module.to_string(),
            name: name.to_string(),
        });
        callables.insert(id, Arc::clone(&callable));
        callable
    }

    pub fn len(&self) -> usize {
        self.callables.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
