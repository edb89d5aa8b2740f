//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! A recycled pool of VM instances.
//!
//! Parsing contract code is the expensive part of an invocation, so each
//! instance keeps a program cache keyed by code digest. Instances are checked
//! out for one transaction at a time and returned afterwards; the pool never
//! shrinks below its configured capacity.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use bywise_common_types::{storage_id_hasher, Hash};

use crate::vm::{parse, Program, VmError};

pub const DEFAULT_POOL_CAPACITY: usize = 10;

/// A reusable interpreter workspace with a parsed-program cache.
#[derive(Default)]
pub struct VmInstance {
    programs: HashMap<Hash, Arc<Program>>,
}

impl VmInstance {
    /// Parses `code`, reusing the cached program when this instance has seen
    /// the same code before.
    pub fn load(&mut self, code: &str) -> Result<Arc<Program>, VmError> {
        let digest = storage_id_hasher().chain_raw(code.as_bytes()).finalize();
        if let Some(program) = self.programs.get(&digest) {
            return Ok(program.clone());
        }
        let program = Arc::new(parse(code)?);
        self.programs.insert(digest, program.clone());
        Ok(program)
    }

    pub fn cached_programs(&self) -> usize {
        self.programs.len()
    }
}

#[derive(Clone)]
pub struct VmPool {
    idle: Arc<Mutex<Vec<VmInstance>>>,
}

impl VmPool {
    pub fn new(capacity: usize) -> Self {
        let mut idle = Vec::with_capacity(capacity);
        idle.resize_with(capacity, VmInstance::default);
        Self {
            idle: Arc::new(Mutex::new(idle)),
        }
    }

    /// Checks out an instance; a fresh one is created when every pooled
    /// instance is busy, and the pool re-absorbs it on release.
    pub fn acquire(&self) -> VmInstance {
        self.idle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .unwrap_or_default()
    }

    pub fn release(&self, instance: VmInstance) {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).push(instance);
    }
}

impl Default for VmPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instances_cache_programs() {
        let mut instance = VmInstance::default();
        let code = "function f() { return 1; }";
        let a = instance.load(code).unwrap();
        let b = instance.load(code).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(instance.cached_programs(), 1);
    }

    #[test]
    fn pool_recycles_instances() {
        let pool = VmPool::new(2);
        let mut instance = pool.acquire();
        instance.load("function f() { return 1; }").unwrap();
        pool.release(instance);

        // draining past capacity still yields instances
        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        pool.release(a);
        pool.release(b);
        pool.release(c);
    }
}
