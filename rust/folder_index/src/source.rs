//! Storage seam: where a tenant's permission facts come from.
//!
//! The real implementation is a join of folder records and folder
//! permission rows filtered by tenant; this crate only consumes it.

use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use parking_lot::RwLock;
use thiserror::Error;

use crate::types::PermissionFact;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("unknown tenant: {0}")]
    UnknownTenant(i32),
}

/// Bulk read of every permission fact of a tenant.
///
/// Must return a fully materialized list; order carries no meaning.
pub trait PermissionSource: Send + Sync {
    fn load_facts(&self, tenant_id: i32) -> Result<Vec<PermissionFact>, StorageError>;
}

/// In-memory `PermissionSource` keyed by tenant.
///
/// Tenants that were never registered fail with `UnknownTenant`.
#[derive(Debug, Default)]
pub struct MemoryPermissionSource {
    tenants: RwLock<AHashMap<i32, Vec<PermissionFact>>>,
    loads: AtomicU64,
}

impl MemoryPermissionSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all facts of a tenant.
    pub fn put_tenant(&self, tenant_id: i32, facts: Vec<PermissionFact>) {
        self.tenants.write().insert(tenant_id, facts);
    }

    /// Append one fact, registering the tenant if needed.
    pub fn push_fact(&self, tenant_id: i32, fact: PermissionFact) {
        self.tenants.write().entry(tenant_id).or_default().push(fact);
    }

    pub fn remove_tenant(&self, tenant_id: i32) -> bool {
        self.tenants.write().remove(&tenant_id).is_some()
    }

    /// Number of `load_facts` calls served so far.
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }
}

impl PermissionSource for MemoryPermissionSource {
    fn load_facts(&self, tenant_id: i32) -> Result<Vec<PermissionFact>, StorageError> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        self.tenants
            .read()
            .get(&tenant_id)
            .cloned()
            .ok_or(StorageError::UnknownTenant(tenant_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serves_registered_tenants() {
        let source = MemoryPermissionSource::new();
        source.put_tenant(1, vec![PermissionFact::new(10, 1).read()]);
        source.push_fact(1, PermissionFact::new(11, 1).read());
        assert_eq!(source.load_facts(1).unwrap().len(), 2);
        assert_eq!(source.load_count(), 1);
    }

    #[test]
    fn unknown_tenant_fails() {
        let source = MemoryPermissionSource::new();
        assert!(matches!(
            source.load_facts(5),
            Err(StorageError::UnknownTenant(5))
        ));
        source.push_fact(5, PermissionFact::new(1, 1));
        assert!(source.remove_tenant(5));
        assert!(source.load_facts(5).is_err());
    }
}
