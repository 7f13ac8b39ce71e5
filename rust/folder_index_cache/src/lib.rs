//! `folder_index_cache` — node-local cache of per-tenant visibility indexes.
//!
//! Owns at most one [`folder_index::ConditionTreeMap`] per tenant, loads it
//! from the [`folder_index::PermissionSource`] on first access (blocking,
//! awaited, or in the background) and drops it after an idle period.
//!
//! ```text
//!   TenantIndexCache
//!   ├── tenant 1 → Arc<ConditionTreeMap> (READY)
//!   ├── tenant 7 → loading on the blocking pool (single-flight)
//!   └── sweep task: purge idle tenants, trim surviving maps
//! ```
//!
//! Modules:
//! - `config` — enable flag, idle TTL and sweep interval
//! - `error`  — `IndexError`
//! - `cache`  — `TenantIndexCache` and its statistics

pub mod cache;
pub mod config;
pub mod error;

pub use cache::{CacheStats, TenantIndexCache};
pub use config::{parse_index_config, IndexConfig};
pub use error::{IndexError, Result};
