//! `folder_index` — in-memory folder visibility index.
//!
//! Answers "which folders can entity E see, and under which conditions?"
//! for one tenant without going back to storage per query.
//!
//! Modules:
//! - `types`     — `PermissionFact` plus folder type / module constants
//! - `condition` — composable predicates over facts
//! - `tree`      — per-entity visible-folder index (`ConditionTree`)
//! - `map`       — per-tenant collection of trees (`ConditionTreeMap`)
//! - `source`    — storage seam the map is loaded from

pub mod condition;
pub mod map;
pub mod source;
pub mod tree;
pub mod types;

pub use condition::Condition;
pub use map::ConditionTreeMap;
pub use source::{MemoryPermissionSource, PermissionSource, StorageError};
pub use tree::ConditionTree;
pub use types::PermissionFact;
