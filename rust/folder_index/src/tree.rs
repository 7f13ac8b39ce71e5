//! Per-entity visible-folder index.

use std::time::Instant;

use ahash::AHashSet;

use crate::condition::Condition;
use crate::types::PermissionFact;

/// Visible folders of one entity (user or group) plus the facts that
/// produced them.
///
/// Only facts passing `Condition::FolderVisible` are kept, so
/// `visible_folder_ids()` always equals the folder ids of `facts`.
/// Filtered queries fold over the retained facts and never consult
/// storage.
#[derive(Debug, Clone)]
pub struct ConditionTree {
    visible: AHashSet<i32>,
    facts: Vec<PermissionFact>,
    built_at: Instant,
    /// Cleared by every insert.
    compacted: bool,
}

impl Default for ConditionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ConditionTree {
    pub fn new() -> Self {
        Self {
            visible: AHashSet::new(),
            facts: Vec::new(),
            built_at: Instant::now(),
            compacted: false,
        }
    }

    /// Add a fact. Returns `false` (and stores nothing) when the grant
    /// gives neither admin nor read access.
    pub fn insert(&mut self, fact: PermissionFact) -> bool {
        if !Condition::FolderVisible.matches(&fact) {
            return false;
        }
        self.visible.insert(fact.folder_id);
        self.facts.push(fact);
        self.compacted = false;
        true
    }

    /// Unfiltered visible set (owned copy).
    pub fn visible_folder_ids(&self) -> AHashSet<i32> {
        self.visible.clone()
    }

    /// Folder ids of all facts satisfying `condition`; `None` is the
    /// unfiltered set.
    pub fn visible_folder_ids_where(&self, condition: Option<&Condition>) -> AHashSet<i32> {
        match condition {
            None => self.visible_folder_ids(),
            Some(condition) => {
                let mut out = AHashSet::new();
                self.collect_into(condition, &mut out);
                out
            }
        }
    }

    /// Union the folder ids matching `condition` into `out`.
    pub fn collect_into(&self, condition: &Condition, out: &mut AHashSet<i32>) {
        out.extend(
            self.facts
                .iter()
                .filter(|f| condition.matches(f))
                .map(|f| f.folder_id),
        );
    }

    pub fn contains(&self, folder_id: i32) -> bool {
        self.visible.contains(&folder_id)
    }

    /// True if at least one retained fact satisfies `condition`.
    pub fn any_match(&self, condition: &Condition) -> bool {
        self.facts.iter().any(|f| condition.matches(f))
    }

    /// True if `folder_id` is visible through a fact satisfying `condition`.
    pub fn folder_matches(&self, folder_id: i32, condition: &Condition) -> bool {
        self.visible.contains(&folder_id)
            && self
                .facts
                .iter()
                .any(|f| f.folder_id == folder_id && condition.matches(f))
    }

    /// True if the tree was built before `reference`.
    pub fn is_elapsed(&self, reference: Instant) -> bool {
        self.built_at < reference
    }

    pub fn built_at(&self) -> Instant {
        self.built_at
    }

    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Release slack capacity left behind by inserts. Returns `false`
    /// when nothing was inserted since the last compaction.
    pub fn compact(&mut self) -> bool {
        if self.compacted {
            return false;
        }
        self.facts.shrink_to_fit();
        self.visible.shrink_to_fit();
        self.compacted = true;
        true
    }
}
