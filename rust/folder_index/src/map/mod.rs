//! Per-tenant collection of condition trees.
//!
//! One `ConditionTree` per entity (user or group). Compound queries union
//! the filtered results of the user's own tree and every group tree: a
//! folder is visible if the user, or any one of its groups, satisfies all
//! supplied conditions for it on its own. Entities without a tree simply
//! contribute nothing.

use std::time::Instant;

use ahash::AHashSet;
use dashmap::DashMap;

use crate::condition::Condition;
use crate::source::{PermissionSource, StorageError};
use crate::tree::ConditionTree;
use crate::types::{folder_type, PermissionFact};

/// Visibility index of one tenant.
///
/// Built once from a full snapshot and read many times afterwards.
/// Incremental `insert` is safe to call concurrently with queries; the
/// entity-to-tree get-or-create runs under the map's shard lock, so
/// racing first inserts for a new entity converge on a single tree.
#[derive(Debug)]
pub struct ConditionTreeMap {
    tenant_id: i32,
    trees: DashMap<i32, ConditionTree>,
    snapshot_stamp: Instant,
}

impl ConditionTreeMap {
    /// An empty, not yet loaded map.
    pub fn new(tenant_id: i32) -> Self {
        Self {
            tenant_id,
            trees: DashMap::new(),
            snapshot_stamp: Instant::now(),
        }
    }

    /// Create a map and fill it from `source` in one step.
    pub fn load(tenant_id: i32, source: &dyn PermissionSource) -> Result<Self, StorageError> {
        let mut map = Self::new(tenant_id);
        map.init(source)?;
        Ok(map)
    }

    /// Read every fact of the tenant and rebuild all trees.
    ///
    /// Replaces the previous generation. On a storage failure the map is
    /// left empty; callers must not publish it.
    pub fn init(&mut self, source: &dyn PermissionSource) -> Result<(), StorageError> {
        let started = Instant::now();
        let facts = match source.load_facts(self.tenant_id) {
            Ok(facts) => facts,
            Err(e) => {
                self.trees.clear();
                return Err(e);
            }
        };

        let read = facts.len();
        let trees = DashMap::new();
        let mut kept = 0usize;
        for fact in facts {
            if insert_into(&trees, fact) {
                kept += 1;
            }
        }

        self.trees = trees;
        self.snapshot_stamp = Instant::now();
        tracing::debug!(
            tenant_id = self.tenant_id,
            read,
            kept,
            entities = self.trees.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "permission index built"
        );
        Ok(())
    }

    /// Route a fact to its entity's tree, creating the tree on first
    /// sight. Returns `false` if the fact grants no visibility.
    pub fn insert(&self, fact: PermissionFact) -> bool {
        insert_into(&self.trees, fact)
    }

    /// Drop all trees.
    pub fn clear(&self) {
        self.trees.clear();
    }

    /// Drop one entity's tree (user or group deleted).
    pub fn remove_for(&self, entity_id: i32) -> bool {
        self.trees.remove(&entity_id).is_some()
    }

    /// Compact trees built before `cutoff` that changed since their last
    /// compaction. Returns how many were compacted.
    pub fn trim(&self, cutoff: Instant) -> usize {
        let mut trimmed = 0;
        for mut tree in self.trees.iter_mut() {
            if tree.is_elapsed(cutoff) && tree.compact() {
                trimmed += 1;
            }
        }
        trimmed
    }

    pub fn tenant_id(&self) -> i32 {
        self.tenant_id
    }

    /// When the snapshot backing this map was read.
    pub fn snapshot_stamp(&self) -> Instant {
        self.snapshot_stamp
    }

    pub fn entity_count(&self) -> usize {
        self.trees.len()
    }

    pub fn fact_count(&self) -> usize {
        self.trees.iter().map(|t| t.fact_count()).sum()
    }

    pub fn has_tree(&self, entity_id: i32) -> bool {
        self.trees.contains_key(&entity_id)
    }

    /// Unfiltered visible folders of a single entity.
    pub fn visible_for_entity(&self, entity_id: i32) -> AHashSet<i32> {
        self.trees
            .get(&entity_id)
            .map(|t| t.visible_folder_ids())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Compound queries
    // ------------------------------------------------------------------

    /// Folders visible to the user or any of its groups, restricted to
    /// `accessible_modules` (empty = unrestricted) and all `conditions`.
    pub fn visible_for_user(
        &self,
        user_id: i32,
        group_ids: &[i32],
        accessible_modules: &[i32],
        conditions: &[Condition],
    ) -> AHashSet<i32> {
        let mut combined = Vec::with_capacity(conditions.len() + 1);
        combined.push(Condition::module_set(accessible_modules));
        combined.extend_from_slice(conditions);
        self.union_where(user_id, group_ids, &Condition::AllOf(combined))
    }

    /// Visible folders of the given type, `SHARED` resolved against `user_id`.
    pub fn visible_type_for_user(
        &self,
        user_id: i32,
        group_ids: &[i32],
        accessible_modules: &[i32],
        folder_type: i32,
    ) -> AHashSet<i32> {
        let condition = Condition::all_of(vec![
            Condition::module_set(accessible_modules),
            Condition::folder_type(folder_type, user_id),
        ]);
        self.union_where(user_id, group_ids, &condition)
    }

    /// Visible folders of one module; empty without touching any tree if
    /// the module is not accessible.
    pub fn visible_module_for_user(
        &self,
        user_id: i32,
        group_ids: &[i32],
        accessible_modules: &[i32],
        module: i32,
    ) -> AHashSet<i32> {
        if !module_accessible(accessible_modules, module) {
            return AHashSet::new();
        }
        self.union_where(user_id, group_ids, &Condition::Module(module))
    }

    /// Visible folders of one module and type; same fast reject as
    /// `visible_module_for_user`.
    pub fn visible_for_user_module_type(
        &self,
        user_id: i32,
        group_ids: &[i32],
        accessible_modules: &[i32],
        module: i32,
        folder_type: i32,
    ) -> AHashSet<i32> {
        if !module_accessible(accessible_modules, module) {
            return AHashSet::new();
        }
        let condition = Condition::all_of(vec![
            Condition::Module(module),
            Condition::folder_type(folder_type, user_id),
        ]);
        self.union_where(user_id, group_ids, &condition)
    }

    /// Visible direct children of `parent_id`.
    pub fn visible_subfolders(
        &self,
        user_id: i32,
        group_ids: &[i32],
        accessible_modules: &[i32],
        parent_id: i32,
    ) -> AHashSet<i32> {
        let condition = Condition::all_of(vec![
            Condition::module_set(accessible_modules),
            Condition::Parent(parent_id),
        ]);
        self.union_where(user_id, group_ids, &condition)
    }

    /// Visible folders modified strictly after `since` (epoch millis).
    pub fn visible_modified_since(
        &self,
        user_id: i32,
        group_ids: &[i32],
        accessible_modules: &[i32],
        since: i64,
    ) -> AHashSet<i32> {
        let condition = Condition::all_of(vec![
            Condition::module_set(accessible_modules),
            Condition::LastModifiedAfter(since),
        ]);
        self.union_where(user_id, group_ids, &condition)
    }

    /// Whether `folder_id` is visible; checks the user first, then groups
    /// in order, and stops at the first hit.
    pub fn is_visible_folder(
        &self,
        user_id: i32,
        group_ids: &[i32],
        accessible_modules: &[i32],
        folder_id: i32,
    ) -> bool {
        let condition = Condition::module_set(accessible_modules);
        self.any_tree(user_id, group_ids, |tree| tree.folder_matches(folder_id, &condition))
    }

    /// Whether the user sees at least one shared folder (a private folder
    /// someone else created).
    pub fn has_shared_folder(
        &self,
        user_id: i32,
        group_ids: &[i32],
        accessible_modules: &[i32],
    ) -> bool {
        let condition = Condition::all_of(vec![
            Condition::module_set(accessible_modules),
            Condition::folder_type(folder_type::SHARED, user_id),
        ]);
        self.any_tree(user_id, group_ids, |tree| tree.any_match(&condition))
    }

    fn union_where(&self, user_id: i32, group_ids: &[i32], condition: &Condition) -> AHashSet<i32> {
        let mut out = AHashSet::new();
        for entity_id in std::iter::once(&user_id).chain(group_ids) {
            if let Some(tree) = self.trees.get(entity_id) {
                tree.collect_into(condition, &mut out);
            }
        }
        out
    }

    fn any_tree<F>(&self, user_id: i32, group_ids: &[i32], mut pred: F) -> bool
    where
        F: FnMut(&ConditionTree) -> bool,
    {
        std::iter::once(&user_id)
            .chain(group_ids)
            .any(|entity_id| {
                self.trees
                    .get(entity_id)
                    .is_some_and(|tree| pred(tree.value()))
            })
    }
}

fn module_accessible(accessible_modules: &[i32], module: i32) -> bool {
    accessible_modules.is_empty() || accessible_modules.contains(&module)
}

fn insert_into(trees: &DashMap<i32, ConditionTree>, fact: PermissionFact) -> bool {
    if !Condition::FolderVisible.matches(&fact) {
        return false;
    }
    trees.entry(fact.entity_id).or_default().insert(fact)
}
