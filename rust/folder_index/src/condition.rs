//! Predicates over permission facts.
//!
//! Every condition is a pure `fact -> bool` function carrying only its
//! comparison parameters, so one instance can be shared by any number of
//! concurrent queries. `AllOf` evaluates members in the listed order and
//! stops at the first failure; put the cheapest, most selective filter
//! first (by convention the accessible-module set).

use ahash::AHashSet;

use crate::types::{folder_type, PermissionFact};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// The grant carries the folder admin flag.
    Admin,
    /// The grant allows at least reading the folder.
    ReadFolder,
    /// `Admin` or `ReadFolder`, admin checked first.
    FolderVisible,
    Module(i32),
    /// Module membership; an empty set is unrestricted.
    ModuleSet(AHashSet<i32>),
    /// Folder type as seen by `viewer`. `SHARED` is rewritten to
    /// "private and not created by the viewer".
    Type { folder_type: i32, viewer: i32 },
    Parent(i32),
    Creator(i32),
    /// Strictly newer than the given epoch-millis stamp.
    LastModifiedAfter(i64),
    AllOf(Vec<Condition>),
}

impl Condition {
    pub fn module_set(modules: &[i32]) -> Self {
        Condition::ModuleSet(modules.iter().copied().collect())
    }

    pub fn folder_type(folder_type: i32, viewer: i32) -> Self {
        Condition::Type {
            folder_type,
            viewer,
        }
    }

    pub fn all_of(conditions: Vec<Condition>) -> Self {
        Condition::AllOf(conditions)
    }

    /// Evaluate this condition against one fact.
    pub fn matches(&self, fact: &PermissionFact) -> bool {
        match self {
            Condition::Admin => fact.is_admin,
            Condition::ReadFolder => fact.can_read_folder,
            Condition::FolderVisible => fact.is_admin || fact.can_read_folder,
            Condition::Module(m) => fact.module == *m,
            Condition::ModuleSet(set) => set.is_empty() || set.contains(&fact.module),
            Condition::Type {
                folder_type,
                viewer,
            } => {
                if *folder_type == folder_type::SHARED {
                    fact.folder_type == folder_type::PRIVATE && fact.creator_id != *viewer
                } else {
                    fact.folder_type == *folder_type
                }
            }
            Condition::Parent(p) => fact.parent_folder_id == *p,
            Condition::Creator(c) => fact.creator_id == *c,
            Condition::LastModifiedAfter(ts) => fact.last_modified > *ts,
            Condition::AllOf(conditions) => conditions.iter().all(|c| c.matches(fact)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::module;

    fn private_by(creator: i32) -> PermissionFact {
        PermissionFact::new(10, 1)
            .read()
            .module(module::CALENDAR)
            .folder_type(folder_type::PRIVATE)
            .creator(creator)
    }

    #[test]
    fn admin_grant_is_visible_without_read() {
        let fact = PermissionFact::new(1, 1).admin();
        assert!(Condition::Admin.matches(&fact));
        assert!(!Condition::ReadFolder.matches(&fact));
        assert!(Condition::FolderVisible.matches(&fact));
    }

    #[test]
    fn no_access_grant_is_not_visible() {
        let fact = PermissionFact::new(1, 1);
        assert!(!Condition::FolderVisible.matches(&fact));
    }

    #[test]
    fn shared_type_depends_on_viewer() {
        let fact = private_by(5);
        assert!(!Condition::folder_type(folder_type::SHARED, 5).matches(&fact));
        assert!(Condition::folder_type(folder_type::SHARED, 6).matches(&fact));
        // The stored type is still matched literally.
        assert!(Condition::folder_type(folder_type::PRIVATE, 5).matches(&fact));
    }

    #[test]
    fn shared_type_never_matches_public_folders() {
        let fact = private_by(5).folder_type(folder_type::PUBLIC);
        assert!(!Condition::folder_type(folder_type::SHARED, 6).matches(&fact));
    }

    #[test]
    fn empty_module_set_is_unrestricted() {
        let fact = private_by(1);
        assert!(Condition::module_set(&[]).matches(&fact));
        assert!(Condition::module_set(&[module::CALENDAR, module::MAIL]).matches(&fact));
        assert!(!Condition::module_set(&[module::MAIL]).matches(&fact));
    }

    #[test]
    fn scalar_filters() {
        let fact = private_by(3).parent(9).modified(1000);
        assert!(Condition::Module(module::CALENDAR).matches(&fact));
        assert!(!Condition::Module(module::TASK).matches(&fact));
        assert!(Condition::Parent(9).matches(&fact));
        assert!(!Condition::Parent(8).matches(&fact));
        assert!(Condition::Creator(3).matches(&fact));
        assert!(!Condition::Creator(4).matches(&fact));
        assert!(Condition::LastModifiedAfter(999).matches(&fact));
        assert!(!Condition::LastModifiedAfter(1000).matches(&fact));
    }

    #[test]
    fn all_of_requires_every_member() {
        let fact = private_by(3).parent(9);
        let both = Condition::all_of(vec![Condition::Parent(9), Condition::Creator(3)]);
        let one = Condition::all_of(vec![Condition::Parent(9), Condition::Creator(4)]);
        assert!(both.matches(&fact));
        assert!(!one.matches(&fact));
        assert!(Condition::all_of(Vec::new()).matches(&fact));
    }
}
