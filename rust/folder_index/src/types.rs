//! Domain types shared across folder_index modules.

use serde::{Deserialize, Serialize};

/// Folder type identifiers as stored with each folder.
pub mod folder_type {
    pub const PRIVATE: i32 = 1;
    pub const PUBLIC: i32 = 2;
    /// Never stored. Derived at query time: a private folder the viewer
    /// did not create.
    pub const SHARED: i32 = 3;
    pub const SYSTEM: i32 = 5;
}

/// Module identifiers a folder can belong to.
pub mod module {
    pub const TASK: i32 = 1;
    pub const CALENDAR: i32 = 2;
    pub const CONTACT: i32 = 3;
    pub const UNBOUND: i32 = 4;
    pub const SYSTEM: i32 = 5;
    pub const MAIL: i32 = 7;
    pub const INFOSTORE: i32 = 8;
}

/// One (folder, entity) permission grant as read from storage.
///
/// `entity_id` is either a user or a group; both are visibility subjects.
/// Ids are taken as-is: validation belongs to the storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionFact {
    pub folder_id: i32,
    pub entity_id: i32,
    pub is_admin: bool,
    pub can_read_folder: bool,
    pub module: i32,
    #[serde(rename = "type")]
    pub folder_type: i32,
    pub creator_id: i32,
    /// Milliseconds since the Unix epoch.
    pub last_modified: i64,
    pub parent_folder_id: i32,
}

impl PermissionFact {
    /// A grant with no access bits, module 0, type 0 and no parent.
    pub fn new(folder_id: i32, entity_id: i32) -> Self {
        Self {
            folder_id,
            entity_id,
            is_admin: false,
            can_read_folder: false,
            module: 0,
            folder_type: 0,
            creator_id: 0,
            last_modified: 0,
            parent_folder_id: 0,
        }
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }

    pub fn read(mut self) -> Self {
        self.can_read_folder = true;
        self
    }

    pub fn module(mut self, module: i32) -> Self {
        self.module = module;
        self
    }

    pub fn folder_type(mut self, folder_type: i32) -> Self {
        self.folder_type = folder_type;
        self
    }

    pub fn creator(mut self, creator_id: i32) -> Self {
        self.creator_id = creator_id;
        self
    }

    pub fn parent(mut self, parent_folder_id: i32) -> Self {
        self.parent_folder_id = parent_folder_id;
        self
    }

    pub fn modified(mut self, last_modified: i64) -> Self {
        self.last_modified = last_modified;
        self
    }
}
