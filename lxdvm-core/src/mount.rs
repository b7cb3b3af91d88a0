use serde::{Deserialize, Serialize};

/// A host-to-guest id translation entry (`host:guest`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdMapping {
    /// Id on the host.
    pub host: u32,
    /// Id inside the guest.
    pub guest: u32,
}

/// A request to expose a host directory inside a guest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct VmMount {
    /// Directory on the host.
    pub source_path: String,
    /// User id translations.
    pub uid_mappings: Vec<IdMapping>,
    /// Group id translations.
    pub gid_mappings: Vec<IdMapping>,
}

impl VmMount {
    /// Creates a mount of `source_path` with no id translation.
    pub fn new(source_path: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            uid_mappings: Vec::new(),
            gid_mappings: Vec::new(),
        }
    }

    /// Adds id translations.
    #[must_use]
    pub fn with_mappings(mut self, uid_mappings: Vec<IdMapping>, gid_mappings: Vec<IdMapping>) -> Self {
        self.uid_mappings = uid_mappings;
        self.gid_mappings = gid_mappings;
        self
    }

    /// Returns `true` when the mount asks for any uid or gid translation.
    #[must_use]
    pub fn has_id_mappings(&self) -> bool {
        !self.uid_mappings.is_empty() || !self.gid_mappings.is_empty()
    }
}
