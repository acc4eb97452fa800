use serde::{Deserialize, Serialize};

pub const UNKNOWN_USER_NAME: &str = "Unknown User";

/// Display info for a marketplace user. Owned by the user subsystem; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub name: String,
    pub avatar: Option<String>,
}

impl UserProfile {
    pub fn new(id: i64, name: impl Into<String>, avatar: Option<String>) -> Self {
        Self {
            id,
            name: name.into(),
            avatar,
        }
    }

    /// Stand-in used when display info cannot be loaded
    pub fn placeholder(id: i64) -> Self {
        Self::new(id, UNKNOWN_USER_NAME, None)
    }
}
