use serde::{Deserialize, Serialize};

/// Reference to another object, enough to look it up on the API server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ObjectReference {
    pub kind: String,
    pub name: String,
}
