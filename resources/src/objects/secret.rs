use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Metadata, Object};

/// Opaque key value credential material stored by the API server.
/// Values are held as plain strings; the API server owns encoding at rest.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Secret {
    pub metadata: Metadata,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Object for Secret {
    fn kind(&self) -> &'static str {
        "Secret"
    }

    fn name(&self) -> &String {
        &self.metadata.name
    }

    fn uri(&self) -> String {
        format!("/api/v1/secrets/{}", self.metadata.name)
    }
}
