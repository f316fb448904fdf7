use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{object_reference::ObjectReference, Metadata, Object};

/// A report of a state transition somewhere in the cluster,
/// attached to the object it happened to.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub metadata: Metadata,
    /// The object this event is about.
    pub involved_object: ObjectReference,
    /// Machine readable reason, e.g. `KEDAScalersStarted`.
    pub reason: String,
    pub message: String,
    pub timestamp: NaiveDateTime,
}

impl Object for Event {
    fn kind(&self) -> &'static str {
        "Event"
    }

    fn name(&self) -> &String {
        &self.metadata.name
    }

    fn uri(&self) -> String {
        format!("/api/v1/events/{}", self.metadata.name)
    }
}
