use std::collections::BTreeMap;

use enum_dispatch::enum_dispatch;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use self::{
    event::Event, hpa::HorizontalPodAutoscaler, job::Job, object_reference::ObjectReference,
    replica_set::ReplicaSet, scaled_job::ScaledJob, scaled_object::ScaledObject, secret::Secret,
    trigger_authentication::TriggerAuthentication,
};

pub mod condition;
pub mod event;
pub mod hpa;
pub mod job;
pub mod object_reference;
pub mod pod;
pub mod replica_set;
pub mod scaled_job;
pub mod scaled_object;
pub mod secret;
pub mod trigger;
pub mod trigger_authentication;

#[enum_dispatch]
pub trait Object:
    Clone + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Kind of the object, e.g. `ScaledObject`.
    fn kind(&self) -> &'static str;
    /// Name of the object, unique within its kind.
    fn name(&self) -> &String;
    /// URI of the object on the API server.
    fn uri(&self) -> String;
}

/// An envelope over every object kind the API server stores,
/// tagged by `kind` on the wire.
#[enum_dispatch(Object)]
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "kind")]
pub enum KubeObject {
    ScaledObject(ScaledObject),
    ScaledJob(ScaledJob),
    TriggerAuthentication(TriggerAuthentication),
    HorizontalPodAutoscaler(HorizontalPodAutoscaler),
    ReplicaSet(ReplicaSet),
    Job(Job),
    Secret(Secret),
    Event(Event),
}

/// Standard object metadata.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub name: String,
    /// Namespace the object belongs to. Defaults to `default`.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// UID allocated by the API server on admission.
    pub uid: Option<Uuid>,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Objects this object is owned by.
    /// An owned object is garbage once every owner is gone.
    #[serde(default)]
    pub owner_references: Vec<ObjectReference>,
}

pub fn default_namespace() -> String {
    "default".to_string()
}

/// Map of string keys and values attached to an object,
/// used to organize and select subsets of objects.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Labels(pub BTreeMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Labels(BTreeMap::new())
    }

    pub fn insert(&mut self, key: &str, value: &str) -> &mut Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.0.get(key)
    }

    /// Whether every key value pair in `selector` is present in this set.
    pub fn matches(&self, selector: &Labels) -> bool {
        selector
            .0
            .iter()
            .all(|(key, value)| self.0.get(key) == Some(value))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Labels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (key, value) in &self.0 {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}={}", key, value)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_match_subset() {
        let mut labels = Labels::new();
        labels.insert("app", "worker").insert("tier", "backend");
        let mut selector = Labels::new();
        selector.insert("app", "worker");
        assert!(labels.matches(&selector));
        selector.insert("tier", "frontend");
        assert!(!labels.matches(&selector));
    }

    #[test]
    fn empty_selector_matches_everything() {
        let labels = Labels::new();
        assert!(labels.matches(&Labels::new()));
    }
}
