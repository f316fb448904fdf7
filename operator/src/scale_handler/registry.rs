use std::{collections::HashMap, sync::Arc};

use arc_swap::ArcSwap;

use crate::error::ScalerError;

/// Where a metric name is served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRoute {
    pub target_id: String,
    pub scaler_index: usize,
}

/// Copy-on-write mapping of external metric name to owning target.
/// Writers run only during cache rebuilds, serialized by the scale
/// handler's build lock; they construct a fresh map and publish it
/// through an atomic pointer swap. Readers take a snapshot per request
/// and never block.
pub struct MetricNameRegistry {
    routes: ArcSwap<HashMap<String, MetricRoute>>,
}

impl MetricNameRegistry {
    pub fn new() -> Self {
        Self {
            routes: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    pub fn lookup(&self, metric_name: &str) -> Option<MetricRoute> {
        self.routes.load().get(metric_name).cloned()
    }

    /// Replace every route owned by `target_id` with `names`
    /// (metric name, scaler index within the target's cache).
    /// Nothing is published when a name is already owned by another
    /// target; metric names must be unique process-wide.
    pub fn replace_target(
        &self,
        target_id: &str,
        names: &[(String, usize)],
    ) -> Result<(), ScalerError> {
        let current = self.routes.load_full();
        let mut fresh: HashMap<String, MetricRoute> = current
            .iter()
            .filter(|(_, route)| route.target_id != target_id)
            .map(|(name, route)| (name.to_owned(), route.to_owned()))
            .collect();
        for (name, scaler_index) in names {
            if let Some(owner) = fresh.get(name) {
                return Err(ScalerError::Config(format!(
                    "metric name {} already registered by {}",
                    name, owner.target_id
                )));
            }
            fresh.insert(
                name.to_owned(),
                MetricRoute {
                    target_id: target_id.to_string(),
                    scaler_index: *scaler_index,
                },
            );
        }
        self.routes.store(Arc::new(fresh));
        Ok(())
    }

    pub fn remove_target(&self, target_id: &str) {
        let current = self.routes.load_full();
        let fresh: HashMap<String, MetricRoute> = current
            .iter()
            .filter(|(_, route)| route.target_id != target_id)
            .map(|(name, route)| (name.to_owned(), route.to_owned()))
            .collect();
        self.routes.store(Arc::new(fresh));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_and_lookup() {
        let registry = MetricNameRegistry::new();
        registry
            .replace_target(
                "scaledobject/default/worker",
                &[("s0-rabbitmq-orders-default-worker".to_string(), 0)],
            )
            .unwrap();
        let route = registry.lookup("s0-rabbitmq-orders-default-worker").unwrap();
        assert_eq!(route.target_id, "scaledobject/default/worker");
        assert_eq!(route.scaler_index, 0);
        assert!(registry.lookup("unknown").is_none());
    }

    #[test]
    fn names_are_unique_across_targets() {
        let registry = MetricNameRegistry::new();
        registry
            .replace_target("scaledobject/default/a", &[("m".to_string(), 0)])
            .unwrap();
        let err = registry
            .replace_target("scaledobject/default/b", &[("m".to_string(), 0)])
            .unwrap_err();
        assert!(err.is_config());
        // The failed publish must not have clobbered the owner
        assert_eq!(
            registry.lookup("m").unwrap().target_id,
            "scaledobject/default/a"
        );
    }

    #[test]
    fn replace_drops_stale_names_of_same_target() {
        let registry = MetricNameRegistry::new();
        registry
            .replace_target("scaledobject/default/a", &[("old".to_string(), 0)])
            .unwrap();
        registry
            .replace_target("scaledobject/default/a", &[("new".to_string(), 0)])
            .unwrap();
        assert!(registry.lookup("old").is_none());
        assert!(registry.lookup("new").is_some());

        registry.remove_target("scaledobject/default/a");
        assert!(registry.lookup("new").is_none());
    }
}
