use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Condition types reported on scaled resources.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, Display)]
pub enum ConditionType {
    /// The resource is valid and its scalers are in place.
    Ready,
    /// At least one trigger reports work above its activation threshold.
    Active,
    /// At least one scaler tripped its failure threshold
    /// and the fallback replica count is in force.
    Fallback,
}

/// One observed condition of a resource.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: bool,
    /// Machine readable reason for the last transition, e.g. `ScaledObjectReady`.
    pub reason: Option<String>,
    /// Human readable detail, names the trigger type and parameter on failures.
    pub message: Option<String>,
    pub last_transition_time: Option<NaiveDateTime>,
}

/// Update `type_` in `conditions` in place, keeping `last_transition_time`
/// untouched unless the status flipped. Returns true when the status flipped.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: ConditionType,
    status: bool,
    reason: &str,
    message: &str,
    now: NaiveDateTime,
) -> bool {
    for condition in conditions.iter_mut() {
        if condition.type_ == type_ {
            let flipped = condition.status != status;
            if flipped {
                condition.last_transition_time = Some(now);
            }
            condition.status = status;
            condition.reason = Some(reason.to_string());
            condition.message = Some(message.to_string());
            return flipped;
        }
    }
    conditions.push(Condition {
        type_,
        status,
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: Some(now),
    });
    true
}

/// Look up the status of `type_`, defaulting to false when absent.
pub fn condition_status(conditions: &[Condition], type_: &ConditionType) -> bool {
    conditions
        .iter()
        .find(|c| c.type_ == *type_)
        .map(|c| c.status)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;

    use super::*;

    fn at(secs: i64) -> NaiveDateTime {
        NaiveDateTime::from_timestamp(secs, 0)
    }

    #[test]
    fn set_condition_records_transitions() {
        let mut conditions = Vec::new();
        assert!(set_condition(
            &mut conditions,
            ConditionType::Ready,
            true,
            "ScaledObjectReady",
            "scalers started",
            at(1),
        ));
        // Same status again is not a transition
        assert!(!set_condition(
            &mut conditions,
            ConditionType::Ready,
            true,
            "ScaledObjectReady",
            "scalers started",
            at(2),
        ));
        assert_eq!(conditions[0].last_transition_time, Some(at(1)));
        // Flip records the new transition time
        assert!(set_condition(
            &mut conditions,
            ConditionType::Ready,
            false,
            "ScaledObjectCheckFailed",
            "trigger 0 invalid",
            at(3),
        ));
        assert_eq!(conditions[0].last_transition_time, Some(at(3)));
        assert!(!condition_status(&conditions, &ConditionType::Ready));
        assert!(!condition_status(&conditions, &ConditionType::Fallback));
    }
}
