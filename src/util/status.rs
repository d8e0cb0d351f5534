use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

/// Sets the corresponding condition in conditions to new_condition and returns
/// a tuple containing the new conditions vector and whether it was changed.
///
/// 1. If the condition of the specified type already exists, all fields of the
///    existing condition are updated to new_condition. LastTransitionTime is
///    set to now if the new status differs from the old status
/// 2. If a condition of the specified type does not exist, LastTransitionTime
///    is set to now() and new_condition is appended
pub fn set_status_condition(conditions: &[Condition], mut new_condition: Condition) -> (Vec<Condition>, bool) {
    let mut new_conditions = Vec::from(conditions);
    let mut changed = false;

    if let Some(index) = new_conditions.iter().position(|c| c.type_ == new_condition.type_) {
        let existing = &mut new_conditions[index];

        if existing.status != new_condition.status {
            existing.status = new_condition.status;
            existing.last_transition_time = Time(Utc::now());
            changed = true;
        }

        if existing.reason != new_condition.reason {
            existing.reason = new_condition.reason;
            changed = true;
        }

        if existing.message != new_condition.message {
            existing.message = new_condition.message;
            changed = true;
        }

        if existing.observed_generation != new_condition.observed_generation {
            existing.observed_generation = new_condition.observed_generation;
            changed = true;
        }
    } else {
        new_condition.last_transition_time = Time(Utc::now());
        new_conditions.push(new_condition);
        changed = true;
    }

    (new_conditions, changed)
}

/// Finds the condition_type in conditions.
pub fn find_status_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|condition| condition.type_ == condition_type)
}

/// Returns true when the condition_type is present and set to `True`
pub fn is_status_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    conditions
        .iter()
        .any(|condition| condition.type_ == condition_type && condition.status == "True")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn condition(type_: &str, status: &str, reason: &str) -> Condition {
        Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message: format!("{reason} message"),
            last_transition_time: Time(Utc::now()),
            observed_generation: Some(1),
        }
    }

    #[test]
    fn set_appends_then_updates_in_place() {
        let (conditions, changed) = set_status_condition(&[], condition("Available", "True", "Reconciled"));
        assert!(changed);
        assert_eq!(conditions.len(), 1);

        // same type stays a single entry
        let (conditions, changed) =
            set_status_condition(&conditions, condition("Available", "False", "ChildMissing"));
        assert!(changed);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, "False");

        // unchanged write reports no change
        let (conditions, changed) =
            set_status_condition(&conditions, condition("Available", "False", "ChildMissing"));
        assert!(!changed);
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn distinct_types_coexist() {
        let (conditions, _) = set_status_condition(&[], condition("Available", "True", "Reconciled"));
        let (conditions, _) =
            set_status_condition(&conditions, condition("Degraded", "False", "Reconciled"));
        assert_eq!(conditions.len(), 2);
        assert!(is_status_condition_true(&conditions, "Available"));
        assert!(!is_status_condition_true(&conditions, "Degraded"));
        assert!(find_status_condition(&conditions, "Progressing").is_none());
    }
}
