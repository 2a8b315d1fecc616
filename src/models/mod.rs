//! Data models shared across the tool: severity categories, health records,
//! and the daemon control request/response types.

mod category;
mod control;
mod health;

pub use category::{Category, ColorClass};
pub use control::{
    interpret_response, parse_control_body, status_message, ActionRequest, ControlResponse,
    ControlUpdate, NodeOutcome, Subsystem,
};
pub use health::HealthRecord;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify_health_status;

    #[test]
    fn test_probe_record_classification_roundtrip() {
        // the prober leaves category untouched; classification happens on
        // the status code it produced
        let mut record = HealthRecord::new("health");
        record.status = "NO_FS".to_string();
        record.category = classify_health_status(&record.status);
        assert_eq!(record.category, Category::Error);
        assert_eq!(record.category.color_class(), ColorClass::Alert);
    }

    #[test]
    fn test_request_routing_matches_outcome_paths() {
        let single = ActionRequest::new(Subsystem::Chassis, "identify", "login1").unwrap();
        assert!(single.is_single_target());

        let batch = ActionRequest::new(Subsystem::Chassis, "identify", "login[1-4]").unwrap();
        assert!(!batch.is_single_target());
        assert_eq!(
            batch.submit_body()["control"]["chassis"]["identify"]["hostlist"],
            "login[1-4]"
        );
    }
}
