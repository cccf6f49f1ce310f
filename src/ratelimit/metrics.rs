//! Point-in-time view of a rate limiter for reporting.

use serde::{Deserialize, Serialize};

/// Snapshot of a limiter's introspection values, taken under one lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    /// Limiter name
    pub name: String,
    /// Permits the next caller would find
    pub available_permissions: u32,
    /// Callers currently queued for permits
    pub number_of_waiting_threads: usize,
    /// Time left in the current cycle, zero once it has elapsed
    pub nanos_to_cycle_end: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_serialize_to_json() {
        let metrics = Metrics {
            name: "flightSearchService".to_string(),
            available_permissions: 3,
            number_of_waiting_threads: 1,
            nanos_to_cycle_end: 250_000_000,
        };

        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["name"], "flightSearchService");
        assert_eq!(json["available_permissions"], 3);
        assert_eq!(json["number_of_waiting_threads"], 1);
        assert_eq!(json["nanos_to_cycle_end"], 250_000_000u64);
    }
}
