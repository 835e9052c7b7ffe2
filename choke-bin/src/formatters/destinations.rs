use choke_lib::Registry;
use serde::Serialize;
use tabled::Tabled;

/// One registered destination, as printed by `choke check`
#[derive(Debug, Tabled, Serialize)]
pub(crate) struct DestinationRow {
    #[tabled(rename = "Id")]
    pub(crate) id: usize,
    #[tabled(rename = "Destination")]
    pub(crate) name: String,
    #[tabled(rename = "Slot Limit")]
    pub(crate) slot_limit: String,
    #[tabled(rename = "Burst")]
    pub(crate) burst_percent: u16,
    #[tabled(rename = "Burst Slots")]
    pub(crate) burst_slots: u64,
    #[tabled(rename = "Bursting")]
    pub(crate) bursting: bool,
    #[tabled(rename = "Hard Limit")]
    pub(crate) hard_limit: u64,
    #[tabled(rename = "Grace")]
    pub(crate) grace_period: String,
    #[tabled(rename = "Flap")]
    pub(crate) flap_period: String,
}

pub(crate) fn destination_rows(registry: &Registry) -> Vec<DestinationRow> {
    registry
        .iter()
        .map(|(id, destination)| {
            let policy = &destination.policy;
            DestinationRow {
                id: id.index(),
                name: destination.name.clone(),
                slot_limit: if policy.is_unlimited() {
                    "unlimited".to_string()
                } else {
                    policy.slot_limit().to_string()
                },
                burst_percent: policy.burst_percent(),
                burst_slots: policy.burst_slots(),
                bursting: policy.can_burst(),
                hard_limit: policy.hard_limit(),
                grace_period: humantime::format_duration(policy.grace_period()).to_string(),
                flap_period: humantime::format_duration(policy.flap_period()).to_string(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use choke_lib::{CapacityPolicy, Registry};
    use test_utils::{policy, registry};

    use super::*;

    #[test]
    fn test_rows() {
        let rows = destination_rows(&registry! {
            "a" => policy!(10, 15, 10, 1800),
            "b" => CapacityPolicy::unlimited(),
            "c" => policy!(10, 15, 0, 1800),
        });
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].burst_slots, 2);
        assert!(rows[0].bursting);
        assert_eq!(rows[0].hard_limit, 12);
        assert_eq!(rows[0].grace_period, "10s");
        assert_eq!(rows[0].flap_period, "30m");
        assert_eq!(rows[1].slot_limit, "unlimited");
        assert!(!rows[1].bursting);

        // Burst slots without a grace period are never handed out
        assert_eq!(rows[2].burst_slots, 2);
        assert!(!rows[2].bursting);
    }
}
