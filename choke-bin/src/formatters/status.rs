use choke_lib::{Destination, DestinationId, LedgerRecord, Timestamp};
use serde::Serialize;
use tabled::Tabled;

/// Live state of one destination, as printed by `choke status`
#[derive(Debug, Tabled, Serialize)]
pub(crate) struct StatusRow {
    #[tabled(rename = "Id")]
    pub(crate) id: usize,
    #[tabled(rename = "Destination")]
    pub(crate) name: String,
    #[tabled(rename = "In Use")]
    pub(crate) in_use_slots: u64,
    #[tabled(rename = "Limit")]
    pub(crate) limit: String,
    #[tabled(rename = "Grace Window")]
    pub(crate) grace_window: String,
    #[tabled(skip)]
    pub(crate) grace_expires_at: Option<Timestamp>,
}

impl StatusRow {
    pub(crate) fn new(
        id: DestinationId,
        destination: &Destination,
        record: &LedgerRecord,
        now: Timestamp,
    ) -> Self {
        let policy = &destination.policy;
        let limit = if policy.is_unlimited() {
            "unlimited".to_string()
        } else {
            format!("{}+{}", policy.slot_limit(), policy.burst_slots())
        };
        let grace_window = match record.grace_expires_at {
            None => "-".to_string(),
            Some(expiry) => match expiry.remaining_since(now) {
                Some(remaining) => format!(
                    "open, {} left",
                    humantime::format_duration(round_to_secs(remaining))
                ),
                None => format!("closed at {expiry}"),
            },
        };
        Self {
            id: id.index(),
            name: destination.name.clone(),
            in_use_slots: record.in_use_slots,
            limit,
            grace_window,
            grace_expires_at: record.grace_expires_at,
        }
    }
}

fn round_to_secs(duration: std::time::Duration) -> std::time::Duration {
    std::time::Duration::from_secs(duration.as_secs())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use choke_lib::CapacityPolicy;

    use super::*;

    fn destination() -> Destination {
        Destination {
            name: "www.example.com".to_string(),
            policy: CapacityPolicy::new(10, 15, 10, 1800).unwrap(),
        }
    }

    #[test]
    fn test_open_window() {
        let now = Timestamp::from_secs(100);
        let record = LedgerRecord {
            in_use_slots: 11,
            grace_expires_at: Some(now.saturating_add(Duration::from_millis(4500))),
        };
        let row = StatusRow::new(DestinationId::from(0), &destination(), &record, now);
        assert_eq!(row.limit, "10+2");
        assert_eq!(row.grace_window, "open, 4s left");
    }

    #[test]
    fn test_no_window() {
        let row = StatusRow::new(
            DestinationId::from(3),
            &destination(),
            &LedgerRecord::default(),
            Timestamp::from_secs(0),
        );
        assert_eq!(row.id, 3);
        assert_eq!(row.grace_window, "-");
    }

    #[test]
    fn test_closed_window() {
        let record = LedgerRecord {
            in_use_slots: 0,
            grace_expires_at: Some(Timestamp::from_secs(5)),
        };
        let row = StatusRow::new(
            DestinationId::from(0),
            &destination(),
            &record,
            Timestamp::from_secs(6),
        );
        assert_eq!(row.grace_window, "closed at 5.000000");
    }
}
