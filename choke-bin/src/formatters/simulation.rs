use serde::Serialize;
use tabled::Tabled;

/// Outcome of `choke simulate`
#[derive(Debug, Tabled, Serialize)]
pub(crate) struct SimulationReport {
    #[tabled(rename = "Destination")]
    pub(crate) destination: String,
    #[tabled(rename = "Workers")]
    pub(crate) workers: u16,
    #[tabled(rename = "Requests")]
    pub(crate) requests: u64,
    #[tabled(rename = "Admitted")]
    pub(crate) admitted: u64,
    #[tabled(rename = "Burst")]
    pub(crate) burst_admitted: u64,
    #[tabled(rename = "Rejected")]
    pub(crate) rejected: u64,
    #[tabled(rename = "Lock Failures")]
    pub(crate) lock_failures: u64,
    #[tabled(rename = "Peak In Use")]
    pub(crate) peak_in_use: u64,
    #[tabled(rename = "Hard Limit")]
    pub(crate) hard_limit: u64,
    #[tabled(rename = "Elapsed")]
    pub(crate) elapsed: String,
}
