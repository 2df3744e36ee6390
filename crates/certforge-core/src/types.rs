use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A synthetic client. Clients carry no state beyond their id, which is
/// stable for the duration of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Client {
    pub id: i64,
}

/// One issued certificate window.
///
/// Record identity is `(certificate_id, issued_at)`: the numeric certificate
/// id is a reusable slot that may be reassigned to a new client once its
/// previous validity window has fully elapsed. `certificate_id` alone is the
/// externally visible certificate number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub certificate_id: i64,
    pub client_id: i64,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

impl CertificateRecord {
    /// A record is active while its window has not elapsed at `now`.
    pub fn is_active_at(&self, now: NaiveDateTime) -> bool {
        self.expires_at > now
    }
}

/// Parameters of one generation job, fixed at start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub num_clients: u64,
    pub num_certificates: u64,
    /// Seed for the deterministic synthesizers. Identical parameters and seed
    /// reproduce the exact same record set.
    pub seed: u64,
    /// The synthetic "now" against which expiry and activity are evaluated
    /// during synthesis.
    pub reference_time: NaiveDateTime,
}

/// Lifecycle states of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states are final; a new job requires a fresh job record.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Point-in-time view of a job, as returned by `get_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub status: JobStatus,
    pub requested_clients: u64,
    pub requested_certificates: u64,
    pub produced_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One row of the active-certificate listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveCertificate {
    pub client_id: i64,
    pub certificate_id: i64,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

/// One page of query results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    pub page: u64,
    pub page_size: u64,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.page.saturating_mul(self.page_size) < self.total_count
    }
}
