pub mod browse;
pub mod cache;
pub mod service;

pub use browse::{discover, SERVICE_TYPE};
pub use cache::ServiceCache;
pub use service::{filter, select, sort_by_score, DiscoveryFilter, SaturnService};

use std::time::Duration;

/// Discovery-class failures. All of these abort provider construction in
/// single-agent mode; callers may retry.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("no Saturn service observed within {0:?}")]
    Timeout(Duration),

    #[error("no service matches the discovery filter")]
    NoServiceMatches,

    #[error("multicast query could not be sent: {0}")]
    NetworkUnavailable(String),
}
