use std::sync::{Arc, OnceLock, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

use super::{browse, DiscoveryError, SaturnService};

/// Default snapshot lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
/// Default browse window for a cache refresh.
pub const DEFAULT_BROWSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Process-wide cache of discovered services.
///
/// Readers take an immutable snapshot reference and never block each other;
/// a refresh builds a fresh snapshot off to the side and swaps it in. At
/// most one browse is outstanding at a time; readers arriving while a
/// refresh is in flight get the previous snapshot.
#[derive(Debug)]
pub struct ServiceCache {
    ttl: Duration,
    browse_timeout: Duration,
    snapshot: RwLock<Snapshot>,
    refresh_lock: tokio::sync::Mutex<()>,
}

#[derive(Clone, Debug)]
struct Snapshot {
    services: Arc<Vec<SaturnService>>,
    refreshed_at: Option<Instant>,
}

static GLOBAL: OnceLock<Arc<ServiceCache>> = OnceLock::new();

impl ServiceCache {
    pub fn new(ttl: Duration, browse_timeout: Duration) -> Self {
        Self {
            ttl,
            browse_timeout,
            snapshot: RwLock::new(Snapshot {
                services: Arc::new(Vec::new()),
                refreshed_at: None,
            }),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The process-global cache with default TTL.
    pub fn global() -> Arc<ServiceCache> {
        GLOBAL
            .get_or_init(|| Arc::new(ServiceCache::new(DEFAULT_TTL, DEFAULT_BROWSE_TIMEOUT)))
            .clone()
    }

    /// Return the cached snapshot, refreshing first when it has gone stale.
    ///
    /// A stale read that finds another refresh already in flight returns the
    /// previous snapshot rather than waiting, unless the cache has never
    /// been filled at all.
    pub async fn get(&self) -> Result<Arc<Vec<SaturnService>>, DiscoveryError> {
        let current = self.read_snapshot();
        if self.is_fresh(&current) {
            return Ok(current.services);
        }

        match self.refresh_lock.try_lock() {
            Ok(_guard) => {
                let rechecked = self.read_snapshot();
                if self.is_fresh(&rechecked) {
                    return Ok(rechecked.services);
                }
                self.refresh_locked().await
            }
            Err(_) => {
                if current.refreshed_at.is_some() {
                    Ok(current.services)
                } else {
                    // First fill: wait for the in-flight browse to publish.
                    let _guard = self.refresh_lock.lock().await;
                    let filled = self.read_snapshot();
                    if filled.refreshed_at.is_some() {
                        Ok(filled.services)
                    } else {
                        self.refresh_locked().await
                    }
                }
            }
        }
    }

    /// Force a browse and publish the result, regardless of TTL.
    pub async fn refresh(&self) -> Result<Arc<Vec<SaturnService>>, DiscoveryError> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    /// Current snapshot without any freshness check or refresh.
    pub fn peek(&self) -> Arc<Vec<SaturnService>> {
        self.read_snapshot().services
    }

    /// Replace the snapshot directly, marking it fresh. Lets callers seed
    /// the cache from an out-of-band browse (and tests from fixtures).
    pub fn publish(&self, services: Vec<SaturnService>) {
        let mut guard = self.snapshot.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Snapshot {
            services: Arc::new(services),
            refreshed_at: Some(Instant::now()),
        };
    }

    async fn refresh_locked(&self) -> Result<Arc<Vec<SaturnService>>, DiscoveryError> {
        debug!(timeout = ?self.browse_timeout, "refreshing saturn service cache");
        let services = browse::discover(self.browse_timeout).await?;
        self.publish(services);
        Ok(self.read_snapshot().services)
    }

    fn read_snapshot(&self) -> Snapshot {
        self.snapshot
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn is_fresh(&self, snapshot: &Snapshot) -> bool {
        snapshot
            .refreshed_at
            .is_some_and(|at| at.elapsed() < self.ttl)
    }
}
