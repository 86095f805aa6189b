use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{DiscoveryError, SaturnService};

/// DNS-SD service type browsed on the link-local domain.
pub const SERVICE_TYPE: &str = "_saturn._tcp.local.";

/// Browse the local network once and return every Saturn service resolved
/// before the timeout elapses.
///
/// The full window is always consumed so that slower responders still make
/// it into the result; an empty result is a [`DiscoveryError::Timeout`].
/// A record that fails to parse is logged and dropped, never fatal.
pub async fn discover(timeout: Duration) -> Result<Vec<SaturnService>, DiscoveryError> {
    let daemon =
        ServiceDaemon::new().map_err(|e| DiscoveryError::NetworkUnavailable(e.to_string()))?;
    let events = daemon
        .browse(SERVICE_TYPE)
        .map_err(|e| DiscoveryError::NetworkUnavailable(e.to_string()))?;

    let deadline = Instant::now() + timeout;
    let mut seen: HashSet<String> = HashSet::new();
    let mut services = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, events.recv_async()).await {
            Err(_) => break,
            Ok(Err(_)) => break,
            Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                if !seen.insert(info.get_fullname().to_string()) {
                    continue;
                }
                match parse_instance(&info) {
                    Some(service) => {
                        debug!(name = %service.name, host = %service.host, port = service.port, "resolved saturn service");
                        services.push(service);
                    }
                    None => {
                        warn!(fullname = %info.get_fullname(), "dropping unresolvable saturn record");
                    }
                }
            }
            Ok(Ok(_)) => {}
        }
    }

    let _ = daemon.stop_browse(SERVICE_TYPE);
    let _ = daemon.shutdown();

    if services.is_empty() {
        Err(DiscoveryError::Timeout(timeout))
    } else {
        Ok(services)
    }
}

/// Convert one resolved mDNS instance into a service record.
///
/// The instance-name portion of the fullname becomes `name`; `host` is the
/// first IPv4 target, falling back to IPv6, then to the advertised hostname.
fn parse_instance(info: &ServiceInfo) -> Option<SaturnService> {
    let name = instance_name(info.get_fullname());
    if name.is_empty() {
        return None;
    }

    let host = pick_address(info.get_addresses())
        .map(|ip| ip.to_string())
        .or_else(|| {
            let hostname = info.get_hostname().trim_end_matches('.').to_string();
            if hostname.is_empty() {
                None
            } else {
                Some(hostname)
            }
        })?;

    let txt: HashMap<String, String> = info
        .get_properties()
        .iter()
        .map(|prop| (prop.key().to_string(), prop.val_str().to_string()))
        .collect();

    Some(SaturnService::from_txt(name, host, info.get_port(), &txt))
}

fn instance_name(fullname: &str) -> String {
    fullname
        .strip_suffix(SERVICE_TYPE)
        .unwrap_or(fullname)
        .trim_end_matches('.')
        .to_string()
}

fn pick_address(addresses: &HashSet<IpAddr>) -> Option<IpAddr> {
    let mut sorted: Vec<IpAddr> = addresses.iter().copied().collect();
    sorted.sort();
    sorted
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| sorted.first())
        .copied()
}
