//! quorumdb-discovery: mDNS advertiser and continuous browser (C3).
//!
//! Service type `_uri._tcp.local.`; each share is one instance
//! `<share-name>.<type>` carrying `uri=<leader-rpc-uri>` in its TXT record.
//! `mdns-sd` renames on collision, so [`Discovery::advertise`] returns the
//! name it actually registered rather than assuming it matches the request.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Mutex;

use dashmap::DashMap;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tracing::{info, warn};

use quorumdb_core::{QuorumError, QuorumResult};

pub const SERVICE_TYPE: &str = "_uri._tcp.local.";

/// Everything known about one browsed share.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShareRecord {
    pub uri: String,
    pub host: String,
    pub port: u16,
}

/// Wraps one `mdns_sd::ServiceDaemon` to advertise local shares and to
/// continuously browse for peers' shares.
pub struct Discovery {
    daemon: ServiceDaemon,
    services: DashMap<String, ShareRecord>,
    ignored_uris: Mutex<HashSet<String>>,
}

impl Discovery {
    pub fn new() -> QuorumResult<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| QuorumError::Internal(format!("mDNS daemon startup failed: {e}")))?;
        let discovery = Self {
            daemon,
            services: DashMap::new(),
            ignored_uris: Mutex::new(HashSet::new()),
        };
        discovery.start_browsing()?;
        Ok(discovery)
    }

    /// Registers `<share_name>.{SERVICE_TYPE}` advertising `uri` at
    /// `host:port`. Returns the name actually registered, which can differ
    /// from `share_name` if the mDNS stack renamed it to resolve a
    /// collision (§4.3).
    pub fn advertise(&self, share_name: &str, host: IpAddr, port: u16, uri: &str) -> QuorumResult<String> {
        let host_name = format!("{host}.local.");
        let mut properties = std::collections::HashMap::new();
        properties.insert("uri".to_string(), uri.to_string());

        let info = ServiceInfo::new(
            SERVICE_TYPE,
            share_name,
            &host_name,
            host,
            port,
            Some(properties),
        )
        .map_err(|e| QuorumError::Internal(format!("building mDNS record failed: {e}")))?;

        let registered_fullname = info.get_fullname().to_string();

        self.daemon
            .register(info)
            .map_err(|e| QuorumError::Internal(format!("mDNS registration failed: {e}")))?;

        self.ignore(uri);
        info!(share_name, registered_fullname, "advertised share");
        Ok(registered_fullname)
    }

    pub fn unadvertise(&self, registered_fullname: &str) -> QuorumResult<()> {
        self.daemon
            .unregister(registered_fullname)
            .map_err(|e| QuorumError::Internal(format!("mDNS unregister failed: {e}")))?;
        Ok(())
    }

    fn start_browsing(&self) -> QuorumResult<()> {
        let receiver = self
            .daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| QuorumError::Internal(format!("mDNS browse failed: {e}")))?;

        let services = self.services.clone();
        std::thread::spawn(move || {
            while let Ok(event) = receiver.recv() {
                match event {
                    ServiceEvent::ServiceResolved(info) => {
                        let Some(uri) = info.get_property_val_str("uri") else {
                            warn!(fullname = info.get_fullname(), "resolved share missing uri TXT record");
                            continue;
                        };
                        let Some(addr) = info.get_addresses().iter().next() else {
                            continue;
                        };
                        services.insert(
                            info.get_fullname().to_string(),
                            ShareRecord {
                                uri: uri.to_string(),
                                host: addr.to_string(),
                                port: info.get_port(),
                            },
                        );
                    }
                    ServiceEvent::ServiceRemoved(_, fullname) => {
                        services.remove(&fullname);
                    }
                    _ => {}
                }
            }
        });
        Ok(())
    }

    /// Adds `uri` to the set of URIs hidden from [`Discovery::candidates`]
    /// — used for the process's own advertised shares and for peers it is
    /// already connected to.
    pub fn ignore(&self, uri: &str) {
        self.ignored_uris
            .lock()
            .expect("ignored_uris lock poisoned")
            .insert(uri.to_string());
    }

    /// Alias matching §4.3's naming for the explicit "hide this one" call.
    pub fn forget(&self, uri: &str) {
        self.ignore(uri);
    }

    /// Removes `uri` from the ignored set, restoring it to the candidate
    /// list — used when a follower leaves its leader (carried forward from
    /// the original implementation's `Leave` path, §10).
    pub fn reintroduce(&self, uri: &str) {
        self.ignored_uris
            .lock()
            .expect("ignored_uris lock poisoned")
            .remove(uri);
    }

    /// Every currently-known, non-ignored share, keyed by its mDNS fullname.
    pub fn candidates(&self) -> Vec<(String, ShareRecord)> {
        let ignored = self.ignored_uris.lock().expect("ignored_uris lock poisoned");
        self.services
            .iter()
            .filter(|entry| !ignored.contains(&entry.value().uri))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_then_reintroduce_restores_visibility() {
        let services = DashMap::new();
        services.insert(
            "share._uri._tcp.local.".to_string(),
            ShareRecord {
                uri: "127.0.0.1:9000".to_string(),
                host: "127.0.0.1".to_string(),
                port: 9000,
            },
        );
        let ignored = Mutex::new(HashSet::new());

        let candidates_visible = |services: &DashMap<String, ShareRecord>, ignored: &Mutex<HashSet<String>>| {
            let guard = ignored.lock().unwrap();
            services
                .iter()
                .filter(|e| !guard.contains(&e.value().uri))
                .count()
        };

        assert_eq!(candidates_visible(&services, &ignored), 1);
        ignored.lock().unwrap().insert("127.0.0.1:9000".to_string());
        assert_eq!(candidates_visible(&services, &ignored), 0);
        ignored.lock().unwrap().remove("127.0.0.1:9000");
        assert_eq!(candidates_visible(&services, &ignored), 1);
    }
}
