//! Provider endpoint directory backed by the chain LCD
//!
//! Providers advertise multiaddrs. HTTP multiaddrs become direct-SP base
//! URLs; `/p2p/` addresses over ws/wss are reached through the overlay's
//! HTTP bridge on the same host and port.

use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::transport::TransportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub address: String,
    pub status: String,
    /// Direct-SP base URLs, in advertised order
    pub http_bases: Vec<String>,
    /// Peer overlay multiaddrs, in advertised order
    pub overlay_addrs: Vec<String>,
}

impl ProviderEndpoints {
    fn from_record(record: ProviderRecord) -> Self {
        let http_bases = record.endpoints.iter().filter_map(|ep| multiaddr_to_http_url(ep)).collect();
        let overlay_addrs = record
            .endpoints
            .iter()
            .filter_map(|ep| multiaddr_to_p2p_ws_addr(ep))
            .collect();
        Self {
            address: record.address,
            status: record.status,
            http_bases,
            overlay_addrs,
        }
    }

    pub fn direct_sp_base(&self) -> Option<&str> {
        self.http_bases.first().map(String::as_str)
    }

    pub fn overlay_bridge(&self) -> Option<String> {
        self.overlay_addrs.iter().find_map(|addr| overlay_bridge_url(addr))
    }
}

#[derive(Debug, Deserialize)]
struct ProvidersResponse {
    #[serde(default)]
    providers: Vec<ProviderRecord>,
}

#[derive(Debug, Deserialize)]
struct ProviderRecord {
    address: String,
    #[serde(default)]
    endpoints: Vec<String>,
    #[serde(default)]
    status: String,
}

struct CachedProviders {
    fetched_at: Instant,
    by_address: HashMap<String, ProviderEndpoints>,
}

/// Provider lookups with an explicit time-to-live
pub struct ProviderDirectory {
    http: Client,
    lcd_base: String,
    ttl: Duration,
    cache: Mutex<Option<CachedProviders>>,
}

impl ProviderDirectory {
    pub fn new(http: Client, lcd_base: impl Into<String>, ttl: Duration) -> Self {
        Self {
            http,
            lcd_base: lcd_base.into().trim_end_matches('/').to_string(),
            ttl,
            cache: Mutex::new(None),
        }
    }

    /// Endpoints for `address`, refreshing the provider list when stale
    pub async fn lookup(&self, address: &str) -> Result<Option<ProviderEndpoints>, TransportError> {
        let mut cache = self.cache.lock().await;

        let fresh = cache.as_ref().is_some_and(|c| c.fetched_at.elapsed() < self.ttl);
        if !fresh {
            let by_address = self.fetch_providers().await?;
            debug!(providers = by_address.len(), "Refreshed provider directory");
            *cache = Some(CachedProviders {
                fetched_at: Instant::now(),
                by_address,
            });
        }

        Ok(cache.as_ref().and_then(|c| c.by_address.get(address).cloned()))
    }

    async fn fetch_providers(&self) -> Result<HashMap<String, ProviderEndpoints>, TransportError> {
        let url = format!("{}/nilchain/nilchain/v1/providers", self.lcd_base);
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(TransportError::http(status, format!("provider list: {}", text)));
        }
        let body: ProvidersResponse = resp.json().await?;
        Ok(body
            .providers
            .into_iter()
            .map(|record| (record.address.clone(), ProviderEndpoints::from_record(record)))
            .collect())
    }
}

/// `/ip4/1.2.3.4/tcp/8080/http` -> `http://1.2.3.4:8080`
pub fn multiaddr_to_http_url(ep: &str) -> Option<String> {
    let parts = split_multiaddr(ep)?;
    let scheme = if parts.contains(&"https") {
        "https"
    } else if parts.contains(&"http") {
        "http"
    } else {
        return None;
    };
    let (host, port) = host_port(&parts)?;
    Some(format!("{}://{}:{}", scheme, host, port))
}

/// Keep `/p2p/` multiaddrs reachable over websockets
pub fn multiaddr_to_p2p_ws_addr(ep: &str) -> Option<String> {
    let s = ep.trim();
    if !s.contains("/p2p/") {
        return None;
    }
    let parts = split_multiaddr(s)?;
    if !parts.contains(&"ws") && !parts.contains(&"wss") {
        return None;
    }
    Some(s.to_string())
}

/// HTTP bridge URL for an overlay multiaddr
pub fn overlay_bridge_url(addr: &str) -> Option<String> {
    let parts = split_multiaddr(addr)?;
    let scheme = if parts.contains(&"wss") {
        "https"
    } else if parts.contains(&"ws") {
        "http"
    } else {
        return None;
    };
    let (host, port) = host_port(&parts)?;
    Some(format!("{}://{}:{}", scheme, host, port))
}

fn split_multiaddr(ep: &str) -> Option<Vec<&str>> {
    let s = ep.trim();
    if !s.starts_with('/') {
        return None;
    }
    Some(s.split('/').filter(|p| !p.is_empty()).collect())
}

fn host_port(parts: &[&str]) -> Option<(String, u16)> {
    let idx_tcp = parts.iter().position(|p| *p == "tcp")?;
    if idx_tcp < 2 {
        return None;
    }
    let proto = parts[idx_tcp - 2];
    let host = parts[idx_tcp - 1];
    let port = parts.get(idx_tcp + 1)?.parse::<u16>().ok()?;
    let host = match proto {
        "ip6" => format!("[{}]", host),
        "ip4" | "dns" | "dns4" | "dns6" | "dnsaddr" => host.to_string(),
        _ => return None,
    };
    Some((host, port))
}
