//! Backend kinds, route preferences and operation tags

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Backend a transport candidate talks to
///
/// - Gateway: the routing gateway, which can proxy to any provider
/// - DirectSp: a storage provider's own HTTP endpoint
/// - PeerOverlay: a provider reached through the peer overlay bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    #[serde(rename = "gateway")]
    Gateway,
    #[serde(rename = "direct_sp")]
    DirectSp,
    #[serde(rename = "libp2p")]
    PeerOverlay,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Gateway => "gateway",
            BackendKind::DirectSp => "direct_sp",
            BackendKind::PeerOverlay => "libp2p",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which backend kind the router should try first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoutePreference {
    /// Keep the caller's candidate order
    #[default]
    Auto,
    PreferGateway,
    PreferDirectSp,
    PreferP2p,
}

impl RoutePreference {
    /// Backend kind moved to the front, if any
    pub fn preferred_backend(&self) -> Option<BackendKind> {
        match self {
            RoutePreference::Auto => None,
            RoutePreference::PreferGateway => Some(BackendKind::Gateway),
            RoutePreference::PreferDirectSp => Some(BackendKind::DirectSp),
            RoutePreference::PreferP2p => Some(BackendKind::PeerOverlay),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoutePreference::Auto => "auto",
            RoutePreference::PreferGateway => "prefer_gateway",
            RoutePreference::PreferDirectSp => "prefer_direct_sp",
            RoutePreference::PreferP2p => "prefer_p2p",
        }
    }
}

impl fmt::Display for RoutePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(RoutePreference::Auto),
            "prefer_gateway" | "gateway" => Ok(RoutePreference::PreferGateway),
            "prefer_direct_sp" | "direct_sp" | "direct" => Ok(RoutePreference::PreferDirectSp),
            "prefer_p2p" | "p2p" | "libp2p" => Ok(RoutePreference::PreferP2p),
            other => Err(format!("Invalid route preference: {}", other)),
        }
    }
}

/// Logical operation a routed request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportOp {
    Upload,
    Fetch,
    ListFiles,
    Slab,
    Plan,
    ManifestInfo,
    MduKzg,
    OpenSession,
    SessionProof,
}

impl TransportOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportOp::Upload => "upload",
            TransportOp::Fetch => "fetch",
            TransportOp::ListFiles => "list_files",
            TransportOp::Slab => "slab",
            TransportOp::Plan => "plan",
            TransportOp::ManifestInfo => "manifest_info",
            TransportOp::MduKzg => "mdu_kzg",
            TransportOp::OpenSession => "open_session",
            TransportOp::SessionProof => "session_proof",
        }
    }
}

impl fmt::Display for TransportOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
