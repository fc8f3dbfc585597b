//! CameraProtocol - Wire Protocol Abstraction
//!
//! ## Responsibilities
//!
//! - One capability interface over the camera wire protocols
//! - CGI variant: HTTP GET/POST with digest authentication
//! - VISCA variant: VISCA-over-IP UDP command/inquiry exchange
//! - Variant construction by name through the factory
//!
//! ## Design
//!
//! Closed set of variants behind one trait; new protocols register in the
//! factory, never by subclassing shared state. Each variant owns its retry
//! budget and failure taxonomy; callers only see `CommandResult`.

mod cgi;
mod types;
mod visca;

pub use cgi::CgiProtocol;
pub use types::*;
pub use visca::ViscaProtocol;

use crate::config_store::{CameraEndpoint, ProtocolConfig, ProtocolKind};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Capability interface over one camera connection
#[async_trait]
pub trait CameraProtocol: Send + Sync {
    /// Establish the connection (UDP socket / HTTP pool readiness)
    async fn connect(&self) -> Result<()>;

    /// Close the connection
    async fn disconnect(&self) -> Result<()>;

    /// Whether the connection is currently usable
    fn is_connected(&self) -> bool;

    /// Read one parameter's current value
    async fn get_parameter(&self, name: &str) -> CommandResult;

    /// Write one parameter value and wait for confirmation
    async fn set_parameter(&self, name: &str, value: i64) -> CommandResult;

    /// Push a raw imaging preset (name/value strings, protocol decides
    /// what it can express). Used once before the first control cycle.
    async fn apply_preset(&self, pairs: &[(String, String)]) -> Result<()>;
}

/// Create a protocol instance for one camera by variant name
pub fn create_protocol(
    kind: ProtocolKind,
    endpoint: &CameraEndpoint,
    config: &ProtocolConfig,
) -> Arc<dyn CameraProtocol> {
    match kind {
        ProtocolKind::Cgi => Arc::new(CgiProtocol::new(endpoint, config.cgi.clone())),
        ProtocolKind::Visca => Arc::new(ViscaProtocol::new(endpoint, config.visca.clone())),
    }
}
