//! Shared wire types for the gridgate gateway layer.
//!
//! Everything that crosses the boundary between a client and a gateway
//! proxy lives here: discovery requests, the request/response envelope,
//! the error taxonomy, and the structured-log record model. All types
//! serialize as JSON with snake_case field and variant names.

mod address;
mod error;
mod log;
mod request;

pub use address::{AddressType, DiscoveryRequest, DiscoveryResponse, ParseAddressTypeError};
pub use error::{ErrorCode, GatewayError};
pub use log::{BarrierToken, LogEntry, LogOutcome};
pub use request::{ApiRequest, ApiResponse, RequestKind, SessionId};
