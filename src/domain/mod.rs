//! Domain layer - Core types and port definitions
//!
//! This module defines the core traits (ports) that adapters implement,
//! following hexagonal architecture principles, together with the typed
//! credential channels, host parsing and the network interface model.

pub mod credentials;
pub mod host;
pub mod interface;
pub mod ports;

pub use credentials::*;
pub use host::*;
pub use interface::*;
pub use ports::*;
