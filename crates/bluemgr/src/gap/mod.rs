//! Generic Access Profile
//!
//! Connection management and security on top of the controller's GAP tasks:
//! - [`types`]: addresses, IO capabilities, security levels
//! - [`params`]: settings and bookkeeping of the local device
//! - [`conn`]: connecting, disconnecting and address resolution
//! - [`security`]: pairing, bonding and link encryption

pub mod conn;
pub mod constants;
pub mod params;
pub mod security;
#[cfg(test)]
mod tests;
pub mod types;

pub use constants::*;
pub use params::DevParams;
pub use types::*;
