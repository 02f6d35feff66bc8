//! Probe loop.
//!
//! - [`ProbeRunner`]: the `PROBE → DNS_CHECK → SLEEP → REFRESH_CLIENT` cycle
//! - [`ProbeClient`] / [`ClientFactory`]: what the loop needs from a client

mod runner;
mod traits;

pub use runner::ProbeRunner;
pub use traits::{ClientFactory, ProbeClient};

#[cfg(test)]
pub use traits::MockClient;
