// Aether client host
//
// Supervises the frontend daemon process and brokers the port exchange
// between it and the client API server.

// Environment-driven configuration (shared between host and stub binaries)
pub mod config;

// Log subscriber setup
pub mod telemetry;

// Daemon launch and supervision
pub mod daemon;

// Port exchange and readiness
pub mod handshake;

// Host wiring used by the `aether-client` binary
pub mod host;

// Polling assertions and a scripted spawner (only compiled for tests or with test-utils)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::Config;
pub use host::{Host, HostError};
