//! CecSight Bridge Framework
//!
//! Common abstractions for building bridges that mirror device state onto Zenoh.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (startup, shutdown, signal handling)
//! - [`Sink`] for fire-and-forget publishing, subscriptions and connectivity callbacks,
//!   with [`ZenohSink`] as the Zenoh-backed implementation
//! - [`BridgeArgs`] for common CLI argument parsing
//! - [`BridgeStatus`] and [`StatusPublisher`] for availability reporting
//!
//! # Example
//!
//! ```ignore
//! use cecsight_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mybridge.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!
//!     let mut runner = BridgeRunner::new_with_args("mybridge", config, Some(&args)).await?;
//!
//!     // Hand the sink to protocol-specific workers
//!     let sink = runner.sink();
//!     runner.spawn(my_worker(sink, runner.cancellation_token()));
//!
//!     // Run until Ctrl+C
//!     runner.run().await
//! }
//! ```

mod args;
mod config;
mod error;
mod runner;
mod sink;
mod status;
pub mod testing;
mod zenoh_sink;

pub use args::BridgeArgs;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use runner::BridgeRunner;
pub use sink::{ConnectedHandler, MessageHandler, Qos, Sink};
pub use status::{BridgeStatus, StatusPublisher};
pub use zenoh_sink::ZenohSink;

// Re-export commonly used types from cecsight-common
pub use cecsight_common::{LogFormat, LoggingConfig, TopicBuilder, ZenohConfig};
