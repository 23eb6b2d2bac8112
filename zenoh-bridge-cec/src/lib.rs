//! Zenoh bridge for HDMI-CEC.
//!
//! Resolves devices seen on a CEC bus to stable identities and publishes
//! their state. `is_active_source` is `on` for the device currently shown
//! on the display and `off` for every other device. `power` is `on` or
//! `off` and accepts remote commands on `power/set`.
//!
//! # Key Expressions
//!
//! ```text
//! cecsight/cec/<device topic>/is_active_source
//! cecsight/cec/<device topic>/power
//! cecsight/cec/<device topic>/power/set
//! cecsight/cec/@/status
//! cecsight/cec/@/alive
//! ```
//!
//! Device identities persist in `<data_dir>/devices.json`, where each
//! device's topic can be renamed and devices can be ignored.

pub mod app;
pub mod bridge;
pub mod cec;
pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod monitor;

pub use app::{CecBridge, Settings, open_bus};
pub use config::CecBridgeConfig;
pub use error::{CecError, Result};
