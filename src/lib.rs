//! # Telescope Control
//!
//! Server core for remotely operating a radio telescope over a byte stream.
//!
//! ## Layers
//! - **[`core`]**: packet framing. A 10-byte big-endian header carrying a
//!   service id, a CRC-16 over the payload, a transaction id and the payload
//!   length.
//! - **[`protocol`]**: the message catalog, payload layouts, the control
//!   handshake, session privilege and the command router.
//! - **[`driver`]**: capability slots filled by backend modules at startup.
//! - **[`transport`]**: the outbound [`Transport`](transport::Transport) seam
//!   and a Tokio TCP server built on it.
//! - **[`config`]** and **[`utils`]**: TOML configuration, logging, metrics.
//!
//! ## Quick Start
//! ```rust,no_run
//! use std::sync::Arc;
//! use telescope_control::config::TelescopeConfig;
//! use telescope_control::driver::{simulator::SimulatedTelescope, DriverTable};
//! use telescope_control::protocol::dispatcher::Router;
//! use telescope_control::transport::{tcp, ConnectionRegistry};
//! use telescope_control::utils::init_logging;
//!
//! # async fn run() -> telescope_control::error::Result<()> {
//! let config = TelescopeConfig::from_file("telescope.toml")?;
//! config.validate_strict()?;
//! init_logging(&config.logging)?;
//!
//! let simulator = Arc::new(SimulatedTelescope::default());
//! let mut drivers = DriverTable::new();
//! drivers.load_module(&simulator.module());
//!
//! let registry = Arc::new(ConnectionRegistry::from_config(&config.server));
//! let router = Router::from_config(&config, Arc::new(drivers), registry.clone())?
//!     .with_metrics(registry.metrics());
//! let router = Arc::new(router);
//! tcp::start_server(config.server.clone(), router, registry).await
//! # }
//! ```

pub mod config;
pub mod core;
pub mod driver;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use crate::core::codec::PacketCodec;
pub use crate::core::packet::Packet;
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::dispatcher::Router;
pub use crate::protocol::service::Service;
