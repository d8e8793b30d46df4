//! # Modbus Monitor - Live Register Polling for Modbus TCP/RTU Devices
//!
//! **Version:** 0.3.0
//! **License:** MIT
//!
//! A terminal register monitor for Modbus devices. It polls a catalog of
//! registers one read at a time, formats every value for display, and feeds
//! the rows through a column filter and a free-text search before they reach
//! the screen.
//!
//! ## Features
//!
//! - **Sequential Polling**: exactly one read per register per cycle, safe on
//!   half-duplex RTU lines
//! - **Error Containment**: exception codes, timeouts and read failures stay
//!   in their row; only a lost link ends a cycle early
//! - **Self-Healing Connection**: failed connects are retried on a fixed
//!   delay, a lost link is re-dialled at once
//! - **Live Filtering**: literal, case-insensitive column filter and search
//! - **TCP and RTU**: one configuration contract for both link types
//!
//! ## Supported Read Functions
//!
//! | Code | Function | Register Kind |
//! |------|----------|---------------|
//! | 0x01 | Read Coils | `Coil` |
//! | 0x02 | Read Discrete Inputs | `DiscreteInput` |
//! | 0x03 | Read Holding Registers | `HoldingRegister` |
//! | 0x04 | Read Input Registers | `InputRegister` |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modbus_monitor::{
//!     CallbackLogger, DisplaySurface, ModbusConnector, MonitorConfig, MonitorResult, MonitorSession,
//! };
//!
//! struct Stdout;
//!
//! impl DisplaySurface for Stdout {
//!     fn update_table(&mut self, header: &[&str], rows: &[[String; 8]]) -> MonitorResult<()> {
//!         println!("{}", header.join(" | "));
//!         for row in rows {
//!             println!("{}", row.join(" "));
//!         }
//!         Ok(())
//!     }
//!
//!     fn update_status(&mut self, line: &str) {
//!         println!("{}", line);
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> MonitorResult<()> {
//!     let config = MonitorConfig::simulator();
//!     let mut session =
//!         MonitorSession::from_config(&config, ModbusConnector::default(), Stdout, CallbackLogger::disabled())?;
//!
//!     session.connect_now().await;
//!     session.run_cycle().await?;
//!     session.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐
//! │ Register Catalog │     │ Display Surface  │
//! └──────────────────┘     └──────────────────┘
//!          │                        ▲
//! ┌──────────────────┐     ┌──────────────────┐
//! │ Poll Cycle Engine│────►│ View Projection  │
//! └──────────────────┘     └──────────────────┘
//!          │         \
//! ┌──────────────────┐  ┌──────────────────┐
//! │Connection Manager│  │   Value Codec    │
//! └──────────────────┘  └──────────────────┘
//!          │
//! ┌──────────────────┐
//! │ Fieldbus Client  │  (tokio-modbus, TCP / RTU)
//! └──────────────────┘
//! ```
//!
//! The [`MonitorSession`] owns all of the above and tracks the overall
//! status through named [`SessionEvent`]s.

/// Core error types and result handling
pub mod error;

/// Register descriptors, raw reads and row results
pub mod protocol;

/// Raw register reads to display strings
pub mod codec;

/// Register catalog construction
pub mod catalog;

/// Field-bus client seam and the tokio-modbus adapter
pub mod client;

/// Resolved configuration, JSON persistence
pub mod config;

/// Link lifecycle: connect, retry, close
pub mod connection;

/// Sequential poll cycle engine
pub mod poll;

/// Column filter and free-text search
pub mod projection;

/// Display surface seam, row layout and status line
pub mod display;

/// Session state machine and context object
pub mod session;

/// Utility functions and performance monitoring
pub mod utils;

/// Logging system for read traffic
pub mod logging;

// Re-export main types for convenience
pub use error::{MonitorError, MonitorResult};
pub use protocol::{RawReadResult, RegisterDescriptor, RegisterKind, RowResult, StatusLabel, ValueFormat};
pub use codec::{format_value, format_value_str};
pub use catalog::{build_catalog, build_named_catalog, CatalogSource, NamedRegister, ScanConfig};
pub use client::{Connector, FieldbusClient, ModbusConnector, ModbusContextClient};
pub use config::{DeviceTarget, MonitorConfig, SerialSettings};
pub use connection::{ConnectEvent, ConnectionManager, ConnectionState, LinkState};
pub use poll::{CycleOutcome, CycleProgress, CycleReport, PollEngine};
pub use projection::{project, FilterSpec, SearchSpec};
pub use display::{DisplaySurface, COLUMN_WIDTHS, TABLE_HEADER};
pub use session::{CycleSummary, InputPrompt, MonitorSession, SessionEvent, SessionState, SessionStatus};
pub use utils::{OperationTimer, PerformanceMetrics};
pub use logging::{CallbackLogger, LogCallback, LogLevel};

/// Default I/O timeout for a single read (2 seconds)
pub const DEFAULT_TIMEOUT_MS: u64 = client::DEFAULT_IO_TIMEOUT_MS;

/// Delay before a failed connection is retried (5 seconds)
pub const DEFAULT_RETRY_DELAY_MS: u64 = config::DEFAULT_RETRY_DELAY_MS;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = config::DEFAULT_TCP_PORT;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Modbus Monitor v{} - live register polling for Modbus TCP/RTU devices", VERSION)
}
