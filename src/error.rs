//! # Modbus Monitor Error Handling
//!
//! This module provides the error type shared by every layer of the monitor:
//! the field-bus client adapter, the connection manager, the poll cycle engine,
//! configuration loading and the display surface.
//!
//! ## Error Categories
//!
//! ### Connection Errors
//! - **I/O Errors**: socket and serial port failures
//! - **Connection Errors**: dial or open failures, always retried by the session
//! - **Port Closed**: the link went away while a cycle was running
//!
//! ### Per-Register Read Errors
//! - **Exception Responses**: standard Modbus exception codes from the slave
//! - **Timeouts**: a single read exceeded the I/O timeout
//!
//! ### Session Errors
//! - **Configuration Errors**: invalid or unreadable configuration
//! - **Display Errors**: the display surface rejected a table update
//! - **Cycle Blocked**: a poll cycle was requested while it may not start
//!
//! ## Read Classification
//!
//! Register-level failures never leave the poll cycle. They are folded into a
//! per-row [`StatusLabel`](crate::protocol::StatusLabel):
//!
//! ```rust
//! use modbus_monitor::{MonitorError, protocol::StatusLabel};
//!
//! let err = MonitorError::exception(0x03, 0x02);
//! assert_eq!(err.read_status(), StatusLabel::ErrorCode(2));
//!
//! let err = MonitorError::port_closed("Port Not Open");
//! assert!(err.is_link_lost());
//! assert_eq!(err.read_status(), StatusLabel::PortClosed);
//! ```

use thiserror::Error;

use crate::protocol::StatusLabel;

/// Result type alias for monitor operations
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Errors produced by the monitor
///
/// Each variant carries enough context to be rendered on the status line
/// without further lookups.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MonitorError {
    /// I/O related errors (network, serial)
    ///
    /// # Examples
    /// - Network interface down
    /// - Serial port read failure
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection establishment errors
    ///
    /// Never fatal: the session schedules another attempt after the
    /// retry delay.
    ///
    /// # Examples
    /// - Connection refused by remote host
    /// - Serial device does not exist
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// A single operation exceeded its time budget
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Modbus exception response
    ///
    /// # Standard Exception Codes
    /// - 0x01: Illegal Function
    /// - 0x02: Illegal Data Address
    /// - 0x03: Illegal Data Value
    /// - 0x04: Slave Device Failure
    /// - 0x05: Acknowledge
    /// - 0x06: Slave Device Busy
    /// - 0x08: Memory Parity Error
    /// - 0x0A: Gateway Path Unavailable
    /// - 0x0B: Gateway Target Device Failed to Respond
    #[error("Modbus exception: function={function:02X}, code={code:02X} ({message})")]
    Exception { function: u8, code: u8, message: String },

    /// The link is not open
    ///
    /// Raised when a read is attempted on a closed link or the peer dropped
    /// the connection. Aborts the running poll cycle.
    #[error("Port closed: {message}")]
    PortClosed { message: String },

    /// Configuration errors
    ///
    /// # Examples
    /// - Slave id outside 1-247
    /// - Malformed configuration file
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The display surface rejected a table update
    #[error("Display error: {message}")]
    Display { message: String },

    /// A poll cycle was requested while one may not start
    #[error("Poll cycle blocked: {reason}")]
    CycleBlocked { reason: String },
}

impl MonitorError {
    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Create a new timeout error
    ///
    /// # Arguments
    ///
    /// * `operation` - Description of the operation that timed out
    /// * `timeout_ms` - Timeout duration in milliseconds
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a Modbus exception error
    ///
    /// Standard exception codes are mapped to human-readable messages.
    pub fn exception(function: u8, code: u8) -> Self {
        let message = match code {
            0x01 => "Illegal Function",
            0x02 => "Illegal Data Address",
            0x03 => "Illegal Data Value",
            0x04 => "Slave Device Failure",
            0x05 => "Acknowledge",
            0x06 => "Slave Device Busy",
            0x08 => "Memory Parity Error",
            0x0A => "Gateway Path Unavailable",
            0x0B => "Gateway Target Device Failed to Respond",
            _ => "Unknown Exception",
        }
        .to_string();

        Self::Exception { function, code, message }
    }

    /// Create a port closed error
    pub fn port_closed<S: Into<String>>(message: S) -> Self {
        Self::PortClosed { message: message.into() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create a display error
    pub fn display<S: Into<String>>(message: S) -> Self {
        Self::Display { message: message.into() }
    }

    /// Create a cycle blocked error
    pub fn cycle_blocked<S: Into<String>>(reason: S) -> Self {
        Self::CycleBlocked { reason: reason.into() }
    }

    /// The error text without its category prefix
    ///
    /// ```rust
    /// use modbus_monitor::MonitorError;
    ///
    /// let err = MonitorError::connection("Connection refused");
    /// assert_eq!(err.to_string(), "Connection error: Connection refused");
    /// assert_eq!(err.message(), "Connection refused");
    /// ```
    pub fn message(&self) -> &str {
        match self {
            Self::Io { message }
            | Self::Connection { message }
            | Self::Exception { message, .. }
            | Self::PortClosed { message }
            | Self::Configuration { message }
            | Self::Display { message } => message,
            Self::Timeout { operation, .. } => operation,
            Self::CycleBlocked { reason } => reason,
        }
    }

    /// Check if the error means the link to the device is gone
    ///
    /// A link-lost error during a poll cycle aborts the cycle and forces an
    /// immediate reconnect.
    pub fn is_link_lost(&self) -> bool {
        matches!(self, Self::PortClosed { .. })
    }

    /// Classify a failed register read into the status shown on its row
    pub fn read_status(&self) -> StatusLabel {
        match self {
            Self::Exception { code, .. } => StatusLabel::ErrorCode(*code),
            Self::Timeout { .. } => StatusLabel::Timeout,
            Self::PortClosed { .. } => StatusLabel::PortClosed,
            _ => StatusLabel::ReadFail,
        }
    }
}

/// Convert from std::io::Error
///
/// Errors that mean the peer or the port is gone map to `PortClosed`,
/// everything else to `Io`.
impl From<std::io::Error> for MonitorError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::UnexpectedEof => Self::port_closed(err.to_string()),
            ErrorKind::TimedOut => Self::timeout(err.to_string(), 0),
            _ => Self::io(err.to_string()),
        }
    }
}

/// Convert from serde JSON errors
impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = MonitorError::timeout("read_registers", 2000);
        assert!(!err.is_link_lost());
        assert_eq!(err.read_status(), StatusLabel::Timeout);

        let err = MonitorError::exception(0x03, 0x02);
        assert_eq!(err.read_status(), StatusLabel::ErrorCode(2));

        let err = MonitorError::connection("refused");
        assert!(!err.is_link_lost());
        assert_eq!(err.read_status(), StatusLabel::ReadFail);
    }

    #[test]
    fn test_error_display() {
        let err = MonitorError::exception(0x04, 0x0B);
        let msg = format!("{}", err);
        assert!(msg.contains("function=04"));
        assert!(msg.contains("code=0B"));
        assert!(msg.contains("Gateway Target Device Failed to Respond"));
    }

    #[test]
    fn test_message_without_prefix() {
        assert_eq!(MonitorError::port_closed("Port Not Open").message(), "Port Not Open");
        assert_eq!(MonitorError::exception(0x03, 0x02).message(), "Illegal Data Address");
        assert_eq!(MonitorError::timeout("read_coils @0 x1", 2000).message(), "read_coils @0 x1");
    }

    #[test]
    fn test_io_error_mapping() {
        let err: MonitorError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(err.is_link_lost());

        let err: MonitorError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert_eq!(err.read_status(), StatusLabel::ReadFail);
    }
}
