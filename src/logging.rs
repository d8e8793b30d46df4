//! Callback logging for per-register read traffic
//!
//! The poll engine reports every request it issues and every response or
//! failure it gets through a [`CallbackLogger`]. Where the lines end up is
//! decided by the callback. The binary forwards them to the `log` facade and
//! so to its log file; tests collect them in a buffer.

use std::sync::Arc;

use crate::protocol::{RawReadResult, RegisterDescriptor};

/// Log levels for the callback logging system
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Error messages
    Error,
    /// Warning messages
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
}

impl LogLevel {
    /// Convert log level to string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
        }
    }
}

/// Type alias for log callback functions
///
/// The callback receives a log level and message string
pub type LogCallback = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Logger that uses callbacks for flexible logging
#[derive(Clone)]
pub struct CallbackLogger {
    callback: Option<Arc<LogCallback>>,
    min_level: LogLevel,
}

impl CallbackLogger {
    /// Create a new callback logger
    pub fn new(callback: Option<LogCallback>, min_level: LogLevel) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
        }
    }

    /// Create a logger forwarding to the `log` facade under the `traffic` target
    pub fn facade(min_level: LogLevel) -> Self {
        let callback: LogCallback = Box::new(|level, message| {
            log::log!(target: "modbus_monitor::traffic", level.into(), "{}", message);
        });
        Self::new(Some(callback), min_level)
    }

    /// Create a logger that outputs nothing (disabled)
    pub fn disabled() -> Self {
        Self::new(None, LogLevel::Error)
    }

    /// Log a message at the specified level
    pub fn log(&self, level: LogLevel, message: &str) {
        if self.should_log(level) {
            if let Some(ref callback) = self.callback {
                callback(level, message);
            }
        }
    }

    /// Log an error message
    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    /// Log a warning message
    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    /// Log an info message
    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    /// Log a debug message
    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    /// Check if a message at the given level should be logged
    fn should_log(&self, level: LogLevel) -> bool {
        self.callback.is_some() && level <= self.min_level
    }

    /// Log the read about to be issued for `register`
    pub fn log_read_request(&self, register: &RegisterDescriptor) {
        if !self.should_log(LogLevel::Debug) {
            return;
        }
        let function_code = register.kind.function_code();
        self.debug(&format!(
            "Read -> Slave: {}, Function: {} (0x{:02X}), Address: {}, Quantity: {}",
            register.slave_id,
            function_name(function_code),
            function_code,
            register.address,
            register.quantity
        ));
    }

    /// Log a successful read and its decoded value
    pub fn log_read_response(&self, register: &RegisterDescriptor, raw: &RawReadResult, value: &str) {
        if !self.should_log(LogLevel::Debug) {
            return;
        }
        let data = if raw.bits.is_empty() {
            hex::encode(&raw.buffer)
        } else {
            format!("{:?}", &raw.bits[..raw.bits.len().min(16)])
        };
        self.debug(&format!(
            "Read <- Slave: {}, Address: {}, Data: {}, Value: {}",
            register.slave_id, register.address, data, value
        ));
    }

    /// Log a failed read together with the row status it produced
    pub fn log_read_failure(&self, register: &RegisterDescriptor, status: &str, reason: &str) {
        self.warn(&format!(
            "Read failed: Slave: {}, {} @{}: {} ({})",
            register.slave_id, register.kind, register.address, status, reason
        ));
    }
}

impl Default for CallbackLogger {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Human-readable name of a read function code
fn function_name(function_code: u8) -> &'static str {
    match function_code {
        0x01 => "Read Coils",
        0x02 => "Read Discrete Inputs",
        0x03 => "Read Holding Registers",
        0x04 => "Read Input Registers",
        _ => "Unknown Function",
    }
}
