/// Register catalog and poll result data structures
///
/// This module contains the domain types shared by the catalog, the value
/// codec, the poll cycle engine and the view projection: register kinds,
/// value formats, register descriptors, raw read results and row results.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Modbus address type (0-65535)
pub type ModbusAddress = u16;

/// Modbus slave/unit identifier (1-247)
pub type SlaveId = u8;

/// Kind of register addressed by a descriptor
///
/// The declaration order is the order in which a scanned catalog visits
/// kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisterKind {
    /// Holding register, read with function 0x03
    HoldingRegister,
    /// Input register, read with function 0x04
    InputRegister,
    /// Coil, read with function 0x01
    Coil,
    /// Discrete input, read with function 0x02
    DiscreteInput,
}

impl RegisterKind {
    /// All kinds in declared scan order
    pub const ALL: [RegisterKind; 4] = [
        RegisterKind::HoldingRegister,
        RegisterKind::InputRegister,
        RegisterKind::Coil,
        RegisterKind::DiscreteInput,
    ];

    /// Name shown in the table's function column
    pub fn as_str(self) -> &'static str {
        match self {
            RegisterKind::HoldingRegister => "HoldingRegister",
            RegisterKind::InputRegister => "InputRegister",
            RegisterKind::Coil => "Coil",
            RegisterKind::DiscreteInput => "DiscreteInput",
        }
    }

    /// Modbus read function code for this kind
    pub fn function_code(self) -> u8 {
        match self {
            RegisterKind::Coil => 0x01,
            RegisterKind::DiscreteInput => 0x02,
            RegisterKind::HoldingRegister => 0x03,
            RegisterKind::InputRegister => 0x04,
        }
    }

    /// Check if this kind addresses single bits rather than 16-bit words
    pub fn is_bit_addressed(self) -> bool {
        matches!(self, RegisterKind::Coil | RegisterKind::DiscreteInput)
    }

    /// Default display format for a freshly scanned register of this kind
    pub fn default_format(self) -> ValueFormat {
        if self.is_bit_addressed() {
            ValueFormat::Bool
        } else {
            ValueFormat::Int16(None)
        }
    }
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte order of a multi-byte value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    Big,
    Little,
}

/// Display format of a register value
///
/// Numeric variants carry the byte order named in the format string, `None`
/// when the name had no suffix (decoded as big-endian). Parsing never fails:
/// names the codec does not know are kept as [`ValueFormat::Unsupported`] so
/// the row can say so.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ValueFormat {
    Bool,
    Int16(Option<ByteOrder>),
    Uint16(Option<ByteOrder>),
    Int32(Option<ByteOrder>),
    Uint32(Option<ByteOrder>),
    Float32(Option<ByteOrder>),
    Hex,
    Binary,
    Unsupported(String),
}

impl ValueFormat {
    /// Parse a format name, case-insensitively
    pub fn parse(name: &str) -> Self {
        let lower = name.trim().to_lowercase();
        let (base, order) = if let Some(base) = lower.strip_suffix("be") {
            (base, Some(ByteOrder::Big))
        } else if let Some(base) = lower.strip_suffix("le") {
            (base, Some(ByteOrder::Little))
        } else {
            (lower.as_str(), None)
        };

        match (base, order) {
            ("int16", order) => ValueFormat::Int16(order),
            ("uint16", order) => ValueFormat::Uint16(order),
            ("int32", order) => ValueFormat::Int32(order),
            ("uint32", order) => ValueFormat::Uint32(order),
            ("float32", order) => ValueFormat::Float32(order),
            _ => match lower.as_str() {
                "bool" => ValueFormat::Bool,
                "hex" => ValueFormat::Hex,
                "binary" => ValueFormat::Binary,
                _ => ValueFormat::Unsupported(lower),
            },
        }
    }

    /// Canonical lowercase name, as shown in the table's type column
    pub fn name(&self) -> String {
        fn suffixed(base: &str, order: &Option<ByteOrder>) -> String {
            match order {
                None => base.to_string(),
                Some(ByteOrder::Big) => format!("{}be", base),
                Some(ByteOrder::Little) => format!("{}le", base),
            }
        }

        match self {
            ValueFormat::Bool => "bool".to_string(),
            ValueFormat::Int16(order) => suffixed("int16", order),
            ValueFormat::Uint16(order) => suffixed("uint16", order),
            ValueFormat::Int32(order) => suffixed("int32", order),
            ValueFormat::Uint32(order) => suffixed("uint32", order),
            ValueFormat::Float32(order) => suffixed("float32", order),
            ValueFormat::Hex => "hex".to_string(),
            ValueFormat::Binary => "binary".to_string(),
            ValueFormat::Unsupported(name) => name.clone(),
        }
    }
}

impl From<String> for ValueFormat {
    fn from(name: String) -> Self {
        ValueFormat::parse(&name)
    }
}

impl From<&str> for ValueFormat {
    fn from(name: &str) -> Self {
        ValueFormat::parse(name)
    }
}

impl From<ValueFormat> for String {
    fn from(format: ValueFormat) -> Self {
        format.name()
    }
}

impl fmt::Display for ValueFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Slave read when neither the register nor the configuration names one
pub const DEFAULT_SLAVE_ID: SlaveId = 1;

/// One register to poll
///
/// Immutable once the catalog for a session is built.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterDescriptor {
    pub description: String,
    pub address: ModbusAddress,
    /// Number of underlying 16-bit words (or bits for bit kinds)
    pub quantity: u16,
    pub kind: RegisterKind,
    pub format: ValueFormat,
    pub unit: String,
    pub slave_id: SlaveId,
}

/// Raw result of one successful device read
///
/// Bit reads keep the bits and a packed byte buffer; word reads keep the
/// big-endian bytes of every word.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReadResult {
    pub bits: Vec<bool>,
    pub buffer: Vec<u8>,
    pub quantity: u16,
}

impl RawReadResult {
    /// Build from a coil or discrete input read
    pub fn from_bits(bits: Vec<bool>, quantity: u16) -> Self {
        let buffer = data_utils::pack_bits(&bits);
        Self { bits, buffer, quantity }
    }

    /// Build from a holding or input register read
    pub fn from_words(words: &[u16], quantity: u16) -> Self {
        Self {
            bits: Vec::new(),
            buffer: data_utils::registers_to_bytes(words),
            quantity,
        }
    }

    /// Build directly from a byte buffer
    pub fn from_buffer(buffer: Vec<u8>, quantity: u16) -> Self {
        Self {
            bits: Vec::new(),
            buffer,
            quantity,
        }
    }

    /// First boolean value of the read
    ///
    /// For word reads this is whether the first word is non-zero.
    pub fn first_bit(&self) -> Option<bool> {
        if let Some(&bit) = self.bits.first() {
            return Some(bit);
        }
        match self.buffer.as_slice() {
            [hi, lo, ..] => Some(*hi != 0 || *lo != 0),
            _ => None,
        }
    }
}

/// Per-row outcome of a register read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLabel {
    Ok,
    ReadFail,
    Timeout,
    PortClosed,
    /// Modbus exception response with its code
    ErrorCode(u8),
    /// Not read yet
    Waiting,
}

impl StatusLabel {
    /// Check if the read failed
    pub fn is_error(self) -> bool {
        !matches!(self, StatusLabel::Ok | StatusLabel::Waiting)
    }
}

impl fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusLabel::Ok => f.write_str("OK"),
            StatusLabel::ReadFail => f.write_str("Read Fail"),
            StatusLabel::Timeout => f.write_str("Timeout"),
            StatusLabel::PortClosed => f.write_str("Port Closed"),
            StatusLabel::ErrorCode(code) => write!(f, "ERROR {}", code),
            StatusLabel::Waiting => f.write_str("Wait"),
        }
    }
}

/// Value shown for a register whose read failed
pub const ERROR_VALUE: &str = "Error";

/// Value shown for a register not read yet
pub const PENDING_VALUE: &str = "Pending...";

/// One table row, built once per register per cycle
#[derive(Debug, Clone, PartialEq)]
pub struct RowResult {
    pub slave_id: SlaveId,
    pub address: ModbusAddress,
    pub kind: RegisterKind,
    pub format: ValueFormat,
    pub formatted_value: String,
    pub architecture_label: String,
    pub description: String,
    pub status: StatusLabel,
}

impl RowResult {
    fn from_descriptor(descriptor: &RegisterDescriptor, value: String, status: StatusLabel) -> Self {
        Self {
            slave_id: descriptor.slave_id,
            address: descriptor.address,
            kind: descriptor.kind,
            format: descriptor.format.clone(),
            formatted_value: value,
            architecture_label: crate::codec::architecture_label(&descriptor.format).to_string(),
            description: descriptor.description.clone(),
            status,
        }
    }

    /// Row for a successful read
    pub fn ok(descriptor: &RegisterDescriptor, formatted_value: String) -> Self {
        Self::from_descriptor(descriptor, formatted_value, StatusLabel::Ok)
    }

    /// Row for a failed read
    pub fn failed(descriptor: &RegisterDescriptor, status: StatusLabel) -> Self {
        Self::from_descriptor(descriptor, ERROR_VALUE.to_string(), status)
    }

    /// Placeholder row shown before the first cycle completes
    pub fn waiting(descriptor: &RegisterDescriptor) -> Self {
        Self::from_descriptor(descriptor, PENDING_VALUE.to_string(), StatusLabel::Waiting)
    }
}

/// Data conversion helpers
pub mod data_utils {
    /// Convert register values to bytes (big-endian)
    pub fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(registers.len() * 2);
        for &register in registers {
            bytes.extend_from_slice(&register.to_be_bytes());
        }
        bytes
    }

    /// Pack boolean values into bytes, LSB first
    pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
        let byte_count = (bits.len() + 7) / 8;
        let mut bytes = vec![0u8; byte_count];

        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                bytes[i / 8] |= 1 << (i % 8);
            }
        }

        bytes
    }
}
