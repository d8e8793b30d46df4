/// Register value codec
///
/// Turns a raw register read into the string shown in the table's value
/// column. The codec is total: every failure becomes a sentinel string and
/// nothing is propagated to the caller.

use crate::protocol::{ByteOrder, RawReadResult, ValueFormat};

/// No read result available
pub const NOT_AVAILABLE: &str = "N/A";

/// Buffer holds less than one register
pub const SHORT_BUFFER: &str = "Short Buffer";

/// 32-bit format read from a single register
pub const NEED_TWO_REGISTERS: &str = "Need 2 Regs";

/// Decoding failed
pub const FORMAT_ERROR: &str = "Format Err";

/// Boolean display values
pub const ON: &str = "ON";
pub const OFF: &str = "OFF";

#[derive(Debug)]
enum DecodeError {
    NeedTwoRegisters,
    Malformed,
}

/// Format a raw read for display
///
/// `unit` is appended after a space when non-empty. Sentinels never carry
/// the unit.
///
/// ```rust
/// use modbus_monitor::codec::format_value;
/// use modbus_monitor::protocol::{RawReadResult, ValueFormat};
///
/// let raw = RawReadResult::from_buffer(vec![0x00, 0x0A], 1);
/// assert_eq!(format_value(Some(&raw), &ValueFormat::parse("uint16be"), "V"), "10 V");
/// ```
pub fn format_value(raw: Option<&RawReadResult>, format: &ValueFormat, unit: &str) -> String {
    let raw = match raw {
        Some(raw) => raw,
        None => return NOT_AVAILABLE.to_string(),
    };

    if *format == ValueFormat::Bool {
        return match raw.first_bit() {
            Some(true) => ON.to_string(),
            Some(false) => OFF.to_string(),
            None => NOT_AVAILABLE.to_string(),
        };
    }

    if raw.buffer.len() < 2 {
        return SHORT_BUFFER.to_string();
    }

    if let ValueFormat::Unsupported(name) = format {
        return format!("Unsupported format: {}", name);
    }

    match decode(&raw.buffer, format) {
        Ok(text) if unit.is_empty() => text,
        Ok(text) => format!("{} {}", text, unit),
        Err(DecodeError::NeedTwoRegisters) => NEED_TWO_REGISTERS.to_string(),
        Err(DecodeError::Malformed) => FORMAT_ERROR.to_string(),
    }
}

/// Format a raw read using a format name
pub fn format_value_str(raw: Option<&RawReadResult>, format: &str, unit: &str) -> String {
    format_value(raw, &ValueFormat::parse(format), unit)
}

/// Word width hint derived from the format
pub fn architecture_label(format: &ValueFormat) -> &'static str {
    match format {
        ValueFormat::Int32(_) | ValueFormat::Uint32(_) | ValueFormat::Float32(_) => "32-bit",
        ValueFormat::Int16(_) | ValueFormat::Uint16(_) => "16-bit",
        ValueFormat::Bool => "1-bit",
        _ => "N/A",
    }
}

fn decode(buffer: &[u8], format: &ValueFormat) -> Result<String, DecodeError> {
    match format {
        ValueFormat::Int16(order) => {
            let bytes = take::<2>(buffer).ok_or(DecodeError::Malformed)?;
            Ok(match order.unwrap_or(ByteOrder::Big) {
                ByteOrder::Big => i16::from_be_bytes(bytes),
                ByteOrder::Little => i16::from_le_bytes(bytes),
            }
            .to_string())
        }
        ValueFormat::Uint16(order) => {
            let bytes = take::<2>(buffer).ok_or(DecodeError::Malformed)?;
            Ok(match order.unwrap_or(ByteOrder::Big) {
                ByteOrder::Big => u16::from_be_bytes(bytes),
                ByteOrder::Little => u16::from_le_bytes(bytes),
            }
            .to_string())
        }
        ValueFormat::Int32(order) => {
            let bytes = take::<4>(buffer).ok_or(DecodeError::NeedTwoRegisters)?;
            Ok(match order.unwrap_or(ByteOrder::Big) {
                ByteOrder::Big => i32::from_be_bytes(bytes),
                ByteOrder::Little => i32::from_le_bytes(bytes),
            }
            .to_string())
        }
        ValueFormat::Uint32(order) => {
            let bytes = take::<4>(buffer).ok_or(DecodeError::NeedTwoRegisters)?;
            Ok(match order.unwrap_or(ByteOrder::Big) {
                ByteOrder::Big => u32::from_be_bytes(bytes),
                ByteOrder::Little => u32::from_le_bytes(bytes),
            }
            .to_string())
        }
        ValueFormat::Float32(order) => {
            let bytes = take::<4>(buffer).ok_or(DecodeError::NeedTwoRegisters)?;
            let value = match order.unwrap_or(ByteOrder::Big) {
                ByteOrder::Big => f32::from_be_bytes(bytes),
                ByteOrder::Little => f32::from_le_bytes(bytes),
            };
            if !value.is_finite() {
                return Err(DecodeError::Malformed);
            }
            let text = format!("{:.2}", value);
            // -0.0 and tiny negatives round to zero
            Ok(if text == "-0.00" { "0.00".to_string() } else { text })
        }
        ValueFormat::Hex => Ok(hex::encode(buffer)),
        // latin-1: every byte is one char
        ValueFormat::Binary => Ok(buffer.iter().map(|&b| b as char).collect()),
        ValueFormat::Bool | ValueFormat::Unsupported(_) => Err(DecodeError::Malformed),
    }
}

fn take<const N: usize>(buffer: &[u8]) -> Option<[u8; N]> {
    buffer.get(..N)?.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(buffer: &[u8]) -> RawReadResult {
        RawReadResult::from_buffer(buffer.to_vec(), (buffer.len() / 2) as u16)
    }

    #[test]
    fn test_missing_read_is_not_available() {
        for name in ["bool", "int16", "float32le", "hex", "nonsense"] {
            assert_eq!(format_value_str(None, name, "V"), NOT_AVAILABLE);
        }
    }

    #[test]
    fn test_short_buffer() {
        assert_eq!(format_value_str(Some(&words(&[0x01])), "int16", ""), SHORT_BUFFER);
        assert_eq!(format_value_str(Some(&words(&[])), "hex", ""), SHORT_BUFFER);
    }

    #[test]
    fn test_bool_formats() {
        let on = RawReadResult::from_bits(vec![true], 1);
        let off = RawReadResult::from_bits(vec![false], 1);
        assert_eq!(format_value_str(Some(&on), "bool", ""), ON);
        assert_eq!(format_value_str(Some(&off), "BOOL", "unit ignored"), OFF);
    }

    #[test]
    fn test_16_bit_formats() {
        let raw = words(&[0xFF, 0xFE]);
        assert_eq!(format_value_str(Some(&raw), "int16", ""), "-2");
        assert_eq!(format_value_str(Some(&raw), "int16be", ""), "-2");
        assert_eq!(format_value_str(Some(&raw), "uint16", ""), "65534");
        assert_eq!(format_value_str(Some(&raw), "int16le", ""), "-257");
        assert_eq!(format_value_str(Some(&raw), "uint16le", "A"), "65279 A");
        assert_eq!(format_value_str(Some(&words(&[0x00, 0x0A])), "uint16be", "V"), "10 V");
    }

    #[test]
    fn test_32_bit_formats() {
        let raw = words(&[0x00, 0x01, 0x00, 0x02]);
        assert_eq!(format_value_str(Some(&raw), "uint32be", ""), "65538");
        assert_eq!(format_value_str(Some(&raw), "int32le", ""), "33554688");
        assert_eq!(format_value_str(Some(&words(&[0x00, 0x01])), "int32be", ""), NEED_TWO_REGISTERS);
        assert_eq!(format_value_str(Some(&words(&[0x00, 0x01])), "float32le", ""), NEED_TWO_REGISTERS);
    }

    #[test]
    fn test_float_formats() {
        let raw = words(&[0xCD, 0xCC, 0x0C, 0x41]);
        assert_eq!(format_value_str(Some(&raw), "float32le", ""), "8.80");

        let raw = words(&[0x41, 0x0C, 0xCC, 0xCD]);
        assert_eq!(format_value_str(Some(&raw), "float32be", "bar"), "8.80 bar");

        let nan = words(&[0x7F, 0xC0, 0x00, 0x00]);
        assert_eq!(format_value_str(Some(&nan), "float32", ""), FORMAT_ERROR);
    }

    #[test]
    fn test_float_negative_zero() {
        let raw = words(&[0x80, 0x00, 0x00, 0x00]);
        assert_eq!(format_value_str(Some(&raw), "float32", ""), "0.00");

        // -0.001
        let raw = words(&[0xBA, 0x83, 0x12, 0x6F]);
        assert_eq!(format_value_str(Some(&raw), "float32be", "V"), "0.00 V");

        let raw = words(&[0xBF, 0x80, 0x00, 0x00]);
        assert_eq!(format_value_str(Some(&raw), "float32", ""), "-1.00");
    }

    #[test]
    fn test_text_formats() {
        let raw = words(&[0x41, 0x42, 0x0A, 0xFF]);
        assert_eq!(format_value_str(Some(&raw), "hex", ""), "41420aff");
        assert_eq!(format_value_str(Some(&words(&[0x41, 0x42])), "binary", "u"), "AB u");
    }

    #[test]
    fn test_unsupported_format() {
        let raw = words(&[0x00, 0x01]);
        assert_eq!(format_value_str(Some(&raw), "ASCII", ""), "Unsupported format: ascii");
    }

    #[test]
    fn test_deterministic() {
        let raw = words(&[0x12, 0x34, 0x56, 0x78]);
        for name in ["int16", "uint32le", "float32be", "hex", "binary"] {
            assert_eq!(
                format_value_str(Some(&raw), name, "x"),
                format_value_str(Some(&raw), name, "x")
            );
        }
    }

    #[test]
    fn test_architecture_label() {
        assert_eq!(architecture_label(&ValueFormat::parse("float32le")), "32-bit");
        assert_eq!(architecture_label(&ValueFormat::parse("uint16")), "16-bit");
        assert_eq!(architecture_label(&ValueFormat::Bool), "1-bit");
        assert_eq!(architecture_label(&ValueFormat::Hex), "N/A");
    }
}
