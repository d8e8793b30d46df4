/// Register catalog construction
///
/// A catalog is the ordered list of registers one poll cycle reads. It is
/// built once per session, either by scanning an address range across a set
/// of register kinds or from an explicit named register list. Registers that
/// do not name a slave are read from the configuration's default slave.

use serde::{Deserialize, Serialize};

use crate::error::MonitorResult;
use crate::protocol::{ModbusAddress, RegisterDescriptor, RegisterKind, SlaveId, ValueFormat, DEFAULT_SLAVE_ID};
use crate::utils::validation;

/// Address range scan parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub start_address: u16,
    /// Inclusive
    pub end_address: u16,
    /// Step and read size for word kinds; bit kinds always step by 1
    pub quantity: u16,
    pub kinds: Vec<RegisterKind>,
    /// Falls back to the default slave when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slave_id: Option<SlaveId>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            start_address: 0,
            end_address: 50,
            quantity: 1,
            kinds: RegisterKind::ALL.to_vec(),
            slave_id: None,
        }
    }
}

fn default_quantity() -> u16 {
    1
}

/// One entry of a named register list, as written in a configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedRegister {
    pub description: String,
    pub address: ModbusAddress,
    #[serde(default = "default_quantity")]
    pub quantity: u16,
    #[serde(alias = "type")]
    pub kind: RegisterKind,
    pub format: ValueFormat,
    #[serde(default)]
    pub unit: String,
    #[serde(default, alias = "slaveId", skip_serializing_if = "Option::is_none")]
    pub slave_id: Option<SlaveId>,
}

impl NamedRegister {
    /// Turn into a descriptor, reading from `default_slave` unless a slave is named
    pub fn resolve(self, default_slave: SlaveId) -> RegisterDescriptor {
        RegisterDescriptor {
            description: self.description,
            address: self.address,
            quantity: self.quantity,
            kind: self.kind,
            format: self.format,
            unit: self.unit,
            slave_id: self.slave_id.unwrap_or(default_slave),
        }
    }
}

impl From<RegisterDescriptor> for NamedRegister {
    fn from(register: RegisterDescriptor) -> Self {
        Self {
            description: register.description,
            address: register.address,
            quantity: register.quantity,
            kind: register.kind,
            format: register.format,
            unit: register.unit,
            slave_id: Some(register.slave_id),
        }
    }
}

/// Where a session's catalog comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CatalogSource {
    Scan(ScanConfig),
    Named { registers: Vec<NamedRegister> },
}

impl Default for CatalogSource {
    fn default() -> Self {
        CatalogSource::Scan(ScanConfig::default())
    }
}

impl CatalogSource {
    /// Build the catalog this source describes
    ///
    /// `default_slave` is used for every register that does not name its own.
    pub fn build(&self, default_slave: SlaveId) -> MonitorResult<Vec<RegisterDescriptor>> {
        match self {
            CatalogSource::Scan(scan) => {
                let slave_id = scan.slave_id.unwrap_or(default_slave);
                validation::validate_slave_id(slave_id)?;
                Ok(build_catalog(&ScanConfig {
                    slave_id: Some(slave_id),
                    ..scan.clone()
                }))
            }
            CatalogSource::Named { registers } => build_named_catalog(
                registers
                    .iter()
                    .cloned()
                    .map(|register| register.resolve(default_slave))
                    .collect(),
            ),
        }
    }
}

/// Build a scanned catalog
///
/// Kinds are visited in [`RegisterKind::ALL`] order whatever order the scan
/// config lists them in; within a kind addresses ascend.
pub fn build_catalog(scan: &ScanConfig) -> Vec<RegisterDescriptor> {
    let slave_id = scan.slave_id.unwrap_or(DEFAULT_SLAVE_ID);
    let mut catalog = Vec::new();

    for kind in RegisterKind::ALL {
        if !scan.kinds.contains(&kind) {
            continue;
        }

        let quantity = if kind.is_bit_addressed() { 1 } else { scan.quantity.max(1) };
        let prefix: String = kind.as_str().chars().take(4).collect();

        let mut address = u32::from(scan.start_address);
        while address <= u32::from(scan.end_address) {
            catalog.push(RegisterDescriptor {
                description: format!("Addr {} ({})", address, prefix),
                address: address as u16,
                quantity,
                kind,
                format: kind.default_format(),
                unit: String::new(),
                slave_id,
            });
            address += u32::from(quantity);
        }
    }

    catalog
}

/// Build a catalog from an explicit register list, keeping its order
pub fn build_named_catalog(registers: Vec<RegisterDescriptor>) -> MonitorResult<Vec<RegisterDescriptor>> {
    for register in &registers {
        validation::validate_slave_id(register.slave_id)?;
        validation::validate_address_range(register.address, register.quantity)?;
        if register.kind.is_bit_addressed() {
            validation::validate_coil_count(register.quantity)?;
        } else {
            validation::validate_register_count(register.quantity)?;
        }
    }
    Ok(registers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_single_kind() {
        let scan = ScanConfig {
            start_address: 0,
            end_address: 2,
            kinds: vec![RegisterKind::Coil],
            ..ScanConfig::default()
        };
        let catalog = build_catalog(&scan);

        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.iter().map(|r| r.address).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(catalog.iter().all(|r| r.quantity == 1 && r.format == ValueFormat::Bool));
        assert_eq!(catalog[1].description, "Addr 1 (Coil)");
    }

    #[test]
    fn test_scan_kind_order_is_fixed() {
        let scan = ScanConfig {
            start_address: 10,
            end_address: 11,
            kinds: vec![RegisterKind::DiscreteInput, RegisterKind::HoldingRegister],
            ..ScanConfig::default()
        };
        let kinds: Vec<_> = build_catalog(&scan).iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RegisterKind::HoldingRegister,
                RegisterKind::HoldingRegister,
                RegisterKind::DiscreteInput,
                RegisterKind::DiscreteInput,
            ]
        );
    }

    #[test]
    fn test_scan_word_step() {
        let scan = ScanConfig {
            start_address: 0,
            end_address: 5,
            quantity: 2,
            kinds: vec![RegisterKind::InputRegister, RegisterKind::Coil],
            slave_id: Some(7),
        };
        let catalog = build_catalog(&scan);
        let words: Vec<_> = catalog.iter().filter(|r| r.kind == RegisterKind::InputRegister).collect();

        assert_eq!(words.iter().map(|r| r.address).collect::<Vec<_>>(), vec![0, 2, 4]);
        assert!(words.iter().all(|r| r.quantity == 2 && r.format == ValueFormat::Int16(None)));
        assert_eq!(catalog.len(), 3 + 6);
        assert!(catalog.iter().all(|r| r.slave_id == 7));
    }

    #[test]
    fn test_scan_top_of_address_space() {
        let scan = ScanConfig {
            start_address: 65534,
            end_address: 65535,
            kinds: vec![RegisterKind::HoldingRegister],
            ..ScanConfig::default()
        };
        assert_eq!(build_catalog(&scan).len(), 2);
    }

    #[test]
    fn test_named_catalog_validation() {
        let good = RegisterDescriptor {
            description: "Voltage".to_string(),
            address: 100,
            quantity: 2,
            kind: RegisterKind::HoldingRegister,
            format: ValueFormat::parse("float32be"),
            unit: "V".to_string(),
            slave_id: 3,
        };
        assert_eq!(build_named_catalog(vec![good.clone()]).unwrap(), vec![good.clone()]);

        let bad_slave = RegisterDescriptor { slave_id: 0, ..good.clone() };
        assert!(build_named_catalog(vec![bad_slave]).is_err());

        let bad_quantity = RegisterDescriptor { quantity: 0, ..good };
        assert!(build_named_catalog(vec![bad_quantity]).is_err());
    }

    #[test]
    fn test_default_slave_fills_unset_ids() {
        let coils = CatalogSource::Scan(ScanConfig {
            start_address: 0,
            end_address: 1,
            kinds: vec![RegisterKind::Coil],
            ..ScanConfig::default()
        });
        let catalog = coils.build(5).unwrap();
        assert_eq!(catalog.iter().map(|r| r.slave_id).collect::<Vec<_>>(), vec![5, 5]);

        let pinned = CatalogSource::Scan(ScanConfig {
            end_address: 0,
            kinds: vec![RegisterKind::Coil],
            slave_id: Some(9),
            ..ScanConfig::default()
        });
        assert_eq!(pinned.build(5).unwrap()[0].slave_id, 9);

        let named: CatalogSource = serde_json::from_str(
            r#"{"mode":"named","registers":[
                {"description":"Tank level","address":10,"type":"InputRegister","format":"uint16","unit":"cm"},
                {"description":"Pump","address":3,"kind":"Coil","format":"bool","slaveId":2}
            ]}"#,
        )
        .unwrap();
        let catalog = named.build(5).unwrap();
        assert_eq!(catalog[0].slave_id, 5);
        assert_eq!(catalog[0].quantity, 1);
        assert_eq!(catalog[0].format, ValueFormat::Uint16(None));
        assert_eq!(catalog[1].slave_id, 2);
    }

    #[test]
    fn test_invalid_default_slave_rejected() {
        assert!(CatalogSource::default().build(0).is_err());
    }
}
