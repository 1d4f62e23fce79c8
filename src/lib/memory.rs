use std::fmt;

use crate::error::{DeviceError, DeviceResult};

/// Highest valid cell address: the program memory is 11-bit addressed.
pub const MAX_ADDRESS: u32 = 0x7FF;
/// Highest valid cell value: one 16-bit word.
pub const MAX_VALUE: u32 = 0xFFFF;

/// One addressable word of program memory, plus an optional symbolic label.
///
/// The assembler creates one cell per memory location: the address is fixed
/// at layout time, the value is mutated during code generation and
/// relocation. Fields start out undefined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryCell {
    address: Option<u16>,
    value: Option<u16>,
    label: Option<String>,
}

impl MemoryCell {
    pub fn new() -> Self {
        MemoryCell::default()
    }

    pub fn address(&self) -> Option<u16> {
        self.address
    }

    pub fn set_address(&mut self, address: u32) -> DeviceResult<()> {
        if address > MAX_ADDRESS {
            return Err(DeviceError::AddressRange(address));
        }
        self.address = Some(address as u16);
        Ok(())
    }

    pub fn value(&self) -> Option<u16> {
        self.value
    }

    pub fn set_value(&mut self, value: u32) -> DeviceResult<()> {
        if value > MAX_VALUE {
            return Err(DeviceError::ValueRange(value));
        }
        self.value = Some(value as u16);
        Ok(())
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = Some(label.into());
    }
}

impl fmt::Display for MemoryCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryCell {{ address=")?;
        match self.address {
            Some(address) => write!(f, "{:#05X}", address)?,
            None => write!(f, "undefined")?,
        }
        if let Some(label) = &self.label {
            write!(f, ", label={}", label)?;
        }
        write!(f, ", value=")?;
        match self.value {
            Some(value) => write!(f, "{:#06X}", value)?,
            None => write!(f, "undefined")?,
        }
        write!(f, " }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_undefined() {
        let cell = MemoryCell::new();
        assert_eq!(cell.address(), None);
        assert_eq!(cell.value(), None);
        assert_eq!(cell.label(), None);
    }

    #[test]
    fn test_address_range() {
        let mut cell = MemoryCell::new();
        cell.set_address(0).unwrap();
        cell.set_address(2047).unwrap();
        assert_eq!(cell.address(), Some(2047));
        assert!(matches!(
            cell.set_address(2048),
            Err(DeviceError::AddressRange(2048))
        ));
        // A failed assignment leaves the address unchanged.
        assert_eq!(cell.address(), Some(2047));
    }

    #[test]
    fn test_value_range() {
        let mut cell = MemoryCell::new();
        cell.set_value(0xFFFF).unwrap();
        assert_eq!(cell.value(), Some(0xFFFF));
        assert!(matches!(
            cell.set_value(0x10000),
            Err(DeviceError::ValueRange(0x10000))
        ));
        assert_eq!(cell.value(), Some(0xFFFF));
    }

    #[test]
    fn test_display() {
        let mut cell = MemoryCell::new();
        assert_eq!(
            cell.to_string(),
            "MemoryCell { address=undefined, value=undefined }"
        );
        cell.set_address(0x10).unwrap();
        cell.set_value(0x1234).unwrap();
        cell.set_label("loop");
        assert_eq!(
            cell.to_string(),
            "MemoryCell { address=0x010, label=loop, value=0x1234 }"
        );
    }
}
