//! Typed access to one resolved variable on the device
//!
//! A [`Variable`] pairs a [`VariableInfo`] with the [`Representation`] picked
//! for its type name and a [`LinkHandle`]. Nothing is cached: every read goes
//! to the device.

use crate::config::DEFAULT_MAX_CHUNK_SIZE;
use crate::error::{Result, X2cError};
use crate::link::LinkHandle;
use crate::types::{Representation, Value, VariableInfo};

/// Element code passed to chunked array reads
pub(crate) const ARRAY_DATA_TYPE: u8 = 1;

/// A variable bound to a device link
#[derive(Debug, Clone)]
pub struct Variable {
    info: VariableInfo,
    rep: Representation,
    link: LinkHandle,
    max_chunk: usize,
}

impl Variable {
    /// Bind `info` to `link`, selecting the representation for its type.
    /// Enums with only non-negative enumerators are read unsigned.
    ///
    /// Fails with [`X2cError::UnsupportedType`] when the type name has no
    /// representation or its width does not match `byte_size`.
    pub fn new(info: VariableInfo, link: LinkHandle, address_width: usize) -> Result<Self> {
        let rep = Representation::for_info(&info, address_width)?;
        Ok(Self {
            info,
            rep,
            link,
            max_chunk: DEFAULT_MAX_CHUNK_SIZE,
        })
    }

    /// Limit the size of each chunk read by [`get_array`](Self::get_array)
    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = max_chunk.max(1);
        self
    }

    pub fn info(&self) -> &VariableInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn address(&self) -> u64 {
        self.info.address
    }

    pub fn representation(&self) -> Representation {
        self.rep
    }

    /// Width of one element in bytes
    pub fn width(&self) -> usize {
        self.rep.width()
    }

    pub fn is_signed(&self) -> bool {
        self.rep.is_signed()
    }

    pub fn is_integer(&self) -> bool {
        self.rep.is_integer()
    }

    pub fn is_array(&self) -> bool {
        self.info.is_array()
    }

    /// Read the current value (the first element for arrays)
    pub fn get_value(&self) -> Result<Value> {
        self.read_at(self.info.address)
    }

    /// Write `value`; integer representations reject out-of-range values
    pub fn set_value(&self, value: impl Into<Value>) -> Result<()> {
        self.write_at(self.info.address, value.into())
    }

    /// Read element `index` of an array
    pub fn get_element(&self, index: usize) -> Result<Value> {
        let address = self.element_address(index)?;
        self.read_at(address)
    }

    /// Write element `index` of an array
    pub fn set_element(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let address = self.element_address(index)?;
        self.write_at(address, value.into())
    }

    /// Read every element using bounded chunk reads
    pub fn get_array(&self) -> Result<Vec<Value>> {
        let total = self.info.total_size();
        let mut bytes = Vec::with_capacity(total);
        let mut offset = 0;

        while offset < total {
            let size = self.max_chunk.min(total - offset);
            let address = self.info.address + offset as u64;
            let chunk = self.link.get_ram_array(address, size, ARRAY_DATA_TYPE)?;
            if chunk.len() != size {
                return Err(X2cError::SizeMismatch {
                    address,
                    expected: size,
                    actual: chunk.len(),
                });
            }
            bytes.extend_from_slice(&chunk);
            offset += size;
        }

        bytes
            .chunks_exact(self.width())
            .map(|element| self.decode(element, self.info.address))
            .collect()
    }

    /// Enumerator name for `value`, if this is an enum and the value is listed
    pub fn enumerator_name(&self, value: Value) -> Option<&str> {
        let wanted = value.as_i64()?;
        self.info
            .valid_values
            .as_ref()?
            .iter()
            .find(|(_, v)| **v == wanted)
            .map(|(name, _)| name.as_str())
    }

    fn element_address(&self, index: usize) -> Result<u64> {
        let len = self.info.array_size.max(1);
        if index >= len {
            return Err(X2cError::IndexOutOfBounds { index, len });
        }
        Ok(self.info.address + (index * self.info.byte_size) as u64)
    }

    fn read_at(&self, address: u64) -> Result<Value> {
        let expected = self.width();
        let bytes = self.link.get_ram(address, expected)?;
        if bytes.len() != expected {
            return Err(X2cError::SizeMismatch {
                address,
                expected,
                actual: bytes.len(),
            });
        }
        match (self.info.bit_size, self.info.bit_offset) {
            (Some(bits), offset) => Ok(self.extract_bits(&bytes, bits, offset.unwrap_or(0))),
            _ => self.decode(&bytes, address),
        }
    }

    fn write_at(&self, address: u64, value: Value) -> Result<()> {
        if self.info.is_bitfield() {
            return Err(X2cError::UnsupportedType(format!(
                "write to bitfield '{}'",
                self.info.name
            )));
        }
        let bytes = self.rep.encode(value)?;
        tracing::trace!("write {} = {} at 0x{:X}", self.info.name, value, address);
        self.link.put_ram(address, &bytes)
    }

    fn decode(&self, bytes: &[u8], address: u64) -> Result<Value> {
        self.rep.decode(bytes).ok_or(X2cError::SizeMismatch {
            address,
            expected: self.width(),
            actual: bytes.len(),
        })
    }

    fn extract_bits(&self, bytes: &[u8], bits: u8, shift: u8) -> Value {
        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(bytes);
        let storage = u64::from_le_bytes(buf);

        let bits = u32::from(bits).min(64);
        let mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
        let raw = (storage >> u32::from(shift).min(63)) & mask;

        if self.rep.is_signed() && bits > 0 && bits < 64 && raw & (1 << (bits - 1)) != 0 {
            Value::Signed((raw | !mask) as i64)
        } else if self.rep.is_signed() {
            Value::Signed(raw as i64)
        } else {
            Value::Unsigned(raw)
        }
    }
}
