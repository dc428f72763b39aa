//! Object catalog: group × variation descriptors with wire codecs.
//!
//! The catalog is a static table; a descriptor carries capability flags
//! (packed / with-value / with-time / with-flags / command) instead of a
//! type hierarchy, and new variations plug in as new table rows.

use vane_types::{DataType, Stamp, Value};

use crate::error::ObjectError;

mod groups;

pub use groups::{lookup, group_known, DESCRIPTORS};

bitflags::bitflags! {
    /// Capability flags of an object class.
    pub struct ObjectKind: u8 {
        /// Multiple 1- or 2-bit values packed over a contiguous range.
        const PACKED = 0x01;
        /// Instances carry a typed datum.
        const WITH_VALUE = 0x02;
        /// Instances carry a 48-bit timestamp.
        const WITH_TIME = 0x04;
        /// Instances carry a quality flags octet.
        const WITH_FLAGS = 0x08;
        /// Instances carry a command status octet.
        const COMMAND = 0x10;
    }
}

/// The point taxonomy used for request building and configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointType {
    /// Single-bit binary input.
    SingleBitInput,
    /// Double-bit binary input.
    DoubleBitInput,
    /// Binary output.
    BinaryOutput,
    /// Running counter.
    Counter,
    /// Frozen counter.
    FrozenCounter,
    /// Analog input.
    AnalogInput,
    /// Analog output.
    AnalogOutput,
}

impl PointType {
    /// Parse from a configuration attribute value.
    pub fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_uppercase().as_str() {
            "SINGLE_BIT_INPUT" | "BINARY_INPUT" => Some(Self::SingleBitInput),
            "DOUBLE_BIT_INPUT" => Some(Self::DoubleBitInput),
            "BINARY_OUTPUT" => Some(Self::BinaryOutput),
            "COUNTER" => Some(Self::Counter),
            "FROZEN_COUNTER" => Some(Self::FrozenCounter),
            "ANALOG_INPUT" => Some(Self::AnalogInput),
            "ANALOG_OUTPUT" => Some(Self::AnalogOutput),
            _ => None,
        }
    }

    /// The group a READ for this point type asks for.
    pub const fn read_group(&self) -> u8 {
        match self {
            Self::SingleBitInput => 1,
            Self::DoubleBitInput => 3,
            Self::BinaryOutput => 10,
            Self::Counter => 20,
            Self::FrozenCounter => 21,
            Self::AnalogInput => 30,
            Self::AnalogOutput => 40,
        }
    }

    /// The group a WRITE/DIRECT_OPERATE for this point type carries.
    pub const fn command_group(&self) -> u8 {
        match self {
            Self::BinaryOutput => 12,
            Self::AnalogOutput => 41,
            other => other.read_group(),
        }
    }

    /// The default response variation for a data type binding.
    pub fn default_variation(&self, data_type: DataType) -> (u8, u8) {
        let group = self.read_group();
        let variation = match (self, data_type) {
            (Self::SingleBitInput | Self::BinaryOutput | Self::DoubleBitInput, _) => 2,
            (Self::Counter | Self::FrozenCounter, DataType::Counter16 | DataType::Int16) => 2,
            (Self::Counter | Self::FrozenCounter, _) => 1,
            (_, DataType::Int16) => 2,
            (_, DataType::Int32) => 1,
            (_, DataType::Float32) => if *self == Self::AnalogOutput { 3 } else { 5 },
            (_, DataType::Float64) => if *self == Self::AnalogOutput { 4 } else { 6 },
            (_, DataType::Counter16) => 2,
            _ => 1,
        };
        (group, variation)
    }
}

/// One decoded object instance; aspects are optional by capability.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInstance {
    value: Option<Value>,
    flags: Option<u8>,
    time: Option<Stamp>,
    status: Option<u8>,
}

impl ObjectInstance {
    /// An instance carrying a typed datum with optional quality flags.
    pub const fn with_value(value: Value, flags: Option<u8>) -> Self {
        Self {
            value: Some(value),
            flags,
            time: None,
            status: None,
        }
    }

    /// An instance carrying only a timestamp.
    pub const fn with_time(time: Stamp) -> Self {
        Self {
            value: None,
            flags: None,
            time: Some(time),
            status: None,
        }
    }

    /// A command instance: datum plus status octet.
    pub const fn command(value: Value, status: u8) -> Self {
        Self {
            value: Some(value),
            flags: None,
            time: None,
            status: Some(status),
        }
    }

    /// An instance with no payload (class objects).
    pub const fn empty() -> Self {
        Self {
            value: None,
            flags: None,
            time: None,
            status: None,
        }
    }

    /// Attach a timestamp.
    pub fn at(mut self, time: Stamp) -> Self {
        self.time = Some(time);
        self
    }

    /// The typed datum, when present.
    pub const fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// The quality flags octet, when present.
    pub const fn flags(&self) -> Option<u8> {
        self.flags
    }

    /// The timestamp, when present.
    pub const fn time(&self) -> Option<Stamp> {
        self.time
    }

    /// The command status octet, when present.
    pub const fn status(&self) -> Option<u8> {
        self.status
    }
}

/// Packed 1- or 2-bit values over a contiguous range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedBits {
    bits: u8,
    values: Vec<u8>,
}

impl PackedBits {
    /// Build from per-slot values (each masked to the bit width).
    pub fn new(bits: u8, values: Vec<u8>) -> Self {
        let mask = (1u8 << bits) - 1;
        Self {
            bits,
            values: values.into_iter().map(|v| v & mask).collect(),
        }
    }

    /// Number of values decoded into this run.
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Value at a slot.
    pub fn get(&self, at: usize) -> Option<u8> {
        self.values.get(at).copied()
    }

    /// All values, one per slot.
    pub fn values(&self) -> &[u8] {
        &self.values
    }

    /// Octets needed for `count` values of `bits` width.
    pub const fn octets_for(bits: u8, count: usize) -> usize {
        (count * bits as usize).div_ceil(8)
    }

    /// Unpack from wire octets, least significant bits first.
    pub fn from_bytes(bits: u8, count: usize, raw: &[u8]) -> Self {
        let mask = (1u8 << bits) - 1;
        let per_octet = 8 / bits as usize;
        let mut values = Vec::with_capacity(count);
        for at in 0..count {
            let octet = raw.get(at / per_octet).copied().unwrap_or(0);
            let shift = (at % per_octet) * bits as usize;
            values.push((octet >> shift) & mask);
        }
        Self { bits, values }
    }

    /// Pack into wire octets.
    pub fn to_bytes(&self) -> Vec<u8> {
        let per_octet = 8 / self.bits as usize;
        let mut out = vec![0u8; Self::octets_for(self.bits, self.values.len())];
        for (at, value) in self.values.iter().enumerate() {
            let shift = (at % per_octet) * self.bits as usize;
            out[at / per_octet] |= value << shift;
        }
        out
    }
}

/// A catalog row: identity, capabilities and wire codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectDescriptor {
    /// Object group.
    pub group: u8,
    /// Object variation.
    pub variation: u8,
    /// Capability flags.
    pub kind: ObjectKind,
    /// Default data-type binding, when the object carries a datum.
    pub data_type: Option<DataType>,
    /// Fixed octet length of one instance (0 for packed variations).
    pub length: usize,
    /// Bits per value for packed variations (0 otherwise).
    bits: u8,
}

impl ObjectDescriptor {
    /// Return `true` for packed variations.
    pub const fn is_packed(&self) -> bool {
        self.kind.contains(ObjectKind::PACKED)
    }

    /// Bits per packed value (1 or 2).
    pub const fn bits(&self) -> u8 {
        self.bits
    }

    /// Decode one instance off the cursor.
    pub fn decode(&self, cursor: &mut &[u8]) -> Result<ObjectInstance, ObjectError> {
        groups::decode_instance(self, cursor)
    }

    /// Encode one instance onto the buffer.
    pub fn encode(&self, instance: &ObjectInstance, out: &mut Vec<u8>) -> Result<(), ObjectError> {
        groups::encode_instance(self, instance, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_round_trips() {
        let packed = PackedBits::new(1, vec![1, 0, 1, 1, 0, 0, 0, 1, 1]);
        let bytes = packed.to_bytes();
        assert_eq!(bytes.len(), 2);
        let back = PackedBits::from_bytes(1, 9, &bytes);
        assert_eq!(back, packed);

        let two_bit = PackedBits::new(2, vec![0, 1, 2, 3, 2]);
        let bytes = two_bit.to_bytes();
        assert_eq!(bytes.len(), 2);
        assert_eq!(PackedBits::from_bytes(2, 5, &bytes), two_bit);
    }

    #[test]
    fn default_variations_follow_data_type() {
        assert_eq!(
            PointType::AnalogInput.default_variation(DataType::Float32),
            (30, 5)
        );
        assert_eq!(
            PointType::AnalogInput.default_variation(DataType::Int16),
            (30, 2)
        );
        assert_eq!(
            PointType::AnalogOutput.default_variation(DataType::Float64),
            (40, 4)
        );
        assert_eq!(
            PointType::SingleBitInput.default_variation(DataType::Boolean),
            (1, 2)
        );
    }
}
