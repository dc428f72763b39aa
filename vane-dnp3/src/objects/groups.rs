//! The descriptor table and per-variation wire codecs.

use byteorder::{ByteOrder, LittleEndian};
use vane_types::{DataType, Stamp, Value};

use crate::error::ObjectError;

use super::{ObjectDescriptor, ObjectInstance, ObjectKind};

const PACKED1: u8 = ObjectKind::PACKED.bits() | ObjectKind::WITH_VALUE.bits();
const PACKED2: u8 = PACKED1;
const VAL: u8 = ObjectKind::WITH_VALUE.bits();
const VAL_FLAG: u8 = VAL | ObjectKind::WITH_FLAGS.bits();
const VAL_FLAG_TIME: u8 = VAL_FLAG | ObjectKind::WITH_TIME.bits();
const TIME: u8 = ObjectKind::WITH_TIME.bits();
const CMD: u8 = VAL | ObjectKind::COMMAND.bits();
const CLASS: u8 = 0;

const fn desc(
    group: u8,
    variation: u8,
    kind: u8,
    data_type: Option<DataType>,
    length: usize,
    bits: u8,
) -> ObjectDescriptor {
    ObjectDescriptor {
        group,
        variation,
        kind: ObjectKind::from_bits_truncate(kind),
        data_type,
        length,
        bits,
    }
}

/// Every object class this implementation knows.
pub const DESCRIPTORS: &[ObjectDescriptor] = &[
    // Binary inputs.
    desc(1, 1, PACKED1, Some(DataType::Boolean), 0, 1),
    desc(1, 2, VAL_FLAG, Some(DataType::Boolean), 1, 0),
    // Binary input events.
    desc(2, 1, VAL_FLAG, Some(DataType::Boolean), 1, 0),
    desc(2, 2, VAL_FLAG_TIME, Some(DataType::Boolean), 7, 0),
    // Double-bit inputs.
    desc(3, 1, PACKED2, Some(DataType::DoubleBit), 0, 2),
    desc(3, 2, VAL_FLAG, Some(DataType::DoubleBit), 1, 0),
    // Binary outputs.
    desc(10, 1, PACKED1, Some(DataType::Boolean), 0, 1),
    desc(10, 2, VAL_FLAG, Some(DataType::Boolean), 1, 0),
    // Binary output command (CROB).
    desc(12, 1, CMD, Some(DataType::Boolean), 11, 0),
    // Counters.
    desc(20, 1, VAL_FLAG, Some(DataType::Counter32), 5, 0),
    desc(20, 2, VAL_FLAG, Some(DataType::Counter16), 3, 0),
    desc(20, 5, VAL, Some(DataType::Counter32), 4, 0),
    desc(20, 6, VAL, Some(DataType::Counter16), 2, 0),
    // Frozen counters.
    desc(21, 1, VAL_FLAG, Some(DataType::Counter32), 5, 0),
    desc(21, 2, VAL_FLAG, Some(DataType::Counter16), 3, 0),
    desc(21, 9, VAL, Some(DataType::Counter32), 4, 0),
    desc(21, 10, VAL, Some(DataType::Counter16), 2, 0),
    // Counter events.
    desc(22, 1, VAL_FLAG, Some(DataType::Counter32), 5, 0),
    desc(22, 2, VAL_FLAG, Some(DataType::Counter16), 3, 0),
    // Analog inputs.
    desc(30, 1, VAL_FLAG, Some(DataType::Int32), 5, 0),
    desc(30, 2, VAL_FLAG, Some(DataType::Int16), 3, 0),
    desc(30, 3, VAL, Some(DataType::Int32), 4, 0),
    desc(30, 4, VAL, Some(DataType::Int16), 2, 0),
    desc(30, 5, VAL_FLAG, Some(DataType::Float32), 5, 0),
    desc(30, 6, VAL_FLAG, Some(DataType::Float64), 9, 0),
    // Analog input events.
    desc(32, 1, VAL_FLAG, Some(DataType::Int32), 5, 0),
    desc(32, 2, VAL_FLAG, Some(DataType::Int16), 3, 0),
    desc(32, 5, VAL_FLAG, Some(DataType::Float32), 5, 0),
    desc(32, 6, VAL_FLAG, Some(DataType::Float64), 9, 0),
    // Analog input reporting deadbands.
    desc(34, 1, VAL, Some(DataType::Counter16), 2, 0),
    desc(34, 2, VAL, Some(DataType::Counter32), 4, 0),
    desc(34, 3, VAL, Some(DataType::Float32), 4, 0),
    // Analog output status.
    desc(40, 1, VAL_FLAG, Some(DataType::Int32), 5, 0),
    desc(40, 2, VAL_FLAG, Some(DataType::Int16), 3, 0),
    desc(40, 3, VAL_FLAG, Some(DataType::Float32), 5, 0),
    desc(40, 4, VAL_FLAG, Some(DataType::Float64), 9, 0),
    // Analog output commands.
    desc(41, 1, CMD, Some(DataType::Int32), 5, 0),
    desc(41, 2, CMD, Some(DataType::Int16), 3, 0),
    desc(41, 3, CMD, Some(DataType::Float32), 5, 0),
    desc(41, 4, CMD, Some(DataType::Float64), 9, 0),
    // Analog output events.
    desc(42, 1, VAL_FLAG, Some(DataType::Int32), 5, 0),
    desc(42, 2, VAL_FLAG, Some(DataType::Int16), 3, 0),
    desc(42, 5, VAL_FLAG, Some(DataType::Float32), 5, 0),
    desc(42, 6, VAL_FLAG, Some(DataType::Float64), 9, 0),
    // Time and date.
    desc(50, 1, TIME, None, 6, 0),
    desc(50, 3, TIME, None, 6, 0),
    // Time and date common time of occurrence.
    desc(51, 1, TIME, None, 6, 0),
    desc(51, 2, TIME, None, 6, 0),
    // Time delays.
    desc(52, 1, VAL, Some(DataType::Counter16), 2, 0),
    desc(52, 2, VAL, Some(DataType::Counter16), 2, 0),
    // Class objects.
    desc(60, 1, CLASS, None, 0, 0),
    desc(60, 2, CLASS, None, 0, 0),
    desc(60, 3, CLASS, None, 0, 0),
    desc(60, 4, CLASS, None, 0, 0),
    // Internal indications.
    desc(80, 1, PACKED1, Some(DataType::Boolean), 0, 1),
];

/// Find a descriptor by group and variation.
pub fn lookup(group: u8, variation: u8) -> Option<&'static ObjectDescriptor> {
    DESCRIPTORS
        .iter()
        .find(|d| d.group == group && d.variation == variation)
}

/// Return `true` if any variation of a group is in the catalog.
pub fn group_known(group: u8) -> bool {
    DESCRIPTORS.iter().any(|d| d.group == group)
}

fn take<'b>(cursor: &mut &'b [u8], len: usize) -> Result<&'b [u8], ObjectError> {
    if cursor.len() < len {
        return Err(ObjectError::Truncated);
    }
    let (head, tail) = cursor.split_at(len);
    *cursor = tail;
    Ok(head)
}

/// 48-bit milliseconds-since-epoch timestamp, little endian.
fn read_time48(cursor: &mut &[u8]) -> Result<Stamp, ObjectError> {
    let raw = take(cursor, 6)?;
    let mut octets = [0u8; 8];
    octets[..6].copy_from_slice(raw);
    Ok(Stamp::from_unix_millis(u64::from_le_bytes(octets) as i64))
}

fn write_time48(out: &mut Vec<u8>, stamp: Stamp) {
    let millis = stamp.unix_millis().max(0) as u64;
    out.extend_from_slice(&millis.to_le_bytes()[..6]);
}

pub(super) fn decode_instance(
    descriptor: &ObjectDescriptor,
    cursor: &mut &[u8],
) -> Result<ObjectInstance, ObjectError> {
    let (group, variation) = (descriptor.group, descriptor.variation);

    // Binary output command: code, count, on-time, off-time, status.
    if group == 12 {
        let raw = take(cursor, 11)?;
        let code = raw[0];
        let status = raw[10];
        return Ok(ObjectInstance::command(Value::Long(code as i64), status));
    }

    // Time-only objects.
    if descriptor.kind == ObjectKind::WITH_TIME {
        return Ok(ObjectInstance::with_time(read_time48(cursor)?));
    }

    // Class objects carry nothing.
    if descriptor.kind.is_empty() {
        return Ok(ObjectInstance::empty());
    }

    let data_type = descriptor
        .data_type
        .ok_or(ObjectError::ValueMismatch { group, variation })?;

    // Binary and double-bit states live inside the flags octet.
    if matches!(data_type, DataType::Boolean | DataType::DoubleBit)
        && descriptor.kind.contains(ObjectKind::WITH_FLAGS)
    {
        let flags = take(cursor, 1)?[0];
        let value = match data_type {
            DataType::Boolean => Value::Boolean(flags & 0x80 != 0),
            _ => Value::Long(((flags >> 6) & 0x03) as i64),
        };
        let mut instance = ObjectInstance::with_value(value, Some(flags));
        if descriptor.kind.contains(ObjectKind::WITH_TIME) {
            instance = instance.at(read_time48(cursor)?);
        }
        return Ok(instance);
    }

    let flags = if descriptor.kind.contains(ObjectKind::WITH_FLAGS) {
        Some(take(cursor, 1)?[0])
    } else {
        None
    };
    let value = read_value(cursor, data_type)?;
    let status = if descriptor.kind.contains(ObjectKind::COMMAND) {
        Some(take(cursor, 1)?[0])
    } else {
        None
    };
    let mut instance = ObjectInstance {
        value: Some(value),
        flags,
        time: None,
        status,
    };
    if descriptor.kind.contains(ObjectKind::WITH_TIME) {
        instance = instance.at(read_time48(cursor)?);
    }
    Ok(instance)
}

pub(super) fn encode_instance(
    descriptor: &ObjectDescriptor,
    instance: &ObjectInstance,
    out: &mut Vec<u8>,
) -> Result<(), ObjectError> {
    let (group, variation) = (descriptor.group, descriptor.variation);
    let mismatch = || ObjectError::ValueMismatch { group, variation };

    if group == 12 {
        let code = instance
            .value()
            .and_then(value_as_i64)
            .ok_or_else(mismatch)?;
        out.push(code as u8);
        out.push(1); // operation count
        out.extend_from_slice(&0u32.to_le_bytes()); // on-time
        out.extend_from_slice(&0u32.to_le_bytes()); // off-time
        out.push(instance.status().unwrap_or(0));
        return Ok(());
    }

    if descriptor.kind == ObjectKind::WITH_TIME {
        let time = instance.time().ok_or_else(mismatch)?;
        write_time48(out, time);
        return Ok(());
    }

    if descriptor.kind.is_empty() {
        return Ok(());
    }

    let data_type = descriptor.data_type.ok_or_else(mismatch)?;

    if matches!(data_type, DataType::Boolean | DataType::DoubleBit)
        && descriptor.kind.contains(ObjectKind::WITH_FLAGS)
    {
        let mut flags = instance.flags().unwrap_or(0x01) & 0x3F;
        match (data_type, instance.value()) {
            (DataType::Boolean, Some(Value::Boolean(true))) => flags |= 0x80,
            (DataType::Boolean, Some(Value::Boolean(false))) => {}
            (DataType::Boolean, Some(other)) => {
                if value_as_i64(other).ok_or_else(mismatch)? != 0 {
                    flags |= 0x80;
                }
            }
            (DataType::DoubleBit, Some(value)) => {
                let state = value_as_i64(value).ok_or_else(mismatch)? as u8;
                flags |= (state & 0x03) << 6;
            }
            _ => return Err(mismatch()),
        }
        out.push(flags);
        if descriptor.kind.contains(ObjectKind::WITH_TIME) {
            write_time48(out, instance.time().unwrap_or_else(Stamp::now));
        }
        return Ok(());
    }

    if descriptor.kind.contains(ObjectKind::WITH_FLAGS) {
        out.push(instance.flags().unwrap_or(0x01));
    }
    let value = instance.value().ok_or_else(mismatch)?;
    write_value(out, data_type, value).ok_or_else(mismatch)?;
    if descriptor.kind.contains(ObjectKind::COMMAND) {
        out.push(instance.status().unwrap_or(0));
    }
    if descriptor.kind.contains(ObjectKind::WITH_TIME) {
        write_time48(out, instance.time().unwrap_or_else(Stamp::now));
    }
    Ok(())
}

fn read_value(cursor: &mut &[u8], data_type: DataType) -> Result<Value, ObjectError> {
    Ok(match data_type {
        DataType::Int16 => Value::Long(LittleEndian::read_i16(take(cursor, 2)?) as i64),
        DataType::Int32 => Value::Long(LittleEndian::read_i32(take(cursor, 4)?) as i64),
        DataType::Counter16 => Value::Long(LittleEndian::read_u16(take(cursor, 2)?) as i64),
        DataType::Counter32 => Value::Long(LittleEndian::read_u32(take(cursor, 4)?) as i64),
        DataType::Float32 => Value::Double(LittleEndian::read_f32(take(cursor, 4)?) as f64),
        DataType::Float64 => Value::Double(LittleEndian::read_f64(take(cursor, 8)?)),
        DataType::Boolean => Value::Boolean(take(cursor, 1)?[0] != 0),
        DataType::DoubleBit => Value::Long((take(cursor, 1)?[0] & 0x03) as i64),
    })
}

fn write_value(out: &mut Vec<u8>, data_type: DataType, value: &Value) -> Option<()> {
    match data_type {
        DataType::Int16 => {
            let v = i16::try_from(value_as_i64(value)?).ok()?;
            out.extend_from_slice(&v.to_le_bytes());
        }
        DataType::Int32 => {
            let v = i32::try_from(value_as_i64(value)?).ok()?;
            out.extend_from_slice(&v.to_le_bytes());
        }
        DataType::Counter16 => {
            let v = u16::try_from(value_as_i64(value)?).ok()?;
            out.extend_from_slice(&v.to_le_bytes());
        }
        DataType::Counter32 => {
            let v = u32::try_from(value_as_i64(value)?).ok()?;
            out.extend_from_slice(&v.to_le_bytes());
        }
        DataType::Float32 => {
            let v = value_as_f64(value)? as f32;
            out.extend_from_slice(&v.to_le_bytes());
        }
        DataType::Float64 => {
            let v = value_as_f64(value)?;
            out.extend_from_slice(&v.to_le_bytes());
        }
        DataType::Boolean => out.push(matches!(value, Value::Boolean(true)) as u8),
        DataType::DoubleBit => out.push((value_as_i64(value)? & 0x03) as u8),
    }
    Some(())
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Long(l) => Some(*l),
        Value::Boolean(b) => Some(*b as i64),
        Value::Double(d) if d.is_finite() => Some(*d as i64),
        _ => None,
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Long(l) => Some(*l as f64),
        Value::Double(d) => Some(*d),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(group: u8, variation: u8, instance: ObjectInstance) -> ObjectInstance {
        let descriptor = lookup(group, variation).unwrap();
        let mut out = Vec::new();
        descriptor.encode(&instance, &mut out).unwrap();
        assert_eq!(out.len(), descriptor.length);
        let mut cursor = out.as_slice();
        let decoded = descriptor.decode(&mut cursor).unwrap();
        assert!(cursor.is_empty());
        decoded
    }

    #[test]
    fn analog_variations_round_trip() {
        let decoded = round_trip(
            30,
            5,
            ObjectInstance::with_value(Value::Double(1234.5), Some(0x01)),
        );
        assert_eq!(decoded.value(), Some(&Value::Double(1234.5)));
        assert_eq!(decoded.flags(), Some(0x01));

        let decoded = round_trip(30, 2, ObjectInstance::with_value(Value::Long(-100), None));
        assert_eq!(decoded.value(), Some(&Value::Long(-100)));

        let decoded = round_trip(
            30,
            6,
            ObjectInstance::with_value(Value::Double(-2.5e9), Some(0x01)),
        );
        assert_eq!(decoded.value(), Some(&Value::Double(-2.5e9)));
    }

    #[test]
    fn binary_state_rides_the_flags_octet() {
        let decoded = round_trip(
            1,
            2,
            ObjectInstance::with_value(Value::Boolean(true), Some(0x01)),
        );
        assert_eq!(decoded.value(), Some(&Value::Boolean(true)));
        assert_eq!(decoded.flags(), Some(0x81));
    }

    #[test]
    fn double_bit_state() {
        let decoded = round_trip(3, 2, ObjectInstance::with_value(Value::Long(2), Some(0x01)));
        assert_eq!(decoded.value(), Some(&Value::Long(2)));
    }

    #[test]
    fn counter_and_command_objects() {
        let decoded = round_trip(
            20,
            1,
            ObjectInstance::with_value(Value::Long(4_000_000_000), Some(0x01)),
        );
        assert_eq!(decoded.value(), Some(&Value::Long(4_000_000_000)));

        let decoded = round_trip(41, 2, ObjectInstance::command(Value::Long(-100), 0));
        assert_eq!(decoded.value(), Some(&Value::Long(-100)));
        assert_eq!(decoded.status(), Some(0));
    }

    #[test]
    fn time_objects_carry_milliseconds() {
        let stamp = Stamp::from_unix_millis(1_234_567_890_123);
        let decoded = round_trip(50, 3, ObjectInstance::with_time(stamp));
        assert_eq!(decoded.time(), Some(stamp));
    }

    #[test]
    fn event_with_time_round_trips() {
        let stamp = Stamp::from_unix_millis(1_000_000);
        let decoded = round_trip(
            2,
            2,
            ObjectInstance::with_value(Value::Boolean(true), Some(0x01)).at(stamp),
        );
        assert_eq!(decoded.value(), Some(&Value::Boolean(true)));
        assert_eq!(decoded.time(), Some(stamp));
    }

    #[test]
    fn unknown_variation_is_absent() {
        assert!(lookup(30, 42).is_none());
        assert!(lookup(99, 1).is_none());
        assert!(group_known(30));
        assert!(!group_known(99));
    }

    #[test]
    fn value_range_is_enforced() {
        let descriptor = lookup(30, 2).unwrap();
        let mut out = Vec::new();
        let error = descriptor
            .encode(
                &ObjectInstance::with_value(Value::Long(1_000_000), None),
                &mut out,
            )
            .unwrap_err();
        assert!(matches!(error, ObjectError::ValueMismatch { .. }));
    }
}
