//! Application layer: fragment headers, IIN, object headers and items.

use byteorder::{ByteOrder, LittleEndian};
use num_enum::TryFromPrimitive;

use crate::error::{AppError, ObjectError};
use crate::objects::{self, ObjectInstance, PackedBits};

/// Application control octet: FIR/FIN/CON/UNS and a 4-bit sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppControl {
    /// First fragment of a logical message.
    pub fir: bool,
    /// Final fragment of a logical message.
    pub fin: bool,
    /// The sender asks for an application confirm.
    pub con: bool,
    /// Unsolicited sequence space.
    pub uns: bool,
    /// 4-bit sequence number.
    pub sequence: u8,
}

impl AppControl {
    /// A single-fragment control octet.
    pub const fn single(sequence: u8) -> Self {
        Self {
            fir: true,
            fin: true,
            con: false,
            uns: false,
            sequence,
        }
    }

    /// A single-fragment unsolicited control octet asking for a confirm.
    pub const fn unsolicited(sequence: u8) -> Self {
        Self {
            fir: true,
            fin: true,
            con: true,
            uns: true,
            sequence,
        }
    }

    /// Encode into the control octet.
    pub fn encode(&self) -> u8 {
        let mut octet = self.sequence & 0x0F;
        if self.fir {
            octet |= 0x80;
        }
        if self.fin {
            octet |= 0x40;
        }
        if self.con {
            octet |= 0x20;
        }
        if self.uns {
            octet |= 0x10;
        }
        octet
    }

    /// Decode from the control octet.
    pub const fn decode(octet: u8) -> Self {
        Self {
            fir: octet & 0x80 != 0,
            fin: octet & 0x40 != 0,
            con: octet & 0x20 != 0,
            uns: octet & 0x10 != 0,
            sequence: octet & 0x0F,
        }
    }
}

/// Application function codes used by this implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum FunctionCode {
    /// Confirm a response or unsolicited response.
    Confirm = 0,
    /// Read objects.
    Read = 1,
    /// Write objects.
    Write = 2,
    /// Select an output.
    Select = 3,
    /// Operate a selected output.
    Operate = 4,
    /// Select and operate in one exchange.
    DirectOperate = 5,
    /// Direct operate without a response.
    DirectOperateNoResponse = 6,
    /// Enable unsolicited responses.
    EnableUnsolicited = 20,
    /// Disable unsolicited responses.
    DisableUnsolicited = 21,
    /// Measure the channel delay.
    DelayMeasure = 23,
    /// Record the current time for a later time write.
    RecordCurrentTime = 24,
    /// Solicited response.
    Response = 129,
    /// Unsolicited response.
    UnsolicitedResponse = 130,
}

impl FunctionCode {
    /// Responses and unsolicited responses carry the two IIN octets.
    pub const fn carries_iin(&self) -> bool {
        matches!(self, Self::Response | Self::UnsolicitedResponse)
    }

    /// Whether items under this function carry object data.
    ///
    /// Requests that only name ranges (READ, the unsolicited controls)
    /// have header-only items.
    pub const fn carries_object_data(&self) -> bool {
        matches!(
            self,
            Self::Write
                | Self::Select
                | Self::Operate
                | Self::DirectOperate
                | Self::DirectOperateNoResponse
                | Self::Response
                | Self::UnsolicitedResponse
        )
    }
}

bitflags::bitflags! {
    /// Internal indications, IIN1 in the low octet and IIN2 in the high.
    pub struct Iin: u16 {
        /// The request was a broadcast.
        const BROADCAST = 0x0001;
        /// Class 1 events are pending.
        const CLASS_1_EVENTS = 0x0002;
        /// Class 2 events are pending.
        const CLASS_2_EVENTS = 0x0004;
        /// Class 3 events are pending.
        const CLASS_3_EVENTS = 0x0008;
        /// The outstation needs time synchronization.
        const NEED_TIME = 0x0010;
        /// Some points are under local control.
        const LOCAL_CONTROL = 0x0020;
        /// The device reports trouble.
        const DEVICE_TROUBLE = 0x0040;
        /// The device restarted since the flag was last cleared.
        const DEVICE_RESTART = 0x0080;
        /// The function code is not supported.
        const NO_FUNC_CODE_SUPPORT = 0x0100;
        /// A requested object is unknown.
        const OBJECT_UNKNOWN = 0x0200;
        /// A request parameter is out of range.
        const PARAMETER_ERROR = 0x0400;
        /// The event buffer overflowed.
        const EVENT_BUFFER_OVERFLOW = 0x0800;
        /// An operation is already executing.
        const ALREADY_EXECUTING = 0x1000;
        /// The configuration is corrupt.
        const CONFIG_CORRUPT = 0x2000;
        /// Reserved.
        const RESERVED_1 = 0x4000;
        /// Reserved.
        const RESERVED_2 = 0x8000;
    }
}

/// Bit index of the device-restart flag within the G80V1 packed range.
pub const DEVICE_RESTART_CODE: u32 = 7;

/// Index prefix codes (high nibble of the qualifier).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum PrefixCode {
    /// No per-instance prefix.
    None = 0,
    /// One-octet index.
    IndexByte = 1,
    /// Two-octet index.
    IndexShort = 2,
    /// Four-octet index.
    IndexInt = 3,
    /// One-octet object size.
    SizeByte = 4,
    /// Two-octet object size.
    SizeShort = 5,
    /// Four-octet object size.
    SizeInt = 6,
}

impl PrefixCode {
    const fn octets(&self) -> usize {
        match self {
            Self::None => 0,
            Self::IndexByte | Self::SizeByte => 1,
            Self::IndexShort | Self::SizeShort => 2,
            Self::IndexInt | Self::SizeInt => 4,
        }
    }
}

/// Range codes (low nibble of the qualifier).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum RangeCode {
    /// One-octet start and stop indexes.
    StartStopByte = 0,
    /// Two-octet start and stop indexes.
    StartStopShort = 1,
    /// Four-octet start and stop indexes.
    StartStopInt = 2,
    /// One-octet start and stop addresses.
    StartStopAddressByte = 3,
    /// Two-octet start and stop addresses.
    StartStopAddressShort = 4,
    /// Four-octet start and stop addresses.
    StartStopAddressInt = 5,
    /// No range: all objects.
    None = 6,
    /// One-octet object count.
    CountByte = 7,
    /// Two-octet object count.
    CountShort = 8,
    /// Four-octet object count.
    CountInt = 9,
    /// One-octet variable-format count.
    VariableCountByte = 11,
}

/// A decoded range payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Range {
    /// Inclusive start/stop indexes.
    StartStop {
        /// First index.
        start: u32,
        /// Last index.
        stop: u32,
    },
    /// Inclusive start/stop addresses.
    Address {
        /// First address.
        start: u32,
        /// Last address.
        stop: u32,
    },
    /// All objects; no payload follows.
    All,
    /// A bare object count.
    Count(u32),
}

impl Range {
    /// Number of object instances the range announces.
    pub const fn count(&self) -> usize {
        match self {
            Self::StartStop { start, stop } | Self::Address { start, stop } => {
                if *stop >= *start {
                    (*stop - *start + 1) as usize
                } else {
                    0
                }
            }
            Self::All => 0,
            Self::Count(n) => *n as usize,
        }
    }

    /// The natural range code for this range.
    pub const fn code(&self) -> RangeCode {
        match self {
            Self::StartStop { stop, .. } => {
                if *stop <= 0xFF {
                    RangeCode::StartStopByte
                } else if *stop <= 0xFFFF {
                    RangeCode::StartStopShort
                } else {
                    RangeCode::StartStopInt
                }
            }
            Self::Address { stop, .. } => {
                if *stop <= 0xFF {
                    RangeCode::StartStopAddressByte
                } else if *stop <= 0xFFFF {
                    RangeCode::StartStopAddressShort
                } else {
                    RangeCode::StartStopAddressInt
                }
            }
            Self::All => RangeCode::None,
            Self::Count(n) => {
                if *n <= 0xFF {
                    RangeCode::CountByte
                } else if *n <= 0xFFFF {
                    RangeCode::CountShort
                } else {
                    RangeCode::CountInt
                }
            }
        }
    }
}

/// An object header: group, variation, prefix and range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    /// Object group.
    pub group: u8,
    /// Object variation (0 = any, in requests).
    pub variation: u8,
    /// Per-instance prefix code.
    pub prefix: PrefixCode,
    /// Decoded range.
    pub range: Range,
}

/// Item payload: prefixed instances, or a packed bit run.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemPayload {
    /// Nothing follows the header (requests).
    None,
    /// One instance per range slot, with optional index prefixes.
    Instances(Vec<(Option<u32>, ObjectInstance)>),
    /// Packed 1- or 2-bit values over a contiguous range.
    Packed(PackedBits),
}

/// One object header plus its decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// The object header.
    pub header: ObjectHeader,
    /// The decoded payload.
    pub payload: ItemPayload,
}

impl Item {
    /// A header-only item (for requests).
    pub const fn request(group: u8, variation: u8, range: Range) -> Self {
        Self {
            header: ObjectHeader {
                group,
                variation,
                prefix: PrefixCode::None,
                range,
            },
            payload: ItemPayload::None,
        }
    }
}

/// One application fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    /// Application control octet.
    pub control: AppControl,
    /// Function code.
    pub function: FunctionCode,
    /// IIN octets, present on responses.
    pub iin: Option<Iin>,
    /// The items, in order.
    pub items: Vec<Item>,
}

impl Fragment {
    /// A request fragment.
    pub fn request(function: FunctionCode, sequence: u8, items: Vec<Item>) -> Self {
        Self {
            control: AppControl::single(sequence),
            function,
            iin: None,
            items,
        }
    }

    /// A solicited response echoing `sequence`.
    pub fn response(sequence: u8, iin: Iin, items: Vec<Item>) -> Self {
        Self {
            control: AppControl::single(sequence),
            function: FunctionCode::Response,
            iin: Some(iin),
            items,
        }
    }

    /// Serialize into fragment bytes.
    pub fn encode(&self) -> Result<Vec<u8>, AppError> {
        let mut out = Vec::new();
        out.push(self.control.encode());
        out.push(self.function as u8);
        if self.function.carries_iin() {
            let iin = self.iin.unwrap_or_else(Iin::empty);
            out.extend_from_slice(&iin.bits().to_le_bytes());
        }
        for item in &self.items {
            encode_item(item, &mut out)?;
        }
        Ok(out)
    }

    /// Parse fragment bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, AppError> {
        let mut cursor = bytes;
        let control = AppControl::decode(take(&mut cursor, 1)?[0]);
        let function_octet = take(&mut cursor, 1)?[0];
        let function = FunctionCode::try_from(function_octet)
            .map_err(|_| AppError::UnknownFunctionCode(function_octet))?;
        let iin = if function.carries_iin() {
            let octets = take(&mut cursor, 2)?;
            Some(Iin::from_bits_truncate(LittleEndian::read_u16(octets)))
        } else {
            None
        };
        let mut items = Vec::new();
        while !cursor.is_empty() {
            items.push(decode_item(&mut cursor, function.carries_object_data())?);
        }
        Ok(Self {
            control,
            function,
            iin,
            items,
        })
    }
}

fn take<'b>(cursor: &mut &'b [u8], len: usize) -> Result<&'b [u8], AppError> {
    if cursor.len() < len {
        return Err(AppError::Truncated);
    }
    let (head, tail) = cursor.split_at(len);
    *cursor = tail;
    Ok(head)
}

fn encode_item(item: &Item, out: &mut Vec<u8>) -> Result<(), AppError> {
    let header = &item.header;
    out.push(header.group);
    out.push(header.variation);
    let range_code = header.range.code();
    out.push(((header.prefix as u8) << 4) | range_code as u8);
    match header.range {
        Range::StartStop { start, stop } | Range::Address { start, stop } => {
            write_range_field(out, range_code, start);
            write_range_field(out, range_code, stop);
        }
        Range::All => {}
        Range::Count(n) => write_range_field(out, range_code, n),
    }
    match &item.payload {
        ItemPayload::None => Ok(()),
        ItemPayload::Packed(packed) => {
            out.extend_from_slice(&packed.to_bytes());
            Ok(())
        }
        ItemPayload::Instances(instances) => {
            let descriptor = objects::lookup(header.group, header.variation)
                .ok_or(ObjectError::UnknownVariation {
                    group: header.group,
                    variation: header.variation,
                })?;
            for (index, instance) in instances {
                if let Some(index) = index {
                    write_prefix_field(out, header.prefix, *index);
                }
                descriptor.encode(instance, out)?;
            }
            Ok(())
        }
    }
}

fn write_range_field(out: &mut Vec<u8>, code: RangeCode, value: u32) {
    match code {
        RangeCode::StartStopByte
        | RangeCode::StartStopAddressByte
        | RangeCode::CountByte
        | RangeCode::VariableCountByte => out.push(value as u8),
        RangeCode::StartStopShort | RangeCode::StartStopAddressShort | RangeCode::CountShort => {
            out.extend_from_slice(&(value as u16).to_le_bytes())
        }
        _ => out.extend_from_slice(&value.to_le_bytes()),
    }
}

fn write_prefix_field(out: &mut Vec<u8>, prefix: PrefixCode, value: u32) {
    match prefix.octets() {
        0 => {}
        1 => out.push(value as u8),
        2 => out.extend_from_slice(&(value as u16).to_le_bytes()),
        _ => out.extend_from_slice(&value.to_le_bytes()),
    }
}

fn decode_item(cursor: &mut &[u8], with_data: bool) -> Result<Item, AppError> {
    let head = take(cursor, 3)?;
    let (group, variation, qualifier) = (head[0], head[1], head[2]);
    let prefix_octet = (qualifier >> 4) & 0x07;
    let prefix = PrefixCode::try_from(prefix_octet)
        .map_err(|_| AppError::UnknownPrefixCode(prefix_octet))?;
    let range_octet = qualifier & 0x0F;
    let range_code = RangeCode::try_from(range_octet)
        .map_err(|_| AppError::UnknownRangeCode(range_octet))?;

    let range = match range_code {
        RangeCode::StartStopByte | RangeCode::StartStopShort | RangeCode::StartStopInt => {
            let start = read_range_field(cursor, range_code)?;
            let stop = read_range_field(cursor, range_code)?;
            Range::StartStop { start, stop }
        }
        RangeCode::StartStopAddressByte
        | RangeCode::StartStopAddressShort
        | RangeCode::StartStopAddressInt => {
            let start = read_range_field(cursor, range_code)?;
            let stop = read_range_field(cursor, range_code)?;
            Range::Address { start, stop }
        }
        RangeCode::None => Range::All,
        RangeCode::CountByte | RangeCode::CountShort | RangeCode::CountInt
        | RangeCode::VariableCountByte => Range::Count(read_range_field(cursor, range_code)?),
    };

    let header = ObjectHeader {
        group,
        variation,
        prefix,
        range,
    };

    if !with_data || (matches!(range, Range::All)) {
        return Ok(Item {
            header,
            payload: ItemPayload::None,
        });
    }

    let descriptor =
        objects::lookup(group, variation).ok_or_else(|| match objects::group_known(group) {
            true => AppError::Object(ObjectError::UnknownVariation { group, variation }),
            false => AppError::Object(ObjectError::UnknownGroup(group)),
        })?;

    let count = range.count();
    if descriptor.is_packed() {
        let octets = PackedBits::octets_for(descriptor.bits(), count);
        let raw = take(cursor, octets)?;
        let packed = PackedBits::from_bytes(descriptor.bits(), count, raw);
        return Ok(Item {
            header,
            payload: ItemPayload::Packed(packed),
        });
    }

    let mut instances = Vec::with_capacity(count);
    for _ in 0..count {
        let index = match prefix {
            PrefixCode::None => None,
            _ => Some(read_prefix_field(cursor, prefix)?),
        };
        let instance = descriptor
            .decode(cursor)
            .map_err(AppError::Object)?;
        instances.push((index, instance));
    }
    Ok(Item {
        header,
        payload: ItemPayload::Instances(instances),
    })
}

fn read_range_field(cursor: &mut &[u8], code: RangeCode) -> Result<u32, AppError> {
    Ok(match code {
        RangeCode::StartStopByte
        | RangeCode::StartStopAddressByte
        | RangeCode::CountByte
        | RangeCode::VariableCountByte => take(cursor, 1)?[0] as u32,
        RangeCode::StartStopShort | RangeCode::StartStopAddressShort | RangeCode::CountShort => {
            LittleEndian::read_u16(take(cursor, 2)?) as u32
        }
        _ => LittleEndian::read_u32(take(cursor, 4)?),
    })
}

fn read_prefix_field(cursor: &mut &[u8], prefix: PrefixCode) -> Result<u32, AppError> {
    Ok(match prefix.octets() {
        0 => 0,
        1 => take(cursor, 1)?[0] as u32,
        2 => LittleEndian::read_u16(take(cursor, 2)?) as u32,
        _ => LittleEndian::read_u32(take(cursor, 4)?),
    })
}

/// Split an encoded item list across fragments of at most `max_size`
/// octets, at item boundaries, numbering them into one logical message.
pub fn split_items(
    function: FunctionCode,
    iin: Option<Iin>,
    uns: bool,
    sequence: u8,
    items: Vec<Item>,
    max_size: usize,
) -> Result<Vec<Fragment>, AppError> {
    let header_size = 2 + if function.carries_iin() { 2 } else { 0 };
    let mut groups: Vec<Vec<Item>> = vec![Vec::new()];
    let mut used = header_size;
    for item in items {
        let mut probe = Vec::new();
        encode_item(&item, &mut probe)?;
        if used + probe.len() > max_size && !groups.last().map_or(true, Vec::is_empty) {
            groups.push(Vec::new());
            used = header_size;
        }
        used += probe.len();
        groups.last_mut().map(|g| g.push(item));
    }

    let last = groups.len() - 1;
    Ok(groups
        .into_iter()
        .enumerate()
        .map(|(at, items)| Fragment {
            control: AppControl {
                fir: at == 0,
                fin: at == last,
                con: uns,
                uns,
                sequence,
            },
            function,
            iin,
            items,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vane_types::Value;

    #[test]
    fn control_octet_round_trips() {
        let control = AppControl {
            fir: true,
            fin: false,
            con: true,
            uns: false,
            sequence: 9,
        };
        assert_eq!(AppControl::decode(control.encode()), control);
        assert_eq!(control.encode(), 0xA9);
    }

    #[test]
    fn read_request_round_trips() {
        let fragment = Fragment::request(
            FunctionCode::Read,
            3,
            vec![Item::request(30, 0, Range::StartStop { start: 7, stop: 7 })],
        );
        let bytes = fragment.encode().unwrap();
        let decoded = Fragment::decode(&bytes).unwrap();
        assert_eq!(decoded, fragment);
    }

    #[test]
    fn response_carries_iin() {
        let fragment = Fragment::response(4, Iin::DEVICE_RESTART, Vec::new());
        let bytes = fragment.encode().unwrap();
        assert_eq!(bytes.len(), 4);
        let decoded = Fragment::decode(&bytes).unwrap();
        assert_eq!(decoded.iin, Some(Iin::DEVICE_RESTART));
        assert_eq!(decoded.control.sequence, 4);
    }

    #[test]
    fn analog_response_round_trips() {
        let instance = ObjectInstance::with_value(Value::Double(1234.5), Some(0x01));
        let fragment = Fragment::response(
            0,
            Iin::empty(),
            vec![Item {
                header: ObjectHeader {
                    group: 30,
                    variation: 5,
                    prefix: PrefixCode::None,
                    range: Range::StartStop { start: 7, stop: 7 },
                },
                payload: ItemPayload::Instances(vec![(None, instance.clone())]),
            }],
        );
        let bytes = fragment.encode().unwrap();
        let decoded = Fragment::decode(&bytes).unwrap();
        match &decoded.items[0].payload {
            ItemPayload::Instances(instances) => {
                assert_eq!(instances.len(), 1);
                assert_eq!(instances[0].1.value(), instance.value());
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn unknown_codes_are_reported() {
        // Qualifier 0x0A is an undefined range code.
        let bytes = [AppControl::single(0).encode(), 2, 1, 2, 0x0A];
        assert!(matches!(
            Fragment::decode(&bytes),
            Err(AppError::UnknownRangeCode(10))
        ));

        let bytes = [AppControl::single(0).encode(), 0x7F];
        assert!(matches!(
            Fragment::decode(&bytes),
            Err(AppError::UnknownFunctionCode(0x7F))
        ));
    }

    #[test]
    fn split_respects_item_boundaries() {
        let items: Vec<Item> = (0..10)
            .map(|i| {
                Item::request(
                    30,
                    0,
                    Range::StartStop {
                        start: i,
                        stop: i,
                    },
                )
            })
            .collect();
        let fragments =
            split_items(FunctionCode::Read, None, false, 1, items, 20).unwrap();
        assert!(fragments.len() > 1);
        assert!(fragments.first().unwrap().control.fir);
        assert!(fragments.last().unwrap().control.fin);
        for fragment in &fragments {
            assert!(fragment.encode().unwrap().len() <= 20);
            assert_eq!(fragment.control.sequence, 1);
        }
        let total: usize = fragments.iter().map(|f| f.items.len()).sum();
        assert_eq!(total, 10);
    }
}
