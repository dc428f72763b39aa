//! DNP3 data-link layer: frame encode/decode with CRCs.
//!
//! Wire layout: `05 64 LEN CTL DST_LO DST_HI SRC_LO SRC_HI HCRC` then the
//! user data in 16-octet blocks, each followed by its own CRC. `LEN`
//! counts CTL through the last user octet, excluding every CRC.

use byteorder::{ByteOrder, LittleEndian};
use num_enum::TryFromPrimitive;

use crate::crc;
use crate::error::FrameError;

/// The fixed frame start octets, transmitted `05 64`.
pub const START_FIELD: u16 = 0x0564;
/// Maximum user data octets per frame.
pub const MAX_FRAME_DATA: usize = 250;
/// Maximum serialized frame size (header + data + CRCs).
pub const MAX_FRAME_SIZE: usize = 292;
/// Lowest broadcast address; 0xFFFD..=0xFFFF all broadcast.
/// Device addresses run 0..=0xFFFC.
pub const BROADCAST_FLOOR: u16 = 0xFFFD;

const HEADER_SIZE: usize = 10;
const BLOCK_SIZE: usize = 16;

/// Return `true` for any of the three broadcast addresses.
pub const fn is_broadcast(address: u16) -> bool {
    address >= BROADCAST_FLOOR
}

/// Primary-station link function codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum PrimaryFunction {
    /// Reset the remote link.
    ResetLink = 0,
    /// Test the link.
    TestLink = 2,
    /// User data requiring a link-layer confirm.
    ConfirmedUserData = 3,
    /// User data without link-layer confirm.
    UnconfirmedUserData = 4,
    /// Ask for the remote link status.
    RequestLinkStatus = 9,
}

/// Secondary-station link function codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum SecondaryFunction {
    /// Positive acknowledgement.
    Ack = 0,
    /// Negative acknowledgement.
    Nack = 1,
    /// Link status report.
    LinkStatus = 11,
    /// The requested service is not supported.
    NotSupported = 15,
}

/// A link function, qualified by the PRM bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFunction {
    /// PRM = 1.
    Primary(PrimaryFunction),
    /// PRM = 0.
    Secondary(SecondaryFunction),
}

/// The decoded CTL octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkControl {
    /// Direction bit; set on frames from the master side.
    pub dir: bool,
    /// Frame count bit, toggled on confirmed primary frames.
    pub fcb: bool,
    /// Frame count valid bit.
    pub fcv: bool,
    /// Function code, carrying the PRM bit.
    pub function: LinkFunction,
}

impl LinkControl {
    /// Control octet for unconfirmed user data.
    pub const fn user_data(dir: bool) -> Self {
        Self {
            dir,
            fcb: false,
            fcv: false,
            function: LinkFunction::Primary(PrimaryFunction::UnconfirmedUserData),
        }
    }

    /// Encode into the CTL octet.
    pub fn encode(&self) -> u8 {
        let (prm, code) = match self.function {
            LinkFunction::Primary(f) => (true, f as u8),
            LinkFunction::Secondary(f) => (false, f as u8),
        };
        let mut ctl = code & 0x0F;
        if self.dir {
            ctl |= 0x80;
        }
        if prm {
            ctl |= 0x40;
        }
        if self.fcb {
            ctl |= 0x20;
        }
        if self.fcv {
            ctl |= 0x10;
        }
        ctl
    }

    /// Decode from the CTL octet.
    pub fn decode(ctl: u8) -> Result<Self, FrameError> {
        let code = ctl & 0x0F;
        let function = if ctl & 0x40 != 0 {
            LinkFunction::Primary(
                PrimaryFunction::try_from(code)
                    .map_err(|_| FrameError::UnsupportedFunction(code))?,
            )
        } else {
            LinkFunction::Secondary(
                SecondaryFunction::try_from(code)
                    .map_err(|_| FrameError::UnsupportedFunction(code))?,
            )
        };
        Ok(Self {
            dir: ctl & 0x80 != 0,
            fcb: ctl & 0x20 != 0,
            fcv: ctl & 0x10 != 0,
            function,
        })
    }
}

/// One data-link frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded control octet.
    pub control: LinkControl,
    /// Destination link address.
    pub destination: u16,
    /// Source link address.
    pub source: u16,
    /// User data, at most [`MAX_FRAME_DATA`] octets.
    pub data: Vec<u8>,
}

impl Frame {
    /// Build an unconfirmed user-data frame.
    pub fn user_data(dir: bool, destination: u16, source: u16, data: Vec<u8>) -> Self {
        Self {
            control: LinkControl::user_data(dir),
            destination,
            source,
            data,
        }
    }

    /// Build a data-less control frame.
    pub const fn control_frame(control: LinkControl, destination: u16, source: u16) -> Self {
        Self {
            control,
            destination,
            source,
            data: Vec::new(),
        }
    }

    /// Serialize with header CRC and per-block data CRCs.
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(self.data.len() <= MAX_FRAME_DATA);
        let mut out = Vec::with_capacity(MAX_FRAME_SIZE);
        out.push(0x05);
        out.push(0x64);
        out.push((self.data.len() + 5) as u8);
        out.push(self.control.encode());
        out.extend_from_slice(&self.destination.to_le_bytes());
        out.extend_from_slice(&self.source.to_le_bytes());
        let header = out.clone();
        crc::append(&mut out, &header);
        for block in self.data.chunks(BLOCK_SIZE) {
            out.extend_from_slice(block);
            crc::append(&mut out, block);
        }
        out
    }
}

/// Streaming frame decoder over raw connection bytes.
#[derive(Debug, Default)]
pub struct FrameCodec {
    buf: Vec<u8>,
}

impl FrameCodec {
    /// Empty codec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes from the connection.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Try to decode the next frame.
    ///
    /// `Ok(None)` means more bytes are needed. An error reports one bad
    /// frame; the bad bytes are already discarded, so decoding can simply
    /// continue.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.buf.len() < 2 {
            return Ok(None);
        }
        if self.buf[0] != 0x05 || self.buf[1] != 0x64 {
            let start = u16::from_be_bytes([self.buf[0], self.buf[1]]);
            self.buf.remove(0);
            return Err(FrameError::InvalidStartField(start));
        }
        if self.buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let length = self.buf[2];
        if length < 5 {
            self.buf.drain(..HEADER_SIZE);
            return Err(FrameError::InvalidFrameLength(length));
        }
        if !crc::verify(&self.buf[..8], [self.buf[8], self.buf[9]]) {
            self.buf.remove(0);
            return Err(FrameError::BadCrc);
        }

        let data_len = length as usize - 5;
        let block_count = data_len.div_ceil(BLOCK_SIZE);
        let total = HEADER_SIZE + data_len + 2 * block_count;
        if self.buf.len() < total {
            return Ok(None);
        }

        let control = match LinkControl::decode(self.buf[3]) {
            Ok(control) => control,
            Err(error) => {
                self.buf.drain(..total);
                return Err(error);
            }
        };
        let destination = LittleEndian::read_u16(&self.buf[4..6]);
        let source = LittleEndian::read_u16(&self.buf[6..8]);

        let mut data = Vec::with_capacity(data_len);
        let mut at = HEADER_SIZE;
        let mut remaining = data_len;
        while remaining > 0 {
            let take = remaining.min(BLOCK_SIZE);
            let block = &self.buf[at..at + take];
            let crc_bytes = [self.buf[at + take], self.buf[at + take + 1]];
            if !crc::verify(block, crc_bytes) {
                self.buf.drain(..total);
                return Err(FrameError::BadCrc);
            }
            data.extend_from_slice(block);
            at += take + 2;
            remaining -= take;
        }

        self.buf.drain(..total);
        Ok(Some(Frame {
            control,
            destination,
            source,
            data,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(data: Vec<u8>) -> Frame {
        let frame = Frame::user_data(true, 0x0004, 0x0001, data);
        let bytes = frame.encode();
        assert!(bytes.len() <= MAX_FRAME_SIZE);
        let mut codec = FrameCodec::new();
        codec.push(&bytes);
        let decoded = codec.next_frame().unwrap().unwrap();
        assert_eq!(decoded, frame);
        decoded
    }

    #[test]
    fn empty_frame_has_no_data_blocks() {
        let frame = Frame::control_frame(LinkControl::user_data(true), 2, 1);
        let bytes = frame.encode();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(bytes[2], 5);
    }

    #[test]
    fn full_frame_round_trips() {
        let data: Vec<u8> = (0..MAX_FRAME_DATA as u8).map(|i| i.wrapping_mul(7)).collect();
        round_trip(data);
    }

    #[test]
    fn short_frame_round_trips() {
        round_trip(vec![0xAA]);
        round_trip(vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]);
    }

    #[test]
    fn any_flipped_bit_is_caught() {
        let frame = Frame::user_data(false, 10, 20, vec![9; 40]);
        let clean = frame.encode();
        for at in 0..clean.len() {
            let mut corrupted = clean.clone();
            corrupted[at] ^= 0x04;
            let mut codec = FrameCodec::new();
            codec.push(&corrupted);
            match codec.next_frame() {
                Err(_) => {}
                Ok(Some(decoded)) => panic!("corruption at {at} went unnoticed: {decoded:?}"),
                Ok(None) => {}
            }
        }
    }

    #[test]
    fn partial_input_waits_for_more() {
        let frame = Frame::user_data(true, 2, 1, vec![5; 30]);
        let bytes = frame.encode();
        let mut codec = FrameCodec::new();
        codec.push(&bytes[..12]);
        assert_eq!(codec.next_frame().unwrap(), None);
        codec.push(&bytes[12..]);
        assert_eq!(codec.next_frame().unwrap(), Some(frame));
    }

    #[test]
    fn control_octet_round_trips() {
        let control = LinkControl {
            dir: true,
            fcb: true,
            fcv: true,
            function: LinkFunction::Primary(PrimaryFunction::ConfirmedUserData),
        };
        assert_eq!(LinkControl::decode(control.encode()).unwrap(), control);
        assert_eq!(control.encode(), 0xF3);
    }

    #[test]
    fn back_to_back_frames_decode() {
        let first = Frame::user_data(true, 2, 1, vec![1, 2, 3]);
        let second = Frame::user_data(true, 2, 1, vec![4, 5]);
        let mut codec = FrameCodec::new();
        codec.push(&first.encode());
        codec.push(&second.encode());
        assert_eq!(codec.next_frame().unwrap(), Some(first));
        assert_eq!(codec.next_frame().unwrap(), Some(second));
    }
}
