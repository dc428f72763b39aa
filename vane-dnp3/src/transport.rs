//! Transport function: fragment segmentation and reassembly.
//!
//! Each segment starts with one header octet: `FIR (bit 7) | FIN (bit 6) |
//! sequence (bits 0..5)`. Segments carry at most 249 user octets so the
//! whole segment fits a 250-octet link frame.

use crate::error::TransportError;
use crate::link::MAX_FRAME_DATA;

/// Maximum user octets in one segment (250 minus the header octet).
pub const MAX_SEGMENT_DATA: usize = MAX_FRAME_DATA - 1;

/// Default fragment cap on the master side.
pub const MASTER_MAX_FRAGMENT: usize = 2048;
/// Minimum fragment cap an outstation must accept.
pub const OUTSTATION_MIN_FRAGMENT: usize = 249;

const FIR: u8 = 0x80;
const FIN: u8 = 0x40;
const SEQ_MASK: u8 = 0x3F;

/// Sending side: splits fragments into numbered segments.
#[derive(Debug, Default)]
pub struct TransportTx {
    sequence: u8,
}

impl TransportTx {
    /// Fresh sender with sequence zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Split one fragment into wire-ready segments.
    ///
    /// The first segment carries FIR, the last FIN; a short fragment gets
    /// both on a single segment. The 6-bit sequence continues across
    /// fragments.
    pub fn split(&mut self, fragment: &[u8]) -> Vec<Vec<u8>> {
        let mut segments = Vec::new();
        let chunks: Vec<&[u8]> = if fragment.is_empty() {
            vec![&[][..]]
        } else {
            fragment.chunks(MAX_SEGMENT_DATA).collect()
        };
        let last = chunks.len() - 1;
        for (index, chunk) in chunks.into_iter().enumerate() {
            let mut header = self.sequence & SEQ_MASK;
            if index == 0 {
                header |= FIR;
            }
            if index == last {
                header |= FIN;
            }
            self.sequence = (self.sequence + 1) & SEQ_MASK;
            let mut segment = Vec::with_capacity(chunk.len() + 1);
            segment.push(header);
            segment.extend_from_slice(chunk);
            segments.push(segment);
        }
        segments
    }
}

/// Receiving side: reassembles segments into fragments.
#[derive(Debug)]
pub struct TransportRx {
    buffer: Vec<u8>,
    expected: Option<u8>,
    max_fragment: usize,
}

impl TransportRx {
    /// Fresh receiver with the given fragment cap.
    pub fn new(max_fragment: usize) -> Self {
        Self {
            buffer: Vec::new(),
            expected: None,
            max_fragment,
        }
    }

    /// Feed one segment; returns the completed fragment on FIN.
    ///
    /// A FIR segment always restarts assembly. Errors drop the partial
    /// fragment and reset the receiver.
    pub fn feed(&mut self, segment: &[u8]) -> Result<Option<Vec<u8>>, TransportError> {
        let (&header, data) = segment.split_first().ok_or(TransportError::EmptySegment)?;
        let sequence = header & SEQ_MASK;
        let fir = header & FIR != 0;
        let fin = header & FIN != 0;

        if fir {
            self.buffer.clear();
        } else {
            match self.expected {
                None => return Err(self.reset(TransportError::InvertedFirBit)),
                Some(expected) if expected != sequence => {
                    return Err(self.reset(TransportError::UnexpectedSegmentSequence {
                        expected,
                        got: sequence,
                    }))
                }
                Some(_) => {}
            }
        }

        if self.buffer.len() + data.len() > self.max_fragment {
            return Err(self.reset(TransportError::FragmentBufferOverflow {
                limit: self.max_fragment,
            }));
        }
        self.buffer.extend_from_slice(data);

        if fin {
            self.expected = None;
            return Ok(Some(std::mem::take(&mut self.buffer)));
        }
        self.expected = Some((sequence + 1) & SEQ_MASK);
        Ok(None)
    }

    fn reset(&mut self, error: TransportError) -> TransportError {
        self.buffer.clear();
        self.expected = None;
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(len: usize) {
        let fragment: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut tx = TransportTx::new();
        let mut rx = TransportRx::new(MASTER_MAX_FRAGMENT.max(len));
        let segments = tx.split(&fragment);
        for segment in &segments {
            assert!(segment.len() <= MAX_FRAME_DATA);
        }
        let mut result = None;
        for segment in &segments {
            if let Some(done) = rx.feed(segment).unwrap() {
                result = Some(done);
            }
        }
        assert_eq!(result.unwrap(), fragment);
    }

    #[test]
    fn round_trips_across_sizes() {
        for len in [0usize, 1, 249, 250, 500, 600, 2048] {
            round_trip(len);
        }
    }

    #[test]
    fn segment_count_for_600_octets() {
        let mut tx = TransportTx::new();
        let segments = tx.split(&vec![0u8; 600]);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].len(), 250);
        assert_eq!(segments[1].len(), 250);
        assert_eq!(segments[2].len(), 600 - 2 * MAX_SEGMENT_DATA + 1);
        assert!(segments[0][0] & 0x80 != 0, "first segment carries FIR");
        assert!(segments[2][0] & 0x40 != 0, "last segment carries FIN");
    }

    #[test]
    fn sequence_wraps_modulo_64() {
        let mut tx = TransportTx::new();
        for _ in 0..63 {
            tx.split(&[0]);
        }
        let segments = tx.split(&[0]);
        assert_eq!(segments[0][0] & 0x3F, 63);
        let segments = tx.split(&[0]);
        assert_eq!(segments[0][0] & 0x3F, 0);
    }

    #[test]
    fn missing_fir_is_rejected() {
        let mut rx = TransportRx::new(1024);
        let error = rx.feed(&[0x00, 1, 2]).unwrap_err();
        assert_eq!(error, TransportError::InvertedFirBit);
    }

    #[test]
    fn sequence_gap_is_rejected() {
        let mut tx = TransportTx::new();
        let mut rx = TransportRx::new(4096);
        let segments = tx.split(&vec![7u8; 600]);
        rx.feed(&segments[0]).unwrap();
        let error = rx.feed(&segments[2]).unwrap_err();
        assert!(matches!(
            error,
            TransportError::UnexpectedSegmentSequence { expected: 1, got: 2 }
        ));
    }

    #[test]
    fn overflow_is_rejected() {
        let mut tx = TransportTx::new();
        let mut rx = TransportRx::new(100);
        let segments = tx.split(&vec![1u8; 300]);
        let error = segments
            .iter()
            .find_map(|segment| rx.feed(segment).err())
            .unwrap();
        assert_eq!(
            error,
            TransportError::FragmentBufferOverflow { limit: 100 }
        );
    }
}
