//! Protocol and service error implementation.

use thiserror::Error;

/// Data-link frame decode errors.
///
/// Frame-level errors are logged and the frame dropped; they never tear
/// down the connection by themselves.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The two start octets were not `05 64`.
    #[error("invalid start field: {0:#06x}")]
    InvalidStartField(u16),
    /// The length octet fell outside 5..=255.
    #[error("invalid frame length: {0}")]
    InvalidFrameLength(u8),
    /// A header or data-block CRC failed.
    #[error("bad CRC")]
    BadCrc,
    /// The frame ended before its declared length.
    #[error("truncated frame")]
    Truncated,
    /// The link function code is not used by this implementation.
    #[error("unsupported link function: {0}")]
    UnsupportedFunction(u8),
}

/// Transport-function reassembly errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// A non-first segment arrived with FIR set, or vice versa.
    #[error("inverted FIR bit")]
    InvertedFirBit,
    /// A segment broke the 6-bit sequence chain.
    #[error("unexpected segment sequence: expected {expected}, got {got}")]
    UnexpectedSegmentSequence {
        /// The sequence the chain required.
        expected: u8,
        /// The sequence that arrived.
        got: u8,
    },
    /// The reassembled fragment would exceed the configured maximum.
    #[error("fragment buffer overflow past {limit} octets")]
    FragmentBufferOverflow {
        /// The configured fragment cap.
        limit: usize,
    },
    /// A segment carried no transport header.
    #[error("empty segment")]
    EmptySegment,
}

/// Application-layer fragment errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    /// The fragment ended inside a header or object.
    #[error("truncated fragment")]
    Truncated,
    /// The function code octet is not a known function.
    #[error("unknown function code: {0}")]
    UnknownFunctionCode(u8),
    /// The qualifier's prefix code is not a known prefix.
    #[error("unknown prefix code: {0}")]
    UnknownPrefixCode(u8),
    /// The qualifier's range code is not a known range.
    #[error("unknown range code: {0}")]
    UnknownRangeCode(u8),
    /// Object decode failed.
    #[error(transparent)]
    Object(#[from] ObjectError),
}

/// Object catalog errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectError {
    /// The group octet matches no catalog entry.
    #[error("unknown group: {0}")]
    UnknownGroup(u8),
    /// The variation octet matches no entry under its group.
    #[error("unknown variation {variation} of group {group}")]
    UnknownVariation {
        /// Object group.
        group: u8,
        /// Requested variation.
        variation: u8,
    },
    /// The buffer ended inside an object.
    #[error("truncated object data")]
    Truncated,
    /// An instance cannot be encoded with the requested variation.
    #[error("value does not fit group {group} variation {variation}")]
    ValueMismatch {
        /// Object group.
        group: u8,
        /// Requested variation.
        variation: u8,
    },
}

/// Service-level errors surfaced to read/write callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The remote endpoint could not be reached.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// No reply arrived within the reply timeout.
    #[error("reply timeout")]
    ReplyTimeout,
    /// The service is closed or the transaction was cancelled.
    #[error("service not available")]
    ServiceNotAvailable,
    /// The response carried items the request did not ask for.
    #[error("unexpected response items")]
    UnexpectedResponseItems,
    /// The peer rejected the request.
    #[error("request refused: {0}")]
    Refused(String),
}

/// Endpoint configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An attribute value could not be parsed.
    #[error("bad attribute {name}: {value}")]
    BadAttribute {
        /// Attribute name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
    /// A wildcard remote was combined with other remotes.
    #[error("a wildcard remote address must be the only remote")]
    WildcardNotAlone,
    /// A logical device address fell outside the device range.
    #[error("address {0} outside 0..=0xFFFC")]
    AddressOutOfRange(u32),
}
