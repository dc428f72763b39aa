//! DNP3 protocol core: master/outstation over the three-layer stack.
//!
//! The layers compose bottom-up: [`link`] frames with CRCs, the
//! [`transport`] function segmenting fragments, and the [`app`] layer
//! carrying function codes, internal indications and object items encoded
//! through the [`objects`] catalog. [`endpoint`] owns connections and
//! associations; [`master`] and [`outstation`] implement the role logic.

#![warn(missing_docs)]

pub mod app;
pub mod association;
pub mod config;
pub mod crc;
pub mod endpoint;
pub mod error;
pub mod link;
pub mod master;
pub mod objects;
pub mod outstation;
pub mod transport;

pub use app::{AppControl, Fragment, FunctionCode, Iin, Item, Range, DEVICE_RESTART_CODE};
pub use association::Association;
pub use config::{Attributes, PointConfig, RemoteConfig};
pub use endpoint::{loopback_pair, Connection, ConnectionManager, RemoteEndpoint};
pub use error::{AppError, ConfigError, FrameError, ObjectError, ServiceError, TransportError};
pub use link::{Frame, FrameCodec};
pub use master::Master;
pub use objects::{ObjectDescriptor, ObjectInstance, PointType};
pub use outstation::{Outstation, OutstationHandle};

/// Commonly used protocol types, re-exported in one place.
pub mod prelude {
    pub use crate::app::{Fragment, FunctionCode, Iin, Item, Range};
    pub use crate::config::{Attributes, PointConfig, RemoteConfig};
    pub use crate::endpoint::{loopback_pair, Connection, ConnectionManager};
    pub use crate::error::ServiceError;
    pub use crate::master::Master;
    pub use crate::objects::{ObjectInstance, PointType};
    pub use crate::outstation::Outstation;
    pub use vane_types::prelude::*;
}
