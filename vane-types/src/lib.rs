//! Atomic types shared by the vane processing cores.
//!
//! The RPN compute engine and the DNP3 protocol core both move the same
//! currency around: tagged runtime [`Value`]s, time-series [`PointValue`]s
//! and the 100-nanosecond [`Stamp`] time abstraction.

#![warn(missing_docs)]

mod data_type;
mod point;
mod time;
mod value;

pub use data_type::DataType;
pub use point::{PointId, PointValue, State};
pub use time::{
    DateTimeContext, Elapsed, Stamp, TimeField, UnknownZone, TICKS_PER_DAY, TICKS_PER_MILLI,
    TICKS_PER_SECOND,
};
pub use value::{ComplexValue, Dict, Tuple, Value, ValueClass};

/// Commonly used types, re-exported in one place.
pub mod prelude {
    pub use crate::data_type::DataType;
    pub use crate::point::{PointId, PointValue, State};
    pub use crate::time::{DateTimeContext, Elapsed, Stamp, TimeField};
    pub use crate::value::{ComplexValue, Dict, Tuple, Value, ValueClass};
}
