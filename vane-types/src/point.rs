//! Point identity and point values.

use std::fmt;

use crate::time::Stamp;
use crate::value::Value;

const POINT_ID_LEN: usize = 16;

/// Opaque 128-bit point identity.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct PointId([u8; POINT_ID_LEN]);

impl PointId {
    /// Memory size of the identity.
    pub const LEN: usize = POINT_ID_LEN;

    /// Build from raw bytes.
    pub const fn new(bytes: [u8; POINT_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw byte view.
    pub const fn as_bytes(&self) -> &[u8; POINT_ID_LEN] {
        &self.0
    }
}

impl From<u128> for PointId {
    fn from(raw: u128) -> Self {
        Self(raw.to_be_bytes())
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A named state attached to a point value, with an optional code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct State {
    name: String,
    code: Option<i32>,
}

/// Name of the deletion sentinel state.
const DELETED_STATE: &str = "deleted";

impl State {
    /// Build a state from a name and an optional code.
    pub fn new(name: impl Into<String>, code: Option<i32>) -> Self {
        Self {
            name: name.into(),
            code,
        }
    }

    /// The sentinel state representing a deleted value.
    pub fn deleted() -> Self {
        Self::new(DELETED_STATE, None)
    }

    /// State name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Optional state code.
    pub const fn code(&self) -> Option<i32> {
        self.code
    }

    /// Return `true` if this is the deletion sentinel.
    pub fn is_deleted(&self) -> bool {
        self.name == DELETED_STATE
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} ({code})", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
/// One observation of a point: identity, stamp, optional state and value.
pub struct PointValue {
    point: PointId,
    stamp: Stamp,
    state: Option<State>,
    value: Value,
}

impl PointValue {
    /// Build a point value.
    pub fn new(point: PointId, stamp: Stamp, state: Option<State>, value: Value) -> Self {
        Self {
            point,
            stamp,
            state,
            value,
        }
    }

    /// A deletion marker for a point at a stamp.
    pub fn deleted(point: PointId, stamp: Stamp) -> Self {
        Self::new(point, stamp, Some(State::deleted()), Value::Null)
    }

    /// Identity of the observed point.
    pub const fn point(&self) -> PointId {
        self.point
    }

    /// Time of the observation.
    pub const fn stamp(&self) -> Stamp {
        self.stamp
    }

    /// Attached state, when present.
    pub const fn state(&self) -> Option<&State> {
        self.state.as_ref()
    }

    /// Observed value.
    pub const fn value(&self) -> &Value {
        &self.value
    }

    /// Replace the stamp.
    pub fn set_stamp(&mut self, stamp: Stamp) {
        self.stamp = stamp;
    }

    /// Replace the state.
    pub fn set_state(&mut self, state: Option<State>) {
        self.state = state;
    }

    /// Replace the value.
    pub fn set_value(&mut self, value: Value) {
        self.value = value;
    }

    /// Consume into the observed value.
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Return `true` if this observation is the deletion sentinel.
    pub fn is_deleted(&self) -> bool {
        self.state.as_ref().is_some_and(State::is_deleted)
    }
}

impl fmt::Display for PointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.point, self.stamp)?;
        if let Some(state) = &self.state {
            write!(f, " [{state}]")?;
        }
        write!(f, " = {}", self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deletion_sentinel() {
        let pv = PointValue::deleted(PointId::from(7), Stamp::from_ticks(0));
        assert!(pv.is_deleted());
        assert_eq!(pv.value(), &Value::Null);

        let live = PointValue::new(
            PointId::from(7),
            Stamp::from_ticks(0),
            None,
            Value::from(1i64),
        );
        assert!(!live.is_deleted());
    }

    #[test]
    fn point_id_display() {
        let id = PointId::from(0xff);
        assert_eq!(id.to_string(), "000000000000000000000000000000ff");
    }
}
