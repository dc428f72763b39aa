//! Wire data types a point can be bound to.

/// Data type binding of a point on a remote protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DataType {
    /// Single bit.
    Boolean,
    /// Two-bit (double-bit) state.
    DoubleBit,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 16-bit unsigned counter.
    Counter16,
    /// 32-bit unsigned counter.
    Counter32,
    /// Single-precision float.
    Float32,
    /// Double-precision float.
    Float64,
}

impl DataType {
    /// Parse from a configuration attribute value.
    pub fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_uppercase().as_str() {
            "BOOLEAN" | "BIT" => Some(Self::Boolean),
            "DOUBLE_BIT" => Some(Self::DoubleBit),
            "INT16" | "SHORT" => Some(Self::Int16),
            "INT32" | "INT" => Some(Self::Int32),
            "COUNTER16" => Some(Self::Counter16),
            "COUNTER32" | "COUNTER" => Some(Self::Counter32),
            "FLOAT32" | "FLOAT" => Some(Self::Float32),
            "FLOAT64" | "DOUBLE" => Some(Self::Float64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_aliases() {
        assert_eq!(DataType::parse("int16"), Some(DataType::Int16));
        assert_eq!(DataType::parse("FLOAT32"), Some(DataType::Float32));
        assert_eq!(DataType::parse("wat"), None);
    }
}
