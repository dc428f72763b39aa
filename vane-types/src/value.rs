//! Tagged runtime values.

use std::collections::BTreeMap;
use std::fmt;

use num_bigint::BigInt;
use num_complex::Complex64;
use num_rational::{BigRational, Rational64};

use crate::point::{PointValue, State};
use crate::time::{Elapsed, Stamp};

/// Ordered sequence of values.
pub type Tuple = Vec<Value>;

/// String-keyed value map. Keys are unique; iteration follows key order.
pub type Dict = BTreeMap<String, Value>;

/// A complex number, kept in the form it was created with.
///
/// Arithmetic is carried out in cartesian form; the polar form is preserved
/// so `split` and display can give back magnitude and angle unchanged.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ComplexValue {
    /// Real and imaginary parts.
    Cartesian(Complex64),
    /// Magnitude and angle (radians).
    Polar {
        /// Modulus of the number.
        magnitude: f64,
        /// Argument of the number, in radians.
        angle: f64,
    },
}

impl ComplexValue {
    /// The imaginary unit, in cartesian form.
    pub const I: Self = Self::Cartesian(Complex64::new(0.0, 1.0));

    /// Cartesian view of this number.
    pub fn cartesian(&self) -> Complex64 {
        match *self {
            Self::Cartesian(c) => c,
            Self::Polar { magnitude, angle } => Complex64::from_polar(magnitude, angle),
        }
    }

    /// Return `true` if this number was created in polar form.
    pub const fn is_polar(&self) -> bool {
        matches!(self, Self::Polar { .. })
    }

    /// Polar view of this number as `(magnitude, angle)`.
    pub fn polar(&self) -> (f64, f64) {
        match *self {
            Self::Cartesian(c) => c.to_polar(),
            Self::Polar { magnitude, angle } => (magnitude, angle),
        }
    }
}

impl From<Complex64> for ComplexValue {
    fn from(c: Complex64) -> Self {
        Self::Cartesian(c)
    }
}

impl fmt::Display for ComplexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Cartesian(c) => {
                if c.im < 0.0 {
                    write!(f, "{}{}j", c.re, c.im)
                } else {
                    write!(f, "{}+{}j", c.re, c.im)
                }
            }
            Self::Polar { magnitude, angle } => write!(f, "({}:{})", magnitude, angle),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
/// The tagged runtime datum pushed on the VM stack.
///
/// Implemented as a closed sum type; operations pattern-match on the tag.
pub enum Value {
    /// The absent value.
    Null,
    /// Boolean truth value.
    Boolean(bool),
    /// 64-bit signed integer.
    Long(i64),
    /// IEEE-754 double.
    Double(f64),
    /// Arbitrary-precision integer.
    BigInteger(BigInt),
    /// Ratio of two 64-bit integers.
    Rational(Rational64),
    /// Ratio of two arbitrary-precision integers.
    BigRational(BigRational),
    /// Complex number, cartesian or polar.
    Complex(ComplexValue),
    /// UTF-8 string.
    Str(String),
    /// A point in time.
    DateTime(Stamp),
    /// A span of time.
    Elapsed(Elapsed),
    /// A named state, with an optional code.
    State(State),
    /// Ordered sequence of values.
    Tuple(Tuple),
    /// String-keyed map of values.
    Dict(Dict),
    /// An opaque point-value reference.
    Point(Box<PointValue>),
}

/// Coarse classification of values, used by stack type filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueClass {
    /// Matches any present value.
    Any,
    /// Matches `Value::Null`.
    Null,
    /// Matches booleans.
    Boolean,
    /// Matches 64-bit integers.
    Long,
    /// Matches doubles.
    Double,
    /// Matches big integers.
    BigInteger,
    /// Matches `Long` or `BigInteger`.
    Integer,
    /// Matches 64-bit rationals.
    Rational,
    /// Matches big rationals.
    BigRational,
    /// Matches complex numbers.
    Complex,
    /// Matches any numeric value.
    Number,
    /// Matches strings.
    Str,
    /// Matches date-times.
    DateTime,
    /// Matches elapsed times.
    Elapsed,
    /// Matches states.
    State,
    /// Matches tuples.
    Tuple,
    /// Matches dicts.
    Dict,
    /// Matches tuples or dicts.
    Container,
    /// Matches point-value references.
    Point,
}

impl Value {
    /// Short name of this value's type, as used in diagnostics.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Long(_) => "long",
            Self::Double(_) => "double",
            Self::BigInteger(_) => "bigint",
            Self::Rational(_) => "rational",
            Self::BigRational(_) => "bigrational",
            Self::Complex(_) => "complex",
            Self::Str(_) => "string",
            Self::DateTime(_) => "datetime",
            Self::Elapsed(_) => "elapsed",
            Self::State(_) => "state",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Point(_) => "point",
        }
    }

    /// Return `true` if this is the null value.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Return `true` if this value is numeric.
    pub const fn is_number(&self) -> bool {
        matches!(
            self,
            Self::Long(_)
                | Self::Double(_)
                | Self::BigInteger(_)
                | Self::Rational(_)
                | Self::BigRational(_)
                | Self::Complex(_)
        )
    }

    /// Test this value against a class.
    pub const fn is(&self, class: ValueClass) -> bool {
        match class {
            ValueClass::Any => true,
            ValueClass::Null => matches!(self, Self::Null),
            ValueClass::Boolean => matches!(self, Self::Boolean(_)),
            ValueClass::Long => matches!(self, Self::Long(_)),
            ValueClass::Double => matches!(self, Self::Double(_)),
            ValueClass::BigInteger => matches!(self, Self::BigInteger(_)),
            ValueClass::Integer => matches!(self, Self::Long(_) | Self::BigInteger(_)),
            ValueClass::Rational => matches!(self, Self::Rational(_)),
            ValueClass::BigRational => matches!(self, Self::BigRational(_)),
            ValueClass::Complex => matches!(self, Self::Complex(_)),
            ValueClass::Number => self.is_number(),
            ValueClass::Str => matches!(self, Self::Str(_)),
            ValueClass::DateTime => matches!(self, Self::DateTime(_)),
            ValueClass::Elapsed => matches!(self, Self::Elapsed(_)),
            ValueClass::State => matches!(self, Self::State(_)),
            ValueClass::Tuple => matches!(self, Self::Tuple(_)),
            ValueClass::Dict => matches!(self, Self::Dict(_)),
            ValueClass::Container => matches!(self, Self::Tuple(_) | Self::Dict(_)),
            ValueClass::Point => matches!(self, Self::Point(_)),
        }
    }

    /// Truth value of this datum, if it has one.
    ///
    /// Booleans map to themselves; null is absent.
    pub const fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// The contained long, if this is one.
    pub const fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(l) => Some(*l),
            _ => None,
        }
    }

    /// The contained string slice, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(l: i64) -> Self {
        Self::Long(l)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Self::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<BigInt> for Value {
    fn from(i: BigInt) -> Self {
        Self::BigInteger(i)
    }
}

impl From<Rational64> for Value {
    fn from(r: Rational64) -> Self {
        Self::Rational(r)
    }
}

impl From<BigRational> for Value {
    fn from(r: BigRational) -> Self {
        Self::BigRational(r)
    }
}

impl From<Complex64> for Value {
    fn from(c: Complex64) -> Self {
        Self::Complex(ComplexValue::Cartesian(c))
    }
}

impl From<Stamp> for Value {
    fn from(s: Stamp) -> Self {
        Self::DateTime(s)
    }
}

impl From<Elapsed> for Value {
    fn from(e: Elapsed) -> Self {
        Self::Elapsed(e)
    }
}

impl From<PointValue> for Value {
    fn from(p: PointValue) -> Self {
        Self::Point(Box::new(p))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Long(l) => write!(f, "{l}"),
            Self::Double(d) => write!(f, "{d}"),
            Self::BigInteger(i) => write!(f, "{i}"),
            Self::Rational(r) => write!(f, "{}/{}", r.numer(), r.denom()),
            Self::BigRational(r) => write!(f, "{}/{}", r.numer(), r.denom()),
            Self::Complex(c) => write!(f, "{c}"),
            Self::Str(s) => f.write_str(s),
            Self::DateTime(s) => write!(f, "{s}"),
            Self::Elapsed(e) => write!(f, "{e}"),
            Self::State(s) => write!(f, "{s}"),
            Self::Tuple(t) => {
                f.write_str("(")?;
                for (i, v) in t.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str(")")
            }
            Self::Dict(d) => {
                f.write_str("{")?;
                for (i, (k, v)) in d.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Self::Point(p) => write!(f, "{p}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_matching() {
        assert!(Value::Long(1).is(ValueClass::Integer));
        assert!(Value::BigInteger(BigInt::from(1)).is(ValueClass::Integer));
        assert!(!Value::Double(1.0).is(ValueClass::Integer));
        assert!(Value::Double(1.0).is(ValueClass::Number));
        assert!(Value::Tuple(vec![]).is(ValueClass::Container));
        assert!(Value::Null.is(ValueClass::Any));
    }

    #[test]
    fn complex_forms() {
        let c = ComplexValue::Polar {
            magnitude: 2.0,
            angle: 0.0,
        };
        assert_eq!(c.cartesian(), Complex64::new(2.0, 0.0));
        assert!(c.is_polar());
    }

    #[test]
    fn display_is_stable() {
        assert_eq!(Value::from(3i64).to_string(), "3");
        assert_eq!(
            Value::Tuple(vec![Value::from(1i64), Value::Null]).to_string(),
            "(1, null)"
        );
    }

    #[test]
    fn values_serialize() {
        let value = Value::Tuple(vec![
            Value::Long(1),
            Value::Str("x".into()),
            Value::BigInteger(BigInt::from(7)),
            Value::Rational(Rational64::new(1, 3)),
        ]);
        let json = serde_json::to_string(&value).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
