//! Typed operation tables, one module per value domain.
//!
//! Every module follows the same dispatch shape: an internal opcode enum,
//! a `register` function that links the module's names (with acceptance
//! filters) into the registry, and an `execute` that switches on the
//! opcode. The cross-module [`Op`] wrapper is what the registry stores.

use num_bigint::BigInt;
use num_complex::Complex64;
use num_rational::{BigRational, Rational64};
use num_traits::ToPrimitive;

use vane_types::Value;

use crate::error::ExecuteError;
use crate::registry::Registry;
use crate::task::{Flow, Task};

pub mod basic;
pub mod bignum;
pub mod boolean;
pub mod complex;
pub mod container;
pub mod datetime;
pub mod double;
pub mod long;
pub mod rational;
pub mod stack_ops;
pub mod string_ops;

/// A registered operation: the module and its internal opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Context I/O and control primitives.
    Basic(basic::Opcode),
    /// Stack manipulation.
    Stack(stack_ops::Opcode),
    /// Boolean logic.
    Boolean(boolean::Opcode),
    /// 64-bit integer arithmetic.
    Long(long::Opcode),
    /// IEEE-754 double arithmetic.
    Double(double::Opcode),
    /// Arbitrary-precision integers.
    Bignum(bignum::Opcode),
    /// Rationals and big rationals.
    Rational(rational::Opcode),
    /// Complex numbers.
    Complex(complex::Opcode),
    /// Strings and formatting.
    Str(string_ops::Opcode),
    /// Date-times and elapsed times.
    DateTime(datetime::Opcode),
    /// Applying-container operations.
    Container(container::Opcode),
}

/// Register every built-in module.
///
/// The order is fixed: it decides overload precedence for shared names
/// (chains are scanned newest first), and it is part of the contract.
pub fn register_all(registry: &mut Registry) {
    basic::register(registry);
    stack_ops::register(registry);
    boolean::register(registry);
    long::register(registry);
    double::register(registry);
    bignum::register(registry);
    rational::register(registry);
    complex::register(registry);
    string_ops::register(registry);
    datetime::register(registry);
    container::register(registry);
}

/// Execute one resolved operation.
pub fn execute(task: &mut Task<'_>, op: Op) -> Result<Flow, ExecuteError> {
    match op {
        Op::Basic(code) => basic::execute(task, code),
        Op::Stack(code) => stack_ops::execute(task, code),
        Op::Boolean(code) => boolean::execute(task, code),
        Op::Long(code) => long::execute(task, code),
        Op::Double(code) => double::execute(task, code),
        Op::Bignum(code) => bignum::execute(task, code),
        Op::Rational(code) => rational::execute(task, code),
        Op::Complex(code) => complex::execute(task, code),
        Op::Str(code) => string_ops::execute(task, code),
        Op::DateTime(code) => datetime::execute(task, code),
        Op::Container(code) => container::execute(task, code),
    }
}

/// Build the conversion-failed error for a value.
pub(crate) fn convert_failed(to: &'static str, from: &Value) -> ExecuteError {
    ExecuteError::ConvertFailed {
        to,
        from: from.to_string(),
    }
}

/// Widen a numeric value to a double.
pub(crate) fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Long(l) => Some(*l as f64),
        Value::Double(d) => Some(*d),
        Value::BigInteger(i) => i.to_f64(),
        Value::Rational(r) => Some(*r.numer() as f64 / *r.denom() as f64),
        Value::BigRational(r) => {
            let n = r.numer().to_f64()?;
            let d = r.denom().to_f64()?;
            Some(n / d)
        }
        _ => None,
    }
}

/// Widen an integer value to a big integer.
pub(crate) fn to_bigint(value: &Value) -> Option<BigInt> {
    match value {
        Value::Long(l) => Some(BigInt::from(*l)),
        Value::BigInteger(i) => Some(i.clone()),
        _ => None,
    }
}

/// Widen an integer or rational value to a 64-bit rational.
pub(crate) fn to_rational64(value: &Value) -> Option<Rational64> {
    match value {
        Value::Long(l) => Some(Rational64::from_integer(*l)),
        Value::Rational(r) => Some(*r),
        _ => None,
    }
}

/// Widen any exact numeric value to a big rational.
pub(crate) fn to_big_rational(value: &Value) -> Option<BigRational> {
    match value {
        Value::Long(l) => Some(BigRational::from_integer(BigInt::from(*l))),
        Value::BigInteger(i) => Some(BigRational::from_integer(i.clone())),
        Value::Rational(r) => Some(BigRational::new(
            BigInt::from(*r.numer()),
            BigInt::from(*r.denom()),
        )),
        Value::BigRational(r) => Some(r.clone()),
        _ => None,
    }
}

/// Widen any numeric value to a cartesian complex number.
pub(crate) fn to_complex(value: &Value) -> Option<Complex64> {
    match value {
        Value::Complex(c) => Some(c.cartesian()),
        other => to_f64(other).map(|re| Complex64::new(re, 0.0)),
    }
}

/// Pop a value and widen it to a double.
pub(crate) fn pop_f64(task: &mut Task<'_>) -> Result<f64, ExecuteError> {
    let value = task.stack_mut().pop()?;
    to_f64(&value).ok_or_else(|| convert_failed("double", &value))
}
