//! Rational (i64/i64) and big-rational operations.
//!
//! A site with at least one rational (and otherwise longs) resolves to the
//! 64-bit family; a site involving a big rational, or mixing rationals
//! with big integers, widens to the arbitrary-precision family.

use num_bigint::BigInt;
use num_rational::{BigRational, Rational64};
use num_traits::{Signed, ToPrimitive, Zero};
use vane_types::{Value, ValueClass};

use crate::error::ExecuteError;
use crate::filter::Filter;
use crate::registry::Registry;
use crate::task::{Flow, Task};

use super::{convert_failed, to_big_rational, to_rational64, Op};

/// Internal opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    RatAdd,
    RatSub,
    RatMul,
    RatDiv,
    RatRecip,
    RatAbs,
    RatNeg,
    RatSgn,
    RatSplit,
    RatCmp(Comparison),
    RatCast,
    RatFromPair,
    BigAdd,
    BigSub,
    BigMul,
    BigDiv,
    BigRecip,
    BigAbs,
    BigNeg,
    BigSgn,
    BigSplit,
    BigCmp(Comparison),
    BigCast,
    BigFromPair,
}

/// Comparison selector shared by both families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn apply<T: PartialOrd>(&self, x: &T, y: &T) -> bool {
        match self {
            Self::Eq => x == y,
            Self::Ne => x != y,
            Self::Lt => x < y,
            Self::Le => x <= y,
            Self::Gt => x > y,
            Self::Ge => x >= y,
        }
    }
}

/// Slot holds a long or a 64-bit rational.
fn narrow(filter: Filter, depth: usize) -> Filter {
    filter
        .is(depth, ValueClass::Long)
        .is(depth, ValueClass::Rational)
        .or()
}

/// Slot holds any exact number.
fn exact(filter: Filter, depth: usize) -> Filter {
    filter
        .is(depth, ValueClass::Integer)
        .is(depth, ValueClass::Rational)
        .or()
        .is(depth, ValueClass::BigRational)
        .or()
}

/// Both slots narrow, at least one an actual rational.
fn rat_pair() -> Option<Filter> {
    let filter = narrow(narrow(Filter::new(), 1), 0).and();
    Some(
        filter
            .is(1, ValueClass::Rational)
            .is(0, ValueClass::Rational)
            .or()
            .and(),
    )
}

/// Both slots exact, widened past the narrow family.
fn big_pair() -> Option<Filter> {
    let filter = exact(exact(Filter::new(), 1), 0).and();
    Some(
        filter
            .is(1, ValueClass::BigRational)
            .is(0, ValueClass::BigRational)
            .or()
            .is(1, ValueClass::Rational)
            .is(0, ValueClass::Rational)
            .or()
            .is(1, ValueClass::BigInteger)
            .is(0, ValueClass::BigInteger)
            .or()
            .and()
            .or()
            .and(),
    )
}

pub(crate) fn register(registry: &mut Registry) {
    let mut r = |name: &str, filter: Option<Filter>, code: Opcode| {
        registry.register(name, filter, Op::Rational(code));
    };
    let rat_top = || Some(Filter::unary(ValueClass::Rational));
    let big_top = || Some(Filter::unary(ValueClass::BigRational));
    let int_pair = || {
        Some(
            Filter::new()
                .is(1, ValueClass::Integer)
                .is(0, ValueClass::Integer)
                .and(),
        )
    };

    // Narrow family first, wide family after: the wide overloads end up
    // earlier in the chains and claim mixed sites.
    r("+", rat_pair(), Opcode::RatAdd);
    r("-", rat_pair(), Opcode::RatSub);
    r("*", rat_pair(), Opcode::RatMul);
    r("/", rat_pair(), Opcode::RatDiv);
    r("1/", rat_top(), Opcode::RatRecip);
    r("abs", rat_top(), Opcode::RatAbs);
    r("neg", rat_top(), Opcode::RatNeg);
    r("sgn", rat_top(), Opcode::RatSgn);
    r("split", rat_top(), Opcode::RatSplit);
    r("eq", rat_pair(), Opcode::RatCmp(Comparison::Eq));
    r("ne", rat_pair(), Opcode::RatCmp(Comparison::Ne));
    r("lt", rat_pair(), Opcode::RatCmp(Comparison::Lt));
    r("le", rat_pair(), Opcode::RatCmp(Comparison::Le));
    r("gt", rat_pair(), Opcode::RatCmp(Comparison::Gt));
    r("ge", rat_pair(), Opcode::RatCmp(Comparison::Ge));
    r(
        "rat",
        Some(
            Filter::new()
                .is(0, ValueClass::Str)
                .is(0, ValueClass::Long)
                .or()
                .is(0, ValueClass::Rational)
                .or()
                .is(0, ValueClass::BigRational)
                .or(),
        ),
        Opcode::RatCast,
    );
    r("rat", int_pair(), Opcode::RatFromPair);

    r("+", big_pair(), Opcode::BigAdd);
    r("-", big_pair(), Opcode::BigSub);
    r("*", big_pair(), Opcode::BigMul);
    r("/", big_pair(), Opcode::BigDiv);
    r("1/", big_top(), Opcode::BigRecip);
    r("abs", big_top(), Opcode::BigAbs);
    r("neg", big_top(), Opcode::BigNeg);
    r("sgn", big_top(), Opcode::BigSgn);
    r("split", big_top(), Opcode::BigSplit);
    r("eq", big_pair(), Opcode::BigCmp(Comparison::Eq));
    r("ne", big_pair(), Opcode::BigCmp(Comparison::Ne));
    r("lt", big_pair(), Opcode::BigCmp(Comparison::Lt));
    r("le", big_pair(), Opcode::BigCmp(Comparison::Le));
    r("gt", big_pair(), Opcode::BigCmp(Comparison::Gt));
    r("ge", big_pair(), Opcode::BigCmp(Comparison::Ge));
    r(
        "bigrat",
        Some(
            Filter::new()
                .is(0, ValueClass::Str)
                .is(0, ValueClass::Number)
                .or(),
        ),
        Opcode::BigCast,
    );
    r("bigrat", int_pair(), Opcode::BigFromPair);
}

pub(crate) fn execute(task: &mut Task<'_>, code: Opcode) -> Result<Flow, ExecuteError> {
    match code {
        Opcode::RatAdd | Opcode::RatSub | Opcode::RatMul => {
            let (x, y) = pop_rat_pair(task)?;
            let result = match code {
                Opcode::RatAdd => x + y,
                Opcode::RatSub => x - y,
                _ => x * y,
            };
            task.stack_mut().push(result)?;
        }
        Opcode::RatDiv => {
            let (x, y) = pop_rat_pair(task)?;
            if y.is_zero() {
                return Err(ExecuteError::failure());
            }
            task.stack_mut().push(x / y)?;
        }
        Opcode::RatRecip => {
            let x = pop_rat(task)?;
            if x.is_zero() {
                return Err(ExecuteError::failure());
            }
            task.stack_mut().push(x.recip())?;
        }
        Opcode::RatAbs => {
            let x = pop_rat(task)?;
            task.stack_mut().push(x.abs())?;
        }
        Opcode::RatNeg => {
            let x = pop_rat(task)?;
            task.stack_mut().push(-x)?;
        }
        Opcode::RatSgn => {
            let x = pop_rat(task)?;
            task.stack_mut().push(x.numer().signum())?;
        }
        Opcode::RatSplit => {
            let x = pop_rat(task)?;
            task.stack_mut().push(*x.numer())?;
            task.stack_mut().push(*x.denom())?;
        }
        Opcode::RatCmp(cmp) => {
            let (x, y) = pop_rat_pair(task)?;
            task.stack_mut().push(cmp.apply(&x, &y))?;
        }
        Opcode::RatCast => {
            let value = task.stack_mut().pop()?;
            let result = cast_rational(&value).ok_or_else(|| convert_failed("rational", &value))?;
            task.stack_mut().push(result)?;
        }
        Opcode::RatFromPair => {
            let den = task.stack_mut().pop_long()?;
            let num = task.stack_mut().pop_long()?;
            if den == 0 {
                return Err(ExecuteError::ConvertFailed {
                    to: "rational",
                    from: format!("{num}/{den}"),
                });
            }
            task.stack_mut().push(Rational64::new(num, den))?;
        }
        Opcode::BigAdd | Opcode::BigSub | Opcode::BigMul => {
            let (x, y) = pop_big_pair(task)?;
            let result = match code {
                Opcode::BigAdd => x + y,
                Opcode::BigSub => x - y,
                _ => x * y,
            };
            task.stack_mut().push(result)?;
        }
        Opcode::BigDiv => {
            let (x, y) = pop_big_pair(task)?;
            if y.is_zero() {
                return Err(ExecuteError::failure());
            }
            task.stack_mut().push(x / y)?;
        }
        Opcode::BigRecip => {
            let x = pop_big(task)?;
            if x.is_zero() {
                return Err(ExecuteError::failure());
            }
            task.stack_mut().push(x.recip())?;
        }
        Opcode::BigAbs => {
            let x = pop_big(task)?;
            task.stack_mut().push(x.abs())?;
        }
        Opcode::BigNeg => {
            let x = pop_big(task)?;
            task.stack_mut().push(-x)?;
        }
        Opcode::BigSgn => {
            let x = pop_big(task)?;
            let sgn = if x.is_zero() {
                0
            } else if x.is_negative() {
                -1
            } else {
                1
            };
            task.stack_mut().push(sgn as i64)?;
        }
        Opcode::BigSplit => {
            let x = pop_big(task)?;
            task.stack_mut().push(x.numer().clone())?;
            task.stack_mut().push(x.denom().clone())?;
        }
        Opcode::BigCmp(cmp) => {
            let (x, y) = pop_big_pair(task)?;
            task.stack_mut().push(cmp.apply(&x, &y))?;
        }
        Opcode::BigCast => {
            let value = task.stack_mut().pop()?;
            let result =
                cast_big_rational(&value).ok_or_else(|| convert_failed("bigrational", &value))?;
            task.stack_mut().push(result)?;
        }
        Opcode::BigFromPair => {
            let den = task.stack_mut().pop()?;
            let num = task.stack_mut().pop()?;
            let den = super::to_bigint(&den).ok_or_else(|| convert_failed("bigint", &den))?;
            let num = super::to_bigint(&num).ok_or_else(|| convert_failed("bigint", &num))?;
            if den.is_zero() {
                return Err(ExecuteError::ConvertFailed {
                    to: "bigrational",
                    from: format!("{num}/{den}"),
                });
            }
            task.stack_mut().push(BigRational::new(num, den))?;
        }
    }
    Ok(Flow::Proceed)
}

fn pop_rat(task: &mut Task<'_>) -> Result<Rational64, ExecuteError> {
    let value = task.stack_mut().pop()?;
    to_rational64(&value).ok_or_else(|| convert_failed("rational", &value))
}

fn pop_rat_pair(task: &mut Task<'_>) -> Result<(Rational64, Rational64), ExecuteError> {
    let y = pop_rat(task)?;
    let x = pop_rat(task)?;
    Ok((x, y))
}

fn pop_big(task: &mut Task<'_>) -> Result<BigRational, ExecuteError> {
    let value = task.stack_mut().pop()?;
    to_big_rational(&value).ok_or_else(|| convert_failed("bigrational", &value))
}

fn pop_big_pair(task: &mut Task<'_>) -> Result<(BigRational, BigRational), ExecuteError> {
    let y = pop_big(task)?;
    let x = pop_big(task)?;
    Ok((x, y))
}

fn cast_rational(value: &Value) -> Option<Rational64> {
    match value {
        Value::Long(l) => Some(Rational64::from_integer(*l)),
        Value::Rational(r) => Some(*r),
        Value::BigRational(r) => {
            // Narrowing fails when either side leaves the 64-bit range.
            let num = r.numer().to_i64()?;
            let den = r.denom().to_i64()?;
            Some(Rational64::new(num, den))
        }
        Value::Str(s) => parse_ratio(s.trim()).and_then(|(num, den)| {
            if den == 0 {
                None
            } else {
                Some(Rational64::new(num, den))
            }
        }),
        _ => None,
    }
}

fn cast_big_rational(value: &Value) -> Option<BigRational> {
    match value {
        Value::Str(s) => {
            let (num, den) = parse_big_ratio(s.trim())?;
            if den.is_zero() {
                None
            } else {
                Some(BigRational::new(num, den))
            }
        }
        other => to_big_rational(other),
    }
}

fn parse_ratio(text: &str) -> Option<(i64, i64)> {
    match text.split_once('/') {
        Some((num, den)) => Some((num.trim().parse().ok()?, den.trim().parse().ok()?)),
        None => Some((text.parse().ok()?, 1)),
    }
}

fn parse_big_ratio(text: &str) -> Option<(BigInt, BigInt)> {
    match text.split_once('/') {
        Some((num, den)) => Some((num.trim().parse().ok()?, den.trim().parse().ok()?)),
        None => Some((text.parse().ok()?, BigInt::from(1))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::params::Params;
    use crate::registry::Registry;
    use crate::task::Context;
    use std::sync::Arc;

    fn run(source: &str) -> Vec<Value> {
        let compiler =
            Compiler::new(Arc::new(Registry::with_defaults()), Params::new()).unwrap();
        let program = compiler.compile(source).unwrap();
        let mut context = Context::new();
        let mut task = crate::task::Task::new(&mut context, compiler);
        task.run(program.refs()).unwrap();
        task.stack().iter().cloned().collect()
    }

    fn rat(num: i64, den: i64) -> Value {
        Value::Rational(Rational64::new(num, den))
    }

    #[test]
    fn arithmetic_reduces() {
        assert_eq!(run("\"1/2\" rat \"1/3\" rat +"), vec![rat(5, 6)]);
        assert_eq!(run("\"2/4\" rat"), vec![rat(1, 2)]);
    }

    #[test]
    fn mixed_long_and_rational() {
        assert_eq!(run("\"1/2\" rat 2 *"), vec![rat(1, 1)]);
    }

    #[test]
    fn from_two_integers() {
        assert_eq!(run("3 4 rat"), vec![rat(3, 4)]);
    }

    #[test]
    fn split_pushes_numerator_then_denominator() {
        assert_eq!(
            run("\"3/4\" rat split"),
            vec![Value::Long(3), Value::Long(4)]
        );
    }

    #[test]
    fn reciprocal_of_zero_fails() {
        let compiler =
            Compiler::new(Arc::new(Registry::with_defaults()), Params::new()).unwrap();
        let program = compiler.compile("0 1 rat 1/").unwrap();
        let mut context = Context::new();
        assert!(program.execute(&mut context).unwrap_err().is_silent());
    }

    #[test]
    fn widening_and_narrowing() {
        // A big rational narrows back when it fits.
        assert_eq!(run("\"1/3\" bigrat rat"), vec![rat(1, 3)]);
        assert_eq!(
            run("\"1/2\" rat bigrat split"),
            vec![
                Value::BigInteger(1.into()),
                Value::BigInteger(2.into())
            ]
        );
    }

    #[test]
    fn narrowing_overflow_is_reported() {
        let compiler =
            Compiler::new(Arc::new(Registry::with_defaults()), Params::new()).unwrap();
        let program = compiler
            .compile("\"123456789012345678901234567890/7\" bigrat rat")
            .unwrap();
        let mut context = Context::new();
        assert!(matches!(
            program.execute(&mut context).unwrap_err(),
            ExecuteError::ConvertFailed { .. }
        ));
    }
}
