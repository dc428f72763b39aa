//! Arbitrary-precision integer operations.
//!
//! Carries the whole 64-bit integer operation set, widened: a site with at
//! least one big integer (and nothing but integers) resolves here.

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{FromPrimitive, Signed, ToPrimitive, Zero};
use vane_types::{Value, ValueClass};

use crate::error::ExecuteError;
use crate::filter::Filter;
use crate::registry::Registry;
use crate::task::{Flow, Task};

use super::{convert_failed, to_bigint, Op};

/// Internal opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Mod,
    DivRem,
    Abs,
    Neg,
    Gcd,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    Shl,
    Shr,
    Bits,
    Low1,
    SetBit,
    ClearBit,
    FlipBit,
    TestBit,
    Min,
    Max,
    Sgn,
    BigIntCast,
}

/// Both operands integers, at least one of them big.
fn wide_pair() -> Option<Filter> {
    Some(
        Filter::new()
            .is(1, ValueClass::Integer)
            .is(0, ValueClass::Integer)
            .and()
            .is(1, ValueClass::BigInteger)
            .is(0, ValueClass::BigInteger)
            .or()
            .and(),
    )
}

/// A big integer under a long bit index.
fn bit_site() -> Option<Filter> {
    Some(
        Filter::new()
            .is(1, ValueClass::BigInteger)
            .is(0, ValueClass::Long)
            .and(),
    )
}

pub(crate) fn register(registry: &mut Registry) {
    let mut r = |name: &str, filter: Option<Filter>, code: Opcode| {
        registry.register(name, filter, Op::Bignum(code));
    };
    let big_top = || Some(Filter::unary(ValueClass::BigInteger));
    let int_pair = || {
        Some(
            Filter::new()
                .is(1, ValueClass::Integer)
                .is(0, ValueClass::Integer)
                .and(),
        )
    };

    r("+", wide_pair(), Opcode::Add);
    r("-", wide_pair(), Opcode::Sub);
    r("*", wide_pair(), Opcode::Mul);
    r("/", wide_pair(), Opcode::Div);
    r("%", wide_pair(), Opcode::Rem);
    r("mod", wide_pair(), Opcode::Mod);
    r("/%", wide_pair(), Opcode::DivRem);
    r("abs", big_top(), Opcode::Abs);
    r("neg", big_top(), Opcode::Neg);
    r("gcd", int_pair(), Opcode::Gcd);
    r("eq", wide_pair(), Opcode::Eq);
    r("ne", wide_pair(), Opcode::Ne);
    r("lt", wide_pair(), Opcode::Lt);
    r("le", wide_pair(), Opcode::Le);
    r("gt", wide_pair(), Opcode::Gt);
    r("ge", wide_pair(), Opcode::Ge);
    r("and", wide_pair(), Opcode::BitAnd);
    r("or", wide_pair(), Opcode::BitOr);
    r("xor", wide_pair(), Opcode::BitXor);
    r("not", big_top(), Opcode::BitNot);
    r("lshft", bit_site(), Opcode::Shl);
    r("rshft", bit_site(), Opcode::Shr);
    r("bits", big_top(), Opcode::Bits);
    r("low1", big_top(), Opcode::Low1);
    r("set", bit_site(), Opcode::SetBit);
    r("clear", bit_site(), Opcode::ClearBit);
    r("flip", bit_site(), Opcode::FlipBit);
    r("test", bit_site(), Opcode::TestBit);
    r("min", wide_pair(), Opcode::Min);
    r("max", wide_pair(), Opcode::Max);
    r("sgn", big_top(), Opcode::Sgn);
    r(
        "bigint",
        Some(
            Filter::new()
                .is(0, ValueClass::Number)
                .is(0, ValueClass::Str)
                .or(),
        ),
        Opcode::BigIntCast,
    );
}

pub(crate) fn execute(task: &mut Task<'_>, code: Opcode) -> Result<Flow, ExecuteError> {
    match code {
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Gcd => {
            let (x, y) = pop_pair(task)?;
            let result = match code {
                Opcode::Add => x + y,
                Opcode::Sub => x - y,
                Opcode::Mul => x * y,
                _ => x.gcd(&y),
            };
            task.stack_mut().push(result)?;
        }
        Opcode::Div => {
            let (x, y) = pop_pair(task)?;
            if y.is_zero() {
                return Err(ExecuteError::failure());
            }
            task.stack_mut().push(x / y)?;
        }
        Opcode::Rem | Opcode::Mod => {
            let (x, y) = pop_pair(task)?;
            if y.is_zero() {
                return Err(ExecuteError::failure());
            }
            // The divisor sign is normalized away.
            let (x, y) = if y.is_negative() { (-x, -y) } else { (x, y) };
            let mut result = &x % &y;
            if code == Opcode::Mod && result.is_negative() {
                result += &y;
            }
            task.stack_mut().push(result)?;
        }
        Opcode::DivRem => {
            let (x, y) = pop_pair(task)?;
            if y.is_zero() {
                return Err(ExecuteError::failure());
            }
            let (quotient, remainder) = x.div_rem(&y);
            task.stack_mut().push(remainder)?;
            task.stack_mut().push(quotient)?;
        }
        Opcode::Abs => {
            let x = pop_big(task)?;
            task.stack_mut().push(x.abs())?;
        }
        Opcode::Neg => {
            let x = pop_big(task)?;
            task.stack_mut().push(-x)?;
        }
        Opcode::Eq | Opcode::Ne | Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
            let (x, y) = pop_pair(task)?;
            let result = match code {
                Opcode::Eq => x == y,
                Opcode::Ne => x != y,
                Opcode::Lt => x < y,
                Opcode::Le => x <= y,
                Opcode::Gt => x > y,
                _ => x >= y,
            };
            task.stack_mut().push(result)?;
        }
        Opcode::BitAnd | Opcode::BitOr | Opcode::BitXor => {
            let (x, y) = pop_pair(task)?;
            let result = match code {
                Opcode::BitAnd => x & y,
                Opcode::BitOr => x | y,
                _ => x ^ y,
            };
            task.stack_mut().push(result)?;
        }
        Opcode::BitNot => {
            let x = pop_big(task)?;
            task.stack_mut().push(-(x + BigInt::from(1)))?;
        }
        Opcode::Shl | Opcode::Shr => {
            let shift = bit_index(task)?;
            let x = pop_big(task)?;
            let result = if code == Opcode::Shl {
                x << shift
            } else {
                x >> shift
            };
            task.stack_mut().push(result)?;
        }
        Opcode::Bits => {
            let x = pop_big(task)?;
            let count = x.magnitude().count_ones() as i64;
            task.stack_mut().push(count)?;
        }
        Opcode::Low1 => {
            let x = pop_big(task)?;
            let index = x.trailing_zeros().map(|n| n as i64).unwrap_or(-1);
            task.stack_mut().push(index)?;
        }
        Opcode::SetBit | Opcode::ClearBit | Opcode::FlipBit => {
            let bit = bit_index(task)? as u64;
            let mut x = pop_big(task)?;
            let value = match code {
                Opcode::SetBit => true,
                Opcode::ClearBit => false,
                _ => !x.bit(bit),
            };
            x.set_bit(bit, value);
            task.stack_mut().push(x)?;
        }
        Opcode::TestBit => {
            let bit = bit_index(task)? as u64;
            let x = pop_big(task)?;
            task.stack_mut().push(x.bit(bit))?;
        }
        Opcode::Min | Opcode::Max => {
            let (x, y) = pop_pair(task)?;
            task.stack_mut().push(if code == Opcode::Min {
                x.min(y)
            } else {
                x.max(y)
            })?;
        }
        Opcode::Sgn => {
            let x = pop_big(task)?;
            let sgn = x.to_i64().map(|v| v.signum()).unwrap_or_else(|| {
                if x.is_negative() {
                    -1
                } else {
                    1
                }
            });
            task.stack_mut().push(sgn)?;
        }
        Opcode::BigIntCast => {
            let value = task.stack_mut().pop()?;
            let result = cast_bigint(&value).ok_or_else(|| convert_failed("bigint", &value))?;
            task.stack_mut().push(result)?;
        }
    }
    Ok(Flow::Proceed)
}

fn pop_big(task: &mut Task<'_>) -> Result<BigInt, ExecuteError> {
    let value = task.stack_mut().pop()?;
    to_bigint(&value).ok_or_else(|| convert_failed("bigint", &value))
}

fn pop_pair(task: &mut Task<'_>) -> Result<(BigInt, BigInt), ExecuteError> {
    let y = pop_big(task)?;
    let x = pop_big(task)?;
    Ok((x, y))
}

fn bit_index(task: &mut Task<'_>) -> Result<usize, ExecuteError> {
    let raw = task.stack_mut().pop_long()?;
    usize::try_from(raw).map_err(|_| ExecuteError::ConvertFailed {
        to: "bit index",
        from: raw.to_string(),
    })
}

fn cast_bigint(value: &Value) -> Option<BigInt> {
    match value {
        Value::Long(l) => Some(BigInt::from(*l)),
        Value::BigInteger(i) => Some(i.clone()),
        Value::Double(d) if d.is_finite() => BigInt::from_f64(d.trunc()),
        Value::Rational(r) => Some(BigInt::from(r.to_integer())),
        Value::BigRational(r) => Some(r.to_integer()),
        Value::Str(s) => s.trim().parse().ok(),
        _ => None,
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

    fn big(text: &str) -> Value {
        Value::BigInteger(text.parse().unwrap())
    }

    #[test]
    fn arithmetic_widens_longs() {
        assert_eq!(
            run("\"123456789012345678901234567890\" bigint 1 +"),
            vec![big("123456789012345678901234567891")]
        );
    }

    #[test]
    fn gcd_of_integers() {
        assert_eq!(run("12 18 gcd"), vec![big("6")]);
    }

    #[test]
    fn bit_population_and_low_bit() {
        assert_eq!(run("\"255\" bigint bits"), vec![Value::Long(8)]);
        assert_eq!(run("\"24\" bigint low1"), vec![Value::Long(3)]);
        assert_eq!(run("\"0\" bigint low1"), vec![Value::Long(-1)]);
    }

    #[test]
    fn bit_editing() {
        assert_eq!(run("\"0\" bigint 3 set"), vec![big("8")]);
        assert_eq!(run("\"15\" bigint 0 clear"), vec![big("14")]);
        assert_eq!(run("\"8\" bigint 3 flip"), vec![big("0")]);
        assert_eq!(run("\"8\" bigint 3 test"), vec![Value::Boolean(true)]);
    }

    #[test]
    fn mod_normalizes_divisor() {
        assert_eq!(run("\"-7\" bigint 2 mod"), vec![big("1")]);
        assert_eq!(run("\"-7\" bigint 2 %"), vec![big("-1")]);
    }
}
