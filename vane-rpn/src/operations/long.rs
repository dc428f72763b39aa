//! 64-bit signed integer operations.
//!
//! Arithmetic wraps like the underlying machine integers; division by zero
//! raises a silent failure so it can be handled by an enclosing `try`.

use vane_types::{Value, ValueClass};

use crate::error::ExecuteError;
use crate::filter::Filter;
use crate::registry::Registry;
use crate::task::{Flow, Task};

use super::Op;

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
    Inc,
    Dec,
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
    ShrZ,
    Int,
    IntQuery,
    Min,
    Max,
    Sgn,
    ZeroQuery,
    ZeroOrPosQuery,
    ZeroOrNegQuery,
}

pub(crate) fn register(registry: &mut Registry) {
    let mut r = |name: &str, filter: Option<Filter>, code: Opcode| {
        registry.register(name, filter, Op::Long(code));
    };
    let pair = || Some(Filter::binary(ValueClass::Long, ValueClass::Long));
    let top = || Some(Filter::unary(ValueClass::Long));

    r("+", pair(), Opcode::Add);
    r("-", pair(), Opcode::Sub);
    r("*", pair(), Opcode::Mul);
    r("/", pair(), Opcode::Div);
    r("%", pair(), Opcode::Rem);
    r("mod", pair(), Opcode::Mod);
    r("/%", pair(), Opcode::DivRem);
    r("abs", top(), Opcode::Abs);
    r("neg", top(), Opcode::Neg);
    r("++", top(), Opcode::Inc);
    r("--", top(), Opcode::Dec);
    r("eq", pair(), Opcode::Eq);
    r("ne", pair(), Opcode::Ne);
    r("lt", pair(), Opcode::Lt);
    r("le", pair(), Opcode::Le);
    r("gt", pair(), Opcode::Gt);
    r("ge", pair(), Opcode::Ge);
    r("and", pair(), Opcode::BitAnd);
    r("or", pair(), Opcode::BitOr);
    r("xor", pair(), Opcode::BitXor);
    r("not", top(), Opcode::BitNot);
    r("lshft", pair(), Opcode::Shl);
    r("rshft", pair(), Opcode::Shr);
    r("rshftz", pair(), Opcode::ShrZ);
    r(
        "int",
        Some(
            Filter::new()
                .is(0, ValueClass::Number)
                .is(0, ValueClass::Str)
                .or(),
        ),
        Opcode::Int,
    );
    r("int?", Some(Filter::new().is(0, ValueClass::Any)), Opcode::IntQuery);
    r("min", pair(), Opcode::Min);
    r("max", pair(), Opcode::Max);
    r("sgn", top(), Opcode::Sgn);
    r("0?", top(), Opcode::ZeroQuery);
    r("0+?", top(), Opcode::ZeroOrPosQuery);
    r("0-?", top(), Opcode::ZeroOrNegQuery);
}

pub(crate) fn execute(task: &mut Task<'_>, code: Opcode) -> Result<Flow, ExecuteError> {
    let stack = task.stack_mut();
    match code {
        Opcode::Add | Opcode::Sub | Opcode::Mul => {
            let y = stack.pop_long()?;
            let x = stack.pop_long()?;
            let result = match code {
                Opcode::Add => x.wrapping_add(y),
                Opcode::Sub => x.wrapping_sub(y),
                _ => x.wrapping_mul(y),
            };
            stack.push(result)?;
        }
        Opcode::Div => {
            let y = stack.pop_long()?;
            let x = stack.pop_long()?;
            if y == 0 {
                return Err(ExecuteError::failure());
            }
            stack.push(x.wrapping_div(y))?;
        }
        Opcode::Rem | Opcode::Mod => {
            let y = stack.pop_long()?;
            let x = stack.pop_long()?;
            if y == 0 {
                return Err(ExecuteError::failure());
            }
            // The divisor sign is normalized away.
            let (x, y) = if y < 0 {
                (x.wrapping_neg(), y.wrapping_neg())
            } else {
                (x, y)
            };
            let mut result = x.wrapping_rem(y);
            if code == Opcode::Mod && result < 0 {
                result += y;
            }
            stack.push(result)?;
        }
        Opcode::DivRem => {
            let y = stack.pop_long()?;
            let x = stack.pop_long()?;
            if y == 0 {
                return Err(ExecuteError::failure());
            }
            stack.push(x.wrapping_rem(y))?;
            stack.push(x.wrapping_div(y))?;
        }
        Opcode::Abs => {
            let x = stack.pop_long()?;
            stack.push(x.wrapping_abs())?;
        }
        Opcode::Neg => {
            let x = stack.pop_long()?;
            stack.push(x.wrapping_neg())?;
        }
        Opcode::Inc => {
            let x = stack.pop_long()?;
            stack.push(x.wrapping_add(1))?;
        }
        Opcode::Dec => {
            let x = stack.pop_long()?;
            stack.push(x.wrapping_sub(1))?;
        }
        Opcode::Eq | Opcode::Ne | Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
            let y = stack.pop_long()?;
            let x = stack.pop_long()?;
            let result = match code {
                Opcode::Eq => x == y,
                Opcode::Ne => x != y,
                Opcode::Lt => x < y,
                Opcode::Le => x <= y,
                Opcode::Gt => x > y,
                _ => x >= y,
            };
            stack.push(result)?;
        }
        Opcode::BitAnd | Opcode::BitOr | Opcode::BitXor => {
            let y = stack.pop_long()?;
            let x = stack.pop_long()?;
            let result = match code {
                Opcode::BitAnd => x & y,
                Opcode::BitOr => x | y,
                _ => x ^ y,
            };
            stack.push(result)?;
        }
        Opcode::BitNot => {
            let x = stack.pop_long()?;
            stack.push(!x)?;
        }
        Opcode::Shl | Opcode::Shr | Opcode::ShrZ => {
            let y = stack.pop_long()?;
            let x = stack.pop_long()?;
            let shift = (y & 63) as u32;
            let result = match code {
                Opcode::Shl => x.wrapping_shl(shift),
                Opcode::Shr => x.wrapping_shr(shift),
                _ => ((x as u64).wrapping_shr(shift)) as i64,
            };
            stack.push(result)?;
        }
        Opcode::Int => {
            let value = stack.pop()?;
            let result = parse_long(&value).ok_or_else(|| super::convert_failed("long", &value))?;
            stack.push(result)?;
        }
        Opcode::IntQuery => {
            let value = stack.pop()?;
            let result = match &value {
                Value::Long(_) => true,
                Value::Str(s) => s.trim().parse::<i64>().is_ok(),
                _ => false,
            };
            stack.push(result)?;
        }
        Opcode::Min | Opcode::Max => {
            let y = stack.pop_long()?;
            let x = stack.pop_long()?;
            stack.push(if code == Opcode::Min {
                x.min(y)
            } else {
                x.max(y)
            })?;
        }
        Opcode::Sgn => {
            let x = stack.pop_long()?;
            stack.push(x.signum())?;
        }
        Opcode::ZeroQuery => {
            let x = stack.pop_long()?;
            stack.push(x == 0)?;
        }
        Opcode::ZeroOrPosQuery => {
            let x = stack.pop_long()?;
            stack.push(x >= 0)?;
        }
        Opcode::ZeroOrNegQuery => {
            let x = stack.pop_long()?;
            stack.push(x <= 0)?;
        }
    }
    Ok(Flow::Proceed)
}

fn parse_long(value: &Value) -> Option<i64> {
    match value {
        Value::Long(l) => Some(*l),
        Value::Double(d) if d.is_finite() => Some(*d as i64),
        Value::BigInteger(i) => num_traits::ToPrimitive::to_i64(i),
        Value::Rational(r) => Some(r.to_integer()),
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
    use test_case::test_case;

    fn run(source: &str) -> Vec<Value> {
        let compiler =
            Compiler::new(Arc::new(Registry::with_defaults()), Params::new()).unwrap();
        let program = compiler.compile(source).unwrap();
        let mut context = Context::new();
        let mut task = crate::task::Task::new(&mut context, compiler);
        task.run(program.refs()).unwrap();
        task.stack().iter().cloned().collect()
    }

    #[test_case("2 3 +", 5; "addition")]
    #[test_case("10 3 -", 7; "subtraction")]
    #[test_case("6 7 *", 42; "multiplication")]
    #[test_case("10 3 /", 3; "division")]
    #[test_case("-7 2 %", -1; "remainder keeps dividend sign")]
    #[test_case("-7 2 mod", 1; "mod is non-negative")]
    #[test_case("7 -2 %", -1; "divisor sign is normalized")]
    #[test_case("5 sgn", 1; "sign")]
    #[test_case("3 ++", 4; "increment")]
    #[test_case("1 4 lshft", 16; "left shift")]
    #[test_case("-8 1 rshft", -4; "arithmetic right shift")]
    #[test_case("\"12\" int", 12; "int from string")]
    #[test_case("5 2 min", 2; "minimum")]
    fn single_result(source: &str, expected: i64) {
        assert_eq!(run(source), vec![Value::Long(expected)]);
    }

    #[test]
    fn divrem_pushes_remainder_then_quotient() {
        assert_eq!(run("10 3 /%"), vec![Value::Long(1), Value::Long(3)]);
    }

    #[test]
    fn division_by_zero_fails_silently() {
        let compiler =
            Compiler::new(Arc::new(Registry::with_defaults()), Params::new()).unwrap();
        let program = compiler.compile("1 0 /").unwrap();
        let mut context = Context::new();
        let error = program.execute(&mut context).unwrap_err();
        assert!(error.is_silent());
    }

    #[test]
    fn logical_right_shift_zero_fills() {
        assert_eq!(run("-1 60 rshftz"), vec![Value::Long(15)]);
    }

    #[test]
    fn zero_predicates() {
        assert_eq!(run("0 0?"), vec![Value::Boolean(true)]);
        assert_eq!(run("3 0+?"), vec![Value::Boolean(true)]);
        assert_eq!(run("-3 0-?"), vec![Value::Boolean(true)]);
        assert_eq!(run("-3 0+?"), vec![Value::Boolean(false)]);
    }
}
