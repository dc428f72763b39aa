//! IEEE-754 double operations.
//!
//! Division follows float rules (±∞ or NaN, never an error). Binary
//! arithmetic accepts mixed numeric operands as long as one side is a
//! double; the transcendentals coerce any numeric operand.

use vane_types::{Value, ValueClass};

use crate::error::ExecuteError;
use crate::filter::Filter;
use crate::registry::Registry;
use crate::task::{Flow, Task};

use super::{pop_f64, Op};

/// Internal opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Mod,
    Abs,
    Neg,
    Round,
    Floor,
    Ceil,
    Cbrt,
    Sqrt,
    Hypot,
    Pow,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Log,
    Log10,
    Pi,
    E,
    PosInf,
    NegInf,
    NaN,
    NanQuery,
    InfQuery,
    NearZeroQuery,
    NearEq,
    Float,
    FloatQuery,
    Min,
    Max,
    Sgn,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Both operands numeric, at least one of them a double.
fn mixed_pair() -> Option<Filter> {
    Some(
        Filter::new()
            .is(1, ValueClass::Number)
            .is(0, ValueClass::Number)
            .and()
            .is(1, ValueClass::Double)
            .is(0, ValueClass::Double)
            .or()
            .and(),
    )
}

fn number_top() -> Option<Filter> {
    Some(Filter::unary(ValueClass::Number))
}

pub(crate) fn register(registry: &mut Registry) {
    let mut r = |name: &str, filter: Option<Filter>, code: Opcode| {
        registry.register(name, filter, Op::Double(code));
    };
    let double_top = || Some(Filter::unary(ValueClass::Double));
    let triple = || {
        Some(
            Filter::new()
                .is(2, ValueClass::Number)
                .is(1, ValueClass::Number)
                .and()
                .is(0, ValueClass::Number)
                .and(),
        )
    };

    r("+", mixed_pair(), Opcode::Add);
    r("-", mixed_pair(), Opcode::Sub);
    r("*", mixed_pair(), Opcode::Mul);
    r("/", mixed_pair(), Opcode::Div);
    r("%", mixed_pair(), Opcode::Rem);
    r("mod", mixed_pair(), Opcode::Mod);
    r("abs", double_top(), Opcode::Abs);
    r("neg", double_top(), Opcode::Neg);
    r("round", double_top(), Opcode::Round);
    r("floor", double_top(), Opcode::Floor);
    r("ceil", double_top(), Opcode::Ceil);
    r("cbrt", number_top(), Opcode::Cbrt);
    r("sqrt", number_top(), Opcode::Sqrt);
    r("hypot", mixed_pair(), Opcode::Hypot);
    r("**", mixed_pair(), Opcode::Pow);
    r("sin", number_top(), Opcode::Sin);
    r("cos", number_top(), Opcode::Cos);
    r("tan", number_top(), Opcode::Tan);
    r("asin", number_top(), Opcode::Asin);
    r("acos", number_top(), Opcode::Acos);
    r("atan", number_top(), Opcode::Atan);
    r("sinh", number_top(), Opcode::Sinh);
    r("cosh", number_top(), Opcode::Cosh);
    r("tanh", number_top(), Opcode::Tanh);
    r("exp", number_top(), Opcode::Exp);
    r("log", number_top(), Opcode::Log);
    r("log10", number_top(), Opcode::Log10);
    r("pi", None, Opcode::Pi);
    r("e", None, Opcode::E);
    r("+inf", None, Opcode::PosInf);
    r("-inf", None, Opcode::NegInf);
    r("nan", None, Opcode::NaN);
    r("nan?", number_top(), Opcode::NanQuery);
    r("inf?", number_top(), Opcode::InfQuery);
    r(
        "0~?",
        Some(
            Filter::new()
                .is(1, ValueClass::Number)
                .is(0, ValueClass::Number)
                .and(),
        ),
        Opcode::NearZeroQuery,
    );
    r("eq~", triple(), Opcode::NearEq);
    r(
        "float",
        Some(
            Filter::new()
                .is(0, ValueClass::Number)
                .is(0, ValueClass::Str)
                .or(),
        ),
        Opcode::Float,
    );
    r(
        "float?",
        Some(Filter::new().is(0, ValueClass::Any)),
        Opcode::FloatQuery,
    );
    r("min", mixed_pair(), Opcode::Min);
    r("max", mixed_pair(), Opcode::Max);
    r("sgn", double_top(), Opcode::Sgn);
    r("eq", mixed_pair(), Opcode::Eq);
    r("ne", mixed_pair(), Opcode::Ne);
    r("lt", mixed_pair(), Opcode::Lt);
    r("le", mixed_pair(), Opcode::Le);
    r("gt", mixed_pair(), Opcode::Gt);
    r("ge", mixed_pair(), Opcode::Ge);
}

pub(crate) fn execute(task: &mut Task<'_>, code: Opcode) -> Result<Flow, ExecuteError> {
    match code {
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Hypot | Opcode::Pow => {
            let y = pop_f64(task)?;
            let x = pop_f64(task)?;
            let result = match code {
                Opcode::Add => x + y,
                Opcode::Sub => x - y,
                Opcode::Mul => x * y,
                Opcode::Div => x / y,
                Opcode::Hypot => x.hypot(y),
                _ => x.powf(y),
            };
            task.stack_mut().push(result)?;
        }
        Opcode::Rem | Opcode::Mod => {
            let y = pop_f64(task)?;
            let x = pop_f64(task)?;
            // The divisor sign is normalized away.
            let (x, y) = if y < 0.0 { (-x, -y) } else { (x, y) };
            let mut result = x % y;
            if code == Opcode::Mod && result < 0.0 {
                result += y;
            }
            task.stack_mut().push(result)?;
        }
        Opcode::Abs => unary(task, f64::abs)?,
        Opcode::Neg => unary(task, |x| -x)?,
        Opcode::Round => {
            let x = pop_f64(task)?;
            // Nearest, ties toward positive infinity.
            let rounded = (x + 0.5).floor();
            if !rounded.is_finite() || rounded < i64::MIN as f64 || rounded > i64::MAX as f64 {
                return Err(ExecuteError::ConvertFailed {
                    to: "long",
                    from: x.to_string(),
                });
            }
            task.stack_mut().push(rounded as i64)?;
        }
        Opcode::Floor => unary(task, f64::floor)?,
        Opcode::Ceil => unary(task, f64::ceil)?,
        Opcode::Cbrt => unary(task, f64::cbrt)?,
        Opcode::Sqrt => unary(task, f64::sqrt)?,
        Opcode::Sin => unary(task, f64::sin)?,
        Opcode::Cos => unary(task, f64::cos)?,
        Opcode::Tan => unary(task, f64::tan)?,
        Opcode::Asin => unary(task, f64::asin)?,
        Opcode::Acos => unary(task, f64::acos)?,
        Opcode::Atan => unary(task, f64::atan)?,
        Opcode::Sinh => unary(task, f64::sinh)?,
        Opcode::Cosh => unary(task, f64::cosh)?,
        Opcode::Tanh => unary(task, f64::tanh)?,
        Opcode::Exp => unary(task, f64::exp)?,
        Opcode::Log => unary(task, f64::ln)?,
        Opcode::Log10 => unary(task, f64::log10)?,
        Opcode::Pi => task.stack_mut().push(std::f64::consts::PI)?,
        Opcode::E => task.stack_mut().push(std::f64::consts::E)?,
        Opcode::PosInf => task.stack_mut().push(f64::INFINITY)?,
        Opcode::NegInf => task.stack_mut().push(f64::NEG_INFINITY)?,
        Opcode::NaN => task.stack_mut().push(f64::NAN)?,
        Opcode::NanQuery => {
            let x = pop_f64(task)?;
            task.stack_mut().push(x.is_nan())?;
        }
        Opcode::InfQuery => {
            let x = pop_f64(task)?;
            task.stack_mut().push(x.is_infinite())?;
        }
        Opcode::NearZeroQuery => {
            let tolerance = pop_f64(task)?;
            let x = pop_f64(task)?;
            task.stack_mut().push(x.abs() <= tolerance)?;
        }
        Opcode::NearEq => {
            let tolerance = pop_f64(task)?;
            let y = pop_f64(task)?;
            let x = pop_f64(task)?;
            task.stack_mut().push((x - y).abs() <= tolerance)?;
        }
        Opcode::Float => {
            let value = task.stack_mut().pop()?;
            let result = match &value {
                Value::Str(s) => s.trim().parse::<f64>().ok(),
                other => super::to_f64(other),
            };
            let result = result.ok_or_else(|| super::convert_failed("double", &value))?;
            task.stack_mut().push(result)?;
        }
        Opcode::FloatQuery => {
            let value = task.stack_mut().pop()?;
            let result = match &value {
                Value::Double(_) | Value::Long(_) => true,
                Value::Str(s) => s.trim().parse::<f64>().is_ok(),
                _ => false,
            };
            task.stack_mut().push(result)?;
        }
        Opcode::Min | Opcode::Max => {
            let y = pop_f64(task)?;
            let x = pop_f64(task)?;
            task.stack_mut().push(if code == Opcode::Min {
                x.min(y)
            } else {
                x.max(y)
            })?;
        }
        Opcode::Sgn => {
            let x = pop_f64(task)?;
            let sgn = if x == 0.0 { 0.0 } else { x.signum() };
            task.stack_mut().push(sgn)?;
        }
        Opcode::Eq | Opcode::Ne | Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
            let y = pop_f64(task)?;
            let x = pop_f64(task)?;
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
    }
    Ok(Flow::Proceed)
}

fn unary(task: &mut Task<'_>, f: impl FnOnce(f64) -> f64) -> Result<(), ExecuteError> {
    let x = pop_f64(task)?;
    task.stack_mut().push(f(x))?;
    Ok(())
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

    fn top_double(source: &str) -> f64 {
        match run(source).pop().unwrap() {
            Value::Double(d) => d,
            other => panic!("expected double, got {other:?}"),
        }
    }

    #[test]
    fn mixed_operands_produce_doubles() {
        assert_eq!(top_double("1 2.5 +"), 3.5);
        assert_eq!(top_double("5.0 2 /"), 2.5);
    }

    #[test]
    fn division_by_zero_is_infinite() {
        assert_eq!(top_double("1.0 0.0 /"), f64::INFINITY);
        assert!(top_double("0.0 0.0 /").is_nan());
    }

    #[test]
    fn round_ties_up() {
        assert_eq!(run("2.5 round"), vec![Value::Long(3)]);
        assert_eq!(run("-2.5 round"), vec![Value::Long(-2)]);
        assert_eq!(run("2.4 round"), vec![Value::Long(2)]);
    }

    #[test]
    fn modulo_normalizes_divisor() {
        assert_eq!(top_double("-7.0 2.0 mod"), 1.0);
        assert_eq!(top_double("-7.0 2.0 %"), -1.0);
    }

    #[test]
    fn approximate_equality() {
        assert_eq!(run("12.4 12.5 0.2 eq~"), vec![Value::Boolean(true)]);
        assert_eq!(run("12.4 12.7 0.2 eq~"), vec![Value::Boolean(false)]);
        assert_eq!(run("0.05 0.1 0~?"), vec![Value::Boolean(true)]);
    }

    #[test]
    fn float_conversion() {
        assert_eq!(run("\"12.5\" float"), vec![Value::Double(12.5)]);
        assert_eq!(run("3 float"), vec![Value::Double(3.0)]);
        assert_eq!(run("\"x\" float?"), vec![Value::Boolean(false)]);
    }

    #[test]
    fn transcendentals_coerce_longs() {
        assert_eq!(top_double("4 sqrt"), 2.0);
        assert_eq!(top_double("8 cbrt"), 2.0);
    }
}
