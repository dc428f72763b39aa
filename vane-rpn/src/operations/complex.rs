//! Complex number operations.
//!
//! Arithmetic results are cartesian; the polar form survives only through
//! form-preserving operations (`conj`, `neg`, `split`, `polar`).

use num_complex::Complex64;
use vane_types::{ComplexValue, Value, ValueClass};

use crate::error::ExecuteError;
use crate::filter::Filter;
use crate::registry::Registry;
use crate::task::{Flow, Task};

use super::{convert_failed, to_complex, to_f64, Op};

/// Internal opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Abs,
    Arg,
    Conj,
    Neg,
    Sgn,
    Sin,
    Cos,
    Tan,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    ImaginaryUnit,
    Real,
    Imag,
    Split,
    CplxCast,
    CplxFromPair,
    PolarCast,
    PolarFromPair,
}

/// Both operands numeric, at least one complex.
fn pair() -> Option<Filter> {
    Some(
        Filter::new()
            .is(1, ValueClass::Number)
            .is(0, ValueClass::Number)
            .and()
            .is(1, ValueClass::Complex)
            .is(0, ValueClass::Complex)
            .or()
            .and(),
    )
}

pub(crate) fn register(registry: &mut Registry) {
    let mut r = |name: &str, filter: Option<Filter>, code: Opcode| {
        registry.register(name, filter, Op::Complex(code));
    };
    let top = || Some(Filter::unary(ValueClass::Complex));
    let number_pair = || {
        Some(
            Filter::new()
                .is(1, ValueClass::Number)
                .is(0, ValueClass::Number)
                .and(),
        )
    };

    r("+", pair(), Opcode::Add);
    r("-", pair(), Opcode::Sub);
    r("*", pair(), Opcode::Mul);
    r("/", pair(), Opcode::Div);
    r("pow", pair(), Opcode::Pow);
    r("abs", top(), Opcode::Abs);
    r("arg", top(), Opcode::Arg);
    r("conj", top(), Opcode::Conj);
    r("neg", top(), Opcode::Neg);
    r("sgn", top(), Opcode::Sgn);
    r("sin", top(), Opcode::Sin);
    r("cos", top(), Opcode::Cos);
    r("tan", top(), Opcode::Tan);
    r("sinh", top(), Opcode::Sinh);
    r("cosh", top(), Opcode::Cosh);
    r("tanh", top(), Opcode::Tanh);
    r("exp", top(), Opcode::Exp);
    r("i", None, Opcode::ImaginaryUnit);
    r("real", top(), Opcode::Real);
    r("imag", top(), Opcode::Imag);
    r("split", top(), Opcode::Split);
    r(
        "cplx",
        Some(
            Filter::new()
                .is(0, ValueClass::Str)
                .is(0, ValueClass::Complex)
                .or(),
        ),
        Opcode::CplxCast,
    );
    r("cplx", number_pair(), Opcode::CplxFromPair);
    r(
        "polar",
        Some(
            Filter::new()
                .is(0, ValueClass::Str)
                .is(0, ValueClass::Complex)
                .or(),
        ),
        Opcode::PolarCast,
    );
    r("polar", number_pair(), Opcode::PolarFromPair);
}

pub(crate) fn execute(task: &mut Task<'_>, code: Opcode) -> Result<Flow, ExecuteError> {
    match code {
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Pow => {
            let y = pop_complex(task)?;
            let x = pop_complex(task)?;
            let result = match code {
                Opcode::Add => x + y,
                Opcode::Sub => x - y,
                Opcode::Mul => x * y,
                Opcode::Div => x / y,
                _ => x.powc(y),
            };
            task.stack_mut().push(result)?;
        }
        Opcode::Abs => {
            let x = pop_complex(task)?;
            task.stack_mut().push(x.norm())?;
        }
        Opcode::Arg => {
            let x = pop_complex(task)?;
            task.stack_mut().push(x.arg())?;
        }
        Opcode::Conj => {
            let value = pop_complex_value(task)?;
            let result = match value {
                ComplexValue::Polar { magnitude, angle } => ComplexValue::Polar {
                    magnitude,
                    angle: -angle,
                },
                ComplexValue::Cartesian(c) => ComplexValue::Cartesian(c.conj()),
            };
            task.stack_mut().push(Value::Complex(result))?;
        }
        Opcode::Neg => {
            let x = pop_complex(task)?;
            task.stack_mut().push(-x)?;
        }
        Opcode::Sgn => {
            let x = pop_complex(task)?;
            let norm = x.norm();
            let result = if norm == 0.0 { x } else { x / norm };
            task.stack_mut().push(result)?;
        }
        Opcode::Sin => unary(task, Complex64::sin)?,
        Opcode::Cos => unary(task, Complex64::cos)?,
        Opcode::Tan => unary(task, Complex64::tan)?,
        Opcode::Sinh => unary(task, Complex64::sinh)?,
        Opcode::Cosh => unary(task, Complex64::cosh)?,
        Opcode::Tanh => unary(task, Complex64::tanh)?,
        Opcode::Exp => unary(task, Complex64::exp)?,
        Opcode::ImaginaryUnit => task.stack_mut().push(Value::Complex(ComplexValue::I))?,
        Opcode::Real => {
            let x = pop_complex(task)?;
            task.stack_mut().push(x.re)?;
        }
        Opcode::Imag => {
            let x = pop_complex(task)?;
            task.stack_mut().push(x.im)?;
        }
        Opcode::Split => {
            let value = pop_complex_value(task)?;
            match value {
                ComplexValue::Cartesian(c) => {
                    task.stack_mut().push(c.re)?;
                    task.stack_mut().push(c.im)?;
                }
                ComplexValue::Polar { magnitude, angle } => {
                    task.stack_mut().push(magnitude)?;
                    task.stack_mut().push(angle)?;
                }
            }
        }
        Opcode::CplxCast => {
            let value = task.stack_mut().pop()?;
            let result = match &value {
                Value::Complex(c) => ComplexValue::Cartesian(c.cartesian()),
                Value::Str(s) => parse_cartesian(s.trim())
                    .map(ComplexValue::Cartesian)
                    .ok_or_else(|| convert_failed("complex", &value))?,
                other => to_complex(other)
                    .map(ComplexValue::Cartesian)
                    .ok_or_else(|| convert_failed("complex", &value))?,
            };
            task.stack_mut().push(Value::Complex(result))?;
        }
        Opcode::CplxFromPair => {
            let im = pop_double(task)?;
            let re = pop_double(task)?;
            task.stack_mut()
                .push(Value::Complex(ComplexValue::Cartesian(Complex64::new(
                    re, im,
                ))))?;
        }
        Opcode::PolarCast => {
            let value = task.stack_mut().pop()?;
            let result = match &value {
                Value::Complex(c) => {
                    let (magnitude, angle) = c.polar();
                    ComplexValue::Polar { magnitude, angle }
                }
                Value::Str(s) => parse_polar(s.trim())
                    .ok_or_else(|| convert_failed("polar complex", &value))?,
                _ => return Err(convert_failed("polar complex", &value)),
            };
            task.stack_mut().push(Value::Complex(result))?;
        }
        Opcode::PolarFromPair => {
            let angle = pop_double(task)?;
            let magnitude = pop_double(task)?;
            task.stack_mut()
                .push(Value::Complex(ComplexValue::Polar { magnitude, angle }))?;
        }
    }
    Ok(Flow::Proceed)
}

fn unary(task: &mut Task<'_>, f: impl FnOnce(Complex64) -> Complex64) -> Result<(), ExecuteError> {
    let x = pop_complex(task)?;
    task.stack_mut().push(f(x))?;
    Ok(())
}

fn pop_complex(task: &mut Task<'_>) -> Result<Complex64, ExecuteError> {
    let value = task.stack_mut().pop()?;
    to_complex(&value).ok_or_else(|| convert_failed("complex", &value))
}

fn pop_complex_value(task: &mut Task<'_>) -> Result<ComplexValue, ExecuteError> {
    let value = task.stack_mut().pop()?;
    match value {
        Value::Complex(c) => Ok(c),
        other => Err(convert_failed("complex", &other)),
    }
}

fn pop_double(task: &mut Task<'_>) -> Result<f64, ExecuteError> {
    let value = task.stack_mut().pop()?;
    to_f64(&value).ok_or_else(|| convert_failed("double", &value))
}

/// Parse `a`, `bj`, `a+bj` or `a-bj` (also accepting `i`).
fn parse_cartesian(text: &str) -> Option<Complex64> {
    let text = text.replace(['i', 'I', 'J'], "j");
    if let Some(imag_text) = text.strip_suffix('j') {
        // Split the imaginary suffix from an optional real part.
        let split = imag_text
            .char_indices()
            .skip(1)
            .find(|(_, c)| *c == '+' || *c == '-')
            .map(|(at, _)| at);
        return match split {
            Some(at) => {
                let re: f64 = imag_text[..at].trim().parse().ok()?;
                let im = parse_signed_imag(imag_text[at..].trim())?;
                Some(Complex64::new(re, im))
            }
            None => Some(Complex64::new(0.0, parse_signed_imag(imag_text.trim())?)),
        };
    }
    text.parse::<f64>().ok().map(|re| Complex64::new(re, 0.0))
}

fn parse_signed_imag(text: &str) -> Option<f64> {
    match text {
        "" | "+" => Some(1.0),
        "-" => Some(-1.0),
        other => other.parse().ok(),
    }
}

/// Parse `m:a` or `(m:a)` as magnitude and angle.
fn parse_polar(text: &str) -> Option<ComplexValue> {
    let text = text
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .unwrap_or(text);
    let (magnitude, angle) = text.split_once(':')?;
    Some(ComplexValue::Polar {
        magnitude: magnitude.trim().parse().ok()?,
        angle: angle.trim().parse().ok()?,
    })
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

    fn cart(re: f64, im: f64) -> Value {
        Value::Complex(ComplexValue::Cartesian(Complex64::new(re, im)))
    }

    #[test]
    fn string_forms_parse() {
        assert_eq!(parse_cartesian("3+4j"), Some(Complex64::new(3.0, 4.0)));
        assert_eq!(parse_cartesian("3-4j"), Some(Complex64::new(3.0, -4.0)));
        assert_eq!(parse_cartesian("j"), Some(Complex64::new(0.0, 1.0)));
        assert_eq!(parse_cartesian("-2.5"), Some(Complex64::new(-2.5, 0.0)));
    }

    #[test]
    fn arithmetic_mixes_reals() {
        assert_eq!(run("1 2 cplx 1 +"), vec![cart(2.0, 2.0)]);
        assert_eq!(run("i i *"), vec![cart(-1.0, 0.0)]);
    }

    #[test]
    fn modulus_and_argument() {
        assert_eq!(run("3 4 cplx abs"), vec![Value::Double(5.0)]);
        assert_eq!(run("0 1 cplx arg"), vec![Value::Double(std::f64::consts::FRAC_PI_2)]);
    }

    #[test]
    fn split_respects_form() {
        assert_eq!(run("3 4 cplx split"), vec![Value::Double(3.0), Value::Double(4.0)]);
        assert_eq!(
            run("2 0.5 polar split"),
            vec![Value::Double(2.0), Value::Double(0.5)]
        );
    }

    #[test]
    fn conj_preserves_polar_form() {
        match run("2 0.5 polar conj").pop().unwrap() {
            Value::Complex(ComplexValue::Polar { magnitude, angle }) => {
                assert_eq!(magnitude, 2.0);
                assert_eq!(angle, -0.5);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
