//! String operations, formatting and logging words.

use vane_types::{Value, ValueClass};

use crate::error::ExecuteError;
use crate::filter::Filter;
use crate::registry::Registry;
use crate::task::{Flow, Task};

use super::{to_f64, Op};

/// Internal opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Concat,
    EmptyQuery,
    Trim,
    Lower,
    Upper,
    Substring,
    Format,
    FormatAll,
    Str,
    StrQuery,
    LogDebug,
    LogInfo,
    LogWarn,
    LogError,
}

pub(crate) fn register(registry: &mut Registry) {
    let mut r = |name: &str, filter: Option<Filter>, code: Opcode| {
        registry.register(name, filter, Op::Str(code));
    };
    let top = || Some(Filter::unary(ValueClass::Str));

    r(
        "+",
        Some(Filter::binary(ValueClass::Str, ValueClass::Str)),
        Opcode::Concat,
    );
    r("empty?", top(), Opcode::EmptyQuery);
    r("trim", top(), Opcode::Trim);
    r("lower", top(), Opcode::Lower);
    r("upper", top(), Opcode::Upper);
    r(
        "substring",
        Some(
            Filter::new()
                .is(2, ValueClass::Str)
                .is(1, ValueClass::Long)
                .and()
                .is(0, ValueClass::Long)
                .and(),
        ),
        Opcode::Substring,
    );
    r("format", top(), Opcode::Format);
    r("format*", top(), Opcode::FormatAll);
    r("str", Some(Filter::new().is(0, ValueClass::Any)), Opcode::Str);
    r(
        "str?",
        Some(Filter::new().is(0, ValueClass::Any)),
        Opcode::StrQuery,
    );
    r("debug", top(), Opcode::LogDebug);
    r("info", top(), Opcode::LogInfo);
    r("warn", top(), Opcode::LogWarn);
    r("error", top(), Opcode::LogError);
}

pub(crate) fn execute(task: &mut Task<'_>, code: Opcode) -> Result<Flow, ExecuteError> {
    match code {
        Opcode::Concat => {
            let y = task.stack_mut().pop_str()?;
            let mut x = task.stack_mut().pop_str()?;
            x.push_str(&y);
            task.stack_mut().push(x)?;
        }
        Opcode::EmptyQuery => {
            let s = task.stack_mut().pop_str()?;
            task.stack_mut().push(s.is_empty())?;
        }
        Opcode::Trim => {
            let s = task.stack_mut().pop_str()?;
            let trimmed = s.trim().to_owned();
            task.stack_mut().push(trimmed)?;
        }
        Opcode::Lower => {
            let s = task.stack_mut().pop_str()?;
            task.stack_mut().push(s.to_lowercase())?;
        }
        Opcode::Upper => {
            let s = task.stack_mut().pop_str()?;
            task.stack_mut().push(s.to_uppercase())?;
        }
        Opcode::Substring => {
            let end = task.stack_mut().pop_long()?;
            let start = task.stack_mut().pop_long()?;
            let s = task.stack_mut().pop_str()?;
            let chars: Vec<char> = s.chars().collect();
            let valid = start >= 0 && end >= start && (end as usize) <= chars.len();
            if !valid {
                return Err(ExecuteError::SubstringOutOfBounds {
                    start,
                    end,
                    len: chars.len(),
                });
            }
            let result: String = chars[start as usize..end as usize].iter().collect();
            task.stack_mut().push(result)?;
        }
        Opcode::Format | Opcode::FormatAll => {
            let template = task.stack_mut().pop_str()?;
            let count = if code == Opcode::Format {
                task.stack().size()
            } else {
                task.stack().total_size()
            };
            let mut args = Vec::with_capacity(count);
            for _ in 0..count {
                args.push(task.stack_mut().pop()?);
            }
            args.reverse();
            let result = apply_format(&template, &args)?;
            task.stack_mut().push(result)?;
        }
        Opcode::Str => {
            let value = task.stack_mut().pop()?;
            let text = coerce_str(task, &value);
            task.stack_mut().push(text)?;
        }
        Opcode::StrQuery => {
            let value = task.stack_mut().pop()?;
            task.stack_mut().push(matches!(value, Value::Str(_)))?;
        }
        Opcode::LogDebug => {
            let message = task.stack_mut().pop_str()?;
            tracing::debug!("{message}");
        }
        Opcode::LogInfo => {
            let message = task.stack_mut().pop_str()?;
            tracing::info!("{message}");
        }
        Opcode::LogWarn => {
            let message = task.stack_mut().pop_str()?;
            tracing::warn!("{message}");
        }
        Opcode::LogError => {
            let message = task.stack_mut().pop_str()?;
            tracing::error!("{message}");
            return Err(ExecuteError::message(message));
        }
    }
    Ok(Flow::Proceed)
}

/// Render a value the way the `str` coercion does.
fn coerce_str(task: &Task<'_>, value: &Value) -> String {
    match value {
        Value::DateTime(stamp) => task
            .context()
            .datetime()
            .naive(*stamp)
            .format("%Y-%m-%dT%H:%M:%S%.3f")
            .to_string(),
        Value::State(state) => state
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| state.name().to_owned()),
        other => other.to_string(),
    }
}

/// Minimal printf-style interpreter: `%s`, `%d`, `%f` with optional
/// width and precision, and `%%` for a literal percent.
fn apply_format(template: &str, args: &[Value]) -> Result<String, ExecuteError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut next_arg = 0usize;
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        let mut width = String::new();
        let mut precision = String::new();
        let mut in_precision = false;
        let conversion = loop {
            match chars.next() {
                None => {
                    return Err(ExecuteError::FormatFailed(format!(
                        "truncated conversion in '{template}'"
                    )))
                }
                Some('.') => in_precision = true,
                Some(d) if d.is_ascii_digit() || d == '-' => {
                    if in_precision {
                        precision.push(d);
                    } else {
                        width.push(d);
                    }
                }
                Some(conv) => break conv,
            }
        };
        let arg = args.get(next_arg).ok_or_else(|| {
            ExecuteError::FormatFailed(format!("missing argument {next_arg} for '{template}'"))
        })?;
        next_arg += 1;
        let rendered = match conversion {
            's' => arg.to_string(),
            'd' => match arg {
                Value::Long(l) => l.to_string(),
                Value::BigInteger(i) => i.to_string(),
                other => {
                    return Err(ExecuteError::FormatFailed(format!(
                        "%d applied to {}",
                        other.type_name()
                    )))
                }
            },
            'f' => {
                let x = to_f64(arg).ok_or_else(|| {
                    ExecuteError::FormatFailed(format!("%f applied to {}", arg.type_name()))
                })?;
                let precision: usize = precision.parse().unwrap_or(6);
                format!("{x:.precision$}")
            }
            other => {
                return Err(ExecuteError::FormatFailed(format!(
                    "unknown conversion '%{other}'"
                )))
            }
        };
        let width: i64 = width.parse().unwrap_or(0);
        pad(&mut out, &rendered, width);
    }
    Ok(out)
}

fn pad(out: &mut String, rendered: &str, width: i64) {
    let len = rendered.chars().count() as i64;
    if width > len {
        for _ in 0..(width - len) {
            out.push(' ');
        }
        out.push_str(rendered);
    } else if width < -len {
        out.push_str(rendered);
        for _ in 0..(-width - len) {
            out.push(' ');
        }
    } else {
        out.push_str(rendered);
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

    #[test]
    fn concat_and_case() {
        assert_eq!(run("\"foo\" \"bar\" +"), vec![Value::from("foobar")]);
        assert_eq!(run("\"Foo\" upper"), vec![Value::from("FOO")]);
        assert_eq!(run("\"  x \" trim"), vec![Value::from("x")]);
    }

    #[test]
    fn substring_bounds() {
        assert_eq!(run("\"hello\" 1 3 substring"), vec![Value::from("el")]);
        let compiler =
            Compiler::new(Arc::new(Registry::with_defaults()), Params::new()).unwrap();
        let program = compiler.compile("\"hi\" 0 5 substring").unwrap();
        let mut context = Context::new();
        assert!(matches!(
            program.execute(&mut context).unwrap_err(),
            ExecuteError::SubstringOutOfBounds { .. }
        ));
    }

    #[test]
    fn format_consumes_frame() {
        assert_eq!(
            run("1 2.5 \"x=%d y=%.1f\" format"),
            vec![Value::from("x=1 y=2.5")]
        );
    }

    #[test]
    fn format_reports_missing_args() {
        let compiler =
            Compiler::new(Arc::new(Registry::with_defaults()), Params::new()).unwrap();
        let program = compiler.compile("\"%d\" format").unwrap();
        let mut context = Context::new();
        assert!(matches!(
            program.execute(&mut context).unwrap_err(),
            ExecuteError::FormatFailed(_)
        ));
    }

    #[test]
    fn str_coerces_any_value() {
        assert_eq!(run("12 str"), vec![Value::from("12")]);
        assert_eq!(run("true str"), vec![Value::from("true")]);
        assert_eq!(run("\"s\" str?"), vec![Value::Boolean(true)]);
        assert_eq!(run("1 str?"), vec![Value::Boolean(false)]);
    }

    #[test]
    fn error_word_propagates_message() {
        let compiler =
            Compiler::new(Arc::new(Registry::with_defaults()), Params::new()).unwrap();
        let program = compiler.compile("try \"boom\" error catch 1 end").unwrap();
        let mut context = Context::new();
        let error = program.execute(&mut context).unwrap_err();
        assert!(!error.is_silent());
    }
}
