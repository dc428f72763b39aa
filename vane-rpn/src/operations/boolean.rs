//! Boolean operations.

use num_traits::Zero;
use vane_types::{Value, ValueClass};

use crate::error::ExecuteError;
use crate::filter::Filter;
use crate::registry::Registry;
use crate::task::{Flow, Task};

use super::Op;

/// Internal opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    And,
    Or,
    Xor,
    Not,
    True,
    False,
    Assert,
    RequireTrue,
    RequireFalse,
    Bool,
    IfElse,
}

pub(crate) fn register(registry: &mut Registry) {
    let mut r = |name: &str, filter: Option<Filter>, code: Opcode| {
        registry.register(name, filter, Op::Boolean(code));
    };
    let pair = || Some(Filter::binary(ValueClass::Boolean, ValueClass::Boolean));

    r("and", pair(), Opcode::And);
    r("or", pair(), Opcode::Or);
    r("xor", pair(), Opcode::Xor);
    r("not", Some(Filter::unary(ValueClass::Boolean)), Opcode::Not);
    r("true", None, Opcode::True);
    r("false", None, Opcode::False);
    r("assert", None, Opcode::Assert);
    r("true!", None, Opcode::RequireTrue);
    r("false!", None, Opcode::RequireFalse);
    r(
        "bool",
        Some(
            Filter::new()
                .is(0, ValueClass::Str)
                .is(0, ValueClass::Integer)
                .or()
                .is(0, ValueClass::Boolean)
                .or(),
        ),
        Opcode::Bool,
    );
    r("?:", Some(Filter::unary(ValueClass::Boolean)), Opcode::IfElse);
}

pub(crate) fn execute(task: &mut Task<'_>, code: Opcode) -> Result<Flow, ExecuteError> {
    let stack = task.stack_mut();
    match code {
        Opcode::And | Opcode::Or | Opcode::Xor => {
            let y = stack.pop_boolean()?;
            let x = stack.pop_boolean()?;
            let result = match code {
                Opcode::And => x && y,
                Opcode::Or => x || y,
                _ => x ^ y,
            };
            stack.push(result)?;
        }
        Opcode::Not => {
            let value = stack.pop_boolean()?;
            stack.push(!value)?;
        }
        Opcode::True => stack.push(true)?,
        Opcode::False => stack.push(false)?,
        Opcode::Assert => {
            let value = stack.pop()?;
            if matches!(value, Value::Null | Value::Boolean(false)) {
                return Err(ExecuteError::failure());
            }
        }
        Opcode::RequireTrue => {
            if !stack.pop_boolean()? {
                return Err(ExecuteError::failure());
            }
        }
        Opcode::RequireFalse => {
            if stack.pop_boolean()? {
                return Err(ExecuteError::failure());
            }
        }
        Opcode::Bool => {
            let value = stack.pop()?;
            let result = parse_boolean(&value).ok_or_else(|| super::convert_failed("boolean", &value))?;
            stack.push(result)?;
        }
        Opcode::IfElse => {
            let condition = stack.pop_boolean()?;
            let y = stack.pop()?;
            let x = stack.pop()?;
            stack.push(if condition { x } else { y })?;
        }
    }
    Ok(Flow::Proceed)
}

fn parse_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Boolean(b) => Some(*b),
        Value::Long(l) => Some(*l != 0),
        Value::BigInteger(i) => Some(!i.is_zero()),
        Value::Str(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "on" | "yes" | "1" => Some(true),
            "false" | "off" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_forms() {
        assert_eq!(parse_boolean(&Value::from("Yes")), Some(true));
        assert_eq!(parse_boolean(&Value::from("off")), Some(false));
        assert_eq!(parse_boolean(&Value::from("maybe")), None);
    }

    #[test]
    fn integer_forms() {
        assert_eq!(parse_boolean(&Value::Long(0)), Some(false));
        assert_eq!(parse_boolean(&Value::Long(-3)), Some(true));
    }
}
