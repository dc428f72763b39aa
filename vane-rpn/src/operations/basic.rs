//! Context I/O and control primitives.
//!
//! This module also executes the compile-time operands: literals and the
//! `$n` / `%n` / `#n` accessor families, whose indices are carried on the
//! reference instead of living in the registry.

use vane_types::{Value, ValueClass};

use crate::compiler::{Operand, PointPart, StoreAccess};
use crate::error::ExecuteError;
use crate::filter::Filter;
use crate::registry::Registry;
use crate::task::{Flow, Task};

use super::Op;

/// Internal opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Log a breakpoint marker.
    Bpt,
    /// Raise a silent failure.
    Fail,
    /// Do nothing.
    Nop,
    /// Stop the program.
    Return,
    /// Replace the top value with its type name.
    Type,
    /// Test whether a point value is the deletion sentinel.
    Deleted,
    /// Push the stored value.
    Stored,
    /// Push whether a stored value is present.
    StoredQuery,
    /// Push the stored value, failing when absent.
    StoredRequire,
    /// Compile and run a source string against this task.
    Call,
}

pub(crate) fn register(registry: &mut Registry) {
    let mut r = |name: &str, filter: Option<Filter>, code: Opcode| {
        registry.register(name, filter, Op::Basic(code));
    };
    r("bpt", None, Opcode::Bpt);
    r("fail", None, Opcode::Fail);
    r("nop", None, Opcode::Nop);
    r("return", None, Opcode::Return);
    r("type", Some(Filter::new().is(0, ValueClass::Any)), Opcode::Type);
    r(
        "deleted?",
        Some(Filter::unary(ValueClass::Point)),
        Opcode::Deleted,
    );
    r("stored", None, Opcode::Stored);
    r("stored?", None, Opcode::StoredQuery);
    r("stored!", None, Opcode::StoredRequire);
    r("call", Some(Filter::unary(ValueClass::Str)), Opcode::Call);
}

pub(crate) fn execute(task: &mut Task<'_>, code: Opcode) -> Result<Flow, ExecuteError> {
    match code {
        Opcode::Bpt => {
            tracing::debug!(stack = ?task.stack().frame(), "breakpoint");
        }
        Opcode::Fail => return Err(ExecuteError::failure()),
        Opcode::Nop => {}
        Opcode::Return => return Ok(Flow::Return),
        Opcode::Type => {
            let value = task.stack_mut().pop()?;
            task.stack_mut().push(value.type_name())?;
        }
        Opcode::Deleted => {
            let value = task.stack_mut().pop()?;
            match value {
                Value::Point(point) => task.stack_mut().push(point.is_deleted())?,
                other => return Err(super::convert_failed("point", &other)),
            }
        }
        Opcode::Stored => {
            let stored = task.context().stored().cloned().unwrap_or(Value::Null);
            task.stack_mut().push(stored)?;
        }
        Opcode::StoredQuery => {
            let present = task.context().stored().is_some();
            task.stack_mut().push(present)?;
        }
        Opcode::StoredRequire => {
            let stored = task
                .context()
                .stored()
                .cloned()
                .ok_or_else(ExecuteError::failure)?;
            task.stack_mut().push(stored)?;
        }
        Opcode::Call => {
            let source = task.stack_mut().pop_str()?;
            let program = task.compiler().compile(&source)?;
            return task.run(program.refs());
        }
    }
    Ok(Flow::Proceed)
}

/// Execute a compile-time operand.
pub(crate) fn execute_operand(
    task: &mut Task<'_>,
    operand: &Operand,
) -> Result<Flow, ExecuteError> {
    match operand {
        Operand::Long(value) => task.stack_mut().push(*value)?,
        Operand::Double(value) => task.stack_mut().push(*value)?,
        Operand::Str(value) => task.stack_mut().push(value.clone())?,
        Operand::Input(index, part) => {
            let input = task
                .context()
                .input(*index)
                .ok_or_else(ExecuteError::failure)?;
            let value = point_part(input, *part);
            task.stack_mut().push(value)?;
        }
        Operand::InputCount => {
            let count = task.context().inputs().len() as i64;
            task.stack_mut().push(count)?;
        }
        Operand::AllInputs { require } => {
            let values: Vec<Value> = task
                .context()
                .inputs()
                .iter()
                .map(|input| input.value().clone())
                .collect();
            if *require && values.iter().any(Value::is_null) {
                return Err(ExecuteError::failure());
            }
            for value in values {
                task.stack_mut().push(value)?;
            }
        }
        Operand::Memory { index, require } => {
            let value = task.context().memory(*index);
            if *require && value.is_null() {
                return Err(ExecuteError::failure());
            }
            task.stack_mut().push(value)?;
        }
        Operand::MemoryStore(index, access) => {
            let value = match access {
                StoreAccess::Store => task.stack_mut().pop()?,
                StoreAccess::StoreKeep => task.stack_mut().peek(0)?.clone(),
            };
            task.context_mut().set_memory(*index, value);
        }
        Operand::Result(part) => {
            let value = point_part(task.context().result(), *part);
            task.stack_mut().push(value)?;
        }
        Operand::ResultStore(access) => {
            let value = match access {
                StoreAccess::Store => task.stack_mut().pop()?,
                StoreAccess::StoreKeep => task.stack_mut().peek(0)?.clone(),
            };
            task.context_mut().result_mut().set_value(value);
        }
        Operand::Param { index, require } => {
            match task.context().param(*index) {
                Some(param) => {
                    let param = param.to_owned();
                    task.stack_mut().push(param)?;
                }
                None if *require => return Err(ExecuteError::failure()),
                None => task.stack_mut().push(Value::Null)?,
            }
        }
    }
    Ok(Flow::Proceed)
}

fn point_part(point: &vane_types::PointValue, part: PointPart) -> Value {
    match part {
        PointPart::Value => point.value().clone(),
        PointPart::Stamp => Value::DateTime(point.stamp()),
        PointPart::State => point
            .state()
            .map(|s| Value::State(s.clone()))
            .unwrap_or(Value::Null),
        PointPart::Point => Value::Point(Box::new(point.clone())),
    }
}
