//! Tuple and dict operations over the applying container.
//!
//! A container is operated on by *applying* it: `tuple` and `dict` begin a
//! fresh one, `apply` takes one off the stack, and `done` pushes the
//! applied container back. While a container is applied, the editing words
//! (gated by `is_applying` filters) mutate it in place.

use vane_types::{Value, ValueClass};

use crate::error::ExecuteError;
use crate::filter::Filter;
use crate::registry::Registry;
use crate::task::{Flow, Task};

use super::Op;

/// Internal opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    NewTuple,
    NewDict,
    Apply,
    Done,
    Append,
    GetIndex,
    PutIndex,
    RemoveIndex,
    GetKey,
    PutKey,
    RemoveKey,
    Size,
    Keys,
    TupleValues,
    DictValues,
    Entries,
}

pub(crate) fn register(registry: &mut Registry) {
    let mut r = |name: &str, filter: Option<Filter>, code: Opcode| {
        registry.register(name, filter, Op::Container(code));
    };
    let on_tuple = || Some(Filter::new().is_applying(ValueClass::Tuple));
    let on_dict = || Some(Filter::new().is_applying(ValueClass::Dict));
    let on_any = || Some(Filter::new().is_applying(ValueClass::Container));

    r("tuple", None, Opcode::NewTuple);
    r("dict", None, Opcode::NewDict);
    r(
        "apply",
        Some(Filter::unary(ValueClass::Container)),
        Opcode::Apply,
    );
    r("done", on_any(), Opcode::Done);
    r("append", on_tuple(), Opcode::Append);
    r(
        "get",
        Some(Filter::new().is_applying(ValueClass::Tuple).is_long(0).and()),
        Opcode::GetIndex,
    );
    r(
        "put",
        Some(Filter::new().is_applying(ValueClass::Tuple).is_long(1).and()),
        Opcode::PutIndex,
    );
    r(
        "remove",
        Some(Filter::new().is_applying(ValueClass::Tuple).is_long(0).and()),
        Opcode::RemoveIndex,
    );
    r(
        "get",
        Some(
            Filter::new()
                .is_applying(ValueClass::Dict)
                .is(0, ValueClass::Str)
                .and(),
        ),
        Opcode::GetKey,
    );
    r(
        "put",
        Some(
            Filter::new()
                .is_applying(ValueClass::Dict)
                .is(1, ValueClass::Str)
                .and(),
        ),
        Opcode::PutKey,
    );
    r(
        "remove",
        Some(
            Filter::new()
                .is_applying(ValueClass::Dict)
                .is(0, ValueClass::Str)
                .and(),
        ),
        Opcode::RemoveKey,
    );
    r("size", on_any(), Opcode::Size);
    r("keys", on_dict(), Opcode::Keys);
    r("values", on_tuple(), Opcode::TupleValues);
    r("values", on_dict(), Opcode::DictValues);
    r("entries", on_dict(), Opcode::Entries);
}

pub(crate) fn execute(task: &mut Task<'_>, code: Opcode) -> Result<Flow, ExecuteError> {
    match code {
        Opcode::NewTuple => task.push_applying(Value::Tuple(Vec::new())),
        Opcode::NewDict => task.push_applying(Value::Dict(Default::default())),
        Opcode::Apply => {
            let container = task.stack_mut().pop()?;
            match container {
                Value::Tuple(_) | Value::Dict(_) => task.push_applying(container),
                other => return Err(super::convert_failed("container", &other)),
            }
        }
        Opcode::Done => {
            let container = task
                .pop_applying()
                .ok_or_else(|| ExecuteError::message("no container is being applied"))?;
            task.stack_mut().push(container)?;
        }
        Opcode::Append => {
            let value = task.stack_mut().pop()?;
            tuple_mut(task)?.push(value);
        }
        Opcode::GetIndex => {
            let index = task.stack_mut().pop_long()?;
            let tuple = tuple_mut(task)?;
            let value = usize::try_from(index)
                .ok()
                .and_then(|i| tuple.get(i))
                .cloned()
                .ok_or(ExecuteError::TupleIndexOutOfBounds {
                    index,
                    size: tuple.len(),
                })?;
            task.stack_mut().push(value)?;
        }
        Opcode::PutIndex => {
            let value = task.stack_mut().pop()?;
            let index = task.stack_mut().pop_long()?;
            let limit = task.context().loop_limit();
            let tuple = tuple_mut(task)?;
            let at = usize::try_from(index)
                .ok()
                .filter(|i| *i <= limit)
                .ok_or(ExecuteError::TupleIndexOutOfBounds {
                    index,
                    size: tuple.len(),
                })?;
            // A store past the end pads the gap with nulls.
            if at >= tuple.len() {
                tuple.resize(at + 1, Value::Null);
            }
            tuple[at] = value;
        }
        Opcode::RemoveIndex => {
            let index = task.stack_mut().pop_long()?;
            let tuple = tuple_mut(task)?;
            let at = usize::try_from(index)
                .ok()
                .filter(|i| *i < tuple.len())
                .ok_or(ExecuteError::TupleIndexOutOfBounds {
                    index,
                    size: tuple.len(),
                })?;
            tuple.remove(at);
        }
        Opcode::GetKey => {
            let key = task.stack_mut().pop_str()?;
            let value = dict_mut(task)?.get(&key).cloned().unwrap_or(Value::Null);
            task.stack_mut().push(value)?;
        }
        Opcode::PutKey => {
            let value = task.stack_mut().pop()?;
            let key = task.stack_mut().pop_str()?;
            dict_mut(task)?.insert(key, value);
        }
        Opcode::RemoveKey => {
            let key = task.stack_mut().pop_str()?;
            dict_mut(task)?.remove(&key);
        }
        Opcode::Size => {
            let size = match task.applying() {
                Some(Value::Tuple(t)) => t.len() as i64,
                Some(Value::Dict(d)) => d.len() as i64,
                _ => return Err(ExecuteError::message("no container is being applied")),
            };
            task.stack_mut().push(size)?;
        }
        Opcode::Keys => {
            let keys: Vec<String> = dict_mut(task)?.keys().cloned().collect();
            for key in keys {
                task.stack_mut().push(key)?;
            }
        }
        Opcode::TupleValues => {
            let values = tuple_mut(task)?.clone();
            for value in values {
                task.stack_mut().push(value)?;
            }
        }
        Opcode::DictValues => {
            let values: Vec<Value> = dict_mut(task)?.values().cloned().collect();
            for value in values {
                task.stack_mut().push(value)?;
            }
        }
        Opcode::Entries => {
            let entries: Vec<(String, Value)> = dict_mut(task)?
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (key, value) in entries {
                task.stack_mut().push(value)?;
                task.stack_mut().push(key)?;
            }
        }
    }
    Ok(Flow::Proceed)
}

fn tuple_mut<'t>(task: &'t mut Task<'_>) -> Result<&'t mut Vec<Value>, ExecuteError> {
    match task.applying_mut() {
        Some(Value::Tuple(tuple)) => Ok(tuple),
        _ => Err(ExecuteError::message("no tuple is being applied")),
    }
}

fn dict_mut<'t>(
    task: &'t mut Task<'_>,
) -> Result<&'t mut std::collections::BTreeMap<String, Value>, ExecuteError> {
    match task.applying_mut() {
        Some(Value::Dict(dict)) => Ok(dict),
        _ => Err(ExecuteError::message("no dict is being applied")),
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
    fn tuple_build_and_read() {
        assert_eq!(
            run("tuple 10 append 20 append done"),
            vec![Value::Tuple(vec![Value::Long(10), Value::Long(20)])]
        );
        assert_eq!(
            run("tuple 10 append 20 append 1 get"),
            vec![Value::Long(20)]
        );
    }

    #[test]
    fn tuple_put_pads_with_nulls() {
        assert_eq!(
            run("tuple 2 7 put done"),
            vec![Value::Tuple(vec![
                Value::Null,
                Value::Null,
                Value::Long(7)
            ])]
        );
    }

    #[test]
    fn dict_build_and_read() {
        assert_eq!(
            run("dict \"a\" 1 put \"b\" 2 put size"),
            vec![Value::Long(2)]
        );
        assert_eq!(
            run("dict \"a\" 1 put \"a\" get"),
            vec![Value::Long(1)]
        );
    }

    #[test]
    fn dict_entries_push_value_then_key() {
        assert_eq!(
            run("dict \"k\" 9 put entries"),
            vec![Value::Long(9), Value::from("k")]
        );
    }

    #[test]
    fn apply_reuses_existing_container() {
        assert_eq!(
            run("tuple 1 append done apply 2 append done"),
            vec![Value::Tuple(vec![Value::Long(1), Value::Long(2)])]
        );
    }

    #[test]
    fn out_of_bounds_get_is_reported() {
        let compiler =
            Compiler::new(Arc::new(Registry::with_defaults()), Params::new()).unwrap();
        let program = compiler.compile("tuple 3 get").unwrap();
        let mut context = Context::new();
        assert!(matches!(
            program.execute(&mut context).unwrap_err(),
            ExecuteError::TupleIndexOutOfBounds { .. }
        ));
    }
}
