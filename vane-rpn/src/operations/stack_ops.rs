//! Stack manipulation operations.

use itertools::Itertools;
use vane_types::{Value, ValueClass};

use crate::error::ExecuteError;
use crate::filter::Filter;
use crate::registry::Registry;
use crate::task::{Flow, Task};

use super::Op;

/// Internal opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Dup,
    Drop,
    Swap,
    Over,
    Nip,
    Tuck,
    At,
    Copy,
    Clear,
    Depth,
    DepthAll,
    Mark,
    Unmark,
    UnmarkAll,
    MarkQuery,
    Roll,
    Reverse,
    Null,
    NullQuery,
    Default,
    Eq,
    Ne,
    Dump,
    DumpAll,
}

pub(crate) fn register(registry: &mut Registry) {
    let mut r = |name: &str, filter: Option<Filter>, code: Opcode| {
        registry.register(name, filter, Op::Stack(code));
    };
    let long_top = || Some(Filter::unary(ValueClass::Long));

    r("dup", None, Opcode::Dup);
    r(":", None, Opcode::Dup);
    r("drop", None, Opcode::Drop);
    r("swap", None, Opcode::Swap);
    r("over", None, Opcode::Over);
    r("nip", None, Opcode::Nip);
    r("tuck", None, Opcode::Tuck);
    r("at", long_top(), Opcode::At);
    r("copy", long_top(), Opcode::Copy);
    r("clear", long_top(), Opcode::Clear);
    r("depth", None, Opcode::Depth);
    r("depth*", None, Opcode::DepthAll);
    r("mark", None, Opcode::Mark);
    r("[", None, Opcode::Mark);
    r("unmark", None, Opcode::Unmark);
    r("]", None, Opcode::Unmark);
    r("unmark*", None, Opcode::UnmarkAll);
    r("mark?", None, Opcode::MarkQuery);
    r("roll", Some(Filter::new().is_long(0).is_long(1).and()), Opcode::Roll);
    r("reverse", None, Opcode::Reverse);
    r("null", None, Opcode::Null);
    r("null?", None, Opcode::NullQuery);
    r("default", None, Opcode::Default);
    r("eq", None, Opcode::Eq);
    r("ne", None, Opcode::Ne);
    r("dump", None, Opcode::Dump);
    r("dump*", None, Opcode::DumpAll);
}

pub(crate) fn execute(task: &mut Task<'_>, code: Opcode) -> Result<Flow, ExecuteError> {
    let stack = task.stack_mut();
    match code {
        Opcode::Dup => {
            let top = stack.peek(0)?.clone();
            stack.push(top)?;
        }
        Opcode::Drop => {
            stack.pop()?;
        }
        Opcode::Swap => {
            let y = stack.pop()?;
            let x = stack.pop()?;
            stack.push(y)?;
            stack.push(x)?;
        }
        Opcode::Over => {
            let under = stack.peek(1)?.clone();
            stack.push(under)?;
        }
        Opcode::Nip => {
            stack.remove(1)?;
        }
        Opcode::Tuck => {
            let y = stack.pop()?;
            let x = stack.pop()?;
            stack.push(y.clone())?;
            stack.push(x)?;
            stack.push(y)?;
        }
        Opcode::At => {
            let depth = index(stack.pop_long()?)?;
            let value = stack.peek(depth)?.clone();
            stack.push(value)?;
        }
        Opcode::Copy => {
            let count = index(stack.pop_long()?)?;
            if count > stack.total_size() {
                return Err(crate::error::StackError::Underflow.into());
            }
            let mut copies = Vec::with_capacity(count);
            for depth in (0..count).rev() {
                copies.push(stack.peek(depth)?.clone());
            }
            for value in copies {
                stack.push(value)?;
            }
        }
        Opcode::Clear => {
            let count = index(stack.pop_long()?)?;
            for _ in 0..count {
                stack.pop()?;
            }
        }
        Opcode::Depth => {
            let depth = stack.size() as i64;
            stack.push(depth)?;
        }
        Opcode::DepthAll => {
            let depth = stack.total_size() as i64;
            stack.push(depth)?;
        }
        Opcode::Mark => stack.mark(),
        Opcode::Unmark => stack.unmark()?,
        Opcode::UnmarkAll => stack.unmark_all(),
        Opcode::MarkQuery => {
            let marked = stack.is_marked();
            stack.push(marked)?;
        }
        Opcode::Roll => {
            let turns = stack.pop_long()?;
            let count = index(stack.pop_long()?)?;
            stack.roll(count, turns)?;
        }
        Opcode::Reverse => stack.reverse(),
        Opcode::Null => stack.push(Value::Null)?,
        Opcode::NullQuery => {
            let is_null = stack.pop()?.is_null();
            stack.push(is_null)?;
        }
        Opcode::Default => {
            let fallback = stack.pop()?;
            if stack.peek(0)?.is_null() {
                stack.pop()?;
                stack.push(fallback)?;
            }
        }
        Opcode::Eq | Opcode::Ne => {
            let y = stack.pop()?;
            let x = stack.pop()?;
            let equal = x == y;
            stack.push(if code == Opcode::Eq { equal } else { !equal })?;
        }
        Opcode::Dump => {
            tracing::debug!("stack frame: [{}]", stack.frame().iter().format(", "));
        }
        Opcode::DumpAll => {
            tracing::debug!("stack: [{}]", stack.iter().format(", "));
        }
    }
    Ok(Flow::Proceed)
}

fn index(raw: i64) -> Result<usize, ExecuteError> {
    usize::try_from(raw).map_err(|_| ExecuteError::ConvertFailed {
        to: "index",
        from: raw.to_string(),
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

    #[test]
    fn shuffle_words() {
        assert_eq!(run("1 2 swap"), vec![Value::Long(2), Value::Long(1)]);
        assert_eq!(
            run("1 2 over"),
            vec![Value::Long(1), Value::Long(2), Value::Long(1)]
        );
        assert_eq!(run("1 2 nip"), vec![Value::Long(2)]);
        assert_eq!(
            run("1 2 tuck"),
            vec![Value::Long(2), Value::Long(1), Value::Long(2)]
        );
    }

    #[test]
    fn copy_and_clear() {
        assert_eq!(
            run("1 2 2 copy"),
            vec![
                Value::Long(1),
                Value::Long(2),
                Value::Long(1),
                Value::Long(2)
            ]
        );
        assert_eq!(run("1 2 3 2 clear"), vec![Value::Long(1)]);
    }

    #[test]
    fn default_replaces_null_only() {
        assert_eq!(run("null 5 default"), vec![Value::Long(5)]);
        assert_eq!(run("7 5 default"), vec![Value::Long(7)]);
    }

    #[test]
    fn eq_is_null_safe() {
        assert_eq!(run("null null eq"), vec![Value::Boolean(true)]);
        assert_eq!(run("null 1 eq"), vec![Value::Boolean(false)]);
        assert_eq!(run("\"a\" \"a\" eq"), vec![Value::Boolean(true)]);
    }

    #[test]
    fn marks_and_depth() {
        assert_eq!(
            run("1 2 3 [ drop drop ] depth"),
            vec![Value::Long(1), Value::Long(1)]
        );
    }
}
