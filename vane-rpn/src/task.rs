//! Task and context: the execution side of the VM.
//!
//! A [`Task`] is strictly single-threaded: it owns its [`Stack`] and
//! borrows its [`Context`] exclusively for the duration of one program
//! execution. Programs themselves are immutable and shared.

use vane_types::{DateTimeContext, PointId, PointValue, Stamp, Value};

use crate::compiler::{Compiler, LoopKind, OperationRef, RefKind, ReduceTarget};
use crate::error::ExecuteError;
use crate::stack::Stack;

/// Per-execution state: inputs, result, memory, parameters and settings.
#[derive(Debug, Clone)]
pub struct Context {
    inputs: Vec<PointValue>,
    result: PointValue,
    memory: Vec<Value>,
    params: Vec<String>,
    stored: Option<Value>,
    datetime: DateTimeContext,
    loop_limit: usize,
    fail_returns_null: bool,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Fresh context with an empty result point value.
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            result: PointValue::new(PointId::default(), Stamp::now(), None, Value::Null),
            memory: Vec::new(),
            params: Vec::new(),
            stored: None,
            datetime: DateTimeContext::new(),
            loop_limit: crate::params::DEFAULT_LOOP_LIMIT,
            fail_returns_null: false,
        }
    }

    /// Append an input point value.
    pub fn add_input(&mut self, input: PointValue) {
        self.inputs.push(input);
    }

    /// Append a string parameter.
    pub fn add_param(&mut self, param: impl Into<String>) {
        self.params.push(param.into());
    }

    /// Replace the result point value.
    pub fn set_result(&mut self, result: PointValue) {
        self.result = result;
    }

    /// Set the previously stored value of the result point.
    pub fn set_stored(&mut self, stored: Option<Value>) {
        self.stored = stored;
    }

    /// Cap loop iterations and stack growth.
    pub fn set_loop_limit(&mut self, limit: usize) {
        self.loop_limit = limit;
    }

    /// When set, a silent failure yields a null result instead of an error.
    pub fn set_fail_returns_null(&mut self, flag: bool) {
        self.fail_returns_null = flag;
    }

    /// The inputs, in index order.
    pub fn inputs(&self) -> &[PointValue] {
        &self.inputs
    }

    /// Input by 1-based index.
    pub fn input(&self, index: usize) -> Option<&PointValue> {
        index.checked_sub(1).and_then(|i| self.inputs.get(i))
    }

    /// The result point value.
    pub const fn result(&self) -> &PointValue {
        &self.result
    }

    /// Mutable result point value.
    pub fn result_mut(&mut self) -> &mut PointValue {
        &mut self.result
    }

    /// Parameter by 1-based index.
    pub fn param(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.params.get(i))
            .map(String::as_str)
    }

    /// The stored value, when one was provided.
    pub const fn stored(&self) -> Option<&Value> {
        self.stored.as_ref()
    }

    /// Memory slot read; unset slots read as null.
    pub fn memory(&self, index: usize) -> Value {
        self.memory.get(index).cloned().unwrap_or(Value::Null)
    }

    /// Memory slot write; the slot vector grows on demand.
    pub fn set_memory(&mut self, index: usize, value: Value) {
        if index >= self.memory.len() {
            self.memory.resize(index + 1, Value::Null);
        }
        self.memory[index] = value;
    }

    /// The date-time context.
    pub const fn datetime(&self) -> &DateTimeContext {
        &self.datetime
    }

    /// Mutable date-time context.
    pub fn datetime_mut(&mut self) -> &mut DateTimeContext {
        &mut self.datetime
    }

    /// The iteration and recursion cap.
    pub const fn loop_limit(&self) -> usize {
        self.loop_limit
    }

    /// Whether silent failures null the result instead of erroring.
    pub const fn fail_returns_null(&self) -> bool {
        self.fail_returns_null
    }
}

/// Outcome of executing a reference sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Continue with the next reference.
    Proceed,
    /// The program requested an early return.
    Return,
}

impl Flow {
    /// Return `true` if execution should continue.
    pub const fn should_continue(&self) -> bool {
        matches!(self, Self::Proceed)
    }
}

/// One program execution: a stack, a context and the applying containers.
#[derive(Debug)]
pub struct Task<'c> {
    stack: Stack,
    context: &'c mut Context,
    applying: Vec<Value>,
    compiler: Compiler,
}

impl<'c> Task<'c> {
    pub(crate) fn new(context: &'c mut Context, compiler: Compiler) -> Self {
        let stack = Stack::new(context.loop_limit().max(crate::stack::DEFAULT_STACK_LIMIT));
        Self {
            stack,
            context,
            applying: Vec::new(),
            compiler,
        }
    }

    /// The task's stack.
    pub const fn stack(&self) -> &Stack {
        &self.stack
    }

    /// Mutable access to the task's stack.
    pub fn stack_mut(&mut self) -> &mut Stack {
        &mut self.stack
    }

    /// The execution context.
    pub fn context(&self) -> &Context {
        self.context
    }

    /// Mutable access to the execution context.
    pub fn context_mut(&mut self) -> &mut Context {
        self.context
    }

    /// The compiler this task's program was built by (used by `call`).
    pub const fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    /// The container currently being applied, if any.
    pub fn applying(&self) -> Option<&Value> {
        self.applying.last()
    }

    /// Mutable view of the container currently being applied.
    pub fn applying_mut(&mut self) -> Option<&mut Value> {
        self.applying.last_mut()
    }

    /// Begin applying a container.
    pub fn push_applying(&mut self, container: Value) {
        self.applying.push(container);
    }

    /// Finish applying the innermost container and return it.
    pub fn pop_applying(&mut self) -> Option<Value> {
        self.applying.pop()
    }

    /// Execute a sequence of references.
    pub(crate) fn run(&mut self, refs: &[OperationRef]) -> Result<Flow, ExecuteError> {
        for reference in refs {
            let flow = self.execute_ref(reference)?;
            if !flow.should_continue() {
                return Ok(flow);
            }
        }
        Ok(Flow::Proceed)
    }

    fn execute_ref(&mut self, reference: &OperationRef) -> Result<Flow, ExecuteError> {
        match &reference.kind {
            RefKind::Operand(operand) => {
                crate::operations::basic::execute_operand(self, operand)
            }
            RefKind::Operation(chain) => {
                let selected = chain.iter().find(|entry| {
                    entry
                        .filter
                        .as_ref()
                        .map_or(true, |f| f.accepts(&self.stack, self.applying.last()))
                });
                match selected {
                    Some(entry) => crate::operations::execute(self, entry.op),
                    None => Err(ExecuteError::OperationArgs {
                        name: reference.name.clone(),
                        position: reference.position,
                    }),
                }
            }
            RefKind::Block(body) => self.run(body),
            RefKind::Loop { kind, target, body } => self.run_loop(*kind, *target, body),
            RefKind::Try { on_try, on_catch } => self.run_try(on_try, on_catch),
        }
    }

    fn run_loop(
        &mut self,
        kind: LoopKind,
        target: ReduceTarget,
        body: &[OperationRef],
    ) -> Result<Flow, ExecuteError> {
        let limit = self.context.loop_limit();
        let mut iterations = 0usize;
        match kind {
            LoopKind::Do => loop {
                let flow = self.run(body)?;
                if !flow.should_continue() {
                    return Ok(flow);
                }
                if !self.stack.pop_boolean()? {
                    return Ok(Flow::Proceed);
                }
                iterations += 1;
                if iterations > limit {
                    return Err(loop_limit(kind, limit));
                }
            },
            LoopKind::While => loop {
                if !self.stack.pop_boolean()? {
                    return Ok(Flow::Proceed);
                }
                let flow = self.run(body)?;
                if !flow.should_continue() {
                    return Ok(flow);
                }
                iterations += 1;
                if iterations > limit {
                    return Err(loop_limit(kind, limit));
                }
            },
            LoopKind::Reduce => {
                let depth = match target {
                    ReduceTarget::Literal(n) => n,
                    ReduceTarget::FromStack => {
                        let n = self.stack.pop_long()?;
                        usize::try_from(n).map_err(|_| ExecuteError::ConvertFailed {
                            to: "reduce target",
                            from: n.to_string(),
                        })?
                    }
                };
                while self.stack.size() > depth {
                    let flow = self.run(body)?;
                    if !flow.should_continue() {
                        return Ok(flow);
                    }
                    iterations += 1;
                    if iterations > limit {
                        return Err(loop_limit(kind, limit));
                    }
                }
                Ok(Flow::Proceed)
            }
        }
    }

    fn run_try(
        &mut self,
        on_try: &[OperationRef],
        on_catch: &[OperationRef],
    ) -> Result<Flow, ExecuteError> {
        let saved = self.stack.mark_count();
        self.stack.mark();
        match self.run(on_try) {
            Ok(flow) => {
                if self.stack.mark_count() <= saved {
                    return Err(ExecuteError::message("try lost its stack mark"));
                }
                while self.stack.mark_count() > saved {
                    self.stack.unmark()?;
                }
                Ok(flow)
            }
            Err(error) if error.is_silent() => {
                if self.stack.mark_count() <= saved {
                    return Err(ExecuteError::message("try lost its stack mark"));
                }
                while self.stack.mark_count() > saved {
                    self.stack.clear_frame()?;
                }
                self.run(on_catch)
            }
            Err(error) => Err(error),
        }
    }
}

fn loop_limit(kind: LoopKind, limit: usize) -> ExecuteError {
    ExecuteError::LoopLimit {
        name: kind.display_name(),
        limit,
    }
}
