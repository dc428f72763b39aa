//! Compilation of source text into executable programs.
//!
//! A [`Program`] is an immutable tree of [`OperationRef`]s: flow constructs
//! own their body references instead of compiling to flat bytecode with
//! jumps, which keeps source positions available for diagnostics. Programs
//! are cheaply cloneable and safely shared by concurrent tasks.

use std::sync::Arc;

use crate::error::{CompileError, ExecuteError};
use crate::params::Params;
use crate::preprocessor::Preprocessor;
use crate::registry::{OverloadChain, Registry};
use crate::task::Context;
use crate::tokenizer::{Position, Spanned, Token};

/// Which aspect of an input or result a reference reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointPart {
    /// The value itself.
    Value,
    /// The stamp.
    Stamp,
    /// The state.
    State,
    /// The whole point value.
    Point,
}

/// How a memory or result slot is accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreAccess {
    /// Pop the stored value off the stack.
    Store,
    /// Store the top value and keep it on the stack.
    StoreKeep,
}

/// A compile-time operand carried on a reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Integer literal.
    Long(i64),
    /// Floating literal.
    Double(f64),
    /// String literal.
    Str(String),
    /// Input access: `$n`, `$n@`, `$n$`, `$n.` (1-based index).
    Input(usize, PointPart),
    /// Input count: `$#`.
    InputCount,
    /// Push all input values: `$*` (`$*!` requires each non-null).
    AllInputs {
        /// Fail on a null input value.
        require: bool,
    },
    /// Memory read: `%n` (`%n!` requires non-null).
    Memory {
        /// Slot index.
        index: usize,
        /// Fail when the slot is null.
        require: bool,
    },
    /// Memory store: `%n=` / `:%n=`.
    MemoryStore(usize, StoreAccess),
    /// Result read: `$0`, `$0@`, `$0$`.
    Result(PointPart),
    /// Result store: `$0=` / `:$0=`.
    ResultStore(StoreAccess),
    /// Parameter access: `#n` (`#n!` requires presence).
    Param {
        /// Parameter index (1-based).
        index: usize,
        /// Fail when the parameter is absent.
        require: bool,
    },
}

/// The loop family of a loop reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    /// Run body, pop condition, continue while true.
    Do,
    /// Pop condition, run body while true.
    While,
    /// Run body while the frame is deeper than the target.
    Reduce,
}

impl LoopKind {
    /// Capitalized name used in limit diagnostics.
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Do => "Do",
            Self::While => "While",
            Self::Reduce => "Reduce",
        }
    }
}

/// Where a reduce loop finds its target depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceTarget {
    /// Fixed target from the source (default 1).
    Literal(usize),
    /// Popped from the stack at loop entry.
    FromStack,
}

/// What a reference does when executed.
#[derive(Debug, Clone)]
pub enum RefKind {
    /// Resolve an overload against the stack and execute it.
    Operation(OverloadChain),
    /// Push or store an operand.
    Operand(Operand),
    /// Run a sequence of references.
    Block(Vec<OperationRef>),
    /// Run a loop.
    Loop {
        /// Loop family.
        kind: LoopKind,
        /// Reduce target, for reduce loops.
        target: ReduceTarget,
        /// Body references.
        body: Vec<OperationRef>,
    },
    /// Run `on_try`, catching silent failures into `on_catch`.
    Try {
        /// The protected body.
        on_try: Vec<OperationRef>,
        /// The handler body.
        on_catch: Vec<OperationRef>,
    },
}

/// One node of a compiled program.
#[derive(Debug, Clone)]
pub struct OperationRef {
    pub(crate) name: String,
    pub(crate) position: Position,
    pub(crate) kind: RefKind,
}

impl OperationRef {
    /// The source word this reference was compiled from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the word appeared in the source.
    pub const fn position(&self) -> Position {
        self.position
    }
}

/// An immutable, compiled program.
#[derive(Debug, Clone)]
pub struct Program {
    refs: Arc<Vec<OperationRef>>,
    compiler: Compiler,
}

impl Program {
    /// Execute against a context.
    ///
    /// With the context's fail-returns-null flag set, a silent failure
    /// nulls the result value instead of surfacing an error.
    pub fn execute(&self, context: &mut Context) -> Result<(), ExecuteError> {
        let outcome = {
            let mut task = crate::task::Task::new(context, self.compiler.clone());
            task.run(&self.refs)
        };
        match outcome {
            Ok(_) => Ok(()),
            Err(error) if error.is_silent() && context.fail_returns_null() => {
                context.result_mut().set_value(vane_types::Value::Null);
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// Execute against a context and return the final stack, bottom first.
    ///
    /// Mostly useful for tests and diagnostics; production callers read
    /// the context's result instead.
    pub fn evaluate(
        &self,
        context: &mut Context,
    ) -> Result<Vec<vane_types::Value>, ExecuteError> {
        let mut task = crate::task::Task::new(context, self.compiler.clone());
        task.run(&self.refs)?;
        Ok(task.stack().iter().cloned().collect())
    }

    pub(crate) fn refs(&self) -> &[OperationRef] {
        &self.refs
    }
}

/// Compiles source text against a registry and engine parameters.
#[derive(Debug, Clone)]
pub struct Compiler {
    registry: Arc<Registry>,
    preprocessor: Arc<Preprocessor>,
    params: Params,
}

impl Compiler {
    /// Build a compiler. Macro definitions are taken from the parameters.
    pub fn new(registry: Arc<Registry>, params: Params) -> Result<Self, CompileError> {
        let preprocessor = Arc::new(Preprocessor::new(&params)?);
        Ok(Self {
            registry,
            preprocessor,
            params,
        })
    }

    /// The engine parameters this compiler was built with.
    pub const fn params(&self) -> &Params {
        &self.params
    }

    /// Compile one source text into a program.
    pub fn compile(&self, source: &str) -> Result<Program, CompileError> {
        let tokens = self.preprocessor.process(source)?;
        let mut iter = tokens.into_iter().peekable();
        let (refs, _) = self.compile_seq(&mut iter, &[], Position::START)?;
        Ok(Program {
            refs: Arc::new(refs),
            compiler: self.clone(),
        })
    }

    /// Compile references until one of `terminators` (consumed) or EOF.
    fn compile_seq(
        &self,
        iter: &mut std::iter::Peekable<std::vec::IntoIter<Spanned>>,
        terminators: &[&str],
        start: Position,
    ) -> Result<(Vec<OperationRef>, String), CompileError> {
        let mut refs = Vec::new();
        loop {
            let Some(spanned) = iter.next() else {
                if terminators.is_empty() {
                    return Ok((refs, String::new()));
                }
                return Err(CompileError::MissingBlockEnd(start));
            };
            match spanned.token {
                Token::Str(text) => refs.push(OperationRef {
                    name: "\"\"".to_owned(),
                    position: spanned.position,
                    kind: RefKind::Operand(Operand::Str(text)),
                }),
                Token::Word(word) => {
                    let lower = word.to_lowercase();
                    if terminators.iter().any(|t| *t == lower) {
                        return Ok((refs, lower));
                    }
                    if matches!(lower.as_str(), "end" | "}" | "catch") {
                        // A terminator with nothing open.
                        return Err(CompileError::MissingInstructions(spanned.position));
                    }
                    refs.push(self.compile_word(word, spanned.position, iter)?);
                }
                Token::Comma | Token::Eof => {}
                Token::LeftParen | Token::RightParen => {
                    return Err(CompileError::UnbalancedParenthesis(spanned.position))
                }
            }
        }
    }

    fn compile_word(
        &self,
        word: String,
        position: Position,
        iter: &mut std::iter::Peekable<std::vec::IntoIter<Spanned>>,
    ) -> Result<OperationRef, CompileError> {
        if let Ok(value) = word.parse::<i64>() {
            return Ok(OperationRef {
                name: word,
                position,
                kind: RefKind::Operand(Operand::Long(value)),
            });
        }

        match word.to_lowercase().as_str() {
            "{" => {
                let (body, _) = self.compile_seq(iter, &["}", "end"], position)?;
                return Ok(OperationRef {
                    name: word,
                    position,
                    kind: RefKind::Block(body),
                });
            }
            "do" | "while" => {
                let kind = if word.eq_ignore_ascii_case("do") {
                    LoopKind::Do
                } else {
                    LoopKind::While
                };
                let (body, _) = self.compile_seq(iter, &["end"], position)?;
                self.require_body(&body, position)?;
                return Ok(OperationRef {
                    name: word,
                    position,
                    kind: RefKind::Loop {
                        kind,
                        target: ReduceTarget::Literal(0),
                        body,
                    },
                });
            }
            "reduce" | "reduce*" => {
                let target = if word.ends_with('*') {
                    ReduceTarget::FromStack
                } else {
                    self.reduce_literal_target(iter)
                };
                let (body, _) = self.compile_seq(iter, &["end"], position)?;
                self.require_body(&body, position)?;
                return Ok(OperationRef {
                    name: word,
                    position,
                    kind: RefKind::Loop {
                        kind: LoopKind::Reduce,
                        target,
                        body,
                    },
                });
            }
            "try" => {
                let (on_try, _) = self.compile_seq(iter, &["catch"], position)?;
                let (on_catch, _) = self.compile_seq(iter, &["end"], position)?;
                self.require_body(&on_try, position)?;
                return Ok(OperationRef {
                    name: word,
                    position,
                    kind: RefKind::Try { on_try, on_catch },
                });
            }
            _ => {}
        }

        if let Some(operand) = parse_accessor(&word) {
            return Ok(OperationRef {
                name: word,
                position,
                kind: RefKind::Operand(operand),
            });
        }

        if let Some(chain) = self.registry.lookup(&word) {
            return Ok(OperationRef {
                name: word,
                position,
                kind: RefKind::Operation(chain),
            });
        }

        if let Ok(value) = word.parse::<f64>() {
            return Ok(OperationRef {
                name: word,
                position,
                kind: RefKind::Operand(Operand::Double(value)),
            });
        }

        Err(CompileError::UnknownOperation {
            name: word,
            position,
        })
    }

    /// Peek for an integer literal giving an explicit reduce target.
    fn reduce_literal_target(
        &self,
        iter: &mut std::iter::Peekable<std::vec::IntoIter<Spanned>>,
    ) -> ReduceTarget {
        if let Some(Spanned {
            token: Token::Word(word),
            ..
        }) = iter.peek()
        {
            if let Ok(n) = word.parse::<usize>() {
                iter.next();
                return ReduceTarget::Literal(n);
            }
        }
        ReduceTarget::Literal(1)
    }

    fn require_body(
        &self,
        body: &[OperationRef],
        position: Position,
    ) -> Result<(), CompileError> {
        if body.is_empty() {
            return Err(CompileError::MissingInstructions(position));
        }
        Ok(())
    }
}

/// Parse the context accessor word families.
fn parse_accessor(word: &str) -> Option<Operand> {
    match word {
        "$#" => return Some(Operand::InputCount),
        "$*" => return Some(Operand::AllInputs { require: false }),
        "$*!" => return Some(Operand::AllInputs { require: true }),
        "$0" => return Some(Operand::Result(PointPart::Value)),
        "$0@" => return Some(Operand::Result(PointPart::Stamp)),
        "$0$" => return Some(Operand::Result(PointPart::State)),
        "$0=" => return Some(Operand::ResultStore(StoreAccess::Store)),
        ":$0=" => return Some(Operand::ResultStore(StoreAccess::StoreKeep)),
        _ => {}
    }

    if let Some(rest) = word.strip_prefix(":%") {
        let index = rest.strip_suffix('=')?.parse().ok()?;
        return Some(Operand::MemoryStore(index, StoreAccess::StoreKeep));
    }
    if let Some(rest) = word.strip_prefix('%') {
        if let Some(index) = rest.strip_suffix('=') {
            return Some(Operand::MemoryStore(index.parse().ok()?, StoreAccess::Store));
        }
        if let Some(index) = rest.strip_suffix('!') {
            return Some(Operand::Memory {
                index: index.parse().ok()?,
                require: true,
            });
        }
        return Some(Operand::Memory {
            index: rest.parse().ok()?,
            require: false,
        });
    }
    if let Some(rest) = word.strip_prefix('$') {
        let (digits, part) = match rest.strip_suffix('@') {
            Some(d) => (d, PointPart::Stamp),
            None => match rest.strip_suffix('$') {
                Some(d) => (d, PointPart::State),
                None => match rest.strip_suffix('.') {
                    Some(d) => (d, PointPart::Point),
                    None => (rest, PointPart::Value),
                },
            },
        };
        let index: usize = digits.parse().ok()?;
        if index == 0 {
            return None;
        }
        return Some(Operand::Input(index, part));
    }
    if let Some(rest) = word.strip_prefix('#') {
        if let Some(index) = rest.strip_suffix('!') {
            return Some(Operand::Param {
                index: index.parse().ok()?,
                require: true,
            });
        }
        return Some(Operand::Param {
            index: rest.parse().ok()?,
            require: false,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiler() -> Compiler {
        Compiler::new(Arc::new(Registry::with_defaults()), Params::new()).unwrap()
    }

    #[test]
    fn literals_and_operations() {
        let program = compiler().compile("2 3 + 1.5 \"x\"").unwrap();
        assert_eq!(program.refs().len(), 5);
        assert!(matches!(
            program.refs()[0].kind,
            RefKind::Operand(Operand::Long(2))
        ));
        assert!(matches!(program.refs()[2].kind, RefKind::Operation(_)));
        assert!(matches!(
            program.refs()[3].kind,
            RefKind::Operand(Operand::Double(_))
        ));
    }

    #[test]
    fn accessors_parse() {
        assert_eq!(parse_accessor("$1"), Some(Operand::Input(1, PointPart::Value)));
        assert_eq!(parse_accessor("$2@"), Some(Operand::Input(2, PointPart::Stamp)));
        assert_eq!(parse_accessor("$3$"), Some(Operand::Input(3, PointPart::State)));
        assert_eq!(parse_accessor("$4."), Some(Operand::Input(4, PointPart::Point)));
        assert_eq!(
            parse_accessor("%7="),
            Some(Operand::MemoryStore(7, StoreAccess::Store))
        );
        assert_eq!(
            parse_accessor(":%7="),
            Some(Operand::MemoryStore(7, StoreAccess::StoreKeep))
        );
        assert_eq!(
            parse_accessor("#2!"),
            Some(Operand::Param {
                index: 2,
                require: true
            })
        );
        assert_eq!(parse_accessor("$0="), Some(Operand::ResultStore(StoreAccess::Store)));
        assert_eq!(parse_accessor("+"), None);
    }

    #[test]
    fn block_nesting() {
        let program = compiler().compile("{ 1 { 2 } }").unwrap();
        assert_eq!(program.refs().len(), 1);
        match &program.refs()[0].kind {
            RefKind::Block(body) => {
                assert_eq!(body.len(), 2);
                assert!(matches!(body[1].kind, RefKind::Block(_)));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn missing_end_is_reported() {
        let err = compiler().compile("do 1").unwrap_err();
        assert!(matches!(err, CompileError::MissingBlockEnd(_)));
    }

    #[test]
    fn reduce_takes_literal_target() {
        let program = compiler().compile("reduce 2 + end").unwrap();
        match &program.refs()[0].kind {
            RefKind::Loop { kind, target, body } => {
                assert_eq!(*kind, LoopKind::Reduce);
                assert_eq!(*target, ReduceTarget::Literal(2));
                assert_eq!(body.len(), 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn try_requires_catch() {
        let err = compiler().compile("try 1 end").unwrap_err();
        assert!(matches!(err, CompileError::MissingInstructions(_)));
        let err = compiler().compile("try 1 catch 2").unwrap_err();
        assert!(matches!(err, CompileError::MissingBlockEnd(_)));
    }

    #[test]
    fn unknown_operation_is_reported() {
        let err = compiler().compile("frobnicate").unwrap_err();
        assert!(matches!(err, CompileError::UnknownOperation { .. }));
    }
}
