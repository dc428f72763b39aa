//! Macro expansion over the token stream.
//!
//! Two macro forms are recognized. A *word macro* is a bare name whose body
//! replaces each occurrence; occurrences of the macro's own name inside its
//! expansion stay literal. A *parameterized macro* is a name directly
//! followed by `(`; arguments are collected up to the matching `)`,
//! honoring nested parentheses, and substituted for the formal names inside
//! the body. Each definition carries an expansion counter; running past the
//! loop limit is reported as macro recursion.
//!
//! Commas outside argument collection are only separators and are dropped.

use std::collections::{BTreeMap, HashMap};

use crate::error::CompileError;
use crate::params::Params;
use crate::tokenizer::{Position, Spanned, Token, Tokenizer};

/// One macro definition.
#[derive(Debug, Clone)]
pub struct MacroDef {
    formals: Vec<String>,
    body: String,
}

impl MacroDef {
    const fn is_parameterized(&self) -> bool {
        !self.formals.is_empty()
    }
}

/// Expands macros over tokenized source.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    macros: BTreeMap<String, MacroDef>,
    loop_limit: usize,
}

impl Preprocessor {
    /// Build from engine parameters (`MacroDef.*` entries and `LoopLimit`).
    pub fn new(params: &Params) -> Result<Self, CompileError> {
        let mut macros = BTreeMap::new();
        for (decl, body) in params.macro_defs() {
            let (name, formals) = parse_declaration(decl)?;
            macros.insert(
                name,
                MacroDef {
                    formals,
                    body: body.to_owned(),
                },
            );
        }
        Ok(Self {
            macros,
            loop_limit: params.loop_limit(),
        })
    }

    /// Tokenize and fully expand a source text.
    pub fn process(&self, source: &str) -> Result<Vec<Spanned>, CompileError> {
        let tokens = tokenize_all(source)?;
        let mut depths = HashMap::new();
        self.expand_list(tokens, &[], &mut depths)
    }

    fn expand_list(
        &self,
        input: Vec<Spanned>,
        active: &[String],
        depths: &mut HashMap<String, usize>,
    ) -> Result<Vec<Spanned>, CompileError> {
        let mut out = Vec::new();
        let mut iter = input.into_iter().peekable();
        while let Some(spanned) = iter.next() {
            match &spanned.token {
                Token::Word(word) => {
                    let key = word.to_uppercase();
                    match self.macros.get(&key) {
                        Some(def) if def.is_parameterized() => {
                            if iter.peek().map(|s| &s.token) != Some(&Token::LeftParen) {
                                // Without arguments the name is just a word.
                                out.push(spanned);
                                continue;
                            }
                            iter.next();
                            let args = collect_args(&mut iter, spanned.position)?;
                            self.bump_depth(&key, depths)?;
                            let body = tokenize_all(&def.body)?;
                            let substituted = substitute(body, &def.formals, &args);
                            out.extend(self.expand_list(substituted, active, depths)?);
                        }
                        Some(def) => {
                            if active.iter().any(|name| name == &key) {
                                // A word macro does not re-expand inside its
                                // own expansion.
                                out.push(spanned);
                                continue;
                            }
                            self.bump_depth(&key, depths)?;
                            let body = tokenize_all(&def.body)?;
                            let mut active = active.to_vec();
                            active.push(key);
                            out.extend(self.expand_list(body, &active, depths)?);
                        }
                        None => out.push(spanned),
                    }
                }
                Token::Comma => {}
                Token::LeftParen | Token::RightParen => {
                    return Err(CompileError::UnbalancedParenthesis(spanned.position))
                }
                Token::Str(_) => out.push(spanned),
                Token::Eof => {}
            }
        }
        Ok(out)
    }

    fn bump_depth(
        &self,
        name: &str,
        depths: &mut HashMap<String, usize>,
    ) -> Result<(), CompileError> {
        let depth = depths.entry(name.to_owned()).or_insert(0);
        *depth += 1;
        if *depth > self.loop_limit {
            return Err(CompileError::MacroRecursion {
                name: name.to_owned(),
                limit: self.loop_limit,
            });
        }
        Ok(())
    }
}

/// Collect comma-separated argument token lists up to the matching `)`.
fn collect_args<I>(
    iter: &mut std::iter::Peekable<I>,
    start: Position,
) -> Result<Vec<Vec<Spanned>>, CompileError>
where
    I: Iterator<Item = Spanned>,
{
    let mut args = Vec::new();
    let mut current = Vec::new();
    let mut nesting = 0usize;
    loop {
        let spanned = iter.next().ok_or(CompileError::MissingArgs(start))?;
        match &spanned.token {
            Token::Eof => return Err(CompileError::MissingArgs(start)),
            Token::LeftParen => {
                nesting += 1;
                current.push(spanned);
            }
            Token::RightParen if nesting > 0 => {
                nesting -= 1;
                current.push(spanned);
            }
            Token::RightParen => {
                if !current.is_empty() || !args.is_empty() {
                    args.push(current);
                }
                return Ok(args);
            }
            Token::Comma if nesting == 0 => {
                args.push(std::mem::take(&mut current));
            }
            _ => current.push(spanned),
        }
    }
}

/// Replace formal names with their argument token lists.
fn substitute(body: Vec<Spanned>, formals: &[String], args: &[Vec<Spanned>]) -> Vec<Spanned> {
    let mut out = Vec::new();
    for spanned in body {
        match &spanned.token {
            Token::Word(word) => match formals.iter().position(|f| f == word) {
                Some(index) => out.extend(args.get(index).cloned().unwrap_or_default()),
                None => out.push(spanned),
            },
            _ => out.push(spanned),
        }
    }
    out
}

fn tokenize_all(source: &str) -> Result<Vec<Spanned>, CompileError> {
    let mut tokenizer = Tokenizer::new(source);
    let mut tokens = Vec::new();
    loop {
        let spanned = tokenizer.next_token()?;
        if spanned.token == Token::Eof {
            break;
        }
        tokens.push(spanned);
    }
    Ok(tokens)
}

/// Parse a macro declaration: `NAME` or `NAME(FORMAL, ...)`.
fn parse_declaration(decl: &str) -> Result<(String, Vec<String>), CompileError> {
    let decl = decl.trim();
    match decl.split_once('(') {
        None => {
            if decl.is_empty() || decl.contains(')') {
                return Err(CompileError::BadMacroDef(decl.to_owned()));
            }
            Ok((decl.to_uppercase(), Vec::new()))
        }
        Some((name, rest)) => {
            let rest = rest
                .strip_suffix(')')
                .ok_or_else(|| CompileError::BadMacroDef(decl.to_owned()))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(CompileError::BadMacroDef(decl.to_owned()));
            }
            let formals: Vec<String> = rest
                .split(',')
                .map(|f| f.trim().to_owned())
                .filter(|f| !f.is_empty())
                .collect();
            if formals.is_empty() {
                return Err(CompileError::BadMacroDef(decl.to_owned()));
            }
            Ok((name.to_uppercase(), formals))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processed(defs: &[(&str, &str)], source: &str) -> Result<Vec<String>, CompileError> {
        let mut params = Params::new();
        for (decl, body) in defs {
            params.define_macro(decl, body);
        }
        let pp = Preprocessor::new(&params)?;
        Ok(pp
            .process(source)?
            .into_iter()
            .map(|s| match s.token {
                Token::Word(w) => w,
                Token::Str(text) => format!("\"{text}\""),
                other => format!("{other:?}"),
            })
            .collect())
    }

    #[test]
    fn word_macro_expands() {
        let tokens = processed(&[("TWICE", "dup +")], "1 twice").unwrap();
        assert_eq!(tokens, vec!["1", "dup", "+"]);
    }

    #[test]
    fn word_macro_does_not_reexpand_itself() {
        let tokens = processed(&[("SELF", "SELF 1")], "self").unwrap();
        assert_eq!(tokens, vec!["SELF", "1"]);
    }

    #[test]
    fn parameterized_macro_substitutes() {
        let tokens = processed(&[("AVG(A,B)", "A B + 2 /")], "avg(10, 20)").unwrap();
        assert_eq!(tokens, vec!["10", "20", "+", "2", "/"]);
    }

    #[test]
    fn nested_parens_in_args() {
        let tokens = processed(
            &[("AVG(A,B)", "A B + 2 /"), ("NEG(X)", "X neg")],
            "avg(neg(1), 2)",
        )
        .unwrap();
        assert_eq!(tokens, vec!["1", "neg", "2", "+", "2", "/"]);
    }

    #[test]
    fn recursion_is_bounded() {
        let mut params = Params::new();
        params.define_macro("LOOP(X)", "LOOP(X)");
        params.set("LoopLimit", "16");
        let pp = Preprocessor::new(&params).unwrap();
        match pp.process("loop(1)") {
            Err(CompileError::MacroRecursion { name, limit }) => {
                assert_eq!(name, "LOOP");
                assert_eq!(limit, 16);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn stray_commas_are_dropped() {
        let tokens = processed(&[], "1, 2 ,3").unwrap();
        assert_eq!(tokens, vec!["1", "2", "3"]);
    }

    #[test]
    fn missing_args_at_eof() {
        let err = processed(&[("F(A)", "A")], "f(1").unwrap_err();
        assert!(matches!(err, CompileError::MissingArgs(_)));
    }

    #[test]
    fn stray_paren_is_rejected() {
        let err = processed(&[], "1 )").unwrap_err();
        assert!(matches!(err, CompileError::UnbalancedParenthesis(_)));
    }
}
