//! Lexer for RPN source text.
//!
//! Tokens are words, quoted strings, commas and parentheses. Whitespace
//! separates tokens; `#` opens a line comment unless directly followed by a
//! digit (`#1` is a parameter access word). The tokenizer accepts spliced
//! text in front of the remaining input, which is how macro expansion works.

use std::collections::VecDeque;
use std::fmt;

use crate::error::CompileError;

/// A source position, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    /// Line number.
    pub line: u32,
    /// Column number.
    pub column: u32,
}

impl Position {
    pub(crate) const START: Self = Self { line: 1, column: 1 };
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// One lexical token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A bare word: identifier, number or operator-like name.
    Word(String),
    /// A double-quoted string, unescaped.
    Str(String),
    /// Argument separator.
    Comma,
    /// Opens macro argument collection.
    LeftParen,
    /// Closes macro argument collection.
    RightParen,
    /// End of input.
    Eof,
}

/// A token with the position it started at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    /// The token.
    pub token: Token,
    /// Where it started.
    pub position: Position,
}

/// Streaming tokenizer with splice support.
#[derive(Debug)]
pub struct Tokenizer {
    pending: VecDeque<char>,
    position: Position,
}

impl Tokenizer {
    /// Tokenize the given source text.
    pub fn new(source: &str) -> Self {
        Self {
            pending: source.chars().collect(),
            position: Position::START,
        }
    }

    /// Splice text in front of the remaining input.
    pub fn insert(&mut self, text: &str) {
        // A separating blank keeps the splice from gluing onto the next word.
        self.pending.push_front(' ');
        for c in text.chars().rev() {
            self.pending.push_front(c);
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.pending.pop_front()?;
        if c == '\n' {
            self.position.line += 1;
            self.position.column = 1;
        } else {
            self.position.column += 1;
        }
        Some(c)
    }

    fn peek(&self) -> Option<char> {
        self.pending.front().copied()
    }

    /// Read the next token.
    pub fn next_token(&mut self) -> Result<Spanned, CompileError> {
        loop {
            match self.peek() {
                None => {
                    return Ok(Spanned {
                        token: Token::Eof,
                        position: self.position,
                    })
                }
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') => {
                    // `#` starts a comment unless it begins a parameter word.
                    let mut lookahead = self.pending.iter().skip(1);
                    match lookahead.next() {
                        Some(d) if d.is_ascii_digit() => return self.word_token(),
                        _ => self.skip_comment(),
                    }
                }
                Some('"') => return self.string_token(),
                Some(',') => {
                    let position = self.position;
                    self.bump();
                    return Ok(Spanned {
                        token: Token::Comma,
                        position,
                    });
                }
                Some('(') => {
                    let position = self.position;
                    self.bump();
                    return Ok(Spanned {
                        token: Token::LeftParen,
                        position,
                    });
                }
                Some(')') => {
                    let position = self.position;
                    self.bump();
                    return Ok(Spanned {
                        token: Token::RightParen,
                        position,
                    });
                }
                Some(_) => return self.word_token(),
            }
        }
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn word_token(&mut self) -> Result<Spanned, CompileError> {
        let position = self.position;
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() || matches!(c, ',' | '(' | ')' | '"') {
                break;
            }
            word.push(c);
            self.bump();
        }
        Ok(Spanned {
            token: Token::Word(word),
            position,
        })
    }

    fn string_token(&mut self) -> Result<Spanned, CompileError> {
        let position = self.position;
        self.bump(); // opening quote
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(CompileError::UnterminatedString(position)),
                Some('"') => break,
                Some('\\') => match self.bump() {
                    None => return Err(CompileError::UnterminatedString(position)),
                    Some('n') => text.push('\n'),
                    Some('r') => text.push('\r'),
                    Some('t') => text.push('\t'),
                    Some(other) => text.push(other),
                },
                Some(c) => text.push(c),
            }
        }
        Ok(Spanned {
            token: Token::Str(text),
            position,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(source: &str) -> Vec<Token> {
        let mut tokenizer = Tokenizer::new(source);
        let mut tokens = Vec::new();
        loop {
            let spanned = tokenizer.next_token().unwrap();
            if spanned.token == Token::Eof {
                break;
            }
            tokens.push(spanned.token);
        }
        tokens
    }

    #[test]
    fn words_and_operators() {
        assert_eq!(
            words("2 3 + $0= eq~ 0?"),
            vec![
                Token::Word("2".into()),
                Token::Word("3".into()),
                Token::Word("+".into()),
                Token::Word("$0=".into()),
                Token::Word("eq~".into()),
                Token::Word("0?".into()),
            ]
        );
    }

    #[test]
    fn strings_with_escapes() {
        assert_eq!(
            words(r#""a b" "x\"y" "l\n""#),
            vec![
                Token::Str("a b".into()),
                Token::Str("x\"y".into()),
                Token::Str("l\n".into()),
            ]
        );
    }

    #[test]
    fn comments_and_params() {
        assert_eq!(
            words("1 # the rest is gone\n2 #3 #4!"),
            vec![
                Token::Word("1".into()),
                Token::Word("2".into()),
                Token::Word("#3".into()),
                Token::Word("#4!".into()),
            ]
        );
    }

    #[test]
    fn unterminated_string_reports_position() {
        let mut tokenizer = Tokenizer::new("  \"oops");
        match tokenizer.next_token() {
            Err(CompileError::UnterminatedString(p)) => assert_eq!(p.column, 3),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn splice_precedes_remaining_input() {
        let mut tokenizer = Tokenizer::new("tail");
        tokenizer.insert("a b");
        assert_eq!(
            tokenizer.next_token().unwrap().token,
            Token::Word("a".into())
        );
        assert_eq!(
            tokenizer.next_token().unwrap().token,
            Token::Word("b".into())
        );
        assert_eq!(
            tokenizer.next_token().unwrap().token,
            Token::Word("tail".into())
        );
    }

    #[test]
    fn parens_and_commas_split_words() {
        assert_eq!(
            words("f(a,b)"),
            vec![
                Token::Word("f".into()),
                Token::LeftParen,
                Token::Word("a".into()),
                Token::Comma,
                Token::Word("b".into()),
                Token::RightParen,
            ]
        );
    }
}
