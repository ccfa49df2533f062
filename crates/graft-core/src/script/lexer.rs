//! Tokenizer for the canonical script form.
//!
//! Newlines are significant at nesting depth zero (they terminate
//! statements) but are suppressed inside parentheses and brackets, and
//! after tokens that cannot end an expression, so multi-line expressions
//! read naturally.

use crate::error::{ScriptError, ScriptResult};

/// One lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    /// Identifier.
    Ident(String),
    /// String literal content with escapes resolved; interpolation braces
    /// are kept raw for the parser to split.
    Str(String),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    True,
    False,
    Null,
    Let,
    If,
    Else,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Colon,
    Semi,
    Newline,
    Assign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    AndAnd,
    OrOr,
    Bang,
}

/// A token with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The token itself.
    pub tok: Tok,
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

fn keyword(ident: &str) -> Option<Tok> {
    Some(match ident {
        "true" => Tok::True,
        "false" => Tok::False,
        "null" => Tok::Null,
        "let" => Tok::Let,
        "if" => Tok::If,
        "else" => Tok::Else,
        "contains" => Tok::Contains,
        "startswith" => Tok::StartsWith,
        "endswith" => Tok::EndsWith,
        "matches" => Tok::Matches,
        _ => return None,
    })
}

/// Whether a newline directly after this token is a continuation, not a
/// statement boundary.
fn suppresses_newline(tok: &Tok) -> bool {
    matches!(
        tok,
        Tok::Assign
            | Tok::EqEq
            | Tok::NotEq
            | Tok::Lt
            | Tok::Le
            | Tok::Gt
            | Tok::Ge
            | Tok::Plus
            | Tok::Minus
            | Tok::Star
            | Tok::Slash
            | Tok::Percent
            | Tok::AndAnd
            | Tok::OrOr
            | Tok::Bang
            | Tok::Comma
            | Tok::Dot
            | Tok::Colon
            | Tok::Contains
            | Tok::StartsWith
            | Tok::EndsWith
            | Tok::Matches
            | Tok::LParen
            | Tok::LBracket
            | Tok::Newline
            | Tok::Let
            | Tok::Else
    )
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    column: u32,
    depth: u32,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            chars: src.chars().peekable(),
            line: 1,
            column: 1,
            depth: 0,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::new(message, self.line, self.column)
    }

    fn lex_string(&mut self) -> ScriptResult<Tok> {
        let mut content = String::new();
        loop {
            let Some(ch) = self.bump() else {
                return Err(self.error("unterminated string literal"));
            };
            match ch {
                '"' => return Ok(Tok::Str(content)),
                '\\' => {
                    let Some(esc) = self.bump() else {
                        return Err(self.error("unterminated escape sequence"));
                    };
                    match esc {
                        'n' => content.push('\n'),
                        't' => content.push('\t'),
                        'r' => content.push('\r'),
                        'b' => content.push('\u{0008}'),
                        'f' => content.push('\u{000C}'),
                        '0' => content.push('\0'),
                        '\\' => content.push('\\'),
                        '"' => content.push('"'),
                        '/' => content.push('/'),
                        'u' => {
                            let mut code = 0u32;
                            for _ in 0..4 {
                                let digit = self
                                    .bump()
                                    .and_then(|c| c.to_digit(16))
                                    .ok_or_else(|| self.error("invalid \\u escape"))?;
                                code = code * 16 + digit;
                            }
                            content.push(
                                char::from_u32(code)
                                    .ok_or_else(|| self.error("invalid \\u escape"))?,
                            );
                        }
                        other => {
                            return Err(self.error(format!("unknown escape '\\{other}'")));
                        }
                    }
                }
                other => content.push(other),
            }
        }
    }

    fn lex_number(&mut self, first: char) -> ScriptResult<Tok> {
        let mut text = String::from(first);
        let mut is_float = false;
        while let Some(&ch) = self.chars.peek() {
            if ch.is_ascii_digit() {
                text.push(ch);
                self.bump();
            } else if ch == '.' && !is_float {
                // Lookahead: `1.max` is field access on an int, `1.5` is a float.
                let mut ahead = self.chars.clone();
                ahead.next();
                if ahead.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                    is_float = true;
                    text.push(ch);
                    self.bump();
                } else {
                    break;
                }
            } else {
                break;
            }
        }
        if is_float {
            text.parse::<f64>()
                .map(Tok::Float)
                .map_err(|_| self.error(format!("invalid number '{text}'")))
        } else {
            text.parse::<i64>()
                .map(Tok::Int)
                .map_err(|_| self.error(format!("invalid number '{text}'")))
        }
    }
}

/// Tokenizes canonical script text.
pub fn lex(src: &str) -> ScriptResult<Vec<Token>> {
    let mut lexer = Lexer::new(src);
    let mut tokens: Vec<Token> = Vec::new();

    loop {
        let line = lexer.line;
        let column = lexer.column;
        let Some(ch) = lexer.bump() else { break };

        let tok = match ch {
            ' ' | '\t' | '\r' => continue,
            '\n' => {
                let boundary = lexer.depth == 0
                    && tokens
                        .last()
                        .map(|t| !suppresses_newline(&t.tok))
                        .unwrap_or(false);
                if !boundary {
                    continue;
                }
                Tok::Newline
            }
            '/' => {
                if lexer.chars.peek() == Some(&'/') {
                    while let Some(&next) = lexer.chars.peek() {
                        if next == '\n' {
                            break;
                        }
                        lexer.bump();
                    }
                    continue;
                }
                Tok::Slash
            }
            '"' => lexer.lex_string()?,
            '(' => {
                lexer.depth += 1;
                Tok::LParen
            }
            ')' => {
                lexer.depth = lexer.depth.saturating_sub(1);
                Tok::RParen
            }
            '[' => {
                lexer.depth += 1;
                Tok::LBracket
            }
            ']' => {
                lexer.depth = lexer.depth.saturating_sub(1);
                Tok::RBracket
            }
            '{' => Tok::LBrace,
            '}' => Tok::RBrace,
            ',' => Tok::Comma,
            '.' => Tok::Dot,
            ':' => Tok::Colon,
            ';' => Tok::Semi,
            '+' => Tok::Plus,
            '-' => Tok::Minus,
            '*' => Tok::Star,
            '%' => Tok::Percent,
            '=' => {
                if lexer.chars.peek() == Some(&'=') {
                    lexer.bump();
                    Tok::EqEq
                } else {
                    Tok::Assign
                }
            }
            '!' => {
                if lexer.chars.peek() == Some(&'=') {
                    lexer.bump();
                    Tok::NotEq
                } else {
                    Tok::Bang
                }
            }
            '<' => {
                if lexer.chars.peek() == Some(&'=') {
                    lexer.bump();
                    Tok::Le
                } else {
                    Tok::Lt
                }
            }
            '>' => {
                if lexer.chars.peek() == Some(&'=') {
                    lexer.bump();
                    Tok::Ge
                } else {
                    Tok::Gt
                }
            }
            '&' => {
                if lexer.chars.peek() == Some(&'&') {
                    lexer.bump();
                    Tok::AndAnd
                } else {
                    return Err(lexer.error("expected '&&'"));
                }
            }
            '|' => {
                if lexer.chars.peek() == Some(&'|') {
                    lexer.bump();
                    Tok::OrOr
                } else {
                    return Err(lexer.error("expected '||'"));
                }
            }
            c if c.is_ascii_digit() => lexer.lex_number(c)?,
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::from(c);
                while let Some(&next) = lexer.chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        ident.push(next);
                        lexer.bump();
                    } else {
                        break;
                    }
                }
                keyword(&ident).unwrap_or(Tok::Ident(ident))
            }
            other => return Err(lexer.error(format!("unexpected character '{other}'"))),
        };

        tokens.push(Token { tok, line, column });
    }

    Ok(tokens)
}
