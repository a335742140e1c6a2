//! Lexer for textual instruction listings using logos
//!
//! A listing has one instruction per line:
//!
//! ```text
//! # comment
//! mvin      0x0000000010000000, 0x0000000100000000 push:ex
//! preload   0xffffffffffffffff, 0x00000000c0000000 pop:ld
//! ```
//!
//! Tokens:
//! - Identifiers: mnemonics, `push`, `pop`, engine names
//! - Numbers: decimal or `0x` hexadecimal, 64-bit unsigned
//! - Punctuation: `,` `:` and newlines, which end an instruction

use logos::Logos;

/// Token types for the listing format
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r"#[^\n]*")]
pub enum Token {
    #[regex(r"0[xX][0-9a-fA-F_]+", |lex| u64::from_str_radix(&lex.slice()[2..].replace('_', ""), 16).ok())]
    #[regex(r"[0-9][0-9_]*", |lex| lex.slice().replace('_', "").parse::<u64>().ok())]
    Number(u64),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[token(",")]
    Comma,

    #[token(":")]
    Colon,

    #[token("\n")]
    Newline,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{:#x}", n),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
            Token::Newline => write!(f, "newline"),
        }
    }
}

/// Lexer wrapper that tracks the current line
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
    line: usize,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
            line: 1,
        }
    }

    /// Current line, 1-based; advances past each newline token
    pub fn line(&self) -> usize {
        self.line
    }

    /// Text of the most recently returned token
    pub fn slice(&self) -> &'source str {
        self.inner.slice()
    }
}

impl<'source> Iterator for Lexer<'source> {
    type Item = Result<Token, ()>;

    fn next(&mut self) -> Option<Self::Item> {
        let token = self.inner.next()?;
        if let Ok(Token::Newline) = token {
            self.line += 1;
        }
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_line() {
        let source = "mvin 0x10, 4294967296 push:ex";
        let tokens: Vec<_> = Lexer::new(source).filter_map(Result::ok).collect();
        assert_eq!(tokens, vec![
            Token::Ident("mvin".to_string()),
            Token::Number(0x10),
            Token::Comma,
            Token::Number(1 << 32),
            Token::Ident("push".to_string()),
            Token::Colon,
            Token::Ident("ex".to_string()),
        ]);
    }

    #[test]
    fn test_comments_and_lines() {
        let source = "# header\nfence # trailing\n\nflush 0, 0";
        let mut lexer = Lexer::new(source);
        let mut seen = Vec::new();
        while let Some(tok) = lexer.next() {
            if let Ok(Token::Ident(name)) = tok {
                seen.push((name, lexer.line()));
            }
        }
        assert_eq!(seen, vec![("fence".to_string(), 2), ("flush".to_string(), 4)]);
    }

    #[test]
    fn test_sentinel_fits() {
        let tokens: Vec<_> = Lexer::new("0xffffffffffffffff").filter_map(Result::ok).collect();
        assert_eq!(tokens, vec![Token::Number(u64::MAX)]);
    }

    #[test]
    fn test_bad_character() {
        assert!(Lexer::new("mvin $").any(|t| t.is_err()));
    }
}
