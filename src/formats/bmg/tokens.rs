//! Message token assembly and the brace text dialect.
//!
//! Both the binary reader and the text dialect build token lists through
//! [`TokenBuilder`], a two-state machine:
//!
//! ```text
//! Idle      -- text -->      Idle      (append to the pending text run)
//! Idle      -- open -->      InEscape  (flush pending text)
//! InEscape  -- byte -->      InEscape  (append to the escape payload)
//! InEscape  -- close -->     Idle      (emit the escape token)
//! InEscape  -- open -->      error: unclosed escape
//! Idle      -- close -->     error: unexpected close
//! end of input in InEscape   error: unclosed escape
//! ```
//!
//! In the dialect, `{` and `}` open and close an escape, `{{` and `}}` are
//! literal braces, and escape payloads are `-`-separated hex bytes:
//! `"a{FF-01}b"` is `[Text("a"), Escape([0xFF, 0x01]), Text("b")]`.

use thiserror::Error;

use super::MessageToken;

/// A malformed escape sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EscapeError {
    /// An escape was still open at `{` or at the end of input.
    #[error("unclosed escape")]
    Unclosed,
    /// `}` outside an escape.
    #[error("unexpected escape close")]
    UnexpectedClose,
    /// An escape byte was not one or two hex digits.
    #[error("invalid escape byte: {0:?}")]
    InvalidByte(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    InEscape,
}

/// Accumulates text runs and escapes into a token list.
#[derive(Debug)]
pub(crate) struct TokenBuilder {
    tokens: Vec<MessageToken>,
    text: String,
    escape: Vec<u8>,
    state: State,
}

impl TokenBuilder {
    pub(crate) fn new() -> Self {
        Self {
            tokens: Vec::new(),
            text: String::new(),
            escape: Vec::new(),
            state: State::Idle,
        }
    }

    fn in_escape(&self) -> bool {
        self.state == State::InEscape
    }

    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            self.tokens
                .push(MessageToken::Text(std::mem::take(&mut self.text)));
        }
    }

    pub(crate) fn push_char(&mut self, c: char) {
        self.text.push(c);
    }

    pub(crate) fn push_str(&mut self, s: &str) {
        self.text.push_str(s);
    }

    pub(crate) fn begin_escape(&mut self) -> Result<(), EscapeError> {
        if self.in_escape() {
            return Err(EscapeError::Unclosed);
        }
        self.flush_text();
        self.state = State::InEscape;
        Ok(())
    }

    pub(crate) fn push_escape_byte(&mut self, b: u8) {
        self.escape.push(b);
    }

    pub(crate) fn escape_len(&self) -> usize {
        self.escape.len()
    }

    pub(crate) fn end_escape(&mut self) -> Result<(), EscapeError> {
        if !self.in_escape() {
            return Err(EscapeError::UnexpectedClose);
        }
        self.tokens
            .push(MessageToken::Escape(std::mem::take(&mut self.escape)));
        self.state = State::Idle;
        Ok(())
    }

    pub(crate) fn finish(mut self) -> Result<Vec<MessageToken>, EscapeError> {
        if self.in_escape() {
            return Err(EscapeError::Unclosed);
        }
        self.flush_text();
        Ok(self.tokens)
    }
}

/// Parse one escape byte: one or two hex digits, either case.
pub(crate) fn parse_hex_byte(s: &str) -> Result<u8, EscapeError> {
    let valid = (1..=2).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_hexdigit());
    if !valid {
        return Err(EscapeError::InvalidByte(s.to_string()));
    }
    u8::from_str_radix(s, 16).map_err(|_| EscapeError::InvalidByte(s.to_string()))
}

/// Parse `-`-separated hex bytes. The empty string is an empty payload.
#[cfg_attr(not(feature = "interchange"), allow(dead_code))]
pub(crate) fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, EscapeError> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    s.split('-').map(parse_hex_byte).collect()
}

/// Format bytes as `-`-separated uppercase hex.
pub(crate) fn format_hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join("-")
}

/// Render tokens in the brace dialect.
pub fn format_message(tokens: &[MessageToken]) -> String {
    let mut out = String::new();
    for token in tokens {
        match token {
            MessageToken::Text(text) => {
                for c in text.chars() {
                    match c {
                        '{' => out.push_str("{{"),
                        '}' => out.push_str("}}"),
                        c => out.push(c),
                    }
                }
            }
            MessageToken::Escape(bytes) => {
                out.push('{');
                out.push_str(&format_hex_bytes(bytes));
                out.push('}');
            }
        }
    }
    out
}

/// Parse the brace dialect into tokens.
pub fn parse_message(input: &str) -> Result<Vec<MessageToken>, EscapeError> {
    let mut b = TokenBuilder::new();
    let mut hex = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match (b.state, c) {
            (State::Idle, '{') if chars.peek() == Some(&'{') => {
                chars.next();
                b.push_char('{');
            }
            (State::Idle, '}') if chars.peek() == Some(&'}') => {
                chars.next();
                b.push_char('}');
            }
            (State::Idle, '{') => b.begin_escape()?,
            (State::Idle, '}') => return Err(EscapeError::UnexpectedClose),
            (State::Idle, c) => b.push_char(c),
            (State::InEscape, '-') => {
                b.push_escape_byte(parse_hex_byte(&hex)?);
                hex.clear();
            }
            (State::InEscape, '}') => {
                // `{}` is an empty escape; `{FF-}` has a dangling separator.
                if !hex.is_empty() || b.escape_len() > 0 {
                    b.push_escape_byte(parse_hex_byte(&hex)?);
                    hex.clear();
                }
                b.end_escape()?;
            }
            (State::InEscape, '{') => return Err(EscapeError::Unclosed),
            (State::InEscape, c) => hex.push(c),
        }
    }
    b.finish()
}
