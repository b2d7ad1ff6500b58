//! Permissive JSON reader for hand-written request bodies.
//!
//! Accepts everything strict JSON does plus `//` and `/* */` comments,
//! trailing commas, unquoted identifier keys, single-quoted strings,
//! hexadecimal numbers, leading `+`, leading or trailing decimal points,
//! `Infinity`, `NaN` and escaped line continuations in strings.
//! Non-finite numbers read as `null`, which is how they serialize anyway.

use serde_json::{Map, Number, Value};

/// Deepest array/object nesting accepted, matching serde_json's own limit.
const MAX_DEPTH: usize = 128;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{message} at offset {offset}")]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

pub fn parse(text: &str) -> Result<Value, ParseError> {
    let mut reader = Reader {
        chars: text.chars().collect(),
        pos: 0,
        depth: 0,
    };
    reader.skip_trivia()?;
    let value = reader.value()?;
    reader.skip_trivia()?;
    if reader.pos < reader.chars.len() {
        return Err(reader.error("unexpected trailing content"));
    }
    Ok(value)
}

/// Parse leniently and re-serialize as strict JSON with two-space indentation.
/// Returns `None` when the text is not parseable.
pub fn reformat(text: &str) -> Option<String> {
    let value = parse(text).ok()?;
    serde_json::to_string_pretty(&value).ok()
}

struct Reader {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Reader {
    fn error(&self, message: &str) -> ParseError {
        ParseError {
            message: message.to_string(),
            offset: self.pos,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn eat_word(&mut self, word: &str) -> bool {
        let len = word.chars().count();
        let matches = self
            .chars
            .get(self.pos..self.pos + len)
            .is_some_and(|slice| slice.iter().copied().eq(word.chars()));
        if matches && !self.peek_at(len).is_some_and(is_ident_part) {
            self.pos += len;
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(c), _) if c.is_whitespace() || c == '\u{feff}' => self.pos += 1,
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.bump() {
                        if c == '\n' || c == '\r' || c == '\u{2028}' || c == '\u{2029}' {
                            break;
                        }
                    }
                }
                (Some('/'), Some('*')) => {
                    self.pos += 2;
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.pos += 1;
                                break;
                            }
                            Some(_) => {}
                            None => return Err(self.error("unterminated comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn value(&mut self) -> Result<Value, ParseError> {
        match self.peek() {
            Some('{') => self.nested(Self::object),
            Some('[') => self.nested(Self::array),
            Some(q @ ('"' | '\'')) => self.string(q).map(Value::String),
            Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'I' | 'N') => self.number(),
            Some(_) if self.eat_word("true") => Ok(Value::Bool(true)),
            Some(_) if self.eat_word("false") => Ok(Value::Bool(false)),
            Some(_) if self.eat_word("null") => Ok(Value::Null),
            Some(c) => Err(self.error(&format!("unexpected character '{c}'"))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn nested(
        &mut self,
        parse: fn(&mut Self) -> Result<Value, ParseError>,
    ) -> Result<Value, ParseError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn object(&mut self) -> Result<Value, ParseError> {
        self.pos += 1;
        let mut map = Map::new();
        loop {
            self.skip_trivia()?;
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(Value::Object(map));
            }
            let key = match self.peek() {
                Some(q @ ('"' | '\'')) => self.string(q)?,
                Some(c) if is_ident_start(c) => self.identifier(),
                _ => return Err(self.error("expected object key")),
            };
            self.skip_trivia()?;
            if self.bump() != Some(':') {
                return Err(self.error("expected ':'"));
            }
            self.skip_trivia()?;
            let value = self.value()?;
            map.insert(key, value);
            self.skip_trivia()?;
            match self.bump() {
                Some(',') => {}
                Some('}') => return Ok(Value::Object(map)),
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn array(&mut self) -> Result<Value, ParseError> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_trivia()?;
            if self.peek() == Some(']') {
                self.pos += 1;
                return Ok(Value::Array(items));
            }
            items.push(self.value()?);
            self.skip_trivia()?;
            match self.bump() {
                Some(',') => {}
                Some(']') => return Ok(Value::Array(items)),
                _ => return Err(self.error("expected ',' or ']'")),
            }
        }
    }

    fn identifier(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_part) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn string(&mut self, quote: char) -> Result<String, ParseError> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(out),
                Some('\n' | '\r') => return Err(self.error("line break in string")),
                Some('\\') => self.escape(&mut out)?,
                Some(c) => out.push(c),
            }
        }
    }

    fn escape(&mut self, out: &mut String) -> Result<(), ParseError> {
        let Some(c) = self.bump() else {
            return Err(self.error("unterminated escape"));
        };
        match c {
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'n' => out.push('\n'),
            'r' => {
                // escaped CRLF is a single line continuation
                if self.peek() == Some('\n') {
                    self.pos += 1;
                }
            }
            't' => out.push('\t'),
            'v' => out.push('\u{b}'),
            '0' if !self.peek().is_some_and(|d| d.is_ascii_digit()) => out.push('\0'),
            'x' => {
                let code = self.hex_digits(2)?;
                out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
            }
            'u' => {
                let high = self.hex_digits(4)?;
                if (0xD800..0xDC00).contains(&high) && self.peek() == Some('\\') && self.peek_at(1) == Some('u') {
                    let checkpoint = self.pos;
                    self.pos += 2;
                    let low = self.hex_digits(4)?;
                    if (0xDC00..0xE000).contains(&low) {
                        let combined = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                        out.push(char::from_u32(combined).unwrap_or(char::REPLACEMENT_CHARACTER));
                        return Ok(());
                    }
                    self.pos = checkpoint;
                }
                out.push(char::from_u32(high).unwrap_or(char::REPLACEMENT_CHARACTER));
            }
            '\n' | '\u{2028}' | '\u{2029}' => {}
            d if d.is_ascii_digit() => return Err(self.error("invalid escape")),
            other => out.push(other),
        }
        Ok(())
    }

    fn hex_digits(&mut self, count: usize) -> Result<u32, ParseError> {
        let mut code = 0;
        for _ in 0..count {
            let digit = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error("invalid hex escape"))?;
            code = code * 16 + digit;
        }
        Ok(code)
    }

    fn number(&mut self) -> Result<Value, ParseError> {
        let start = self.pos;
        let negative = match self.peek() {
            Some('-') => {
                self.pos += 1;
                true
            }
            Some('+') => {
                self.pos += 1;
                false
            }
            _ => false,
        };

        if self.eat_word("Infinity") || self.eat_word("NaN") {
            return Ok(Value::Null);
        }

        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X')) {
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let digits: String = self.chars[digits_start..self.pos].iter().collect();
            let magnitude = u64::from_str_radix(&digits, 16).map_err(|_| self.error("invalid hex number"))?;
            return Ok(if negative {
                i64::try_from(magnitude)
                    .map(|n| Value::from(-n))
                    .unwrap_or_else(|_| float_value(-(magnitude as f64)))
            } else {
                Value::from(magnitude)
            });
        }

        let digits_start = self.pos;
        let mut int_digits = 0;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
            int_digits += 1;
        }
        let mut frac_digits = 0;
        let mut is_float = false;
        if self.peek() == Some('.') {
            is_float = true;
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
                frac_digits += 1;
            }
        }
        if int_digits == 0 && frac_digits == 0 {
            self.pos = start;
            return Err(self.error("invalid number"));
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            is_float = true;
            self.pos += 1;
            if matches!(self.peek(), Some('+' | '-')) {
                self.pos += 1;
            }
            if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                return Err(self.error("invalid exponent"));
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }

        let literal: String = self.chars[digits_start..self.pos].iter().collect();
        if !is_float {
            let signed = if negative { format!("-{literal}") } else { literal.clone() };
            if let Ok(n) = signed.parse::<i64>() {
                return Ok(Value::from(n));
            }
            if let Ok(n) = signed.parse::<u64>() {
                return Ok(Value::from(n));
            }
        }
        let magnitude: f64 = literal
            .trim_end_matches('.')
            .parse()
            .map_err(|_| self.error("invalid number"))?;
        Ok(float_value(if negative { -magnitude } else { magnitude }))
    }
}

/// Integral floats serialize without a fractional part, like `JSON.stringify`.
fn float_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        return Value::from(n as i64);
    }
    Number::from_f64(n).map_or(Value::Null, Value::Number)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}
