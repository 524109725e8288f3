//! A strict, non-executing reader for the import object found in a script
//! tag's `data-import` attribute.
//!
//! The accepted language is the subset of JavaScript object literals made of
//! objects, arrays, strings, numbers, `true`, `false`, `null`, `undefined`
//! and dotted references to globals such as `console.log`:
//!
//! ```text
//! { imports: { log: console.log, answer: 42 }, "env": { names: ['a', "b"] } }
//! ```
//!
//! Nothing is ever evaluated. References are kept as paths and resolved by
//! whoever instantiates the module.

use std::fmt;

use indexmap::IndexMap;

/// Path segments that are never resolved.
pub const FORBIDDEN_SEGMENTS: &[&str] = &["__proto__", "prototype", "constructor"];

/// How deeply objects and arrays may nest, counting the import object itself.
pub const MAX_DEPTH: usize = 64;

/// A parsed import object.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImportSpec {
    namespaces: IndexMap<String, ImportValue>,
}

/// A single value inside an [`ImportSpec`].
#[derive(Debug, Clone, PartialEq)]
pub enum ImportValue {
    Object(IndexMap<String, ImportValue>),
    Array(Vec<ImportValue>),
    String(String),
    Number(f64),
    Bool(bool),
    Null,
    Undefined,
    Reference(Reference),
}

impl ImportValue {
    /// A short name for the kind of value, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            ImportValue::Object(_) => "object",
            ImportValue::Array(_) => "array",
            ImportValue::String(_) => "string",
            ImportValue::Number(_) => "number",
            ImportValue::Bool(_) => "boolean",
            ImportValue::Null => "null",
            ImportValue::Undefined => "undefined",
            ImportValue::Reference(_) => "reference",
        }
    }
}

/// A dotted path to a global, e.g. `console.log`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference(Vec<String>);

impl Reference {
    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// Errors produced while reading an import object.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum ImportSpecError {
    #[error("Expected {expected} at offset {offset}")]
    Expected {
        expected: &'static str,
        offset: usize,
    },
    #[error("Unterminated string starting at offset {offset}")]
    UnterminatedString { offset: usize },
    #[error("Invalid escape sequence at offset {offset}")]
    InvalidEscape { offset: usize },
    #[error("Invalid number at offset {offset}")]
    InvalidNumber { offset: usize },
    #[error("The reference \"{path}\" at offset {offset} is not allowed")]
    ForbiddenReference { path: String, offset: usize },
    #[error("Unexpected trailing input at offset {offset}")]
    TrailingInput { offset: usize },
    #[error("Nested too deeply at offset {offset}")]
    TooDeep { offset: usize },
}

impl ImportSpec {
    /// An import object without any namespaces, i.e. `{}`.
    pub fn empty() -> Self {
        ImportSpec::default()
    }

    /// Parse the text of an import attribute.
    ///
    /// Blank text is treated as `{}`, matching a missing attribute.
    pub fn parse(text: &str) -> Result<Self, ImportSpecError> {
        if text.trim_matches(is_whitespace).is_empty() {
            return Ok(ImportSpec::empty());
        }

        let mut parser = Parser::new(text);
        parser.skip_whitespace();
        if parser.peek() != Some(b'{') {
            return Err(parser.expected("'{'"));
        }
        let namespaces = parser.object()?;
        parser.skip_whitespace();
        if parser.pos != text.len() {
            return Err(ImportSpecError::TrailingInput { offset: parser.pos });
        }

        Ok(ImportSpec { namespaces })
    }

    /// Iterate over the top-level entries, in declaration order.
    pub fn namespaces(&self) -> impl Iterator<Item = (&str, &ImportValue)> {
        self.namespaces
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn get(&self, namespace: &str) -> Option<&ImportValue> {
        self.namespaces.get(namespace)
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    /// Every reference to a global, at any depth.
    pub fn references(&self) -> Vec<&Reference> {
        fn collect<'a>(value: &'a ImportValue, out: &mut Vec<&'a Reference>) {
            match value {
                ImportValue::Reference(reference) => out.push(reference),
                ImportValue::Object(members) => {
                    members.values().for_each(|value| collect(value, out))
                }
                ImportValue::Array(items) => items.iter().for_each(|value| collect(value, out)),
                _ => {}
            }
        }

        let mut references = Vec::new();
        for value in self.namespaces.values() {
            collect(value, &mut references);
        }
        references
    }
}

/// Whitespace as JavaScript's `String.prototype.trim()` sees it.
fn is_whitespace(c: char) -> bool {
    c.is_whitespace() || c == '\u{feff}'
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Parser {
            text,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn expected(&self, expected: &'static str) -> ImportSpecError {
        ImportSpecError::Expected {
            expected,
            offset: self.pos,
        }
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        let trimmed = rest.trim_start_matches(is_whitespace);
        self.pos += rest.len() - trimmed.len();
    }

    fn eat(&mut self, byte: u8, expected: &'static str) -> Result<(), ImportSpecError> {
        self.skip_whitespace();
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.expected(expected))
        }
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ImportSpecError>,
    ) -> Result<T, ImportSpecError> {
        if self.depth == MAX_DEPTH {
            return Err(ImportSpecError::TooDeep { offset: self.pos });
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Parse a comma-separated sequence up to `close`, allowing a trailing
    /// comma.
    fn sequence(
        &mut self,
        close: u8,
        expected: &'static str,
        mut item: impl FnMut(&mut Self) -> Result<(), ImportSpecError>,
    ) -> Result<(), ImportSpecError> {
        self.skip_whitespace();
        while self.peek() != Some(close) {
            item(self)?;
            self.skip_whitespace();
            if self.peek() != Some(b',') {
                break;
            }
            self.pos += 1;
            self.skip_whitespace();
        }
        self.eat(close, expected)
    }

    fn object(&mut self) -> Result<IndexMap<String, ImportValue>, ImportSpecError> {
        self.nested(|parser| {
            let mut members = IndexMap::new();
            parser.eat(b'{', "'{'")?;
            parser.sequence(b'}', "'}'", |parser| {
                let key = match parser.peek() {
                    Some(b'"' | b'\'') => parser.string()?,
                    _ => parser.identifier()?.to_string(),
                };
                parser.eat(b':', "':'")?;
                let value = parser.value()?;
                members.insert(key, value);
                Ok(())
            })?;
            Ok(members)
        })
    }

    fn array(&mut self) -> Result<Vec<ImportValue>, ImportSpecError> {
        self.nested(|parser| {
            let mut items = Vec::new();
            parser.eat(b'[', "'['")?;
            parser.sequence(b']', "']'", |parser| {
                items.push(parser.value()?);
                Ok(())
            })?;
            Ok(items)
        })
    }

    fn value(&mut self) -> Result<ImportValue, ImportSpecError> {
        self.skip_whitespace();
        match self.peek() {
            Some(b'{') => return self.object().map(ImportValue::Object),
            Some(b'[') => return self.array().map(ImportValue::Array),
            Some(b'"' | b'\'') => return self.string().map(ImportValue::String),
            Some(b'-' | b'.' | b'0'..=b'9') => return self.number().map(ImportValue::Number),
            _ => {}
        }

        let start = self.pos;
        let value = match self.identifier()? {
            "true" => ImportValue::Bool(true),
            "false" => ImportValue::Bool(false),
            "null" => ImportValue::Null,
            "undefined" => ImportValue::Undefined,
            first => {
                let mut segments = vec![first.to_string()];
                while self.peek() == Some(b'.') {
                    self.pos += 1;
                    segments.push(self.identifier()?.to_string());
                }
                let reference = Reference(segments);
                if reference
                    .segments()
                    .iter()
                    .any(|segment| FORBIDDEN_SEGMENTS.contains(&segment.as_str()))
                {
                    return Err(ImportSpecError::ForbiddenReference {
                        path: reference.to_string(),
                        offset: start,
                    });
                }
                ImportValue::Reference(reference)
            }
        };
        Ok(value)
    }

    fn identifier(&mut self) -> Result<&'a str, ImportSpecError> {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .take_while(|&(i, c)| {
                c == '_' || c == '$' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit())
            })
            .count();
        if len == 0 {
            return Err(self.expected("an identifier"));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn number(&mut self) -> Result<f64, ImportSpecError> {
        let start = self.pos;
        let bytes = self.text.as_bytes();
        let digits = |mut pos: usize| {
            while bytes.get(pos).is_some_and(u8::is_ascii_digit) {
                pos += 1;
            }
            pos
        };

        let mut end = start;
        if bytes.get(end) == Some(&b'-') {
            end += 1;
        }
        let integer_end = digits(end);
        let has_integer = integer_end > end;
        end = integer_end;
        if bytes.get(end) == Some(&b'.') {
            let fraction_end = digits(end + 1);
            if !has_integer && fraction_end == end + 1 {
                return Err(ImportSpecError::InvalidNumber { offset: start });
            }
            end = fraction_end;
        } else if !has_integer {
            return Err(ImportSpecError::InvalidNumber { offset: start });
        }
        if matches!(bytes.get(end), Some(b'e' | b'E')) {
            let mut exponent = end + 1;
            if matches!(bytes.get(exponent), Some(b'+' | b'-')) {
                exponent += 1;
            }
            let exponent_end = digits(exponent);
            if exponent_end > exponent {
                end = exponent_end;
            }
        }

        let number = self.text[start..end]
            .parse::<f64>()
            .map_err(|_| ImportSpecError::InvalidNumber { offset: start })?;
        self.pos = end;
        Ok(number)
    }

    fn string(&mut self) -> Result<String, ImportSpecError> {
        let start = self.pos;
        let quote = self.text[start..]
            .chars()
            .next()
            .ok_or_else(|| self.expected("a string"))?;
        let mut out = String::new();
        let mut chars = self.text[start + 1..].char_indices();

        while let Some((i, c)) = chars.next() {
            match c {
                c if c == quote => {
                    self.pos = start + 1 + i + 1;
                    return Ok(out);
                }
                '\\' => {
                    let escape_offset = start + 1 + i;
                    let invalid = || ImportSpecError::InvalidEscape {
                        offset: escape_offset,
                    };
                    let (_, escaped) = chars.next().ok_or_else(invalid)?;
                    match escaped {
                        'b' => out.push('\u{8}'),
                        'f' => out.push('\u{c}'),
                        'n' => out.push('\n'),
                        'r' => out.push('\r'),
                        't' => out.push('\t'),
                        'v' => out.push('\u{b}'),
                        '0' => out.push('\0'),
                        '\\' | '\'' | '"' | '/' => out.push(escaped),
                        'u' => {
                            let mut code = 0u32;
                            for _ in 0..4 {
                                let (_, digit) = chars.next().ok_or_else(invalid)?;
                                code = code * 16 + digit.to_digit(16).ok_or_else(invalid)?;
                            }
                            // Lone surrogates can't be represented in a Rust
                            // string.
                            out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
                        }
                        _ => return Err(invalid()),
                    }
                }
                c => out.push(c),
            }
        }

        Err(ImportSpecError::UnterminatedString { offset: start })
    }
}
