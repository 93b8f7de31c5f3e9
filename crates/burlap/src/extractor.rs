//! Static dependency extraction
//!
//! Finds every module-reference literal a source file requires without
//! executing it: `require("<literal>")` call forms plus the dependency
//! array of an AMD `define` header. The scanner tracks string, template,
//! comment and regex-literal contexts so references are only collected
//! from real code, and duplicate references are preserved as separate
//! entries; deduplication happens by resolved target in the traversal,
//! not by literal here.

use thiserror::Error;

/// Malformed source encountered during extraction. Terminal for the
/// traversal that triggered it.
#[derive(Debug, Error)]
#[error("{message} starting at byte {offset}")]
pub struct ExtractError {
    pub message: String,
    pub offset: usize,
}

/// Pseudo-dependencies of the AMD define signature, never real modules.
const AMD_PSEUDO_DEPS: &[&str] = &["require", "exports", "module"];

/// Extract the ordered sequence of referenced module literals.
pub fn extract(source: &str) -> Result<Vec<String>, ExtractError> {
    Scanner::new(source).run()
}

struct Scanner<'a> {
    bytes: &'a [u8],
    pos: usize,
    /// Last significant (non-whitespace, non-comment) byte seen, used to
    /// disambiguate regex literals from division.
    last: u8,
    /// Last identifier scanned, for keyword-prefixed regex positions
    /// (`return /x/`).
    last_ident: Option<&'a str>,
    refs: Vec<String>,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            bytes: source.as_bytes(),
            pos: 0,
            last: 0,
            last_ident: None,
            refs: Vec::new(),
        }
    }

    fn err(message: &str, offset: usize) -> ExtractError {
        ExtractError {
            message: message.to_string(),
            offset,
        }
    }

    fn run(mut self) -> Result<Vec<String>, ExtractError> {
        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];
            match b {
                b' ' | b'\t' | b'\r' | b'\n' => self.pos += 1,
                b'/' => self.slash()?,
                b'"' | b'\'' => {
                    self.string_literal(b)?;
                    self.last = b;
                    self.last_ident = None;
                }
                b'`' => {
                    self.template_literal()?;
                    self.last = b'`';
                    self.last_ident = None;
                }
                _ if is_ident_start(b) => self.identifier()?,
                _ => {
                    self.pos += 1;
                    self.last = b;
                    self.last_ident = None;
                }
            }
        }
        Ok(self.refs)
    }

    /// Comment, regex literal or plain division, depending on lookahead
    /// and the previous significant token.
    fn slash(&mut self) -> Result<(), ExtractError> {
        let start = self.pos;
        match self.bytes.get(self.pos + 1) {
            Some(b'/') => {
                while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                    self.pos += 1;
                }
            }
            Some(b'*') => {
                self.pos += 2;
                loop {
                    if self.pos + 1 >= self.bytes.len() {
                        return Err(Self::err("unterminated block comment", start));
                    }
                    if self.bytes[self.pos] == b'*' && self.bytes[self.pos + 1] == b'/' {
                        self.pos += 2;
                        break;
                    }
                    self.pos += 1;
                }
            }
            _ if self.regex_allowed() => {
                self.regex_literal()?;
                self.last = b'/';
                self.last_ident = None;
            }
            _ => {
                // Division operator
                self.pos += 1;
                self.last = b'/';
                self.last_ident = None;
            }
        }
        Ok(())
    }

    /// A regex literal can only start where an expression is expected.
    fn regex_allowed(&self) -> bool {
        if matches!(
            self.last_ident,
            Some("return" | "typeof" | "instanceof" | "in" | "case" | "delete" | "void" | "new")
        ) {
            return true;
        }
        if self.last_ident.is_some() {
            return false;
        }
        matches!(
            self.last,
            0 | b'(' | b',' | b'=' | b':' | b'[' | b'!' | b'&' | b'|' | b'?' | b'{' | b'}'
                | b';' | b'+' | b'-' | b'*' | b'%' | b'<' | b'>' | b'~' | b'^' | b'/'
        )
    }

    fn regex_literal(&mut self) -> Result<(), ExtractError> {
        let start = self.pos;
        self.pos += 1;
        let mut in_class = false;
        loop {
            let Some(&b) = self.bytes.get(self.pos) else {
                return Err(Self::err("unterminated regular expression", start));
            };
            match b {
                b'\\' => self.pos += 1,
                b'[' => in_class = true,
                b']' => in_class = false,
                b'/' if !in_class => {
                    self.pos += 1;
                    // Flags
                    while self
                        .bytes
                        .get(self.pos)
                        .is_some_and(|&f| f.is_ascii_alphabetic())
                    {
                        self.pos += 1;
                    }
                    return Ok(());
                }
                b'\n' => return Err(Self::err("unterminated regular expression", start)),
                _ => {}
            }
            self.pos += 1;
        }
    }

    /// Skip a string literal, returning its unescaped value.
    fn string_literal(&mut self, quote: u8) -> Result<String, ExtractError> {
        let start = self.pos;
        self.pos += 1;
        let mut value = String::new();
        loop {
            let Some(&b) = self.bytes.get(self.pos) else {
                return Err(Self::err("unterminated string literal", start));
            };
            match b {
                b'\\' => {
                    let Some(&esc) = self.bytes.get(self.pos + 1) else {
                        return Err(Self::err("unterminated string literal", start));
                    };
                    match esc {
                        b'n' => value.push('\n'),
                        b't' => value.push('\t'),
                        b'r' => value.push('\r'),
                        b'\n' => {} // line continuation
                        other => value.push(other as char),
                    }
                    self.pos += 2;
                }
                b'\n' => return Err(Self::err("unterminated string literal", start)),
                _ if b == quote => {
                    self.pos += 1;
                    return Ok(value);
                }
                _ => {
                    // Multi-byte UTF-8 sequences pass through untouched.
                    let ch_len = utf8_len(b);
                    value.push_str(
                        std::str::from_utf8(&self.bytes[self.pos..self.pos + ch_len])
                            .unwrap_or(""),
                    );
                    self.pos += ch_len;
                }
            }
        }
    }

    fn template_literal(&mut self) -> Result<(), ExtractError> {
        let start = self.pos;
        self.pos += 1;
        loop {
            let Some(&b) = self.bytes.get(self.pos) else {
                return Err(Self::err("unterminated template literal", start));
            };
            match b {
                b'\\' => self.pos += 2,
                b'`' => {
                    self.pos += 1;
                    return Ok(());
                }
                b'$' if self.bytes.get(self.pos + 1) == Some(&b'{') => {
                    self.pos += 2;
                    self.braced_substitution(start)?;
                }
                _ => self.pos += 1,
            }
        }
    }

    /// Skip the `${ … }` body of a template substitution, honoring nested
    /// braces, strings and templates.
    fn braced_substitution(&mut self, start: usize) -> Result<(), ExtractError> {
        let mut depth = 1usize;
        while depth > 0 {
            let Some(&b) = self.bytes.get(self.pos) else {
                return Err(Self::err("unterminated template literal", start));
            };
            match b {
                b'{' => {
                    depth += 1;
                    self.pos += 1;
                }
                b'}' => {
                    depth -= 1;
                    self.pos += 1;
                }
                b'"' | b'\'' => {
                    self.string_literal(b)?;
                    self.last = b;
                    self.last_ident = None;
                }
                b'`' => self.template_literal()?,
                b'/' => self.slash()?,
                _ if is_ident_start(b) => self.identifier()?,
                _ => {
                    self.pos += 1;
                    if !matches!(b, b' ' | b'\t' | b'\r' | b'\n') {
                        self.last = b;
                        self.last_ident = None;
                    }
                }
            }
        }
        Ok(())
    }

    fn identifier(&mut self) -> Result<(), ExtractError> {
        let start = self.pos;
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|&b| is_ident_continue(b))
        {
            self.pos += 1;
        }
        let ident = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or("");
        let member_access = self.last == b'.';
        self.last = self.bytes[self.pos - 1];
        self.last_ident = Some(ident);

        if member_access {
            return Ok(());
        }
        match ident {
            "require" => self.require_call(),
            "define" => self.define_header(),
            _ => Ok(()),
        }
    }

    /// Collect the literal argument of a `require("…")` call. Dynamic
    /// arguments are ignored, matching static extraction semantics.
    fn require_call(&mut self) -> Result<(), ExtractError> {
        let saved = self.pos;
        self.skip_ws();
        if self.bytes.get(self.pos) != Some(&b'(') {
            self.pos = saved;
            return Ok(());
        }
        self.pos += 1;
        self.skip_ws();
        match self.bytes.get(self.pos) {
            Some(&q @ (b'"' | b'\'')) => {
                let value = self.string_literal(q)?;
                self.last = q;
                self.last_ident = None;
                if !value.is_empty() {
                    self.refs.push(value);
                }
            }
            _ => {
                // Not a literal; resume normal scanning inside the call.
                self.last = b'(';
                self.last_ident = None;
            }
        }
        Ok(())
    }

    /// Collect the dependency array of `define([ … ])` or
    /// `define("id", [ … ])`.
    fn define_header(&mut self) -> Result<(), ExtractError> {
        let saved = self.pos;
        self.skip_ws();
        if self.bytes.get(self.pos) != Some(&b'(') {
            self.pos = saved;
            return Ok(());
        }
        self.pos += 1;
        self.skip_ws();

        // Optional module id first argument
        if let Some(&q @ (b'"' | b'\'')) = self.bytes.get(self.pos) {
            self.string_literal(q)?;
            self.skip_ws();
            if self.bytes.get(self.pos) != Some(&b',') {
                self.last = q;
                self.last_ident = None;
                return Ok(());
            }
            self.pos += 1;
            self.skip_ws();
        }

        if self.bytes.get(self.pos) != Some(&b'[') {
            self.last = b'(';
            self.last_ident = None;
            return Ok(());
        }
        self.pos += 1;
        loop {
            self.skip_ws();
            match self.bytes.get(self.pos) {
                Some(&q @ (b'"' | b'\'')) => {
                    let value = self.string_literal(q)?;
                    if !AMD_PSEUDO_DEPS.contains(&value.as_str()) && !value.is_empty() {
                        self.refs.push(value);
                    }
                }
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    self.last = b']';
                    self.last_ident = None;
                    return Ok(());
                }
                Some(_) => {
                    // Non-literal entry; give up on this array.
                    self.last = b'[';
                    self.last_ident = None;
                    return Ok(());
                }
                None => return Err(Self::err("unterminated dependency array", saved)),
            }
        }
    }

    fn skip_ws(&mut self) {
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|&b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
        {
            self.pos += 1;
        }
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

fn utf8_len(b: u8) -> usize {
    match b {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        _ => 4,
    }
}
