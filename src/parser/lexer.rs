//! Jinx lexer
//!
//! Converts source text into an ordered list of symbols. Newlines are
//! significant (they terminate statements) and are emitted as symbols of
//! their own; runs of blank lines collapse to a single newline symbol.

use crate::error::CompileError;

/// Symbol categories produced by the lexer.
///
/// The discriminant order groups the variants into ranges used by the
/// classification helpers below: literals first, then operators and
/// punctuation, then keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SymbolType {
    Invalid,
    NewLine,
    /// Identifier (a single word; the parser joins multi-word names).
    NameValue,
    StringValue,
    NumberValue,
    IntegerValue,
    BooleanValue,

    // Operators and punctuation
    ForwardSlash,
    Asterisk,
    Percent,
    Plus,
    Minus,
    Equals,
    NotEquals,
    LessThan,
    LessThanEquals,
    GreaterThan,
    GreaterThanEquals,
    Comma,
    ParenOpen,
    ParenClose,
    SquareOpen,
    SquareClose,
    CurlyOpen,
    CurlyClose,

    // Keywords
    And,
    As,
    Begin,
    Boolean,
    Break,
    By,
    Collection,
    Decrement,
    Else,
    End,
    Erase,
    External,
    From,
    Function,
    Guid,
    If,
    Import,
    Increment,
    Integer,
    Library,
    Loop,
    Not,
    Null,
    Number,
    Or,
    Over,
    Private,
    Public,
    Readonly,
    Return,
    Set,
    String,
    To,
    Type,
    Until,
    Wait,
    While,

    /// End of input.
    Eof,
}

impl SymbolType {
    pub fn is_keyword(self) -> bool {
        self >= SymbolType::And && self <= SymbolType::While
    }

    pub fn is_operator(self) -> bool {
        self >= SymbolType::ForwardSlash && self <= SymbolType::CurlyClose
    }

    /// Literal value symbols (including the `null` keyword).
    pub fn is_value(self) -> bool {
        matches!(
            self,
            SymbolType::StringValue
                | SymbolType::NumberValue
                | SymbolType::IntegerValue
                | SymbolType::BooleanValue
                | SymbolType::Null
        )
    }

    /// Keywords naming a value type.
    pub fn is_value_type(self) -> bool {
        matches!(
            self,
            SymbolType::Boolean
                | SymbolType::Collection
                | SymbolType::Guid
                | SymbolType::Integer
                | SymbolType::Null
                | SymbolType::Number
                | SymbolType::String
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            SymbolType::Invalid => "invalid",
            SymbolType::NewLine => "newline",
            SymbolType::NameValue => "name",
            SymbolType::StringValue => "string literal",
            SymbolType::NumberValue => "number literal",
            SymbolType::IntegerValue => "integer literal",
            SymbolType::BooleanValue => "boolean literal",
            SymbolType::ForwardSlash => "/",
            SymbolType::Asterisk => "*",
            SymbolType::Percent => "%",
            SymbolType::Plus => "+",
            SymbolType::Minus => "-",
            SymbolType::Equals => "=",
            SymbolType::NotEquals => "!=",
            SymbolType::LessThan => "<",
            SymbolType::LessThanEquals => "<=",
            SymbolType::GreaterThan => ">",
            SymbolType::GreaterThanEquals => ">=",
            SymbolType::Comma => ",",
            SymbolType::ParenOpen => "(",
            SymbolType::ParenClose => ")",
            SymbolType::SquareOpen => "[",
            SymbolType::SquareClose => "]",
            SymbolType::CurlyOpen => "{",
            SymbolType::CurlyClose => "}",
            SymbolType::And => "and",
            SymbolType::As => "as",
            SymbolType::Begin => "begin",
            SymbolType::Boolean => "boolean",
            SymbolType::Break => "break",
            SymbolType::By => "by",
            SymbolType::Collection => "collection",
            SymbolType::Decrement => "decrement",
            SymbolType::Else => "else",
            SymbolType::End => "end",
            SymbolType::Erase => "erase",
            SymbolType::External => "external",
            SymbolType::From => "from",
            SymbolType::Function => "function",
            SymbolType::Guid => "guid",
            SymbolType::If => "if",
            SymbolType::Import => "import",
            SymbolType::Increment => "increment",
            SymbolType::Integer => "integer",
            SymbolType::Library => "library",
            SymbolType::Loop => "loop",
            SymbolType::Not => "not",
            SymbolType::Null => "null",
            SymbolType::Number => "number",
            SymbolType::Or => "or",
            SymbolType::Over => "over",
            SymbolType::Private => "private",
            SymbolType::Public => "public",
            SymbolType::Readonly => "readonly",
            SymbolType::Return => "return",
            SymbolType::Set => "set",
            SymbolType::String => "string",
            SymbolType::To => "to",
            SymbolType::Type => "type",
            SymbolType::Until => "until",
            SymbolType::Wait => "wait",
            SymbolType::While => "while",
            SymbolType::Eof => "end of script",
        }
    }
}

fn keyword_type(word: &str) -> Option<SymbolType> {
    Some(match word {
        "and" => SymbolType::And,
        "as" => SymbolType::As,
        "begin" => SymbolType::Begin,
        "boolean" => SymbolType::Boolean,
        "break" => SymbolType::Break,
        "by" => SymbolType::By,
        "collection" => SymbolType::Collection,
        "decrement" => SymbolType::Decrement,
        "else" => SymbolType::Else,
        "end" => SymbolType::End,
        "erase" => SymbolType::Erase,
        "external" => SymbolType::External,
        "from" => SymbolType::From,
        "function" => SymbolType::Function,
        "guid" => SymbolType::Guid,
        "if" => SymbolType::If,
        "import" => SymbolType::Import,
        "increment" => SymbolType::Increment,
        "integer" => SymbolType::Integer,
        "library" => SymbolType::Library,
        "loop" => SymbolType::Loop,
        "not" => SymbolType::Not,
        "null" => SymbolType::Null,
        "number" => SymbolType::Number,
        "or" => SymbolType::Or,
        "over" => SymbolType::Over,
        "private" => SymbolType::Private,
        "public" => SymbolType::Public,
        "readonly" => SymbolType::Readonly,
        "return" => SymbolType::Return,
        "set" => SymbolType::Set,
        "string" => SymbolType::String,
        "to" => SymbolType::To,
        "type" => SymbolType::Type,
        "until" => SymbolType::Until,
        "wait" => SymbolType::Wait,
        "while" => SymbolType::While,
        _ => return None,
    })
}

/// One lexed token with its source position.
///
/// `text` carries the word for identifiers and keywords (keywords can serve
/// as function name parts) and the decoded content for string literals.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub kind: SymbolType,
    pub text: Option<String>,
    pub num_val: f64,
    pub int_val: i64,
    pub bool_val: bool,
    pub line: u32,
    pub column: u32,
}

impl Symbol {
    fn new(kind: SymbolType, line: u32, column: u32) -> Self {
        Symbol {
            kind,
            text: None,
            num_val: 0.0,
            int_val: 0,
            bool_val: false,
            line,
            column,
        }
    }

    /// The word or literal text, empty for symbols that carry none.
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

/// Lexer over a UTF-8 source buffer.
pub struct Lexer<'a> {
    source: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
    symbols: Vec<Symbol>,
    error: Option<CompileError>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer {
            source: source.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
            symbols: Vec::new(),
            error: None,
        }
    }

    /// Lex the entire source. Lexing continues past the first error so later
    /// problems still surface in the log, but the first error wins.
    pub fn execute(mut self) -> Result<Vec<Symbol>, CompileError> {
        while self.pos < self.source.len() {
            self.next_symbol();
        }
        // Guarantee a statement terminator before end of input.
        if self
            .symbols
            .last()
            .is_some_and(|s| s.kind != SymbolType::NewLine)
        {
            self.push(Symbol::new(SymbolType::NewLine, self.line, self.column));
        }
        self.symbols
            .push(Symbol::new(SymbolType::Eof, self.line, self.column));
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.symbols),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn push(&mut self, symbol: Symbol) {
        self.symbols.push(symbol);
    }

    fn error(&mut self, message: impl Into<String>, line: u32, column: u32) {
        let message = message.into();
        if self.error.is_none() {
            self.error = Some(CompileError::Lex {
                message,
                line,
                column,
            });
        } else {
            // First error wins; surface the rest in the log.
            log::warn!("lex error at line {line}, column {column}: {message}");
        }
    }

    fn next_symbol(&mut self) {
        let line = self.line;
        let column = self.column;
        let Some(c) = self.peek() else {
            return;
        };

        match c {
            b' ' | b'\t' | b'\r' => {
                self.advance();
            }
            b'\n' => {
                self.advance();
                // Collapse blank lines: emit nothing for a newline at the
                // start of input or right after another newline.
                if self
                    .symbols
                    .last()
                    .is_some_and(|s| s.kind != SymbolType::NewLine)
                {
                    self.push(Symbol::new(SymbolType::NewLine, line, column));
                }
            }
            b'"' => self.read_string(line, column),
            b'-' if self.peek_at(1) == Some(b'-') => self.read_comment(line, column),
            b'0'..=b'9' => self.read_number(line, column),
            b'A'..=b'Z' | b'a'..=b'z' | b'_' => self.read_name(line, column),
            _ => self.read_operator(line, column),
        }
    }

    fn read_operator(&mut self, line: u32, column: u32) {
        let c = self.advance().expect("caller checked peek");
        let kind = match c {
            b'*' => SymbolType::Asterisk,
            b'/' => SymbolType::ForwardSlash,
            b'%' => SymbolType::Percent,
            b'+' => SymbolType::Plus,
            b'-' => SymbolType::Minus,
            b'=' => SymbolType::Equals,
            b',' => SymbolType::Comma,
            b'(' => SymbolType::ParenOpen,
            b')' => SymbolType::ParenClose,
            b'[' => SymbolType::SquareOpen,
            b']' => SymbolType::SquareClose,
            b'{' => SymbolType::CurlyOpen,
            b'}' => SymbolType::CurlyClose,
            b'<' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    SymbolType::LessThanEquals
                } else {
                    SymbolType::LessThan
                }
            }
            b'>' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    SymbolType::GreaterThanEquals
                } else {
                    SymbolType::GreaterThan
                }
            }
            b'!' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    SymbolType::NotEquals
                } else {
                    self.error("unexpected character '!'", line, column);
                    self.push(Symbol::new(SymbolType::Invalid, line, column));
                    return;
                }
            }
            _ => {
                self.error(
                    format!("unexpected character '{}'", c as char),
                    line,
                    column,
                );
                self.push(Symbol::new(SymbolType::Invalid, line, column));
                return;
            }
        };
        self.push(Symbol::new(kind, line, column));
    }

    fn read_comment(&mut self, line: u32, column: u32) {
        // Two dashes start a line comment, three start a block comment that
        // runs to the next occurrence of three dashes.
        let mut dashes = 0;
        while self.peek() == Some(b'-') {
            self.advance();
            dashes += 1;
        }
        if dashes >= 3 {
            loop {
                match self.peek() {
                    None => {
                        self.error("unterminated block comment", line, column);
                        return;
                    }
                    Some(b'-')
                        if self.peek_at(1) == Some(b'-') && self.peek_at(2) == Some(b'-') =>
                    {
                        self.advance();
                        self.advance();
                        self.advance();
                        return;
                    }
                    _ => {
                        self.advance();
                    }
                }
            }
        } else {
            while let Some(c) = self.peek() {
                if c == b'\n' {
                    break;
                }
                self.advance();
            }
        }
    }

    fn read_string(&mut self, line: u32, column: u32) {
        self.advance(); // opening quote
        let mut bytes = Vec::new();
        loop {
            match self.peek() {
                None | Some(b'\n') => {
                    self.error("unterminated string literal", line, column);
                    self.push(Symbol::new(SymbolType::Invalid, line, column));
                    return;
                }
                Some(b'"') => {
                    self.advance();
                    break;
                }
                Some(b'\\') => {
                    self.advance();
                    match self.advance() {
                        Some(b'n') => bytes.push(b'\n'),
                        Some(b't') => bytes.push(b'\t'),
                        Some(b'r') => bytes.push(b'\r'),
                        Some(b'\\') => bytes.push(b'\\'),
                        Some(b'"') => bytes.push(b'"'),
                        Some(other) => bytes.push(other),
                        None => {
                            self.error("unterminated string literal", line, column);
                            self.push(Symbol::new(SymbolType::Invalid, line, column));
                            return;
                        }
                    }
                }
                Some(_) => {
                    let c = self.advance().expect("peeked");
                    bytes.push(c);
                }
            }
        }
        match String::from_utf8(bytes) {
            Ok(text) => {
                let mut symbol = Symbol::new(SymbolType::StringValue, line, column);
                symbol.text = Some(text);
                self.push(symbol);
            }
            Err(_) => {
                self.error("string literal is not valid UTF-8", line, column);
                self.push(Symbol::new(SymbolType::Invalid, line, column));
            }
        }
    }

    fn read_number(&mut self, line: u32, column: u32) {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        let mut is_number = false;
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_number = true;
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap_or("");
        if is_number {
            match text.parse::<f64>() {
                Ok(value) => {
                    let mut symbol = Symbol::new(SymbolType::NumberValue, line, column);
                    symbol.num_val = value;
                    self.push(symbol);
                }
                Err(_) => {
                    self.error(format!("malformed number literal '{text}'"), line, column);
                    self.push(Symbol::new(SymbolType::Invalid, line, column));
                }
            }
        } else {
            match text.parse::<i64>() {
                Ok(value) => {
                    let mut symbol = Symbol::new(SymbolType::IntegerValue, line, column);
                    symbol.int_val = value;
                    self.push(symbol);
                }
                Err(_) => {
                    self.error(format!("malformed integer literal '{text}'"), line, column);
                    self.push(Symbol::new(SymbolType::Invalid, line, column));
                }
            }
        }
    }

    fn read_name(&mut self, line: u32, column: u32) {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
        {
            self.advance();
        }
        let word = std::str::from_utf8(&self.source[start..self.pos]).unwrap_or("");

        let mut symbol = match word {
            "true" | "false" => {
                let mut s = Symbol::new(SymbolType::BooleanValue, line, column);
                s.bool_val = word == "true";
                s
            }
            _ => match keyword_type(word) {
                Some(kind) => Symbol::new(kind, line, column),
                None => Symbol::new(SymbolType::NameValue, line, column),
            },
        };
        // Keywords keep their text so they can appear in function names.
        if symbol.kind != SymbolType::BooleanValue {
            symbol.text = Some(word.to_string());
        }
        self.push(symbol);
    }
}

/// Render a lexed symbol list as a readable dump for debug logging.
pub fn fmt_symbols(symbols: &[Symbol]) -> String {
    let mut out = String::from("symbols:\n");
    for symbol in symbols {
        match symbol.kind {
            SymbolType::Eof => break,
            SymbolType::NewLine => out.push('\n'),
            SymbolType::NameValue => {
                // Quote names so multi-word boundaries stay visible.
                out.push_str(&format!("'{}' ", symbol.text()));
            }
            SymbolType::StringValue => out.push_str(&format!("\"{}\" ", symbol.text())),
            SymbolType::NumberValue => out.push_str(&format!("{} ", symbol.num_val)),
            SymbolType::IntegerValue => out.push_str(&format!("{} ", symbol.int_val)),
            SymbolType::BooleanValue => out.push_str(&format!("{} ", symbol.bool_val)),
            other => out.push_str(&format!("{} ", other.name())),
        }
    }
    out
}
