//! Jinx parser
//!
//! Single-pass recursive descent over the symbol list, emitting bytecode as
//! it goes. The parser owns the hard name-resolution problems: variables,
//! properties, library names, keywords, and function name parts all share one
//! flat identifier space, and variable and property names may span multiple
//! words. Resolution is greedy: at each name position the longest known
//! word sequence wins, bounded by the live `max parts` count.
//!
//! Forward jumps are emitted as zero placeholders and backfilled once the
//! target offset is known.

use std::sync::Arc;

use crate::buffer::{Buffer, BinaryWriter, BytecodeHeader, BYTECODE_HEADER_SIZE};
use crate::error::CompileError;
use crate::library::{
    FunctionSignature, FunctionTable, Library, PropertyName, SignaturePart, SignaturePartType,
    Visibility,
};
use crate::parser::lexer::{Symbol, SymbolType};
use crate::parser::variable_frame::VariableStackFrame;
use crate::runtime::Runtime;
use crate::variant::{ValueType, Variant};
use crate::vm::opcode::Opcode;

/// Parser state for one compilation.
pub struct Parser {
    runtime: Arc<Runtime>,
    unique_name: String,
    symbols: Vec<Symbol>,
    pos: usize,
    buffer: Buffer,
    library: Arc<Library>,
    import_list: Vec<String>,
    local_functions: FunctionTable,
    variables: VariableStackFrame,
    /// Forward jump offset of the one pending `break` in the current loop.
    break_address: Option<usize>,
    require_return_value: bool,
    returned_value: bool,
    error: Option<CompileError>,
}

impl Parser {
    pub fn new(
        runtime: Arc<Runtime>,
        symbols: Vec<Symbol>,
        unique_name: impl Into<String>,
        imports: &[&str],
    ) -> Self {
        let library = runtime.get_library("");
        Parser {
            runtime,
            unique_name: unique_name.into(),
            symbols,
            pos: 0,
            buffer: Buffer::with_capacity(1024),
            library,
            import_list: imports.iter().map(|s| s.to_string()).collect(),
            local_functions: FunctionTable::new(),
            variables: VariableStackFrame::new(),
            break_address: None,
            require_return_value: false,
            returned_value: false,
            error: None,
        }
    }

    /// Parse the symbol list into a bytecode buffer.
    pub fn execute(mut self) -> Result<Vec<u8>, CompileError> {
        BytecodeHeader::default().write(&mut self.writer());
        self.parse_script();
        if let Some(error) = self.error {
            return Err(error);
        }
        // Backfill the final size into the header.
        let size = self.buffer.len() as u32;
        let mut writer = self.writer();
        writer.seek(BYTECODE_HEADER_SIZE - 4);
        writer.write_u32(size);
        Ok(self.buffer.into_bytes())
    }

    // =========================================================================
    // Symbol handling
    // =========================================================================

    fn symbol_at(&self, index: usize) -> &Symbol {
        let last = self.symbols.len() - 1;
        &self.symbols[index.min(last)]
    }

    fn current(&self) -> &Symbol {
        self.symbol_at(self.pos)
    }

    fn advance(&mut self) {
        if self.current().kind != SymbolType::Eof {
            self.pos += 1;
        }
    }

    fn check(&self, kind: SymbolType) -> bool {
        self.error.is_none() && self.current().kind == kind
    }

    fn accept(&mut self, kind: SymbolType) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: SymbolType) -> bool {
        if self.accept(kind) {
            return true;
        }
        self.set_error(format!("Expected symbol {}", kind.name()));
        false
    }

    fn set_error(&mut self, message: impl Into<String>) {
        if self.error.is_none() {
            let symbol = self.current();
            self.error = Some(CompileError::Parse {
                message: message.into(),
                line: symbol.line,
                column: symbol.column,
            });
        } else {
            log::warn!("parse error (suppressed): {}", message.into());
        }
    }

    /// Whether a scanned symbol can take part in the current statement.
    fn symbol_valid(&self, index: usize) -> bool {
        if self.error.is_some() {
            return false;
        }
        let kind = self.symbol_at(index).kind;
        kind != SymbolType::NewLine && kind != SymbolType::Eof
    }

    fn check_name(&self) -> bool {
        self.check(SymbolType::NameValue)
    }

    fn check_binary_operator(&self) -> bool {
        self.error.is_none()
            && matches!(
                self.current().kind,
                SymbolType::Asterisk
                    | SymbolType::ForwardSlash
                    | SymbolType::Percent
                    | SymbolType::Plus
                    | SymbolType::Minus
                    | SymbolType::Equals
                    | SymbolType::NotEquals
                    | SymbolType::LessThan
                    | SymbolType::LessThanEquals
                    | SymbolType::GreaterThan
                    | SymbolType::GreaterThanEquals
            )
    }

    fn check_function_name_part(&self) -> bool {
        self.error.is_none()
            && (self.current().kind == SymbolType::NameValue || self.current().kind.is_keyword())
    }

    // =========================================================================
    // Bytecode emission
    // =========================================================================

    fn writer(&mut self) -> BinaryWriter<'_> {
        BinaryWriter::new(&mut self.buffer)
    }

    fn tell(&self) -> usize {
        self.buffer.len()
    }

    fn emit_opcode(&mut self, opcode: Opcode) {
        self.writer().write_u8(opcode as u8);
    }

    fn emit_name(&mut self, name: &str) {
        self.writer().write_str(name);
    }

    fn emit_id(&mut self, id: u64) {
        self.writer().write_u64(id);
    }

    fn emit_count(&mut self, count: u32) {
        self.writer().write_u32(count);
    }

    fn emit_address(&mut self, address: usize) {
        self.writer().write_u32(address as u32);
    }

    fn emit_value(&mut self, value: &Variant) {
        let mut writer = self.writer();
        value.write(&mut writer);
    }

    fn emit_value_type(&mut self, value_type: ValueType) {
        self.writer().write_u8(value_type as u8);
    }

    /// Emit a zeroed jump target and return its offset for later backfill.
    fn emit_address_placeholder(&mut self) -> usize {
        let offset = self.tell();
        self.writer().write_u32(0);
        offset
    }

    /// Overwrite a placeholder with the current append position.
    fn emit_address_backfill(&mut self, offset: usize) {
        let target = self.tell() as u32;
        let mut writer = self.writer();
        writer.seek(offset);
        writer.write_u32(target);
    }

    // =========================================================================
    // Scope helpers
    // =========================================================================

    fn scope_begin(&mut self) {
        self.variables.scope_begin();
        self.emit_opcode(Opcode::ScopeBegin);
    }

    fn scope_end(&mut self) {
        if let Err(message) = self.variables.scope_end() {
            self.set_error(message);
        }
        self.emit_opcode(Opcode::ScopeEnd);
    }

    // =========================================================================
    // Name resolution
    // =========================================================================

    /// If the symbol names the current library or an import, return it.
    fn library_name_from(&self, symbol: &Symbol) -> Option<String> {
        let text = symbol.text();
        if text.is_empty()
            || (symbol.kind != SymbolType::NameValue && !symbol.kind.is_keyword())
        {
            return None;
        }
        if text == self.library.name() {
            return Some(text.to_string());
        }
        self.import_list
            .iter()
            .find(|import| import.as_str() == text)
            .cloned()
    }

    fn check_library_name(&self) -> Option<String> {
        self.library_name_from(self.current())
    }

    /// Join `count` symbol texts starting at `index` into a space-separated
    /// name, or None if any symbol in the run cannot contribute.
    fn join_name(&self, index: usize, count: usize) -> Option<String> {
        let mut name = String::new();
        for i in 0..count {
            if !self.symbol_valid(index + i) {
                return None;
            }
            let text = self.symbol_at(index + i).text();
            if text.is_empty() {
                return None;
            }
            if i > 0 {
                name.push(' ');
            }
            name.push_str(text);
        }
        Some(name)
    }

    /// Greedy longest-first variable match at a scan position. Returns the
    /// number of symbols the name spans.
    fn check_variable_at(&self, index: usize) -> Option<usize> {
        if !self.symbol_valid(index) || self.symbol_at(index).kind != SymbolType::NameValue {
            return None;
        }
        let max_parts = self.variables.max_parts();
        for count in (1..=max_parts).rev() {
            if let Some(name) = self.join_name(index, count) {
                if self.variables.exists(&name) {
                    return Some(count);
                }
            }
        }
        None
    }

    /// Greedy longest-first property match within one library. Returns the
    /// number of symbols the property name spans.
    fn check_property_name_at(&self, library: &Library, index: usize) -> Option<usize> {
        if !self.symbol_valid(index) || self.symbol_at(index).kind != SymbolType::NameValue {
            return None;
        }
        let max_parts = library.max_property_parts();
        for count in (1..=max_parts).rev() {
            if let Some(name) = self.join_name(index, count) {
                if library.property_name_exists(&name) {
                    return Some(count);
                }
            }
        }
        None
    }

    /// Property match at a scan position, trying an explicit library prefix
    /// first, then the current library, then each import. Returns the total
    /// symbol count including any prefix.
    fn check_property_at(&self, index: usize) -> Option<usize> {
        if !self.symbol_valid(index) || self.symbol_at(index).kind != SymbolType::NameValue {
            return None;
        }
        if let Some(library_name) = self.library_name_from(self.symbol_at(index)) {
            let library = self.runtime.get_library(&library_name);
            return self
                .check_property_name_at(&library, index + 1)
                .map(|count| count + 1);
        }
        if let Some(count) = self.check_property_name_at(&self.library, index) {
            return Some(count);
        }
        for import in &self.import_list {
            let library = self.runtime.get_library(import);
            if library.name() == self.library.name() {
                continue;
            }
            if let Some(count) = self.check_property_name_at(&library, index) {
                return Some(count);
            }
        }
        None
    }

    /// Scan the upcoming symbols (without consuming them) and decide whether
    /// they form a function call. Literals, variables, properties, and
    /// bracketed subexpressions become parameter parts; remaining words
    /// become name parts; any other operator ends the scan. The resulting
    /// part list is matched against the local table, the current library,
    /// and finally each import.
    fn check_function_call(&self) -> Option<FunctionSignature> {
        if self.error.is_some() {
            return None;
        }
        let mut index = self.pos;
        let first = self.symbol_at(index);
        if first.kind == SymbolType::NewLine || first.kind == SymbolType::Eof {
            return None;
        }
        if first.kind.is_operator() && first.kind != SymbolType::ParenOpen {
            return None;
        }

        // An explicit library prefix restricts the search to that library.
        let library_prefix = self.library_name_from(first);
        if library_prefix.is_some() {
            index += 1;
            if !self.symbol_valid(index) {
                return None;
            }
        }

        let mut parts: Vec<SignaturePart> = Vec::new();
        while self.symbol_valid(index) {
            let symbol = self.symbol_at(index);
            if symbol.kind == SymbolType::NameValue || symbol.kind.is_keyword() {
                if let Some(count) = self.check_variable_at(index) {
                    index += count - 1;
                    parts.push(SignaturePart::parameter("", ValueType::Null));
                } else if let Some(count) = self.check_property_at(index) {
                    index += count - 1;
                    parts.push(SignaturePart::parameter("", ValueType::Null));
                } else {
                    parts.push(SignaturePart::name(symbol.text()));
                }
            } else if symbol.kind.is_value() {
                parts.push(SignaturePart::parameter("", ValueType::Null));
            } else if symbol.kind == SymbolType::ParenOpen
                || symbol.kind == SymbolType::SquareOpen
            {
                let close = if symbol.kind == SymbolType::ParenOpen {
                    SymbolType::ParenClose
                } else {
                    SymbolType::SquareClose
                };
                let open = symbol.kind;
                let mut depth = 1;
                while depth > 0 {
                    index += 1;
                    if !self.symbol_valid(index) {
                        return None;
                    }
                    let kind = self.symbol_at(index).kind;
                    if kind == close {
                        depth -= 1;
                    } else if kind == open {
                        depth += 1;
                    }
                }
                parts.push(SignaturePart::parameter("", ValueType::Null));
            } else if symbol.kind.is_operator() {
                break;
            } else {
                break;
            }
            index += 1;
        }

        if parts.is_empty() {
            return None;
        }

        if let Some(library_name) = library_prefix {
            let library = self.runtime.get_library(&library_name);
            return library.find_function(&parts);
        }

        if let Some(signature) = self.local_functions.find(&parts) {
            return Some(signature.clone());
        }
        if let Some(signature) = self.library.find_function(&parts) {
            return Some(signature);
        }

        let mut found: Option<FunctionSignature> = None;
        for import in &self.import_list {
            if !self.runtime.library_exists(import) {
                log::warn!("unable to find library '{import}'");
                continue;
            }
            let library = self.runtime.get_library(import);
            if library.name() == self.library.name() {
                continue;
            }
            let Some(signature) = library.find_function(&parts) else {
                continue;
            };
            if found.is_some() {
                log::warn!(
                    "ambiguous function name detected; use a library name to disambiguate"
                );
                return None;
            }
            if signature.visibility() == Visibility::Private {
                log::warn!("scope does not allow calling library function");
                return None;
            }
            found = Some(signature);
        }
        found
    }

    // =========================================================================
    // Consuming parsers for names and values
    // =========================================================================

    /// A single-word name (library names, import names).
    fn parse_name(&mut self) -> String {
        if self.error.is_some() {
            return String::new();
        }
        if self.current().kind != SymbolType::NameValue {
            self.set_error("Unexpected symbol type when parsing name");
            return String::new();
        }
        let name = self.current().text().to_string();
        self.advance();
        name
    }

    /// A possibly multi-word name: starts with an identifier and absorbs
    /// following words (keywords included) until a stop symbol, an operator,
    /// or end of line.
    fn parse_multi_name(&mut self, stops: &[SymbolType]) -> String {
        if self.error.is_some() {
            return String::new();
        }
        if self.current().kind != SymbolType::NameValue {
            self.set_error("Unexpected symbol type when parsing name");
            return String::new();
        }
        let mut name = self.current().text().to_string();
        self.advance();
        while self.symbol_valid(self.pos) && !self.current().text().is_empty() {
            if self.current().kind != SymbolType::NameValue && stops.contains(&self.current().kind)
            {
                break;
            }
            name.push(' ');
            name.push_str(self.current().text());
            self.advance();
        }
        name
    }

    /// Consume the longest matching visible variable name.
    fn parse_variable(&mut self) -> String {
        match self.check_variable_at(self.pos) {
            Some(count) => {
                let name = self.join_name(self.pos, count).expect("checked");
                for _ in 0..count {
                    self.advance();
                }
                name
            }
            None => {
                self.set_error("Could not parse variable name");
                String::new()
            }
        }
    }

    /// Consume the longest matching property name in one library.
    fn parse_property_name_parts(&mut self, library: &Library) -> Option<PropertyName> {
        let count = self.check_property_name_at(library, self.pos)?;
        let name = self.join_name(self.pos, count).expect("checked");
        for _ in 0..count {
            self.advance();
        }
        library.get_property_name(&name)
    }

    /// Consume a property reference, resolving an explicit library prefix or
    /// searching the current library and imports. Enforces visibility and
    /// cross-import ambiguity rules.
    fn parse_property_name(&mut self) -> Option<PropertyName> {
        if let Some(library_name) = self.check_library_name() {
            self.advance();
            let library = self.runtime.get_library(&library_name);
            let Some(property) = self.parse_property_name_parts(&library) else {
                self.set_error("Could not find property name");
                return None;
            };
            if self.library.name() != library_name
                && property.visibility() != Visibility::Public
            {
                self.set_error("Unable to access private property");
                return None;
            }
            return Some(property);
        }

        let current_library = self.library.clone();
        if let Some(property) = self.parse_property_name_parts(&current_library) {
            return Some(property);
        }

        // Search imports without consuming until a single winner is known.
        let mut found: Option<(PropertyName, usize)> = None;
        let imports = self.import_list.clone();
        for import in &imports {
            let library = self.runtime.get_library(import);
            if library.name() == self.library.name() {
                continue;
            }
            let Some(count) = self.check_property_name_at(&library, self.pos) else {
                continue;
            };
            let name = self.join_name(self.pos, count).expect("checked");
            let property = library.get_property_name(&name).expect("checked");
            if property.visibility() != Visibility::Public {
                continue;
            }
            if found.is_some() {
                self.set_error("Ambiguous property name found");
                return None;
            }
            found = Some((property, count));
        }
        let (property, count) = found?;
        for _ in 0..count {
            self.advance();
        }
        Some(property)
    }

    fn parse_scope(&mut self) -> Visibility {
        if self.accept(SymbolType::Private) {
            Visibility::Private
        } else if self.accept(SymbolType::Public) {
            Visibility::Public
        } else {
            Visibility::Local
        }
    }

    /// A literal value symbol as a variant.
    fn parse_value(&mut self) -> Variant {
        if self.error.is_some() {
            return Variant::Null;
        }
        let value = match self.current().kind {
            SymbolType::NumberValue => Variant::Number(self.current().num_val),
            SymbolType::IntegerValue => Variant::Integer(self.current().int_val),
            SymbolType::BooleanValue => Variant::Boolean(self.current().bool_val),
            SymbolType::StringValue => Variant::String(self.current().text().to_string()),
            SymbolType::Null => Variant::Null,
            _ => {
                self.set_error("Unknown value");
                return Variant::Null;
            }
        };
        self.advance();
        value
    }

    fn parse_value_type(&mut self) -> ValueType {
        if self.error.is_some() {
            return ValueType::Null;
        }
        let value_type = match self.current().kind {
            SymbolType::Number => ValueType::Number,
            SymbolType::Integer => ValueType::Integer,
            SymbolType::Boolean => ValueType::Boolean,
            SymbolType::String => ValueType::String,
            SymbolType::Null => ValueType::Null,
            SymbolType::Collection => ValueType::Collection,
            SymbolType::Guid => ValueType::Guid,
            _ => {
                self.set_error("Unknown value type");
                return ValueType::Null;
            }
        };
        self.advance();
        value_type
    }

    fn parse_function_name_part(&mut self) -> String {
        if self.error.is_some() {
            return String::new();
        }
        if self.current().text().is_empty() {
            self.set_error("Unexpected symbol type when parsing function name");
            return String::new();
        }
        let name = self.current().text().to_string();
        self.advance();
        name
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn binary_opcode(kind: SymbolType) -> Option<Opcode> {
        Some(match kind {
            SymbolType::Asterisk => Opcode::Multiply,
            SymbolType::ForwardSlash => Opcode::Divide,
            SymbolType::Percent => Opcode::Mod,
            SymbolType::Plus => Opcode::Add,
            SymbolType::Minus => Opcode::Subtract,
            SymbolType::Equals => Opcode::Equals,
            SymbolType::NotEquals => Opcode::NotEquals,
            SymbolType::LessThan => Opcode::Less,
            SymbolType::LessThanEquals => Opcode::LessEq,
            SymbolType::GreaterThan => Opcode::Greater,
            SymbolType::GreaterThanEquals => Opcode::GreaterEq,
            _ => return None,
        })
    }

    /// Binding strength for the side operator stack: multiplicative over
    /// additive over relational over equality.
    fn precedence(opcode: Opcode) -> u8 {
        match opcode {
            Opcode::Multiply | Opcode::Divide | Opcode::Mod => 3,
            Opcode::Add | Opcode::Subtract => 2,
            Opcode::Less | Opcode::LessEq | Opcode::Greater | Opcode::GreaterEq => 1,
            _ => 0,
        }
    }

    /// Optional `[expr]` subscript. Leaves the key on the stack.
    fn parse_subscript(&mut self) -> bool {
        if !self.accept(SymbolType::SquareOpen) {
            return false;
        }
        self.parse_expression();
        self.expect(SymbolType::SquareClose);
        true
    }

    fn parse_operand(&mut self, suppress_function_call: bool) {
        if self.error.is_some() {
            return;
        }
        let signature = if suppress_function_call {
            None
        } else {
            self.check_function_call()
        };
        if let Some(signature) = signature {
            if !signature.returns_value() {
                self.set_error("Function in expression requires a return parameter");
                return;
            }
            self.parse_function_call(&signature);
        } else if self.check_property_at(self.pos).is_some() {
            let Some(property) = self.parse_property_name() else {
                self.set_error("Unable to find property name in library");
                return;
            };
            let subscript = self.parse_subscript();
            self.emit_opcode(if subscript {
                Opcode::PushPropKeyVal
            } else {
                Opcode::PushProp
            });
            self.emit_id(property.id());
            if self.accept(SymbolType::Type) {
                self.emit_opcode(Opcode::Type);
            }
        } else if self.check_variable_at(self.pos).is_some() {
            let name = self.parse_variable();
            let subscript = self.parse_subscript();
            self.emit_opcode(if subscript {
                Opcode::PushVarKey
            } else {
                Opcode::PushVar
            });
            self.emit_name(&name);
            if self.accept(SymbolType::Type) {
                self.emit_opcode(Opcode::Type);
            }
        } else if self.check(SymbolType::Comma)
            || self.check(SymbolType::ParenClose)
            || self.check(SymbolType::SquareClose)
            || self.check(SymbolType::To)
            || self.check(SymbolType::By)
        {
            // Empty operand slot; the caller decides whether that is legal.
        } else if self.accept(SymbolType::ParenOpen) {
            self.parse_expression();
            self.expect(SymbolType::ParenClose);
        } else if self.current().kind.is_value() {
            let value = self.parse_value();
            self.emit_opcode(Opcode::PushVal);
            self.emit_value(&value);
        } else if self.current().kind.is_value_type() {
            let value_type = self.parse_value_type();
            self.emit_opcode(Opcode::PushVal);
            self.emit_value(&Variant::ValType(value_type));
        } else {
            self.set_error("Expected operand");
        }
    }

    /// Operand/operator alternation with a local operator stack. Operators
    /// of higher or equal precedence are flushed before a new one is pushed,
    /// and the caller flushes whatever remains.
    fn parse_subexpression_operation(
        &mut self,
        opcode_stack: &mut Vec<Opcode>,
        mut suppress_function_call: bool,
    ) {
        while self.symbol_valid(self.pos) {
            self.parse_operand(suppress_function_call);
            suppress_function_call = false;
            if self.error.is_some() {
                return;
            }
            if self.accept(SymbolType::As) {
                self.emit_opcode(Opcode::Cast);
                let value_type = self.parse_value_type();
                if self.error.is_some() {
                    return;
                }
                self.emit_value_type(value_type);
            }
            if self.check_binary_operator() {
                let opcode = Self::binary_opcode(self.current().kind).expect("checked");
                self.advance();
                while let Some(&top) = opcode_stack.last() {
                    if Self::precedence(top) >= Self::precedence(opcode) {
                        self.emit_opcode(top);
                        opcode_stack.pop();
                    } else {
                        break;
                    }
                }
                opcode_stack.push(opcode);
            } else if self.check(SymbolType::And) || self.check(SymbolType::Or) {
                let opcode = if self.current().kind == SymbolType::And {
                    Opcode::And
                } else {
                    Opcode::Or
                };
                self.advance();
                // Both sides always evaluate; flush pending arithmetic first.
                while let Some(op) = opcode_stack.pop() {
                    self.emit_opcode(op);
                }
                self.parse_expression();
                self.emit_opcode(opcode);
            } else {
                break;
            }
        }
    }

    fn parse_subexpression_impl(&mut self, suppress_function_call: bool) {
        if self.error.is_some() {
            return;
        }
        if self.check(SymbolType::NewLine) {
            self.set_error("Expected valid expression");
            return;
        }
        let mut opcode_stack: Vec<Opcode> = Vec::new();
        if self.accept(SymbolType::Not) {
            self.parse_expression();
            self.emit_opcode(Opcode::Not);
        } else {
            self.parse_subexpression_operation(&mut opcode_stack, suppress_function_call);
        }
        while let Some(op) = opcode_stack.pop() {
            self.emit_opcode(op);
        }
    }

    fn parse_subexpression(&mut self) {
        self.parse_subexpression_impl(false);
    }

    /// Full expression: handles collection literals (`[k, v], [k, v]` pair
    /// chains), empty collections (`[]`), and comma-separated lists.
    fn parse_expression_impl(&mut self, suppress_function_call: bool) {
        if self.accept(SymbolType::SquareOpen) {
            if self.accept(SymbolType::SquareClose) {
                self.emit_opcode(Opcode::PushColl);
                self.emit_count(0);
                return;
            }
            if self.check(SymbolType::SquareOpen) {
                // Outer-bracketed pair list: [[k1, v1], [k2, v2], …]
                let mut count: u32 = 0;
                loop {
                    self.expect(SymbolType::SquareOpen);
                    self.parse_subexpression();
                    self.expect(SymbolType::Comma);
                    self.parse_expression();
                    self.expect(SymbolType::SquareClose);
                    count += 1;
                    if !self.accept(SymbolType::Comma) {
                        break;
                    }
                }
                self.expect(SymbolType::SquareClose);
                self.emit_opcode(Opcode::PushColl);
                self.emit_count(count);
                return;
            }
            // Bare pair sequence: [k1, v1], [k2, v2], …
            self.parse_subexpression_impl(suppress_function_call);
            if !self.accept(SymbolType::Comma) {
                self.set_error("Expected comma separating key-value pair");
                return;
            }
            self.parse_expression_impl(suppress_function_call);
            self.expect(SymbolType::SquareClose);
            let mut count: u32 = 1;
            while self.accept(SymbolType::Comma) {
                self.expect(SymbolType::SquareOpen);
                self.parse_subexpression();
                self.expect(SymbolType::Comma);
                self.parse_subexpression();
                self.expect(SymbolType::SquareClose);
                count += 1;
            }
            self.emit_opcode(Opcode::PushColl);
            self.emit_count(count);
        } else {
            self.parse_subexpression_impl(suppress_function_call);
            if self.accept(SymbolType::Comma) {
                if self.check(SymbolType::NewLine) {
                    self.set_error("Unexpected end of line in list");
                    return;
                }
                let mut count: u32 = 1;
                loop {
                    self.parse_subexpression();
                    count += 1;
                    if !self.accept(SymbolType::Comma) {
                        break;
                    }
                }
                self.emit_opcode(Opcode::PushList);
                self.emit_count(count);
            }
        }
    }

    fn parse_expression(&mut self) {
        self.parse_expression_impl(false);
    }

    // =========================================================================
    // Function calls and definitions
    // =========================================================================

    /// Consume a call site that `check_function_call` already matched,
    /// pushing argument expressions in source order, then emit the call.
    fn parse_function_call(&mut self, signature: &FunctionSignature) {
        if self.check_library_name().is_some() {
            self.advance();
        }
        let parts: Vec<SignaturePart> = signature.parts().to_vec();
        let mut count = 0usize;
        let mut optional_count = 0usize;
        let mut index = 0usize;
        while index < parts.len() {
            let part = &parts[index];
            if part.optional {
                optional_count += 1;
            }
            match part.part_type {
                SignaturePartType::Name => {
                    if self.check_function_name_part() {
                        let name = self.parse_function_name_part();
                        let mut matched = false;
                        while index < parts.len() {
                            let candidate = &parts[index];
                            if candidate.part_type == SignaturePartType::Name
                                && candidate.names.contains(&name)
                            {
                                matched = true;
                                break;
                            }
                            if candidate.optional {
                                index += 1;
                                continue;
                            }
                            break;
                        }
                        if !matched {
                            self.set_error("Mismatch in function name");
                            return;
                        }
                    } else {
                        if part.optional {
                            index += 1;
                            continue;
                        }
                        self.set_error("Expecting function name");
                        return;
                    }
                }
                SignaturePartType::Parameter => {
                    if self.accept(SymbolType::ParenOpen) {
                        self.parse_expression();
                        self.expect(SymbolType::ParenClose);
                    } else {
                        // Early parameters suppress nested call detection so
                        // a leading argument cannot re-match this signature.
                        self.parse_expression_impl(count <= optional_count);
                    }
                }
            }
            count += 1;
            index += 1;
        }
        self.emit_opcode(Opcode::CallFunc);
        self.emit_id(signature.id());
    }

    /// Parse a signature declaration: `[return] name parts and {parameters}`
    /// up to end of line, then emit the Function opcode and serialized
    /// signature.
    fn parse_function_signature(&mut self, visibility: Visibility) -> Option<FunctionSignature> {
        let returns_value = self.accept(SymbolType::Return);
        if self.check(SymbolType::NewLine) {
            self.set_error("Empty function signature");
            return None;
        }
        let mut parsed_parameter = false;
        let mut parsed_non_keyword_name = false;
        let mut name_count = 0usize;
        let mut optional_count = 0usize;
        let mut parts: Vec<SignaturePart> = Vec::new();
        while !self.check(SymbolType::NewLine) && self.error.is_none() {
            if self.accept(SymbolType::CurlyOpen) {
                if parsed_parameter {
                    self.set_error(
                        "Functions cannot have multiple parameters without a name separating them",
                    );
                    return None;
                }
                let mut value_type = ValueType::Null;
                if self.current().kind.is_value_type() {
                    value_type = self.parse_value_type();
                }
                if !self.check_name() {
                    self.set_error("No variable name found in function signature");
                    return None;
                }
                let parameter_name = self.parse_multi_name(&[SymbolType::CurlyClose]);
                if !self.expect(SymbolType::CurlyClose) {
                    return None;
                }
                parts.push(SignaturePart::parameter(parameter_name, value_type));
                parsed_parameter = true;
            } else {
                let optional = self.accept(SymbolType::ParenOpen);
                if !self.check_function_name_part() {
                    self.set_error("Invalid name in function signature");
                    return None;
                }
                name_count += 1;
                if !self.current().kind.is_keyword() {
                    parsed_non_keyword_name = true;
                }
                let mut names = vec![self.parse_function_name_part()];
                while self.accept(SymbolType::ForwardSlash) {
                    if !self.check_function_name_part() {
                        self.set_error("Invalid name in function signature");
                        return None;
                    }
                    let name = self.parse_function_name_part();
                    if names.contains(&name) {
                        self.set_error("Duplicate alternative name in function signature");
                        return None;
                    }
                    names.push(name);
                }
                if optional {
                    optional_count += 1;
                    if !self.expect(SymbolType::ParenClose) {
                        return None;
                    }
                }
                parts.push(SignaturePart {
                    part_type: SignaturePartType::Name,
                    optional,
                    names,
                    value_type: ValueType::Null,
                });
                parsed_parameter = false;
            }
        }
        if !self.expect(SymbolType::NewLine) {
            return None;
        }
        if !parsed_non_keyword_name && name_count == 1 && parts.len() == 1 {
            self.set_error("Function signature cannot match a keyword");
            return None;
        }
        if name_count == optional_count {
            self.set_error("Function signature must have at least one non-optional name part");
            return None;
        }

        self.emit_opcode(Opcode::Function);
        // Local functions key their id off the script's unique name so two
        // scripts' local helpers cannot collide in the runtime function map.
        let owner = if visibility == Visibility::Local {
            self.unique_name.clone()
        } else {
            self.library.name().to_string()
        };
        let signature = FunctionSignature::new(visibility, returns_value, owner, parts);
        let mut writer = self.writer();
        signature.write(&mut writer);
        Some(signature)
    }

    fn parse_function_definition(&mut self, visibility: Visibility) {
        if !self.variables.is_root_frame() {
            self.set_error("Can't define a function inside another function");
            return;
        }
        if !self.variables.is_root_scope() {
            self.set_error("Can't define a function inside a scoped execution block");
            return;
        }
        let Some(signature) = self.parse_function_signature(visibility) else {
            return;
        };
        if visibility == Visibility::Local {
            if !self.local_functions.register(signature.clone()) {
                self.set_error(format!(
                    "Function already defined in script {}",
                    self.unique_name
                ));
                return;
            }
        } else if !self.library.register_signature(signature.clone()) {
            self.set_error(format!(
                "Function already defined in library {}",
                self.library.name()
            ));
            return;
        }

        // Initial execution jumps over the body; calls enter after the jump.
        self.emit_opcode(Opcode::Jump);
        let jump_backfill_address = self.emit_address_placeholder();

        self.variables.frame_begin();

        // Bind parameters from the top of the caller's stack, last first.
        let parameters: Vec<SignaturePart> = signature.parameters().cloned().collect();
        let mut stack_index: i32 = -1;
        for part in parameters.iter().rev() {
            let name = part.names.first().cloned().unwrap_or_default();
            self.variables.assign(&name);
            self.emit_opcode(Opcode::SetIndex);
            self.emit_name(&name);
            self.writer().write_i32(stack_index);
            self.emit_value_type(part.value_type);
            stack_index -= 1;
        }

        let saved_require = std::mem::replace(
            &mut self.require_return_value,
            signature.returns_value(),
        );
        let saved_returned = std::mem::replace(&mut self.returned_value, false);

        while !self.check(SymbolType::End)
            && !self.check(SymbolType::Eof)
            && self.error.is_none()
        {
            self.parse_statement();
        }
        self.expect(SymbolType::End);
        self.expect(SymbolType::NewLine);

        if self.require_return_value && !self.returned_value {
            self.set_error("Required return value not found");
        }

        self.emit_opcode(Opcode::Return);
        self.emit_address_backfill(jump_backfill_address);

        if let Err(message) = self.variables.frame_end() {
            self.set_error(message);
        }
        self.require_return_value = saved_require;
        self.returned_value = saved_returned;
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn parse_property_declaration(&mut self, visibility: Visibility, read_only: bool) {
        if self.error.is_some() {
            return;
        }
        if !self.check_name() {
            self.set_error("Property name expected");
            return;
        }
        if self
            .import_list
            .iter()
            .any(|import| import == self.current().text())
        {
            self.set_error("Property name cannot start with an import library name");
            return;
        }
        let mut property_library = self.library.clone();
        if let Some(library_name) = self.check_library_name() {
            property_library = self.runtime.get_library(&library_name);
            self.advance();
            if !self.check_name() {
                self.set_error("Property name expected");
                return;
            }
        }

        let name = self.parse_multi_name(&[SymbolType::To]);
        if self.library.property_name_exists(&name) {
            self.set_error("Property is already defined");
            return;
        }
        let property = PropertyName::new(
            visibility,
            read_only,
            property_library.name().to_string(),
            name,
        );
        if !property_library.register_property_name(property.clone()) {
            self.set_error("Error registering property name, possible duplicate");
            return;
        }

        self.emit_opcode(Opcode::Property);
        let mut writer = self.writer();
        property.write(&mut writer);

        if self.accept(SymbolType::To) {
            self.parse_expression();
            self.emit_opcode(Opcode::SetProp);
            self.emit_id(property.id());
        } else if read_only {
            self.set_error("Must assign property an initial value");
            return;
        }
        self.expect(SymbolType::NewLine);
    }

    fn parse_set_statement(&mut self) {
        if !self.check_name() {
            self.set_error("Expected variable or property name after 'set'");
            return;
        }
        if !self.library.name().is_empty() && self.current().text() == self.library.name() {
            self.set_error("Illegal use of library name in identifier");
            return;
        }
        if self.check_property_at(self.pos).is_some() {
            let Some(property) = self.parse_property_name() else {
                return;
            };
            if property.is_read_only() {
                self.set_error("Can't change readonly property");
                return;
            }
            let subscript = self.parse_subscript();
            self.expect(SymbolType::To);
            self.parse_expression();
            self.expect(SymbolType::NewLine);
            self.emit_opcode(if subscript {
                Opcode::SetPropKeyVal
            } else {
                Opcode::SetProp
            });
            self.emit_id(property.id());
        } else {
            let name = self.parse_multi_name(&[SymbolType::To, SymbolType::SquareOpen]);
            let subscript = self.parse_subscript();
            self.expect(SymbolType::To);
            self.parse_expression();
            self.expect(SymbolType::NewLine);
            self.emit_opcode(if subscript {
                Opcode::SetVarKey
            } else {
                Opcode::SetVar
            });
            self.emit_name(&name);
            self.variables.assign(&name);
        }
    }

    fn parse_if_else(&mut self) {
        self.parse_expression();
        self.expect(SymbolType::NewLine);

        self.emit_opcode(Opcode::JumpFalse);
        let if_jump_address = self.emit_address_placeholder();

        self.parse_block();

        let returned_value_in_if_block = self.returned_value;
        self.returned_value = false;

        if self.accept(SymbolType::Else) {
            self.emit_opcode(Opcode::Jump);
            let else_jump_address = self.emit_address_placeholder();
            self.emit_address_backfill(if_jump_address);

            if self.accept(SymbolType::NewLine) {
                self.parse_block();
                self.expect(SymbolType::End);
                self.expect(SymbolType::NewLine);
                // Both branches must return for the construct to count.
                if self.require_return_value && !returned_value_in_if_block {
                    self.returned_value = false;
                }
            } else if self.accept(SymbolType::If) {
                self.parse_if_else();
            } else {
                self.set_error("Unexpected symbol after else");
            }
            self.emit_address_backfill(else_jump_address);
        } else if self.accept(SymbolType::End) {
            self.expect(SymbolType::NewLine);
            self.emit_address_backfill(if_jump_address);
        } else {
            self.set_error("Missing block termination after if");
        }

        if !returned_value_in_if_block {
            self.returned_value = false;
        }
    }

    fn parse_loop(&mut self) {
        // Each loop tracks its own pending break.
        let saved_break = self.break_address.take();

        let mut name = String::new();
        if self.check_name() {
            name = self.parse_multi_name(&[
                SymbolType::From,
                SymbolType::Over,
                SymbolType::Until,
                SymbolType::While,
            ]);
        }

        if self.accept(SymbolType::From) {
            // Counter loop: counter, bound, and step feed LoopCount, which
            // initializes a cursor on first execution and advances it on
            // each pass, pushing the counter value and a continue flag.
            self.scope_begin();
            self.parse_expression();
            self.expect(SymbolType::To);
            self.parse_expression();
            if self.accept(SymbolType::By) {
                self.parse_expression();
            } else {
                // Null step: the VM picks +1 or -1 to match the direction.
                self.emit_opcode(Opcode::PushVal);
                self.emit_value(&Variant::Null);
            }
            self.expect(SymbolType::NewLine);

            let loop_count_address = self.tell();
            self.emit_opcode(Opcode::LoopCount);
            self.emit_opcode(Opcode::JumpFalse);
            let exit_jump_address = self.emit_address_placeholder();
            if name.is_empty() {
                self.emit_opcode(Opcode::Pop);
            } else {
                self.variables.assign(&name);
                self.emit_opcode(Opcode::SetVar);
                self.emit_name(&name);
            }

            self.parse_block();
            self.expect(SymbolType::End);
            self.expect(SymbolType::NewLine);

            self.emit_opcode(Opcode::Jump);
            self.emit_address(loop_count_address);

            self.emit_address_backfill(exit_jump_address);
            self.backfill_break();
            self.scope_end();
        } else if self.accept(SymbolType::Over) {
            // Collection loop. The collection stays on the stack for the
            // duration of the loop and is dropped at the exit point, which
            // break shares.
            self.scope_begin();
            self.parse_expression();
            if !self.expect(SymbolType::NewLine) {
                return;
            }

            // An empty collection skips the loop entirely.
            self.emit_opcode(Opcode::PushTop);
            self.emit_opcode(Opcode::JumpFalse);
            let empty_jump_address = self.emit_address_placeholder();

            self.emit_opcode(Opcode::PushItr);
            let bind_address = self.tell();
            if name.is_empty() {
                self.emit_opcode(Opcode::Pop);
            } else {
                self.variables.assign(&name);
                self.emit_opcode(Opcode::SetVar);
                self.emit_name(&name);
            }

            self.parse_block();
            self.expect(SymbolType::End);
            self.expect(SymbolType::NewLine);

            // LoopOver pushes the next value and true, or just false when
            // the iterator is exhausted.
            self.emit_opcode(Opcode::LoopOver);
            self.emit_opcode(Opcode::JumpTrue);
            self.emit_address(bind_address);

            self.emit_address_backfill(empty_jump_address);
            self.backfill_break();
            self.emit_opcode(Opcode::Pop);
            self.scope_end();
        } else if self.check(SymbolType::Until) || self.check(SymbolType::While) {
            // Pre-test conditional loop.
            let loop_begin_address = self.tell();
            let jump_true = self.accept(SymbolType::Until);
            if !jump_true {
                self.expect(SymbolType::While);
            }
            self.parse_expression();
            if !self.expect(SymbolType::NewLine) {
                return;
            }
            self.emit_opcode(if jump_true {
                Opcode::JumpTrue
            } else {
                Opcode::JumpFalse
            });
            let loop_jump_address = self.emit_address_placeholder();

            self.parse_block();
            self.expect(SymbolType::End);
            self.expect(SymbolType::NewLine);

            self.emit_opcode(Opcode::Jump);
            self.emit_address(loop_begin_address);
            self.emit_address_backfill(loop_jump_address);
            self.backfill_break();
        } else if self.accept(SymbolType::NewLine) {
            // Post-test loop: executes once, then repeats while/until the
            // trailing expression holds: `loop … end while <expr>`.
            let loop_begin_address = self.tell();
            self.parse_block();
            self.accept(SymbolType::End);
            let jump_true = self.accept(SymbolType::While);
            if !jump_true {
                self.expect(SymbolType::Until);
            }
            self.parse_expression();
            self.expect(SymbolType::NewLine);
            self.emit_opcode(if jump_true {
                Opcode::JumpTrue
            } else {
                Opcode::JumpFalse
            });
            self.emit_address(loop_begin_address);
            self.backfill_break();
        } else {
            self.set_error("Unknown syntax after loop keyword");
        }

        self.break_address = saved_break;
    }

    /// Backfill a pending break to the current position (one past the loop).
    fn backfill_break(&mut self) {
        if let Some(address) = self.break_address.take() {
            self.emit_address_backfill(address);
        }
    }

    fn parse_erase(&mut self) {
        if self.check_property_at(self.pos).is_some() {
            let Some(property) = self.parse_property_name() else {
                return;
            };
            if property.is_read_only() {
                self.set_error("Can't erase a readonly property");
                return;
            }
            if self.accept(SymbolType::SquareOpen) {
                self.parse_subexpression();
                self.expect(SymbolType::SquareClose);
                self.expect(SymbolType::NewLine);
                self.emit_opcode(Opcode::ErasePropElem);
            } else {
                self.expect(SymbolType::NewLine);
                self.emit_opcode(Opcode::EraseProp);
            }
            self.emit_id(property.id());
        } else if self.check_variable_at(self.pos).is_some() {
            let name = self.parse_variable();
            if self.accept(SymbolType::SquareOpen) {
                self.parse_subexpression();
                self.expect(SymbolType::SquareClose);
                self.expect(SymbolType::NewLine);
                self.emit_opcode(Opcode::EraseVarElem);
            } else {
                self.expect(SymbolType::NewLine);
                self.emit_opcode(Opcode::EraseVar);
            }
            self.emit_name(&name);
        } else {
            self.set_error("Valid property or variable name expected after erase keyword");
        }
    }

    fn parse_inc_dec(&mut self) {
        let increment = self.accept(SymbolType::Increment);
        if !increment {
            self.expect(SymbolType::Decrement);
        }
        let keyword = if increment { "increment" } else { "decrement" };
        let mut property: Option<PropertyName> = None;
        let mut variable = String::new();
        if self.check_property_at(self.pos).is_some() {
            let Some(found) = self.parse_property_name() else {
                return;
            };
            if found.is_read_only() {
                self.set_error(format!("Can't {keyword} a readonly property"));
                return;
            }
            self.emit_opcode(Opcode::PushProp);
            self.emit_id(found.id());
            property = Some(found);
        } else if self.check_variable_at(self.pos).is_some() {
            variable = self.parse_variable();
            self.emit_opcode(Opcode::PushVar);
            self.emit_name(&variable);
        } else {
            self.set_error(format!(
                "Valid property or variable name expected after {keyword} keyword"
            ));
            return;
        }
        if self.accept(SymbolType::By) {
            self.parse_expression();
        } else {
            self.emit_opcode(Opcode::PushVal);
            self.emit_value(&Variant::Integer(1));
        }
        self.emit_opcode(if increment {
            Opcode::Increment
        } else {
            Opcode::Decrement
        });
        match property {
            Some(property) => {
                self.emit_opcode(Opcode::SetProp);
                self.emit_id(property.id());
            }
            None => {
                self.emit_opcode(Opcode::SetVar);
                self.emit_name(&variable);
            }
        }
        self.expect(SymbolType::NewLine);
    }

    fn parse_return(&mut self) {
        if !self.check(SymbolType::NewLine) {
            if !self.require_return_value {
                self.set_error("Unexpected return value");
            } else {
                self.returned_value = true;
            }
            self.parse_expression();
            self.emit_opcode(Opcode::ReturnValue);
        } else {
            if self.require_return_value {
                self.set_error("Required return value not found");
            }
            self.emit_opcode(Opcode::Return);
        }
        self.accept(SymbolType::NewLine);
    }

    fn parse_wait(&mut self) {
        if self.accept(SymbolType::NewLine) {
            self.emit_opcode(Opcode::Wait);
            return;
        }
        if self.check(SymbolType::Until) || self.check(SymbolType::While) {
            // Re-test the guard after each wakeup, yielding between tests.
            let expression_address = self.tell();
            let jump_true = self.accept(SymbolType::Until);
            if !jump_true {
                self.expect(SymbolType::While);
            }
            self.parse_expression();
            if !self.expect(SymbolType::NewLine) {
                return;
            }
            self.emit_opcode(if jump_true {
                Opcode::JumpTrue
            } else {
                Opcode::JumpFalse
            });
            let address_placeholder = self.emit_address_placeholder();
            self.emit_opcode(Opcode::Wait);
            self.emit_opcode(Opcode::Jump);
            self.emit_address(expression_address);
            self.emit_address_backfill(address_placeholder);
        } else {
            self.set_error("Unexpected symbol after wait");
        }
    }

    fn parse_external(&mut self) {
        let property_exists = self.check_property_at(self.pos).is_some();
        if !self.check_name() {
            self.set_error("Expected valid name after 'external' keyword");
            return;
        }
        let name = self.parse_multi_name(&[]);
        if !self.variables.is_root_frame() {
            self.set_error(format!(
                "External variable '{name}' can't be declared in a function"
            ));
        } else if !self.variables.is_root_scope() {
            self.set_error(format!(
                "External variable '{name}' must be declared at the root scope"
            ));
        } else if property_exists {
            self.set_error(format!(
                "External variable '{name}' is already a property name"
            ));
        } else if self.variables.exists(&name) {
            self.set_error(format!("Variable '{name}' already exists"));
        } else {
            self.variables.assign(&name);
        }
        self.expect(SymbolType::NewLine);
    }

    fn parse_statement(&mut self) {
        if self.error.is_some() {
            return;
        }

        // Function signatures take precedence over everything else, so a
        // call match is checked before any statement keyword.
        if let Some(signature) = self.check_function_call() {
            self.parse_function_call(&signature);
            // A value-returning call used as a statement discards its result.
            if signature.returns_value() {
                self.emit_opcode(Opcode::Pop);
            }
            self.expect(SymbolType::NewLine);
            return;
        }

        if self.accept(SymbolType::Set) {
            self.parse_set_statement();
            return;
        }

        let scope = self.parse_scope();
        let read_only = self.accept(SymbolType::Readonly);
        if read_only && scope == Visibility::Local {
            self.set_error("The 'readonly' keyword must follow a private or public keyword");
            return;
        }

        if self.accept(SymbolType::Function) {
            self.parse_function_definition(scope);
            return;
        }
        if scope != Visibility::Local {
            self.parse_property_declaration(scope, read_only);
            return;
        }

        if self.accept(SymbolType::Begin) {
            self.expect(SymbolType::NewLine);
            self.parse_block();
            self.expect(SymbolType::End);
            self.expect(SymbolType::NewLine);
        } else if self.accept(SymbolType::If) {
            self.parse_if_else();
        } else if self.accept(SymbolType::Loop) {
            self.parse_loop();
        } else if self.accept(SymbolType::Erase) {
            self.parse_erase();
        } else if self.check(SymbolType::Increment) || self.check(SymbolType::Decrement) {
            self.parse_inc_dec();
        } else if self.accept(SymbolType::Return) {
            self.parse_return();
        } else if self.accept(SymbolType::Break) {
            self.expect(SymbolType::NewLine);
            if self.break_address.is_some() {
                self.set_error("Only one break per loop is supported");
                return;
            }
            self.emit_opcode(Opcode::Jump);
            self.break_address = Some(self.emit_address_placeholder());
        } else if self.accept(SymbolType::Wait) {
            self.parse_wait();
        } else if self.accept(SymbolType::External) {
            self.parse_external();
        } else {
            self.set_error("Unknown symbol in statement");
        }
    }

    fn parse_block(&mut self) {
        if self.error.is_some() {
            return;
        }
        self.scope_begin();
        while !(self.check(SymbolType::End)
            || self.check(SymbolType::Else)
            || self.check(SymbolType::Until)
            || self.check(SymbolType::While)
            || self.check(SymbolType::Eof))
            && self.error.is_none()
        {
            self.parse_statement();
        }
        self.scope_end();
    }

    fn parse_library_imports(&mut self) {
        while self.accept(SymbolType::Import) {
            let name = self.parse_name();
            if name.is_empty() {
                self.set_error("Expected valid name after 'import' keyword");
                return;
            }
            if !self.expect(SymbolType::NewLine) {
                return;
            }
            if self.import_list.contains(&name) {
                continue;
            }
            // A missing library is a warning, not an error: it may be
            // registered by the host or another script later.
            if !self.runtime.library_exists(&name) {
                log::warn!("import of unknown library '{name}'");
            }
            self.import_list.push(name);
        }
    }

    fn parse_library_declaration(&mut self) {
        if self.accept(SymbolType::Library) {
            let name = self.parse_name();
            if name.is_empty() {
                self.set_error("Expected valid name after 'library' keyword");
                return;
            }
            if !self.expect(SymbolType::NewLine) {
                return;
            }
            self.library = self.runtime.get_library(&name);
        }
        self.emit_opcode(Opcode::Library);
        let name = self.library.name().to_string();
        self.emit_name(&name);
    }

    fn parse_script(&mut self) {
        self.parse_library_imports();
        self.parse_library_declaration();
        while !self.check(SymbolType::Eof) && self.error.is_none() {
            self.parse_statement();
        }
        if self.break_address.is_some() {
            self.set_error("Illegal break");
        }
        self.emit_opcode(Opcode::Exit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BinaryReader;

    fn compile(source: &str) -> Vec<u8> {
        Runtime::new().compile(source, "test", &[]).unwrap()
    }

    fn compile_err(source: &str) -> CompileError {
        Runtime::new().compile(source, "test", &[]).unwrap_err()
    }

    /// Decode the instruction stream into its opcode sequence, skipping
    /// operands per the fixed layouts.
    fn opcodes(bytecode: &[u8]) -> Vec<Opcode> {
        let mut reader = BinaryReader::new(bytecode);
        BytecodeHeader::read(&mut reader).unwrap();
        let mut out = Vec::new();
        while reader.remaining() > 0 {
            let opcode = Opcode::from_byte(reader.read_u8().unwrap()).unwrap();
            out.push(opcode);
            match opcode {
                Opcode::CallFunc
                | Opcode::EraseProp
                | Opcode::ErasePropElem
                | Opcode::PushProp
                | Opcode::PushPropKeyVal
                | Opcode::SetProp
                | Opcode::SetPropKeyVal => {
                    reader.read_u64().unwrap();
                }
                Opcode::EraseVar
                | Opcode::EraseVarElem
                | Opcode::Library
                | Opcode::PushVar
                | Opcode::PushVarKey
                | Opcode::SetVar
                | Opcode::SetVarKey => {
                    reader.read_str().unwrap();
                }
                Opcode::Jump
                | Opcode::JumpFalse
                | Opcode::JumpTrue
                | Opcode::PushColl
                | Opcode::PushList
                | Opcode::PopCount => {
                    reader.read_u32().unwrap();
                }
                Opcode::PushVal => {
                    Variant::read(&mut reader).unwrap();
                }
                Opcode::Cast => {
                    reader.read_u8().unwrap();
                }
                Opcode::SetIndex => {
                    reader.read_str().unwrap();
                    reader.read_i32().unwrap();
                    reader.read_u8().unwrap();
                }
                Opcode::Function => {
                    FunctionSignature::read(&mut reader).unwrap();
                }
                Opcode::Property => {
                    PropertyName::read(&mut reader).unwrap();
                }
                _ => {}
            }
        }
        out
    }

    #[test]
    fn test_multiplication_binds_tighter_than_addition() {
        let bytecode = compile("set x to 3 + 4 * 2\n");
        let ops = opcodes(&bytecode);
        // Operands push in source order; Multiply must land before Add.
        assert_eq!(
            ops,
            vec![
                Opcode::Library,
                Opcode::PushVal,
                Opcode::PushVal,
                Opcode::PushVal,
                Opcode::Multiply,
                Opcode::Add,
                Opcode::SetVar,
                Opcode::Exit,
            ]
        );
    }

    #[test]
    fn test_equal_precedence_is_left_to_right() {
        let ops = opcodes(&compile("set x to 10 - 4 + 1\n"));
        let arith: Vec<Opcode> = ops
            .into_iter()
            .filter(|o| matches!(o, Opcode::Add | Opcode::Subtract))
            .collect();
        assert_eq!(arith, vec![Opcode::Subtract, Opcode::Add]);
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let source = "set total to 0\nloop i from 1 to 10\nset total to total + i\nend\n";
        assert_eq!(compile(source), compile(source));
    }

    #[test]
    fn test_collection_literal_emits_push_coll() {
        let ops = opcodes(&compile("set c to [[\"a\", 1], [\"b\", 2]]\n"));
        assert!(ops.contains(&Opcode::PushColl));
        // Two keys and two values pushed before the collection is built.
        let pushes = ops.iter().filter(|o| **o == Opcode::PushVal).count();
        assert_eq!(pushes, 4);
    }

    #[test]
    fn test_list_literal_emits_push_list() {
        let ops = opcodes(&compile("set c to 1, 2, 3\n"));
        assert!(ops.contains(&Opcode::PushList));
    }

    #[test]
    fn test_loop_over_shape() {
        let ops = opcodes(&compile(
            "set c to [[1, 1]]\nloop v over c\nset x to v\nend\n",
        ));
        for expected in [Opcode::PushTop, Opcode::PushItr, Opcode::LoopOver] {
            assert!(ops.contains(&expected), "missing {expected:?}");
        }
    }

    #[test]
    fn test_counter_loop_shape() {
        let ops = opcodes(&compile("loop i from 1 to 3\nend\n"));
        assert!(ops.contains(&Opcode::LoopCount));
        assert!(ops.contains(&Opcode::ScopeBegin));
        assert!(ops.contains(&Opcode::ScopeEnd));
    }

    #[test]
    fn test_wait_until_shape() {
        let runtime = Runtime::new();
        runtime
            .compile("public done to false\n", "decl", &[])
            .unwrap();
        let bytecode = runtime
            .compile("wait until done\n", "waiter", &[])
            .unwrap();
        let ops = opcodes(&bytecode);
        assert!(ops.contains(&Opcode::Wait));
        assert!(ops.contains(&Opcode::JumpTrue));
    }

    #[test]
    fn test_private_property_not_accessible_across_libraries() {
        let runtime = Runtime::new();
        runtime
            .compile("library a\nprivate p to 1\n", "a", &[])
            .unwrap();
        let err = runtime
            .compile("import a\nlibrary b\nset q to a p\n", "b", &[])
            .unwrap_err();
        assert!(err.to_string().contains("Unable to access private property"));
    }

    #[test]
    fn test_ambiguous_function_across_imports() {
        let runtime = Runtime::new();
        let function = "public function return my fn {x}\nreturn x\nend\n";
        runtime
            .compile(&format!("library l1\n{function}"), "l1", &[])
            .unwrap();
        runtime
            .compile(&format!("library l2\n{function}"), "l2", &[])
            .unwrap();
        assert!(runtime
            .compile("import l1\nimport l2\nset z to my fn 3\n", "main", &[])
            .is_err());
    }

    #[test]
    fn test_explicit_library_prefix_disambiguates() {
        let runtime = Runtime::new();
        let function = "public function return my fn {x}\nreturn x\nend\n";
        runtime
            .compile(&format!("library l1\n{function}"), "l1", &[])
            .unwrap();
        runtime
            .compile(&format!("library l2\n{function}"), "l2", &[])
            .unwrap();
        assert!(runtime
            .compile("import l1\nimport l2\nset z to l1 my fn 3\n", "main", &[])
            .is_ok());
    }

    #[test]
    fn test_readonly_property_requires_initializer() {
        let err = compile_err("public readonly limit\n");
        assert!(err.to_string().contains("initial value"));
    }

    #[test]
    fn test_readonly_property_rejects_assignment() {
        let err = compile_err("public readonly limit to 5\nset limit to 6\n");
        assert!(err.to_string().contains("readonly"));
    }

    #[test]
    fn test_duplicate_property_rejected() {
        let err = compile_err("public score to 1\npublic score to 2\n");
        assert!(err.to_string().contains("already defined"));
    }

    #[test]
    fn test_break_outside_loop_rejected() {
        let err = compile_err("break\n");
        assert!(err.to_string().contains("Illegal break"));
    }

    #[test]
    fn test_function_inside_function_rejected() {
        let err = compile_err(
            "public function outer\npublic function inner\nend\nend\n",
        );
        assert!(err.to_string().contains("define a function"));
    }

    #[test]
    fn test_missing_return_value_rejected() {
        let err = compile_err("public function return f\nset x to 1\nend\n");
        assert!(err.to_string().contains("return value"));
    }

    #[test]
    fn test_return_value_on_all_paths() {
        // Only one branch returns, so the definition is incomplete.
        let err = compile_err(
            "public function return pick {x}\nif x\nreturn 1\nend\nend\n",
        );
        assert!(err.to_string().contains("return value"));

        let runtime = Runtime::new();
        assert!(runtime
            .compile(
                "public function return pick {x}\nif x\nreturn 1\nelse\nreturn 2\nend\nend\n",
                "ok",
                &[]
            )
            .is_ok());
    }

    #[test]
    fn test_external_must_be_root() {
        let err = compile_err("begin\nexternal config\nend\n");
        assert!(err.to_string().contains("root scope"));
    }

    #[test]
    fn test_multi_word_variable_assignment() {
        let ops = opcodes(&compile(
            "set high score to 10\nset high score to high score + 1\n",
        ));
        let set_vars = ops.iter().filter(|o| **o == Opcode::SetVar).count();
        assert_eq!(set_vars, 2);
        assert!(ops.contains(&Opcode::PushVar));
    }

    #[test]
    fn test_statement_call_discards_return_value() {
        let runtime = Runtime::new();
        let bytecode = runtime
            .compile(
                "public function return answer\nreturn 42\nend\nanswer\n",
                "main",
                &[],
            )
            .unwrap();
        let ops = opcodes(&bytecode);
        assert!(ops.contains(&Opcode::CallFunc));
        assert!(ops.contains(&Opcode::Pop));
    }

    #[test]
    fn test_erase_forms() {
        let ops = opcodes(&compile(
            "set c to [[1, 2]]\nerase c [1]\nerase c\n",
        ));
        assert!(ops.contains(&Opcode::EraseVarElem));
        assert!(ops.contains(&Opcode::EraseVar));
    }

    #[test]
    fn test_increment_decrement() {
        let ops = opcodes(&compile(
            "set n to 0\nincrement n\ndecrement n by 2\n",
        ));
        assert!(ops.contains(&Opcode::Increment));
        assert!(ops.contains(&Opcode::Decrement));
    }
}
