//! Libraries, properties, and function signatures
//!
//! A library is a named namespace shared by every script compiled against the
//! same runtime. It records which property names exist (so the parser can
//! resolve greedy multi-word identifiers), which function signatures exist
//! (so call sites can be matched), and the visibility rules for both.
//!
//! Identity is a 64-bit `RuntimeId`, a stable FNV-1a hash derived from the
//! owning library name plus the property name or signature shape. The same
//! source always produces the same id, which is what makes bytecode buffers
//! portable between runtimes.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::buffer::{BinaryReader, BinaryWriter};
use crate::error::ScriptError;
use crate::runtime::Runtime;
use crate::variant::{ValueType, Variant};

/// Stable 64-bit identifier for properties and functions.
pub type RuntimeId = u64;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Incremental FNV-1a hasher used to derive [`RuntimeId`]s.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IdHasher(u64);

impl IdHasher {
    pub fn new() -> Self {
        IdHasher(FNV_OFFSET)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= u64::from(b);
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    pub fn write_u8(&mut self, byte: u8) {
        self.write(&[byte]);
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

/// Who can see a property or function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Visibility {
    /// Visible only inside the defining script.
    #[default]
    Local = 0,
    /// Visible to all scripts of the defining library.
    Private,
    /// Visible to any script importing the library.
    Public,
}

impl Visibility {
    pub fn from_byte(byte: u8) -> Option<Visibility> {
        match byte {
            0 => Some(Visibility::Local),
            1 => Some(Visibility::Private),
            2 => Some(Visibility::Public),
            _ => None,
        }
    }
}

/// A registered property: a named, persistent value owned by a library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyName {
    visibility: Visibility,
    read_only: bool,
    library_name: String,
    name: String,
    id: RuntimeId,
}

impl PropertyName {
    pub fn new(
        visibility: Visibility,
        read_only: bool,
        library_name: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let library_name = library_name.into();
        let name = name.into();
        let mut hasher = IdHasher::new();
        hasher.write(library_name.as_bytes());
        hasher.write_u8(b' ');
        hasher.write(name.as_bytes());
        let id = hasher.finish();
        PropertyName {
            visibility,
            read_only,
            library_name,
            name,
            id,
        }
    }

    pub fn id(&self) -> RuntimeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn library_name(&self) -> &str {
        &self.library_name
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Word count of the property name (names may contain spaces).
    pub fn part_count(&self) -> usize {
        self.name.split(' ').count()
    }

    pub fn write(&self, writer: &mut BinaryWriter<'_>) {
        writer.write_u8(self.visibility as u8);
        writer.write_u8(u8::from(self.read_only));
        writer.write_str(&self.library_name);
        writer.write_str(&self.name);
    }

    pub fn read(reader: &mut BinaryReader<'_>) -> Result<PropertyName, ScriptError> {
        let visibility =
            Visibility::from_byte(reader.read_u8()?).ok_or(ScriptError::InvalidBytecode)?;
        let read_only = reader.read_u8()? != 0;
        let library_name = reader.read_str()?;
        let name = reader.read_str()?;
        Ok(PropertyName::new(visibility, read_only, library_name, name))
    }
}

/// Whether a signature part is a fixed name or a parameter slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SignaturePartType {
    Name = 0,
    Parameter,
}

/// One segment of a function signature.
///
/// Name parts carry one or more interchangeable alias spellings and may be
/// optional. Parameter parts carry the local name the argument binds to and
/// an optional declared type (`ValueType::Null` means untyped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignaturePart {
    pub part_type: SignaturePartType,
    pub optional: bool,
    pub names: Vec<String>,
    pub value_type: ValueType,
}

impl SignaturePart {
    pub fn name(name: impl Into<String>) -> Self {
        SignaturePart {
            part_type: SignaturePartType::Name,
            optional: false,
            names: vec![name.into()],
            value_type: ValueType::Null,
        }
    }

    pub fn parameter(name: impl Into<String>, value_type: ValueType) -> Self {
        SignaturePart {
            part_type: SignaturePartType::Parameter,
            optional: false,
            names: vec![name.into()],
            value_type,
        }
    }
}

/// The ordered part list identifying a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    visibility: Visibility,
    returns_value: bool,
    library_name: String,
    parts: Vec<SignaturePart>,
    id: RuntimeId,
}

impl FunctionSignature {
    pub fn new(
        visibility: Visibility,
        returns_value: bool,
        library_name: impl Into<String>,
        parts: Vec<SignaturePart>,
    ) -> Self {
        let library_name = library_name.into();
        let id = Self::derive_id(&library_name, &parts);
        FunctionSignature {
            visibility,
            returns_value,
            library_name,
            parts,
            id,
        }
    }

    /// Hash the part shape: name parts contribute their sorted alias set and
    /// optional flag, parameter parts contribute a bare wildcard. Two
    /// signatures with the same shape in the same library collide.
    fn derive_id(library_name: &str, parts: &[SignaturePart]) -> RuntimeId {
        let mut hasher = IdHasher::new();
        hasher.write(library_name.as_bytes());
        for part in parts {
            match part.part_type {
                SignaturePartType::Name => {
                    hasher.write_u8(if part.optional { 2 } else { 1 });
                    let mut aliases: Vec<&str> = part.names.iter().map(String::as_str).collect();
                    aliases.sort_unstable();
                    for alias in aliases {
                        hasher.write(alias.as_bytes());
                        hasher.write_u8(0);
                    }
                }
                SignaturePartType::Parameter => hasher.write_u8(0xFF),
            }
        }
        hasher.finish()
    }

    pub fn id(&self) -> RuntimeId {
        self.id
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn returns_value(&self) -> bool {
        self.returns_value
    }

    pub fn library_name(&self) -> &str {
        &self.library_name
    }

    pub fn parts(&self) -> &[SignaturePart] {
        &self.parts
    }

    /// Just the parameter parts, in call order.
    pub fn parameters(&self) -> impl Iterator<Item = &SignaturePart> {
        self.parts
            .iter()
            .filter(|p| p.part_type == SignaturePartType::Parameter)
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters().count()
    }

    /// Match this signature against a call-site part list. Optional name
    /// parts may be skipped; everything else must line up in order.
    pub fn matches(&self, call_parts: &[SignaturePart]) -> bool {
        fn step(sig: &[SignaturePart], call: &[SignaturePart]) -> bool {
            let Some(sp) = sig.first() else {
                return call.is_empty();
            };
            match sp.part_type {
                SignaturePartType::Name => {
                    if sp.optional && step(&sig[1..], call) {
                        return true;
                    }
                    match call.first() {
                        Some(cp)
                            if cp.part_type == SignaturePartType::Name
                                && cp.names.iter().any(|n| sp.names.contains(n)) =>
                        {
                            step(&sig[1..], &call[1..])
                        }
                        _ => false,
                    }
                }
                SignaturePartType::Parameter => match call.first() {
                    Some(cp) if cp.part_type == SignaturePartType::Parameter => {
                        step(&sig[1..], &call[1..])
                    }
                    _ => false,
                },
            }
        }
        !call_parts.is_empty() && step(&self.parts, call_parts)
    }

    pub fn write(&self, writer: &mut BinaryWriter<'_>) {
        writer.write_u8(self.visibility as u8);
        writer.write_u8(u8::from(self.returns_value));
        writer.write_str(&self.library_name);
        writer.write_u32(self.parts.len() as u32);
        for part in &self.parts {
            writer.write_u8(part.part_type as u8);
            writer.write_u8(u8::from(part.optional));
            writer.write_u8(part.value_type as u8);
            writer.write_u32(part.names.len() as u32);
            for name in &part.names {
                writer.write_str(name);
            }
        }
    }

    pub fn read(reader: &mut BinaryReader<'_>) -> Result<FunctionSignature, ScriptError> {
        let visibility =
            Visibility::from_byte(reader.read_u8()?).ok_or(ScriptError::InvalidBytecode)?;
        let returns_value = reader.read_u8()? != 0;
        let library_name = reader.read_str()?;
        let part_count = reader.read_u32()?;
        let mut parts = Vec::with_capacity(part_count as usize);
        for _ in 0..part_count {
            let part_type = match reader.read_u8()? {
                0 => SignaturePartType::Name,
                1 => SignaturePartType::Parameter,
                _ => return Err(ScriptError::InvalidBytecode),
            };
            let optional = reader.read_u8()? != 0;
            let value_type =
                ValueType::from_byte(reader.read_u8()?).ok_or(ScriptError::InvalidBytecode)?;
            let name_count = reader.read_u32()?;
            let mut names = Vec::with_capacity(name_count as usize);
            for _ in 0..name_count {
                names.push(reader.read_str()?);
            }
            parts.push(SignaturePart {
                part_type,
                optional,
                names,
                value_type,
            });
        }
        Ok(FunctionSignature::new(
            visibility,
            returns_value,
            library_name,
            parts,
        ))
    }
}

/// A set of function signatures, searchable by call-site shape.
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    signatures: Vec<FunctionSignature>,
}

impl FunctionTable {
    pub fn new() -> Self {
        FunctionTable::default()
    }

    /// Register a signature, rejecting id collisions.
    pub fn register(&mut self, signature: FunctionSignature) -> bool {
        if self.signatures.iter().any(|s| s.id() == signature.id()) {
            return false;
        }
        self.signatures.push(signature);
        true
    }

    /// Find the signature matching a call-site part list, if any.
    pub fn find(&self, call_parts: &[SignaturePart]) -> Option<&FunctionSignature> {
        self.signatures.iter().find(|s| s.matches(call_parts))
    }
}

/// A named namespace of properties and functions, shared across scripts.
pub struct Library {
    name: String,
    runtime: Weak<Runtime>,
    inner: RwLock<LibraryInner>,
}

#[derive(Default)]
struct LibraryInner {
    properties: HashMap<String, PropertyName>,
    max_property_parts: usize,
    functions: FunctionTable,
}

impl Library {
    pub(crate) fn new(name: impl Into<String>, runtime: Weak<Runtime>) -> Arc<Library> {
        Arc::new(Library {
            name: name.into(),
            runtime,
            inner: RwLock::new(LibraryInner::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a property with this exact (possibly multi-word) name exists.
    pub fn property_name_exists(&self, name: &str) -> bool {
        self.inner.read().properties.contains_key(name)
    }

    pub fn get_property_name(&self, name: &str) -> Option<PropertyName> {
        self.inner.read().properties.get(name).cloned()
    }

    /// Largest word count among registered property names, bounding the
    /// parser's greedy multi-word match.
    pub fn max_property_parts(&self) -> usize {
        self.inner.read().max_property_parts
    }

    /// Register a property name. Returns false on duplicates.
    pub(crate) fn register_property_name(&self, property: PropertyName) -> bool {
        let mut inner = self.inner.write();
        if inner.properties.contains_key(property.name()) {
            return false;
        }
        inner.max_property_parts = inner.max_property_parts.max(property.part_count());
        inner.properties.insert(property.name().to_string(), property);
        true
    }

    pub(crate) fn register_signature(&self, signature: FunctionSignature) -> bool {
        self.inner.write().functions.register(signature)
    }

    pub(crate) fn find_function(&self, call_parts: &[SignaturePart]) -> Option<FunctionSignature> {
        self.inner.read().functions.find(call_parts).cloned()
    }

    /// Register a property from the host and give it an initial value.
    pub fn register_property(
        &self,
        visibility: Visibility,
        read_only: bool,
        name: &str,
        value: Variant,
    ) -> Option<RuntimeId> {
        let property = PropertyName::new(visibility, read_only, self.name.clone(), name);
        let id = property.id();
        if !self.register_property_name(property) {
            return None;
        }
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.set_property(id, value);
        }
        Some(id)
    }

    /// Register a native function from the host.
    ///
    /// Each part string is either a parameter (`"{count}"`, or `"{integer
    /// count}"` with a declared type) or a name part where `/` separates
    /// aliases and a trailing `?` marks the part optional, e.g.
    /// `["roll", "dice?", "{integer sides}"]`.
    pub fn register_function(
        &self,
        visibility: Visibility,
        parts: &[&str],
        returns_value: bool,
        callback: NativeFunction,
    ) -> Result<RuntimeId, ScriptError> {
        let parts = parse_signature_parts(parts)
            .ok_or_else(|| ScriptError::NativeFunction("invalid signature part list".into()))?;
        let signature =
            FunctionSignature::new(visibility, returns_value, self.name.clone(), parts);
        let id = signature.id();
        if !self.register_signature(signature.clone()) {
            return Err(ScriptError::NativeFunction(
                "function signature already registered".into(),
            ));
        }
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.register_native_function(signature, callback);
        }
        Ok(id)
    }
}

/// Host callback bound to a function signature.
pub type NativeFunction = Arc<dyn Fn(&[Variant]) -> Result<Variant, ScriptError> + Send + Sync>;

fn parse_signature_parts(parts: &[&str]) -> Option<Vec<SignaturePart>> {
    if parts.is_empty() {
        return None;
    }
    let mut out = Vec::with_capacity(parts.len());
    for &raw in parts {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Some(body) = raw.strip_prefix('{') {
            let body = body.strip_suffix('}').map(str::trim)?;
            let (value_type, name) = match body.split_once(' ') {
                Some((type_name, rest)) => {
                    let value_type = match type_name {
                        "integer" => ValueType::Integer,
                        "number" => ValueType::Number,
                        "string" => ValueType::String,
                        "boolean" => ValueType::Boolean,
                        "collection" => ValueType::Collection,
                        "guid" => ValueType::Guid,
                        _ => return None,
                    };
                    (value_type, rest.trim())
                }
                None => (ValueType::Null, body),
            };
            if name.is_empty() {
                return None;
            }
            out.push(SignaturePart::parameter(name, value_type));
        } else {
            let (names_str, optional) = match raw.strip_suffix('?') {
                Some(stripped) => (stripped, true),
                None => (raw, false),
            };
            let names: Vec<String> = names_str.split('/').map(str::to_string).collect();
            if names.iter().any(String::is_empty) {
                return None;
            }
            out.push(SignaturePart {
                part_type: SignaturePartType::Name,
                optional,
                names,
                value_type: ValueType::Null,
            });
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;

    fn sig(parts: Vec<SignaturePart>) -> FunctionSignature {
        FunctionSignature::new(Visibility::Public, true, "testlib", parts)
    }

    #[test]
    fn test_property_id_stable() {
        let a = PropertyName::new(Visibility::Public, false, "lib", "high score");
        let b = PropertyName::new(Visibility::Private, true, "lib", "high score");
        let c = PropertyName::new(Visibility::Public, false, "other", "high score");
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_eq!(a.part_count(), 2);
    }

    #[test]
    fn test_signature_id_alias_order_insensitive() {
        let a = sig(vec![
            SignaturePart {
                part_type: SignaturePartType::Name,
                optional: false,
                names: vec!["put".into(), "write".into()],
                value_type: ValueType::Null,
            },
            SignaturePart::parameter("x", ValueType::Null),
        ]);
        let b = sig(vec![
            SignaturePart {
                part_type: SignaturePartType::Name,
                optional: false,
                names: vec!["write".into(), "put".into()],
                value_type: ValueType::Null,
            },
            SignaturePart::parameter("y", ValueType::Integer),
        ]);
        // Same shape and alias set, so the same function.
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn test_signature_matching_with_optional() {
        let signature = sig(vec![
            SignaturePart::name("roll"),
            SignaturePart {
                part_type: SignaturePartType::Name,
                optional: true,
                names: vec!["the".into()],
                value_type: ValueType::Null,
            },
            SignaturePart::name("dice"),
        ]);

        let with = vec![
            SignaturePart::name("roll"),
            SignaturePart::name("the"),
            SignaturePart::name("dice"),
        ];
        let without = vec![SignaturePart::name("roll"), SignaturePart::name("dice")];
        let wrong = vec![SignaturePart::name("roll"), SignaturePart::name("bones")];

        assert!(signature.matches(&with));
        assert!(signature.matches(&without));
        assert!(!signature.matches(&wrong));
    }

    #[test]
    fn test_signature_matching_parameters() {
        let signature = sig(vec![
            SignaturePart::name("add"),
            SignaturePart::parameter("a", ValueType::Null),
            SignaturePart::name("and"),
            SignaturePart::parameter("b", ValueType::Null),
        ]);

        let call = vec![
            SignaturePart::name("add"),
            SignaturePart::parameter("", ValueType::Null),
            SignaturePart::name("and"),
            SignaturePart::parameter("", ValueType::Null),
        ];
        assert!(signature.matches(&call));

        let short = vec![
            SignaturePart::name("add"),
            SignaturePart::parameter("", ValueType::Null),
        ];
        assert!(!signature.matches(&short));
    }

    #[test]
    fn test_function_table_rejects_collisions() {
        let mut table = FunctionTable::new();
        let first = sig(vec![SignaturePart::name("go")]);
        let duplicate = sig(vec![SignaturePart::name("go")]);
        assert!(table.register(first));
        assert!(!table.register(duplicate));
    }

    #[test]
    fn test_signature_serialization_roundtrip() {
        let signature = sig(vec![
            SignaturePart::name("spawn"),
            SignaturePart::parameter("count", ValueType::Integer),
            SignaturePart {
                part_type: SignaturePartType::Name,
                optional: true,
                names: vec!["now".into(), "immediately".into()],
                value_type: ValueType::Null,
            },
        ]);

        let mut buffer = Buffer::new();
        let mut writer = BinaryWriter::new(&mut buffer);
        signature.write(&mut writer);
        let bytes = buffer.into_bytes();
        let mut reader = BinaryReader::new(&bytes);
        let read_back = FunctionSignature::read(&mut reader).unwrap();
        assert_eq!(read_back, signature);
        assert_eq!(read_back.id(), signature.id());
    }

    #[test]
    fn test_parse_signature_parts() {
        let parts = parse_signature_parts(&["roll", "the?", "{integer sides}"]).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].part_type, SignaturePartType::Name);
        assert!(parts[1].optional);
        assert_eq!(parts[2].part_type, SignaturePartType::Parameter);
        assert_eq!(parts[2].value_type, ValueType::Integer);

        assert!(parse_signature_parts(&[]).is_none());
        assert!(parse_signature_parts(&["{broken"]).is_none());
    }
}
