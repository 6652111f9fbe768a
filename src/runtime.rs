//! The Jinx runtime
//!
//! Thread-safe facade over everything scripts share: the library registry,
//! the property store, the function-definition table, and performance
//! counters. Each registry sits behind its own lock, held only for the
//! duration of a single map operation, so no lock is ever held across a
//! script instruction boundary and scripts cannot deadlock one another.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::{CompileError, JinxError, ScriptError};
use crate::library::{FunctionSignature, Library, NativeFunction, PropertyName, RuntimeId};
use crate::parser::lexer::{fmt_symbols, Lexer};
use crate::parser::parser::Parser;
use crate::variant::{ValueType, Variant};
use crate::vm::opcode::fmt_bytecode;
use crate::vm::script::{Script, ScriptStatus};

/// Host tuning knobs for a runtime.
#[derive(Debug, Clone)]
pub struct RuntimeParams {
    /// Log the symbol dump after each successful lex.
    pub log_symbols: bool,
    /// Log the bytecode disassembly after each successful compile.
    pub log_bytecode: bool,
    /// Instruction budget per `Script::execute` call before the script
    /// voluntarily returns with status `Running`.
    pub max_instructions: u32,
}

impl Default for RuntimeParams {
    fn default() -> Self {
        RuntimeParams {
            log_symbols: false,
            log_bytecode: false,
            max_instructions: 4096,
        }
    }
}

/// Accumulated compile and execution counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerformanceStats {
    pub script_compilation_count: u64,
    pub compilation_time_ns: u64,
    pub script_execution_count: u64,
    pub execution_time_ns: u64,
    pub instruction_count: u64,
}

/// How a registered function executes.
pub enum FunctionBody {
    /// Entry offset into a compiled bytecode buffer.
    Bytecode {
        bytecode: Arc<Vec<u8>>,
        offset: usize,
    },
    /// Host callback.
    Native(NativeFunction),
}

/// A callable function: its signature plus where its behavior lives.
pub struct FunctionDefinition {
    signature: FunctionSignature,
    body: FunctionBody,
}

impl FunctionDefinition {
    pub fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    pub fn body(&self) -> &FunctionBody {
        &self.body
    }
}

/// Shared owner of libraries, properties, and functions.
///
/// Create one with [`Runtime::new`], compile scripts against it, and advance
/// the resulting [`Script`]s from any thread.
pub struct Runtime {
    params: RuntimeParams,
    self_weak: Weak<Runtime>,
    libraries: Mutex<HashMap<String, Arc<Library>>>,
    properties: Mutex<HashMap<RuntimeId, Variant>>,
    property_names: Mutex<HashMap<RuntimeId, PropertyName>>,
    functions: Mutex<HashMap<RuntimeId, Arc<FunctionDefinition>>>,
    perf: Mutex<PerformanceStats>,
}

impl Runtime {
    pub fn new() -> Arc<Runtime> {
        Runtime::with_params(RuntimeParams::default())
    }

    pub fn with_params(params: RuntimeParams) -> Arc<Runtime> {
        Arc::new_cyclic(|self_weak| Runtime {
            params,
            self_weak: self_weak.clone(),
            libraries: Mutex::new(HashMap::new()),
            properties: Mutex::new(HashMap::new()),
            property_names: Mutex::new(HashMap::new()),
            functions: Mutex::new(HashMap::new()),
            perf: Mutex::new(PerformanceStats::default()),
        })
    }

    pub fn params(&self) -> &RuntimeParams {
        &self.params
    }

    fn self_arc(&self) -> Arc<Runtime> {
        self.self_weak
            .upgrade()
            .expect("runtime is always held in an Arc")
    }

    // =========================================================================
    // Compilation
    // =========================================================================

    /// Compile source text to a bytecode buffer.
    ///
    /// `unique_name` identifies the script (it keys local function ids);
    /// `imports` pre-populates the import list as if the script began with
    /// matching `import` lines.
    pub fn compile(
        &self,
        source: &str,
        unique_name: &str,
        imports: &[&str],
    ) -> Result<Vec<u8>, CompileError> {
        if source.trim().is_empty() {
            return Err(CompileError::EmptySource);
        }
        let started = Instant::now();

        let symbols = Lexer::new(source).execute()?;
        if self.params.log_symbols {
            log::debug!("{}", fmt_symbols(&symbols));
        }

        let parser = Parser::new(self.self_arc(), symbols, unique_name, imports);
        let bytecode = parser.execute()?;
        if self.params.log_bytecode {
            log::debug!("{}", fmt_bytecode(&bytecode));
        }

        let mut perf = self.perf.lock();
        perf.script_compilation_count += 1;
        perf.compilation_time_ns += started.elapsed().as_nanos() as u64;
        Ok(bytecode)
    }

    /// Bind a compiled bytecode buffer to this runtime as a new script.
    pub fn create_script(&self, bytecode: &[u8]) -> Result<Script, JinxError> {
        Script::new(self.self_arc(), bytecode.to_vec()).map_err(JinxError::from)
    }

    /// Compile and run a script until it first finishes, waits, or errors.
    pub fn execute_script(
        &self,
        source: &str,
        unique_name: &str,
        imports: &[&str],
    ) -> Result<Script, JinxError> {
        let bytecode = self.compile(source, unique_name, imports)?;
        let mut script = self.create_script(&bytecode)?;
        while script.execute()? == ScriptStatus::Running {}
        Ok(script)
    }

    // =========================================================================
    // Libraries
    // =========================================================================

    /// Fetch a library by name, creating it on first use.
    pub fn get_library(&self, name: &str) -> Arc<Library> {
        let mut libraries = self.libraries.lock();
        if let Some(library) = libraries.get(name) {
            return Arc::clone(library);
        }
        let library = Library::new(name, self.self_weak.clone());
        libraries.insert(name.to_string(), Arc::clone(&library));
        library
    }

    pub fn library_exists(&self, name: &str) -> bool {
        self.libraries.lock().contains_key(name)
    }

    // =========================================================================
    // Properties
    // =========================================================================

    /// Current value of a property, or null if it was never set.
    pub fn get_property(&self, id: RuntimeId) -> Variant {
        self.properties
            .lock()
            .get(&id)
            .cloned()
            .unwrap_or(Variant::Null)
    }

    pub fn set_property(&self, id: RuntimeId, value: Variant) {
        self.properties.lock().insert(id, value);
    }

    pub fn property_exists(&self, id: RuntimeId) -> bool {
        self.properties.lock().contains_key(&id)
    }

    /// Look up a key inside a collection-valued property. Missing property
    /// or key yields null; a non-collection property is an error.
    pub fn get_property_key_value(
        &self,
        id: RuntimeId,
        key: &Variant,
    ) -> Result<Variant, ScriptError> {
        let properties = self.properties.lock();
        match properties.get(&id) {
            None | Some(Variant::Null) => Ok(Variant::Null),
            Some(Variant::Collection(collection)) => {
                Ok(collection.get(key).cloned().unwrap_or(Variant::Null))
            }
            Some(other) => Err(ScriptError::NotACollection(other.value_type())),
        }
    }

    /// Set a key inside a collection-valued property.
    pub fn set_property_key_value(
        &self,
        id: RuntimeId,
        key: Variant,
        value: Variant,
    ) -> Result<(), ScriptError> {
        let mut properties = self.properties.lock();
        match properties.get_mut(&id) {
            Some(Variant::Collection(collection)) => {
                collection.insert(key, value);
                Ok(())
            }
            Some(other) => Err(ScriptError::NotACollection(other.value_type())),
            None => Err(ScriptError::NotACollection(ValueType::Null)),
        }
    }

    pub fn erase_property(&self, id: RuntimeId) {
        self.properties.lock().remove(&id);
    }

    /// Remove one key from a collection-valued property.
    pub fn erase_property_element(
        &self,
        id: RuntimeId,
        key: &Variant,
    ) -> Result<(), ScriptError> {
        let mut properties = self.properties.lock();
        match properties.get_mut(&id) {
            Some(Variant::Collection(collection)) => {
                collection.remove(key);
                Ok(())
            }
            Some(other) => Err(ScriptError::NotACollection(other.value_type())),
            None => Ok(()),
        }
    }

    /// Registered metadata for a property id (visibility, read-only flag).
    pub fn property_name(&self, id: RuntimeId) -> Option<PropertyName> {
        self.property_names.lock().get(&id).cloned()
    }

    pub(crate) fn register_property_name(&self, property: PropertyName) {
        self.property_names
            .lock()
            .entry(property.id())
            .or_insert(property);
    }

    // =========================================================================
    // Functions
    // =========================================================================

    pub fn find_function(&self, id: RuntimeId) -> Option<Arc<FunctionDefinition>> {
        self.functions.lock().get(&id).cloned()
    }

    /// Register a bytecoded function at an entry offset in `bytecode`.
    pub(crate) fn register_function(
        &self,
        signature: FunctionSignature,
        bytecode: Arc<Vec<u8>>,
        offset: usize,
    ) {
        let id = signature.id();
        let definition = Arc::new(FunctionDefinition {
            signature,
            body: FunctionBody::Bytecode { bytecode, offset },
        });
        self.functions.lock().insert(id, definition);
    }

    /// Register a host callback under a signature.
    pub(crate) fn register_native_function(
        &self,
        signature: FunctionSignature,
        callback: NativeFunction,
    ) {
        let id = signature.id();
        let definition = Arc::new(FunctionDefinition {
            signature,
            body: FunctionBody::Native(callback),
        });
        self.functions.lock().insert(id, definition);
    }

    // =========================================================================
    // Performance counters
    // =========================================================================

    pub(crate) fn record_execution(&self, time_ns: u64, instruction_count: u64) {
        let mut perf = self.perf.lock();
        perf.script_execution_count += 1;
        perf.execution_time_ns += time_ns;
        perf.instruction_count += instruction_count;
    }

    /// Snapshot the counters, optionally resetting them.
    pub fn performance_stats(&self, reset: bool) -> PerformanceStats {
        let mut perf = self.perf.lock();
        let stats = *perf;
        if reset {
            *perf = PerformanceStats::default();
        }
        stats
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // Clear collection-valued properties on shutdown. Collections have
        // value semantics here so reference cycles cannot actually form, but
        // an explicit teardown keeps large shared state from outliving the
        // runtime inside lingering clones.
        let mut properties = self.properties.lock();
        for value in properties.values_mut() {
            if let Variant::Collection(collection) = value {
                collection.clear();
            }
        }
        properties.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_library_creates_once() {
        let runtime = Runtime::new();
        let a = runtime.get_library("core");
        let b = runtime.get_library("core");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(runtime.library_exists("core"));
        assert!(!runtime.library_exists("missing"));
    }

    #[test]
    fn test_property_store() {
        let runtime = Runtime::new();
        assert_eq!(runtime.get_property(42), Variant::Null);
        runtime.set_property(42, Variant::Integer(7));
        assert_eq!(runtime.get_property(42), Variant::Integer(7));
        runtime.erase_property(42);
        assert!(!runtime.property_exists(42));
    }

    #[test]
    fn test_property_key_value_requires_collection() {
        let runtime = Runtime::new();
        runtime.set_property(1, Variant::Integer(3));
        assert!(runtime
            .set_property_key_value(1, Variant::Integer(1), Variant::Null)
            .is_err());
        assert!(runtime
            .get_property_key_value(1, &Variant::Integer(1))
            .is_err());
    }

    #[test]
    fn test_empty_source_is_host_error() {
        let runtime = Runtime::new();
        let err = runtime.compile("   \n  ", "empty", &[]).unwrap_err();
        assert_eq!(err, CompileError::EmptySource);
    }

    #[test]
    fn test_performance_stats_accumulate_and_reset() {
        let runtime = Runtime::new();
        runtime.compile("set x to 1\n", "perf", &[]).unwrap();
        let stats = runtime.performance_stats(true);
        assert_eq!(stats.script_compilation_count, 1);
        let stats = runtime.performance_stats(false);
        assert_eq!(stats.script_compilation_count, 0);
    }
}
