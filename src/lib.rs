//! Jinx - an embeddable scripting language
//!
//! Jinx compiles human-readable scripts into compact bytecode and executes
//! them on a small stack-based virtual machine. Scripts are cooperative
//! citizens of a host application: many can be compiled and run
//! concurrently, each advancing in small quanta under host control, sharing
//! named libraries and persistent properties through a common [`Runtime`].
//!
//! # Example
//! ```
//! use jinx::Runtime;
//!
//! let runtime = Runtime::new();
//! let script = runtime
//!     .execute_script("set x to 3 + 4 * 2\n", "example", &[])
//!     .unwrap();
//! assert_eq!(script.get_variable("x"), jinx::Variant::Integer(11));
//! ```

// Core value types
pub mod collection;
pub mod variant;

// Bytecode buffer and binary IO
pub mod buffer;

// Errors
pub mod error;

// Libraries, properties, and function signatures
pub mod library;

// Lexer and parser
pub mod parser;

// Virtual machine
pub mod vm;

// Runtime facade
pub mod runtime;

// Re-export main types
pub use collection::Collection;
pub use error::{CompileError, JinxError, ScriptError};
pub use library::{
    FunctionSignature, Library, NativeFunction, PropertyName, RuntimeId, SignaturePart,
    SignaturePartType, Visibility,
};
pub use runtime::{PerformanceStats, Runtime, RuntimeParams};
pub use variant::{Guid, ValueType, Variant};
pub use vm::{Script, ScriptStatus};
