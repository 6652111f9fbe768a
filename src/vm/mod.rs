//! Virtual machine
//!
//! Stack-based execution of compiled bytecode with cooperative suspension.

pub mod opcode;
pub mod script;

pub use opcode::Opcode;
pub use script::{Script, ScriptStatus};
