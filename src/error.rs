//! Error types for compilation and script execution

use thiserror::Error;

use crate::variant::ValueType;

/// Error produced while turning source text into bytecode.
///
/// Lex and parse errors carry the line and column of the symbol the pass was
/// looking at when it failed. The passes run best-effort after the first
/// error so that diagnostics for later lines still reach the log, but only
/// the first error is reported and no bytecode is returned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("lex error at line {line}, column {column}: {message}")]
    Lex {
        message: String,
        line: u32,
        column: u32,
    },

    #[error("parse error at line {line}, column {column}: {message}")]
    Parse {
        message: String,
        line: u32,
        column: u32,
    },

    #[error("empty script source")]
    EmptySource,
}

/// Error raised while a script executes.
///
/// A script that hits one of these halts with status `Error`; other scripts
/// sharing the runtime are unaffected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("value stack underflow")]
    StackUnderflow,

    #[error("cannot {operation} {left} and {right}")]
    TypeMismatch {
        operation: &'static str,
        left: ValueType,
        right: ValueType,
    },

    #[error("division by zero")]
    DivideByZero,

    #[error("cannot cast {from} to {to}")]
    CastFailure { from: ValueType, to: ValueType },

    #[error("call to unknown function id {0:#018x}")]
    UnknownFunction(u64),

    #[error("keyed access on non-collection value of type {0}")]
    NotACollection(ValueType),

    #[error("collections cannot be used as keys")]
    CollectionKey,

    #[error("cannot modify read-only property '{0}'")]
    ReadOnlyProperty(String),

    #[error("malformed or truncated bytecode")]
    InvalidBytecode,

    #[error("native function failed: {0}")]
    NativeFunction(String),
}

/// Umbrella error for host entry points that both compile and execute.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JinxError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Script(#[from] ScriptError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CompileError::Parse {
            message: "Expected operand".into(),
            line: 3,
            column: 9,
        };
        assert_eq!(
            err.to_string(),
            "parse error at line 3, column 9: Expected operand"
        );

        let err = ScriptError::TypeMismatch {
            operation: "add",
            left: ValueType::String,
            right: ValueType::Integer,
        };
        assert_eq!(err.to_string(), "cannot add string and integer");
    }
}
