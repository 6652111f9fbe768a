//! Bytecode opcode definitions
//!
//! The bytecode is a tight stream of 1-byte opcodes followed by fixed
//! per-opcode operand layouts (see the operand accessors on the reader side
//! in `script.rs`). Byte values are fixed by the enum listing order, so the
//! enum must only ever grow at the end.

use crate::buffer::{BinaryReader, BytecodeHeader};
use crate::error::ScriptError;
use crate::library::{FunctionSignature, PropertyName};
use crate::variant::{ValueType, Variant};

/// Jinx bytecode operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Add = 0,
    And,
    CallFunc,
    Cast,
    Decrement,
    Divide,
    Equals,
    EraseProp,
    ErasePropElem,
    EraseVar,
    EraseVarElem,
    Exit,
    Function,
    Greater,
    GreaterEq,
    Increment,
    Jump,
    JumpFalse,
    JumpTrue,
    Less,
    LessEq,
    Library,
    LoopCount,
    LoopOver,
    Mod,
    Multiply,
    Not,
    NotEquals,
    Or,
    Pop,
    PopCount,
    Property,
    PushColl,
    PushItr,
    PushList,
    PushProp,
    PushPropKeyVal,
    PushTop,
    PushVal,
    PushVar,
    PushVarKey,
    Return,
    ReturnValue,
    ScopeBegin,
    ScopeEnd,
    SetIndex,
    SetProp,
    SetPropKeyVal,
    SetVar,
    SetVarKey,
    Subtract,
    Type,
    Wait,
}

impl Opcode {
    /// Total number of opcodes.
    pub const COUNT: u8 = Opcode::Wait as u8 + 1;

    pub fn from_byte(byte: u8) -> Option<Opcode> {
        if byte < Opcode::COUNT {
            // Contiguous discriminants starting at zero.
            Some(unsafe { std::mem::transmute::<u8, Opcode>(byte) })
        } else {
            None
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Add => "Add",
            Opcode::And => "And",
            Opcode::CallFunc => "CallFunc",
            Opcode::Cast => "Cast",
            Opcode::Decrement => "Decrement",
            Opcode::Divide => "Divide",
            Opcode::Equals => "Equals",
            Opcode::EraseProp => "EraseProp",
            Opcode::ErasePropElem => "ErasePropElem",
            Opcode::EraseVar => "EraseVar",
            Opcode::EraseVarElem => "EraseVarElem",
            Opcode::Exit => "Exit",
            Opcode::Function => "Function",
            Opcode::Greater => "Greater",
            Opcode::GreaterEq => "GreaterEq",
            Opcode::Increment => "Increment",
            Opcode::Jump => "Jump",
            Opcode::JumpFalse => "JumpFalse",
            Opcode::JumpTrue => "JumpTrue",
            Opcode::Less => "Less",
            Opcode::LessEq => "LessEq",
            Opcode::Library => "Library",
            Opcode::LoopCount => "LoopCount",
            Opcode::LoopOver => "LoopOver",
            Opcode::Mod => "Mod",
            Opcode::Multiply => "Multiply",
            Opcode::Not => "Not",
            Opcode::NotEquals => "NotEquals",
            Opcode::Or => "Or",
            Opcode::Pop => "Pop",
            Opcode::PopCount => "PopCount",
            Opcode::Property => "Property",
            Opcode::PushColl => "PushColl",
            Opcode::PushItr => "PushItr",
            Opcode::PushList => "PushList",
            Opcode::PushProp => "PushProp",
            Opcode::PushPropKeyVal => "PushPropKeyVal",
            Opcode::PushTop => "PushTop",
            Opcode::PushVal => "PushVal",
            Opcode::PushVar => "PushVar",
            Opcode::PushVarKey => "PushVarKey",
            Opcode::Return => "Return",
            Opcode::ReturnValue => "ReturnValue",
            Opcode::ScopeBegin => "ScopeBegin",
            Opcode::ScopeEnd => "ScopeEnd",
            Opcode::SetIndex => "SetIndex",
            Opcode::SetProp => "SetProp",
            Opcode::SetPropKeyVal => "SetPropKeyVal",
            Opcode::SetVar => "SetVar",
            Opcode::SetVarKey => "SetVarKey",
            Opcode::Subtract => "Subtract",
            Opcode::Type => "Type",
            Opcode::Wait => "Wait",
        }
    }
}

/// Disassemble a bytecode buffer into a readable dump for debug logging.
///
/// Also serves as a structural validation pass: a malformed stream reports
/// the offset where decoding failed.
pub fn fmt_bytecode(bytecode: &[u8]) -> String {
    let mut out = String::from("bytecode:\n");
    let mut reader = BinaryReader::new(bytecode);
    if BytecodeHeader::read(&mut reader).is_err() {
        out.push_str("  <invalid header>\n");
        return out;
    }
    while reader.remaining() > 0 {
        let offset = reader.tell();
        match fmt_instruction(&mut reader) {
            Ok(text) => {
                out.push_str(&format!("  {offset:6}  {text}\n"));
            }
            Err(_) => {
                out.push_str(&format!("  {offset:6}  <invalid instruction>\n"));
                break;
            }
        }
    }
    out
}

fn fmt_instruction(reader: &mut BinaryReader<'_>) -> Result<String, ScriptError> {
    let byte = reader.read_u8()?;
    let opcode = Opcode::from_byte(byte).ok_or(ScriptError::InvalidBytecode)?;
    let name = opcode.name();
    Ok(match opcode {
        Opcode::CallFunc
        | Opcode::EraseProp
        | Opcode::ErasePropElem
        | Opcode::PushProp
        | Opcode::PushPropKeyVal
        | Opcode::SetProp
        | Opcode::SetPropKeyVal => {
            let id = reader.read_u64()?;
            format!("{name:<16}{id:#018x}")
        }
        Opcode::EraseVar
        | Opcode::EraseVarElem
        | Opcode::Library
        | Opcode::PushVar
        | Opcode::PushVarKey
        | Opcode::SetVar
        | Opcode::SetVarKey => {
            let var_name = reader.read_str()?;
            format!("{name:<16}{var_name}")
        }
        Opcode::Jump | Opcode::JumpFalse | Opcode::JumpTrue => {
            let target = reader.read_u32()?;
            format!("{name:<16}{target}")
        }
        Opcode::PushColl | Opcode::PushList | Opcode::PopCount => {
            let count = reader.read_u32()?;
            format!("{name:<16}{count}")
        }
        Opcode::PushVal => {
            let value = Variant::read(reader)?;
            format!("{name:<16}{value}")
        }
        Opcode::Cast => {
            let value_type =
                ValueType::from_byte(reader.read_u8()?).ok_or(ScriptError::InvalidBytecode)?;
            format!("{name:<16}{value_type}")
        }
        Opcode::SetIndex => {
            let var_name = reader.read_str()?;
            let index = reader.read_i32()?;
            let value_type =
                ValueType::from_byte(reader.read_u8()?).ok_or(ScriptError::InvalidBytecode)?;
            format!("{name:<16}{var_name} {index} {value_type}")
        }
        Opcode::Function => {
            let signature = FunctionSignature::read(reader)?;
            format!("{name:<16}{:#018x}", signature.id())
        }
        Opcode::Property => {
            let property = PropertyName::read(reader)?;
            format!("{name:<16}{}", property.name())
        }
        _ => name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_byte_roundtrip() {
        for byte in 0..Opcode::COUNT {
            let opcode = Opcode::from_byte(byte).unwrap();
            assert_eq!(opcode as u8, byte);
        }
        assert!(Opcode::from_byte(Opcode::COUNT).is_none());
        assert!(Opcode::from_byte(255).is_none());
    }

    #[test]
    fn test_fixed_values() {
        // The bytecode format depends on these staying put.
        assert_eq!(Opcode::Add as u8, 0);
        assert_eq!(Opcode::Exit as u8, 11);
        assert_eq!(Opcode::Wait as u8, Opcode::COUNT - 1);
    }
}
