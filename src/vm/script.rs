//! Script execution
//!
//! A `Script` is one executing instance of a compiled bytecode buffer, bound
//! to the runtime it shares libraries and properties with. Execution is
//! cooperative: each call to [`Script::execute`] advances the VM until the
//! program ends, errors, yields at a `Wait`, or exhausts its instruction
//! quantum, and the host decides when (and on which thread) to call again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::buffer::{BinaryReader, BytecodeHeader, BYTECODE_HEADER_SIZE};
use crate::collection::Collection;
use crate::error::ScriptError;
use crate::library::{FunctionSignature, Library, PropertyName};
use crate::runtime::{FunctionBody, Runtime};
use crate::variant::{ValueType, Variant};
use crate::vm::opcode::Opcode;

/// Where a script is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStatus {
    /// Created but never executed.
    Ready,
    /// Mid-program; the last quantum ran out before the program ended.
    Running,
    /// Parked on a `wait` until the host calls execute again.
    Waiting,
    /// Ran to completion.
    Finished,
    /// Halted by a runtime error.
    Error,
}

/// One function invocation: the caller's resume point plus this call's
/// locals. The root frame holds script-level variables.
struct Frame {
    /// Bytecode buffer to resume in the caller (calls may cross buffers).
    return_code: Arc<Vec<u8>>,
    return_ip: usize,
    /// Stack height below this call's arguments; restored on return.
    stack_base: usize,
    locals: HashMap<String, Variant>,
    scope_depth: u32,
}

/// Active loop cursor, keyed by the address of the instruction that created
/// it plus the call depth it was created at (so a recursive call re-entering
/// the same loop gets its own cursor). Counter cursors also record the stack
/// height at initialization so a re-entered loop (after a `break` left a
/// stale cursor behind) is detected and re-initialized.
struct LoopCursor {
    address: usize,
    frame_depth: usize,
    stack_len: usize,
    state: CursorState,
}

enum CursorState {
    Counter {
        current: Variant,
        bound: Variant,
        step: Variant,
    },
    Over {
        collection: Collection,
        index: usize,
    },
}

/// An executing script instance.
pub struct Script {
    runtime: Arc<Runtime>,
    /// Buffer currently executing (switches across cross-buffer calls).
    code: Arc<Vec<u8>>,
    ip: usize,
    stack: Vec<Variant>,
    frames: Vec<Frame>,
    cursors: Vec<LoopCursor>,
    library: Arc<Library>,
    status: ScriptStatus,
    last_error: Option<ScriptError>,
}

impl Script {
    pub(crate) fn new(runtime: Arc<Runtime>, bytecode: Vec<u8>) -> Result<Script, ScriptError> {
        let mut reader = BinaryReader::new(&bytecode);
        BytecodeHeader::read(&mut reader)?;
        let library = runtime.get_library("");
        let code = Arc::new(bytecode);
        Ok(Script {
            runtime,
            code: code.clone(),
            ip: BYTECODE_HEADER_SIZE,
            stack: Vec::new(),
            frames: vec![Frame {
                return_code: code,
                return_ip: 0,
                stack_base: 0,
                locals: HashMap::new(),
                scope_depth: 0,
            }],
            cursors: Vec::new(),
            library,
            status: ScriptStatus::Ready,
            last_error: None,
        })
    }

    pub fn status(&self) -> ScriptStatus {
        self.status
    }

    pub fn is_finished(&self) -> bool {
        self.status == ScriptStatus::Finished
    }

    /// The library this script declared with `library <name>` (the unnamed
    /// library until that opcode runs).
    pub fn library(&self) -> Arc<Library> {
        Arc::clone(&self.library)
    }

    /// The error that halted this script, if any.
    pub fn last_error(&self) -> Option<&ScriptError> {
        self.last_error.as_ref()
    }

    /// Current operand stack depth. Zero after a clean exit.
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Set a script variable by name in the current frame. Used by the host
    /// to satisfy `external` declarations before execution.
    pub fn set_variable(&mut self, name: &str, value: Variant) {
        self.current_frame_mut().locals.insert(name.into(), value);
    }

    /// Read a script variable by name from the current frame.
    pub fn get_variable(&self, name: &str) -> Variant {
        self.frames
            .last()
            .and_then(|frame| frame.locals.get(name))
            .cloned()
            .unwrap_or(Variant::Null)
    }

    /// Advance the script by one quantum. Returns the resulting status;
    /// `Running` means the instruction budget ran out mid-program and the
    /// host should call again.
    pub fn execute(&mut self) -> Result<ScriptStatus, ScriptError> {
        match self.status {
            ScriptStatus::Finished => return Ok(ScriptStatus::Finished),
            ScriptStatus::Error => {
                return Err(self
                    .last_error
                    .clone()
                    .unwrap_or(ScriptError::InvalidBytecode))
            }
            _ => {}
        }
        self.status = ScriptStatus::Running;

        let started = Instant::now();
        let mut executed: u64 = 0;
        let result = self.run(&mut executed);
        self.runtime
            .record_execution(started.elapsed().as_nanos() as u64, executed);

        match result {
            Ok(status) => {
                self.status = status;
                Ok(status)
            }
            Err(error) => {
                self.status = ScriptStatus::Error;
                self.last_error = Some(error.clone());
                Err(error)
            }
        }
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("root frame always present")
    }

    fn pop(&mut self) -> Result<Variant, ScriptError> {
        self.stack.pop().ok_or(ScriptError::StackUnderflow)
    }

    fn run(&mut self, executed: &mut u64) -> Result<ScriptStatus, ScriptError> {
        let max_instructions = self.runtime.params().max_instructions;

        loop {
            if *executed >= u64::from(max_instructions) {
                return Ok(ScriptStatus::Running);
            }
            *executed += 1;

            let code = Arc::clone(&self.code);
            let mut reader = BinaryReader::new(&code);
            reader.seek(self.ip);
            let instruction_address = self.ip;

            let byte = reader.read_u8()?;
            let opcode = Opcode::from_byte(byte).ok_or(ScriptError::InvalidBytecode)?;

            match opcode {
                Opcode::Add => self.binary_op(Variant::add)?,
                Opcode::Subtract => self.binary_op(Variant::subtract)?,
                Opcode::Multiply => self.binary_op(Variant::multiply)?,
                Opcode::Divide => self.binary_op(Variant::divide)?,
                Opcode::Mod => self.binary_op(Variant::modulo)?,
                Opcode::Increment => self.binary_op(Variant::add)?,
                Opcode::Decrement => self.binary_op(Variant::subtract)?,

                Opcode::And => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack
                        .push(Variant::Boolean(a.to_boolean() && b.to_boolean()));
                }
                Opcode::Or => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack
                        .push(Variant::Boolean(a.to_boolean() || b.to_boolean()));
                }
                Opcode::Not => {
                    let a = self.pop()?;
                    self.stack.push(Variant::Boolean(!a.to_boolean()));
                }

                Opcode::Equals => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Variant::Boolean(a.loose_eq(&b)));
                }
                Opcode::NotEquals => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Variant::Boolean(!a.loose_eq(&b)));
                }
                Opcode::Less => self.compare_op(|o| o.is_lt())?,
                Opcode::LessEq => self.compare_op(|o| o.is_le())?,
                Opcode::Greater => self.compare_op(|o| o.is_gt())?,
                Opcode::GreaterEq => self.compare_op(|o| o.is_ge())?,

                Opcode::Cast => {
                    let value_type = ValueType::from_byte(reader.read_u8()?)
                        .ok_or(ScriptError::InvalidBytecode)?;
                    let value = self.pop()?;
                    self.stack.push(value.cast(value_type)?);
                }
                Opcode::Type => {
                    let value = self.pop()?;
                    self.stack.push(Variant::ValType(value.value_type()));
                }

                Opcode::Pop => {
                    self.pop()?;
                }
                Opcode::PopCount => {
                    let count = reader.read_u32()? as usize;
                    if self.stack.len() < count {
                        return Err(ScriptError::StackUnderflow);
                    }
                    self.stack.truncate(self.stack.len() - count);
                }
                Opcode::PushTop => {
                    let top = self.stack.last().ok_or(ScriptError::StackUnderflow)?;
                    self.stack.push(top.clone());
                }
                Opcode::PushVal => {
                    let value = Variant::read(&mut reader)?;
                    self.stack.push(value);
                }

                Opcode::PushVar => {
                    let name = reader.read_str()?;
                    let value = self.get_variable(&name);
                    self.stack.push(value);
                }
                Opcode::SetVar => {
                    let name = reader.read_str()?;
                    let value = self.pop()?;
                    self.current_frame_mut().locals.insert(name, value);
                }
                Opcode::PushVarKey => {
                    let name = reader.read_str()?;
                    let key = self.pop()?;
                    let frame = self.frames.last().expect("root frame");
                    let value = match frame.locals.get(&name) {
                        Some(Variant::Collection(collection)) => {
                            collection.get(&key).cloned().unwrap_or(Variant::Null)
                        }
                        Some(other) => {
                            return Err(ScriptError::NotACollection(other.value_type()))
                        }
                        None => return Err(ScriptError::NotACollection(ValueType::Null)),
                    };
                    self.stack.push(value);
                }
                Opcode::SetVarKey => {
                    let name = reader.read_str()?;
                    let value = self.pop()?;
                    let key = self.pop()?;
                    if key.is_collection() {
                        return Err(ScriptError::CollectionKey);
                    }
                    match self.current_frame_mut().locals.get_mut(&name) {
                        Some(Variant::Collection(collection)) => {
                            collection.insert(key, value);
                        }
                        Some(other) => {
                            return Err(ScriptError::NotACollection(other.value_type()))
                        }
                        None => return Err(ScriptError::NotACollection(ValueType::Null)),
                    }
                }
                Opcode::EraseVar => {
                    let name = reader.read_str()?;
                    self.current_frame_mut().locals.remove(&name);
                }
                Opcode::EraseVarElem => {
                    let name = reader.read_str()?;
                    let key = self.pop()?;
                    match self.current_frame_mut().locals.get_mut(&name) {
                        Some(Variant::Collection(collection)) => {
                            collection.remove(&key);
                        }
                        Some(other) => {
                            return Err(ScriptError::NotACollection(other.value_type()))
                        }
                        None => return Err(ScriptError::NotACollection(ValueType::Null)),
                    }
                }

                Opcode::PushProp => {
                    let id = reader.read_u64()?;
                    self.stack.push(self.runtime.get_property(id));
                }
                Opcode::SetProp => {
                    let id = reader.read_u64()?;
                    let value = self.pop()?;
                    self.runtime.set_property(id, value);
                }
                Opcode::PushPropKeyVal => {
                    let id = reader.read_u64()?;
                    let key = self.pop()?;
                    self.stack
                        .push(self.runtime.get_property_key_value(id, &key)?);
                }
                Opcode::SetPropKeyVal => {
                    let id = reader.read_u64()?;
                    let value = self.pop()?;
                    let key = self.pop()?;
                    if key.is_collection() {
                        return Err(ScriptError::CollectionKey);
                    }
                    self.runtime.set_property_key_value(id, key, value)?;
                }
                Opcode::EraseProp => {
                    let id = reader.read_u64()?;
                    self.check_property_writable(id)?;
                    self.runtime.erase_property(id);
                }
                Opcode::ErasePropElem => {
                    let id = reader.read_u64()?;
                    let key = self.pop()?;
                    self.check_property_writable(id)?;
                    self.runtime.erase_property_element(id, &key)?;
                }

                Opcode::Jump => {
                    let target = reader.read_u32()? as usize;
                    reader.seek(target);
                }
                Opcode::JumpFalse => {
                    let target = reader.read_u32()? as usize;
                    let condition = self.pop()?;
                    if !condition.to_boolean() {
                        reader.seek(target);
                    }
                }
                Opcode::JumpTrue => {
                    let target = reader.read_u32()? as usize;
                    let condition = self.pop()?;
                    if condition.to_boolean() {
                        reader.seek(target);
                    }
                }

                Opcode::Library => {
                    let name = reader.read_str()?;
                    self.library = self.runtime.get_library(&name);
                }
                Opcode::Property => {
                    let property = PropertyName::read(&mut reader)?;
                    let library = self.runtime.get_library(property.library_name());
                    // Re-registration is a no-op when the same bytecode runs
                    // again or on a second runtime.
                    library.register_property_name(property.clone());
                    self.runtime.register_property_name(property);
                }
                Opcode::Function => {
                    let signature = FunctionSignature::read(&mut reader)?;
                    // The body starts right after the jump that skips it.
                    let entry = reader.tell() + 5;
                    self.runtime
                        .register_function(signature, Arc::clone(&self.code), entry);
                }

                Opcode::CallFunc => {
                    let id = reader.read_u64()?;
                    let definition = self
                        .runtime
                        .find_function(id)
                        .ok_or(ScriptError::UnknownFunction(id))?;
                    let parameter_count = definition.signature().parameter_count();
                    if self.stack.len() < parameter_count {
                        return Err(ScriptError::StackUnderflow);
                    }
                    match definition.body() {
                        FunctionBody::Native(callback) => {
                            let args = self.stack.split_off(self.stack.len() - parameter_count);
                            let result = callback(&args)?;
                            if definition.signature().returns_value() {
                                self.stack.push(result);
                            }
                        }
                        FunctionBody::Bytecode { bytecode, offset } => {
                            self.frames.push(Frame {
                                return_code: Arc::clone(&self.code),
                                return_ip: reader.tell(),
                                stack_base: self.stack.len() - parameter_count,
                                locals: HashMap::new(),
                                scope_depth: 0,
                            });
                            self.code = Arc::clone(bytecode);
                            self.ip = *offset;
                            continue;
                        }
                    }
                }
                Opcode::SetIndex => {
                    let name = reader.read_str()?;
                    let index = reader.read_i32()?;
                    let value_type = ValueType::from_byte(reader.read_u8()?)
                        .ok_or(ScriptError::InvalidBytecode)?;
                    let position = self.stack.len() as i64 + i64::from(index);
                    if position < 0 {
                        return Err(ScriptError::StackUnderflow);
                    }
                    let mut value = self.stack[position as usize].clone();
                    if value_type != ValueType::Null && value.value_type() != value_type {
                        value = value.cast(value_type)?;
                    }
                    self.current_frame_mut().locals.insert(name, value);
                }
                Opcode::Return => {
                    if self.frames.len() == 1 {
                        self.ip = reader.tell();
                        return Ok(ScriptStatus::Finished);
                    }
                    let frame = self.frames.pop().expect("checked");
                    self.stack.truncate(frame.stack_base);
                    self.code = frame.return_code;
                    self.ip = frame.return_ip;
                    continue;
                }
                Opcode::ReturnValue => {
                    let value = self.pop()?;
                    if self.frames.len() == 1 {
                        self.ip = reader.tell();
                        return Ok(ScriptStatus::Finished);
                    }
                    let frame = self.frames.pop().expect("checked");
                    self.stack.truncate(frame.stack_base);
                    self.stack.push(value);
                    self.code = frame.return_code;
                    self.ip = frame.return_ip;
                    continue;
                }

                Opcode::ScopeBegin => {
                    self.current_frame_mut().scope_depth += 1;
                }
                Opcode::ScopeEnd => {
                    let frame = self.current_frame_mut();
                    frame.scope_depth = frame.scope_depth.saturating_sub(1);
                }

                Opcode::PushColl => {
                    let count = reader.read_u32()? as usize;
                    if self.stack.len() < count * 2 {
                        return Err(ScriptError::StackUnderflow);
                    }
                    let entries = self.stack.split_off(self.stack.len() - count * 2);
                    let mut collection = Collection::new();
                    for pair in entries.chunks_exact(2) {
                        if pair[0].is_collection() {
                            return Err(ScriptError::CollectionKey);
                        }
                        collection.insert(pair[0].clone(), pair[1].clone());
                    }
                    self.stack.push(Variant::Collection(collection));
                }
                Opcode::PushList => {
                    let count = reader.read_u32()? as usize;
                    if self.stack.len() < count {
                        return Err(ScriptError::StackUnderflow);
                    }
                    let values = self.stack.split_off(self.stack.len() - count);
                    let mut collection = Collection::new();
                    for (i, value) in values.into_iter().enumerate() {
                        collection.insert(Variant::Integer(i as i64 + 1), value);
                    }
                    self.stack.push(Variant::Collection(collection));
                }

                Opcode::PushItr => {
                    let top = self.stack.last().ok_or(ScriptError::StackUnderflow)?;
                    let collection = match top {
                        Variant::Collection(collection) => collection.clone(),
                        other => return Err(ScriptError::NotACollection(other.value_type())),
                    };
                    // A stale cursor from a broken-out iteration of this same
                    // loop is replaced rather than resumed.
                    let frame_depth = self.frames.len();
                    self.cursors
                        .retain(|c| !(c.address == instruction_address && c.frame_depth == frame_depth));
                    let first = collection
                        .get_index(0)
                        .map(|(_, value)| value.clone())
                        .ok_or(ScriptError::InvalidBytecode)?;
                    self.cursors.push(LoopCursor {
                        address: instruction_address,
                        frame_depth,
                        stack_len: self.stack.len(),
                        state: CursorState::Over {
                            collection,
                            index: 0,
                        },
                    });
                    self.stack.push(first);
                }
                Opcode::LoopOver => {
                    // Stale counter cursors left above by a broken-out inner
                    // loop are dead; discard them.
                    while matches!(
                        self.cursors.last(),
                        Some(LoopCursor {
                            state: CursorState::Counter { .. },
                            ..
                        })
                    ) {
                        self.cursors.pop();
                    }
                    let next = {
                        let cursor =
                            self.cursors.last_mut().ok_or(ScriptError::InvalidBytecode)?;
                        let CursorState::Over { collection, index } = &mut cursor.state else {
                            return Err(ScriptError::InvalidBytecode);
                        };
                        *index += 1;
                        collection.get_index(*index).map(|(_, value)| value.clone())
                    };
                    match next {
                        Some(value) => {
                            self.stack.push(value);
                            self.stack.push(Variant::Boolean(true));
                        }
                        None => {
                            self.cursors.pop();
                            self.stack.push(Variant::Boolean(false));
                        }
                    }
                }
                Opcode::LoopCount => {
                    self.loop_count(instruction_address)?;
                }

                Opcode::Wait => {
                    self.ip = reader.tell();
                    return Ok(ScriptStatus::Waiting);
                }
                Opcode::Exit => {
                    self.ip = reader.tell();
                    return Ok(ScriptStatus::Finished);
                }
            }

            self.ip = reader.tell();
        }
    }

    fn binary_op(
        &mut self,
        op: impl Fn(&Variant, &Variant) -> Result<Variant, ScriptError>,
    ) -> Result<(), ScriptError> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.stack.push(op(&a, &b)?);
        Ok(())
    }

    fn compare_op(
        &mut self,
        test: impl Fn(std::cmp::Ordering) -> bool,
    ) -> Result<(), ScriptError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let ordering = a.compare(&b)?;
        self.stack.push(Variant::Boolean(test(ordering)));
        Ok(())
    }

    fn check_property_writable(&self, id: u64) -> Result<(), ScriptError> {
        if let Some(property) = self.runtime.property_name(id) {
            if property.is_read_only() {
                return Err(ScriptError::ReadOnlyProperty(property.name().to_string()));
            }
        }
        Ok(())
    }

    /// Dual-phase counter loop step. The first execution at an address pops
    /// counter, bound, and step from the stack and records a cursor; later
    /// executions advance it. Pushes the counter value and a true flag while
    /// the loop continues, or just false when it is done.
    fn loop_count(&mut self, address: usize) -> Result<(), ScriptError> {
        let frame_depth = self.frames.len();
        if let Some(position) = self.cursors.iter().rposition(|c| {
            c.address == address
                && c.frame_depth == frame_depth
                && matches!(c.state, CursorState::Counter { .. })
        }) {
            if self.cursors[position].stack_len == self.stack.len() {
                // Advance phase. Anything above this cursor is stale state
                // from loops that were broken out of.
                self.cursors.truncate(position + 1);
                let (next, proceed) = {
                    let cursor = self.cursors.last_mut().expect("position valid");
                    let CursorState::Counter {
                        current,
                        bound,
                        step,
                    } = &mut cursor.state
                    else {
                        unreachable!("matched above");
                    };
                    let next = current.add(step)?;
                    let proceed = Self::counter_in_bounds(&next, bound, step)?;
                    if proceed {
                        *current = next.clone();
                    }
                    (next, proceed)
                };
                if proceed {
                    self.stack.push(next);
                    self.stack.push(Variant::Boolean(true));
                } else {
                    self.cursors.truncate(position);
                    self.stack.push(Variant::Boolean(false));
                }
                return Ok(());
            }
            // Stack height differs: this is a fresh entry into the loop and
            // the old cursor is stale. Fall through and re-initialize.
            self.cursors.truncate(position);
        }

        // Initialization phase: operands arrive as counter, bound, step.
        let mut step = self.pop()?;
        let bound = self.pop()?;
        let current = self.pop()?;
        if step.is_null() {
            // Default step follows the direction of travel.
            step = if bound.compare(&current)?.is_lt() {
                Variant::Integer(-1)
            } else {
                Variant::Integer(1)
            };
        }
        if !current.is_numeric() || !bound.is_numeric() || !step.is_numeric() {
            return Err(ScriptError::TypeMismatch {
                operation: "count",
                left: current.value_type(),
                right: bound.value_type(),
            });
        }
        let proceed = Self::counter_in_bounds(&current, &bound, &step)?;
        if proceed {
            self.stack.push(current.clone());
            self.cursors.push(LoopCursor {
                address,
                frame_depth,
                stack_len: self.stack.len() - 1,
                state: CursorState::Counter {
                    current,
                    bound,
                    step,
                },
            });
            self.stack.push(Variant::Boolean(true));
        } else {
            self.stack.push(Variant::Boolean(false));
        }
        Ok(())
    }

    fn counter_in_bounds(
        current: &Variant,
        bound: &Variant,
        step: &Variant,
    ) -> Result<bool, ScriptError> {
        let ascending = step.compare(&Variant::Integer(0))?.is_gt();
        let ordering = current.compare(bound)?;
        Ok(if ascending {
            ordering.is_le()
        } else {
            ordering.is_ge()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeParams;

    fn run(source: &str) -> Script {
        Runtime::new().execute_script(source, "test", &[]).unwrap()
    }

    #[test]
    fn test_stack_empty_at_exit() {
        let script = run(
            "set c to [[\"a\", 1], [\"b\", 2]]\nset total to 0\nloop v over c\nset total to total + v\nend\n",
        );
        assert_eq!(script.stack_depth(), 0);
        assert!(script.is_finished());
    }

    #[test]
    fn test_status_lifecycle() {
        let runtime = Runtime::new();
        let bytecode = runtime.compile("set x to 1\n", "s", &[]).unwrap();
        let mut script = runtime.create_script(&bytecode).unwrap();
        assert_eq!(script.status(), ScriptStatus::Ready);
        assert_eq!(script.execute().unwrap(), ScriptStatus::Finished);
        assert!(script.is_finished());
        // Executing a finished script is a no-op.
        assert_eq!(script.execute().unwrap(), ScriptStatus::Finished);
    }

    #[test]
    fn test_instruction_budget_yields_running() {
        let runtime = Runtime::with_params(RuntimeParams {
            max_instructions: 8,
            ..Default::default()
        });
        let bytecode = runtime
            .compile("set n to 0\nloop i from 1 to 100\nset n to n + i\nend\n", "s", &[])
            .unwrap();
        let mut script = runtime.create_script(&bytecode).unwrap();
        assert_eq!(script.execute().unwrap(), ScriptStatus::Running);
        while script.execute().unwrap() == ScriptStatus::Running {}
        assert!(script.is_finished());
        assert_eq!(script.get_variable("n"), Variant::Integer(5050));
    }

    #[test]
    fn test_runtime_error_halts_script() {
        let runtime = Runtime::new();
        let bytecode = runtime
            .compile("set x to 1 / 0\n", "s", &[])
            .unwrap();
        let mut script = runtime.create_script(&bytecode).unwrap();
        let err = script.execute().unwrap_err();
        assert_eq!(err, ScriptError::DivideByZero);
        assert_eq!(script.status(), ScriptStatus::Error);
        assert_eq!(script.last_error(), Some(&ScriptError::DivideByZero));
        // The error is sticky.
        assert!(script.execute().is_err());
    }

    #[test]
    fn test_type_mismatch_is_runtime_error() {
        let runtime = Runtime::new();
        let bytecode = runtime
            .compile("set x to \"a\" < 1\n", "s", &[])
            .unwrap();
        let mut script = runtime.create_script(&bytecode).unwrap();
        assert!(matches!(
            script.execute(),
            Err(ScriptError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_key_access_on_non_collection_fails() {
        let runtime = Runtime::new();
        let bytecode = runtime
            .compile("set x to 5\nset y to x [1]\n", "s", &[])
            .unwrap();
        let mut script = runtime.create_script(&bytecode).unwrap();
        assert!(matches!(
            script.execute(),
            Err(ScriptError::NotACollection(ValueType::Integer))
        ));
    }
}
