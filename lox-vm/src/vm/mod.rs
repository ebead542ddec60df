// lox-vm - Bytecode compiler and virtual machine for the Lox programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Stack-based virtual machine for executing Lox bytecode.

pub mod frame;
pub mod stack;

use std::fmt;
use std::io::Write;

use crate::OpCode;
use crate::compiler::{self, CompileError};
use crate::debug;
use crate::heap::{Heap, Roots};
use crate::natives;
use crate::object::{BoundMethod, Closure, Instance, NativeFn, Obj, ObjRef, Upvalue, UpvalueState};
use crate::table::Table;
use crate::value::Value;

pub use frame::CallFrame;
pub use stack::ValueStack;

/// Maximum call depth.
const FRAMES_MAX: usize = 64;

/// Runtime error conditions.
#[derive(Debug, Clone)]
pub enum VmError {
    /// Stack underflow (an interpreter bug, not a program error).
    StackUnderflow,
    /// Unary numeric operator applied to a non-number.
    OperandMustBeNumber,
    /// Binary numeric operator applied to non-numbers.
    OperandsMustBeNumbers,
    /// `+` applied to anything but two numbers or two strings.
    OperandsMustBeNumbersOrStrings,
    /// Read or assignment of a global that was never defined.
    UndefinedVariable(String),
    /// Property access that matched neither a field nor a method.
    UndefinedProperty(String),
    /// Call of a value that is not callable.
    NotCallable,
    /// Wrong number of arguments.
    Arity { expected: usize, got: usize },
    /// Call-frame stack exhausted.
    StackOverflow,
    /// Property read on a non-instance.
    NoProperties,
    /// Field write on a non-instance.
    NoFields,
    /// Method invocation on a non-instance.
    NoMethods,
    /// `<` clause of a class declaration named a non-class.
    SuperclassNotClass,
    /// Writing program output failed.
    Io(String),
    /// Internal error.
    Internal(String),
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::StackUnderflow => write!(f, "Stack underflow."),
            VmError::OperandMustBeNumber => write!(f, "Operand must be a number."),
            VmError::OperandsMustBeNumbers => write!(f, "Operands must be numbers."),
            VmError::OperandsMustBeNumbersOrStrings => {
                write!(f, "Operands must be two numbers or two strings.")
            }
            VmError::UndefinedVariable(name) => {
                write!(f, "Undefined variable '{}'.", name)
            }
            VmError::UndefinedProperty(name) => {
                write!(f, "Undefined property '{}'.", name)
            }
            VmError::NotCallable => write!(f, "Can only call functions and classes."),
            VmError::Arity { expected, got } => {
                write!(f, "Expected {} arguments but got {}.", expected, got)
            }
            VmError::StackOverflow => write!(f, "Stack overflow."),
            VmError::NoProperties => write!(f, "Only instances have properties."),
            VmError::NoFields => write!(f, "Only instances have fields."),
            VmError::NoMethods => write!(f, "Only instances have methods."),
            VmError::SuperclassNotClass => write!(f, "Superclass must be a class."),
            VmError::Io(message) => write!(f, "I/O error: {}", message),
            VmError::Internal(message) => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for VmError {}

/// Result type for VM operations.
pub type Result<T> = std::result::Result<T, VmError>;

/// One line of a runtime stack trace.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub line: u32,
    /// Function name; `None` for top-level script code.
    pub function: Option<String>,
}

/// A runtime error together with its stack trace, innermost frame first.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub error: VmError,
    pub trace: Vec<TraceFrame>,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        for frame in &self.trace {
            write!(f, "\n[line {}] in ", frame.line)?;
            match &frame.function {
                Some(name) => write!(f, "{}()", name)?,
                None => write!(f, "script")?,
            }
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// The result of handing a source string to the VM.
#[derive(Debug)]
pub enum InterpretError {
    /// Compilation failed; nothing was executed.
    Compile(Vec<CompileError>),
    /// Execution failed; the VM has been reset.
    Runtime(RuntimeError),
}

impl fmt::Display for InterpretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpretError::Compile(errors) => {
                for (i, error) in errors.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}", error)?;
                }
                Ok(())
            }
            InterpretError::Runtime(error) => write!(f, "{}", error),
        }
    }
}

impl std::error::Error for InterpretError {}

/// The Lox virtual machine.
///
/// Owns the heap, the value and frame stacks, the globals table, and the
/// open-upvalue list. A single VM can interpret any number of sources in
/// sequence; globals and interned strings persist between runs, which is
/// what makes the REPL work.
pub struct Vm {
    heap: Heap,
    stack: ValueStack,
    frames: Vec<CallFrame>,
    globals: Table,

    /// Head of the open-upvalue list, sorted by descending stack slot.
    open_upvalues: Option<ObjRef>,

    /// Interned `"init"`, looked up on every class call.
    init_string: ObjRef,

    /// Disassemble compiled code and trace dispatch to stderr.
    trace: bool,
}

impl Vm {
    /// Create a VM with the default native bindings installed.
    pub fn new() -> Self {
        let mut heap = Heap::new();
        let init_string = heap.intern("init");
        let mut vm = Self {
            heap,
            stack: ValueStack::new(),
            frames: Vec::new(),
            globals: Table::new(),
            open_upvalues: None,
            init_string,
            trace: false,
        };
        for (name, arity, function) in natives::default_natives() {
            vm.define_native(name, *arity, *function);
        }
        vm
    }

    /// Collect before every runtime allocation. Slow; a debugging aid.
    pub fn set_stress_gc(&mut self, stress: bool) {
        self.heap.set_stress(stress);
    }

    /// Dump compiled chunks and trace instruction dispatch to stderr.
    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    /// Compile and execute a source string as a top-level script.
    pub fn interpret(
        &mut self,
        source: &str,
        out: &mut impl Write,
    ) -> std::result::Result<(), InterpretError> {
        let script =
            compiler::compile(source, &mut self.heap).map_err(InterpretError::Compile)?;
        if self.trace {
            debug::disassemble_function(&self.heap, script);
        }

        match self.run_script(script, out) {
            Ok(()) => Ok(()),
            Err(error) => {
                let trace = self.stack_trace();
                self.reset();
                Err(InterpretError::Runtime(RuntimeError { error, trace }))
            }
        }
    }

    fn run_script(&mut self, script: ObjRef, out: &mut impl Write) -> Result<()> {
        // Root the script function across the closure allocation.
        self.stack.push(Value::Obj(script));
        let closure = self.alloc(Obj::Closure(Closure {
            function: script,
            upvalues: Vec::new(),
        }));
        self.stack.pop()?;
        self.stack.push(Value::Obj(closure));
        self.call_closure(closure, 0)?;
        self.run(out)
    }

    fn define_native(&mut self, name: &str, arity: Option<u8>, function: NativeFn) {
        let name = self.heap.intern(name);
        let hash = self.heap.string(name).hash;
        let native = self.heap.alloc(Obj::Native(crate::object::Native {
            arity,
            function,
        }));
        self.globals.set(name, hash, Value::Obj(native));
    }

    // =========================================================================
    // Dispatch loop
    // =========================================================================

    fn run(&mut self, out: &mut impl Write) -> Result<()> {
        loop {
            if self.trace {
                let frame = self.frame()?;
                debug::disassemble_instruction(&self.heap, &frame.chunk, frame.ip);
            }

            let op = self.read_op()?;
            match op {
                // Constants & stack
                OpCode::Constant(index) => {
                    let value = self.read_constant(index)?;
                    self.stack.push(value);
                }
                OpCode::Nil => self.stack.push(Value::Nil),
                OpCode::True => self.stack.push(Value::Bool(true)),
                OpCode::False => self.stack.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.stack.pop()?;
                }

                // Variables
                OpCode::GetLocal(slot) => {
                    let base = self.frame()?.base;
                    let value = self.stack.get(base + slot as usize)?;
                    self.stack.push(value);
                }
                OpCode::SetLocal(slot) => {
                    let value = self.stack.peek(0)?;
                    let base = self.frame()?.base;
                    self.stack.set(base + slot as usize, value)?;
                }
                OpCode::GetGlobal(index) => {
                    let name = self.read_string(index)?;
                    let hash = self.heap.string(name).hash;
                    match self.globals.get(name, hash) {
                        Some(value) => self.stack.push(value),
                        None => {
                            return Err(VmError::UndefinedVariable(
                                self.heap.string(name).chars.to_string(),
                            ));
                        }
                    }
                }
                OpCode::DefineGlobal(index) => {
                    let name = self.read_string(index)?;
                    let hash = self.heap.string(name).hash;
                    let value = self.stack.peek(0)?;
                    self.globals.set(name, hash, value);
                    self.stack.pop()?;
                }
                OpCode::SetGlobal(index) => {
                    let name = self.read_string(index)?;
                    let hash = self.heap.string(name).hash;
                    let value = self.stack.peek(0)?;
                    if self.globals.set(name, hash, value) {
                        // Assignment never creates a global.
                        self.globals.delete(name, hash);
                        return Err(VmError::UndefinedVariable(
                            self.heap.string(name).chars.to_string(),
                        ));
                    }
                }
                OpCode::GetUpvalue(index) => {
                    let upvalue = self.closure_upvalue(index)?;
                    let value = match self.heap.upvalue(upvalue).state {
                        UpvalueState::Open(slot) => self.stack.get(slot)?,
                        UpvalueState::Closed(value) => value,
                    };
                    self.stack.push(value);
                }
                OpCode::SetUpvalue(index) => {
                    let upvalue = self.closure_upvalue(index)?;
                    let value = self.stack.peek(0)?;
                    match self.heap.upvalue(upvalue).state {
                        UpvalueState::Open(slot) => self.stack.set(slot, value)?,
                        UpvalueState::Closed(_) => {
                            self.heap.upvalue_mut(upvalue).state = UpvalueState::Closed(value);
                        }
                    }
                }

                // Properties & super
                OpCode::GetProperty(index) => {
                    let name = self.read_string(index)?;
                    let receiver = self.stack.peek(0)?;
                    let instance = match receiver.as_obj() {
                        Some(r) if matches!(self.heap.obj(r), Obj::Instance(_)) => r,
                        _ => return Err(VmError::NoProperties),
                    };
                    let hash = self.heap.string(name).hash;
                    let (class, field) = {
                        let instance = self.heap.instance(instance);
                        (instance.class, instance.fields.get(name, hash))
                    };
                    match field {
                        Some(value) => {
                            self.stack.pop()?;
                            self.stack.push(value);
                        }
                        None => self.bind_method(class, name)?,
                    }
                }
                OpCode::SetProperty(index) => {
                    let name = self.read_string(index)?;
                    let target = self.stack.peek(1)?;
                    let instance = match target.as_obj() {
                        Some(r) if matches!(self.heap.obj(r), Obj::Instance(_)) => r,
                        _ => return Err(VmError::NoFields),
                    };
                    let value = self.stack.peek(0)?;
                    let hash = self.heap.string(name).hash;
                    self.heap.instance_mut(instance).fields.set(name, hash, value);
                    let value = self.stack.pop()?;
                    self.stack.pop()?;
                    self.stack.push(value);
                }
                OpCode::GetSuper(index) => {
                    let name = self.read_string(index)?;
                    let superclass = self.pop_class()?;
                    self.bind_method(superclass, name)?;
                }

                // Operators
                OpCode::Equal => {
                    let b = self.stack.pop()?;
                    let a = self.stack.pop()?;
                    self.stack.push(Value::Bool(a == b));
                }
                OpCode::Greater => self.binary_number_op(|a, b| Value::Bool(a > b))?,
                OpCode::Less => self.binary_number_op(|a, b| Value::Bool(a < b))?,
                OpCode::Add => self.add()?,
                OpCode::Subtract => self.binary_number_op(|a, b| Value::Number(a - b))?,
                OpCode::Multiply => self.binary_number_op(|a, b| Value::Number(a * b))?,
                OpCode::Divide => self.binary_number_op(|a, b| Value::Number(a / b))?,
                OpCode::Not => {
                    let value = self.stack.pop()?;
                    self.stack.push(Value::Bool(value.is_falsey()));
                }
                OpCode::Negate => match self.stack.peek(0)? {
                    Value::Number(n) => {
                        self.stack.pop()?;
                        self.stack.push(Value::Number(-n));
                    }
                    _ => return Err(VmError::OperandMustBeNumber),
                },

                // Statements & control flow
                OpCode::Print => {
                    let value = self.stack.pop()?;
                    let rendered = self.heap.value_to_string(value);
                    writeln!(out, "{}", rendered).map_err(|e| VmError::Io(e.to_string()))?;
                }
                OpCode::Jump(offset) => {
                    self.frame_mut()?.ip += offset as usize;
                }
                OpCode::JumpIfFalse(offset) => {
                    if self.stack.peek(0)?.is_falsey() {
                        self.frame_mut()?.ip += offset as usize;
                    }
                }
                OpCode::Loop(offset) => {
                    let frame = self.frame_mut()?;
                    frame.ip -= offset as usize;
                }

                // Calls & closures
                OpCode::Call(argc) => {
                    self.call_value(argc as usize)?;
                }
                OpCode::Invoke(index, argc) => {
                    let name = self.read_string(index)?;
                    self.invoke(name, argc as usize)?;
                }
                OpCode::SuperInvoke(index, argc) => {
                    let name = self.read_string(index)?;
                    let superclass = self.pop_class()?;
                    self.invoke_from_class(superclass, name, argc as usize)?;
                }
                OpCode::Closure(index) => {
                    let function = match self.read_constant(index)? {
                        Value::Obj(r) => r,
                        _ => {
                            return Err(VmError::Internal(
                                "closure constant is not a function".to_string(),
                            ));
                        }
                    };
                    self.make_closure(function)?;
                }
                OpCode::CaptureLocal(_) | OpCode::CaptureUpvalue(_) => {
                    return Err(VmError::Internal(
                        "capture directive outside closure construction".to_string(),
                    ));
                }
                OpCode::CloseUpvalue => {
                    let top = self
                        .stack
                        .len()
                        .checked_sub(1)
                        .ok_or(VmError::StackUnderflow)?;
                    self.close_upvalues(top)?;
                    self.stack.pop()?;
                }
                OpCode::Return => {
                    let result = self.stack.pop()?;
                    let frame = self
                        .frames
                        .pop()
                        .ok_or_else(|| VmError::Internal("no active frame".to_string()))?;
                    self.close_upvalues(frame.base)?;
                    self.stack.truncate(frame.base);
                    if self.frames.is_empty() {
                        return Ok(());
                    }
                    self.stack.push(result);
                }

                // Classes
                OpCode::Class(index) => {
                    let name = self.read_string(index)?;
                    let class = self.alloc(Obj::Class(crate::object::Class {
                        name,
                        methods: Table::new(),
                    }));
                    self.stack.push(Value::Obj(class));
                }
                OpCode::Inherit => {
                    let superclass = match self.stack.peek(1)?.as_obj() {
                        Some(r) if matches!(self.heap.obj(r), Obj::Class(_)) => r,
                        _ => return Err(VmError::SuperclassNotClass),
                    };
                    let subclass = match self.stack.peek(0)?.as_obj() {
                        Some(r) if matches!(self.heap.obj(r), Obj::Class(_)) => r,
                        _ => {
                            return Err(VmError::Internal(
                                "inherit target is not a class".to_string(),
                            ));
                        }
                    };
                    // Copy before the subclass declares its own methods, so
                    // overrides win.
                    let inherited = self.heap.class(superclass).methods.clone();
                    inherited.add_all_into(&mut self.heap.class_mut(subclass).methods);
                    self.stack.pop()?;
                }
                OpCode::Method(index) => {
                    let name = self.read_string(index)?;
                    let method = self.stack.peek(0)?;
                    let class = match self.stack.peek(1)?.as_obj() {
                        Some(r) if matches!(self.heap.obj(r), Obj::Class(_)) => r,
                        _ => {
                            return Err(VmError::Internal(
                                "method target is not a class".to_string(),
                            ));
                        }
                    };
                    let hash = self.heap.string(name).hash;
                    self.heap.class_mut(class).methods.set(name, hash, method);
                    self.stack.pop()?;
                }
            }
        }
    }

    // =========================================================================
    // Instruction stream access
    // =========================================================================

    fn frame(&self) -> Result<&CallFrame> {
        self.frames
            .last()
            .ok_or_else(|| VmError::Internal("no active frame".to_string()))
    }

    fn frame_mut(&mut self) -> Result<&mut CallFrame> {
        self.frames
            .last_mut()
            .ok_or_else(|| VmError::Internal("no active frame".to_string()))
    }

    fn read_op(&mut self) -> Result<OpCode> {
        let frame = self.frame_mut()?;
        let op = frame
            .chunk
            .code
            .get(frame.ip)
            .copied()
            .ok_or_else(|| VmError::Internal("instruction pointer out of bounds".to_string()))?;
        frame.ip += 1;
        Ok(op)
    }

    fn read_constant(&self, index: u8) -> Result<Value> {
        self.frame()?
            .chunk
            .constants
            .get(index as usize)
            .copied()
            .ok_or_else(|| VmError::Internal("constant index out of bounds".to_string()))
    }

    /// Read a constant that must be an interned name.
    fn read_string(&self, index: u8) -> Result<ObjRef> {
        match self.read_constant(index)? {
            Value::Obj(r) if matches!(self.heap.obj(r), Obj::String(_)) => Ok(r),
            _ => Err(VmError::Internal(
                "name constant is not a string".to_string(),
            )),
        }
    }

    fn closure_upvalue(&self, index: u8) -> Result<ObjRef> {
        let closure = self.frame()?.closure;
        self.heap
            .closure(closure)
            .upvalues
            .get(index as usize)
            .copied()
            .ok_or_else(|| VmError::Internal("upvalue index out of bounds".to_string()))
    }

    /// Pop a value that the compiler guarantees is a class (`super`).
    fn pop_class(&mut self) -> Result<ObjRef> {
        match self.stack.pop()?.as_obj() {
            Some(r) if matches!(self.heap.obj(r), Obj::Class(_)) => Ok(r),
            _ => Err(VmError::Internal("expected a class value".to_string())),
        }
    }

    // =========================================================================
    // Operators
    // =========================================================================

    fn binary_number_op(&mut self, op: fn(f64, f64) -> Value) -> Result<()> {
        let b = self.stack.peek(0)?;
        let a = self.stack.peek(1)?;
        match (a, b) {
            (Value::Number(a), Value::Number(b)) => {
                self.stack.pop()?;
                self.stack.pop()?;
                self.stack.push(op(a, b));
                Ok(())
            }
            _ => Err(VmError::OperandsMustBeNumbers),
        }
    }

    /// `+`: numeric addition or string concatenation. The operands stay on
    /// the stack across the interning allocation so a collection cannot
    /// free them.
    fn add(&mut self) -> Result<()> {
        let b = self.stack.peek(0)?;
        let a = self.stack.peek(1)?;
        match (a, b) {
            (Value::Number(a), Value::Number(b)) => {
                self.stack.pop()?;
                self.stack.pop()?;
                self.stack.push(Value::Number(a + b));
                Ok(())
            }
            (Value::Obj(a), Value::Obj(b))
                if matches!(self.heap.obj(a), Obj::String(_))
                    && matches!(self.heap.obj(b), Obj::String(_)) =>
            {
                let mut concatenated =
                    String::with_capacity(self.heap.string(a).chars.len()
                        + self.heap.string(b).chars.len());
                concatenated.push_str(&self.heap.string(a).chars);
                concatenated.push_str(&self.heap.string(b).chars);
                let result = self.intern(&concatenated);
                self.stack.pop()?;
                self.stack.pop()?;
                self.stack.push(Value::Obj(result));
                Ok(())
            }
            _ => Err(VmError::OperandsMustBeNumbersOrStrings),
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Dispatch a call on the value at stack depth `argc`.
    fn call_value(&mut self, argc: usize) -> Result<()> {
        enum Callee {
            Closure(ObjRef),
            Native(Option<u8>, NativeFn),
            Class(ObjRef),
            Bound(Value, ObjRef),
        }

        let callee_index = self
            .stack
            .len()
            .checked_sub(argc + 1)
            .ok_or(VmError::StackUnderflow)?;
        let callee = self.stack.get(callee_index)?;
        let Some(r) = callee.as_obj() else {
            return Err(VmError::NotCallable);
        };

        let callee = match self.heap.obj(r) {
            Obj::Closure(_) => Callee::Closure(r),
            Obj::Native(native) => Callee::Native(native.arity, native.function),
            Obj::Class(_) => Callee::Class(r),
            Obj::BoundMethod(bound) => Callee::Bound(bound.receiver, bound.method),
            _ => return Err(VmError::NotCallable),
        };

        match callee {
            Callee::Closure(closure) => self.call_closure(closure, argc),
            Callee::Native(arity, function) => {
                if let Some(expected) = arity
                    && expected as usize != argc
                {
                    return Err(VmError::Arity {
                        expected: expected as usize,
                        got: argc,
                    });
                }
                let args_start = self.stack.len() - argc;
                let result = function(&self.stack.as_slice()[args_start..]);
                self.stack.truncate(callee_index);
                self.stack.push(result);
                Ok(())
            }
            Callee::Class(class) => {
                // The instance takes the callee slot; `init` (if any) then
                // runs as a method on it.
                let instance = self.alloc(Obj::Instance(Instance {
                    class,
                    fields: Table::new(),
                }));
                self.stack.set(callee_index, Value::Obj(instance))?;

                let init_hash = self.heap.string(self.init_string).hash;
                let initializer = self
                    .heap
                    .class(class)
                    .methods
                    .get(self.init_string, init_hash);
                match initializer {
                    Some(Value::Obj(init)) => self.call_closure(init, argc),
                    Some(_) => Err(VmError::Internal(
                        "initializer is not a closure".to_string(),
                    )),
                    None if argc != 0 => Err(VmError::Arity {
                        expected: 0,
                        got: argc,
                    }),
                    None => Ok(()),
                }
            }
            Callee::Bound(receiver, method) => {
                // Slot 0 of the method's frame is the receiver.
                self.stack.set(callee_index, receiver)?;
                self.call_closure(method, argc)
            }
        }
    }

    fn call_closure(&mut self, closure: ObjRef, argc: usize) -> Result<()> {
        let function = self.heap.closure(closure).function;
        let (arity, chunk) = {
            let f = self.heap.function(function);
            (f.arity as usize, f.chunk.clone())
        };
        if argc != arity {
            return Err(VmError::Arity {
                expected: arity,
                got: argc,
            });
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(VmError::StackOverflow);
        }
        let base = self.stack.len() - argc - 1;
        self.frames.push(CallFrame::new(closure, chunk, base));
        Ok(())
    }

    /// `Invoke` fast path: fields shadow methods; a method hit calls the
    /// closure directly without allocating a bound method.
    fn invoke(&mut self, name: ObjRef, argc: usize) -> Result<()> {
        let receiver = self.stack.peek(argc)?;
        let instance = match receiver.as_obj() {
            Some(r) if matches!(self.heap.obj(r), Obj::Instance(_)) => r,
            _ => return Err(VmError::NoMethods),
        };

        let hash = self.heap.string(name).hash;
        let (class, field) = {
            let instance = self.heap.instance(instance);
            (instance.class, instance.fields.get(name, hash))
        };
        if let Some(value) = field {
            let callee_index = self.stack.len() - argc - 1;
            self.stack.set(callee_index, value)?;
            return self.call_value(argc);
        }
        self.invoke_from_class(class, name, argc)
    }

    fn invoke_from_class(&mut self, class: ObjRef, name: ObjRef, argc: usize) -> Result<()> {
        let hash = self.heap.string(name).hash;
        match self.heap.class(class).methods.get(name, hash) {
            Some(Value::Obj(method)) => self.call_closure(method, argc),
            Some(_) => Err(VmError::Internal(
                "method table holds a non-closure".to_string(),
            )),
            None => Err(VmError::UndefinedProperty(
                self.heap.string(name).chars.to_string(),
            )),
        }
    }

    /// Look up a method on `class` and replace the receiver at the stack
    /// top with a bound method for it.
    fn bind_method(&mut self, class: ObjRef, name: ObjRef) -> Result<()> {
        let hash = self.heap.string(name).hash;
        let method = match self.heap.class(class).methods.get(name, hash) {
            Some(Value::Obj(method)) => method,
            Some(_) => {
                return Err(VmError::Internal(
                    "method table holds a non-closure".to_string(),
                ));
            }
            None => {
                return Err(VmError::UndefinedProperty(
                    self.heap.string(name).chars.to_string(),
                ));
            }
        };
        let receiver = self.stack.peek(0)?;
        let bound = self.alloc(Obj::BoundMethod(BoundMethod { receiver, method }));
        self.stack.pop()?;
        self.stack.push(Value::Obj(bound));
        Ok(())
    }

    // =========================================================================
    // Closures & upvalues
    // =========================================================================

    /// Build a closure for `function`, consuming the capture directives
    /// that follow the `Closure` instruction.
    fn make_closure(&mut self, function: ObjRef) -> Result<()> {
        let upvalue_count = self.heap.function(function).upvalue_count;
        let closure = self.alloc(Obj::Closure(Closure {
            function,
            upvalues: Vec::with_capacity(upvalue_count),
        }));
        // On the stack before any capture allocates.
        self.stack.push(Value::Obj(closure));

        for _ in 0..upvalue_count {
            let directive = self.read_op()?;
            let upvalue = match directive {
                OpCode::CaptureLocal(slot) => {
                    let base = self.frame()?.base;
                    self.capture_upvalue(base + slot as usize)?
                }
                OpCode::CaptureUpvalue(index) => self.closure_upvalue(index)?,
                other => {
                    return Err(VmError::Internal(format!(
                        "expected capture directive, got {:?}",
                        other
                    )));
                }
            };
            self.heap.closure_mut(closure).upvalues.push(upvalue);
        }
        Ok(())
    }

    /// Return the open upvalue for a stack slot, creating and linking it
    /// if none exists. The list stays sorted by descending slot and holds
    /// at most one upvalue per slot.
    fn capture_upvalue(&mut self, slot: usize) -> Result<ObjRef> {
        let mut prev = None;
        let mut current = self.open_upvalues;
        while let Some(r) = current {
            let upvalue = self.heap.upvalue(r);
            match upvalue.state {
                UpvalueState::Open(s) if s > slot => {
                    prev = Some(r);
                    current = upvalue.next;
                }
                _ => break,
            }
        }

        if let Some(r) = current
            && let UpvalueState::Open(s) = self.heap.upvalue(r).state
            && s == slot
        {
            return Ok(r);
        }

        let created = self.alloc(Obj::Upvalue(Upvalue {
            state: UpvalueState::Open(slot),
            next: current,
        }));
        match prev {
            None => self.open_upvalues = Some(created),
            Some(prev) => self.heap.upvalue_mut(prev).next = Some(created),
        }
        Ok(created)
    }

    /// Close every open upvalue at or above `last`: move the value off the
    /// stack into the upvalue's owned cell and unlink it.
    fn close_upvalues(&mut self, last: usize) -> Result<()> {
        while let Some(r) = self.open_upvalues {
            let (slot, next) = match self.heap.upvalue(r) {
                Upvalue {
                    state: UpvalueState::Open(slot),
                    next,
                } => (*slot, *next),
                _ => {
                    return Err(VmError::Internal(
                        "closed upvalue on the open list".to_string(),
                    ));
                }
            };
            if slot < last {
                break;
            }
            let value = self.stack.get(slot)?;
            let upvalue = self.heap.upvalue_mut(r);
            upvalue.state = UpvalueState::Closed(value);
            upvalue.next = None;
            self.open_upvalues = next;
        }
        Ok(())
    }

    // =========================================================================
    // Allocation & collection
    // =========================================================================

    /// Allocate through a collection safepoint: all live references are
    /// reachable from the VM roots here.
    fn alloc(&mut self, obj: Obj) -> ObjRef {
        self.maybe_collect();
        self.heap.alloc(obj)
    }

    /// Intern through a collection safepoint.
    fn intern(&mut self, s: &str) -> ObjRef {
        self.maybe_collect();
        self.heap.intern(s)
    }

    fn maybe_collect(&mut self) {
        if !self.heap.should_collect() {
            return;
        }
        self.heap.collect(Roots {
            stack: self.stack.as_slice(),
            frames: &self.frames,
            open_upvalues: self.open_upvalues,
            globals: &self.globals,
            init_string: Some(self.init_string),
        });
    }

    // =========================================================================
    // Error unwinding
    // =========================================================================

    fn stack_trace(&self) -> Vec<TraceFrame> {
        self.frames
            .iter()
            .rev()
            .map(|frame| {
                let function = self.heap.closure(frame.closure).function;
                let name = self
                    .heap
                    .function(function)
                    .name
                    .map(|n| self.heap.string(n).chars.to_string());
                TraceFrame {
                    line: frame.current_line(),
                    function: name,
                }
            })
            .collect()
    }

    /// Clear all execution state after a runtime error. The heap, globals,
    /// and interned strings survive for the next run.
    fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues = None;
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
