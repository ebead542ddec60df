// lox-vm - Bytecode compiler and virtual machine for the Lox programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Bytecode compiler and stack-based virtual machine for Lox.
//!
//! Source is compiled in a single pass into stack-oriented bytecode, then
//! executed by a stack VM with closures, classes with single inheritance,
//! and a precise mark-and-sweep garbage collector.

pub mod chunk;
pub mod compiler;
pub mod debug;
pub mod heap;
pub mod natives;
pub mod object;
pub mod opcode;
pub mod table;
pub mod value;
pub mod vm;

pub use chunk::Chunk;
pub use compiler::{CompileError, compile};
pub use opcode::OpCode;
pub use value::Value;
pub use vm::{InterpretError, RuntimeError, Vm, VmError};
