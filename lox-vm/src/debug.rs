// lox-vm - Bytecode compiler and virtual machine for the Lox programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Bytecode disassembler, used when tracing is enabled.

use crate::OpCode;
use crate::chunk::Chunk;
use crate::heap::Heap;
use crate::object::ObjRef;
use crate::value::Value;

/// Disassemble a whole function to stderr, then recurse into any nested
/// functions in its constant pool.
pub fn disassemble_function(heap: &Heap, function: ObjRef) {
    let f = heap.function(function);
    let name = match f.name {
        Some(name) => heap.string(name).chars.to_string(),
        None => "<script>".to_string(),
    };
    disassemble_chunk(heap, &f.chunk, &name);

    for constant in &f.chunk.constants {
        if let Value::Obj(r) = constant
            && matches!(heap.obj(*r), crate::object::Obj::Function(_))
        {
            disassemble_function(heap, *r);
        }
    }
}

/// Disassemble a chunk to stderr under a banner.
pub fn disassemble_chunk(heap: &Heap, chunk: &Chunk, name: &str) {
    eprintln!("== {} ==", name);
    for offset in 0..chunk.code.len() {
        disassemble_instruction(heap, chunk, offset);
    }
}

/// Disassemble one instruction to stderr.
pub fn disassemble_instruction(heap: &Heap, chunk: &Chunk, offset: usize) {
    let line = chunk.line(offset);
    if offset > 0 && line == chunk.line(offset - 1) {
        eprint!("{:04}    | ", offset);
    } else {
        eprint!("{:04} {:4} ", offset, line);
    }

    let op = chunk.code[offset];
    let mnemonic = op.mnemonic();
    match op {
        OpCode::Constant(idx)
        | OpCode::GetGlobal(idx)
        | OpCode::DefineGlobal(idx)
        | OpCode::SetGlobal(idx)
        | OpCode::GetProperty(idx)
        | OpCode::SetProperty(idx)
        | OpCode::GetSuper(idx)
        | OpCode::Class(idx)
        | OpCode::Method(idx)
        | OpCode::Closure(idx) => {
            eprintln!(
                "{:<16} {:4} '{}'",
                mnemonic,
                idx,
                constant_repr(heap, chunk, idx)
            );
        }
        OpCode::GetLocal(slot)
        | OpCode::SetLocal(slot)
        | OpCode::GetUpvalue(slot)
        | OpCode::SetUpvalue(slot)
        | OpCode::CaptureLocal(slot)
        | OpCode::CaptureUpvalue(slot)
        | OpCode::Call(slot) => {
            eprintln!("{:<16} {:4}", mnemonic, slot);
        }
        OpCode::Invoke(idx, argc) | OpCode::SuperInvoke(idx, argc) => {
            eprintln!(
                "{:<16} ({} args) {:4} '{}'",
                mnemonic,
                argc,
                idx,
                constant_repr(heap, chunk, idx)
            );
        }
        OpCode::Jump(target) | OpCode::JumpIfFalse(target) => {
            eprintln!(
                "{:<16} {:4} -> {}",
                mnemonic,
                offset,
                offset + 1 + target as usize
            );
        }
        OpCode::Loop(target) => {
            eprintln!(
                "{:<16} {:4} -> {}",
                mnemonic,
                offset,
                offset + 1 - target as usize
            );
        }
        _ => eprintln!("{}", mnemonic),
    }
}

fn constant_repr(heap: &Heap, chunk: &Chunk, idx: u8) -> String {
    match chunk.constants.get(idx as usize) {
        Some(value) => heap.value_to_string(*value),
        None => "<bad constant>".to_string(),
    }
}
