// lox-vm - Bytecode compiler and virtual machine for the Lox programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Shared types for the bytecode compiler.

use std::fmt;

use crate::chunk::Chunk;
use crate::object::ObjRef;

/// Error reported during compilation.
///
/// Errors accumulate under panic-mode suppression; compilation always runs
/// to the end of the source and returns every error it reported.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub line: u32,
    pub location: ErrorLocation,
    pub message: String,
}

/// Where in the token stream an error was reported.
#[derive(Debug, Clone)]
pub enum ErrorLocation {
    /// At a real token; holds its lexeme.
    At(String),
    /// At the end of the source.
    AtEnd,
    /// At a scanner error token, which has no lexeme of its own.
    Plain,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            ErrorLocation::At(lexeme) => {
                write!(
                    f,
                    "[line {}] Error at '{}': {}",
                    self.line, lexeme, self.message
                )
            }
            ErrorLocation::AtEnd => {
                write!(f, "[line {}] Error at end: {}", self.line, self.message)
            }
            ErrorLocation::Plain => {
                write!(f, "[line {}] Error: {}", self.line, self.message)
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// What kind of function body a compilation context is building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// The implicit top-level function wrapping a script.
    Script,
    Function,
    Method,
    /// A method named `init`; returns its receiver.
    Initializer,
}

/// A local variable during compilation.
#[derive(Debug, Clone, Copy)]
pub struct Local<'src> {
    pub name: &'src str,
    /// Scope depth once defined; `None` between declaration and the end of
    /// the initializer expression.
    pub depth: Option<u32>,
    /// Set when a nested function captures this local, so scope exit closes
    /// it instead of popping.
    pub is_captured: bool,
}

/// A captured variable recorded while compiling a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueInfo {
    /// Slot in the enclosing function's locals (`is_local`) or index into
    /// the enclosing function's upvalues.
    pub index: u8,
    pub is_local: bool,
}

/// Per-function compilation state.
///
/// Nested function declarations push a new context; the stack of contexts
/// is the chain clox threads through `enclosing` pointers.
#[derive(Debug)]
pub struct FunctionContext<'src> {
    pub kind: FunctionKind,
    pub name: Option<ObjRef>,
    pub arity: u8,
    pub chunk: Chunk,
    pub locals: Vec<Local<'src>>,
    pub upvalues: Vec<UpvalueInfo>,
    pub scope_depth: u32,
}

impl<'src> FunctionContext<'src> {
    /// Create a context with slot 0 reserved: methods and initializers name
    /// it `this`; plain functions reserve it under an unnameable identifier.
    pub fn new(kind: FunctionKind, name: Option<ObjRef>) -> Self {
        let slot_zero = Local {
            name: match kind {
                FunctionKind::Method | FunctionKind::Initializer => "this",
                _ => "",
            },
            depth: Some(0),
            is_captured: false,
        };
        Self {
            kind,
            name,
            arity: 0,
            chunk: Chunk::new(),
            locals: vec![slot_zero],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

/// Per-class compilation state.
#[derive(Debug, Clone, Copy)]
pub struct ClassContext {
    pub has_superclass: bool,
}
