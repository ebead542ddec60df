// lox-vm - Bytecode compiler and virtual machine for the Lox programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Single-pass bytecode compiler.
//!
//! A Pratt parser that consumes tokens and emits bytecode directly into
//! the current function's chunk; there is no AST. Variable resolution,
//! emission, and scope management interleave. Nested function declarations
//! push a fresh compilation context onto an explicit stack.

pub mod types;

use std::rc::Rc;

use lox_syntax::{Scanner, Token, TokenKind};

use crate::OpCode;
use crate::heap::Heap;
use crate::object::{Function, Obj, ObjRef};
use crate::value::Value;

pub use types::CompileError;
use types::{ClassContext, ErrorLocation, FunctionContext, FunctionKind, Local, UpvalueInfo};

/// Maximum locals per function, including the reserved slot 0.
const MAX_LOCALS: usize = 256;

/// Maximum captured variables per function.
const MAX_UPVALUES: usize = 256;

/// Compile a source string into the top-level script function.
///
/// On failure returns every error reported during the run; no code from a
/// failed compilation is ever executed.
pub fn compile(source: &str, heap: &mut Heap) -> Result<ObjRef, Vec<CompileError>> {
    let mut compiler = Compiler::new(source, heap);
    compiler.advance();
    while !compiler.matches(TokenKind::Eof) {
        compiler.declaration();
    }
    let (function, _) = compiler.end_compiler();
    if compiler.had_error {
        Err(compiler.errors)
    } else {
        Ok(function)
    }
}

/// Expression precedence, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    /// One level tighter; used for left-associative binary operators.
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn<'src, 'h> = fn(&mut Compiler<'src, 'h>, bool);

/// A row of the Pratt table: what to do when a token starts an expression,
/// what to do when it appears as an infix operator, and how tightly the
/// infix form binds.
struct ParseRule<'src, 'h> {
    prefix: Option<ParseFn<'src, 'h>>,
    infix: Option<ParseFn<'src, 'h>>,
    precedence: Precedence,
}

impl<'src, 'h> ParseRule<'src, 'h> {
    fn new(
        prefix: Option<ParseFn<'src, 'h>>,
        infix: Option<ParseFn<'src, 'h>>,
        precedence: Precedence,
    ) -> Self {
        Self {
            prefix,
            infix,
            precedence,
        }
    }

    fn none() -> Self {
        Self::new(None, None, Precedence::None)
    }
}

fn rule_for<'src, 'h>(kind: TokenKind) -> ParseRule<'src, 'h> {
    use TokenKind::*;
    match kind {
        LeftParen => ParseRule::new(
            Some(Compiler::grouping),
            Some(Compiler::call),
            Precedence::Call,
        ),
        Dot => ParseRule::new(None, Some(Compiler::dot), Precedence::Call),
        Minus => ParseRule::new(
            Some(Compiler::unary),
            Some(Compiler::binary),
            Precedence::Term,
        ),
        Plus => ParseRule::new(None, Some(Compiler::binary), Precedence::Term),
        Slash | Star => ParseRule::new(None, Some(Compiler::binary), Precedence::Factor),
        Bang => ParseRule::new(Some(Compiler::unary), None, Precedence::None),
        BangEqual | EqualEqual => {
            ParseRule::new(None, Some(Compiler::binary), Precedence::Equality)
        }
        Greater | GreaterEqual | Less | LessEqual => {
            ParseRule::new(None, Some(Compiler::binary), Precedence::Comparison)
        }
        Identifier => ParseRule::new(Some(Compiler::variable), None, Precedence::None),
        String => ParseRule::new(Some(Compiler::string), None, Precedence::None),
        Number => ParseRule::new(Some(Compiler::number), None, Precedence::None),
        And => ParseRule::new(None, Some(Compiler::and_), Precedence::And),
        Or => ParseRule::new(None, Some(Compiler::or_), Precedence::Or),
        False | Nil | True => ParseRule::new(Some(Compiler::literal), None, Precedence::None),
        Super => ParseRule::new(Some(Compiler::super_), None, Precedence::None),
        This => ParseRule::new(Some(Compiler::this_), None, Precedence::None),
        _ => ParseRule::none(),
    }
}

/// The compiler: parser state plus the stack of function and class
/// compilation contexts.
struct Compiler<'src, 'h> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,

    heap: &'h mut Heap,
    contexts: Vec<FunctionContext<'src>>,
    classes: Vec<ClassContext>,
}

impl<'src, 'h> Compiler<'src, 'h> {
    fn new(source: &'src str, heap: &'h mut Heap) -> Self {
        let placeholder = Token::new(TokenKind::Eof, "", 1);
        Self {
            scanner: Scanner::new(source),
            current: placeholder,
            previous: placeholder,
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
            heap,
            contexts: vec![FunctionContext::new(FunctionKind::Script, None)],
            classes: Vec::new(),
        }
    }

    // =========================================================================
    // Token plumbing
    // =========================================================================

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme.to_string();
            self.error_at_current(&message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    // =========================================================================
    // Error reporting
    // =========================================================================

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        // Panic mode suppresses cascades until the next statement boundary.
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let location = match token.kind {
            TokenKind::Eof => ErrorLocation::AtEnd,
            TokenKind::Error => ErrorLocation::Plain,
            _ => ErrorLocation::At(token.lexeme.to_string()),
        };
        self.errors.push(CompileError {
            line: token.line,
            location,
            message: message.to_string(),
        });
    }

    /// Discard tokens until a statement boundary, then resume reporting.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // =========================================================================
    // Emission helpers
    // =========================================================================

    fn ctx(&self) -> &FunctionContext<'src> {
        self.contexts.last().expect("no compiler context")
    }

    fn ctx_mut(&mut self) -> &mut FunctionContext<'src> {
        self.contexts.last_mut().expect("no compiler context")
    }

    fn emit(&mut self, op: OpCode) {
        let line = self.previous.line;
        self.ctx_mut().chunk.emit(op, line);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        match self.ctx_mut().chunk.add_constant(value) {
            Some(index) => index,
            None => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit(OpCode::Constant(index));
    }

    /// Emit a forward jump with a placeholder operand; returns its offset
    /// for patching.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        let offset = self.ctx().chunk.current_offset();
        self.emit(op);
        offset
    }

    fn patch_jump(&mut self, offset: usize) {
        if !self.ctx_mut().chunk.patch_jump(offset) {
            self.error("Too much code to jump over.");
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        // +1: the ip has advanced past the Loop instruction when it executes.
        let offset = self.ctx().chunk.current_offset() - loop_start + 1;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
            return;
        }
        self.emit(OpCode::Loop(offset as u16));
    }

    fn emit_return(&mut self) {
        if self.ctx().kind == FunctionKind::Initializer {
            // An initializer's implicit return yields the receiver.
            self.emit(OpCode::GetLocal(0));
        } else {
            self.emit(OpCode::Nil);
        }
        self.emit(OpCode::Return);
    }

    /// Finish the current context: emit the implicit return and allocate
    /// the finished function. Returns the function and its upvalue layout.
    fn end_compiler(&mut self) -> (ObjRef, Vec<UpvalueInfo>) {
        self.emit_return();
        let context = self.contexts.pop().expect("no compiler context");
        let FunctionContext {
            arity,
            chunk,
            name,
            upvalues,
            ..
        } = context;
        let function = Function {
            arity,
            upvalue_count: upvalues.len(),
            chunk: Rc::new(chunk),
            name,
        };
        (self.heap.alloc(Obj::Function(function)), upvalues)
    }

    // =========================================================================
    // Scopes and variable resolution
    // =========================================================================

    fn begin_scope(&mut self) {
        self.ctx_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let ctx = self.ctx_mut();
        ctx.scope_depth -= 1;
        let depth = ctx.scope_depth;
        let mut ops = Vec::new();
        while let Some(local) = ctx.locals.last() {
            if local.depth.is_some_and(|d| d <= depth) {
                break;
            }
            // Captured locals move to the heap instead of vanishing.
            ops.push(if local.is_captured {
                OpCode::CloseUpvalue
            } else {
                OpCode::Pop
            });
            ctx.locals.pop();
        }
        for op in ops {
            self.emit(op);
        }
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let r = self.heap.intern(name);
        self.make_constant(Value::Obj(r))
    }

    fn add_local(&mut self, name: &'src str) {
        if self.ctx().locals.len() == MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.ctx_mut().locals.push(Local {
            name,
            depth: None,
            is_captured: false,
        });
    }

    /// Record a local declaration. Globals are late-bound and need nothing
    /// here.
    fn declare_variable(&mut self) {
        let scope_depth = self.ctx().scope_depth;
        if scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme;
        let mut duplicate = false;
        for local in self.ctx().locals.iter().rev() {
            if local.depth.is_some_and(|d| d < scope_depth) {
                break;
            }
            if local.name == name {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.ctx().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(self.previous.lexeme)
    }

    fn mark_initialized(&mut self) {
        let depth = self.ctx().scope_depth;
        if depth == 0 {
            return;
        }
        if let Some(local) = self.ctx_mut().locals.last_mut() {
            local.depth = Some(depth);
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.ctx().scope_depth > 0 {
            // A local's value is already in its stack slot; just make the
            // name usable.
            self.mark_initialized();
            return;
        }
        self.emit(OpCode::DefineGlobal(global));
    }

    /// Find `name` among a context's locals, innermost first.
    fn resolve_local(&mut self, context: usize, name: &str) -> Option<u8> {
        let mut uninitialized = false;
        let mut found = None;
        for (slot, local) in self.contexts[context].locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth.is_none() {
                    uninitialized = true;
                }
                found = Some(slot as u8);
                break;
            }
        }
        if uninitialized {
            self.error("Can't read local variable in its own initializer.");
        }
        found
    }

    /// Find `name` in an enclosing function, creating the chain of upvalue
    /// entries through every intermediate context.
    fn resolve_upvalue(&mut self, context: usize, name: &str) -> Option<u8> {
        if context == 0 {
            return None;
        }
        if let Some(local) = self.resolve_local(context - 1, name) {
            self.contexts[context - 1].locals[local as usize].is_captured = true;
            return Some(self.add_upvalue(context, local, true));
        }
        if let Some(upvalue) = self.resolve_upvalue(context - 1, name) {
            return Some(self.add_upvalue(context, upvalue, false));
        }
        None
    }

    fn add_upvalue(&mut self, context: usize, index: u8, is_local: bool) -> u8 {
        for (i, upvalue) in self.contexts[context].upvalues.iter().enumerate() {
            if upvalue.index == index && upvalue.is_local == is_local {
                return i as u8;
            }
        }
        if self.contexts[context].upvalues.len() == MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }
        self.contexts[context]
            .upvalues
            .push(UpvalueInfo { index, is_local });
        (self.contexts[context].upvalues.len() - 1) as u8
    }

    /// Compile a variable load or (when allowed) store, resolving to a
    /// local slot, an upvalue index, or a late-bound global name.
    fn named_variable(&mut self, name: &'src str, can_assign: bool) {
        let top = self.contexts.len() - 1;
        let (get_op, set_op) = if let Some(slot) = self.resolve_local(top, name) {
            (OpCode::GetLocal(slot), OpCode::SetLocal(slot))
        } else if let Some(index) = self.resolve_upvalue(top, name) {
            (OpCode::GetUpvalue(index), OpCode::SetUpvalue(index))
        } else {
            let constant = self.identifier_constant(name);
            (OpCode::GetGlobal(constant), OpCode::SetGlobal(constant))
        };

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit(set_op);
        } else {
            self.emit(get_op);
        }
    }

    // =========================================================================
    // Expressions (Pratt handlers)
    // =========================================================================

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    /// Parse everything at or above the given precedence.
    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = rule_for(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= rule_for(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = rule_for(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        // An `=` nobody consumed means the target wasn't assignable.
        if can_assign && self.matches(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self, _can_assign: bool) {
        match self.previous.lexeme.parse::<f64>() {
            Ok(n) => self.emit_constant(Value::Number(n)),
            Err(_) => self.error("Invalid number literal."),
        }
    }

    fn string(&mut self, _can_assign: bool) {
        // Trim the surrounding quotes.
        let lexeme = self.previous.lexeme;
        let r = self.heap.intern(&lexeme[1..lexeme.len() - 1]);
        self.emit_constant(Value::Obj(r));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::Nil => self.emit(OpCode::Nil),
            TokenKind::True => self.emit(OpCode::True),
            TokenKind::False => self.emit(OpCode::False),
            _ => {}
        }
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous.lexeme, can_assign);
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Bang => self.emit(OpCode::Not),
            TokenKind::Minus => self.emit(OpCode::Negate),
            _ => {}
        }
    }

    /// The left operand and the operator are already consumed.
    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        let rule = rule_for(operator);
        self.parse_precedence(rule.precedence.next());

        match operator {
            TokenKind::BangEqual => {
                self.emit(OpCode::Equal);
                self.emit(OpCode::Not);
            }
            TokenKind::EqualEqual => self.emit(OpCode::Equal),
            TokenKind::Greater => self.emit(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit(OpCode::Less);
                self.emit(OpCode::Not);
            }
            TokenKind::Less => self.emit(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit(OpCode::Greater);
                self.emit(OpCode::Not);
            }
            TokenKind::Plus => self.emit(OpCode::Add),
            TokenKind::Minus => self.emit(OpCode::Subtract),
            TokenKind::Star => self.emit(OpCode::Multiply),
            TokenKind::Slash => self.emit(OpCode::Divide),
            _ => {}
        }
    }

    /// `and` short-circuits: the right operand only runs when the left is
    /// truthy, and the result is whichever operand ended the evaluation.
    fn and_(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse(0));
        self.emit(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse(0));
        let end_jump = self.emit_jump(OpCode::Jump(0));
        self.patch_jump(else_jump);
        self.emit(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self, _can_assign: bool) {
        let argc = self.argument_list();
        self.emit(OpCode::Call(argc));
    }

    /// Property access, assignment, or the method-invocation fast path.
    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant(self.previous.lexeme);

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit(OpCode::SetProperty(name));
        } else if self.matches(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.emit(OpCode::Invoke(name, argc));
        } else {
            self.emit(OpCode::GetProperty(name));
        }
    }

    fn this_(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.variable(false);
    }

    fn super_(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("Can't use 'super' outside of a class.");
        } else if let Some(class) = self.classes.last()
            && !class.has_superclass
        {
            self.error("Can't use 'super' in a class with no superclass.");
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name = self.identifier_constant(self.previous.lexeme);

        self.named_variable("this", false);
        if self.matches(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.named_variable("super", false);
            self.emit(OpCode::SuperInvoke(name, argc));
        } else {
            self.named_variable("super", false);
            self.emit(OpCode::GetSuper(name));
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u8 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == u8::MAX {
                    self.error("Can't have more than 255 arguments.");
                } else {
                    count += 1;
                }
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count
    }

    // =========================================================================
    // Declarations & statements
    // =========================================================================

    fn declaration(&mut self) {
        if self.matches(TokenKind::Class) {
            self.class_declaration();
        } else if self.matches(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");

        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit(OpCode::Nil);
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // A function may refer to itself; its name is usable inside its
        // own body.
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    /// Compile a function body in a fresh context, then emit the closure
    /// construction with one capture directive per upvalue.
    fn function(&mut self, kind: FunctionKind) {
        let name = self.heap.intern(self.previous.lexeme);
        self.contexts.push(FunctionContext::new(kind, Some(name)));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.ctx().arity == u8::MAX {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.ctx_mut().arity += 1;
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        // No end_scope: the whole context goes away with the frame.
        let (function, upvalues) = self.end_compiler();
        let constant = self.make_constant(Value::Obj(function));
        self.emit(OpCode::Closure(constant));
        for upvalue in upvalues {
            self.emit(if upvalue.is_local {
                OpCode::CaptureLocal(upvalue.index)
            } else {
                OpCode::CaptureUpvalue(upvalue.index)
            });
        }
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let constant = self.identifier_constant(self.previous.lexeme);

        let kind = if self.previous.lexeme == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind);
        self.emit(OpCode::Method(constant));
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous;
        let name_constant = self.identifier_constant(class_name.lexeme);
        self.declare_variable();

        self.emit(OpCode::Class(name_constant));
        self.define_variable(name_constant);

        self.classes.push(ClassContext {
            has_superclass: false,
        });

        if self.matches(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            self.variable(false);
            if class_name.lexeme == self.previous.lexeme {
                self.error("A class can't inherit from itself.");
            }

            // The superclass lives in a scoped local named `super`, so
            // methods capture it like any other variable.
            self.begin_scope();
            self.add_local("super");
            self.define_variable(0);

            self.named_variable(class_name.lexeme, false);
            self.emit(OpCode::Inherit);
            if let Some(class) = self.classes.last_mut() {
                class.has_superclass = true;
            }
        }

        // Keep the class on the stack while methods are installed.
        self.named_variable(class_name.lexeme, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit(OpCode::Pop);

        let has_superclass = self
            .classes
            .last()
            .is_some_and(|class| class.has_superclass);
        if has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit(OpCode::Pop);
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit(OpCode::Print);
    }

    fn return_statement(&mut self) {
        if self.ctx().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }

        if self.matches(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.ctx().kind == FunctionKind::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit(OpCode::Return);
        }
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse(0));
        self.emit(OpCode::Pop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::Jump(0));

        self.patch_jump(then_jump);
        self.emit(OpCode::Pop);
        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.ctx().chunk.current_offset();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse(0));
        self.emit(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit(OpCode::Pop);
    }

    /// `for (init; cond; incr) body` desugars to a scoped while loop. When
    /// an increment clause exists the body jumps back to it, and the
    /// increment loops back to the condition.
    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.matches(TokenKind::Semicolon) {
            // No initializer.
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.ctx().chunk.current_offset();
        let mut exit_jump = None;
        if !self.matches(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");

            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse(0)));
            self.emit(OpCode::Pop);
        }

        if !self.matches(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump(0));
            let increment_start = self.ctx().chunk.current_offset();
            self.expression();
            self.emit(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        // The condition left a value on the stack only if it exists.
        if let Some(exit) = exit_jump {
            self.patch_jump(exit);
            self.emit(OpCode::Pop);
        }
        self.end_scope();
    }
}
