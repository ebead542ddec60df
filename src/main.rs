// lox - A Lox bytecode interpreter written in Rust
// Copyright (c) 2025 Tom Waddington. MIT licensed.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::process;

use lox_vm::{InterpretError, Vm};

fn main() {
    let args: Vec<String> = env::args().collect();

    // Handle --version flag
    if args.len() == 2 && (args[1] == "--version" || args[1] == "-v") {
        println!("Lox v0.1.0");
        return;
    }

    let mut vm = Vm::new();
    if env::var_os("LOX_STRESS_GC").is_some() {
        vm.set_stress_gc(true);
    }
    if env::var_os("LOX_TRACE").is_some() {
        vm.set_trace(true);
    }

    match args.len() {
        1 => run_repl(&mut vm),
        2 => run_file(&args[1], &mut vm),
        _ => {
            eprintln!("Usage: lox [path]");
            process::exit(64);
        }
    }
}

/// Compile and execute a source file, then exit.
fn run_file(path: &str, vm: &mut Vm) {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error reading '{}': {}", path, e);
            process::exit(74);
        }
    };

    match vm.interpret(&source, &mut io::stdout()) {
        Ok(()) => {}
        Err(e @ InterpretError::Compile(_)) => {
            eprintln!("{}", e);
            process::exit(65);
        }
        Err(e @ InterpretError::Runtime(_)) => {
            eprintln!("{}", e);
            process::exit(70);
        }
    }
}

/// Run the interactive prompt.
///
/// Each line compiles and runs as a fresh top-level script; globals, the
/// heap, and interned strings persist across lines, and errors leave the
/// session running.
fn run_repl(vm: &mut Vm) {
    println!("Lox v0.1.0");

    loop {
        print!("> ");
        if io::stdout().flush().is_err() {
            break;
        }

        let mut input = String::new();
        match io::stdin().read_line(&mut input) {
            Ok(0) => {
                println!();
                break;
            }
            Ok(_) => {
                let input = input.trim();
                if input.is_empty() {
                    continue;
                }
                if let Err(e) = vm.interpret(input, &mut io::stdout()) {
                    eprintln!("{}", e);
                }
            }
            Err(e) => {
                eprintln!("Read error: {}", e);
                break;
            }
        }
    }
}
