//! NIC interpreter command-line interface.
//!
//! Usage:
//!   nic [-v] <ir-file> [script-arg…]   Execute a compiled script
//!   nic --dump-ir [--json] <ir-file>   Print the loaded IR tables
//!   nic -h | --help                    Show usage

use std::env;
use std::fs;
use std::process;

use nic::clock::SystemClock;
use nic::vm::{PoolStats, Vm, VmError};
use nic::{load_program, write_program};

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    match args[1].as_str() {
        "-h" | "--help" => {
            print_usage();
        }
        "--dump-ir" => {
            let json = args.iter().any(|a| a == "--json");
            let file = args
                .iter()
                .skip(2)
                .find(|a| !a.starts_with('-'))
                .cloned()
                .unwrap_or_else(|| {
                    eprintln!("Error: --dump-ir requires an input file");
                    process::exit(1);
                });
            dump_ir(&file, json);
        }
        _ => {
            let mut verbose = false;
            let mut rest = &args[1..];
            if rest[0] == "-v" {
                verbose = true;
                rest = &rest[1..];
            }
            if rest.is_empty() {
                print_usage();
                process::exit(1);
            }
            run_file(&rest[0], &rest[1..], verbose);
        }
    }
}

fn print_usage() {
    println!(
        r#"nic - NIC script interpreter

USAGE:
    nic [-v] <ir-file> [script-arg...]   Execute a compiled script
    nic --dump-ir [--json] <ir-file>     Print the loaded IR tables
    nic -h, --help                       Show this help message

OPTIONS:
    -v          Print string-pool statistics to stderr after the run
    --json      JSON output for --dump-ir

EXAMPLES:
    nic blink.nis
    nic -v sieve.nis 1000
    nic --dump-ir --json blink.nis
"#
    );
}

fn load_or_exit(path: &str) -> nic::ir::core::Program {
    let source = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Error reading '{}': {}", path, e);
        process::exit(1);
    });
    load_program(&source).unwrap_or_else(|e| {
        eprintln!("Error loading '{}': {}", path, e);
        process::exit(1);
    })
}

fn run_file(path: &str, script_args: &[String], verbose: bool) {
    let program = load_or_exit(path);
    let mut vm = Vm::new(program, SystemClock::new());

    let result = vm.run_main(script_args);

    if verbose {
        print_stats(&vm.pool_stats());
    }

    match result {
        Ok(_) => {}
        Err(VmError::Interrupted) => {
            eprintln!("Interrupted");
            process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn print_stats(stats: &PoolStats) {
    eprintln!(
        "named slots: {} used, {} allocated, {} peak",
        stats.named_used, stats.named_allocated, stats.named_high_water
    );
    eprintln!(
        "temp slots: {} allocated, all inactive: {}",
        stats.temp_allocated, stats.temp_all_inactive
    );
    eprintln!(
        "scalar stacks peak: {} int, {} byte, {} string",
        stats.int_stack_high, stats.byte_stack_high, stats.string_stack_high
    );
    if stats.temp_warnings > 0 {
        eprintln!("temp accounting warnings: {}", stats.temp_warnings);
    }
}

fn dump_ir(path: &str, json: bool) {
    let program = load_or_exit(path);
    if json {
        match serde_json::to_string_pretty(&program) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error serializing IR: {}", e);
                process::exit(1);
            }
        }
    } else {
        print!("{}", write_program(&program));
    }
}
