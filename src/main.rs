//! E64 virtual machine runner.
//!
//! Loads a program at address 0 and runs it until HALT.
//!
//! # Usage
//! ```text
//! e64 <program.bin|program.asm> [OPTIONS]
//! ```
//!
//! # Arguments
//! - `program`: Binary image, or assembly source when the extension is `.asm`
//!
//! # Options
//! - `--trace`: Log every executed instruction
//! - `--privileged`: Boot with the Privileged flag set
//! - `--max-steps <n>`: Stop after `n` instructions
//! - `--registers <n>`: Size of the general purpose register file
//!
//! # Ports
//! Port 1 writes the low byte of the data word to stdout. Port 2 reads one
//! byte from stdin, or 0 at end of input.
//!
//! # Environment
//! `E64_GP_REGISTERS`, `E64_PRIVILEGED`, `E64_TRACE` and `E64_MAX_STACK` set
//! the defaults that the options above override.

use e64::utils::log::{self, Level};
use e64::virtual_machine::assembler::assemble_file;
use e64::virtual_machine::errors::VMError;
use e64::virtual_machine::program::Program;
use e64::virtual_machine::vm::config::parse_registers;
use e64::virtual_machine::vm::{Engine, EngineConfig, Flag, Ram, Value, ValueKind};
use e64::{error, info, warn};
use std::env;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process;

/// Minimum memory given to a program; the image is zero-padded up to it.
const MIN_MEMORY: usize = 1 << 16;
const CONSOLE_OUT: u64 = 1;
const CONSOLE_IN: u64 = 2;

struct Options {
    path: String,
    config: EngineConfig,
    max_steps: Option<u64>,
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(msg) => {
            error!("{msg}\n");
            print_usage(&args[0]);
            process::exit(1);
        }
    };

    if options.config.trace {
        log::set_min_level(Level::Debug);
    }

    let program = match load_program(&options.path) {
        Ok(program) => program,
        Err(e) => {
            error!("Failed to load {}: {}", options.path, e);
            process::exit(1);
        }
    };

    let memory = Ram::from_program(program.bytes(), program.len().max(MIN_MEMORY));
    let mut engine = Engine::with_config(memory, options.config);
    wire_host(&mut engine);

    let result = match options.max_steps {
        Some(n) => engine.run_for(n),
        None => engine.run(),
    };

    let _ = io::stdout().flush();

    match result {
        Ok(steps) => {
            if engine.is_halted() {
                info!("Halted after {} instructions", steps);
            } else {
                warn!("Step limit reached after {} instructions", steps);
            }
            print_registers(&engine);
        }
        Err(e) => {
            error!("Execution failed at {:#x}: {}", engine.registers().ip, e);
            print_registers(&engine);
            process::exit(1);
        }
    }
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut config = EngineConfig::from_env().map_err(|e| e.to_string())?;
    let mut max_steps = None;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--trace" => config.trace = true,
            "--privileged" => config.start_privileged = true,
            k @ "--max-steps" => {
                i += 1;
                let v = args.get(i).ok_or(format!("{k} requires an argument"))?;
                let n = v
                    .parse::<u64>()
                    .map_err(|_| format!("Invalid value for {k}: {v}"))?;
                max_steps = Some(n);
            }
            k @ "--registers" => {
                i += 1;
                let v = args.get(i).ok_or(format!("{k} requires an argument"))?;
                config.gp_registers = parse_registers("--registers", v).map_err(|e| e.to_string())?;
            }
            other => return Err(format!("Unexpected argument: {other}")),
        }
        i += 1;
    }

    Ok(Options {
        path: args[1].clone(),
        config,
        max_steps,
    })
}

fn load_program(path: &str) -> Result<Program, VMError> {
    let is_source = Path::new(path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("asm"));
    if is_source {
        assemble_file(path)
    } else {
        Program::from_file(path)
    }
}

fn wire_host(engine: &mut Engine) {
    engine.set_port(CONSOLE_OUT, |data, is_read| {
        if !is_read {
            let mut out = io::stdout();
            let _ = out.write_all(&[data as u8]);
            if data as u8 == b'\n' {
                let _ = out.flush();
            }
        }
        0
    });

    engine.set_port(CONSOLE_IN, |_, is_read| {
        if !is_read {
            return 0;
        }
        let _ = io::stdout().flush();
        let mut byte = [0u8; 1];
        match io::stdin().read(&mut byte) {
            Ok(1) => byte[0] as u64,
            _ => 0,
        }
    });

    engine.set_interrupt_observer(|num, regs| {
        info!("Interrupt {} at {:#x} (cd {})", num, regs.ip, regs.cd);
    });

    engine.set_breakpoint_hook(|regs| {
        warn!("Breakpoint at {:#x}", regs.ip);
    });

    engine
        .natives_mut()
        .register("print", &[ValueKind::Text], None, |args| {
            if let Some(Value::Text(s)) = args.first() {
                print!("{s}");
            }
            Ok(None)
        });
}

fn print_registers(engine: &Engine) {
    let regs = engine.registers();
    for (idx, value) in regs.gp_slice().iter().enumerate() {
        println!("r{:<3} = {:#018x} ({})", idx, value, value);
    }
    println!("ip   = {:#018x}", regs.ip);
    println!("cr   = {:#018x}", regs.cr);
    println!("cd   = {}", regs.cd);

    let flags = [
        (Flag::Privileged, "P"),
        (Flag::Equal, "EQ"),
        (Flag::Lesser, "LT"),
        (Flag::Greater, "GT"),
        (Flag::InterruptsEnabled, "IE"),
    ];
    let set: Vec<&str> = flags
        .iter()
        .filter(|(flag, _)| regs.flag(*flag))
        .map(|(_, name)| *name)
        .collect();
    println!("flags: [{}]", set.join(" "));
}

const USAGE: &str = "\
E64 Virtual Machine

USAGE:
    {program} <program.bin|program.asm> [OPTIONS]

ARGS:
    <program>    Binary image, or assembly source when it ends in .asm

OPTIONS:
    --trace              Log every executed instruction
    --privileged         Boot with the Privileged flag set
    --max-steps <n>      Stop after n instructions
    --registers <n>      General purpose register count (1-256)
    -h, --help           Print this help message

PORTS:
    1    console out (low byte of the data word)
    2    console in (0 at end of input)

EXAMPLES:
    # Assemble and run in one go
    {program} hello.asm --privileged

    # Run a compiled image with tracing
    {program} hello.bin --trace --max-steps 1000
";

fn print_usage(program: &str) {
    info!("{}", USAGE.replace("{program}", program));
}
