use thiserror::Error;

/// Errors that can occur during assembly or execution.
#[derive(Debug, Error)]
pub enum VMError {
    // =========================
    // Assembly
    // =========================
    /// Literal token without a recognized type suffix or with a malformed body.
    #[error("could not parse literal '{token}'")]
    InvalidLiteral { token: String },
    /// Quoted token that is missing its closing quote.
    #[error("unterminated string literal")]
    UnterminatedString,
    /// Directive (`&`, `ref`) that is not followed by its argument.
    #[error("'{directive}' expects an argument")]
    MissingArgument { directive: &'static str },
    /// Text literal too long for its `u32` length prefix.
    #[error("text literal of {len} bytes exceeds the u32 length prefix")]
    TextTooLong { len: usize },
    /// Label defined more than once.
    #[error("duplicate label: {label}")]
    DuplicateLabel { label: String },
    /// Address-of referencing a label that is never defined.
    #[error("symbol not found: {label}")]
    UndefinedLabel { label: String },
    /// Assembly error with source position context.
    #[error("line {line}: {message}")]
    AssemblyError {
        line: usize,
        offset: usize,
        message: String,
    },

    // =========================
    // Execution
    // =========================
    /// Unknown opcode encountered in the instruction stream.
    #[error("invalid instruction 0x{opcode:02X} at offset {offset}")]
    InvalidInstruction { opcode: u8, offset: u64 },
    /// Privileged opcode executed while the Privileged flag is clear.
    #[error("privileged instruction violation: {instruction} at offset {offset}")]
    PrivilegedInstruction {
        instruction: &'static str,
        offset: u64,
    },
    /// General purpose register index exceeds the register file size.
    #[error("register index {index} out of bounds ({available} registers)")]
    InvalidRegisterIndex { index: usize, available: usize },
    /// Control flag bit outside of the 64-bit control word.
    #[error("invalid control flag bit: {bit}")]
    InvalidFlagBit { bit: u32 },
    /// Memory access past the end of the backing store.
    #[error("memory access out of range: address {addr:#x}, size {len:#x}")]
    MemoryOutOfBounds { addr: u64, len: u64 },
    /// String read from memory is not valid UTF-8.
    #[error("invalid utf8 in string at address {addr:#x}")]
    InvalidUtf8 { addr: u64 },
    /// Pop or peek below the bottom of the stack.
    #[error("stack underflow: requested depth {depth}, stack holds {len}")]
    StackUnderflow { depth: usize, len: usize },
    /// Push beyond the configured stack limit.
    #[error("stack overflow: limit of {limit} values reached")]
    StackOverflow { limit: usize },
    /// Stack value cannot be coerced to the requested kind.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },
    /// Return executed with no pending call.
    #[error("return without call")]
    ReturnWithoutCall,
    /// Interrupt handler halted before returning.
    #[error("machine halted inside handler for interrupt {number}")]
    HaltedInInterrupt { number: u8 },
    /// Native call to a name the host never registered.
    #[error("unknown native function: {name}")]
    UnknownNativeFunction { name: String },
    /// Native function reported a failure.
    #[error("native function {name} failed: {reason}")]
    NativeCallFailed { name: String, reason: String },

    // =========================
    // Host
    // =========================
    /// Engine configuration value could not be parsed.
    #[error("invalid configuration {key}={value}")]
    InvalidConfig { key: &'static str, value: String },
    /// File I/O error while loading or writing programs.
    #[error("io error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for VMError {
    fn from(err: std::io::Error) -> Self {
        VMError::IoError(err.to_string())
    }
}
