//! # Error Types
//!
//! Defines error types and a result alias used throughout the [crate].
//!
//! All failure modes of the debugger go through the single
//! [`DebuggerError`] enum, built with [thiserror]: malformed ELF or DWARF
//! data, typed-view and form mismatches, reads past a section window,
//! expression evaluation failures, missing debug information, and OS-level
//! ptrace errors.
//!
//! Parser errors are reported to the UI and the debugger keeps accepting
//! commands; only failing to load the target executable or to launch the
//! debuggee ends the session.

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Type alias for Results returned by marrow functions
pub type Result<T> = std::result::Result<T, DebuggerError>;

/// Comprehensive error type for the marrow debugger
///
/// # Examples
///
/// ```
/// use marrow::errors::{DebuggerError, Result};
///
/// fn example_function() -> Result<()> {
///     if true {
///         return Err(DebuggerError::NoDebugee);
///     }
///     Ok(())
/// }
/// ```
#[derive(Error, Debug)]
pub enum DebuggerError {
    #[error("Os error: {0}")]
    Os(#[from] nix::Error),
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Executable does not exist: {0}")]
    ExecutableDoesNotExist(String),
    #[error("Executable is not a file: {0}")]
    ExecutableIsNotAFile(String),
    #[error("Could not convert to CString: {0}")]
    CStringConv(#[from] std::ffi::NulError),
    #[error("No debuggee configured")]
    NoDebugee,
    #[error("Tried to enable breakpoint again")]
    BreakpointIsAlreadyEnabled,
    #[error("Tried to disable breakpoint again")]
    BreakpointIsAlreadyDisabled,
    #[error("Could not parse integer: {0}")]
    ParseInt(#[from] std::num::ParseIntError),
    #[error("Could not parse string: {0}")]
    ParseStr(String),
    #[error("Error while getting cli input: {0}")]
    CliUiDialogueError(#[from] dialoguer::Error),
    #[error("Working with JSON failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Malformed data: {0}")]
    Format(String),
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),
    #[error("Cannot read past the end of a section")]
    Underflow,
    #[error("Out of range: {0}")]
    Range(String),
    #[error("DWARF expression error: {0}")]
    Expression(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("No DWARF register with number {0} on this architecture")]
    UnimplementedRegister(u64),
    #[error("No register named {0} on this architecture")]
    UnknownRegisterName(String),
    #[error("Tried stepping out of main function, this makes no sense")]
    StepOutMain,
    #[error("Tried to run a program while one was already running")]
    AlreadyRunning,
    #[error("The debuggee is currently not in a known function")]
    NotInFunction,
}

#[derive(Serialize)]
struct SerializableError {
    error_type: String,
    message: String,
}

impl Serialize for DebuggerError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let error_type = match self {
            DebuggerError::Os(_) => "OS",
            DebuggerError::Io(_) => "IO",
            DebuggerError::ExecutableDoesNotExist(_) => "DoesNotExist",
            DebuggerError::ExecutableIsNotAFile(_) => "IsNotAFile",
            DebuggerError::CStringConv(_) => "CStringConversion",
            DebuggerError::NoDebugee => "NoDebuggee",
            DebuggerError::BreakpointIsAlreadyEnabled => "BreakpointAlreadyEnabled",
            DebuggerError::BreakpointIsAlreadyDisabled => "BreakpointAlreadyDisabled",
            DebuggerError::ParseInt(_) => "ParseInt",
            DebuggerError::ParseStr(_) => "ParseString",
            DebuggerError::CliUiDialogueError(_) => "UIDialogue",
            DebuggerError::Json(_) => "Json",
            DebuggerError::Format(_) => "Format",
            DebuggerError::TypeMismatch(_) => "TypeMismatch",
            DebuggerError::Underflow => "Underflow",
            DebuggerError::Range(_) => "Range",
            DebuggerError::Expression(_) => "Expression",
            DebuggerError::NotFound(_) => "NotFound",
            DebuggerError::UnimplementedRegister(_) => "UnimplementedRegister",
            DebuggerError::UnknownRegisterName(_) => "UnknownRegisterName",
            DebuggerError::StepOutMain => "OutMain",
            DebuggerError::AlreadyRunning => "AlreadyRunning",
            DebuggerError::NotInFunction => "NotInFunction",
        };

        let message = self.to_string();

        SerializableError {
            error_type: error_type.to_string(),
            message,
        }
        .serialize(serializer)
    }
}
