//! # Feedback Types
//!
//! Everything the debugger core hands back to its UI collaborator: stop
//! events out of the signal loop and the results of queries. All of it is
//! serializable so a machine UI can consume the same data the CLI prints.

use std::fmt::Display;

use serde::Serialize;

use crate::addr::Addr;
use crate::elf::SymbolKind;
use crate::errors::DebuggerError;
use crate::Word;

/// A stop event out of the signal loop
#[derive(Debug, Clone, Serialize)]
pub enum DebugEvent {
    /// A planted breakpoint was hit; the program counter is rolled back
    /// onto the trap address
    HitBreakpoint {
        addr: Addr,
        file: Option<String>,
        line: Option<u64>,
    },
    /// A single-step completed
    SingleStepComplete,
    /// The debuggee faulted
    Segfault { si_code: i32 },
    /// Any other signal, reported verbatim
    OtherSignal { name: String },
}

impl Display for DebugEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DebugEvent::HitBreakpoint { addr, file, line } => {
                write!(f, "Hit breakpoint at {addr}")?;
                if let (Some(file), Some(line)) = (file, line) {
                    write!(f, " ({file}:{line})")?;
                }
                Ok(())
            }
            DebugEvent::SingleStepComplete => write!(f, "Single step complete"),
            DebugEvent::Segfault { si_code } => {
                write!(f, "Debuggee segfaulted (si_code {si_code})")
            }
            DebugEvent::OtherSignal { name } => write!(f, "Debuggee received {name}"),
        }
    }
}

/// One register with its display name
#[derive(Debug, Clone, Serialize)]
pub struct RegisterValue {
    pub name: &'static str,
    pub value: u64,
}

/// A source coordinate resolved from the line table
#[derive(Debug, Clone, Serialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u64,
    pub column: u64,
}

impl Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)?;
        if self.column != 0 {
            write!(f, ":{}", self.column)?;
        }
        Ok(())
    }
}

/// Where a variable lives at the current stop
#[derive(Debug, Clone, Serialize)]
pub enum VariableLocation {
    Address(Addr),
    Register { dwarf: u64, name: String },
}

/// One variable or parameter of the current function
#[derive(Debug, Clone, Serialize)]
pub struct VariableInfo {
    pub name: String,
    pub location: VariableLocation,
    pub value: u64,
    pub is_parameter: bool,
}

/// One frame of a backtrace
#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    pub index: usize,
    pub low_pc: Addr,
    pub name: String,
}

/// One ELF symbol matching a lookup
#[derive(Debug, Clone, Serialize)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub name: String,
    pub addr: Addr,
}

/// The result of one debugger operation, handed to the UI
#[derive(Debug, Serialize)]
pub enum Feedback {
    Ok,
    Error(DebuggerError),
    Exit(i32),
    Event(DebugEvent),
    Registers(Vec<RegisterValue>),
    Word(Word),
    Location(SourceLocation),
    Variables(Vec<VariableInfo>),
    Backtrace(Vec<Frame>),
    Symbols(Vec<Symbol>),
}

impl Display for Feedback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Feedback::Ok => write!(f, "Ok")?,
            Feedback::Error(e) => write!(f, "Error: {e}")?,
            Feedback::Exit(code) => write!(f, "Debuggee exited with code {code}")?,
            Feedback::Event(event) => write!(f, "{event}")?,
            Feedback::Word(w) => write!(f, "{w:#018x}")?,
            Feedback::Location(loc) => write!(f, "{loc}")?,
            Feedback::Registers(regs) => {
                for reg in regs {
                    writeln!(f, "{:<10} {:#018x}", reg.name, reg.value)?;
                }
            }
            Feedback::Variables(vars) => {
                for var in vars {
                    match &var.location {
                        VariableLocation::Address(addr) => {
                            writeln!(f, "{} ({addr}) = {:#x}", var.name, var.value)?;
                        }
                        VariableLocation::Register { name, .. } => {
                            writeln!(f, "{} (reg {name}) = {:#x}", var.name, var.value)?;
                        }
                    }
                }
            }
            Feedback::Backtrace(frames) => {
                for frame in frames {
                    writeln!(f, "frame #{}: {} {}", frame.index, frame.low_pc, frame.name)?;
                }
            }
            Feedback::Symbols(syms) => {
                for sym in syms {
                    writeln!(f, "{} {} {}", sym.name, sym.kind, sym.addr)?;
                }
            }
        }

        Ok(())
    }
}

impl From<Result<Feedback, DebuggerError>> for Feedback {
    fn from(value: Result<Feedback, DebuggerError>) -> Self {
        match value {
            Ok(feedback) => feedback,
            Err(e) => Feedback::Error(e),
        }
    }
}
