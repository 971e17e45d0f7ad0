//! # UI Interface
//!
//! The debugger core talks to its REPL collaborator through the
//! [`DebuggerUI`] trait: the core hands over the last [`Feedback`], the UI
//! hands back the next [`Status`] command. Implementations: the
//! [`cli`] line REPL and the [`json`] line protocol.

use serde::{Deserialize, Serialize};

use crate::addr::Addr;
use crate::errors::Result;
use crate::feedback::Feedback;
use crate::regs::Register;
use crate::Word;

pub mod cli;
pub mod json;

/// Where the user wants a breakpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BreakpointSpec {
    /// An absolute runtime address
    Address(Addr),
    /// A `file:line` source coordinate; the file is matched as a suffix of
    /// the unit name
    SourceLine(String, u64),
    /// A function name; the prologue is skipped
    Function(String),
}

/// One command from the UI to the debugger core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Status {
    DebuggerQuit,
    Continue,
    SetBreakpoint(BreakpointSpec),
    DelBreakpoint(Addr),
    DumpRegisters,
    ReadRegister(Register),
    SetRegister(Register, u64),
    ReadMem(Addr),
    WriteMem(Addr, Word),
    StepIn,
    StepOver,
    StepOut,
    StepSingle,
    Variables,
    Backtrace,
    LookupSymbol(String),
}

/// A user interface of the debugger
pub trait DebuggerUI {
    /// Presents the feedback of the last command and produces the next
    /// one.
    fn process(&mut self, feedback: &Feedback) -> Result<Status>;
}
