//! # Marrow
//!
//! A source-level debugger for ELF executables with DWARF v2–v4 debug
//! information, for Linux on x86-64 and AArch64.
//!
//! The crate is built from three layers:
//!
//! - [`elf`] — a zero-copy view over a memory-mapped ELF image
//! - [`dwarf`] — a lazy reader for the `.debug_*` sections, including a
//!   line-number state machine and a DWARF expression evaluator
//! - [`debugger`] / [`debuggee`] — ptrace-driven process control built on
//!   top of the two readers
//!
//! The [`ui`] module and the binaries are thin collaborators that translate
//! between user commands ([`ui::Status`]) and debugger results
//! ([`feedback::Feedback`]).

use nix::sys::ptrace;
use nix::unistd::Pid;

use crate::addr::Addr;
use crate::errors::Result;

pub mod addr;
pub mod breakpoint;
pub mod consts;
pub mod debuggee;
pub mod debugger;
pub mod dwarf;
pub mod elf;
pub mod errors;
pub mod feedback;
pub mod regs;
pub mod ui;

/// A machine word of the traced process, as ptrace hands it out
pub type Word = i64;

/// How many bytes a [`Word`] has
pub const WORD_BYTES: usize = std::mem::size_of::<Word>();

pub(crate) fn mem_write_word(pid: Pid, addr: Addr, value: Word) -> Result<()> {
    ptrace::write(pid, addr.raw_pointer(), value)?;
    Ok(())
}

pub(crate) fn mem_read_word(pid: Pid, addr: Addr) -> Result<Word> {
    Ok(ptrace::read(pid, addr.raw_pointer())?)
}

