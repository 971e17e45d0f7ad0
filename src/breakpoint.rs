//! # Software Breakpoints
//!
//! A breakpoint stashes the original machine word at its address and
//! overwrites the trap field with the architecture's trap instruction
//! (`int3` on x86-64, `brk #0` on AArch64). Disabling writes the stashed
//! word back. While a breakpoint is enabled, the non-trap bits in memory
//! still equal the stashed word's non-trap bits.

use nix::unistd::Pid;

use crate::addr::Addr;
use crate::errors::{DebuggerError, Result};
use crate::{mem_read_word, mem_write_word, Word};

/// The trap instruction, right-aligned in a machine word (`int3`)
#[cfg(target_arch = "x86_64")]
pub const TRAP_INSTRUMENT: Word = 0xcc;
/// Which bits of the word the trap instruction occupies
#[cfg(target_arch = "x86_64")]
pub const TRAP_MASK: Word = 0xff;
/// How far the program counter has advanced when a planted trap is reported
#[cfg(target_arch = "x86_64")]
pub const TRAP_PC_ADJUST: usize = 1;

/// The trap instruction, right-aligned in a machine word (`brk #0`)
#[cfg(target_arch = "aarch64")]
pub const TRAP_INSTRUMENT: Word = 0xd420_0000;
/// Which bits of the word the trap instruction occupies
#[cfg(target_arch = "aarch64")]
pub const TRAP_MASK: Word = 0xffff_ffff;
/// How far the program counter has advanced when a planted trap is reported
#[cfg(target_arch = "aarch64")]
pub const TRAP_PC_ADJUST: usize = 0;

/// Computes the word to poke into memory when arming a breakpoint over
/// `original`.
#[must_use]
pub fn trap_word(original: Word) -> Word {
    (original & !TRAP_MASK) | TRAP_INSTRUMENT
}

/// A software breakpoint in the debuggee
#[derive(Debug)]
pub struct Breakpoint {
    addr: Addr,
    pid: Pid,
    saved_word: Option<Word>,
}

impl Breakpoint {
    #[must_use]
    pub fn new(pid: Pid, addr: Addr) -> Self {
        Self {
            pid,
            addr,
            saved_word: None,
        }
    }

    #[must_use]
    pub fn addr(&self) -> Addr {
        self.addr
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.saved_word.is_some()
    }

    /// The original machine word, while the breakpoint is enabled
    #[must_use]
    pub fn saved_word(&self) -> Option<Word> {
        self.saved_word
    }

    /// Stashes the word at the breakpoint address and plants the trap.
    ///
    /// # Errors
    ///
    /// Fails if the breakpoint is already enabled or the ptrace access
    /// fails.
    pub fn enable(&mut self) -> Result<()> {
        if self.saved_word.is_some() {
            return Err(DebuggerError::BreakpointIsAlreadyEnabled);
        }

        let word = mem_read_word(self.pid, self.addr)?;
        self.saved_word = Some(word);
        mem_write_word(self.pid, self.addr, trap_word(word))?;

        Ok(())
    }

    /// Writes the stashed word back and forgets it.
    ///
    /// # Errors
    ///
    /// Fails if the breakpoint is already disabled or the ptrace access
    /// fails.
    pub fn disable(&mut self) -> Result<()> {
        let Some(word) = self.saved_word else {
            return Err(DebuggerError::BreakpointIsAlreadyDisabled);
        };

        mem_write_word(self.pid, self.addr, word)?;
        self.saved_word = None;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    #[cfg(target_arch = "x86_64")]
    fn test_trap_word() {
        let original: Word = 0x0123_4567_89ab_cdef;
        assert_eq!(trap_word(original), 0x0123_4567_89ab_cdcc);
        // restoring is just writing the stash back
        assert_eq!(trap_word(original) & !TRAP_MASK, original & !TRAP_MASK);
    }

    #[test]
    #[cfg(target_arch = "aarch64")]
    fn test_trap_word() {
        let original: Word = 0x0000_0000_dead_beef_u64 as Word;
        assert_eq!(trap_word(original), 0x0000_0000_d420_0000);
        assert_eq!(trap_word(original) & !TRAP_MASK, original & !TRAP_MASK);
    }
}
