//! # Register Description
//!
//! A fixed per-architecture table mapping each register to its DWARF
//! register number and display name, plus ptrace access to the register set
//! of a stopped debuggee.
//!
//! The table is what connects the DWARF expression evaluator (which talks
//! in DWARF register numbers) to the kernel's `user_regs_struct` (which is
//! laid out per architecture). Lookup is supported three ways: by
//! [`Register`], by DWARF number, and by display name.

use std::fmt::Display;
use std::str::FromStr;

use nix::libc::user_regs_struct;
use nix::sys::ptrace;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

use crate::errors::{DebuggerError, Result};

/// A logical register of the debuggee
///
/// The variant names follow the architecture manuals, which is also how
/// users type them.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg(target_arch = "x86_64")]
pub enum Register {
    r15,
    r14,
    r13,
    r12,
    rbp,
    rbx,
    r11,
    r10,
    r9,
    r8,
    rax,
    rcx,
    rdx,
    rsi,
    rdi,
    orig_rax,
    rip,
    cs,
    eflags,
    rsp,
    ss,
    fs_base,
    gs_base,
    ds,
    es,
    fs,
    gs,
}

/// A logical register of the debuggee
///
/// The variant names follow the architecture manuals, which is also how
/// users type them.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg(target_arch = "aarch64")]
pub enum Register {
    x0,
    x1,
    x2,
    x3,
    x4,
    x5,
    x6,
    x7,
    x8,
    x9,
    x10,
    x11,
    x12,
    x13,
    x14,
    x15,
    x16,
    x17,
    x18,
    x19,
    x20,
    x21,
    x22,
    x23,
    x24,
    x25,
    x26,
    x27,
    x28,
    fp,
    lr,
    sp,
    pc,
    cpsr,
}

/// One row of the register description table
#[derive(Debug, Clone, Copy)]
pub struct RegDescriptor {
    pub reg: Register,
    /// DWARF register number, or -1 where the ABI assigns none
    pub dwarf: i32,
    pub name: &'static str,
}

/// The program counter of this architecture
#[cfg(target_arch = "x86_64")]
pub const PROGRAM_COUNTER: Register = Register::rip;
/// The frame pointer of this architecture
#[cfg(target_arch = "x86_64")]
pub const FRAME_POINTER: Register = Register::rbp;

/// The program counter of this architecture
#[cfg(target_arch = "aarch64")]
pub const PROGRAM_COUNTER: Register = Register::pc;
/// The frame pointer of this architecture
#[cfg(target_arch = "aarch64")]
pub const FRAME_POINTER: Register = Register::fp;

/// DWARF register numbers per the System V x86-64 psABI, in the layout
/// order of `user_regs_struct`.
#[cfg(target_arch = "x86_64")]
pub const REGISTER_DESCRIPTORS: [RegDescriptor; 27] = [
    RegDescriptor { reg: Register::r15, dwarf: 15, name: "r15" },
    RegDescriptor { reg: Register::r14, dwarf: 14, name: "r14" },
    RegDescriptor { reg: Register::r13, dwarf: 13, name: "r13" },
    RegDescriptor { reg: Register::r12, dwarf: 12, name: "r12" },
    RegDescriptor { reg: Register::rbp, dwarf: 6, name: "rbp" },
    RegDescriptor { reg: Register::rbx, dwarf: 3, name: "rbx" },
    RegDescriptor { reg: Register::r11, dwarf: 11, name: "r11" },
    RegDescriptor { reg: Register::r10, dwarf: 10, name: "r10" },
    RegDescriptor { reg: Register::r9, dwarf: 9, name: "r9" },
    RegDescriptor { reg: Register::r8, dwarf: 8, name: "r8" },
    RegDescriptor { reg: Register::rax, dwarf: 0, name: "rax" },
    RegDescriptor { reg: Register::rcx, dwarf: 2, name: "rcx" },
    RegDescriptor { reg: Register::rdx, dwarf: 1, name: "rdx" },
    RegDescriptor { reg: Register::rsi, dwarf: 4, name: "rsi" },
    RegDescriptor { reg: Register::rdi, dwarf: 5, name: "rdi" },
    RegDescriptor { reg: Register::orig_rax, dwarf: -1, name: "orig_rax" },
    RegDescriptor { reg: Register::rip, dwarf: -1, name: "rip" },
    RegDescriptor { reg: Register::cs, dwarf: 51, name: "cs" },
    RegDescriptor { reg: Register::eflags, dwarf: 49, name: "eflags" },
    RegDescriptor { reg: Register::rsp, dwarf: 7, name: "rsp" },
    RegDescriptor { reg: Register::ss, dwarf: 52, name: "ss" },
    RegDescriptor { reg: Register::fs_base, dwarf: 58, name: "fs_base" },
    RegDescriptor { reg: Register::gs_base, dwarf: 59, name: "gs_base" },
    RegDescriptor { reg: Register::ds, dwarf: 53, name: "ds" },
    RegDescriptor { reg: Register::es, dwarf: 50, name: "es" },
    RegDescriptor { reg: Register::fs, dwarf: 54, name: "fs" },
    RegDescriptor { reg: Register::gs, dwarf: 55, name: "gs" },
];

/// DWARF register numbers per the AArch64 AAPCS.
#[cfg(target_arch = "aarch64")]
pub const REGISTER_DESCRIPTORS: [RegDescriptor; 35] = [
    RegDescriptor { reg: Register::x0, dwarf: 0, name: "x0" },
    RegDescriptor { reg: Register::x1, dwarf: 1, name: "x1" },
    RegDescriptor { reg: Register::x2, dwarf: 2, name: "x2" },
    RegDescriptor { reg: Register::x3, dwarf: 3, name: "x3" },
    RegDescriptor { reg: Register::x4, dwarf: 4, name: "x4" },
    RegDescriptor { reg: Register::x5, dwarf: 5, name: "x5" },
    RegDescriptor { reg: Register::x6, dwarf: 6, name: "x6" },
    RegDescriptor { reg: Register::x7, dwarf: 7, name: "x7" },
    RegDescriptor { reg: Register::x8, dwarf: 8, name: "x8" },
    RegDescriptor { reg: Register::x9, dwarf: 9, name: "x9" },
    RegDescriptor { reg: Register::x10, dwarf: 10, name: "x10" },
    RegDescriptor { reg: Register::x11, dwarf: 11, name: "x11" },
    RegDescriptor { reg: Register::x12, dwarf: 12, name: "x12" },
    RegDescriptor { reg: Register::x13, dwarf: 13, name: "x13" },
    RegDescriptor { reg: Register::x14, dwarf: 14, name: "x14" },
    RegDescriptor { reg: Register::x15, dwarf: 15, name: "x15" },
    RegDescriptor { reg: Register::x16, dwarf: 16, name: "x16" },
    RegDescriptor { reg: Register::x17, dwarf: 17, name: "x17" },
    RegDescriptor { reg: Register::x18, dwarf: 18, name: "x18" },
    RegDescriptor { reg: Register::x19, dwarf: 19, name: "x19" },
    RegDescriptor { reg: Register::x20, dwarf: 20, name: "x20" },
    RegDescriptor { reg: Register::x21, dwarf: 21, name: "x21" },
    RegDescriptor { reg: Register::x22, dwarf: 22, name: "x22" },
    RegDescriptor { reg: Register::x23, dwarf: 23, name: "x23" },
    RegDescriptor { reg: Register::x24, dwarf: 24, name: "x24" },
    RegDescriptor { reg: Register::x25, dwarf: 25, name: "x25" },
    RegDescriptor { reg: Register::x26, dwarf: 26, name: "x26" },
    RegDescriptor { reg: Register::x27, dwarf: 27, name: "x27" },
    RegDescriptor { reg: Register::x28, dwarf: 28, name: "x28" },
    RegDescriptor { reg: Register::fp, dwarf: 29, name: "fp" },
    RegDescriptor { reg: Register::lr, dwarf: 30, name: "lr" },
    RegDescriptor { reg: Register::sp, dwarf: 31, name: "sp" },
    RegDescriptor { reg: Register::pc, dwarf: 32, name: "pc" },
    RegDescriptor { reg: Register::cpsr, dwarf: 33, name: "cpsr" },
];

#[cfg(target_arch = "x86_64")]
fn field(regs: &user_regs_struct, r: Register) -> u64 {
    match r {
        Register::r15 => regs.r15,
        Register::r14 => regs.r14,
        Register::r13 => regs.r13,
        Register::r12 => regs.r12,
        Register::rbp => regs.rbp,
        Register::rbx => regs.rbx,
        Register::r11 => regs.r11,
        Register::r10 => regs.r10,
        Register::r9 => regs.r9,
        Register::r8 => regs.r8,
        Register::rax => regs.rax,
        Register::rcx => regs.rcx,
        Register::rdx => regs.rdx,
        Register::rsi => regs.rsi,
        Register::rdi => regs.rdi,
        Register::orig_rax => regs.orig_rax,
        Register::rip => regs.rip,
        Register::cs => regs.cs,
        Register::eflags => regs.eflags,
        Register::rsp => regs.rsp,
        Register::ss => regs.ss,
        Register::fs_base => regs.fs_base,
        Register::gs_base => regs.gs_base,
        Register::ds => regs.ds,
        Register::es => regs.es,
        Register::fs => regs.fs,
        Register::gs => regs.gs,
    }
}

#[cfg(target_arch = "x86_64")]
fn set_field(regs: &mut user_regs_struct, r: Register, value: u64) {
    match r {
        Register::r15 => regs.r15 = value,
        Register::r14 => regs.r14 = value,
        Register::r13 => regs.r13 = value,
        Register::r12 => regs.r12 = value,
        Register::rbp => regs.rbp = value,
        Register::rbx => regs.rbx = value,
        Register::r11 => regs.r11 = value,
        Register::r10 => regs.r10 = value,
        Register::r9 => regs.r9 = value,
        Register::r8 => regs.r8 = value,
        Register::rax => regs.rax = value,
        Register::rcx => regs.rcx = value,
        Register::rdx => regs.rdx = value,
        Register::rsi => regs.rsi = value,
        Register::rdi => regs.rdi = value,
        Register::orig_rax => regs.orig_rax = value,
        Register::rip => regs.rip = value,
        Register::cs => regs.cs = value,
        Register::eflags => regs.eflags = value,
        Register::rsp => regs.rsp = value,
        Register::ss => regs.ss = value,
        Register::fs_base => regs.fs_base = value,
        Register::gs_base => regs.gs_base = value,
        Register::ds => regs.ds = value,
        Register::es => regs.es = value,
        Register::fs => regs.fs = value,
        Register::gs => regs.gs = value,
    }
}

#[cfg(target_arch = "aarch64")]
fn field(regs: &user_regs_struct, r: Register) -> u64 {
    match r {
        Register::fp => regs.regs[29],
        Register::lr => regs.regs[30],
        Register::sp => regs.sp,
        Register::pc => regs.pc,
        Register::cpsr => regs.pstate,
        other => regs.regs[other as usize],
    }
}

#[cfg(target_arch = "aarch64")]
fn set_field(regs: &mut user_regs_struct, r: Register, value: u64) {
    match r {
        Register::fp => regs.regs[29] = value,
        Register::lr => regs.regs[30] = value,
        Register::sp => regs.sp = value,
        Register::pc => regs.pc = value,
        Register::cpsr => regs.pstate = value,
        other => regs.regs[other as usize] = value,
    }
}

fn read_regs(pid: Pid) -> Result<user_regs_struct> {
    Ok(ptrace::getregset::<ptrace::regset::NT_PRSTATUS>(pid)?)
}

fn write_regs(pid: Pid, regs: user_regs_struct) -> Result<()> {
    ptrace::setregset::<ptrace::regset::NT_PRSTATUS>(pid, regs)?;
    Ok(())
}

/// Reads a single register of the stopped debuggee.
pub fn get_reg(pid: Pid, r: Register) -> Result<u64> {
    Ok(field(&read_regs(pid)?, r))
}

/// Writes a single register of the stopped debuggee.
pub fn set_reg(pid: Pid, r: Register, value: u64) -> Result<()> {
    let mut regs = read_regs(pid)?;
    set_field(&mut regs, r, value);
    write_regs(pid, regs)
}

/// Reads the whole register set as `(name, value)` pairs, in table order.
pub fn dump_regs(pid: Pid) -> Result<Vec<(&'static str, u64)>> {
    let regs = read_regs(pid)?;
    Ok(REGISTER_DESCRIPTORS
        .iter()
        .map(|rd| (rd.name, field(&regs, rd.reg)))
        .collect())
}

/// Translates a DWARF register number to a [`Register`].
pub fn register_from_dwarf(dwarf: u64) -> Result<Register> {
    REGISTER_DESCRIPTORS
        .iter()
        .find(|rd| rd.dwarf >= 0 && rd.dwarf as u64 == dwarf)
        .map(|rd| rd.reg)
        .ok_or(DebuggerError::UnimplementedRegister(dwarf))
}

/// Reads the register a DWARF register number refers to.
pub fn get_reg_by_dwarf(pid: Pid, dwarf: u64) -> Result<u64> {
    get_reg(pid, register_from_dwarf(dwarf)?)
}

impl Register {
    #[must_use]
    pub fn name(self) -> &'static str {
        REGISTER_DESCRIPTORS
            .iter()
            .find(|rd| rd.reg == self)
            .map(|rd| rd.name)
            .unwrap_or("unknown")
    }
}

impl Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Register {
    type Err = DebuggerError;

    fn from_str(s: &str) -> Result<Self> {
        REGISTER_DESCRIPTORS
            .iter()
            .find(|rd| rd.name == s)
            .map(|rd| rd.reg)
            .ok_or_else(|| DebuggerError::UnknownRegisterName(s.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_dwarf_register_mapping() {
        #[cfg(target_arch = "x86_64")]
        {
            assert_eq!(register_from_dwarf(6).unwrap(), Register::rbp);
            assert_eq!(register_from_dwarf(0).unwrap(), Register::rax);
            assert_eq!(register_from_dwarf(7).unwrap(), Register::rsp);
        }
        #[cfg(target_arch = "aarch64")]
        {
            assert_eq!(register_from_dwarf(29).unwrap(), Register::fp);
            assert_eq!(register_from_dwarf(0).unwrap(), Register::x0);
            assert_eq!(register_from_dwarf(32).unwrap(), Register::pc);
        }
        assert!(matches!(
            register_from_dwarf(9999),
            Err(crate::errors::DebuggerError::UnimplementedRegister(9999))
        ));
    }

    #[test]
    fn test_register_names_round_trip() {
        for rd in REGISTER_DESCRIPTORS {
            assert_eq!(Register::from_str(rd.name).unwrap(), rd.reg);
            assert_eq!(rd.reg.name(), rd.name);
        }
    }
}
