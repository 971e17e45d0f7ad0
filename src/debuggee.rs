//! # Debuggee
//!
//! The traced child process together with the debug information of its
//! executable: the breakpoint store, the parsed ELF and DWARF views, and
//! the load bias that translates between runtime and DWARF addresses.
//!
//! The query side of the debugger lives here: function and line lookup for
//! a program counter, variable reading through the expression evaluator,
//! the frame-pointer backtrace, and ELF symbol lookup.

use std::collections::HashMap;

use nix::sys::ptrace;
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::addr::Addr;
use crate::breakpoint::Breakpoint;
use crate::dwarf::consts::{
    DW_AT_location, DW_AT_low_pc, DW_AT_name, DW_TAG_formal_parameter, DW_TAG_inlined_subroutine,
    DW_TAG_subprogram, DW_TAG_variable,
};
use crate::dwarf::die::Die;
use crate::dwarf::expr::{ExprContext, ExprLocation};
use crate::dwarf::line::LineRow;
use crate::dwarf::ranges::die_pc_range;
use crate::dwarf::value::ValueType;
use crate::dwarf::DwarfInfo;
use crate::elf::{ElfFile, ET_DYN, SHT_DYNSYM, SHT_SYMTAB};
use crate::errors::{DebuggerError, Result};
use crate::feedback::{Frame, SourceLocation, Symbol, VariableInfo, VariableLocation};
use crate::regs::{get_reg, get_reg_by_dwarf, FRAME_POINTER, PROGRAM_COUNTER};
use crate::{mem_read_word, Word};

/// Deeper than any sane frame-pointer chain; stops a corrupt one
const MAX_FRAMES: usize = 64;

/// A running, traced child and its debug information
pub struct Debuggee<'exe> {
    pub(crate) pid: Pid,
    pub(crate) breakpoints: HashMap<Addr, Breakpoint>,
    pub(crate) elf: ElfFile<'exe>,
    pub(crate) dwarf: DwarfInfo<'exe>,
    load_bias: Addr,
}

impl<'exe> Debuggee<'exe> {
    /// Wires up a freshly launched child. The child must already be
    /// stopped so its memory map is final.
    pub(crate) fn build(pid: Pid, elf: ElfFile<'exe>, dwarf: DwarfInfo<'exe>) -> Result<Self> {
        let load_bias = if elf.hdr().typ == ET_DYN {
            let bias = Self::get_base_addr_by_pid(pid)?;
            info!("position independent executable, load bias {bias}");
            bias
        } else {
            Addr::NULL
        };

        Ok(Self {
            pid,
            breakpoints: HashMap::new(),
            elf,
            dwarf,
            load_bias,
        })
    }

    /// The first mapped region of the process; for `ET_DYN` that is where
    /// the image begins.
    fn get_base_addr_by_pid(pid: Pid) -> Result<Addr> {
        let maps = proc_maps::get_process_maps(pid.as_raw())?;
        let first = maps
            .first()
            .ok_or_else(|| DebuggerError::NotFound(format!("no memory map for pid {pid}")))?;
        Ok(first.start().into())
    }

    pub fn kill(&self) -> Result<()> {
        ptrace::kill(self.pid)?;
        Ok(())
    }

    #[must_use]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    #[must_use]
    pub fn load_bias(&self) -> Addr {
        self.load_bias
    }

    /// Runtime address → DWARF address
    #[must_use]
    pub fn offset_load_address(&self, addr: Addr) -> Addr {
        addr.offset_load_address(self.load_bias)
    }

    /// DWARF address → runtime address
    #[must_use]
    pub fn offset_dwarf_address(&self, addr: Addr) -> Addr {
        addr.offset_dwarf_address(self.load_bias)
    }

    /// The innermost subprogram or inlined subroutine containing the DWARF
    /// address `pc`.
    pub fn function_by_dwarf_pc(&self, pc: u64) -> Result<Option<Die<'_, 'exe>>> {
        debug!("looking up function for dwarf pc {pc:#x}");
        for unit in self.dwarf.compilation_units() {
            let root = self.dwarf.root_die(unit)?;
            let in_unit = match die_pc_range(&root) {
                Ok(ranges) => ranges.contains(pc)?,
                Err(_) => false,
            };
            if !in_unit {
                continue;
            }
            let mut stack = Vec::new();
            Self::find_pc(&root, pc, &mut stack)?;
            if let Some(die) = stack.into_iter().next() {
                return Ok(Some(die));
            }
        }
        Ok(None)
    }

    /// Scans children first so the most specific DIE lands at the bottom
    /// of the stack.
    fn find_pc<'d>(die: &Die<'d, 'exe>, pc: u64, stack: &mut Vec<Die<'d, 'exe>>) -> Result<bool> {
        let mut found = false;
        let mut children = die.children();
        while let Some(child) = children.next()? {
            if Self::find_pc(&child, pc, stack)? {
                found = true;
                break;
            }
        }

        if die.tag == DW_TAG_subprogram || die.tag == DW_TAG_inlined_subroutine {
            let contains = match die_pc_range(die) {
                Ok(ranges) => ranges.contains(pc)?,
                Err(_) => false,
            };
            if found || contains {
                found = true;
                stack.push(die.clone());
            }
        }
        Ok(found)
    }

    /// The line-table row covering the DWARF address `pc`, along with its
    /// unit index.
    pub fn line_row_for_dwarf_pc(&self, pc: u64) -> Result<Option<(usize, LineRow)>> {
        for unit in self.dwarf.compilation_units() {
            let root = self.dwarf.root_die(unit)?;
            let in_unit = match die_pc_range(&root) {
                Ok(ranges) => ranges.contains(pc)?,
                Err(_) => false,
            };
            if !in_unit {
                continue;
            }
            if let Some(table) = self.dwarf.line_table(unit)? {
                if let Some(row) = table.find_address(pc)? {
                    return Ok(Some((unit, row)));
                }
            }
        }
        Ok(None)
    }

    /// Like [`Debuggee::line_row_for_dwarf_pc`], resolved to a file path.
    pub fn source_location_for_dwarf_pc(&self, pc: u64) -> Result<Option<SourceLocation>> {
        let Some((unit, row)) = self.line_row_for_dwarf_pc(pc)? else {
            return Ok(None);
        };
        let table = self
            .dwarf
            .line_table(unit)?
            .expect("unit produced a line row without a line table");
        let file = table.file(row.file_index)?;
        Ok(Some(SourceLocation {
            file: file.path,
            line: row.line,
            column: row.column,
        }))
    }

    /// All `symtab`/`dynsym` symbols named `name`.
    pub fn lookup_symbol(&self, name: &str) -> Result<Vec<Symbol>> {
        let mut symbols = Vec::new();
        for index in 0..self.elf.section_count() {
            let Some(sec) = self.elf.section(index) else {
                continue;
            };
            if sec.hdr().typ != SHT_SYMTAB && sec.hdr().typ != SHT_DYNSYM {
                continue;
            }
            for sym in sec.as_symtab()?.iter() {
                let sym = sym?;
                if sym.name()? == name {
                    symbols.push(Symbol {
                        kind: sym.data().kind(),
                        name: name.to_string(),
                        addr: Addr::from(sym.data().value),
                    });
                }
            }
        }
        Ok(symbols)
    }

    /// Reads every variable and formal parameter of the function around
    /// the current program counter.
    pub fn read_variables(&self) -> Result<Vec<VariableInfo>> {
        let pc = get_reg(self.pid, PROGRAM_COUNTER)?;
        let dwarf_pc = self.offset_load_address(Addr::from(pc)).u64();
        let func = self
            .function_by_dwarf_pc(dwarf_pc)?
            .ok_or(DebuggerError::NotInFunction)?;

        let mut params: Vec<VariableInfo> = Vec::new();
        let mut locals: Vec<VariableInfo> = Vec::new();

        let mut children = func.children();
        while let Some(die) = children.next()? {
            if die.tag != DW_TAG_variable && die.tag != DW_TAG_formal_parameter {
                continue;
            }
            if !die.has(DW_AT_location) {
                continue;
            }

            let name = match die.resolve(DW_AT_name)? {
                Some(v) => v.as_string()?.to_string(),
                None => "<anonymous>".to_string(),
            };

            let location = die.attr(DW_AT_location)?;
            // only exprlocs are supported here; loclist-located variables
            // are skipped
            if location.value_type() != ValueType::Exprloc {
                warn!("variable {name} has a non-exprloc location, skipping");
                continue;
            }

            let mut ctx = PtraceExprContext {
                pid: self.pid,
                load_bias: self.load_bias,
            };
            let result = location.as_exprloc()?.evaluate(&mut ctx)?;

            let info = match result.location {
                ExprLocation::Address => VariableInfo {
                    name,
                    location: VariableLocation::Address(Addr::from(result.value)),
                    value: 0,
                    is_parameter: die.tag == DW_TAG_formal_parameter,
                },
                ExprLocation::Reg => VariableInfo {
                    name,
                    value: get_reg_by_dwarf(self.pid, result.value)?,
                    location: VariableLocation::Register {
                        dwarf: result.value,
                        name: crate::regs::register_from_dwarf(result.value)?
                            .name()
                            .to_string(),
                    },
                    is_parameter: die.tag == DW_TAG_formal_parameter,
                },
                other => {
                    return Err(DebuggerError::Expression(format!(
                        "unhandled variable location {other:?}"
                    )))
                }
            };
            if info.is_parameter {
                params.push(info);
            } else {
                locals.push(info);
            }
        }

        #[cfg(target_arch = "aarch64")]
        self.correct_aarch64_addresses(&mut params, &mut locals)?;

        let mut variables = params;
        variables.append(&mut locals);
        for var in &mut variables {
            if let VariableLocation::Address(addr) = var.location {
                var.value = mem_read_word(self.pid, addr)? as u64;
            }
        }
        Ok(variables)
    }

    /// The compiler stores the frame record with a store-pair whose
    /// immediate shifts every frame-relative address; undo it when that
    /// instruction is actually there.
    #[cfg(target_arch = "aarch64")]
    fn correct_aarch64_addresses(
        &self,
        params: &mut [VariableInfo],
        locals: &mut [VariableInfo],
    ) -> Result<()> {
        let fp = get_reg(self.pid, FRAME_POINTER)?;
        let probe = fp
            .wrapping_sub(params.len() as u64 * 4)
            .wrapping_sub(8);
        let word = mem_read_word(self.pid, Addr::from(probe))? as u64;
        let insn = (word & 0xffff_ffff) as u32;

        let Some(offset) = store_pair_offset(insn) else {
            return Ok(());
        };
        for var in params.iter_mut().chain(locals.iter_mut()) {
            if let VariableLocation::Address(addr) = &mut var.location {
                *addr = Addr::from((addr.u64() as i64 - offset) as u64);
            }
        }
        Ok(())
    }

    /// Walks the frame-pointer chain, resolving each return address to its
    /// function, until `main`.
    pub fn backtrace(&self) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();

        let pc = get_reg(self.pid, PROGRAM_COUNTER)?;
        let mut func = self
            .function_by_dwarf_pc(self.offset_load_address(Addr::from(pc)).u64())?
            .ok_or(DebuggerError::NotInFunction)?;
        self.push_frame(&mut frames, &func)?;

        let mut frame_pointer = get_reg(self.pid, FRAME_POINTER)?;
        let mut return_address = mem_read_word(self.pid, Addr::from(frame_pointer) + 8)? as u64;

        while self.die_name(&func)?.as_deref() != Some("main") {
            if frames.len() >= MAX_FRAMES {
                warn!("backtrace did not reach main after {MAX_FRAMES} frames, stopping");
                break;
            }
            let dwarf_ret = self.offset_load_address(Addr::from(return_address)).u64();
            func = self.function_by_dwarf_pc(dwarf_ret)?.ok_or_else(|| {
                DebuggerError::NotFound(format!(
                    "no function for return address {return_address:#x}"
                ))
            })?;
            self.push_frame(&mut frames, &func)?;

            frame_pointer = mem_read_word(self.pid, Addr::from(frame_pointer))? as u64;
            return_address = mem_read_word(self.pid, Addr::from(frame_pointer) + 8)? as u64;
        }

        Ok(frames)
    }

    fn push_frame(&self, frames: &mut Vec<Frame>, func: &Die<'_, 'exe>) -> Result<()> {
        let low_pc = match func.resolve(DW_AT_low_pc)? {
            Some(v) => Addr::from(v.as_address()?),
            None => Addr::NULL,
        };
        frames.push(Frame {
            index: frames.len(),
            low_pc,
            name: self.die_name(func)?.unwrap_or_else(|| "??".to_string()),
        });
        Ok(())
    }

    fn die_name(&self, die: &Die<'_, 'exe>) -> Result<Option<String>> {
        Ok(match die.resolve(DW_AT_name)? {
            Some(v) => Some(v.as_string()?.to_string()),
            None => None,
        })
    }

    /// A word of debuggee memory.
    pub fn read_word(&self, addr: Addr) -> Result<Word> {
        mem_read_word(self.pid, addr)
    }
}

/// Evaluation context bound to the traced child: registers through the
/// DWARF numbering, memory through ptrace, the PC relative to the load
/// bias.
struct PtraceExprContext {
    pid: Pid,
    load_bias: Addr,
}

impl ExprContext for PtraceExprContext {
    fn reg(&mut self, regnum: u64) -> Result<u64> {
        get_reg_by_dwarf(self.pid, regnum)
    }

    fn deref_size(&mut self, address: u64, _size: u8) -> Result<u64> {
        // TODO: honor the requested size instead of returning the whole
        // word
        let addr = Addr::from(address).offset_dwarf_address(self.load_bias);
        Ok(mem_read_word(self.pid, addr)? as u64)
    }

    fn pc(&mut self) -> Result<u64> {
        Ok(get_reg(self.pid, PROGRAM_COUNTER)?.wrapping_sub(self.load_bias.u64()))
    }
}

/// Decodes the signed, scaled immediate of an AArch64 load/store-pair
/// instruction, `None` for anything else.
#[cfg_attr(not(target_arch = "aarch64"), allow(dead_code))]
fn store_pair_offset(insn: u32) -> Option<i64> {
    if (insn >> 25) & 0x1f != 0b10100 {
        return None;
    }
    let imm7 = u64::from((insn >> 15) & 0x7f);
    let opc = (insn >> 30) & 0x3;
    let scale = 2 + (opc >> 1);

    // sign-extend the 7-bit immediate, then scale it
    let signed = if imm7 & 0x40 != 0 {
        (imm7 | !0x7f) as i64
    } else {
        imm7 as i64
    };
    Some(signed << scale)
}

#[cfg(test)]
mod test {
    use super::store_pair_offset;

    #[test]
    fn test_store_pair_offset() {
        // stp x29, x30, [sp, #-32]! : opc=10, pre-index, imm7=-4
        let insn: u32 = 0xa9be_7bfd;
        assert_eq!(store_pair_offset(insn), Some(-32));

        // stp x29, x30, [sp, #16]
        let insn: u32 = 0xa901_7bfd;
        assert_eq!(store_pair_offset(insn), Some(16));

        // not a load/store pair (mov x0, #0)
        assert_eq!(store_pair_offset(0xd280_0000), None);
    }
}
