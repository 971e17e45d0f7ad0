//! # Debugger Control Core
//!
//! Owns the session: launching the child under ptrace, the signal-wait
//! loop, breakpoint management, the stepping algorithms, and the dispatch
//! between UI commands and [`Debuggee`] queries.
//!
//! Every forward movement (continue and all steps) first steps over an
//! enabled breakpoint at the current PC: disable, single-step, re-enable,
//! with the wait in between. The signal loop rolls the PC back onto the
//! trap address when a planted breakpoint is reported, so the current PC
//! always names the breakpoint that was hit.

use std::ffi::CString;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use nix::sys::personality::{self, Persona};
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execv, ForkResult};
use tracing::{debug, error, info, trace, warn};

use crate::addr::Addr;
use crate::breakpoint::{Breakpoint, TRAP_PC_ADJUST};
use crate::consts::{SI_KERNEL, TRAP_BRKPT, TRAP_TRACE};
use crate::debuggee::Debuggee;
use crate::dwarf::consts::{DW_AT_high_pc, DW_AT_low_pc, DW_AT_name};
use crate::dwarf::value::ValueType;
use crate::dwarf::DwarfInfo;
use crate::elf::ElfFile;
use crate::errors::{DebuggerError, Result};
use crate::feedback::{DebugEvent, Feedback, RegisterValue};
use crate::regs::{self, Register, FRAME_POINTER, PROGRAM_COUNTER};
use crate::ui::{BreakpointSpec, DebuggerUI, Status};
use crate::{mem_read_word, mem_write_word, Word};

/// The debugger session: debuggee, UI, and the mapped executable image
pub struct Debugger<'exe, UI: DebuggerUI> {
    pub(crate) debuggee: Option<Debuggee<'exe>>,
    ui: UI,
    program_path: Option<PathBuf>,
    stored_image: Option<Mmap>,
}

impl<'exe, UI: DebuggerUI> Debugger<'exe, UI> {
    /// Creates a session without a debuggee; call [`Debugger::run`] to
    /// launch one.
    pub fn build(ui: UI) -> Result<Self> {
        Ok(Debugger {
            debuggee: None,
            ui,
            program_path: None,
            stored_image: None,
        })
    }

    /// The path of the executable being debugged, once one was launched
    #[must_use]
    pub fn program_path(&self) -> Option<&Path> {
        self.program_path.as_deref()
    }

    /// Maps and parses the executable, then launches it under ptrace.
    ///
    /// # Errors
    ///
    /// Fails when a debuggee is already running, the path is not a file,
    /// the ELF or DWARF data cannot be parsed, or the fork fails. These
    /// are the errors that end a session.
    pub fn run(&mut self, executable_path: impl AsRef<Path>, arguments: &[CString]) -> Result<Feedback> {
        if self.debuggee.is_some() {
            return Err(DebuggerError::AlreadyRunning);
        }

        let path: &Path = executable_path.as_ref();
        if !path.exists() {
            let err = DebuggerError::ExecutableDoesNotExist(path.to_string_lossy().to_string());
            error!("{err}");
            return Err(err);
        }
        if !path.is_file() {
            let err = DebuggerError::ExecutableIsNotAFile(path.to_string_lossy().to_string());
            error!("{err}");
            return Err(err);
        }

        let file = std::fs::File::open(path)?;
        self.program_path = Some(path.to_path_buf());
        self.stored_image = Some(unsafe { Mmap::map(&file)? });

        // The image is owned by this session and outlives the debuggee, so
        // hand the views a borrow for the whole session.
        let image: &[u8] = self.stored_image.as_ref().expect("image was just mapped");
        let data: &'exe [u8] = unsafe { std::mem::transmute::<&[u8], &'exe [u8]>(image) };

        let elf = ElfFile::parse(data)?;
        let dwarf = DwarfInfo::load(&elf)?;

        self.launch_debuggee(path, arguments, elf, dwarf)?;
        Ok(Feedback::Ok)
    }

    fn launch_debuggee(
        &mut self,
        path: &Path,
        arguments: &[CString],
        elf: ElfFile<'exe>,
        dwarf: DwarfInfo<'exe>,
    ) -> Result<()> {
        let fork_res = unsafe { nix::unistd::fork() };
        match fork_res {
            Err(e) => {
                error!("could not start executable: {e}");
                Err(e.into())
            }
            Ok(ForkResult::Parent { child: pid }) => {
                // the child stops on its first instruction after execv
                waitpid(pid, None)?;
                info!("debuggee running with pid {pid}");
                self.debuggee = Some(Debuggee::build(pid, elf, dwarf)?);
                Ok(())
            }
            Ok(ForkResult::Child) => {
                let cpath = CString::new(path.to_string_lossy().to_string().as_str())?;
                let mut argv = vec![cpath.clone()];
                argv.extend_from_slice(arguments);

                personality::set(Persona::ADDR_NO_RANDOMIZE)
                    .inspect_err(|e| eprintln!("could not disable ASLR: {e}"))?;
                ptrace::traceme().inspect_err(|e| eprintln!("error while doing traceme: {e}"))?;
                execv(&cpath, &argv)?;
                unreachable!()
            }
        }
    }

    /// The main loop: feed feedback to the UI, execute the command it
    /// returns, repeat until quit.
    pub fn run_debugger(&mut self) -> Result<()> {
        let mut feedback: Feedback = Feedback::Ok;
        loop {
            let ui_res = self.ui.process(&feedback);
            feedback = match ui_res {
                Err(e) => {
                    error!("{e}");
                    return Err(e);
                }
                Ok(s) => match s {
                    Status::DebuggerQuit => break,
                    Status::Continue => self.cont(None),
                    Status::SetBreakpoint(spec) => self.set_bp_at(spec),
                    Status::DelBreakpoint(addr) => self.del_bp(addr),
                    Status::DumpRegisters => self.dump_regs(),
                    Status::ReadRegister(r) => self.read_register(r),
                    Status::SetRegister(r, v) => self.write_register(r, v),
                    Status::ReadMem(a) => self.read_mem(a),
                    Status::WriteMem(a, v) => self.write_mem(a, v),
                    Status::StepIn => self.step_in(),
                    Status::StepOver => self.step_over(),
                    Status::StepOut => self.step_out(),
                    Status::StepSingle => self.step_single(),
                    Status::Variables => self.read_variables(),
                    Status::Backtrace => self.backtrace(),
                    Status::LookupSymbol(name) => self.lookup_symbol(&name),
                },
            }
            .into();

            // clean up when the debuggee is gone
            if let Feedback::Exit(_) = feedback {
                self.debuggee = None;
            }
        }

        Ok(())
    }

    /// Kills a still-running debuggee.
    pub fn cleanup(&self) -> Result<()> {
        if let Some(dbge) = &self.debuggee {
            dbge.kill()?;
        }
        Ok(())
    }

    fn debuggee(&self) -> Result<&Debuggee<'exe>> {
        self.debuggee.as_ref().ok_or(DebuggerError::NoDebugee)
    }

    fn debuggee_mut(&mut self) -> Result<&mut Debuggee<'exe>> {
        self.debuggee.as_mut().ok_or(DebuggerError::NoDebugee)
    }

    pub fn get_reg(&self, r: Register) -> Result<u64> {
        regs::get_reg(self.debuggee()?.pid, r)
    }

    pub fn set_reg(&self, r: Register, value: u64) -> Result<()> {
        regs::set_reg(self.debuggee()?.pid, r, value)
    }

    /// The current program counter
    pub fn get_current_addr(&self) -> Result<Addr> {
        Ok(self.get_reg(PROGRAM_COUNTER)?.into())
    }

    /// Waits for the debuggee to stop and translates the stop into a
    /// [`Feedback`].
    pub fn wait_signal(&self) -> Result<Feedback> {
        match self.wait(&[])? {
            WaitStatus::Exited(_, exit_code) => {
                info!("debuggee exited with code {exit_code}");
                Ok(Feedback::Exit(exit_code))
            }
            WaitStatus::Signaled(_, signal, _) => {
                debug!("debuggee terminated by signal {signal}");
                Ok(Feedback::Exit(-1))
            }
            _ => {
                let dbge = self.debuggee()?;
                let siginfo = ptrace::getsiginfo(dbge.pid)?;
                let signal = Signal::try_from(siginfo.si_signo)?;
                match signal {
                    Signal::SIGTRAP => self.handle_sigtrap(&siginfo),
                    Signal::SIGSEGV => {
                        info!("debuggee segfaulted, si_code {}", siginfo.si_code);
                        Ok(Feedback::Event(DebugEvent::Segfault {
                            si_code: siginfo.si_code,
                        }))
                    }
                    other => {
                        info!("debuggee received {}", other.as_str());
                        Ok(Feedback::Event(DebugEvent::OtherSignal {
                            name: other.as_str().to_string(),
                        }))
                    }
                }
            }
        }
    }

    fn handle_sigtrap(&self, siginfo: &nix::libc::siginfo_t) -> Result<Feedback> {
        match siginfo.si_code {
            SI_KERNEL | TRAP_BRKPT => {
                // a planted breakpoint; roll the pc back onto the trap
                let pc = self.get_reg(PROGRAM_COUNTER)? - TRAP_PC_ADJUST as u64;
                self.set_reg(PROGRAM_COUNTER, pc)?;

                let dbge = self.debuggee()?;
                let dwarf_pc = dbge.offset_load_address(Addr::from(pc));
                let location = dbge
                    .source_location_for_dwarf_pc(dwarf_pc.u64())
                    .unwrap_or(None);

                info!("hit breakpoint at {}", Addr::from(pc));
                Ok(Feedback::Event(DebugEvent::HitBreakpoint {
                    addr: Addr::from(pc),
                    file: location.as_ref().map(|l| l.file.clone()),
                    line: location.as_ref().map(|l| l.line),
                }))
            }
            TRAP_TRACE => {
                trace!("single step complete");
                Ok(Feedback::Event(DebugEvent::SingleStepComplete))
            }
            other => {
                warn!("strange SIGTRAP code: {other}");
                Ok(Feedback::Ok)
            }
        }
    }

    pub fn wait(&self, options: &[WaitPidFlag]) -> Result<WaitStatus> {
        let mut flags = WaitPidFlag::empty();
        for f in options {
            flags |= *f;
        }
        Ok(waitpid(
            self.debuggee()?.pid,
            if flags.is_empty() { None } else { Some(flags) },
        )?)
    }

    /// If an enabled breakpoint sits at the current PC, steps over it:
    /// disable, single-step, re-enable. The precondition of every
    /// resumption.
    pub fn step_over_breakpoint(&mut self) -> Result<Feedback> {
        let here = self.get_current_addr()?;
        {
            let dbge = self.debuggee_mut()?;
            match dbge.breakpoints.get_mut(&here) {
                Some(bp) if bp.is_enabled() => {
                    trace!("stepping over breakpoint at {here}");
                    bp.disable()?;
                }
                _ => return Ok(Feedback::Ok),
            }
            ptrace::step(dbge.pid, None)?;
        }

        let feedback = self.wait_signal()?;
        if matches!(feedback, Feedback::Exit(_)) {
            return Ok(feedback);
        }

        if let Some(bp) = self.debuggee_mut()?.breakpoints.get_mut(&here) {
            bp.enable()?;
        }
        Ok(Feedback::Ok)
    }

    /// Continues the debuggee until the next stop.
    pub fn cont(&mut self, sig: Option<Signal>) -> Result<Feedback> {
        let feedback = self.step_over_breakpoint()?;
        if matches!(feedback, Feedback::Exit(_)) {
            return Ok(feedback);
        }
        ptrace::cont(self.debuggee()?.pid, sig)?;
        self.wait_signal()
    }

    /// One machine instruction, stepping over a breakpoint if one sits at
    /// the current PC.
    fn step_instruction(&mut self) -> Result<Feedback> {
        let here = self.get_current_addr()?;
        let has_bp = self
            .debuggee()?
            .breakpoints
            .get(&here)
            .is_some_and(Breakpoint::is_enabled);

        if has_bp {
            self.step_over_breakpoint()
        } else {
            ptrace::step(self.debuggee()?.pid, None)?;
            self.wait_signal()
        }
    }

    /// The `stepi` command: one instruction, then the current source
    /// location.
    pub fn step_single(&mut self) -> Result<Feedback> {
        let feedback = self.step_instruction()?;
        if matches!(feedback, Feedback::Exit(_)) {
            return Ok(feedback);
        }
        self.current_location()
    }

    fn current_location(&self) -> Result<Feedback> {
        let dbge = self.debuggee()?;
        let pc = dbge.offset_load_address(self.get_current_addr()?);
        match dbge.source_location_for_dwarf_pc(pc.u64())? {
            Some(location) => Ok(Feedback::Location(location)),
            None => {
                warn!("no line information for {pc}");
                Ok(Feedback::Ok)
            }
        }
    }

    /// Source-level step-in: single instructions until the line-table row
    /// changes.
    pub fn step_in(&mut self) -> Result<Feedback> {
        let start = self.current_line()?.ok_or_else(|| {
            DebuggerError::NotFound("no line information for the current pc".to_string())
        })?;

        loop {
            let feedback = self.step_instruction()?;
            if matches!(feedback, Feedback::Exit(_)) {
                return Ok(feedback);
            }
            match self.current_line()? {
                Some(line) if line == start => continue,
                Some(_) => break,
                None => {
                    return Err(DebuggerError::NotFound(
                        "stepped into code without line information".to_string(),
                    ))
                }
            }
        }

        self.current_location()
    }

    fn current_line(&self) -> Result<Option<u64>> {
        let dbge = self.debuggee()?;
        let pc = dbge.offset_load_address(self.get_current_addr()?);
        Ok(dbge
            .line_row_for_dwarf_pc(pc.u64())?
            .map(|(_, row)| row.line))
    }

    /// Source-level step-over: plant temporary breakpoints on every other
    /// line of the function and on the return address, then continue.
    pub fn step_over(&mut self) -> Result<Feedback> {
        let mut targets: Vec<Addr> = Vec::new();
        {
            let dbge = self.debuggee()?;
            let pc = dbge.offset_load_address(self.get_current_addr()?);
            let func = dbge
                .function_by_dwarf_pc(pc.u64())?
                .ok_or(DebuggerError::NotInFunction)?;

            let func_entry = func.attr(DW_AT_low_pc)?.as_address()?;
            let func_end = {
                let value = func.attr(DW_AT_high_pc)?;
                match value.value_type() {
                    ValueType::Address => value.as_address()?,
                    _ => func_entry + value.as_uconstant()?,
                }
            };

            let start_row = dbge
                .line_row_for_dwarf_pc(pc.u64())?
                .ok_or_else(|| {
                    DebuggerError::NotFound("no line information for the current pc".to_string())
                })?
                .1;

            let unit = func.unit;
            let table = dbge.dwarf.line_table(unit)?.ok_or_else(|| {
                DebuggerError::NotFound("unit has no line table".to_string())
            })?;
            let mut rows = table.rows();
            while let Some(row) = rows.next_row()? {
                if row.end_sequence {
                    continue;
                }
                if row.address < func_entry || row.address >= func_end {
                    continue;
                }
                if row.address != start_row.address {
                    targets.push(dbge.offset_dwarf_address(Addr::from(row.address)));
                }
            }

            let frame_pointer = self.get_reg(FRAME_POINTER)?;
            let return_address =
                mem_read_word(dbge.pid, Addr::from(frame_pointer) + 8)? as u64;
            targets.push(Addr::from(return_address));
        }

        let mut to_delete = Vec::new();
        for addr in targets {
            if !self.debuggee()?.breakpoints.contains_key(&addr) {
                self.set_bp(addr)?;
                to_delete.push(addr);
            }
        }

        let feedback = self.cont(None)?;
        if matches!(feedback, Feedback::Exit(_)) {
            return Ok(feedback);
        }

        for addr in to_delete {
            self.del_bp(addr)?;
        }
        Ok(feedback)
    }

    /// Runs until the current function returns, via a temporary breakpoint
    /// at the return address.
    pub fn step_out(&mut self) -> Result<Feedback> {
        {
            let dbge = self.debuggee()?;
            let pc = dbge.offset_load_address(self.get_current_addr()?);
            match dbge.function_by_dwarf_pc(pc.u64())? {
                Some(func) => {
                    if func
                        .resolve(DW_AT_name)?
                        .map(|v| v.as_string().map(str::to_string))
                        .transpose()?
                        .as_deref()
                        == Some("main")
                    {
                        error!("refusing to step out of the earliest stack frame");
                        return Err(DebuggerError::StepOutMain);
                    }
                }
                None => warn!("did not find debug symbol for current address"),
            }
        }

        let frame_pointer = self.get_reg(FRAME_POINTER)?;
        let return_address: Addr =
            mem_read_word(self.debuggee()?.pid, Addr::from(frame_pointer) + 8)?.into();
        trace!("frame pointer: {frame_pointer:#x}");
        trace!("return address: {return_address}");

        let should_remove = if self
            .debuggee()?
            .breakpoints
            .contains_key(&return_address)
        {
            false
        } else {
            self.set_bp(return_address)?;
            true
        };

        let feedback = self.cont(None)?;
        if matches!(feedback, Feedback::Exit(_)) {
            return Ok(feedback);
        }

        if should_remove {
            self.del_bp(return_address)?;
        }
        Ok(feedback)
    }

    /// Plants a breakpoint per the user's spec: address, source line, or
    /// function name.
    pub fn set_bp_at(&mut self, spec: BreakpointSpec) -> Result<Feedback> {
        match spec {
            BreakpointSpec::Address(addr) => self.set_bp(addr),
            BreakpointSpec::SourceLine(file, line) => self.set_bp_at_source_line(&file, line),
            BreakpointSpec::Function(name) => self.set_bp_at_function(&name),
        }
    }

    /// Enables a breakpoint at an absolute runtime address.
    pub fn set_bp(&mut self, addr: Addr) -> Result<Feedback> {
        let dbge = self.debuggee_mut()?;
        let mut bp = Breakpoint::new(dbge.pid, addr);
        bp.enable()?;
        dbge.breakpoints.insert(addr, bp);
        debug!("set breakpoint at {addr}");

        Ok(Feedback::Ok)
    }

    /// Disables and forgets the breakpoint at `addr`.
    pub fn del_bp(&mut self, addr: Addr) -> Result<Feedback> {
        let dbge = self.debuggee_mut()?;

        if let Some(mut bp) = dbge.breakpoints.remove(&addr) {
            if bp.is_enabled() {
                bp.disable()?;
            }
        } else {
            warn!("removed a breakpoint at {addr} that did not exist");
        }

        Ok(Feedback::Ok)
    }

    /// Finds the first `is_stmt` row with the given line in a unit whose
    /// name ends with `file`, and plants there.
    pub fn set_bp_at_source_line(&mut self, file: &str, line: u64) -> Result<Feedback> {
        let mut target = None;
        {
            let dbge = self.debuggee()?;
            'units: for unit in dbge.dwarf.compilation_units() {
                let Some(unit_name) = dbge.dwarf.unit_name(unit)? else {
                    continue;
                };
                if !unit_name.ends_with(file) {
                    continue;
                }
                let Some(table) = dbge.dwarf.line_table(unit)? else {
                    continue;
                };
                let mut rows = table.rows();
                while let Some(row) = rows.next_row()? {
                    if row.is_stmt && !row.end_sequence && row.line == line {
                        target = Some(dbge.offset_dwarf_address(Addr::from(row.address)));
                        break 'units;
                    }
                }
            }
        }

        match target {
            Some(addr) => self.set_bp(addr),
            None => Err(DebuggerError::NotFound(format!(
                "no statement for {file}:{line}"
            ))),
        }
    }

    /// Plants at the first line-table row after the prologue of every
    /// function with the given name.
    pub fn set_bp_at_function(&mut self, name: &str) -> Result<Feedback> {
        let mut targets = Vec::new();
        {
            let dbge = self.debuggee()?;
            for unit in dbge.dwarf.compilation_units() {
                let root = dbge.dwarf.root_die(unit)?;
                let mut children = root.children();
                while let Some(die) = children.next()? {
                    if !die.has(DW_AT_name) || !die.has(DW_AT_low_pc) {
                        continue;
                    }
                    if die.attr(DW_AT_name)?.as_string()? != name {
                        continue;
                    }
                    let low_pc = die.attr(DW_AT_low_pc)?.as_address()?;

                    let Some(table) = dbge.dwarf.line_table(unit)? else {
                        continue;
                    };
                    let Some(entry) = table.find_address(low_pc)? else {
                        continue;
                    };
                    // skip the prologue: one row forward
                    let mut rows = table.rows();
                    while let Some(row) = rows.next_row()? {
                        if row.address == entry.address {
                            if let Some(next) = rows.next_row()? {
                                targets.push(dbge.offset_dwarf_address(Addr::from(next.address)));
                            }
                            break;
                        }
                    }
                }
            }
        }

        if targets.is_empty() {
            return Err(DebuggerError::NotFound(format!("no function named {name}")));
        }
        for addr in targets {
            self.set_bp(addr)?;
        }
        Ok(Feedback::Ok)
    }

    pub fn dump_regs(&self) -> Result<Feedback> {
        let regs = regs::dump_regs(self.debuggee()?.pid)?;
        Ok(Feedback::Registers(
            regs.into_iter()
                .map(|(name, value)| RegisterValue { name, value })
                .collect(),
        ))
    }

    pub fn read_register(&self, r: Register) -> Result<Feedback> {
        Ok(Feedback::Word(self.get_reg(r)? as Word))
    }

    pub fn write_register(&self, r: Register, value: u64) -> Result<Feedback> {
        self.set_reg(r, value)?;
        Ok(Feedback::Ok)
    }

    pub fn read_mem(&self, addr: Addr) -> Result<Feedback> {
        let word = mem_read_word(self.debuggee()?.pid, addr)?;
        Ok(Feedback::Word(word))
    }

    pub fn write_mem(&self, addr: Addr, value: Word) -> Result<Feedback> {
        mem_write_word(self.debuggee()?.pid, addr, value)?;
        Ok(Feedback::Ok)
    }

    pub fn read_variables(&self) -> Result<Feedback> {
        Ok(Feedback::Variables(self.debuggee()?.read_variables()?))
    }

    pub fn backtrace(&self) -> Result<Feedback> {
        Ok(Feedback::Backtrace(self.debuggee()?.backtrace()?))
    }

    pub fn lookup_symbol(&self, name: &str) -> Result<Feedback> {
        Ok(Feedback::Symbols(self.debuggee()?.lookup_symbol(name)?))
    }
}
