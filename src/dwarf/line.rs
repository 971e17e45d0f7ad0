//! # Line-Number Table
//!
//! The line table maps addresses to source coordinates. It is stored as a
//! byte-coded state machine (DWARF §6.2): a header fixes the decoding
//! parameters and the file tables, then the program is replayed to emit
//! rows. Within a sequence, rows are ordered by increasing address, and a
//! row describes every PC up to the next row's address; each sequence ends
//! with an `end_sequence` row.
//!
//! File entries can also be defined mid-program (`DW_LNE_define_file`), so
//! the file list grows behind a `RefCell` while rows are replayed.

use std::cell::{Cell, RefCell};

use crate::dwarf::consts::{
    DW_LNE_define_file, DW_LNE_end_sequence, DW_LNE_lo_user, DW_LNE_set_address,
    DW_LNE_set_discriminator, DW_LNS_advance_line, DW_LNS_advance_pc, DW_LNS_const_add_pc,
    DW_LNS_copy, DW_LNS_fixed_advance_pc, DW_LNS_negate_stmt, DW_LNS_set_basic_block,
    DW_LNS_set_column, DW_LNS_set_file, DW_LNS_set_isa, DW_LNS_set_prologue_end,
    DW_LNS_set_epilogue_begin,
};
use crate::dwarf::cursor::Cursor;
use crate::dwarf::{DwarfFormat, Section};
use crate::errors::{DebuggerError, Result};

/// Expected operand counts for the standard opcodes, used to check the
/// `standard_opcode_lengths` header field
const OPCODE_LENGTHS: [u8; 13] = [0, 0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1];

/// A source file of the line table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineFile {
    /// Absolute path of the source file
    pub path: String,
    /// Implementation-defined modification time, 0 when unknown
    pub mtime: u64,
    /// Size in bytes, 0 when unknown
    pub length: u64,
}

/// One row of the line table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRow {
    pub address: u64,
    /// Operation index within a VLIW instruction; 0 elsewhere
    pub op_index: u64,
    pub file_index: u64,
    pub line: u64,
    pub column: u64,
    /// Whether this is a recommended breakpoint location
    pub is_stmt: bool,
    pub basic_block: bool,
    /// Set on the row closing a sequence; only `address` is meaningful
    pub end_sequence: bool,
    pub prologue_end: bool,
    pub epilogue_begin: bool,
    pub isa: u64,
    pub discriminator: u64,
}

impl LineRow {
    fn reset(is_stmt: bool) -> Self {
        LineRow {
            address: 0,
            op_index: 0,
            file_index: 1,
            line: 1,
            column: 0,
            is_stmt,
            basic_block: false,
            end_sequence: false,
            prologue_end: false,
            epilogue_begin: false,
            isa: 0,
            discriminator: 0,
        }
    }
}

/// The line table of one compilation unit
pub struct LineTable<'a> {
    sec: Section<'a>,
    program_offset: usize,
    minimum_instruction_length: u8,
    maximum_operations_per_instruction: u8,
    default_is_stmt: bool,
    line_base: i8,
    line_range: u8,
    opcode_base: u8,
    include_directories: Vec<String>,
    files: RefCell<Vec<LineFile>>,
    last_file_name_end: Cell<usize>,
    files_complete: Cell<bool>,
}

impl<'a> LineTable<'a> {
    /// Parses the header of the line program at `offset` of `.debug_line`.
    ///
    /// `comp_dir` and `cu_name` come from the owning compilation unit and
    /// anchor the directory and file tables.
    pub fn parse(
        sec: Section<'a>,
        offset: usize,
        addr_size: u8,
        comp_dir: &str,
        cu_name: &str,
    ) -> Result<Self> {
        let comp_dir = if comp_dir.is_empty() || comp_dir.ends_with('/') {
            comp_dir.to_string()
        } else {
            format!("{comp_dir}/")
        };

        let mut outer = Cursor::new(sec, offset);
        let subsec = outer.subsection()?;
        let subsec = subsec.slice(0, usize::MAX, DwarfFormat::Unknown, addr_size);
        let mut cur = Cursor::new(subsec, 0);
        cur.skip_initial_length()?;

        let version = cur.fixed_u16()?;
        if !(2..=4).contains(&version) {
            return Err(DebuggerError::Format(format!(
                "unknown line number table version {version}"
            )));
        }

        let header_length = cur.offset()?;
        let program_offset = cur.section_offset() + header_length;

        let minimum_instruction_length = cur.fixed_u8()?;
        let maximum_operations_per_instruction = if version >= 4 { cur.fixed_u8()? } else { 1 };
        if maximum_operations_per_instruction == 0 {
            return Err(DebuggerError::Format(
                "maximum_operations_per_instruction cannot be 0 in line number table".to_string(),
            ));
        }
        let default_is_stmt = cur.fixed_u8()? != 0;
        let line_base = cur.fixed_i8()?;
        let line_range = cur.fixed_u8()?;
        if line_range == 0 {
            return Err(DebuggerError::Format(
                "line_range cannot be 0 in line number table".to_string(),
            ));
        }
        let opcode_base = cur.fixed_u8()?;

        for i in 1..opcode_base {
            let length = cur.fixed_u8()?;
            if let Some(&expected) = OPCODE_LENGTHS.get(i as usize) {
                if length != expected {
                    return Err(DebuggerError::Format(format!(
                        "expected {expected} arguments for line number opcode {i}, got {length}"
                    )));
                }
            }
        }

        // directory 0 is implicitly the compilation directory
        let mut include_directories = vec![comp_dir.clone()];
        loop {
            let dir = cur.cstr()?;
            if dir.is_empty() {
                break;
            }
            let dir = if dir.ends_with('/') {
                dir.to_string()
            } else {
                format!("{dir}/")
            };
            if dir.starts_with('/') {
                include_directories.push(dir);
            } else {
                include_directories.push(format!("{comp_dir}{dir}"));
            }
        }

        // file 0 is the unit's primary source file
        let primary = if !cu_name.is_empty() && cu_name.starts_with('/') {
            cu_name.to_string()
        } else {
            format!("{comp_dir}{cu_name}")
        };

        let table = LineTable {
            sec: subsec,
            program_offset,
            minimum_instruction_length,
            maximum_operations_per_instruction,
            default_is_stmt,
            line_base,
            line_range,
            opcode_base,
            include_directories,
            files: RefCell::new(vec![LineFile {
                path: primary,
                mtime: 0,
                length: 0,
            }]),
            last_file_name_end: Cell::new(0),
            files_complete: Cell::new(false),
        };

        while table.read_file_entry(&mut cur, true)? {}

        Ok(table)
    }

    fn read_file_entry(&self, cur: &mut Cursor<'a>, in_header: bool) -> Result<bool> {
        let name = cur.cstr()?.to_string();
        if in_header && name.is_empty() {
            return Ok(false);
        }
        let dir_index = cur.uleb128()? as usize;
        let mtime = cur.uleb128()?;
        let length = cur.uleb128()?;

        // a define_file seen again during a re-replay
        if cur.section_offset() <= self.last_file_name_end.get() {
            return Ok(true);
        }
        self.last_file_name_end.set(cur.section_offset());

        let path = if name.starts_with('/') {
            name
        } else {
            let dir = self.include_directories.get(dir_index).ok_or_else(|| {
                DebuggerError::Format(format!(
                    "file name directory index out of range: {dir_index}"
                ))
            })?;
            format!("{dir}{name}")
        };
        self.files.borrow_mut().push(LineFile {
            path,
            mtime,
            length,
        });
        Ok(true)
    }

    /// Replays the line program from the start.
    #[must_use]
    pub fn rows(&self) -> LineRows<'_, 'a> {
        LineRows {
            table: self,
            pos: self.program_offset,
            regs: LineRow::reset(self.default_is_stmt),
        }
    }

    /// The row covering `addr`: the last row at or before it, provided the
    /// next row lies beyond it and the row does not close a sequence.
    pub fn find_address(&self, addr: u64) -> Result<Option<LineRow>> {
        let mut rows = self.rows();
        let Some(mut prev) = rows.next_row()? else {
            return Ok(None);
        };
        while let Some(row) = rows.next_row()? {
            if prev.address <= addr && row.address > addr && !prev.end_sequence {
                return Ok(Some(prev));
            }
            prev = row;
        }
        Ok(None)
    }

    /// The `index`th file of the table. Index 0 is the unit's primary
    /// file.
    ///
    /// When the index lies past the header's file list, the remaining
    /// program is replayed once in case a `define_file` supplies it.
    pub fn file(&self, index: u64) -> Result<LineFile> {
        let index = index as usize;
        if index >= self.files.borrow().len() && !self.files_complete.get() {
            let mut rows = self.rows();
            while rows.next_row()?.is_some() {}
        }
        let files = self.files.borrow();
        files.get(index).cloned().ok_or_else(|| {
            DebuggerError::Range(format!(
                "file name index {index} exceeds file table size of {}",
                files.len()
            ))
        })
    }
}

/// A replay of a line program, yielding rows in program order
pub struct LineRows<'t, 'a> {
    table: &'t LineTable<'a>,
    pos: usize,
    regs: LineRow,
}

impl<'t, 'a> LineRows<'t, 'a> {
    /// Executes opcodes until a row is emitted; `None` at the end of the
    /// program.
    pub fn next_row(&mut self) -> Result<Option<LineRow>> {
        let mut cur = Cursor::new(self.table.sec, self.pos);

        let mut emitted = None;
        let mut stepped = false;
        while !cur.at_end() && emitted.is_none() {
            emitted = self.step(&mut cur)?;
            stepped = true;
        }
        self.pos = cur.section_offset();

        let Some(row) = emitted else {
            if stepped {
                return Err(DebuggerError::Format(
                    "unexpected end of line table".to_string(),
                ));
            }
            self.table.files_complete.set(true);
            return Ok(None);
        };

        if row.file_index as usize >= self.table.files.borrow().len() {
            return Err(DebuggerError::Format(format!(
                "bad file index {} in line table",
                row.file_index
            )));
        }
        Ok(Some(row))
    }

    /// Emits the current registers and clears the per-row flags.
    fn emit(&mut self) -> LineRow {
        let row = self.regs;
        self.regs.basic_block = false;
        self.regs.prologue_end = false;
        self.regs.epilogue_begin = false;
        self.regs.discriminator = 0;
        row
    }

    /// Advances `(address, op_index)` by `op_advance` operation units.
    fn advance(&mut self, op_advance: u64) {
        let max_ops = u64::from(self.table.maximum_operations_per_instruction);
        let total = self.regs.op_index + op_advance;
        self.regs.address += u64::from(self.table.minimum_instruction_length) * (total / max_ops);
        self.regs.op_index = total % max_ops;
    }

    fn step(&mut self, cur: &mut Cursor<'a>) -> Result<Option<LineRow>> {
        let opcode = cur.fixed_u8()?;

        if opcode >= self.table.opcode_base {
            // special opcode
            let adjusted = opcode - self.table.opcode_base;
            let op_advance = u64::from(adjusted / self.table.line_range);
            let line_inc =
                i64::from(self.table.line_base) + i64::from(adjusted % self.table.line_range);

            self.regs.line = self.regs.line.wrapping_add_signed(line_inc);
            self.advance(op_advance);
            return Ok(Some(self.emit()));
        }

        if opcode != 0 {
            // standard opcode
            match opcode {
                DW_LNS_copy => return Ok(Some(self.emit())),
                DW_LNS_advance_pc => {
                    let arg = cur.uleb128()?;
                    self.advance(arg);
                }
                DW_LNS_advance_line => {
                    let delta = cur.sleb128()?;
                    self.regs.line = self.regs.line.wrapping_add_signed(delta);
                }
                DW_LNS_set_file => self.regs.file_index = cur.uleb128()?,
                DW_LNS_set_column => self.regs.column = cur.uleb128()?,
                DW_LNS_negate_stmt => self.regs.is_stmt = !self.regs.is_stmt,
                DW_LNS_set_basic_block => self.regs.basic_block = true,
                DW_LNS_const_add_pc => {
                    let arg = u64::from((255 - self.table.opcode_base) / self.table.line_range);
                    self.advance(arg);
                }
                DW_LNS_fixed_advance_pc => {
                    self.regs.address += u64::from(cur.fixed_u16()?);
                    self.regs.op_index = 0;
                }
                DW_LNS_set_prologue_end => self.regs.prologue_end = true,
                DW_LNS_set_epilogue_begin => self.regs.epilogue_begin = true,
                DW_LNS_set_isa => self.regs.isa = cur.uleb128()?,
                other => {
                    return Err(DebuggerError::Format(format!(
                        "unknown line number opcode {other}"
                    )))
                }
            }
            return Ok(None);
        }

        // extended opcode: length-delimited
        let length = cur.uleb128()? as usize;
        let end = cur.section_offset() + length;
        let sub = cur.fixed_u8()?;
        let out = match sub {
            DW_LNE_end_sequence => {
                self.regs.end_sequence = true;
                let row = self.regs;
                self.regs = LineRow::reset(self.table.default_is_stmt);
                Some(row)
            }
            DW_LNE_set_address => {
                self.regs.address = cur.address()?;
                self.regs.op_index = 0;
                None
            }
            DW_LNE_define_file => {
                self.table.read_file_entry(cur, false)?;
                None
            }
            DW_LNE_set_discriminator => {
                self.regs.discriminator = cur.uleb128()?;
                None
            }
            op if op >= DW_LNE_lo_user => {
                return Err(DebuggerError::Format(format!(
                    "vendor line number opcode {op} not implemented"
                )))
            }
            other => {
                return Err(DebuggerError::Format(format!(
                    "unknown extended line number opcode {other}"
                )))
            }
        };

        if cur.section_offset() > end {
            return Err(DebuggerError::Format(
                "extended line number opcode exceeded its size".to_string(),
            ));
        }
        let pad = end - cur.section_offset();
        cur.skip(pad);
        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dwarf::SectionKind;
    use crate::elf::ByteOrder;

    /// A v4 line program with rows (0x1000, 10), (0x1004, 11),
    /// (0x1010, 12) and an end_sequence at 0x1020, one relative include
    /// directory, and three file entries.
    fn sample_line_program() -> Vec<u8> {
        let mut h: Vec<u8> = Vec::new();
        h.extend_from_slice(&4u16.to_le_bytes()); // version
        let hl_pos = h.len();
        h.extend_from_slice(&0u32.to_le_bytes()); // header_length, patched
        h.push(1); // minimum_instruction_length
        h.push(1); // maximum_operations_per_instruction
        h.push(1); // default_is_stmt
        h.push(0xfb); // line_base -5
        h.push(14); // line_range
        h.push(13); // opcode_base
        h.extend_from_slice(&[0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1]);
        h.extend_from_slice(b"inc\0"); // include directory 1
        h.push(0);
        h.extend_from_slice(b"a.c\0\0\0\0"); // file 1: dir 0
        h.extend_from_slice(b"b.c\0\x01\0\0"); // file 2: dir 1
        h.extend_from_slice(b"/abs/c.c\0\0\0\0"); // file 3: absolute
        h.push(0);
        let header_len = u32::try_from(h.len() - (hl_pos + 4)).unwrap();
        h[hl_pos..hl_pos + 4].copy_from_slice(&header_len.to_le_bytes());

        // program
        h.extend_from_slice(&[0x00, 9, 0x02]); // set_address
        h.extend_from_slice(&0x1000u64.to_le_bytes());
        h.extend_from_slice(&[0x03, 9]); // advance_line +9
        h.push(0x01); // copy
        h.push(75); // +4 addr, +1 line
        h.push(187); // +12 addr, +1 line
        h.extend_from_slice(&[0x02, 16]); // advance_pc 16
        h.extend_from_slice(&[0x00, 1, 0x01]); // end_sequence

        let mut out = Vec::new();
        out.extend_from_slice(&u32::try_from(h.len()).unwrap().to_le_bytes());
        out.extend_from_slice(&h);
        out
    }

    fn parse(data: &[u8]) -> LineTable<'_> {
        let sec = Section::new(SectionKind::Line, data, ByteOrder::Lsb);
        LineTable::parse(sec, 0, 8, "/src", "a.c").unwrap()
    }

    #[test]
    fn test_row_emission() {
        let data = sample_line_program();
        let table = parse(&data);

        let mut rows = table.rows();
        let r = rows.next_row().unwrap().unwrap();
        assert_eq!((r.address, r.line), (0x1000, 10));
        assert!(r.is_stmt);
        let r = rows.next_row().unwrap().unwrap();
        assert_eq!((r.address, r.line), (0x1004, 11));
        let r = rows.next_row().unwrap().unwrap();
        assert_eq!((r.address, r.line), (0x1010, 12));
        let r = rows.next_row().unwrap().unwrap();
        assert_eq!(r.address, 0x1020);
        assert!(r.end_sequence);
        assert!(rows.next_row().unwrap().is_none());
    }

    #[test]
    fn test_addresses_monotonic_within_sequence() {
        let data = sample_line_program();
        let table = parse(&data);

        let mut rows = table.rows();
        let mut last = 0;
        while let Some(row) = rows.next_row().unwrap() {
            assert!(row.address >= last);
            if row.end_sequence {
                last = 0;
            } else {
                last = row.address;
            }
        }
    }

    #[test]
    fn test_find_address() {
        let data = sample_line_program();
        let table = parse(&data);

        let row = table.find_address(0x100c).unwrap().unwrap();
        assert_eq!((row.address, row.line), (0x1004, 11));

        let row = table.find_address(0x1000).unwrap().unwrap();
        assert_eq!(row.line, 10);

        // within the end_sequence gap and before the first row
        assert!(table.find_address(0x1020).unwrap().is_none());
        assert!(table.find_address(0x800).unwrap().is_none());
    }

    #[test]
    fn test_file_paths() {
        let data = sample_line_program();
        let table = parse(&data);

        // file 0 is the unit's primary file, anchored to the compilation
        // directory
        assert_eq!(table.file(0).unwrap().path, "/src/a.c");
        assert_eq!(table.file(1).unwrap().path, "/src/a.c");
        // directory 1 is relative, so it is anchored too
        assert_eq!(table.file(2).unwrap().path, "/src/inc/b.c");
        // absolute names are taken verbatim
        assert_eq!(table.file(3).unwrap().path, "/abs/c.c");

        assert!(matches!(
            table.file(9),
            Err(DebuggerError::Range(_))
        ));
    }

    #[test]
    fn test_bad_version() {
        let mut data = sample_line_program();
        data[4] = 9; // version lives right after the unit length
        let sec = Section::new(SectionKind::Line, &data, ByteOrder::Lsb);
        assert!(matches!(
            LineTable::parse(sec, 0, 8, "/src", "a.c"),
            Err(DebuggerError::Format(_))
        ));
    }

    #[test]
    fn test_zero_line_range() {
        let mut data = sample_line_program();
        // line_range byte: length(4) + version(2) + header_length(4) +
        // min_inst(1) + max_ops(1) + default_is_stmt(1) + line_base(1)
        data[14] = 0;
        let sec = Section::new(SectionKind::Line, &data, ByteOrder::Lsb);
        assert!(matches!(
            LineTable::parse(sec, 0, 8, "/src", "a.c"),
            Err(DebuggerError::Format(_))
        ));
    }
}
