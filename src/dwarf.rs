//! # DWARF View
//!
//! A lazy reader for the `.debug_*` sections of an ELF image, covering
//! DWARF versions 2 through 4.
//!
//! [`DwarfInfo`] owns an arena of [`Unit`]s (compilation units from
//! `.debug_info` and type units from `.debug_types`). DIEs, attribute
//! values and expressions are value types that address their unit by arena
//! index, so they stay cheap to copy and never dangle while the session
//! lives.
//!
//! Abbreviation tables and line tables are populated on first touch; the
//! public contract is `&self` everywhere.

use std::cell::OnceCell;
use std::collections::HashMap;

use tracing::debug;

use crate::dwarf::abbrev::{parse_abbrev_table, AbbrevEntry};
use crate::dwarf::cursor::Cursor;
use crate::dwarf::die::Die;
use crate::dwarf::line::LineTable;
use crate::elf::{ByteOrder, ElfFile};
use crate::errors::{DebuggerError, Result};

pub mod abbrev;
pub mod consts;
pub mod cursor;
pub mod die;
pub mod expr;
pub mod line;
pub mod loclist;
pub mod ranges;
#[cfg(test)]
pub(crate) mod testutil;
pub mod value;

use consts::{DW_AT_comp_dir, DW_AT_name, DW_AT_stmt_list};

/// The `.debug_*` sections this reader understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    Abbrev,
    Aranges,
    Frame,
    Info,
    Line,
    Loc,
    Macinfo,
    Pubnames,
    Pubtypes,
    Ranges,
    Str,
    Types,
}

impl SectionKind {
    const ALL: [SectionKind; 12] = [
        SectionKind::Abbrev,
        SectionKind::Aranges,
        SectionKind::Frame,
        SectionKind::Info,
        SectionKind::Line,
        SectionKind::Loc,
        SectionKind::Macinfo,
        SectionKind::Pubnames,
        SectionKind::Pubtypes,
        SectionKind::Ranges,
        SectionKind::Str,
        SectionKind::Types,
    ];

    /// The ELF section name this kind loads from
    #[must_use]
    pub fn section_name(self) -> &'static str {
        match self {
            SectionKind::Abbrev => ".debug_abbrev",
            SectionKind::Aranges => ".debug_aranges",
            SectionKind::Frame => ".debug_frame",
            SectionKind::Info => ".debug_info",
            SectionKind::Line => ".debug_line",
            SectionKind::Loc => ".debug_loc",
            SectionKind::Macinfo => ".debug_macinfo",
            SectionKind::Pubnames => ".debug_pubnames",
            SectionKind::Pubtypes => ".debug_pubtypes",
            SectionKind::Ranges => ".debug_ranges",
            SectionKind::Str => ".debug_str",
            SectionKind::Types => ".debug_types",
        }
    }
}

/// 32- or 64-bit DWARF, per the unit's initial length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DwarfFormat {
    #[default]
    Unknown,
    Dwarf32,
    Dwarf64,
}

/// A bounded window into a DWARF section
///
/// Windows carry the dynamic information needed to decode their bytes: the
/// byte order of the image, the DWARF format, and the address size of the
/// owning unit. Slices inherit the byte order and may override the rest.
#[derive(Debug, Clone, Copy)]
pub struct Section<'a> {
    pub kind: SectionKind,
    pub data: &'a [u8],
    pub order: ByteOrder,
    pub format: DwarfFormat,
    pub addr_size: u8,
}

impl<'a> Section<'a> {
    #[must_use]
    pub fn new(kind: SectionKind, data: &'a [u8], order: ByteOrder) -> Self {
        Self {
            kind,
            data,
            order,
            format: DwarfFormat::Unknown,
            addr_size: 0,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// A subwindow starting at `start`, clamped to the window end.
    ///
    /// `format` and `addr_size` override the parent's values unless they
    /// are `Unknown`/zero.
    #[must_use]
    pub fn slice(
        &self,
        start: usize,
        len: usize,
        format: DwarfFormat,
        addr_size: u8,
    ) -> Section<'a> {
        let data = self.data.get(start..).unwrap_or_default();
        let data = &data[..usize::min(len, data.len())];
        Section {
            kind: self.kind,
            data,
            order: self.order,
            format: if format == DwarfFormat::Unknown {
                self.format
            } else {
                format
            },
            addr_size: if addr_size == 0 {
                self.addr_size
            } else {
                addr_size
            },
        }
    }
}

/// Whether a unit came from `.debug_info` or `.debug_types`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Compile,
    Type {
        signature: u64,
        type_offset: usize,
    },
}

/// A compilation unit or type unit
///
/// Identified by its byte offset in its section. The abbreviation table and
/// the line table are loaded on first use.
pub struct Unit<'a> {
    kind: UnitKind,
    offset: usize,
    sec: Section<'a>,
    abbrev_sec: Section<'a>,
    version: u16,
    abbrev_offset: usize,
    root_offset: usize,
    abbrevs: OnceCell<HashMap<u64, AbbrevEntry>>,
    line_table: OnceCell<Option<LineTable<'a>>>,
}

impl<'a> Unit<'a> {
    /// Reads one unit header at `offset` of `sec` and returns the unit plus
    /// the offset of the next one.
    fn parse(
        sec: Section<'a>,
        abbrev_sec: Section<'a>,
        offset: usize,
        is_type_unit: bool,
    ) -> Result<(Self, usize)> {
        let mut cur = Cursor::new(sec, offset);
        let subsec = cur.subsection()?;
        let next_offset = cur.section_offset();

        let mut sub = Cursor::new(subsec, 0);
        sub.skip_initial_length()?;
        let version = sub.fixed_u16()?;
        if !(2..=4).contains(&version) {
            return Err(DebuggerError::Format(format!(
                "unknown unit version {version}"
            )));
        }
        let abbrev_offset = sub.offset()?;
        let addr_size = sub.fixed_u8()?;
        if !matches!(addr_size, 1 | 2 | 4 | 8) {
            return Err(DebuggerError::Format(format!(
                "address size {addr_size} not supported"
            )));
        }

        let kind = if is_type_unit {
            let signature = sub.fixed_u64()?;
            let type_offset = sub.offset()?;
            UnitKind::Type {
                signature,
                type_offset,
            }
        } else {
            UnitKind::Compile
        };

        let root_offset = sub.section_offset();
        let sec = subsec.slice(0, usize::MAX, DwarfFormat::Unknown, addr_size);

        Ok((
            Unit {
                kind,
                offset,
                sec,
                abbrev_sec,
                version,
                abbrev_offset,
                root_offset,
                abbrevs: OnceCell::new(),
                line_table: OnceCell::new(),
            },
            next_offset,
        ))
    }

    #[must_use]
    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    /// Byte offset of this unit in `.debug_info` / `.debug_types`
    #[must_use]
    pub fn section_offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn version(&self) -> u16 {
        self.version
    }

    #[must_use]
    pub fn addr_size(&self) -> u8 {
        self.sec.addr_size
    }

    /// The unit's own subsection, with concrete format and address size
    #[must_use]
    pub fn data(&self) -> Section<'a> {
        self.sec
    }

    /// Unit-relative offset of the root DIE
    #[must_use]
    pub fn root_offset(&self) -> usize {
        self.root_offset
    }

    /// Looks up an abbreviation, reading the unit's table on first demand.
    pub(crate) fn get_abbrev(&self, code: u64) -> Result<&AbbrevEntry> {
        if self.abbrevs.get().is_none() {
            let table = parse_abbrev_table(self.abbrev_sec, self.abbrev_offset)?;
            let _ = self.abbrevs.set(table);
        }
        self.abbrevs
            .get()
            .expect("abbrev table was just populated")
            .get(&code)
            .ok_or_else(|| DebuggerError::Format(format!("no abbrev entry for code {code}")))
    }
}

/// All DWARF debug information of one executable
pub struct DwarfInfo<'a> {
    sections: HashMap<SectionKind, Section<'a>>,
    units: Vec<Unit<'a>>,
    type_sigs: HashMap<u64, usize>,
}

impl<'a> DwarfInfo<'a> {
    /// Loads the `.debug_*` sections through the ELF view and parses all
    /// unit headers.
    ///
    /// # Errors
    ///
    /// Fails when `.debug_info` or `.debug_abbrev` is missing or any unit
    /// header is malformed.
    pub fn load(elf: &ElfFile<'a>) -> Result<Self> {
        let order = elf.hdr().data;
        let mut sections = HashMap::new();
        for kind in SectionKind::ALL {
            if let Some(sec) = elf.section_by_name(kind.section_name())? {
                if let Some(data) = sec.data()? {
                    sections.insert(kind, Section::new(kind, data, order));
                }
            }
        }
        Self::from_sections(sections)
    }

    /// Builds the view from already-located section windows.
    pub(crate) fn from_sections(sections: HashMap<SectionKind, Section<'a>>) -> Result<Self> {
        let mut this = DwarfInfo {
            sections,
            units: Vec::new(),
            type_sigs: HashMap::new(),
        };

        let info = this.section(SectionKind::Info)?;
        let abbrev = this.section(SectionKind::Abbrev)?;

        let mut offset = 0;
        while offset < info.size() {
            let (unit, next) = Unit::parse(info, abbrev, offset, false)?;
            debug!(
                "compilation unit at {offset:#x}, version {}",
                unit.version()
            );
            this.units.push(unit);
            offset = next;
        }

        if let Ok(types) = this.section(SectionKind::Types) {
            let mut offset = 0;
            while offset < types.size() {
                let (unit, next) = Unit::parse(types, abbrev, offset, true)?;
                if let UnitKind::Type { signature, .. } = unit.kind() {
                    this.type_sigs.insert(signature, this.units.len());
                }
                this.units.push(unit);
                offset = next;
            }
        }

        Ok(this)
    }

    /// The window of one `.debug_*` section.
    ///
    /// # Errors
    ///
    /// A format error when the section is not present in the image.
    pub fn section(&self, kind: SectionKind) -> Result<Section<'a>> {
        self.sections.get(&kind).copied().ok_or_else(|| {
            DebuggerError::Format(format!("missing section {}", kind.section_name()))
        })
    }

    pub(crate) fn unit(&self, index: usize) -> &Unit<'a> {
        &self.units[index]
    }

    /// Indices of all compilation units, in section order
    pub fn compilation_units(&self) -> impl Iterator<Item = usize> + use<'_, 'a> {
        self.units
            .iter()
            .enumerate()
            .filter(|(_, u)| u.kind() == UnitKind::Compile)
            .map(|(i, _)| i)
    }

    /// The unit that contains the given `.debug_info` section offset
    pub(crate) fn unit_for_section_offset(&self, offset: usize) -> Result<usize> {
        let mut found = None;
        for idx in self.compilation_units() {
            if self.units[idx].section_offset() > offset {
                break;
            }
            found = Some(idx);
        }
        found.ok_or_else(|| {
            DebuggerError::NotFound(format!("no unit contains section offset {offset:#x}"))
        })
    }

    /// The type unit with the given signature, for `DW_FORM_ref_sig8`
    pub(crate) fn type_unit_by_signature(&self, signature: u64) -> Result<usize> {
        self.type_sigs.get(&signature).copied().ok_or_else(|| {
            DebuggerError::Format(format!("unknown type signature {signature:#x}"))
        })
    }

    /// The root DIE of a unit
    pub fn root_die(&self, unit: usize) -> Result<Die<'_, 'a>> {
        Die::read(self, unit, self.units[unit].root_offset())
    }

    /// The DIE a type unit's signature describes
    pub(crate) fn type_die(&self, unit: usize) -> Result<Die<'_, 'a>> {
        match self.units[unit].kind() {
            UnitKind::Type { type_offset, .. } => Die::read(self, unit, type_offset),
            UnitKind::Compile => Err(DebuggerError::TypeMismatch(
                "unit is not a type unit".to_string(),
            )),
        }
    }

    /// The line table of a compilation unit, parsed on first use.
    ///
    /// Returns `None` when the unit has no `DW_AT_stmt_list`.
    pub fn line_table(&self, unit: usize) -> Result<Option<&LineTable<'a>>> {
        if self.units[unit].line_table.get().is_none() {
            let table = self.parse_line_table(unit)?;
            let _ = self.units[unit].line_table.set(table);
        }
        Ok(self.units[unit]
            .line_table
            .get()
            .expect("line table was just populated")
            .as_ref())
    }

    fn parse_line_table(&self, unit: usize) -> Result<Option<LineTable<'a>>> {
        let root = self.root_die(unit)?;
        if !root.has(DW_AT_stmt_list) {
            return Ok(None);
        }
        let offset = root.attr(DW_AT_stmt_list)?.as_sec_offset()?;

        let comp_dir = if root.has(DW_AT_comp_dir) {
            root.attr(DW_AT_comp_dir)?.as_string()?.to_string()
        } else {
            String::new()
        };
        let name = if root.has(DW_AT_name) {
            root.attr(DW_AT_name)?.as_string()?.to_string()
        } else {
            String::new()
        };

        let line_sec = self.section(SectionKind::Line)?;
        let table = LineTable::parse(
            line_sec,
            offset,
            self.units[unit].addr_size(),
            &comp_dir,
            &name,
        )?;
        Ok(Some(table))
    }

    /// The name of a compilation unit (its primary source file), if it has
    /// one.
    pub fn unit_name(&self, unit: usize) -> Result<Option<&'a str>> {
        let root = self.root_die(unit)?;
        if root.has(DW_AT_name) {
            Ok(Some(root.attr(DW_AT_name)?.as_string()?))
        } else {
            Ok(None)
        }
    }
}
