//! # Attribute Values
//!
//! A [`Value`] is an attribute of a DIE, stored as `(form, offset)` and
//! decoded on demand by the typed accessors. The value class is derived
//! from the form when the abbreviation table is read; `DW_FORM_indirect`
//! re-resolves its form from the byte stream when the value is created.
//!
//! Asking a value for the wrong type fails with a type-mismatch error,
//! except that `constant` coerces to either signedness on request.

use std::fmt::{self, Display};

use crate::dwarf::abbrev::resolve_value_type;
use crate::dwarf::consts::{
    DwAt, DwForm, DW_AT_low_pc, DW_FORM_block, DW_FORM_block1, DW_FORM_block2, DW_FORM_block4,
    DW_FORM_addr, DW_FORM_data1, DW_FORM_data2, DW_FORM_data4, DW_FORM_data8, DW_FORM_exprloc,
    DW_FORM_flag, DW_FORM_flag_present, DW_FORM_indirect, DW_FORM_ref1, DW_FORM_ref2,
    DW_FORM_ref4, DW_FORM_ref8, DW_FORM_ref_addr, DW_FORM_ref_sig8, DW_FORM_ref_udata,
    DW_FORM_sdata, DW_FORM_sec_offset, DW_FORM_string, DW_FORM_strp, DW_FORM_udata,
};
use crate::dwarf::cursor::Cursor;
use crate::dwarf::die::Die;
use crate::dwarf::expr::Expr;
use crate::dwarf::loclist::LocList;
use crate::dwarf::ranges::RangeList;
use crate::dwarf::{DwarfFormat, DwarfInfo, SectionKind};
use crate::errors::{DebuggerError, Result};

/// The class an attribute value decodes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Invalid,
    Address,
    Block,
    Constant,
    UConstant,
    SConstant,
    Exprloc,
    Flag,
    Line,
    Loclist,
    Mac,
    Rangelist,
    Reference,
    String,
}

impl Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Invalid => "invalid",
            ValueType::Address => "address",
            ValueType::Block => "block",
            ValueType::Constant => "constant",
            ValueType::UConstant => "uconstant",
            ValueType::SConstant => "sconstant",
            ValueType::Exprloc => "exprloc",
            ValueType::Flag => "flag",
            ValueType::Line => "line",
            ValueType::Loclist => "loclist",
            ValueType::Mac => "mac",
            ValueType::Rangelist => "rangelist",
            ValueType::Reference => "reference",
            ValueType::String => "string",
        };
        write!(f, "{name}")
    }
}

/// A lazily-decoded attribute value
#[derive(Clone)]
pub struct Value<'d, 'a> {
    dwarf: &'d DwarfInfo<'a>,
    unit: usize,
    form: DwForm,
    typ: ValueType,
    offset: usize,
}

impl<'d, 'a> Value<'d, 'a> {
    pub(crate) fn new(
        dwarf: &'d DwarfInfo<'a>,
        unit: usize,
        name: DwAt,
        form: DwForm,
        typ: ValueType,
        offset: usize,
    ) -> Result<Self> {
        let mut value = Value {
            dwarf,
            unit,
            form,
            typ,
            offset,
        };
        if form == DW_FORM_indirect {
            value.resolve_indirect(name)?;
        }
        Ok(value)
    }

    fn resolve_indirect(&mut self, name: DwAt) -> Result<()> {
        let mut cur = self.cursor();
        let mut form = DwForm(cur.uleb128()?);
        while form == DW_FORM_indirect {
            form = DwForm(cur.uleb128()?);
        }
        self.form = form;
        self.typ = resolve_value_type(name, form)?;
        self.offset = cur.section_offset();
        Ok(())
    }

    fn cursor(&self) -> Cursor<'a> {
        Cursor::new(self.dwarf.unit(self.unit).data(), self.offset)
    }

    fn mismatch(&self, wanted: &str) -> DebuggerError {
        DebuggerError::TypeMismatch(format!("cannot read {} as {wanted}", self.typ))
    }

    #[must_use]
    pub fn value_type(&self) -> ValueType {
        self.typ
    }

    #[must_use]
    pub fn form(&self) -> DwForm {
        self.form
    }

    /// Offset of the value within its unit
    #[must_use]
    pub fn unit_offset(&self) -> usize {
        self.offset
    }

    /// Offset of the value within its section
    #[must_use]
    pub fn section_offset(&self) -> usize {
        self.dwarf.unit(self.unit).section_offset() + self.offset
    }

    /// The value as a target machine address
    pub fn as_address(&self) -> Result<u64> {
        if self.form != DW_FORM_addr {
            return Err(self.mismatch("address"));
        }
        self.cursor().address()
    }

    /// The value as a raw block borrowed from the section
    pub fn as_block(&self) -> Result<&'a [u8]> {
        let mut cur = self.cursor();
        let len = match self.form {
            DW_FORM_block1 => cur.fixed_u8()? as usize,
            DW_FORM_block2 => cur.fixed_u16()? as usize,
            DW_FORM_block4 => cur.fixed_u32()? as usize,
            DW_FORM_block | DW_FORM_exprloc => cur.uleb128()? as usize,
            _ => return Err(self.mismatch("block")),
        };
        cur.take(len)
    }

    /// The value as an unsigned constant; `constant` coerces on request
    pub fn as_uconstant(&self) -> Result<u64> {
        let mut cur = self.cursor();
        match self.form {
            DW_FORM_data1 => Ok(u64::from(cur.fixed_u8()?)),
            DW_FORM_data2 => Ok(u64::from(cur.fixed_u16()?)),
            DW_FORM_data4 => Ok(u64::from(cur.fixed_u32()?)),
            DW_FORM_data8 => cur.fixed_u64(),
            DW_FORM_udata => cur.uleb128(),
            _ => Err(self.mismatch("uconstant")),
        }
    }

    /// The value as a signed constant; `constant` coerces on request
    pub fn as_sconstant(&self) -> Result<i64> {
        let mut cur = self.cursor();
        match self.form {
            DW_FORM_data1 => Ok(i64::from(cur.fixed_i8()?)),
            DW_FORM_data2 => Ok(i64::from(cur.fixed_i16()?)),
            DW_FORM_data4 => Ok(i64::from(cur.fixed_i32()?)),
            DW_FORM_data8 => cur.fixed_i64(),
            DW_FORM_sdata => cur.sleb128(),
            _ => Err(self.mismatch("sconstant")),
        }
    }

    /// The value as a DWARF expression; `block` coerces on request
    pub fn as_exprloc(&self) -> Result<Expr<'d, 'a>> {
        let mut cur = self.cursor();
        let len = match self.form {
            DW_FORM_exprloc | DW_FORM_block => cur.uleb128()? as usize,
            DW_FORM_block1 => cur.fixed_u8()? as usize,
            DW_FORM_block2 => cur.fixed_u16()? as usize,
            DW_FORM_block4 => cur.fixed_u32()? as usize,
            _ => return Err(self.mismatch("exprloc")),
        };
        let pos = cur.section_offset();
        let unit = self.dwarf.unit(self.unit);
        Ok(Expr::new(
            self.dwarf,
            self.unit,
            unit.data().slice(pos, len, DwarfFormat::Unknown, 0),
            Some(unit.section_offset() + pos),
        ))
    }

    /// The value as a boolean flag
    pub fn as_flag(&self) -> Result<bool> {
        match self.form {
            DW_FORM_flag => Ok(self.cursor().fixed_u8()? != 0),
            DW_FORM_flag_present => Ok(true),
            _ => Err(self.mismatch("flag")),
        }
    }

    /// The value as a location list over `.debug_loc`
    pub fn as_loclist(&self) -> Result<LocList<'d, 'a>> {
        Ok(LocList::new(self.dwarf, self.unit, self.as_sec_offset()?))
    }

    /// The value as a range list over `.debug_ranges`, based at the unit's
    /// `DW_AT_low_pc`
    pub fn as_rangelist(&self) -> Result<RangeList<'a>> {
        let off = self.as_sec_offset()?;

        // the compilation unit may have no base address
        let root = self.dwarf.root_die(self.unit)?;
        let base = if root.has(DW_AT_low_pc) {
            root.attr(DW_AT_low_pc)?.as_address()?
        } else {
            0
        };

        let sec = self.dwarf.section(SectionKind::Ranges)?;
        let addr_size = self.dwarf.unit(self.unit).addr_size();
        Ok(RangeList::from_section(
            sec.slice(off, usize::MAX, DwarfFormat::Unknown, addr_size),
            base,
        ))
    }

    /// The DIE a reference value points at; unit-relative or
    /// section-relative depending on the form
    pub fn as_reference(&self) -> Result<Die<'d, 'a>> {
        let mut cur = self.cursor();
        let off = match self.form {
            DW_FORM_ref1 => cur.fixed_u8()? as usize,
            DW_FORM_ref2 => cur.fixed_u16()? as usize,
            DW_FORM_ref4 => cur.fixed_u32()? as usize,
            DW_FORM_ref8 => cur.fixed_u64()? as usize,
            DW_FORM_ref_udata => cur.uleb128()? as usize,
            DW_FORM_ref_addr => {
                let off = cur.offset()?;
                let unit = self.dwarf.unit_for_section_offset(off)?;
                let base = self.dwarf.unit(unit).section_offset();
                return Die::read(self.dwarf, unit, off - base);
            }
            DW_FORM_ref_sig8 => {
                let signature = cur.fixed_u64()?;
                let unit = self.dwarf.type_unit_by_signature(signature)?;
                return self.dwarf.type_die(unit);
            }
            _ => return Err(self.mismatch("reference")),
        };
        Die::read(self.dwarf, self.unit, off)
    }

    /// The value as a string view into the section data
    pub fn as_string(&self) -> Result<&'a str> {
        let mut cur = self.cursor();
        match self.form {
            DW_FORM_string => cur.cstr(),
            DW_FORM_strp => {
                let off = cur.offset()?;
                let strs = self.dwarf.section(SectionKind::Str)?;
                Cursor::new(strs, off).cstr()
            }
            _ => Err(self.mismatch("string")),
        }
    }

    /// The value as a section offset (lineptr, loclistptr, macptr,
    /// rangelistptr)
    pub fn as_sec_offset(&self) -> Result<usize> {
        // before DWARF 4, section offsets were encoded as data4 or data8
        let mut cur = self.cursor();
        match self.form {
            DW_FORM_data4 => Ok(cur.fixed_u32()? as usize),
            DW_FORM_data8 => Ok(cur.fixed_u64()? as usize),
            DW_FORM_sec_offset => cur.offset(),
            _ => Err(self.mismatch("sec_offset")),
        }
    }
}

impl std::fmt::Debug for Value<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Value")
            .field("type", &self.typ)
            .field("form", &self.form)
            .field("offset", &self.offset)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use crate::dwarf::consts::*;
    use crate::dwarf::testutil::sample_dwarf;
    use crate::errors::DebuggerError;

    #[test]
    fn test_constant_coercion() {
        let (info, abbrev, strs) = sample_dwarf();
        let dwarf = crate::dwarf::testutil::load(&info, &abbrev, &strs);

        let root = dwarf.root_die(0).unwrap();
        let high = root.attr(DW_AT_high_pc).unwrap();
        // data8 reads as either signedness
        assert_eq!(high.as_uconstant().unwrap(), 0x1000);
        assert_eq!(high.as_sconstant().unwrap(), 0x1000);
    }

    #[test]
    fn test_type_mismatch() {
        let (info, abbrev, strs) = sample_dwarf();
        let dwarf = crate::dwarf::testutil::load(&info, &abbrev, &strs);

        let root = dwarf.root_die(0).unwrap();
        let name = root.attr(DW_AT_name).unwrap();
        assert!(matches!(
            name.as_address(),
            Err(DebuggerError::TypeMismatch(_))
        ));
        assert!(matches!(name.as_flag(), Err(DebuggerError::TypeMismatch(_))));

        let low = root.attr(DW_AT_low_pc).unwrap();
        assert!(matches!(
            low.as_uconstant(),
            Err(DebuggerError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_block_view() {
        let (info, abbrev, strs) = sample_dwarf();
        let dwarf = crate::dwarf::testutil::load(&info, &abbrev, &strs);

        let root = dwarf.root_die(0).unwrap();
        let mut children = root.children();
        let main = children.next().unwrap().unwrap();
        let fb = main.attr(DW_AT_frame_base).unwrap();
        assert_eq!(fb.as_block().unwrap(), &[0x9c]);
    }

    #[test]
    fn test_reference_and_resolve() {
        let (info, abbrev, strs) = sample_dwarf();
        let dwarf = crate::dwarf::testutil::load(&info, &abbrev, &strs);

        let root = dwarf.root_die(0).unwrap();
        let mut children = root.children();
        let main = children.next().unwrap().unwrap();
        let _aux = children.next().unwrap().unwrap();
        let inl = children.next().unwrap().unwrap();

        let origin = inl.attr(DW_AT_abstract_origin).unwrap().as_reference().unwrap();
        assert_eq!(origin.unit_offset(), main.unit_offset());

        // the inline instance inherits the abstract origin's attributes
        let name = inl.resolve(DW_AT_name).unwrap().unwrap();
        assert_eq!(name.as_string().unwrap(), "main");
    }
}
