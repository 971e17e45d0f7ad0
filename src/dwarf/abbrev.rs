//! # Abbreviation Tables
//!
//! Every DIE references an abbreviation: a compact descriptor carrying the
//! tag, the has-children flag, and the list of attribute specs. The table
//! for a unit starts at its `debug_abbrev_offset` and ends at an entry with
//! code 0.
//!
//! Each attribute spec also records the *value class* its form decodes to,
//! resolved here once so the value reader doesn't rediscover it per access.

use std::collections::HashMap;

use crate::dwarf::consts::{
    DwAt, DwForm, DwTag, DW_AT_data_member_location, DW_AT_frame_base, DW_AT_location,
    DW_AT_macro_info, DW_AT_ranges, DW_AT_return_addr, DW_AT_segment, DW_AT_start_scope,
    DW_AT_static_link, DW_AT_stmt_list, DW_AT_string_length, DW_AT_use_location,
    DW_AT_vtable_elem_location, DW_FORM_addr, DW_FORM_block, DW_FORM_block1, DW_FORM_block2,
    DW_FORM_block4, DW_FORM_data1, DW_FORM_data2, DW_FORM_data4, DW_FORM_data8, DW_FORM_exprloc,
    DW_FORM_flag, DW_FORM_flag_present, DW_FORM_indirect, DW_FORM_ref1, DW_FORM_ref2,
    DW_FORM_ref4, DW_FORM_ref8, DW_FORM_ref_addr, DW_FORM_ref_sig8, DW_FORM_ref_udata,
    DW_FORM_sdata, DW_FORM_sec_offset, DW_FORM_string, DW_FORM_strp, DW_FORM_udata,
};
use crate::dwarf::cursor::Cursor;
use crate::dwarf::value::ValueType;
use crate::dwarf::Section;
use crate::errors::{DebuggerError, Result};

/// One attribute of an abbreviation: name, on-disk form, and the value
/// class the form decodes to
#[derive(Debug, Clone)]
pub struct AttributeSpec {
    pub name: DwAt,
    pub form: DwForm,
    pub typ: ValueType,
}

impl AttributeSpec {
    pub fn new(name: DwAt, form: DwForm) -> Result<Self> {
        Ok(Self {
            name,
            form,
            typ: resolve_value_type(name, form)?,
        })
    }
}

/// One entry of an abbreviation table
#[derive(Debug, Clone)]
pub struct AbbrevEntry {
    pub code: u64,
    pub tag: DwTag,
    pub children: bool,
    pub attributes: Vec<AttributeSpec>,
}

impl AbbrevEntry {
    /// Reads one entry; `None` marks the end of the table.
    fn read(cur: &mut Cursor<'_>) -> Result<Option<Self>> {
        let code = cur.uleb128()?;
        if code == 0 {
            return Ok(None);
        }
        let tag = DwTag(cur.uleb128()?);
        let children = cur.fixed_u8()? != 0;

        let mut attributes = Vec::new();
        loop {
            let name = cur.uleb128()?;
            let form = cur.uleb128()?;
            if name == 0 && form == 0 {
                break;
            }
            attributes.push(AttributeSpec::new(DwAt(name), DwForm(form))?);
        }

        Ok(Some(AbbrevEntry {
            code,
            tag,
            children,
            attributes,
        }))
    }
}

/// Parses the abbreviation table starting at `offset`, keyed by code.
pub(crate) fn parse_abbrev_table(
    sec: Section<'_>,
    offset: usize,
) -> Result<HashMap<u64, AbbrevEntry>> {
    let mut cur = Cursor::new(sec, offset);
    let mut table = HashMap::new();
    while let Some(entry) = AbbrevEntry::read(&mut cur)? {
        table.insert(entry.code, entry);
    }
    Ok(table)
}

/// Attributes whose `sec_offset`/`data4`/`data8` value points into another
/// section; everything else of those forms is a plain constant.
fn sec_offset_class(name: DwAt) -> ValueType {
    match name {
        DW_AT_stmt_list => ValueType::Line,
        DW_AT_location
        | DW_AT_string_length
        | DW_AT_return_addr
        | DW_AT_data_member_location
        | DW_AT_frame_base
        | DW_AT_segment
        | DW_AT_static_link
        | DW_AT_use_location
        | DW_AT_vtable_elem_location => ValueType::Loclist,
        DW_AT_macro_info => ValueType::Mac,
        DW_AT_ranges | DW_AT_start_scope => ValueType::Rangelist,
        _ => ValueType::Constant,
    }
}

/// Derives the value class of `(name, form)`.
///
/// `data4`/`data8` are ambiguous before DWARF 4: for the section-pointer
/// attributes they are offsets, otherwise constants. `indirect` stays
/// unresolved until the value is materialized.
pub(crate) fn resolve_value_type(name: DwAt, form: DwForm) -> Result<ValueType> {
    Ok(match form {
        DW_FORM_addr => ValueType::Address,
        DW_FORM_block | DW_FORM_block1 | DW_FORM_block2 | DW_FORM_block4 => ValueType::Block,
        DW_FORM_data1 | DW_FORM_data2 => ValueType::Constant,
        DW_FORM_data4 | DW_FORM_data8 | DW_FORM_sec_offset => sec_offset_class(name),
        DW_FORM_udata => ValueType::UConstant,
        DW_FORM_sdata => ValueType::SConstant,
        DW_FORM_exprloc => ValueType::Exprloc,
        DW_FORM_flag | DW_FORM_flag_present => ValueType::Flag,
        DW_FORM_ref1 | DW_FORM_ref2 | DW_FORM_ref4 | DW_FORM_ref8 | DW_FORM_ref_udata
        | DW_FORM_ref_addr | DW_FORM_ref_sig8 => ValueType::Reference,
        DW_FORM_string | DW_FORM_strp => ValueType::String,
        DW_FORM_indirect => ValueType::Invalid,
        other => {
            return Err(DebuggerError::Format(format!("unknown form {other}")));
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dwarf::consts::{
        DW_AT_high_pc, DW_AT_low_pc, DW_AT_name, DW_TAG_compile_unit, DW_TAG_subprogram,
    };
    use crate::dwarf::SectionKind;
    use crate::elf::ByteOrder;

    #[test]
    fn test_parse_table() {
        // abbrev 1: compile_unit, children, name=string
        // abbrev 2: subprogram, no children, low_pc=addr high_pc=data8
        let data = [
            0x01, 0x11, 0x01, 0x03, 0x08, 0x00, 0x00, //
            0x02, 0x2e, 0x00, 0x11, 0x01, 0x12, 0x07, 0x00, 0x00, //
            0x00,
        ];
        let sec = Section::new(SectionKind::Abbrev, &data, ByteOrder::Lsb);
        let table = parse_abbrev_table(sec, 0).unwrap();

        assert_eq!(table.len(), 2);
        let cu = &table[&1];
        assert_eq!(cu.tag, DW_TAG_compile_unit);
        assert!(cu.children);
        assert_eq!(cu.attributes.len(), 1);
        assert_eq!(cu.attributes[0].name, DW_AT_name);
        assert_eq!(cu.attributes[0].typ, ValueType::String);

        let func = &table[&2];
        assert_eq!(func.tag, DW_TAG_subprogram);
        assert!(!func.children);
        assert_eq!(func.attributes[0].name, DW_AT_low_pc);
        assert_eq!(func.attributes[0].typ, ValueType::Address);
        assert_eq!(func.attributes[1].name, DW_AT_high_pc);
        assert_eq!(func.attributes[1].typ, ValueType::Constant);
    }

    #[test]
    fn test_value_classes() {
        use crate::dwarf::consts::*;

        // the section-pointer attributes resolve by attribute name
        assert_eq!(
            resolve_value_type(DW_AT_stmt_list, DW_FORM_sec_offset).unwrap(),
            ValueType::Line
        );
        assert_eq!(
            resolve_value_type(DW_AT_ranges, DW_FORM_data4).unwrap(),
            ValueType::Rangelist
        );
        assert_eq!(
            resolve_value_type(DW_AT_location, DW_FORM_sec_offset).unwrap(),
            ValueType::Loclist
        );
        assert_eq!(
            resolve_value_type(DW_AT_byte_size, DW_FORM_data4).unwrap(),
            ValueType::Constant
        );
        assert_eq!(
            resolve_value_type(DW_AT_location, DW_FORM_exprloc).unwrap(),
            ValueType::Exprloc
        );
    }
}
