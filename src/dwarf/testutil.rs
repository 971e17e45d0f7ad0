//! Hand-assembled DWARF sections for the reader tests.

use std::collections::HashMap;

use crate::dwarf::{DwarfInfo, Section, SectionKind};
use crate::elf::ByteOrder;

pub(crate) fn load<'a>(info: &'a [u8], abbrev: &'a [u8], strs: &'a [u8]) -> DwarfInfo<'a> {
    load_with(info, abbrev, strs, &[])
}

pub(crate) fn load_with<'a>(
    info: &'a [u8],
    abbrev: &'a [u8],
    strs: &'a [u8],
    extra: &[(SectionKind, &'a [u8])],
) -> DwarfInfo<'a> {
    let mut sections = HashMap::new();
    sections.insert(
        SectionKind::Info,
        Section::new(SectionKind::Info, info, ByteOrder::Lsb),
    );
    sections.insert(
        SectionKind::Abbrev,
        Section::new(SectionKind::Abbrev, abbrev, ByteOrder::Lsb),
    );
    sections.insert(
        SectionKind::Str,
        Section::new(SectionKind::Str, strs, ByteOrder::Lsb),
    );
    for (kind, data) in extra {
        sections.insert(*kind, Section::new(*kind, data, ByteOrder::Lsb));
    }
    DwarfInfo::from_sections(sections).expect("synthetic sections parse")
}

fn abbrev_entry(out: &mut Vec<u8>, code: u8, tag: u8, children: bool, attrs: &[(u8, u8)]) {
    out.push(code);
    out.push(tag);
    out.push(u8::from(children));
    for (name, form) in attrs {
        out.push(*name);
        out.push(*form);
    }
    out.push(0);
    out.push(0);
}

/// One DWARF v4 compilation unit:
///
/// ```text
/// compile_unit "a.c" [0x1000, 0x2000)
/// ├── subprogram "main" [0x1000, 0x1050), frame_base = call_frame_cfa
/// │   └── variable "x", location = fbreg -16
/// ├── subprogram "aux" [0x1100, 0x1130)
/// └── inlined_subroutine → abstract origin "main"
/// ```
///
/// Returns `(.debug_info, .debug_abbrev, .debug_str)`.
pub(crate) fn sample_dwarf() -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let mut abbrev = Vec::new();
    // compile_unit: name, low_pc, high_pc(data8)
    abbrev_entry(&mut abbrev, 1, 0x11, true, &[(0x03, 0x08), (0x11, 0x01), (0x12, 0x07)]);
    // subprogram with children: name, low_pc, high_pc, frame_base(exprloc)
    abbrev_entry(
        &mut abbrev,
        2,
        0x2e,
        true,
        &[(0x03, 0x08), (0x11, 0x01), (0x12, 0x07), (0x40, 0x18)],
    );
    // variable: name, location(exprloc)
    abbrev_entry(&mut abbrev, 3, 0x34, false, &[(0x03, 0x08), (0x02, 0x18)]);
    // subprogram without children: name, low_pc, high_pc
    abbrev_entry(&mut abbrev, 4, 0x2e, false, &[(0x03, 0x08), (0x11, 0x01), (0x12, 0x07)]);
    // inlined_subroutine: abstract_origin(ref4)
    abbrev_entry(&mut abbrev, 5, 0x1d, false, &[(0x31, 0x13)]);
    abbrev.push(0);

    let mut u = Vec::new();
    u.extend_from_slice(&4u16.to_le_bytes()); // version
    u.extend_from_slice(&0u32.to_le_bytes()); // debug_abbrev_offset
    u.push(8); // address size

    // root: compile_unit "a.c"
    u.push(1);
    u.extend_from_slice(b"a.c\0");
    u.extend_from_slice(&0x1000u64.to_le_bytes());
    u.extend_from_slice(&0x1000u64.to_le_bytes()); // high_pc as offset

    // subprogram "main"
    u.push(2);
    u.extend_from_slice(b"main\0");
    u.extend_from_slice(&0x1000u64.to_le_bytes());
    u.extend_from_slice(&0x50u64.to_le_bytes());
    u.push(1);
    u.push(0x9c); // DW_OP_call_frame_cfa

    // variable "x"
    u.push(3);
    u.extend_from_slice(b"x\0");
    u.push(2);
    u.push(0x91); // DW_OP_fbreg
    u.push(0x70); // sleb128 -16

    u.push(0); // end of main's children

    // subprogram "aux"
    u.push(4);
    u.extend_from_slice(b"aux\0");
    u.extend_from_slice(&0x1100u64.to_le_bytes());
    u.extend_from_slice(&0x30u64.to_le_bytes());

    // inlined_subroutine referencing "main" (unit offset 32)
    u.push(5);
    u.extend_from_slice(&32u32.to_le_bytes());

    u.push(0); // end of root's children

    let mut info = Vec::new();
    info.extend_from_slice(&u32::try_from(u.len()).unwrap().to_le_bytes());
    info.extend_from_slice(&u);

    (info, abbrev, b"\0unused\0".to_vec())
}
