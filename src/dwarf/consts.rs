//! DWARF constants for the v2–v4 subset this reader handles: tags,
//! attributes, forms, line-program opcodes and expression opcodes.
//!
//! Tags, attributes and forms are small newtypes so signatures stay typed;
//! their constants keep the standard `DW_*` spelling. Line and expression
//! opcodes are plain `u8`s since they are dispatched straight off the byte
//! stream.

#![allow(non_upper_case_globals)]

use std::fmt::{self, Display};

/// A DIE tag (`DW_TAG_*`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DwTag(pub u64);

pub const DW_TAG_array_type: DwTag = DwTag(0x01);
pub const DW_TAG_formal_parameter: DwTag = DwTag(0x05);
pub const DW_TAG_lexical_block: DwTag = DwTag(0x0b);
pub const DW_TAG_compile_unit: DwTag = DwTag(0x11);
pub const DW_TAG_inlined_subroutine: DwTag = DwTag(0x1d);
pub const DW_TAG_base_type: DwTag = DwTag(0x24);
pub const DW_TAG_subprogram: DwTag = DwTag(0x2e);
pub const DW_TAG_variable: DwTag = DwTag(0x34);
pub const DW_TAG_partial_unit: DwTag = DwTag(0x3c);
pub const DW_TAG_type_unit: DwTag = DwTag(0x41);

impl Display for DwTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DW_TAG_array_type => write!(f, "DW_TAG_array_type"),
            DW_TAG_formal_parameter => write!(f, "DW_TAG_formal_parameter"),
            DW_TAG_lexical_block => write!(f, "DW_TAG_lexical_block"),
            DW_TAG_compile_unit => write!(f, "DW_TAG_compile_unit"),
            DW_TAG_inlined_subroutine => write!(f, "DW_TAG_inlined_subroutine"),
            DW_TAG_base_type => write!(f, "DW_TAG_base_type"),
            DW_TAG_subprogram => write!(f, "DW_TAG_subprogram"),
            DW_TAG_variable => write!(f, "DW_TAG_variable"),
            DW_TAG_partial_unit => write!(f, "DW_TAG_partial_unit"),
            DW_TAG_type_unit => write!(f, "DW_TAG_type_unit"),
            DwTag(other) => write!(f, "DW_TAG({other:#x})"),
        }
    }
}

/// An attribute name (`DW_AT_*`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DwAt(pub u64);

pub const DW_AT_sibling: DwAt = DwAt(0x01);
pub const DW_AT_location: DwAt = DwAt(0x02);
pub const DW_AT_name: DwAt = DwAt(0x03);
pub const DW_AT_byte_size: DwAt = DwAt(0x0b);
pub const DW_AT_stmt_list: DwAt = DwAt(0x10);
pub const DW_AT_low_pc: DwAt = DwAt(0x11);
pub const DW_AT_high_pc: DwAt = DwAt(0x12);
pub const DW_AT_language: DwAt = DwAt(0x13);
pub const DW_AT_string_length: DwAt = DwAt(0x19);
pub const DW_AT_comp_dir: DwAt = DwAt(0x1b);
pub const DW_AT_const_value: DwAt = DwAt(0x1c);
pub const DW_AT_lower_bound: DwAt = DwAt(0x22);
pub const DW_AT_producer: DwAt = DwAt(0x25);
pub const DW_AT_return_addr: DwAt = DwAt(0x2a);
pub const DW_AT_start_scope: DwAt = DwAt(0x2c);
pub const DW_AT_upper_bound: DwAt = DwAt(0x2f);
pub const DW_AT_abstract_origin: DwAt = DwAt(0x31);
pub const DW_AT_count: DwAt = DwAt(0x37);
pub const DW_AT_data_member_location: DwAt = DwAt(0x38);
pub const DW_AT_decl_file: DwAt = DwAt(0x3a);
pub const DW_AT_decl_line: DwAt = DwAt(0x3b);
pub const DW_AT_declaration: DwAt = DwAt(0x3c);
pub const DW_AT_external: DwAt = DwAt(0x3f);
pub const DW_AT_frame_base: DwAt = DwAt(0x40);
pub const DW_AT_macro_info: DwAt = DwAt(0x43);
pub const DW_AT_segment: DwAt = DwAt(0x46);
pub const DW_AT_specification: DwAt = DwAt(0x47);
pub const DW_AT_static_link: DwAt = DwAt(0x48);
pub const DW_AT_type: DwAt = DwAt(0x49);
pub const DW_AT_use_location: DwAt = DwAt(0x4a);
pub const DW_AT_vtable_elem_location: DwAt = DwAt(0x4d);
pub const DW_AT_ranges: DwAt = DwAt(0x55);
pub const DW_AT_call_file: DwAt = DwAt(0x58);
pub const DW_AT_call_line: DwAt = DwAt(0x59);
pub const DW_AT_linkage_name: DwAt = DwAt(0x6e);

impl Display for DwAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DW_AT_sibling => write!(f, "DW_AT_sibling"),
            DW_AT_location => write!(f, "DW_AT_location"),
            DW_AT_name => write!(f, "DW_AT_name"),
            DW_AT_stmt_list => write!(f, "DW_AT_stmt_list"),
            DW_AT_low_pc => write!(f, "DW_AT_low_pc"),
            DW_AT_high_pc => write!(f, "DW_AT_high_pc"),
            DW_AT_comp_dir => write!(f, "DW_AT_comp_dir"),
            DW_AT_abstract_origin => write!(f, "DW_AT_abstract_origin"),
            DW_AT_frame_base => write!(f, "DW_AT_frame_base"),
            DW_AT_specification => write!(f, "DW_AT_specification"),
            DW_AT_ranges => write!(f, "DW_AT_ranges"),
            DwAt(other) => write!(f, "DW_AT({other:#x})"),
        }
    }
}

/// An attribute form (`DW_FORM_*`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DwForm(pub u64);

pub const DW_FORM_addr: DwForm = DwForm(0x01);
pub const DW_FORM_block2: DwForm = DwForm(0x03);
pub const DW_FORM_block4: DwForm = DwForm(0x04);
pub const DW_FORM_data2: DwForm = DwForm(0x05);
pub const DW_FORM_data4: DwForm = DwForm(0x06);
pub const DW_FORM_data8: DwForm = DwForm(0x07);
pub const DW_FORM_string: DwForm = DwForm(0x08);
pub const DW_FORM_block: DwForm = DwForm(0x09);
pub const DW_FORM_block1: DwForm = DwForm(0x0a);
pub const DW_FORM_data1: DwForm = DwForm(0x0b);
pub const DW_FORM_flag: DwForm = DwForm(0x0c);
pub const DW_FORM_sdata: DwForm = DwForm(0x0d);
pub const DW_FORM_strp: DwForm = DwForm(0x0e);
pub const DW_FORM_udata: DwForm = DwForm(0x0f);
pub const DW_FORM_ref_addr: DwForm = DwForm(0x10);
pub const DW_FORM_ref1: DwForm = DwForm(0x11);
pub const DW_FORM_ref2: DwForm = DwForm(0x12);
pub const DW_FORM_ref4: DwForm = DwForm(0x13);
pub const DW_FORM_ref8: DwForm = DwForm(0x14);
pub const DW_FORM_ref_udata: DwForm = DwForm(0x15);
pub const DW_FORM_indirect: DwForm = DwForm(0x16);
pub const DW_FORM_sec_offset: DwForm = DwForm(0x17);
pub const DW_FORM_exprloc: DwForm = DwForm(0x18);
pub const DW_FORM_flag_present: DwForm = DwForm(0x19);
pub const DW_FORM_ref_sig8: DwForm = DwForm(0x20);

impl Display for DwForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DW_FORM({:#x})", self.0)
    }
}

// ---------------- line number program opcodes ----------------------------------------------------

pub const DW_LNS_copy: u8 = 0x01;
pub const DW_LNS_advance_pc: u8 = 0x02;
pub const DW_LNS_advance_line: u8 = 0x03;
pub const DW_LNS_set_file: u8 = 0x04;
pub const DW_LNS_set_column: u8 = 0x05;
pub const DW_LNS_negate_stmt: u8 = 0x06;
pub const DW_LNS_set_basic_block: u8 = 0x07;
pub const DW_LNS_const_add_pc: u8 = 0x08;
pub const DW_LNS_fixed_advance_pc: u8 = 0x09;
pub const DW_LNS_set_prologue_end: u8 = 0x0a;
pub const DW_LNS_set_epilogue_begin: u8 = 0x0b;
pub const DW_LNS_set_isa: u8 = 0x0c;

pub const DW_LNE_end_sequence: u8 = 0x01;
pub const DW_LNE_set_address: u8 = 0x02;
pub const DW_LNE_define_file: u8 = 0x03;
pub const DW_LNE_set_discriminator: u8 = 0x04;
pub const DW_LNE_lo_user: u8 = 0x80;

// ---------------- expression opcodes -------------------------------------------------------------

pub const DW_OP_addr: u8 = 0x03;
pub const DW_OP_deref: u8 = 0x06;
pub const DW_OP_const1u: u8 = 0x08;
pub const DW_OP_const1s: u8 = 0x09;
pub const DW_OP_const2u: u8 = 0x0a;
pub const DW_OP_const2s: u8 = 0x0b;
pub const DW_OP_const4u: u8 = 0x0c;
pub const DW_OP_const4s: u8 = 0x0d;
pub const DW_OP_const8u: u8 = 0x0e;
pub const DW_OP_const8s: u8 = 0x0f;
pub const DW_OP_constu: u8 = 0x10;
pub const DW_OP_consts: u8 = 0x11;
pub const DW_OP_dup: u8 = 0x12;
pub const DW_OP_drop: u8 = 0x13;
pub const DW_OP_over: u8 = 0x14;
pub const DW_OP_pick: u8 = 0x15;
pub const DW_OP_swap: u8 = 0x16;
pub const DW_OP_rot: u8 = 0x17;
pub const DW_OP_xderef: u8 = 0x18;
pub const DW_OP_abs: u8 = 0x19;
pub const DW_OP_and: u8 = 0x1a;
pub const DW_OP_div: u8 = 0x1b;
pub const DW_OP_minus: u8 = 0x1c;
pub const DW_OP_mod: u8 = 0x1d;
pub const DW_OP_mul: u8 = 0x1e;
pub const DW_OP_neg: u8 = 0x1f;
pub const DW_OP_not: u8 = 0x20;
pub const DW_OP_or: u8 = 0x21;
pub const DW_OP_plus: u8 = 0x22;
pub const DW_OP_plus_uconst: u8 = 0x23;
pub const DW_OP_shl: u8 = 0x24;
pub const DW_OP_shr: u8 = 0x25;
pub const DW_OP_shra: u8 = 0x26;
pub const DW_OP_xor: u8 = 0x27;
pub const DW_OP_bra: u8 = 0x28;
pub const DW_OP_eq: u8 = 0x29;
pub const DW_OP_ge: u8 = 0x2a;
pub const DW_OP_gt: u8 = 0x2b;
pub const DW_OP_le: u8 = 0x2c;
pub const DW_OP_lt: u8 = 0x2d;
pub const DW_OP_ne: u8 = 0x2e;
pub const DW_OP_skip: u8 = 0x2f;
pub const DW_OP_lit0: u8 = 0x30;
pub const DW_OP_lit31: u8 = 0x4f;
pub const DW_OP_reg0: u8 = 0x50;
pub const DW_OP_reg31: u8 = 0x6f;
pub const DW_OP_breg0: u8 = 0x70;
pub const DW_OP_breg31: u8 = 0x8f;
pub const DW_OP_regx: u8 = 0x90;
pub const DW_OP_fbreg: u8 = 0x91;
pub const DW_OP_bregx: u8 = 0x92;
pub const DW_OP_piece: u8 = 0x93;
pub const DW_OP_deref_size: u8 = 0x94;
pub const DW_OP_xderef_size: u8 = 0x95;
pub const DW_OP_nop: u8 = 0x96;
pub const DW_OP_push_object_address: u8 = 0x97;
pub const DW_OP_call2: u8 = 0x98;
pub const DW_OP_call4: u8 = 0x99;
pub const DW_OP_call_ref: u8 = 0x9a;
pub const DW_OP_form_tls_address: u8 = 0x9b;
pub const DW_OP_call_frame_cfa: u8 = 0x9c;
pub const DW_OP_bit_piece: u8 = 0x9d;
pub const DW_OP_implicit_value: u8 = 0x9e;
pub const DW_OP_stack_value: u8 = 0x9f;
pub const DW_OP_lo_user: u8 = 0xe0;
