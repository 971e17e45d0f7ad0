//! # DWARF Expression Evaluator
//!
//! A stack machine over 64-bit target words (DWARF §2.5). The caller
//! supplies an [`ExprContext`] for the operations that reach outside the
//! expression: register reads, memory dereferences, the thread-local base,
//! and the current program counter. Every context method defaults to an
//! expression error, so a context only implements what its caller can
//! actually answer.
//!
//! The result is a location: an address (the default, taken from the top
//! of stack), a register, a literal, an implicit byte block borrowed from
//! the expression, or empty for an empty expression.

use crate::dwarf::consts::*;
use crate::dwarf::cursor::Cursor;
use crate::dwarf::die::Die;
use crate::dwarf::value::ValueType;
use crate::dwarf::{DwarfInfo, Section};
use crate::errors::{DebuggerError, Result};

/// Context for expression evaluation, bound to the debuggee by the caller
pub trait ExprContext {
    /// The value of DWARF register `regnum`, for `DW_OP_breg*`
    fn reg(&mut self, _regnum: u64) -> Result<u64> {
        Err(DebuggerError::Expression(
            "DW_OP_breg* operations not supported".to_string(),
        ))
    }

    /// Implements `DW_OP_deref_size`
    fn deref_size(&mut self, _address: u64, _size: u8) -> Result<u64> {
        Err(DebuggerError::Expression(
            "DW_OP_deref_size operations not supported".to_string(),
        ))
    }

    /// Implements `DW_OP_xderef_size`
    fn xderef_size(&mut self, _address: u64, _asid: u64, _size: u8) -> Result<u64> {
        Err(DebuggerError::Expression(
            "DW_OP_xderef_size operations not supported".to_string(),
        ))
    }

    /// Implements `DW_OP_form_tls_address`
    fn form_tls_address(&mut self, _address: u64) -> Result<u64> {
        Err(DebuggerError::Expression(
            "DW_OP_form_tls_address operations not supported".to_string(),
        ))
    }

    /// The runtime program counter, for location list resolution
    fn pc(&mut self) -> Result<u64> {
        Err(DebuggerError::Expression(
            "loclist operations not supported".to_string(),
        ))
    }
}

/// A context that rejects every operation
pub struct NoExprContext;

impl ExprContext for NoExprContext {}

/// How an evaluation result locates the described object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprLocation {
    /// The object lives in memory at `value` (also the result kind of
    /// plain computations)
    Address,
    /// The object lives in DWARF register `value`
    Reg,
    /// The object has no location; `value` holds its value
    Literal,
    /// The object has no location; its bytes are in `implicit`
    Implicit,
    /// The object exists in the source but not in the object code
    Empty,
}

/// The result of evaluating an expression or location description
#[derive(Debug, Clone, Copy)]
pub struct ExprResult<'a> {
    pub location: ExprLocation,
    pub value: u64,
    /// The value block for [`ExprLocation::Implicit`], borrowed from the
    /// expression bytes
    pub implicit: Option<&'a [u8]>,
}

impl ExprResult<'_> {
    #[must_use]
    pub fn empty() -> Self {
        ExprResult {
            location: ExprLocation::Empty,
            value: 0,
            implicit: None,
        }
    }
}

/// A DWARF expression or location description
#[derive(Clone, Copy)]
pub struct Expr<'d, 'a> {
    dwarf: &'d DwarfInfo<'a>,
    unit: usize,
    sec: Section<'a>,
    /// Where the expression sits in `.debug_info`, when it came from an
    /// attribute; `DW_OP_fbreg` needs it to find its function
    info_offset: Option<usize>,
}

fn underflow() -> DebuggerError {
    DebuggerError::Expression("stack underflow evaluating DWARF expression".to_string())
}

fn pop(stack: &mut Vec<u64>) -> Result<u64> {
    stack.pop().ok_or_else(underflow)
}

fn top(stack: &[u64]) -> Result<u64> {
    stack.last().copied().ok_or_else(underflow)
}

/// The `n`th entry from the top, 0 being the top itself
fn pick(stack: &[u64], n: usize) -> Result<u64> {
    if n >= stack.len() {
        return Err(underflow());
    }
    Ok(stack[stack.len() - 1 - n])
}

impl<'d, 'a> Expr<'d, 'a> {
    pub(crate) fn new(
        dwarf: &'d DwarfInfo<'a>,
        unit: usize,
        sec: Section<'a>,
        info_offset: Option<usize>,
    ) -> Self {
        Self {
            dwarf,
            unit,
            sec,
            info_offset,
        }
    }

    /// Evaluates with an empty initial stack.
    pub fn evaluate(&self, ctx: &mut dyn ExprContext) -> Result<ExprResult<'a>> {
        self.evaluate_with(ctx, &[])
    }

    /// Evaluates with `arguments` pushed right to left, so the first
    /// argument ends up on top.
    pub fn evaluate_with(
        &self,
        ctx: &mut dyn ExprContext,
        arguments: &[u64],
    ) -> Result<ExprResult<'a>> {
        let mut stack: Vec<u64> = arguments.iter().rev().copied().collect();
        let mut cur = Cursor::new(self.sec, 0);

        // 2.6.1.1.4: the empty description
        if cur.at_end() {
            return Ok(ExprResult::empty());
        }

        let mut result = ExprResult {
            location: ExprLocation::Address,
            value: 0,
            implicit: None,
        };

        while !cur.at_end() {
            let op = cur.fixed_u8()?;
            match op {
                // literal encodings
                DW_OP_lit0..=DW_OP_lit31 => stack.push(u64::from(op - DW_OP_lit0)),
                DW_OP_addr => stack.push(cur.address()?),
                DW_OP_const1u => stack.push(u64::from(cur.fixed_u8()?)),
                DW_OP_const2u => stack.push(u64::from(cur.fixed_u16()?)),
                DW_OP_const4u => stack.push(u64::from(cur.fixed_u32()?)),
                DW_OP_const8u => stack.push(cur.fixed_u64()?),
                DW_OP_const1s => stack.push(i64::from(cur.fixed_i8()?) as u64),
                DW_OP_const2s => stack.push(i64::from(cur.fixed_i16()?) as u64),
                DW_OP_const4s => stack.push(i64::from(cur.fixed_i32()?) as u64),
                DW_OP_const8s => stack.push(cur.fixed_i64()? as u64),
                DW_OP_constu => stack.push(cur.uleb128()?),
                DW_OP_consts => stack.push(cur.sleb128()? as u64),

                // register-based addresses
                DW_OP_fbreg => self.op_fbreg(ctx, &mut cur, &mut stack)?,
                DW_OP_breg0..=DW_OP_breg31 => {
                    let reg = u64::from(op - DW_OP_breg0);
                    let off = cur.sleb128()?;
                    stack.push(ctx.reg(reg)?.wrapping_add_signed(off));
                }
                DW_OP_bregx => {
                    let reg = cur.uleb128()?;
                    let off = cur.sleb128()?;
                    stack.push(ctx.reg(reg)?.wrapping_add_signed(off));
                }

                // stack operations
                DW_OP_dup => {
                    let v = top(&stack)?;
                    stack.push(v);
                }
                DW_OP_drop => {
                    pop(&mut stack)?;
                }
                DW_OP_pick => {
                    let n = cur.fixed_u8()? as usize;
                    let v = pick(&stack, n)?;
                    stack.push(v);
                }
                DW_OP_over => {
                    let v = pick(&stack, 1)?;
                    stack.push(v);
                }
                DW_OP_swap => {
                    if stack.len() < 2 {
                        return Err(underflow());
                    }
                    let len = stack.len();
                    stack.swap(len - 1, len - 2);
                }
                DW_OP_rot => {
                    if stack.len() < 3 {
                        return Err(underflow());
                    }
                    let len = stack.len();
                    let t = stack[len - 1];
                    stack[len - 1] = stack[len - 2];
                    stack[len - 2] = stack[len - 3];
                    stack[len - 3] = t;
                }
                DW_OP_deref => {
                    let addr = pop(&mut stack)?;
                    stack.push(ctx.deref_size(addr, self.sec.addr_size)?);
                }
                DW_OP_deref_size => {
                    let size = cur.fixed_u8()?;
                    if size > self.sec.addr_size {
                        return Err(DebuggerError::Expression(
                            "DW_OP_deref_size operand exceeds address size".to_string(),
                        ));
                    }
                    let addr = pop(&mut stack)?;
                    stack.push(ctx.deref_size(addr, size)?);
                }
                DW_OP_xderef => {
                    let addr = pop(&mut stack)?;
                    let asid = pop(&mut stack)?;
                    stack.push(ctx.xderef_size(addr, asid, self.sec.addr_size)?);
                }
                DW_OP_xderef_size => {
                    let size = cur.fixed_u8()?;
                    if size > self.sec.addr_size {
                        return Err(DebuggerError::Expression(
                            "DW_OP_xderef_size operand exceeds address size".to_string(),
                        ));
                    }
                    let addr = pop(&mut stack)?;
                    let asid = pop(&mut stack)?;
                    stack.push(ctx.xderef_size(addr, asid, size)?);
                }
                DW_OP_form_tls_address => {
                    let addr = pop(&mut stack)?;
                    stack.push(ctx.form_tls_address(addr)?);
                }
                #[cfg(target_arch = "x86_64")]
                DW_OP_call_frame_cfa => {
                    // approximated as rbp+16; call frame information is
                    // not consulted
                    stack.push(ctx.reg(6)?.wrapping_add(16));
                }
                #[cfg(target_arch = "aarch64")]
                DW_OP_call_frame_cfa => {
                    stack.push(ctx.reg(29)?);
                }

                // arithmetic and logical operations
                DW_OP_abs => {
                    let v = pop(&mut stack)? as i64;
                    stack.push(v.wrapping_abs() as u64);
                }
                DW_OP_and => {
                    let (first, second) = (pop(&mut stack)?, pop(&mut stack)?);
                    stack.push(second & first);
                }
                DW_OP_div => {
                    let (first, second) = (pop(&mut stack)? as i64, pop(&mut stack)? as i64);
                    if first == 0 {
                        return Err(DebuggerError::Expression(
                            "DW_OP_div division by zero".to_string(),
                        ));
                    }
                    stack.push(second.wrapping_div(first) as u64);
                }
                DW_OP_minus => {
                    let (first, second) = (pop(&mut stack)?, pop(&mut stack)?);
                    stack.push(second.wrapping_sub(first));
                }
                DW_OP_mod => {
                    let (first, second) = (pop(&mut stack)?, pop(&mut stack)?);
                    if first == 0 {
                        return Err(DebuggerError::Expression(
                            "DW_OP_mod division by zero".to_string(),
                        ));
                    }
                    stack.push(second % first);
                }
                DW_OP_mul => {
                    let (first, second) = (pop(&mut stack)?, pop(&mut stack)?);
                    stack.push(second.wrapping_mul(first));
                }
                DW_OP_neg => {
                    let v = pop(&mut stack)? as i64;
                    stack.push(v.wrapping_neg() as u64);
                }
                DW_OP_not => {
                    let v = pop(&mut stack)?;
                    stack.push(!v);
                }
                DW_OP_or => {
                    let (first, second) = (pop(&mut stack)?, pop(&mut stack)?);
                    stack.push(second | first);
                }
                DW_OP_plus => {
                    let (first, second) = (pop(&mut stack)?, pop(&mut stack)?);
                    stack.push(second.wrapping_add(first));
                }
                DW_OP_plus_uconst => {
                    let addend = cur.uleb128()?;
                    let v = pop(&mut stack)?;
                    stack.push(v.wrapping_add(addend));
                }
                DW_OP_shl => {
                    let (shift, v) = (pop(&mut stack)?, pop(&mut stack)?);
                    stack.push(if shift < 64 { v << shift } else { 0 });
                }
                DW_OP_shr => {
                    let (shift, v) = (pop(&mut stack)?, pop(&mut stack)?);
                    stack.push(if shift < 64 { v >> shift } else { 0 });
                }
                DW_OP_shra => {
                    let (shift, v) = (pop(&mut stack)?, pop(&mut stack)? as i64);
                    // shift the magnitude, then restore the sign; an
                    // over-shift yields zero
                    let negative = v < 0;
                    let mut mag = if negative {
                        v.wrapping_neg() as u64
                    } else {
                        v as u64
                    };
                    mag = if shift < 64 { mag >> shift } else { 0 };
                    let out = if negative {
                        (mag as i64).wrapping_neg() as u64
                    } else {
                        mag
                    };
                    stack.push(out);
                }
                DW_OP_xor => {
                    let (first, second) = (pop(&mut stack)?, pop(&mut stack)?);
                    stack.push(second ^ first);
                }

                // control flow: signed comparisons of second against first
                DW_OP_le | DW_OP_ge | DW_OP_eq | DW_OP_lt | DW_OP_gt | DW_OP_ne => {
                    let (first, second) = (pop(&mut stack)? as i64, pop(&mut stack)? as i64);
                    let res = match op {
                        DW_OP_le => second <= first,
                        DW_OP_ge => second >= first,
                        DW_OP_eq => second == first,
                        DW_OP_lt => second < first,
                        DW_OP_gt => second > first,
                        _ => second != first,
                    };
                    stack.push(u64::from(res));
                }
                DW_OP_skip => {
                    let disp = cur.fixed_i16()?;
                    self.branch(&mut cur, disp)?;
                }
                DW_OP_bra => {
                    let disp = cur.fixed_i16()?;
                    if pop(&mut stack)? != 0 {
                        self.branch(&mut cur, disp)?;
                    }
                }

                DW_OP_nop => (),

                // register location descriptions
                DW_OP_reg0..=DW_OP_reg31 => {
                    result.location = ExprLocation::Reg;
                    result.value = u64::from(op - DW_OP_reg0);
                }
                DW_OP_regx => {
                    result.location = ExprLocation::Reg;
                    result.value = cur.uleb128()?;
                }

                // implicit location descriptions
                DW_OP_implicit_value => {
                    let len = cur.uleb128()? as usize;
                    result.location = ExprLocation::Implicit;
                    result.implicit = Some(cur.take(len)?);
                }
                DW_OP_stack_value => {
                    result.location = ExprLocation::Literal;
                    result.value = top(&stack)?;
                }

                DW_OP_push_object_address | DW_OP_piece | DW_OP_bit_piece | DW_OP_call2
                | DW_OP_call4 | DW_OP_call_ref => {
                    return Err(DebuggerError::Expression(format!(
                        "operation {op:#04x} not implemented"
                    )));
                }
                DW_OP_lo_user..=0xff => {
                    return Err(DebuggerError::Expression(format!(
                        "unknown user operation {op:#04x}"
                    )));
                }
                other => {
                    return Err(DebuggerError::Expression(format!(
                        "bad operation {other:#04x}"
                    )));
                }
            }
        }

        if result.location == ExprLocation::Address {
            // still an address, so the value comes off the stack
            result.value = stack
                .last()
                .copied()
                .ok_or_else(|| {
                    DebuggerError::Expression("final stack is empty; no result given".to_string())
                })?;
        }

        Ok(result)
    }

    fn branch(&self, cur: &mut Cursor<'a>, disp: i16) -> Result<()> {
        let target = cur.section_offset() as i64 + i64::from(disp);
        if target < 0 || target as usize > self.sec.size() {
            return Err(DebuggerError::Expression(
                "branch target outside expression".to_string(),
            ));
        }
        *cur = Cursor::new(self.sec, target as usize);
        Ok(())
    }

    /// `DW_OP_fbreg`: evaluate the frame base of the innermost DIE whose
    /// span covers this expression, then offset it.
    fn op_fbreg(
        &self,
        ctx: &mut dyn ExprContext,
        cur: &mut Cursor<'a>,
        stack: &mut Vec<u64>,
    ) -> Result<()> {
        let offset = cur.sleb128()?;
        let info_offset = self.info_offset.ok_or_else(|| {
            DebuggerError::Expression("DW_OP_fbreg outside of .debug_info".to_string())
        })?;

        let root = self.dwarf.root_die(self.unit)?;
        let holder = find_frame_base_die(&root, info_offset)?.ok_or_else(|| {
            DebuggerError::Expression("no DIE with a frame base spans this expression".to_string())
        })?;

        let attr = holder.attr(DW_AT_frame_base)?;
        let frame_base = match attr.value_type() {
            ValueType::Loclist => attr.as_loclist()?.evaluate(ctx)?,
            ValueType::Exprloc | ValueType::Block => attr.as_exprloc()?.evaluate(ctx)?,
            other => {
                return Err(DebuggerError::Expression(format!(
                    "frame base has unexpected type {other}"
                )))
            }
        };

        match frame_base.location {
            ExprLocation::Reg => {
                stack.push(ctx.reg(frame_base.value)?.wrapping_add_signed(offset));
            }
            ExprLocation::Address => {
                #[cfg(target_arch = "x86_64")]
                stack.push(frame_base.value.wrapping_add_signed(offset));
                // the AArch64 frame base anchors below the locals
                #[cfg(target_arch = "aarch64")]
                stack.push(frame_base.value.wrapping_sub(offset as u64));
            }
            _ => {
                return Err(DebuggerError::Expression(
                    "unhandled frame base type for DW_OP_fbreg".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// The innermost DIE carrying `DW_AT_frame_base` whose span (including
/// descendants) contains the section offset.
fn find_frame_base_die<'d, 'a>(
    die: &Die<'d, 'a>,
    offset: usize,
) -> Result<Option<Die<'d, 'a>>> {
    let mut best = None;
    if die.has(DW_AT_frame_base) && die.contains_section_offset(offset)? {
        best = Some(die.clone());
    }

    let mut children = die.children();
    while let Some(child) = children.next()? {
        // children are ordered by offset; nothing past `offset` can span it
        if child.section_offset() > offset {
            break;
        }
        if let Some(inner) = find_frame_base_die(&child, offset)? {
            best = Some(inner);
        }
    }
    Ok(best)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dwarf::consts::{DW_AT_location, DW_AT_name};
    use crate::dwarf::testutil::{load, sample_dwarf};
    use crate::dwarf::SectionKind;
    use crate::elf::ByteOrder;
    use crate::errors::{DebuggerError, Result};

    struct TestCtx;

    impl ExprContext for TestCtx {
        fn reg(&mut self, regnum: u64) -> Result<u64> {
            Ok(0x1000 + regnum * 0x10)
        }
        fn deref_size(&mut self, address: u64, _size: u8) -> Result<u64> {
            Ok(address.wrapping_mul(2))
        }
        fn pc(&mut self) -> Result<u64> {
            Ok(0x1010)
        }
    }

    /// Builds an expression over a standalone window; `fbreg` is not
    /// usable through this.
    fn eval(bytes: &[u8]) -> Result<(ExprLocation, u64)> {
        let (info, abbrev, strs) = sample_dwarf();
        let dwarf = load(&info, &abbrev, &strs);

        let mut sec = crate::dwarf::Section::new(SectionKind::Info, bytes, ByteOrder::Lsb);
        sec.addr_size = 8;
        let expr = Expr::new(&dwarf, 0, sec, None);
        let res = expr.evaluate(&mut TestCtx)?;
        Ok((res.location, res.value))
    }

    #[test]
    fn test_literals_and_plus() {
        // lit5 lit3 plus -> address 8
        let (loc, value) = eval(&[0x35, 0x33, 0x22]).unwrap();
        assert_eq!(loc, ExprLocation::Address);
        assert_eq!(value, 8);
    }

    #[test]
    fn test_reg_location() {
        let (loc, value) = eval(&[0x57]).unwrap();
        assert_eq!(loc, ExprLocation::Reg);
        assert_eq!(value, 7);
    }

    #[test]
    fn test_stack_value() {
        let (loc, value) = eval(&[0x35, 0x9f]).unwrap();
        assert_eq!(loc, ExprLocation::Literal);
        assert_eq!(value, 5);
    }

    #[test]
    fn test_div_operand_order() {
        // push 8, push 2: quotient = second / first = 8 / 2
        let (_, value) = eval(&[0x38, 0x32, 0x1b]).unwrap();
        assert_eq!(value, 4);
        // push 2, push 8: 2 / 8 = 0
        let (_, value) = eval(&[0x32, 0x38, 0x1b]).unwrap();
        assert_eq!(value, 0);
    }

    #[test]
    fn test_shra() {
        // -8 >> 1 (arithmetic) = -4
        let (_, value) = eval(&[0x09, 0xf8, 0x31, 0x26]).unwrap();
        assert_eq!(value as i64, -4);
        // over-shift yields zero
        let (_, value) = eval(&[0x09, 0xf8, 0x08, 64, 0x26]).unwrap();
        assert_eq!(value, 0);
    }

    #[test]
    fn test_comparisons_are_signed() {
        // -1 < 1: push -1, push 1, lt -> second(-1) < first(1) -> 1
        let (_, value) = eval(&[0x09, 0xff, 0x31, 0x2d]).unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn test_bra() {
        // lit1; bra +1 skips the lit5; lit3 remains
        let (_, value) = eval(&[0x31, 0x28, 0x01, 0x00, 0x35, 0x33]).unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn test_breg_and_deref() {
        // breg6 +16 -> 0x1060 + 16; deref doubles in the test context
        let (_, value) = eval(&[0x76, 0x10, 0x06]).unwrap();
        assert_eq!(value, (0x1060 + 16) * 2);
    }

    #[test]
    fn test_empty_expression() {
        let (loc, _) = eval(&[]).unwrap();
        assert_eq!(loc, ExprLocation::Empty);
    }

    #[test]
    fn test_errors() {
        // plus on an empty stack
        assert!(matches!(
            eval(&[0x22]),
            Err(DebuggerError::Expression(_))
        ));
        // piece is unsupported
        assert!(matches!(
            eval(&[0x35, 0x93, 0x01]),
            Err(DebuggerError::Expression(_))
        ));
        // vendor range
        assert!(matches!(
            eval(&[0xe0]),
            Err(DebuggerError::Expression(_))
        ));
    }

    #[test]
    fn test_fbreg_through_frame_base() {
        let (info, abbrev, strs) = sample_dwarf();
        let dwarf = load(&info, &abbrev, &strs);

        let root = dwarf.root_die(0).unwrap();
        let mut children = root.children();
        let main = children.next().unwrap().unwrap();
        assert_eq!(main.attr(DW_AT_name).unwrap().as_string().unwrap(), "main");
        let mut vars = main.children();
        let x = vars.next().unwrap().unwrap();

        let expr = x.attr(DW_AT_location).unwrap().as_exprloc().unwrap();
        let res = expr.evaluate(&mut TestCtx).unwrap();
        assert_eq!(res.location, ExprLocation::Address);

        // the frame base is call_frame_cfa over reg values from TestCtx
        #[cfg(target_arch = "x86_64")]
        {
            // cfa = reg6 + 16, variable at cfa - 16
            assert_eq!(res.value, 0x1000 + 6 * 0x10);
        }
        #[cfg(target_arch = "aarch64")]
        {
            // cfa = reg29, variable at cfa + 16
            assert_eq!(res.value, 0x1000 + 29 * 0x10 + 16);
        }
    }
}
