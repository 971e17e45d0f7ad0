//! # Location Lists
//!
//! A location list in `.debug_loc` gives a variable different location
//! expressions over different PC ranges. Entries are
//! `(start, end, expr_len, expr_bytes)` with addresses at the unit's
//! address size, terminated by `(0, 0)`. The offsets are relative to the
//! unit's base PC (`DW_AT_low_pc` of the root DIE), and the effective PC
//! comes from the evaluation context.

use crate::dwarf::consts::DW_AT_low_pc;
use crate::dwarf::cursor::Cursor;
use crate::dwarf::expr::{Expr, ExprContext, ExprResult};
use crate::dwarf::{DwarfFormat, DwarfInfo, SectionKind};
use crate::errors::Result;

/// A location list rooted at an offset of `.debug_loc`
#[derive(Clone, Copy)]
pub struct LocList<'d, 'a> {
    dwarf: &'d DwarfInfo<'a>,
    unit: usize,
    sec_offset: usize,
}

impl<'d, 'a> LocList<'d, 'a> {
    pub(crate) fn new(dwarf: &'d DwarfInfo<'a>, unit: usize, sec_offset: usize) -> Self {
        Self {
            dwarf,
            unit,
            sec_offset,
        }
    }

    /// Finds the entry covering `ctx.pc()` and evaluates its expression.
    ///
    /// Returns the empty location when no entry matches.
    pub fn evaluate(&self, ctx: &mut dyn ExprContext) -> Result<ExprResult<'a>> {
        let unit = self.dwarf.unit(self.unit);
        let loc = self
            .dwarf
            .section(SectionKind::Loc)?
            .slice(0, usize::MAX, DwarfFormat::Unknown, unit.addr_size());
        let mut cur = Cursor::new(loc, self.sec_offset);

        let root = self.dwarf.root_die(self.unit)?;
        let base = if root.has(DW_AT_low_pc) {
            root.attr(DW_AT_low_pc)?.as_address()?
        } else {
            0
        };
        let pc = ctx.pc()?.wrapping_sub(base);

        loop {
            let start = cur.address()?;
            let end = cur.address()?;
            if start == 0 && end == 0 {
                break;
            }

            let len = cur.fixed_u16()? as usize;
            let off = cur.section_offset();
            cur.skip(len);

            if pc >= start && pc < end {
                let expr = Expr::new(
                    self.dwarf,
                    self.unit,
                    loc.slice(off, len, DwarfFormat::Unknown, unit.addr_size()),
                    None,
                );
                return expr.evaluate(ctx);
            }
        }

        Ok(ExprResult::empty())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dwarf::expr::ExprLocation;
    use crate::dwarf::testutil::{load_with, sample_dwarf};
    use crate::dwarf::SectionKind;

    struct PcCtx(u64);

    impl ExprContext for PcCtx {
        fn pc(&mut self) -> Result<u64> {
            Ok(self.0)
        }
        fn reg(&mut self, regnum: u64) -> Result<u64> {
            Ok(0x2000 + regnum)
        }
    }

    /// Two entries: `[0x0, 0x10)` in reg5, `[0x10, 0x40)` at breg5+8.
    fn loc_bytes() -> Vec<u8> {
        let mut loc = Vec::new();
        loc.extend_from_slice(&0x0u64.to_le_bytes());
        loc.extend_from_slice(&0x10u64.to_le_bytes());
        loc.extend_from_slice(&1u16.to_le_bytes());
        loc.push(0x55); // DW_OP_reg5
        loc.extend_from_slice(&0x10u64.to_le_bytes());
        loc.extend_from_slice(&0x40u64.to_le_bytes());
        loc.extend_from_slice(&2u16.to_le_bytes());
        loc.push(0x75); // DW_OP_breg5
        loc.push(0x08);
        loc.extend_from_slice(&0x0u64.to_le_bytes());
        loc.extend_from_slice(&0x0u64.to_le_bytes());
        loc
    }

    #[test]
    fn test_pc_resolution() {
        let (info, abbrev, strs) = sample_dwarf();
        let loc = loc_bytes();
        let dwarf = load_with(&info, &abbrev, &strs, &[(SectionKind::Loc, &loc)]);
        let list = LocList::new(&dwarf, 0, 0);

        // the unit's low_pc is 0x1000, so pc 0x1008 falls in the first
        // entry
        let res = list.evaluate(&mut PcCtx(0x1008)).unwrap();
        assert_eq!(res.location, ExprLocation::Reg);
        assert_eq!(res.value, 5);

        // and pc 0x1020 in the second
        let res = list.evaluate(&mut PcCtx(0x1020)).unwrap();
        assert_eq!(res.location, ExprLocation::Address);
        assert_eq!(res.value, 0x2005 + 8);
    }

    #[test]
    fn test_no_match_is_empty() {
        let (info, abbrev, strs) = sample_dwarf();
        let loc = loc_bytes();
        let dwarf = load_with(&info, &abbrev, &strs, &[(SectionKind::Loc, &loc)]);
        let list = LocList::new(&dwarf, 0, 0);

        let res = list.evaluate(&mut PcCtx(0x5000)).unwrap();
        assert_eq!(res.location, ExprLocation::Empty);
    }
}
