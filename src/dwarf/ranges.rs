//! # Range Lists
//!
//! A range list describes a possibly non-contiguous set of addresses with
//! the closed-open convention `low <= pc < high`. Lists in `.debug_ranges`
//! are pairs of unit-address-sized values: `(0, 0)` terminates, a pair
//! whose low is the maximum representable address selects a new running
//! base, and anything else is `[base+low, base+high)`.
//!
//! A list can also be built synthetically from a `DW_AT_low_pc` /
//! `DW_AT_high_pc` pair.

use crate::dwarf::consts::{DW_AT_high_pc, DW_AT_low_pc, DW_AT_ranges};
use crate::dwarf::cursor::Cursor;
use crate::dwarf::die::Die;
use crate::dwarf::value::ValueType;
use crate::dwarf::Section;
use crate::errors::{DebuggerError, Result};

/// One entry of a range list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeEntry {
    pub low: u64,
    /// First address past the range
    pub high: u64,
}

impl RangeEntry {
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        self.low <= addr && addr < self.high
    }
}

/// A range list, backed by `.debug_ranges` or synthesized from a pc pair
#[derive(Debug, Clone)]
pub enum RangeList<'a> {
    Section { sec: Section<'a>, base: u64 },
    Synthetic { ranges: Vec<(u64, u64)> },
}

impl<'a> RangeList<'a> {
    /// A list over a `.debug_ranges` window; `base` is the owning unit's
    /// `DW_AT_low_pc` or 0.
    #[must_use]
    pub fn from_section(sec: Section<'a>, base: u64) -> Self {
        RangeList::Section { sec, base }
    }

    /// A list from explicit `(low, high)` pairs.
    #[must_use]
    pub fn synthetic(ranges: Vec<(u64, u64)>) -> Self {
        RangeList::Synthetic { ranges }
    }

    #[must_use]
    pub fn iter(&self) -> RangeIter<'_, 'a> {
        match self {
            RangeList::Section { sec, base } => RangeIter::Section {
                cur: Cursor::new(*sec, 0),
                base: *base,
                done: false,
            },
            RangeList::Synthetic { ranges } => RangeIter::Synthetic {
                ranges,
                index: 0,
            },
        }
    }

    /// Whether any entry contains `addr`. Linear scan.
    pub fn contains(&self, addr: u64) -> Result<bool> {
        let mut iter = self.iter();
        while let Some(entry) = iter.next()? {
            if entry.contains(addr) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Iterator over the entries of a [`RangeList`]
pub enum RangeIter<'l, 'a> {
    Section {
        cur: Cursor<'a>,
        base: u64,
        done: bool,
    },
    Synthetic {
        ranges: &'l [(u64, u64)],
        index: usize,
    },
}

impl RangeIter<'_, '_> {
    /// The next range, applying base selection; `None` at the `(0, 0)`
    /// terminator.
    pub fn next(&mut self) -> Result<Option<RangeEntry>> {
        match self {
            RangeIter::Synthetic { ranges, index } => {
                let Some(&(low, high)) = ranges.get(*index) else {
                    return Ok(None);
                };
                *index += 1;
                Ok(Some(RangeEntry { low, high }))
            }
            RangeIter::Section { cur, base, done } => {
                if *done {
                    return Ok(None);
                }
                // the largest representable address marks a base selection
                let addr_size = cur.sec.addr_size;
                let largest = if addr_size >= 8 {
                    u64::MAX
                } else {
                    (1u64 << (8 * u32::from(addr_size))) - 1
                };

                loop {
                    let low = cur.address()?;
                    let high = cur.address()?;

                    if low == 0 && high == 0 {
                        *done = true;
                        return Ok(None);
                    } else if low == largest {
                        *base = high;
                    } else {
                        return Ok(Some(RangeEntry {
                            low: base.wrapping_add(low),
                            high: base.wrapping_add(high),
                        }));
                    }
                }
            }
        }
    }
}

/// The PC range a DIE's code spans.
///
/// Uses `DW_AT_ranges` when present; otherwise synthesizes a single range
/// from `DW_AT_low_pc` and `DW_AT_high_pc` (absolute or an offset from low,
/// depending on the form).
pub fn die_pc_range<'a>(die: &Die<'_, 'a>) -> Result<RangeList<'a>> {
    if die.has(DW_AT_ranges) {
        return die.attr(DW_AT_ranges)?.as_rangelist();
    }

    let low = die.attr(DW_AT_low_pc)?.as_address()?;
    let high = if die.has(DW_AT_high_pc) {
        let value = die.attr(DW_AT_high_pc)?;
        match value.value_type() {
            ValueType::Address => value.as_address()?,
            ValueType::Constant | ValueType::UConstant => low + value.as_uconstant()?,
            other => {
                return Err(DebuggerError::Format(format!(
                    "DW_AT_high_pc has unexpected type {other}"
                )))
            }
        }
    } else {
        low + 1
    };

    Ok(RangeList::synthetic(vec![(low, high)]))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dwarf::consts::{DW_AT_name, DW_AT_low_pc};
    use crate::dwarf::testutil::sample_dwarf;
    use crate::dwarf::{DwarfFormat, SectionKind};
    use crate::elf::ByteOrder;

    fn ranges_section(data: &[u8], addr_size: u8) -> Section<'_> {
        let mut sec = Section::new(SectionKind::Ranges, data, ByteOrder::Lsb);
        sec.addr_size = addr_size;
        sec.format = DwarfFormat::Dwarf32;
        sec
    }

    #[test]
    fn test_iteration_and_termination() {
        let mut data = Vec::new();
        for v in [0x1000u64, 0x1100, 0x2000, 0x2400, 0, 0] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let list = RangeList::from_section(ranges_section(&data, 8), 0x1_0000);

        let mut iter = list.iter();
        assert_eq!(
            iter.next().unwrap().unwrap(),
            RangeEntry { low: 0x1_1000, high: 0x1_1100 }
        );
        assert_eq!(
            iter.next().unwrap().unwrap(),
            RangeEntry { low: 0x1_2000, high: 0x1_2400 }
        );
        assert!(iter.next().unwrap().is_none());
        // stays at the end
        assert!(iter.next().unwrap().is_none());
    }

    #[test]
    fn test_base_address_selection() {
        let mut data = Vec::new();
        for v in [u64::MAX, 0x4000_0000, 0x10u64, 0x20, 0, 0] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let list = RangeList::from_section(ranges_section(&data, 8), 0);

        let mut iter = list.iter();
        let entry = iter.next().unwrap().unwrap();
        assert_eq!(entry, RangeEntry { low: 0x4000_0010, high: 0x4000_0020 });
        assert!(iter.next().unwrap().is_none());
    }

    #[test]
    fn test_base_selection_4_byte_addresses() {
        let mut data = Vec::new();
        for v in [0xffff_ffffu32, 0x8000, 0x1, 0x5, 0, 0] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let list = RangeList::from_section(ranges_section(&data, 4), 0);

        let mut iter = list.iter();
        assert_eq!(
            iter.next().unwrap().unwrap(),
            RangeEntry { low: 0x8001, high: 0x8005 }
        );
    }

    #[test]
    fn test_contains() {
        let list = RangeList::synthetic(vec![(0x1000, 0x1050), (0x1100, 0x1130)]);
        assert!(list.contains(0x1000).unwrap());
        assert!(list.contains(0x104f).unwrap());
        assert!(!list.contains(0x1050).unwrap());
        assert!(list.contains(0x1105).unwrap());
        assert!(!list.contains(0x2000).unwrap());
    }

    #[test]
    fn test_die_pc_range_from_high_pc_offset() {
        let (info, abbrev, strs) = sample_dwarf();
        let dwarf = crate::dwarf::testutil::load(&info, &abbrev, &strs);

        let root = dwarf.root_die(0).unwrap();
        let mut children = root.children();
        let main = children.next().unwrap().unwrap();
        assert_eq!(main.attr(DW_AT_name).unwrap().as_string().unwrap(), "main");
        assert_eq!(main.attr(DW_AT_low_pc).unwrap().as_address().unwrap(), 0x1000);

        // high_pc is a constant, so it offsets low_pc
        let range = die_pc_range(&main).unwrap();
        assert!(range.contains(0x1000).unwrap());
        assert!(range.contains(0x104f).unwrap());
        assert!(!range.contains(0x1050).unwrap());
    }
}
