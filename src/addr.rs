//! # Address Type
//!
//! A small opaque type for addresses in the debuggee, plus the translation
//! between runtime addresses and the link-time addresses DWARF talks about.
//!
//! Position-independent executables are mapped at a random base; the
//! difference between that base and zero is the load bias. Every address
//! coming out of the DWARF reader must be shifted by the bias before it is
//! used on the live process, and every runtime address must be shifted back
//! before it is looked up in the debug information.

use std::fmt::Display;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

use crate::Word;

/// A raw pointer in the address space of the debuggee
pub type RawPointer = *mut std::ffi::c_void;

/// An address in the debuggee
///
/// Depending on where it came from, an [`Addr`] is either a runtime address
/// or a DWARF-relative address; [`Addr::offset_load_address`] and
/// [`Addr::offset_dwarf_address`] convert between the two.
#[derive(Hash, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Addr(usize);

impl Addr {
    /// A zero address, used as the load bias of non-PIE executables
    pub const NULL: Self = Addr(0);

    #[must_use]
    pub fn usize(self) -> usize {
        self.0
    }

    #[must_use]
    pub fn u64(self) -> u64 {
        self.0 as u64
    }

    #[must_use]
    pub fn raw_pointer(self) -> RawPointer {
        self.0 as RawPointer
    }

    /// Maps a runtime address back into DWARF space by subtracting the load
    /// bias. Wraps, since runtime addresses below the image base occur
    /// (foreign code, the vdso).
    #[must_use]
    pub fn offset_load_address(self, load_bias: Addr) -> Addr {
        Addr(self.0.wrapping_sub(load_bias.0))
    }

    /// Maps a DWARF-relative address into the live process by adding the
    /// load bias.
    #[must_use]
    pub fn offset_dwarf_address(self, load_bias: Addr) -> Addr {
        Addr(self.0.wrapping_add(load_bias.0))
    }
}

impl Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl std::fmt::Debug for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl Add for Addr {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Add<usize> for Addr {
    type Output = Self;
    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<usize> for Addr {
    fn add_assign(&mut self, rhs: usize) {
        self.0 += rhs;
    }
}

impl Sub for Addr {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Sub<usize> for Addr {
    type Output = Self;
    fn sub(self, rhs: usize) -> Self::Output {
        Self(self.0 - rhs)
    }
}

impl SubAssign<usize> for Addr {
    fn sub_assign(&mut self, rhs: usize) {
        self.0 -= rhs;
    }
}

impl From<RawPointer> for Addr {
    fn from(value: RawPointer) -> Self {
        Addr(value as usize)
    }
}

impl From<usize> for Addr {
    fn from(value: usize) -> Self {
        Addr(value)
    }
}

impl From<u64> for Addr {
    fn from(value: u64) -> Self {
        Addr(value as usize)
    }
}

impl From<Word> for Addr {
    fn from(value: Word) -> Self {
        Addr(value as usize)
    }
}

impl From<Addr> for u64 {
    fn from(value: Addr) -> Self {
        value.0 as u64
    }
}

impl From<Addr> for Word {
    fn from(value: Addr) -> Self {
        value.0 as Word
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_addr_arithmetic() {
        let a = Addr::from(0x1100usize);
        let b = Addr::from(0x100usize);
        assert_eq!((a + b).usize(), 0x1200);
        assert_eq!((a - b).usize(), 0x1000);
        assert_eq!((a + 8usize).usize(), 0x1108);
    }

    #[test]
    fn test_load_bias_translation() {
        // an ET_DYN image mapped at 0x55aa00000000
        let bias = Addr::from(0x55aa_0000_0000usize);
        let runtime = Addr::from(0x55aa_0000_1234usize);

        assert_eq!(runtime.offset_load_address(bias).usize(), 0x1234);
        assert_eq!(
            Addr::from(0x1234usize).offset_dwarf_address(bias),
            runtime
        );
    }

    #[test]
    fn test_bias_translations_are_inverses() {
        let bias = Addr::from(0x7f00_dead_0000usize);
        for addr in [0usize, 0x42, 0x1_0000, 0xffff_ffff] {
            let a = Addr::from(addr).offset_dwarf_address(bias);
            assert_eq!(a.offset_load_address(bias).usize(), addr);
        }
    }

    #[test]
    fn test_display() {
        let a = Addr::from(0x1234usize);
        assert_eq!(format!("{a}"), "0x0000000000001234");
    }
}
