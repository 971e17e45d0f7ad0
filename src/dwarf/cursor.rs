//! # Byte Reader
//!
//! A bounds-checked cursor over a [`Section`] window. Every decode routine
//! the DWARF readers need lives here: fixed-width integers in either byte
//! order, both LEB128 flavors, NUL-terminated strings, addresses sized by
//! the window, format-dependent offsets, the initial-length dance that
//! selects 32- or 64-bit DWARF, and form skipping for the DIE decoder.
//!
//! Any read past the window end fails with [`DebuggerError::Underflow`].

use crate::dwarf::consts::{
    DwForm, DW_FORM_addr, DW_FORM_block, DW_FORM_block1, DW_FORM_block2, DW_FORM_block4,
    DW_FORM_data1, DW_FORM_data2, DW_FORM_data4, DW_FORM_data8, DW_FORM_exprloc, DW_FORM_flag,
    DW_FORM_flag_present, DW_FORM_indirect, DW_FORM_ref1, DW_FORM_ref2, DW_FORM_ref4,
    DW_FORM_ref8, DW_FORM_ref_addr, DW_FORM_ref_sig8, DW_FORM_ref_udata, DW_FORM_sdata,
    DW_FORM_sec_offset, DW_FORM_string, DW_FORM_strp, DW_FORM_udata,
};
use crate::dwarf::{DwarfFormat, Section};
use crate::elf::ByteOrder;
use crate::errors::{DebuggerError, Result};

/// A position in a section window
#[derive(Debug, Clone, Copy)]
pub struct Cursor<'a> {
    pub(crate) sec: Section<'a>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    #[must_use]
    pub fn new(sec: Section<'a>, offset: usize) -> Self {
        Self { sec, pos: offset }
    }

    /// Offset of the cursor relative to the window start
    #[must_use]
    pub fn section_offset(&self) -> usize {
        self.pos
    }

    /// Whether the cursor is at (or past) the window end
    #[must_use]
    pub fn at_end(&self) -> bool {
        self.pos >= self.sec.size()
    }

    /// Checks that at least `bytes` more bytes can be read.
    pub fn ensure(&self, bytes: usize) -> Result<()> {
        if self.pos >= self.sec.size() || self.sec.size() - self.pos < bytes {
            return Err(DebuggerError::Underflow);
        }
        Ok(())
    }

    /// Advances without reading. The next read bounds-checks as usual.
    pub fn skip(&mut self, bytes: usize) {
        self.pos = self.pos.saturating_add(bytes);
    }

    fn fixed_bytes<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.ensure(N)?;
        let mut out = [0; N];
        out.copy_from_slice(&self.sec.data[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    /// A view of the next `len` bytes, advancing past them.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if len == 0 {
            return Ok(&[]);
        }
        self.ensure(len)?;
        let out = &self.sec.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn fixed_u8(&mut self) -> Result<u8> {
        Ok(self.fixed_bytes::<1>()?[0])
    }

    pub fn fixed_i8(&mut self) -> Result<i8> {
        Ok(self.fixed_u8()? as i8)
    }

    pub fn fixed_u16(&mut self) -> Result<u16> {
        let b = self.fixed_bytes::<2>()?;
        Ok(match self.sec.order {
            ByteOrder::Lsb => u16::from_le_bytes(b),
            ByteOrder::Msb => u16::from_be_bytes(b),
        })
    }

    pub fn fixed_i16(&mut self) -> Result<i16> {
        Ok(self.fixed_u16()? as i16)
    }

    pub fn fixed_u32(&mut self) -> Result<u32> {
        let b = self.fixed_bytes::<4>()?;
        Ok(match self.sec.order {
            ByteOrder::Lsb => u32::from_le_bytes(b),
            ByteOrder::Msb => u32::from_be_bytes(b),
        })
    }

    pub fn fixed_i32(&mut self) -> Result<i32> {
        Ok(self.fixed_u32()? as i32)
    }

    pub fn fixed_u64(&mut self) -> Result<u64> {
        let b = self.fixed_bytes::<8>()?;
        Ok(match self.sec.order {
            ByteOrder::Lsb => u64::from_le_bytes(b),
            ByteOrder::Msb => u64::from_be_bytes(b),
        })
    }

    pub fn fixed_i64(&mut self) -> Result<i64> {
        Ok(self.fixed_u64()? as i64)
    }

    /// Unsigned LEB128: 7-bit groups, high bit marks continuation.
    pub fn uleb128(&mut self) -> Result<u64> {
        let mut result: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.fixed_u8()?;
            if shift < 64 {
                result |= u64::from(byte & 0x7f) << shift;
            }
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    /// Signed LEB128: like [`Cursor::uleb128`] with the final group's bit 6
    /// sign-extended.
    pub fn sleb128(&mut self) -> Result<i64> {
        let mut result: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.fixed_u8()?;
            if shift < 64 {
                result |= u64::from(byte & 0x7f) << shift;
            }
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    result |= u64::MAX << shift;
                }
                return Ok(result as i64);
            }
        }
    }

    /// An address, sized by the window's address size.
    pub fn address(&mut self) -> Result<u64> {
        match self.sec.addr_size {
            1 => Ok(u64::from(self.fixed_u8()?)),
            2 => Ok(u64::from(self.fixed_u16()?)),
            4 => Ok(u64::from(self.fixed_u32()?)),
            8 => self.fixed_u64(),
            other => Err(DebuggerError::Format(format!(
                "address size {other} not supported"
            ))),
        }
    }

    /// A section offset: 4 bytes in 32-bit DWARF, 8 in 64-bit.
    pub fn offset(&mut self) -> Result<usize> {
        match self.sec.format {
            DwarfFormat::Dwarf32 => Ok(self.fixed_u32()? as usize),
            DwarfFormat::Dwarf64 => Ok(self.fixed_u64()? as usize),
            DwarfFormat::Unknown => Err(DebuggerError::Format(
                "cannot read offset with unknown format".to_string(),
            )),
        }
    }

    /// A NUL-terminated string view into the window.
    pub fn cstr(&mut self) -> Result<&'a str> {
        let start = self.pos;
        while self.pos < self.sec.size() && self.sec.data[self.pos] != 0 {
            self.pos += 1;
        }
        if self.pos >= self.sec.size() {
            return Err(DebuggerError::Format("unterminated string".to_string()));
        }
        let s = std::str::from_utf8(&self.sec.data[start..self.pos])
            .map_err(|_| DebuggerError::Format("string is not valid UTF-8".to_string()))?;
        self.pos += 1;
        Ok(s)
    }

    /// Reads an initial length and derives the subsection it covers.
    ///
    /// The cursor must sit on an initial length field; afterwards it points
    /// past the subsection. The returned window starts at the length field
    /// and carries the selected DWARF format.
    pub fn subsection(&mut self) -> Result<Section<'a>> {
        let begin = self.pos;
        let word = self.fixed_u32()?;
        let (format, length) = if word < 0xffff_fff0 {
            (DwarfFormat::Dwarf32, word as usize + 4)
        } else if word == 0xffff_ffff {
            let length = self.fixed_u64()? as usize;
            (DwarfFormat::Dwarf64, length + 4 + 8)
        } else {
            return Err(DebuggerError::Format(
                "initial length has reserved value".to_string(),
            ));
        };
        self.pos = begin.saturating_add(length);
        Ok(self.sec.slice(begin, length, format, 0))
    }

    /// Skips the initial length field of the window's format.
    pub fn skip_initial_length(&mut self) -> Result<()> {
        match self.sec.format {
            DwarfFormat::Dwarf32 => self.skip(4),
            DwarfFormat::Dwarf64 => self.skip(4 + 8),
            DwarfFormat::Unknown => {
                return Err(DebuggerError::Format(
                    "cannot skip initial length with unknown format".to_string(),
                ))
            }
        }
        Ok(())
    }

    /// Advances past one attribute of the given form.
    pub fn skip_form(&mut self, form: DwForm) -> Result<()> {
        match form {
            DW_FORM_addr => self.skip(self.sec.addr_size as usize),
            DW_FORM_sec_offset | DW_FORM_ref_addr | DW_FORM_strp => match self.sec.format {
                DwarfFormat::Dwarf32 => self.skip(4),
                DwarfFormat::Dwarf64 => self.skip(8),
                DwarfFormat::Unknown => {
                    return Err(DebuggerError::Format(
                        "cannot read form with unknown format".to_string(),
                    ))
                }
            },
            DW_FORM_block1 => {
                let len = self.fixed_u8()? as usize;
                self.skip(len);
            }
            DW_FORM_block2 => {
                let len = self.fixed_u16()? as usize;
                self.skip(len);
            }
            DW_FORM_block4 => {
                let len = self.fixed_u32()? as usize;
                self.skip(len);
            }
            DW_FORM_block | DW_FORM_exprloc => {
                let len = self.uleb128()? as usize;
                self.skip(len);
            }
            DW_FORM_flag_present => (),
            DW_FORM_flag | DW_FORM_data1 | DW_FORM_ref1 => self.skip(1),
            DW_FORM_data2 | DW_FORM_ref2 => self.skip(2),
            DW_FORM_data4 | DW_FORM_ref4 => self.skip(4),
            DW_FORM_data8 | DW_FORM_ref_sig8 | DW_FORM_ref8 => self.skip(8),
            DW_FORM_sdata | DW_FORM_udata | DW_FORM_ref_udata => {
                while self.fixed_u8()? & 0x80 != 0 {}
            }
            DW_FORM_string => {
                self.cstr()?;
            }
            DW_FORM_indirect => {
                let nested = DwForm(self.uleb128()?);
                self.skip_form(nested)?;
            }
            other => {
                return Err(DebuggerError::Format(format!("unknown form {other}")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dwarf::SectionKind;

    fn section(data: &[u8]) -> Section<'_> {
        Section::new(SectionKind::Info, data, ByteOrder::Lsb)
    }

    #[test]
    fn test_uleb128() {
        // 624485 per the DWARF appendix
        let data = [0xe5, 0x8e, 0x26];
        let mut cur = Cursor::new(section(&data), 0);
        assert_eq!(cur.uleb128().unwrap(), 624_485);
        assert!(cur.at_end());
    }

    #[test]
    fn test_sleb128() {
        // -123456 per the DWARF appendix
        let data = [0xc0, 0xbb, 0x78];
        let mut cur = Cursor::new(section(&data), 0);
        assert_eq!(cur.sleb128().unwrap(), -123_456);

        let data = [0x7f];
        let mut cur = Cursor::new(section(&data), 0);
        assert_eq!(cur.sleb128().unwrap(), -1);

        let data = [0x3f];
        let mut cur = Cursor::new(section(&data), 0);
        assert_eq!(cur.sleb128().unwrap(), 63);
    }

    #[test]
    fn test_leb128_round_trips() {
        fn encode_uleb(mut v: u64) -> Vec<u8> {
            let mut out = Vec::new();
            loop {
                let mut byte = (v & 0x7f) as u8;
                v >>= 7;
                if v != 0 {
                    byte |= 0x80;
                }
                out.push(byte);
                if v == 0 {
                    return out;
                }
            }
        }
        fn encode_sleb(mut v: i64) -> Vec<u8> {
            let mut out = Vec::new();
            loop {
                let byte = (v & 0x7f) as u8;
                v >>= 7;
                let done = (v == 0 && byte & 0x40 == 0) || (v == -1 && byte & 0x40 != 0);
                out.push(if done { byte } else { byte | 0x80 });
                if done {
                    return out;
                }
            }
        }

        for v in [0u64, 1, 127, 128, 624_485, u64::from(u32::MAX), u64::MAX] {
            let data = encode_uleb(v);
            let mut cur = Cursor::new(section(&data), 0);
            assert_eq!(cur.uleb128().unwrap(), v);
        }
        for v in [0i64, 2, -2, 63, -64, 64, -123_456, i64::MAX, i64::MIN] {
            let data = encode_sleb(v);
            let mut cur = Cursor::new(section(&data), 0);
            assert_eq!(cur.sleb128().unwrap(), v, "value {v}");
        }
    }

    #[test]
    fn test_fixed_byte_orders() {
        let data = [0x34, 0x12];
        let mut cur = Cursor::new(section(&data), 0);
        assert_eq!(cur.fixed_u16().unwrap(), 0x1234);

        let mut msb = Section::new(SectionKind::Info, &data, ByteOrder::Msb);
        msb.addr_size = 2;
        let mut cur = Cursor::new(msb, 0);
        assert_eq!(cur.address().unwrap(), 0x3412);
    }

    #[test]
    fn test_underflow_at_end() {
        let data = [0xaa];
        let mut cur = Cursor::new(section(&data), 0);
        assert_eq!(cur.fixed_u8().unwrap(), 0xaa);
        // exactly at the end: end-of-data, and one further read underflows
        assert!(cur.at_end());
        assert!(matches!(cur.fixed_u8(), Err(DebuggerError::Underflow)));
        assert!(matches!(cur.uleb128(), Err(DebuggerError::Underflow)));
    }

    #[test]
    fn test_cstr() {
        let data = b"hello\0world";
        let mut cur = Cursor::new(section(data), 0);
        assert_eq!(cur.cstr().unwrap(), "hello");
        // "world" has no terminator
        assert!(cur.cstr().is_err());
    }

    #[test]
    fn test_initial_length_32() {
        let mut data = vec![0u8; 0];
        data.extend_from_slice(&8u32.to_le_bytes());
        data.extend_from_slice(&[0; 8]);
        let mut cur = Cursor::new(section(&data), 0);
        let sub = cur.subsection().unwrap();
        assert_eq!(sub.format, DwarfFormat::Dwarf32);
        assert_eq!(sub.size(), 12); // length field + 8 payload bytes
        assert_eq!(cur.section_offset(), 12);
    }

    #[test]
    fn test_initial_length_64() {
        let mut data = Vec::new();
        data.extend_from_slice(&0xffff_ffffu32.to_le_bytes());
        data.extend_from_slice(&4u64.to_le_bytes());
        data.extend_from_slice(&[0; 4]);
        let mut cur = Cursor::new(section(&data), 0);
        let sub = cur.subsection().unwrap();
        assert_eq!(sub.format, DwarfFormat::Dwarf64);
        assert_eq!(sub.size(), 16);
    }

    #[test]
    fn test_initial_length_reserved() {
        let data = 0xffff_fff0u32.to_le_bytes();
        let mut cur = Cursor::new(section(&data), 0);
        assert!(matches!(cur.subsection(), Err(DebuggerError::Format(_))));
    }

    #[test]
    fn test_skip_form() {
        // data2, udata (2 bytes), block1 (len 3), string
        let data = [
            0x11, 0x22, // data2
            0x80, 0x01, // udata
            0x03, 0xaa, 0xbb, 0xcc, // block1
            b'h', b'i', 0x00, // string
            0x42, // trailing byte
        ];
        let mut sec = section(&data);
        sec.format = DwarfFormat::Dwarf32;
        let mut cur = Cursor::new(sec, 0);
        cur.skip_form(DW_FORM_data2).unwrap();
        cur.skip_form(DW_FORM_udata).unwrap();
        cur.skip_form(DW_FORM_block1).unwrap();
        cur.skip_form(DW_FORM_string).unwrap();
        assert_eq!(cur.fixed_u8().unwrap(), 0x42);
    }

    #[test]
    fn test_skip_form_indirect() {
        // indirect -> udata
        let data = [0x0f, 0xe5, 0x8e, 0x26, 0x99];
        let mut cur = Cursor::new(section(&data), 0);
        cur.skip_form(DW_FORM_indirect).unwrap();
        assert_eq!(cur.fixed_u8().unwrap(), 0x99);
    }
}
