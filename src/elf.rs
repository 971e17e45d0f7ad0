//! # ELF View
//!
//! A zero-copy reader over a memory-mapped ELF image. The raw 32- or 64-bit
//! headers, in either byte order, are canonicalized field by field into a
//! single 64-bit in-memory shape, so everything above this module works with
//! one set of types.
//!
//! Sections are exposed by index and by name (resolved through the section
//! name string table at `e_shstrndx`), with typed [`Strtab`] and [`Symtab`]
//! views on top of the raw bytes.

use serde::Serialize;

use crate::errors::{DebuggerError, Result};

/// Byte order of an ELF image or a DWARF section window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Lsb,
    Msb,
}

/// ELF file class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

/// `e_type` values the debugger cares about
pub const ET_EXEC: u16 = 2;
/// Shared object / position-independent executable
pub const ET_DYN: u16 = 3;

/// `sh_type` values
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_NOBITS: u32 = 8;
pub const SHT_DYNSYM: u32 = 11;

const EV_CURRENT: u8 = 1;

/// Canonicalized ELF file header
#[derive(Debug, Clone, Copy)]
pub struct Ehdr {
    pub class: ElfClass,
    pub data: ByteOrder,
    pub osabi: u8,
    pub typ: u16,
    pub machine: u16,
    pub version: u32,
    pub entry: u64,
    pub phoff: u64,
    pub shoff: u64,
    pub flags: u32,
    pub ehsize: u16,
    pub phentsize: u16,
    pub phnum: u16,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

/// Canonicalized program header
#[derive(Debug, Clone, Copy)]
pub struct Phdr {
    pub typ: u32,
    pub flags: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub paddr: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub align: u64,
}

/// Canonicalized section header
#[derive(Debug, Clone, Copy)]
pub struct Shdr {
    pub name: u32,
    pub typ: u32,
    pub flags: u64,
    pub addr: u64,
    pub offset: u64,
    pub size: u64,
    pub link: u32,
    pub info: u32,
    pub addralign: u64,
    pub entsize: u64,
}

/// Canonicalized symbol table entry
#[derive(Debug, Clone, Copy)]
pub struct Sym {
    pub name: u32,
    pub info: u8,
    pub other: u8,
    pub shndx: u16,
    pub value: u64,
    pub size: u64,
}

/// The `st_info` type nibble of a symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    NoType,
    Object,
    Func,
    Section,
    File,
    Other(u8),
}

impl Sym {
    #[must_use]
    pub fn kind(&self) -> SymbolKind {
        match self.info & 0xf {
            0 => SymbolKind::NoType,
            1 => SymbolKind::Object,
            2 => SymbolKind::Func,
            3 => SymbolKind::Section,
            4 => SymbolKind::File,
            other => SymbolKind::Other(other),
        }
    }
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolKind::NoType => write!(f, "notype"),
            SymbolKind::Object => write!(f, "object"),
            SymbolKind::Func => write!(f, "func"),
            SymbolKind::Section => write!(f, "section"),
            SymbolKind::File => write!(f, "file"),
            SymbolKind::Other(o) => write!(f, "other({o})"),
        }
    }
}

fn field_bytes<const N: usize>(data: &[u8], off: usize) -> Result<[u8; N]> {
    let raw = data
        .get(off..off + N)
        .ok_or_else(|| DebuggerError::Range(format!("offset {off} exceeds image size")))?;
    let mut out = [0; N];
    out.copy_from_slice(raw);
    Ok(out)
}

fn read_u16(data: &[u8], off: usize, ord: ByteOrder) -> Result<u16> {
    let b = field_bytes::<2>(data, off)?;
    Ok(match ord {
        ByteOrder::Lsb => u16::from_le_bytes(b),
        ByteOrder::Msb => u16::from_be_bytes(b),
    })
}

fn read_u32(data: &[u8], off: usize, ord: ByteOrder) -> Result<u32> {
    let b = field_bytes::<4>(data, off)?;
    Ok(match ord {
        ByteOrder::Lsb => u32::from_le_bytes(b),
        ByteOrder::Msb => u32::from_be_bytes(b),
    })
}

fn read_u64(data: &[u8], off: usize, ord: ByteOrder) -> Result<u64> {
    let b = field_bytes::<8>(data, off)?;
    Ok(match ord {
        ByteOrder::Lsb => u64::from_le_bytes(b),
        ByteOrder::Msb => u64::from_be_bytes(b),
    })
}

/// A parsed ELF image borrowing the mapped file
pub struct ElfFile<'a> {
    data: &'a [u8],
    hdr: Ehdr,
    segments: Vec<Phdr>,
    sections: Vec<Shdr>,
}

impl<'a> ElfFile<'a> {
    /// Parses and validates the ELF image in `data`.
    ///
    /// # Errors
    ///
    /// Fails with a format error on a bad magic number, an unknown class,
    /// data encoding or version, or a bad section name string table index,
    /// and with a range error when a header table lies outside the image.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let ident = data
            .get(..16)
            .ok_or_else(|| DebuggerError::Format("image too small for ELF header".to_string()))?;

        if ident[..4] != [0x7f, b'E', b'L', b'F'] {
            return Err(DebuggerError::Format("bad ELF magic number".to_string()));
        }
        let class = match ident[4] {
            1 => ElfClass::Elf32,
            2 => ElfClass::Elf64,
            _ => return Err(DebuggerError::Format("bad ELF class".to_string())),
        };
        let order = match ident[5] {
            1 => ByteOrder::Lsb,
            2 => ByteOrder::Msb,
            _ => return Err(DebuggerError::Format("bad ELF data order".to_string())),
        };
        if ident[6] != EV_CURRENT {
            return Err(DebuggerError::Format("unknown ELF version".to_string()));
        }

        let hdr = Self::canon_ehdr(data, class, order, ident[7])?;
        if hdr.version != u32::from(EV_CURRENT) {
            return Err(DebuggerError::Format("unknown ELF version".to_string()));
        }
        if hdr.shnum != 0 && hdr.shstrndx >= hdr.shnum {
            return Err(DebuggerError::Format(
                "bad section name string table index".to_string(),
            ));
        }

        let mut segments = Vec::with_capacity(hdr.phnum as usize);
        for i in 0..hdr.phnum {
            let off = hdr.phoff as usize + i as usize * hdr.phentsize as usize;
            segments.push(Self::canon_phdr(data, off, class, order)?);
        }

        let mut sections = Vec::with_capacity(hdr.shnum as usize);
        for i in 0..hdr.shnum {
            let off = hdr.shoff as usize + i as usize * hdr.shentsize as usize;
            sections.push(Self::canon_shdr(data, off, class, order)?);
        }

        Ok(Self {
            data,
            hdr,
            segments,
            sections,
        })
    }

    fn canon_ehdr(data: &[u8], class: ElfClass, ord: ByteOrder, osabi: u8) -> Result<Ehdr> {
        let (entry, phoff, shoff, rest) = match class {
            ElfClass::Elf32 => (
                u64::from(read_u32(data, 24, ord)?),
                u64::from(read_u32(data, 28, ord)?),
                u64::from(read_u32(data, 32, ord)?),
                36,
            ),
            ElfClass::Elf64 => (
                read_u64(data, 24, ord)?,
                read_u64(data, 32, ord)?,
                read_u64(data, 40, ord)?,
                48,
            ),
        };

        Ok(Ehdr {
            class,
            data: ord,
            osabi,
            typ: read_u16(data, 16, ord)?,
            machine: read_u16(data, 18, ord)?,
            version: read_u32(data, 20, ord)?,
            entry,
            phoff,
            shoff,
            flags: read_u32(data, rest, ord)?,
            ehsize: read_u16(data, rest + 4, ord)?,
            phentsize: read_u16(data, rest + 6, ord)?,
            phnum: read_u16(data, rest + 8, ord)?,
            shentsize: read_u16(data, rest + 10, ord)?,
            shnum: read_u16(data, rest + 12, ord)?,
            shstrndx: read_u16(data, rest + 14, ord)?,
        })
    }

    fn canon_phdr(data: &[u8], off: usize, class: ElfClass, ord: ByteOrder) -> Result<Phdr> {
        Ok(match class {
            ElfClass::Elf32 => Phdr {
                typ: read_u32(data, off, ord)?,
                offset: u64::from(read_u32(data, off + 4, ord)?),
                vaddr: u64::from(read_u32(data, off + 8, ord)?),
                paddr: u64::from(read_u32(data, off + 12, ord)?),
                filesz: u64::from(read_u32(data, off + 16, ord)?),
                memsz: u64::from(read_u32(data, off + 20, ord)?),
                flags: read_u32(data, off + 24, ord)?,
                align: u64::from(read_u32(data, off + 28, ord)?),
            },
            ElfClass::Elf64 => Phdr {
                typ: read_u32(data, off, ord)?,
                flags: read_u32(data, off + 4, ord)?,
                offset: read_u64(data, off + 8, ord)?,
                vaddr: read_u64(data, off + 16, ord)?,
                paddr: read_u64(data, off + 24, ord)?,
                filesz: read_u64(data, off + 32, ord)?,
                memsz: read_u64(data, off + 40, ord)?,
                align: read_u64(data, off + 48, ord)?,
            },
        })
    }

    fn canon_shdr(data: &[u8], off: usize, class: ElfClass, ord: ByteOrder) -> Result<Shdr> {
        Ok(match class {
            ElfClass::Elf32 => Shdr {
                name: read_u32(data, off, ord)?,
                typ: read_u32(data, off + 4, ord)?,
                flags: u64::from(read_u32(data, off + 8, ord)?),
                addr: u64::from(read_u32(data, off + 12, ord)?),
                offset: u64::from(read_u32(data, off + 16, ord)?),
                size: u64::from(read_u32(data, off + 20, ord)?),
                link: read_u32(data, off + 24, ord)?,
                info: read_u32(data, off + 28, ord)?,
                addralign: u64::from(read_u32(data, off + 32, ord)?),
                entsize: u64::from(read_u32(data, off + 36, ord)?),
            },
            ElfClass::Elf64 => Shdr {
                name: read_u32(data, off, ord)?,
                typ: read_u32(data, off + 4, ord)?,
                flags: read_u64(data, off + 8, ord)?,
                addr: read_u64(data, off + 16, ord)?,
                offset: read_u64(data, off + 24, ord)?,
                size: read_u64(data, off + 32, ord)?,
                link: read_u32(data, off + 40, ord)?,
                info: read_u32(data, off + 44, ord)?,
                addralign: read_u64(data, off + 48, ord)?,
                entsize: read_u64(data, off + 56, ord)?,
            },
        })
    }

    fn canon_sym(data: &[u8], off: usize, class: ElfClass, ord: ByteOrder) -> Result<Sym> {
        Ok(match class {
            ElfClass::Elf32 => Sym {
                name: read_u32(data, off, ord)?,
                value: u64::from(read_u32(data, off + 4, ord)?),
                size: u64::from(read_u32(data, off + 8, ord)?),
                info: field_bytes::<1>(data, off + 12)?[0],
                other: field_bytes::<1>(data, off + 13)?[0],
                shndx: read_u16(data, off + 14, ord)?,
            },
            ElfClass::Elf64 => Sym {
                name: read_u32(data, off, ord)?,
                info: field_bytes::<1>(data, off + 4)?[0],
                other: field_bytes::<1>(data, off + 5)?[0],
                shndx: read_u16(data, off + 6, ord)?,
                value: read_u64(data, off + 8, ord)?,
                size: read_u64(data, off + 16, ord)?,
            },
        })
    }

    #[must_use]
    pub fn hdr(&self) -> &Ehdr {
        &self.hdr
    }

    #[must_use]
    pub fn segments(&self) -> &[Phdr] {
        &self.segments
    }

    #[must_use]
    pub fn segment(&self, index: usize) -> Option<&Phdr> {
        self.segments.get(index)
    }

    /// How many sections the image has
    #[must_use]
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// The section at `index`, or `None` when out of range
    #[must_use]
    pub fn section(&self, index: usize) -> Option<Section<'_, 'a>> {
        self.sections.get(index).map(|hdr| Section {
            file: self,
            hdr,
            index,
        })
    }

    /// Finds a section by name, resolved through the section name string
    /// table.
    pub fn section_by_name(&self, name: &str) -> Result<Option<Section<'_, 'a>>> {
        for index in 0..self.sections.len() {
            let sec = Section {
                file: self,
                hdr: &self.sections[index],
                index,
            };
            if sec.name()? == name {
                return Ok(Some(sec));
            }
        }
        Ok(None)
    }

    fn shstrtab(&self) -> Result<Strtab<'a>> {
        self.section(self.hdr.shstrndx as usize)
            .ok_or_else(|| DebuggerError::Format("no section name string table".to_string()))?
            .as_strtab()
    }
}

/// One section of an [`ElfFile`]
#[derive(Clone, Copy)]
pub struct Section<'f, 'a> {
    file: &'f ElfFile<'a>,
    hdr: &'f Shdr,
    index: usize,
}

impl<'f, 'a> Section<'f, 'a> {
    #[must_use]
    pub fn hdr(&self) -> &Shdr {
        self.hdr
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The section name, resolved through `e_shstrndx`
    pub fn name(&self) -> Result<&'a str> {
        self.file.shstrtab()?.get(u64::from(self.hdr.name))
    }

    /// The raw bytes of the section, or `None` for `SHT_NOBITS`
    pub fn data(&self) -> Result<Option<&'a [u8]>> {
        if self.hdr.typ == SHT_NOBITS {
            return Ok(None);
        }
        let start = self.hdr.offset as usize;
        let end = start + self.hdr.size as usize;
        let data = self.file.data.get(start..end).ok_or_else(|| {
            DebuggerError::Range(format!("section {} exceeds image size", self.index))
        })?;
        Ok(Some(data))
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.hdr.size as usize
    }

    /// Types this section as a string table.
    ///
    /// # Errors
    ///
    /// Fails with a type-mismatch error unless the section is
    /// `SHT_STRTAB`.
    pub fn as_strtab(&self) -> Result<Strtab<'a>> {
        if self.hdr.typ != SHT_STRTAB {
            return Err(DebuggerError::TypeMismatch(
                "cannot use section as strtab".to_string(),
            ));
        }
        Ok(Strtab {
            data: self.data()?.unwrap_or_default(),
        })
    }

    /// Types this section as a symbol table, wiring up the linked string
    /// table.
    ///
    /// # Errors
    ///
    /// Fails with a type-mismatch error unless the section is `SHT_SYMTAB`
    /// or `SHT_DYNSYM`.
    pub fn as_symtab(&self) -> Result<Symtab<'a>> {
        if self.hdr.typ != SHT_SYMTAB && self.hdr.typ != SHT_DYNSYM {
            return Err(DebuggerError::TypeMismatch(
                "cannot use section as symtab".to_string(),
            ));
        }
        let strs = self
            .file
            .section(self.hdr.link as usize)
            .ok_or_else(|| DebuggerError::Format("symtab links to no string table".to_string()))?
            .as_strtab()?;
        Ok(Symtab {
            data: self.data()?.unwrap_or_default(),
            class: self.file.hdr.class,
            order: self.file.hdr.data,
            strs,
        })
    }
}

/// A typed view over a `SHT_STRTAB` section
#[derive(Clone, Copy)]
pub struct Strtab<'a> {
    data: &'a [u8],
}

impl<'a> Strtab<'a> {
    /// The NUL-terminated string at `offset`.
    ///
    /// # Errors
    ///
    /// A range error when `offset` lies past the section, a format error
    /// when the string is unterminated or not UTF-8.
    pub fn get(&self, offset: u64) -> Result<&'a str> {
        let start = offset as usize;
        if start >= self.data.len() {
            return Err(DebuggerError::Range(format!(
                "string offset {offset} exceeds section size"
            )));
        }
        let tail = &self.data[start..];
        let len = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| DebuggerError::Format("unterminated string".to_string()))?;
        std::str::from_utf8(&tail[..len])
            .map_err(|_| DebuggerError::Format("string is not valid UTF-8".to_string()))
    }
}

/// A typed view over a `SHT_SYMTAB` or `SHT_DYNSYM` section
#[derive(Clone, Copy)]
pub struct Symtab<'a> {
    data: &'a [u8],
    class: ElfClass,
    order: ByteOrder,
    strs: Strtab<'a>,
}

/// A canonicalized symbol with its string table
#[derive(Clone, Copy)]
pub struct SymHandle<'a> {
    sym: Sym,
    strs: Strtab<'a>,
}

impl<'a> SymHandle<'a> {
    #[must_use]
    pub fn data(&self) -> &Sym {
        &self.sym
    }

    pub fn name(&self) -> Result<&'a str> {
        self.strs.get(u64::from(self.sym.name))
    }
}

impl<'a> Symtab<'a> {
    fn stride(&self) -> usize {
        match self.class {
            ElfClass::Elf32 => 16,
            ElfClass::Elf64 => 24,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() / self.stride()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Result<SymHandle<'a>> {
        let off = index * self.stride();
        let sym = ElfFile::canon_sym(self.data, off, self.class, self.order)?;
        Ok(SymHandle {
            sym,
            strs: self.strs,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<SymHandle<'a>>> + '_ {
        (0..self.len()).map(|i| self.get(i))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Assembles a minimal ELF64 LSB image: the file header, a NULL
    /// section, `.shstrtab`, `.strtab`, and a `.symtab` with one function
    /// symbol.
    fn sample_elf() -> Vec<u8> {
        let mut image = vec![0u8; 64];
        // .shstrtab contents
        let shstrtab = b"\0.shstrtab\0.strtab\0.symtab\0";
        // .strtab contents
        let strtab = b"\0main\0";

        let shstrtab_off = image.len();
        image.extend_from_slice(shstrtab);
        let strtab_off = image.len();
        image.extend_from_slice(strtab);

        // one symbol: name "main" at strtab offset 1, STT_FUNC, value 0x1130
        let symtab_off = image.len();
        let mut sym = Vec::new();
        sym.extend_from_slice(&1u32.to_le_bytes());
        sym.push(0x12); // STB_GLOBAL | STT_FUNC
        sym.push(0);
        sym.extend_from_slice(&1u16.to_le_bytes());
        sym.extend_from_slice(&0x1130u64.to_le_bytes());
        sym.extend_from_slice(&0x20u64.to_le_bytes());
        image.extend_from_slice(&sym);

        // section headers: NULL, .shstrtab, .strtab, .symtab
        let shoff = image.len();
        let shdr = |name: u32, typ: u32, off: usize, size: usize, link: u32| {
            let mut h = Vec::new();
            h.extend_from_slice(&name.to_le_bytes());
            h.extend_from_slice(&typ.to_le_bytes());
            h.extend_from_slice(&0u64.to_le_bytes()); // flags
            h.extend_from_slice(&0u64.to_le_bytes()); // addr
            h.extend_from_slice(&(off as u64).to_le_bytes());
            h.extend_from_slice(&(size as u64).to_le_bytes());
            h.extend_from_slice(&link.to_le_bytes());
            h.extend_from_slice(&0u32.to_le_bytes()); // info
            h.extend_from_slice(&0u64.to_le_bytes()); // addralign
            h.extend_from_slice(&0u64.to_le_bytes()); // entsize
            h
        };
        let mut headers = Vec::new();
        headers.extend(shdr(0, 0, 0, 0, 0));
        headers.extend(shdr(1, SHT_STRTAB, shstrtab_off, shstrtab.len(), 0));
        headers.extend(shdr(11, SHT_STRTAB, strtab_off, strtab.len(), 0));
        headers.extend(shdr(19, SHT_SYMTAB, symtab_off, sym.len(), 2));
        image.extend_from_slice(&headers);

        // now fill in the file header
        image[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        image[4] = 2; // ELFCLASS64
        image[5] = 1; // ELFDATA2LSB
        image[6] = 1; // EV_CURRENT
        image[16..18].copy_from_slice(&ET_DYN.to_le_bytes());
        image[18..20].copy_from_slice(&62u16.to_le_bytes()); // EM_X86_64
        image[20..24].copy_from_slice(&1u32.to_le_bytes());
        image[40..48].copy_from_slice(&(shoff as u64).to_le_bytes());
        image[58..60].copy_from_slice(&64u16.to_le_bytes()); // shentsize
        image[60..62].copy_from_slice(&4u16.to_le_bytes()); // shnum
        image[62..64].copy_from_slice(&1u16.to_le_bytes()); // shstrndx

        image
    }

    #[test]
    fn test_parse_header() {
        let image = sample_elf();
        let elf = ElfFile::parse(&image).unwrap();
        assert_eq!(elf.hdr().class, ElfClass::Elf64);
        assert_eq!(elf.hdr().data, ByteOrder::Lsb);
        assert_eq!(elf.hdr().typ, ET_DYN);
        assert_eq!(elf.section_count(), 4);
    }

    #[test]
    fn test_bad_magic() {
        let mut image = sample_elf();
        image[0] = 0x7e;
        assert!(matches!(
            ElfFile::parse(&image),
            Err(DebuggerError::Format(_))
        ));
    }

    #[test]
    fn test_bad_class_and_order() {
        let mut image = sample_elf();
        image[4] = 9;
        assert!(ElfFile::parse(&image).is_err());

        let mut image = sample_elf();
        image[5] = 9;
        assert!(ElfFile::parse(&image).is_err());
    }

    #[test]
    fn test_section_names() {
        let image = sample_elf();
        let elf = ElfFile::parse(&image).unwrap();
        assert_eq!(elf.section(1).unwrap().name().unwrap(), ".shstrtab");
        assert_eq!(elf.section(3).unwrap().name().unwrap(), ".symtab");
        assert!(elf.section_by_name(".strtab").unwrap().is_some());
        assert!(elf.section_by_name(".nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_strtab_errors() {
        let image = sample_elf();
        let elf = ElfFile::parse(&image).unwrap();
        let strs = elf
            .section_by_name(".strtab")
            .unwrap()
            .unwrap()
            .as_strtab()
            .unwrap();

        assert_eq!(strs.get(1).unwrap(), "main");
        assert!(matches!(strs.get(9999), Err(DebuggerError::Range(_))));
    }

    #[test]
    fn test_strtab_type_mismatch() {
        let image = sample_elf();
        let elf = ElfFile::parse(&image).unwrap();
        let symtab_sec = elf.section_by_name(".symtab").unwrap().unwrap();
        assert!(matches!(
            symtab_sec.as_strtab(),
            Err(DebuggerError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_symtab() {
        let image = sample_elf();
        let elf = ElfFile::parse(&image).unwrap();
        let symtab = elf
            .section_by_name(".symtab")
            .unwrap()
            .unwrap()
            .as_symtab()
            .unwrap();

        assert_eq!(symtab.len(), 1);
        let sym = symtab.get(0).unwrap();
        assert_eq!(sym.name().unwrap(), "main");
        assert_eq!(sym.data().kind(), SymbolKind::Func);
        assert_eq!(sym.data().value, 0x1130);
    }
}
