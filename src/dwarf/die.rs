//! # Debugging Information Entries
//!
//! A DIE is decoded from its abbreviation: the abbreviation code is read,
//! the matching entry looked up, and for each attribute spec the byte
//! offset of the value is recorded while the form is skipped. Values decode
//! lazily from those offsets.
//!
//! A DIE with abbreviation code 0 is the null terminator ending a sibling
//! list; it is represented as an invalid DIE that still knows its `next`
//! offset.

use crate::dwarf::abbrev::AbbrevEntry;
use crate::dwarf::consts::{DwAt, DwTag, DW_AT_abstract_origin, DW_AT_sibling, DW_AT_specification};
use crate::dwarf::cursor::Cursor;
use crate::dwarf::value::Value;
use crate::dwarf::DwarfInfo;
use crate::errors::{DebuggerError, Result};

/// One node of a unit's DIE tree
#[derive(Clone)]
pub struct Die<'d, 'a> {
    pub(crate) dwarf: &'d DwarfInfo<'a>,
    pub(crate) unit: usize,
    pub tag: DwTag,
    abbrev: Option<&'d AbbrevEntry>,
    offset: usize,
    next: usize,
    attrs: Vec<usize>,
}

impl<'d, 'a> Die<'d, 'a> {
    /// Decodes the DIE at the unit-relative offset `off`.
    pub(crate) fn read(dwarf: &'d DwarfInfo<'a>, unit: usize, off: usize) -> Result<Self> {
        let u = dwarf.unit(unit);
        let mut cur = Cursor::new(u.data(), off);

        let code = cur.uleb128()?;
        if code == 0 {
            // null terminator of a sibling list
            return Ok(Die {
                dwarf,
                unit,
                tag: DwTag(0),
                abbrev: None,
                offset: off,
                next: cur.section_offset(),
                attrs: Vec::new(),
            });
        }

        let abbrev = u.get_abbrev(code)?;
        let mut attrs = Vec::with_capacity(abbrev.attributes.len());
        for spec in &abbrev.attributes {
            attrs.push(cur.section_offset());
            cur.skip_form(spec.form)?;
        }

        Ok(Die {
            dwarf,
            unit,
            tag: abbrev.tag,
            abbrev: Some(abbrev),
            offset: off,
            next: cur.section_offset(),
            attrs,
        })
    }

    /// Whether this DIE is a real entry (false for the null terminator)
    #[must_use]
    pub fn valid(&self) -> bool {
        self.abbrev.is_some()
    }

    /// Offset of this DIE within its unit
    #[must_use]
    pub fn unit_offset(&self) -> usize {
        self.offset
    }

    /// Offset of this DIE within `.debug_info` / `.debug_types`
    #[must_use]
    pub fn section_offset(&self) -> usize {
        self.dwarf.unit(self.unit).section_offset() + self.offset
    }

    /// Whether the DIE carries the attribute
    #[must_use]
    pub fn has(&self, name: DwAt) -> bool {
        self.abbrev
            .is_some_and(|a| a.attributes.iter().any(|spec| spec.name == name))
    }

    /// The value of an attribute.
    ///
    /// # Errors
    ///
    /// A not-found error when the DIE does not carry the attribute.
    pub fn attr(&self, name: DwAt) -> Result<Value<'d, 'a>> {
        if let Some(abbrev) = self.abbrev {
            for (i, spec) in abbrev.attributes.iter().enumerate() {
                if spec.name == name {
                    return Value::new(
                        self.dwarf,
                        self.unit,
                        name,
                        spec.form,
                        spec.typ,
                        self.attrs[i],
                    );
                }
            }
        }
        Err(DebuggerError::NotFound(format!(
            "DIE does not have attribute {name}"
        )))
    }

    /// Like [`Die::attr`], but also searches the DIEs referenced through
    /// `DW_AT_abstract_origin` and `DW_AT_specification`.
    ///
    /// A declaration DIE can be completed by a later definition, and a
    /// concrete inline instance names its out-of-line abstract through
    /// `abstract_origin`; both inherit the referenced DIE's attributes.
    pub fn resolve(&self, name: DwAt) -> Result<Option<Value<'d, 'a>>> {
        if self.has(name) {
            return Ok(Some(self.attr(name)?));
        }

        if self.has(DW_AT_abstract_origin) {
            let ao = self.attr(DW_AT_abstract_origin)?.as_reference()?;
            if ao.has(name) {
                return Ok(Some(ao.attr(name)?));
            }
            if ao.has(DW_AT_specification) {
                let spec = ao.attr(DW_AT_specification)?.as_reference()?;
                if spec.has(name) {
                    return Ok(Some(spec.attr(name)?));
                }
            }
        } else if self.has(DW_AT_specification) {
            let spec = self.attr(DW_AT_specification)?.as_reference()?;
            if spec.has(name) {
                return Ok(Some(spec.attr(name)?));
            }
        }

        Ok(None)
    }

    /// All attributes of this DIE as `(name, value)` pairs
    pub fn attributes(&self) -> Result<Vec<(DwAt, Value<'d, 'a>)>> {
        let Some(abbrev) = self.abbrev else {
            return Ok(Vec::new());
        };
        let mut res = Vec::with_capacity(abbrev.attributes.len());
        for (i, spec) in abbrev.attributes.iter().enumerate() {
            res.push((
                spec.name,
                Value::new(
                    self.dwarf,
                    self.unit,
                    spec.name,
                    spec.form,
                    spec.typ,
                    self.attrs[i],
                )?,
            ));
        }
        Ok(res)
    }

    /// Iterates the direct children of this DIE.
    #[must_use]
    pub fn children(&self) -> DieChildren<'d, 'a> {
        let next = match self.abbrev {
            Some(a) if a.children => Some(self.next),
            _ => None,
        };
        DieChildren {
            dwarf: self.dwarf,
            unit: self.unit,
            next,
        }
    }

    /// Whether the section offset falls within this DIE's own byte span or
    /// any descendant's.
    pub fn contains_section_offset(&self, off: usize) -> Result<bool> {
        let base = self.dwarf.unit(self.unit).section_offset();
        if (base + self.offset..base + self.next).contains(&off) {
            return Ok(true);
        }

        let mut children = self.children();
        while let Some(child) = children.next()? {
            if child.contains_section_offset(off)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Unit-relative offset one past this DIE and its whole subtree.
    fn subtree_end(&self) -> Result<usize> {
        let Some(abbrev) = self.abbrev else {
            return Ok(self.next);
        };
        if !abbrev.children {
            return Ok(self.next);
        }
        if self.has(DW_AT_sibling) {
            return Ok(self.attr(DW_AT_sibling)?.as_reference()?.unit_offset());
        }
        // walk the children until their null terminator and continue there
        let mut off = self.next;
        loop {
            let d = Die::read(self.dwarf, self.unit, off)?;
            if !d.valid() {
                return Ok(d.next);
            }
            off = d.subtree_end()?;
        }
    }
}

impl std::fmt::Debug for Die<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Die")
            .field("tag", &self.tag)
            .field("unit", &self.unit)
            .field("offset", &self.offset)
            .field("next", &self.next)
            .field("valid", &self.valid())
            .finish()
    }
}

/// Iterator over a sibling list, advancing by the three DWARF rules: a DIE
/// without children is followed at `next`, a DIE with a `DW_AT_sibling`
/// attribute is followed through the reference, and otherwise the subtree
/// is walked to its null terminator.
pub struct DieChildren<'d, 'a> {
    dwarf: &'d DwarfInfo<'a>,
    unit: usize,
    next: Option<usize>,
}

impl<'d, 'a> DieChildren<'d, 'a> {
    /// The next sibling, or `None` at the null terminator.
    pub fn next(&mut self) -> Result<Option<Die<'d, 'a>>> {
        let Some(off) = self.next else {
            return Ok(None);
        };
        let die = Die::read(self.dwarf, self.unit, off)?;
        if !die.valid() {
            self.next = None;
            return Ok(None);
        }
        self.next = Some(die.subtree_end()?);
        Ok(Some(die))
    }
}

#[cfg(test)]
mod test {
    use crate::dwarf::consts::*;
    use crate::dwarf::testutil::sample_dwarf;
    use crate::dwarf::value::ValueType;

    #[test]
    fn test_root_die() {
        let (info, abbrev, strs) = sample_dwarf();
        let dwarf = crate::dwarf::testutil::load(&info, &abbrev, &strs);

        let root = dwarf.root_die(0).unwrap();
        assert!(root.valid());
        assert_eq!(root.tag, DW_TAG_compile_unit);
        assert_eq!(root.attr(DW_AT_name).unwrap().as_string().unwrap(), "a.c");
        assert_eq!(
            root.attr(DW_AT_low_pc).unwrap().as_address().unwrap(),
            0x1000
        );
    }

    #[test]
    fn test_children_walk() {
        let (info, abbrev, strs) = sample_dwarf();
        let dwarf = crate::dwarf::testutil::load(&info, &abbrev, &strs);

        let root = dwarf.root_die(0).unwrap();
        let mut children = root.children();

        let main = children.next().unwrap().unwrap();
        assert_eq!(main.tag, DW_TAG_subprogram);
        assert_eq!(main.attr(DW_AT_name).unwrap().as_string().unwrap(), "main");

        let aux = children.next().unwrap().unwrap();
        assert_eq!(aux.tag, DW_TAG_subprogram);
        assert_eq!(aux.attr(DW_AT_name).unwrap().as_string().unwrap(), "aux");

        let inl = children.next().unwrap().unwrap();
        assert_eq!(inl.tag, DW_TAG_inlined_subroutine);

        assert!(children.next().unwrap().is_none());

        // main has one variable child
        let mut vars = main.children();
        let x = vars.next().unwrap().unwrap();
        assert_eq!(x.tag, DW_TAG_variable);
        assert_eq!(x.attr(DW_AT_name).unwrap().as_string().unwrap(), "x");
        assert_eq!(x.attr(DW_AT_location).unwrap().value_type(), ValueType::Exprloc);
        assert!(vars.next().unwrap().is_none());
    }

    #[test]
    fn test_missing_attribute() {
        let (info, abbrev, strs) = sample_dwarf();
        let dwarf = crate::dwarf::testutil::load(&info, &abbrev, &strs);

        let root = dwarf.root_die(0).unwrap();
        assert!(!root.has(DW_AT_frame_base));
        assert!(root.attr(DW_AT_frame_base).is_err());
        assert!(root.resolve(DW_AT_frame_base).unwrap().is_none());
    }

    #[test]
    fn test_contains_section_offset() {
        let (info, abbrev, strs) = sample_dwarf();
        let dwarf = crate::dwarf::testutil::load(&info, &abbrev, &strs);

        let root = dwarf.root_die(0).unwrap();
        let mut children = root.children();
        let main = children.next().unwrap().unwrap();
        let mut vars = main.children();
        let x = vars.next().unwrap().unwrap();

        // an offset inside the variable DIE is contained in the variable,
        // its parent function, and the root
        let off = x.section_offset() + 1;
        assert!(x.contains_section_offset(off).unwrap());
        assert!(main.contains_section_offset(off).unwrap());
        assert!(root.contains_section_offset(off).unwrap());

        // a parent contains at least everything a descendant contains
        let aux = children.next().unwrap().unwrap();
        assert!(!aux.contains_section_offset(off).unwrap());
    }
}
