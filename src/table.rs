//! Descriptor tables: element rules (table B) and sequence expansions (table D),
//! a base/local overlay, and per-message table selection.

use crate::codec::BufrError;
use crate::descriptor::{Descriptor, DescriptorClass};
use crate::message::IdentificationSection;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// How an element's bits are interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unit {
    /// Physical quantity; the string is the unit name (e.g. `K`, `m s-1`).
    Numeric(String),
    CodeTable,
    FlagTable,
    /// CCITT IA5 characters, width/8 bytes.
    Text,
    /// Marks an associated field significance element.
    AssociatedField,
}

impl Unit {
    /// Map a table unit string to a unit kind (case-insensitive).
    pub fn from_table_unit(unit: &str) -> Unit {
        let u = unit.trim().to_ascii_lowercase().replace('-', " ");
        match u.as_str() {
            "ccitt ia5" | "ccitt_ia5" | "character" => Unit::Text,
            "code table" | "code" => Unit::CodeTable,
            "flag table" | "flag" => Unit::FlagTable,
            "associated field" => Unit::AssociatedField,
            _ => Unit::Numeric(unit.trim().to_string()),
        }
    }

    /// Code/flag tables, text and associated-field markers are not affected by
    /// width and scale operators.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Unit::Numeric(_))
    }

    pub fn name(&self) -> &str {
        match self {
            Unit::Numeric(u) => u,
            Unit::CodeTable => "Code table",
            Unit::FlagTable => "Flag table",
            Unit::Text => "CCITT IA5",
            Unit::AssociatedField => "Associated field",
        }
    }
}

/// Decoding rule for an element descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementRule {
    pub name: String,
    pub unit: Unit,
    /// Bit width of the field.
    pub width: u32,
    /// Power-of-ten divisor.
    pub scale: i32,
    /// Signed bias subtracted after unscaling.
    pub reference: i64,
}

impl ElementRule {
    pub fn numeric(name: &str, unit: &str, width: u32, scale: i32, reference: i64) -> Self {
        ElementRule {
            name: name.to_string(),
            unit: Unit::Numeric(unit.to_string()),
            width,
            scale,
            reference,
        }
    }

    pub fn with_unit(name: &str, unit: Unit, width: u32) -> Self {
        ElementRule { name: name.to_string(), unit, width, scale: 0, reference: 0 }
    }
}

/// Ordered child list of a sequence descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceDef {
    pub name: String,
    pub children: Vec<Descriptor>,
}

/// Result of a table lookup.
#[derive(Debug, Clone, Copy)]
pub enum TableEntry<'a> {
    Element(&'a ElementRule),
    Sequence(&'a SequenceDef),
}

/// Identity of a table: the WMO master table or a center's local table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Master { version: u8 },
    Local { center: u16, version: u8 },
}

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("Parse: {0}")]
    Parse(String),
    #[error("Duplicate descriptor {0}")]
    Duplicate(Descriptor),
    #[error("Descriptor {0} has the wrong class for a {1} definition")]
    WrongClass(Descriptor, &'static str),
}

/// One loaded table (base or local).
#[derive(Debug, Clone)]
pub struct TableData {
    pub kind: TableKind,
    elements: HashMap<Descriptor, ElementRule>,
    sequences: HashMap<Descriptor, SequenceDef>,
}

impl TableData {
    pub fn new(kind: TableKind) -> Self {
        TableData { kind, elements: HashMap::new(), sequences: HashMap::new() }
    }

    pub fn insert_element(&mut self, d: Descriptor, rule: ElementRule) -> Result<(), TableError> {
        if d.class() != DescriptorClass::Element {
            return Err(TableError::WrongClass(d, "element"));
        }
        if self.elements.contains_key(&d) {
            return Err(TableError::Duplicate(d));
        }
        self.elements.insert(d, rule);
        Ok(())
    }

    pub fn insert_sequence(
        &mut self,
        d: Descriptor,
        name: &str,
        children: Vec<Descriptor>,
    ) -> Result<(), TableError> {
        if d.class() != DescriptorClass::Sequence {
            return Err(TableError::WrongClass(d, "sequence"));
        }
        if self.sequences.contains_key(&d) {
            return Err(TableError::Duplicate(d));
        }
        self.sequences.insert(d, SequenceDef { name: name.to_string(), children });
        Ok(())
    }

    pub fn element(&self, d: Descriptor) -> Option<&ElementRule> {
        self.elements.get(&d)
    }

    pub fn sequence(&self, d: Descriptor) -> Option<&SequenceDef> {
        self.sequences.get(&d)
    }

    pub fn get(&self, d: Descriptor) -> Option<TableEntry<'_>> {
        match d.class() {
            DescriptorClass::Element => self.element(d).map(TableEntry::Element),
            DescriptorClass::Sequence => self.sequence(d).map(TableEntry::Sequence),
            _ => None,
        }
    }

    /// Elements sorted by descriptor.
    pub fn elements(&self) -> Vec<(Descriptor, &ElementRule)> {
        let mut v: Vec<_> = self.elements.iter().map(|(d, r)| (*d, r)).collect();
        v.sort_by_key(|(d, _)| *d);
        v
    }

    /// Sequences sorted by descriptor.
    pub fn sequences(&self) -> Vec<(Descriptor, &SequenceDef)> {
        let mut v: Vec<_> = self.sequences.iter().map(|(d, s)| (*d, s)).collect();
        v.sort_by_key(|(d, _)| *d);
        v
    }

    pub fn len(&self) -> usize {
        self.elements.len() + self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The lookup capability consumed by tree expansion.
pub trait Lookup {
    fn lookup(&self, d: Descriptor) -> Result<TableEntry<'_>, BufrError>;
}

impl Lookup for TableData {
    fn lookup(&self, d: Descriptor) -> Result<TableEntry<'_>, BufrError> {
        self.get(d).ok_or(BufrError::UnknownDescriptor(d))
    }
}

/// Key identifying a (base, overlay) combination, used to memoize trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableKey {
    pub base: TableKind,
    pub local: Option<TableKind>,
}

/// Base table plus optional local overlay. Local entries win.
#[derive(Debug, Clone)]
pub struct DescriptorTable {
    base: Arc<TableData>,
    local: Option<Arc<TableData>>,
}

impl DescriptorTable {
    pub fn new(base: Arc<TableData>) -> Self {
        DescriptorTable { base, local: None }
    }

    pub fn with_local(base: Arc<TableData>, local: Arc<TableData>) -> Self {
        DescriptorTable { base, local: Some(local) }
    }

    pub fn key(&self) -> TableKey {
        TableKey {
            base: self.base.kind,
            local: self.local.as_ref().map(|l| l.kind),
        }
    }

    pub fn base(&self) -> &TableData {
        &self.base
    }

    pub fn local(&self) -> Option<&TableData> {
        self.local.as_deref()
    }

    pub fn element(&self, d: Descriptor) -> Option<&ElementRule> {
        self.local
            .as_ref()
            .and_then(|l| l.element(d))
            .or_else(|| self.base.element(d))
    }
}

impl Lookup for DescriptorTable {
    fn lookup(&self, d: Descriptor) -> Result<TableEntry<'_>, BufrError> {
        self.local
            .as_ref()
            .and_then(|l| l.get(d))
            .or_else(|| self.base.get(d))
            .ok_or(BufrError::UnknownDescriptor(d))
    }
}

/// Registry of loaded tables, shared immutably across decodes.
#[derive(Debug, Clone, Default)]
pub struct TableSet {
    masters: BTreeMap<u8, Arc<TableData>>,
    locals: HashMap<(u16, u8), Arc<TableData>>,
}

impl TableSet {
    pub fn new() -> Self {
        TableSet::default()
    }

    /// Register a table; a later table with the same identity replaces the earlier one.
    pub fn add(&mut self, table: TableData) {
        let table = Arc::new(table);
        match table.kind {
            TableKind::Master { version } => {
                self.masters.insert(version, table);
            }
            TableKind::Local { center, version } => {
                self.locals.insert((center, version), table);
            }
        }
    }

    pub fn with(mut self, table: TableData) -> Self {
        self.add(table);
        self
    }

    /// Choose the tables for one message from its identification section.
    ///
    /// Exact master version if registered, else the newest registered master.
    /// The local overlay is used only when the message declares a local version.
    pub fn select(&self, ident: &IdentificationSection) -> Result<DescriptorTable, BufrError> {
        let base = match self.masters.get(&ident.master_table_version) {
            Some(t) => t.clone(),
            None => {
                let (v, t) = self.masters.iter().next_back().ok_or_else(|| {
                    BufrError::NoTable(format!(
                        "no master table registered (message wants version {})",
                        ident.master_table_version
                    ))
                })?;
                log::debug!(
                    "master table version {} not registered, using version {}",
                    ident.master_table_version,
                    v
                );
                t.clone()
            }
        };
        let local = if ident.local_table_version > 0 {
            let found = self.locals.get(&(ident.center, ident.local_table_version)).cloned();
            if found.is_none() {
                log::debug!(
                    "no local table for center {} version {}",
                    ident.center,
                    ident.local_table_version
                );
            }
            found
        } else {
            None
        };
        Ok(DescriptorTable { base, local })
    }
}
