//! Decode the data section of a message against its descriptor tree.
//!
//! Both layouts share one traversal engine. The engine walks the tree in order,
//! applies operators, resolves replication counts and reads each element through
//! the active [`Layout`]:
//!
//! - **Uncompressed**: one value per element; the walk is repeated per subset,
//!   each subset starting where the previous one ended.
//! - **Compressed**: per element a reference value `R0`, a 6-bit increment
//!   width `NBINC` and one `NBINC`-bit increment per subset.
//!
//! What happens to a value is decided by the [`FieldSink`]: the readers collect
//! fields, while the bit counter in [`walk`](crate::walk) uses a sink that never
//! materializes anything, so the engine skips instead of reading.

use crate::bits::BitCursor;
use crate::descriptor::Descriptor;
use crate::message::Message;
use crate::table::{DescriptorTable, TableSet, Unit};
use crate::tree::{DescriptorTree, ElementNode, Node, NodeId, Operator, ReplicationCount};
use crate::value::{Field, Subset, Value};
use crate::walk::{BitCount, BitCounter};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum BufrError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("Out of bits: needed {needed}, {remaining} remaining at bit {position}")]
    OutOfBits { needed: u64, remaining: u64, position: u64 },
    #[error("Unknown descriptor: {0}")]
    UnknownDescriptor(Descriptor),
    #[error("Malformed descriptor tree: {0}")]
    MalformedDescriptorTree(String),
    #[error("Bit count mismatch: counted {counted} bytes, declared {declared}")]
    BitCountMismatch { counted: usize, declared: usize },
    #[error("Scan resync: skipped {skipped} bytes at offset {offset}")]
    ScanResync { offset: usize, skipped: usize },
    #[error("Delayed count {descriptor} differs across subsets: {first} vs {other}")]
    InconsistentDelayedCount { descriptor: Descriptor, first: u64, other: u64 },
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(Descriptor),
    #[error("Invalid header at offset {offset}: {reason}")]
    InvalidHeader { offset: usize, reason: String },
    #[error("No table: {0}")]
    NoTable(String),
    #[error("Field width {0} too large")]
    WidthTooLarge(u32),
}

/// Default traversal budget of a data section.
pub const DEFAULT_MAX_STEPS: u64 = 1 << 24;

/// Limits and checks applied by [`Decoder`].
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Maximum sequence/replication nesting during tree expansion.
    pub max_depth: usize,
    /// Maximum number of tree nodes.
    pub max_nodes: usize,
    /// Maximum node visits and replication iterations per data section.
    pub max_steps: u64,
    /// Log a warning when the consumed bit count disagrees with the declared length.
    pub check_bit_count: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        DecoderConfig { max_depth: 32, max_nodes: 1 << 20, max_steps: DEFAULT_MAX_STEPS, check_bit_count: true }
    }
}

/// Bitstream layout of a data section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Layout {
    Uncompressed,
    Compressed { subsets: usize },
}

/// Receives decoded values. `lane` is the subset index in compressed layout and
/// always 0 in uncompressed layout.
pub(crate) trait FieldSink {
    /// When false the engine skips field bits instead of reading them.
    const MATERIALIZE: bool;
    fn push(&mut self, lane: usize, descriptor: Descriptor, path: &str, value: Value);
}

struct SubsetSink {
    subset: Subset,
}

impl FieldSink for SubsetSink {
    const MATERIALIZE: bool = true;
    fn push(&mut self, _lane: usize, descriptor: Descriptor, path: &str, value: Value) {
        self.subset.fields.push(Field { descriptor, path: path.to_string(), value });
    }
}

struct LaneSink {
    subsets: Vec<Subset>,
}

impl FieldSink for LaneSink {
    const MATERIALIZE: bool = true;
    fn push(&mut self, lane: usize, descriptor: Descriptor, path: &str, value: Value) {
        self.subsets[lane].fields.push(Field { descriptor, path: path.to_string(), value });
    }
}

/// Operator context active at a point of the traversal.
#[derive(Debug, Clone, Default)]
struct OperatorState {
    width_delta: i32,
    scale_delta: i32,
    increase: u8,
    assoc_width: u8,
    char_width: Option<u32>,
    defining_reference: Option<u8>,
    new_references: HashMap<Descriptor, i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Numeric,
    Code,
    Text,
}

/// Width/scale/reference of one element after operators.
#[derive(Debug, Clone, Copy)]
struct Effective {
    kind: Kind,
    width: u32,
    scale: i32,
    reference: i64,
}

impl Effective {
    fn value(&self, raw: u64) -> Value {
        match self.kind {
            Kind::Code => Value::CodeTable(raw as u32),
            _ => {
                let raw = raw as f64;
                let reference = self.reference as f64;
                if self.scale == 0 {
                    Value::number(raw - reference)
                } else {
                    Value::number(raw / 10f64.powi(self.scale) - reference)
                }
            }
        }
    }
}

impl OperatorState {
    fn apply(&mut self, op: Operator) {
        match op {
            Operator::ChangeWidth(d) => self.width_delta = d,
            Operator::ChangeScale(d) => self.scale_delta = d,
            Operator::DefineReference(bits) => self.defining_reference = Some(bits),
            Operator::EndReferenceDefinition => self.defining_reference = None,
            Operator::CancelReference => {
                self.defining_reference = None;
                self.new_references.clear();
            }
            Operator::AssociatedField(bits) => self.assoc_width = bits,
            Operator::IncreaseScaleWidth(y) => self.increase = y,
            Operator::CharacterWidth(y) => self.char_width = (y > 0).then_some(y as u32),
            Operator::InsertCharacters(_) | Operator::Marker => {}
        }
    }

    fn effective(&self, e: &ElementNode) -> Result<Effective, BufrError> {
        let rule = &e.rule;
        let plain = |kind| Effective { kind, width: rule.width, scale: rule.scale, reference: rule.reference };
        match &rule.unit {
            Unit::Text => Ok(Effective {
                kind: Kind::Text,
                width: self.char_width.map(|c| c * 8).unwrap_or(rule.width),
                scale: 0,
                reference: 0,
            }),
            Unit::CodeTable | Unit::FlagTable | Unit::AssociatedField => Ok(plain(Kind::Code)),
            Unit::Numeric(_) if e.fixed_width || e.descriptor.is_class31() => Ok(plain(Kind::Numeric)),
            Unit::Numeric(_) => {
                let inc = self.increase as i64;
                let width = rule.width as i64 + self.width_delta as i64 + (10 * inc + 2) / 3;
                if width <= 0 {
                    return Err(BufrError::MalformedDescriptorTree(format!(
                        "operators reduce width of {} to {}",
                        e.descriptor, width
                    )));
                }
                let width = u32::try_from(width).map_err(|_| BufrError::WidthTooLarge(u32::MAX))?;
                let scale = rule
                    .scale
                    .checked_add(self.scale_delta)
                    .and_then(|s| s.checked_add(self.increase as i32))
                    .ok_or_else(|| {
                        BufrError::MalformedDescriptorTree(format!("operators overflow the scale of {}", e.descriptor))
                    })?;
                Ok(Effective {
                    kind: Kind::Numeric,
                    width,
                    scale,
                    reference: self
                        .new_references
                        .get(&e.descriptor)
                        .copied()
                        .unwrap_or(rule.reference),
                })
            }
        }
    }
}

fn all_ones(v: u64, width: u32) -> bool {
    match width {
        0 => false,
        64.. => v == u64::MAX,
        w => v == (1u64 << w) - 1,
    }
}

fn text_value(bytes: &[u8]) -> Value {
    if !bytes.is_empty() && bytes.iter().all(|&b| b == 0xff) {
        return Value::missing();
    }
    let s: String = bytes.iter().map(|&b| b as char).collect();
    Value::Text(s.trim_end_matches([' ', '\0']).to_string())
}

/// Walks a tree once over a data section.
struct Engine<'t, 'd, 's, S: FieldSink> {
    tree: &'t DescriptorTree,
    cursor: BitCursor<'d>,
    layout: Layout,
    sink: &'s mut S,
    state: OperatorState,
    path: String,
    marks: Vec<usize>,
    raw: Vec<Option<u64>>,
    text: Vec<Vec<u8>>,
    steps_left: u64,
}

/// Run one traversal starting at `start_bit`; returns the bit position where it ended.
/// `steps` is the remaining budget, shared by the traversals of one data section.
pub(crate) fn traverse<S: FieldSink>(
    tree: &DescriptorTree,
    data: &[u8],
    start_bit: u64,
    layout: Layout,
    sink: &mut S,
    steps: &mut u64,
) -> Result<u64, BufrError> {
    let mut engine = Engine {
        tree,
        cursor: BitCursor::at(data, start_bit),
        layout,
        sink,
        state: OperatorState::default(),
        path: String::new(),
        marks: Vec::new(),
        raw: Vec::new(),
        text: Vec::new(),
        steps_left: *steps,
    };
    engine.visit_all(tree.roots())?;
    *steps = engine.steps_left;
    Ok(engine.cursor.bits_consumed())
}

impl<'t, 'd, 's, S: FieldSink> Engine<'t, 'd, 's, S> {
    fn visit_all(&mut self, ids: &'t [NodeId]) -> Result<(), BufrError> {
        for &id in ids {
            self.visit(id)?;
        }
        Ok(())
    }

    fn step(&mut self) -> Result<(), BufrError> {
        if self.steps_left == 0 {
            return Err(BufrError::MalformedDescriptorTree("traversal step budget exhausted".to_string()));
        }
        self.steps_left -= 1;
        Ok(())
    }

    fn visit(&mut self, id: NodeId) -> Result<(), BufrError> {
        self.step()?;
        let tree = self.tree;
        match tree.node(id) {
            Node::Element(e) => self.element(e),
            Node::Sequence { descriptor, children } => {
                let saved = self.state.clone();
                self.enter(|| descriptor.to_string());
                self.visit_all(children)?;
                self.leave();
                self.state = saved;
                Ok(())
            }
            Node::Replication { descriptor, count, children } => {
                let n = match count {
                    ReplicationCount::Fixed(n) => *n,
                    ReplicationCount::Delayed(c) => self.delayed_count(*c)?,
                };
                for i in 0..n {
                    self.step()?;
                    self.enter(|| format!("{}[{}]", descriptor, i));
                    self.visit_all(children)?;
                    self.leave();
                }
                Ok(())
            }
            Node::Operator { descriptor, op } => match op {
                Operator::InsertCharacters(n) => {
                    self.read_text(*n as usize)?;
                    self.emit_text(*descriptor);
                    Ok(())
                }
                _ => {
                    self.state.apply(*op);
                    Ok(())
                }
            },
        }
    }

    fn enter(&mut self, segment: impl FnOnce() -> String) {
        if !S::MATERIALIZE {
            return;
        }
        self.marks.push(self.path.len());
        if !self.path.is_empty() {
            self.path.push('/');
        }
        self.path.push_str(&segment());
    }

    fn leave(&mut self) {
        if let Some(len) = self.marks.pop() {
            self.path.truncate(len);
        }
    }

    fn leaf_path(&self, d: Descriptor, suffix: &str) -> String {
        if self.path.is_empty() {
            format!("{}{}", d, suffix)
        } else {
            format!("{}/{}{}", self.path, d, suffix)
        }
    }

    fn element(&mut self, e: &ElementNode) -> Result<(), BufrError> {
        if let Some(bits) = self.state.defining_reference {
            let raw = self.read_common(bits as u32, e.descriptor)?;
            let sign = 1u64 << (bits - 1);
            let value = if raw & sign != 0 {
                -((raw & (sign - 1)) as i64)
            } else {
                raw as i64
            };
            self.state.new_references.insert(e.descriptor, value);
            return Ok(());
        }

        let eff = self.state.effective(e)?;

        if self.state.assoc_width > 0 && !e.descriptor.is_class31() {
            let assoc = Effective { kind: Kind::Numeric, width: self.state.assoc_width as u32, scale: 0, reference: 0 };
            self.read_numeric(assoc.width, true, false)?;
            self.emit_numeric(e.descriptor, &assoc, ".associated");
        }

        match eff.kind {
            Kind::Text => {
                if eff.width % 8 != 0 {
                    return Err(BufrError::MalformedDescriptorTree(format!(
                        "text element {} is {} bits wide, not whole bytes",
                        e.descriptor, eff.width
                    )));
                }
                self.read_text((eff.width / 8) as usize)?;
                self.emit_text(e.descriptor);
            }
            _ => {
                self.read_numeric(eff.width, !e.descriptor.is_class31(), false)?;
                self.emit_numeric(e.descriptor, &eff, "");
            }
        }
        Ok(())
    }

    fn delayed_count(&mut self, id: NodeId) -> Result<usize, BufrError> {
        let tree = self.tree;
        let Node::Element(e) = tree.node(id) else {
            return Err(BufrError::MalformedDescriptorTree(format!(
                "replication count node {} is not an element",
                id
            )));
        };
        let eff = self.state.effective(e)?;
        let count = self.read_common(eff.width, e.descriptor)?;
        Ok(count as usize)
    }

    /// Read a value that must be the same in every subset (counts, new reference values).
    fn read_common(&mut self, width: u32, d: Descriptor) -> Result<u64, BufrError> {
        self.read_numeric(width, false, true)?;
        let first = self.raw.first().copied().flatten().unwrap_or(0);
        for v in self.raw.iter().skip(1) {
            let other = v.unwrap_or(0);
            if other != first {
                return Err(BufrError::InconsistentDelayedCount { descriptor: d, first, other });
            }
        }
        Ok(first)
    }

    /// Fill `self.raw` with one entry per lane (`None` = missing). Without
    /// materialization (and without `force`) the bits are only skipped.
    fn read_numeric(&mut self, width: u32, missing_allowed: bool, force: bool) -> Result<(), BufrError> {
        self.raw.clear();
        let materialize = S::MATERIALIZE || force;
        match self.layout {
            Layout::Uncompressed => {
                if !materialize {
                    return self.cursor.skip(width as u64);
                }
                let raw = self.cursor.read_u64(width)?;
                self.raw.push(if missing_allowed && all_ones(raw, width) { None } else { Some(raw) });
            }
            Layout::Compressed { subsets } => {
                let r0 = self.cursor.read_u64(width)?;
                let nbinc = self.cursor.read_unsigned(6)?;
                if !materialize {
                    return self.cursor.skip(nbinc as u64 * subsets as u64);
                }
                if nbinc == 0 {
                    let v = if missing_allowed && all_ones(r0, width) { None } else { Some(r0) };
                    self.raw.resize(subsets, v);
                } else {
                    for _ in 0..subsets {
                        let inc = self.cursor.read_u64(nbinc)?;
                        self.raw.push(if missing_allowed && all_ones(inc, nbinc) {
                            None
                        } else {
                            Some(r0.wrapping_add(inc))
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Fill `self.text` with one string per lane. In compressed layout the
    /// increment width counts bytes per subset.
    fn read_text(&mut self, nbytes: usize) -> Result<(), BufrError> {
        self.text.clear();
        match self.layout {
            Layout::Uncompressed => {
                if !S::MATERIALIZE {
                    return self.cursor.skip(nbytes as u64 * 8);
                }
                let bytes = self.cursor.read_bytes(nbytes)?;
                self.text.push(bytes);
            }
            Layout::Compressed { subsets } => {
                if !S::MATERIALIZE {
                    self.cursor.skip(nbytes as u64 * 8)?;
                    let nbinc = self.cursor.read_unsigned(6)? as u64;
                    return self.cursor.skip(nbinc * 8 * subsets as u64);
                }
                let r0 = self.cursor.read_bytes(nbytes)?;
                let nbinc = self.cursor.read_unsigned(6)? as usize;
                if nbinc == 0 {
                    self.text.resize(subsets, r0);
                } else {
                    for _ in 0..subsets {
                        let bytes = self.cursor.read_bytes(nbinc)?;
                        self.text.push(bytes);
                    }
                }
            }
        }
        Ok(())
    }

    fn emit_numeric(&mut self, d: Descriptor, eff: &Effective, suffix: &str) {
        if !S::MATERIALIZE {
            return;
        }
        let path = self.leaf_path(d, suffix);
        for (lane, raw) in self.raw.iter().enumerate() {
            let value = match raw {
                Some(r) => eff.value(*r),
                None => Value::missing(),
            };
            self.sink.push(lane, d, &path, value);
        }
    }

    fn emit_text(&mut self, d: Descriptor) {
        if !S::MATERIALIZE {
            return;
        }
        let path = self.leaf_path(d, "");
        for (lane, bytes) in self.text.iter().enumerate() {
            self.sink.push(lane, d, &path, text_value(bytes));
        }
    }
}

/// Subsets decoded from one data section plus the number of bits consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutcome {
    pub subsets: Vec<Subset>,
    pub bits_consumed: u64,
}

/// Decodes an uncompressed data section: subsets are stored back to back.
#[derive(Debug, Clone)]
pub struct UncompressedArrayReader<'t, 'd> {
    tree: &'t DescriptorTree,
    data: &'d [u8],
    subsets: usize,
    max_steps: u64,
}

impl<'t, 'd> UncompressedArrayReader<'t, 'd> {
    pub fn new(tree: &'t DescriptorTree, data: &'d [u8], subsets: usize) -> Self {
        UncompressedArrayReader { tree, data, subsets, max_steps: DEFAULT_MAX_STEPS }
    }

    /// Budget for all subsets together.
    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Subsets in order. Iteration stops after the first failure, since the
    /// start of the next subset is unknown once one fails.
    pub fn subsets(&self) -> SubsetIter<'t, 'd> {
        SubsetIter {
            tree: self.tree,
            data: self.data,
            count: self.subsets,
            index: 0,
            bit_pos: 0,
            steps_left: self.max_steps,
            failed: false,
        }
    }

    /// Decode every subset, aborting on the first failure.
    pub fn read_all(&self) -> Result<ReadOutcome, BufrError> {
        let mut it = self.subsets();
        let subsets = it.by_ref().collect::<Result<Vec<_>, _>>()?;
        Ok(ReadOutcome { subsets, bits_consumed: it.bits_consumed() })
    }
}

/// Iterator over the subsets of an uncompressed data section.
#[derive(Debug, Clone)]
pub struct SubsetIter<'t, 'd> {
    tree: &'t DescriptorTree,
    data: &'d [u8],
    count: usize,
    index: usize,
    bit_pos: u64,
    steps_left: u64,
    failed: bool,
}

impl SubsetIter<'_, '_> {
    /// Bits consumed by the subsets decoded so far.
    pub fn bits_consumed(&self) -> u64 {
        self.bit_pos
    }
}

impl Iterator for SubsetIter<'_, '_> {
    type Item = Result<Subset, BufrError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.index >= self.count {
            return None;
        }
        let mut sink = SubsetSink { subset: Subset::new(self.index) };
        match traverse(self.tree, self.data, self.bit_pos, Layout::Uncompressed, &mut sink, &mut self.steps_left) {
            Ok(end) => {
                log::trace!("subset {} bits {}..{}", self.index, self.bit_pos, end);
                self.bit_pos = end;
                self.index += 1;
                Some(Ok(sink.subset))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Decodes a compressed data section: one pass, N values per element.
#[derive(Debug, Clone)]
pub struct CompressedArrayReader<'t, 'd> {
    tree: &'t DescriptorTree,
    data: &'d [u8],
    subsets: usize,
    max_steps: u64,
}

impl<'t, 'd> CompressedArrayReader<'t, 'd> {
    pub fn new(tree: &'t DescriptorTree, data: &'d [u8], subsets: usize) -> Self {
        CompressedArrayReader { tree, data, subsets, max_steps: DEFAULT_MAX_STEPS }
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn read_all(&self) -> Result<ReadOutcome, BufrError> {
        let mut sink = LaneSink { subsets: (0..self.subsets).map(Subset::new).collect() };
        let layout = Layout::Compressed { subsets: self.subsets };
        let mut steps = self.max_steps;
        let end = traverse(self.tree, self.data, 0, layout, &mut sink, &mut steps)?;
        Ok(ReadOutcome { subsets: sink.subsets, bits_consumed: end })
    }
}

/// A decoded message: subsets in order plus the length check result.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub subsets: Vec<Subset>,
    pub bits_consumed: u64,
    pub bit_count: BitCount,
}

impl DecodedMessage {
    /// True when the consumed bits disagree with the declared data length.
    pub fn is_suspect(&self) -> bool {
        !self.bit_count.is_ok()
    }

    /// `(subset index, path, value)` triples, subset-major in tree order.
    pub fn fields(&self) -> impl Iterator<Item = (usize, &str, &Value)> + '_ {
        self.subsets
            .iter()
            .flat_map(|s| s.fields.iter().map(move |f| (s.index, f.path.as_str(), &f.value)))
    }
}

/// Decoder bound to a shared table registry.
#[derive(Debug, Clone)]
pub struct Decoder {
    tables: Arc<TableSet>,
    config: DecoderConfig,
}

impl Decoder {
    pub fn new(tables: Arc<TableSet>, config: DecoderConfig) -> Self {
        Decoder { tables, config }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Tables selected for a message from its identification section.
    pub fn tables_for(&self, message: &Message<'_>) -> Result<DescriptorTable, BufrError> {
        self.tables.select(message.identification())
    }

    pub fn tree(&self, message: &Message<'_>) -> Result<Arc<DescriptorTree>, BufrError> {
        let table = self.tables_for(message)?;
        message.tree(&table, &self.config)
    }

    /// Decode all subsets of a message. A failing subset fails the message.
    pub fn decode(&self, message: &Message<'_>) -> Result<DecodedMessage, BufrError> {
        let tree = self.tree(message)?;
        let data = message.data_section();
        let max_steps = self.config.max_steps;
        let outcome = if message.is_compressed() {
            CompressedArrayReader::new(&tree, data, message.subsets()).with_max_steps(max_steps).read_all()?
        } else {
            UncompressedArrayReader::new(&tree, data, message.subsets()).with_max_steps(max_steps).read_all()?
        };
        let bit_count = BitCount::new(outcome.bits_consumed, message.declared_data_length());
        if self.config.check_bit_count {
            if let Err(e) = bit_count.check() {
                log::warn!("message at offset {}: {}", message.offset(), e);
            }
        }
        log::debug!(
            "message at offset {}: {} subsets, {} bits",
            message.offset(),
            outcome.subsets.len(),
            outcome.bits_consumed
        );
        Ok(DecodedMessage {
            subsets: outcome.subsets,
            bits_consumed: outcome.bits_consumed,
            bit_count,
        })
    }

    /// Count the data bits of a message without materializing values.
    pub fn count_bits(&self, message: &Message<'_>) -> Result<BitCount, BufrError> {
        let tree = self.tree(message)?;
        BitCounter::for_message(message, &tree).with_max_steps(self.config.max_steps).count()
    }
}
