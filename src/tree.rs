//! Descriptor tree: the fully resolved expansion of a message's descriptor list.
//!
//! Nodes live in an arena and refer to each other by [`NodeId`]. Sequences are
//! expanded in place, replications own their repeated unit, and operators stay
//! in-line so the readers apply them in traversal order. Delayed replication
//! counts are element nodes owned by their replication; the count itself is
//! only known at decode time.
//!
//! Expansion is bounded: a depth guard turns self-referential sequences into
//! [`BufrError::MalformedDescriptorTree`] and a node budget caps blow-up from
//! deeply nested fixed replications of large sequences.

use crate::codec::{BufrError, DecoderConfig};
use crate::descriptor::{Descriptor, DescriptorClass};
use crate::table::{ElementRule, Lookup, TableEntry};

pub type NodeId = usize;

/// Data-description operators (class 2) kept in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// 2-01-YYY: add Y−128 bits to numeric widths (0 cancels).
    ChangeWidth(i32),
    /// 2-02-YYY: add Y−128 to numeric scales (0 cancels).
    ChangeScale(i32),
    /// 2-03-YYY: following elements define new Y-bit reference values.
    DefineReference(u8),
    /// 2-03-255: end of reference value definitions.
    EndReferenceDefinition,
    /// 2-03-000: revert to table reference values.
    CancelReference,
    /// 2-04-YYY: Y-bit associated field precedes each element (0 cancels).
    AssociatedField(u8),
    /// 2-05-YYY: Y characters inserted in the data section.
    InsertCharacters(u8),
    /// 2-07-YYY: increase scale by Y, width by (10Y+2)/3 (0 cancels).
    IncreaseScaleWidth(u8),
    /// 2-08-YYY: text fields are Y bytes wide (0 cancels).
    CharacterWidth(u8),
    /// Data-present and quality-information markers; no effect on decoding.
    Marker,
}

impl Operator {
    pub fn from_descriptor(d: Descriptor) -> Result<Operator, BufrError> {
        let y = d.y();
        let change = |y: u8| if y == 0 { 0 } else { y as i32 - 128 };
        let op = match d.x() {
            1 => Operator::ChangeWidth(change(y)),
            2 => Operator::ChangeScale(change(y)),
            3 => match y {
                0 => Operator::CancelReference,
                255 => Operator::EndReferenceDefinition,
                n => Operator::DefineReference(n),
            },
            4 => Operator::AssociatedField(y),
            5 => Operator::InsertCharacters(y),
            7 => Operator::IncreaseScaleWidth(y),
            8 => Operator::CharacterWidth(y),
            22 | 23 | 24 | 25 | 32 | 35 | 36 | 37 if y == 0 => Operator::Marker,
            _ => return Err(BufrError::UnsupportedOperator(d)),
        };
        Ok(op)
    }
}

/// Element leaf with its resolved rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementNode {
    pub descriptor: Descriptor,
    pub rule: ElementRule,
    /// Width set by 2-06 (local descriptor); operators do not change it.
    pub fixed_width: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationCount {
    Fixed(usize),
    /// Count read from this (class 31) element node at decode time.
    Delayed(NodeId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(ElementNode),
    Sequence {
        descriptor: Descriptor,
        children: Vec<NodeId>,
    },
    Replication {
        descriptor: Descriptor,
        count: ReplicationCount,
        children: Vec<NodeId>,
    },
    Operator {
        descriptor: Descriptor,
        op: Operator,
    },
}

impl Node {
    pub fn descriptor(&self) -> Descriptor {
        match self {
            Node::Element(e) => e.descriptor,
            Node::Sequence { descriptor, .. }
            | Node::Replication { descriptor, .. }
            | Node::Operator { descriptor, .. } => *descriptor,
        }
    }
}

/// Immutable expanded tree, shared across subsets and threads.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorTree {
    descriptors: Vec<Descriptor>,
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
}

impl DescriptorTree {
    /// Expand a top-level descriptor list against a table.
    pub fn build<L: Lookup + ?Sized>(
        descriptors: &[Descriptor],
        lookup: &L,
        config: &DecoderConfig,
    ) -> Result<Self, BufrError> {
        let mut b = Builder {
            lookup,
            nodes: Vec::new(),
            max_depth: config.max_depth,
            max_nodes: config.max_nodes,
        };
        let roots = b.expand(descriptors, 0)?;
        log::debug!(
            "expanded {} descriptors into {} nodes",
            descriptors.len(),
            b.nodes.len()
        );
        Ok(DescriptorTree {
            descriptors: descriptors.to_vec(),
            nodes: b.nodes,
            roots,
        })
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Pre-order listing of `(depth, node)`; delayed count elements are listed
    /// right before their replication's unit.
    pub fn depth_first(&self) -> Vec<(usize, NodeId)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(usize, NodeId)> = self.roots.iter().rev().map(|&id| (0, id)).collect();
        while let Some((depth, id)) = stack.pop() {
            out.push((depth, id));
            match &self.nodes[id] {
                Node::Sequence { children, .. } => {
                    stack.extend(children.iter().rev().map(|&c| (depth + 1, c)));
                }
                Node::Replication { children, count, .. } => {
                    stack.extend(children.iter().rev().map(|&c| (depth + 1, c)));
                    if let ReplicationCount::Delayed(c) = count {
                        stack.push((depth + 1, *c));
                    }
                }
                _ => {}
            }
        }
        out
    }
}

struct Builder<'l, L: ?Sized> {
    lookup: &'l L,
    nodes: Vec<Node>,
    max_depth: usize,
    max_nodes: usize,
}

impl<'l, L: Lookup + ?Sized> Builder<'l, L> {
    fn push(&mut self, node: Node) -> Result<NodeId, BufrError> {
        if self.nodes.len() >= self.max_nodes {
            return Err(BufrError::MalformedDescriptorTree(format!(
                "expansion exceeds {} nodes",
                self.max_nodes
            )));
        }
        self.nodes.push(node);
        Ok(self.nodes.len() - 1)
    }

    fn expand(&mut self, list: &[Descriptor], depth: usize) -> Result<Vec<NodeId>, BufrError> {
        if depth > self.max_depth {
            return Err(BufrError::MalformedDescriptorTree(format!(
                "expansion depth exceeds {} (self-referential sequence?)",
                self.max_depth
            )));
        }
        let lookup = self.lookup;
        let mut out = Vec::with_capacity(list.len());
        let mut local_width: Option<u8> = None;
        let mut i = 0;
        while i < list.len() {
            let d = list[i];
            match d.class() {
                DescriptorClass::Element => {
                    out.push(self.element(d, local_width.take())?);
                    i += 1;
                }
                DescriptorClass::Replication => {
                    if local_width.is_some() {
                        return Err(local_width_error(d));
                    }
                    let unit_len = d.x() as usize;
                    if unit_len == 0 {
                        return Err(BufrError::MalformedDescriptorTree(format!(
                            "replication {} has an empty unit",
                            d
                        )));
                    }
                    let mut start = i + 1;
                    let count = if d.y() == 0 {
                        let cd = *list.get(start).ok_or_else(|| {
                            BufrError::MalformedDescriptorTree(format!(
                                "delayed replication {} has no count descriptor",
                                d
                            ))
                        })?;
                        if !cd.is_class31() {
                            return Err(BufrError::MalformedDescriptorTree(format!(
                                "delayed replication {} followed by {} instead of a class 31 count",
                                d, cd
                            )));
                        }
                        start += 1;
                        ReplicationCount::Delayed(self.element(cd, None)?)
                    } else {
                        ReplicationCount::Fixed(d.y() as usize)
                    };
                    let end = start + unit_len;
                    if end > list.len() {
                        return Err(BufrError::MalformedDescriptorTree(format!(
                            "replication {} needs {} descriptors, {} remain",
                            d,
                            unit_len,
                            list.len() - start
                        )));
                    }
                    let children = self.expand(&list[start..end], depth + 1)?;
                    out.push(self.push(Node::Replication { descriptor: d, count, children })?);
                    i = end;
                }
                DescriptorClass::Operator => {
                    if d.x() == 6 {
                        local_width = Some(d.y());
                    } else {
                        let op = Operator::from_descriptor(d)?;
                        out.push(self.push(Node::Operator { descriptor: d, op })?);
                    }
                    i += 1;
                }
                DescriptorClass::Sequence => {
                    if local_width.is_some() {
                        return Err(local_width_error(d));
                    }
                    let def = match lookup.lookup(d)? {
                        TableEntry::Sequence(def) => def,
                        TableEntry::Element(_) => return Err(BufrError::UnknownDescriptor(d)),
                    };
                    let children = self.expand(&def.children, depth + 1)?;
                    out.push(self.push(Node::Sequence { descriptor: d, children })?);
                    i += 1;
                }
            }
        }
        if local_width.is_some() {
            return Err(BufrError::MalformedDescriptorTree(
                "2-06 operator not followed by an element".to_string(),
            ));
        }
        Ok(out)
    }

    fn element(&mut self, d: Descriptor, local_width: Option<u8>) -> Result<NodeId, BufrError> {
        let found = match self.lookup.lookup(d) {
            Ok(TableEntry::Element(rule)) => Some(rule.clone()),
            Ok(TableEntry::Sequence(_)) => return Err(BufrError::UnknownDescriptor(d)),
            Err(e) if local_width.is_none() => return Err(e),
            Err(_) => None,
        };
        let node = match (found, local_width) {
            (Some(rule), None) => ElementNode { descriptor: d, rule, fixed_width: false },
            (Some(rule), Some(w)) => ElementNode {
                descriptor: d,
                rule: ElementRule { width: w as u32, ..rule },
                fixed_width: true,
            },
            (None, w) => ElementNode {
                descriptor: d,
                rule: ElementRule::numeric("LOCAL DESCRIPTOR", "", w.unwrap_or(0) as u32, 0, 0),
                fixed_width: true,
            },
        };
        self.push(Node::Element(node))
    }
}

fn local_width_error(d: Descriptor) -> BufrError {
    BufrError::MalformedDescriptorTree(format!("2-06 operator followed by {} instead of an element", d))
}
