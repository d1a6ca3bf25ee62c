//! Linter for descriptor tables: flags definitions that would fail or misbehave
//! at decode time.
//!
//! ## Rules
//!
//! - **Width range**: numeric, code and flag elements need a width in `1..=32`.
//! - **Text width**: text element widths must be a whole number of bytes.
//! - **Empty sequence**: a sequence must have at least one child.
//! - **Unresolved child**: every element or sequence child must be defined in the
//!   table or in its base table (operators and replications are not looked up).
//! - **Sequence cycle**: a sequence must not contain itself, directly or through
//!   other sequences.
//!
//! Run the linter via the `lint_table` binary: `cargo run --bin lint_table -- tables/local.txt`.
//! Exit code 1 if any error-level findings.

use crate::descriptor::{Descriptor, DescriptorClass};
use crate::table::{TableData, Unit};
use std::collections::HashSet;

/// Severity of a lint finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Identifies which rule produced the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LintRule {
    WidthRange,
    TextWidth,
    EmptySequence,
    UnresolvedChild,
    SequenceCycle,
}

impl LintRule {
    pub fn id(self) -> &'static str {
        match self {
            LintRule::WidthRange => "width-range",
            LintRule::TextWidth => "text-width",
            LintRule::EmptySequence => "empty-sequence",
            LintRule::UnresolvedChild => "unresolved-child",
            LintRule::SequenceCycle => "sequence-cycle",
        }
    }
}

/// A single lint finding, located by descriptor.
#[derive(Debug, Clone)]
pub struct LintMessage {
    pub descriptor: Descriptor,
    pub rule: LintRule,
    pub severity: Severity,
    pub message: String,
}

/// Run all rules on a table. `base` is the master table a local table overlays.
/// Findings are in descriptor order, elements first.
pub fn lint(table: &TableData, base: Option<&TableData>) -> Vec<LintMessage> {
    let mut out = Vec::new();

    for (d, rule) in table.elements() {
        match rule.unit {
            Unit::Text => {
                if rule.width == 0 || rule.width % 8 != 0 {
                    out.push(LintMessage {
                        descriptor: d,
                        rule: LintRule::TextWidth,
                        severity: Severity::Error,
                        message: format!("text width {} is not a positive multiple of 8", rule.width),
                    });
                }
            }
            _ => {
                if rule.width == 0 || rule.width > 32 {
                    out.push(LintMessage {
                        descriptor: d,
                        rule: LintRule::WidthRange,
                        severity: Severity::Error,
                        message: format!("width {} outside 1..=32", rule.width),
                    });
                }
            }
        }
    }

    let resolves = |d: Descriptor| table.get(d).is_some() || base.is_some_and(|b| b.get(d).is_some());

    for (d, seq) in table.sequences() {
        if seq.children.is_empty() {
            out.push(LintMessage {
                descriptor: d,
                rule: LintRule::EmptySequence,
                severity: Severity::Warning,
                message: "sequence has no children".to_string(),
            });
        }
        for &child in &seq.children {
            let looked_up = matches!(child.class(), DescriptorClass::Element | DescriptorClass::Sequence);
            if looked_up && !resolves(child) {
                out.push(LintMessage {
                    descriptor: d,
                    rule: LintRule::UnresolvedChild,
                    severity: Severity::Error,
                    message: format!("child {} is not defined", child),
                });
            }
        }
        if reaches(table, base, d, d, &mut HashSet::new()) {
            out.push(LintMessage {
                descriptor: d,
                rule: LintRule::SequenceCycle,
                severity: Severity::Error,
                message: "sequence contains itself".to_string(),
            });
        }
    }
    out
}

/// True if `target` is reachable from the children of sequence `from`.
fn reaches(
    table: &TableData,
    base: Option<&TableData>,
    from: Descriptor,
    target: Descriptor,
    seen: &mut HashSet<Descriptor>,
) -> bool {
    if !seen.insert(from) {
        return false;
    }
    let Some(seq) = table.sequence(from).or_else(|| base.and_then(|b| b.sequence(from))) else {
        return false;
    };
    seq.children
        .iter()
        .filter(|c| c.class() == DescriptorClass::Sequence)
        .any(|&c| c == target || reaches(table, base, c, target, seen))
}

/// True if any finding is an error.
pub fn has_errors(messages: &[LintMessage]) -> bool {
    messages.iter().any(|m| m.severity == Severity::Error)
}
