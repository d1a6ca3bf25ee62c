//! Format decoded values for display (dump text, tree view). Uses the element
//! rules for names and units.

use crate::codec::DecodedMessage;
use crate::message::Message;
use crate::table::{DescriptorTable, ElementRule, Unit};
use crate::tree::{DescriptorTree, Node, ReplicationCount};
use crate::value::{Field, Value};
use std::io::{self, Write};

/// Format a value with its unit when the rule is known.
pub fn format_value(v: &Value, rule: Option<&ElementRule>) -> String {
    match (v, rule.map(|r| &r.unit)) {
        (Value::Numeric { missing: true, .. }, _) => "MISSING".to_string(),
        (Value::Numeric { value, .. }, Some(Unit::Numeric(unit))) if !unit.is_empty() => {
            format!("{} {}", value, unit)
        }
        (Value::CodeTable(c), Some(Unit::FlagTable)) => {
            let width = rule.map(|r| r.width as usize).unwrap_or(0).min(32);
            format!("flags {:0width$b}", c, width = width)
        }
        _ => v.to_string(),
    }
}

/// One dump line: indented by path depth, `descriptor NAME: value`.
pub fn format_field(field: &Field, table: &DescriptorTable) -> String {
    let depth = field.path.matches('/').count();
    let rule = table.element(field.descriptor);
    let name = match rule {
        Some(r) => r.name.as_str(),
        None if field.descriptor.f() == 2 => "CHARACTERS",
        None => "?",
    };
    let label = if field.path.ends_with(".associated") {
        format!("{} (associated)", name)
    } else {
        name.to_string()
    };
    let value = if field.path.ends_with(".associated") {
        format_value(&field.value, None)
    } else {
        format_value(&field.value, rule)
    };
    format!("{}{} {}: {}", "  ".repeat(depth + 1), field.descriptor, label, value)
}

/// Header summary plus every field of every subset.
pub fn dump_message<W: Write>(
    out: &mut W,
    message: &Message<'_>,
    decoded: &DecodedMessage,
    table: &DescriptorTable,
) -> io::Result<()> {
    let ident = message.identification();
    let t = &ident.reference_time;
    writeln!(
        out,
        "message @{} edition {} center {} category {} tables {}/{} time {:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
        message.offset(),
        message.edition(),
        ident.center,
        ident.category,
        ident.master_table_version,
        ident.local_table_version,
        t.year,
        t.month,
        t.day,
        t.hour,
        t.minute,
        t.second
    )?;
    writeln!(
        out,
        "  {} subsets ({}), {} bits, {} bytes counted / {} declared{}",
        decoded.subsets.len(),
        if message.is_compressed() { "compressed" } else { "uncompressed" },
        decoded.bits_consumed,
        decoded.bit_count.counted_bytes(),
        decoded.bit_count.declared_bytes,
        if decoded.is_suspect() { " SUSPECT" } else { "" }
    )?;
    for subset in &decoded.subsets {
        writeln!(out, "  subset {}", subset.index)?;
        for field in &subset.fields {
            writeln!(out, "  {}", format_field(field, table))?;
        }
    }
    Ok(())
}

/// Indented listing of an expanded tree.
pub fn dump_tree(tree: &DescriptorTree, table: &DescriptorTable) -> String {
    let mut lines = Vec::with_capacity(tree.len());
    for (depth, id) in tree.depth_first() {
        let pad = "  ".repeat(depth);
        let line = match tree.node(id) {
            Node::Element(e) => format!(
                "{}{} {} [{} bits, scale {}, ref {}]",
                pad, e.descriptor, e.rule.name, e.rule.width, e.rule.scale, e.rule.reference
            ),
            Node::Sequence { descriptor, .. } => {
                let name = table
                    .base()
                    .sequence(*descriptor)
                    .or_else(|| table.local().and_then(|l| l.sequence(*descriptor)))
                    .map(|s| s.name.as_str())
                    .unwrap_or("");
                format!("{}{} {}", pad, descriptor, name)
            }
            Node::Replication { descriptor, count: ReplicationCount::Fixed(n), .. } => {
                format!("{}{} x{}", pad, descriptor, n)
            }
            Node::Replication { descriptor, .. } => format!("{}{} delayed", pad, descriptor),
            Node::Operator { descriptor, op } => format!("{}{} {:?}", pad, descriptor, op),
        };
        lines.push(line);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Descriptor;
    use crate::table::{TableData, TableKind};
    use std::sync::Arc;

    fn table() -> DescriptorTable {
        let mut t = TableData::new(TableKind::Master { version: 13 });
        t.insert_element("0-12-101".parse().unwrap(), ElementRule::numeric("TEMPERATURE", "K", 16, 2, 0))
            .unwrap();
        t.insert_element(
            "0-02-002".parse().unwrap(),
            ElementRule::with_unit("WIND INDICATOR", Unit::FlagTable, 4),
        )
        .unwrap();
        DescriptorTable::new(Arc::new(t))
    }

    #[test]
    fn values_with_units() {
        let t = table();
        let temp = t.element("0-12-101".parse().unwrap());
        assert_eq!(format_value(&Value::number(273.15), temp), "273.15 K");
        assert_eq!(format_value(&Value::missing(), temp), "MISSING");
        let flags = t.element("0-02-002".parse().unwrap());
        assert_eq!(format_value(&Value::CodeTable(5), flags), "flags 0101");
    }

    #[test]
    fn field_indented_by_path() {
        let d: Descriptor = "0-12-101".parse().unwrap();
        let f = Field {
            descriptor: d,
            path: "3-01-001/1-01-000[0]/0-12-101".to_string(),
            value: Value::number(280.0),
        };
        assert_eq!(format_field(&f, &table()), "      0-12-101 TEMPERATURE: 280 K");
    }
}
