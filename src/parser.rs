//! Parse descriptor table text into [`TableData`] using PEST.

use crate::descriptor::Descriptor;
use crate::table::{ElementRule, TableData, TableError, TableKind, Unit};
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "table.pest"]
struct TableParser;

type Pair<'i> = pest::iterators::Pair<'i, Rule>;

/// Parse one table (master or local) from its text form.
pub fn parse_table(source: &str) -> Result<TableData, TableError> {
    let pairs = TableParser::parse(Rule::table_file, source)
        .map_err(|e| TableError::Parse(format!("Parse error: {}", e)))?;
    let file = pairs
        .into_iter()
        .next()
        .ok_or_else(|| TableError::Parse("Empty parse".to_string()))?;

    let mut table: Option<TableData> = None;
    for inner in file.into_inner() {
        match inner.as_rule() {
            Rule::table_header => table = Some(TableData::new(build_header(inner)?)),
            Rule::element_def => {
                let t = table.as_mut().ok_or_else(|| missing_header())?;
                let (d, rule) = build_element(inner)?;
                t.insert_element(d, rule)?;
            }
            Rule::sequence_def => {
                let t = table.as_mut().ok_or_else(|| missing_header())?;
                let (d, name, children) = build_sequence(inner)?;
                t.insert_sequence(d, &name, children)?;
            }
            _ => {}
        }
    }
    table.ok_or_else(missing_header)
}

fn missing_header() -> TableError {
    TableError::Parse("table header missing".to_string())
}

fn build_header(pair: Pair<'_>) -> Result<TableKind, TableError> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| TableError::Parse("table header: empty".to_string()))?;
    let rule = inner.as_rule();
    let nums = inner
        .into_inner()
        .map(|p| parse_uint(&p))
        .collect::<Result<Vec<u64>, _>>()?;
    match (rule, nums.as_slice()) {
        (Rule::master_header, [v]) => Ok(TableKind::Master { version: narrow(*v, "version")? }),
        (Rule::local_header, [c, v]) => Ok(TableKind::Local {
            center: narrow(*c, "center")?,
            version: narrow(*v, "version")?,
        }),
        _ => Err(TableError::Parse(format!("unexpected table header: {:?}", rule))),
    }
}

fn build_element(pair: Pair<'_>) -> Result<(Descriptor, ElementRule), TableError> {
    let mut it = pair.into_inner();
    let d = parse_descriptor(&next(&mut it, "element: descriptor")?)?;
    let name = string_value(next(&mut it, "element: name")?);
    let unit = string_value(next(&mut it, "element: unit")?);
    let width = parse_uint(&next(&mut it, "element: width")?)?;
    let scale = parse_sint(&next(&mut it, "element: scale")?)?;
    let reference = parse_sint(&next(&mut it, "element: reference")?)?;
    let rule = ElementRule {
        name,
        unit: Unit::from_table_unit(&unit),
        width: narrow(width, "width")?,
        scale: i32::try_from(scale)
            .map_err(|_| TableError::Parse(format!("{}: scale out of range", d)))?,
        reference,
    };
    Ok((d, rule))
}

fn build_sequence(pair: Pair<'_>) -> Result<(Descriptor, String, Vec<Descriptor>), TableError> {
    let mut d = None;
    let mut name = String::new();
    let mut children = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::descriptor if d.is_none() => d = Some(parse_descriptor(&inner)?),
            Rule::descriptor => children.push(parse_descriptor(&inner)?),
            Rule::string => name = string_value(inner),
            _ => {}
        }
    }
    let d = d.ok_or_else(|| TableError::Parse("sequence: missing descriptor".to_string()))?;
    Ok((d, name, children))
}

fn next<'i>(it: &mut pest::iterators::Pairs<'i, Rule>, what: &str) -> Result<Pair<'i>, TableError> {
    it.next().ok_or_else(|| TableError::Parse(what.to_string()))
}

fn string_value(pair: Pair<'_>) -> String {
    pair.into_inner()
        .next()
        .map(|p| p.as_str().to_string())
        .unwrap_or_default()
}

fn parse_descriptor(pair: &Pair<'_>) -> Result<Descriptor, TableError> {
    pair.as_str().parse().map_err(TableError::Parse)
}

fn parse_uint(pair: &Pair<'_>) -> Result<u64, TableError> {
    pair.as_str()
        .parse()
        .map_err(|e| TableError::Parse(format!("{}: {}", pair.as_str(), e)))
}

fn parse_sint(pair: &Pair<'_>) -> Result<i64, TableError> {
    pair.as_str()
        .parse()
        .map_err(|e| TableError::Parse(format!("{}: {}", pair.as_str(), e)))
}

fn narrow<T: TryFrom<u64>>(v: u64, what: &str) -> Result<T, TableError> {
    T::try_from(v).map_err(|_| TableError::Parse(format!("{} out of range: {}", what, v)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_master_table() {
        let src = r#"
# minimal
table master version 13;
element 0-12-101 "TEMPERATURE" "K" width 16 scale 2 reference 0;
element 0-01-015 "STATION NAME" "CCITT IA5" width 160 scale 0 reference 0;
sequence 3-01-001 "BLOCK/STATION" { 0-01-001 0-01-002 }
"#;
        let t = parse_table(src).unwrap();
        assert_eq!(t.kind, TableKind::Master { version: 13 });
        let temp = t.element("0-12-101".parse().unwrap()).unwrap();
        assert_eq!((temp.width, temp.scale, temp.reference), (16, 2, 0));
        assert_eq!(t.element("0-01-015".parse().unwrap()).unwrap().unit, Unit::Text);
        let seq = t.sequence("3-01-001".parse().unwrap()).unwrap();
        assert_eq!(seq.name, "BLOCK/STATION");
        assert_eq!(seq.children.len(), 2);
    }

    #[test]
    fn parses_local_header_and_negative_reference() {
        let src = "table local center 98 version 2;\n\
                   element 0-12-001 \"T\" \"C\" width 12 scale 1 reference -40;";
        let t = parse_table(src).unwrap();
        assert_eq!(t.kind, TableKind::Local { center: 98, version: 2 });
        assert_eq!(t.element("0-12-001".parse().unwrap()).unwrap().reference, -40);
    }

    #[test]
    fn missing_header_is_error() {
        let src = r#"element 0-12-101 "T" "K" width 16 scale 2 reference 0;"#;
        assert!(matches!(parse_table(src), Err(TableError::Parse(_))));
    }
}
