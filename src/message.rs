//! One scanned message: parsed header sections, borrowed data section and the
//! memoized descriptor tree.
//!
//! Section layout (all lengths big-endian):
//!
//! | Section | Content |
//! |---------|---------|
//! | 0 | `BUFR`, total length (24 bits), edition |
//! | 1 | identification: center, category, table versions, reference time |
//! | 2 | optional local data (present when the section 1 flag has bit `0x80`) |
//! | 3 | subset count, observed/compressed flags, descriptor list |
//! | 4 | data section length, then the bit-packed data |
//! | 5 | `7777` |

use crate::codec::{BufrError, DecoderConfig};
use crate::descriptor::Descriptor;
use crate::table::{DescriptorTable, TableKey};
use crate::tree::DescriptorTree;
use byteorder::{BigEndian, ByteOrder};
use std::cell::OnceCell;
use std::sync::Arc;

pub const START_SENTINEL: &[u8; 4] = b"BUFR";
pub const END_SENTINEL: &[u8; 4] = b"7777";
/// Section 0 is always 8 bytes for editions 2 and later.
pub const INDICATOR_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReferenceTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// Section 1.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdentificationSection {
    pub master_table: u8,
    pub center: u16,
    pub subcenter: u16,
    pub update_sequence: u8,
    pub has_optional_section: bool,
    pub category: u8,
    pub subcategory: u8,
    pub local_subcategory: u8,
    pub master_table_version: u8,
    pub local_table_version: u8,
    pub reference_time: ReferenceTime,
}

/// Section 3.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DescriptionSection {
    pub subsets: usize,
    pub observed: bool,
    pub compressed: bool,
    pub descriptors: Vec<Descriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub edition: u8,
    pub total_length: usize,
    pub identification: IdentificationSection,
    pub description: DescriptionSection,
    /// Declared section 4 length in bytes, including its 4-byte header.
    pub data_length: usize,
}

/// A message envelope borrowing its bytes from the scanned buffer.
#[derive(Debug, Clone)]
pub struct Message<'a> {
    offset: usize,
    raw: &'a [u8],
    header: MessageHeader,
    data: &'a [u8],
    tree: OnceCell<(TableKey, Arc<DescriptorTree>)>,
}

impl<'a> Message<'a> {
    /// Parse a complete message (`BUFR` … `7777`). `offset` is its position in the source.
    pub fn parse(raw: &'a [u8], offset: usize) -> Result<Self, BufrError> {
        let invalid = |reason: String| BufrError::InvalidHeader { offset, reason };

        if raw.len() < INDICATOR_LEN + 4 || &raw[..4] != START_SENTINEL {
            return Err(invalid("missing BUFR indicator".to_string()));
        }
        let total_length = BigEndian::read_u24(&raw[4..7]) as usize;
        let edition = raw[7];
        if !(2..=4).contains(&edition) {
            return Err(invalid(format!("unsupported edition {}", edition)));
        }
        if total_length != raw.len() {
            return Err(invalid(format!(
                "declared length {} does not match envelope length {}",
                total_length,
                raw.len()
            )));
        }
        let body_end = raw.len() - END_SENTINEL.len();

        let mut pos = INDICATOR_LEN;
        let min_ident = if edition == 4 { 22 } else { 17 };
        let sec1 = section(raw, pos, body_end, min_ident, "identification").map_err(invalid)?;
        let identification = parse_identification(sec1, edition);
        pos += sec1.len();

        if identification.has_optional_section {
            let sec2 = section(raw, pos, body_end, 4, "local use").map_err(invalid)?;
            pos += sec2.len();
        }

        let sec3 = section(raw, pos, body_end, 7, "data description").map_err(invalid)?;
        let description = parse_description(sec3);
        pos += sec3.len();

        let sec4 = section(raw, pos, body_end, 4, "data").map_err(invalid)?;
        let data_length = sec4.len();
        let data = &sec4[4..];

        Ok(Message {
            offset,
            raw,
            header: MessageHeader {
                edition,
                total_length,
                identification,
                description,
                data_length,
            },
            data,
            tree: OnceCell::new(),
        })
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn edition(&self) -> u8 {
        self.header.edition
    }

    pub fn center(&self) -> u16 {
        self.header.identification.center
    }

    pub fn category(&self) -> u8 {
        self.header.identification.category
    }

    pub fn identification(&self) -> &IdentificationSection {
        &self.header.identification
    }

    pub fn subsets(&self) -> usize {
        self.header.description.subsets
    }

    pub fn is_compressed(&self) -> bool {
        self.header.description.compressed
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.header.description.descriptors
    }

    /// Bit-packed payload of section 4 (after its 4-byte header).
    pub fn data_section(&self) -> &'a [u8] {
        self.data
    }

    pub fn declared_data_length(&self) -> usize {
        self.header.data_length
    }

    /// The expanded descriptor tree, built on first use and cached for later decodes.
    ///
    /// The cache is keyed by the table identity; asking with different tables
    /// builds a fresh tree without replacing the cached one.
    pub fn tree(
        &self,
        table: &DescriptorTable,
        config: &DecoderConfig,
    ) -> Result<Arc<DescriptorTree>, BufrError> {
        let key = table.key();
        if let Some((cached_key, tree)) = self.tree.get() {
            if *cached_key == key {
                return Ok(tree.clone());
            }
            log::debug!(
                "message at {}: tables differ from cached tree, expanding uncached",
                self.offset
            );
            return Ok(Arc::new(DescriptorTree::build(self.descriptors(), table, config)?));
        }
        let tree = Arc::new(DescriptorTree::build(self.descriptors(), table, config)?);
        let _ = self.tree.set((key, tree.clone()));
        Ok(tree)
    }
}

/// Read the 24-bit length at `pos` and return the whole section.
fn section<'a>(
    raw: &'a [u8],
    pos: usize,
    end: usize,
    min_len: usize,
    name: &str,
) -> Result<&'a [u8], String> {
    if pos + 3 > end {
        return Err(format!("{} section truncated", name));
    }
    let len = BigEndian::read_u24(&raw[pos..pos + 3]) as usize;
    if len < min_len {
        return Err(format!("{} section length {} below minimum {}", name, len, min_len));
    }
    if pos + len > end {
        return Err(format!(
            "{} section length {} overruns message ({} bytes left)",
            name,
            len,
            end - pos
        ));
    }
    Ok(&raw[pos..pos + len])
}

fn parse_identification(s: &[u8], edition: u8) -> IdentificationSection {
    if edition == 4 {
        IdentificationSection {
            master_table: s[3],
            center: BigEndian::read_u16(&s[4..6]),
            subcenter: BigEndian::read_u16(&s[6..8]),
            update_sequence: s[8],
            has_optional_section: s[9] & 0x80 != 0,
            category: s[10],
            subcategory: s[11],
            local_subcategory: s[12],
            master_table_version: s[13],
            local_table_version: s[14],
            reference_time: ReferenceTime {
                year: BigEndian::read_u16(&s[15..17]),
                month: s[17],
                day: s[18],
                hour: s[19],
                minute: s[20],
                second: s[21],
            },
        }
    } else {
        // Edition 2 carries a 16-bit center; edition 3 splits it into subcenter + center.
        let (center, subcenter) = if edition == 2 {
            (BigEndian::read_u16(&s[4..6]), 0)
        } else {
            (s[5] as u16, s[4] as u16)
        };
        IdentificationSection {
            master_table: s[3],
            center,
            subcenter,
            update_sequence: s[6],
            has_optional_section: s[7] & 0x80 != 0,
            category: s[8],
            subcategory: s[9],
            local_subcategory: 0,
            master_table_version: s[10],
            local_table_version: s[11],
            reference_time: ReferenceTime {
                year: century_year(s[12]),
                month: s[13],
                day: s[14],
                hour: s[15],
                minute: s[16],
                second: 0,
            },
        }
    }
}

fn century_year(yy: u8) -> u16 {
    match yy {
        0..=50 => 2000 + yy as u16,
        100 => 2000,
        _ => 1900 + yy as u16,
    }
}

fn parse_description(s: &[u8]) -> DescriptionSection {
    let flags = s[6];
    let descriptors = s[7..]
        .chunks_exact(2)
        .map(|c| Descriptor::from_u16(BigEndian::read_u16(c)))
        .collect();
    DescriptionSection {
        subsets: BigEndian::read_u16(&s[4..6]) as usize,
        observed: flags & 0x80 != 0,
        compressed: flags & 0x40 != 0,
        descriptors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u24(n: usize) -> [u8; 3] {
        [(n >> 16) as u8, (n >> 8) as u8, n as u8]
    }

    /// Edition 4 message with one descriptor and the given data bytes.
    fn message(data: &[u8], compressed: bool) -> Vec<u8> {
        let mut sec1 = vec![0u8; 22];
        sec1[..3].copy_from_slice(&u24(22));
        sec1[5] = 98; // center
        sec1[10] = 2; // category
        sec1[13] = 13; // master version
        sec1[15..17].copy_from_slice(&2024u16.to_be_bytes());
        let sec3 = [0, 0, 9, 0, 0, 3, if compressed { 0xc0 } else { 0x80 }, 0x0c, 0x65];
        let mut sec4 = u24(data.len() + 4).to_vec();
        sec4.push(0);
        sec4.extend_from_slice(data);
        let total = 8 + sec1.len() + sec3.len() + sec4.len() + 4;
        let mut out = b"BUFR".to_vec();
        out.extend_from_slice(&u24(total));
        out.push(4);
        out.extend(sec1);
        out.extend_from_slice(&sec3);
        out.extend(sec4);
        out.extend_from_slice(b"7777");
        out
    }

    #[test]
    fn parses_edition4_sections() {
        let raw = message(&[1, 2, 3, 4], true);
        let m = Message::parse(&raw, 0).unwrap();
        assert_eq!(m.edition(), 4);
        assert_eq!(m.center(), 98);
        assert_eq!(m.category(), 2);
        assert_eq!(m.subsets(), 3);
        assert!(m.is_compressed());
        assert!(m.header().description.observed);
        assert_eq!(m.descriptors(), &[Descriptor::new(0, 12, 101)]);
        assert_eq!(m.data_section(), &[1, 2, 3, 4]);
        assert_eq!(m.declared_data_length(), 8);
        assert_eq!(m.identification().reference_time.year, 2024);
    }

    #[test]
    fn rejects_overrunning_section() {
        let mut raw = message(&[0, 0], false);
        // corrupt section 3 length
        let sec3 = 8 + 22;
        raw[sec3..sec3 + 3].copy_from_slice(&u24(200));
        assert!(matches!(
            Message::parse(&raw, 0),
            Err(BufrError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn rejects_old_edition() {
        let mut raw = message(&[0, 0], false);
        raw[7] = 1;
        assert!(Message::parse(&raw, 0).is_err());
    }
}
