//! Shared fixtures: a bit writer, compressed/uncompressed data section encoders
//! and an edition 4 message assembler.

#![allow(dead_code)]

use bufr_decoder::{parse_table, Decoder, DecoderConfig, Descriptor, TableSet};
use std::sync::Arc;

pub const MASTER_TABLE: &str = r#"
table master version 13;
element 0-01-001 "WMO BLOCK NUMBER" "Numeric" width 7 scale 0 reference 0;
element 0-01-002 "WMO STATION NUMBER" "Numeric" width 10 scale 0 reference 0;
element 0-01-015 "STATION OR SITE NAME" "CCITT IA5" width 32 scale 0 reference 0;
element 0-07-004 "PRESSURE" "Pa" width 14 scale -1 reference 0;
element 0-12-001 "TEMPERATURE" "C" width 12 scale 1 reference -40;
element 0-20-003 "PRESENT WEATHER" "Code table" width 9 scale 0 reference 0;
element 0-31-001 "DELAYED DESCRIPTOR REPLICATION FACTOR" "Numeric" width 8 scale 0 reference 0;
element 0-31-021 "ASSOCIATED FIELD SIGNIFICANCE" "Code table" width 6 scale 0 reference 0;
sequence 3-01-001 "WMO BLOCK AND STATION NUMBERS" { 0-01-001 0-01-002 }
"#;

pub const LOCAL_TABLE: &str = r#"
table local center 98 version 1;
element 0-01-192 "LOCAL STATION ID" "Numeric" width 16 scale 0 reference 0;
"#;

pub fn d(s: &str) -> Descriptor {
    s.parse().unwrap()
}

pub fn ds(list: &[&str]) -> Vec<Descriptor> {
    list.iter().map(|s| d(s)).collect()
}

pub fn tables() -> TableSet {
    TableSet::new()
        .with(parse_table(MASTER_TABLE).unwrap())
        .with(parse_table(LOCAL_TABLE).unwrap())
}

pub fn decoder() -> Decoder {
    Decoder::new(Arc::new(tables()), DecoderConfig::default())
}

/// MSB-first bit packer.
#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bits: u64,
}

impl BitWriter {
    pub fn new() -> Self {
        BitWriter::default()
    }

    pub fn put(&mut self, value: u64, width: u32) -> &mut Self {
        for i in (0..width).rev() {
            let bit = (value >> i) & 1;
            if self.bits % 8 == 0 {
                self.bytes.push(0);
            }
            if bit == 1 {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 0x80 >> (self.bits % 8);
            }
            self.bits += 1;
        }
        self
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        for &b in bytes {
            self.put(b as u64, 8);
        }
        self
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }

    pub fn finish(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}

pub fn all_ones(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// One field of one subset, as laid out in the data section.
#[derive(Debug, Clone)]
pub enum Raw {
    /// Raw value and width; `None` encodes missing.
    Num(Option<u64>, u32),
    Text(Vec<u8>),
}

/// Subsets back to back.
pub fn uncompressed(subsets: &[Vec<Raw>]) -> Vec<u8> {
    let mut w = BitWriter::new();
    for subset in subsets {
        for raw in subset {
            match raw {
                Raw::Num(v, width) => {
                    w.put(v.unwrap_or(all_ones(*width)), *width);
                }
                Raw::Text(bytes) => {
                    w.put_bytes(bytes);
                }
            }
        }
    }
    w.finish()
}

fn bits_for(n: u64) -> u32 {
    64 - n.leading_zeros()
}

/// Column-wise: R0, 6-bit increment width, one increment per subset.
/// All subsets must share the same field layout.
pub fn compressed(subsets: &[Vec<Raw>]) -> Vec<u8> {
    let mut w = BitWriter::new();
    let columns = subsets.first().map(|s| s.len()).unwrap_or(0);
    for col in 0..columns {
        match &subsets[0][col] {
            Raw::Num(_, width) => {
                let width = *width;
                let values: Vec<Option<u64>> = subsets
                    .iter()
                    .map(|s| match &s[col] {
                        Raw::Num(v, _) => *v,
                        Raw::Text(_) => panic!("column {} mixes text and numbers", col),
                    })
                    .collect();
                let present: Vec<u64> = values.iter().flatten().copied().collect();
                let Some(&min) = present.iter().min() else {
                    w.put(all_ones(width), width).put(0, 6);
                    continue;
                };
                let max = *present.iter().max().unwrap();
                if present.len() == values.len() && min == max {
                    w.put(min, width).put(0, 6);
                    continue;
                }
                let nbinc = bits_for(max - min + 1);
                w.put(min, width).put(nbinc as u64, 6);
                for v in values {
                    match v {
                        Some(v) => w.put(v - min, nbinc),
                        None => w.put(all_ones(nbinc), nbinc),
                    };
                }
            }
            Raw::Text(first) => {
                let texts: Vec<&Vec<u8>> = subsets
                    .iter()
                    .map(|s| match &s[col] {
                        Raw::Text(t) => t,
                        Raw::Num(..) => panic!("column {} mixes text and numbers", col),
                    })
                    .collect();
                if texts.iter().all(|t| *t == first) {
                    w.put_bytes(first).put(0, 6);
                } else {
                    w.put_bytes(&vec![0u8; first.len()]).put(first.len() as u64, 6);
                    for t in texts {
                        w.put_bytes(t);
                    }
                }
            }
        }
    }
    w.finish()
}

/// Section 1 and 3 settings for an assembled message.
#[derive(Debug, Clone)]
pub struct MessageSpec {
    pub center: u16,
    pub category: u8,
    pub master_version: u8,
    pub local_version: u8,
    pub subsets: u16,
    pub compressed: bool,
    pub descriptors: Vec<Descriptor>,
}

impl MessageSpec {
    pub fn new(descriptors: Vec<Descriptor>, subsets: u16, compressed: bool) -> Self {
        MessageSpec {
            center: 98,
            category: 0,
            master_version: 13,
            local_version: 0,
            subsets,
            compressed,
            descriptors,
        }
    }
}

fn u24(n: usize) -> [u8; 3] {
    [(n >> 16) as u8, (n >> 8) as u8, n as u8]
}

/// Edition 4 message; section 4 is padded to an even length.
pub fn assemble(spec: &MessageSpec, data: &[u8]) -> Vec<u8> {
    let mut sec1 = vec![0u8; 22];
    sec1[..3].copy_from_slice(&u24(22));
    sec1[4..6].copy_from_slice(&spec.center.to_be_bytes());
    sec1[10] = spec.category;
    sec1[13] = spec.master_version;
    sec1[14] = spec.local_version;
    sec1[15..17].copy_from_slice(&2024u16.to_be_bytes());
    sec1[17] = 6;
    sec1[18] = 1;
    sec1[19] = 12;

    let mut sec3 = u24(7 + 2 * spec.descriptors.len()).to_vec();
    sec3.push(0);
    sec3.extend_from_slice(&spec.subsets.to_be_bytes());
    sec3.push(if spec.compressed { 0xc0 } else { 0x80 });
    for desc in &spec.descriptors {
        sec3.extend_from_slice(&desc.as_u16().to_be_bytes());
    }

    let mut sec4_len = data.len() + 4;
    sec4_len += sec4_len % 2;
    let mut sec4 = u24(sec4_len).to_vec();
    sec4.push(0);
    sec4.extend_from_slice(data);
    sec4.resize(sec4_len, 0);

    let total = 8 + sec1.len() + sec3.len() + sec4.len() + 4;
    let mut out = b"BUFR".to_vec();
    out.extend_from_slice(&u24(total));
    out.push(4);
    out.extend(sec1);
    out.extend(sec3);
    out.extend(sec4);
    out.extend_from_slice(b"7777");
    out
}
