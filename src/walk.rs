//! Structure-only walk over a data section: count the bits a message consumes.
//!
//! This module follows the same descriptor tree and the same operators as the
//! [codec](crate::codec), but never builds [`Value`](crate::value::Value)s. Field
//! bits are skipped; only the values that steer the layout are read (delayed
//! replication counts, 2-03 reference values, compressed increment widths).
//!
//! ## When to use walk vs codec
//!
//! | Use case | Prefer |
//! |----------|--------|
//! | Check a message's declared data length | [`BitCounter::count`] |
//! | Only the number of data bits | [`BitCounter::count_bits`] |
//! | Full decode for inspection/display | [codec](crate::codec) |
//!
//! ## Length check
//!
//! Section 4 lengths are rounded by encoders: the data bits are padded to whole
//! bytes, the 4-byte section header is added, and editions up to 3 pad the
//! section to an even length. [`BitCount::counted_bytes`] applies the same
//! rounding, and [`BitCount::is_ok`] accepts a difference of one byte since not
//! every encoder pads.

use crate::codec::{traverse, BufrError, FieldSink, Layout, DEFAULT_MAX_STEPS};
use crate::descriptor::Descriptor;
use crate::message::Message;
use crate::tree::DescriptorTree;
use crate::value::Value;

/// Sink that asks the engine to skip every field.
struct CountOnly;

impl FieldSink for CountOnly {
    const MATERIALIZE: bool = false;
    fn push(&mut self, _lane: usize, _descriptor: Descriptor, _path: &str, _value: Value) {}
}

/// Bits consumed by a data section versus its declared length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitCount {
    pub bits: u64,
    /// Section 4 length in bytes, including its 4-byte header.
    pub declared_bytes: usize,
}

impl BitCount {
    pub fn new(bits: u64, declared_bytes: usize) -> Self {
        BitCount { bits, declared_bytes }
    }

    /// Section 4 length implied by the bit count.
    pub fn counted_bytes(&self) -> usize {
        let n = self.bits.div_ceil(8) as usize + 4;
        n + n % 2
    }

    pub fn is_ok(&self) -> bool {
        self.counted_bytes().abs_diff(self.declared_bytes) <= 1
    }

    pub fn check(&self) -> Result<(), BufrError> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(BufrError::BitCountMismatch {
                counted: self.counted_bytes(),
                declared: self.declared_bytes,
            })
        }
    }
}

/// Walks a data section without materializing values.
#[derive(Debug, Clone)]
pub struct BitCounter<'t, 'd> {
    tree: &'t DescriptorTree,
    data: &'d [u8],
    subsets: usize,
    compressed: bool,
    declared_bytes: usize,
    max_steps: u64,
}

impl<'t, 'd> BitCounter<'t, 'd> {
    pub fn new(
        tree: &'t DescriptorTree,
        data: &'d [u8],
        subsets: usize,
        compressed: bool,
        declared_bytes: usize,
    ) -> Self {
        BitCounter { tree, data, subsets, compressed, declared_bytes, max_steps: DEFAULT_MAX_STEPS }
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn for_message(message: &Message<'d>, tree: &'t DescriptorTree) -> Self {
        BitCounter::new(
            tree,
            message.data_section(),
            message.subsets(),
            message.is_compressed(),
            message.declared_data_length(),
        )
    }

    /// Number of data bits consumed by all subsets.
    pub fn count_bits(&self) -> Result<u64, BufrError> {
        let mut sink = CountOnly;
        let mut steps = self.max_steps;
        if self.compressed {
            let layout = Layout::Compressed { subsets: self.subsets };
            return traverse(self.tree, self.data, 0, layout, &mut sink, &mut steps);
        }
        let mut pos = 0;
        for _ in 0..self.subsets {
            pos = traverse(self.tree, self.data, pos, Layout::Uncompressed, &mut sink, &mut steps)?;
        }
        Ok(pos)
    }

    pub fn count(&self) -> Result<BitCount, BufrError> {
        let count = BitCount::new(self.count_bits()?, self.declared_bytes);
        if !count.is_ok() {
            log::warn!(
                "bit count mismatch: {} bits ({} bytes) vs declared {} bytes",
                count.bits,
                count.counted_bytes(),
                count.declared_bytes
            );
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CompressedArrayReader, DecoderConfig, UncompressedArrayReader};
    use crate::table::{ElementRule, TableData, TableKind, Unit};

    fn d(s: &str) -> Descriptor {
        s.parse().unwrap()
    }

    fn tree(list: &[&str]) -> DescriptorTree {
        let mut t = TableData::new(TableKind::Master { version: 13 });
        t.insert_element(d("0-01-001"), ElementRule::numeric("BLOCK", "Numeric", 7, 0, 0)).unwrap();
        t.insert_element(d("0-31-001"), ElementRule::with_unit("COUNT", Unit::Numeric("Numeric".into()), 8))
            .unwrap();
        t.insert_element(d("0-01-015"), ElementRule::with_unit("NAME", Unit::Text, 16)).unwrap();
        let list: Vec<Descriptor> = list.iter().map(|s| d(s)).collect();
        DescriptorTree::build(&list, &t, &DecoderConfig::default()).unwrap()
    }

    #[test]
    fn counted_bytes_rounding() {
        // 12 bits -> 2 bytes + 4 = 6
        assert_eq!(BitCount::new(12, 6).counted_bytes(), 6);
        // 17 bits -> 3 bytes + 4 = 7 -> 8
        assert_eq!(BitCount::new(17, 8).counted_bytes(), 8);
        assert!(BitCount::new(17, 7).is_ok());
        assert!(BitCount::new(17, 9).is_ok());
        assert!(!BitCount::new(17, 10).is_ok());
        assert!(matches!(
            BitCount::new(17, 12).check(),
            Err(BufrError::BitCountMismatch { counted: 8, declared: 12 })
        ));
    }

    #[test]
    fn delayed_counts_are_read_while_counting() {
        // count 2 (8 bits) then 2 x 7 bits, two subsets
        let t = tree(&["1-01-000", "0-31-001", "0-01-001"]);
        let data = [2, 0xff, 0xfc, 0x00, 0x00];
        let counter = BitCounter::new(&t, &data, 2, false, 10);
        // subset 0: 8 + 14 = 22 bits; subset 1 starts at bit 22 with count 0 -> 8 bits
        let read = UncompressedArrayReader::new(&t, &data, 2).read_all().unwrap();
        assert_eq!(counter.count_bits().unwrap(), read.bits_consumed);
        assert_eq!(read.bits_consumed, 30);
    }

    #[test]
    fn compressed_text_skips_per_subset_bytes() {
        // R0 "AB", NBINC 2 bytes, 3 subsets of 2 bytes each
        let t = tree(&["0-01-015"]);
        let mut bits = Vec::new();
        let mut push = |v: u64, n: u32| {
            for i in (0..n).rev() {
                bits.push((v >> i) & 1 == 1);
            }
        };
        push(u64::from(b'A'), 8);
        push(u64::from(b'B'), 8);
        push(2, 6);
        for s in [b"XY", b"ZW", b"QQ"] {
            push(u64::from(s[0]), 8);
            push(u64::from(s[1]), 8);
        }
        let data: Vec<u8> = bits
            .chunks(8)
            .map(|c| c.iter().enumerate().fold(0u8, |acc, (i, &b)| acc | ((b as u8) << (7 - i))))
            .collect();
        let counter = BitCounter::new(&t, &data, 3, true, 0);
        assert_eq!(counter.count_bits().unwrap(), 16 + 6 + 48);
        let read = CompressedArrayReader::new(&t, &data, 3).read_all().unwrap();
        assert_eq!(read.subsets[1].fields[0].value, Value::Text("ZW".into()));
    }
}
