//! # bufr-decoder: descriptor-driven decoder for WMO BUFR messages
//!
//! Scans a byte stream for BUFR messages (editions 2 to 4), expands each
//! message's descriptor list against caller-supplied tables and decodes the
//! data section into ordered `(subset, path, value)` triples.
//!
//! ## Pipeline
//!
//! - **Scan**: [`MessageScanner`] finds `BUFR` … `7777` envelopes and reports
//!   corrupt regions as [`BufrError::ScanResync`] without stopping.
//! - **Tables**: [`TableSet`] holds master and local tables (text format parsed by
//!   [`parse_table`], or built with [`TableData::insert_element`]); per message it
//!   selects a [`DescriptorTable`] (local entries overlay the base).
//! - **Expand**: [`DescriptorTree`] resolves sequences, replications and
//!   operators into an arena tree, memoized on the [`Message`].
//! - **Decode**: [`UncompressedArrayReader`] or [`CompressedArrayReader`] walk
//!   the tree over the data bits. [`BitCounter`] walks it without materializing
//!   and checks the declared section length.
//!
//! ## Table format
//!
//! ```text
//! table master version 13;
//! element 0-12-101 "TEMPERATURE/DRY-BULB TEMPERATURE" "K" width 16 scale 2 reference 0;
//! sequence 3-01-001 "WMO BLOCK AND STATION" { 0-01-001 0-01-002 }
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use bufr_decoder::{parse_table, BufrSource, Decoder, DecoderConfig, TableSet};
//! use std::sync::Arc;
//!
//! let tables = TableSet::new().with(parse_table(&std::fs::read_to_string("b13.txt")?)?);
//! let decoder = Decoder::new(Arc::new(tables), DecoderConfig::default());
//! let source = BufrSource::open("obs.bufr")?;
//! for message in source.scan().filter_map(Result::ok) {
//!     for (subset, path, value) in decoder.decode(&message)?.fields() {
//!         println!("{} {} {}", subset, path, value);
//!     }
//! }
//! ```

pub mod bits;
pub mod codec;
pub mod descriptor;
pub mod dump;
pub mod lint;
pub mod message;
pub mod parser;
pub mod scanner;
pub mod table;
pub mod tree;
pub mod value;
pub mod walk;

pub use bits::BitCursor;
pub use codec::{
    BufrError, CompressedArrayReader, DecodedMessage, Decoder, DecoderConfig, ReadOutcome,
    SubsetIter, UncompressedArrayReader,
};
pub use descriptor::{Descriptor, DescriptorClass};
pub use lint::{lint, LintMessage};
pub use message::{DescriptionSection, IdentificationSection, Message, MessageHeader};
pub use parser::parse_table;
pub use scanner::{BufrSource, MessageScanner};
pub use table::{DescriptorTable, ElementRule, TableData, TableError, TableKind, TableSet, Unit};
pub use tree::{DescriptorTree, Node, NodeId, Operator, ReplicationCount};
pub use value::{Field, Subset, Value};
pub use walk::{BitCount, BitCounter};
