//! Message scanning: find `BUFR` … `7777` envelopes in a byte buffer.
//!
//! The scanner is a lazy iterator. Corrupt regions (garbage between messages, a
//! message whose end sentinel is not where its length says) are reported as one
//! [`BufrError::ScanResync`] item each and scanning continues at the next start
//! sentinel; a corrupt message never ends the scan.

use crate::codec::BufrError;
use crate::message::{Message, END_SENTINEL, INDICATOR_LEN, START_SENTINEL};
use byteorder::{BigEndian, ByteOrder};
use std::io::Read;
use std::path::Path;

/// A fully buffered byte source. This is the only place where I/O happens;
/// messages borrow from it.
#[derive(Debug, Clone, Default)]
pub struct BufrSource {
    bytes: Vec<u8>,
}

impl BufrSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BufrError> {
        Ok(BufrSource { bytes: std::fs::read(path)? })
    }

    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self, BufrError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(BufrSource { bytes })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        BufrSource { bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn scan(&self) -> MessageScanner<'_> {
        MessageScanner::new(&self.bytes)
    }
}

/// Lazy iterator over the messages of a buffer.
#[derive(Debug, Clone)]
pub struct MessageScanner<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> MessageScanner<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        MessageScanner { buf, pos: 0 }
    }

    /// Restart scanning from a byte offset.
    pub fn starting_at(buf: &'a [u8], offset: usize) -> Self {
        MessageScanner { buf, pos: offset.min(buf.len()) }
    }

    /// Offset where the next scan step begins.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn find_start(&self, from: usize) -> Option<usize> {
        if from >= self.buf.len() {
            return None;
        }
        self.buf[from..]
            .windows(START_SENTINEL.len())
            .position(|w| w == START_SENTINEL)
            .map(|p| from + p)
    }

    /// Length of a well-formed envelope at `at`, or `None` if the length is
    /// unreadable or the end sentinel is not where it should be.
    fn envelope_len(&self, at: usize) -> Option<usize> {
        let header = self.buf.get(at..at + INDICATOR_LEN)?;
        let len = BigEndian::read_u24(&header[4..7]) as usize;
        if len < INDICATOR_LEN + END_SENTINEL.len() {
            return None;
        }
        let end = at.checked_add(len)?;
        let tail = self.buf.get(end - END_SENTINEL.len()..end)?;
        (tail == END_SENTINEL).then_some(len)
    }

    /// Report the region `[start, next sentinel)` and move past it.
    fn resync(&mut self, start: usize, search_from: usize) -> BufrError {
        let next = self.find_start(search_from).unwrap_or(self.buf.len());
        let skipped = next - start;
        log::warn!("resync: skipped {} bytes at offset {}", skipped, start);
        self.pos = next;
        BufrError::ScanResync { offset: start, skipped }
    }
}

impl<'a> Iterator for MessageScanner<'a> {
    type Item = Result<Message<'a>, BufrError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let start = self.pos;
        match self.find_start(start) {
            None => return Some(Err(self.resync(start, start))),
            Some(p) if p > start => return Some(Err(self.resync(start, p))),
            Some(_) => {}
        }
        let Some(len) = self.envelope_len(start) else {
            return Some(Err(self.resync(start, start + 1)));
        };
        self.pos = start + len;
        let message = Message::parse(&self.buf[start..start + len], start);
        if let Err(e) = &message {
            log::warn!("skipping message at offset {}: {}", start, e);
        }
        Some(message)
    }
}
