//! Benchmark: count-only walk vs full decode on synthetic messages, in both
//! layouts. Each message carries 200 station subsets with a delayed
//! replication of 8 temperatures; the buffer holds 20 messages. Scanning is
//! measured separately.

#[path = "../tests/common/mod.rs"]
mod common;

use bufr_decoder::{Decoder, Message, MessageScanner};
use common::*;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const SUBSETS: u64 = 200;
const MESSAGES: usize = 20;
const DESCRIPTORS: [&str; 6] = ["3-01-001", "0-01-015", "0-20-003", "1-01-000", "0-31-001", "0-12-001"];

fn rows() -> Vec<Vec<Raw>> {
    (0..SUBSETS)
        .map(|i| {
            let mut row = vec![
                Raw::Num(Some(i % 90), 7),
                Raw::Num(Some(i), 10),
                Raw::Text(format!("S{:03}", i).into_bytes()),
                Raw::Num(if i % 7 == 0 { None } else { Some(i % 100) }, 9),
                Raw::Num(Some(8), 8),
            ];
            row.extend((0..8).map(|k| Raw::Num(Some(400 + (i * 3 + k) % 200), 12)));
            row
        })
        .collect()
}

fn buffer(compressed_layout: bool) -> Vec<u8> {
    let rows = rows();
    let data = if compressed_layout { compressed(&rows) } else { uncompressed(&rows) };
    let spec = MessageSpec::new(ds(&DESCRIPTORS), SUBSETS as u16, compressed_layout);
    let one = assemble(&spec, &data);
    one.repeat(MESSAGES)
}

fn decode_all(decoder: &Decoder, messages: &[Message<'_>]) -> usize {
    messages
        .iter()
        .filter_map(|m| decoder.decode(m).ok())
        .map(|d| d.subsets.len())
        .sum()
}

fn count_all(decoder: &Decoder, messages: &[Message<'_>]) -> u64 {
    messages
        .iter()
        .filter_map(|m| decoder.count_bits(m).ok())
        .map(|c| c.bits)
        .sum()
}

fn bench_decode_messages(c: &mut Criterion) {
    let decoder = decoder();

    for (label, compressed_layout) in [("uncompressed", false), ("compressed", true)] {
        let buf = buffer(compressed_layout);
        let messages: Vec<Message<'_>> = MessageScanner::new(&buf).filter_map(Result::ok).collect();
        eprintln!(
            "{}: {} messages, {} bytes, {} subsets (one warm-up pass)",
            label,
            messages.len(),
            buf.len(),
            decode_all(&decoder, &messages)
        );

        c.bench_function(&format!("scan_{}", label), |b| {
            b.iter(|| MessageScanner::new(black_box(&buf)).filter(|m| m.is_ok()).count());
        });

        c.bench_function(&format!("count_bits_{}", label), |b| {
            b.iter(|| black_box(count_all(&decoder, black_box(&messages))));
        });

        c.bench_function(&format!("decode_{}", label), |b| {
            b.iter(|| black_box(decode_all(&decoder, black_box(&messages))));
        });
    }
}

criterion_group!(benches, bench_decode_messages);
criterion_main!(benches);
