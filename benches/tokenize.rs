use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::io::Cursor;
use streamxml::{BufferedInput, Limits, Options, Token, TokenType, Tokenizer};

const SMALL_RECORDS: usize = 64;
const LARGE_RECORDS: usize = 20_000;

fn make_records(count: usize) -> Vec<u8> {
    let mut doc = Vec::with_capacity(count * 96 + 32);
    doc.extend_from_slice(b"<feed>");
    for i in 0..count {
        doc.extend_from_slice(
            format!(
                "<entry id=\"{i}\" kind=\"record\"><title>entry {i}</title><body>payload text for entry {i}</body></entry>"
            )
            .as_bytes(),
        );
    }
    doc.extend_from_slice(b"</feed>");
    doc
}

fn make_text_heavy(bytes: usize) -> Vec<u8> {
    let mut doc = Vec::with_capacity(bytes + 16);
    doc.extend_from_slice(b"<log>");
    while doc.len() < bytes {
        doc.extend_from_slice("line of mixed text with some unicode \u{4E16}\u{754C}\r\n".as_bytes());
    }
    doc.extend_from_slice(b"</log>");
    doc
}

fn count_tokens(doc: &[u8], buffer_size: usize) -> usize {
    let mut input = BufferedInput::new(Cursor::new(doc.to_vec()), buffer_size).unwrap();
    let mut tokenizer = Tokenizer::new(&mut input, Options::default(), Limits::default());
    let mut token = Token::default();
    let mut count = 0usize;
    while tokenizer.next_token(&mut token) {
        if token.kind == TokenType::Error {
            panic!("bench input must tokenize cleanly");
        }
        count += 1;
    }
    count
}

fn bench_tokenize_small(c: &mut Criterion) {
    let doc = make_records(SMALL_RECORDS);
    let mut group = c.benchmark_group("tokenize_small");
    group.throughput(Throughput::Bytes(doc.len() as u64));
    group.bench_function("records", |b| {
        b.iter(|| black_box(count_tokens(black_box(&doc), 64 * 1024)));
    });
    group.finish();
}

fn bench_tokenize_large(c: &mut Criterion) {
    let doc = make_records(LARGE_RECORDS);
    let mut group = c.benchmark_group("tokenize_large");
    group.throughput(Throughput::Bytes(doc.len() as u64));
    group.bench_function("records", |b| {
        b.iter(|| black_box(count_tokens(black_box(&doc), 64 * 1024)));
    });
    group.finish();
}

fn bench_tokenize_text_heavy(c: &mut Criterion) {
    let doc = make_text_heavy(512 * 1024);
    let mut group = c.benchmark_group("tokenize_text_heavy");
    group.throughput(Throughput::Bytes(doc.len() as u64));
    group.bench_function("crlf_unicode", |b| {
        b.iter(|| black_box(count_tokens(black_box(&doc), 64 * 1024)));
    });
    group.finish();
}

fn bench_tokenize_tiny_window(c: &mut Criterion) {
    // worst-case refill pressure: 4-byte window, scalars straddle refills
    let doc = make_records(SMALL_RECORDS);
    c.bench_function("tokenize_tiny_window", |b| {
        b.iter(|| black_box(count_tokens(black_box(&doc), 4)));
    });
}

criterion_group!(
    benches,
    bench_tokenize_small,
    bench_tokenize_large,
    bench_tokenize_text_heavy,
    bench_tokenize_tiny_window
);
criterion_main!(benches);
