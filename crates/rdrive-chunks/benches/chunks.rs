use rdrive_chunks::{hash_bytes, Chunker, ChunkerParams};

fn make_data(size: usize) -> Vec<u8> {
    // Semi-realistic data: repeating pattern with some entropy
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [1024, 65536, 1048576, 10485760])]
fn cdc_chunk(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    let chunker = Chunker::new(ChunkerParams::DEFAULT);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| chunker.split_slice(divan::black_box(&data)));
}

#[divan::bench(args = [1024, 65536, 1048576, 10485760])]
fn blake3_hash(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| hash_bytes(divan::black_box(&data)));
}

fn main() {
    divan::main();
}
