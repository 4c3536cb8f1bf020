use cryptnote_crypto::{derive_note_key, open, seal, KdfParams, NoteKey};
use secrecy::SecretString;

fn make_text(size: usize) -> String {
    (0..size)
        .map(|i| char::from(b'a' + (i.wrapping_mul(7) % 26) as u8))
        .collect()
}

#[divan::bench(args = [64, 4096, 65536])]
fn bench_seal(bencher: divan::Bencher, size: usize) {
    let key = NoteKey::from_bytes([0xABu8; 32]);
    let text = make_text(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| seal(divan::black_box(&key), divan::black_box(&text)).unwrap());
}

#[divan::bench(args = [64, 4096, 65536])]
fn bench_open(bencher: divan::Bencher, size: usize) {
    let key = NoteKey::from_bytes([0xABu8; 32]);
    let sealed = seal(&key, &make_text(size)).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| open(divan::black_box(&key), divan::black_box(&sealed)).unwrap());
}

#[divan::bench(sample_count = 10)]
fn bench_derive_default_params(bencher: divan::Bencher) {
    let secret = SecretString::from("correct horse battery staple");
    let params = KdfParams::default();
    bencher.bench(|| derive_note_key(divan::black_box(&secret), &params).unwrap());
}

fn main() {
    divan::main();
}
