use criterion::{black_box, criterion_group, criterion_main, Criterion};
use seqtag_core::tagging::{ConstraintMask, TagScheme, ViterbiDecoder};

const LABELS: [&str; 9] = [
    "O", "B-PER", "I-PER", "B-LOC", "I-LOC", "B-ORG", "I-ORG", "B-MISC", "I-MISC",
];

fn emissions(len: usize) -> Vec<Vec<f32>> {
    (0..len)
        .map(|t| {
            (0..LABELS.len())
                .map(|k| ((t * 31 + k * 17) % 13) as f32 * 0.1)
                .collect()
        })
        .collect()
}

fn bench_viterbi(c: &mut Criterion) {
    let num_tags = LABELS.len();
    let decoder = ViterbiDecoder::new(num_tags);
    let transitions = vec![vec![0.1f32; num_tags]; num_tags];
    let start = vec![0.0f32; num_tags];
    let end = vec![0.0f32; num_tags];
    let pairs = TagScheme::Bio.allowed_transitions(&LABELS).unwrap();
    let mask = ConstraintMask::from_pairs(num_tags, &pairs).unwrap();

    let sentence = emissions(40);

    c.bench_function("viterbi_unconstrained_40", |b| {
        b.iter(|| {
            decoder
                .decode_constrained(black_box(&sentence), &transitions, &start, &end, None)
                .unwrap()
        });
    });

    c.bench_function("viterbi_bio_constrained_40", |b| {
        b.iter(|| {
            decoder
                .decode_constrained(black_box(&sentence), &transitions, &start, &end, Some(&mask))
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_viterbi);
criterion_main!(benches);
