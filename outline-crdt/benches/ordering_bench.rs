use criterion::{Criterion, black_box, criterion_group, criterion_main};
use outline_crdt::{FractionalIndex, SequenceDiff};

fn bench_between(c: &mut Criterion) {
    c.bench_function("between_front_inserts_100", |b| {
        b.iter(|| {
            let mut upper = FractionalIndex::between(None, None);
            for _ in 0..100 {
                upper = FractionalIndex::between(None, Some(&upper));
            }
            black_box(upper)
        })
    });

    c.bench_function("initial_10k", |b| {
        b.iter(|| black_box(FractionalIndex::initial(10_000)))
    });
}

fn bench_diff(c: &mut Criterion) {
    let old: Vec<u32> = (0..5_000).collect();
    let mut new = old.clone();
    new.rotate_left(37);
    new.retain(|n| n % 11 != 0);
    new.extend(10_000..10_100);

    c.bench_function("sequence_diff_5k", |b| {
        b.iter(|| black_box(SequenceDiff::compute(&old, &new)))
    });
}

criterion_group!(benches, bench_between, bench_diff);
criterion_main!(benches);
