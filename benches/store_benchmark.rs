use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use securebytes::cache::SafeByteCache;
use securebytes::collection::EncryptedByteCollection;
use securebytes::entropy::{EntropyPool, EntropySource};

fn bench_cache_create(c: &mut Criterion) {
    c.bench_function("cache_get_or_create_new", |b| {
        b.iter_batched(
            || SafeByteCache::with_defaults().unwrap(),
            |cache| {
                for byte in 0_u8..16 {
                    cache.get_or_create(byte).unwrap();
                }
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_cache_dedup_hit(c: &mut Criterion) {
    let cache = SafeByteCache::with_defaults().unwrap();
    cache.get_or_create(42).unwrap();

    c.bench_function("cache_get_or_create_hit", |b| {
        b.iter(|| cache.get_or_create(42).unwrap())
    });
}

fn bench_cache_reveal(c: &mut Criterion) {
    let cache = SafeByteCache::with_defaults().unwrap();
    let id = cache.get_or_create(42).unwrap();

    c.bench_function("cache_reveal", |b| b.iter(|| cache.reveal(id).unwrap()));
}

fn bench_collection_append(c: &mut Criterion) {
    c.bench_function("collection_append_16", |b| {
        b.iter_batched(
            || EncryptedByteCollection::with_defaults().unwrap(),
            |collection| {
                for byte in 0_u8..16 {
                    collection.append(byte).unwrap();
                }
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_collection_decrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("collection_to_decrypted");
    for size in [8_usize, 32, 128] {
        let collection = EncryptedByteCollection::with_defaults().unwrap();
        for index in 0..size {
            collection.append(index as u8).unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let plaintext = collection.to_decrypted_bytes().unwrap();
                assert_eq!(plaintext.len(), size);
            })
        });
    }
    group.finish();
}

fn bench_entropy_drain(c: &mut Criterion) {
    let pool = EntropyPool::new(4096).unwrap();

    c.bench_function("entropy_get_available_bytes", |b| {
        b.iter(|| pool.get_available_bytes(32).unwrap())
    });
}

criterion_group!(
    benches,
    bench_cache_create,
    bench_cache_dedup_hit,
    bench_cache_reveal,
    bench_collection_append,
    bench_collection_decrypt,
    bench_entropy_drain
);
criterion_main!(benches);
