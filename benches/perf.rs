use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use crossbeam::channel::unbounded;
use keyswap::codec::{DAG_PB_CODEC, RAW_CODEC, multihash_sha2_256};
use keyswap::migration::KeyspaceMigration;
use keyswap::migration::version::write_repo_version;
use keyswap::offline;
use keyswap::store::memory::MemoryStore;
use keyswap::{BinaryKeyCodec, CidSwapper, ContentId, Key, Swap, SwapConfig};
use tempfile::tempdir;

const SEEDED_KEYS: u32 = 10_000;
const VALUE_BYTES: usize = 256;

fn seeded_entries(count: u32) -> Vec<(Key, Vec<u8>)> {
    let prefix = Key::new("/blocks");
    (0..count)
        .map(|i| {
            let mut value = format!("block-{i:08}").into_bytes();
            value.resize(VALUE_BYTES, b'.');
            let codec = if i % 2 == 0 { RAW_CODEC } else { DAG_PB_CODEC };
            let key = match ContentId::v1(codec, multihash_sha2_256(&value)) {
                Ok(cid) => prefix.child(&BinaryKeyCodec.cid_to_key(&cid)),
                Err(e) => panic!("bench fixture: {e}"),
            };
            (key, value)
        })
        .collect()
}

fn bench_swap_paths(c: &mut Criterion) {
    let entries = seeded_entries(SEEDED_KEYS);
    let codec = BinaryKeyCodec;

    c.bench_function("classify_10k_keys", |b| {
        let store = MemoryStore::new();
        let swapper = CidSwapper::new(Key::new("/blocks"), &store, &codec, SwapConfig::default());
        b.iter(|| {
            for (key, _) in &entries {
                black_box(swapper.classify(key));
            }
        })
    });

    c.bench_function("dry_run_10k_keys", |b| {
        let store = MemoryStore::from_entries(entries.clone());
        b.iter(|| {
            let swapper =
                CidSwapper::new(Key::new("/blocks"), &store, &codec, SwapConfig::default());
            black_box(swapper.run(true).expect("dry run"))
        })
    });

    for workers in [1usize, 4] {
        c.bench_function(&format!("swap_10k_keys_{workers}_workers"), |b| {
            b.iter_batched(
                || MemoryStore::from_entries(entries.clone()),
                |store| {
                    let config = SwapConfig::default()
                        .with_worker_threads(workers)
                        .with_sync_size(64 * 1024);
                    let swapper = CidSwapper::new(Key::new("/blocks"), &store, &codec, config);
                    black_box(swapper.run(false).expect("swap"))
                },
                BatchSize::LargeInput,
            )
        });
    }

    c.bench_function("revert_10k_keys", |b| {
        b.iter_batched(
            || {
                let store = MemoryStore::from_entries(entries.clone());
                let (tx, rx) = unbounded::<Swap>();
                CidSwapper::new(Key::new("/blocks"), &store, &codec, SwapConfig::default())
                    .with_swap_sink(tx)
                    .run(false)
                    .expect("forward");
                let records: Vec<Swap> = rx.iter().collect();
                (store, records)
            },
            |(store, records)| {
                let (tx, rx) = unbounded();
                for record in records {
                    tx.send(record).expect("send");
                }
                drop(tx);
                let swapper =
                    CidSwapper::new(Key::root(), &store, &codec, SwapConfig::default());
                black_box(swapper.revert(rx).expect("revert"))
            },
            BatchSize::LargeInput,
        )
    });
}

fn bench_end_to_end_migration(c: &mut Criterion) {
    let entries = seeded_entries(SEEDED_KEYS / 10);

    c.bench_function("apply_then_revert_1k_keys", |b| {
        b.iter_batched(
            || {
                let repo = tempdir().expect("repo");
                write_repo_version(repo.path(), 8).expect("version");
                (repo, MemoryStore::from_entries(entries.clone()))
            },
            |(repo, store)| {
                let migration = KeyspaceMigration::default();
                let applied = migration
                    .apply(repo.path(), &store, &BinaryKeyCodec)
                    .expect("apply");
                black_box(
                    offline::inspect_migration_log(&applied.log_path, &BinaryKeyCodec)
                        .expect("inspect"),
                );
                black_box(
                    migration
                        .revert(repo.path(), &store, &BinaryKeyCodec)
                        .expect("revert"),
                );
            },
            BatchSize::PerIteration,
        )
    });
}

criterion_group!(benches, bench_swap_paths, bench_end_to_end_migration);
criterion_main!(benches);
