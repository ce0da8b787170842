use bramley::btree::Bramley;
use bramley::btree::Direction;
use bramley::record::Pair;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rand::{thread_rng, Rng};

const SIZES: [usize; 6] = [256, 512, 1024, 2048, 4096, 8192];
const ORDER: usize = 13;

// Utility function for creating a tree to use with benches
fn create_tree(len: usize) -> Bramley<Pair<String, String>> {
    let mut tree = Bramley::try_new(ORDER).expect("creates tree");
    for index in 0..len {
        let _ = tree.add(Pair::new(format!("key_{index:06}"), format!("value_{index}")));
    }
    tree
}

// Utility function for getting keys from a tree
fn get_keys(tree: &Bramley<Pair<String, String>>) -> Vec<String> {
    tree.iter(Direction::Ascending)
        .map(|pair| pair.key.clone())
        .collect()
}

fn bramley_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("add");
    for size in SIZES.iter() {
        group.bench_with_input(BenchmarkId::new("bramley add", size), size, |b, size| {
            b.iter_batched(
                || {
                    let mut rng = thread_rng();
                    (0..*size)
                        .map(|_| rng.gen_range(0..usize::MAX))
                        .collect::<Vec<usize>>()
                },
                |input| {
                    let mut tree = Bramley::try_new(ORDER).expect("creates tree");
                    for i in input {
                        let _ = tree.add(i);
                    }
                    tree
                },
                BatchSize::SmallInput,
            )
        });
    }
}

fn bramley_find(c: &mut Criterion) {
    let mut group = c.benchmark_group("find");
    for size in SIZES.iter() {
        let tree = create_tree(*size);
        let keys = get_keys(&tree);
        group.bench_with_input(BenchmarkId::new("bramley find", size), &keys, |b, keys| {
            let mut rng = thread_rng();
            b.iter(|| {
                let key = &keys[rng.gen_range(0..keys.len())];
                tree.find(key).is_some()
            })
        });
    }
}

fn bramley_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("delete");
    for size in SIZES.iter() {
        let keys = get_keys(&create_tree(*size));
        group.bench_with_input(
            BenchmarkId::new("bramley delete", size),
            &keys,
            |b, keys| {
                b.iter_batched(
                    || create_tree(keys.len()),
                    |mut tree| {
                        for key in keys.iter().step_by(3) {
                            let _ = tree.delete(key);
                        }
                        tree
                    },
                    BatchSize::SmallInput,
                )
            },
        );
    }
}

fn bramley_write_read(c: &mut Criterion) {
    const STRUCTURE: &str = "bench.idx";
    const DATA: &str = "bench.dat";

    let mut group = c.benchmark_group("write_read");
    for size in SIZES.iter() {
        let tree = create_tree(*size);
        group.bench_with_input(
            BenchmarkId::new("bramley write_read", size),
            &tree,
            |b, tree| {
                b.iter(|| {
                    tree.write(STRUCTURE, DATA).expect("writes tree");
                    Bramley::<Pair<String, String>>::try_read(STRUCTURE, DATA)
                        .expect("reads tree")
                })
            },
        );
    }
    let _ = std::fs::remove_file(STRUCTURE);
    let _ = std::fs::remove_file(DATA);
}

criterion_group!(
    benches,
    bramley_add,
    bramley_find,
    bramley_delete,
    bramley_write_read
);
criterion_main!(benches);
