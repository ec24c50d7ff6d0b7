#![forbid(unsafe_code)]

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use hugearray::{Config, HugeArray, Value};

const KEYS_PER_BATCH: usize = 64;

fn array_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("array/ops");
    group.sample_size(30);

    let mut harness = ArrayHarness::new();
    group.throughput(Throughput::Elements(KEYS_PER_BATCH as u64));
    group.bench_function("set_int", |b| b.iter(|| harness.set_ints()));
    group.bench_function("set_singleton", |b| b.iter(|| harness.set_singletons()));
    group.bench_function("get_hit", |b| b.iter(|| harness.get_hits()));
    group.finish();
}

struct ArrayHarness {
    array: HugeArray,
    round: i64,
}

impl ArrayHarness {
    fn new() -> Self {
        let mut array = HugeArray::temp_with_config(Config::bulk_load()).expect("open array");
        for i in 0..KEYS_PER_BATCH {
            array.set(format!("key-{i:03}"), 0i64).expect("prefill");
        }
        Self { array, round: 0 }
    }

    fn set_ints(&mut self) {
        self.round += 1;
        for i in 0..KEYS_PER_BATCH {
            self.array
                .set(format!("key-{i:03}"), self.round + i as i64)
                .expect("set");
        }
    }

    fn set_singletons(&mut self) {
        self.round += 1;
        for i in 0..KEYS_PER_BATCH {
            self.array
                .set(format!("key-{i:03}"), (self.round + i as i64) % 2 == 0)
                .expect("set");
        }
    }

    fn get_hits(&mut self) {
        for i in 0..KEYS_PER_BATCH {
            let value = self
                .array
                .try_get(format!("key-{i:03}"), Value::Null)
                .expect("get");
            criterion::black_box(value);
        }
    }
}

criterion_group!(benches, array_ops);
criterion_main!(benches);
