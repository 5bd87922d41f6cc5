//! Benchmarks for recipe execution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Map, Value};
use stepflow::prelude::*;

fn params(hosts: usize) -> Map<String, Value> {
    let hosts: Vec<Value> = (0..hosts).map(|i| json!(format!("host-{i}"))).collect();
    Map::from_iter([
        ("env".to_string(), json!("prod")),
        ("hosts".to_string(), Value::Array(hosts)),
    ])
}

fn recipe() -> Recipe {
    Recipe::new(
        "bench",
        vec![
            ForEachStep::new([
                EchoStep::new("{{ inputs }} in {{ storage.params.env }}").into(),
                TextStep::to_upper().into(),
            ])
            .with_seq("{{ storage.params.hosts | tojson }}")
            .into(),
            ValidateStep::assert_not_empty().into(),
        ],
    )
}

fn recipe_benchmark(c: &mut Criterion) {
    c.bench_function("foreach_templated_100", |b| {
        b.iter(|| {
            let mut recipe = recipe();
            recipe.prepare(params(100)).ok();
            black_box(recipe.bake().ok())
        });
    });

    c.bench_function("empty_recipe", |b| {
        b.iter(|| black_box(Recipe::new("empty", Vec::new()).bake().ok()));
    });
}

criterion_group!(benches, recipe_benchmark);
criterion_main!(benches);
