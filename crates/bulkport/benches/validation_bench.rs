//! 🏎️ How fast can one batch clear the duplicate check?

use std::hint::black_box;
use std::sync::Arc;

use bulkport::common::{ContentType, RawRow};
use bulkport::validation::{EmptyValuePolicy, ValidationSnapshot, is_row_valid};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};

fn snapshot_of(existing: usize) -> ValidationSnapshot {
    ValidationSnapshot {
        existing_emails: (0..existing).map(|i| format!("user{i}@example.com")).collect(),
        existing_phones: (0..existing).map(|i| format!("+1555{i:07}")).collect(),
        existing_codes: (0..existing).map(|i| format!("C{i}")).collect(),
        existing_names: Default::default(),
        policy: EmptyValuePolicy::Ignore,
    }
}

fn batch_of(rows: usize, offset: usize) -> Vec<RawRow> {
    let the_headers: Arc<[String]> = vec![
        "code".to_string(),
        "primaryEmail".to_string(),
        "primaryPhone".to_string(),
    ]
    .into();
    (0..rows)
        .map(|i| {
            let n = i + offset;
            RawRow::new(
                Arc::clone(&the_headers),
                vec![format!("C{n}"), format!("user{n}@example.com"), format!("+1555{n:07}")],
            )
        })
        .collect()
}

/// One 500-row batch against snapshots of growing size, half of it duplicated.
fn bench_customer_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("is_row_valid_customer_batch");

    for existing in [1_000, 100_000] {
        let the_snapshot = snapshot_of(existing);
        let the_batch = batch_of(500, existing - 250);

        group.throughput(Throughput::Elements(the_batch.len() as u64));
        group.bench_function(format!("existing_{existing}"), |b| {
            b.iter(|| {
                let the_rejected = the_batch
                    .iter()
                    .filter(|row| {
                        !is_row_valid(ContentType::Customer, black_box(row), black_box(&the_snapshot))
                            .is_empty()
                    })
                    .count();
                black_box(the_rejected)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_customer_batch);
criterion_main!(benches);
