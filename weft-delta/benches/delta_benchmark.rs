use criterion::{black_box, criterion_group, criterion_main, Criterion};
use weft_delta::{AttrValue, Attributes, Delta};

fn sample_document(paragraphs: usize) -> Delta {
    let mut doc = Delta::new();
    for index in 0..paragraphs {
        let attrs = Attributes::from([(
            "node_id".to_string(),
            AttrValue::Str(format!("p{index}")),
        )]);
        doc = doc
            .insert("The quick brown fox jumps over the lazy dog. ")
            .insert_attrs("\n", attrs);
    }
    doc
}

fn bench_compose(c: &mut Criterion) {
    let doc = sample_document(50);
    let change = Delta::new().retain(120).insert("typed text");

    c.bench_function("compose_edit_into_50p_doc", |b| {
        b.iter(|| black_box(doc.compose(black_box(&change))))
    });
}

fn bench_transform(c: &mut Criterion) {
    let a = Delta::new().retain(40).insert("alpha");
    let b = Delta::new().retain(200).delete(10).insert("beta");

    c.bench_function("transform_concurrent_edits", |bencher| {
        bencher.iter(|| black_box(a.transform(black_box(&b), true)))
    });
}

fn bench_diff(c: &mut Criterion) {
    let before = sample_document(20);
    let after = {
        let edit = Delta::new().retain(100).insert("middle edit ");
        before.compose(&edit)
    };

    c.bench_function("diff_20p_documents", |b| {
        b.iter(|| black_box(before.diff(black_box(&after)).unwrap()))
    });
}

fn bench_invert(c: &mut Criterion) {
    let doc = sample_document(20);
    let change = Delta::new().retain(50).delete(20).insert("replacement");

    c.bench_function("invert_against_20p_doc", |b| {
        b.iter(|| black_box(change.invert(black_box(&doc))))
    });
}

criterion_group!(
    benches,
    bench_compose,
    bench_transform,
    bench_diff,
    bench_invert
);
criterion_main!(benches);
