//! Import throughput benchmarks.
//!
//! Run with: cargo bench --bench import

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use record_import::directory::{TypeDescriptor, TypeDirectory};
use record_import::import::{ImportOptions, ImportSettings, Importer, TableTarget, Topology};
use record_import::ingestion::{csv::read_sheet_from_str, HeaderLayout};
use record_import::storage::MemoryStore;
use record_import::types::{DataType, Sheet};

fn directory() -> TypeDirectory {
    TypeDirectory::from_types(vec![
        TypeDescriptor::enumeration("Rarity", ["Common", "Rare", "Epic"]),
        TypeDescriptor::record("Item")
            .member("id", DataType::Utf8)
            .member("power", DataType::Int64)
            .member("weight", DataType::Float64)
            .member("rarity", DataType::Enum("Rarity".into()))
            .member("tags", DataType::Array(Box::new(DataType::Utf8))),
        TypeDescriptor::record("ItemTable")
            .member("rows", DataType::Array(Box::new(DataType::Object("Item".into())))),
    ])
}

fn sheet(rows: usize) -> Sheet {
    let mut text = String::from("id,power,weight,rarity,tags,tags,tags\n");
    for i in 0..rows {
        text.push_str(&format!("item{i:06},{},{}.5,Rare,a,b,\n", i % 100, i % 7));
    }
    // Generated input is well-formed.
    read_sheet_from_str(&text, &HeaderLayout::names_only(), b',').unwrap()
}

fn bench_import(c: &mut Criterion) {
    let dir = directory();
    let records = ImportOptions::new(ImportSettings {
        key_fields: vec!["id".into()],
        ..ImportSettings::for_type("Item")
    });
    let table = ImportOptions::new(ImportSettings {
        topology: Topology::Table(TableTarget {
            table_type: "ItemTable".into(),
            path: "tables/items".into(),
            rows_member: None,
        }),
        ..records.settings.clone()
    });

    let mut group = c.benchmark_group("import");
    for rows in [1_000usize, 10_000] {
        let input = sheet(rows);
        group.throughput(Throughput::Elements(rows as u64));

        group.bench_with_input(BenchmarkId::new("records", rows), &input, |b, input| {
            b.iter(|| {
                let mut store = MemoryStore::new();
                let summary = Importer::new(&dir, &mut store).run(input, &records).unwrap();
                black_box(summary.success_count)
            })
        });

        group.bench_with_input(BenchmarkId::new("table", rows), &input, |b, input| {
            b.iter(|| {
                let mut store = MemoryStore::new();
                let summary = Importer::new(&dir, &mut store).run(input, &table).unwrap();
                black_box(summary.success_count)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_import);
criterion_main!(benches);
