//! Criterion benchmarks for the page cache.
//!
//! Seeds an in-memory database with a full page of every dataset, then
//! compares a cache hit with a store round trip.
//!
//! Run with: `cargo bench --bench page_cache`

use std::sync::Mutex;

use criterion::{criterion_group, criterion_main, Criterion};
use rust_decimal::Decimal;

use carrental::cache::PageCache;
use carrental::db::Database;
use carrental::types::{Car, Client, DatasetKind};

fn setup_cache() -> PageCache<Mutex<Database>> {
    let db = Database::open_memory().expect("open in-memory DB");
    let class_id = db.insert_car_class("Economy", "Compact").expect("class");
    for n in 1..=100 {
        db.insert_client(&Client {
            client_id: 0,
            full_name: format!("Client {n}"),
            license_number: format!("LIC-{n}"),
            phone_number: "555-0100".into(),
        })
        .expect("client");
        db.insert_car(&Car {
            car_id: 0,
            class_id,
            brand: "Lada".into(),
            model: format!("Vesta {n}"),
            license_plate: format!("A{n:03}AA"),
            year: 2021,
            rental_cost_per_day: Decimal::new(250000, 2),
            status: "available".into(),
        })
        .expect("car");
    }
    PageCache::new(Mutex::new(db))
}

fn bench_hit(c: &mut Criterion) {
    let cache = setup_cache();
    cache.get_page::<Car>("Cars20").unwrap();

    c.bench_function("page_hit_cars", |b| {
        b.iter(|| cache.get_page::<Car>("Cars20").unwrap())
    });

    c.bench_function("page_hit_dispatch_clients", |b| {
        b.iter(|| cache.page(DatasetKind::Client, "Clients20").unwrap())
    });
}

fn bench_store(c: &mut Criterion) {
    let cache = setup_cache();

    c.bench_function("fresh_reverse_cars", |b| {
        b.iter(|| cache.get_fresh_reverse_page::<Car>().unwrap())
    });

    c.bench_function("fresh_reverse_clients", |b| {
        b.iter(|| cache.get_fresh_reverse_page::<Client>().unwrap())
    });
}

criterion_group!(benches, bench_hit, bench_store);
criterion_main!(benches);
