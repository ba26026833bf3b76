use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::Serialize;

use carrental::cache::PageCache;
use carrental::db::Database;
use carrental::seed;
use carrental::types::{DatasetKind, Page};

fn open_db(path: &Path) -> Result<Database> {
    Database::open(path)
        .with_context(|| format!("Failed to open rental database at {}", path.display()))
}

/// Print `data` as pretty JSON if `json` is true, otherwise call `human_fmt`.
fn output<T: Serialize>(data: &T, json: bool, human_fmt: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(data)?);
    } else {
        human_fmt(data);
    }
    Ok(())
}

/// Create the schema (opening the database does it).
pub fn cmd_init(db_path: &Path) -> Result<()> {
    open_db(db_path)?;
    println!("Initialized {}", db_path.display());
    Ok(())
}

/// Insert the demo fleet into an empty database.
pub fn cmd_seed(db_path: &Path, json: bool) -> Result<()> {
    let db = open_db(db_path)?;
    let result = seed::seed_demo(&db)?;

    output(&result, json, |r| {
        if r.skipped {
            println!("Database is not empty, nothing seeded");
            return;
        }
        println!(
            "Seeded {} car classes, {} cars, {} clients",
            r.car_classes, r.cars, r.clients
        );
        println!(
            "  {} rental agreements, {} history entries, {} maintenance records",
            r.rental_agreements, r.rental_history, r.maintenances
        );
    })
}

/// Show the first page of a dataset, or its latest rows with `latest`.
pub fn cmd_list(db_path: &Path, kind: DatasetKind, latest: bool, json: bool) -> Result<()> {
    let pages = PageCache::new(Mutex::new(open_db(db_path)?));
    let page = if latest {
        pages.fresh_reverse_page(kind)
    } else {
        pages.page(kind, kind.page_key())
    }
    .with_context(|| format!("Failed to load {}", kind.title()))?;

    output(&page, json, |page| {
        if page.is_empty() {
            println!("No {} found.", kind.title());
            return;
        }
        print_page(page);
    })
}

/// Row counts per table.
pub fn cmd_stats(db_path: &Path, json: bool) -> Result<()> {
    let db = open_db(db_path)?;
    let stats = db.stats()?;

    output(&stats, json, |stats| {
        for (kind, rows) in &stats.tables {
            println!("{:<24}{rows}", format!("{}:", kind.title()));
        }
    })
}

fn print_page(page: &Page) {
    match page {
        Page::Clients(rows) => {
            for c in rows.iter() {
                println!(
                    "{id:>4}  {name}  licence {lic}  {phone}",
                    id = c.client_id,
                    name = c.full_name,
                    lic = c.license_number,
                    phone = c.phone_number,
                );
            }
        }
        Page::Cars(rows) => {
            for c in rows.iter() {
                println!(
                    "{id:>4}  {brand} {model} ({year})  {plate}  class {class}  {cost}/day  {status}",
                    id = c.car_id,
                    brand = c.brand,
                    model = c.model,
                    year = c.year,
                    plate = c.license_plate,
                    class = c.class_id,
                    cost = c.rental_cost_per_day,
                    status = c.status,
                );
            }
        }
        Page::CarClasses(rows) => {
            for c in rows.iter() {
                println!("{:>4}  {}  {}", c.class_id, c.name, c.description);
            }
        }
        Page::RentalAgreements(rows) => {
            for a in rows.iter() {
                let actual = a
                    .actual_end_date
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "open".to_string());
                println!(
                    "{id:>4}  client {client}  car {car}  {start} -> {planned} (returned: {actual})  {total}",
                    id = a.rental_agreement_id,
                    client = a.client_id,
                    car = a.car_id,
                    start = a.start_date,
                    planned = a.planned_end_date,
                    total = a.total_amount,
                );
            }
        }
        Page::RentalHistory(rows) => {
            for h in rows.iter() {
                println!(
                    "{id:>4}  client {client}  {start} -> {end}  {total}",
                    id = h.rental_history_id,
                    client = h.client_id,
                    start = h.start_date,
                    end = h.actual_end_date,
                    total = h.total_amount,
                );
            }
        }
        Page::Maintenances(rows) => {
            for m in rows.iter() {
                println!(
                    "{id:>4}  car {car}  {date}  {desc}  {cost}",
                    id = m.id,
                    car = m.car_id,
                    date = m.maintenance_date,
                    desc = m.description,
                    cost = m.cost,
                );
            }
        }
    }
}
