use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use tracing::debug;

use crate::cache::{Gateway, SortOrder, StoreError};
use crate::types::{Car, Client, DatasetKind, Maintenance, Record, RentalAgreement, RentalHistory};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS car_classes (
    class_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cars (
    car_id INTEGER PRIMARY KEY AUTOINCREMENT,
    class_id INTEGER NOT NULL,
    brand TEXT NOT NULL,
    model TEXT NOT NULL,
    license_plate TEXT NOT NULL UNIQUE,
    year INTEGER NOT NULL,
    rental_cost_per_day TEXT NOT NULL,
    status TEXT NOT NULL,
    FOREIGN KEY (class_id) REFERENCES car_classes(class_id)
);

CREATE TABLE IF NOT EXISTS clients (
    client_id INTEGER PRIMARY KEY AUTOINCREMENT,
    full_name TEXT NOT NULL,
    license_number TEXT NOT NULL UNIQUE,
    phone_number TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS rental_agreements (
    rental_agreement_id INTEGER PRIMARY KEY AUTOINCREMENT,
    client_id INTEGER NOT NULL,
    car_id INTEGER NOT NULL,
    start_date TEXT NOT NULL,
    planned_end_date TEXT NOT NULL,
    actual_end_date TEXT,
    total_amount TEXT NOT NULL,
    FOREIGN KEY (client_id) REFERENCES clients(client_id),
    FOREIGN KEY (car_id) REFERENCES cars(car_id)
);

CREATE TABLE IF NOT EXISTS rental_history (
    rental_history_id INTEGER PRIMARY KEY AUTOINCREMENT,
    client_id INTEGER NOT NULL,
    start_date TEXT NOT NULL,
    actual_end_date TEXT NOT NULL,
    total_amount TEXT NOT NULL,
    FOREIGN KEY (client_id) REFERENCES clients(client_id)
);

CREATE TABLE IF NOT EXISTS maintenances (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    car_id INTEGER NOT NULL,
    maintenance_date TEXT NOT NULL,
    description TEXT NOT NULL,
    cost TEXT NOT NULL,
    FOREIGN KEY (car_id) REFERENCES cars(car_id)
);

CREATE INDEX IF NOT EXISTS idx_cars_class ON cars(class_id);
CREATE INDEX IF NOT EXISTS idx_agreements_client ON rental_agreements(client_id);
CREATE INDEX IF NOT EXISTS idx_agreements_car ON rental_agreements(car_id);
CREATE INDEX IF NOT EXISTS idx_history_client ON rental_history(client_id);
CREATE INDEX IF NOT EXISTS idx_maintenances_car ON maintenances(car_id);
"#;

/// Fractional digits kept for every money column.
const AMOUNT_SCALE: u32 = 2;

/// Default database filename, stored in the working directory.
pub const DB_FILE: &str = ".carrental.db";

pub struct Database {
    conn: Connection,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).context("Failed to open database")?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA synchronous=NORMAL;
             PRAGMA temp_store=MEMORY;",
        )
        .context("Failed to set pragmas")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to create schema")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for tests and benchmarks).
    #[doc(hidden)]
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // ── Inserts ──
    //
    // The browser itself never writes; these exist for seeding and tests.
    // Each returns the identity assigned by SQLite.

    pub fn insert_car_class(&self, name: &str, description: &str) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO car_classes (name, description) VALUES (?1, ?2)",
                params![name, description],
            )
            .with_context(|| format!("Failed to insert car class '{name}'"))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_client(&self, client: &Client) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO clients (full_name, license_number, phone_number)
                 VALUES (?1, ?2, ?3)",
                params![client.full_name, client.license_number, client.phone_number],
            )
            .with_context(|| format!("Failed to insert client '{}'", client.full_name))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_car(&self, car: &Car) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO cars
                 (class_id, brand, model, license_plate, year, rental_cost_per_day, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    car.class_id,
                    car.brand,
                    car.model,
                    car.license_plate,
                    car.year,
                    amount_text(car.rental_cost_per_day),
                    car.status,
                ],
            )
            .with_context(|| format!("Failed to insert car '{}'", car.license_plate))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_rental_agreement(&self, agreement: &RentalAgreement) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO rental_agreements
                 (client_id, car_id, start_date, planned_end_date, actual_end_date, total_amount)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    agreement.client_id,
                    agreement.car_id,
                    agreement.start_date,
                    agreement.planned_end_date,
                    agreement.actual_end_date,
                    amount_text(agreement.total_amount),
                ],
            )
            .context("Failed to insert rental agreement")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_rental_history(&self, entry: &RentalHistory) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO rental_history
                 (client_id, start_date, actual_end_date, total_amount)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    entry.client_id,
                    entry.start_date,
                    entry.actual_end_date,
                    amount_text(entry.total_amount),
                ],
            )
            .context("Failed to insert rental history entry")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_maintenance(&self, record: &Maintenance) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO maintenances (car_id, maintenance_date, description, cost)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.car_id,
                    record.maintenance_date,
                    record.description,
                    amount_text(record.cost),
                ],
            )
            .context("Failed to insert maintenance record")?;
        Ok(self.conn.last_insert_rowid())
    }

    // ── Queries ──

    /// First `limit` rows of `R`'s table ordered by its identity column.
    pub fn first_n<R: Record>(&self, limit: u32, order: SortOrder) -> rusqlite::Result<Vec<R>> {
        let kind = R::KIND;
        let direction = match order {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        };
        let sql = format!(
            "SELECT {columns} FROM {table} ORDER BY {id} {direction} LIMIT ?1",
            columns = R::COLUMNS,
            table = kind.table(),
            id = kind.id_column(),
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![limit], |row| R::from_row(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        debug!(kind = %kind, limit, ?order, rows = rows.len(), "bounded query");
        Ok(rows)
    }

    /// Number of rows per dataset table.
    pub fn stats(&self) -> Result<TableStats> {
        let mut tables = Vec::with_capacity(DatasetKind::ALL.len());
        for kind in DatasetKind::ALL {
            let rows: u32 = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", kind.table()), [], |row| {
                    row.get(0)
                })
                .with_context(|| format!("Failed to count {}", kind.table()))?;
            tables.push((kind, rows));
        }
        Ok(TableStats { tables })
    }

    /// Returns `true` if no dataset table has any row.
    pub fn is_empty(&self) -> Result<bool> {
        for kind in DatasetKind::ALL {
            let any = self
                .conn
                .query_row(&format!("SELECT 1 FROM {} LIMIT 1", kind.table()), [], |_| {
                    Ok(())
                })
                .optional()?;
            if any.is_some() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Run `f` inside a single transaction.
    pub fn transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(self)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Money as TEXT with exactly [`AMOUNT_SCALE`] fractional digits, half away from zero.
fn amount_text(amount: Decimal) -> String {
    let mut amount =
        amount.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero);
    amount.rescale(AMOUNT_SCALE);
    amount.to_string()
}

/// The process-wide gateway: one connection, serialized behind a mutex.
impl Gateway for Mutex<Database> {
    fn first_n<R: Record>(&self, limit: u32, order: SortOrder) -> Result<Vec<R>, StoreError> {
        let db = self
            .lock()
            .map_err(|_| StoreError::Unavailable("database lock poisoned".into()))?;
        Ok(db.first_n::<R>(limit, order)?)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableStats {
    pub tables: Vec<(DatasetKind, u32)>,
}
