use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rusqlite::types::Type;
use serde::Serialize;

/// The six entity categories the browser serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    Client,
    Car,
    CarClass,
    RentalAgreement,
    RentalHistory,
    Maintenance,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 6] = [
        Self::Client,
        Self::Car,
        Self::CarClass,
        Self::RentalAgreement,
        Self::RentalHistory,
        Self::Maintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Car => "car",
            Self::CarClass => "car_class",
            Self::RentalAgreement => "rental_agreement",
            Self::RentalHistory => "rental_history",
            Self::Maintenance => "maintenance",
        }
    }

    /// Backing table holding records of this kind.
    pub fn table(&self) -> &'static str {
        match self {
            Self::Client => "clients",
            Self::Car => "cars",
            Self::CarClass => "car_classes",
            Self::RentalAgreement => "rental_agreements",
            Self::RentalHistory => "rental_history",
            Self::Maintenance => "maintenances",
        }
    }

    /// Identity column; pages are ordered by it.
    pub fn id_column(&self) -> &'static str {
        match self {
            Self::Client => "client_id",
            Self::Car => "car_id",
            Self::CarClass => "class_id",
            Self::RentalAgreement => "rental_agreement_id",
            Self::RentalHistory => "rental_history_id",
            Self::Maintenance => "id",
        }
    }

    /// Fixed cache key used by the listing page of this kind.
    pub fn page_key(&self) -> &'static str {
        match self {
            Self::Client => "Clients20",
            Self::Car => "Cars20",
            Self::CarClass => "Class20",
            Self::RentalAgreement => "RentalAgreements20",
            Self::RentalHistory => "rentalHistories20",
            Self::Maintenance => "maintenances20",
        }
    }

    /// Human-readable plural, used in listings and "not found" messages.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Client => "clients",
            Self::Car => "cars",
            Self::CarClass => "car classes",
            Self::RentalAgreement => "rental agreements",
            Self::RentalHistory => "rental history entries",
            Self::Maintenance => "maintenance records",
        }
    }
}

impl std::str::FromStr for DatasetKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "client" | "clients" => Ok(Self::Client),
            "car" | "cars" => Ok(Self::Car),
            "car_class" | "car_classes" => Ok(Self::CarClass),
            "rental_agreement" | "rental_agreements" => Ok(Self::RentalAgreement),
            "rental_history" | "rental_histories" => Ok(Self::RentalHistory),
            "maintenance" | "maintenances" => Ok(Self::Maintenance),
            _ => Err(anyhow::anyhow!("unknown dataset: '{s}'")),
        }
    }
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Client {
    pub client_id: i64,
    pub full_name: String,
    pub license_number: String,
    pub phone_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CarClass {
    pub class_id: i64,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Car {
    pub car_id: i64,
    pub class_id: i64,
    pub brand: String,
    pub model: String,
    pub license_plate: String,
    pub year: i32,
    pub rental_cost_per_day: Decimal,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RentalAgreement {
    pub rental_agreement_id: i64,
    pub client_id: i64,
    pub car_id: i64,
    pub start_date: NaiveDate,
    pub planned_end_date: NaiveDate,
    pub actual_end_date: Option<NaiveDate>,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RentalHistory {
    pub rental_history_id: i64,
    pub client_id: i64,
    pub start_date: NaiveDate,
    pub actual_end_date: NaiveDate,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Maintenance {
    pub id: i64,
    pub car_id: i64,
    pub maintenance_date: NaiveDate,
    pub description: String,
    pub cost: Decimal,
}

/// A page of records of exactly one dataset kind.
///
/// Serializes as a plain JSON array of its records.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Page {
    Clients(Arc<[Client]>),
    Cars(Arc<[Car]>),
    CarClasses(Arc<[CarClass]>),
    RentalAgreements(Arc<[RentalAgreement]>),
    RentalHistory(Arc<[RentalHistory]>),
    Maintenances(Arc<[Maintenance]>),
}

impl Page {
    pub fn kind(&self) -> DatasetKind {
        match self {
            Self::Clients(_) => DatasetKind::Client,
            Self::Cars(_) => DatasetKind::Car,
            Self::CarClasses(_) => DatasetKind::CarClass,
            Self::RentalAgreements(_) => DatasetKind::RentalAgreement,
            Self::RentalHistory(_) => DatasetKind::RentalHistory,
            Self::Maintenances(_) => DatasetKind::Maintenance,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Clients(rows) => rows.len(),
            Self::Cars(rows) => rows.len(),
            Self::CarClasses(rows) => rows.len(),
            Self::RentalAgreements(rows) => rows.len(),
            Self::RentalHistory(rows) => rows.len(),
            Self::Maintenances(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A record type served by the page cache.
///
/// Ties a Rust type to its [`DatasetKind`], its SQL column list and its
/// [`Page`] variant, so one generic cache path handles all six kinds.
pub trait Record: Clone + Send + Sync + Sized + 'static {
    const KIND: DatasetKind;

    /// Columns selected by the gateway, in the order `from_row` reads them.
    const COLUMNS: &'static str;

    fn id(&self) -> i64;

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self>;

    fn into_page(rows: Arc<[Self]>) -> Page;

    /// Borrow the rows back out of a page; `None` if the page holds another kind.
    fn from_page(page: &Page) -> Option<Arc<[Self]>>;
}

impl Record for Client {
    const KIND: DatasetKind = DatasetKind::Client;
    const COLUMNS: &'static str = "client_id, full_name, license_number, phone_number";

    fn id(&self) -> i64 {
        self.client_id
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            client_id: row.get(0)?,
            full_name: row.get(1)?,
            license_number: row.get(2)?,
            phone_number: row.get(3)?,
        })
    }

    fn into_page(rows: Arc<[Self]>) -> Page {
        Page::Clients(rows)
    }

    fn from_page(page: &Page) -> Option<Arc<[Self]>> {
        match page {
            Page::Clients(rows) => Some(Arc::clone(rows)),
            _ => None,
        }
    }
}

impl Record for CarClass {
    const KIND: DatasetKind = DatasetKind::CarClass;
    const COLUMNS: &'static str = "class_id, name, description";

    fn id(&self) -> i64 {
        self.class_id
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            class_id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
        })
    }

    fn into_page(rows: Arc<[Self]>) -> Page {
        Page::CarClasses(rows)
    }

    fn from_page(page: &Page) -> Option<Arc<[Self]>> {
        match page {
            Page::CarClasses(rows) => Some(Arc::clone(rows)),
            _ => None,
        }
    }
}

impl Record for Car {
    const KIND: DatasetKind = DatasetKind::Car;
    const COLUMNS: &'static str =
        "car_id, class_id, brand, model, license_plate, year, rental_cost_per_day, status";

    fn id(&self) -> i64 {
        self.car_id
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            car_id: row.get(0)?,
            class_id: row.get(1)?,
            brand: row.get(2)?,
            model: row.get(3)?,
            license_plate: row.get(4)?,
            year: row.get(5)?,
            rental_cost_per_day: decimal_at(row, 6)?,
            status: row.get(7)?,
        })
    }

    fn into_page(rows: Arc<[Self]>) -> Page {
        Page::Cars(rows)
    }

    fn from_page(page: &Page) -> Option<Arc<[Self]>> {
        match page {
            Page::Cars(rows) => Some(Arc::clone(rows)),
            _ => None,
        }
    }
}

impl Record for RentalAgreement {
    const KIND: DatasetKind = DatasetKind::RentalAgreement;
    const COLUMNS: &'static str = "rental_agreement_id, client_id, car_id, start_date,
         planned_end_date, actual_end_date, total_amount";

    fn id(&self) -> i64 {
        self.rental_agreement_id
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            rental_agreement_id: row.get(0)?,
            client_id: row.get(1)?,
            car_id: row.get(2)?,
            start_date: row.get(3)?,
            planned_end_date: row.get(4)?,
            actual_end_date: row.get(5)?,
            total_amount: decimal_at(row, 6)?,
        })
    }

    fn into_page(rows: Arc<[Self]>) -> Page {
        Page::RentalAgreements(rows)
    }

    fn from_page(page: &Page) -> Option<Arc<[Self]>> {
        match page {
            Page::RentalAgreements(rows) => Some(Arc::clone(rows)),
            _ => None,
        }
    }
}

impl Record for RentalHistory {
    const KIND: DatasetKind = DatasetKind::RentalHistory;
    const COLUMNS: &'static str =
        "rental_history_id, client_id, start_date, actual_end_date, total_amount";

    fn id(&self) -> i64 {
        self.rental_history_id
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            rental_history_id: row.get(0)?,
            client_id: row.get(1)?,
            start_date: row.get(2)?,
            actual_end_date: row.get(3)?,
            total_amount: decimal_at(row, 4)?,
        })
    }

    fn into_page(rows: Arc<[Self]>) -> Page {
        Page::RentalHistory(rows)
    }

    fn from_page(page: &Page) -> Option<Arc<[Self]>> {
        match page {
            Page::RentalHistory(rows) => Some(Arc::clone(rows)),
            _ => None,
        }
    }
}

impl Record for Maintenance {
    const KIND: DatasetKind = DatasetKind::Maintenance;
    const COLUMNS: &'static str = "id, car_id, maintenance_date, description, cost";

    fn id(&self) -> i64 {
        self.id
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            car_id: row.get(1)?,
            maintenance_date: row.get(2)?,
            description: row.get(3)?,
            cost: decimal_at(row, 4)?,
        })
    }

    fn into_page(rows: Arc<[Self]>) -> Page {
        Page::Maintenances(rows)
    }

    fn from_page(page: &Page) -> Option<Arc<[Self]>> {
        match page {
            Page::Maintenances(rows) => Some(Arc::clone(rows)),
            _ => None,
        }
    }
}

/// Amounts are stored as TEXT so no precision is lost in SQLite's REAL.
fn decimal_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    text.parse::<Decimal>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
