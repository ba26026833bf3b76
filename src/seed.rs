use anyhow::Result;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::db::Database;
use crate::types::{Car, Client, Maintenance, RentalAgreement, RentalHistory};

const CLASSES: &[(&str, &str)] = &[
    ("Economy", "Compact city cars"),
    ("Business", "Comfortable sedans for longer trips"),
    ("SUV", "All-wheel drive, room for five"),
];

const CLIENTS: &[(&str, &str, &str)] = &[
    ("Ivan Sokolov", "77 01 123456", "+7 900 111-22-33"),
    ("Maria Kuznetsova", "77 02 234567", "+7 900 222-33-44"),
    ("Pavel Orlov", "77 03 345678", "+7 900 333-44-55"),
    ("Elena Volkova", "77 04 456789", "+7 900 444-55-66"),
    ("Dmitry Lebedev", "77 05 567890", "+7 900 555-66-77"),
    ("Olga Morozova", "77 06 678901", "+7 900 666-77-88"),
];

/// (class index, brand, model, plate, year, cost per day in cents, status)
const CARS: &[(usize, &str, &str, &str, i32, i64, &str)] = &[
    (0, "Lada", "Vesta", "A101AA77", 2021, 250000, "available"),
    (0, "Kia", "Rio", "A102AA77", 2020, 280000, "rented"),
    (0, "Hyundai", "Solaris", "A103AA77", 2022, 290000, "available"),
    (1, "Toyota", "Camry", "B201BB77", 2021, 550000, "rented"),
    (1, "Skoda", "Superb", "B202BB77", 2019, 480000, "maintenance"),
    (2, "Toyota", "RAV4", "C301CC77", 2022, 620000, "available"),
    (2, "Kia", "Sportage", "C302CC77", 2021, 580000, "available"),
    (2, "Volkswagen", "Tiguan", "C303CC77", 2020, 600000, "rented"),
];

#[derive(Debug, Clone, Default, Serialize)]
pub struct SeedResult {
    pub skipped: bool,
    pub car_classes: u32,
    pub clients: u32,
    pub cars: u32,
    pub rental_agreements: u32,
    pub rental_history: u32,
    pub maintenances: u32,
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

/// Fill an empty database with a small demo fleet. A non-empty database is left alone.
pub fn seed_demo(db: &Database) -> Result<SeedResult> {
    if !db.is_empty()? {
        warn!("database already has rows, skipping seed");
        return Ok(SeedResult {
            skipped: true,
            ..SeedResult::default()
        });
    }

    let result = db.transaction(|db| {
        let mut result = SeedResult::default();

        let mut class_ids = Vec::with_capacity(CLASSES.len());
        for (name, description) in CLASSES {
            class_ids.push(db.insert_car_class(name, description)?);
            result.car_classes += 1;
        }

        let mut client_ids = Vec::with_capacity(CLIENTS.len());
        for (full_name, license_number, phone_number) in CLIENTS {
            client_ids.push(db.insert_client(&Client {
                client_id: 0,
                full_name: full_name.to_string(),
                license_number: license_number.to_string(),
                phone_number: phone_number.to_string(),
            })?);
            result.clients += 1;
        }

        let mut car_ids = Vec::with_capacity(CARS.len());
        for &(class, brand, model, plate, year, cents, status) in CARS {
            car_ids.push(db.insert_car(&Car {
                car_id: 0,
                class_id: class_ids[class],
                brand: brand.to_string(),
                model: model.to_string(),
                license_plate: plate.to_string(),
                year,
                rental_cost_per_day: Decimal::new(cents, 2),
                status: status.to_string(),
            })?);
            result.cars += 1;
        }

        let agreements = [
            (0, 1, date(2024, 5, 2), date(2024, 5, 9), None, 1_960_000),
            (1, 3, date(2024, 5, 10), date(2024, 5, 12), None, 1_100_000),
            (2, 7, date(2024, 4, 20), date(2024, 4, 27), Some(date(2024, 4, 28)), 4_800_000),
            (3, 0, date(2024, 3, 1), date(2024, 3, 3), Some(date(2024, 3, 3)), 500_000),
        ];
        for (client, car, start, planned, actual, cents) in agreements {
            db.insert_rental_agreement(&RentalAgreement {
                rental_agreement_id: 0,
                client_id: client_ids[client],
                car_id: car_ids[car],
                start_date: start,
                planned_end_date: planned,
                actual_end_date: actual,
                total_amount: Decimal::new(cents, 2),
            })?;
            result.rental_agreements += 1;
        }

        let history = [
            (2, date(2024, 4, 20), date(2024, 4, 28), 4_800_000),
            (3, date(2024, 3, 1), date(2024, 3, 3), 500_000),
            (4, date(2023, 12, 24), date(2024, 1, 2), 5_400_000),
        ];
        for (client, start, end, cents) in history {
            db.insert_rental_history(&RentalHistory {
                rental_history_id: 0,
                client_id: client_ids[client],
                start_date: start,
                actual_end_date: end,
                total_amount: Decimal::new(cents, 2),
            })?;
            result.rental_history += 1;
        }

        let maintenance = [
            (4, date(2024, 5, 11), "Brake pads replaced", 1_250_000),
            (0, date(2024, 2, 14), "Scheduled oil change", 450_000),
            (5, date(2024, 1, 30), "Winter tyres fitted", 800_000),
        ];
        for (car, when, description, cents) in maintenance {
            db.insert_maintenance(&Maintenance {
                id: 0,
                car_id: car_ids[car],
                maintenance_date: when,
                description: description.to_string(),
                cost: Decimal::new(cents, 2),
            })?;
            result.maintenances += 1;
        }

        Ok(result)
    })?;

    info!(
        clients = result.clients,
        cars = result.cars,
        "seeded demo data"
    );
    Ok(result)
}
