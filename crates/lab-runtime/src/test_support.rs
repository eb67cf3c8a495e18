use chrono::{TimeZone, Utc};
use lab_core::{Catalog, Timestamp};
use std::path::PathBuf;

pub fn catalog() -> Catalog {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../assets/catalog.yaml");
    Catalog::load(path).unwrap()
}

pub fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}
