use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;

use crate::data::error::LoadError;
use crate::data::models::{non_blank, AddressRecord, Pincode};

/// Day/month/two-digit-year, e.g. `14/03/21`.
pub const REGISTRATION_DATE_FORMAT: &str = "%d/%m/%y";

lazy_static! {
    static ref INTEGRAL_TEXT: Regex =
        Regex::new(r"^(\d+)(?:\.0*)?$").expect("Could not create regex");
}

pub const PINCODE_COLUMN: &str = "CPA_PIN_CODE";
pub const REGISTRATION_DATE_COLUMN: &str = "RegistrationDate";
pub const CITY_COLUMN: &str = "CPA_ADDR_CITY";
/// Preferred first; `StateName` is only read when `CPA_ADDR_STATE` is absent.
pub const STATE_COLUMNS: [&str; 2] = ["CPA_ADDR_STATE", "StateName"];

/// A row as it comes out of the address export. Every column is optional.
#[derive(Debug, Default, Clone)]
pub struct RawAddressRow {
    pub pin_code: Option<String>,
    pub registration_date: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
}

/// Positions of the known columns in one export's header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnIndex {
    pin_code: Option<usize>,
    registration_date: Option<usize>,
    city: Option<usize>,
    state: Option<usize>,
}

impl ColumnIndex {
    fn resolve(headers: &csv::ByteRecord) -> Self {
        let find = |name: &str| headers.iter().position(|h| h == name.as_bytes());
        ColumnIndex {
            pin_code: find(PINCODE_COLUMN),
            registration_date: find(REGISTRATION_DATE_COLUMN),
            city: find(CITY_COLUMN),
            state: STATE_COLUMNS.iter().find_map(|name| find(*name)),
        }
    }

    /// Text fields are decoded lossily so a bad byte never costs the row.
    fn row(&self, record: &csv::ByteRecord) -> RawAddressRow {
        let field = |index: Option<usize>| {
            index
                .and_then(|i| record.get(i))
                .filter(|bytes| !bytes.is_empty())
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        };
        RawAddressRow {
            pin_code: field(self.pin_code),
            registration_date: field(self.registration_date),
            city: field(self.city),
            state: field(self.state),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub rows_read: usize,
    pub invalid_pincode: usize,
    pub undated: usize,
}

impl LoadReport {
    pub fn rows_kept(&self) -> usize {
        self.rows_read - self.invalid_pincode
    }
}

#[derive(Debug, Default, Clone)]
pub struct CleanedRecords {
    pub records: Vec<AddressRecord>,
    pub report: LoadReport,
}

/// Coerces pincode text to the canonical key.
///
/// Integer text and integral decimal text (`"110001.0"`, `"1.1e5"`) are accepted.
/// Anything negative, fractional, non-finite or wider than `u32` yields `None`.
pub fn parse_pincode(raw: &str) -> Option<Pincode> {
    let trimmed = raw.trim();
    if let Some(caps) = INTEGRAL_TEXT.captures(trimmed) {
        return caps[1].parse::<u32>().ok().map(Pincode);
    }

    let value = trimmed.parse::<f64>().ok()?;
    if !value.is_finite() || value.fract() != 0.0 || value < 0.0 || value > u32::MAX as f64 {
        return None;
    }
    Some(Pincode(value as u32))
}

pub fn parse_registration_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), REGISTRATION_DATE_FORMAT).ok()
}

/// Returns `None` when the row has no usable pincode.
pub fn clean_row(row: &RawAddressRow) -> Option<AddressRecord> {
    let pincode = row.pin_code.as_deref().and_then(parse_pincode)?;
    let registration_date = row
        .registration_date
        .as_deref()
        .and_then(parse_registration_date);

    Some(AddressRecord {
        pincode,
        raw_city: non_blank(row.city.as_deref()),
        raw_state: non_blank(row.state.as_deref()),
        registration_date,
    })
}

pub fn clean_rows<'a, I>(rows: I) -> CleanedRecords
where
    I: IntoIterator<Item = &'a RawAddressRow>,
{
    let mut cleaned = CleanedRecords::default();
    for row in rows {
        cleaned.push(row);
    }
    cleaned
}

impl CleanedRecords {
    fn push(&mut self, row: &RawAddressRow) {
        self.report.rows_read += 1;
        match clean_row(row) {
            Some(record) => {
                if record.registration_date.is_none() {
                    self.report.undated += 1;
                }
                self.records.push(record);
            }
            None => self.report.invalid_pincode += 1,
        }
    }
}

/// Reads and cleans address rows from any CSV source.
///
/// Only an unusable pincode drops a row. Short rows, unknown columns and
/// undecodable text leave the affected fields empty; only I/O faults abort.
pub fn read_addresses<R: Read>(reader: R) -> Result<CleanedRecords, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let columns = ColumnIndex::resolve(reader.byte_headers()?);
    if columns.pin_code.is_none() {
        warn!("Address source has no {} column, every row will be dropped", PINCODE_COLUMN);
    }

    let mut cleaned = CleanedRecords::default();
    let mut record = csv::ByteRecord::new();
    while reader.read_byte_record(&mut record)? {
        cleaned.push(&columns.row(&record));
    }

    Ok(cleaned)
}

pub fn load_addresses<P: AsRef<Path>>(path: P) -> Result<CleanedRecords, LoadError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| LoadError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let cleaned = read_addresses(file)?;
    let report = &cleaned.report;
    info!(
        "Loaded {} address records from {} ({} invalid pincodes, {} undated)",
        report.rows_kept(),
        path.display(),
        report.invalid_pincode,
        report.undated
    );
    Ok(cleaned)
}

/// Distinct pincodes, ascending.
pub fn observed_pincodes(records: &[AddressRecord]) -> BTreeSet<Pincode> {
    records.iter().map(|r| r.pincode).collect()
}

/// Distinct registration years, ascending. Undated records contribute nothing.
pub fn available_years(records: &[AddressRecord]) -> Vec<i32> {
    records
        .iter()
        .filter_map(AddressRecord::year)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
