use std::collections::BTreeSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use log::{info, warn};

use crate::data::error::LoadError;
use crate::data::loader::parse_pincode;
use crate::data::models::Pincode;

const PINCODE_COLUMN: &str = "CPA_PIN_CODE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMergeStats {
    pub path: PathBuf,
    pub loaded: usize,
    pub dropped: usize,
    pub unique_pincodes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub files: Vec<FileMergeStats>,
    pub columns: Vec<String>,
    pub total_records: usize,
    pub unique_pincodes: usize,
}

struct SourceRows {
    headers: StringRecord,
    rows: Vec<StringRecord>,
}

/// Concatenates several address exports into one CSV.
///
/// The output header is the union of input headers in first-seen order; cells
/// missing from a source are left empty. Rows whose pincode does not parse are
/// dropped and the pincode column is rewritten in canonical integer form.
pub fn merge_address_files<P: AsRef<Path>>(
    inputs: &[P],
    output: &Path,
) -> Result<MergeReport, LoadError> {
    let mut columns: Vec<String> = Vec::new();
    let mut sources = Vec::with_capacity(inputs.len());
    let mut files = Vec::with_capacity(inputs.len());
    let mut all_pincodes = BTreeSet::new();

    for input in inputs {
        let path = input.as_ref();
        info!("Loading {}", path.display());
        let file = File::open(path).map_err(|source| open_error(path, source))?;
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
        let headers = reader.headers()?.clone();
        let pin_index = headers
            .iter()
            .position(|h| h.trim() == PINCODE_COLUMN)
            .ok_or_else(|| LoadError::MissingColumn {
                path: path.to_path_buf(),
                column: PINCODE_COLUMN,
            })?;

        for header in headers.iter() {
            if !columns.iter().any(|c| c == header) {
                columns.push(header.to_owned());
            }
        }

        let mut rows = Vec::new();
        let mut pincodes = BTreeSet::<Pincode>::new();
        let mut dropped = 0;
        for record in reader.records() {
            let record = record?;
            match record.get(pin_index).and_then(parse_pincode) {
                Some(pincode) => {
                    pincodes.insert(pincode);
                    rows.push(with_canonical_pincode(&record, pin_index, pincode));
                }
                None => dropped += 1,
            }
        }

        if dropped > 0 {
            warn!("Dropped {} records with invalid pincodes from {}", dropped, path.display());
        }
        info!(
            "Loaded {} records ({} unique pincodes) from {}",
            rows.len(),
            pincodes.len(),
            path.display()
        );

        files.push(FileMergeStats {
            path: path.to_path_buf(),
            loaded: rows.len(),
            dropped,
            unique_pincodes: pincodes.len(),
        });
        all_pincodes.extend(pincodes);
        sources.push(SourceRows { headers, rows });
    }

    let file = File::create(output).map_err(|source| open_error(output, source))?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(&columns)?;
    let mut total_records = 0;
    for source in &sources {
        let mapping: Vec<Option<usize>> = columns
            .iter()
            .map(|c| source.headers.iter().position(|h| h == c))
            .collect();
        for row in &source.rows {
            let cells = mapping
                .iter()
                .map(|index| index.and_then(|i| row.get(i)).unwrap_or(""));
            writer.write_record(cells)?;
            total_records += 1;
        }
    }
    writer.flush().map_err(csv::Error::from)?;

    info!(
        "Merged {} files into {}: {} records, {} unique pincodes",
        files.len(),
        output.display(),
        total_records,
        all_pincodes.len()
    );

    Ok(MergeReport {
        files,
        columns,
        total_records,
        unique_pincodes: all_pincodes.len(),
    })
}

fn with_canonical_pincode(record: &StringRecord, index: usize, pincode: Pincode) -> StringRecord {
    let canonical = pincode.to_string();
    record
        .iter()
        .enumerate()
        .map(|(i, field)| if i == index { canonical.as_str() } else { field })
        .collect()
}

fn open_error(path: &Path, source: io::Error) -> LoadError {
    LoadError::Open {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::data::loader::load_addresses;

    #[test]
    fn test_merge_unions_headers_and_drops_bad_pincodes() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("Address Details.csv");
        let second = dir.path().join("TNAddress.csv");
        let output = dir.path().join("Combined_Address_Details.csv");

        std::fs::write(
            &first,
            "CPA_PIN_CODE,RegistrationDate,CPA_ADDR_CITY\n110001,14/03/21,Delhi\nABC,14/03/21,Delhi\n",
        )
        .unwrap();
        std::fs::write(
            &second,
            "CPA_ADDR_CITY,CPA_PIN_CODE,CPA_ADDR_STATE\nChennai,600001.0,Tamil Nadu\nChennai,600001,Tamil Nadu\n",
        )
        .unwrap();

        let report = merge_address_files(&[&first, &second], &output).unwrap();

        assert_eq!(report.total_records, 3);
        assert_eq!(report.unique_pincodes, 2);
        assert_eq!(
            report.columns,
            vec!["CPA_PIN_CODE", "RegistrationDate", "CPA_ADDR_CITY", "CPA_ADDR_STATE"]
        );
        assert_eq!(report.files[0].dropped, 1);
        assert_eq!(report.files[1].loaded, 2);
        assert_eq!(report.files[1].unique_pincodes, 1);

        let merged = std::fs::read_to_string(&output).unwrap();
        let lines: Vec<_> = merged.lines().collect();
        assert_eq!(lines[1], "110001,14/03/21,Delhi,");
        assert_eq!(lines[2], "600001,,Chennai,Tamil Nadu");

        let cleaned = load_addresses(&output).unwrap();
        assert_eq!(cleaned.records.len(), 3);
        assert_eq!(cleaned.records[2].raw_state.as_deref(), Some("Tamil Nadu"));
    }

    #[test]
    fn test_merge_requires_pincode_column() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("bad.csv");
        std::fs::write(&input, "City\nDelhi\n").unwrap();

        let result = merge_address_files(&[&input], &dir.path().join("out.csv"));
        assert!(matches!(result, Err(LoadError::MissingColumn { .. })));
    }

    #[test]
    fn test_merge_missing_input_is_open_error() {
        let dir = tempdir().unwrap();
        let result = merge_address_files(
            &[dir.path().join("absent.csv")],
            &dir.path().join("out.csv"),
        );
        assert!(matches!(result, Err(LoadError::Open { .. })));
    }
}
