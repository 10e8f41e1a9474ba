use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data::error::CacheError;
use crate::data::loader::parse_pincode;
use crate::data::models::{non_blank, Coordinate, Pincode, PincodeLocation, Provenance};

const SNAPSHOT_COLUMNS: [&str; 8] = [
    "pincode",
    "latitude",
    "longitude",
    "city",
    "state",
    "formatted_address",
    "batch_id",
    "resolved_at",
];

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRow {
    pincode: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    formatted_address: Option<String>,
    #[serde(default)]
    batch_id: Option<Uuid>,
    #[serde(default)]
    resolved_at: Option<NaiveDateTime>,
}

impl SnapshotRow {
    fn from_location(location: &PincodeLocation) -> Self {
        SnapshotRow {
            pincode: location.pincode.to_string(),
            latitude: location.coordinate.map(|c| c.lat),
            longitude: location.coordinate.map(|c| c.lon),
            city: location.city.clone(),
            state: location.state.clone(),
            formatted_address: location.formatted_address.clone(),
            batch_id: location.provenance.map(|p| p.batch_id),
            resolved_at: location.provenance.map(|p| p.resolved_at),
        }
    }

    fn into_location(self) -> Result<PincodeLocation, CacheError> {
        let pincode = parse_pincode(&self.pincode).ok_or_else(|| CacheError::InvalidPincode {
            value: self.pincode.clone(),
        })?;

        let coordinate = match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => {
                let in_range = lat.is_finite()
                    && lon.is_finite()
                    && lat.abs() <= 90.0
                    && lon.abs() <= 180.0;
                if !in_range {
                    return Err(CacheError::InvalidCoordinate { pincode });
                }
                Some(Coordinate::new(lat, lon))
            }
            (None, None) => None,
            _ => return Err(CacheError::PartialCoordinate { pincode }),
        };

        let provenance = match (self.batch_id, self.resolved_at) {
            (Some(batch_id), Some(resolved_at)) => Some(Provenance { batch_id, resolved_at }),
            _ => None,
        };

        Ok(PincodeLocation {
            pincode,
            coordinate,
            city: non_blank(self.city.as_deref()),
            state: non_blank(self.state.as_deref()),
            formatted_address: non_blank(self.formatted_address.as_deref()),
            provenance,
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub inserted: usize,
    pub replaced: usize,
}

/// In-memory snapshot of the persisted pincode resolutions.
///
/// Holds at most one entry per pincode. Entries are kept ordered by pincode
/// so that persisting an unchanged snapshot reproduces the same bytes.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CoordinateCache {
    entries: BTreeMap<Pincode, PincodeLocation>,
}

impl CoordinateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, pincode: Pincode) -> Option<&PincodeLocation> {
        self.entries.get(&pincode)
    }

    pub fn get_all(&self) -> &BTreeMap<Pincode, PincodeLocation> {
        &self.entries
    }

    pub fn contains(&self, pincode: Pincode) -> bool {
        self.entries.contains_key(&pincode)
    }

    /// Inserts every location, replacing any entry already held for the same pincode.
    pub fn upsert<I>(&mut self, batch: I) -> UpsertOutcome
    where
        I: IntoIterator<Item = PincodeLocation>,
    {
        let mut outcome = UpsertOutcome::default();
        for location in batch {
            match self.entries.insert(location.pincode, location) {
                Some(_) => outcome.replaced += 1,
                None => outcome.inserted += 1,
            }
        }
        outcome
    }

    /// Inserts only locations for pincodes not yet held. Existing entries are untouched.
    pub fn insert_missing<I>(&mut self, batch: I) -> UpsertOutcome
    where
        I: IntoIterator<Item = PincodeLocation>,
    {
        let mut outcome = UpsertOutcome::default();
        for location in batch {
            if let Entry::Vacant(slot) = self.entries.entry(location.pincode) {
                slot.insert(location);
                outcome.inserted += 1;
            }
        }
        outcome
    }

    pub fn read_from<R: Read>(reader: R) -> Result<Self, CacheError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut cache = CoordinateCache::new();
        let mut duplicates = 0;
        for row in reader.deserialize::<SnapshotRow>() {
            let location = row?.into_location()?;
            if cache.entries.insert(location.pincode, location).is_some() {
                duplicates += 1;
            }
        }
        if duplicates > 0 {
            warn!(
                "Cache snapshot held {} duplicate pincode rows, kept the last of each",
                duplicates
            );
        }

        Ok(cache)
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), CacheError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);

        writer.write_record(SNAPSHOT_COLUMNS)?;
        for location in self.entries.values() {
            writer.serialize(SnapshotRow::from_location(location))?;
        }
        writer.flush().map_err(csv::Error::from)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| CacheError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let cache = Self::read_from(file)?;
        info!("Loaded {} cached pincodes from {}", cache.len(), path.display());
        Ok(cache)
    }

    /// An absent snapshot is a first run and yields an empty cache.
    /// A snapshot that exists but cannot be read is still an error.
    pub fn load_or_empty<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No cache snapshot at {}, starting empty", path.display());
            return Ok(CoordinateCache::new());
        }
        Self::load(path)
    }

    /// Replaces the snapshot at `path` in one step.
    ///
    /// The full snapshot is written to a sibling temporary file which is then
    /// renamed over the target, so readers see either the old or the new file.
    pub fn persist<P: AsRef<Path>>(&self, path: P) -> Result<(), CacheError> {
        let path = path.as_ref();
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        write_atomic_file(path, &bytes)?;
        info!("Persisted {} cached pincodes to {}", self.len(), path.display());
        Ok(())
    }
}

fn write_atomic_file(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let write_err = |source| CacheError::Write {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if p.as_os_str().is_empty() => PathBuf::from("."),
        Some(p) => p.to_path_buf(),
        None => return Err(CacheError::NoParent { path: path.to_path_buf() }),
    };
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| CacheError::NoParent { path: path.to_path_buf() })?;
    let tmp = parent.join(format!(".{}.tmp.{}", file_name, std::process::id()));

    let written = File::create(&tmp).and_then(|mut f| {
        f.write_all(bytes)?;
        f.sync_all()
    });
    if let Err(err) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(write_err(err));
    }

    if let Err(err) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(write_err(err));
    }
    if let Ok(dir) = File::open(&parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use tempfile::tempdir;

    use super::*;

    fn location(pincode: u32, lat: f64, lon: f64, city: Option<&str>) -> PincodeLocation {
        PincodeLocation::new(Pincode(pincode), Coordinate::new(lat, lon))
            .with_locality(city, Some("State"))
    }

    #[test]
    fn test_upsert_replaces_instead_of_duplicating() {
        let mut cache = CoordinateCache::new();
        let first = cache.upsert(vec![location(110001, 28.6, 77.2, Some("Delhi"))]);
        let second = cache.upsert(vec![location(110001, 28.61, 77.21, Some("New Delhi"))]);

        assert_eq!(first, UpsertOutcome { inserted: 1, replaced: 0 });
        assert_eq!(second, UpsertOutcome { inserted: 0, replaced: 1 });
        assert_eq!(cache.len(), 1);
        let entry = cache.get(Pincode(110001)).unwrap();
        assert_eq!(entry.city.as_deref(), Some("New Delhi"));
    }

    #[test]
    fn test_insert_missing_leaves_existing_entries() {
        let mut cache = CoordinateCache::new();
        cache.upsert(vec![location(110001, 28.6, 77.2, Some("Delhi"))]);

        let outcome = cache.insert_missing(vec![
            location(110001, 0.0, 0.0, Some("Elsewhere")),
            location(560001, 12.97, 77.59, Some("Bengaluru")),
        ]);

        assert_eq!(outcome, UpsertOutcome { inserted: 1, replaced: 0 });
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(Pincode(110001)).unwrap().city.as_deref(), Some("Delhi"));
    }

    #[test]
    fn test_persist_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pincodes.csv");

        let resolved_at = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_micro_opt(10, 30, 0, 123_456)
            .unwrap();
        let mut with_provenance = location(560001, 12.971598723, 77.594562345, None);
        with_provenance.formatted_address = Some("Bengaluru, Karnataka 560001, India".into());
        with_provenance.provenance = Some(Provenance {
            batch_id: Uuid::new_v4(),
            resolved_at,
        });

        let mut cache = CoordinateCache::new();
        cache.upsert(vec![
            location(110001, 28.6139391, 77.2090212, Some("New Delhi")),
            with_provenance,
            PincodeLocation {
                pincode: Pincode(999999),
                coordinate: None,
                city: None,
                state: None,
                formatted_address: None,
                provenance: None,
            },
        ]);

        cache.persist(&path).unwrap();
        let loaded = CoordinateCache::load(&path).unwrap();

        assert_eq!(loaded, cache);
    }

    #[test]
    fn test_persist_twice_is_byte_identical() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pincodes.csv");
        let mut cache = CoordinateCache::new();
        cache.upsert(vec![
            location(560001, 12.97, 77.59, Some("Bengaluru")),
            location(110001, 28.6, 77.2, Some("New Delhi")),
        ]);

        cache.persist(&path).unwrap();
        let first = std::fs::read(&path).unwrap();
        CoordinateCache::load(&path).unwrap().persist(&path).unwrap();
        let second = std::fs::read(&path).unwrap();

        assert_eq!(first, second);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_empty_cache_persists_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pincodes.csv");
        CoordinateCache::new().persist(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim_end(), SNAPSHOT_COLUMNS.join(","));
        assert!(CoordinateCache::load(&path).unwrap().is_empty());
    }

    #[test]
    fn test_load_or_empty_missing_file() {
        let dir = tempdir().unwrap();
        let cache = CoordinateCache::load_or_empty(dir.path().join("absent.csv")).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_load_unreadable_is_an_error() {
        let dir = tempdir().unwrap();
        // A directory exists but cannot be read as a snapshot file.
        let result = CoordinateCache::load_or_empty(dir.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_read_legacy_snapshot_without_provenance() {
        let data = "\
pincode,latitude,longitude,city,state,formatted_address
110001,28.6,77.2,New Delhi,Delhi,\"New Delhi, Delhi 110001, India\"
560001,12.97,77.59,,Karnataka,
";
        let cache = CoordinateCache::read_from(data.as_bytes()).unwrap();

        assert_eq!(cache.len(), 2);
        let bangalore = cache.get(Pincode(560001)).unwrap();
        assert_eq!(bangalore.city, None);
        assert_eq!(bangalore.state.as_deref(), Some("Karnataka"));
        assert_eq!(bangalore.provenance, None);
    }

    #[test]
    fn test_read_collapses_duplicates_to_last() {
        let data = "\
pincode,latitude,longitude,city,state
110001,28.6,77.2,Old,Delhi
110001,28.7,77.3,New,Delhi
";
        let cache = CoordinateCache::read_from(data.as_bytes()).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(Pincode(110001)).unwrap().city.as_deref(), Some("New"));
    }

    #[test]
    fn test_read_rejects_partial_coordinate() {
        let data = "pincode,latitude,longitude,city,state\n110001,28.6,,New Delhi,Delhi\n";
        let result = CoordinateCache::read_from(data.as_bytes());
        assert!(matches!(
            result,
            Err(CacheError::PartialCoordinate { pincode: Pincode(110001) })
        ));
    }

    #[test]
    fn test_read_rejects_bad_pincode() {
        let data = "pincode,latitude,longitude,city,state\nABC,28.6,77.2,,\n";
        let result = CoordinateCache::read_from(data.as_bytes());
        assert!(matches!(result, Err(CacheError::InvalidPincode { .. })));
    }
}
