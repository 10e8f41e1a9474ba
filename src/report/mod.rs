use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use crate::data::cache::CoordinateCache;
use crate::data::models::{AddressRecord, Coordinate, Pincode, PincodeLocation, PincodeSummary};
use crate::utils::{median, mode};

pub mod stats;
pub mod tiers;

/// Restricts a view to one registration year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YearFilter {
    AllYears,
    /// Undated records never match a specific year.
    Year(i32),
}

impl YearFilter {
    pub fn matches(&self, record: &AddressRecord) -> bool {
        match self {
            YearFilter::AllYears => true,
            YearFilter::Year(year) => record.year() == Some(*year),
        }
    }
}

/// A record paired with the cache entry for its pincode.
#[derive(Debug, Clone, Copy)]
pub struct JoinedRecord<'a> {
    pub record: &'a AddressRecord,
    pub location: &'a PincodeLocation,
    pub coordinate: Coordinate,
}

/// A joined record with its locality fallback applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveRecord<'a> {
    pub pincode: Pincode,
    pub coordinate: Coordinate,
    pub city: Option<&'a str>,
    pub state: Option<&'a str>,
}

/// Cache label when present, otherwise the label the source system supplied.
pub fn effective_locality<'a>(cached: Option<&'a str>, raw: Option<&'a str>) -> Option<&'a str> {
    cached.or(raw)
}

impl<'a> JoinedRecord<'a> {
    pub fn with_locality_fallback(&self) -> EffectiveRecord<'a> {
        EffectiveRecord {
            pincode: self.record.pincode,
            coordinate: self.coordinate,
            city: effective_locality(self.location.city.as_deref(), self.record.raw_city.as_deref()),
            state: effective_locality(
                self.location.state.as_deref(),
                self.record.raw_state.as_deref(),
            ),
        }
    }
}

/// Pairs each record with its cache entry.
///
/// Records whose pincode is not cached, or cached without a coordinate, are left out.
pub fn join<'a, I>(records: I, cache: &'a CoordinateCache) -> Vec<JoinedRecord<'a>>
where
    I: IntoIterator<Item = &'a AddressRecord>,
{
    records
        .into_iter()
        .filter_map(|record| {
            let location = cache.get(record.pincode)?;
            let coordinate = location.coordinate?;
            Some(JoinedRecord {
                record,
                location,
                coordinate,
            })
        })
        .collect()
}

/// Groups effective records by pincode into summaries, largest group first.
///
/// Percentages are shares of `records.len()`, i.e. of the rows that survived the join.
pub fn aggregate(records: &[EffectiveRecord]) -> Vec<PincodeSummary> {
    let total = records.len();
    let mut groups: BTreeMap<Pincode, Vec<&EffectiveRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.pincode).or_default().push(record);
    }

    let mut summaries: Vec<PincodeSummary> = groups
        .into_iter()
        .filter_map(|(pincode, group)| {
            let mut lats: Vec<f64> = group.iter().map(|r| r.coordinate.lat).collect();
            let mut lons: Vec<f64> = group.iter().map(|r| r.coordinate.lon).collect();
            let customer_count = group.len();

            Some(PincodeSummary {
                pincode,
                customer_count,
                latitude: median(&mut lats)?,
                longitude: median(&mut lons)?,
                dominant_city: mode(group.iter().map(|r| r.city)).map(str::to_owned),
                dominant_state: mode(group.iter().map(|r| r.state)).map(str::to_owned),
                percentage: customer_count as f64 / total as f64 * 100.0,
            })
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.customer_count
            .cmp(&a.customer_count)
            .then(a.pincode.cmp(&b.pincode))
    });
    summaries
}

/// Full view computation: filter, join, locality fallback, aggregate.
pub fn summarize(
    records: &[AddressRecord],
    cache: &CoordinateCache,
    filter: YearFilter,
) -> Vec<PincodeSummary> {
    let joined = join(records.iter().filter(|r| filter.matches(r)), cache);
    let effective: Vec<EffectiveRecord> = joined
        .iter()
        .map(JoinedRecord::with_locality_fallback)
        .collect();
    aggregate(&effective)
}

/// Row counts before and after the join, for surfacing rows lost to unresolved pincodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinDiagnostics {
    pub input_rows: usize,
    pub joined_rows: usize,
    pub unresolved_rows: usize,
    pub unresolved_pincodes: BTreeSet<Pincode>,
}

pub fn diagnose(
    records: &[AddressRecord],
    cache: &CoordinateCache,
    filter: YearFilter,
) -> JoinDiagnostics {
    let mut diagnostics = JoinDiagnostics::default();
    for record in records.iter().filter(|r| filter.matches(r)) {
        diagnostics.input_rows += 1;
        let resolved = cache
            .get(record.pincode)
            .map_or(false, |location| location.coordinate.is_some());
        if resolved {
            diagnostics.joined_rows += 1;
        } else {
            diagnostics.unresolved_rows += 1;
            diagnostics.unresolved_pincodes.insert(record.pincode);
        }
    }
    diagnostics
}

/// Writes summaries as CSV for the map renderer.
pub fn write_summaries<W: Write>(summaries: &[PincodeSummary], writer: W) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(writer);
    for summary in summaries {
        writer.serialize(summary)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn record(pincode: u32, city: Option<&str>, year: Option<i32>) -> AddressRecord {
        AddressRecord {
            pincode: Pincode(pincode),
            raw_city: city.map(str::to_owned),
            raw_state: None,
            registration_date: year.and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1)),
        }
    }

    fn effective(pincode: u32, lat: f64, lon: f64, city: Option<&'static str>) -> EffectiveRecord<'static> {
        EffectiveRecord {
            pincode: Pincode(pincode),
            coordinate: Coordinate::new(lat, lon),
            city,
            state: Some("State"),
        }
    }

    fn cache_with(entries: Vec<PincodeLocation>) -> CoordinateCache {
        let mut cache = CoordinateCache::new();
        cache.upsert(entries);
        cache
    }

    #[test]
    fn test_median_coordinate_odd_group() {
        let summaries = aggregate(&[
            effective(110001, 28.0, 77.0, None),
            effective(110001, 28.6, 77.4, None),
            effective(110001, 28.2, 77.2, None),
        ]);

        assert_eq!(summaries[0].latitude, 28.2);
        assert_eq!(summaries[0].longitude, 77.2);
    }

    #[test]
    fn test_median_coordinate_even_group() {
        let summaries = aggregate(&[
            effective(110001, 28.0, 77.0, None),
            effective(110001, 29.0, 78.0, None),
            effective(110001, 28.5, 77.5, None),
            effective(110001, 30.0, 80.0, None),
        ]);

        assert_eq!(summaries[0].latitude, 28.75);
        assert_eq!(summaries[0].longitude, 77.75);
    }

    #[test]
    fn test_dominant_city_is_a_most_frequent_value() {
        let summaries = aggregate(&[
            effective(110001, 28.6, 77.2, Some("Delhi")),
            effective(110001, 28.6, 77.2, Some("New Delhi")),
            effective(110001, 28.6, 77.2, Some("New Delhi")),
            effective(110001, 28.6, 77.2, None),
        ]);
        assert_eq!(summaries[0].dominant_city.as_deref(), Some("New Delhi"));

        let tied = aggregate(&[
            effective(560001, 12.9, 77.5, Some("Bengaluru")),
            effective(560001, 12.9, 77.5, Some("Bangalore")),
            effective(560001, 12.9, 77.5, Some("Mysuru")),
            effective(560001, 12.9, 77.5, Some("Bangalore")),
            effective(560001, 12.9, 77.5, Some("Bengaluru")),
        ]);
        let city = tied[0].dominant_city.as_deref();
        assert!(city == Some("Bengaluru") || city == Some("Bangalore"));
    }

    #[test]
    fn test_sort_by_count_then_pincode() {
        let summaries = aggregate(&[
            effective(600001, 13.0, 80.2, None),
            effective(560001, 12.9, 77.5, None),
            effective(110001, 28.6, 77.2, None),
            effective(110001, 28.6, 77.2, None),
        ]);

        let order: Vec<_> = summaries.iter().map(|s| s.pincode.value()).collect();
        assert_eq!(order, vec![110001, 560001, 600001]);
    }

    #[test]
    fn test_empty_view_yields_no_summaries() {
        assert!(aggregate(&[]).is_empty());
        assert!(summarize(&[], &CoordinateCache::new(), YearFilter::AllYears).is_empty());
    }

    #[test]
    fn test_locality_fallback_applies_after_join() {
        let cache = cache_with(vec![
            PincodeLocation::new(Pincode(110001), Coordinate::new(28.6, 77.2))
                .with_locality(None, Some("Delhi")),
            PincodeLocation::new(Pincode(560001), Coordinate::new(12.97, 77.59))
                .with_locality(Some("Bengaluru"), Some("Karnataka")),
        ]);
        let records = vec![
            record(110001, Some("Delhi NCR"), None),
            record(560001, Some("Bangalore"), None),
        ];

        let summaries = summarize(&records, &cache, YearFilter::AllYears);

        let delhi = summaries.iter().find(|s| s.pincode == Pincode(110001)).unwrap();
        assert_eq!(delhi.dominant_city.as_deref(), Some("Delhi NCR"));
        assert_eq!(delhi.dominant_state.as_deref(), Some("Delhi"));
        let bangalore = summaries.iter().find(|s| s.pincode == Pincode(560001)).unwrap();
        assert_eq!(bangalore.dominant_city.as_deref(), Some("Bengaluru"));
    }

    #[test]
    fn test_effective_locality() {
        assert_eq!(effective_locality(Some("a"), Some("b")), Some("a"));
        assert_eq!(effective_locality(None, Some("b")), Some("b"));
        assert_eq!(effective_locality(None, None), None);
    }

    #[test]
    fn test_year_filter_and_denominator() {
        let cache = cache_with(vec![
            PincodeLocation::new(Pincode(110001), Coordinate::new(28.6, 77.2)),
            PincodeLocation::new(Pincode(560001), Coordinate::new(12.97, 77.59)),
        ]);
        let records = vec![
            record(110001, None, Some(2021)),
            record(110001, None, Some(2022)),
            record(560001, None, Some(2022)),
            record(560001, None, None),
            record(999999, None, Some(2022)),
        ];

        let view = summarize(&records, &cache, YearFilter::Year(2022));
        assert_eq!(view.len(), 2);
        assert_eq!(view.iter().map(|s| s.customer_count).sum::<usize>(), 2);
        assert!(view.iter().all(|s| (s.percentage - 50.0).abs() < 1e-9));

        let all = summarize(&records, &cache, YearFilter::AllYears);
        assert_eq!(all.iter().map(|s| s.customer_count).sum::<usize>(), 4);
    }

    #[test]
    fn test_entry_without_coordinate_is_not_joined() {
        let mut bare = PincodeLocation::new(Pincode(110001), Coordinate::new(0.0, 0.0));
        bare.coordinate = None;
        let cache = cache_with(vec![bare]);
        let records = vec![record(110001, Some("Delhi"), None)];

        assert!(join(&records, &cache).is_empty());
        let diagnostics = diagnose(&records, &cache, YearFilter::AllYears);
        assert_eq!(diagnostics.unresolved_rows, 1);
    }

    #[test]
    fn test_diagnose_counts_unresolved() {
        let cache = cache_with(vec![PincodeLocation::new(
            Pincode(110001),
            Coordinate::new(28.6, 77.2),
        )]);
        let records = vec![
            record(110001, None, Some(2021)),
            record(222222, None, Some(2021)),
            record(222222, None, Some(2021)),
            record(333333, None, None),
        ];

        let diagnostics = diagnose(&records, &cache, YearFilter::AllYears);
        assert_eq!(diagnostics.input_rows, 4);
        assert_eq!(diagnostics.joined_rows, 1);
        assert_eq!(diagnostics.unresolved_rows, 3);
        assert_eq!(
            diagnostics.unresolved_pincodes.into_iter().collect::<Vec<_>>(),
            vec![Pincode(222222), Pincode(333333)]
        );
    }

    #[test]
    fn test_write_summaries_csv() {
        let summaries = aggregate(&[effective(110001, 28.6, 77.2, Some("New Delhi"))]);
        let mut out = Vec::new();
        write_summaries(&summaries, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("pincode,customer_count,latitude,longitude,dominant_city,dominant_state,percentage")
        );
        assert_eq!(lines.next(), Some("110001,1,28.6,77.2,New Delhi,State,100.0"));
    }
}
