use crate::data::models::{Coordinate, PincodeSummary};

/// Headline numbers for a view, derived from its summaries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewStatistics {
    pub total_customers: usize,
    pub unique_pincodes: usize,
    pub mean_per_pincode: Option<f64>,
    pub max_per_pincode: Option<usize>,
    /// Mean of the summary coordinates, used to centre the map.
    pub center: Option<Coordinate>,
}

pub fn statistics(summaries: &[PincodeSummary]) -> ViewStatistics {
    let total_customers = summaries.iter().map(|s| s.customer_count).sum();
    let unique_pincodes = summaries.len();

    let (mean_per_pincode, center) = if summaries.is_empty() {
        (None, None)
    } else {
        let n = unique_pincodes as f64;
        let lat = summaries.iter().map(|s| s.latitude).sum::<f64>() / n;
        let lon = summaries.iter().map(|s| s.longitude).sum::<f64>() / n;
        (
            Some(total_customers as f64 / n),
            Some(Coordinate::new(lat, lon)),
        )
    };

    ViewStatistics {
        total_customers,
        unique_pincodes,
        mean_per_pincode,
        max_per_pincode: summaries.iter().map(|s| s.customer_count).max(),
        center,
    }
}

/// The first `n` summaries, which are the largest given aggregation order.
pub fn top(summaries: &[PincodeSummary], n: usize) -> &[PincodeSummary] {
    &summaries[..n.min(summaries.len())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::Pincode;

    fn summary(pincode: u32, count: usize, lat: f64, lon: f64) -> PincodeSummary {
        PincodeSummary {
            pincode: Pincode(pincode),
            customer_count: count,
            latitude: lat,
            longitude: lon,
            dominant_city: None,
            dominant_state: None,
            percentage: 0.0,
        }
    }

    #[test]
    fn test_statistics() {
        let summaries = vec![summary(110001, 3, 20.0, 70.0), summary(560001, 1, 10.0, 80.0)];
        let stats = statistics(&summaries);

        assert_eq!(stats.total_customers, 4);
        assert_eq!(stats.unique_pincodes, 2);
        assert_eq!(stats.mean_per_pincode, Some(2.0));
        assert_eq!(stats.max_per_pincode, Some(3));
        assert_eq!(stats.center, Some(Coordinate::new(15.0, 75.0)));
    }

    #[test]
    fn test_statistics_empty() {
        let stats = statistics(&[]);
        assert_eq!(stats.total_customers, 0);
        assert_eq!(stats.mean_per_pincode, None);
        assert_eq!(stats.max_per_pincode, None);
        assert_eq!(stats.center, None);
    }

    #[test]
    fn test_top() {
        let summaries = vec![summary(1, 3, 0.0, 0.0), summary(2, 2, 0.0, 0.0)];
        assert_eq!(top(&summaries, 1).len(), 1);
        assert_eq!(top(&summaries, 20).len(), 2);
    }
}
