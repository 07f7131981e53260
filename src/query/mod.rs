//! Label-filtered aggregation queries over the point store.
//!
//! Four families: latest value per agent, time-range retrieval,
//! counter-rate derivation, and composite fractions. All of them resolve
//! candidate series through the catalog, fetch points with one SQL
//! statement per physical table, and merge in memory, never row-by-row.

pub mod filter;
pub mod fraction;
pub mod latest;
pub mod rate;
pub mod timeseries;

pub use filter::LabelFilter;
pub use fraction::{fraction, ValueSpec};
pub use latest::latest_value;
pub use rate::{rate_timeseries, series_rates};
pub use timeseries::{timeseries, TimePoint};

/// How to reduce multiple matching series to one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggregation {
    /// No reduction. For latest-value queries with several candidates the
    /// series with the smallest id wins; for range queries every point is
    /// returned unreduced.
    #[default]
    None,
    Max,
    Min,
    Avg,
    Sum,
}

impl Aggregation {
    /// Accepts the wire spellings, including the legacy `raw`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" | "raw" => Some(Aggregation::None),
            "max" => Some(Aggregation::Max),
            "min" => Some(Aggregation::Min),
            "avg" | "mean" => Some(Aggregation::Avg),
            "sum" => Some(Aggregation::Sum),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Aggregation::None => "none",
            Aggregation::Max => "max",
            Aggregation::Min => "min",
            Aggregation::Avg => "avg",
            Aggregation::Sum => "sum",
        }
    }

    /// Reduce a non-empty value set; `None` aggregation takes the first
    /// element (callers order candidates deterministically).
    pub fn reduce(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        Some(match self {
            Aggregation::None => values[0],
            Aggregation::Max => values.iter().copied().fold(f64::MIN, f64::max),
            Aggregation::Min => values.iter().copied().fold(f64::MAX, f64::min),
            Aggregation::Avg => values.iter().sum::<f64>() / values.len() as f64,
            Aggregation::Sum => values.iter().sum(),
        })
    }
}
