use std::fmt;

/// Column order of every supported data file.
pub const COLUMNS: [&str; 5] = ["id", "value", "longitude", "latitude", "timestamp"];

// ---------------------------------------------------------------------------
// MeasuredValue – the `value` cell after numeric coercion
// ---------------------------------------------------------------------------

/// A measurement that either parsed as a number or did not.
///
/// `Missing` is kept distinct from a valid `0.0`: the aggregator excludes it
/// from statistics but still counts it as malformed. A `Number` is always
/// finite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeasuredValue {
    Number(f64),
    Missing,
}

impl MeasuredValue {
    /// Coerce a float, treating NaN and infinities as missing.
    pub fn from_f64(v: f64) -> Self {
        if v.is_finite() {
            MeasuredValue::Number(v)
        } else {
            MeasuredValue::Missing
        }
    }

    /// Coerce a text cell. Anything that does not parse is missing.
    pub fn parse(s: &str) -> Self {
        match s.trim().parse::<f64>() {
            Ok(v) => Self::from_f64(v),
            Err(_) => MeasuredValue::Missing,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MeasuredValue::Number(v) => Some(*v),
            MeasuredValue::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, MeasuredValue::Missing)
    }
}

impl From<Option<f64>> for MeasuredValue {
    fn from(v: Option<f64>) -> Self {
        v.map_or(MeasuredValue::Missing, Self::from_f64)
    }
}

impl fmt::Display for MeasuredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasuredValue::Number(v) => write!(f, "{v}"),
            MeasuredValue::Missing => write!(f, "<missing>"),
        }
    }
}

// ---------------------------------------------------------------------------
// Record – one row of a data file
// ---------------------------------------------------------------------------

/// A single geotagged measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Opaque identifier, kept as text.
    pub id: String,
    pub value: MeasuredValue,
    /// Degrees, same planar reference as the boundary.
    pub longitude: f64,
    pub latitude: f64,
    /// Opaque timestamp, kept as text.
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Batch – a bounded slice of one file
// ---------------------------------------------------------------------------

/// Consecutive records read from one file starting at row `offset`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub offset: u64,
    pub records: Vec<Record>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Reject coordinates that cannot name a location.
pub(crate) fn checked_coordinate(v: Option<f64>) -> Option<f64> {
    v.filter(|c| c.is_finite())
}
