use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tag_gateway_error::{GatewayError, GatewayResult};

/// Coarse quality of a value as reported by the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusClass {
    Good,
    Uncertain,
    Bad,
}

impl StatusClass {
    #[inline]
    pub fn is_good(self) -> bool {
        matches!(self, StatusClass::Good)
    }
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusClass::Good => "Good",
            StatusClass::Uncertain => "Uncertain",
            StatusClass::Bad => "Bad",
        };
        f.write_str(s)
    }
}

/// Payload of a sample, already narrowed from the protocol's variant type.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    Empty,
    Number(f64),
    Text(String),
    /// Any other variant shape; carries the type name for diagnostics.
    Unsupported(String),
}

impl SampleValue {
    /// Numeric view used on the read path: text is parsed, everything else is `None`.
    pub fn to_number_lenient(&self) -> Option<f64> {
        match self {
            SampleValue::Number(v) => Some(*v),
            SampleValue::Text(s) => s.trim().parse::<f64>().ok(),
            SampleValue::Empty | SampleValue::Unsupported(_) => None,
        }
    }

    /// Numeric view used for subscription notifications.
    ///
    /// An empty payload is a missing value; any non-numeric payload is rejected.
    pub fn to_number_strict(&self) -> GatewayResult<Option<f64>> {
        match self {
            SampleValue::Empty => Ok(None),
            SampleValue::Number(v) => Ok(Some(*v)),
            SampleValue::Text(_) => Err(GatewayError::DataProcessing(
                "unsupported value type String".to_string(),
            )),
            SampleValue::Unsupported(kind) => Err(GatewayError::DataProcessing(format!(
                "unsupported value type {kind}"
            ))),
        }
    }
}

/// One observed value with its quality and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSample {
    pub value: SampleValue,
    pub status: StatusClass,
    pub source_timestamp: Option<DateTime<Utc>>,
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl DataSample {
    pub fn good(value: f64) -> Self {
        let now = Utc::now();
        Self {
            value: SampleValue::Number(value),
            status: StatusClass::Good,
            source_timestamp: Some(now),
            server_timestamp: Some(now),
        }
    }

    pub fn with_status(value: SampleValue, status: StatusClass) -> Self {
        Self {
            value,
            status,
            source_timestamp: None,
            server_timestamp: None,
        }
    }
}

/// Scalar written to a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UaScalar {
    Int32(i32),
    Float(f32),
}

impl UaScalar {
    #[inline]
    pub fn as_f64(self) -> f64 {
        match self {
            UaScalar::Int32(v) => v as f64,
            UaScalar::Float(v) => v as f64,
        }
    }
}
