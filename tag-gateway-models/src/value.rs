use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tag_gateway_error::GatewayResult;
use tag_gateway_sdk::{DataSample, StatusClass};

/// Snapshot of one tag as seen by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_timestamp: Option<DateTime<Utc>>,
    pub status: StatusClass,
}

impl TagValue {
    pub fn new(value: Option<f64>, status: StatusClass) -> Self {
        Self {
            value,
            source_timestamp: None,
            server_timestamp: None,
            status,
        }
    }

    /// Value just written by the gateway itself.
    pub fn written(value: f64) -> Self {
        let now = Utc::now();
        Self {
            value: Some(value),
            source_timestamp: Some(now),
            server_timestamp: Some(now),
            status: StatusClass::Good,
        }
    }

    /// Conversion used for reads: unparseable payloads become a missing value.
    pub fn from_read(sample: &DataSample) -> Self {
        Self {
            value: sample.value.to_number_lenient(),
            source_timestamp: sample.source_timestamp,
            server_timestamp: sample.server_timestamp,
            status: sample.status,
        }
    }

    /// Conversion used for subscription notifications: non-numeric payloads are rejected.
    pub fn from_notification(sample: &DataSample) -> GatewayResult<Self> {
        Ok(Self {
            value: sample.value.to_number_strict()?,
            source_timestamp: sample.source_timestamp,
            server_timestamp: sample.server_timestamp,
            status: sample.status,
        })
    }
}
