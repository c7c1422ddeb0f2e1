// Cell measurement data model
//
// A measurement arrives already decoded from signaling traffic; this module
// only models it, derives its cell key and validates the identifier fields.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Logical channel a measurement was taken on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelType {
    #[default]
    Bcch,
    Ccch,
    Sdcch,
    Tch,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelType::Bcch => "BCCH",
            ChannelType::Ccch => "CCCH",
            ChannelType::Sdcch => "SDCCH",
            ChannelType::Tch => "TCH",
            ChannelType::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Unique cell identity: MCC, MNC, LAC and cell ID.
///
/// Text form is `mcc-mnc-lac-cid`, the key format of the tower database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub mcc: String,
    pub mnc: String,
    pub lac: String,
    pub cell_id: String,
}

impl CellKey {
    pub fn new(
        mcc: impl Into<String>,
        mnc: impl Into<String>,
        lac: impl Into<String>,
        cell_id: impl Into<String>,
    ) -> Self {
        CellKey {
            mcc: mcc.into(),
            mnc: mnc.into(),
            lac: lac.into(),
            cell_id: cell_id.into(),
        }
    }

    /// Check every identifier field; the first malformed one is reported.
    pub fn validate(&self) -> Result<(), IngestError> {
        check_digits("mcc", &self.mcc, 3, 3, "expected 3 decimal digits")?;
        check_digits("mnc", &self.mnc, 2, 3, "expected 2 or 3 decimal digits")?;
        check_code("lac", &self.lac)?;
        check_code("cell_id", &self.cell_id)?;
        Ok(())
    }
}

fn check_digits(
    field: &'static str,
    value: &str,
    min_len: usize,
    max_len: usize,
    reason: &'static str,
) -> Result<(), IngestError> {
    let ok = (min_len..=max_len).contains(&value.len())
        && value.bytes().all(|b| b.is_ascii_digit());
    if ok {
        Ok(())
    } else {
        Err(IngestError::InvalidField {
            field,
            value: value.to_string(),
            reason,
        })
    }
}

/// LAC and cell ID arrive either decimal or hex encoded depending on the decoder.
fn check_code(field: &'static str, value: &str) -> Result<(), IngestError> {
    if value.is_empty() {
        return Err(IngestError::InvalidField {
            field,
            value: String::new(),
            reason: "must not be empty",
        });
    }
    if !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(IngestError::InvalidField {
            field,
            value: value.to_string(),
            reason: "expected decimal or hexadecimal digits",
        });
    }
    Ok(())
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}-{}", self.mcc, self.mnc, self.lac, self.cell_id)
    }
}

impl FromStr for CellKey {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 4 {
            return Err(IngestError::InvalidField {
                field: "cell_key",
                value: s.to_string(),
                reason: "expected mcc-mnc-lac-cid",
            });
        }
        let key = CellKey::new(parts[0], parts[1], parts[2], parts[3]);
        key.validate()?;
        Ok(key)
    }
}

/// Known position of a tower.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellCoordinate {
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
}

impl CellCoordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        CellCoordinate { latitude, longitude }
    }
}

/// One observation of a tower at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellMeasurement {
    pub mcc: String,
    pub mnc: String,
    pub lac: String,
    pub cell_id: String,
    #[serde(default)]
    pub arfcn: u16,
    #[serde(default)]
    pub bsic: u8,
    /// dBm-like scale; higher is stronger
    pub signal_strength: i32,
    #[serde(default)]
    pub channel_type: ChannelType,
    pub observed_at: DateTime<Utc>,
}

impl CellMeasurement {
    /// Build a BCCH measurement with zeroed informational fields.
    pub fn new(key: &CellKey, signal_strength: i32, observed_at: DateTime<Utc>) -> Self {
        CellMeasurement {
            mcc: key.mcc.clone(),
            mnc: key.mnc.clone(),
            lac: key.lac.clone(),
            cell_id: key.cell_id.clone(),
            arfcn: 0,
            bsic: 0,
            signal_strength,
            channel_type: ChannelType::default(),
            observed_at,
        }
    }

    pub fn key(&self) -> CellKey {
        CellKey::new(
            self.mcc.clone(),
            self.mnc.clone(),
            self.lac.clone(),
            self.cell_id.clone(),
        )
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        self.key().validate()
    }
}

/// One line of measurement input: a subject key plus a flattened measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    /// Subscriber identity (IMSI or TMSI)
    pub subject: String,
    #[serde(flatten)]
    pub measurement: CellMeasurement,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_key_display_and_parse() {
        let key = CellKey::new("214", "07", "1A2B", "4F31");
        assert_eq!(key.to_string(), "214-07-1A2B-4F31");

        let parsed: CellKey = "214-07-1A2B-4F31".parse().unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_cell_key_parse_rejects_wrong_arity() {
        assert!("214-07-1A2B".parse::<CellKey>().is_err());
        assert!("214-07-1-2-3".parse::<CellKey>().is_err());
    }

    #[test]
    fn test_validate_rejects_malformed_fields() {
        let err = CellKey::new("21", "07", "100", "200").validate().unwrap_err();
        assert!(matches!(err, IngestError::InvalidField { field: "mcc", .. }));

        let err = CellKey::new("214", "7", "100", "200").validate().unwrap_err();
        assert!(matches!(err, IngestError::InvalidField { field: "mnc", .. }));

        let err = CellKey::new("214", "07", "", "200").validate().unwrap_err();
        assert!(matches!(err, IngestError::InvalidField { field: "lac", .. }));

        let err = CellKey::new("214", "07", "100", "2 0").validate().unwrap_err();
        assert!(matches!(err, IngestError::InvalidField { field: "cell_id", .. }));

        assert!(CellKey::new("214", "070", "100", "200").validate().is_ok());
    }

    #[test]
    fn test_measurement_json() {
        let json = r#"{
            "mcc": "214", "mnc": "07", "lac": "100", "cell_id": "200",
            "signal_strength": -70, "channel_type": "TCH",
            "observed_at": "2024-05-01T12:00:00Z"
        }"#;
        let m: CellMeasurement = serde_json::from_str(json).unwrap();
        assert_eq!(m.key(), CellKey::new("214", "07", "100", "200"));
        assert_eq!(m.channel_type, ChannelType::Tch);
        assert_eq!(m.arfcn, 0);
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_unknown_channel_type() {
        let json = r#"{
            "mcc": "214", "mnc": "07", "lac": "100", "cell_id": "200",
            "signal_strength": -70, "channel_type": "PDCH",
            "observed_at": "2024-05-01T12:00:00Z"
        }"#;
        let m: CellMeasurement = serde_json::from_str(json).unwrap();
        assert_eq!(m.channel_type, ChannelType::Unknown);
    }

    #[test]
    fn test_measurement_record_json() {
        let line = r#"{"subject": "214070123456789", "mcc": "214", "mnc": "07", "lac": "100", "cell_id": "200", "arfcn": 512, "signal_strength": -70, "observed_at": "2024-05-01T12:00:00Z"}"#;
        let record: MeasurementRecord = serde_json::from_str(line).unwrap();
        assert_eq!(record.subject, "214070123456789");
        assert_eq!(record.measurement.arfcn, 512);
        assert_eq!(record.measurement.channel_type, ChannelType::Bcch);
        assert!(serde_json::from_str::<MeasurementRecord>(r#"{"subject": "x"}"#).is_err());
    }
}
