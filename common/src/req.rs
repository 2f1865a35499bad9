use std::ops::RangeInclusive;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{de::Error as _, Deserialize, Deserializer};
use thiserror::Error;

/// Accepted sensor values (ESP32 12-bit ADC, upper bound inclusive).
pub const VALUE_RANGE: RangeInclusive<i64> = 0..=4096;

/// Date-time layouts accepted for the client timestamp, with `T` or space
/// between date and time and optional seconds.
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Body of `POST /ingest` as it arrives on the wire.
#[derive(Debug, Default, Clone, serde::Deserialize, serde::Serialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub device_id: String,
    #[serde(
        default,
        deserialize_with = "lax_int",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<i64>,
    #[serde(
        default,
        deserialize_with = "lax_ints",
        skip_serializing_if = "Option::is_none"
    )]
    pub values: Option<Vec<i64>>, // one row per channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>, // client timestamp, ISO-8601
}

/// A JSON integer, or a float without fractional part (`512.0`).
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum LaxInt {
    Int(i64),
    Float(f64),
}

impl LaxInt {
    fn into_int(self) -> Result<i64, String> {
        match self {
            LaxInt::Int(v) => Ok(v),
            LaxInt::Float(f)
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 =>
            {
                Ok(f as i64)
            }
            LaxInt::Float(f) => Err(format!("expected an integer, found {f}")),
        }
    }
}

fn lax_int<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Option::<LaxInt>::deserialize(d)?
        .map(LaxInt::into_int)
        .transpose()
        .map_err(D::Error::custom)
}

fn lax_ints<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<i64>>, D::Error> {
    Option::<Vec<LaxInt>>::deserialize(d)?
        .map(|values| values.into_iter().map(LaxInt::into_int).collect())
        .transpose()
        .map_err(D::Error::custom)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("device_id must be a non-empty string")]
    EmptyDeviceId,
    #[error("exactly one of 'value' or 'values' must be provided")]
    ExclusiveInput,
    #[error("value {value} is out of range 0..=4096")]
    ValueOutOfRange { value: i64 },
    #[error("values[{index}] = {value} is out of range 0..=4096")]
    BatchValueOutOfRange { index: usize, value: i64 },
    #[error("ts '{0}' is not an ISO-8601 timestamp")]
    InvalidTimestamp(String),
}

impl ValidationError {
    /// Request field the error refers to.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::EmptyDeviceId => "device_id",
            ValidationError::ExclusiveInput => "value",
            ValidationError::ValueOutOfRange { .. } => "value",
            ValidationError::BatchValueOutOfRange { .. } => "values",
            ValidationError::InvalidTimestamp(_) => "ts",
        }
    }
}

/// Exactly one of a single reading or a batch of channel readings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Single(i32),
    Batch(Vec<i32>),
}

/// A validated ingest request, ready to be timestamped and stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingest {
    pub device_id: String,
    pub input: Input,
    pub ts_client: Option<String>,
}

impl IngestRequest {
    pub fn validate(self) -> Result<Ingest, ValidationError> {
        if self.device_id.is_empty() {
            return Err(ValidationError::EmptyDeviceId);
        }

        let input = match (self.value, self.values) {
            (Some(value), None) => Input::Single(checked_value(value)?),
            (None, Some(values)) => Input::Batch(
                values
                    .into_iter()
                    .enumerate()
                    .map(|(index, value)| {
                        checked_value(value)
                            .map_err(|_| ValidationError::BatchValueOutOfRange { index, value })
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            _ => return Err(ValidationError::ExclusiveInput),
        };

        if let Some(ts) = self.ts.as_deref() {
            check_timestamp(ts)?;
        }

        Ok(Ingest {
            device_id: self.device_id,
            input,
            ts_client: self.ts,
        })
    }
}

fn checked_value(value: i64) -> Result<i32, ValidationError> {
    if !VALUE_RANGE.contains(&value) {
        return Err(ValidationError::ValueOutOfRange { value });
    }
    // in range, always fits
    Ok(value as i32)
}

/// Check that a client timestamp is ISO-8601; it is stored as sent.
///
/// Accepts RFC 3339, `T` or space separators, optional seconds and
/// fraction, offsets as `Z`, `+hh:mm` or `+hhmm`, naive times and bare dates.
pub fn check_timestamp(ts: &str) -> Result<(), ValidationError> {
    if DateTime::parse_from_rfc3339(ts).is_ok() {
        return Ok(());
    }

    let zulu = ts
        .strip_suffix('Z')
        .or_else(|| ts.strip_suffix('z'))
        .map(|local| format!("{local}+00:00"));
    let with_offset = zulu.as_deref().unwrap_or(ts);
    let offset_ok = NAIVE_FORMATS.iter().any(|fmt| {
        DateTime::parse_from_str(with_offset, &format!("{fmt}%:z")).is_ok()
            || DateTime::parse_from_str(with_offset, &format!("{fmt}%z")).is_ok()
    });
    let naive_ok = || {
        NAIVE_FORMATS
            .iter()
            .any(|fmt| NaiveDateTime::parse_from_str(ts, fmt).is_ok())
            || NaiveDate::parse_from_str(ts, "%Y-%m-%d").is_ok()
    };

    if offset_ok || naive_ok() {
        Ok(())
    } else {
        Err(ValidationError::InvalidTimestamp(ts.to_owned()))
    }
}

impl Ingest {
    /// `(device_id, value)` pairs, one per row to store.
    ///
    /// A batch fans out into synthetic per-channel devices `<device_id>-ch<idx>`.
    pub fn rows(&self) -> Vec<(String, i32)> {
        match &self.input {
            Input::Single(value) => vec![(self.device_id.clone(), *value)],
            Input::Batch(values) => values
                .iter()
                .enumerate()
                .map(|(idx, value)| (channel_device_id(&self.device_id, idx), *value))
                .collect(),
        }
    }

    /// The submitted values, echoed back unchanged.
    pub fn response(&self) -> IngestResponse {
        match &self.input {
            Input::Single(value) => IngestResponse::Single(*value),
            Input::Batch(values) => IngestResponse::Batch(values.clone()),
        }
    }
}

pub fn channel_device_id(device_id: &str, channel: usize) -> String {
    format!("{device_id}-ch{channel}")
}

/// Response of `POST /ingest`: a bare integer or an integer array.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(untagged)]
pub enum IngestResponse {
    Single(i32),
    Batch(Vec<i32>),
}

/// A stored row as returned by `GET /latest` and `GET /all`.
// keep in sync with `Measurement` in db.rs of backend
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct MeasurementRecord {
    pub device_id: String,
    pub value: i32,
    pub ts_server: String,         // UTC, ISO-8601
    pub ts_client: Option<String>, // as sent by the device
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(value: Option<i64>, values: Option<Vec<i64>>) -> IngestRequest {
        IngestRequest {
            device_id: "sensor1".to_owned(),
            value,
            values,
            ts: None,
        }
    }

    #[test]
    fn single_value_is_accepted() {
        let ingest = request(Some(512), None).validate().unwrap();
        assert_eq!(ingest.input, Input::Single(512));
        assert_eq!(ingest.rows(), vec![("sensor1".to_owned(), 512)]);
        assert_eq!(ingest.response(), IngestResponse::Single(512));
    }

    #[test]
    fn range_bounds_are_inclusive() {
        assert!(request(Some(0), None).validate().is_ok());
        assert!(request(Some(4096), None).validate().is_ok());
        assert_eq!(
            request(Some(-1), None).validate(),
            Err(ValidationError::ValueOutOfRange { value: -1 })
        );
        assert_eq!(
            request(Some(4097), None).validate(),
            Err(ValidationError::ValueOutOfRange { value: 4097 })
        );
    }

    #[test]
    fn batch_fans_out_into_channels() {
        let ingest = request(None, Some(vec![10, 20, 30])).validate().unwrap();
        assert_eq!(
            ingest.rows(),
            vec![
                ("sensor1-ch0".to_owned(), 10),
                ("sensor1-ch1".to_owned(), 20),
                ("sensor1-ch2".to_owned(), 30),
            ]
        );
        assert_eq!(ingest.response(), IngestResponse::Batch(vec![10, 20, 30]));
    }

    #[test]
    fn batch_reports_first_out_of_range_element() {
        let err = request(None, Some(vec![1, 4097, -1])).validate().unwrap_err();
        assert_eq!(
            err,
            ValidationError::BatchValueOutOfRange {
                index: 1,
                value: 4097
            }
        );
        assert_eq!(err.field(), "values");
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let ingest = request(None, Some(vec![])).validate().unwrap();
        assert!(ingest.rows().is_empty());
        assert_eq!(ingest.response(), IngestResponse::Batch(vec![]));
    }

    #[test]
    fn value_and_values_are_exclusive() {
        assert_eq!(
            request(Some(1), Some(vec![1])).validate(),
            Err(ValidationError::ExclusiveInput)
        );
        assert_eq!(
            request(None, None).validate(),
            Err(ValidationError::ExclusiveInput)
        );
    }

    #[test]
    fn device_id_is_required() {
        let req: IngestRequest = serde_json::from_str(r#"{"value": 1}"#).unwrap();
        assert_eq!(req.validate(), Err(ValidationError::EmptyDeviceId));

        let mut req = request(Some(1), None);
        req.device_id.clear();
        assert_eq!(req.validate(), Err(ValidationError::EmptyDeviceId));
    }

    #[test]
    fn null_fields_count_as_absent() {
        let req: IngestRequest =
            serde_json::from_str(r#"{"device_id": "d", "value": null, "values": [5], "ts": null}"#)
                .unwrap();
        let ingest = req.validate().unwrap();
        assert_eq!(ingest.input, Input::Batch(vec![5]));
        assert_eq!(ingest.ts_client, None);
    }

    #[test]
    fn iso8601_timestamp_forms_are_accepted() {
        let accepted = [
            "2024-05-01T12:30:00Z",
            "2024-05-01T12:30:00.250000Z",
            "2024-05-01T12:30:00.250+02:00",
            "2024-05-01T12:30:00+0200",
            "2024-05-01 12:30:00+02:00",
            "2024-05-01T12:30Z",
            "2024-05-01T12:30+0200",
            "2024-05-01T12:30:00",
            "2024-05-01T12:30:00.25",
            "2024-05-01 12:30:00",
            "2024-05-01 12:30",
            "2024-05-01T12:30",
            "2024-05-01",
        ];
        for ts in accepted {
            assert_eq!(check_timestamp(ts), Ok(()), "{ts}");
        }

        for ts in ["yesterday", "2024-13-01", "2024-05-01T25:00", "12:30:00", ""] {
            assert_eq!(
                check_timestamp(ts),
                Err(ValidationError::InvalidTimestamp(ts.to_owned())),
                "{ts}"
            );
        }
    }

    #[test]
    fn client_timestamp_is_kept_as_sent() {
        for ts in [
            "2024-05-01T12:30:00.250000Z",
            "2024-05-01T12:30:00.25",
            "2024-05-01 12:30:00+0200",
        ] {
            let mut req = request(Some(1), None);
            req.ts = Some(ts.to_owned());
            assert_eq!(req.validate().unwrap().ts_client.as_deref(), Some(ts));
        }
    }

    #[test]
    fn integral_floats_are_accepted() {
        let req: IngestRequest =
            serde_json::from_str(r#"{"device_id": "d", "value": 512.0}"#).unwrap();
        assert_eq!(req.value, Some(512));

        let req: IngestRequest =
            serde_json::from_str(r#"{"device_id": "d", "values": [10, 20.0, -1.0]}"#).unwrap();
        assert_eq!(req.values, Some(vec![10, 20, -1]));
        assert_eq!(
            req.validate(),
            Err(ValidationError::BatchValueOutOfRange {
                index: 2,
                value: -1
            })
        );
    }

    #[test]
    fn fractional_or_non_numeric_values_are_rejected() {
        for body in [
            r#"{"device_id": "d", "value": 1.5}"#,
            r#"{"device_id": "d", "value": "high"}"#,
            r#"{"device_id": "d", "values": [1, 2.5]}"#,
            r#"{"device_id": "d", "values": 3}"#,
        ] {
            assert!(serde_json::from_str::<IngestRequest>(body).is_err(), "{body}");
        }
    }

    #[test]
    fn invalid_timestamp_fails_validation() {
        let mut req = request(Some(1), None);
        req.ts = Some("not a time".to_owned());
        let err = req.validate().unwrap_err();
        assert_eq!(err.field(), "ts");
    }

    #[test]
    fn response_serializes_as_bare_json() {
        assert_eq!(
            serde_json::to_string(&IngestResponse::Single(512)).unwrap(),
            "512"
        );
        assert_eq!(
            serde_json::to_string(&IngestResponse::Batch(vec![10, 20, 30])).unwrap(),
            "[10,20,30]"
        );
    }
}
