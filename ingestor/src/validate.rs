use crate::errors::{Error, Result};
use crate::model::ThresholdConfig;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct ReportInput {
    pub device_id: String,
    pub temperature: f64,
    pub humidity: f64,
    pub status: String,
    pub temp_min: Option<f64>,
    pub temp_max: Option<f64>,
}

/// Collects every absent, null, empty or mistyped field into one error.
pub fn parse_report(body: &Value) -> Result<ReportInput> {
    let empty = Map::new();
    let obj = body.as_object().unwrap_or(&empty);
    let mut missing = Vec::new();

    let temperature = required(number_field(obj, "temperature"), "temperature", &mut missing);
    let humidity = required(number_field(obj, "humidity"), "humidity", &mut missing);
    let status = required(text_field(obj, "status"), "status", &mut missing);
    let device_id = required(device_field(obj), "device_id", &mut missing);
    let temp_min = optional(obj, "temp_min", &mut missing);
    let temp_max = optional(obj, "temp_max", &mut missing);

    match (temperature, humidity, status, device_id) {
        (Some(temperature), Some(humidity), Some(status), Some(device_id)) if missing.is_empty() => {
            Ok(ReportInput {
                device_id,
                temperature,
                humidity,
                status,
                temp_min,
                temp_max,
            })
        }
        _ => Err(Error::MissingFields(missing)),
    }
}

pub fn parse_settings(body: &Value) -> Result<ThresholdConfig> {
    let empty = Map::new();
    let obj = body.as_object().unwrap_or(&empty);
    let mut missing = Vec::new();

    let device_id = required(device_field(obj), "device_id", &mut missing);
    let temp_min = required(number_field(obj, "temp_min"), "temp_min", &mut missing);
    let temp_max = required(number_field(obj, "temp_max"), "temp_max", &mut missing);

    match (device_id, temp_min, temp_max) {
        (Some(device_id), Some(temp_min), Some(temp_max)) => Ok(ThresholdConfig {
            device_id,
            temp_min,
            temp_max,
        }),
        _ => Err(Error::MissingFields(missing)),
    }
}

fn required<T>(value: Option<T>, name: &str, missing: &mut Vec<String>) -> Option<T> {
    if value.is_none() {
        missing.push(name.to_string());
    }
    value
}

// Absent or null is fine for an optional bound, but a value that is present
// and unusable is reported rather than silently replaced by the stored one.
fn optional(obj: &Map<String, Value>, name: &str, missing: &mut Vec<String>) -> Option<f64> {
    match obj.get(name) {
        None | Some(Value::Null) => None,
        Some(_) => required(number_field(obj, name), name, missing),
    }
}

/// Accepts JSON numbers and numeric strings such as `"35.5"`.
fn number_field(obj: &Map<String, Value>, name: &str) -> Option<f64> {
    let value = match obj.get(name)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

fn text_field(obj: &Map<String, Value>, name: &str) -> Option<String> {
    match obj.get(name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

// Older firmware sends `device` instead of `device_id`.
fn device_field(obj: &Map<String, Value>) -> Option<String> {
    text_field(obj, "device_id").or_else(|| text_field(obj, "device"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn missing_of(result: Result<ReportInput>) -> Vec<String> {
        match result {
            Err(Error::MissingFields(fields)) => fields,
            other => panic!("expected MissingFields, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_report() {
        let body = json!({
            "temperature": 35,
            "humidity": 40,
            "status": "cooling",
            "temp_min": 20,
            "temp_max": 30,
            "device_id": "room1"
        });

        let input = parse_report(&body).unwrap();
        assert_eq!(input.device_id, "room1");
        assert_eq!(input.temperature, 35.0);
        assert_eq!(input.humidity, 40.0);
        assert_eq!(input.status, "cooling");
        assert_eq!(input.temp_min, Some(20.0));
        assert_eq!(input.temp_max, Some(30.0));
    }

    #[test]
    fn test_thresholds_are_optional() {
        let body = json!({
            "temperature": 22.5,
            "humidity": 51.2,
            "status": "off",
            "device_id": "room2"
        });

        let input = parse_report(&body).unwrap();
        assert_eq!(input.temp_min, None);
        assert_eq!(input.temp_max, None);
    }

    #[test]
    fn test_missing_fields_are_all_reported() {
        let body = json!({ "humidity": 40, "device_id": "room1" });
        assert_eq!(missing_of(parse_report(&body)), vec!["temperature", "status"]);
    }

    #[test]
    fn test_null_and_wrong_type_count_as_missing() {
        let body = json!({
            "temperature": null,
            "humidity": [1, 2],
            "status": "heating",
            "device_id": "room1"
        });
        assert_eq!(missing_of(parse_report(&body)), vec!["temperature", "humidity"]);
    }

    #[test]
    fn test_empty_device_id() {
        let body = json!({
            "temperature": 25,
            "humidity": 40,
            "status": "off",
            "device_id": "   "
        });
        assert_eq!(missing_of(parse_report(&body)), vec!["device_id"]);
    }

    #[test]
    fn test_legacy_device_key() {
        let body = json!({
            "temperature": 25,
            "humidity": 40,
            "status": "off",
            "device": "room1"
        });
        assert_eq!(parse_report(&body).unwrap().device_id, "room1");
    }

    #[test]
    fn test_numeric_strings_accepted() {
        let body = json!({
            "temperature": "35",
            "humidity": " 40.5 ",
            "status": "cooling",
            "device_id": "room1"
        });
        let input = parse_report(&body).unwrap();
        assert_eq!(input.temperature, 35.0);
        assert_eq!(input.humidity, 40.5);
    }

    #[test]
    fn test_non_finite_string_rejected() {
        let body = json!({
            "temperature": "NaN",
            "humidity": 40,
            "status": "cooling",
            "device_id": "room1"
        });
        assert_eq!(missing_of(parse_report(&body)), vec!["temperature"]);
    }

    #[test]
    fn test_present_but_invalid_threshold_rejected() {
        let body = json!({
            "temperature": 25,
            "humidity": 40,
            "status": "off",
            "temp_max": "warm",
            "device_id": "room1"
        });
        assert_eq!(missing_of(parse_report(&body)), vec!["temp_max"]);
    }

    #[test]
    fn test_non_object_body() {
        let fields = missing_of(parse_report(&json!("hello")));
        assert_eq!(fields, vec!["temperature", "humidity", "status", "device_id"]);
    }

    #[test]
    fn test_status_kept_verbatim() {
        let body = json!({
            "temperature": 25,
            "humidity": 40,
            "status": "Defrost, cycle 2",
            "device_id": "room1"
        });
        assert_eq!(parse_report(&body).unwrap().status, "Defrost, cycle 2");
    }

    #[test]
    fn test_parse_settings() {
        let config =
            parse_settings(&json!({ "device": "room2", "temp_min": 18.5, "temp_max": "26" }))
                .unwrap();
        assert_eq!(config.device_id, "room2");
        assert_eq!(config.temp_min, 18.5);
        assert_eq!(config.temp_max, 26.0);

        assert!(matches!(
            parse_settings(&json!({ "device_id": "room2", "temp_min": 18.5 })),
            Err(Error::MissingFields(f)) if f == vec!["temp_max"]
        ));
    }
}
