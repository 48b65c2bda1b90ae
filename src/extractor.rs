//! # Weather Extraction
//!
//! Turns an OpenWeatherMap "current weather" document into updates of a
//! [`WeatherRecord`]. Only three sections are read:
//!
//! ```json
//! { "weather": [ { "description": "clear sky", "icon": "01d" } ],
//!   "main":    { "temp": 18.5, "pressure": 1012, "humidity": 40 },
//!   "sys":     { "sunrise": 1700000000, "sunset": 1700040000 } }
//! ```
//!
//! Every lookup is defensive. A missing or oddly shaped section leaves the
//! matching record fields at their previous values and never prevents the
//! other sections from being applied. Only a document that is not JSON at all
//! is reported as [`ExtractOutcome::MalformedInput`], and then the record is
//! not touched.

use crate::{WeatherRecord, DESCRIPTION_MAX, ICON_CODE_MAX};
use chrono::{Local, TimeZone, Timelike};
use log::{error, info};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// Document parsed; zero or more sections were applied
    Parsed,
    /// Document is not valid JSON; record unchanged
    MalformedInput,
}

/// Apply `json` to `record`, deriving sunrise/sunset hours in local time.
pub fn extract(record: &mut WeatherRecord, json: &[u8]) -> ExtractOutcome {
    extract_in(record, json, &Local)
}

/// Apply `json` to `record`, deriving sunrise/sunset hours in `tz`.
pub fn extract_in<Tz: TimeZone>(record: &mut WeatherRecord, json: &[u8], tz: &Tz) -> ExtractOutcome {
    let root: Value = match serde_json::from_slice(json) {
        Ok(root) => root,
        Err(e) => {
            error!(target: "Extract", "Failed to parse JSON: {}", e);
            return ExtractOutcome::MalformedInput;
        }
    };

    apply_conditions(record, &root);
    apply_main(record, &root);
    apply_sun(record, &root, tz);

    info!(target: "Extract", "Parsed weather data:");
    info!(target: "Extract", "Description: {}", record.description);
    info!(target: "Extract", "Icon: {}", record.icon_code);
    info!(target: "Extract", "Temperature: {:.2}", record.temperature_c);
    info!(target: "Extract", "Pressure: {}", record.pressure_hpa);
    info!(target: "Extract", "Humidity: {}", record.humidity_pct);
    info!(target: "Extract", "Sunrise: {}", record.sunrise_hhmm());
    info!(target: "Extract", "Sunset: {}", record.sunset_hhmm());

    ExtractOutcome::Parsed
}

// Description and icon travel together: both must be strings to update either.
fn apply_conditions(record: &mut WeatherRecord, root: &Value) {
    let Some(first) = root
        .get("weather")
        .and_then(Value::as_array)
        .and_then(|conditions| conditions.first())
    else {
        return;
    };

    let description = first.get("description").and_then(Value::as_str);
    let icon = first.get("icon").and_then(Value::as_str);
    if let (Some(description), Some(icon)) = (description, icon) {
        record.description = bounded(description, DESCRIPTION_MAX);
        record.icon_code = bounded(icon, ICON_CODE_MAX);
    }
}

fn apply_main(record: &mut WeatherRecord, root: &Value) {
    let Some(main) = root.get("main").filter(|main| main.is_object()) else {
        return;
    };

    if let Some(temp) = main.get("temp").and_then(Value::as_f64) {
        record.temperature_c = temp as f32;
    }
    if let Some(pressure) = main.get("pressure").and_then(as_int) {
        record.pressure_hpa = pressure;
    }
    if let Some(humidity) = main.get("humidity").and_then(as_int) {
        record.humidity_pct = humidity;
    }
}

fn apply_sun<Tz: TimeZone>(record: &mut WeatherRecord, root: &Value, tz: &Tz) {
    let Some(sys) = root.get("sys").filter(|sys| sys.is_object()) else {
        return;
    };

    if let Some(sunrise) = sys.get("sunrise").and_then(Value::as_i64) {
        record.sunrise_epoch = sunrise;
        if let Some((hour, minute)) = local_hour_minute(sunrise, tz) {
            record.sunrise_hour = hour;
            record.sunrise_minute = minute;
        }
    }
    if let Some(sunset) = sys.get("sunset").and_then(Value::as_i64) {
        record.sunset_epoch = sunset;
        if let Some((hour, minute)) = local_hour_minute(sunset, tz) {
            record.sunset_hour = hour;
            record.sunset_minute = minute;
        }
    }
}

/// Hour and minute of `epoch` in `tz`; `None` if the instant is not representable.
pub fn local_hour_minute<Tz: TimeZone>(epoch: i64, tz: &Tz) -> Option<(u32, u32)> {
    let local = tz.timestamp_opt(epoch, 0).single()?;
    Some((local.hour(), local.minute()))
}

// Integers may arrive as 1012 or 1012.0; fractional values are truncated.
fn as_int(value: &Value) -> Option<i32> {
    if let Some(int) = value.as_i64() {
        return i32::try_from(int).ok();
    }
    value
        .as_f64()
        .filter(|float| float.is_finite() && *float >= i32::MIN as f64 && *float <= i32::MAX as f64)
        .map(|float| float as i32)
}

/// Truncate to at most `max` bytes without splitting a character.
fn bounded(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    const FULL: &str = r#"{"weather":[{"description":"clear sky","icon":"01d"}],"main":{"temp":18.5,"pressure":1012,"humidity":40},"sys":{"sunrise":1700000000,"sunset":1700040000}}"#;

    #[test]
    fn test_full_document_in_utc() {
        let mut record = WeatherRecord::default();
        assert_eq!(
            extract_in(&mut record, FULL.as_bytes(), &Utc),
            ExtractOutcome::Parsed
        );
        assert_eq!(record.description, "clear sky");
        assert_eq!(record.icon_code, "01d");
        assert_eq!(record.temperature_c, 18.5);
        assert_eq!(record.pressure_hpa, 1012);
        assert_eq!(record.humidity_pct, 40);
        assert_eq!(record.sunrise_epoch, 1_700_000_000);
        assert_eq!(record.sunset_epoch, 1_700_040_000);
        // 1700000000 = 2023-11-14 22:13:20 UTC, 1700040000 = 2023-11-15 09:20:00 UTC
        assert_eq!((record.sunrise_hour, record.sunrise_minute), (22, 13));
        assert_eq!((record.sunset_hour, record.sunset_minute), (9, 20));
    }

    #[test]
    fn test_sun_times_follow_time_zone() {
        let prague = FixedOffset::east_opt(3600).unwrap();
        let mut record = WeatherRecord::default();
        extract_in(&mut record, FULL.as_bytes(), &prague);
        assert_eq!((record.sunrise_hour, record.sunrise_minute), (23, 13));
        assert_eq!((record.sunset_hour, record.sunset_minute), (10, 20));
    }

    #[test]
    fn test_weather_only_keeps_main_section() {
        let mut record = WeatherRecord {
            temperature_c: 20.0,
            pressure_hpa: 1000,
            ..WeatherRecord::default()
        };
        let json = r#"{"weather":[{"description":"light rain","icon":"10n"}]}"#;
        assert_eq!(
            extract_in(&mut record, json.as_bytes(), &Utc),
            ExtractOutcome::Parsed
        );
        assert_eq!(record.temperature_c, 20.0);
        assert_eq!(record.pressure_hpa, 1000);
        assert_eq!(record.description, "light rain");
        assert_eq!(record.icon_code, "10n");
    }

    #[test]
    fn test_malformed_input_leaves_record_untouched() {
        let mut record = WeatherRecord::default();
        extract_in(&mut record, FULL.as_bytes(), &Utc);
        let before = record.clone();

        assert_eq!(
            extract_in(&mut record, b"<html>502 Bad Gateway</html>", &Utc),
            ExtractOutcome::MalformedInput
        );
        assert_eq!(record, before);

        assert_eq!(
            extract_in(&mut record, br#"{"main":{"temp":1"#, &Utc),
            ExtractOutcome::MalformedInput
        );
        assert_eq!(record, before);
    }

    #[test]
    fn test_unexpected_shapes_are_skipped_per_section() {
        let mut record = WeatherRecord {
            description: "mist".to_string(),
            icon_code: "50d".to_string(),
            temperature_c: 3.0,
            humidity_pct: 90,
            ..WeatherRecord::default()
        };
        let json = r#"{
            "weather": {"description": "not an array"},
            "main": {"temp": "warm", "pressure": 1020.0, "humidity": null},
            "sys": {"sunrise": "soon", "sunset": 1700040000}
        }"#;
        assert_eq!(
            extract_in(&mut record, json.as_bytes(), &Utc),
            ExtractOutcome::Parsed
        );
        assert_eq!(record.description, "mist");
        assert_eq!(record.icon_code, "50d");
        assert_eq!(record.temperature_c, 3.0);
        assert_eq!(record.pressure_hpa, 1020);
        assert_eq!(record.humidity_pct, 90);
        assert_eq!(record.sunrise_epoch, 0);
        assert_eq!(record.sunset_epoch, 1_700_040_000);
    }

    #[test]
    fn test_description_needs_icon() {
        let mut record = WeatherRecord::default();
        let json = r#"{"weather":[{"description":"snow"}]}"#;
        extract_in(&mut record, json.as_bytes(), &Utc);
        assert!(record.description.is_empty());
    }

    #[test]
    fn test_empty_object_changes_nothing() {
        let mut record = WeatherRecord::default();
        extract_in(&mut record, FULL.as_bytes(), &Utc);
        let before = record.clone();
        assert_eq!(
            extract_in(&mut record, b"{}", &Utc),
            ExtractOutcome::Parsed
        );
        assert_eq!(record, before);
    }

    #[test]
    fn test_long_strings_are_truncated_on_char_boundary() {
        let long = "é".repeat(40); // 80 bytes
        let json = format!(
            r#"{{"weather":[{{"description":"{}","icon":"01d-extra-long"}}]}}"#,
            long
        );
        let mut record = WeatherRecord::default();
        extract_in(&mut record, json.as_bytes(), &Utc);
        assert!(record.description.len() <= DESCRIPTION_MAX);
        assert_eq!(record.description, "é".repeat(31));
        assert_eq!(record.icon_code, "01d-ext");
    }

    #[test]
    fn test_unrepresentable_epoch_keeps_hour_minute() {
        let mut record = WeatherRecord {
            sunrise_hour: 6,
            sunrise_minute: 45,
            ..WeatherRecord::default()
        };
        let json = format!(r#"{{"sys":{{"sunrise":{}}}}}"#, i64::MAX);
        extract_in(&mut record, json.as_bytes(), &Utc);
        assert_eq!(record.sunrise_epoch, i64::MAX);
        assert_eq!((record.sunrise_hour, record.sunrise_minute), (6, 45));
    }
}
