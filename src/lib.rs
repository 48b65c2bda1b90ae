//! # Weather Station Core Library
//!
//! This library provides the connectivity bring-up and data-acquisition core of
//! the weather station application. It is written for small Linux boards (the
//! Raspberry Pi Zero W class of device) where the process owns the radio, has a
//! few hundred kilobytes of working memory to spare, and runs a single fetch per
//! boot before handing the result to a display.
//!
//! ## Design Philosophy
//!
//! ### Strictly Sequential Stages
//! The application is a short pipeline where every stage completes before the
//! next one starts:
//! 1. **Credentials**: five values read from the credential store (fatal if absent)
//! 2. **Station bring-up**: associate, acquire an address, bounded retry
//! 3. **Clock**: wait for a plausible wall clock (non-fatal)
//! 4. **Fetch**: one GET, streamed into a single buffer
//! 5. **Extract**: defensive JSON lookups into the [`WeatherRecord`]
//! 6. **Display**: the record is moved into the renderer
//!
//! ### Owned Record
//! There is no global weather state. The [`WeatherRecord`] is created by the
//! pipeline, lent mutably to the extractor for the duration of one fetch and
//! then moved out to the display collaborator.
//!
//! ### Partial Updates
//! The extractor updates each section of the record independently. A response
//! missing the `main` section keeps the previous temperature, pressure and
//! humidity while still refreshing the description.
//!
//! ## Core Types
//!
//! - [`WeatherRecord`]: the single value consumed by the display

use serde::{Deserialize, Serialize};

// Module declarations
pub mod accumulator;
pub mod config;
pub mod credentials;
pub mod diagnostics;
pub mod extractor;
pub mod fetch;
pub mod pipeline;
pub mod renderer;
pub mod time_sync;
pub mod wifi;
pub mod wifi_nmcli;

#[cfg(test)]
mod tests;

/// Maximum byte length of [`WeatherRecord::description`].
pub const DESCRIPTION_MAX: usize = 63;

/// Maximum byte length of [`WeatherRecord::icon_code`].
pub const ICON_CODE_MAX: usize = 7;

/// Current conditions as last reported by the weather service.
///
/// Every field starts zeroed or empty and is only ever overwritten by the
/// extractor. Sections absent from a response keep their previous values, so
/// the record is not a transactional snapshot of a single response.
///
/// Sunrise and sunset are kept both as absolute epoch seconds and as local
/// wall-clock hour/minute pairs, the latter being what the display shows.
///
/// # Example
/// ```
/// use weather_station_lib::WeatherRecord;
///
/// let record = WeatherRecord::default();
/// assert!(record.description.is_empty());
/// assert_eq!(record.temperature_c, 0.0);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    /// Human readable condition, e.g. "clear sky" (at most 63 bytes)
    pub description: String,
    /// Service icon code, e.g. "01d" (at most 7 bytes)
    pub icon_code: String,
    /// Temperature in degrees Celsius
    pub temperature_c: f32,
    /// Sea-level pressure in hectopascals
    pub pressure_hpa: i32,
    /// Relative humidity in percent
    pub humidity_pct: i32,
    /// Sunrise as Unix epoch seconds
    pub sunrise_epoch: i64,
    /// Sunset as Unix epoch seconds
    pub sunset_epoch: i64,
    pub sunrise_hour: u32,
    pub sunrise_minute: u32,
    pub sunset_hour: u32,
    pub sunset_minute: u32,
}

impl WeatherRecord {
    /// Sunrise formatted as `HH:MM` local time.
    pub fn sunrise_hhmm(&self) -> String {
        format!("{:02}:{:02}", self.sunrise_hour, self.sunrise_minute)
    }

    /// Sunset formatted as `HH:MM` local time.
    pub fn sunset_hhmm(&self) -> String {
        format!("{:02}:{:02}", self.sunset_hour, self.sunset_minute)
    }
}
