//! # Credential Store
//!
//! The device keeps its network and weather-service secrets in a small
//! key-value store, read once at startup. The application reads exactly five
//! keys and refuses to continue when any of them is missing, unreadable or
//! longer than the slot it is destined for.
//!
//! | key          | meaning              | max bytes |
//! |--------------|----------------------|-----------|
//! | `ssid`       | network name         | 31        |
//! | `password`   | network secret       | 63        |
//! | `ow_api_key` | weather API key      | 41        |
//! | `ow_city`    | city name            | 31        |
//! | `ow_country` | country/region code  | 5         |
//!
//! The on-disk store is a flat TOML table of strings, e.g.
//!
//! ```toml
//! ssid = "home"
//! password = "hunter22"
//! ow_api_key = "0123456789abcdef"
//! ow_city = "Brno"
//! ow_country = "CZ"
//! ```

use log::info;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

pub const KEY_SSID: &str = "ssid";
pub const KEY_PASSWORD: &str = "password";
pub const KEY_API_KEY: &str = "ow_api_key";
pub const KEY_CITY: &str = "ow_city";
pub const KEY_COUNTRY: &str = "ow_country";

const SSID_MAX: usize = 31;
const PASSWORD_MAX: usize = 63;
const API_KEY_MAX: usize = 41;
const CITY_MAX: usize = 31;
const COUNTRY_MAX: usize = 5;

/// Errors raised while opening the store or reading a credential.
///
/// Every variant is fatal to startup: without credentials the device has
/// nothing to connect to and nothing to ask for.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// Store file could not be read
    #[error("credential store IO: {0}")]
    Io(#[from] io::Error),

    /// Store file is not a valid TOML table
    #[error("credential store format: {0}")]
    Format(#[from] toml::de::Error),

    /// Key is absent from the store
    #[error("credential `{0}` not found")]
    Missing(String),

    /// Key exists but does not hold a string
    #[error("credential `{0}` is not a string")]
    NotAString(String),

    /// Value exceeds the slot size
    #[error("credential `{key}` is {len} bytes, limit is {max}")]
    TooLong { key: String, len: usize, max: usize },
}

/// Opaque key-value store holding string credentials.
pub trait CredentialStore {
    fn get_str(&self, key: &str) -> Result<String, CredentialError>;
}

/// TOML-file backed credential store.
#[derive(Debug)]
pub struct TomlCredentialStore {
    table: toml::Table,
}

impl TomlCredentialStore {
    /// Open and parse the store. The file is read once; later edits are not seen.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CredentialError> {
        info!(target: "Credentials", "Opening credential store {}", path.as_ref().display());
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, CredentialError> {
        let table = contents.parse::<toml::Table>()?;
        Ok(Self { table })
    }
}

impl CredentialStore for TomlCredentialStore {
    fn get_str(&self, key: &str) -> Result<String, CredentialError> {
        match self.table.get(key) {
            Some(toml::Value::String(value)) => Ok(value.clone()),
            Some(_) => Err(CredentialError::NotAString(key.to_string())),
            None => Err(CredentialError::Missing(key.to_string())),
        }
    }
}

/// In-memory credential store, for provisioning from code and for tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryCredentialStore {
    values: HashMap<String, String>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get_str(&self, key: &str) -> Result<String, CredentialError> {
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| CredentialError::Missing(key.to_string()))
    }
}

/// The five values the application needs, read once and never written back.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: String,
    pub password: String,
    pub api_key: String,
    pub city: String,
    pub country: String,
}

impl Credentials {
    /// Read and validate all five credentials. The first failure aborts.
    pub fn load<S: CredentialStore + ?Sized>(store: &S) -> Result<Self, CredentialError> {
        let credentials = Credentials {
            ssid: read_bounded(store, KEY_SSID, SSID_MAX)?,
            password: read_bounded(store, KEY_PASSWORD, PASSWORD_MAX)?,
            api_key: read_bounded(store, KEY_API_KEY, API_KEY_MAX)?,
            city: read_bounded(store, KEY_CITY, CITY_MAX)?,
            country: read_bounded(store, KEY_COUNTRY, COUNTRY_MAX)?,
        };
        info!(
            target: "Credentials",
            "Credentials loaded for SSID:{} location:{},{}",
            credentials.ssid, credentials.city, credentials.country
        );
        Ok(credentials)
    }
}

// Secrets stay out of logs and panic messages.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &"***")
            .field("api_key", &"***")
            .field("city", &self.city)
            .field("country", &self.country)
            .finish()
    }
}

fn read_bounded<S: CredentialStore + ?Sized>(
    store: &S,
    key: &str,
    max: usize,
) -> Result<String, CredentialError> {
    let value = store.get_str(key)?;
    if value.len() > max {
        return Err(CredentialError::TooLong {
            key: key.to_string(),
            len: value.len(),
            max,
        });
    }
    Ok(value)
}
