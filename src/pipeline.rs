//! # Data Acquisition Pipeline
//!
//! Runs the stages strictly one after another:
//!
//! ```text
//! credentials -> station bring-up -> clock -> fetch/extract -> station shutdown
//! ```
//!
//! Only two things abort the run with an error: missing or invalid
//! credentials, and a station driver that cannot even be initialized or
//! started. A station that never associates ends the run early with a
//! [`ConnectionOutcome::Failed`] report; clock and fetch problems are recorded
//! in the report and the (possibly unchanged) record is still handed on.

use crate::config::Config;
use crate::credentials::{CredentialError, CredentialStore, Credentials};
use crate::diagnostics::log_memory;
use crate::fetch::{fetch_and_apply, FetchOutcome, HttpTransport};
use crate::time_sync::{wait_for_valid_clock, TimeSource};
use crate::wifi::{ConnectionOutcome, ConnectivityManager, StationDriver, StationError};
use crate::WeatherRecord;
use log::{error, info, warn};
use thiserror::Error;
use tokio::sync::Notify;

/// Failures that stop the application before any data can be acquired.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("credentials unavailable: {0}")]
    Credentials(#[from] CredentialError),

    #[error("station unavailable: {0}")]
    Station(#[from] StationError),
}

/// What one run achieved, plus the record for the display.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub connection: ConnectionOutcome,
    pub clock_synced: bool,
    /// `None` when the station never came up and no request was made
    pub fetch: Option<FetchOutcome>,
    pub record: WeatherRecord,
}

impl RunReport {
    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionOutcome::Connected
    }
}

/// Run every stage once.
///
/// `cancel.notify_one()` abandons the station wait, which is then treated like
/// any other connectivity failure.
pub async fn run<S, D, T, H>(
    config: &Config,
    store: &S,
    driver: D,
    clock: &mut T,
    transport: &H,
    cancel: &Notify,
) -> Result<RunReport, StartupError>
where
    S: CredentialStore + ?Sized,
    D: StationDriver,
    T: TimeSource + ?Sized,
    H: HttpTransport,
{
    let credentials = Credentials::load(store).map_err(|e| {
        error!(target: "Pipeline", "Failed to read credentials: {}", e);
        e
    })?;

    let mut station = ConnectivityManager::new(driver, config.station.max_retries);
    let connection = match station
        .bring_up_station(&credentials, config.station.connect_deadline(), cancel)
        .await
    {
        Ok(outcome) => outcome,
        Err(e @ StationError::Driver(_)) => return Err(e.into()),
        Err(e) => {
            warn!(target: "Pipeline", "Treating '{}' as a connection failure", e);
            ConnectionOutcome::Failed
        }
    };

    log_memory("station bring-up");
    let mut record = WeatherRecord::default();

    if connection == ConnectionOutcome::Failed {
        stop_station(&mut station);
        return Ok(RunReport {
            connection,
            clock_synced: false,
            fetch: None,
            record,
        });
    }

    let clock_synced = wait_for_valid_clock(
        clock,
        &config.time.server,
        config.time.max_attempts,
        config.time.poll_interval(),
    )
    .await;

    let fetch = fetch_and_apply(transport, &config.weather, &credentials, &mut record).await;
    info!(target: "Pipeline", "Fetch finished: {:?}", fetch);
    log_memory("fetch");

    stop_station(&mut station);

    Ok(RunReport {
        connection,
        clock_synced,
        fetch: Some(fetch),
        record,
    })
}

fn stop_station<D: StationDriver>(station: &mut ConnectivityManager<D>) {
    if let Err(e) = station.shutdown() {
        warn!(target: "Pipeline", "Station shutdown failed: {}", e);
    }
}
