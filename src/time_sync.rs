//! # Wall-Clock Synchronization
//!
//! Sunrise and sunset are shown in local time, so the device wants a plausible
//! clock before it fetches. After the station is up, a polling-mode time
//! client is started against a fixed server and the clock is sampled at a
//! fixed interval until it reports a year of at least 2016.
//!
//! Failing to synchronize is not fatal: the fetch still runs and the
//! hour/minute fields are derived from whatever the clock says.
//!
//! ## SNTP Client
//!
//! [`SntpClock`] keeps a correction offset refreshed by a background thread
//! issuing SNTPv3 client requests (RFC 4330). Reading the clock never touches
//! the network.

use chrono::{DateTime, Datelike, TimeDelta, Utc};
use log::{debug, error, info};
use std::io;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Any clock reading before this year is treated as "not set yet".
pub const MIN_VALID_YEAR: i32 = 2016;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

const NTP_PORT: u16 = 123;
/// Seconds between the NTP era origin (1900) and the Unix epoch.
const NTP_UNIX_OFFSET: i64 = 2_208_988_800;
const NTP_PACKET_LEN: usize = 48;
const SNTP_QUERY_TIMEOUT: Duration = Duration::from_secs(1);

/// Source of wall-clock time that can be told to synchronize.
pub trait TimeSource {
    /// Start polling-mode synchronization against `server`.
    fn start(&mut self, server: &str);

    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// Sleep, sample, repeat until the clock looks set or attempts run out.
///
/// Returns whether a valid clock was observed.
pub async fn wait_for_valid_clock<T: TimeSource + ?Sized>(
    source: &mut T,
    server: &str,
    max_attempts: u32,
    poll_interval: Duration,
) -> bool {
    info!(target: "TimeSync", "Time sync against {}", server);
    source.start(server);

    for attempt in 1..=max_attempts {
        info!(
            target: "TimeSync",
            "Waiting for system time to be set... ({}/{})",
            attempt, max_attempts
        );
        tokio::time::sleep(poll_interval).await;

        let now = source.now();
        if now.year() >= MIN_VALID_YEAR {
            info!(target: "TimeSync", "Time synchronized: {}", now.to_rfc2822());
            return true;
        }
    }

    error!(target: "TimeSync", "Failed to synchronize time.");
    false
}

/// System clock corrected by a background SNTP poller.
pub struct SntpClock {
    offset: Arc<Mutex<Option<TimeDelta>>>,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl SntpClock {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            offset: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            poll_interval,
        }
    }

    /// Correction applied on top of the system clock, once a server answered.
    pub fn offset(&self) -> Option<TimeDelta> {
        self.offset.lock().ok().and_then(|offset| *offset)
    }
}

impl TimeSource for SntpClock {
    fn start(&mut self, server: &str) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let server = server.to_string();
        let offset = Arc::clone(&self.offset);
        let running = Arc::clone(&self.running);
        let poll_interval = self.poll_interval;

        let spawned = thread::Builder::new()
            .name("sntp-poll".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    match sntp_query(&server, SNTP_QUERY_TIMEOUT) {
                        Ok(server_time) => {
                            let delta = server_time.signed_duration_since(Utc::now());
                            if let Ok(mut slot) = offset.lock() {
                                *slot = Some(delta);
                            }
                            debug!(target: "TimeSync", "SNTP offset {} ms", delta.num_milliseconds());
                        }
                        Err(e) => debug!(target: "TimeSync", "SNTP query to {} failed: {}", server, e),
                    }
                    thread::sleep(poll_interval);
                }
            });

        if let Err(e) = spawned {
            error!(target: "TimeSync", "Could not start SNTP poller: {}", e);
            self.running.store(false, Ordering::SeqCst);
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.offset() {
            Some(delta) => now + delta,
            None => now,
        }
    }
}

impl Drop for SntpClock {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// One SNTP client exchange; returns the server's transmit timestamp.
pub fn sntp_query(server: &str, timeout: Duration) -> io::Result<DateTime<Utc>> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_read_timeout(Some(timeout))?;
    socket.connect((server, NTP_PORT))?;

    let mut packet = [0u8; NTP_PACKET_LEN];
    packet[0] = 0x1B; // LI = 0, VN = 3, Mode = 3 (client)
    socket.send(&packet)?;

    let len = socket.recv(&mut packet)?;
    parse_transmit_timestamp(&packet[..len])
}

/// Extract the transmit timestamp from a server reply.
pub fn parse_transmit_timestamp(packet: &[u8]) -> io::Result<DateTime<Utc>> {
    if packet.len() < NTP_PACKET_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("short SNTP reply: {} bytes", packet.len()),
        ));
    }

    let mode = packet[0] & 0x07;
    if mode != 4 && mode != 5 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected SNTP mode {}", mode),
        ));
    }

    let seconds = u32::from_be_bytes([packet[40], packet[41], packet[42], packet[43]]);
    let fraction = u32::from_be_bytes([packet[44], packet[45], packet[46], packet[47]]);
    // Kiss-o'-Death and unsynchronized servers send a zero timestamp
    if seconds == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "server not synchronized",
        ));
    }

    let nanos = ((fraction as u64 * 1_000_000_000) >> 32) as u32;
    DateTime::from_timestamp(seconds as i64 - NTP_UNIX_OFFSET, nanos)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "timestamp out of range"))
}
