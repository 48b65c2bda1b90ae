//! NetworkManager-backed station driver for Linux boards.
//!
//! Association is delegated to `nmcli`; each attempt runs on its own thread and
//! reports back through the notification channel, so `connect` returns
//! immediately as the [`StationDriver`] contract requires.
//!
//! The network secret never appears on the nmcli command line, where any local
//! user could read it from `/proc/<pid>/cmdline`. nmcli runs with `--ask` and
//! the secret is written to its stdin.
//!
//! `stop` is final for attempts already in flight: it raises a stop flag, waits
//! for running attempts to return and only then disconnects, so an association
//! that completes late cannot leave the radio up after shutdown.
//!
//! With `manage_association = false` the driver only observes an existing link,
//! which is how the binary behaves on a development machine that is already
//! online.

use crate::config::StationConfig;
use crate::credentials::Credentials;
use crate::wifi::{StationDriver, StationError, StationEvent};
use log::{debug, info, warn};
use std::fs;
use std::io::{self, Write};
use std::net::{IpAddr, UdpSocket};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;

const SYSFS_NET: &str = "/sys/class/net";

pub struct NmcliStation {
    interface: String,
    manage_association: bool,
    probe_address: String,
    nmcli: Vec<String>,
    credentials: Option<Credentials>,
    events: Option<mpsc::Sender<StationEvent>>,
    stopped: Arc<AtomicBool>,
    attempts: Vec<JoinHandle<()>>,
}

impl NmcliStation {
    pub fn new(config: &StationConfig) -> Self {
        Self {
            interface: config.interface.clone(),
            manage_association: config.manage_association,
            probe_address: config.probe_address.clone(),
            nmcli: config.nmcli_command.clone(),
            credentials: None,
            events: None,
            stopped: Arc::new(AtomicBool::new(false)),
            attempts: Vec::new(),
        }
    }

    fn sender(&self) -> Result<&mpsc::Sender<StationEvent>, StationError> {
        self.events
            .as_ref()
            .ok_or_else(|| StationError::Driver("station not initialized".to_string()))
    }

    fn interface_dir(&self) -> PathBuf {
        Path::new(SYSFS_NET).join(&self.interface)
    }
}

impl StationDriver for NmcliStation {
    fn init(
        &mut self,
        credentials: &Credentials,
        events: mpsc::Sender<StationEvent>,
    ) -> Result<(), StationError> {
        if self.manage_association && !self.interface_dir().exists() {
            return Err(StationError::Driver(format!(
                "interface {} not found under {}",
                self.interface, SYSFS_NET
            )));
        }
        if self.manage_association && self.nmcli.is_empty() {
            return Err(StationError::Driver("empty nmcli command".to_string()));
        }
        self.credentials = Some(credentials.clone());
        self.events = Some(events);
        self.stopped = Arc::new(AtomicBool::new(false));
        info!(target: "Station", "Station driver ready on {}", self.interface);
        Ok(())
    }

    fn start(&mut self) -> Result<(), StationError> {
        self.sender()?
            .try_send(StationEvent::Started)
            .map_err(|e| StationError::Driver(e.to_string()))
    }

    fn connect(&mut self) -> Result<(), StationError> {
        let events = self.sender()?.clone();
        let attempt = Attempt {
            interface: self.interface.clone(),
            manage_association: self.manage_association,
            probe_address: self.probe_address.clone(),
            nmcli: self.nmcli.clone(),
            credentials: self.credentials.clone(),
            stopped: Arc::clone(&self.stopped),
        };

        self.attempts.retain(|handle| !handle.is_finished());
        let handle = thread::Builder::new()
            .name("station-connect".to_string())
            .spawn(move || {
                if let Some(event) = attempt.run() {
                    // Receiver gone means nobody is waiting anymore
                    let _ = events.blocking_send(event);
                }
            })
            .map_err(|e| StationError::Driver(e.to_string()))?;
        self.attempts.push(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), StationError> {
        self.stopped.store(true, Ordering::SeqCst);
        self.events = None;

        for handle in self.attempts.drain(..) {
            if handle.join().is_err() {
                warn!(target: "Station", "Association attempt panicked");
            }
        }

        if !self.manage_association {
            return Ok(());
        }
        let output = run_nmcli(&self.nmcli, &["device", "disconnect", self.interface.as_str()], None)
            .map_err(|e| StationError::Driver(format!("nmcli: {}", e)))?;
        if !output.status.success() {
            warn!(
                target: "Station",
                "nmcli disconnect failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// One association attempt, detached from the driver so it can run on a thread.
struct Attempt {
    interface: String,
    manage_association: bool,
    probe_address: String,
    nmcli: Vec<String>,
    credentials: Option<Credentials>,
    stopped: Arc<AtomicBool>,
}

impl Attempt {
    /// Outcome to report, or `None` once the station has been stopped.
    fn run(&self) -> Option<StationEvent> {
        if self.is_stopped() {
            return None;
        }

        if self.manage_association {
            let Some(credentials) = &self.credentials else {
                return Some(disconnected("no credentials"));
            };
            let associated = associate(&self.nmcli, &self.interface, credentials);
            if self.is_stopped() {
                debug!(target: "Station", "Station stopped during association");
                return None;
            }
            if let Err(reason) = associated {
                return Some(disconnected(&reason));
            }
            if !link_is_up(&self.interface) {
                return Some(disconnected("link down after association"));
            }
        }

        Some(match probe_local_address(&self.probe_address) {
            Ok(ip) => StationEvent::AddressAcquired(ip),
            Err(e) => disconnected(&format!("no address: {}", e)),
        })
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

fn disconnected(reason: &str) -> StationEvent {
    StationEvent::Disconnected {
        reason: reason.to_string(),
    }
}

/// Run nmcli with `args`, optionally feeding `stdin` to it.
fn run_nmcli(nmcli: &[String], args: &[&str], stdin: Option<&str>) -> io::Result<Output> {
    let (program, prefix) = nmcli
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty nmcli command"))?;

    let mut child = Command::new(program)
        .args(prefix)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        // nmcli may exit without asking; a closed pipe is not an error here
        if let Err(e) = pipe.write_all(input.as_bytes()) {
            if e.kind() != io::ErrorKind::BrokenPipe {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        }
    }

    child.wait_with_output()
}

fn associate(nmcli: &[String], interface: &str, credentials: &Credentials) -> Result<(), String> {
    debug!(target: "Station", "nmcli connect {} on {}", credentials.ssid, interface);
    let secret = format!("{}\n", credentials.password);
    let output = run_nmcli(
        nmcli,
        &[
            "--ask",
            "device",
            "wifi",
            "connect",
            credentials.ssid.as_str(),
            "ifname",
            interface,
        ],
        Some(&secret),
    )
    .map_err(|e| format!("nmcli: {}", e))?;

    if output.status.success() {
        Ok(())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
    }
}

// Interfaces without carrier detection (loopback, some SDIO radios) report "unknown".
fn link_is_up(interface: &str) -> bool {
    fs::read_to_string(Path::new(SYSFS_NET).join(interface).join("operstate"))
        .map(|state| matches!(state.trim(), "up" | "unknown"))
        .unwrap_or(false)
}

/// Local address the kernel would use to reach `probe`.
///
/// Connecting a UDP socket only selects a route; nothing is sent.
pub fn probe_local_address(probe: &str) -> io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(probe)?;
    let ip = socket.local_addr()?.ip();
    if ip.is_unspecified() {
        return Err(io::Error::other("unspecified local address"));
    }
    Ok(ip)
}
