//! Linux host implementations of the hardware seams.
//!
//! The tag reader is a file bridge: a helper process owning the sensor bus
//! writes the chip's firmware word (hex) to one file and the UID of the tag
//! currently in the field (hex bytes, empty when absent) to another. Wi-Fi
//! goes through NetworkManager's `nmcli` and time through `timedatectl`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, trace};
use tokio::process::Command;

use crate::error::{LinkError, ReaderError};
use crate::indicator::{Indicator, Rgb};
use crate::scanner::TagReader;
use crate::wifi::{LinkStatus, TimeSource, WifiLink};

/// Any plausible wall clock is past this (2001-09-09).
const MIN_VALID_EPOCH: i64 = 1_000_000_000;

pub struct UidFileReader {
    uid_path: PathBuf,
    firmware_path: PathBuf,
}

impl UidFileReader {
    pub fn new(uid_path: PathBuf, firmware_path: PathBuf) -> Self {
        UidFileReader {
            uid_path,
            firmware_path,
        }
    }
}

impl TagReader for UidFileReader {
    async fn identify(&mut self) -> Result<u32, ReaderError> {
        let raw = tokio::fs::read_to_string(&self.firmware_path).await?;
        let hex = raw.trim().trim_start_matches("0x");
        u32::from_str_radix(hex, 16)
            .map_err(|_| ReaderError::Malformed(format!("firmware word `{}`", raw.trim())))
    }

    async fn read_uid(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, ReaderError> {
        match tokio::fs::read_to_string(&self.uid_path).await {
            Ok(raw) => parse_uid(&raw),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Accepts `aa bb cc dd`, `AA:BB:CC:DD` or `aabbccdd`.
fn parse_uid(raw: &str) -> Result<Option<Vec<u8>>, ReaderError> {
    let digits: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    if digits.is_empty() {
        return Ok(None);
    }
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ReaderError::Malformed(format!("uid `{}`", raw.trim())));
    }
    if digits.len() % 2 != 0 {
        return Err(ReaderError::Malformed(format!("odd-length uid `{}`", raw.trim())));
    }
    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).unwrap_or_default();
            u8::from_str_radix(pair, 16)
                .map_err(|_| ReaderError::Malformed(format!("uid `{}`", raw.trim())))
        })
        .collect::<Result<Vec<u8>, _>>()
        .map(Some)
}

async fn run(program: &str, args: &[&str]) -> Result<String, LinkError> {
    trace!("Running {} {:?}", program, args);
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await?;
    if !output.status.success() {
        return Err(LinkError::CommandFailed {
            command: format!("{} {}", program, args.first().unwrap_or(&"")),
            status: output.status.to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub struct NmcliLink {
    interface: String,
}

impl NmcliLink {
    pub fn new(interface: String) -> Self {
        NmcliLink { interface }
    }
}

impl WifiLink for NmcliLink {
    async fn scan_networks(&mut self) -> Result<Vec<String>, LinkError> {
        let out = run(
            "nmcli",
            &[
                "-t",
                "-f",
                "SSID",
                "dev",
                "wifi",
                "list",
                "ifname",
                self.interface.as_str(),
                "--rescan",
                "yes",
            ],
        )
        .await?;
        let mut ssids: Vec<String> = out
            .lines()
            .map(unescape_terse)
            .filter(|ssid| !ssid.is_empty())
            .collect();
        ssids.sort();
        ssids.dedup();
        debug!("Visible networks: {:?}", ssids);
        Ok(ssids)
    }

    async fn begin_association(&mut self, ssid: &str, secret: &str) -> Result<(), LinkError> {
        run(
            "nmcli",
            &[
                "--wait",
                "0",
                "dev",
                "wifi",
                "connect",
                ssid,
                "password",
                secret,
                "ifname",
                self.interface.as_str(),
            ],
        )
        .await
        .map(|_| ())
    }

    async fn status(&mut self) -> LinkStatus {
        match run(
            "nmcli",
            &[
                "-t",
                "-f",
                "ACTIVE,SSID,SIGNAL",
                "dev",
                "wifi",
                "list",
                "ifname",
                self.interface.as_str(),
                "--rescan",
                "no",
            ],
        )
        .await
        {
            Ok(out) => parse_active(&out).unwrap_or(LinkStatus::Disconnected),
            Err(err) => {
                debug!("Link status unavailable: {}", err);
                LinkStatus::Disconnected
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        run("nmcli", &["dev", "disconnect", self.interface.as_str()])
            .await
            .map(|_| ())
    }
}

fn unescape_terse(field: &str) -> String {
    field.replace("\\:", ":").replace("\\\\", "\\")
}

/// Picks the active row out of `ACTIVE,SSID,SIGNAL` terse output.
fn parse_active(out: &str) -> Option<LinkStatus> {
    out.lines().find_map(|line| {
        let rest = line.strip_prefix("yes:")?;
        let (ssid, signal) = rest.rsplit_once(':')?;
        let quality: i32 = signal.trim().parse().ok()?;
        Some(LinkStatus::Associated {
            ssid: unescape_terse(ssid),
            rssi: quality_to_dbm(quality),
        })
    })
}

/// NetworkManager reports signal as 0-100 quality.
fn quality_to_dbm(quality: i32) -> i32 {
    quality.clamp(0, 100) / 2 - 100
}

const TIMESYNCD_DROPIN_DIR: &str = "/run/systemd/timesyncd.conf.d";

/// System clock disciplined by systemd-timesyncd. The NTP server is
/// handed to timesyncd through a runtime drop-in.
pub struct TimedatectlClock {
    dropin_dir: PathBuf,
}

impl TimedatectlClock {
    pub fn new() -> Self {
        TimedatectlClock {
            dropin_dir: PathBuf::from(TIMESYNCD_DROPIN_DIR),
        }
    }
}

fn timesyncd_dropin(server: &str) -> String {
    format!("[Time]\nNTP={server}\n")
}

/// Writes the drop-in naming `server`. Returns true when it changed.
async fn write_dropin(dir: &Path, server: &str) -> std::io::Result<bool> {
    let path = dir.join("tagwatch.conf");
    let contents = timesyncd_dropin(server);
    match tokio::fs::read_to_string(&path).await {
        Ok(existing) if existing == contents => return Ok(false),
        _ => {}
    }
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(&path, contents).await?;
    Ok(true)
}

impl TimeSource for TimedatectlClock {
    async fn request_sync(&mut self, server: &str) -> Result<(), LinkError> {
        if write_dropin(&self.dropin_dir, server).await? {
            debug!("NTP server set to {}, restarting timesyncd", server);
            run("systemctl", &["restart", "systemd-timesyncd"]).await?;
        }
        run("timedatectl", &["set-ntp", "true"]).await.map(|_| ())
    }

    async fn is_synchronized(&mut self) -> bool {
        match run("timedatectl", &["show", "-p", "NTPSynchronized", "--value"]).await {
            Ok(out) => out.trim() == "yes" && Utc::now().timestamp() > MIN_VALID_EPOCH,
            Err(err) => {
                debug!("Could not query time sync state: {}", err);
                false
            }
        }
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Reports indicator changes through the log.
pub struct LogIndicator {
    brightness: u8,
    current: Option<Rgb>,
}

impl LogIndicator {
    pub fn new(brightness: u8) -> Self {
        LogIndicator {
            brightness,
            current: None,
        }
    }
}

impl Indicator for LogIndicator {
    fn set_color(&mut self, color: Rgb) {
        let color = color.scaled(self.brightness);
        if self.current != Some(color) {
            debug!("Indicator #{:02x}{:02x}{:02x}", color.r, color.g, color.b);
            self.current = Some(color);
        }
    }
}
