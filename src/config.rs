use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use log::warn;

use crate::drive_table::{drive_letter, MAX_DRIVES};
use crate::error::EmuError;
use crate::runner::{RunnerConfig, DEFAULT_BATCH_SIZE, DEFAULT_TICKS_PER_SECOND, DEFAULT_TICK_HZ};

/// Configuration file name
pub const CONFIG_FILE: &str = "mpmii.toml";

const DEFAULT_BANKS: usize = 8;
const DEFAULT_LOCAL_CONSOLE: usize = 3;

/// A `[[disk]]` entry
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DiskConfig {
    /// Drive letter A-P, or 0-9
    pub drive: String,
    pub path: String,
    #[serde(default)]
    pub read_only: bool,
}

/// A disk to mount, with the drive resolved to an index.
#[derive(Debug, Clone, PartialEq)]
pub struct Mount {
    pub drive: usize,
    pub path: String,
    pub read_only: bool,
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of memory banks below the common area
    pub banks: usize,

    /// Timer interrupt rate
    pub tick_hz: u32,

    /// Ticks between one second ticks
    pub ticks_per_second: u32,

    /// Instructions per batch between host checks
    pub batch_size: usize,

    /// Attach the host terminal to a console
    pub local_console: bool,

    /// Console used by the host terminal
    pub local_console_index: usize,

    /// Memory snapshot to start from
    pub memory_image: Option<String>,

    /// MPM.SYS to load directly
    pub mpm_sys: Option<String>,

    /// Stop after this many seconds
    pub timeout_secs: Option<u64>,

    #[serde(rename = "disk")]
    pub disks: Vec<DiskConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            banks: DEFAULT_BANKS,
            tick_hz: DEFAULT_TICK_HZ,
            ticks_per_second: DEFAULT_TICKS_PER_SECOND,
            batch_size: DEFAULT_BATCH_SIZE,
            local_console: false,
            local_console_index: DEFAULT_LOCAL_CONSOLE,
            memory_image: None,
            mpm_sys: None,
            timeout_secs: None,
            disks: Vec::new(),
        }
    }
}

/// Parse a drive name: `A`-`P` (either case) or a digit `0`-`9`.
pub fn parse_drive(name: &str) -> Option<usize> {
    let mut chars = name.chars();
    let c = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    let drive = match c {
        'A'..='P' => c as usize - 'A' as usize,
        'a'..='p' => c as usize - 'a' as usize,
        '0'..='9' => c as usize - '0' as usize,
        _ => return None,
    };
    (drive < MAX_DRIVES).then_some(drive)
}

/// Parse `A:FILE` as given on the command line.
pub fn parse_disk_spec(spec: &str) -> Result<(usize, String), EmuError> {
    let (drive, path) = spec
        .split_once(':')
        .ok_or_else(|| EmuError::DiskSpec(spec.to_string()))?;
    let drive = parse_drive(drive).ok_or_else(|| EmuError::DiskSpec(spec.to_string()))?;
    if path.is_empty() {
        return Err(EmuError::DiskSpec(spec.to_string()));
    }
    Ok((drive, path.to_string()))
}

impl Config {
    /// Load configuration from file, or return default if file doesn't exist
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Config::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match Self::parse(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Failed to parse {}: {}", path.display(), e);
                    warn!("Using default configuration.");
                    Config::default()
                }
            },
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                warn!("Using default configuration.");
                Config::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Config, EmuError> {
        toml::from_str(content).map_err(|e| EmuError::Config(e.to_string()))
    }

    /// Apply command-line overrides to the configuration.
    /// CLI arguments take priority over TOML config file settings.
    pub fn apply_cli_overrides(
        &mut self,
        banks: Option<usize>,
        image: Option<&str>,
        mpm_sys: Option<&str>,
        local: bool,
        timeout: Option<u64>,
    ) {
        if let Some(b) = banks {
            self.banks = b;
        }
        if let Some(i) = image {
            self.memory_image = Some(i.to_string());
        }
        if let Some(m) = mpm_sys {
            self.mpm_sys = Some(m.to_string());
        }
        if local {
            self.local_console = true;
        }
        if let Some(t) = timeout {
            self.timeout_secs = Some(t);
        }
    }

    /// Add a `-d`/`-r` disk. It replaces any disk the file put on the same
    /// drive.
    pub fn add_disk_spec(&mut self, spec: &str, read_only: bool) -> Result<(), EmuError> {
        let (drive, path) = parse_disk_spec(spec)?;
        self.disks.retain(|d| parse_drive(&d.drive) != Some(drive));
        self.disks.push(DiskConfig {
            drive: drive_letter(drive).to_string(),
            path,
            read_only,
        });
        Ok(())
    }

    /// The disks to mount, in drive order.
    pub fn mounts(&self) -> Result<Vec<Mount>, EmuError> {
        let mut mounts = self
            .disks
            .iter()
            .map(|d| {
                let drive = parse_drive(&d.drive)
                    .ok_or_else(|| EmuError::Config(format!("invalid drive '{}'", d.drive)))?;
                Ok(Mount {
                    drive,
                    path: d.path.clone(),
                    read_only: d.read_only,
                })
            })
            .collect::<Result<Vec<_>, EmuError>>()?;
        mounts.sort_by_key(|m| m.drive);
        Ok(mounts)
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            batch_size: self.batch_size.max(1),
            tick_hz: if self.tick_hz == 0 {
                DEFAULT_TICK_HZ
            } else {
                self.tick_hz
            },
            ticks_per_second: self.ticks_per_second.max(1),
            timeout: self.timeout_secs.map(Duration::from_secs),
        }
    }

    /// Get a description of this configuration
    pub fn get_description(&self) -> String {
        let boot = match (&self.mpm_sys, &self.memory_image) {
            (Some(sys), _) => format!("MPM.SYS {}", sys),
            (None, Some(image)) => format!("image {}", image),
            (None, None) => "boot sector of A:".to_string(),
        };
        format!(
            "{} banks, {} disk(s), {} Hz tick, {}",
            self.banks,
            self.disks.len(),
            self.tick_hz,
            boot
        )
    }
}
