use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StartError;

/// The six scan surfaces. Each one is backed by its own `ScanSession`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
    File,
    Url,
    Dns,
    Ip,
    Domain,
    Email,
}

impl ScanKind {
    pub const ALL: [ScanKind; 6] = [
        ScanKind::File,
        ScanKind::Url,
        ScanKind::Dns,
        ScanKind::Ip,
        ScanKind::Domain,
        ScanKind::Email,
    ];

    /// URL path segment for this kind.
    pub fn slug(self) -> &'static str {
        match self {
            ScanKind::File => "file",
            ScanKind::Url => "url",
            ScanKind::Dns => "dns",
            ScanKind::Ip => "ip",
            ScanKind::Domain => "domain",
            ScanKind::Email => "email",
        }
    }

    /// Whether the kind runs the progress simulation at all. Email never does.
    pub fn is_simulated(self) -> bool {
        !matches!(self, ScanKind::Email)
    }

    /// Whether the kind takes a file rather than a free-text target.
    pub fn takes_file(self) -> bool {
        matches!(self, ScanKind::File | ScanKind::Email)
    }
}

impl fmt::Display for ScanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for ScanKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        let s = s.strip_suffix("-scan").unwrap_or(&s);
        ScanKind::ALL
            .into_iter()
            .find(|k| k.slug() == s)
            .ok_or_else(|| format!("unknown scan kind: {s}"))
    }
}

/// A selected file. Only its metadata is ever looked at.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileInput {
    pub name: String,
    pub size: u64,
}

/// Caller-supplied payload for a scan.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanInput {
    File(FileInput),
    Target(String),
}

impl ScanInput {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        ScanInput::File(FileInput {
            name: name.into(),
            size,
        })
    }

    pub fn target(value: impl Into<String>) -> Self {
        ScanInput::Target(value.into())
    }

    /// Reject empty payloads and payloads of the wrong shape for `kind`.
    pub fn validate_for(&self, kind: ScanKind) -> Result<(), StartError> {
        match self {
            ScanInput::File(f) if kind.takes_file() => {
                if f.name.trim().is_empty() {
                    return Err(StartError::InvalidInput(kind, "no file selected".into()));
                }
                Ok(())
            }
            ScanInput::Target(t) if !kind.takes_file() => {
                if t.trim().is_empty() {
                    return Err(StartError::InvalidInput(kind, "no target provided".into()));
                }
                Ok(())
            }
            ScanInput::File(_) => Err(StartError::InvalidInput(
                kind,
                "expected a target, got a file".into(),
            )),
            ScanInput::Target(_) => Err(StartError::InvalidInput(
                kind,
                "expected a file, got a target".into(),
            )),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    #[default]
    Idle,
    Running,
    Completed,
    /// Never entered by the simulation; kept so consumers can render it.
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileVerdict {
    pub detections: u8,
    pub clean: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UrlVerdict {
    pub score: u8,
    pub threats: Vec<String>,
    pub history: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Low,
    Medium,
    High,
}

impl fmt::Display for Risk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Risk::Low => "low",
            Risk::Medium => "medium",
            Risk::High => "high",
        })
    }
}

/// One DNS answer row.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    #[serde(rename = "type")]
    pub record_type: String,
    pub value: String,
    pub risk: Risk,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DomainIntel {
    pub whois: String,
    pub reputation: String,
    pub intel: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IpIntel {
    pub geo: String,
    pub reputation: String,
    pub risk: String,
}

/// Terminal result of a completed scan, keyed by kind.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanResult {
    File(FileVerdict),
    Url(UrlVerdict),
    Dns { records: Vec<DnsRecord> },
    Domain(DomainIntel),
    Ip(IpIntel),
}

impl ScanResult {
    pub fn kind(&self) -> ScanKind {
        match self {
            ScanResult::File(_) => ScanKind::File,
            ScanResult::Url(_) => ScanKind::Url,
            ScanResult::Dns { .. } => ScanKind::Dns,
            ScanResult::Domain(_) => ScanKind::Domain,
            ScanResult::Ip(_) => ScanKind::Ip,
        }
    }
}

/// Point-in-time view of a session, as handed to presenters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub kind: ScanKind,
    pub status: ScanStatus,
    pub progress: f64,
    pub input: Option<ScanInput>,
    pub result: Option<ScanResult>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl SessionSnapshot {
    pub fn idle(kind: ScanKind) -> Self {
        Self {
            kind,
            status: ScanStatus::Idle,
            progress: 0.0,
            input: None,
            result: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Progress rounded for display.
    pub fn percent(&self) -> u8 {
        self.progress.round().clamp(0.0, 100.0) as u8
    }
}
