//! Error types. All of them are recoverable notices; none ends the process.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ScanKind;

/// Why a session refused to start.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error("{0} scan: invalid input ({1})")]
    InvalidInput(ScanKind, String),

    #[error("{0} scan is already running")]
    AlreadyRunning(ScanKind),

    #[error("{0} scan has no simulated result; it needs a provider integration")]
    Unsupported(ScanKind),
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read settings file: {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write settings file: {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("settings file is not valid JSON: {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("add an AI API key to enable live answers")]
    MissingCredential,

    #[error("{provider} call failed: {reason}")]
    ProviderCallFailed {
        provider: &'static str,
        reason: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmailError {
    #[error("choose an email attachment (.eml, .pdf, .zip, etc.)")]
    NoAttachment,

    #[error("missing {0} API key; add it in provider settings to enable live scans")]
    MissingCredential(&'static str),

    #[error("live analysis requires provider keys (VirusTotal for attachments, an LLM for headers)")]
    LiveAnalysisUnavailable,

    #[error("an attachment upload is already in progress")]
    AlreadyRunning,
}
