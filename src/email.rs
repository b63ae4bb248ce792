//! Email attachment and header flows. Neither produces a scan result; they
//! only check preconditions and report readiness.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::EmailError;
use crate::settings::{SettingKey, SettingsStore};
use crate::types::FileInput;

/// Simulated upload time before reporting readiness.
pub const UPLOAD_DELAY: Duration = Duration::from_millis(800);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttachmentOutcome {
    ReadyToScan { file: String, message: String },
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct HeaderAnalysisRequest {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub headers: String,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Clone)]
pub struct EmailScanner {
    settings: Arc<dyn SettingsStore>,
    busy: Arc<AtomicBool>,
    delay: Duration,
}

impl EmailScanner {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            settings,
            busy: Arc::new(AtomicBool::new(false)),
            delay: UPLOAD_DELAY,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub async fn scan_attachment(
        &self,
        attachment: Option<FileInput>,
    ) -> Result<AttachmentOutcome, EmailError> {
        let file = attachment
            .filter(|f| !f.name.trim().is_empty())
            .ok_or(EmailError::NoAttachment)?;
        if self.settings.get(SettingKey::VirustotalApiKey).is_none() {
            return Err(EmailError::MissingCredential("VirusTotal"));
        }
        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(EmailError::AlreadyRunning);
        }
        let _busy = BusyGuard(&self.busy);

        tokio::time::sleep(self.delay).await;

        info!(file = %file.name, size = file.size, "attachment ready to scan");
        Ok(AttachmentOutcome::ReadyToScan {
            file: file.name,
            message: "With a proxy and your API key, attachments will be scanned in real time."
                .to_string(),
        })
    }

    /// Header/body analysis has no offline fallback.
    pub fn analyze_headers(&self, _request: &HeaderAnalysisRequest) -> Result<(), EmailError> {
        Err(EmailError::LiveAnalysisUnavailable)
    }
}

/// Clears the busy flag even if the upload future is dropped.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for EmailScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailScanner")
            .field("busy", &self.busy.load(Ordering::Relaxed))
            .field("delay", &self.delay)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettings;

    fn attachment() -> Option<FileInput> {
        Some(FileInput {
            name: "invoice.pdf".into(),
            size: 2048,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn needs_a_file_first() {
        let scanner = EmailScanner::new(Arc::new(MemorySettings::new()));
        assert_eq!(
            scanner.scan_attachment(None).await,
            Err(EmailError::NoAttachment)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn needs_a_virustotal_key() {
        let scanner = EmailScanner::new(Arc::new(MemorySettings::new()));
        assert_eq!(
            scanner.scan_attachment(attachment()).await,
            Err(EmailError::MissingCredential("VirusTotal"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reports_ready_with_key() {
        let settings = MemorySettings::new().with(SettingKey::VirustotalApiKey, "vt");
        let scanner = EmailScanner::new(Arc::new(settings));
        let outcome = scanner.scan_attachment(attachment()).await.unwrap();
        let AttachmentOutcome::ReadyToScan { file, .. } = outcome;
        assert_eq!(file, "invoice.pdf");
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_uploads_are_rejected() {
        let settings = MemorySettings::new().with(SettingKey::VirustotalApiKey, "vt");
        let scanner = EmailScanner::new(Arc::new(settings));
        let first = {
            let s = scanner.clone();
            tokio::spawn(async move { s.scan_attachment(attachment()).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(
            scanner.scan_attachment(attachment()).await,
            Err(EmailError::AlreadyRunning)
        );
        assert!(first.await.unwrap().is_ok());
    }

    #[test]
    fn header_analysis_is_gated() {
        let scanner = EmailScanner::new(Arc::new(MemorySettings::new()));
        assert_eq!(
            scanner.analyze_headers(&HeaderAnalysisRequest::default()),
            Err(EmailError::LiveAnalysisUnavailable)
        );
    }
}
