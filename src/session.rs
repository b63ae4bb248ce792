use std::sync::{Arc, Weak};
use std::time::Duration;

use ::time::{format_description::well_known, OffsetDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{watch, Mutex};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StartError;
use crate::synth;
use crate::types::{ScanInput, ScanKind, ScanResult, ScanStatus, SessionSnapshot};

/// Tick interval and upper bound of the per-tick progress increment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacing {
    pub tick: Duration,
    pub max_step: f64,
}

impl Pacing {
    /// `None` for kinds that never tick (email).
    pub fn for_kind(kind: ScanKind) -> Option<Self> {
        let (ms, max_step) = match kind {
            ScanKind::File => (250, 17.0),
            ScanKind::Url => (220, 15.0),
            ScanKind::Dns => (200, 20.0),
            ScanKind::Ip => (230, 18.0),
            ScanKind::Domain => (210, 16.0),
            ScanKind::Email => return None,
        };
        Some(Self {
            tick: Duration::from_millis(ms),
            max_step,
        })
    }
}

#[derive(Debug)]
struct SessionState {
    status: ScanStatus,
    progress: f64,
    input: Option<ScanInput>,
    result: Option<ScanResult>,
    started_at: Option<String>,
    completed_at: Option<String>,
    /// Bumped on every start/reset; ticks carrying an older value are dropped.
    run: u64,
    cancel: Option<CancellationToken>,
    rng: StdRng,
}

impl SessionState {
    fn new(rng: StdRng) -> Self {
        Self {
            status: ScanStatus::Idle,
            progress: 0.0,
            input: None,
            result: None,
            started_at: None,
            completed_at: None,
            run: 0,
            cancel: None,
            rng,
        }
    }

    /// Stop any pending ticker and return to idle.
    fn invalidate(&mut self) {
        if let Some(c) = self.cancel.take() {
            c.cancel();
        }
        self.run += 1;
        self.status = ScanStatus::Idle;
        self.progress = 0.0;
        self.input = None;
        self.result = None;
        self.started_at = None;
        self.completed_at = None;
    }

    fn snapshot(&self, kind: ScanKind) -> SessionSnapshot {
        SessionSnapshot {
            kind,
            status: self.status,
            progress: self.progress,
            input: self.input.clone(),
            result: self.result.clone(),
            started_at: self.started_at.clone(),
            completed_at: self.completed_at.clone(),
        }
    }
}

/// Lifecycle of one simulated scan: start, tick until 100, synthesize, reset.
///
/// Handles are cheap to clone and share the same state. The ticker task only
/// holds a weak reference, so dropping every handle stops it.
#[derive(Clone, Debug)]
pub struct ScanSession {
    kind: ScanKind,
    pacing: Option<Pacing>,
    state: Arc<Mutex<SessionState>>,
    updates: Arc<watch::Sender<SessionSnapshot>>,
}

impl ScanSession {
    pub fn new(kind: ScanKind) -> Self {
        Self::with_rng(kind, Pacing::for_kind(kind), StdRng::from_os_rng())
    }

    /// Session with explicit pacing and a deterministic RNG. Without pacing
    /// the session cannot be started.
    pub fn with_rng(kind: ScanKind, pacing: Option<Pacing>, rng: StdRng) -> Self {
        let (tx, _rx) = watch::channel(SessionSnapshot::idle(kind));
        Self {
            kind,
            pacing,
            state: Arc::new(Mutex::new(SessionState::new(rng))),
            updates: Arc::new(tx),
        }
    }

    pub fn kind(&self) -> ScanKind {
        self.kind
    }

    pub fn pacing(&self) -> Option<Pacing> {
        self.pacing
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().await.snapshot(self.kind)
    }

    /// Receive a fresh snapshot after every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.updates.subscribe()
    }

    /// Validate `input` and begin ticking.
    pub async fn start(&self, input: ScanInput) -> Result<SessionSnapshot, StartError> {
        let Some(pacing) = self.pacing else {
            return Err(StartError::Unsupported(self.kind));
        };
        input.validate_for(self.kind)?;

        let mut state = self.state.lock().await;
        if state.status == ScanStatus::Running {
            return Err(StartError::AlreadyRunning(self.kind));
        }
        state.invalidate();

        let cancel = CancellationToken::new();
        state.status = ScanStatus::Running;
        state.input = Some(input);
        state.started_at = Some(now_rfc3339());
        state.cancel = Some(cancel.clone());
        let run = state.run;
        let snap = self.publish(&state);
        drop(state);

        info!(kind = %self.kind, run, "scan started");
        tokio::spawn(drive(
            self.kind,
            pacing,
            Arc::downgrade(&self.state),
            self.updates.clone(),
            run,
            cancel,
        ));
        Ok(snap)
    }

    /// Return to idle from any state. Idempotent.
    pub async fn reset(&self) -> SessionSnapshot {
        let mut state = self.state.lock().await;
        let was = state.status;
        state.invalidate();
        if was != ScanStatus::Idle {
            info!(kind = %self.kind, from = ?was, "scan reset");
        }
        self.publish(&state)
    }

    /// Abort a running scan. Returns false when nothing was running.
    pub async fn cancel(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.status != ScanStatus::Running {
            return false;
        }
        state.invalidate();
        self.publish(&state);
        info!(kind = %self.kind, "scan cancelled");
        true
    }

    /// Wait until the session is no longer running and return that snapshot.
    pub async fn wait(&self) -> SessionSnapshot {
        let mut rx = self.subscribe();
        loop {
            {
                let snap = rx.borrow_and_update();
                if snap.status != ScanStatus::Running {
                    return snap.clone();
                }
            }
            if rx.changed().await.is_err() {
                return self.snapshot().await;
            }
        }
    }

    fn publish(&self, state: &SessionState) -> SessionSnapshot {
        let snap = state.snapshot(self.kind);
        self.updates.send_replace(snap.clone());
        snap
    }
}

/// Ticker for one run. Exits on cancellation, on a superseded run, once the
/// session is gone, or after completing.
async fn drive(
    kind: ScanKind,
    pacing: Pacing,
    state: Weak<Mutex<SessionState>>,
    updates: Arc<watch::Sender<SessionSnapshot>>,
    run: u64,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + pacing.tick, pacing.tick);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%kind, run, "ticker cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }

        let Some(state) = state.upgrade() else {
            debug!(%kind, run, "session dropped, ticker exiting");
            return;
        };
        let mut s = state.lock().await;
        if s.run != run || s.status != ScanStatus::Running {
            debug!(%kind, run, current = s.run, "stale tick ignored");
            return;
        }

        let step = s.rng.random_range(0.0..pacing.max_step);
        s.progress = (s.progress + step).min(100.0);

        if s.progress >= 100.0 {
            let result = synth::synthesize(kind, &mut s.rng);
            match result {
                Some(result) => {
                    s.progress = 100.0;
                    s.result = Some(result);
                    s.status = ScanStatus::Completed;
                    s.completed_at = Some(now_rfc3339());
                    s.cancel = None;
                    info!(%kind, run, "scan completed");
                }
                // Only reachable with pacing forced onto a kind that has no
                // result shape; such a run never reports Completed.
                None => {
                    warn!(%kind, "no result for this kind; returning to idle");
                    s.invalidate();
                }
            }
            updates.send_replace(s.snapshot(kind));
            return;
        }
        updates.send_replace(s.snapshot(kind));
    }
}

pub(crate) fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(kind: ScanKind) -> ScanSession {
        ScanSession::with_rng(kind, Pacing::for_kind(kind), StdRng::seed_from_u64(3))
    }

    #[tokio::test(start_paused = true)]
    async fn empty_input_stays_idle() {
        let s = session(ScanKind::Url);
        let err = s.start(ScanInput::target("")).await.unwrap_err();
        assert!(matches!(err, StartError::InvalidInput(ScanKind::Url, _)));
        let snap = s.snapshot().await;
        assert_eq!(snap.status, ScanStatus::Idle);
        assert_eq!(snap.progress, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_start_is_rejected_without_touching_progress() {
        let s = session(ScanKind::File);
        s.start(ScanInput::file("a.bin", 10)).await.unwrap();
        time::sleep(Duration::from_millis(600)).await;
        let before = s.snapshot().await;
        assert_eq!(before.status, ScanStatus::Running);

        let err = s.start(ScanInput::file("b.bin", 20)).await.unwrap_err();
        assert_eq!(err, StartError::AlreadyRunning(ScanKind::File));
        let after = s.snapshot().await;
        assert_eq!(after.progress, before.progress);
        assert_eq!(after.input, before.input);
    }

    #[tokio::test(start_paused = true)]
    async fn email_session_never_starts() {
        let s = session(ScanKind::Email);
        let err = s.start(ScanInput::file("invoice.pdf", 5)).await.unwrap_err();
        assert_eq!(err, StartError::Unsupported(ScanKind::Email));
        assert_eq!(s.snapshot().await.status, ScanStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_monotonic_and_bounded() {
        let s = session(ScanKind::Ip);
        let mut rx = s.subscribe();
        s.start(ScanInput::target("198.51.100.7")).await.unwrap();

        let mut last = 0.0;
        loop {
            rx.changed().await.unwrap();
            let snap = rx.borrow_and_update().clone();
            assert!(snap.progress >= last, "{} < {last}", snap.progress);
            assert!(snap.progress <= 100.0);
            last = snap.progress;
            if snap.status == ScanStatus::Completed {
                assert_eq!(snap.progress, 100.0);
                assert!(snap.result.is_some());
                assert!(snap.completed_at.is_some());
                break;
            }
            assert!(snap.result.is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reset_mid_run_stops_the_ticker() {
        let s = session(ScanKind::Domain);
        s.start(ScanInput::target("example.org")).await.unwrap();
        time::sleep(Duration::from_millis(450)).await;

        let snap = s.reset().await;
        assert_eq!(snap.status, ScanStatus::Idle);
        assert_eq!(snap.progress, 0.0);
        assert!(snap.result.is_none());

        time::sleep(Duration::from_secs(10)).await;
        let later = s.snapshot().await;
        assert_eq!(later.status, ScanStatus::Idle);
        assert_eq!(later.progress, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_after_completion_and_twice() {
        let s = session(ScanKind::Dns);
        s.start(ScanInput::target("example.com")).await.unwrap();
        assert_eq!(s.wait().await.status, ScanStatus::Completed);

        let first = s.reset().await;
        let second = s.reset().await;
        assert_eq!(first, second);
        assert_eq!(first.status, ScanStatus::Idle);
        assert!(first.result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_only_affects_running_sessions() {
        let s = session(ScanKind::Url);
        assert!(!s.cancel().await);
        s.start(ScanInput::target("https://example.com")).await.unwrap();
        assert!(s.cancel().await);
        assert_eq!(s.snapshot().await.status, ScanStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_leaves_completed_session_alone() {
        let s = session(ScanKind::Ip);
        s.start(ScanInput::target("198.51.100.7")).await.unwrap();
        let done = s.wait().await;
        assert_eq!(done.status, ScanStatus::Completed);

        assert!(!s.cancel().await);
        let after = s.snapshot().await;
        assert_eq!(after.status, ScanStatus::Completed);
        assert_eq!(after.progress, 100.0);
        assert!(after.result.is_some());
        assert_eq!(after.result, done.result);
    }

    #[tokio::test(start_paused = true)]
    async fn kind_without_result_never_completes() {
        assert_eq!(Pacing::for_kind(ScanKind::Email), None);

        let forced = Pacing {
            tick: Duration::from_millis(100),
            max_step: 50.0,
        };
        let s = ScanSession::with_rng(ScanKind::Email, Some(forced), StdRng::seed_from_u64(3));
        s.start(ScanInput::file("invoice.eml", 2048)).await.unwrap();
        let snap = s.wait().await;
        assert_eq!(snap.status, ScanStatus::Idle);
        assert!(snap.result.is_none());
        assert_eq!(snap.progress, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_completion_clears_previous_result() {
        let s = session(ScanKind::File);
        s.start(ScanInput::file("one.exe", 1)).await.unwrap();
        s.wait().await;
        let snap = s.start(ScanInput::file("two.exe", 2)).await.unwrap();
        assert_eq!(snap.status, ScanStatus::Running);
        assert_eq!(snap.progress, 0.0);
        assert!(snap.result.is_none());
        assert_eq!(snap.input, Some(ScanInput::file("two.exe", 2)));
    }
}
