//! Scripted sensor for controller and store tests.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::ChangeListener;
use super::IdleDetector;
use super::IdleSensor;
use super::SensorError;
use super::logind::MIN_THRESHOLD;
use crate::domain::Permission;
use crate::domain::ScreenState;
use crate::domain::SensorSnapshot;
use crate::domain::UserState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PermissionScript {
    Grant,
    Deny,
    Fail,
}

pub(crate) struct FakeSensor {
    supported: bool,
    permission: PermissionScript,
    fail_start: bool,
    permission_gate: Option<Arc<Notify>>,
    start_gate: Option<Arc<Notify>>,
    permission_requests: AtomicUsize,
    detectors: Mutex<Vec<FakeDetector>>,
}

impl FakeSensor {
    /// Supported host that grants permission and starts cleanly.
    pub(crate) fn new() -> Self {
        Self {
            supported: true,
            permission: PermissionScript::Grant,
            fail_start: false,
            permission_gate: None,
            start_gate: None,
            permission_requests: AtomicUsize::new(0),
            detectors: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    pub(crate) fn deny_permission(mut self) -> Self {
        self.permission = PermissionScript::Deny;
        self
    }

    pub(crate) fn fail_permission(mut self) -> Self {
        self.permission = PermissionScript::Fail;
        self
    }

    pub(crate) fn fail_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Hold every permission request until the gate is notified.
    pub(crate) fn with_permission_gate(mut self, gate: Arc<Notify>) -> Self {
        self.permission_gate = Some(gate);
        self
    }

    /// Hold every detector start until the gate is notified.
    pub(crate) fn with_start_gate(mut self, gate: Arc<Notify>) -> Self {
        self.start_gate = Some(gate);
        self
    }

    pub(crate) fn permission_requests(&self) -> usize {
        self.permission_requests.load(Ordering::SeqCst)
    }

    pub(crate) fn detector_count(&self) -> usize {
        self.detectors.lock().len()
    }

    pub(crate) fn last_detector(&self) -> Option<FakeDetector> {
        self.detectors.lock().last().cloned()
    }
}

#[async_trait]
impl IdleSensor for FakeSensor {
    type Detector = FakeDetector;

    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn request_permission(&self) -> Result<Permission, SensorError> {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.permission_gate {
            gate.notified().await;
        }

        match self.permission {
            PermissionScript::Grant => Ok(Permission::Granted),
            PermissionScript::Deny => Ok(Permission::Denied),
            PermissionScript::Fail => Err(SensorError::Session("no session".to_string())),
        }
    }

    fn create_detector(&self) -> Result<FakeDetector, SensorError> {
        let detector = FakeDetector {
            inner: Arc::new(FakeDetectorInner {
                fail_start: self.fail_start,
                start_gate: self.start_gate.clone(),
                ..FakeDetectorInner::default()
            }),
        };
        self.detectors.lock().push(detector.clone());
        Ok(detector)
    }
}

#[derive(Clone)]
pub(crate) struct FakeDetector {
    inner: Arc<FakeDetectorInner>,
}

#[derive(Default)]
struct FakeDetectorInner {
    fail_start: bool,
    start_gate: Option<Arc<Notify>>,
    readouts: Mutex<SensorSnapshot>,
    listeners: Mutex<Vec<ChangeListener>>,
    signal: Mutex<Option<CancellationToken>>,
}

impl FakeDetector {
    /// Simulate a change event.
    ///
    /// Listeners are invoked even after cancellation, like a sensor that
    /// delivers one last queued event.
    pub(crate) fn emit(&self, user_state: Option<UserState>, screen_state: Option<ScreenState>) {
        let snapshot = SensorSnapshot::new(user_state, screen_state);
        *self.inner.readouts.lock() = snapshot;
        for listener in self.inner.listeners.lock().iter() {
            listener(snapshot);
        }
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.inner
            .signal
            .lock()
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

#[async_trait]
impl IdleDetector for FakeDetector {
    fn user_state(&self) -> Option<UserState> {
        self.inner.readouts.lock().user_state
    }

    fn screen_state(&self) -> Option<ScreenState> {
        self.inner.readouts.lock().screen_state
    }

    fn on_change(&self, listener: ChangeListener) {
        self.inner.listeners.lock().push(listener);
    }

    async fn start(
        &self,
        threshold: Duration,
        signal: CancellationToken,
    ) -> Result<(), SensorError> {
        *self.inner.signal.lock() = Some(signal.clone());

        if let Some(gate) = &self.inner.start_gate {
            gate.notified().await;
        }

        if signal.is_cancelled() {
            return Err(SensorError::Aborted);
        }
        if threshold < MIN_THRESHOLD {
            return Err(SensorError::InvalidThreshold {
                threshold,
                minimum: MIN_THRESHOLD,
            });
        }
        if self.inner.fail_start {
            return Err(SensorError::Session("sensor fault".to_string()));
        }
        Ok(())
    }
}
