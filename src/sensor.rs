//! Idle sensor abstraction.
//!
//! An [`IdleSensor`] is the capability-gated side of a sensor: it answers
//! whether the host supports idle detection, negotiates permission and
//! constructs detectors. An [`IdleDetector`] is one attachment that reports
//! user and screen state changes once started.

pub mod logind;

#[cfg(test)]
pub(crate) mod fake;

use std::time::Duration;

use async_trait::async_trait;
pub use logind::LogindSensor;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::domain::Permission;
use crate::domain::ScreenState;
use crate::domain::SensorSnapshot;
use crate::domain::UserState;

/// Listener invoked with the detector's readouts on every change.
pub type ChangeListener = Box<dyn Fn(SensorSnapshot) + Send + Sync>;

/// Capability check, permission primitive and detector factory.
#[async_trait]
pub trait IdleSensor: Send + Sync {
    type Detector: IdleDetector + 'static;

    /// Whether the host provides idle detection at all.
    fn is_supported(&self) -> bool;

    /// Ask for permission to observe idle state.
    async fn request_permission(&self) -> Result<Permission, SensorError>;

    /// Construct a new, not yet started detector.
    fn create_detector(&self) -> Result<Self::Detector, SensorError>;
}

/// A single sensor attachment.
#[async_trait]
pub trait IdleDetector: Send + Sync {
    /// Latest user state, `None` until the first reading.
    fn user_state(&self) -> Option<UserState>;

    /// Latest screen state, `None` until the first reading.
    fn screen_state(&self) -> Option<ScreenState>;

    /// Register a listener for change events.
    ///
    /// Must be called before [`IdleDetector::start`] to observe the first
    /// reading.
    fn on_change(&self, listener: ChangeListener);

    /// Start emitting change events.
    ///
    /// Resolves once the detector is running. Emission stops when `signal`
    /// is cancelled.
    async fn start(
        &self,
        threshold: Duration,
        signal: CancellationToken,
    ) -> Result<(), SensorError>;

    /// Both readouts at once.
    fn snapshot(&self) -> SensorSnapshot {
        SensorSnapshot::new(self.user_state(), self.screen_state())
    }
}

/// Errors reported by sensors.
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Idle detection permission denied")]
    PermissionDenied,

    #[error("Threshold {threshold:?} is below the minimum of {minimum:?}")]
    InvalidThreshold {
        threshold: Duration,
        minimum: Duration,
    },

    #[error("Idle detection was aborted")]
    Aborted,

    #[error("Session lookup failed: {0}")]
    Session(String),

    #[error("DBus error: {0}")]
    Bus(#[from] zbus::Error),
}
