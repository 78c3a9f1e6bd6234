//! Subscription lifecycle for an idle sensor.
//!
//! The controller mediates between one [`IdleSensor`] and an observer:
//!
//! - `init` is emitted on every subscribe attempt on a supported host
//! - at most one subscription is live per controller; the slot is reserved
//!   before permission is requested, so overlapping calls are no-ops
//! - permission denial yields `not-permitted` and frees the slot
//! - a failed detector start yields `stopped` with the error attached
//!
//! `subscribe` never fails. Everything the caller needs is in the state
//! callbacks and the returned [`SubscribeOutcome`].

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::domain::Permission;
use crate::domain::SensorSnapshot;
use crate::domain::SubscriptionState;
use crate::sensor::IdleDetector;
use crate::sensor::IdleSensor;
use crate::sensor::SensorError;

/// Threshold used when the caller does not pick one.
pub const DEFAULT_THRESHOLD: Duration = Duration::from_secs(60);

/// Receives lifecycle and readout changes of a subscription.
pub trait SubscriptionObserver: Send + Sync {
    /// Called on every state transition.
    ///
    /// `error` is set only when a failure caused the transition to
    /// [`SubscriptionState::Stopped`].
    fn on_state_change(&self, state: SubscriptionState, error: Option<&SensorError>);

    /// Called once per sensor change event, in emission order.
    fn on_event_change(&self, snapshot: SensorSnapshot);
}

/// Observer built from two closures.
pub struct FnObserver<S, E> {
    on_state: S,
    on_event: E,
}

impl<S, E> FnObserver<S, E>
where
    S: Fn(SubscriptionState, Option<&SensorError>) + Send + Sync,
    E: Fn(SensorSnapshot) + Send + Sync,
{
    pub fn new(on_state: S, on_event: E) -> Self {
        Self { on_state, on_event }
    }
}

impl<S, E> SubscriptionObserver for FnObserver<S, E>
where
    S: Fn(SubscriptionState, Option<&SensorError>) + Send + Sync,
    E: Fn(SensorSnapshot) + Send + Sync,
{
    fn on_state_change(&self, state: SubscriptionState, error: Option<&SensorError>) {
        (self.on_state)(state, error);
    }

    fn on_event_change(&self, snapshot: SensorSnapshot) {
        (self.on_event)(snapshot);
    }
}

/// Result of a subscribe call.
#[derive(Debug)]
pub enum SubscribeOutcome {
    /// The host has no idle detection; nothing was emitted.
    Unsupported,
    /// Another subscription is live or being negotiated.
    AlreadyActive,
    /// Permission was not granted.
    NotPermitted,
    /// The detector is running.
    Started,
    /// The detector could not be created or started.
    Failed(SensorError),
}

impl SubscribeOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started)
    }
}

/// A live subscription: the owned token and the signal handed to the detector.
struct SubscriptionHandle {
    generation: u64,
    token: CancellationToken,
    signal: CancellationToken,
}

impl SubscriptionHandle {
    fn new(generation: u64) -> Self {
        let token = CancellationToken::new();
        let signal = token.child_token();
        Self {
            generation,
            token,
            signal,
        }
    }
}

/// Slot ownership as seen by one subscribe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotOwner {
    /// The attempt still holds the slot.
    Current,
    /// Stopped, nothing holds the slot.
    Vacant,
    /// A newer attempt holds the slot.
    Other,
}

/// Owns the subscription slot for one sensor.
pub struct IdleController<S> {
    sensor: S,
    handle: Mutex<Option<SubscriptionHandle>>,
    next_generation: AtomicU64,
}

impl<S: IdleSensor> IdleController<S> {
    pub fn new(sensor: S) -> Self {
        Self {
            sensor,
            handle: Mutex::new(None),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    /// Whether the host supports idle detection.
    pub fn is_supported(&self) -> bool {
        self.sensor.is_supported()
    }

    /// Whether a subscription is live or being negotiated.
    pub fn is_active(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Ask the sensor for permission.
    ///
    /// Returns `None` without contacting the sensor on unsupported hosts.
    pub async fn request_permission(&self) -> Option<Permission> {
        if !self.is_supported() {
            debug!("Idle detection unsupported, not requesting permission");
            return None;
        }

        Some(self.negotiate_permission().await)
    }

    /// Subscribe to idle changes.
    ///
    /// Thresholds below the sensor's minimum end in `stopped`.
    pub async fn subscribe<O>(&self, threshold: Duration, observer: Arc<O>) -> SubscribeOutcome
    where
        O: SubscriptionObserver + 'static,
    {
        if !self.is_supported() {
            debug!("Idle detection unsupported, ignoring subscribe");
            return SubscribeOutcome::Unsupported;
        }

        observer.on_state_change(SubscriptionState::Init, None);

        let Some((generation, signal)) = self.reserve() else {
            debug!("Subscription already active, ignoring subscribe");
            return SubscribeOutcome::AlreadyActive;
        };

        if !self.negotiate_permission().await.is_granted() {
            warn!("Idle detection permission denied");
            if self.release(generation) == SlotOwner::Other {
                debug!("Denied subscription was replaced, not reporting");
            } else {
                observer.on_state_change(SubscriptionState::NotPermitted, None);
            }
            return SubscribeOutcome::NotPermitted;
        }

        let e = match self.attach(threshold, signal, &observer).await {
            Ok(()) if self.owner(generation) == SlotOwner::Current => {
                info!("Idle detection active (threshold {:?})", threshold);
                observer.on_state_change(SubscriptionState::Started, None);
                return SubscribeOutcome::Started;
            }
            // Started after unsubscribe; the signal is already cancelled
            Ok(()) => SensorError::Aborted,
            Err(e) => e,
        };

        error!("Failed to start idle detection: {}", e);
        if self.release(generation) == SlotOwner::Other {
            debug!("Failed subscription was replaced, not reporting");
        } else {
            observer.on_state_change(SubscriptionState::Stopped, Some(&e));
        }
        SubscribeOutcome::Failed(e)
    }

    /// Cancel the live subscription, if any.
    pub fn unsubscribe(&self) {
        let Some(handle) = self.handle.lock().take() else {
            debug!("No active subscription to stop");
            return;
        };

        handle.token.cancel();
        info!("Idle detection stopped");
    }

    async fn negotiate_permission(&self) -> Permission {
        match self.sensor.request_permission().await {
            Ok(permission) => {
                debug!("Idle detection permission: {:?}", permission);
                permission
            }
            Err(e) => {
                warn!("Permission request failed: {}", e);
                Permission::Denied
            }
        }
    }

    /// Claim the slot, handing out the detector's signal.
    fn reserve(&self) -> Option<(u64, CancellationToken)> {
        let mut slot = self.handle.lock();
        if slot.is_some() {
            return None;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let handle = SubscriptionHandle::new(generation);
        let signal = handle.signal.clone();
        *slot = Some(handle);
        Some((generation, signal))
    }

    /// Who holds the slot, relative to `generation`.
    fn owner(&self, generation: u64) -> SlotOwner {
        match self.handle.lock().as_ref() {
            Some(h) if h.generation == generation => SlotOwner::Current,
            Some(_) => SlotOwner::Other,
            None => SlotOwner::Vacant,
        }
    }

    /// Free the slot if it still belongs to `generation`.
    ///
    /// Returns the owner found before releasing.
    fn release(&self, generation: u64) -> SlotOwner {
        let mut slot = self.handle.lock();
        match slot.as_ref() {
            Some(h) if h.generation == generation => {}
            Some(_) => return SlotOwner::Other,
            None => return SlotOwner::Vacant,
        }

        if let Some(handle) = slot.take() {
            handle.token.cancel();
        }
        SlotOwner::Current
    }

    async fn attach<O>(
        &self,
        threshold: Duration,
        signal: CancellationToken,
        observer: &Arc<O>,
    ) -> Result<(), SensorError>
    where
        O: SubscriptionObserver + 'static,
    {
        let detector = self.sensor.create_detector()?;

        let listener_signal = signal.clone();
        let listener_observer = Arc::clone(observer);
        detector.on_change(Box::new(move |snapshot: SensorSnapshot| {
            if listener_signal.is_cancelled() {
                trace!("Dropping change after cancellation: {}", snapshot);
                return;
            }
            debug!("Idle change: {}", snapshot);
            listener_observer.on_event_change(snapshot);
        }));

        detector.start(threshold, signal).await
    }
}
