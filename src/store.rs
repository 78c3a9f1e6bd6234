//! Observable projection of a subscription.
//!
//! Mirrors controller callbacks into `watch` channels so any number of
//! readers can follow the state and the latest readouts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::controller::DEFAULT_THRESHOLD;
use crate::controller::IdleController;
use crate::controller::SubscribeOutcome;
use crate::controller::SubscriptionObserver;
use crate::domain::Permission;
use crate::domain::ScreenState;
use crate::domain::SensorSnapshot;
use crate::domain::SubscriptionState;
use crate::domain::UserState;
use crate::sensor::IdleSensor;
use crate::sensor::SensorError;

/// Writable side of the store, handed to the controller as observer.
struct StoreValues {
    state: watch::Sender<SubscriptionState>,
    user_state: watch::Sender<Option<UserState>>,
    screen_state: watch::Sender<Option<ScreenState>>,
}

impl StoreValues {
    fn clear_readouts(&self) {
        self.user_state.send_replace(None);
        self.screen_state.send_replace(None);
    }
}

impl SubscriptionObserver for StoreValues {
    fn on_state_change(&self, state: SubscriptionState, _error: Option<&SensorError>) {
        self.state.send_replace(state);
    }

    fn on_event_change(&self, snapshot: SensorSnapshot) {
        self.user_state.send_replace(snapshot.user_state);
        self.screen_state.send_replace(snapshot.screen_state);
    }
}

/// Follows both readouts as one snapshot.
pub struct SnapshotReceiver {
    user_state: watch::Receiver<Option<UserState>>,
    screen_state: watch::Receiver<Option<ScreenState>>,
}

impl SnapshotReceiver {
    /// Latest readouts, marking both as seen.
    ///
    /// An update landing after this call is reported by the next
    /// [`SnapshotReceiver::changed`].
    pub fn borrow_and_update(&mut self) -> SensorSnapshot {
        SensorSnapshot::new(
            *self.user_state.borrow_and_update(),
            *self.screen_state.borrow_and_update(),
        )
    }

    pub fn has_changed(&self) -> Result<bool, watch::error::RecvError> {
        Ok(self.user_state.has_changed()? || self.screen_state.has_changed()?)
    }

    /// Wait until either readout changes.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        tokio::select! {
            res = self.user_state.changed() => res,
            res = self.screen_state.changed() => res,
        }
    }
}

/// Read-only views of idle detection plus handlers to manage it.
pub struct IdleDetectionStore<S> {
    controller: IdleController<S>,
    values: Arc<StoreValues>,
}

impl<S: IdleSensor> IdleDetectionStore<S> {
    /// Create a store; the initial state is `not-supported` on hosts
    /// without idle detection.
    pub fn new(sensor: S) -> Self {
        let controller = IdleController::new(sensor);
        let initial = if controller.is_supported() {
            SubscriptionState::Init
        } else {
            SubscriptionState::NotSupported
        };

        Self {
            controller,
            values: Arc::new(StoreValues {
                state: watch::Sender::new(initial),
                user_state: watch::Sender::new(None),
                screen_state: watch::Sender::new(None),
            }),
        }
    }

    pub fn controller(&self) -> &IdleController<S> {
        &self.controller
    }

    pub fn state(&self) -> watch::Receiver<SubscriptionState> {
        self.values.state.subscribe()
    }

    pub fn user_state(&self) -> watch::Receiver<Option<UserState>> {
        self.values.user_state.subscribe()
    }

    pub fn screen_state(&self) -> watch::Receiver<Option<ScreenState>> {
        self.values.screen_state.subscribe()
    }

    pub fn snapshots(&self) -> SnapshotReceiver {
        SnapshotReceiver {
            user_state: self.values.user_state.subscribe(),
            screen_state: self.values.screen_state.subscribe(),
        }
    }

    pub fn current_state(&self) -> SubscriptionState {
        *self.values.state.borrow()
    }

    /// Latest readouts.
    pub fn snapshot(&self) -> SensorSnapshot {
        SensorSnapshot::new(
            *self.values.user_state.borrow(),
            *self.values.screen_state.borrow(),
        )
    }

    /// Start listening, with [`DEFAULT_THRESHOLD`] unless given.
    pub async fn start(&self, threshold: Option<Duration>) -> SubscribeOutcome {
        let threshold = threshold.unwrap_or(DEFAULT_THRESHOLD);
        self.controller
            .subscribe(threshold, Arc::clone(&self.values))
            .await
    }

    /// Stop listening and forget the readouts.
    pub fn stop(&self) {
        self.controller.unsubscribe();
        self.values.state.send_replace(SubscriptionState::Stopped);
        self.values.clear_readouts();
    }

    /// Ask for permission, publishing `ready` or `not-permitted`.
    ///
    /// Unsupported hosts keep their `not-supported` state.
    pub async fn request_permission(&self) -> Option<Permission> {
        let permission = self.controller.request_permission().await;
        self.publish_permission(permission);
        permission
    }

    /// Ask for permission and start listening if granted.
    pub async fn request_permission_and_start(
        &self,
        threshold: Option<Duration>,
    ) -> Option<Permission> {
        let permission = self.request_permission().await;
        if permission.is_some_and(Permission::is_granted) {
            self.start(threshold).await;
        }
        permission
    }

    fn publish_permission(&self, permission: Option<Permission>) {
        let state = match permission {
            Some(Permission::Granted) => SubscriptionState::Ready,
            Some(Permission::Denied) => SubscriptionState::NotPermitted,
            None => {
                debug!("No permission answer, keeping state");
                return;
            }
        };
        self.values.state.send_replace(state);
    }
}
