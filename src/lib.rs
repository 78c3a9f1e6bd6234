//! idlewatch - idle and screen-lock detection with a reactive subscription lifecycle.
//!
//! [`IdleController`] owns the subscription state machine for an
//! [`IdleSensor`]; [`IdleDetectionStore`] mirrors it into `watch` channels.

pub mod config;
pub mod controller;
pub mod domain;
pub mod sensor;
pub mod store;

pub use controller::DEFAULT_THRESHOLD;
pub use controller::FnObserver;
pub use controller::IdleController;
pub use controller::SubscribeOutcome;
pub use controller::SubscriptionObserver;
pub use domain::Permission;
pub use domain::ScreenState;
pub use domain::SensorSnapshot;
pub use domain::SubscriptionState;
pub use domain::UserState;
pub use sensor::IdleDetector;
pub use sensor::IdleSensor;
pub use sensor::LogindSensor;
pub use sensor::SensorError;
pub use store::IdleDetectionStore;
pub use store::SnapshotReceiver;
