//! Domain types shared between the controller, the store and callers.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Lifecycle status of an idle-detection subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubscriptionState {
    /// No state changes yet.
    #[default]
    Init,
    /// The host has no idle-detection capability.
    NotSupported,
    /// Permission was not granted.
    NotPermitted,
    /// Supported and permitted, but not listening yet.
    Ready,
    /// Listening to change events.
    Started,
    /// Detached, no further changes will be reported.
    Stopped,
}

impl SubscriptionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::NotSupported => "not-supported",
            Self::NotPermitted => "not-permitted",
            Self::Ready => "ready",
            Self::Started => "started",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the user has interacted with the system within the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserState {
    Active,
    Idle,
}

impl UserState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
        }
    }
}

/// Whether the session's screen is locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenState {
    Locked,
    Unlocked,
}

impl ScreenState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Unlocked => "unlocked",
        }
    }
}

/// Answer to a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Granted,
    Denied,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }

    pub fn is_granted(self) -> bool {
        self == Self::Granted
    }
}

/// Latest readouts of the sensor.
///
/// Either field is `None` until the sensor reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorSnapshot {
    pub user_state: Option<UserState>,
    pub screen_state: Option<ScreenState>,
}

impl SensorSnapshot {
    pub fn new(user_state: Option<UserState>, screen_state: Option<ScreenState>) -> Self {
        Self {
            user_state,
            screen_state,
        }
    }
}

impl fmt::Display for SensorSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "user={} screen={}",
            self.user_state.map_or("unknown", UserState::as_str),
            self.screen_state.map_or("unknown", ScreenState::as_str)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_strings_match_serde() {
        for state in [
            SubscriptionState::Init,
            SubscriptionState::NotSupported,
            SubscriptionState::NotPermitted,
            SubscriptionState::Ready,
            SubscriptionState::Started,
            SubscriptionState::Stopped,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
        }
    }

    #[test]
    fn test_snapshot_json_shape() {
        let snapshot = SensorSnapshot::new(Some(UserState::Idle), Some(ScreenState::Locked));
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(json, r#"{"userState":"idle","screenState":"locked"}"#);

        let unknown = serde_json::to_string(&SensorSnapshot::default()).unwrap();
        assert_eq!(unknown, r#"{"userState":null,"screenState":null}"#);
    }

    #[test]
    fn test_snapshot_display() {
        let snapshot = SensorSnapshot::new(Some(UserState::Active), None);
        assert_eq!(snapshot.to_string(), "user=active screen=unknown");
    }

    #[test]
    fn test_default_state_is_init() {
        assert_eq!(SubscriptionState::default(), SubscriptionState::Init);
    }
}
