//! Idle sensor backed by the systemd-logind `DBus` interface.
//!
//! Polls `IdleHint`, `IdleSinceHint` and `LockedHint` of the current session.

use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;
use zbus::Connection;
use zbus::zvariant::OwnedValue;

use super::ChangeListener;
use super::IdleDetector;
use super::IdleSensor;
use super::SensorError;
use crate::config::Config;
use crate::domain::Permission;
use crate::domain::ScreenState;
use crate::domain::SensorSnapshot;
use crate::domain::UserState;

/// `DBus` service and path for login1.
const LOGIND_SERVICE: &str = "org.freedesktop.login1";
const LOGIND_PATH: &str = "/org/freedesktop/login1";

/// Present when systemd is the running init (see `sd_booted(3)`).
const SYSTEMD_RUNTIME_DIR: &str = "/run/systemd/system";

const ACCESS_DENIED: &str = "org.freedesktop.DBus.Error.AccessDenied";

/// Shortest threshold a detector accepts.
pub const MIN_THRESHOLD: Duration = Duration::from_secs(60);

/// How often a running detector re-reads the session.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Idle sensor for the current logind session.
#[derive(Debug, Clone)]
pub struct LogindSensor {
    /// Explicit session id, takes precedence over `XDG_SESSION_ID`.
    session_id: Option<String>,

    poll_interval: Duration,
}

impl LogindSensor {
    pub fn new() -> Self {
        Self {
            session_id: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            session_id: config.session_id.clone(),
            poll_interval: Duration::from_secs(config.poll_interval_seconds.max(1)),
        }
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl Default for LogindSensor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdleSensor for LogindSensor {
    type Detector = LogindDetector;

    fn is_supported(&self) -> bool {
        Path::new(SYSTEMD_RUNTIME_DIR).exists()
    }

    /// Granted when the session's idle hint can be read.
    async fn request_permission(&self) -> Result<Permission, SensorError> {
        let conn = Connection::system().await?;

        match resolve_session_path(&conn, self.session_id.as_deref()).await {
            Ok(path) => {
                debug!("Session {} is readable", path);
                Ok(Permission::Granted)
            }
            Err(SensorError::Bus(e)) if is_access_denied(&e) => Ok(Permission::Denied),
            Err(e) => Err(e),
        }
    }

    fn create_detector(&self) -> Result<LogindDetector, SensorError> {
        Ok(LogindDetector {
            session_id: self.session_id.clone(),
            poll_interval: self.poll_interval,
            state: Arc::new(DetectorState::default()),
        })
    }
}

/// Detector polling one logind session.
pub struct LogindDetector {
    session_id: Option<String>,
    poll_interval: Duration,
    state: Arc<DetectorState>,
}

/// Readouts and listeners, shared with the polling task.
#[derive(Default)]
struct DetectorState {
    readouts: Mutex<SensorSnapshot>,
    listeners: Mutex<Vec<ChangeListener>>,
}

impl DetectorState {
    /// Store new readouts, notifying listeners if either changed.
    fn update(&self, next: SensorSnapshot) {
        let prev = std::mem::replace(&mut *self.readouts.lock(), next);
        if prev == next {
            trace!("Session state: {}", next);
            return;
        }

        debug!("Session state changed: {} -> {}", prev, next);
        for listener in self.listeners.lock().iter() {
            listener(next);
        }
    }
}

#[async_trait]
impl IdleDetector for LogindDetector {
    fn user_state(&self) -> Option<UserState> {
        self.state.readouts.lock().user_state
    }

    fn screen_state(&self) -> Option<ScreenState> {
        self.state.readouts.lock().screen_state
    }

    fn on_change(&self, listener: ChangeListener) {
        self.state.listeners.lock().push(listener);
    }

    async fn start(
        &self,
        threshold: Duration,
        signal: CancellationToken,
    ) -> Result<(), SensorError> {
        if signal.is_cancelled() {
            return Err(SensorError::Aborted);
        }
        if threshold < MIN_THRESHOLD {
            return Err(SensorError::InvalidThreshold {
                threshold,
                minimum: MIN_THRESHOLD,
            });
        }

        let conn = Connection::system().await?;
        let session_path = resolve_session_path(&conn, self.session_id.as_deref())
            .await
            .map_err(permission_error)?;
        info!("Resolved session path: {}", session_path);

        let initial = read_snapshot(&conn, &session_path, threshold)
            .await
            .map_err(permission_error)?;
        if signal.is_cancelled() {
            return Err(SensorError::Aborted);
        }
        self.state.update(initial);

        let state = Arc::clone(&self.state);
        let interval = self.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = signal.cancelled() => {
                        debug!("Session polling cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        match read_snapshot(&conn, &session_path, threshold).await {
                            Ok(snapshot) => state.update(snapshot),
                            // Transient, keep polling
                            Err(e) => warn!("Failed to poll session state: {}", e),
                        }
                    }
                }
            }
        });

        Ok(())
    }
}

/// Resolve the session object path.
///
/// Order: explicit id, `XDG_SESSION_ID`, then the `self` and `auto` aliases.
async fn resolve_session_path(
    conn: &Connection,
    session_id: Option<&str>,
) -> Result<String, SensorError> {
    let from_env = env::var("XDG_SESSION_ID").ok();
    if let Some(session_id) = session_id.or(from_env.as_deref()) {
        debug!("Using session id: {}", session_id);
        return get_session_by_id(conn, session_id).await;
    }

    debug!("XDG_SESSION_ID not set, trying to find current session");

    for alias in ["self", "auto"] {
        let path = format!("{LOGIND_PATH}/session/{alias}");
        match get_property(conn, &path, "IdleHint").await {
            Ok(_) => return Ok(path),
            Err(SensorError::Bus(e)) if is_access_denied(&e) => return Err(SensorError::Bus(e)),
            Err(e) => trace!("Session alias {} unavailable: {}", alias, e),
        }
    }

    Err(SensorError::Session(
        "Could not resolve session path. Set XDG_SESSION_ID or ensure logind session is available."
            .to_string(),
    ))
}

fn is_access_denied(error: &zbus::Error) -> bool {
    match error {
        zbus::Error::MethodError(name, _, _) => name.as_str() == ACCESS_DENIED,
        zbus::Error::FDO(e) => matches!(**e, zbus::fdo::Error::AccessDenied(_)),
        _ => false,
    }
}

/// Report a bus `AccessDenied` as a permission failure.
fn permission_error(error: SensorError) -> SensorError {
    match error {
        SensorError::Bus(e) if is_access_denied(&e) => SensorError::PermissionDenied,
        other => other,
    }
}

/// Get session object path by session ID via `Manager.GetSession`.
async fn get_session_by_id(conn: &Connection, session_id: &str) -> Result<String, SensorError> {
    const MANAGER_INTERFACE: &str = "org.freedesktop.login1.Manager";

    let proxy = zbus::Proxy::new(conn, LOGIND_SERVICE, LOGIND_PATH, MANAGER_INTERFACE).await?;

    let path: zbus::zvariant::OwnedObjectPath = proxy.call("GetSession", &(session_id,)).await?;

    Ok(path.to_string())
}

/// Read one property of the `Session` interface.
async fn get_property(
    conn: &Connection,
    session_path: &str,
    name: &'static str,
) -> Result<OwnedValue, SensorError> {
    const SESSION_INTERFACE: &str = "org.freedesktop.login1.Session";
    const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

    let proxy = zbus::Proxy::new(conn, LOGIND_SERVICE, session_path, PROPERTIES_INTERFACE).await?;

    let value: OwnedValue = proxy.call("Get", &(SESSION_INTERFACE, name)).await?;
    Ok(value)
}

fn unexpected_type(name: &str, e: &zbus::zvariant::Error) -> SensorError {
    SensorError::Session(format!("{name} has an unexpected type: {e}"))
}

/// Read both readouts of a session.
async fn read_snapshot(
    conn: &Connection,
    session_path: &str,
    threshold: Duration,
) -> Result<SensorSnapshot, SensorError> {
    let idle_hint: bool = get_property(conn, session_path, "IdleHint")
        .await?
        .try_into()
        .map_err(|e| unexpected_type("IdleHint", &e))?;
    let idle_since: u64 = get_property(conn, session_path, "IdleSinceHint")
        .await?
        .try_into()
        .map_err(|e| unexpected_type("IdleSinceHint", &e))?;
    let locked_hint: bool = get_property(conn, session_path, "LockedHint")
        .await?
        .try_into()
        .map_err(|e| unexpected_type("LockedHint", &e))?;

    Ok(SensorSnapshot::new(
        Some(user_state_from_hints(
            idle_hint,
            idle_since,
            SystemTime::now(),
            threshold,
        )),
        Some(screen_state_from_hint(locked_hint)),
    ))
}

/// Map logind's idle hint to a user state.
///
/// `idle_since_usec` is `CLOCK_REALTIME` in microseconds, `0` when unknown.
/// The user only counts as idle once the hint has held for `threshold`.
fn user_state_from_hints(
    idle_hint: bool,
    idle_since_usec: u64,
    now: SystemTime,
    threshold: Duration,
) -> UserState {
    if !idle_hint {
        return UserState::Active;
    }
    if idle_since_usec == 0 {
        return UserState::Idle;
    }

    let since = UNIX_EPOCH + Duration::from_micros(idle_since_usec);
    match now.duration_since(since) {
        Ok(elapsed) if elapsed >= threshold => UserState::Idle,
        _ => UserState::Active,
    }
}

fn screen_state_from_hint(locked_hint: bool) -> ScreenState {
    if locked_hint {
        ScreenState::Locked
    } else {
        ScreenState::Unlocked
    }
}
