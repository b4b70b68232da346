use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::storage::{MemoryStorage, SessionStorage};

/// A token is only usable if it outlives "now" by at least this much.
/// Keeps a request from leaving with a token that expires in transit.
pub const EXPIRY_SKEW_MS: i64 = 5000;

const ACCESS_TOKEN_KEY: &str = "aviscribe_access_token";
const REFRESH_TOKEN_KEY: &str = "aviscribe_refresh_token";
const ACCESS_EXP_KEY: &str = "aviscribe_access_exp";
const REFRESH_EXP_KEY: &str = "aviscribe_refresh_exp";
const PROFILE_KEY: &str = "aviscribe_user_profile";

/// User-facing account metadata. The session layer stores it but never
/// interprets it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl UserProfile {
    /// Display name, falling back to the username.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or("unknown")
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Body returned by login, register and refresh.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    #[serde(default, deserialize_with = "null_as_default")]
    pub access_token: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub refresh_token: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub access_token_expires_at: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub refresh_token_expires_at: i64,
    #[serde(default)]
    pub profile: Option<UserProfile>,
}

impl fmt::Debug for SessionPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPayload")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("access_token_expires_at", &self.access_token_expires_at)
            .field("refresh_token_expires_at", &self.refresh_token_expires_at)
            .field("profile", &self.profile)
            .finish()
    }
}

/// Current session state. Empty strings and zero timestamps mean "absent".
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub access_token_expires_at: i64,
    pub refresh_token_expires_at: i64,
    pub profile: Option<UserProfile>,
}

impl From<SessionPayload> for Session {
    fn from(payload: SessionPayload) -> Self {
        Self {
            access_token: payload.access_token,
            refresh_token: payload.refresh_token,
            access_token_expires_at: payload.access_token_expires_at,
            refresh_token_expires_at: payload.refresh_token_expires_at,
            profile: payload.profile,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("access_token_expires_at", &self.access_token_expires_at)
            .field("refresh_token_expires_at", &self.refresh_token_expires_at)
            .field("profile", &self.profile)
            .finish()
    }
}

fn redact(token: &str) -> &'static str {
    if token.is_empty() {
        "<empty>"
    } else {
        "<redacted>"
    }
}

impl Session {
    fn has_valid_access_token(&self, now_ms: i64) -> bool {
        is_token_valid(&self.access_token, self.access_token_expires_at, now_ms)
    }

    fn has_valid_refresh_token(&self, now_ms: i64) -> bool {
        is_token_valid(&self.refresh_token, self.refresh_token_expires_at, now_ms)
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Non-empty, and the expiry (epoch seconds) lies beyond now plus the skew
/// window. A zero expiry is never valid.
pub fn is_token_valid(token: &str, expires_at_secs: i64, now_ms: i64) -> bool {
    if token.is_empty() || expires_at_secs == 0 {
        return false;
    }
    expires_at_secs.saturating_mul(1000) > now_ms.saturating_add(EXPIRY_SKEW_MS)
}

/// Process-wide holder of the current session, mirrored to durable storage.
///
/// Construct once at startup with [`SessionStore::open`] and share it by
/// `Arc`. Every mutation writes through to storage before returning; the
/// in-memory copy stays authoritative when storage fails.
pub struct SessionStore {
    state: Mutex<Session>,
    storage: Arc<dyn SessionStorage>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("state", &*self.lock())
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Hydrate from whatever `storage` already holds.
    pub fn open(storage: Arc<dyn SessionStorage>, clock: Arc<dyn Clock>) -> Self {
        let session = Self::hydrate(storage.as_ref());
        debug!(
            has_access = !session.access_token.is_empty(),
            has_refresh = !session.refresh_token.is_empty(),
            has_profile = session.profile.is_some(),
            "Session hydrated"
        );
        Self {
            state: Mutex::new(session),
            storage,
            clock,
        }
    }

    /// Ephemeral store on the system clock, nothing survives the process.
    pub fn in_memory() -> Self {
        Self::open(Arc::new(MemoryStorage::new()), Arc::new(SystemClock))
    }

    // ===== Reads =====

    /// The access token if it is still valid, otherwise an empty string.
    pub fn access_token(&self) -> String {
        let now = self.clock.now_millis();
        let state = self.lock();
        if state.has_valid_access_token(now) {
            state.access_token.clone()
        } else {
            String::new()
        }
    }

    /// The refresh token if it is still valid. An invalid refresh token means
    /// the session can never be recovered, so the whole session is torn down.
    pub fn refresh_token(&self) -> String {
        let now = self.clock.now_millis();
        let mut state = self.lock();
        if state.has_valid_refresh_token(now) {
            return state.refresh_token.clone();
        }
        self.reset(&mut state);
        String::new()
    }

    /// True while either token is valid. Clears the session otherwise.
    pub fn is_authenticated(&self) -> bool {
        let now = self.clock.now_millis();
        let mut state = self.lock();
        if state.has_valid_access_token(now) || state.has_valid_refresh_token(now) {
            return true;
        }
        self.reset(&mut state);
        false
    }

    pub fn profile(&self) -> Option<UserProfile> {
        self.lock().profile.clone()
    }

    /// Copy of the raw state, valid or not.
    pub fn snapshot(&self) -> Session {
        self.lock().clone()
    }

    // ===== Mutations =====

    /// Replace the whole session. Fields missing from the payload become
    /// absent rather than keeping values from the previous session.
    pub fn set_session(&self, payload: SessionPayload) {
        let mut state = self.lock();
        *state = Session::from(payload);
        self.persist(&state);
        info!(
            access_expires_at = state.access_token_expires_at,
            refresh_expires_at = state.refresh_token_expires_at,
            "Session installed"
        );
    }

    /// Reset to the never-logged-in state. Safe to call repeatedly.
    pub fn clear_session(&self) {
        let mut state = self.lock();
        self.reset(&mut state);
    }

    pub fn update_profile(&self, profile: Option<UserProfile>) {
        let mut state = self.lock();
        state.profile = profile;
        self.persist(&state);
    }

    // ===== Internals =====

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset(&self, state: &mut Session) {
        if state.is_empty() {
            debug!("Session already clear");
        } else {
            info!("Session cleared");
        }
        *state = Session::default();
        self.persist(state);
    }

    fn hydrate(storage: &dyn SessionStorage) -> Session {
        let read = |key: &str| match storage.get(key) {
            Ok(value) => value.unwrap_or_default(),
            Err(e) => {
                warn!(key, error = %e, "Failed to read session key from storage");
                String::new()
            }
        };
        let read_secs = |key: &str| read(key).trim().parse::<i64>().unwrap_or(0);

        let profile_raw = read(PROFILE_KEY);
        let profile = if profile_raw.is_empty() {
            None
        } else {
            match serde_json::from_str::<UserProfile>(&profile_raw) {
                Ok(profile) => Some(profile),
                Err(e) => {
                    warn!(error = %e, "Failed to parse profile from storage");
                    None
                }
            }
        };

        Session {
            access_token: read(ACCESS_TOKEN_KEY),
            refresh_token: read(REFRESH_TOKEN_KEY),
            access_token_expires_at: read_secs(ACCESS_EXP_KEY),
            refresh_token_expires_at: read_secs(REFRESH_EXP_KEY),
            profile,
        }
    }

    /// Mirror `state` to storage in one batch, so a backend that writes a
    /// file never holds half of one session and half of another.
    fn persist(&self, state: &Session) {
        let access_exp = state.access_token_expires_at.to_string();
        let refresh_exp = state.refresh_token_expires_at.to_string();
        let profile = match &state.profile {
            Some(profile) => match serde_json::to_string(profile) {
                Ok(json) => Some(json),
                Err(e) => {
                    warn!(error = %e, "Failed to serialize profile");
                    None
                }
            },
            None => None,
        };

        let has_access = !state.access_token.is_empty();
        let has_refresh = !state.refresh_token.is_empty();
        let updates = [
            (ACCESS_TOKEN_KEY, has_access.then_some(state.access_token.as_str())),
            (ACCESS_EXP_KEY, has_access.then_some(access_exp.as_str())),
            (REFRESH_TOKEN_KEY, has_refresh.then_some(state.refresh_token.as_str())),
            (REFRESH_EXP_KEY, has_refresh.then_some(refresh_exp.as_str())),
            (PROFILE_KEY, profile.as_deref()),
        ];
        if let Err(e) = self.storage.write_all(&updates) {
            warn!(error = %e, "Failed to persist session");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
