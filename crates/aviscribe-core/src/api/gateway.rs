//! Authenticated request gateway.
//!
//! Every outbound call goes through [`RequestGateway`]. It attaches the
//! current access token, and when the server answers 401 it refreshes the
//! session exactly once no matter how many calls fail at the same time:
//!
//! - the first failing call becomes the leader and issues `POST /auth/refresh`
//! - calls that fail while the refresh is in flight are parked in a FIFO queue
//! - on success the leader replays itself, then every parked call, with the
//!   new token
//! - on failure every parked call is rejected with the refresh error and the
//!   session is torn down
//!
//! A call whose 401 arrives after another call already refreshed is replayed
//! with the current token rather than refreshing again. Each replay bumps the
//! call's attempt count; a call that is still rejected after one replay fails
//! with [`AuthRequiredReason::RetryExhausted`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use super::transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};
use super::{ApiError, AuthRequiredReason};
use crate::auth::{SessionPayload, SessionStore};

/// Refresh endpoint, relative to the API base URL
pub const REFRESH_PATH: &str = "/auth/refresh";

/// How many refresh-and-replay rounds a single call may go through.
pub const MAX_REFRESH_ATTEMPTS: u32 = 1;

/// Buffered events per subscriber before the oldest are dropped
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Outcomes the UI layer reacts to: warnings, error toasts, login redirects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session is gone; the user has to sign in again.
    AuthRequired { reason: AuthRequiredReason },
    /// A call failed for a reason other than authentication.
    RequestFailed { message: String },
}

/// A request plus how many times it has already been replayed.
#[derive(Debug, Clone)]
pub struct Call {
    request: ApiRequest,
    attempt: u32,
}

impl Call {
    pub fn new(request: ApiRequest) -> Self {
        Self {
            request,
            attempt: 0,
        }
    }

    pub fn request(&self) -> &ApiRequest {
        &self.request
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The access token this call went out with, if any.
    pub fn sent_with(&self) -> Option<&str> {
        self.request.bearer()
    }

    /// Same call, one attempt later, carrying `token`.
    fn replayed(&self, token: &str) -> Result<Self, ApiError> {
        let mut request = self.request.clone();
        request.set_bearer(token)?;
        Ok(Self {
            request,
            attempt: self.attempt + 1,
        })
    }
}

/// A call parked until the in-flight refresh settles.
struct PendingRequest {
    call: Call,
    resume: oneshot::Sender<Result<ApiResponse, ApiError>>,
}

enum RefreshState {
    Idle,
    Refreshing { queue: VecDeque<PendingRequest> },
}

/// What a 401'd call does once it has looked at the refresh state.
enum Role {
    Lead(Call),
    Follow(oneshot::Receiver<Result<ApiResponse, ApiError>>),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

pub struct RequestGateway {
    session: Arc<SessionStore>,
    transport: Arc<dyn Transport>,
    /// Used only for `/auth/refresh`; never sees gateway logic.
    refresh_transport: Arc<dyn Transport>,
    state: Mutex<RefreshState>,
    events: broadcast::Sender<SessionEvent>,
}

impl fmt::Debug for RequestGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestGateway")
            .field("refreshing", &self.is_refreshing())
            .field("pending_requests", &self.pending_requests())
            .finish_non_exhaustive()
    }
}

impl RequestGateway {
    pub fn new(
        session: Arc<SessionStore>,
        transport: Arc<dyn Transport>,
        refresh_transport: Arc<dyn Transport>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            session,
            transport,
            refresh_transport,
            state: Mutex::new(RefreshState::Idle),
            events,
        }
    }

    /// Gateway over one reqwest client. The refresh path gets its own handle
    /// on the same connection pool.
    pub fn with_reqwest(session: Arc<SessionStore>, transport: ReqwestTransport) -> Self {
        let refresh_transport = transport.clone();
        Self::new(session, Arc::new(transport), Arc::new(refresh_transport))
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.lock_state(), RefreshState::Refreshing { .. })
    }

    /// Calls currently parked behind the in-flight refresh.
    pub fn pending_requests(&self) -> usize {
        match &*self.lock_state() {
            RefreshState::Idle => 0,
            RefreshState::Refreshing { queue } => queue.len(),
        }
    }

    // ===== Public request API =====

    /// Send a request with the current credentials, recovering from an
    /// expired access token if the session allows it.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut call = Call::new(request);
        let token = self.session.access_token();
        if token.is_empty() {
            debug!(path = %call.request.path, "Sending without credentials");
        } else {
            call.request.set_bearer(&token)?;
        }

        match self.send(&call).await {
            Err(ApiError::Unauthorized) => self.recover(call).await,
            other => other,
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.execute(ApiRequest::get(path)).await?.json()
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(ApiRequest::post(path).json(body)?).await?.json()
    }

    /// POST where the response body is of no interest.
    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), ApiError> {
        self.execute(ApiRequest::post(path).json(body)?).await?;
        Ok(())
    }

    // ===== Request lifecycle =====

    async fn send(&self, call: &Call) -> Result<ApiResponse, ApiError> {
        let request = &call.request;
        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(method = %request.method, path = %request.path, error = %e, "Request failed");
                self.publish(SessionEvent::RequestFailed {
                    message: e.user_message(),
                });
                return Err(e);
            }
        };

        match response.error_for_status() {
            Ok(response) => Ok(response),
            Err(ApiError::Unauthorized) => {
                debug!(path = %request.path, attempt = call.attempt, "Unauthorized");
                Err(ApiError::Unauthorized)
            }
            Err(e) => {
                warn!(method = %request.method, path = %request.path, error = %e, "Request rejected");
                self.publish(SessionEvent::RequestFailed {
                    message: e.user_message(),
                });
                Err(e)
            }
        }
    }

    /// A replayed call already carries its token.
    fn replay(&self, call: Call) -> BoxFuture<'_, Result<ApiResponse, ApiError>> {
        async move {
            match self.send(&call).await {
                Err(ApiError::Unauthorized) => self.recover(call).await,
                other => other,
            }
        }
        .boxed()
    }

    async fn replay_with(&self, call: Call, token: &str) -> Result<ApiResponse, ApiError> {
        match call.replayed(token) {
            Ok(call) => self.replay(call).await,
            Err(e) => Err(e),
        }
    }

    /// Handle a 401: give up, replay with a newer token, park behind the
    /// running refresh, or lead a new one.
    async fn recover(&self, call: Call) -> Result<ApiResponse, ApiError> {
        if call.attempt >= MAX_REFRESH_ATTEMPTS {
            return Err(self.require_login(AuthRequiredReason::RetryExhausted));
        }

        // Rejected for a token that has since been replaced: another call
        // already refreshed, so just try again with the current one.
        let current = self.session.access_token();
        if !current.is_empty() && call.sent_with() != Some(current.as_str()) {
            debug!(path = %call.request.path, "Token refreshed meanwhile, replaying");
            return self.replay_with(call, &current).await;
        }

        let refresh_token = self.session.refresh_token();
        if refresh_token.is_empty() {
            return Err(self.require_login(AuthRequiredReason::MissingRefreshToken));
        }

        // Check and transition under one lock; nothing awaits in between.
        let role = {
            let mut state = self.lock_state();
            match &mut *state {
                RefreshState::Refreshing { queue } => {
                    let (resume, waiter) = oneshot::channel();
                    queue.push_back(PendingRequest { call, resume });
                    debug!(queued = queue.len(), "Refresh in flight, parking request");
                    Role::Follow(waiter)
                }
                RefreshState::Idle => {
                    *state = RefreshState::Refreshing {
                        queue: VecDeque::new(),
                    };
                    Role::Lead(call)
                }
            }
        };

        match role {
            Role::Follow(waiter) => waiter.await.unwrap_or(Err(ApiError::Interrupted)),
            Role::Lead(call) => self.lead_refresh(call, &refresh_token).await,
        }
    }

    async fn lead_refresh(&self, call: Call, refresh_token: &str) -> Result<ApiResponse, ApiError> {
        let mut guard = RefreshGuard {
            gateway: self,
            settled: false,
        };
        debug!("Refreshing session");

        match self.request_refresh(refresh_token).await {
            Ok(payload) => {
                let token = payload.access_token.clone();
                // Install before going idle so late 401s see the new tokens.
                self.session.set_session(payload);
                let queue = guard.settle();
                info!(replaying = queue.len() + 1, "Session refreshed");

                let token = token.as_str();
                let parked = join_all(queue.into_iter().map(|pending| async move {
                    let result = self.replay_with(pending.call, token).await;
                    // The parked caller may have been dropped meanwhile
                    let _ = pending.resume.send(result);
                }));
                let (own, _) = futures::join!(self.replay_with(call, token), parked);
                own
            }
            Err(e) => {
                self.session.clear_session();
                let queue = guard.settle();
                warn!(error = %e, rejected = queue.len(), "Session refresh failed");

                let reason = AuthRequiredReason::RefreshFailed(Box::new(e));
                for pending in queue {
                    let _ = pending
                        .resume
                        .send(Err(ApiError::AuthRequired(reason.clone())));
                }
                Err(self.require_login(reason))
            }
        }
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<SessionPayload, ApiError> {
        let request = ApiRequest::post(REFRESH_PATH).json(&RefreshRequest { refresh_token })?;
        let response = self
            .refresh_transport
            .send(&request)
            .await?
            .error_for_status()?;
        let payload: SessionPayload = response.json()?;
        if payload.access_token.is_empty() {
            return Err(ApiError::InvalidResponse(
                "Refresh response carried no access token".to_string(),
            ));
        }
        Ok(payload)
    }

    /// Tear down the session and tell the UI to send the user to login.
    fn require_login(&self, reason: AuthRequiredReason) -> ApiError {
        self.session.clear_session();
        warn!(reason = %reason, "Authentication required");
        self.publish(SessionEvent::AuthRequired {
            reason: reason.clone(),
        });
        ApiError::AuthRequired(reason)
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Back to idle, handing over whatever was parked.
    fn finish_refresh(&self) -> VecDeque<PendingRequest> {
        let previous = std::mem::replace(&mut *self.lock_state(), RefreshState::Idle);
        match previous {
            RefreshState::Refreshing { queue } => queue,
            RefreshState::Idle => VecDeque::new(),
        }
    }
}

/// Returns the gateway to idle even if the leading call is dropped mid-refresh.
/// Parked calls then see their sender vanish and fail with `Interrupted`.
struct RefreshGuard<'a> {
    gateway: &'a RequestGateway,
    settled: bool,
}

impl RefreshGuard<'_> {
    fn settle(&mut self) -> VecDeque<PendingRequest> {
        self.settled = true;
        self.gateway.finish_refresh()
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let abandoned = self.gateway.finish_refresh();
            warn!(abandoned = abandoned.len(), "Session refresh abandoned");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
