//! Account endpoints under `/auth`.
//!
//! Everything here goes through the [`RequestGateway`], so credentials and
//! refresh are handled the same way as for any other call. Login and
//! register install the returned session; profile calls keep the stored
//! profile in step with the server.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::gateway::RequestGateway;
use super::ApiError;
use crate::auth::{SessionPayload, SessionStore, UserProfile};

const LOGIN_PATH: &str = "/auth/login";
const REGISTER_PATH: &str = "/auth/register";
const PROFILE_PATH: &str = "/auth/me";
const UPDATE_PROFILE_PATH: &str = "/auth/profile";
const CHANGE_PASSWORD_PATH: &str = "/auth/change-password";

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub password: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

/// Typed access to the account endpoints.
#[derive(Debug, Clone)]
pub struct AuthApi {
    gateway: Arc<RequestGateway>,
}

impl AuthApi {
    pub fn new(gateway: Arc<RequestGateway>) -> Self {
        Self { gateway }
    }

    fn session(&self) -> &SessionStore {
        self.gateway.session()
    }

    /// Log in and install the returned session.
    pub async fn login(&self, request: &LoginRequest) -> Result<Option<UserProfile>, ApiError> {
        let payload: SessionPayload = self.gateway.post_json(LOGIN_PATH, request).await?;
        let profile = payload.profile.clone();
        self.session().set_session(payload);
        info!(username = %request.username, "Logged in");
        Ok(profile)
    }

    /// Create an account; the server logs the new user straight in.
    pub async fn register(
        &self,
        request: &RegisterRequest,
    ) -> Result<Option<UserProfile>, ApiError> {
        let payload: SessionPayload = self.gateway.post_json(REGISTER_PATH, request).await?;
        let profile = payload.profile.clone();
        self.session().set_session(payload);
        info!(username = %request.username, "Registered");
        Ok(profile)
    }

    /// Fetch the current profile and store it.
    pub async fn fetch_profile(&self) -> Result<UserProfile, ApiError> {
        let profile: UserProfile = self.gateway.get_json(PROFILE_PATH).await?;
        self.session().update_profile(Some(profile.clone()));
        Ok(profile)
    }

    /// Save profile changes, then re-read the profile from the server.
    pub async fn update_profile(
        &self,
        request: &UpdateProfileRequest,
    ) -> Result<UserProfile, ApiError> {
        self.gateway.post(UPDATE_PROFILE_PATH, request).await?;
        self.fetch_profile().await
    }

    pub async fn change_password(&self, request: &ChangePasswordRequest) -> Result<(), ApiError> {
        self.gateway.post(CHANGE_PASSWORD_PATH, request).await
    }

    /// Forget the session locally. The server keeps no logout state.
    pub fn logout(&self) {
        self.session().clear_session();
        info!("Logged out");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use reqwest::{Method, StatusCode};

    use super::*;
    use crate::api::transport::{ApiRequest, ApiResponse, Transport};
    use crate::auth::{ManualClock, MemoryStorage};

    const NOW: i64 = 1_700_000_000;

    /// Minimal account server: issues "a1", accepts it, remembers bodies.
    #[derive(Default)]
    struct FakeAccounts {
        display_name: Mutex<String>,
        requests: Mutex<Vec<(Method, String, Option<serde_json::Value>)>>,
    }

    #[async_trait]
    impl Transport for FakeAccounts {
        async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
            self.requests.lock().unwrap().push((
                request.method.clone(),
                request.path.clone(),
                request.body.clone(),
            ));
            let session = serde_json::json!({
                "accessToken": "a1",
                "refreshToken": "r1",
                "accessTokenExpiresAt": NOW + 3600,
                "refreshTokenExpiresAt": NOW + 86400,
                "profile": {"id": 1, "username": "pilot", "displayName": "Pilot", "role": "USER"}
            });

            let authed = request.bearer() == Some("a1");
            let (status, body) = match (request.path.as_str(), authed) {
                ("/auth/login", _) => {
                    let password = request.body.as_ref().and_then(|b| b["password"].as_str());
                    if password == Some("hunter22") {
                        (StatusCode::OK, session.to_string())
                    } else {
                        (
                            StatusCode::BAD_REQUEST,
                            r#"{"code":400,"message":"Wrong username or password"}"#.to_string(),
                        )
                    }
                }
                ("/auth/register", _) => (StatusCode::OK, session.to_string()),
                (_, false) => (StatusCode::UNAUTHORIZED, String::new()),
                ("/auth/me", true) => {
                    let name = self.display_name.lock().unwrap().clone();
                    (
                        StatusCode::OK,
                        serde_json::json!({"id": 1, "username": "pilot", "displayName": name})
                            .to_string(),
                    )
                }
                ("/auth/profile", true) => {
                    let name = request
                        .body
                        .as_ref()
                        .and_then(|b| b["displayName"].as_str())
                        .unwrap_or_default()
                        .to_string();
                    *self.display_name.lock().unwrap() = name;
                    (StatusCode::OK, String::new())
                }
                ("/auth/change-password", true) => (StatusCode::OK, String::new()),
                _ => (StatusCode::NOT_FOUND, String::new()),
            };
            Ok(ApiResponse::new(status, body))
        }
    }

    fn api() -> (AuthApi, Arc<SessionStore>, Arc<FakeAccounts>) {
        let session = Arc::new(SessionStore::open(
            Arc::new(MemoryStorage::new()),
            Arc::new(ManualClock::at_secs(NOW)),
        ));
        let server = Arc::new(FakeAccounts::default());
        let gateway = RequestGateway::new(session.clone(), server.clone(), server.clone());
        (AuthApi::new(Arc::new(gateway)), session, server)
    }

    fn login_request(password: &str) -> LoginRequest {
        LoginRequest {
            username: "pilot".to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn test_login_installs_session() {
        let (api, session, _) = api();

        let profile = api.login(&login_request("hunter22")).await.unwrap();

        assert_eq!(profile.unwrap().role.as_deref(), Some("USER"));
        assert_eq!(session.access_token(), "a1");
        assert!(session.is_authenticated());
    }

    #[tokio::test]
    async fn test_login_failure_leaves_session_empty() {
        let (api, session, _) = api();

        let err = api.login(&login_request("wrong")).await.unwrap_err();

        assert_eq!(err.user_message(), "Wrong username or password");
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_register_sends_camel_case_body() {
        let (api, session, server) = api();

        api.register(&RegisterRequest {
            username: "pilot".to_string(),
            phone: None,
            password: "hunter22".to_string(),
            display_name: "Pilot".to_string(),
        })
        .await
        .unwrap();

        let requests = server.requests.lock().unwrap().clone();
        let body = requests[0].2.clone().unwrap();
        assert_eq!(body["displayName"], "Pilot");
        assert!(body.get("phone").is_none());
        assert_eq!(session.profile().unwrap().label(), "Pilot");
    }

    #[tokio::test]
    async fn test_update_profile_refetches() {
        let (api, session, server) = api();
        api.login(&login_request("hunter22")).await.unwrap();

        let profile = api
            .update_profile(&UpdateProfileRequest {
                display_name: "Captain".to_string(),
                phone: Some("5550100".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(profile.display_name.as_deref(), Some("Captain"));
        assert_eq!(session.profile(), Some(profile));
        let paths: Vec<_> = server
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|(method, path, _)| format!("{} {}", method, path))
            .collect();
        assert_eq!(
            paths,
            vec!["POST /auth/login", "POST /auth/profile", "GET /auth/me"]
        );
    }

    #[tokio::test]
    async fn test_change_password_and_logout() {
        let (api, session, server) = api();
        api.login(&login_request("hunter22")).await.unwrap();

        api.change_password(&ChangePasswordRequest {
            old_password: "hunter22".to_string(),
            new_password: "hunter23".to_string(),
        })
        .await
        .unwrap();
        let requests = server.requests.lock().unwrap().clone();
        assert_eq!(
            requests.last().and_then(|r| r.2.clone()),
            Some(serde_json::json!({"oldPassword": "hunter22", "newPassword": "hunter23"}))
        );

        api.logout();
        assert!(!session.is_authenticated());
        assert!(api.fetch_profile().await.unwrap_err().is_auth_required());
    }
}
