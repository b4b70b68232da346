//! REST API access for the Aviscribe backend.
//!
//! This module provides the `RequestGateway` that every outbound call goes
//! through, the raw `Transport` it sends on, and `AuthApi` for the account
//! endpoints.
//!
//! The API uses JWT bearer tokens. Expired access tokens are renewed through
//! `POST /auth/refresh` with a single refresh shared by all failing calls.

pub mod auth;
pub mod error;
pub mod gateway;
pub mod transport;

pub use auth::{AuthApi, ChangePasswordRequest, LoginRequest, RegisterRequest, UpdateProfileRequest};
pub use error::{ApiError, AuthRequiredReason, ErrorDetail};
pub use gateway::{Call, RequestGateway, SessionEvent, MAX_REFRESH_ATTEMPTS, REFRESH_PATH};
pub use transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport, DEFAULT_TIMEOUT_SECS};
