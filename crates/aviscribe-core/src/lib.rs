//! Client-side session layer for Aviscribe.
//!
//! - [`auth`]: the persisted session and its expiry rules
//! - [`api`]: the request gateway with single-flight token refresh, plus the
//!   account endpoints
//! - [`router`]: the route table and navigation guard
//! - [`config`]: where to connect and where to keep the session
//!
//! A front end builds one [`auth::SessionStore`] at startup and hands it to
//! both the gateway and the guard:
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use std::sync::Arc;
//! use aviscribe_core::api::AuthApi;
//! use aviscribe_core::config::Config;
//! use aviscribe_core::router::{NavigationGuard, Router};
//!
//! let config = Config::load()?;
//! let session = config.open_session()?;
//! let gateway = Arc::new(config.gateway(session.clone())?);
//! let guard = NavigationGuard::new(session, Router::aviscribe());
//!
//! let profile = AuthApi::new(gateway).fetch_profile().await?;
//! let (_, decision) = guard.navigate("/app/tasks");
//! # let _ = (profile, decision);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod router;

pub use api::{ApiError, AuthApi, RequestGateway, SessionEvent};
pub use auth::{SessionPayload, SessionStore, UserProfile};
pub use config::Config;
pub use router::{NavigationDecision, NavigationGuard, Router};
