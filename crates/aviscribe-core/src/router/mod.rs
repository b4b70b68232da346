//! Client-side routing and the navigation guard.
//!
//! `Router` holds the route table and resolves locations to the chain of
//! matched records. `NavigationGuard` decides, before each navigation,
//! whether to allow it or redirect based on the session's verdict.

pub mod guard;
pub mod routes;

pub use guard::{decide, login_redirect, NavigationDecision, NavigationGuard, Redirect, HOME_PATH, LOGIN_PATH};
pub use routes::{ResolvedRoute, RouteMeta, RouteRecord, Router};
