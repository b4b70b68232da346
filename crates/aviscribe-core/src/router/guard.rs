use std::sync::Arc;

use tracing::debug;
use url::form_urlencoded;

use super::routes::{ResolvedRoute, Router};
use crate::auth::SessionStore;

/// Where unauthenticated users are sent
pub const LOGIN_PATH: &str = "/login";

/// Default landing page once signed in
pub const HOME_PATH: &str = "/app";

/// Query parameter carrying the page to return to after login
pub const REDIRECT_PARAM: &str = "redirect";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl Redirect {
    pub fn to(path: &str) -> Self {
        Self {
            path: path.to_string(),
            query: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Path with the query string encoded, ready to navigate to.
    pub fn location(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.query.iter())
            .finish();
        format!("{}?{}", self.path, query)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationDecision {
    Allow,
    Redirect(Redirect),
}

/// Send the user to login, remembering where they were headed.
pub fn login_redirect(return_to: &str) -> Redirect {
    let return_to = if return_to.is_empty() { HOME_PATH } else { return_to };
    Redirect::to(LOGIN_PATH).with_param(REDIRECT_PARAM, return_to)
}

/// The guard's decision table, independent of any store.
pub fn decide(target: &ResolvedRoute, authenticated: bool) -> NavigationDecision {
    if target.requires_auth() && !authenticated {
        return NavigationDecision::Redirect(login_redirect(&target.full_path));
    }
    if target.guest_only() && authenticated {
        return NavigationDecision::Redirect(Redirect::to(HOME_PATH));
    }
    NavigationDecision::Allow
}

/// Runs before every navigation. Reading the verdict may clear an expired
/// session; nothing else is touched.
#[derive(Debug, Clone)]
pub struct NavigationGuard {
    session: Arc<SessionStore>,
    router: Router,
}

impl NavigationGuard {
    pub fn new(session: Arc<SessionStore>, router: Router) -> Self {
        Self { session, router }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn check(&self, target: &ResolvedRoute) -> NavigationDecision {
        let authenticated = self.session.is_authenticated();
        let decision = decide(target, authenticated);
        debug!(path = %target.full_path, authenticated, ?decision, "Navigation checked");
        decision
    }

    /// Resolve `full_path` and check it in one go.
    pub fn navigate(&self, full_path: &str) -> (ResolvedRoute, NavigationDecision) {
        let target = self.router.resolve(full_path);
        let decision = self.check(&target);
        (target, decision)
    }
}
