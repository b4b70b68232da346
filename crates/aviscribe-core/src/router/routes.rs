use std::collections::BTreeMap;

/// Application name appended to every page title
const APP_TITLE: &str = "Aviscribe";

/// Per-route flags. Nested routes inherit nothing implicitly; the guard takes
/// the union across every matched record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteMeta {
    pub title: Option<&'static str>,
    pub requires_auth: bool,
    pub guest_only: bool,
}

impl RouteMeta {
    pub const fn titled(title: &'static str) -> Self {
        Self {
            title: Some(title),
            requires_auth: false,
            guest_only: false,
        }
    }

    pub const fn requires_auth(mut self) -> Self {
        self.requires_auth = true;
        self
    }

    pub const fn guest_only(mut self) -> Self {
        self.guest_only = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct RouteRecord {
    /// Absolute for top-level records, relative for children. `:name`
    /// segments capture a parameter.
    pub path: &'static str,
    pub name: Option<&'static str>,
    pub meta: RouteMeta,
    pub children: Vec<RouteRecord>,
}

impl RouteRecord {
    pub fn new(path: &'static str, name: &'static str, meta: RouteMeta) -> Self {
        Self {
            path,
            name: Some(name),
            meta,
            children: Vec::new(),
        }
    }

    /// Unnamed parent that only matches through one of its children.
    pub fn layout(path: &'static str, meta: RouteMeta, children: Vec<RouteRecord>) -> Self {
        Self {
            path,
            name: None,
            meta,
            children,
        }
    }
}

/// The outcome of matching a location against the route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    /// Path plus query, exactly as navigated to
    pub full_path: String,
    pub path: String,
    pub name: Option<&'static str>,
    pub params: BTreeMap<String, String>,
    /// Metadata of every matched record, outermost first
    pub matched: Vec<RouteMeta>,
}

impl ResolvedRoute {
    /// A location nothing in the table matched: no flags, no title.
    fn unmatched(full_path: &str, path: &str) -> Self {
        Self {
            full_path: full_path.to_string(),
            path: path.to_string(),
            name: None,
            params: BTreeMap::new(),
            matched: Vec::new(),
        }
    }

    pub fn is_matched(&self) -> bool {
        !self.matched.is_empty()
    }

    pub fn requires_auth(&self) -> bool {
        self.matched.iter().any(|m| m.requires_auth)
    }

    pub fn guest_only(&self) -> bool {
        self.matched.iter().any(|m| m.guest_only)
    }

    /// Title of the innermost record that has one.
    pub fn title(&self) -> Option<&'static str> {
        self.matched.iter().rev().find_map(|m| m.title)
    }

    pub fn document_title(&self) -> String {
        match self.title() {
            Some(title) => format!("{} | {}", title, APP_TITLE),
            None => APP_TITLE.to_string(),
        }
    }
}

struct Match<'r> {
    chain: Vec<&'r RouteRecord>,
    params: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Router {
    routes: Vec<RouteRecord>,
}

impl Router {
    pub fn new(routes: Vec<RouteRecord>) -> Self {
        Self { routes }
    }

    /// The Aviscribe application routes.
    pub fn aviscribe() -> Self {
        Self::new(vec![
            RouteRecord::new("/", "landing", RouteMeta::titled("Welcome")),
            RouteRecord::new("/login", "login", RouteMeta::titled("Log in").guest_only()),
            RouteRecord::new("/register", "register", RouteMeta::titled("Register").guest_only()),
            RouteRecord::layout(
                "/app",
                RouteMeta::default().requires_auth(),
                vec![
                    RouteRecord::new("", "upload", RouteMeta::titled("Workspace").requires_auth()),
                    RouteRecord::new("tasks", "taskList", RouteMeta::titled("Tasks").requires_auth()),
                    RouteRecord::new(
                        "result/:id",
                        "workspaceResult",
                        RouteMeta::titled("Result").requires_auth(),
                    ),
                    RouteRecord::new(
                        "tasks/result/:id",
                        "taskResult",
                        RouteMeta::titled("Result").requires_auth(),
                    ),
                    RouteRecord::new("profile", "profile", RouteMeta::titled("Profile").requires_auth()),
                ],
            ),
        ])
    }

    /// Match `full_path` (query and fragment allowed) against the table.
    /// Unknown locations resolve to an unmatched route rather than failing.
    pub fn resolve(&self, full_path: &str) -> ResolvedRoute {
        let path = full_path
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let found = self
            .routes
            .iter()
            .find_map(|record| Self::match_record(record, &segments));

        match found {
            Some(found) => ResolvedRoute {
                full_path: full_path.to_string(),
                path: path.to_string(),
                name: found.chain.last().and_then(|r| r.name),
                params: found.params,
                matched: found.chain.iter().map(|r| r.meta).collect(),
            },
            None => ResolvedRoute::unmatched(full_path, path),
        }
    }

    fn match_record<'r>(record: &'r RouteRecord, segments: &[&str]) -> Option<Match<'r>> {
        let pattern: Vec<&str> = record.path.split('/').filter(|s| !s.is_empty()).collect();
        if pattern.len() > segments.len() {
            return None;
        }

        let mut params = BTreeMap::new();
        for (expected, actual) in pattern.iter().zip(segments) {
            match expected.strip_prefix(':') {
                Some(name) => {
                    params.insert(name.to_string(), (*actual).to_string());
                }
                None if expected == actual => {}
                None => return None,
            }
        }
        let rest = &segments[pattern.len()..];

        if record.children.is_empty() {
            return rest.is_empty().then(|| Match {
                chain: vec![record],
                params,
            });
        }

        record.children.iter().find_map(|child| {
            let inner = Self::match_record(child, rest)?;
            let mut chain = Vec::with_capacity(inner.chain.len() + 1);
            chain.push(record);
            chain.extend(inner.chain);
            let mut merged = params.clone();
            merged.extend(inner.params);
            Some(Match {
                chain,
                params: merged,
            })
        })
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::aviscribe()
    }
}
