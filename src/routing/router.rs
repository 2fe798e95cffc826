//! Route lookup.
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan in priority order (acceptable for typical route counts)
//! - Explicit no-match rather than silent default

use axum::http::request::Parts;

use crate::config::RouteConfig;
use crate::routing::matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher};

/// A compiled route.
#[derive(Debug)]
pub struct Route {
    pub name: String,
    /// Job submission: trust policy and quota apply.
    pub metered: bool,
    pub priority: u32,
    matcher: AndMatcher,
}

impl Route {
    fn compile(config: RouteConfig) -> Self {
        let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
        if let Some(host) = config.host {
            matchers.push(Box::new(HostMatcher::new(host)));
        }
        if let Some(prefix) = config.path_prefix {
            matchers.push(Box::new(PathPrefixMatcher::new(prefix)));
        }
        Self {
            name: config.name,
            metered: config.metered,
            priority: config.priority,
            matcher: AndMatcher::new(matchers),
        }
    }
}

#[derive(Debug)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Compile routes; higher priority first, declaration order breaks ties.
    pub fn from_config(routes: Vec<RouteConfig>) -> Self {
        let mut routes: Vec<Route> = routes.into_iter().map(Route::compile).collect();
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { routes }
    }

    pub fn match_request(&self, req: &Parts) -> Option<&Route> {
        self.routes.iter().find(|route| route.matcher.matches(req))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}
