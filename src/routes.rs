use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{status_response, StartupError};
use crate::handler::FileHandler;
use crate::resolve::decode_url_path;

/// What a registered pattern leads to.
pub enum RouteTarget {
    Files(Arc<FileHandler>),
    Redirect(String),
}

pub enum Lookup<'a> {
    Target(&'a RouteTarget),
    /// `path/` is a registered subtree but `path` itself is not
    AddSlash,
    Missing,
}

/// Immutable pattern table built once at startup.
///
/// A pattern ending in `/` claims its whole subtree, any other pattern only
/// itself. The longest matching pattern wins.
pub struct RouteTable {
    // Longest pattern first
    routes: Vec<(String, RouteTarget)>,
}

impl RouteTable {
    /// Register `handlers` in order. Unless a mount claims `root_route`, it
    /// redirects to the first mount.
    pub fn new(handlers: Vec<FileHandler>, root_route: &str) -> Result<Self, StartupError> {
        let first = handlers
            .first()
            .map(|h| h.mount().route.clone())
            .ok_or(StartupError::NoRoutes)?;

        let mut routes: Vec<(String, RouteTarget)> = Vec::with_capacity(handlers.len() + 1);
        for handler in handlers {
            let route = handler.mount().route.clone();
            if route.is_empty() {
                return Err(StartupError::InvalidRoute(route));
            }
            if routes.iter().any(|(existing, _)| *existing == route) {
                return Err(StartupError::DuplicateRoute(route));
            }
            info!(
                "serving local path {:?} on {:?}",
                handler.mount().root.display().to_string(),
                route
            );
            routes.push((route, RouteTarget::Files(Arc::new(handler))));
        }

        if !root_route.is_empty() && !routes.iter().any(|(r, _)| r == root_route) {
            info!("redirecting to {:?} from {:?}", first, root_route);
            routes.push((root_route.to_string(), RouteTarget::Redirect(first)));
        }

        routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Ok(Self { routes })
    }

    #[cfg(test)]
    fn patterns(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|(pattern, _)| pattern.as_str())
    }

    fn is_registered(&self, pattern: &str) -> bool {
        self.routes.iter().any(|(p, _)| p == pattern)
    }

    /// Find the target for a decoded request path.
    pub fn lookup(&self, path: &str) -> Lookup<'_> {
        if !path.ends_with('/') && !self.is_registered(path) {
            let with_slash = format!("{path}/");
            if self.is_registered(&with_slash) {
                return Lookup::AddSlash;
            }
        }

        self.routes
            .iter()
            .find(|(pattern, _)| pattern_matches(pattern, path))
            .map(|(_, target)| Lookup::Target(target))
            .unwrap_or(Lookup::Missing)
    }

    /// The table as a router: every request is dispatched by [`Self::lookup`].
    pub fn into_router(self) -> Router {
        Router::new()
            .fallback(dispatch)
            .layer(DefaultBodyLimit::disable())
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::new(self))
    }
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    if pattern.ends_with('/') {
        path.starts_with(pattern)
    } else {
        path == pattern
    }
}

async fn dispatch(State(table): State<Arc<RouteTable>>, req: Request) -> Response {
    let path = decode_url_path(req.uri().path());

    match table.lookup(&path) {
        Lookup::Target(RouteTarget::Files(handler)) => handler.handle(req).await,
        Lookup::Target(RouteTarget::Redirect(to)) => Redirect::temporary(to).into_response(),
        Lookup::AddSlash => {
            let mut location = format!("{}/", req.uri().path());
            if let Some(query) = req.uri().query() {
                location.push('?');
                location.push_str(query);
            }
            (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
        }
        Lookup::Missing => status_response(StatusCode::NOT_FOUND),
    }
}
