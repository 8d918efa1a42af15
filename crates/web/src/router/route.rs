use std::sync::Arc;

use http::Method;

use crate::middleware::Middleware;
use crate::router::matcher::{PatternError, RoutePattern, RouterOptions};
use crate::request::PathParams;

/// A compiled route: method, pattern and the chain that serves it.
pub(crate) struct Route {
    method: Option<Method>,
    pattern: RoutePattern,
    chain: Vec<Arc<dyn Middleware>>,
}

impl Route {
    /// `HEAD` is served by `GET` routes as well.
    pub(crate) fn accepts_method(&self, method: &Method) -> bool {
        match &self.method {
            None => true,
            Some(route_method) => route_method == method || (*method == Method::HEAD && *route_method == Method::GET),
        }
    }

    pub(crate) fn matches(&self, path: &str, options: RouterOptions) -> Option<PathParams> {
        self.pattern.matches(path, options)
    }

    pub(crate) fn chain(&self) -> &[Arc<dyn Middleware>] {
        &self.chain
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern.as_str())
            .field("chain", &self.chain.len())
            .finish()
    }
}

/// The handler of a route plus the middleware that runs before it.
pub struct RouteBuilder {
    method: Option<Method>,
    middleware: Vec<Arc<dyn Middleware>>,
    handler: Arc<dyn Middleware>,
}

impl std::fmt::Debug for RouteBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteBuilder").field("method", &self.method).field("middleware", &self.middleware.len()).finish_non_exhaustive()
    }
}

impl RouteBuilder {
    pub fn new<H: Middleware + 'static>(method: Option<Method>, handler: H) -> Self {
        Self { method, middleware: Vec::new(), handler: Arc::new(handler) }
    }

    /// Adds a middleware in front of the handler; middleware run in the order added.
    pub fn with<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub(crate) fn build(self, path: &str) -> Result<Route, PatternError> {
        let pattern = RoutePattern::parse(path)?;
        let mut chain = self.middleware;
        chain.push(self.handler);
        Ok(Route { method: self.method, pattern, chain })
    }
}

macro_rules! method_route {
    ($method:ident, $upper_case_method:ident) => {
        #[doc = concat!("Routes HTTP ", stringify!($upper_case_method), " requests to `handler`.")]
        #[inline]
        pub fn $method<H: Middleware + 'static>(handler: H) -> RouteBuilder {
            RouteBuilder::new(Some(Method::$upper_case_method), handler)
        }
    };
}

method_route!(get, GET);
method_route!(post, POST);
method_route!(put, PUT);
method_route!(delete, DELETE);
method_route!(head, HEAD);
method_route!(options, OPTIONS);
method_route!(connect, CONNECT);
method_route!(patch, PATCH);
method_route!(trace, TRACE);

/// Routes requests of any method to `handler`.
#[inline]
pub fn all<H: Middleware + 'static>(handler: H) -> RouteBuilder {
    RouteBuilder::new(None, handler)
}
