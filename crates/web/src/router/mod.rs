//! Request routing.
//!
//! A [`Router`] owns its middleware, routes, error handlers, child routers
//! and an optional catch-all. Dispatch walks the tree depth first:
//!
//! 1. the router's middleware run in order
//! 2. the first route whose method and pattern match serves the request
//! 3. otherwise each child mounted on a prefix of the path gets a turn
//! 4. otherwise the catch-all serves it, if there is one
//!
//! Errors raised anywhere inside a router are resolved by that router's
//! error handlers and never reach its parent. A miss in the whole tree ends
//! in a `404` at the top.
//!
//! Routers are assembled with a [`RouterBuilder`]; mount paths compose
//! top-down when the tree is built.

pub mod matcher;
mod route;

use std::fmt;
use std::sync::Arc;

use ferrule_http::connection::ResponseWriter;
use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, error, trace, warn};

use crate::error::WebError;
use crate::middleware::{ErrorHandler, Flow, Middleware, catch_panic, run_chain};
use crate::request::Request;
use crate::response::ResponseExt;

pub use matcher::{PatternError, RoutePattern, RouterOptions};
pub use route::{RouteBuilder, all, connect, delete, get, head, options, patch, post, put, trace};
use route::Route;

pub struct Router {
    mount_path: String,
    base_path: String,
    options: RouterOptions,
    middleware: Vec<Arc<dyn Middleware>>,
    routes: Vec<Route>,
    error_handlers: Vec<Arc<dyn ErrorHandler>>,
    children: Vec<Router>,
    catch_all: Option<Arc<dyn Middleware>>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Full mount path from the root, empty for the root itself.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn options(&self) -> RouterOptions {
        self.options
    }

    /// Serves `req` through the tree.
    ///
    /// Always returns `true`: a request nobody claimed gets a `404`.
    pub async fn dispatch(&self, req: &mut Request, res: &mut ResponseWriter) -> bool {
        let path = req.raw_path().to_owned();
        if self.handle(&path, req, res).await {
            return true;
        }

        debug!(method = %req.method(), path = %path, "no route matched");
        let err = WebError::not_found(format!("cannot {} {}", req.method(), req.path()));
        self.handle_error(err, req, res).await;
        true
    }

    /// Serves `req` if anything in this subtree claims `path`.
    fn handle<'a>(&'a self, path: &'a str, req: &'a mut Request, res: &'a mut ResponseWriter) -> BoxFuture<'a, bool> {
        async move {
            match run_chain(&self.middleware, req, res).await {
                Ok(Flow::Next) => {}
                Ok(Flow::Halt) => return true,
                Err(err) => {
                    self.handle_error(err, req, res).await;
                    return true;
                }
            }

            let method = req.method().clone();
            let matched = self
                .routes
                .iter()
                .filter(|route| route.accepts_method(&method))
                .find_map(|route| route.matches(path, self.options).map(|params| (route, params)));

            if let Some((route, params)) = matched {
                trace!(?route, base_path = %self.base_path, "route matched");
                req.set_base_url(&self.base_path);
                req.set_params(params);
                if let Err(err) = run_chain(route.chain(), req, res).await {
                    self.handle_error(err, req, res).await;
                }
                return true;
            }

            for child in &self.children {
                let Some(rest) = strip_mount(path, &child.mount_path, self.options.case_sensitive) else {
                    continue;
                };
                if child.handle(rest, req, res).await {
                    return true;
                }
            }

            if let Some(catch_all) = &self.catch_all {
                req.set_base_url(&self.base_path);
                if let Err(err) = catch_panic(catch_all.handle(req, res)).await {
                    self.handle_error(err, req, res).await;
                }
                return true;
            }

            false
        }
        .boxed()
    }

    async fn handle_error(&self, mut err: WebError, req: &mut Request, res: &mut ResponseWriter) {
        for handler in &self.error_handlers {
            let outcome = catch_panic(handler.handle_error(&err, req, res)).await;
            match outcome {
                Ok(Flow::Next) => return,
                Ok(Flow::Halt) => {}
                Err(replacement) => err = replacement,
            }
        }

        if err.status().is_server_error() {
            error!(status = err.status().as_u16(), error = %err, path = req.path(), "request failed");
        } else {
            debug!(status = err.status().as_u16(), error = %err, path = req.path(), "request rejected");
        }

        if let Err(e) = res.send_error(&err).await {
            warn!(cause = %e, "failed to send error response");
        }
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("base_path", &self.base_path)
            .field("options", &self.options)
            .field("middleware", &self.middleware.len())
            .field("routes", &self.routes)
            .field("error_handlers", &self.error_handlers.len())
            .field("children", &self.children)
            .field("catch_all", &self.catch_all.is_some())
            .finish()
    }
}

/// Returns what is left of `path` once `mount` is stripped, if `mount` ends
/// on a segment boundary.
fn strip_mount<'a>(path: &'a str, mount: &str, case_sensitive: bool) -> Option<&'a str> {
    if mount.is_empty() {
        return Some(path);
    }

    let head = path.get(..mount.len())?;
    let equal = if case_sensitive { head == mount } else { head.eq_ignore_ascii_case(mount) };
    if !equal {
        return None;
    }

    match &path[mount.len()..] {
        "" => Some("/"),
        rest if rest.starts_with('/') => Some(rest),
        _ => None,
    }
}

/// `/api/` and `api` both mount at `/api`; `/` and `` mount at the parent's path.
fn normalize_mount(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[derive(Default)]
pub struct RouterBuilder {
    options: Option<RouterOptions>,
    middleware: Vec<Arc<dyn Middleware>>,
    routes: Vec<(String, RouteBuilder)>,
    error_handlers: Vec<Arc<dyn ErrorHandler>>,
    children: Vec<(String, RouterBuilder)>,
    catch_all: Option<Arc<dyn Middleware>>,
}

impl fmt::Debug for RouterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterBuilder")
            .field("options", &self.options)
            .field("routes", &self.routes.iter().map(|(path, _)| path.as_str()).collect::<Vec<_>>())
            .field("children", &self.children.iter().map(|(mount, _)| mount.as_str()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl RouterBuilder {
    fn new() -> Self {
        Self::default()
    }

    /// Matching options for this router and, unless they set their own, its children.
    pub fn options(mut self, options: RouterOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Adds a middleware that runs for every request reaching this router.
    pub fn middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn route(mut self, path: impl Into<String>, route: RouteBuilder) -> Self {
        self.routes.push((path.into(), route));
        self
    }

    pub fn error_handler<E: ErrorHandler + 'static>(mut self, handler: E) -> Self {
        self.error_handlers.push(Arc::new(handler));
        self
    }

    /// Mounts `router` at `path`; it sees request paths with `path` stripped.
    pub fn mount(mut self, path: impl AsRef<str>, router: RouterBuilder) -> Self {
        self.children.push((normalize_mount(path.as_ref()), router));
        self
    }

    /// Serves every request that reaches this router without matching anything.
    pub fn catch_all<H: Middleware + 'static>(mut self, handler: H) -> Self {
        self.catch_all = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<Router, PatternError> {
        self.build_with(RouterOptions::default())
    }

    /// Builds with `defaults` for every router that did not set options.
    pub fn build_with(self, defaults: RouterOptions) -> Result<Router, PatternError> {
        self.build_at(String::new(), String::new(), defaults)
    }

    fn build_at(self, mount_path: String, base_path: String, inherited: RouterOptions) -> Result<Router, PatternError> {
        let options = self.options.unwrap_or(inherited);

        let routes =
            self.routes.into_iter().map(|(path, route)| route.build(&path)).collect::<Result<Vec<_>, _>>()?;

        let children = self
            .children
            .into_iter()
            .map(|(mount, child)| {
                let child_base = format!("{base_path}{mount}");
                child.build_at(mount, child_base, options)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Router {
            mount_path,
            base_path,
            options,
            middleware: self.middleware,
            routes,
            error_handlers: self.error_handlers,
            children,
            catch_all: self.catch_all,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{error_handler_fn, handler_fn, middleware_fn};
    use crate::request::tests::request;
    use ferrule_http::connection::MessageWriter;
    use http::{Method, StatusCode};
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn record(log: &Log, name: &'static str, flow: Flow) -> impl Middleware + use<> {
        let log = Arc::clone(log);
        middleware_fn(move |_req, _res| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(name);
                Ok(flow)
            }
            .boxed()
        })
    }

    fn reply(body: &'static str) -> impl Middleware + use<> {
        handler_fn(move |_req, res| async move { res.text(body.to_string()).await }.boxed())
    }

    fn failing(err: fn() -> WebError) -> impl Middleware + use<> {
        handler_fn(move |_req, _res| async move { Err(err()) }.boxed())
    }

    async fn run(router: &Router, method: Method, target: &str) -> String {
        let mut req = request(method.clone(), target, &[]);
        let (mut client, server) = tokio::io::duplex(8192);
        let writer = MessageWriter::with_capacity(Box::new(server), 1024);
        let mut res = ResponseWriter::new(writer, req.version(), method == Method::HEAD);

        assert!(router.dispatch(&mut req, &mut res).await);
        res.end().await.unwrap();
        drop(res);

        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        output
    }

    fn body(output: &str) -> &str {
        output.split_once("\r\n\r\n").map_or("", |(_, body)| body)
    }

    #[tokio::test]
    async fn middleware_run_in_order_and_halt() {
        let log = Log::default();
        let router = Router::builder()
            .middleware(record(&log, "first", Flow::Next))
            .middleware(record(&log, "second", Flow::Halt))
            .middleware(record(&log, "third", Flow::Next))
            .route("/", get(reply("unreachable")))
            .build()
            .unwrap();

        let output = run(&router, Method::GET, "/").await;
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
        assert!(!output.contains("unreachable"));
    }

    #[tokio::test]
    async fn route_middleware_run_before_handler() {
        let log = Log::default();
        let router = Router::builder()
            .middleware(record(&log, "app", Flow::Next))
            .route("/users/:id", get(reply("user")).with(record(&log, "route", Flow::Next)))
            .build()
            .unwrap();

        let output = run(&router, Method::GET, "/users/7").await;
        assert_eq!(*log.lock().unwrap(), vec!["app", "route"]);
        assert_eq!(body(&output), "user");
    }

    #[tokio::test]
    async fn all_app_middleware_run_before_route_middleware() {
        let log = Log::default();
        let router = Router::builder()
            .middleware(record(&log, "m1", Flow::Next))
            .middleware(record(&log, "m2", Flow::Next))
            .middleware(record(&log, "m3", Flow::Next))
            .route("/", get(reply("done")).with(record(&log, "route", Flow::Next)))
            .build()
            .unwrap();

        let output = run(&router, Method::GET, "/").await;
        assert_eq!(*log.lock().unwrap(), vec!["m1", "m2", "m3", "route"]);
        assert_eq!(body(&output), "done");
    }

    #[tokio::test]
    async fn middleware_error_skips_the_rest_of_the_chain() {
        let log = Log::default();
        let seen = Arc::new(Mutex::new(None));
        let observer = {
            let seen = Arc::clone(&seen);
            error_handler_fn(move |err, _req, _res| {
                *seen.lock().unwrap() = Some((err.status(), err.detail().to_string()));
                async move { Ok(Flow::Halt) }.boxed()
            })
        };
        let refusing = middleware_fn(|_req, _res| async move { Err(WebError::new(StatusCode::FORBIDDEN, "m2 refused")) }.boxed());

        let router = Router::builder()
            .middleware(record(&log, "m1", Flow::Next))
            .middleware(refusing)
            .middleware(record(&log, "m3", Flow::Next))
            .route("/", get(reply("unreachable")).with(record(&log, "route", Flow::Next)))
            .error_handler(observer)
            .build()
            .unwrap();

        let output = run(&router, Method::GET, "/").await;
        assert_eq!(*log.lock().unwrap(), vec!["m1"]);
        assert_eq!(*seen.lock().unwrap(), Some((StatusCode::FORBIDDEN, "m2 refused".to_string())));
        assert!(output.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        assert_eq!(body(&output), r#"{"status":403,"title":"Forbidden","detail":"m2 refused"}"#);
    }

    #[tokio::test]
    async fn first_matching_route_wins() {
        let router = Router::builder()
            .route("/items", post(reply("post")))
            .route("/items", get(reply("first")))
            .route("/items", get(reply("second")))
            .build()
            .unwrap();

        assert_eq!(body(&run(&router, Method::GET, "/items").await), "first");
        assert_eq!(body(&run(&router, Method::POST, "/items").await), "post");
    }

    #[tokio::test]
    async fn head_is_served_by_get_routes() {
        let router = Router::builder().route("/", get(reply("hello"))).build().unwrap();

        let output = run(&router, Method::HEAD, "/").await;
        assert!(output.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(output.contains("content-length: 5\r\n"));
        assert_eq!(body(&output), "");
    }

    #[tokio::test]
    async fn unmatched_request_gets_json_404() {
        let router = Router::builder().route("/", get(reply("root"))).build().unwrap();

        let output = run(&router, Method::GET, "/missing").await;
        assert!(output.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(output.contains("content-type: application/json\r\n"));
        assert_eq!(body(&output), r#"{"status":404,"title":"Not Found","detail":"cannot GET /missing"}"#);

        let output = run(&router, Method::DELETE, "/").await;
        assert!(output.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[tokio::test]
    async fn sub_router_sees_stripped_path_and_base_url() {
        let users = Router::builder().route(
            "/users/:id",
            get(handler_fn(|req, res| {
                async move {
                    let reply = format!("{}|{}|{}", req.base_url(), req.param("id").unwrap_or_default(), req.path());
                    res.text(reply).await
                }
                .boxed()
            })),
        );
        let router = Router::builder().mount("/api", Router::builder().mount("/v1/", users)).build().unwrap();

        let output = run(&router, Method::GET, "/api/v1/users/42").await;
        assert_eq!(body(&output), "/api/v1|42|/api/v1/users/42");
    }

    #[tokio::test]
    async fn exact_mount_path_reaches_child_root() {
        let v1 = Router::builder().route(
            "/",
            get(handler_fn(|req, res| {
                async move {
                    let reply = format!("{}|{}", req.base_url(), req.path());
                    res.text(reply).await
                }
                .boxed()
            })),
        );
        let router = Router::builder().mount("/api/v1", v1).build().unwrap();

        assert_eq!(body(&run(&router, Method::GET, "/api/v1").await), "/api/v1|/api/v1");
    }

    #[tokio::test]
    async fn mount_respects_segment_boundary() {
        let router = Router::builder().mount("/api", Router::builder().route("/", get(reply("api")))).build().unwrap();

        assert_eq!(body(&run(&router, Method::GET, "/api").await), "api");
        assert_eq!(body(&run(&router, Method::GET, "/API/").await), "api");
        assert!(run(&router, Method::GET, "/apix").await.starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn options_are_inherited() {
        let child = Router::builder().route("/Users", get(reply("users")));
        let router = Router::builder()
            .options(RouterOptions { case_sensitive: true, strict: false })
            .mount("/v1", child)
            .build()
            .unwrap();

        assert_eq!(body(&run(&router, Method::GET, "/v1/Users").await), "users");
        assert!(run(&router, Method::GET, "/v1/users").await.starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn unhandled_error_renders_json() {
        let router = Router::builder().route("/", get(failing(|| WebError::bad_request("missing name")))).build().unwrap();

        let output = run(&router, Method::GET, "/").await;
        assert!(output.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert_eq!(body(&output), r#"{"status":400,"title":"Bad Request","detail":"missing name"}"#);
    }

    fn explode() -> Result<(), WebError> {
        panic!("handler exploded")
    }

    #[tokio::test]
    async fn panic_becomes_internal_error() {
        let router = Router::builder()
            .route(
                "/",
                get(handler_fn(|_req, _res| async move { explode() }.boxed())),
            )
            .build()
            .unwrap();

        let output = run(&router, Method::GET, "/").await;
        assert!(output.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(body(&output).contains("handler exploded"));
    }

    #[tokio::test]
    async fn error_handlers_pass_replace_and_recover() {
        let log = Log::default();
        let passing = {
            let log = Arc::clone(&log);
            error_handler_fn(move |_err, _req, _res| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push("pass");
                    Ok(Flow::Halt)
                }
                .boxed()
            })
        };
        let replacing = error_handler_fn(|_err, _req, _res| {
            async move { Err(WebError::new(StatusCode::IM_A_TEAPOT, "short and stout")) }.boxed()
        });
        let recovering = error_handler_fn(|err, _req, res| {
            async move {
                res.set_status(err.status());
                res.text(format!("recovered from {}", err.detail())).await?;
                Ok::<_, WebError>(Flow::Next)
            }
            .boxed()
        });

        let router = Router::builder()
            .route("/", get(failing(|| WebError::internal("boom"))))
            .error_handler(passing)
            .error_handler(replacing)
            .error_handler(recovering)
            .build()
            .unwrap();

        let output = run(&router, Method::GET, "/").await;
        assert_eq!(*log.lock().unwrap(), vec!["pass"]);
        assert!(output.starts_with("HTTP/1.1 418 I'm a teapot\r\n"));
        assert_eq!(body(&output), "recovered from short and stout");
    }

    #[tokio::test]
    async fn errors_stay_in_the_owning_router() {
        let log = Log::default();
        let parent_handler = {
            let log = Arc::clone(&log);
            error_handler_fn(move |_err, _req, _res| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push("parent");
                    Ok(Flow::Next)
                }
                .boxed()
            })
        };

        let child = Router::builder().route("/fail", get(failing(|| WebError::bad_request("child failure"))));
        let router = Router::builder().error_handler(parent_handler).mount("/child", child).build().unwrap();

        let output = run(&router, Method::GET, "/child/fail").await;
        assert!(log.lock().unwrap().is_empty());
        assert!(output.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test]
    async fn catch_all_of_child_serves_its_misses() {
        let assets = Router::builder().route("/app.js", get(reply("js"))).catch_all(handler_fn(|req, res| {
            async move {
                res.set_status(StatusCode::GONE);
                res.text(format!("gone under {}", req.base_url())).await
            }
            .boxed()
        }));
        let router = Router::builder().mount("/static", assets).build().unwrap();

        assert_eq!(body(&run(&router, Method::GET, "/static/app.js").await), "js");

        let output = run(&router, Method::GET, "/static/old.css").await;
        assert!(output.starts_with("HTTP/1.1 410 Gone\r\n"));
        assert_eq!(body(&output), "gone under /static");

        assert!(run(&router, Method::GET, "/other").await.starts_with("HTTP/1.1 404"));
    }

    #[test]
    fn strip_mount_checks_boundaries() {
        assert_eq!(strip_mount("/api/users", "/api", true), Some("/users"));
        assert_eq!(strip_mount("/api", "/api", true), Some("/"));
        assert_eq!(strip_mount("/apiary", "/api", true), None);
        assert_eq!(strip_mount("/API/x", "/api", true), None);
        assert_eq!(strip_mount("/API/x", "/api", false), Some("/x"));
        assert_eq!(strip_mount("/anything", "", true), Some("/anything"));
    }

    #[test]
    fn invalid_pattern_fails_build() {
        assert!(Router::builder().route("/(oops", get(reply("x"))).build().is_err());
    }
}
