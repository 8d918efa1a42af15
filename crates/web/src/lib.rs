//! Routing, middleware and server on top of `ferrule-http`.
//!
//! ```no_run
//! use ferrule_web::router::{Router, get};
//! use ferrule_web::{ResponseExt, Server, handler_fn};
//! use futures::FutureExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ferrule_web::ServerError> {
//!     let users = Router::builder().route(
//!         "/users/:id",
//!         get(handler_fn(|req, res| {
//!             async move {
//!                 let id = req.param("id").unwrap_or_default().to_string();
//!                 res.json(&serde_json::json!({ "id": id })).await
//!             }
//!             .boxed()
//!         })),
//!     );
//!
//!     let router = Router::builder().mount("/api/v1", users);
//!     Server::builder().router(router).address("127.0.0.1:8080").build()?.start().await
//! }
//! ```

mod error;
mod middleware;
mod request;
mod response;
mod server;

pub mod negotiation;
pub mod router;
pub mod settings;

pub use error::{ErrorBody, ServerError, SettingsError, WebError};
pub use middleware::{
    ErrorHandler, ErrorHandlerFn, Flow, HandlerFn, Middleware, MiddlewareFn, MiddlewareResult, error_handler_fn,
    handler_fn, middleware_fn,
};
pub use request::{PathParams, Request, RequestBody};
pub use response::ResponseExt;
pub use router::Router;
pub use server::{Server, ServerBuilder};
pub use settings::Settings;
