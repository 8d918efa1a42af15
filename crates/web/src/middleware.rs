//! Middleware, handlers and error handlers.
//!
//! Everything that runs inside a router is a [`Middleware`]: it gets the
//! request and the response and returns
//!
//! - `Ok(Flow::Next)` to hand over to the next entry of the chain
//! - `Ok(Flow::Halt)` when the request is handled and nothing else should run
//! - `Err(error)` to skip the rest of the chain and enter error handling
//!
//! A panic inside a middleware is caught at the chain boundary and treated
//! as an internal server error.
//!
//! [`ErrorHandler`]s see the error together with the request and response;
//! `Ok(Flow::Next)` means the error was dealt with, `Ok(Flow::Halt)` passes
//! the same error to the next error handler, and `Err(other)` passes `other`
//! on instead.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use ferrule_http::connection::ResponseWriter;
use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::error;

use crate::error::WebError;
use crate::request::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Next,
    Halt,
}

pub type MiddlewareResult = Result<Flow, WebError>;

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, req: &mut Request, res: &mut ResponseWriter) -> MiddlewareResult;
}

#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle_error(&self, err: &WebError, req: &mut Request, res: &mut ResponseWriter) -> MiddlewareResult;
}

#[derive(Debug)]
pub struct MiddlewareFn<F> {
    f: F,
}

#[async_trait]
impl<F> Middleware for MiddlewareFn<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut ResponseWriter) -> BoxFuture<'a, MiddlewareResult> + Send + Sync,
{
    async fn handle(&self, req: &mut Request, res: &mut ResponseWriter) -> MiddlewareResult {
        (self.f)(req, res).await
    }
}

/// Turns a closure returning a boxed future into a [`Middleware`].
pub fn middleware_fn<F>(f: F) -> MiddlewareFn<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut ResponseWriter) -> BoxFuture<'a, MiddlewareResult> + Send + Sync,
{
    MiddlewareFn { f }
}

/// A terminal handler: runs last in a route chain and always halts it.
#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F> Middleware for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut ResponseWriter) -> BoxFuture<'a, Result<(), WebError>> + Send + Sync,
{
    async fn handle(&self, req: &mut Request, res: &mut ResponseWriter) -> MiddlewareResult {
        (self.f)(req, res).await.map(|()| Flow::Halt)
    }
}

pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut ResponseWriter) -> BoxFuture<'a, Result<(), WebError>> + Send + Sync,
{
    HandlerFn { f }
}

#[derive(Debug)]
pub struct ErrorHandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F> ErrorHandler for ErrorHandlerFn<F>
where
    F: for<'a> Fn(&'a WebError, &'a mut Request, &'a mut ResponseWriter) -> BoxFuture<'a, MiddlewareResult> + Send + Sync,
{
    async fn handle_error(&self, err: &WebError, req: &mut Request, res: &mut ResponseWriter) -> MiddlewareResult {
        (self.f)(err, req, res).await
    }
}

pub fn error_handler_fn<F>(f: F) -> ErrorHandlerFn<F>
where
    F: for<'a> Fn(&'a WebError, &'a mut Request, &'a mut ResponseWriter) -> BoxFuture<'a, MiddlewareResult> + Send + Sync,
{
    ErrorHandlerFn { f }
}

/// Runs `chain` in order until one entry halts or fails.
///
/// Returns `Ok(Flow::Next)` when every entry passed control on.
pub(crate) async fn run_chain(chain: &[Arc<dyn Middleware>], req: &mut Request, res: &mut ResponseWriter) -> MiddlewareResult {
    for middleware in chain {
        match catch_panic(middleware.handle(req, res)).await? {
            Flow::Next => {}
            Flow::Halt => return Ok(Flow::Halt),
        }
    }
    Ok(Flow::Next)
}

/// Awaits `future`, turning a panic into an internal server error.
pub(crate) async fn catch_panic<F>(future: F) -> MiddlewareResult
where
    F: Future<Output = MiddlewareResult>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(panic = message, "middleware panicked");
            Err(WebError::internal(message))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "middleware panicked"
    }
}
