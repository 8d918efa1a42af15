//! The seam between the connection loop and the application.

use std::error::Error;

use async_trait::async_trait;
use futures::future::BoxFuture;
use http::Request;

use crate::connection::ResponseWriter;
use crate::protocol::body::ReqBody;

/// Handles one request on a connection.
///
/// The handler writes its answer through `res`. The connection ends the
/// response afterwards if the handler did not, drains whatever is left of
/// the request body and decides whether the connection stays open. An
/// `Err` is logged and, when no headers were sent yet, turned into an
/// empty `500 Internal Server Error`.
#[async_trait]
pub trait Handler: Send + Sync {
    type Error: Into<Box<dyn Error + Send + Sync>>;

    async fn call(&self, req: Request<ReqBody>, res: &mut ResponseWriter) -> Result<(), Self::Error>;
}

#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F, Err> Handler for HandlerFn<F>
where
    F: for<'a> Fn(Request<ReqBody>, &'a mut ResponseWriter) -> BoxFuture<'a, Result<(), Err>> + Send + Sync,
    Err: Into<Box<dyn Error + Send + Sync>>,
{
    type Error = Err;

    async fn call(&self, req: Request<ReqBody>, res: &mut ResponseWriter) -> Result<(), Self::Error> {
        (self.f)(req, res).await
    }
}

/// Wraps a closure returning a boxed future into a [`Handler`].
///
/// ```
/// use ferrule_http::handler::make_handler;
/// use futures::FutureExt;
///
/// let handler = make_handler(|_req, res| {
///     async move { res.send("hello").await }.boxed()
/// });
/// # let _ = handler;
/// ```
pub fn make_handler<F, Err>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(Request<ReqBody>, &'a mut ResponseWriter) -> BoxFuture<'a, Result<(), Err>>,
    Err: Into<Box<dyn Error + Send + Sync>>,
{
    HandlerFn { f }
}
