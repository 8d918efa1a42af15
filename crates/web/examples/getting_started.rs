use ferrule_web::router::{Router, get, post};
use ferrule_web::{Flow, ResponseExt, Server, Settings, WebError, error_handler_fn, handler_fn, middleware_fn};
use futures::FutureExt;
use http::StatusCode;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), ferrule_web::ServerError> {
    let log_requests = middleware_fn(|req, _res| {
        async move {
            info!(method = %req.method(), path = req.path(), ip = req.ip(), "receive request");
            Ok(Flow::Next)
        }
        .boxed()
    });

    let user = handler_fn(|req, res| {
        async move {
            let id = req.param("id").unwrap_or_default().to_string();
            match req.accepts_one(&["application/json", "text/plain"]) {
                Some("text/plain") => res.text(format!("user {id}\n")).await,
                Some(_) => res.json(&serde_json::json!({ "id": id })).await,
                None => Err(WebError::new(StatusCode::NOT_ACCEPTABLE, "only json and plain text are available")),
            }
        }
        .boxed()
    });

    let echo = handler_fn(|req, res| {
        async move {
            let body = req.read_body().await?;
            let body = String::from_utf8(body.to_vec()).map_err(|e| WebError::bad_request("request body is not utf8").with_source(e))?;
            res.text(body).await
        }
        .boxed()
    });

    let api = Router::builder().route("/users/:id", get(user)).route("/echo", post(echo)).error_handler(error_handler_fn(
        |err, req, _res| {
            async move {
                info!(status = err.status().as_u16(), base_url = req.base_url(), "api error");
                Ok(Flow::Halt)
            }
            .boxed()
        },
    ));

    let router = Router::builder()
        .middleware(log_requests)
        .route("/", get(handler_fn(|_req, res| async move { res.text("hello world\n".into()).await }.boxed())))
        .mount("/api/v1", api);

    let settings = match std::env::args().nth(1) {
        Some(path) => Settings::from_toml_file(path)?,
        None => Settings::new(),
    };

    Server::builder().router(router).settings(settings).build()?.start().await
}
