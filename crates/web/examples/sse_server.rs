use std::time::Duration;

use ferrule_http::handoff::Upgraded;
use ferrule_web::router::{Router, get};
use ferrule_web::{Server, WebError, handler_fn};
use futures::FutureExt;
use http::{HeaderValue, header};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

fn stream_events(upgraded: Upgraded) {
    tokio::spawn(async move {
        let mut writer = upgraded.writer;
        for i in 0..5 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if let Err(e) = writer.write_all(format!("data: {i}\n\n").as_bytes()).await {
                warn!(cause = %e, "event stream closed by peer");
                return;
            }
            let _ = writer.flush().await;
        }
        info!("event stream finished");
        let _ = writer.shutdown().await;
    });
}

#[tokio::main]
async fn main() -> Result<(), ferrule_web::ServerError> {
    let events = handler_fn(|_req, res| {
        async move {
            res.insert_header(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
            res.insert_header(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            res.send_headers().await.map_err(WebError::from)
        }
        .boxed()
    });

    let router = Router::builder().route("/sse", get(events));
    Server::builder().router(router).hand_off(stream_events).address("127.0.0.1:8080").build()?.start().await
}
