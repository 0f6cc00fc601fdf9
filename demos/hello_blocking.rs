use maker_h1::{ExactRouter, Request, Response, Server, StatusCode};
use std::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let router = ExactRouter::new().get("/", |_: &mut Request| {
        Ok(Response::new(StatusCode::Ok)
            .header("Content-Type", "text/plain")
            .body("Hello, world!"))
    });

    Server::builder()
        .router(router)
        .build()
        .launch_blocking(TcpListener::bind("127.0.0.1:8080").unwrap())
        .unwrap();
}
