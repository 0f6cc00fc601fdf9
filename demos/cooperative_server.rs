use maker_h1::{
    limits::ServerLimits, suspending, ExactRouter, HandlerError, Method, Request, Response, Server,
    StatusCode,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn auth(req: &mut Request) -> Result<Option<Response>, HandlerError> {
    match req.path().starts_with("/admin") && req.header("authorization").is_none() {
        true => Err(HandlerError::new(StatusCode::Unauthorized, "Missing credentials")),
        false => Ok(None),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let router = ExactRouter::new()
        .get("/users/:id/name", |req: &mut Request| {
            let id = req.path_param("id").unwrap_or_default().to_string();
            Ok(Response::new(StatusCode::Ok)
                .header("Content-Type", "application/json")
                .body(format!(r#"{{"id": "{id}", "name": "user-{id}"}}"#)))
        })
        .get("/admin/stats", |_: &mut Request| {
            Ok(Response::new(StatusCode::Ok).body("all good"))
        })
        .add(
            Method::Post,
            "/echo",
            suspending(|req| {
                Box::pin(async move {
                    let body = req.body().read_all_async(64 * 1024).await?;
                    Ok::<_, HandlerError>(Response::new(StatusCode::Ok).body(body))
                })
            }),
        );

    Server::builder()
        .router(router)
        .interceptor(auth)
        .server_limits(ServerLimits {
            workers: 2,
            ..ServerLimits::default()
        })
        .build()
        .launch(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .await
        .unwrap();
}
