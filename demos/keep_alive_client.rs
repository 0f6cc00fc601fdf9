use maker_h1::{ClientRequest, RequestExecutor, TcpConnector};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    let addr = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1:8080".to_string());
    let client = RequestExecutor::new(TcpConnector::new(addr.as_str()).unwrap());

    let mut conn = None;
    for path in ["/", "/users/1/name", "/users/2/name"] {
        let mut response = client
            .execute_async(ClientRequest::get(path), conn.take())
            .await
            .unwrap();

        let body = response.body().read_all_async(64 * 1024).await.unwrap();
        println!(
            "{path} -> {} {} ({:?}): {}",
            response.status(),
            response.reason(),
            response.connection_state(),
            String::from_utf8_lossy(&body)
        );

        conn = response.into_connection();
        if conn.is_none() {
            println!("connection not reusable, next request opens a new one");
        }
    }
}
