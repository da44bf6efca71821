use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let addr = mock_server::listen_addr(std::env::var("PORT").ok().as_deref());
    let listener = TcpListener::bind(&addr).await?;
    mock_server::run(listener).await
}
