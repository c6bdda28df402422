use rmcp::{transport::stdio, ServiceExt};
use server::mcp::broker::GitFsBroker;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter_string = format!(
        "warn,server={level},services={level},utils={level}",
        level = log_level
    );
    let env_filter = EnvFilter::try_new(filter_string).expect("Failed to create tracing filter");
    // Stdout belongs to the JSON-RPC transport; all logging goes to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(env_filter),
        )
        .init();

    match std::env::var("FS_GIT_TCP_ADDR") {
        Ok(addr) => serve_tcp(&addr).await,
        Err(_) => serve_stdio().await,
    }
}

async fn serve_stdio() -> anyhow::Result<()> {
    tracing::debug!("starting fs-git broker on stdio");
    let service = GitFsBroker::new()
        .serve(stdio())
        .await
        .inspect_err(|e| {
            tracing::error!("serving error: {:?}", e);
        })?;
    service.waiting().await?;
    Ok(())
}

async fn serve_tcp(addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("fs-git broker listening on {addr}");
    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::debug!("accepted connection from {peer}");
        tokio::spawn(async move {
            match GitFsBroker::new().serve(stream).await {
                Ok(service) => {
                    let _ = service.waiting().await;
                }
                Err(e) => tracing::error!("serving error: {:?}", e),
            }
        });
    }
}
