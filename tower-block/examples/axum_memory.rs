use axum::{Router, error_handling::HandleErrorLayer, routing::get};
use block_limit::{Decider, MemoryStore, Quota, Quotas};
use std::net::SocketAddr;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;
use tower::BoxError;
use tower::ServiceBuilder;
use tower_block::{BlockLayer, handle_block_error};

#[tokio::main]
async fn main() {
    // 1. Setup Quotas: 5 req/s per address, 10 req/s for "good-token"
    let per_address = NonZeroU64::new(5).unwrap();
    let per_token = NonZeroU64::new(10).unwrap();
    let quotas = Quotas::new(Quota::new(per_address, Duration::from_secs(60)))
        .with_override("good-token", Quota::new(per_token, Duration::from_secs(60)));

    // 2. Setup Decider over an in-process store
    let decider = Decider::new(quotas, Arc::new(MemoryStore::new()));

    // 3. Build the Router
    let app = Router::new()
        .route("/", get(|| async { "Hello, Block!" }))
        .layer(
            ServiceBuilder::new()
                // 1. The outermost layer: catches BoxError and returns Response
                .layer(HandleErrorLayer::new(handle_block_error))
                // 2. The middle layer: introduces BoxError
                .layer(BlockLayer::new(decider))
                // 3. Converts the Route's Infallible to BoxError
                // so that BlockLayer can wrap it.
                .map_err(BoxError::from),
        );

    // 4. Serve, keeping the peer address so requests can be identified
    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000")
        .await
        .unwrap();
    println!("📡 Listening on http://127.0.0.1:3000");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
