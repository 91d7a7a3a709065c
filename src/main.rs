//! Process entry point. Wires C1–C9 together and serves the HTTP + `/blockchain`
//! websocket surface. Structured after `engine/src/main.rs`'s shape (parse settings,
//! connect upstream dependencies, `tokio::join!` the long-running loops) modernized
//! onto this crate's `tracing`-based logging and `warp`-served HTTP instead of the
//! teacher's raw state-chain/eth wiring.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;
use warp::Filter;

use substrate_explorer::broadcaster::Broadcaster;
use substrate_explorer::cache::ResultCache;
use substrate_explorer::chain::{BlockFetcher, ChainClient, ConnectionPool, LiveSubscriber};
use substrate_explorer::config::{Cli, Settings};
use substrate_explorer::http::{self, AppState};
use substrate_explorer::indexer::Indexer;
use substrate_explorer::logging;
use substrate_explorer::metrics;
use substrate_explorer::query::QueryEngine;
use substrate_explorer::store::SqliteStore;
use substrate_explorer::{chain, ws};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const BROADCAST_ROOM_CAPACITY: usize = 256;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match Settings::load(&cli) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    logging::init(&settings.log_level, std::env::var("EXPLORER_LOG_JSON").is_ok());
    metrics::register();

    tracing::info!(rpc_endpoint = %settings.chain.rpc_endpoint, "starting substrate-explorer");

    let store = Arc::new(
        SqliteStore::connect(&settings.database.url)
            .await
            .expect("failed to connect to the store database"),
    );
    store.migrate().await.expect("failed to run store migrations");

    let pool = Arc::new(
        ConnectionPool::connect(&settings.chain.rpc_endpoint, settings.pool.size)
            .await
            .expect("failed to connect the chain connection pool"),
    );

    let primary_client: Arc<dyn chain::ChainApi> = Arc::new(
        ChainClient::connect(&settings.chain.rpc_endpoint)
            .await
            .expect("failed to connect the primary chain client"),
    );

    let (subscriber, chain_events_rx) = LiveSubscriber::new(primary_client.clone(), EVENT_CHANNEL_CAPACITY);
    let subscriber = Arc::new(subscriber);

    let fetcher = Arc::new(BlockFetcher::new(pool.clone()));
    let query = Arc::new(QueryEngine::new(store.clone(), pool.clone(), fetcher.clone()));

    let (broadcast_tx, _unused_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let broadcaster = Arc::new(Broadcaster::new(BROADCAST_ROOM_CAPACITY));

    let indexer = Indexer::new(store.clone(), pool.clone(), fetcher.clone(), chain_events_rx, broadcast_tx.clone());

    let state = Arc::new(AppState {
        store: store.clone(),
        query: query.clone(),
        pool: pool.clone(),
        broadcaster: broadcaster.clone(),
        address_cache: ResultCache::new(),
        extrinsic_cache: ResultCache::new(),
        block_cache: ResultCache::new(),
    });

    let routes = http::routes(state)
        .or(ws::route(broadcaster.clone()))
        .or(metrics::filter());

    let addr: std::net::SocketAddr = format!("{}:{}", settings.http.host, settings.http.port)
        .parse()
        .expect("EXPLORER_HTTP__HOST/EXPLORER_HTTP__PORT must form a valid socket address");

    tracing::info!(%addr, "serving HTTP + websocket surface");

    let (_addr, serve_fut) = warp::serve(routes).bind_with_graceful_shutdown(addr, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    });

    tokio::join!(
        serve_fut,
        substrate_explorer::chain::subscriber::supervise(subscriber),
        indexer.run(),
        broadcaster.clone().run(broadcast_tx.subscribe()),
    );
}
