//! HTTP surface. Grounded on `engine/src/quoter/api/v1/*`'s plain
//! `async fn(params, deps) -> Result<T, ResponseError>` handler shape (here,
//! `Result<T, ExplorerError>`) and `engine/src/health.rs`'s health-endpoint precedent,
//! recomposed over `warp`'s filter combinators instead of that file's raw TCP loop.

use std::convert::Infallible;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::broadcaster::Broadcaster;
use crate::cache::{CacheKey, CacheType, ResultCache};
use crate::chain::pool::ConnectionPool;
use crate::constants;
use crate::errors::{ExplorerError, Result};
use crate::query::{AddressSearchParams, AddressSearchResult, EraReadout, ExtrinsicStrategy, QueryEngine};
use crate::store::{Store, StoredBlock, StoredExtrinsic};

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub query: Arc<QueryEngine>,
    pub pool: Arc<ConnectionPool>,
    pub broadcaster: Arc<Broadcaster>,
    pub address_cache: ResultCache<AddressSearchResult>,
    pub extrinsic_cache: ResultCache<(StoredExtrinsic, StoredBlock)>,
    pub block_cache: ResultCache<StoredBlock>,
}

/// Wraps `ExplorerError` so it can travel through warp's `Rejection` machinery; the
/// `recover` filter in `rejection_handler` unwraps it back into a `{message}` body.
#[derive(Debug)]
struct Rejectable(ExplorerError);
impl warp::reject::Reject for Rejectable {}

fn reject(e: ExplorerError) -> Rejection {
    warp::reject::custom(Rejectable(e))
}

fn with_state(state: Arc<AppState>) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

pub fn routes(state: Arc<AppState>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let state = with_state(state);

    let health = warp::path("health").and(warp::path::end()).and(warp::get()).map(health_handler);

    let search_address = warp::path!("api" / "search" / "address")
        .and(warp::get())
        .and(warp::query::<AddressSearchQuery>())
        .and(state.clone())
        .and_then(search_address_handler);

    let block_by_number = warp::path!("api" / "block" / u64)
        .and(warp::get())
        .and(state.clone())
        .and_then(block_by_number_handler);

    let block_by_hash = warp::path!("api" / "block" / "hash" / String)
        .and(warp::get())
        .and(state.clone())
        .and_then(block_by_hash_handler);

    let latest_block = warp::path!("api" / "blocks" / "latest")
        .and(warp::get())
        .and(state.clone())
        .and_then(latest_block_handler);

    let latest_info = warp::path!("api" / "blocks" / "latest" / "info")
        .and(warp::get())
        .and(state.clone())
        .and_then(latest_info_handler);

    let extrinsic = warp::path!("api" / "extrinsic" / String)
        .and(warp::get())
        .and(warp::query::<ExtrinsicQuery>())
        .and(state.clone())
        .and_then(extrinsic_handler);

    let network_info = warp::path!("api" / "network" / "info")
        .and(warp::get())
        .and(state.clone())
        .and_then(network_info_handler);

    let get_rpc_endpoint = warp::path!("api" / "network" / "rpc-endpoint")
        .and(warp::get())
        .and(state.clone())
        .and_then(get_rpc_endpoint_handler);

    let post_rpc_endpoint = warp::path!("api" / "network" / "rpc-endpoint")
        .and(warp::post())
        .and(warp::body::json())
        .and(state.clone())
        .and_then(post_rpc_endpoint_handler);

    let indexer_status = warp::path!("api" / "indexer" / "status")
        .and(warp::get())
        .and(state.clone())
        .and_then(indexer_status_handler);

    let cache_stats = warp::path!("api" / "debug" / "cache" / "stats")
        .and(warp::get())
        .and(state.clone())
        .and_then(cache_stats_handler);

    let cache_clear = warp::path!("api" / "debug" / "cache" / "clear")
        .and(warp::post())
        .and(state.clone())
        .and_then(cache_clear_all_handler);

    let cache_clear_address = warp::path!("api" / "debug" / "cache" / "clear" / "address")
        .and(warp::post())
        .and(state.clone())
        .and_then(cache_clear_address_handler);

    let cache_clear_extrinsic = warp::path!("api" / "debug" / "cache" / "clear" / "extrinsic")
        .and(warp::post())
        .and(state.clone())
        .and_then(cache_clear_extrinsic_handler);

    health
        .or(search_address)
        .or(block_by_hash)
        .or(block_by_number)
        .or(latest_info)
        .or(latest_block)
        .or(extrinsic)
        .or(network_info)
        .or(get_rpc_endpoint)
        .or(post_rpc_endpoint)
        .or(indexer_status)
        .or(cache_stats)
        .or(cache_clear_address)
        .or(cache_clear_extrinsic)
        .or(cache_clear)
        .recover(rejection_handler)
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    timestamp: i64,
}

fn health_handler() -> impl Reply {
    warp::reply::json(&HealthBody { status: "ok", timestamp: chrono::Utc::now().timestamp_millis() })
}

fn default_blocks_to_scan() -> u64 {
    constants::DEFAULT_MAX_BLOCKS_TO_SCAN
}

fn default_batch_size() -> usize {
    constants::DEFAULT_BATCH_SIZE
}

#[derive(Debug, Deserialize)]
struct AddressSearchQuery {
    address: String,
    #[serde(rename = "blocksToScan", default = "default_blocks_to_scan")]
    blocks_to_scan: u64,
    #[serde(rename = "batchSize", default = "default_batch_size")]
    batch_size: usize,
    pallet: Option<String>,
    method: Option<String>,
}

async fn search_address_handler(q: AddressSearchQuery, state: Arc<AppState>) -> std::result::Result<impl Reply, Rejection> {
    let key = CacheKey::new(
        CacheType::AddressSearch,
        &[
            &q.address,
            &q.blocks_to_scan.to_string(),
            &q.batch_size.to_string(),
            q.pallet.as_deref().unwrap_or(""),
            q.method.as_deref().unwrap_or(""),
        ],
    );
    let params = AddressSearchParams {
        address: q.address,
        blocks_to_scan: q.blocks_to_scan,
        batch_size: q.batch_size,
        pallet: q.pallet,
        method: q.method,
    };
    let query = state.query.clone();
    let result = state
        .address_cache
        .get_or_compute(key, CacheType::AddressSearch, || async move { Ok(query.search_address(params).await?) })
        .await
        .map_err(unwrap_explorer_error)?;
    Ok(warp::reply::json(&result))
}

async fn block_by_number_handler(n: u64, state: Arc<AppState>) -> std::result::Result<impl Reply, Rejection> {
    let key = CacheKey::new(CacheType::BlockInfo, &["number", &n.to_string()]);
    let query = state.query.clone();
    let block = state
        .block_cache
        .get_or_compute(key, CacheType::BlockInfo, || async move { Ok(query.get_block(n).await?) })
        .await
        .map_err(unwrap_explorer_error)?;
    Ok(warp::reply::json(&block))
}

async fn block_by_hash_handler(h: String, state: Arc<AppState>) -> std::result::Result<impl Reply, Rejection> {
    let block = state.query.get_block_by_hash(&h).await.map_err(reject)?;
    Ok(warp::reply::json(&block))
}

#[derive(Serialize)]
struct LatestBlockBody {
    #[serde(rename = "latestBlock")]
    latest_block: StoredBlock,
}

async fn latest_block_handler(state: Arc<AppState>) -> std::result::Result<impl Reply, Rejection> {
    let block = state.query.get_latest_block().await.map_err(reject)?;
    Ok(warp::reply::json(&LatestBlockBody { latest_block: block }))
}

#[derive(Serialize)]
struct LatestInfoBody {
    number: u64,
    hash: String,
    timestamp: i64,
    #[serde(rename = "extrinsicsCount")]
    extrinsics_count: u32,
    #[serde(rename = "eventsCount")]
    events_count: u32,
}

async fn latest_info_handler(state: Arc<AppState>) -> std::result::Result<impl Reply, Rejection> {
    let block = state.query.get_latest_block().await.map_err(reject)?;
    Ok(warp::reply::json(&LatestInfoBody {
        number: block.number,
        hash: block.hash,
        timestamp: block.timestamp,
        extrinsics_count: block.extrinsics_count,
        events_count: block.events_count,
    }))
}

#[derive(Debug, Deserialize)]
struct ExtrinsicQuery {
    strategy: Option<String>,
    #[serde(rename = "maxBlocks")]
    max_blocks: Option<u64>,
}

#[derive(Serialize)]
struct ExtrinsicBody {
    extrinsic: StoredExtrinsic,
    block: StoredBlock,
}

async fn extrinsic_handler(hash: String, q: ExtrinsicQuery, state: Arc<AppState>) -> std::result::Result<impl Reply, Rejection> {
    let strategy = ExtrinsicStrategy::parse(q.strategy.as_deref()).map_err(reject)?;
    let max_blocks = q.max_blocks.unwrap_or(10_000);

    let key = CacheKey::new(
        CacheType::ExtrinsicSearch,
        &[&hash, &format!("{strategy:?}"), &max_blocks.to_string()],
    );
    let query = state.query.clone();
    let hash_for_compute = hash.clone();
    let (extrinsic, block) = state
        .extrinsic_cache
        .get_or_compute(key, CacheType::ExtrinsicSearch, move || async move {
            Ok(query.get_extrinsic(&hash_for_compute, strategy, max_blocks).await?)
        })
        .await
        .map_err(unwrap_explorer_error)?;

    Ok(warp::reply::json(&ExtrinsicBody { extrinsic, block }))
}

async fn network_info_handler(state: Arc<AppState>) -> std::result::Result<impl Reply, Rejection> {
    let readout: EraReadout = state.query.era_readout().await.map_err(reject)?;
    Ok(warp::reply::json(&readout))
}

#[derive(Serialize)]
struct RpcEndpointBody {
    #[serde(rename = "rpcEndpoint")]
    rpc_endpoint: String,
}

async fn get_rpc_endpoint_handler(state: Arc<AppState>) -> std::result::Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&RpcEndpointBody { rpc_endpoint: state.pool.current_endpoint().await }))
}

#[derive(Debug, Deserialize)]
struct PostRpcEndpointBody {
    #[serde(rename = "rpcEndpoint")]
    rpc_endpoint: String,
}

async fn post_rpc_endpoint_handler(body: PostRpcEndpointBody, state: Arc<AppState>) -> std::result::Result<impl Reply, Rejection> {
    url::Url::parse(&body.rpc_endpoint)
        .ok()
        .filter(|u| u.scheme() == "ws" || u.scheme() == "wss")
        .ok_or_else(|| reject(ExplorerError::bad_request("rpcEndpoint must be ws:// or wss://")))?;

    state.pool.change_endpoint(body.rpc_endpoint.clone()).await.map_err(reject)?;
    Ok(warp::reply::json(&RpcEndpointBody { rpc_endpoint: body.rpc_endpoint }))
}

#[derive(Serialize)]
struct IndexerStatusBody {
    #[serde(rename = "firstIndexed")]
    first_indexed: Option<u64>,
    #[serde(rename = "lastIndexed")]
    last_indexed: Option<u64>,
}

async fn indexer_status_handler(state: Arc<AppState>) -> std::result::Result<impl Reply, Rejection> {
    let range = state.store.range().await.map_err(reject)?;
    Ok(warp::reply::json(&IndexerStatusBody {
        first_indexed: range.map(|r| r.first_indexed),
        last_indexed: range.map(|r| r.last_indexed),
    }))
}

#[derive(Serialize)]
struct CacheStatsBody {
    address: CacheStatsEntry,
    extrinsic: CacheStatsEntry,
    block: CacheStatsEntry,
}

#[derive(Serialize)]
struct CacheStatsEntry {
    entries: usize,
    #[serde(rename = "inFlight")]
    in_flight: usize,
}

async fn cache_stats_handler(state: Arc<AppState>) -> std::result::Result<impl Reply, Rejection> {
    let a = state.address_cache.stats().await;
    let e = state.extrinsic_cache.stats().await;
    let b = state.block_cache.stats().await;
    Ok(warp::reply::json(&CacheStatsBody {
        address: CacheStatsEntry { entries: a.entries, in_flight: a.in_flight },
        extrinsic: CacheStatsEntry { entries: e.entries, in_flight: e.in_flight },
        block: CacheStatsEntry { entries: b.entries, in_flight: b.in_flight },
    }))
}

async fn cache_clear_all_handler(state: Arc<AppState>) -> std::result::Result<impl Reply, Rejection> {
    state.address_cache.clear_all().await;
    state.extrinsic_cache.clear_all().await;
    state.block_cache.clear_all().await;
    Ok(warp::reply::json(&serde_json::json!({"cleared": "all"})))
}

async fn cache_clear_address_handler(state: Arc<AppState>) -> std::result::Result<impl Reply, Rejection> {
    state.address_cache.clear_all().await;
    Ok(warp::reply::json(&serde_json::json!({"cleared": "address"})))
}

async fn cache_clear_extrinsic_handler(state: Arc<AppState>) -> std::result::Result<impl Reply, Rejection> {
    state.extrinsic_cache.clear_all().await;
    Ok(warp::reply::json(&serde_json::json!({"cleared": "extrinsic"})))
}

fn unwrap_explorer_error(e: anyhow::Error) -> Rejection {
    match e.downcast::<ExplorerError>() {
        Ok(explorer_err) => reject(explorer_err),
        Err(e) => reject(ExplorerError::Internal(e)),
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

async fn rejection_handler(err: Rejection) -> std::result::Result<impl Reply, Infallible> {
    let (status, message) = if let Some(Rejectable(e)) = err.find::<Rejectable>() {
        (e.status_code(), e.to_string())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if err.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        (StatusCode::BAD_REQUEST, "malformed request body".to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
    };

    Ok(warp::reply::with_status(warp::reply::json(&ErrorBody { message }), status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_returns_ok_status() {
        let reply = health_handler();
        let response = reply.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
