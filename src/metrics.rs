//! Process metrics. Grounded on `engine/src/metrics.rs`'s `lazy_static!` registry +
//! `warp`-served `/metrics` text-exposition shape; counters/gauges are renamed for this
//! service's own components instead of the teacher's RPC-client metrics.

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use warp::Filter;

lazy_static::lazy_static! {
    static ref REGISTRY: Registry = Registry::new();

    pub static ref BLOCKS_INDEXED: IntCounterVec = IntCounterVec::new(
        Opts::new("explorer_blocks_indexed_total", "Count of blocks fully indexed"),
        &["outcome"],
    ).expect("metric is well-formed");

    pub static ref HTTP_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("explorer_http_requests_total", "Count of HTTP requests served"),
        &["route", "status"],
    ).expect("metric is well-formed");

    pub static ref CACHE_LOOKUPS: IntCounterVec = IntCounterVec::new(
        Opts::new("explorer_cache_lookups_total", "Count of result-cache lookups"),
        &["cache_type", "outcome"],
    ).expect("metric is well-formed");

    pub static ref WS_CONNECTIONS: IntGauge = IntGauge::new(
        "explorer_ws_connections", "Currently open /blockchain websocket connections",
    ).expect("metric is well-formed");

    pub static ref CONNECTION_STATE: IntGauge = IntGauge::new(
        "explorer_chain_connected", "1 if the primary chain connection is Connected, else 0",
    ).expect("metric is well-formed");
}

/// Registers all metrics. Call once at startup before serving `/metrics`.
pub fn register() {
    REGISTRY.register(Box::new(BLOCKS_INDEXED.clone())).expect("metric registers once");
    REGISTRY.register(Box::new(HTTP_REQUESTS.clone())).expect("metric registers once");
    REGISTRY.register(Box::new(CACHE_LOOKUPS.clone())).expect("metric registers once");
    REGISTRY.register(Box::new(WS_CONNECTIONS.clone())).expect("metric registers once");
    REGISTRY.register(Box::new(CONNECTION_STATE.clone())).expect("metric registers once");
}

fn encode() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %e, "failed to encode prometheus metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// A standalone `GET /metrics` filter, composed into the main HTTP server in `main.rs`.
pub fn filter() -> impl Filter<Extract = (String,), Error = std::convert::Infallible> + Clone {
    warp::path("metrics").and(warp::path::end()).map(encode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_never_panics_before_registration() {
        let _ = encode();
    }
}
