//! Read-only Substrate-style chain explorer: indexes blocks as they are produced,
//! serves relational queries over HTTP, and fans out live events over a `/blockchain`
//! websocket namespace. Module layout mirrors the component breakdown: C1
//! `chain::client`, C2 `chain::pool`, C3 `chain::fetcher`, C4 `chain::subscriber`, C5
//! `indexer`, C6 `store`, C7 `query`, C8 `cache`, C9 `broadcaster`.

pub mod broadcaster;
pub mod cache;
pub mod chain;
pub mod config;
pub mod constants;
pub mod errors;
pub mod events;
pub mod http;
pub mod indexer;
pub mod logging;
pub mod metrics;
pub mod query;
pub mod retrier;
pub mod store;
pub mod task_scope;
pub mod ws;
