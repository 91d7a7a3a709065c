pub mod client;
pub mod fetcher;
pub mod pool;
pub mod scale;
pub mod subscriber;
pub mod types;

pub use client::{ChainApi, ChainClient, ConnectionState};
pub use fetcher::BlockFetcher;
pub use pool::ConnectionPool;
pub use subscriber::LiveSubscriber;
