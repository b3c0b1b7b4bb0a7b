//! Transport and adapter building blocks shared across sources
//!
//! - **http**: status classification and body decoding for REST calls
//! - **paginated**: generic adapter over cursor or offset paginated endpoints
//! - **rpc**: minimal Ethereum JSON-RPC client
//! - **block_range**: adapters over block height windows

pub mod block_range;
pub mod http;
pub mod paginated;
pub mod rpc;

pub use block_range::{BlockRangeAdapter, BlockTimestampAdapter, LogDecoder};
pub use paginated::{decode_items, ApiEndpoint, ApiPage, PaginatedApiAdapter};
pub use rpc::{LogFilter, RpcClient, RpcLog};
