pub mod cache;
pub mod clock;
pub mod config;
pub mod enrich;
pub mod http;
pub mod metrics;
pub mod rate_limit;
pub mod reduce;
pub mod sample;
pub mod upstream;
