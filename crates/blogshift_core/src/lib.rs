pub mod config;
pub mod describe;
pub mod error_log;
pub mod front_matter;
pub mod http;
pub mod metadata;
pub mod migrate;
pub mod redirect;
pub mod rewrite;
pub mod runtime;
pub mod sitemap;
pub mod store;
