//! Proxy module for harvesting and validating Shadowsocks proxies
//!
//! This module provides functionality for:
//! - Decoding subscription feeds (plain and base64)
//! - Parsing Shadowsocks URIs into their canonical form
//! - Asking the validation oracle whether a proxy works and where it exits
//! - Validating stored proxies and polling subscriptions for new ones
//! - Bounding every network call with a shared worker pool

pub mod checker;
pub mod crawler;
pub mod decoder;
pub mod geo;
pub mod models;
pub mod oracle;
pub mod parser;
pub mod pool;

pub use checker::{ProxyValidator, ValidationSummary};
pub use crawler::{CrawlerConfig, FeedResult, PollReport, SubscriptionPoller};
pub use decoder::LineDecoder;
pub use geo::CountryResolver;
pub use models::{OracleOutcome, OracleReport, ShadowsocksUri, Unreachable};
pub use oracle::{OracleClient, OracleConfig};
pub use parser::ProxyParser;
pub use pool::WorkerPool;
