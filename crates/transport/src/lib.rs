//! hsync-transport: HTTP drivers for the sync engine
//!
//! The engine in `hsync-core` is sans-io: it submits GETs through the
//! [`HttpClient`](hsync_core::HttpClient) trait and consumes results
//! through its delivery methods. This crate provides the two drivers:
//! a real blocking HTTP transport and an in-process server for tests.

pub mod http;
pub mod local;

pub use http::HttpTransport;
pub use local::LocalServer;
