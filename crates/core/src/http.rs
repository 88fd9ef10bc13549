//! HTTP client seam
//!
//! The engine never performs network I/O itself: it submits GETs through
//! [`HttpClient`] and the driving code feeds bytes and completion back
//! through [`SyncEngine::deliver_body`] and [`SyncEngine::deliver_done`].
//! Everything runs on one thread; a transport backed by an async runtime
//! must serialize its callbacks onto the thread driving the engine.
//!
//! [`SyncEngine::deliver_body`]: crate::engine::SyncEngine::deliver_body
//! [`SyncEngine::deliver_done`]: crate::engine::SyncEngine::deliver_done

/// Identifies one outstanding GET
pub type RequestId = u64;

/// Transport used by the sync engine to issue GET requests.
///
/// Implementations queue the request and perform it later, from the
/// same thread that drives the engine. See `hsync-transport` for the
/// real HTTP client and an in-process server used by tests.
pub trait HttpClient {
    fn request(&mut self, id: RequestId, url: &str);
}
