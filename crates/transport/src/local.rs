//! In-process server for testing
//!
//! Simulates the mirror without sockets: a route table of URL →
//! `(status, body)` plus a log of every GET, so tests can assert on
//! request counts as well as on the resulting tree.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;

use hsync_core::{HttpClient, RequestId, SyncEngine};

/// In-memory stand-in for the remote repository
#[derive(Default)]
pub struct LocalServer {
    routes: HashMap<String, (u16, Bytes)>,
    pending: VecDeque<(RequestId, String)>,
    requests: Vec<String>,
}

impl LocalServer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` with status 200 at `url`
    pub fn route(&mut self, url: impl Into<String>, body: impl Into<Bytes>) {
        self.routes.insert(url.into(), (200, body.into()));
    }

    /// Serve an empty body with the given status at `url`
    pub fn route_status(&mut self, url: impl Into<String>, status: u16) {
        self.routes.insert(url.into(), (status, Bytes::new()));
    }

    /// Serve `body` with an arbitrary status at `url`; with a non-200
    /// status this simulates a download that breaks off mid-transfer
    pub fn route_full(&mut self, url: impl Into<String>, status: u16, body: impl Into<Bytes>) {
        self.routes.insert(url.into(), (status, body.into()));
    }

    /// URLs requested so far, in submission order
    #[must_use]
    pub fn requests(&self) -> &[String] {
        &self.requests
    }

    pub fn clear_requests(&mut self) {
        self.requests.clear();
    }

    /// Replay queued requests into the engine until none remain.
    ///
    /// Bodies are delivered in two chunks to exercise the streaming
    /// paths; unknown URLs get a 404.
    pub fn drive(engine: &mut SyncEngine<LocalServer>) {
        loop {
            let Some((id, url)) = engine.client_mut().pending.pop_front() else {
                break;
            };
            match engine.client_mut().routes.get(&url).cloned() {
                Some((status, body)) => {
                    let mid = body.len() / 2;
                    if mid > 0 {
                        engine.deliver_body(id, &body[..mid]);
                    }
                    if body.len() > mid {
                        engine.deliver_body(id, &body[mid..]);
                    }
                    engine.deliver_done(id, status);
                }
                None => engine.deliver_done(id, 404),
            }
        }
    }
}

impl HttpClient for LocalServer {
    fn request(&mut self, id: RequestId, url: &str) {
        self.requests.push(url.to_string());
        self.pending.push_back((id, url.to_string()));
    }
}
