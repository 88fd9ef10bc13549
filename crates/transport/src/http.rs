//! Blocking HTTP transport
//!
//! Requests queue in submission order and are performed one at a time
//! by [`HttpTransport::drive`], which streams each response body into
//! the engine. The engine schedules follow-up requests from inside the
//! delivery calls, so the queue keeps growing until the sync has
//! nothing left to fetch.

use std::collections::VecDeque;
use std::io::Read;
use std::time::Duration;

use color_eyre::Result;
use tracing::{debug, warn};

use hsync_core::{HttpClient, RequestId, SyncEngine};

/// Read buffer for response bodies (64 KiB)
const BODY_BUF_LEN: usize = 64 * 1024;

/// Per-request timeout; manifests are tiny but scenery files are not
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Real GET transport over `reqwest`
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    pending: VecDeque<(RequestId, String)>,
}

impl HttpTransport {
    /// # Errors
    /// Returns an error if the underlying client cannot be built.
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            pending: VecDeque::new(),
        })
    }

    /// Perform queued requests until the engine has nothing in flight.
    ///
    /// Network-level failures (connect errors, mid-body read errors)
    /// are delivered as status 0, which the engine treats like any
    /// other non-200 response for that artifact.
    pub fn drive(engine: &mut SyncEngine<HttpTransport>) {
        loop {
            let Some((id, url)) = engine.client_mut().pending.pop_front() else {
                break;
            };
            debug!(%url, "GET");

            let response = engine.client_mut().client.get(&url).send();
            let status = match response {
                Ok(resp) => stream_body(engine, id, resp),
                Err(err) => {
                    warn!(%url, %err, "request failed");
                    0
                }
            };
            engine.deliver_done(id, status);
        }
    }
}

/// Stream a response body into the engine; returns the status to
/// deliver (0 if the body could not be read to the end)
fn stream_body(
    engine: &mut SyncEngine<HttpTransport>,
    id: RequestId,
    mut resp: reqwest::blocking::Response,
) -> u16 {
    let status = resp.status().as_u16();
    let mut buf = vec![0u8; BODY_BUF_LEN];

    loop {
        match resp.read(&mut buf) {
            Ok(0) => return status,
            Ok(n) => engine.deliver_body(id, &buf[..n]),
            Err(err) => {
                warn!(%err, "read error mid-body");
                return 0;
            }
        }
    }
}

impl HttpClient for HttpTransport {
    fn request(&mut self, id: RequestId, url: &str) {
        self.pending.push_back((id, url.to_string()));
    }
}
