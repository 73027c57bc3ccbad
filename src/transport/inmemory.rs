use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use reqwest::StatusCode;

use crate::transport::Sender;

/// Scripted in-memory transport for testing or local pipelines.
///
/// `InMemory` never touches the network. It records every request handed to
/// it and answers according to its current script:
///
/// - while **offline**, every send fails with a `NotConnected` I/O error
/// - while **online**, every send returns an empty response with the
///   configured status (`204 No Content` by default)
///
/// Clones share the same script and log, so a test can keep one handle and
/// give the other to the queue.
#[derive(Clone)]
pub struct InMemory {
    state: Arc<Mutex<State>>,
}

struct State {
    online: bool,
    status: StatusCode,
    requests: Vec<reqwest::Request>,
}

impl InMemory {
    /// Create an online transport answering `204 No Content`.
    pub fn online() -> Self {
        Self::with_state(true)
    }

    /// Create a transport that rejects every send until [`go_online`](Self::go_online).
    pub fn offline() -> Self {
        Self::with_state(false)
    }

    fn with_state(online: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                online,
                status: StatusCode::NO_CONTENT,
                requests: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn go_online(&self) {
        self.lock().online = true;
    }

    pub fn go_offline(&self) {
        self.lock().online = false;
    }

    /// Status returned for every request sent while online.
    pub fn respond_with(&self, status: StatusCode) {
        self.lock().status = status;
    }

    /// Number of send attempts so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.lock().requests.len()
    }

    /// Return every request handed to the transport and clear the log.
    pub fn take_requests(&self) -> Vec<reqwest::Request> {
        std::mem::take(&mut self.lock().requests)
    }
}

impl Default for InMemory {
    fn default() -> Self {
        Self::online()
    }
}

#[async_trait::async_trait]
impl Sender for InMemory {
    type Error = std::io::Error;

    /// "Send" a request by appending it to the log and answering from the
    /// script.
    #[tracing::instrument(skip_all)]
    async fn send(&mut self, request: reqwest::Request) -> Result<reqwest::Response, Self::Error> {
        let mut state = self.lock();
        tracing::info!(
            method = %request.method(),
            url = %request.url(),
            online = state.online,
            "Request handed to in-memory transport",
        );
        state.requests.push(request);

        if !state.online {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "in-memory transport is offline",
            ));
        }

        let mut response = http::Response::new(Vec::<u8>::new());
        *response.status_mut() = state.status;
        Ok(reqwest::Response::from(response))
    }
}
