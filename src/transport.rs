//! Transport abstractions and sender backends.
//!
//! This module defines a Tower-compatible transport used to deliver
//! rebuilt [`reqwest::Request`]s. Any `tower::Service` speaking
//! `reqwest::Request -> reqwest::Response` can be wrapped directly, and
//! `reqwest::Client` is one such service.
//!
//! The transport does not classify responses: a response of any status is a
//! successful round trip here. Deciding that a 503 means "try again later"
//! is the drain engine's job.
//!
//! ## Key components
//!
//! - [`Transport`]: Public-facing wrapper implementing `tower::Service`
//! - [`SenderService`]: Adapter from a [`Sender`] to a Tower service
//! - [`Sender`]: Trait implemented by concrete sender backends
//! - [`TransportError`]: Unified error type with tracing context

mod client;
mod inmemory;

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tower::{Service, ServiceExt as _};
use tracing_error::SpanTrace;

pub use inmemory::InMemory;

/// Generic Tower-compatible transport wrapper.
///
/// `Transport` is the entry point the drain engine delivers through. It
/// wraps an underlying Tower `Service` and:
///
/// - Normalizes errors into [`TransportError`]
/// - Supports Tower middleware via layers
/// - Provides a convenience [`deliver`](Transport::deliver) API
#[derive(Clone)]
pub struct Transport<S> {
    service: S,
}

impl<D> Transport<SenderService<D>> {
    /// Create a new transport from a concrete sender backend.
    ///
    /// The sender will be wrapped in a [`SenderService`] to make it
    /// Tower-compatible.
    pub fn new(sender: D) -> Self {
        Self {
            service: SenderService::new(sender),
        }
    }
}

impl<S> Transport<S> {
    /// Create a transport from an existing Tower service, such as a
    /// `reqwest::Client` or a `tower::service_fn`.
    pub fn from_service(service: S) -> Self {
        Self { service }
    }

    /// Apply a Tower layer to the transport.
    ///
    /// This enables composition with middleware such as timeouts, rate
    /// limits, or tracing.
    pub fn layer<L>(self, layer: L) -> Transport<L::Service>
    where
        L: tower::Layer<S>,
    {
        Transport {
            service: layer.layer(self.service),
        }
    }
}

/// Tower `Service` implementation for `Transport`.
///
/// Delegates readiness and request handling to the inner service while mapping
/// all errors into [`TransportError`].
impl<S> Service<reqwest::Request> for Transport<S>
where
    S: Service<reqwest::Request, Response = reqwest::Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<tower::BoxError>,
{
    type Response = reqwest::Response;
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<reqwest::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service
            .poll_ready(cx)
            .map_err(|e| TransportError::sender(e.into()))
    }

    fn call(&mut self, req: reqwest::Request) -> Self::Future {
        let mut service = self.service.clone();

        Box::pin(async move {
            service
                .call(req)
                .await
                .map_err(|e| TransportError::sender(e.into()))
        })
    }
}

impl<S> Transport<S> {
    /// Deliver a request and return whatever response came back.
    ///
    /// Waits for the inner service to be ready first, so layered middleware
    /// such as concurrency limits is honoured.
    pub async fn deliver(
        &self,
        request: reqwest::Request,
    ) -> Result<reqwest::Response, TransportError>
    where
        S: Service<reqwest::Request, Response = reqwest::Response> + Clone + Send + 'static,
        S::Future: Send + 'static,
        S::Error: Into<tower::BoxError>,
    {
        let mut service = self.service.clone();
        service
            .ready()
            .await
            .map_err(|e| TransportError::sender(e.into()))?
            .call(request)
            .await
            .map_err(|e| TransportError::sender(e.into()))
    }
}

/// Error returned by transport operations.
///
/// Each error captures:
/// - The underlying error kind
/// - A tracing span backtrace for improved diagnostics
#[derive(Debug)]
pub struct TransportError {
    context: SpanTrace,
    kind: TransportErrorKind,
}

/// Transport errors kind.
#[derive(Debug)]
pub enum TransportErrorKind {
    /// Errors originating from the sender backend (unreachable host,
    /// connection reset, TLS failure, ...).
    Sender(tower::BoxError),
    /// The request was abandoned by a timeout layer.
    Timeout(tower::BoxError),
}

impl TransportError {
    /// Create a sender-related transport error.
    ///
    /// Errors raised by `tower::timeout` are classified as
    /// [`TransportErrorKind::Timeout`].
    pub fn sender(err: tower::BoxError) -> Self {
        let kind = if err.is::<tower::timeout::error::Elapsed>() {
            TransportErrorKind::Timeout(err)
        } else {
            TransportErrorKind::Sender(err)
        };
        Self {
            context: SpanTrace::capture(),
            kind,
        }
    }

    pub fn kind(&self) -> &TransportErrorKind {
        &self.kind
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            TransportErrorKind::Sender(err) => writeln!(f, "Sender error: {err}"),
            TransportErrorKind::Timeout(err) => writeln!(f, "Timeout: {err}"),
        }?;
        self.context.fmt(f)
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            TransportErrorKind::Sender(err) => Some(err.as_ref()),
            TransportErrorKind::Timeout(err) => Some(err.as_ref()),
        }
    }
}

/// Tower service adapter for a [`Sender`] backend.
///
/// This type bridges the [`Sender`] trait with Tower’s `Service` abstraction.
#[derive(Clone)]
pub struct SenderService<D> {
    sender: D,
}

impl<D> SenderService<D> {
    /// Create a new sender service from a backend.
    pub fn new(sender: D) -> Self {
        Self { sender }
    }
}

/// `tower::Service` implementation delegating to a [`Sender`].
impl<D> Service<reqwest::Request> for SenderService<D>
where
    D: Sender + Clone + Send + 'static,
{
    type Response = reqwest::Response;
    type Error = tower::BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<reqwest::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: reqwest::Request) -> Self::Future {
        let mut sender = self.sender.clone();
        Box::pin(async move { sender.send(req).await.map_err(Into::into) })
    }
}

/// Trait implemented by concrete sender backends.
///
/// A sender is responsible for putting a request on the wire (or
/// pretending to) and returning the server's response.
#[async_trait::async_trait]
pub trait Sender {
    /// Backend-specific error type.
    type Error: Into<tower::BoxError>;

    /// Send a request using the underlying transport.
    async fn send(&mut self, request: reqwest::Request) -> Result<reqwest::Response, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request() -> reqwest::Request {
        reqwest::Client::new()
            .post("https://example.com/events")
            .body("e")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn delivers_through_service_fn() {
        let transport = Transport::from_service(tower::service_fn(
            |req: reqwest::Request| async move {
                assert_eq!(req.method(), reqwest::Method::POST);
                let response = ::http::Response::builder()
                    .status(201)
                    .body(Vec::<u8>::new())
                    .unwrap();
                Ok::<_, std::io::Error>(reqwest::Response::from(response))
            },
        ));

        let response = transport.deliver(request()).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    }

    #[tokio::test]
    async fn maps_backend_errors_to_sender_kind() {
        let transport = Transport::new(InMemory::offline());

        let err = transport.deliver(request()).await.unwrap_err();
        assert!(matches!(err.kind(), TransportErrorKind::Sender(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn classifies_timeout_layer_errors() {
        let transport = Transport::from_service(tower::service_fn(
            |_req: reqwest::Request| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, std::io::Error>(reqwest::Response::from(::http::Response::new(
                    Vec::<u8>::new(),
                )))
            },
        ))
        .layer(tower::timeout::TimeoutLayer::new(Duration::from_secs(1)));

        let err = transport.deliver(request()).await.unwrap_err();
        assert!(matches!(err.kind(), TransportErrorKind::Timeout(_)));
    }
}
