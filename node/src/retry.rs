//! Retrying JSON-RPC transport for the execution client.
//!
//! Timeouts and transient connection failures are the transport's concern,
//! not the engine's: every caller above this layer treats a request as
//! blocking until it yields a response or a final error. Reverts and other
//! answers from the node are final and never retried.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use alloy::{
    providers::{ProviderBuilder, RootProvider},
    rpc::{
        client::ClientBuilder,
        json_rpc::{RequestPacket, ResponsePacket, RpcError},
    },
    transports::{http::ReqwestTransport, TransportError},
};
use tower::{Layer, Service};
use tracing::warn;

/// Longest wait between two attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// JSON-RPC error codes execution clients and hosted endpoints use for rate
/// limiting.
const RATE_LIMIT_CODES: [i64; 2] = [429, -32005];

/// Exponential backoff starting at `initial`, doubling per attempt up to
/// [`MAX_BACKOFF`], for at most `max_retries` retries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max_retries: u32,
}

impl Backoff {
    /// Wait before retry number `attempt`, counting from zero.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.initial
            .saturating_mul(1u32 << attempt.min(16))
            .min(MAX_BACKOFF)
    }
}

/// Whether `err` may go away by asking again: the request never got an
/// answer, or the endpoint asked to slow down.
pub fn is_transient(err: &TransportError) -> bool {
    match err {
        RpcError::Transport(_) => true,
        RpcError::ErrorResp(payload) => RATE_LIMIT_CODES.contains(&payload.code),
        _ => false,
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BackoffLayer(Backoff);

impl BackoffLayer {
    pub const fn new(backoff: Backoff) -> Self {
        Self(backoff)
    }
}

impl<S> Layer<S> for BackoffLayer {
    type Service = RetryingTransport<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryingTransport {
            inner,
            backoff: self.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RetryingTransport<S> {
    inner: S,
    backoff: Backoff,
}

impl<S> Service<RequestPacket> for RetryingTransport<S>
where
    S: Service<RequestPacket, Response = ResponsePacket, Error = TransportError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = ResponsePacket;
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: RequestPacket) -> Self::Future {
        // The ready service goes into the future, a fresh clone stays behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let backoff = self.backoff;

        Box::pin(async move {
            let mut attempt = 0;
            loop {
                match inner.call(req.clone()).await {
                    Err(err) if attempt < backoff.max_retries && is_transient(&err) => {
                        let delay = backoff.delay(attempt);
                        attempt += 1;
                        warn!(attempt, ?delay, "execution client request failed, retrying: {err}");
                        tokio::time::sleep(delay).await;
                    }
                    res => return res,
                }
            }
        })
    }
}

/// Execution client transport used by every alloy-backed component.
pub type ExecutionTransport = RetryingTransport<ReqwestTransport>;

/// Builds an HTTP provider whose transient failures are retried with
/// exponential backoff.
pub fn execution_provider(rpc_url: url::Url, backoff: Backoff) -> RootProvider<ExecutionTransport> {
    let client = ClientBuilder::default()
        .layer(BackoffLayer::new(backoff))
        .http(rpc_url);
    ProviderBuilder::new().on_client(client)
}
