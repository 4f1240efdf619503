use std::ops::ControlFlow;
use std::task::Context;
use std::task::Poll;

use block_limit::CountingStore;
use block_limit::Decider;
use block_limit::Denial;
use futures::future::BoxFuture;
use http::Request;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use tower::BoxError;
use tower::Service;

use crate::error::BlockError;
use crate::identify::identify;

#[derive(Clone, Debug)]
struct BlockServiceMetrics {
    decisions: Counter<u64>,
}

impl BlockServiceMetrics {
    fn new() -> Self {
        let meter = global::meter("block_service");
        Self {
            decisions: meter
                .u64_counter("decisions")
                .with_description("Admission decisions by verdict")
                .build(),
        }
    }

    fn record(&self, verdict: &ControlFlow<Denial>) {
        let verdict = match verdict {
            ControlFlow::Continue(()) => "allowed",
            ControlFlow::Break(Denial::Blocked { .. }) => "blocked",
            ControlFlow::Break(Denial::QuotaExceeded { .. }) => "quota_exceeded",
            ControlFlow::Break(Denial::StoreUnavailable) => "store_unavailable",
        };
        self.decisions.add(1, &[KeyValue::new("verdict", verdict)]);
    }
}

/// Consults a [`Decider`] before passing each request to the inner service.
#[derive(Debug)]
pub struct BlockService<S, Inner>
where
    S: ?Sized,
{
    inner: Inner,
    decider: Decider<S>,
    instruments: BlockServiceMetrics,
}

impl<S, Inner> Clone for BlockService<S, Inner>
where
    S: ?Sized,
    Inner: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            decider: self.decider.clone(),
            instruments: self.instruments.clone(),
        }
    }
}

impl<S, Inner, B> Service<Request<B>> for BlockService<S, Inner>
where
    S: CountingStore + ?Sized + 'static,
    Inner: Service<Request<B>> + Clone + Send + 'static,
    Inner::Response: Send + 'static,
    Inner::Error: Into<BoxError>,
    Inner::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = Inner::Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let identifier = identify(&req);
        let decider = self.decider.clone();
        let instruments = self.instruments.clone();

        // The service that was driven to readiness handles this request; the
        // fresh clone stays behind for the next poll_ready.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let verdict = decider.check(&identifier).await;
            instruments.record(&verdict);

            match verdict {
                ControlFlow::Continue(()) => inner.call(req).await.map_err(Into::into),
                ControlFlow::Break(denial) => {
                    tracing::debug!(identifier = %identifier, ?denial, "request denied");
                    Err(Box::new(BlockError::from(denial)) as BoxError)
                }
            }
        })
    }
}

impl<S, Inner> BlockService<S, Inner>
where
    S: ?Sized,
{
    pub fn new(inner: Inner, decider: Decider<S>) -> Self {
        Self {
            inner,
            decider,
            instruments: BlockServiceMetrics::new(),
        }
    }

    pub fn decider(&self) -> &Decider<S> {
        &self.decider
    }
}
