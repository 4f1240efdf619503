use block_limit::Decider;
use tower::Layer;

use crate::service::BlockService;

/// Applies per-identifier quotas and blocks to requests.
#[derive(Debug)]
pub struct BlockLayer<S>
where
    S: ?Sized,
{
    decider: Decider<S>,
}

impl<S> Clone for BlockLayer<S>
where
    S: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            decider: self.decider.clone(),
        }
    }
}

impl<S> BlockLayer<S>
where
    S: ?Sized,
{
    /// Create a BlockLayer
    pub fn new(decider: Decider<S>) -> Self {
        BlockLayer { decider }
    }
}

impl<S, Inner> Layer<Inner> for BlockLayer<S>
where
    S: ?Sized,
{
    type Service = BlockService<S, Inner>;

    fn layer(&self, service: Inner) -> Self::Service {
        BlockService::new(service, self.decider.clone())
    }
}
