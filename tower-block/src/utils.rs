use block_limit::Decider;
use tower::ServiceBuilder;
use tower::layer::util::Stack;

use crate::BlockLayer;

/// Service Builder Extension with additional useful functions for tower::ServiceBuilder.
pub trait ServiceBuilderExt<L> {
    /// Add a quota and block layer driven by `decider`
    fn block_limit<S>(self, decider: Decider<S>) -> ServiceBuilder<Stack<BlockLayer<S>, L>>
    where
        S: ?Sized;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn block_limit<S>(self, decider: Decider<S>) -> ServiceBuilder<Stack<BlockLayer<S>, L>>
    where
        S: ?Sized,
    {
        self.layer(BlockLayer::new(decider))
    }
}
