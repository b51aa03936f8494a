//! ResponseFilter - early-exit policy for filtered rounds
//!
//! A filter sees replies in arrival order and decides when a round has heard
//! enough. Any two replies it accepts must be equally valid: the round commits
//! to whichever arrives first.

use crate::{NodeAddress, Response};

/// Caller-supplied acceptance policy
pub trait ResponseFilter: Send {
    /// Judge one reply.
    fn is_acceptable(&mut self, response: &Response, sender: &NodeAddress) -> bool;

    /// Whether the round should keep waiting for further replies.
    fn need_more_responses(&self) -> bool;
}

impl<F: ResponseFilter + ?Sized> ResponseFilter for Box<F> {
    fn is_acceptable(&mut self, response: &Response, sender: &NodeAddress) -> bool {
        (**self).is_acceptable(response, sender)
    }

    fn need_more_responses(&self) -> bool {
        (**self).need_more_responses()
    }
}

/// Accepts the first successful reply, typically for remote reads.
#[derive(Debug, Clone, Default)]
pub struct FirstValidResponse {
    require_value: bool,
    accepted: bool,
}

impl FirstValidResponse {
    /// Accept any successful reply, including a null value
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept only successful replies that carry a value
    pub fn requiring_value() -> Self {
        Self {
            require_value: true,
            accepted: false,
        }
    }
}

impl ResponseFilter for FirstValidResponse {
    fn is_acceptable(&mut self, response: &Response, _sender: &NodeAddress) -> bool {
        let ok = response.is_successful() && (!self.require_value || response.payload().is_some());
        self.accepted |= ok;
        ok
    }

    fn need_more_responses(&self) -> bool {
        !self.accepted
    }
}

/// Adapts a closure into a filter that is satisfied by its first acceptance.
pub struct ResponseFilterFn<F> {
    predicate: F,
    accepted: bool,
}

impl<F> ResponseFilterFn<F>
where
    F: FnMut(&Response, &NodeAddress) -> bool + Send,
{
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            accepted: false,
        }
    }
}

impl<F> ResponseFilter for ResponseFilterFn<F>
where
    F: FnMut(&Response, &NodeAddress) -> bool + Send,
{
    fn is_acceptable(&mut self, response: &Response, sender: &NodeAddress) -> bool {
        let ok = (self.predicate)(response, sender);
        self.accepted |= ok;
        ok
    }

    fn need_more_responses(&self) -> bool {
        !self.accepted
    }
}
