//! Acceptance policy for values stored by remote nodes.

use std::fmt::Debug;

use tracing::trace;

use crate::common::Id;

/// Decides whether a key/value pair pushed by a remote node may be stored.
///
/// Only inbound `store` requests are validated; local puts are not.
pub trait Validator: Debug + Send {
    fn validate(&self, target: &Id, value: &[u8]) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
/// Accepts everything.
///
/// Placeholder until a trust or authorization policy exists.
pub struct AcceptAll;

impl Validator for AcceptAll {
    fn validate(&self, target: &Id, value: &[u8]) -> bool {
        trace!(?target, len = value.len(), "Accepting value");
        true
    }
}

/// A validator from a plain predicate.
pub struct ValidatorFn<F>(pub F);

impl<F> Debug for ValidatorFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ValidatorFn")
    }
}

impl<F> Validator for ValidatorFn<F>
where
    F: Fn(&Id, &[u8]) -> bool + Send,
{
    fn validate(&self, target: &Id, value: &[u8]) -> bool {
        (self.0)(target, value)
    }
}
