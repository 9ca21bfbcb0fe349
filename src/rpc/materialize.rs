//! Turning a response, or a local failure, into a method's return value.

use tracing::debug;

use super::error::{ClientError, Error, RemoteError};
use super::plan::Plan;
use super::signature::{Outputs, Returns, ValueType};

/// Outputs for a call that got a response.
///
/// `value` is the decoded result or the subscription stream; a remote error
/// lands in the error slot untouched.
pub(crate) fn response<R: Returns>(
    plan: &Plan,
    value: Option<R::Value>,
    remote: Option<RemoteError>,
) -> R {
    let value = plan
        .value_out()
        .map(|_| value.unwrap_or_else(<R::Value as ValueType>::zero));

    let error = match (plan.error_out(), remote) {
        (Some(_), Some(err)) => Some(Error::Remote(err)),
        (None, Some(err)) => {
            debug!(method = plan.name(), "No error slot, discarding remote error: {}", err);
            None
        }
        (_, None) => None,
    };

    R::assemble(Outputs { value, error })
}

/// Outputs for a call that failed on this side: zero value plus a client
/// error.
pub(crate) fn failure<R: Returns>(plan: &Plan, cause: ClientError) -> R {
    let value = plan.value_out().map(|_| <R::Value as ValueType>::zero());

    let error = match plan.error_out() {
        Some(_) => Some(Error::Client(cause)),
        None => {
            debug!(method = plan.name(), "No error slot, discarding client error: {}", cause);
            None
        }
    };

    R::assemble(Outputs { value, error })
}
