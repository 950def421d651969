//! Authentication nodes and the edges that produce them.

pub mod authentication;
pub mod authenticator;
pub mod identity;
pub mod password;
pub mod recovery;
pub mod session;
pub mod verification;

pub use authentication::*;
pub use authenticator::*;
pub use identity::*;
pub use password::*;
pub use recovery::*;
pub use session::*;
pub use verification::*;

use tracing::debug;

use authflow_core::authn::{IdentitySpec, IdentityType, OobChannel};
use authflow_core::error::{AuthflowError, Result};
use authflow_core::types::{BucketSpec, OtpKind, SendOptions};

use super::DynAuthInput;
use crate::engine::Context;

/// The input, or `IncompatibleInput` when the edge was reached without one.
pub(crate) fn require_input(input: Option<&DynAuthInput>) -> Result<&DynAuthInput> {
    input.ok_or(AuthflowError::IncompatibleInput)
}

/// A required input field, or `IncompatibleInput`.
pub(crate) fn require<T>(value: Option<T>) -> Result<T> {
    value.ok_or(AuthflowError::IncompatibleInput)
}

/// The identity spec of the input if it is of type `typ`.
pub(crate) fn require_spec(input: Option<&DynAuthInput>, typ: IdentityType) -> Result<IdentitySpec> {
    let spec = require_input(input)?.identity_spec();
    require(spec.filter(|spec| spec.identity_type() == typ).cloned())
}

/// Generate a one-time code and deliver it, charging the target's rate-limit bucket first.
pub(crate) async fn send_otp(
    ctx: &Context,
    channel: OobChannel,
    target: &str,
    kind: OtpKind,
) -> Result<()> {
    ctx.services
        .rate_limiter
        .take(&BucketSpec::otp_trigger(channel, target))
        .await?;
    let code = ctx.services.otp_codes.generate(target, kind).await?;
    ctx.services
        .otp_sender
        .send(&SendOptions {
            channel,
            target: target.to_string(),
            kind,
            code,
        })
        .await?;
    debug!(channel = ?channel, kind = ?kind, "One-time code sent");
    Ok(())
}
