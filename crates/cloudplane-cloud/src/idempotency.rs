//! Idempotency tokens for provider calls
//!
//! Mutating provider APIs accept a client token so a retried request is
//! applied at most once. The token is derived from the activity identity,
//! so every retry of the same activity sends the same token.

use crate::activity::ActivityContext;

/// Fill `token` with the activity's idempotency token unless one was supplied
pub fn token_for(ctx: &ActivityContext, token: &mut Option<String>) {
    if token.is_none() {
        *token = Some(format!("{}-{}", ctx.run_id(), ctx.activity_id()));
    }
}
