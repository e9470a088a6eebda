//! Cloudplane durable cloud operations
//!
//! This crate provides the primitives that turn an unreliable, slow,
//! externally-stateful provider call into a unit of work (an *activity*)
//! that can run safely inside a durable execution: it can be retried,
//! heartbeats while it waits, and can be cancelled between polls.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │            reconciler / execution               │
//! └─────────────────┬───────────────────────────────┘
//!                   │ run_activity (retry policy)
//! ┌─────────────────▼───────────────────────────────┐
//! │               cloudplane-cloud                  │
//! │  ┌──────────────┐  ┌──────────────┐             │
//! │  │ ActivityCtx  │  │ idempotency  │             │
//! │  └──────────────┘  └──────────────┘             │
//! │  ┌──────────────┐  ┌──────────────┐             │
//! │  │    Waiter    │  │  VoidFuture  │             │
//! │  └──────────────┘  └──────────────┘             │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │ codec: ProviderError <-> ActivityError   │   │
//! │  └──────────────────────────────────────────┘   │
//! └───────┬─────────────────────────────────────────┘
//!         │
//! ┌───────▼───────┐
//! │   provider    │  (helm, cloud SDK adapters)
//! └───────────────┘
//! ```

pub mod activity;
pub mod codec;
pub mod error;
pub mod future;
pub mod idempotency;
pub mod provider;
pub mod retry;
pub mod waiter;

// Re-exports
pub use activity::{ActivityContext, Cancelled};
pub use codec::{
    ActivityError, Decoded, Failure, PROVIDER_PREFIX, PortableError, decode, decode_result,
    encode, encode_result,
};
pub use error::{CloudError, Result};
pub use future::VoidFuture;
pub use idempotency::token_for;
pub use provider::{NOT_READY_CODE, OriginalError, ProviderError, ProviderFailure};
pub use retry::{RetryPolicy, run_activity};
pub use waiter::{DEFAULT_POLL_INTERVAL, WaitError, Waiter};
