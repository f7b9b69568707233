//! vpcflow convergence engine
//!
//! Provisioning against an eventually consistent network API comes down to
//! three primitives, shared by every resource adapter:
//!
//! - **Waiter** ([`waiter`]): polls a probe until the remote object reaches a
//!   target lifecycle state, fails fast on undeclared states, times out.
//! - **Retry** ([`retry`]): wraps one idempotent mutating call, retrying
//!   transient errors, treating "not found" as done and conflicts as final.
//! - **Reconcile** ([`reconcile`]): diffs desired vs. observed collections
//!   (routes, ingress rules) by content hash.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  Orchestrator                    │
//! └─────────────────┬───────────────────────────────┘
//!                   │ create / read / update / delete
//! ┌─────────────────▼───────────────────────────────┐
//! │                  vpcflow-aws                     │
//! │   vpc · subnet · igw · route table · sg ...      │
//! └───────┬─────────────────┬───────────────┬───────┘
//!         │                 │               │
//! ┌───────▼──────┐ ┌────────▼──────┐ ┌──────▼───────┐
//! │    waiter    │ │     retry     │ │  reconcile   │
//! └──────────────┘ └───────────────┘ └──────────────┘
//!                   vpcflow-core
//! ```

pub mod error;
pub mod reconcile;
pub mod retry;
pub mod state;
pub mod waiter;

// Re-exports
pub use error::{CloudError, ErrorClass, Operation, ProviderError, Result, ResultExt};
pub use reconcile::{
    Canonical, Change, ChangeOp, ContentHash, Diff, SetElement, diff, diff_owned, retain_managed,
};
pub use retry::{Applied, Outcome, RetryConfig, retry};
pub use state::{
    Checkpoint, GlobalState, MemoryCheckpoint, ResourceState, ResourceStatus, StateManager,
};
pub use waiter::{
    ABSENT, ConvergenceSpec, Probe, ProbeResult, wait_for_state, wait_for_state_until,
};
