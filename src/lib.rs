//! Leadgate: execution authority for lead outreach side effects.
//!
//! Three layers decide whether anything leaves the building:
//! - [`lifecycle`]: which lead transitions exist and who may make them,
//! - [`tokens`]: short-lived, single-use capabilities scoped to one
//!   channel and command type,
//! - [`orchestrator`]: the single entry point that validates, gates on
//!   rehearsal/live safety controls, and routes commands to stateless
//!   [`adapters`].
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod types;

pub mod idempotency;
pub mod lifecycle;
pub mod storage;
pub mod tokens;

pub mod adapters;
pub mod providers;

pub mod bootstrap;
pub mod orchestrator;
pub mod sweeper;
