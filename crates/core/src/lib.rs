//! Domain types shared by every Tessera crate.
//!
//! - [`event`]: the canonical [`Event`](event::Event) and
//!   [`RitualCompletion`](event::RitualCompletion) shapes.
//! - [`retry`]: generic retry/backoff and timeout helpers for outbound I/O.
//! - [`collaborators`]: capability traits for the external ledger and
//!   spatial-data services.
//! - [`topics`]: well-known bus topic names.

pub mod collaborators;
pub mod error;
pub mod event;
pub mod retry;
pub mod topics;
pub mod types;
