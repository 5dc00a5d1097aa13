//! Internal data structures shared by the reactor components.
//!
//! The [`Arena`] gives watchers stable generational handles so that a stale
//! handle held by a callback can never reach a recycled slot.

mod arena;

pub(crate) use arena::{Arena, Key};
