//! respack-lib: overlay engine for custom game resources.
//!
//! This crate copies user-selected resource files into a live application
//! directory, remembers what was there before, and puts it back afterwards:
//! - `copy`: recursive tree copy with directory filtering and read-only output
//! - `watch`: debounced filesystem watching of the resource folders
//! - `manifest`: the durable backup manifest and preserved originals
//! - `registry`: the in-memory set of known resources, reconciled from events
//! - `overlay`: the controller state machine tying everything together

pub mod archive;
pub mod config;
pub mod consts;
pub mod copy;
pub mod key;
pub mod manifest;
pub mod overlay;
pub mod platform;
pub mod registry;
pub mod state_lock;
pub mod watch;
