//! # snipsync Protocol
//!
//! Snippet data model and live-frame codec for snipsync.
//!
//! This crate provides:
//! - `Snippet` and its metadata types (headers, resources, visibility)
//! - `UpdateAction` deltas (`Created` / `Updated` / `Deleted`)
//! - The JSON live-frame codec (`decode_frame` / `encode_frame`)
//! - `SyncOutcome` for the observer-facing result stream
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod frame;
mod outcome;
mod snippet;

pub use action::{ActionKind, SnippetDelta, UpdateAction};
pub use frame::{decode_frame, encode_frame, FrameError};
pub use outcome::{FailureKind, SyncFailure, SyncOutcome};
pub use snippet::{
    DynamicResource, HeaderMap, PropMap, RenderEngine, ResourceKind, Snippet, Visibility,
};
