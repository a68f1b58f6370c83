//! Domain logic for the subtitle transcription job service.
//!
//! Everything here is free of HTTP concerns: the job model and its state
//! machine, the in-memory [`registry::JobRegistry`], the external
//! [`transcriber`] adapter, and the bounded [`executor::JobExecutor`] that
//! ties them together.

pub mod error;
pub mod executor;
pub mod job;
pub mod registry;
pub mod transcriber;
