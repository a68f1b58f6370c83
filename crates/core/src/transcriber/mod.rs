//! External transcription adapter.
//!
//! The transcriber is an opaque out-of-process program that takes a media
//! file and a language code and leaves a subtitle file behind in its working
//! directory. This module wraps it behind the [`Transcriber`] trait so the
//! executor never deals with processes directly.

pub mod external;
pub mod process;
pub mod sink;
pub mod types;

pub use external::{ExternalTranscriber, TranscriberConfig};
pub use sink::{OutputSink, OutputStream, TracingSink};
pub use types::{TranscribeError, Transcriber, TranscriptionRequest};
