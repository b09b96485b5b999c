//! Interactive exec session proxying.
//!
//! Provides:
//! - `ExecSessionManager` - exclusive-per-target duplex sessions
//! - `FrameDecoder` - demultiplexer for interleaved stdout/stderr frames
//! - `OutputSink` - destination contract for pumped output

pub mod demux;
pub mod manager;

pub use demux::{DemuxError, Frame, FrameDecoder, StreamKind, encode_frame};
pub use manager::{ExecSessionManager, ExecStarted, LogSink, OutputSink, SessionError};
