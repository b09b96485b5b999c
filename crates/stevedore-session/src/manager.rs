//! Exclusive interactive exec sessions, one per target container.

use std::{collections::HashMap, sync::Arc};

use stevedore_core::{
    EngineClient, EngineError,
    engine::ExecConn,
    types::ExecSpec,
};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::Mutex,
    task::JoinHandle,
};

use crate::demux::{FrameDecoder, StreamKind};

/// Session manager failure taxonomy.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// No active interactive session exists for the target id. Surfaced
    /// distinctly from transport-level write failures.
    #[error("no active session for {0}")]
    NotConnected(String),
    #[error("stream write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination for pumped output frames.
pub trait OutputSink: Send + Sync {
    fn stdout(&self, data: &[u8]);
    fn stderr(&self, data: &[u8]);
    /// Called once when the stream ends, however it ends.
    fn closed(&self) {}
}

/// Sink that forwards exec output into the process log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl OutputSink for LogSink {
    fn stdout(&self, data: &[u8]) {
        tracing::info!(stream = "stdout", "{}", String::from_utf8_lossy(data));
    }

    fn stderr(&self, data: &[u8]) {
        tracing::info!(stream = "stderr", "{}", String::from_utf8_lossy(data));
    }
}

type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;
type SessionTable = Arc<Mutex<HashMap<String, ActiveSession>>>;

struct ActiveSession {
    exec_id: String,
    writer: SharedWriter,
    pump: JoinHandle<()>,
}

impl ActiveSession {
    /// Close the stream handle: the pump observes EOF/cancellation and
    /// exits; no explicit signal beyond the closed stream is needed.
    async fn close(self) {
        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(error = %e, "exec stream shutdown failed");
            }
        }
        self.pump.abort();
    }
}

/// Outcome of an exec request.
#[derive(Debug, Clone)]
pub struct ExecStarted {
    pub exec_id: String,
    /// Whether a duplex stream was attached (interactive exec only).
    pub attached: bool,
}

/// Owns at most one interactive stream per target id.
///
/// Streams are owned internally and never handed to callers; input flows in
/// through [`send_input`](Self::send_input) and output flows out through the
/// session's [`OutputSink`].
#[derive(Default)]
pub struct ExecSessionManager {
    sessions: SessionTable,
}

impl ExecSessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and start an exec instance in `target_id`, attaching its
    /// duplex stream when the spec keeps a terminal alive (tty + stdin).
    ///
    /// A session already bound to `target_id` is closed before the new one
    /// is installed; its pump never runs concurrently with the new one.
    ///
    /// # Errors
    /// Returns [`SessionError::Engine`] when any engine call fails.
    pub async fn exec<E>(
        &self,
        engine: &E,
        target_id: &str,
        spec: ExecSpec,
        sink: Arc<dyn OutputSink>,
    ) -> Result<ExecStarted, SessionError>
    where
        E: EngineClient + ?Sized,
    {
        let keep_alive = spec.keep_alive();
        let tty = spec.tty;
        let exec_id = engine.exec_create(target_id, spec).await?;
        engine.exec_start(&exec_id, tty).await?;

        if !keep_alive {
            return Ok(ExecStarted {
                exec_id,
                attached: false,
            });
        }

        let conn = engine.exec_attach(&exec_id).await?;
        tracing::info!(target_id, exec_id = %exec_id, "exec stream attached");
        self.install(target_id, exec_id.clone(), conn, sink).await;
        Ok(ExecStarted {
            exec_id,
            attached: true,
        })
    }

    /// Write raw bytes to the live stream for `target_id`.
    ///
    /// # Errors
    /// [`SessionError::NotConnected`] when no session exists;
    /// [`SessionError::Io`] when the transport write fails.
    pub async fn send_input(&self, target_id: &str, bytes: &[u8]) -> Result<(), SessionError> {
        let writer = {
            let sessions = self.sessions.lock().await;
            sessions.get(target_id).map(|s| Arc::clone(&s.writer))
        }
        .ok_or_else(|| SessionError::NotConnected(target_id.to_string()))?;

        let mut writer = writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Close and remove the session for `target_id`.
    ///
    /// Returns whether a session existed.
    pub async fn close(&self, target_id: &str) -> bool {
        let session = self.sessions.lock().await.remove(target_id);
        match session {
            Some(session) => {
                session.close().await;
                true
            }
            None => false,
        }
    }

    /// Whether a session is currently bound to `target_id`.
    pub async fn is_attached(&self, target_id: &str) -> bool {
        self.sessions.lock().await.contains_key(target_id)
    }

    async fn install(
        &self,
        target_id: &str,
        exec_id: String,
        conn: ExecConn,
        sink: Arc<dyn OutputSink>,
    ) {
        let mut sessions = self.sessions.lock().await;
        if let Some(previous) = sessions.remove(target_id) {
            tracing::info!(target_id, "superseding existing exec session");
            previous.close().await;
        }

        let writer: SharedWriter = Arc::new(Mutex::new(conn.writer));
        let pump = tokio::spawn(pump(
            Arc::clone(&self.sessions),
            target_id.to_string(),
            exec_id.clone(),
            conn.reader,
            sink,
        ));
        sessions.insert(
            target_id.to_string(),
            ActiveSession {
                exec_id,
                writer,
                pump,
            },
        );
    }
}

/// Per-session background task: demultiplex the engine-side stream into the
/// session's output sinks until EOF, corruption or supersession.
async fn pump(
    sessions: SessionTable,
    target_id: String,
    exec_id: String,
    mut reader: Box<dyn AsyncRead + Send + Unpin>,
    sink: Arc<dyn OutputSink>,
) {
    let mut decoder = FrameDecoder::new();
    let mut chunk = [0u8; 8192];

    'read: loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                tracing::debug!(target_id = %target_id, "exec stream EOF");
                break 'read;
            }
            Ok(n) => {
                decoder.extend(&chunk[..n]);
                loop {
                    match decoder.next_frame() {
                        Ok(Some(frame)) => match frame.kind {
                            // The engine never frames stdin output, but a
                            // stdin-tagged frame still carries terminal data.
                            StreamKind::Stdout | StreamKind::Stdin => sink.stdout(&frame.data),
                            StreamKind::Stderr => sink.stderr(&frame.data),
                        },
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(target_id = %target_id, error = %e, "exec stream corrupted");
                            break 'read;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::debug!(target_id = %target_id, error = %e, "exec stream closed");
                break 'read;
            }
        }
    }

    sink.closed();

    // Remove our own entry unless a superseding attach replaced it already.
    let mut sessions = sessions.lock().await;
    if sessions
        .get(&target_id)
        .is_some_and(|s| s.exec_id == exec_id)
    {
        sessions.remove(&target_id);
        tracing::debug!(target_id = %target_id, "exec session removed");
    }
}
