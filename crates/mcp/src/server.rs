//! Stdio MCP server loop.
//!
//! Reads one JSON-RPC frame per line from the input, answers cheap
//! requests inline and runs each `tools/call` as its own task so long
//! generations do not block `ping` or other calls. All output goes
//! through a single writer task fed by an unbounded channel, so frames
//! from concurrent calls never interleave.

use std::sync::Arc;

use comfy_mcp_comfyui::events::{EventLevel, GenerationEvent, ProgressSink};
use comfy_mcp_comfyui::poller::{Sleeper, TokioSleeper};
use comfy_mcp_comfyui::store::ArtifactStore;
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::error::McpError;
use crate::protocol::{
    parse_frame, ClientRequest, Frame, FrameError, InitializeResult, LogLevel, Notification,
    RequestId, Response,
};
use crate::tools::ToolRegistry;

/// Sending half of the output channel. Each item is one serialized frame.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<String>,
}

impl Outbox {
    pub fn send<T: Serialize>(&self, frame: &T) {
        match serde_json::to_string(frame) {
            Ok(line) => {
                if self.tx.send(line).is_err() {
                    tracing::debug!("Output closed, dropping frame");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize frame"),
        }
    }
}

/// Forwards generation progress to the client as `notifications/message`.
pub struct NotificationSink {
    outbox: Outbox,
}

impl NotificationSink {
    pub fn new(outbox: Outbox) -> Self {
        Self { outbox }
    }
}

impl ProgressSink for NotificationSink {
    fn report(&self, event: GenerationEvent) {
        let level = match event.level() {
            EventLevel::Info => LogLevel::Info,
            EventLevel::Error => LogLevel::Error,
        };
        let message = event.message();
        tracing::debug!(level = ?level, %message, "Progress");
        self.outbox.send(&Notification::log(level, message));
    }
}

pub struct McpServer<S, Z = TokioSleeper> {
    tools: Arc<ToolRegistry<S, Z>>,
}

impl<S, Z> McpServer<S, Z>
where
    S: ArtifactStore + 'static,
    Z: Sleeper + 'static,
{
    pub fn new(tools: ToolRegistry<S, Z>) -> Self {
        Self {
            tools: Arc::new(tools),
        }
    }

    /// Serve until `input` reaches EOF.
    ///
    /// In-flight tool calls are awaited before returning, so every request
    /// read gets its response written.
    pub async fn serve<R, W>(&self, input: R, output: W) -> Result<(), McpError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let outbox = Outbox { tx };
        let writer = tokio::spawn(write_frames(output, rx));
        let mut calls = JoinSet::new();
        let mut lines = BufReader::new(input).lines();

        tracing::info!(tools = self.tools.descriptors().len(), "MCP server ready");

        let read_result = loop {
            match lines.next_line().await {
                Ok(Some(line)) => self.handle_line(&line, &outbox, &mut calls),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
            while let Some(joined) = calls.try_join_next() {
                log_join_error(joined);
            }
        };

        while let Some(joined) = calls.join_next().await {
            log_join_error(joined);
        }
        drop(outbox);

        writer
            .await
            .map_err(|e| McpError::Internal(format!("writer task failed: {e}")))??;
        tracing::info!("Input closed, MCP server stopping");
        Ok(read_result?)
    }

    fn handle_line(&self, line: &str, outbox: &Outbox, calls: &mut JoinSet<()>) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let (id, method, params) = match parse_frame(line) {
            Ok(Frame::Request { id, method, params }) => (id, method, params),
            Ok(Frame::Notification { method }) => {
                tracing::debug!(%method, "Notification received");
                return;
            }
            Ok(Frame::Response { id }) => {
                tracing::debug!(?id, "Ignoring client response");
                return;
            }
            Err(FrameError { id, error }) => {
                tracing::warn!(error = %error, "Rejected frame");
                outbox.send(&Response::error(id, &error));
                return;
            }
        };

        let request = match ClientRequest::parse(&method, params) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(%method, error = %e, "Rejected request");
                outbox.send(&Response::error(Some(id), &e));
                return;
            }
        };

        match request {
            ClientRequest::Initialize(params) => {
                if let Some(client) = &params.client_info {
                    tracing::info!(
                        client = %client.name,
                        version = client.version.as_deref().unwrap_or("unknown"),
                        "Client connected",
                    );
                }
                outbox.send(&result_response(id, &InitializeResult::new(&params)));
            }
            ClientRequest::Ping => outbox.send(&Response::success(id, json!({}))),
            ClientRequest::ListTools => outbox.send(&result_response(
                id,
                &json!({ "tools": self.tools.descriptors() }),
            )),
            ClientRequest::CallTool(params) => {
                let tools = Arc::clone(&self.tools);
                let outbox = outbox.clone();
                calls.spawn(async move {
                    tracing::info!(tool = %params.name, "Tool call started");
                    let sink = NotificationSink::new(outbox.clone());
                    let response = match tools.call(&params, &sink).await {
                        Ok(result) => result_response(id, &result),
                        Err(e) => Response::error(Some(id), &e),
                    };
                    outbox.send(&response);
                });
            }
        }
    }
}

fn result_response<T: Serialize>(id: RequestId, result: &T) -> Response {
    match serde_json::to_value(result) {
        Ok(value) => Response::success(id, value),
        Err(e) => Response::error(Some(id), &McpError::Internal(e.to_string())),
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "Tool call task failed");
    }
}

async fn write_frames<W>(mut output: W, mut rx: mpsc::UnboundedReceiver<String>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        output.write_all(frame.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    Ok(())
}
