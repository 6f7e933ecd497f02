//! Execution monitor over a ComfyUI WebSocket feed.
//!
//! Reads frames until the terminal `executing` frame (`node: null`) for
//! the watched prompt arrives, the server reports a failure for it, the
//! socket drops, the deadline passes, or the caller cancels. The read
//! is raced against the deadline and the cancellation token, so the
//! wait never blocks past either.

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

use crate::events::ExecutionEvent;
use crate::messages::{
    parse_frame, ComfyUIMessage, ErrorData, ExecutingData, Frame, ProgressData,
};

/// Why monitoring ended without the terminal event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MonitorError {
    /// The socket closed or failed mid-wait.
    #[error("Event connection lost: {0}")]
    Connection(String),

    /// The server reported a node execution failure for the prompt.
    #[error("Node {node_id} failed ({exception_type}): {message}")]
    Execution {
        node_id: String,
        exception_type: String,
        message: String,
    },

    /// The server interrupted the prompt before it finished.
    #[error("Execution was interrupted on the server")]
    Interrupted,

    /// The deadline passed before the terminal event.
    #[error("No terminal event before the deadline")]
    Timeout,

    /// The caller cancelled the wait.
    #[error("Monitoring cancelled")]
    Cancelled,
}

/// Outcome of handling one frame.
enum Step {
    Continue,
    Completed,
}

/// Wait for `prompt_id` to finish on an open event stream.
///
/// Returns `Ok(())` once the terminal frame for `prompt_id` is read.
/// Frames for other prompts are ignored. Observability events go to
/// `event_tx`; send failures (no subscribers) are ignored.
pub async fn wait_for_completion<S>(
    stream: &mut S,
    prompt_id: &str,
    deadline: Instant,
    cancel: &CancellationToken,
    event_tx: &broadcast::Sender<ExecutionEvent>,
) -> Result<(), MonitorError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(prompt_id, "Monitoring cancelled by caller");
                return Err(MonitorError::Cancelled);
            }
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(prompt_id, "Deadline passed without terminal event");
                return Err(MonitorError::Timeout);
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                if let Step::Completed = handle_text_message(&text, prompt_id, event_tx)? {
                    return Ok(());
                }
            }
            Some(Ok(Message::Binary(_))) => {
                // Binary frames carry preview images.
                tracing::trace!(prompt_id, "Ignoring binary message (preview image)");
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                tracing::error!(prompt_id, ?frame, "ComfyUI WebSocket closed during execution");
                return Err(MonitorError::Connection(
                    "WebSocket closed by server".to_string(),
                ));
            }
            Some(Err(e)) => {
                tracing::error!(prompt_id, error = %e, "WebSocket receive error");
                return Err(MonitorError::Connection(e.to_string()));
            }
            None => {
                tracing::error!(prompt_id, "WebSocket stream ended during execution");
                return Err(MonitorError::Connection(
                    "WebSocket stream ended".to_string(),
                ));
            }
        }
    }
}

/// Dispatch a single text frame to the appropriate handler.
fn handle_text_message(
    text: &str,
    prompt_id: &str,
    event_tx: &broadcast::Sender<ExecutionEvent>,
) -> Result<Step, MonitorError> {
    let msg = match parse_frame(text) {
        Ok(Frame::Message(msg)) => msg,
        Ok(Frame::Unknown(kind)) => {
            tracing::debug!(kind = %kind, "Ignoring unknown ComfyUI message type");
            return Ok(Step::Continue);
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                raw_message = %text,
                "Failed to parse ComfyUI message",
            );
            return Ok(Step::Continue);
        }
    };

    match msg {
        ComfyUIMessage::Status(data) => {
            tracing::debug!(
                queue_remaining = data.status.exec_info.queue_remaining,
                "ComfyUI queue status",
            );
        }
        ComfyUIMessage::ExecutionStart(data) if data.prompt_id == prompt_id => {
            tracing::info!(prompt_id, "Execution started");
            let _ = event_tx.send(ExecutionEvent::Started {
                prompt_id: data.prompt_id,
            });
        }
        ComfyUIMessage::ExecutionCached(data) if data.prompt_id == prompt_id => {
            tracing::debug!(prompt_id, cached = data.nodes.len(), "Execution used cache");
            let _ = event_tx.send(ExecutionEvent::Cached {
                prompt_id: data.prompt_id,
                nodes: data.nodes,
            });
        }
        ComfyUIMessage::Executing(data) => {
            return Ok(handle_executing(prompt_id, event_tx, data));
        }
        ComfyUIMessage::Progress(data) => {
            handle_progress(prompt_id, event_tx, data);
        }
        ComfyUIMessage::Executed(data) if data.prompt_id == prompt_id => {
            tracing::debug!(prompt_id, node = %data.node, "Node executed with output");
        }
        ComfyUIMessage::ExecutionSuccess(data) if data.prompt_id == prompt_id => {
            tracing::debug!(prompt_id, "Execution reported success");
        }
        ComfyUIMessage::ExecutionInterrupted(data) if data.prompt_id == prompt_id => {
            tracing::error!(prompt_id, node_id = ?data.node_id, "Execution interrupted");
            let _ = event_tx.send(ExecutionEvent::Failed {
                prompt_id: data.prompt_id,
                error: "interrupted".to_string(),
            });
            return Err(MonitorError::Interrupted);
        }
        ComfyUIMessage::ExecutionError(data) if data.prompt_id == prompt_id => {
            return Err(handle_execution_error(event_tx, data));
        }
        other => {
            tracing::trace!(?other, "Ignoring message for another prompt");
        }
    }

    Ok(Step::Continue)
}

// ---- individual message handlers ----

fn handle_executing(
    prompt_id: &str,
    event_tx: &broadcast::Sender<ExecutionEvent>,
    data: ExecutingData,
) -> Step {
    if data.prompt_id.as_deref() != Some(prompt_id) {
        return Step::Continue;
    }

    match data.node {
        Some(node) => {
            tracing::debug!(prompt_id, node = %node, "Executing node");
            let _ = event_tx.send(ExecutionEvent::NodeExecuting {
                prompt_id: prompt_id.to_string(),
                node,
            });
            Step::Continue
        }
        None => {
            // node == None means execution is complete for this prompt.
            tracing::info!(prompt_id, "Execution completed (all nodes done)");
            let _ = event_tx.send(ExecutionEvent::Completed {
                prompt_id: prompt_id.to_string(),
            });
            Step::Completed
        }
    }
}

fn handle_progress(
    prompt_id: &str,
    event_tx: &broadcast::Sender<ExecutionEvent>,
    data: ProgressData,
) {
    // Older servers omit prompt_id on progress frames; the socket is
    // already scoped to our client ID, so those are attributed to us.
    if data.prompt_id.as_deref().is_some_and(|id| id != prompt_id) {
        return;
    }

    let percent = data.percent();
    tracing::debug!(
        prompt_id,
        value = data.value,
        max = data.max,
        percent,
        "Generation progress",
    );
    let _ = event_tx.send(ExecutionEvent::Progress {
        prompt_id: prompt_id.to_string(),
        node: data.node,
        value: data.value,
        max: data.max,
        percent,
    });
}

fn handle_execution_error(
    event_tx: &broadcast::Sender<ExecutionEvent>,
    data: ErrorData,
) -> MonitorError {
    tracing::error!(
        prompt_id = %data.prompt_id,
        node_id = %data.node_id,
        error_type = %data.exception_type,
        error_message = %data.exception_message,
        "Execution error",
    );
    let _ = event_tx.send(ExecutionEvent::Failed {
        prompt_id: data.prompt_id,
        error: data.exception_message.clone(),
    });
    MonitorError::Execution {
        node_id: data.node_id,
        exception_type: data.exception_type,
        message: data.exception_message,
    }
}
