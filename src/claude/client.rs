//! Claude Messages API streaming client with tool-use loop
//!
//! Streams assistant turns over SSE, relaying text deltas as they arrive
//! and accumulating tool_use blocks. Tool calls are executed against the
//! session's sandboxed executor and their results fed back into the
//! conversation for up to [`MAX_TOOL_ROUNDS`] rounds.

use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::claude::executor::ToolExecutor;
use crate::claude::system_prompt::workspace_system_prompt;
use crate::claude::tools::{ToolDefinition, TOOLS};
use crate::types::{ChatTurn, ContentBlock};
use crate::ws::session::{ResponseControl, Session};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Max tool-use loop iterations to prevent infinite loops
pub const MAX_TOOL_ROUNDS: usize = 15;

/// Normalized events produced while streaming a response.
#[derive(Debug, Clone)]
pub enum ClaudeEvent {
    TextDelta {
        text: String,
    },
    TextDone,
    ToolUse {
        tool_name: String,
        tool_id: String,
        input: Value,
    },
    ToolResult {
        tool_id: String,
        tool_name: String,
        success: bool,
        output: String,
    },
    ResponseComplete,
}

/// Manages Claude API calls with streaming and tool use.
#[derive(Clone)]
pub struct ClaudeClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl ClaudeClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: ANTHROPIC_BASE_URL.to_string(),
            model: model.into(),
            max_tokens,
        }
    }

    /// Override the API base URL (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Stream a response for the session's current conversation, handling
    /// tool use automatically.
    ///
    /// Events arrive on the returned channel; a terminal `Err` item means
    /// the stream failed unexpectedly. The producer stops on its own when
    /// this response's control token is interrupted or the receiver is
    /// dropped.
    pub fn stream_response(
        &self,
        session: Arc<Session>,
        control: Arc<ResponseControl>,
        executor: Arc<ToolExecutor>,
    ) -> mpsc::Receiver<Result<ClaudeEvent>> {
        let (tx, rx) = mpsc::channel(64);
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.run_rounds(&session, &control, &executor, &tx).await {
                let _ = tx.send(Err(e)).await;
            }
        });
        rx
    }

    async fn run_rounds(
        &self,
        session: &Session,
        control: &ResponseControl,
        executor: &ToolExecutor,
        tx: &mpsc::Sender<Result<ClaudeEvent>>,
    ) -> Result<()> {
        let system_prompt = workspace_system_prompt(session.workspace_name().as_deref());

        for round in 0..MAX_TOOL_ROUNDS {
            if control.is_interrupted() {
                return Ok(());
            }

            let messages = session.conversation_snapshot();
            debug!(
                round,
                messages = messages.len(),
                "Streaming Claude turn"
            );

            let turn = match self.stream_turn(control, &system_prompt, &messages, tx).await? {
                TurnOutcome::Interrupted => return Ok(()),
                TurnOutcome::Completed {
                    blocks,
                    streamed_text,
                } => {
                    if streamed_text {
                        emit(tx, ClaudeEvent::TextDone).await;
                    }
                    blocks
                }
            };

            let (assistant_content, tool_uses) = collate_blocks(turn);

            if tool_uses.is_empty() {
                if !assistant_content.is_empty() {
                    session.push_turn(ChatTurn::assistant(assistant_content));
                }
                emit(tx, ClaudeEvent::ResponseComplete).await;
                return Ok(());
            }

            session.push_turn(ChatTurn::assistant(assistant_content));

            // Tools always run to completion and their results always land
            // in history so tool_use blocks are never left unpaired; only
            // the outbound events are suppressed after an interrupt.
            let mut results = Vec::new();
            for (id, name, input) in tool_uses {
                if !control.is_interrupted() {
                    emit(
                        tx,
                        ClaudeEvent::ToolUse {
                            tool_name: name.clone(),
                            tool_id: id.clone(),
                            input: input.clone(),
                        },
                    )
                    .await;
                }

                let result = executor.execute(&name, &input).await;

                if !control.is_interrupted() {
                    emit(
                        tx,
                        ClaudeEvent::ToolResult {
                            tool_id: id.clone(),
                            tool_name: name.clone(),
                            success: result.success,
                            output: result.output.clone(),
                        },
                    )
                    .await;
                }

                results.push(ContentBlock::tool_result(id, result.output, !result.success));
            }
            session.push_turn(ChatTurn::user(results));
        }

        // Exhausted tool rounds
        warn!("Reached maximum tool-use iterations");
        emit(
            tx,
            ClaudeEvent::TextDelta {
                text: "\n\n(Reached maximum tool-use iterations)".to_string(),
            },
        )
        .await;
        emit(tx, ClaudeEvent::TextDone).await;
        emit(tx, ClaudeEvent::ResponseComplete).await;
        Ok(())
    }

    /// Stream one assistant turn, forwarding text deltas and accumulating
    /// content blocks by stream index.
    async fn stream_turn(
        &self,
        control: &ResponseControl,
        system: &str,
        messages: &[ChatTurn],
        tx: &mpsc::Sender<Result<ClaudeEvent>>,
    ) -> Result<TurnOutcome> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages,
            stream: true,
            tools: TOOLS.as_slice(),
        };

        let builder = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request);

        let mut es = EventSource::new(builder).context("Failed to open Claude stream")?;
        let mut blocks: Vec<BlockAccum> = Vec::new();
        let mut streamed_text = false;

        while let Some(event) = es.next().await {
            if control.is_interrupted() {
                es.close();
                return Ok(TurnOutcome::Interrupted);
            }

            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => match msg.event.as_str() {
                    "content_block_start" => {
                        if let Ok(start) =
                            serde_json::from_str::<ContentBlockStartEvent>(&msg.data)
                        {
                            if start.index == blocks.len() {
                                match start.content_block.block_type.as_str() {
                                    "tool_use" => blocks.push(BlockAccum::ToolUse {
                                        id: start.content_block.id.unwrap_or_default(),
                                        name: start.content_block.name.unwrap_or_default(),
                                        input_json: String::new(),
                                    }),
                                    _ => blocks.push(BlockAccum::Text(String::new())),
                                }
                            }
                        }
                    }
                    "content_block_delta" => {
                        if let Ok(delta) =
                            serde_json::from_str::<ContentBlockDeltaEvent>(&msg.data)
                        {
                            match delta.delta.delta_type.as_str() {
                                "text_delta" => {
                                    if let Some(text) = delta.delta.text {
                                        if !text.is_empty() {
                                            if let Some(BlockAccum::Text(buf)) =
                                                blocks.get_mut(delta.index)
                                            {
                                                buf.push_str(&text);
                                            }
                                            streamed_text = true;
                                            emit(tx, ClaudeEvent::TextDelta { text }).await;
                                        }
                                    }
                                }
                                "input_json_delta" => {
                                    if let Some(partial) = delta.delta.partial_json {
                                        if let Some(BlockAccum::ToolUse {
                                            input_json, ..
                                        }) = blocks.get_mut(delta.index)
                                        {
                                            input_json.push_str(&partial);
                                        }
                                    }
                                }
                                _ => {}
                            }
                        }
                    }
                    "message_stop" => {
                        es.close();
                        break;
                    }
                    "error" => {
                        es.close();
                        anyhow::bail!("Claude stream error: {}", msg.data);
                    }
                    // message_start, message_delta, content_block_stop, ping
                    _ => {}
                },
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    es.close();
                    anyhow::bail!("Claude stream failed: {}", e);
                }
            }
        }

        Ok(TurnOutcome::Completed {
            blocks,
            streamed_text,
        })
    }
}

enum TurnOutcome {
    Completed {
        blocks: Vec<BlockAccum>,
        streamed_text: bool,
    },
    Interrupted,
}

/// Content block under accumulation during one streamed turn.
#[derive(Debug, Clone, PartialEq)]
enum BlockAccum {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input_json: String,
    },
}

/// Build the canonical assistant content from accumulated blocks, plus the
/// tool calls in stream order. Empty text blocks are dropped; tool inputs
/// that fail to parse become empty objects.
fn collate_blocks(blocks: Vec<BlockAccum>) -> (Vec<ContentBlock>, Vec<(String, String, Value)>) {
    let mut content = Vec::new();
    let mut tool_uses = Vec::new();

    for block in blocks {
        match block {
            BlockAccum::Text(text) => {
                if !text.is_empty() {
                    content.push(ContentBlock::Text { text });
                }
            }
            BlockAccum::ToolUse {
                id,
                name,
                input_json,
            } => {
                let input: Value = serde_json::from_str(&input_json)
                    .unwrap_or_else(|_| serde_json::json!({}));
                content.push(ContentBlock::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                });
                tool_uses.push((id, name, input));
            }
        }
    }

    (content, tool_uses)
}

async fn emit(tx: &mpsc::Sender<Result<ClaudeEvent>>, event: ClaudeEvent) {
    // A dropped receiver means the response was torn down; the interrupted
    // flag terminates the loop.
    let _ = tx.send(Ok(event)).await;
}

// ── Request / streaming event types ──────────────────────────────────────

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [ChatTurn],
    stream: bool,
    tools: &'a [ToolDefinition],
}

#[derive(Debug, Deserialize)]
struct ContentBlockStartEvent {
    index: usize,
    content_block: ContentBlockInfo,
}

#[derive(Debug, Deserialize)]
struct ContentBlockInfo {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDeltaEvent {
    index: usize,
    delta: DeltaContent,
}

#[derive(Debug, Deserialize)]
struct DeltaContent {
    #[serde(rename = "type")]
    delta_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    partial_json: Option<String>,
}
