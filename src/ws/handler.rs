//! WebSocket endpoint and message routing
//!
//! One handler per connection. All outbound frames funnel through a single
//! writer task so JSON control messages and binary audio stay totally
//! ordered. User input spawns a response task that streams Claude events,
//! strips `<speak>` tags for display, and feeds their content to the TTS
//! consumer; `interrupt` cancels it cooperatively.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::claude::client::{ClaudeClient, ClaudeEvent};
use crate::claude::executor::ToolExecutor;
use crate::config::{Settings, WorkspaceConfig};
use crate::safety::PathSandbox;
use crate::server::AppState;
use crate::stt::SttEngine;
use crate::tts::{split_sentences, TtsEngine};
use crate::truncate_safe;
use crate::types::ContentBlock;
use crate::ws::protocol::{
    parse_incoming, ClientMessage, ServerMessage, WorkspaceEntry, MIC_PREFIX, TTS_PREFIX,
};
use crate::ws::session::{ResponseControl, Session};
use crate::ws::speak::SpeakExtractor;

/// Tool output cap on the wire; full output still feeds the model
const WIRE_OUTPUT_LIMIT: usize = 2000;

/// Run the message loop for one accepted WebSocket.
pub async fn handle(socket: WebSocket, state: AppState, session: Arc<Session>) {
    let sid = session.session_id.clone();
    info!("Session {} connected", sid);

    let (mut sink, mut stream) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::channel::<Message>(256);

    // Single writer task keeps outbound frames totally ordered; it ends on
    // its own once every sender clone is dropped
    let _writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    let handler = ConnectionHandler {
        session: session.clone(),
        settings: state.settings.clone(),
        claude: state.claude.clone(),
        default_executor: state.default_executor.clone(),
        stt: state.stt.clone(),
        tts: state.tts.clone(),
        workspaces: state.workspaces.clone(),
        outbound,
    };

    // Send available workspaces on connect
    if !handler.workspaces.is_empty() {
        handler
            .send(ServerMessage::WorkspaceList {
                workspaces: handler
                    .workspaces
                    .iter()
                    .map(|w| WorkspaceEntry {
                        name: w.name.clone(),
                        path: w.path.clone(),
                    })
                    .collect(),
            })
            .await;
    }

    while let Some(frame) = stream.next().await {
        session.touch();
        match frame {
            Ok(Message::Text(text)) => handler.handle_text(text.as_str()).await,
            Ok(Message::Binary(data)) => handler.handle_binary(&data),
            Ok(Message::Close(_)) => {
                info!("Session {} disconnected", sid);
                break;
            }
            Ok(_) => {} // protocol-level ping/pong
            Err(e) => {
                warn!("Session {} socket error: {}", sid, e);
                break;
            }
        }
    }

    session.cancel_response();
    info!("Session {} cleaned up", sid);
}

/// Manages a single WebSocket connection.
#[derive(Clone)]
struct ConnectionHandler {
    session: Arc<Session>,
    settings: Arc<Settings>,
    claude: Arc<ClaudeClient>,
    default_executor: Arc<ToolExecutor>,
    stt: Option<Arc<dyn SttEngine>>,
    tts: Option<Arc<dyn TtsEngine>>,
    workspaces: Arc<Vec<WorkspaceConfig>>,
    outbound: mpsc::Sender<Message>,
}

impl ConnectionHandler {
    async fn send(&self, message: ServerMessage) {
        send_json(&self.outbound, &message).await;
    }

    /// Route a JSON text frame.
    async fn handle_text(&self, text: &str) {
        let message = match parse_incoming(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Parse error: {} (raw: {})", e, truncate_safe(text, 200));
                self.send(ServerMessage::error(e.to_string(), "parse_error"))
                    .await;
                return;
            }
        };

        debug!(
            "Session {} received: {}",
            self.session.session_id,
            message.name()
        );

        match message {
            ClientMessage::Ping {} => self.send(ServerMessage::Pong {}).await,
            ClientMessage::SelectWorkspace { name } => self.handle_select_workspace(&name).await,
            ClientMessage::TextMessage { text } => self.handle_user_input(text, Vec::new()).await,
            ClientMessage::ImageMessage {
                data,
                media_type,
                text,
            } => {
                let images = vec![ContentBlock::image_base64(media_type, data)];
                let text = match text {
                    Some(t) if !t.is_empty() => t,
                    _ => "What do you see in this image?".to_string(),
                };
                self.handle_user_input(text, images).await;
            }
            ClientMessage::AudioStart { .. } => {
                self.session.set_recording(true);
                self.session.clear_audio_buffer();
            }
            ClientMessage::AudioEnd {} => {
                self.session.set_recording(false);
                self.handle_audio_end().await;
            }
            ClientMessage::Interrupt {} => {
                self.session.cancel_response();
                info!("Session {} interrupted", self.session.session_id);
            }
        }
    }

    /// Handle a binary audio frame.
    fn handle_binary(&self, data: &[u8]) {
        if data.len() < 2 {
            return;
        }
        if data[0] == MIC_PREFIX && self.session.is_recording() {
            self.session.append_audio(&data[1..]);
        }
    }

    /// Switch to a workspace: cancel the in-flight response, rebuild the
    /// executor against a fresh sandbox, clear the conversation.
    async fn handle_select_workspace(&self, name: &str) {
        let Some(workspace) = self.workspaces.iter().find(|w| w.name == name) else {
            self.send(ServerMessage::error(
                format!("Unknown workspace: {}", name),
                "invalid_workspace",
            ))
            .await;
            return;
        };

        self.session.cancel_response();

        let sandbox = match PathSandbox::new(&workspace.path) {
            Ok(sandbox) => sandbox,
            Err(e) => {
                error!("Workspace {} sandbox failed: {:#}", name, e);
                self.send(ServerMessage::error(e.to_string(), "invalid_workspace"))
                    .await;
                return;
            }
        };
        let executor = Arc::new(ToolExecutor::new(
            sandbox,
            self.settings.safety.blocked_commands.clone(),
            self.settings.safety.command_timeout,
        ));

        self.session
            .set_workspace(Some(name.to_string()), Some(executor));
        self.session.clear_conversation();

        info!(
            "Session {} switched to workspace {} ({})",
            self.session.session_id, name, workspace.path
        );
        self.send(ServerMessage::WorkspaceSelected {
            name: name.to_string(),
            path: workspace.path.clone(),
        })
        .await;
    }

    /// Transcribe buffered audio and feed it in as user input.
    async fn handle_audio_end(&self) {
        let audio = self.session.take_audio();

        let Some(stt) = self.stt.clone() else {
            self.send(ServerMessage::error("STT not available", "stt_unavailable"))
                .await;
            return;
        };
        if audio.is_empty() {
            return;
        }

        let text = match stt
            .transcribe(&audio, self.settings.audio.sample_rate)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                error!("STT error: {:#}", e);
                self.send(ServerMessage::error("Transcription failed", "stt_error"))
                    .await;
                return;
            }
        };

        if text.trim().is_empty() {
            return;
        }

        self.send(ServerMessage::transcription(text.clone())).await;
        self.handle_user_input(text, Vec::new()).await;
    }

    /// Process user text (and optional images) → Claude → stream response.
    async fn handle_user_input(&self, text: String, images: Vec<ContentBlock>) {
        // At most one response at a time: beginning a response interrupts
        // and aborts any in-flight predecessor, and hands this response
        // its own control token
        let control = self.session.begin_response();

        let mut content = images;
        content.push(ContentBlock::text(text));
        self.session.add_user_message(content);

        let handler = self.clone();
        tokio::spawn(async move { handler.respond(control).await });
    }

    /// Own the full lifecycle of one response: drive Claude, then always
    /// close out with `response_end` and drain the TTS pipeline so
    /// `tts_end` follows it on every path, including cancellation.
    async fn respond(self, control: Arc<ResponseControl>) {
        let sid = self.session.session_id.clone();
        let executor = self
            .session
            .tool_executor()
            .unwrap_or_else(|| self.default_executor.clone());

        let (tts_tx, tts_task) = match self.tts.clone() {
            Some(tts) => {
                let (tx, rx) = mpsc::channel::<Option<String>>(32);
                let consumer = tokio::spawn(tts_consumer(
                    control.clone(),
                    tts,
                    rx,
                    self.outbound.clone(),
                ));
                (Some(tx), Some(consumer))
            }
            None => (None, None),
        };

        let drive = tokio::spawn(
            self.clone()
                .drive_response(control.clone(), executor, tts_tx.clone()),
        );
        control.set_abort_handle(drive.abort_handle());

        let result = drive.await;

        self.send(ServerMessage::ResponseEnd {}).await;

        if let Some(tx) = tts_tx {
            let _ = tx.send(None).await;
        }
        if let Some(task) = tts_task {
            let _ = task.await;
        }

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Response error for session {}: {:#}", sid, e);
                self.send(ServerMessage::error(e.to_string(), "claude_error"))
                    .await;
            }
            Err(join_error) if join_error.is_cancelled() => {
                info!("Response cancelled for session {}", sid);
            }
            Err(join_error) => {
                error!("Response task failed for session {}: {}", sid, join_error);
                self.send(ServerMessage::error(
                    join_error.to_string(),
                    "claude_error",
                ))
                .await;
            }
        }

        // Identity-gated: a no-op if a newer response has replaced this one
        self.session.finish_response(&control);
    }

    /// Forward Claude events to the client, splitting `<speak>` content
    /// off to the TTS queue.
    async fn drive_response(
        self,
        control: Arc<ResponseControl>,
        executor: Arc<ToolExecutor>,
        tts_tx: Option<mpsc::Sender<Option<String>>>,
    ) -> anyhow::Result<()> {
        let mut events = self
            .claude
            .stream_response(self.session.clone(), control.clone(), executor);
        let mut extractor = SpeakExtractor::new();

        while let Some(event) = events.recv().await {
            if control.is_interrupted() {
                break;
            }

            match event? {
                ClaudeEvent::TextDelta { text } => {
                    let display = SpeakExtractor::strip_tags(&text);
                    if !display.is_empty() {
                        self.send(ServerMessage::ResponseDelta { text: display }).await;
                    }
                    if let Some(tx) = &tts_tx {
                        for segment in extractor.push(&text) {
                            let _ = tx.send(Some(segment)).await;
                        }
                    }
                }
                ClaudeEvent::TextDone => {}
                ClaudeEvent::ToolUse {
                    tool_name,
                    tool_id,
                    input,
                } => {
                    self.send(ServerMessage::ToolUse {
                        tool_name,
                        tool_id,
                        input,
                    })
                    .await;
                }
                ClaudeEvent::ToolResult {
                    tool_id,
                    tool_name,
                    success,
                    output,
                } => {
                    self.send(ServerMessage::ToolResult {
                        tool_id,
                        tool_name,
                        success,
                        output: truncate_safe(&output, WIRE_OUTPUT_LIMIT),
                    })
                    .await;
                }
                ClaudeEvent::ResponseComplete => {}
            }
        }
        Ok(())
    }
}

/// Consume speak text from the queue and stream TTS audio frames.
///
/// Emits `tts_start` before the first audio frame and `tts_end` after the
/// `None` sentinel iff it started. The gate is this response's own control
/// token, so an interrupted response drains without further audio even
/// after a successor has started.
async fn tts_consumer(
    control: Arc<ResponseControl>,
    tts: Arc<dyn TtsEngine>,
    mut queue: mpsc::Receiver<Option<String>>,
    outbound: mpsc::Sender<Message>,
) {
    let mut started = false;

    while let Some(item) = queue.recv().await {
        let Some(text) = item else { break };
        if control.is_interrupted() {
            continue;
        }

        if !started {
            send_json(&outbound, &ServerMessage::tts_start()).await;
            started = true;
        }

        for sentence in split_sentences(&text) {
            if control.is_interrupted() {
                break;
            }
            match tts.synthesize(&sentence).await {
                Ok(mut stream) => {
                    while let Some(chunk) = stream.next().await {
                        if control.is_interrupted() {
                            break;
                        }
                        match chunk {
                            Ok(bytes) => send_audio(&outbound, &bytes).await,
                            Err(e) => {
                                warn!("TTS stream error: {:#}", e);
                                break;
                            }
                        }
                    }
                }
                Err(e) => warn!("TTS error: {:#}", e),
            }
        }
    }

    if started {
        send_json(&outbound, &ServerMessage::TtsEnd {}).await;
    }
}

async fn send_json(outbound: &mpsc::Sender<Message>, message: &ServerMessage) {
    match serde_json::to_string(message) {
        Ok(text) => {
            let _ = outbound.send(Message::Text(text.into())).await;
        }
        Err(e) => error!("Failed to encode outbound message: {}", e),
    }
}

/// Send TTS audio as a binary frame with the 0x02 prefix.
async fn send_audio(outbound: &mpsc::Sender<Message>, chunk: &[u8]) {
    let mut frame = Vec::with_capacity(chunk.len() + 1);
    frame.push(TTS_PREFIX);
    frame.extend_from_slice(chunk);
    let _ = outbound.send(Message::Binary(frame.into())).await;
}
