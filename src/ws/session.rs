//! Per-connection session state and the active-session registry

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::claude::executor::ToolExecutor;
use crate::config::Settings;
use crate::types::{ChatTurn, ContentBlock, Role};

/// Hard cap on the char-based token estimate of the conversation
const MAX_TOKEN_ESTIMATE: usize = 100_000;

/// How often the reaper scans for idle sessions
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Idle age past which a session is reaped
pub const MAX_IDLE: Duration = Duration::from_secs(1800);

/// Holds all state for a single WebSocket connection.
///
/// Mutated only by the connection's receive loop and the single response
/// task it spawns; locks are never held across await points.
pub struct Session {
    pub session_id: String,
    settings: Arc<Settings>,

    // Active workspace
    workspace_name: Mutex<Option<String>>,
    tool_executor: Mutex<Option<Arc<ToolExecutor>>>,

    // Claude conversation history
    conversation: Mutex<Vec<ChatTurn>>,

    // Audio buffering
    audio_buffer: Mutex<Vec<u8>>,
    is_recording: AtomicBool,

    // Response state: the active response owns a control token so a
    // cancelled predecessor cannot race its successor
    is_responding: AtomicBool,
    current_response: Mutex<Option<Arc<ResponseControl>>>,

    // Timing
    created_at: Instant,
    last_activity: Mutex<Instant>,
}

impl Session {
    pub fn new(settings: Arc<Settings>) -> Self {
        let session_id = uuid::Uuid::new_v4().simple().to_string()[..12].to_string();
        let now = Instant::now();
        Self {
            session_id,
            settings,
            workspace_name: Mutex::new(None),
            tool_executor: Mutex::new(None),
            conversation: Mutex::new(Vec::new()),
            audio_buffer: Mutex::new(Vec::new()),
            is_recording: AtomicBool::new(false),
            is_responding: AtomicBool::new(false),
            current_response: Mutex::new(None),
            created_at: now,
            last_activity: Mutex::new(now),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    pub fn idle(&self) -> Duration {
        self.last_activity.lock().unwrap().elapsed()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    // ── Flags ────────────────────────────────────────────────────────────

    pub fn is_recording(&self) -> bool {
        self.is_recording.load(Ordering::SeqCst)
    }

    pub fn set_recording(&self, value: bool) {
        self.is_recording.store(value, Ordering::SeqCst);
    }

    pub fn is_responding(&self) -> bool {
        self.is_responding.load(Ordering::SeqCst)
    }

    /// Whether the active response, if any, has been interrupted.
    pub fn is_interrupted(&self) -> bool {
        self.current_response
            .lock()
            .unwrap()
            .as_ref()
            .map(|c| c.is_interrupted())
            .unwrap_or(false)
    }

    // ── Workspace ────────────────────────────────────────────────────────

    pub fn workspace_name(&self) -> Option<String> {
        self.workspace_name.lock().unwrap().clone()
    }

    pub fn set_workspace(&self, name: Option<String>, executor: Option<Arc<ToolExecutor>>) {
        *self.workspace_name.lock().unwrap() = name;
        *self.tool_executor.lock().unwrap() = executor;
    }

    pub fn tool_executor(&self) -> Option<Arc<ToolExecutor>> {
        self.tool_executor.lock().unwrap().clone()
    }

    // ── Conversation ─────────────────────────────────────────────────────

    /// Append a user message built from typed content blocks.
    pub fn add_user_message(&self, content: Vec<ContentBlock>) {
        self.push_turn(ChatTurn::user(content));
    }

    /// Append a turn and enforce the history limits.
    pub fn push_turn(&self, turn: ChatTurn) {
        let mut conversation = self.conversation.lock().unwrap();
        conversation.push(turn);
        trim_history(
            &mut conversation,
            self.settings.claude.max_conversation_turns,
        );
    }

    pub fn conversation_snapshot(&self) -> Vec<ChatTurn> {
        self.conversation.lock().unwrap().clone()
    }

    pub fn conversation_len(&self) -> usize {
        self.conversation.lock().unwrap().len()
    }

    pub fn clear_conversation(&self) {
        self.conversation.lock().unwrap().clear();
    }

    // ── Audio buffer ─────────────────────────────────────────────────────

    pub fn append_audio(&self, payload: &[u8]) {
        self.audio_buffer.lock().unwrap().extend_from_slice(payload);
    }

    /// Drain and return the buffered recording.
    pub fn take_audio(&self) -> Vec<u8> {
        std::mem::take(&mut *self.audio_buffer.lock().unwrap())
    }

    pub fn clear_audio_buffer(&self) {
        self.audio_buffer.lock().unwrap().clear();
    }

    pub fn audio_buffer_len(&self) -> usize {
        self.audio_buffer.lock().unwrap().len()
    }

    // ── Response cancellation ────────────────────────────────────────────

    /// Start a new response. Any in-flight response is interrupted and
    /// aborted, then a fresh control token is installed for the successor.
    pub fn begin_response(&self) -> Arc<ResponseControl> {
        let mut current = self.current_response.lock().unwrap();
        if let Some(previous) = current.take() {
            previous.interrupt();
        }
        let control = Arc::new(ResponseControl::new());
        *current = Some(control.clone());
        self.is_responding.store(true, Ordering::SeqCst);
        control
    }

    /// Tear down response state, but only for the response owning
    /// `control`: a cancelled predecessor finishing late cannot clobber
    /// the state of the response that replaced it.
    pub fn finish_response(&self, control: &Arc<ResponseControl>) {
        let mut current = self.current_response.lock().unwrap();
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, control)) {
            *current = None;
            self.is_responding.store(false, Ordering::SeqCst);
        }
    }

    /// Cancel any in-flight response. The interrupted flag latches on that
    /// response's own token; repeated calls and idle calls are no-ops.
    pub fn cancel_response(&self) {
        if let Some(control) = self.current_response.lock().unwrap().as_ref() {
            control.interrupt();
        }
    }
}

/// Cancellation state owned by a single response.
///
/// Each user input gets a fresh token, so interrupting or tearing down an
/// old response never leaks into the one that replaced it.
pub struct ResponseControl {
    interrupted: AtomicBool,
    abort: Mutex<Option<AbortHandle>>,
}

impl ResponseControl {
    fn new() -> Self {
        Self {
            interrupted: AtomicBool::new(false),
            abort: Mutex::new(None),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Latch the interrupted flag and abort the drive task if one is
    /// registered.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        if let Some(handle) = self.abort.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Register the drive task for hard cancellation. A response that was
    /// interrupted before registration aborts the task on the spot.
    pub fn set_abort_handle(&self, handle: AbortHandle) {
        let mut abort = self.abort.lock().unwrap();
        if self.interrupted.load(Ordering::SeqCst) {
            handle.abort();
        } else {
            *abort = Some(handle);
        }
    }
}

/// Char-based token estimate over text-like content.
fn estimate_tokens(conversation: &[ChatTurn]) -> usize {
    let chars: usize = conversation
        .iter()
        .flat_map(|turn| turn.content.iter())
        .map(|block| match block {
            ContentBlock::Text { text } => text.chars().count(),
            ContentBlock::ToolResult { content, .. } => content.chars().count(),
            _ => 0,
        })
        .sum();
    chars / 4
}

/// Enforce the history limits: message count and token estimate.
///
/// Drops the oldest pair at a time. When the second message of the oldest
/// pair is an assistant turn carrying tool_use, its tool_result user turn
/// comes right after, so four messages go instead of two.
fn trim_history(conversation: &mut Vec<ChatTurn>, max_turns: usize) {
    let max_messages = max_turns * 2;
    while conversation.len() > 2
        && (conversation.len() > max_messages || estimate_tokens(conversation) > MAX_TOKEN_ESTIMATE)
    {
        let drop = match conversation.get(1) {
            Some(turn) if turn.role == Role::Assistant && turn.has_tool_use() => 4,
            _ => 2,
        };
        let drop = drop.min(conversation.len());
        conversation.drain(..drop);
    }
}

/// In-memory map of active sessions with a periodic idle reaper.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    reaper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            reaper: Mutex::new(None),
        }
    }

    pub fn add(&self, session: Arc<Session>) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.session_id.clone(), session);
    }

    /// Remove a session, cancelling its response and clearing its buffers.
    pub fn remove(&self, session_id: &str) {
        let removed = self.sessions.lock().unwrap().remove(session_id);
        if let Some(session) = removed {
            session.cancel_response();
            session.clear_conversation();
            session.clear_audio_buffer();
            debug!("Session {} removed from registry", session_id);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().unwrap().is_empty()
    }

    /// Remove sessions idle longer than `max_idle`. Returns how many went.
    pub fn reap_idle(&self, max_idle: Duration) -> usize {
        let stale: Vec<String> = self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| s.idle() > max_idle)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            info!("Reaping idle session {}", id);
            self.remove(id);
        }
        stale.len()
    }

    /// Spawn the background reaper task.
    pub fn start_cleanup(self: &Arc<Self>) {
        let registry = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let reaped = registry.reap_idle(MAX_IDLE);
                if reaped > 0 {
                    info!("Reaped {} idle session(s)", reaped);
                }
            }
        });
        *self.reaper.lock().unwrap() = Some(handle);
    }

    /// Stop the reaper and drop every session.
    pub fn shutdown(&self) {
        if let Some(handle) = self.reaper.lock().unwrap().take() {
            handle.abort();
        }
        let sessions: Vec<Arc<Session>> =
            self.sessions.lock().unwrap().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.cancel_response();
            session.clear_conversation();
            session.clear_audio_buffer();
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
