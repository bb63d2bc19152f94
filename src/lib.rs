//! Walkie Talkie - Voice Gateway to Claude
//!
//! A WebSocket server that bridges a mobile client to Claude:
//! - Duplex session carrying JSON control messages and binary audio frames
//! - Streaming Claude responses with an automatic tool-use loop
//! - Sandboxed filesystem and shell tools scoped to named workspaces
//! - `<speak>`-tagged text fanned into a streaming TTS pipeline
//! - Whisper transcription of buffered microphone audio
//!
//! # Example
//!
//! ```ignore
//! use walkie_talkie::config::load_settings;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = load_settings(None)?;
//!     walkie_talkie::server::start(settings).await
//! }
//! ```

pub mod types;
pub mod config;
pub mod safety;
pub mod audio;
pub mod claude;
pub mod stt;
pub mod tts;
pub mod ws;
pub mod server;

// Re-export commonly used types for convenience
pub use claude::{
    client::{ClaudeClient, ClaudeEvent},
    executor::ToolExecutor,
};

pub use config::Settings;

pub use safety::{check_command_safety, PathSandbox};

pub use ws::session::{Session, SessionRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Truncate a string to at most `max_chars` characters, respecting char
/// boundaries.
pub fn truncate_safe(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_safe() {
        assert_eq!(truncate_safe("hello", 10), "hello");
        assert_eq!(truncate_safe("hello", 3), "hel");
        assert_eq!(truncate_safe("héllo", 2), "hé");
    }
}
