//! Incremental `<speak>` tag extraction from the delta stream
//!
//! The raw model text accumulates in a buffer; each complete
//! `<speak>…</speak>` pair is carved out and handed to the TTS pipeline.
//! The buffer is consumed as tags are found, so it stays small and never
//! re-scans old text. Partial tags remain buffered until the next delta.

const OPEN_TAG: &str = "<speak>";
const CLOSE_TAG: &str = "</speak>";

/// Streaming scanner over the raw delta text.
#[derive(Debug, Default)]
pub struct SpeakExtractor {
    buffer: String,
}

impl SpeakExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw delta; returns the trimmed inner text of every
    /// `<speak>` block completed by it, in order.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);

        let mut segments = Vec::new();
        loop {
            let Some(start) = self.buffer.find(OPEN_TAG) else {
                break;
            };
            let inner_start = start + OPEN_TAG.len();
            let Some(close) = self.buffer[inner_start..].find(CLOSE_TAG) else {
                break;
            };

            let inner = self.buffer[inner_start..inner_start + close].trim();
            if !inner.is_empty() {
                segments.push(inner.to_string());
            }
            // Consume everything up to and including the matched tag
            self.buffer.drain(..inner_start + close + CLOSE_TAG.len());
        }
        segments
    }

    /// Remove complete tag markers from display text. Partial tags pass
    /// through untouched, matching what the buffer still holds.
    pub fn strip_tags(text: &str) -> String {
        text.replace(OPEN_TAG, "").replace(CLOSE_TAG, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_complete_tag() {
        let mut extractor = SpeakExtractor::new();
        let segments = extractor.push("<speak>Hello there.</speak>");
        assert_eq!(segments, vec!["Hello there."]);
    }

    #[test]
    fn test_tag_split_across_deltas() {
        let mut extractor = SpeakExtractor::new();
        assert!(extractor.push("<spe").is_empty());
        assert!(extractor.push("ak>Hel").is_empty());
        assert!(extractor.push("lo.</spe").is_empty());
        let segments = extractor.push("ak> trailing text");
        assert_eq!(segments, vec!["Hello."]);
    }

    #[test]
    fn test_multiple_tags_in_one_delta() {
        let mut extractor = SpeakExtractor::new();
        let segments = extractor.push("<speak>One.</speak> mid <speak>Two.</speak>");
        assert_eq!(segments, vec!["One.", "Two."]);
    }

    #[test]
    fn test_inner_text_trimmed_and_empty_dropped() {
        let mut extractor = SpeakExtractor::new();
        let segments = extractor.push("<speak>  spaced  </speak><speak>   </speak>");
        assert_eq!(segments, vec!["spaced"]);
    }

    #[test]
    fn test_newlines_inside_tag() {
        let mut extractor = SpeakExtractor::new();
        let segments = extractor.push("<speak>line one\nline two</speak>");
        assert_eq!(segments, vec!["line one\nline two"]);
    }

    #[test]
    fn test_text_outside_tags_ignored() {
        let mut extractor = SpeakExtractor::new();
        assert!(extractor.push("plain text, no tags").is_empty());
        let segments = extractor.push(" then <speak>spoken</speak>");
        assert_eq!(segments, vec!["spoken"]);
    }

    #[test]
    fn test_unterminated_tail_stays_buffered() {
        let mut extractor = SpeakExtractor::new();
        assert!(extractor.push("<speak>never closed").is_empty());
        // Closing it later still works
        let segments = extractor.push("</speak>");
        assert_eq!(segments, vec!["never closed"]);
    }

    #[test]
    fn test_strip_tags() {
        assert_eq!(
            SpeakExtractor::strip_tags("<speak>Hi.</speak> rest"),
            "Hi. rest"
        );
        // Partial tags pass through
        assert_eq!(SpeakExtractor::strip_tags("<spe"), "<spe");
    }
}
