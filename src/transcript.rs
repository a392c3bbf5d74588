//! Append-only transcript accumulation for one conversation.

/// An ordered sequence of recognized or generated text fragments.
///
/// Fragments are appended in arrival order, separated by single spaces.
/// The buffer is cleared only on explicit reset; by default transcripts
/// accumulate across turns like a running subtitle.
#[derive(Debug, Default)]
pub struct TranscriptBuffer {
    text: String,
}

impl TranscriptBuffer {
    pub fn push(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(fragment);
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn reset(&mut self) {
        self.text.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}
