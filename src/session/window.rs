//! Bounded conversation window and prompt assembly.

use serde::{Deserialize, Serialize};

use super::{Message, Speaker};

/// Number of window lines that survive into a prompt (three exchanges).
pub const DEFAULT_WINDOW_SIZE: usize = 6;

/// Longest text kept per window line. Six lines at this size keep the
/// encoded token well under the 4 KB browsers accept for one cookie.
pub const DEFAULT_MAX_LINE_BYTES: usize = 360;

/// Instruction preamble placed before the window.
pub const DEFAULT_INSTRUCTION: &str =
    "Respond like an empathetic therapist, offering emotionally intelligent guidance.";

const USER_TAG: &str = "[USER]";
const ASSISTANT_TAG: &str = "[THERABOT]";

/// How prompts are assembled from a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSettings {
    /// Instruction text, rendered as `[INSTRUCTION]: <text>`.
    pub instruction: String,
    /// Maximum number of window lines kept.
    pub window_size: usize,
    /// Maximum text bytes per window line; longer text is cut on a char boundary.
    pub max_line_bytes: usize,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            instruction: DEFAULT_INSTRUCTION.to_string(),
            window_size: DEFAULT_WINDOW_SIZE,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

/// Ordered, role-tagged recent lines of a conversation.
///
/// Not persisted; it is rebuilt from the store only on restore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationWindow {
    lines: Vec<String>,
}

impl ConversationWindow {
    /// Rebuild a window from an ordered message log, bounded by `settings`.
    #[must_use]
    pub fn from_messages(messages: &[Message], settings: &PromptSettings) -> Self {
        let mut window = Self::default();
        for message in messages {
            window.push(message.speaker, &message.content);
        }
        window.fit(settings);
        window
    }

    /// Append a user line.
    pub fn push_user(&mut self, text: &str) {
        self.push(Speaker::User, text);
    }

    /// Append an assistant line.
    pub fn push_assistant(&mut self, text: &str) {
        self.push(Speaker::Assistant, text);
    }

    /// Append a line for the given speaker.
    pub fn push(&mut self, speaker: Speaker, text: &str) {
        let tag = match speaker {
            Speaker::User => USER_TAG,
            Speaker::Assistant => ASSISTANT_TAG,
        };
        self.lines.push(format!("{tag}: {text}"));
    }

    /// Drop everything but the most recent `limit` lines.
    pub fn retain_last(&mut self, limit: usize) {
        if self.lines.len() > limit {
            let excess = self.lines.len() - limit;
            self.lines.drain(..excess);
        }
    }

    /// Apply both bounds of `settings`: line count and per-line text size.
    pub fn fit(&mut self, settings: &PromptSettings) {
        self.retain_last(settings.window_size);
        for line in &mut self.lines {
            truncate_text(line, settings.max_line_bytes);
        }
    }

    /// The lines, oldest first.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Assemble the generation prompt: preamble, the last
    /// `settings.window_size` lines, then the assistant role cue.
    #[must_use]
    pub fn build_prompt(&self, settings: &PromptSettings) -> String {
        let start = self.lines.len().saturating_sub(settings.window_size);
        let mut prompt = format!("[INSTRUCTION]: {}\n", settings.instruction);
        prompt.push_str(&self.lines[start..].join("\n"));
        prompt.push('\n');
        prompt.push_str(ASSISTANT_TAG);
        prompt.push(':');
        prompt
    }
}

/// Cut the text after the `[TAG]: ` prefix to at most `max_bytes`.
fn truncate_text(line: &mut String, max_bytes: usize) {
    let prefix = line.find(": ").map_or(0, |i| i + 2);
    let mut end = prefix + max_bytes;
    if line.len() <= end {
        return;
    }
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    line.truncate(end);
}
