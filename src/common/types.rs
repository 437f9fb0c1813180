use chrono::{DateTime, Local};

/// Time layout used when rendering a message, e.g. `3:04PM`.
pub const KITCHEN_FORMAT: &str = "%-I:%M%p";

/// A single chat line as seen by this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    timestamp: DateTime<Local>,
    author: String,
    text: String,
}

impl ChatMessage {
    pub fn create(
        timestamp: DateTime<Local>,
        author: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            author: author.into(),
            text: text.into(),
        }
    }

    /// Stamps the message with the current local time.
    pub fn now(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self::create(Local::now(), author, text)
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Formats the message as `<time> - <author>: <text>\n`.
    pub fn render(&self) -> String {
        format!(
            "{} - {}: {}\n",
            self.timestamp.format(KITCHEN_FORMAT),
            self.author.trim(),
            self.text
        )
    }
}
