use chrono::{DateTime, Local};

/// Greeting shown when the chat is fresh or after a clear.
pub const GREETING: &str = "How can I help you?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

/// A message in the displayed chat log. Session-lifetime only.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// One completed question/answer exchange, kept for export.
///
/// Unlike the displayed messages, these records survive "clear" and are
/// never mutated after being appended.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub timestamp: DateTime<Local>,
    pub question: String,
    pub prompt: String,
    pub response: String,
}

impl HistoryRecord {
    pub fn new(question: String, prompt: String, response: String) -> Self {
        Self {
            timestamp: Local::now(),
            question,
            prompt,
            response,
        }
    }
}

/// Column order of the CSV export.
const EXPORT_FIELDS: [&str; 4] = ["timestamp", "question", "prompt", "response"];

/// Encode the history as CSV: a header row of field names followed by one
/// row per record.
pub fn to_csv(records: &[HistoryRecord]) -> String {
    let mut out = String::new();
    out.push_str(&EXPORT_FIELDS.join(","));
    out.push('\n');

    for record in records {
        let fields = [
            record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            record.question.clone(),
            record.prompt.clone(),
            record.response.clone(),
        ];
        let encoded: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        out.push_str(&encoded.join(","));
        out.push('\n');
    }

    out
}

/// Quote a field if it contains a delimiter, quote, or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(question: &str, response: &str) -> HistoryRecord {
        HistoryRecord::new(
            question.to_string(),
            format!("prompt for {question}"),
            response.to_string(),
        )
    }

    #[test]
    fn empty_history_exports_header_only() {
        let csv = to_csv(&[]);
        assert_eq!(csv, "timestamp,question,prompt,response\n");
        assert_eq!(csv.lines().count(), 1);
    }

    #[test]
    fn export_has_one_line_per_record_plus_header() {
        let records = vec![
            record("how many users?", "42"),
            record("top artist?", "AC/DC, by sales"),
        ];
        let csv = to_csv(&records);
        assert_eq!(csv.lines().count(), 3);

        let header = csv.lines().next().unwrap();
        assert_eq!(header, "timestamp,question,prompt,response");

        let last = csv.lines().last().unwrap();
        assert!(last.contains("top artist?"));
        assert!(last.contains("\"AC/DC, by sales\""));
    }

    #[test]
    fn fields_with_delimiters_are_quoted() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn record_order_is_preserved() {
        let records = vec![record("first", "1"), record("second", "2"), record("third", "3")];
        let csv = to_csv(&records);
        let first_pos = csv.find("first").unwrap();
        let second_pos = csv.find("second").unwrap();
        let third_pos = csv.find("third").unwrap();
        assert!(first_pos < second_pos && second_pos < third_pos);
    }

    #[test]
    fn chat_message_constructors_set_roles() {
        assert_eq!(ChatMessage::user("q").role, ChatRole::User);
        assert_eq!(ChatMessage::assistant("a").role, ChatRole::Assistant);
    }
}
