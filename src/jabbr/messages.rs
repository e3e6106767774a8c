//! JabbR message shapes.

use crate::error::SignalRError;
use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Outbound chat message passed to the hub's `Send` method.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientMessage {
    pub id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

impl ClientMessage {
    /// Creates a message with a fresh UUID and no room.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            room: None,
        }
    }

    pub fn in_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }
}

/// A chat message as the server pushes it to `addMessage`.
#[derive(Debug, Clone, Deserialize)]
struct ServerMessage {
    #[serde(rename = "User", default)]
    user: Value,
    #[serde(rename = "Content", default)]
    content: String,
    #[serde(rename = "Id", default)]
    id: String,
    #[serde(rename = "When", default)]
    when: Value,
}

/// A received chat message shaped for display.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageViewModel {
    /// The sender as sent by the server.
    pub user: Value,
    pub content: String,
    pub id: String,
    /// `None` when the server's timestamp could not be parsed.
    pub when: Option<DateTime<Utc>>,
    /// Whether the sender's name mentions the local user's name.
    pub is_own: bool,
}

impl MessageViewModel {
    /// Shapes a pushed message; `own` matches the local user's nick, if known.
    pub fn from_server(message: &Value, own: Option<&Mention>) -> Result<Self, SignalRError> {
        let raw: ServerMessage = serde_json::from_value(message.clone())?;
        let is_own = match (own, user_name(&raw.user)) {
            (Some(own), Some(sender)) => own.is_match(sender),
            _ => false,
        };
        Ok(Self {
            when: parse_json_date(&raw.when),
            user: raw.user,
            content: raw.content,
            id: raw.id,
            is_own,
        })
    }

    pub fn user_name(&self) -> Option<&str> {
        user_name(&self.user)
    }
}

fn user_name(user: &Value) -> Option<&str> {
    user.get("Name")
        .or_else(|| user.get("name"))
        .and_then(Value::as_str)
}

/// Compiled case-insensitive whole-word matcher for one name, optionally
/// prefixed with `@`.
#[derive(Debug, Clone)]
pub struct Mention {
    name: String,
    pattern: Regex,
}

impl Mention {
    pub fn new(name: &str) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!(r"(?i)\b@?{}\b", regex::escape(name)))?;
        Ok(Self {
            name: name.to_string(),
            pattern,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// One-off form of [`Mention::is_match`].
pub fn mentions(name: &str, text: &str) -> bool {
    Mention::new(name).is_ok_and(|mention| mention.is_match(text))
}

/// Parses `"/Date(<ms>[+-hhmm])/"` or RFC 3339 timestamps.
pub fn parse_json_date(value: &Value) -> Option<DateTime<Utc>> {
    let text = value.as_str()?;
    if let Some(inner) = text
        .strip_prefix("/Date(")
        .and_then(|rest| rest.strip_suffix(")/"))
    {
        // Смещение часового пояса не влияет на миллисекунды UTC
        let digits_end = inner
            .char_indices()
            .skip(1)
            .find(|(_, c)| *c == '+' || *c == '-')
            .map_or(inner.len(), |(i, _)| i);
        let millis: i64 = inner[..digits_end].parse().ok()?;
        return Utc.timestamp_millis_opt(millis).single();
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_serialization() {
        let message = ClientMessage::new("/nick bob secret");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["content"], json!("/nick bob secret"));
        assert!(value.get("room").is_none());
        assert_eq!(message.id.len(), 36);

        let in_room = ClientMessage::new("hi").in_room("lobby");
        assert_eq!(serde_json::to_value(&in_room).unwrap()["room"], json!("lobby"));
    }

    #[test]
    fn test_parse_json_date() {
        let when = parse_json_date(&json!("/Date(1354024396123)/")).unwrap();
        assert_eq!(when.timestamp_millis(), 1_354_024_396_123);

        let with_offset = parse_json_date(&json!("/Date(1354024396123+0100)/")).unwrap();
        assert_eq!(with_offset.timestamp_millis(), 1_354_024_396_123);

        let iso = parse_json_date(&json!("2012-11-27T13:53:16Z")).unwrap();
        assert_eq!(iso.timestamp(), 1_354_024_396);

        assert!(parse_json_date(&json!("yesterday")).is_none());
        assert!(parse_json_date(&json!(42)).is_none());
    }

    #[test]
    fn test_mentions() {
        assert!(mentions("bob", "Bob"));
        assert!(mentions("bob", "hey @bob"));
        assert!(mentions("j.doe", "j.doe"));
        assert!(!mentions("j.doe", "jxdoe"));
        assert!(!mentions("bob", "bobby"));
    }

    #[test]
    fn test_mention_is_reusable() {
        let mention = Mention::new("bob").unwrap();
        assert_eq!(mention.name(), "bob");
        assert!(mention.is_match("@Bob around?"));
        assert!(mention.is_match("bob"));
        assert!(!mention.is_match("bobcat"));
    }

    #[test]
    fn test_view_model() {
        let pushed = json!({
            "User": {"Name": "bob"},
            "Content": "hello",
            "Id": "m1",
            "When": "/Date(1000)/"
        });
        let bob = Mention::new("BOB").unwrap();
        let own = MessageViewModel::from_server(&pushed, Some(&bob)).unwrap();
        assert!(own.is_own);
        assert_eq!(own.content, "hello");
        assert_eq!(own.id, "m1");
        assert_eq!(own.user_name(), Some("bob"));
        assert_eq!(own.when.unwrap().timestamp_millis(), 1000);

        let alice = Mention::new("alice").unwrap();
        let other = MessageViewModel::from_server(&pushed, Some(&alice)).unwrap();
        assert!(!other.is_own);

        let anonymous = MessageViewModel::from_server(&pushed, None).unwrap();
        assert!(!anonymous.is_own);
    }
}
