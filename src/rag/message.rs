//! Turning raw channel history into embeddable text with stable ids.

use super::{Channel, FormattedMessage, MessageMetadata, RawMessage};
use chrono::DateTime;

const BOT_MESSAGE_SUBTYPE: &str = "bot_message";
const UNKNOWN_USER: &str = "Unknown";
const UNKNOWN_TIME: &str = "Unknown time";

/// Bot output and messages without text never reach the index.
pub fn is_indexable(message: &RawMessage) -> bool {
    if message.subtype.as_deref() == Some(BOT_MESSAGE_SUBTYPE) || message.bot_id.is_some() {
        return false;
    }
    !message.text.trim().is_empty() && !message.ts.is_empty()
}

/// `{channel_id}_{ts}`; identical across re-runs so upserts overwrite in place.
pub fn vector_id(channel_id: &str, ts: &str) -> String {
    format!("{}_{}", channel_id, ts)
}

/// Link that opens the message in the Slack client. The timestamp loses its dot.
pub fn deep_link(host: &str, channel_id: &str, ts: &str) -> String {
    format!(
        "https://{}/app_redirect?channel={}&message_ts={}",
        host,
        channel_id,
        ts.replace('.', "")
    )
}

/// `YYYY-MM-DD HH:MM:SS` in UTC, or `Unknown time` if `ts` is not a timestamp.
pub fn readable_time(ts: &str) -> String {
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, ""));
    let Ok(secs) = secs.parse::<i64>() else {
        return UNKNOWN_TIME.to_string();
    };
    let nanos = if frac.is_empty() {
        0
    } else {
        // Right-pad to nine digits: "0001" -> 100_000 ns.
        let digits: String = frac.chars().take(9).collect();
        match format!("{:0<9}", digits).parse::<u32>() {
            Ok(n) => n,
            Err(_) => return UNKNOWN_TIME.to_string(),
        }
    };
    DateTime::from_timestamp(secs, nanos)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| UNKNOWN_TIME.to_string())
}

pub fn format_message(message: &RawMessage, channel: &Channel, host: &str) -> FormattedMessage {
    let user = message
        .user
        .as_deref()
        .filter(|u| !u.is_empty())
        .unwrap_or(UNKNOWN_USER)
        .to_string();

    let rendered = format!(
        "Channel: #{}\nUser: {}\nTime: {}\nMessage: {}",
        channel.name,
        user,
        readable_time(&message.ts),
        message.text
    );

    FormattedMessage {
        rendered,
        metadata: MessageMetadata {
            channel: channel.name.clone(),
            channel_id: channel.id.clone(),
            user,
            timestamp: message.ts.clone(),
            link: deep_link(host, &channel.id, &message.ts),
            text: message.text.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(text: &str, user: Option<&str>, ts: &str, subtype: Option<&str>) -> RawMessage {
        RawMessage {
            text: text.to_string(),
            user: user.map(String::from),
            ts: ts.to_string(),
            subtype: subtype.map(String::from),
            ..Default::default()
        }
    }

    fn general() -> Channel {
        Channel {
            id: "C123".to_string(),
            name: "general".to_string(),
        }
    }

    #[test]
    fn test_filtering() {
        assert!(is_indexable(&msg("hi", Some("U1"), "1700000000.000100", None)));
        assert!(!is_indexable(&msg("beep", None, "1700000000.000100", Some("bot_message"))));
        assert!(!is_indexable(&msg("", Some("U1"), "1700000000.000100", None)));
        assert!(!is_indexable(&msg("   ", Some("U1"), "1700000000.000100", None)));
        assert!(!is_indexable(&msg("no ts", Some("U1"), "", None)));

        let mut from_app = msg("deploy finished", None, "1700000000.000100", None);
        from_app.bot_id = Some("B1".to_string());
        assert!(!is_indexable(&from_app));

        // Other subtypes with text are still conversation.
        assert!(is_indexable(&msg("edited", Some("U1"), "1700000000.000100", Some("thread_broadcast"))));
    }

    #[test]
    fn test_vector_id_is_channel_and_raw_ts() {
        assert_eq!(vector_id("C123", "1700000000.000100"), "C123_1700000000.000100");
    }

    #[test]
    fn test_deep_link_strips_separator() {
        assert_eq!(
            deep_link("slack.com", "C123", "1700000000.000100"),
            "https://slack.com/app_redirect?channel=C123&message_ts=1700000000000100"
        );
    }

    #[test]
    fn test_readable_time() {
        assert_eq!(readable_time("1700000000.000100"), "2023-11-14 22:13:20");
        assert_eq!(readable_time("0"), "1970-01-01 00:00:00");
        assert_eq!(readable_time("not-a-ts"), "Unknown time");
        assert_eq!(readable_time(""), "Unknown time");
    }

    #[test]
    fn test_format_message() {
        let formatted = format_message(
            &msg("we picked Postgres", Some("U42"), "1700000000.000100", None),
            &general(),
            "slack.com",
        );
        assert_eq!(
            formatted.rendered,
            "Channel: #general\nUser: U42\nTime: 2023-11-14 22:13:20\nMessage: we picked Postgres"
        );
        assert_eq!(formatted.metadata.channel, "general");
        assert_eq!(formatted.metadata.channel_id, "C123");
        assert_eq!(formatted.metadata.timestamp, "1700000000.000100");
        assert_eq!(formatted.metadata.text, "we picked Postgres");
        assert!(formatted.metadata.link.ends_with("message_ts=1700000000000100"));
    }

    #[test]
    fn test_missing_author_renders_unknown() {
        let formatted = format_message(
            &msg("anonymous note", None, "1700000000.000100", None),
            &general(),
            "slack.com",
        );
        assert!(formatted.rendered.contains("User: Unknown\n"));
        assert_eq!(formatted.metadata.user, "Unknown");
    }
}
