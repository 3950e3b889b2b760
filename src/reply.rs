use crate::config::SLACK_MESSAGE_LIMIT;
use crate::rag::Answer;
use crate::slack::text::markdown_to_mrkdwn;

pub const GREETING: &str = "Hi! Mention me with a question about this workspace's history, \
and I'll answer from past messages with links to the sources.";

pub const APOLOGY: &str = "Sorry, I couldn't answer that right now. Please try again in a moment.";

const TRUNCATED: &str = "\n…";

/// Render an answer and its sources as one Slack message.
pub fn format_answer(answer: &Answer) -> String {
    let mut out = format!("*Answer:*\n{}", markdown_to_mrkdwn(&answer.text));

    if !answer.citations.is_empty() {
        out.push_str("\n\n*📎 Sources:*");
        for citation in &answer.citations {
            out.push_str(&format!(
                "\n{}. <{}|#{} message>",
                citation.rank, citation.link, citation.channel
            ));
        }
    }

    truncate(out, SLACK_MESSAGE_LIMIT)
}

/// Cut at a char boundary so the message stays under Slack's limit.
fn truncate(text: String, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text;
    }
    let keep = limit.saturating_sub(TRUNCATED.chars().count());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(TRUNCATED);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::Citation;

    #[test]
    fn test_answer_with_sources() {
        let answer = Answer {
            text: "We picked **Postgres**.".to_string(),
            citations: vec![
                Citation {
                    rank: 1,
                    channel: "eng".to_string(),
                    link: "https://slack.com/app_redirect?channel=C1&message_ts=1".to_string(),
                },
                Citation {
                    rank: 2,
                    channel: "general".to_string(),
                    link: "https://slack.com/app_redirect?channel=C2&message_ts=2".to_string(),
                },
            ],
        };
        let out = format_answer(&answer);
        assert!(out.starts_with("*Answer:*\nWe picked *Postgres*."));
        assert!(out.contains(
            "*📎 Sources:*\n1. <https://slack.com/app_redirect?channel=C1&message_ts=1|#eng message>"
        ));
        assert!(out.ends_with("2. <https://slack.com/app_redirect?channel=C2&message_ts=2|#general message>"));
    }

    #[test]
    fn test_answer_without_sources() {
        let answer = Answer {
            text: "No idea.".to_string(),
            citations: vec![],
        };
        assert_eq!(format_answer(&answer), "*Answer:*\nNo idea.");
    }

    #[test]
    fn test_long_answers_are_truncated() {
        let out = truncate("é".repeat(50), 10);
        assert_eq!(out.chars().count(), 10);
        assert!(out.ends_with('…'));
        assert_eq!(truncate("short".to_string(), 10), "short");
    }
}
