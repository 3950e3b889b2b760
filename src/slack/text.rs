use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};

/// Text to put after the handle in a Slack event, i.e. everything after the first `>`.
pub fn strip_bot_handle(input: &str) -> String {
    match input.split_once('>') {
        Some((_, rest)) => rest.trim().to_string(),
        None => input.trim().to_string(),
    }
}

/// Escape the three characters Slack treats as control sequences.
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Convert Markdown (as LLMs write it) into Slack `mrkdwn`.
/// Elements Slack cannot show (tables, images, html) degrade to plain text.
pub fn markdown_to_mrkdwn(input: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut renderer = MrkdwnRenderer::new();
    for event in Parser::new_ext(input, options) {
        renderer.handle_event(event);
    }
    renderer.finish()
}

#[derive(Debug, Clone)]
enum ListKind {
    Unordered,
    Ordered { next_index: u64 },
}

struct MrkdwnRenderer {
    output_stack: Vec<String>,
    at_line_start: bool,
    in_code_block: bool,
    blockquote_level: usize,
    list_stack: Vec<ListKind>,
    link_stack: Vec<String>,
}

impl MrkdwnRenderer {
    fn new() -> Self {
        Self {
            output_stack: vec![String::new()],
            at_line_start: true,
            in_code_block: false,
            blockquote_level: 0,
            list_stack: Vec::new(),
            link_stack: Vec::new(),
        }
    }

    fn finish(mut self) -> String {
        // Unclosed links leave extra buffers behind; fold them back in.
        while self.output_stack.len() > 1 {
            let inner = self.output_stack.pop().unwrap_or_default();
            self.current().push_str(&inner);
        }
        let output = self.output_stack.pop().unwrap_or_default();
        output.trim_end_matches(['\n', ' ']).to_string()
    }

    fn current(&mut self) -> &mut String {
        if self.output_stack.is_empty() {
            self.output_stack.push(String::new());
        }
        let last = self.output_stack.len() - 1;
        &mut self.output_stack[last]
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Start(tag) => self.handle_start_tag(tag),
            Event::End(tag) => self.handle_end_tag(tag),
            Event::Text(text) => {
                if self.in_code_block {
                    self.write_raw(&escape(&text));
                } else {
                    self.write_text(&escape(&text));
                }
            }
            // Slack cannot render HTML; show it as typed.
            Event::Html(html) | Event::InlineHtml(html) => self.write_text(&escape(&html)),
            Event::Code(code) => {
                self.write_raw("`");
                self.write_raw(&escape(&code));
                self.write_raw("`");
            }
            Event::SoftBreak | Event::HardBreak => self.new_line(),
            Event::Rule => {
                self.ensure_line_start();
                self.write_raw("───");
                self.new_line();
            }
            Event::TaskListMarker(checked) => {
                self.write_text(if checked { "☑ " } else { "☐ " });
            }
            _ => {}
        }
    }

    fn handle_start_tag(&mut self, tag: Tag) {
        match tag {
            Tag::Heading { .. } => {
                self.ensure_line_start();
                self.write_raw("*");
            }
            Tag::BlockQuote => {
                self.blockquote_level += 1;
                self.ensure_line_start();
            }
            Tag::List(start) => {
                self.ensure_line_start();
                self.list_stack.push(match start {
                    Some(n) => ListKind::Ordered { next_index: n },
                    None => ListKind::Unordered,
                });
            }
            Tag::Item => self.start_list_item(),
            Tag::Emphasis => self.write_raw("_"),
            Tag::Strong => self.write_raw("*"),
            Tag::Strikethrough => self.write_raw("~"),
            // Slack has no syntax highlighting, so the language hint is dropped.
            Tag::CodeBlock(_) => {
                self.ensure_line_start();
                self.write_raw("```");
                self.new_line();
                self.in_code_block = true;
            }
            Tag::Link { dest_url, .. } | Tag::Image { dest_url, .. } => {
                self.link_stack.push(dest_url.to_string());
                self.output_stack.push(String::new());
            }
            _ => {}
        }
    }

    fn handle_end_tag(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => {
                self.new_line();
                if self.list_stack.is_empty() {
                    self.new_line();
                }
            }
            TagEnd::Heading(_) => {
                self.write_raw("*");
                self.new_line();
            }
            TagEnd::BlockQuote => {
                self.blockquote_level = self.blockquote_level.saturating_sub(1);
                self.new_line();
            }
            TagEnd::List(_) => {
                self.list_stack.pop();
                self.ensure_line_start();
            }
            TagEnd::Item => self.ensure_line_start(),
            TagEnd::Emphasis => self.write_raw("_"),
            TagEnd::Strong => self.write_raw("*"),
            TagEnd::Strikethrough => self.write_raw("~"),
            TagEnd::CodeBlock => {
                self.in_code_block = false;
                self.ensure_line_start();
                self.write_raw("```");
                self.new_line();
            }
            TagEnd::Link | TagEnd::Image => self.end_link(),
            _ => {}
        }
    }

    fn start_list_item(&mut self) {
        self.ensure_line_start();
        let depth = self.list_stack.len().saturating_sub(1);
        let marker = match self.list_stack.last_mut() {
            Some(ListKind::Ordered { next_index }) => {
                let marker = format!("{}. ", next_index);
                *next_index += 1;
                marker
            }
            _ => "• ".to_string(),
        };
        self.write_raw(&"    ".repeat(depth));
        self.write_raw(&marker);
    }

    fn end_link(&mut self) {
        let label = if self.output_stack.len() > 1 {
            self.output_stack.pop().unwrap_or_default()
        } else {
            String::new()
        };
        let destination = self.link_stack.pop().unwrap_or_default();
        let label = label.trim();
        if destination.is_empty() {
            self.write_raw(label);
        } else if label.is_empty() || label == destination {
            self.write_raw(&format!("<{}>", destination));
        } else {
            self.write_raw(&format!("<{}|{}>", destination, label));
        }
    }

    fn write_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.write_prefix_if_needed();
        self.current().push_str(text);
        self.at_line_start = false;
    }

    fn write_raw(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.write_prefix_if_needed();
        self.current().push_str(text);
        self.at_line_start = text.ends_with('\n');
    }

    fn write_prefix_if_needed(&mut self) {
        if self.at_line_start && self.blockquote_level > 0 && !self.in_code_block {
            let prefix = "> ".repeat(self.blockquote_level);
            self.current().push_str(&prefix);
            self.at_line_start = false;
        }
    }

    fn new_line(&mut self) {
        self.current().push('\n');
        self.at_line_start = true;
    }

    fn ensure_line_start(&mut self) {
        let needs_break = {
            let current = self.current();
            !current.is_empty() && !current.ends_with('\n')
        };
        if needs_break {
            self.new_line();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_bot_handle() {
        assert_eq!(strip_bot_handle("<@U0BOT> what did we decide?"), "what did we decide?");
        assert_eq!(strip_bot_handle("<@U0BOT>   "), "");
        assert_eq!(strip_bot_handle("<@U0BOT> is 3 > 2?"), "is 3 > 2?");
        assert_eq!(strip_bot_handle("no handle here"), "no handle here");
    }

    #[test]
    fn test_bold_and_italic() {
        assert_eq!(markdown_to_mrkdwn("**Alpha** shipped _late_"), "*Alpha* shipped _late_");
    }

    #[test]
    fn test_heading_becomes_bold_line() {
        let out = markdown_to_mrkdwn("# Summary\nAll good");
        assert!(out.starts_with("*Summary*\n"));
        assert!(out.contains("All good"));
    }

    #[test]
    fn test_links() {
        assert_eq!(
            markdown_to_mrkdwn("see [the thread](https://example.com/t)"),
            "see <https://example.com/t|the thread>"
        );
    }

    #[test]
    fn test_lists() {
        let out = markdown_to_mrkdwn("- one\n- two\n\n1. first\n2. second");
        assert!(out.contains("• one\n• two"));
        assert!(out.contains("1. first\n2. second"));
    }

    #[test]
    fn test_code_blocks() {
        let out = markdown_to_mrkdwn("```rust\nlet a = 1 < 2;\n```");
        assert!(out.contains("```\nlet a = 1 &lt; 2;\n```"));
        assert_eq!(markdown_to_mrkdwn("run `a<b`"), "run `a&lt;b`");
    }

    #[test]
    fn test_control_characters_are_escaped() {
        assert_eq!(markdown_to_mrkdwn("R&D <team>"), "R&amp;D &lt;team&gt;");
    }
}
