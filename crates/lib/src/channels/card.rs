//! Interactive card content for streamed answers.
//!
//! Layout: one markdown element with the answer; when sources are present, a divider
//! and a second markdown element listing them. No sources means no divider and no
//! second element at all.

use crate::channels::turn::Source;
use serde_json::{json, Value};

const SOURCES_HEADING: &str = "**Sources**";

/// Markdown list of citations, one numbered link per source.
pub fn render_sources(sources: &[Source]) -> String {
    let mut out = String::from(SOURCES_HEADING);
    for (i, s) in sources.iter().enumerate() {
        out.push('\n');
        out.push_str(&format!("{}. [{}]({})", i + 1, escape_link_text(&s.title), s.url));
    }
    out
}

/// Card JSON for an answer snapshot.
pub fn render_card(text: &str, sources: &[Source]) -> Value {
    let mut elements = vec![json!({ "tag": "markdown", "content": text })];
    if !sources.is_empty() {
        elements.push(json!({ "tag": "hr" }));
        elements.push(json!({ "tag": "markdown", "content": render_sources(sources) }));
    }
    json!({ "elements": elements })
}

/// Content string for a `text` message.
pub fn text_content(text: &str) -> String {
    json!({ "text": text }).to_string()
}

fn escape_link_text(title: &str) -> String {
    title.replace('[', "\\[").replace(']', "\\]")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc1() -> Source {
        Source {
            title: "Doc1".to_string(),
            url: "http://x".to_string(),
        }
    }

    #[test]
    fn card_without_sources_has_single_markdown_element() {
        let card = render_card("AB", &[]);
        assert_eq!(
            card.to_string(),
            r#"{"elements":[{"tag":"markdown","content":"AB"}]}"#
        );
    }

    #[test]
    fn card_with_sources_appends_divider_and_block() {
        let card = render_card("AB", &[doc1()]);
        let elements = card["elements"].as_array().unwrap();
        assert_eq!(elements.len(), 3);
        assert_eq!(elements[0]["content"], "AB");
        assert_eq!(elements[1]["tag"], "hr");
        assert_eq!(elements[2]["content"], "**Sources**\n1. [Doc1](http://x)");
    }

    #[test]
    fn sources_are_numbered_in_order() {
        let second = Source {
            title: "Runbook [draft]".to_string(),
            url: "http://y".to_string(),
        };
        assert_eq!(
            render_sources(&[doc1(), second]),
            "**Sources**\n1. [Doc1](http://x)\n2. [Runbook \\[draft\\]](http://y)"
        );
    }

    #[test]
    fn text_content_is_json_string() {
        assert_eq!(text_content("hi \"there\""), r#"{"text":"hi \"there\""}"#);
    }
}
