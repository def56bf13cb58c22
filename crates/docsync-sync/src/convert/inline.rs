//! Inline formatting: `**bold**`, `*italic*` and one `[text](url)` link

use docsync_types::RichSpan;
use once_cell::sync::Lazy;
use regex::Regex;

static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("valid bold pattern"));
static ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*(.*?)\*").expect("valid italic pattern"));
static LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(.*?)\]\((.*?)\)").expect("valid link pattern"));

/// Parse a line into a single formatted span
///
/// Formatting applies to the whole run: any bold pair makes the span bold, any
/// italic pair makes it italic. The first link is only honored when its target
/// is http or https; other links stay literal.
pub fn parse_inline(text: &str) -> RichSpan {
    let mut span = RichSpan::plain(text);

    if BOLD.is_match(&span.text) {
        span.bold = true;
        span.text = BOLD.replace_all(&span.text, "$1").into_owned();
    }

    if ITALIC.is_match(&span.text) {
        span.italic = true;
        span.text = ITALIC.replace_all(&span.text, "$1").into_owned();
    }

    if let Some(caps) = LINK.captures(&span.text) {
        let url = caps.get(2).map_or("", |m| m.as_str());
        if url.starts_with("http://") || url.starts_with("https://") {
            let url = url.to_string();
            span.text = LINK.replace_all(&span.text, "$1").into_owned();
            span.link_url = Some(url);
        }
    }

    span
}

/// Render one span back into inline markup
pub fn render_span(span: &RichSpan) -> String {
    let mut content = span.text.clone();
    if content.is_empty() {
        return content;
    }

    if span.bold {
        content = format!("**{}**", content);
    }
    if span.italic {
        content = format!("*{}*", content);
    }
    if span.strikethrough {
        content = format!("~~{}~~", content);
    }
    if span.code {
        content = format!("`{}`", content);
    }
    if let Some(url) = &span.link_url {
        content = format!("[{}]({})", content, url);
    }

    content
}

/// Render a sequence of spans
pub fn render_spans(spans: &[RichSpan]) -> String {
    spans.iter().map(render_span).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text() {
        let span = parse_inline("just words");
        assert_eq!(span, RichSpan::plain("just words"));
    }

    #[test]
    fn test_bold_and_italic() {
        let span = parse_inline("a **strong** and *soft* word");
        assert!(span.bold);
        assert!(span.italic);
        assert_eq!(span.text, "a strong and soft word");
    }

    #[test]
    fn test_triple_star_is_bold_italic() {
        let span = parse_inline("***both***");
        assert!(span.bold);
        assert!(span.italic);
        assert_eq!(span.text, "both");
    }

    #[test]
    fn test_http_link() {
        let span = parse_inline("see [the docs](https://example.com/docs) now");
        assert_eq!(span.text, "see the docs now");
        assert_eq!(span.link_url.as_deref(), Some("https://example.com/docs"));
    }

    #[test]
    fn test_non_http_link_stays_literal() {
        let span = parse_inline("see [notes](./notes.md)");
        assert_eq!(span.text, "see [notes](./notes.md)");
        assert!(span.link_url.is_none());
    }

    #[test]
    fn test_render_is_reparsed_to_same_span() {
        for source in [
            "plain",
            "**bold** text",
            "*it* text",
            "***x***",
            "go [here](http://a.b/c)",
            "**go** [here](http://a.b/c)",
        ] {
            let span = parse_inline(source);
            assert_eq!(parse_inline(&render_span(&span)), span, "source: {}", source);
        }
    }

    #[test]
    fn test_render_remote_annotations() {
        let span = RichSpan {
            strikethrough: true,
            code: true,
            ..RichSpan::plain("x")
        };
        assert_eq!(render_span(&span), "`~~x~~`");
        assert_eq!(render_spans(&[RichSpan::plain("a"), RichSpan::plain("b").bold()]), "a**b**");
    }
}
