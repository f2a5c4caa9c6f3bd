use crate::types::{Output, RenderedMessage};

/// Convert a handler output into the dual-format outbound payload: the
/// plain body plus an XHTML-IM rich body for transports that display it.
/// Total over all variants; unsupported ones fall back to a plain notice.
pub fn render(output: &Output) -> RenderedMessage {
    match output {
        Output::Text(text) => RenderedMessage {
            plain: text.message.clone(),
            rich: Some(plain_to_rich(&text.message)),
        },
        other => RenderedMessage {
            plain: format!(
                "Error - response type {} not yet supported",
                other.variant_name()
            ),
            rich: None,
        },
    }
}

/// Escape the plain text, preserve line breaks as `<br/>`, and wrap the
/// result in the XHTML-IM envelope.
pub fn plain_to_rich(plain: &str) -> String {
    let cleaned = escape_html(plain).replace('\n', "<br/>");
    format!(
        "<html xmlns='http://jabber.org/protocol/xhtml-im'>\
         <body xmlns='http://www.w3.org/1999/xhtml'><p>{cleaned}</p></body></html>"
    )
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::{plain_to_rich, render};
    use crate::types::{AttachmentOutput, Output};

    #[test]
    fn newlines_become_line_breaks() {
        let rendered = render(&Output::text("a\nb"));
        assert_eq!(rendered.plain, "a\nb");
        let rich = rendered.rich.unwrap();
        assert!(rich.contains("a<br/>b"));
        assert!(rich.starts_with("<html xmlns='http://jabber.org/protocol/xhtml-im'>"));
    }

    #[test]
    fn markup_in_the_response_text_is_escaped() {
        let rendered = render(&Output::text("x < y > z & \"q\""));
        let rich = rendered.rich.unwrap();
        assert!(rich.contains("x &lt; y &gt; z &amp; &quot;q&quot;"));
        assert!(!rich.contains("x < y"));
    }

    #[test]
    fn rich_body_keeps_the_xhtml_im_envelope() {
        let rich = plain_to_rich("hello");
        assert!(rich.contains("<body xmlns='http://www.w3.org/1999/xhtml'><p>hello</p></body>"));
    }

    #[test]
    fn unsupported_variants_fall_back_to_a_plain_notice() {
        let output = Output::Attachment(AttachmentOutput {
            name: "report.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            url: "https://files.example.com/report.pdf".to_string(),
        });
        let rendered = render(&output);
        assert_eq!(
            rendered.plain,
            "Error - response type attachment not yet supported"
        );
        assert!(rendered.rich.is_none());
    }
}
