use scraper::{ElementRef, Html, Node};

use crate::config::SanitizeConfig;
use crate::domain::{FieldIndex, FieldValue, ProjectedRecord, Projection};
use crate::error::ConfigError;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track", "wbr",
];

const LINK_ATTRS: &[&str] = &["href", "title"];
const IMG_ATTRS: &[&str] = &["src", "alt", "title"];

/// Normalizes article HTML for the downstream knowledge assistant.
///
/// - `<b>` becomes `<strong>`
/// - links keep only `href` and `title`
/// - images keep only `src`, `alt` and `title`
/// - tables keep only `border`, forced to `1`
/// - comments are dropped
/// - non-breaking spaces and newlines become plain spaces
#[derive(Debug, Clone, Default)]
pub struct HtmlSanitizer;

impl HtmlSanitizer {
    pub fn new() -> Self {
        Self
    }

    pub fn sanitize_html(&self, html: &str) -> String {
        if html.is_empty() {
            return String::new();
        }

        let fragment = Html::parse_fragment(html);
        let mut out = String::with_capacity(html.len());
        self.write_children(fragment.root_element(), &mut out);

        out.replace('\u{a0}', " ").replace('\n', " ")
    }

    fn write_children(&self, element: ElementRef<'_>, out: &mut String) {
        let raw_text = matches!(element.value().name(), "script" | "style");

        for child in element.children() {
            match child.value() {
                Node::Text(text) => {
                    if raw_text {
                        out.push_str(text);
                    } else {
                        escape_text(text, out);
                    }
                }
                Node::Element(_) => {
                    if let Some(child_element) = ElementRef::wrap(child) {
                        self.write_element(child_element, out);
                    }
                }
                _ => {}
            }
        }
    }

    fn write_element(&self, element: ElementRef<'_>, out: &mut String) {
        let name = element.value().name();
        let tag = if name == "b" { "strong" } else { name };

        // attributes keep their source order
        let attrs = element
            .value()
            .attrs()
            .filter_map(|(attr, value)| keep_attribute(name, attr, value));

        out.push('<');
        out.push_str(tag);
        for (attr, value) in attrs {
            out.push(' ');
            out.push_str(attr);
            out.push_str("=\"");
            escape_attribute(value, out);
            out.push('"');
        }
        out.push('>');

        if VOID_ELEMENTS.contains(&name) {
            return;
        }

        self.write_children(element, out);
        out.push_str("</");
        out.push_str(tag);
        out.push('>');
    }
}

fn keep_attribute<'a>(element: &str, attr: &'a str, value: &'a str) -> Option<(&'a str, &'a str)> {
    match element {
        "a" => LINK_ATTRS.contains(&attr).then_some((attr, value)),
        "img" => IMG_ATTRS.contains(&attr).then_some((attr, value)),
        "table" => (attr == "border").then_some((attr, "1")),
        _ => Some((attr, value)),
    }
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
}

/// Pipeline stage applying [`HtmlSanitizer`] to the configured textual fields
#[derive(Debug, Clone, Default)]
pub struct FieldSanitizer {
    fields: Vec<FieldIndex>,
    html: HtmlSanitizer,
}

impl FieldSanitizer {
    pub fn compile(config: &SanitizeConfig, projection: &Projection) -> Result<Self, ConfigError> {
        let mut fields = Vec::with_capacity(config.fields.len());
        for name in &config.fields {
            let index = projection
                .index_of(name)
                .ok_or_else(|| ConfigError::InvalidSanitizeField {
                    field: name.clone(),
                    detail: "not in the projection".to_string(),
                })?;
            let data_type = projection.spec(index).data_type;
            if !data_type.is_textual() {
                return Err(ConfigError::InvalidSanitizeField {
                    field: name.clone(),
                    detail: format!("declared as {}, expected string or text", data_type),
                });
            }
            if !fields.contains(&index) {
                fields.push(index);
            }
        }
        Ok(Self {
            fields,
            html: HtmlSanitizer::new(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Produce a new record with the configured fields sanitized
    pub fn apply(&self, record: ProjectedRecord) -> ProjectedRecord {
        self.fields.iter().fold(record, |record, &index| {
            let sanitized = match record.value(index) {
                Some(FieldValue::Text(html)) => Some(FieldValue::Text(self.html.sanitize_html(html))),
                Some(FieldValue::String(html)) => Some(FieldValue::String(self.html.sanitize_html(html))),
                _ => None,
            };
            match sanitized {
                Some(value) => record.with_value(index, Some(value)),
                None => record,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bold_becomes_strong_and_nbsp_is_replaced() {
        let sanitizer = HtmlSanitizer::new();
        assert_eq!(
            sanitizer.sanitize_html("<p>Hello&nbsp;<b>world</b></p>\n<p>Next</p>"),
            "<p>Hello <strong>world</strong></p> <p>Next</p>"
        );
    }

    #[test]
    fn test_link_attributes_are_restricted() {
        let sanitizer = HtmlSanitizer::new();
        assert_eq!(
            sanitizer.sanitize_html(
                r#"<a href="https://kb.example.com/a?x=1&amp;y=2" target="_blank" class="ext" title="Doc">link</a>"#
            ),
            r#"<a href="https://kb.example.com/a?x=1&amp;y=2" title="Doc">link</a>"#
        );
    }

    #[test]
    fn test_table_border_forced_and_other_attributes_dropped() {
        let sanitizer = HtmlSanitizer::new();
        assert_eq!(
            sanitizer.sanitize_html(
                r#"<table border="0" cellpadding="4"><tbody><tr><td>1</td></tr></tbody></table>"#
            ),
            r#"<table border="1"><tbody><tr><td>1</td></tr></tbody></table>"#
        );
    }

    #[test]
    fn test_image_attributes_are_restricted() {
        let sanitizer = HtmlSanitizer::new();
        assert_eq!(
            sanitizer.sanitize_html(r#"<img src="a.png" width="10" alt="Diagram" onerror="x()">"#),
            r#"<img src="a.png" alt="Diagram">"#
        );
    }

    #[test]
    fn test_attribute_order_is_preserved() {
        let sanitizer = HtmlSanitizer::new();
        assert_eq!(
            sanitizer.sanitize_html(r#"<div style="color:red" id="intro" class="note">Hi</div>"#),
            r#"<div style="color:red" id="intro" class="note">Hi</div>"#
        );
    }

    #[test]
    fn test_comments_dropped_and_text_escaped() {
        let sanitizer = HtmlSanitizer::new();
        assert_eq!(
            sanitizer.sanitize_html("<!-- internal --><p>1 &lt; 2 &amp; 3</p>"),
            "<p>1 &lt; 2 &amp; 3</p>"
        );
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(HtmlSanitizer::new().sanitize_html(""), "");
    }
}
