//! Markup stripping and script reconciliation.

use std::sync::OnceLock;

use ego_tree::NodeRef;
use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html};
use unicode_normalization::UnicodeNormalization;

/// Whether the text carries tags or character references worth parsing.
fn looks_like_markup(text: &str) -> bool {
    static MARKUP: OnceLock<Option<Regex>> = OnceLock::new();
    MARKUP
        .get_or_init(|| Regex::new(r"<[A-Za-z/!]|&(?:#[0-9]+|#[xX][0-9A-Fa-f]+|[A-Za-z]+);").ok())
        .as_ref()
        .map_or(true, |re| re.is_match(text))
}

/// Strips tags, decodes entities and drops script/style content.
///
/// Block elements become line breaks; text already free of markup only has its
/// whitespace collapsed, which keeps the stage idempotent.
pub(crate) fn strip_markup(raw: &str) -> String {
    if !looks_like_markup(raw) {
        return raw.to_string();
    }
    let fragment = Html::parse_fragment(raw);
    let mut out = TextBuilder::default();
    for child in fragment.root_element().children() {
        visit_node(child, &mut out);
    }
    out.text
}

fn visit_node(node: NodeRef<'_, Node>, out: &mut TextBuilder) {
    match node.value() {
        Node::Text(text) => out.push_text(text),
        Node::Element(_) => {
            if let Some(element) = ElementRef::wrap(node) {
                visit_element(element, out);
            }
        }
        _ => {
            for child in node.children() {
                visit_node(child, out);
            }
        }
    }
}

fn visit_element(element: ElementRef<'_>, out: &mut TextBuilder) {
    match element.value().name() {
        "script" | "style" | "noscript" | "template" | "iframe" => {}
        "br" | "hr" => out.line_break(),
        "p" | "div" | "section" | "article" | "header" | "footer" | "ul" | "ol" | "li" | "table"
        | "tr" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "blockquote" | "dl" | "dt" | "dd" => {
            out.line_break();
            for child in element.children() {
                visit_node(child, out);
            }
            out.line_break();
        }
        _ => {
            for child in element.children() {
                visit_node(child, out);
            }
        }
    }
}

#[derive(Default)]
struct TextBuilder {
    text: String,
}

impl TextBuilder {
    fn push_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    fn line_break(&mut self) {
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
    }
}

/// Collapses runs of whitespace to one space and trims.
pub(crate) fn collapse_inline(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Like [`collapse_inline`] per line, dropping empty lines.
pub(crate) fn collapse_lines(text: &str) -> String {
    text.lines()
        .map(collapse_inline)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_arabic(ch: char) -> bool {
    matches!(ch,
        '\u{0600}'..='\u{06FF}'
        | '\u{0750}'..='\u{077F}'
        | '\u{08A0}'..='\u{08FF}'
        | '\u{FB50}'..='\u{FDFF}'
        | '\u{FE70}'..='\u{FEFF}')
        && ch.is_alphabetic()
}

fn is_invisible_mark(ch: char) -> bool {
    matches!(ch,
        '\u{0640}'
        | '\u{061C}'
        | '\u{200B}'..='\u{200F}'
        | '\u{202A}'..='\u{202E}'
        | '\u{2066}'..='\u{2069}'
        | '\u{FEFF}')
}

fn map_arabic_char(ch: char) -> char {
    match ch {
        '\u{0660}'..='\u{0669}' => char::from(b'0' + (ch as u32 - 0x0660) as u8),
        '\u{06F0}'..='\u{06F9}' => char::from(b'0' + (ch as u32 - 0x06F0) as u8),
        '\u{060C}' | '\u{066C}' => ',',
        '\u{061B}' => ';',
        '\u{061F}' => '?',
        '\u{066B}' => '.',
        '\u{066A}' => '%',
        other => other,
    }
}

/// NFC, Arabic digits and punctuation to their Latin forms, invisible marks
/// removed, and spacing fixed where Arabic and Latin runs meet.
pub(crate) fn reconcile_script(text: &str) -> String {
    let mapped: Vec<char> = text
        .nfc()
        .filter(|ch| !is_invisible_mark(*ch))
        .map(map_arabic_char)
        .collect();

    let mut out = String::with_capacity(text.len());
    for (i, &ch) in mapped.iter().enumerate() {
        if matches!(ch, ',' | ';' | '?' | '!' | ':' | '%') {
            while out.ends_with(' ') {
                out.pop();
            }
        }
        if let Some(prev) = out.chars().next_back() {
            let script_switch = (is_arabic(prev) && ch.is_ascii_alphanumeric())
                || (prev.is_ascii_alphanumeric() && is_arabic(ch));
            let after_separator = matches!(prev, ',' | ';') && ch.is_alphabetic();
            if script_switch || after_separator {
                out.push(' ');
            }
        }
        // Spaces that would land before punctuation are dropped when it arrives.
        if ch == ' ' && i + 1 < mapped.len() && matches!(mapped[i + 1], ',' | ';' | '?' | '!' | ':' | '%') {
            continue;
        }
        out.push(ch);
    }
    out
}

/// Full text cleanup for a single-line field.
pub(crate) fn clean_inline(raw: &str) -> String {
    collapse_inline(&reconcile_script(&strip_markup(raw)))
}

/// Full text cleanup for a multi-line field such as a description.
pub(crate) fn clean_block(raw: &str) -> String {
    collapse_lines(&reconcile_script(&strip_markup(raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_decodes_entities() {
        let html = "<div><p>Build &amp; ship</p><script>track()</script><ul><li>Rust</li><li>SQL</li></ul></div>";
        assert_eq!(clean_block(html), "Build & ship\nRust\nSQL");
    }

    #[test]
    fn plain_text_with_angle_brackets_is_left_alone() {
        assert_eq!(clean_inline("salary < 5000 & bonus"), "salary < 5000 & bonus");
    }

    #[test]
    fn arabic_digits_and_punctuation_become_latin() {
        assert_eq!(clean_inline("٨٬٠٠٠ جنيه"), "8,000 جنيه");
        assert_eq!(clean_inline("القاهرة، مصر"), "القاهرة, مصر");
        assert_eq!(clean_inline("هل أنت مستعد ؟"), "هل أنت مستعد?");
    }

    #[test]
    fn tatweel_and_bidi_marks_are_removed() {
        assert_eq!(clean_inline("مـــطور\u{200F} Python"), "مطور Python");
    }

    #[test]
    fn mixed_script_runs_are_spaced() {
        assert_eq!(clean_inline("مطورPython"), "مطور Python");
        assert_eq!(clean_inline("5000جنيه"), "5000 جنيه");
    }

    #[test]
    fn cleaning_is_idempotent() {
        let inputs = [
            "  SENIOR  Python Developer ",
            "<p>مطور&nbsp;Backend</p>",
            "Cairo ، Egypt",
            "<ul><li>one</li><li>two</li></ul>",
        ];
        for input in inputs {
            let once = clean_block(input);
            assert_eq!(clean_block(&once), once, "input {input:?}");
        }
    }
}
