//! Markdown to safe HTML.
//!
//! Entry bodies are untrusted user input and the output of [`render`] is
//! inserted into pages without further escaping, so every step below runs on
//! every call:
//!
//! 1. parse Markdown and syntax-highlight code blocks,
//! 2. sanitize the resulting HTML against a fixed allow-list,
//! 3. turn bare URLs and e-mail addresses left in text into links.

use ammonia::{Builder, UrlRelative};
use linkify::{LinkFinder, LinkKind};
use maud::{html, PreEscaped};
use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use quick_xml::escape::unescape_with;
use quick_xml::events::Event as XmlEvent;
use quick_xml::reader::Reader as XmlReader;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use syntect::highlighting::ThemeSet;
use syntect::html::{css_for_theme_with_class_style, ClassStyle, ClassedHTMLGenerator};
use syntect::parsing::SyntaxSet;
use syntect::util::LinesWithEndings;
use tracing::warn;

/// Prefix for highlighting classes, keeps them clear of the page stylesheet
const CLASS_STYLE: ClassStyle = ClassStyle::SpacedPrefixed { prefix: "hl-" };

const HIGHLIGHT_THEME: &str = "InspiredGitHub";

const ALLOWED_TAGS: &[&str] = &[
    "p", "br", "hr", "pre", "code", "blockquote", "ul", "ol", "li", "em", "strong", "del", "s",
    "sup", "sub", "h1", "h2", "h3", "h4", "table", "thead", "tbody", "tr", "th", "td", "a", "div",
    "span", "input",
];

const ALLOWED_SCHEMES: &[&str] = &["http", "https", "mailto"];

static SYNTAXES: OnceLock<SyntaxSet> = OnceLock::new();
static HIGHLIGHT_CSS: OnceLock<String> = OnceLock::new();

fn syntax_set() -> &'static SyntaxSet {
    SYNTAXES.get_or_init(SyntaxSet::load_defaults_newlines)
}

/// Stylesheet for the `hl-` classes emitted in code blocks (cached)
pub fn highlight_css() -> &'static str {
    HIGHLIGHT_CSS.get_or_init(|| {
        let themes = ThemeSet::load_defaults();
        themes
            .themes
            .get(HIGHLIGHT_THEME)
            .or_else(|| themes.themes.values().next())
            .and_then(|theme| css_for_theme_with_class_style(theme, CLASS_STYLE).ok())
            .unwrap_or_default()
    })
}

/// Render untrusted Markdown to HTML that is safe to embed as-is.
///
/// Never fails: if highlighting breaks down the input is shown escaped.
pub fn render(raw: &str) -> String {
    let parsed = match markdown_to_html(raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "Markdown rendering failed, falling back to plain text");
            return fallback_html(raw);
        }
    };

    let clean = sanitize(&parsed);
    match linkify_html(&clean) {
        Ok(linked) => linked,
        Err(e) => {
            warn!(error = %e, "Auto-linking failed, keeping sanitized HTML");
            clean
        }
    }
}

/// The raw input as escaped text in a single paragraph
fn fallback_html(raw: &str) -> String {
    html! { p { (raw) } }.into_string()
}

fn parser_options() -> Options {
    let mut opts = Options::empty();
    opts.insert(Options::ENABLE_TABLES);
    opts.insert(Options::ENABLE_STRIKETHROUGH);
    opts.insert(Options::ENABLE_TASKLISTS);
    opts.insert(Options::ENABLE_SUPERSCRIPT);
    opts
}

/// Parse Markdown to raw (unsanitized) HTML, replacing code blocks with
/// highlighted markup
fn markdown_to_html(raw: &str) -> Result<String, syntect::Error> {
    let mut events = Vec::new();
    let mut code: Option<(Option<String>, String)> = None;

    for event in Parser::new_ext(raw, parser_options()) {
        match event {
            Event::Start(Tag::CodeBlock(kind)) => {
                let lang = match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split(|c: char| c.is_whitespace() || c == ',')
                        .next()
                        .filter(|token| !token.is_empty())
                        .map(str::to_string),
                    CodeBlockKind::Indented => None,
                };
                code = Some((lang, String::new()));
            }
            Event::Text(text) if code.is_some() => {
                if let Some((_, source)) = code.as_mut() {
                    source.push_str(&text);
                }
            }
            Event::End(TagEnd::CodeBlock) => {
                if let Some((lang, source)) = code.take() {
                    events.push(Event::Html(highlight_block(lang.as_deref(), &source)?.into()));
                }
            }
            other => events.push(other),
        }
    }

    let mut out = String::with_capacity(raw.len() * 3 / 2);
    pulldown_cmark::html::push_html(&mut out, events.into_iter());
    Ok(out)
}

/// Highlight one code block with a line-number gutter
fn highlight_block(lang: Option<&str>, source: &str) -> Result<String, syntect::Error> {
    let syntaxes = syntax_set();
    let syntax = lang
        .and_then(|token| syntaxes.find_syntax_by_token(token))
        .unwrap_or_else(|| syntaxes.find_syntax_plain_text());

    let mut generator = ClassedHTMLGenerator::new_with_class_style(syntax, syntaxes, CLASS_STYLE);
    for line in LinesWithEndings::from(source) {
        generator.parse_html_for_line_which_includes_newline(line)?;
    }
    let highlighted = generator.finalize();

    let line_count = source.lines().count().max(1);
    let gutter = (1..=line_count)
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    let lang_class = lang.map(|token| format!("language-{token}"));

    Ok(html! {
        div.codehilite {
            pre.linenos { (gutter) }
            pre { code class=[lang_class] { (PreEscaped(highlighted)) } }
        }
    }
    .into_string())
}

fn sanitizer() -> Builder<'static> {
    let text_attrs: HashSet<&str> = ["class"].into_iter().collect();
    let tag_attributes: HashMap<&str, HashSet<&str>> = HashMap::from([
        ("a", ["href", "title", "rel"].into_iter().collect()),
        ("input", ["type", "checked", "disabled"].into_iter().collect()),
        ("code", text_attrs.clone()),
        ("span", text_attrs.clone()),
        ("pre", text_attrs.clone()),
        ("div", text_attrs),
    ]);

    let mut builder = Builder::empty();
    builder
        .tags(ALLOWED_TAGS.iter().copied().collect())
        .tag_attributes(tag_attributes)
        .url_schemes(ALLOWED_SCHEMES.iter().copied().collect())
        .url_relative(UrlRelative::PassThrough)
        .link_rel(None)
        .clean_content_tags(["script", "style"].into_iter().collect())
        .strip_comments(true)
        .attribute_filter(|element, attribute, value| {
            // Only task-list checkboxes may become form controls
            if element == "input" && attribute == "type" && value != "checkbox" {
                return None;
            }
            Some(Cow::Borrowed(value))
        });
    builder
}

/// Strip everything not on the allow-list. Idempotent.
pub fn sanitize(html: &str) -> String {
    sanitizer().clean(html).to_string()
}

/// Wrap bare URLs and e-mail addresses found in the text nodes of sanitized
/// HTML in anchors. Text inside `a`, `pre` and `code` is left untouched.
///
/// Text is decoded before links are looked for and escaped again on the way
/// out, the same way the sanitizer serializes it, so the result is stable
/// under [`sanitize`].
fn linkify_html(html: &str) -> anyhow::Result<String> {
    let mut finder = LinkFinder::new();
    finder.kinds(&[LinkKind::Url, LinkKind::Email]);

    let mut reader = XmlReader::from_str(html);
    let config = reader.config_mut();
    config.trim_text(false);
    // Void elements such as <br> and <input> are never closed
    config.check_end_names = false;

    let mut out = String::with_capacity(html.len());
    let mut text = String::new();
    let mut skip_depth = 0usize;

    loop {
        let event = reader.read_event()?;
        if !matches!(event, XmlEvent::Text(_) | XmlEvent::GeneralRef(_)) {
            flush_text(&finder, &mut text, skip_depth == 0, &mut out);
        }

        match event {
            XmlEvent::Start(e) => {
                if keeps_text_verbatim(e.local_name().as_ref()) {
                    skip_depth += 1;
                }
                out.push('<');
                out.push_str(&String::from_utf8_lossy(&e));
                out.push('>');
            }
            XmlEvent::End(e) => {
                if keeps_text_verbatim(e.local_name().as_ref()) {
                    skip_depth = skip_depth.saturating_sub(1);
                }
                out.push_str("</");
                out.push_str(&String::from_utf8_lossy(e.name().as_ref()));
                out.push('>');
            }
            XmlEvent::Empty(e) => {
                out.push('<');
                out.push_str(&String::from_utf8_lossy(&e));
                out.push_str("/>");
            }
            XmlEvent::Text(e) => {
                let decoded = e.decode()?;
                text.push_str(&unescape_with(&decoded, html_entity)?);
            }
            XmlEvent::GeneralRef(e) => {
                let name = e.decode()?;
                let resolved = html_entity(&name)
                    .ok_or_else(|| anyhow::anyhow!("Unknown entity &{name};"))?;
                text.push_str(resolved);
            }
            XmlEvent::Eof => break,
            other => anyhow::bail!("Unexpected markup in sanitized HTML: {other:?}"),
        }
    }

    Ok(out)
}

fn keeps_text_verbatim(name: &[u8]) -> bool {
    matches!(name, b"a" | b"pre" | b"code")
}

/// Entities the sanitizer's serializer emits
fn html_entity(name: &str) -> Option<&'static str> {
    match name {
        "amp" => Some("&"),
        "lt" => Some("<"),
        "gt" => Some(">"),
        "quot" => Some("\""),
        "apos" => Some("'"),
        "nbsp" => Some("\u{a0}"),
        _ => None,
    }
}

fn flush_text(finder: &LinkFinder, text: &mut String, linkify: bool, out: &mut String) {
    if text.is_empty() {
        return;
    }
    if linkify {
        push_linkified(finder, text, out);
    } else {
        escape_text(text, out);
    }
    text.clear();
}

fn push_linkified(finder: &LinkFinder, text: &str, out: &mut String) {
    for span in finder.spans(text) {
        let found = span.as_str();
        match span.kind() {
            Some(LinkKind::Url) if is_web_url(found) => {
                // A URL ends at whitespace, non-breaking spaces included
                let end = found.find(char::is_whitespace).unwrap_or(found.len());
                let (url, rest) = found.split_at(end);
                push_anchor(url, url, out);
                escape_text(rest, out);
            }
            Some(LinkKind::Email) => push_anchor(&format!("mailto:{found}"), found, out),
            _ => escape_text(found, out),
        }
    }
}

fn push_anchor(href: &str, label: &str, out: &mut String) {
    out.push_str("<a href=\"");
    escape_attribute(href, out);
    out.push_str("\" rel=\"nofollow\">");
    escape_text(label, out);
    out.push_str("</a>");
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

fn is_web_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
