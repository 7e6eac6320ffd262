//! # render: rich-text markup to document blocks
//!
//! The walk is tree-structured over the parsed markup. Block-level elements
//! flush any pending inline run into a paragraph before emitting their own
//! block; inline elements accumulate into the run, with whitespace collapsed
//! across sibling boundaries.
//!
//! Elements are classified into [`ElementKind`] and dispatched through
//! [`handler`]. Kinds without a dedicated handler contribute the plain text of
//! their subtree. If the walk fails, or yields nothing for a body that has
//! text, [`render_body`] falls back to stripping markup and emitting a single
//! paragraph. Malformed input therefore never fails a document.
//!
//! Submodules:
//! - [`document`]: assembles per-item documents and the merged bundle
//! - [`pdf`]: lays documents out as PDF

pub mod document;
pub mod pdf;

use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node};
use tracing::{debug, warn};

use crate::error::RenderError;

/// Nesting beyond this is treated as a failed walk.
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Style {
    pub bold: bool,
    pub italic: bool,
    pub mono: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inline {
    Text { text: String, style: Style },
    Link { text: String, href: String },
    LineBreak,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    External(String),
    /// An anchor inside the same document.
    Internal(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Heading {
        level: u8,
        text: String,
        anchor: Option<String>,
    },
    Paragraph(Vec<Inline>),
    List {
        ordered: bool,
        /// Number of the first item, for ordered lists split by nesting.
        start: usize,
        /// Nesting depth, 0 for top level.
        level: u8,
        items: Vec<Vec<Inline>>,
    },
    CodeBlock(String),
    Blockquote(Vec<Inline>),
    Link {
        text: String,
        target: LinkTarget,
    },
    Image {
        target: String,
        alt: String,
    },
    Table {
        header: bool,
        rows: Vec<Vec<String>>,
    },
    Rule,
    PageBreak,
}

/// Concatenated text of an inline run.
pub fn plain_text(inlines: &[Inline]) -> String {
    let mut out = String::new();
    for inline in inlines {
        match inline {
            Inline::Text { text, .. } | Inline::Link { text, .. } => out.push_str(text),
            Inline::LineBreak => out.push('\n'),
        }
    }
    out
}

/// Map text onto what the builtin PDF fonts can draw: typographic punctuation
/// becomes ASCII, control characters go, anything outside Latin-1 becomes `?`.
pub fn escape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{2032}' => out.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{2033}' => out.push('"'),
            '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2212}' => out.push('-'),
            '\u{2014}' | '\u{2015}' => out.push_str("--"),
            '\u{2026}' => out.push_str("..."),
            '\u{2022}' | '\u{25CF}' | '\u{25E6}' => out.push('*'),
            '\u{00A0}' | '\u{2002}' | '\u{2003}' | '\u{2009}' | '\u{202F}' => out.push(' '),
            '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}' => {}
            '\n' | '\t' | '\r' => out.push(c),
            c if c.is_control() => {}
            c if (c as u32) < 0x100 => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

/// Escape and collapse all whitespace runs to single spaces.
pub fn clean_text(raw: &str) -> String {
    escape_text(raw).split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Heading(u8),
    Paragraph,
    /// Block-level grouping with no semantics of its own.
    Container,
    List { ordered: bool },
    Preformatted,
    Blockquote,
    Anchor,
    Image,
    Table,
    Rule,
    LineBreak,
    Emphasis,
    Strong,
    Code,
    /// Inline grouping with no semantics of its own.
    Span,
    /// Never rendered.
    Dropped,
    Unknown,
}

pub fn classify(tag: &str) -> ElementKind {
    match tag {
        "h1" => ElementKind::Heading(1),
        "h2" => ElementKind::Heading(2),
        "h3" => ElementKind::Heading(3),
        "h4" => ElementKind::Heading(4),
        "h5" => ElementKind::Heading(5),
        "h6" => ElementKind::Heading(6),
        "p" => ElementKind::Paragraph,
        "html" | "body" | "div" | "section" | "article" | "main" | "header" | "footer"
        | "aside" | "nav" | "figure" | "figcaption" | "details" | "summary" | "center"
        | "dl" | "dt" | "dd" | "address" => ElementKind::Container,
        "ul" | "menu" => ElementKind::List { ordered: false },
        "ol" => ElementKind::List { ordered: true },
        "pre" => ElementKind::Preformatted,
        "blockquote" => ElementKind::Blockquote,
        "a" => ElementKind::Anchor,
        "img" => ElementKind::Image,
        "table" => ElementKind::Table,
        "hr" => ElementKind::Rule,
        "br" => ElementKind::LineBreak,
        "em" | "i" | "cite" | "var" => ElementKind::Emphasis,
        "strong" | "b" => ElementKind::Strong,
        "code" | "kbd" | "samp" | "tt" => ElementKind::Code,
        "span" | "u" | "s" | "sup" | "sub" | "small" | "mark" | "abbr" | "font" | "label"
        | "time" | "del" | "ins" | "q" => ElementKind::Span,
        "script" | "style" | "head" | "noscript" | "template" | "link" | "meta" | "title"
        | "iframe" | "object" | "embed" | "video" | "audio" | "source" | "input" | "button"
        | "select" | "textarea" => ElementKind::Dropped,
        _ => ElementKind::Unknown,
    }
}

pub type Handler = fn(&mut Walker, ElementRef<'_>, ElementKind) -> Result<(), RenderError>;

pub fn handler(kind: ElementKind) -> Handler {
    match kind {
        ElementKind::Heading(_) => handle_heading as Handler,
        ElementKind::Paragraph | ElementKind::Container => handle_block_container,
        ElementKind::List { .. } => handle_list,
        ElementKind::Preformatted => handle_preformatted,
        ElementKind::Blockquote => handle_blockquote,
        ElementKind::Anchor => handle_anchor,
        ElementKind::Image => handle_image,
        ElementKind::Table => handle_table,
        ElementKind::Rule => handle_rule,
        ElementKind::LineBreak => handle_line_break,
        ElementKind::Emphasis | ElementKind::Strong | ElementKind::Code | ElementKind::Span => {
            handle_inline
        }
        ElementKind::Dropped => handle_dropped,
        ElementKind::Unknown => handle_unknown,
    }
}

/// Pending inline content, with whitespace collapsed across pushes.
#[derive(Debug, Default)]
struct InlineRun {
    items: Vec<Inline>,
    pending_space: bool,
}

impl InlineRun {
    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn ends_with_space(&self) -> bool {
        match self.items.last() {
            Some(Inline::Text { text, .. }) | Some(Inline::Link { text, .. }) => {
                text.ends_with(' ')
            }
            Some(Inline::LineBreak) | None => true,
        }
    }

    /// Leading separator for the next piece of text, if one is due.
    fn separator(&mut self, leading_ws: bool) -> &'static str {
        let due = (leading_ws || self.pending_space) && !self.ends_with_space();
        self.pending_space = false;
        if due {
            " "
        } else {
            ""
        }
    }

    fn push_text(&mut self, raw: &str, style: Style) {
        let escaped = escape_text(raw);
        let collapsed = escaped.split_whitespace().collect::<Vec<_>>().join(" ");
        let leading = escaped.starts_with(char::is_whitespace);
        let trailing = escaped.ends_with(char::is_whitespace);
        if collapsed.is_empty() {
            if !escaped.is_empty() && !self.is_empty() {
                self.pending_space = true;
            }
            return;
        }
        let text = format!("{}{}", self.separator(leading), collapsed);
        match self.items.last_mut() {
            Some(Inline::Text { text: last, style: s }) if *s == style => last.push_str(&text),
            _ => self.items.push(Inline::Text { text, style }),
        }
        self.pending_space = trailing;
    }

    fn push_link(&mut self, raw: &str, href: &str) {
        let escaped = escape_text(raw);
        let collapsed = escaped.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            return;
        }
        let separator = self.separator(escaped.starts_with(char::is_whitespace));
        if !separator.is_empty() {
            self.items.push(Inline::Text {
                text: separator.to_string(),
                style: Style::default(),
            });
        }
        self.items.push(Inline::Link {
            text: collapsed,
            href: href.to_string(),
        });
        self.pending_space = escaped.ends_with(char::is_whitespace);
    }

    fn line_break(&mut self) {
        if !self.is_empty() {
            self.items.push(Inline::LineBreak);
        }
        self.pending_space = false;
    }

    /// Take the run, trimmed at both ends.
    fn take(&mut self) -> Vec<Inline> {
        let mut items = std::mem::take(&mut self.items);
        self.pending_space = false;
        while matches!(items.last(), Some(Inline::LineBreak)) {
            items.pop();
        }
        if let Some(Inline::Text { text, .. }) = items.first_mut() {
            *text = text.trim_start().to_string();
        }
        if let Some(Inline::Text { text, .. }) = items.last_mut() {
            *text = text.trim_end().to_string();
        }
        items.retain(|i| !matches!(i, Inline::Text { text, .. } if text.is_empty()));
        items
    }
}

pub struct Walker {
    blocks: Vec<Block>,
    run: InlineRun,
    style: Style,
    depth: usize,
    list_level: u8,
}

impl Walker {
    fn new() -> Self {
        Self {
            blocks: Vec::new(),
            run: InlineRun::default(),
            style: Style::default(),
            depth: 0,
            list_level: 0,
        }
    }

    /// A walker for a subtree, inheriting depth and style.
    fn nested(&self) -> Self {
        Self {
            blocks: Vec::new(),
            run: InlineRun::default(),
            style: self.style,
            depth: self.depth,
            list_level: self.list_level,
        }
    }

    fn flush(&mut self) {
        let inlines = self.run.take();
        if !inlines.is_empty() {
            self.blocks.push(Block::Paragraph(inlines));
        }
    }

    fn finish(mut self) -> Vec<Block> {
        self.flush();
        self.blocks
    }

    fn element(&mut self, el: ElementRef<'_>) -> Result<(), RenderError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(RenderError::TooDeep { limit: MAX_DEPTH });
        }
        let kind = classify(el.value().name());
        let result = handler(kind)(self, el, kind);
        self.depth -= 1;
        result
    }

    fn children(&mut self, el: ElementRef<'_>) -> Result<(), RenderError> {
        for child in el.children() {
            match child.value() {
                Node::Text(text) => self.run.push_text(text, self.style),
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        self.element(child_el)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Walk `el` in a nested walker and merge everything it produced into one run.
    fn collect_inlines(&self, el: ElementRef<'_>) -> Result<(Vec<Inline>, Vec<Block>), RenderError> {
        let mut sub = self.nested();
        sub.children(el)?;
        let mut inlines = Vec::new();
        let mut nested_blocks = Vec::new();
        for block in sub.finish() {
            match block {
                Block::Paragraph(run) => {
                    if !inlines.is_empty() {
                        inlines.push(Inline::LineBreak);
                    }
                    inlines.extend(run);
                }
                other => nested_blocks.push(other),
            }
        }
        Ok((inlines, nested_blocks))
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    clean_text(&el.text().collect::<Vec<_>>().join(" "))
}

fn handle_block_container(w: &mut Walker, el: ElementRef<'_>, _: ElementKind) -> Result<(), RenderError> {
    w.flush();
    w.children(el)?;
    w.flush();
    Ok(())
}

fn handle_heading(w: &mut Walker, el: ElementRef<'_>, kind: ElementKind) -> Result<(), RenderError> {
    w.flush();
    let level = match kind {
        ElementKind::Heading(level) => level,
        _ => 1,
    };
    let text = element_text(el);
    if !text.is_empty() {
        w.blocks.push(Block::Heading {
            level,
            text,
            anchor: None,
        });
    }
    Ok(())
}

fn handle_list(w: &mut Walker, el: ElementRef<'_>, kind: ElementKind) -> Result<(), RenderError> {
    w.flush();
    let ordered = matches!(kind, ElementKind::List { ordered: true });
    let level = w.list_level;
    let mut start = 1;
    let mut items: Vec<Vec<Inline>> = Vec::new();

    w.list_level = w.list_level.saturating_add(1);
    for child in el.children().filter_map(ElementRef::wrap) {
        if child.value().name() != "li" {
            continue;
        }
        let (inlines, nested) = w.collect_inlines(child)?;
        if !inlines.is_empty() {
            items.push(inlines);
        }
        if !nested.is_empty() {
            // A nested block splits the list so document order is kept.
            let count = items.len();
            if count > 0 {
                w.blocks.push(Block::List {
                    ordered,
                    start,
                    level,
                    items: std::mem::take(&mut items),
                });
            }
            start += count;
            w.blocks.extend(nested);
        }
    }
    w.list_level = level;

    if !items.is_empty() {
        w.blocks.push(Block::List {
            ordered,
            start,
            level,
            items,
        });
    }
    Ok(())
}

fn handle_preformatted(w: &mut Walker, el: ElementRef<'_>, _: ElementKind) -> Result<(), RenderError> {
    w.flush();
    let raw: String = el.text().collect();
    let code = escape_text(&raw).replace('\t', "    ");
    let code = code.trim_matches('\n').to_string();
    if !code.trim().is_empty() {
        w.blocks.push(Block::CodeBlock(code));
    }
    Ok(())
}

fn handle_blockquote(w: &mut Walker, el: ElementRef<'_>, _: ElementKind) -> Result<(), RenderError> {
    w.flush();
    let (inlines, nested) = w.collect_inlines(el)?;
    if !inlines.is_empty() {
        w.blocks.push(Block::Blockquote(inlines));
    }
    w.blocks.extend(nested);
    Ok(())
}

fn handle_anchor(w: &mut Walker, el: ElementRef<'_>, _: ElementKind) -> Result<(), RenderError> {
    let text: String = el.text().collect::<Vec<_>>().join(" ");
    match el.value().attr("href").filter(|h| !h.trim().is_empty()) {
        Some(href) if !href.starts_with("javascript:") => {
            let label = if text.trim().is_empty() { href } else { text.as_str() };
            w.run.push_link(label, href.trim());
        }
        _ => w.children(el)?,
    }
    Ok(())
}

fn handle_image(w: &mut Walker, el: ElementRef<'_>, _: ElementKind) -> Result<(), RenderError> {
    let Some(src) = el.value().attr("src").filter(|s| !s.trim().is_empty()) else {
        return Ok(());
    };
    w.flush();
    w.blocks.push(Block::Image {
        target: src.trim().to_string(),
        alt: clean_text(el.value().attr("alt").unwrap_or_default()),
    });
    Ok(())
}

fn handle_table(w: &mut Walker, el: ElementRef<'_>, _: ElementKind) -> Result<(), RenderError> {
    w.flush();
    let mut rows = Vec::new();
    let mut header = false;
    for row in el.descendants().filter_map(ElementRef::wrap) {
        if row.value().name() != "tr" {
            continue;
        }
        let cells: Vec<ElementRef<'_>> = row
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|c| matches!(c.value().name(), "td" | "th"))
            .collect();
        if cells.is_empty() {
            continue;
        }
        if rows.is_empty() {
            header = cells.iter().all(|c| c.value().name() == "th");
        }
        rows.push(cells.into_iter().map(element_text).collect());
    }
    if !rows.is_empty() {
        w.blocks.push(Block::Table { header, rows });
    }
    Ok(())
}

fn handle_rule(w: &mut Walker, _: ElementRef<'_>, _: ElementKind) -> Result<(), RenderError> {
    w.flush();
    w.blocks.push(Block::Rule);
    Ok(())
}

fn handle_line_break(w: &mut Walker, _: ElementRef<'_>, _: ElementKind) -> Result<(), RenderError> {
    w.run.line_break();
    Ok(())
}

fn handle_inline(w: &mut Walker, el: ElementRef<'_>, kind: ElementKind) -> Result<(), RenderError> {
    let saved = w.style;
    match kind {
        ElementKind::Emphasis => w.style.italic = true,
        ElementKind::Strong => w.style.bold = true,
        ElementKind::Code => w.style.mono = true,
        _ => {}
    }
    let result = w.children(el);
    w.style = saved;
    result
}

fn handle_dropped(_: &mut Walker, _: ElementRef<'_>, _: ElementKind) -> Result<(), RenderError> {
    Ok(())
}

fn handle_unknown(w: &mut Walker, el: ElementRef<'_>, _: ElementKind) -> Result<(), RenderError> {
    let text: String = el.text().collect::<Vec<_>>().join(" ");
    w.run.push_text(&format!(" {text} "), w.style);
    Ok(())
}

/// Structured walk of `markup`; errors instead of falling back.
pub fn try_render(markup: &str) -> Result<Vec<Block>, RenderError> {
    let fragment = Html::parse_fragment(markup);
    let mut walker = Walker::new();
    walker.children(fragment.root_element())?;
    Ok(walker.finish())
}

fn pattern(cell: &'static OnceLock<Regex>, source: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(source).expect("static regex is valid"))
}

/// Strip all markup and decode the common entities.
pub fn strip_markup(markup: &str) -> String {
    static SCRIPTS: OnceLock<Regex> = OnceLock::new();
    static STYLES: OnceLock<Regex> = OnceLock::new();
    static TAGS: OnceLock<Regex> = OnceLock::new();
    static OPEN_TAIL: OnceLock<Regex> = OnceLock::new();

    let text = pattern(&SCRIPTS, r"(?is)<script\b.*?(</script>|$)").replace_all(markup, " ");
    let text = pattern(&STYLES, r"(?is)<style\b.*?(</style>|$)").replace_all(&text, " ");
    let text = pattern(&TAGS, r"<[^>]*>").replace_all(&text, " ");
    let text = pattern(&OPEN_TAIL, r"<[^>]*$").replace_all(&text, " ");
    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    clean_text(&decoded)
}

/// The plain-text fallback: one paragraph, or nothing when there is no text.
pub fn fallback_blocks(markup: &str) -> Vec<Block> {
    let text = strip_markup(markup);
    if text.is_empty() {
        return Vec::new();
    }
    vec![Block::Paragraph(vec![Inline::Text {
        text,
        style: Style::default(),
    }])]
}

/// Render a rich-text body. Never fails: a failed or empty walk over a body
/// with text falls back to plain text.
pub fn render_body(markup: &str) -> Vec<Block> {
    if markup.trim().is_empty() {
        return Vec::new();
    }
    match try_render(markup) {
        Ok(blocks) if !blocks.is_empty() => blocks,
        Ok(_) => {
            let fallback = fallback_blocks(markup);
            if !fallback.is_empty() {
                debug!("Structured walk produced nothing, using plain text");
            }
            fallback
        }
        Err(e) => {
            warn!(error = %e, "Markup walk failed, using plain text");
            fallback_blocks(markup)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(blocks: &[Block]) -> Vec<String> {
        blocks
            .iter()
            .map(|b| match b {
                Block::Paragraph(run) | Block::Blockquote(run) => plain_text(run),
                Block::Heading { text, .. } => text.clone(),
                Block::CodeBlock(code) => code.clone(),
                other => format!("{other:?}"),
            })
            .collect()
    }

    #[test]
    fn inline_runs_flush_before_block_elements() {
        let blocks = render_body("<p>A <em>B</em> C</p><h2>D</h2>");
        assert_eq!(blocks.len(), 2);
        assert!(matches!(&blocks[0], Block::Paragraph(run) if plain_text(run) == "A B C"));
        assert!(matches!(&blocks[1], Block::Heading { level: 2, text, .. } if text == "D"));
    }

    #[test]
    fn loose_text_before_a_block_becomes_its_own_paragraph() {
        let blocks = render_body("intro <b>bold</b><ul><li>one</li><li>two</li></ul>tail");
        assert_eq!(texts(&blocks)[0], "intro bold");
        assert!(matches!(&blocks[1], Block::List { ordered: false, items, .. } if items.len() == 2));
        assert_eq!(texts(&blocks)[2], "tail");
    }

    #[test]
    fn styles_are_tracked_per_inline() {
        let blocks = render_body("<p>plain <strong>bold</strong> <code>x()</code></p>");
        let Block::Paragraph(run) = &blocks[0] else {
            panic!("expected a paragraph");
        };
        assert!(run.iter().any(|i| matches!(i, Inline::Text { style, text } if style.bold && text.contains("bold"))));
        assert!(run.iter().any(|i| matches!(i, Inline::Text { style, .. } if style.mono)));
    }

    #[test]
    fn links_stay_inline() {
        let blocks = render_body(r#"<p>Read <a href="https://x.example">this</a> now</p>"#);
        let Block::Paragraph(run) = &blocks[0] else {
            panic!("expected a paragraph");
        };
        assert_eq!(plain_text(run), "Read this now");
        assert!(run.iter().any(|i| matches!(i, Inline::Link { href, .. } if href == "https://x.example")));
    }

    #[test]
    fn scripts_and_styles_are_dropped() {
        let blocks = render_body("<style>p{}</style><p>kept</p><script>alert(1)</script>");
        assert_eq!(texts(&blocks), vec!["kept"]);
    }

    #[test]
    fn unknown_elements_contribute_their_text() {
        let blocks = render_body("<p>before <custom-widget>inside <x>deep</x></custom-widget> after</p>");
        assert_eq!(texts(&blocks), vec!["before inside deep after"]);
    }

    #[test]
    fn preformatted_keeps_line_structure() {
        let blocks = render_body("<pre>fn main() {\n    run();\n}</pre>");
        assert_eq!(blocks, vec![Block::CodeBlock("fn main() {\n    run();\n}".into())]);
    }

    #[test]
    fn tables_rules_and_images_are_blocks() {
        let blocks = render_body(
            r#"<table><tr><th>A</th><th>B</th></tr><tr><td>1</td><td>2</td></tr></table><hr><img src="/x.png" alt="pic">"#,
        );
        assert_eq!(
            blocks[0],
            Block::Table {
                header: true,
                rows: vec![vec!["A".into(), "B".into()], vec!["1".into(), "2".into()]],
            }
        );
        assert_eq!(blocks[1], Block::Rule);
        assert!(matches!(&blocks[2], Block::Image { alt, .. } if alt == "pic"));
    }

    #[test]
    fn nested_lists_keep_document_order() {
        let blocks = render_body("<ol><li>one<ul><li>inner</li></ul></li><li>two</li></ol>");
        assert_eq!(blocks.len(), 3);
        assert!(matches!(&blocks[0], Block::List { ordered: true, start: 1, level: 0, .. }));
        assert!(matches!(&blocks[1], Block::List { ordered: false, level: 1, .. }));
        assert!(matches!(&blocks[2], Block::List { ordered: true, start: 2, .. }));
    }

    #[test]
    fn unterminated_tags_still_yield_a_block() {
        let blocks = render_body("<p>Hello <b>world");
        assert!(!blocks.is_empty());
        assert_eq!(texts(&blocks), vec!["Hello world"]);

        assert_eq!(texts(&render_body("<div><span>Broken <a href=")), vec!["Broken"]);
        assert!(!render_body("Broken <").is_empty());
    }

    #[test]
    fn excessive_nesting_falls_back_to_plain_text() {
        let markup = format!("{}deep{}", "<div>".repeat(MAX_DEPTH + 10), "</div>".repeat(MAX_DEPTH + 10));
        assert!(try_render(&markup).is_err());
        assert_eq!(texts(&render_body(&markup)), vec!["deep"]);
    }

    #[test]
    fn escape_maps_typography_and_drops_controls() {
        assert_eq!(escape_text("\u{201C}hi\u{201D} \u{2014} it\u{2019}s\u{0007}"), "\"hi\" -- it's");
        assert_eq!(escape_text("caf\u{e9} \u{4e2d}"), "caf\u{e9} ?");
    }

    #[test]
    fn strip_markup_decodes_entities() {
        assert_eq!(strip_markup("<p>a &amp; b</p><script>x</script>"), "a & b");
    }

    #[test]
    fn empty_bodies_render_nothing() {
        assert!(render_body("   ").is_empty());
        assert!(render_body("<p> </p>").is_empty());
    }
}
