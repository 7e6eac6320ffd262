//! PDF layout of a [`Document`] with printpdf's builtin fonts.
//!
//! Everything is measured in points with the origin at the bottom left. Line
//! breaking uses per-glyph width estimates from the standard Helvetica
//! metrics (Courier is fixed at 0.6 em). Internal links are collected during
//! layout and resolved against anchor positions once every page is known.

use std::collections::HashMap;

use printpdf::{
    Actions, BuiltinFont, Color, Destination, Line, LinePoint, LinkAnnotation, Mm, Op,
    PdfDocument, PdfPage, PdfSaveOptions, Point, Pt, Rect, Rgb, TextItem,
};
use tracing::debug;

use super::document::Document;
use super::{Block, Inline, LinkTarget, Style};
use crate::error::RenderError;

// US Letter.
const PAGE_WIDTH_MM: f32 = 215.9;
const PAGE_HEIGHT_MM: f32 = 279.4;
const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;
const MARGIN: f32 = 56.7;
const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;

const BODY_SIZE: f32 = 11.0;
const CODE_SIZE: f32 = 9.5;
const LEADING: f32 = 1.35;
const INDENT: f32 = 16.0;

type Rgb3 = (f32, f32, f32);
const BLACK: Rgb3 = (0.0, 0.0, 0.0);
const GREY: Rgb3 = (0.35, 0.35, 0.35);
const LINK_BLUE: Rgb3 = (0.1, 0.2, 0.75);

/// Helvetica advance widths for ASCII 32..=126, in 1/1000 em.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // 0..9
    278, 278, 584, 584, 584, 556, 1015, // :..@
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // A..M
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // N..Z
    278, 278, 278, 469, 556, 333, // [..`
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // a..m
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // n..z
    334, 260, 334, 584, // {..~
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Face {
    Regular,
    Bold,
    Italic,
    BoldItalic,
    Mono,
}

impl Face {
    fn from_style(style: Style) -> Self {
        match (style.mono, style.bold, style.italic) {
            (true, _, _) => Face::Mono,
            (false, true, true) => Face::BoldItalic,
            (false, true, false) => Face::Bold,
            (false, false, true) => Face::Italic,
            (false, false, false) => Face::Regular,
        }
    }

    fn builtin(self) -> BuiltinFont {
        match self {
            Face::Regular => BuiltinFont::Helvetica,
            Face::Bold => BuiltinFont::HelveticaBold,
            Face::Italic => BuiltinFont::HelveticaOblique,
            Face::BoldItalic => BuiltinFont::HelveticaBoldOblique,
            Face::Mono => BuiltinFont::Courier,
        }
    }
}

fn char_width(c: char, face: Face, size: f32) -> f32 {
    if face == Face::Mono {
        return 0.6 * size;
    }
    let code = c as u32;
    let base = if (32..=126).contains(&code) {
        HELVETICA_WIDTHS[(code - 32) as usize] as f32
    } else {
        556.0
    };
    let bold = if matches!(face, Face::Bold | Face::BoldItalic) { 1.06 } else { 1.0 };
    base * bold * size / 1000.0
}

fn text_width(text: &str, face: Face, size: f32) -> f32 {
    text.chars().map(|c| char_width(c, face, size)).sum()
}

fn rgb(color: Rgb3) -> Color {
    Color::Rgb(Rgb::new(color.0, color.1, color.2, None))
}

fn link_target(href: &str) -> Option<LinkTarget> {
    let lower = href.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("mailto:") {
        Some(LinkTarget::External(href.to_string()))
    } else {
        None
    }
}

#[derive(Debug, Clone)]
enum Token {
    Word {
        text: String,
        space_before: bool,
        face: Face,
        size: f32,
        color: Rgb3,
        link: Option<LinkTarget>,
    },
    Break,
}

#[derive(Debug, Clone)]
struct Placed {
    x: f32,
    text: String,
    face: Face,
    size: f32,
    color: Rgb3,
    link: Option<LinkTarget>,
}

impl Placed {
    fn width(&self) -> f32 {
        text_width(&self.text, self.face, self.size)
    }
}

#[derive(Debug)]
struct PendingLink {
    page: usize,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    target: LinkTarget,
}

/// Split `text` into word tokens. `space` carries a pending separator across
/// calls so a space at the end of one run separates it from the next.
fn tokens_for(
    text: &str,
    face: Face,
    size: f32,
    color: Rgb3,
    link: Option<LinkTarget>,
    space: &mut bool,
    out: &mut Vec<Token>,
) {
    for (i, word) in text.split(' ').enumerate() {
        if i > 0 {
            *space = true;
        }
        if word.is_empty() {
            continue;
        }
        out.push(Token::Word {
            text: word.to_string(),
            space_before: *space,
            face,
            size,
            color,
            link: link.clone(),
        });
        *space = false;
    }
}

fn inline_tokens(inlines: &[Inline], base: Style, size: f32, color: Rgb3) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut space = false;
    for inline in inlines {
        match inline {
            Inline::Text { text, style } => {
                let merged = Style {
                    bold: style.bold || base.bold,
                    italic: style.italic || base.italic,
                    mono: style.mono || base.mono,
                };
                tokens_for(text, Face::from_style(merged), size, color, None, &mut space, &mut tokens);
            }
            Inline::Link { text, href } => {
                let target = link_target(href);
                let color = if target.is_some() { LINK_BLUE } else { color };
                tokens_for(text, Face::from_style(base), size, color, target, &mut space, &mut tokens);
            }
            Inline::LineBreak => {
                tokens.push(Token::Break);
                space = false;
            }
        }
    }
    tokens
}

/// Greedy word wrap into lines of at most `width` points.
fn wrap_plain(text: &str, face: Face, size: f32, width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        let candidate = if line.is_empty() { word.to_string() } else { format!("{line} {word}") };
        if text_width(&candidate, face, size) <= width || line.is_empty() {
            line = candidate;
        } else {
            lines.push(std::mem::take(&mut line));
            line = word.to_string();
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

struct Layout {
    pages: Vec<Vec<Op>>,
    y: f32,
    fresh: bool,
    anchors: HashMap<String, (usize, f32)>,
    links: Vec<PendingLink>,
    bookmarks: Vec<(String, usize)>,
}

impl Layout {
    fn new() -> Self {
        Self {
            pages: vec![Vec::new()],
            y: PAGE_HEIGHT - MARGIN,
            fresh: true,
            anchors: HashMap::new(),
            links: Vec::new(),
            bookmarks: Vec::new(),
        }
    }

    fn page(&self) -> usize {
        self.pages.len() - 1
    }

    fn new_page(&mut self) {
        self.pages.push(Vec::new());
        self.y = PAGE_HEIGHT - MARGIN;
        self.fresh = true;
    }

    fn page_break(&mut self) {
        if !self.fresh {
            self.new_page();
        }
    }

    fn ensure(&mut self, height: f32) {
        if self.y - height < MARGIN && !self.fresh {
            self.new_page();
        }
    }

    fn gap(&mut self, points: f32) {
        if !self.fresh {
            self.y -= points;
        }
    }

    fn draw_text(&mut self, x: f32, baseline: f32, text: &str, face: Face, size: f32, color: Rgb3) {
        let font = face.builtin();
        let page = self.page();
        self.pages[page].extend([
            Op::StartTextSection,
            Op::SetFillColor { col: rgb(color) },
            Op::SetFontSizeBuiltinFont { size: Pt(size), font },
            Op::SetTextCursor {
                pos: Point {
                    x: Pt(x),
                    y: Pt(baseline),
                },
            },
            Op::WriteTextBuiltinFont {
                items: vec![TextItem::Text(text.to_string())],
                font,
            },
            Op::EndTextSection,
        ]);
        self.fresh = false;
    }

    fn hline(&mut self, x0: f32, x1: f32, y: f32, thickness: f32) {
        let page = self.page();
        self.pages[page].extend([
            Op::SetOutlineColor { col: rgb(GREY) },
            Op::SetOutlineThickness { pt: Pt(thickness) },
            Op::DrawLine {
                line: Line {
                    points: vec![
                        LinePoint {
                            p: Point { x: Pt(x0), y: Pt(y) },
                            bezier: false,
                        },
                        LinePoint {
                            p: Point { x: Pt(x1), y: Pt(y) },
                            bezier: false,
                        },
                    ],
                    is_closed: false,
                },
            },
        ]);
        self.fresh = false;
    }

    fn emit_line(&mut self, line: Vec<Placed>, left: f32) {
        let size = line.iter().map(|p| p.size).fold(BODY_SIZE * 0.5, f32::max);
        let height = size * LEADING;
        self.ensure(height);
        let baseline = self.y - size;
        for placed in line {
            let x = left + placed.x;
            if let Some(target) = placed.link.clone() {
                self.links.push(PendingLink {
                    page: self.page(),
                    x,
                    y: baseline - placed.size * 0.25,
                    width: placed.width(),
                    height: placed.size * 1.1,
                    target,
                });
            }
            self.draw_text(x, baseline, &placed.text, placed.face, placed.size, placed.color);
        }
        self.y -= height;
    }

    /// Lay out tokens as wrapped lines starting `indent` points in.
    fn flow(&mut self, tokens: Vec<Token>, indent: f32) {
        let width = (CONTENT_WIDTH - indent).max(72.0);
        let left = MARGIN + indent;
        let mut line: Vec<Placed> = Vec::new();
        let mut x = 0.0f32;

        for token in tokens {
            let (text, space_before, face, size, color, link) = match token {
                Token::Break => {
                    self.emit_line(std::mem::take(&mut line), left);
                    x = 0.0;
                    continue;
                }
                Token::Word {
                    text,
                    space_before,
                    face,
                    size,
                    color,
                    link,
                } => (text, space_before, face, size, color, link),
            };
            let word_width = text_width(&text, face, size);
            let mut space = if space_before && !line.is_empty() {
                char_width(' ', face, size)
            } else {
                0.0
            };
            if x + space + word_width > width && !line.is_empty() {
                self.emit_line(std::mem::take(&mut line), left);
                x = 0.0;
                space = 0.0;
            }
            match line.last_mut() {
                Some(prev)
                    if space > 0.0
                        && prev.face == face
                        && prev.size == size
                        && prev.color == color
                        && prev.link == link =>
                {
                    prev.text.push(' ');
                    prev.text.push_str(&text);
                }
                _ => line.push(Placed {
                    x: x + space,
                    text,
                    face,
                    size,
                    color,
                    link,
                }),
            }
            x += space + word_width;
        }
        if !line.is_empty() {
            self.emit_line(line, left);
        }
    }

    fn heading(&mut self, level: u8, text: &str, anchor: Option<&str>) {
        let size = match level {
            1 => 20.0,
            2 => 16.0,
            3 => 14.0,
            _ => 12.0,
        };
        self.gap(size * 0.6);
        self.ensure(size * LEADING * 2.0);
        if let Some(anchor) = anchor {
            self.anchors.insert(anchor.to_string(), (self.page(), self.y));
            self.bookmarks.push((text.to_string(), self.page()));
        }
        let mut tokens = Vec::new();
        tokens_for(text, Face::Bold, size, BLACK, None, &mut false, &mut tokens);
        self.flow(tokens, 0.0);
        self.y -= size * 0.2;
    }

    fn code(&mut self, code: &str) {
        self.gap(4.0);
        let per_line = ((CONTENT_WIDTH - INDENT) / (0.6 * CODE_SIZE)).floor().max(8.0) as usize;
        for raw in code.lines() {
            let chars: Vec<char> = raw.chars().collect();
            let chunks: Vec<String> = if chars.is_empty() {
                vec![String::new()]
            } else {
                chars.chunks(per_line).map(|c| c.iter().collect()).collect()
            };
            for chunk in chunks {
                let height = CODE_SIZE * LEADING;
                self.ensure(height);
                if !chunk.trim().is_empty() {
                    let baseline = self.y - CODE_SIZE;
                    self.draw_text(MARGIN + INDENT, baseline, &chunk, Face::Mono, CODE_SIZE, BLACK);
                }
                self.y -= height;
                self.fresh = false;
            }
        }
        self.gap(4.0);
    }

    fn table(&mut self, header: bool, rows: &[Vec<String>]) {
        let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
        if columns == 0 {
            return;
        }
        self.gap(6.0);
        let size = BODY_SIZE - 1.0;
        let col_width = CONTENT_WIDTH / columns as f32;
        let line_height = size * LEADING;
        for (r, row) in rows.iter().enumerate() {
            let face = if header && r == 0 { Face::Bold } else { Face::Regular };
            let cells: Vec<Vec<String>> = (0..columns)
                .map(|c| {
                    let text = row.get(c).map(String::as_str).unwrap_or_default();
                    wrap_plain(text, face, size, col_width - 6.0)
                })
                .collect();
            let lines = cells.iter().map(Vec::len).max().unwrap_or(0).max(1);
            let height = lines as f32 * line_height + 4.0;
            self.ensure(height);
            let top = self.y;
            for (c, cell) in cells.iter().enumerate() {
                let x = MARGIN + c as f32 * col_width;
                for (i, text) in cell.iter().enumerate() {
                    let baseline = top - size - i as f32 * line_height;
                    self.draw_text(x, baseline, text, face, size, BLACK);
                }
            }
            self.y = top - height;
            self.hline(MARGIN, MARGIN + CONTENT_WIDTH, self.y + 2.0, if header && r == 0 { 0.8 } else { 0.3 });
        }
        self.gap(4.0);
    }

    fn block(&mut self, block: &Block) {
        match block {
            Block::Heading { level, text, anchor } => self.heading(*level, text, anchor.as_deref()),
            Block::Paragraph(inlines) => {
                self.gap(5.0);
                self.flow(inline_tokens(inlines, Style::default(), BODY_SIZE, BLACK), 0.0);
            }
            Block::List {
                ordered,
                start,
                level,
                items,
            } => {
                self.gap(3.0);
                let indent = INDENT * (*level as f32 + 1.0);
                for (i, item) in items.iter().enumerate() {
                    let marker = if *ordered { format!("{}.", start + i) } else { "-".to_string() };
                    let body = inline_tokens(item, Style::default(), BODY_SIZE, BLACK);
                    // The marker sits in the hanging indent of the first line.
                    self.ensure(BODY_SIZE * LEADING);
                    let baseline = self.y - BODY_SIZE;
                    self.draw_text(MARGIN + indent - INDENT, baseline, &marker, Face::Regular, BODY_SIZE, BLACK);
                    self.flow(body, indent);
                }
            }
            Block::CodeBlock(code) => self.code(code),
            Block::Blockquote(inlines) => {
                self.gap(5.0);
                let base = Style {
                    italic: true,
                    ..Style::default()
                };
                self.flow(inline_tokens(inlines, base, BODY_SIZE, GREY), INDENT * 1.5);
            }
            Block::Link { text, target } => {
                self.gap(3.0);
                let mut tokens = Vec::new();
                tokens_for(text, Face::Regular, BODY_SIZE, LINK_BLUE, Some(target.clone()), &mut false, &mut tokens);
                self.flow(tokens, 0.0);
            }
            Block::Image { target, alt } => {
                self.gap(4.0);
                let label = if alt.is_empty() {
                    "[image]".to_string()
                } else {
                    format!("[image: {alt}]")
                };
                let mut tokens = Vec::new();
                let link = link_target(target);
                let color = if link.is_some() { LINK_BLUE } else { GREY };
                tokens_for(&label, Face::Italic, BODY_SIZE - 1.0, color, link, &mut false, &mut tokens);
                self.flow(tokens, 0.0);
            }
            Block::Table { header, rows } => self.table(*header, rows),
            Block::Rule => {
                self.gap(6.0);
                self.ensure(8.0);
                let y = self.y - 2.0;
                self.hline(MARGIN, MARGIN + CONTENT_WIDTH, y, 0.6);
                self.y -= 8.0;
            }
            Block::PageBreak => self.page_break(),
        }
    }

    fn finish(mut self, title: &str) -> Vec<u8> {
        let mut doc = PdfDocument::new(title);
        for link in std::mem::take(&mut self.links) {
            let actions = match &link.target {
                LinkTarget::External(uri) => Actions::uri(uri.clone()),
                LinkTarget::Internal(anchor) => match self.anchors.get(anchor) {
                    Some(&(page, top)) => Actions::go_to(Destination::Xyz {
                        page: page + 1,
                        left: Some(0.0),
                        top: Some(top),
                        zoom: None,
                    }),
                    None => {
                        debug!(anchor = %anchor, "Dropping link to unknown anchor");
                        continue;
                    }
                },
            };
            let rect = Rect {
                x: Pt(link.x),
                y: Pt(link.y),
                ..Rect::from_wh(Pt(link.width), Pt(link.height))
            };
            self.pages[link.page].push(Op::LinkAnnotation {
                link: LinkAnnotation::new(rect, actions, None, None, None),
            });
        }
        for (name, page) in &self.bookmarks {
            doc.add_bookmark(name, page + 1);
        }
        let pages: Vec<PdfPage> = self
            .pages
            .into_iter()
            .map(|ops| PdfPage::new(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), ops))
            .collect();
        doc.with_pages(pages).save(&PdfSaveOptions::default(), &mut Vec::new())
    }
}

/// Lay out `doc` and return the PDF bytes.
pub fn render_pdf(doc: &Document) -> Result<Vec<u8>, RenderError> {
    if doc.blocks.is_empty() {
        return Err(RenderError::Empty(doc.title.clone()));
    }
    let mut layout = Layout::new();
    for block in &doc.blocks {
        layout.block(block);
    }
    debug!(
        title = %doc.title,
        pages = layout.pages.len(),
        anchors = layout.anchors.len(),
        links = layout.links.len(),
        "Laid out document"
    );
    Ok(layout.finish(&doc.title))
}

/// Page count a document would lay out to, plus the page of each anchor.
#[cfg(test)]
fn layout_summary(doc: &Document) -> (usize, HashMap<String, usize>) {
    let mut layout = Layout::new();
    for block in &doc.blocks {
        layout.block(block);
    }
    let anchors = layout
        .anchors
        .iter()
        .map(|(k, (page, _))| (k.clone(), *page))
        .collect();
    (layout.pages.len(), anchors)
}
