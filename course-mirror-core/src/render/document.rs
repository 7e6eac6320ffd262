//! Per-item documents and the merged all-pages bundle.

use crate::model::{Assignment, Course, Page, RubricCriterion};

use super::{clean_text, render_body, strip_markup, Block, Inline, LinkTarget, Style};

pub const VIEW_ORIGINAL: &str = "View original";
pub const TOC_HEADING: &str = "Table of Contents";

/// A laid-out-ready document: a title and its blocks in reading order.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub title: String,
    pub blocks: Vec<Block>,
}

/// Anchor name of the `index`-th (1-based) bundle entry.
pub fn anchor_for(index: usize) -> String {
    format!("h{index}")
}

fn title_block(title: &str) -> Block {
    Block::Heading {
        level: 1,
        text: clean_text(title),
        anchor: None,
    }
}

fn view_original(url: &Option<String>) -> Option<Block> {
    url.as_ref().filter(|u| !u.trim().is_empty()).map(|u| Block::Link {
        text: VIEW_ORIGINAL.to_string(),
        target: LinkTarget::External(u.clone()),
    })
}

fn labelled(label: &str, value: &str) -> Block {
    Block::Paragraph(vec![
        Inline::Text {
            text: format!("{label}: "),
            style: Style {
                bold: true,
                ..Style::default()
            },
        },
        Inline::Text {
            text: clean_text(value),
            style: Style::default(),
        },
    ])
}

fn format_points(points: f64) -> String {
    if points.fract() == 0.0 && points.abs() < 1e12 {
        format!("{}", points as i64)
    } else {
        format!("{points}")
    }
}

fn rubric_table(rubric: &[RubricCriterion]) -> Block {
    let mut rows = vec![vec![
        "Criterion".to_string(),
        "Points".to_string(),
        "Ratings".to_string(),
    ]];
    for criterion in rubric {
        let mut description = strip_markup(criterion.description.as_deref().unwrap_or_default());
        if let Some(long) = criterion.long_description.as_deref() {
            let long = strip_markup(long);
            if !long.is_empty() && long != description {
                description = if description.is_empty() {
                    long
                } else {
                    format!("{description}: {long}")
                };
            }
        }
        let ratings = criterion
            .ratings
            .iter()
            .map(|r| {
                let text = strip_markup(r.description.as_deref().unwrap_or_default());
                match r.points {
                    Some(p) => format!("{text} ({})", format_points(p)),
                    None => text,
                }
            })
            .filter(|r| !r.is_empty())
            .collect::<Vec<_>>()
            .join("; ");
        rows.push(vec![
            description,
            criterion.points.map(format_points).unwrap_or_default(),
            ratings,
        ]);
    }
    Block::Table { header: true, rows }
}

pub fn page_document(page: &Page) -> Document {
    let mut blocks = vec![title_block(&page.title)];
    blocks.extend(view_original(&page.html_url));
    blocks.extend(render_body(page.body.as_deref().unwrap_or_default()));
    Document {
        title: page.title.clone(),
        blocks,
    }
}

pub fn assignment_document(assignment: &Assignment) -> Document {
    let mut blocks = vec![title_block(&assignment.name)];
    let due = assignment
        .due_at
        .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "N/A".to_string());
    blocks.push(labelled("Due", &due));
    let points = assignment
        .points_possible
        .map(format_points)
        .unwrap_or_else(|| "N/A".to_string());
    blocks.push(labelled("Points", &points));
    blocks.extend(view_original(&assignment.html_url));
    if !assignment.rubric.is_empty() {
        blocks.push(Block::Heading {
            level: 2,
            text: "Rubric".to_string(),
            anchor: None,
        });
        blocks.push(rubric_table(&assignment.rubric));
    }
    blocks.push(Block::Rule);
    blocks.extend(render_body(assignment.description.as_deref().unwrap_or_default()));
    Document {
        title: assignment.name.clone(),
        blocks,
    }
}

/// All pages of a course in one document: a table of contents of internal
/// links, then each page under an anchored heading, page breaks in between.
pub fn bundle_document(course: &Course, pages: &[Page]) -> Document {
    let title = format!("{} - Pages", course.name);
    let mut blocks = vec![
        title_block(&title),
        Block::Heading {
            level: 2,
            text: TOC_HEADING.to_string(),
            anchor: None,
        },
    ];
    for (i, page) in pages.iter().enumerate() {
        blocks.push(Block::Link {
            text: clean_text(&page.title),
            target: LinkTarget::Internal(anchor_for(i + 1)),
        });
    }
    blocks.push(Block::PageBreak);

    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            blocks.push(Block::PageBreak);
        }
        blocks.push(Block::Heading {
            level: 2,
            text: clean_text(&page.title),
            anchor: Some(anchor_for(i + 1)),
        });
        blocks.extend(view_original(&page.html_url));
        blocks.extend(render_body(page.body.as_deref().unwrap_or_default()));
    }
    Document { title, blocks }
}

/// Table-of-contents entries of a document: `(text, anchor)` for every
/// internal link, in order.
#[cfg(test)]
fn toc_entries(doc: &Document) -> Vec<(String, String)> {
    doc.blocks
        .iter()
        .filter_map(|b| match b {
            Block::Link {
                text,
                target: LinkTarget::Internal(anchor),
            } => Some((text.clone(), anchor.clone())),
            _ => None,
        })
        .collect()
}
