//! Block tree back to flat text

use super::chunk::{join_chunks, split_text, CutRule};
use super::inline::{render_span, render_spans};
use super::language::is_line_structured;
use docsync_types::{Block, BlockKind, RichSpan};
use once_cell::sync::Lazy;
use regex::Regex;

static HEADING_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\(h_([4-6])\) ").expect("valid heading marker pattern"));

const INDENT: &str = "  ";

pub(crate) struct Renderer {
    max_text_len: usize,
    lines: Vec<String>,
}

impl Renderer {
    pub(crate) fn new(max_text_len: usize) -> Self {
        Self {
            max_text_len,
            lines: Vec::new(),
        }
    }

    pub(crate) fn render(mut self, blocks: &[Block]) -> String {
        self.siblings(blocks, 0);

        // A leading divider would be read back as front matter.
        if self.lines.first().is_some_and(|l| l == "---") {
            self.lines.insert(0, String::new());
        }

        let mut text = String::new();
        for line in &self.lines {
            text.push_str(line);
            text.push('\n');
        }
        text
    }

    fn siblings(&mut self, blocks: &[Block], depth: usize) {
        let mut i = 0;
        while i < blocks.len() {
            if let BlockKind::Code { language } = &blocks[i].kind {
                let end = self.code_run_end(blocks, i, language);
                self.code(language, &blocks[i..end], depth);
                i = end;
                continue;
            }

            self.block(&blocks[i], depth);
            i += 1;
        }
    }

    /// End of the longest run of code blocks starting at `start` that
    /// splitting one fenced block would have produced
    fn code_run_end(&self, blocks: &[Block], start: usize, language: &str) -> usize {
        let rule = if is_line_structured(language) {
            CutRule::Always('\n')
        } else {
            CutRule::Soft('\n')
        };

        let texts: Vec<String> = blocks[start..]
            .iter()
            .take_while(|b| matches!(&b.kind, BlockKind::Code { language: l } if l == language))
            .map(Block::plain_text)
            .collect();

        (2..=texts.len())
            .rev()
            .find(|&len| {
                let run = &texts[..len];
                let joined = join_chunks(run, self.max_text_len, '\n');
                split_text(&joined, self.max_text_len, rule) == run
            })
            .map_or(start + 1, |len| start + len)
    }

    fn code(&mut self, language: &str, run: &[Block], depth: usize) {
        let texts: Vec<String> = run.iter().map(Block::plain_text).collect();
        let body = join_chunks(&texts, self.max_text_len, '\n');
        self.push(depth, format!("```{}", language));
        for line in body.split('\n') {
            self.lines.push(line.to_string());
        }
        self.push(depth, "```".to_string());
    }

    fn block(&mut self, block: &Block, depth: usize) {
        let text = render_spans(&block.spans);

        match &block.kind {
            BlockKind::Paragraph => {
                if let Some(line) = restore_heading(&block.spans) {
                    self.push(depth, line);
                } else if !text.is_empty() {
                    self.push(depth, text);
                }
            }
            BlockKind::Heading { level } => {
                self.push(depth, format!("{} {}", "#".repeat(usize::from(*level)), text));
            }
            BlockKind::BulletedItem => self.push(depth, format!("- {}", text)),
            BlockKind::NumberedItem => self.push(depth, format!("1. {}", text)),
            BlockKind::ToDo { checked } => {
                let mark = if *checked { "x" } else { " " };
                self.push(depth, format!("- [{}] {}", mark, text));
            }
            BlockKind::Quote => self.push(depth, format!("> {}", text)),
            BlockKind::Divider => self.push(depth, "---".to_string()),
            BlockKind::Code { language } => {
                self.code(language, std::slice::from_ref(block), depth);
            }
            BlockKind::Table { .. } => {
                self.table(block, depth);
                return;
            }
            BlockKind::TableRow { cells } => self.push(depth, table_row(cells)),
            BlockKind::ChildPage { title } => self.push(depth, format!("[[{}]]", title)),
            BlockKind::Unsupported { name } => {
                self.push(depth, format!("<!-- Unknown block type: {} -->", name));
            }
        }

        self.siblings(&block.children, depth + 1);
    }

    fn table(&mut self, block: &Block, depth: usize) {
        let width = match block.kind {
            BlockKind::Table { width, .. } => width,
            _ => 0,
        };

        for (i, row) in block.children.iter().enumerate() {
            if let BlockKind::TableRow { cells } = &row.kind {
                self.push(depth, table_row(cells));
                if i == 0 {
                    let separator = vec!["---"; width.max(cells.len())].join(" | ");
                    self.push(depth, format!("| {} |", separator));
                }
            }
        }

        // Keep the next block from being read as another table row.
        self.lines.push(String::new());
    }

    fn push(&mut self, depth: usize, line: String) {
        self.lines.push(format!("{}{}", INDENT.repeat(depth), line));
    }
}

fn table_row(cells: &[Vec<RichSpan>]) -> String {
    let cells: Vec<String> = cells.iter().map(|c| render_spans(c)).collect();
    format!("| {} |", cells.join(" | "))
}

/// `#### text` for a bold paragraph carrying an `(h_N) ` marker
fn restore_heading(spans: &[RichSpan]) -> Option<String> {
    let first = spans.first().filter(|s| s.bold)?;
    let caps = HEADING_MARKER.captures(&first.text)?;
    let level: usize = caps[1].parse().ok()?;
    let marker_len = caps.get(0)?.end();

    let mut line = format!("{} {}", "#".repeat(level), &first.text[marker_len..]);
    for span in &spans[1..] {
        line.push_str(&render_span(span));
    }
    Some(line)
}
