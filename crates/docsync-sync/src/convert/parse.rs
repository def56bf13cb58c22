//! Flat text to block tree

use super::chunk::{split_text, CutRule};
use super::inline::parse_inline;
use super::language::{is_line_structured, normalize_language};
use docsync_types::{Block, BlockKind, RichSpan};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static NUMBERED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.").expect("valid list pattern"));
static NUMBERED_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\s*").expect("valid list pattern"));

/// Line-oriented parser producing top-level blocks
pub(crate) struct Parser<'a> {
    lines: Vec<&'a str>,
    pos: usize,
    max_text_len: usize,
    blocks: Vec<Block>,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(text: &'a str, max_text_len: usize) -> Self {
        let lines: Vec<&str> = text.split('\n').map(|l| l.trim_end_matches('\r')).collect();
        Self {
            lines: strip_front_matter(lines),
            pos: 0,
            max_text_len,
            blocks: Vec::new(),
        }
    }

    pub(crate) fn parse(mut self) -> Vec<Block> {
        while self.pos < self.lines.len() {
            let line = self.lines[self.pos].trim();

            if line.is_empty() {
                self.pos += 1;
            } else if let Some(level) = heading_level(line) {
                self.heading(level, line);
                self.pos += 1;
            } else if is_list_item(line) {
                self.list();
            } else if line.starts_with("```") {
                self.code_fence();
            } else if matches!(line, "---" | "***" | "___") {
                self.blocks.push(Block::divider());
                self.pos += 1;
            } else if let Some(rest) = line.strip_prefix('>') {
                let span = parse_inline(rest.trim_start());
                self.push_chunked(BlockKind::Quote, BlockKind::Quote, span);
                self.pos += 1;
            } else if line.contains('|') && self.is_table_start() {
                self.table();
            } else {
                let span = parse_inline(line);
                if !span.text.trim().is_empty() {
                    self.push_chunked(BlockKind::Paragraph, BlockKind::Paragraph, span);
                }
                self.pos += 1;
            }
        }

        self.blocks
    }

    fn heading(&mut self, level: usize, line: &str) {
        let content = line.trim_start_matches('#').trim();

        if level <= 3 {
            let span = parse_inline(content);
            let kind = BlockKind::Heading { level: level as u8 };
            self.push_chunked(kind, BlockKind::Paragraph, span);
        } else {
            let span = RichSpan::plain(format!("(h_{}) {}", level, content)).bold();
            let chunks = split_text(&span.text, self.max_text_len, CutRule::Soft(' '));
            for (i, chunk) in chunks.into_iter().enumerate() {
                let mut piece = RichSpan::plain(chunk);
                piece.bold = i == 0;
                self.blocks.push(Block::paragraph(vec![piece]));
            }
        }
    }

    /// Push `span` as one block, or as a `first` block followed by `rest`
    /// blocks when it exceeds the length limit.
    fn push_chunked(&mut self, first: BlockKind, rest: BlockKind, span: RichSpan) {
        let chunks = split_text(&span.text, self.max_text_len, CutRule::Soft(' '));
        for (i, chunk) in chunks.into_iter().enumerate() {
            let kind = if i == 0 { first.clone() } else { rest.clone() };
            self.blocks.push(Block::new(kind, vec![span.with_text(chunk)]));
        }
    }

    fn list(&mut self) {
        let start = self.pos;
        let mut stack: Vec<(usize, Block)> = Vec::new();

        while self.pos < self.lines.len() {
            let line = self.lines[self.pos].trim_end();
            let trimmed = line.trim_start();
            if trimmed.is_empty() || !is_list_item(trimmed) {
                break;
            }

            let indent = line.len() - trimmed.len();
            let item = list_item(trimmed);

            while stack.last().is_some_and(|(top, _)| *top >= indent) {
                if let Some((_, done)) = stack.pop() {
                    self.attach(&mut stack, done);
                }
            }
            stack.push((indent, item));
            self.pos += 1;
        }

        while let Some((_, done)) = stack.pop() {
            self.attach(&mut stack, done);
        }

        if self.pos == start {
            self.pos += 1;
        }
    }

    fn attach(&mut self, stack: &mut [(usize, Block)], block: Block) {
        match stack.last_mut() {
            Some((_, parent)) => parent.children.push(block),
            None => self.blocks.push(block),
        }
    }

    fn code_fence(&mut self) {
        let language = normalize_language(&self.lines[self.pos].trim()[3..]);
        let mut body = Vec::new();
        self.pos += 1;

        while self.pos < self.lines.len() && !self.lines[self.pos].trim().starts_with("```") {
            body.push(self.lines[self.pos]);
            self.pos += 1;
        }
        if self.pos < self.lines.len() {
            self.pos += 1;
        }

        let text = body.join("\n");
        self.blocks
            .extend(code_blocks(&language, &text, self.max_text_len));
    }

    fn is_table_start(&self) -> bool {
        let Some(next) = self.lines.get(self.pos + 1).map(|l| l.trim()) else {
            return false;
        };
        if !next.contains('|') {
            return false;
        }

        let cells: Vec<&str> = next
            .split('|')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();
        !cells.is_empty()
            && cells
                .iter()
                .all(|c| c.chars().all(|ch| matches!(ch, '-' | ':' | ' ')))
    }

    fn table(&mut self) {
        let start = self.pos;
        while self.pos < self.lines.len() && self.lines[self.pos].contains('|') {
            self.pos += 1;
        }

        match table_block(&self.lines[start..self.pos]) {
            Some(table) => self.blocks.push(table),
            None => debug!("Skipping malformed table of {} lines", self.pos - start),
        }
    }
}

/// Code blocks for `text`, split at line boundaries when too long
pub(crate) fn code_blocks(language: &str, text: &str, max_text_len: usize) -> Vec<Block> {
    if text.trim().is_empty() {
        return vec![Block::code(language, "")];
    }

    let rule = if is_line_structured(language) {
        CutRule::Always('\n')
    } else {
        CutRule::Soft('\n')
    };

    split_text(text, max_text_len, rule)
        .into_iter()
        .map(|chunk| Block::code(language, chunk))
        .collect()
}

fn strip_front_matter(lines: Vec<&str>) -> Vec<&str> {
    if lines.first().map(|l| l.trim()) != Some("---") {
        return lines;
    }

    match lines.iter().skip(1).position(|l| l.trim() == "---") {
        Some(end) => {
            debug!("Stripped {} lines of front matter", end + 2);
            lines[end + 2..].to_vec()
        }
        None => lines,
    }
}

fn heading_level(line: &str) -> Option<usize> {
    let marker = line.split_whitespace().next()?;
    let level = marker.len();
    if marker.chars().all(|c| c == '#') && (1..=6).contains(&level) {
        Some(level)
    } else {
        None
    }
}

fn is_list_item(trimmed: &str) -> bool {
    trimmed.starts_with("- ") || trimmed.starts_with("* ") || NUMBERED.is_match(trimmed)
}

fn list_item(trimmed: &str) -> Block {
    if NUMBERED.is_match(trimmed) {
        let content = NUMBERED_PREFIX.replace(trimmed, "");
        return Block::new(BlockKind::NumberedItem, vec![parse_inline(&content)]);
    }

    let content = &trimmed[2..];
    let todo = [("[ ]", false), ("[x]", true), ("[X]", true)]
        .into_iter()
        .find_map(|(marker, checked)| {
            let rest = content.strip_prefix(marker)?;
            (rest.is_empty() || rest.starts_with(' ')).then(|| (checked, rest.trim_start()))
        });

    match todo {
        Some((checked, rest)) => Block::new(BlockKind::ToDo { checked }, vec![parse_inline(rest)]),
        None => Block::new(BlockKind::BulletedItem, vec![parse_inline(content)]),
    }
}

fn table_cells(line: &str) -> Vec<String> {
    let parts: Vec<&str> = line.trim().split('|').collect();
    if parts.len() < 2 {
        return Vec::new();
    }
    parts[1..parts.len() - 1]
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn table_block(rows: &[&str]) -> Option<Block> {
    if rows.len() < 3 {
        return None;
    }

    let header = table_cells(rows[0]);
    if header.is_empty() {
        return None;
    }
    let width = header.len();

    let data: Vec<Vec<String>> = rows[2..]
        .iter()
        .map(|row| table_cells(row))
        .filter(|cells| !cells.is_empty())
        .collect();
    if data.is_empty() {
        return None;
    }

    let row_block = |mut cells: Vec<String>| {
        cells.resize(width, String::new());
        let cells = cells
            .into_iter()
            .map(|c| vec![RichSpan::plain(c)])
            .collect();
        Block::new(BlockKind::TableRow { cells }, Vec::new())
    };

    let mut children = vec![row_block(header)];
    children.extend(data.into_iter().map(row_block));

    Some(
        Block::new(
            BlockKind::Table {
                width,
                has_column_header: true,
            },
            Vec::new(),
        )
        .with_children(children),
    )
}
