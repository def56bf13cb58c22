//! Document conversion between flat text and the remote block model
//!
//! [`DocumentConverter::text_to_blocks`] never fails: constructs it cannot
//! express are skipped and every produced block passes [`validate_blocks`]
//! before it is returned. [`DocumentConverter::blocks_to_text`] is the inverse
//! used when pulling, and re-parsing its output yields the same blocks for
//! everything the parser itself produces.

mod chunk;
mod inline;
mod language;
mod parse;
mod render;
mod validate;

pub use chunk::{join_chunks, split_text, CutRule, MIN_SOFT_CUT};
pub use inline::{parse_inline, render_span, render_spans};
pub use language::{
    is_line_structured, is_supported_extension, language_for_extension, normalize_language,
    PLAIN_TEXT, SUPPORTED_LANGUAGES,
};
pub use validate::{check_block, validate_blocks};

use docsync_types::{Block, BlockKind, MAX_TEXT_LEN};
use std::path::Path;

/// Converts documents and source files into blocks and back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentConverter {
    max_text_len: usize,
}

impl Default for DocumentConverter {
    fn default() -> Self {
        Self::new(MAX_TEXT_LEN)
    }
}

impl DocumentConverter {
    /// Create a converter splitting runs longer than `max_text_len` characters
    pub fn new(max_text_len: usize) -> Self {
        Self { max_text_len }
    }

    /// Length limit applied to rich-text runs
    pub fn max_text_len(&self) -> usize {
        self.max_text_len
    }

    /// Parse a text document into blocks
    pub fn text_to_blocks(&self, text: &str) -> Vec<Block> {
        validate_blocks(parse::Parser::new(text, self.max_text_len).parse())
    }

    /// Wrap a source file into code blocks in the language of its extension
    pub fn code_file_to_blocks(&self, ext: &str, text: &str) -> Vec<Block> {
        let language = normalize_language(language_for_extension(ext).unwrap_or(PLAIN_TEXT));
        validate_blocks(parse::code_blocks(&language, text, self.max_text_len))
    }

    /// Convert a file's content, choosing the converter from its extension
    pub fn file_to_blocks(&self, path: &Path, text: &str) -> Vec<Block> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        if language_for_extension(ext).is_some() {
            self.code_file_to_blocks(ext, text)
        } else {
            self.text_to_blocks(text)
        }
    }

    /// Render blocks back into text
    pub fn blocks_to_text(&self, blocks: &[Block]) -> String {
        render::Renderer::new(self.max_text_len).render(blocks)
    }

    /// Render blocks into the content of the file at `path`
    ///
    /// A source file whose content is all code comes back as the raw code, with
    /// split chunks re-joined. Everything else is rendered as a document.
    pub fn blocks_to_file_text(&self, path: &Path, blocks: &[Block]) -> String {
        let is_source = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(language_for_extension)
            .is_some();

        let code: Option<Vec<String>> = blocks
            .iter()
            .map(|block| match block.kind {
                BlockKind::Code { .. } => Some(block.plain_text()),
                _ => None,
            })
            .collect();

        match code {
            Some(chunks) if is_source && !chunks.is_empty() => {
                join_chunks(&chunks, self.max_text_len, '\n')
            }
            _ => self.blocks_to_text(blocks),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_types::RichSpan;
    use proptest::prelude::*;

    fn converter() -> DocumentConverter {
        DocumentConverter::default()
    }

    fn round_trip(text: &str) {
        let conv = converter();
        let blocks = conv.text_to_blocks(text);
        let rendered = conv.blocks_to_text(&blocks);
        assert_eq!(
            conv.text_to_blocks(&rendered),
            blocks,
            "rendered text:\n{}",
            rendered
        );
    }

    #[test]
    fn test_headings() {
        let blocks = converter().text_to_blocks("# One\n## Two\n### Three\n#### Four");

        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].kind, BlockKind::Heading { level: 1 });
        assert_eq!(blocks[2].kind, BlockKind::Heading { level: 3 });
        assert_eq!(blocks[3].kind, BlockKind::Paragraph);
        assert_eq!(blocks[3].spans, vec![RichSpan::plain("(h_4) Four").bold()]);
    }

    #[test]
    fn test_deep_heading_is_restored() {
        let conv = converter();
        let blocks = conv.text_to_blocks("##### Deep");
        assert_eq!(conv.blocks_to_text(&blocks), "##### Deep\n");
    }

    #[test]
    fn test_source_file_comes_back_raw() {
        let conv = DocumentConverter::new(200);
        let code: String = (0..40).map(|i| format!("value_{} = {}\n", i, i)).collect();
        let blocks = conv.file_to_blocks(Path::new("app.py"), &code);
        assert!(blocks.len() > 1);

        assert_eq!(conv.blocks_to_file_text(Path::new("app.py"), &blocks), code);
        assert!(conv
            .blocks_to_file_text(Path::new("app.md"), &blocks)
            .starts_with("```python\n"));
    }

    #[test]
    fn test_hash_without_space_is_a_paragraph() {
        let blocks = converter().text_to_blocks("#tag");
        assert_eq!(blocks, vec![Block::paragraph(vec![RichSpan::plain("#tag")])]);
    }

    #[test]
    fn test_front_matter_is_stripped() {
        let blocks = converter().text_to_blocks("---\ntitle: x\n---\nBody");
        assert_eq!(blocks, vec![Block::paragraph(vec![RichSpan::plain("Body")])]);
    }

    #[test]
    fn test_nested_lists() {
        let text = "- a\n  - b\n    - c\n  - d\n- e\n1. one\n2. two";
        let blocks = converter().text_to_blocks(text);

        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].plain_text(), "a");
        assert_eq!(blocks[0].children.len(), 2);
        assert_eq!(blocks[0].children[0].children[0].plain_text(), "c");
        assert_eq!(blocks[0].children[1].plain_text(), "d");
        assert_eq!(blocks[1].plain_text(), "e");
        assert_eq!(blocks[2].kind, BlockKind::NumberedItem);
        assert_eq!(blocks[3].plain_text(), "two");
    }

    #[test]
    fn test_orphan_nested_item_is_flattened() {
        let blocks = converter().text_to_blocks("    - orphan\n- top");
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|b| b.children.is_empty()));
    }

    #[test]
    fn test_todo_items() {
        let blocks = converter().text_to_blocks("- [ ] open\n- [x] done");
        assert_eq!(blocks[0].kind, BlockKind::ToDo { checked: false });
        assert_eq!(blocks[1].kind, BlockKind::ToDo { checked: true });
        assert_eq!(blocks[1].plain_text(), "done");
    }

    #[test]
    fn test_code_fence_language_alias() {
        let blocks = converter().text_to_blocks("```py\nprint(1)\n```");
        assert_eq!(blocks, vec![Block::code("python", "print(1)")]);
    }

    #[test]
    fn test_unknown_language_becomes_plain_text() {
        let blocks = converter().text_to_blocks("```cobol\nDISPLAY 'X'\n```");
        assert_eq!(blocks[0].kind, BlockKind::Code { language: "plain text".to_string() });
    }

    #[test]
    fn test_empty_and_unterminated_fences() {
        let conv = converter();
        assert_eq!(conv.text_to_blocks("```\n```"), vec![Block::code("plain text", "")]);
        assert_eq!(
            conv.text_to_blocks("```rust\nfn a() {}\nfn b() {}"),
            vec![Block::code("rust", "fn a() {}\nfn b() {}")]
        );
    }

    #[test]
    fn test_table_with_one_data_row() {
        let blocks = converter().text_to_blocks("| A | B |\n|---|---|\n| 1 | 2 |");

        assert_eq!(blocks.len(), 1);
        assert_eq!(
            blocks[0].kind,
            BlockKind::Table {
                width: 2,
                has_column_header: true
            }
        );
        assert_eq!(blocks[0].children.len(), 2);
    }

    #[test]
    fn test_table_rows_are_padded_and_truncated() {
        let blocks = converter()
            .text_to_blocks("| A | B | C |\n| - | :-: | -: |\n| 1 |\n| 1 | 2 | 3 | 4 |");
        let rows = &blocks[0].children;

        for row in rows {
            match &row.kind {
                BlockKind::TableRow { cells } => assert_eq!(cells.len(), 3),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_malformed_table_is_skipped() {
        let blocks = converter().text_to_blocks("| A | B |\n|---|---|\nafter");
        assert_eq!(blocks, vec![Block::paragraph(vec![RichSpan::plain("after")])]);

        let blocks = converter().text_to_blocks("a | b\nnot a separator");
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn test_quotes_and_dividers() {
        let blocks = converter().text_to_blocks("> said\n---\n***\n___");
        assert_eq!(blocks[0].kind, BlockKind::Quote);
        assert_eq!(blocks[0].plain_text(), "said");
        assert!(blocks[1..].iter().all(|b| b.kind == BlockKind::Divider));
    }

    #[test]
    fn test_long_paragraph_is_chunked() {
        let words = vec!["lorem"; 700].join(" ");
        let blocks = converter().text_to_blocks(&words);

        assert!(blocks.len() >= 2);
        assert!(blocks.iter().all(|b| b.plain_text().chars().count() <= MAX_TEXT_LEN));
        let texts: Vec<String> = blocks.iter().map(Block::plain_text).collect();
        assert_eq!(join_chunks(&texts, MAX_TEXT_LEN, ' '), words);
    }

    #[test]
    fn test_yaml_code_cuts_at_lines() {
        let yaml: String = (0..400).map(|i| format!("key_{}: value\n", i)).collect();
        let blocks = converter().code_file_to_blocks("yaml", &yaml);

        assert!(blocks.len() >= 2);
        for block in &blocks[..blocks.len() - 1] {
            assert!(block.plain_text().ends_with("value"));
        }
    }

    #[test]
    fn test_code_file_uses_extension_language() {
        let conv = converter();
        let blocks = conv.file_to_blocks(Path::new("tool.py"), "print('hi')\n");
        assert_eq!(blocks, vec![Block::code("python", "print('hi')\n")]);

        let blocks = conv.file_to_blocks(Path::new("notes.md"), "# Notes");
        assert_eq!(blocks[0].kind, BlockKind::Heading { level: 1 });
    }

    #[test]
    fn test_render_remote_blocks() {
        let blocks = vec![
            Block::new(BlockKind::ChildPage { title: "Child".into() }, Vec::new()),
            Block::new(BlockKind::Unsupported { name: "embed".into() }, Vec::new()),
            Block::new(BlockKind::ToDo { checked: true }, vec![RichSpan::plain("x")]),
        ];
        assert_eq!(
            converter().blocks_to_text(&blocks),
            "[[Child]]\n<!-- Unknown block type: embed -->\n- [x] x\n"
        );
    }

    #[test]
    fn test_leading_divider_survives_round_trip() {
        round_trip("\n---\nmiddle\n---\nend");
    }

    #[test]
    fn test_round_trip_of_mixed_document() {
        round_trip(
            "# Title\n\nSome **bold** text with [a link](https://example.com).\n\n\
             - one\n  - nested\n- two\n\n1. first\n2. second\n\n- [ ] task\n\n\
             > quoted\n\n```rust\nfn main() {}\n```\n\n| A | B |\n|---|---|\n| 1 | 2 |\n\n\
             after table\n\n#### Small heading\n\n---\n",
        );
    }

    #[test]
    fn test_round_trip_of_split_code() {
        let code: String = (0..300).map(|i| format!("let value_{} = {};\n", i, i)).collect();
        let text = format!("```rust\n{}```\n```rust\nshort\n```", code);
        let conv = converter();
        let blocks = conv.text_to_blocks(&text);

        assert!(blocks.len() >= 3);
        assert_eq!(conv.text_to_blocks(&conv.blocks_to_text(&blocks)), blocks);
    }

    proptest! {
        #[test]
        fn test_round_trip_property(
            paragraphs in prop::collection::vec("[a-z]{1,12}( [a-z]{1,12}){0,300}", 1..6),
            heading in "[a-z ]{1,40}",
            items in prop::collection::vec("[a-z]{1,20}", 0..5),
        ) {
            let mut text = format!("## {}\n\n", heading);
            for p in &paragraphs {
                text.push_str(p);
                text.push_str("\n\n");
            }
            for item in &items {
                text.push_str(&format!("- {}\n", item));
            }

            let conv = converter();
            let blocks = conv.text_to_blocks(&text);
            let again = conv.text_to_blocks(&conv.blocks_to_text(&blocks));
            prop_assert_eq!(again, blocks);
        }
    }
}
