//! Structural checks applied to every produced block

use docsync_types::{Block, BlockKind, Error};
use tracing::warn;

/// Check the required-field contract of one block, ignoring its children
pub fn check_block(block: &Block) -> Result<(), Error> {
    match &block.kind {
        BlockKind::Heading { level } if !(1..=3).contains(level) => Err(Error::conversion(
            format!("heading level {} is out of range", level),
        )),
        BlockKind::Code { language } if language.trim().is_empty() => {
            Err(Error::conversion("code block without a language"))
        }
        BlockKind::Table { width, .. } => {
            if *width == 0 {
                return Err(Error::conversion("table without columns"));
            }
            if block.children.is_empty() {
                return Err(Error::conversion("table without rows"));
            }
            for row in &block.children {
                match &row.kind {
                    BlockKind::TableRow { cells } if cells.len() == *width => {}
                    BlockKind::TableRow { cells } => {
                        return Err(Error::conversion(format!(
                            "table row has {} cells, expected {}",
                            cells.len(),
                            width
                        )))
                    }
                    _ => {
                        return Err(Error::conversion(format!(
                            "table child of type {} is not a row",
                            row.type_name()
                        )))
                    }
                }
            }
            Ok(())
        }
        BlockKind::TableRow { cells } if cells.is_empty() => {
            Err(Error::conversion("table row without cells"))
        }
        BlockKind::Divider if !block.spans.is_empty() => {
            Err(Error::conversion("divider carries text"))
        }
        _ => Ok(()),
    }
}

/// Drop invalid blocks, recursing into children
pub fn validate_blocks(blocks: Vec<Block>) -> Vec<Block> {
    blocks
        .into_iter()
        .enumerate()
        .filter_map(|(index, mut block)| match check_block(&block) {
            Ok(()) => {
                if !matches!(block.kind, BlockKind::Table { .. }) {
                    block.children = validate_blocks(std::mem::take(&mut block.children));
                }
                Some(block)
            }
            Err(e) => {
                warn!("Dropping invalid {} block at {}: {}", block.type_name(), index, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_types::RichSpan;

    fn row(width: usize) -> Block {
        Block::new(
            BlockKind::TableRow {
                cells: vec![vec![RichSpan::plain("c")]; width],
            },
            Vec::new(),
        )
    }

    fn table(width: usize, rows: Vec<Block>) -> Block {
        Block::new(
            BlockKind::Table {
                width,
                has_column_header: true,
            },
            Vec::new(),
        )
        .with_children(rows)
    }

    #[test]
    fn test_valid_blocks_pass() {
        assert!(check_block(&Block::heading(2, vec![RichSpan::plain("x")])).is_ok());
        assert!(check_block(&Block::code("rust", "fn main() {}")).is_ok());
        assert!(check_block(&Block::divider()).is_ok());
        assert!(check_block(&table(2, vec![row(2), row(2)])).is_ok());
    }

    #[test]
    fn test_invalid_blocks_are_rejected() {
        assert!(check_block(&Block::heading(4, Vec::new())).is_err());
        assert!(check_block(&Block::code("", "x")).is_err());
        assert!(check_block(&table(0, vec![row(1)])).is_err());
        assert!(check_block(&table(2, vec![row(2), row(3)])).is_err());
        assert!(check_block(&table(2, Vec::new())).is_err());
        assert!(check_block(&row(0)).is_err());

        let mut divider = Block::divider();
        divider.spans.push(RichSpan::plain("x"));
        assert!(check_block(&divider).is_err());
    }

    #[test]
    fn test_validate_drops_only_invalid_blocks() {
        let nested = Block::new(BlockKind::BulletedItem, vec![RichSpan::plain("a")])
            .with_children(vec![Block::heading(9, Vec::new()), Block::divider()]);
        let blocks = validate_blocks(vec![
            Block::paragraph(vec![RichSpan::plain("keep")]),
            Block::code(" ", "x"),
            nested,
        ]);

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].children, vec![Block::divider()]);
    }
}
