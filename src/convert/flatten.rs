//! Nesting limits and collapsible quotes.

use crate::block::Block;

/// Marker prefixed to blocks promoted out of a too-deep subtree.
pub const INDENT_MARKER: &str = "└ ";

/// Maximum nesting the store accepts in one write.
pub const MAX_DEPTH: usize = 2;

/// Collapse nesting deeper than `max_depth` (at least 2) levels.
///
/// Blocks below the limit are lifted to become siblings of their deepest
/// allowed ancestor, in document order, each marked with [`INDENT_MARKER`].
pub fn flatten_deep_nesting(blocks: Vec<Block>, max_depth: usize) -> Vec<Block> {
    let max_depth = max_depth.max(2);
    blocks
        .into_iter()
        .map(|block| flatten_block(block, 1, max_depth))
        .collect()
}

fn flatten_block(mut block: Block, depth: usize, max_depth: usize) -> Block {
    let children = block.take_children();
    if children.is_empty() {
        return block;
    }
    let mut flattened = Vec::with_capacity(children.len());
    for mut child in children {
        if depth + 1 >= max_depth {
            let descendants = child.take_children();
            flattened.push(child);
            extract_descendants(descendants, &mut flattened);
        } else {
            flattened.push(flatten_block(child, depth + 1, max_depth));
        }
    }
    if let Some(slot) = block.children_mut() {
        *slot = flattened;
    }
    block
}

fn extract_descendants(blocks: Vec<Block>, out: &mut Vec<Block>) {
    for mut block in blocks {
        if !matches!(block, Block::Code { .. }) {
            if let Some(first) = block.rich_text_mut().and_then(|spans| spans.first_mut()) {
                first.content.insert_str(0, INDENT_MARKER);
            }
        }
        let grandchildren = block.take_children();
        out.push(block);
        extract_descendants(grandchildren, out);
    }
}

/// Turn quotes that open with bold text into toggles. Only the given level is
/// rewritten; children are left as they are.
pub fn promote_toggles(blocks: Vec<Block>) -> Vec<Block> {
    blocks
        .into_iter()
        .map(|block| match block {
            Block::Quote {
                rich_text,
                children,
            } if rich_text.first().is_some_and(|span| span.annotations.bold) => Block::Toggle {
                rich_text,
                children,
            },
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::RichSpan;

    fn item(text: &str, children: Vec<Block>) -> Block {
        Block::BulletedListItem {
            rich_text: vec![RichSpan::plain(text)],
            children,
        }
    }

    fn depth(blocks: &[Block]) -> usize {
        blocks
            .iter()
            .map(|block| 1 + depth(block.children()))
            .max()
            .unwrap_or(0)
    }

    fn texts(blocks: &[Block], out: &mut Vec<String>) {
        for block in blocks {
            out.push(
                block
                    .plain_text()
                    .trim_start_matches(INDENT_MARKER)
                    .to_owned(),
            );
            texts(block.children(), out);
        }
    }

    fn chain(levels: usize) -> Block {
        (1..levels).rev().fold(item(&format!("level {levels}"), vec![]), |inner, n| {
            item(&format!("level {n}"), vec![inner])
        })
    }

    #[test]
    fn test_shallow_tree_untouched() {
        let tree = vec![item("a", vec![item("b", vec![])]), Block::Divider];
        assert_eq!(flatten_deep_nesting(tree.clone(), 2), tree);
    }

    #[test]
    fn test_grandchildren_promoted_to_siblings() {
        let tree = vec![chain(4)];
        let flat = flatten_deep_nesting(tree, 2);
        assert_eq!(flat.len(), 1);
        let children = flat[0].children();
        let labels: Vec<_> = children.iter().map(Block::plain_text).collect();
        assert_eq!(labels, vec!["level 2", "└ level 3", "└ level 4"]);
        assert!(children.iter().all(|child| child.children().is_empty()));
    }

    #[test]
    fn test_depth_bound_and_text_preserved() {
        let tree = vec![
            chain(6),
            item(
                "wide",
                vec![
                    item("x", vec![item("y", vec![item("z", vec![])])]),
                    item("w", vec![]),
                ],
            ),
            Block::paragraph(vec![RichSpan::plain("plain")]),
        ];
        let mut before = Vec::new();
        texts(&tree, &mut before);
        let flat = flatten_deep_nesting(tree, 2);
        assert!(depth(&flat) <= 2);
        let mut after = Vec::new();
        texts(&flat, &mut after);
        before.sort();
        after.sort();
        assert_eq!(before, after);
    }

    #[test]
    fn test_deeper_limit() {
        let flat = flatten_deep_nesting(vec![chain(5)], 3);
        assert_eq!(depth(&flat), 3);
    }

    #[test]
    fn test_bold_quote_becomes_toggle() {
        let quote = Block::Quote {
            rich_text: vec![RichSpan::bold("Front Matter"), RichSpan::plain(" tail")],
            children: vec![Block::Divider],
        };
        let plain = Block::Quote {
            rich_text: vec![RichSpan::plain("just a quote")],
            children: vec![],
        };
        let promoted = promote_toggles(vec![quote, plain.clone()]);
        assert_eq!(
            promoted[0],
            Block::Toggle {
                rich_text: vec![RichSpan::bold("Front Matter"), RichSpan::plain(" tail")],
                children: vec![Block::Divider],
            }
        );
        assert_eq!(promoted[1], plain);
    }

    #[test]
    fn test_toggle_promotion_is_not_recursive() {
        let nested = Block::Quote {
            rich_text: vec![RichSpan::bold("inner")],
            children: vec![],
        };
        let outer = item("outer", vec![nested.clone()]);
        let promoted = promote_toggles(vec![outer]);
        assert_eq!(promoted[0].children()[0], nested);
    }
}
