//! Splitting long text runs under the per-span length ceiling.
//!
//! Text is cut at sentence boundaries where possible, then at word boundaries,
//! and only as a last resort at raw character offsets. Lengths are measured in
//! UTF-16 code units, which is how the store counts characters.

use unicode_segmentation::UnicodeSegmentation as _;

use crate::block::RichSpan;

pub fn text_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Split `text` into trimmed chunks no longer than `max_len`.
///
/// Empty or whitespace-only input yields no chunks. Input that already fits is
/// returned as a single chunk.
pub fn split_text(text: &str, max_len: usize) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if text_len(trimmed) <= max_len {
        return vec![trimmed.to_owned()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for sentence in trimmed.split_sentence_bounds() {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        if text_len(sentence) > max_len {
            flush(&mut chunks, &mut current);
            chunks.extend(split_at_words(sentence, max_len));
        } else if current.is_empty() {
            current.push_str(sentence);
        } else if text_len(&current) + 1 + text_len(sentence) > max_len {
            flush(&mut chunks, &mut current);
            current.push_str(sentence);
        } else {
            current.push(' ');
            current.push_str(sentence);
        }
    }
    flush(&mut chunks, &mut current);
    chunks
}

fn flush(chunks: &mut Vec<String>, current: &mut String) {
    let chunk = std::mem::take(current);
    let chunk = chunk.trim();
    if !chunk.is_empty() {
        chunks.push(chunk.to_owned());
    }
}

/// Word-boundary split of a single overlong sentence.
fn split_at_words(text: &str, max_len: usize) -> Vec<String> {
    if !text.contains(char::is_whitespace) {
        return split_at_chars(text, max_len);
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    for word in text.split_word_bounds() {
        if text_len(word) > max_len {
            flush(&mut chunks, &mut current);
            chunks.extend(split_at_chars(word, max_len));
        } else if text_len(&current) + text_len(word) > max_len {
            flush(&mut chunks, &mut current);
            current.push_str(word);
        } else {
            current.push_str(word);
        }
    }
    flush(&mut chunks, &mut current);
    chunks
}

/// Force split at character offsets. Never splits a surrogate pair, so a
/// character wider than `max_len` gets a chunk of its own.
fn split_at_chars(text: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for c in text.chars() {
        let len = c.len_utf16();
        if current_len + len > max_len && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push(c);
        current_len += len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// The longest prefix of `text` within `max_len`, cut on a character
/// boundary.
pub fn truncate(text: &str, max_len: usize) -> &str {
    let mut len = 0;
    for (offset, c) in text.char_indices() {
        len += c.len_utf16();
        if len > max_len {
            return &text[..offset];
        }
    }
    text
}

/// Split content that must survive byte-for-byte, such as code. Cuts after a
/// newline when one is available, otherwise at a character offset. Nothing is
/// trimmed, so concatenating the pieces yields the input.
pub fn split_verbatim(text: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = text;
    while text_len(rest) > max_len {
        let mut cut = 0;
        let mut len = 0;
        let mut last_newline = None;
        for (offset, c) in rest.char_indices() {
            if len + c.len_utf16() > max_len {
                break;
            }
            len += c.len_utf16();
            cut = offset + c.len_utf8();
            if c == '\n' {
                last_newline = Some(cut);
            }
        }
        let first = rest.chars().next().map_or(1, char::len_utf8);
        let cut = last_newline.unwrap_or(cut).max(first);
        let (head, tail) = rest.split_at(cut);
        chunks.push(head.to_owned());
        rest = tail;
    }
    if !rest.is_empty() {
        chunks.push(rest.to_owned());
    }
    chunks
}

/// Split every span longer than `max_len`, copying style and link to each
/// piece.
pub fn split_rich_text(spans: Vec<RichSpan>, max_len: usize) -> Vec<RichSpan> {
    spans
        .into_iter()
        .flat_map(|span| {
            if text_len(&span.content) <= max_len {
                vec![span]
            } else {
                split_text(&span.content, max_len)
                    .into_iter()
                    .map(|chunk| span.with_content(chunk))
                    .collect()
            }
        })
        .collect()
}

/// Same as [`split_rich_text`] but lossless, for code blocks.
pub fn split_rich_text_verbatim(spans: Vec<RichSpan>, max_len: usize) -> Vec<RichSpan> {
    spans
        .into_iter()
        .flat_map(|span| {
            if text_len(&span.content) <= max_len {
                vec![span]
            } else {
                split_verbatim(&span.content, max_len)
                    .into_iter()
                    .map(|chunk| span.with_content(chunk))
                    .collect()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Annotations;

    fn words(text: &str) -> Vec<&str> {
        text.split_whitespace().collect()
    }

    #[test]
    fn test_empty_input() {
        assert!(split_text("", 2000).is_empty());
        assert!(split_text("   \n\t ", 2000).is_empty());
    }

    #[test]
    fn test_exact_limit_is_single_chunk() {
        let text = "a".repeat(2000);
        assert_eq!(split_text(&text, 2000), vec![text]);
    }

    #[test]
    fn test_prefers_sentence_boundaries() {
        let text = "First sentence here. Second sentence here. Third one.";
        let chunks = split_text(text, 25);
        assert_eq!(
            chunks,
            vec!["First sentence here.", "Second sentence here.", "Third one."]
        );
    }

    #[test]
    fn test_packs_sentences_until_limit() {
        let text = "One. Two. Three. Four.";
        let chunks = split_text(text, 10);
        assert_eq!(chunks, vec!["One. Two.", "Three.", "Four."]);
    }

    #[test]
    fn test_long_sentence_falls_back_to_words() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let chunks = split_text(text, 12);
        assert!(chunks.iter().all(|c| text_len(c) <= 12));
        let joined = chunks.join(" ");
        assert_eq!(words(&joined), words(text));
    }

    #[test]
    fn test_long_word_is_force_split() {
        let text = "x".repeat(45);
        let chunks = split_text(&text, 20);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_chunks_within_limit_and_words_preserved() {
        let sentence = "The quick brown fox jumps over the lazy dog. ";
        let text = sentence.repeat(200);
        for max in [50, 100, 2000] {
            let chunks = split_text(&text, max);
            assert!(chunks.iter().all(|c| text_len(c) <= max));
            assert!(chunks.iter().all(|c| c.trim() == c));
            let joined = chunks.join(" ");
            assert_eq!(words(&joined), words(&text));
        }
    }

    #[test]
    fn test_multibyte_force_split_respects_utf16() {
        let text = "😀".repeat(5);
        let chunks = split_text(&text, 4);
        assert!(chunks.iter().all(|c| text_len(c) <= 4));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_single_unit_limit() {
        assert_eq!(split_text("abc", 1), vec!["a", "b", "c"]);
        assert_eq!(split_text("a😀", 1), vec!["a", "😀"]);
    }

    #[test]
    fn test_truncate_keeps_char_boundary() {
        assert_eq!(truncate("ab\ncd", 4), "ab\nc");
        assert_eq!(truncate("a😀b", 2), "a");
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn test_rich_text_split_copies_annotations() {
        let span = RichSpan {
            content: "Sentence one. Sentence two.".into(),
            link: Some("https://example.com".into()),
            annotations: Annotations {
                italic: true,
                ..Default::default()
            },
        };
        let split = split_rich_text(vec![RichSpan::plain("short"), span.clone()], 15);
        assert_eq!(split.len(), 3);
        assert_eq!(split[0].content, "short");
        for piece in &split[1..] {
            assert!(piece.same_style(&span));
        }
        assert_eq!(split[1].content, "Sentence one.");
        assert_eq!(split[2].content, "Sentence two.");
    }

    #[test]
    fn test_verbatim_split_is_lossless() {
        let code = "fn main() {\n    println!(\"hi\");\n}\n".repeat(10);
        let chunks = split_verbatim(&code, 40);
        assert!(chunks.iter().all(|c| text_len(c) <= 40));
        assert_eq!(chunks.concat(), code);
        assert!(chunks[0].ends_with('\n'));
    }
}
