//! Split quote lines into embedding-sized chunks on sentence boundaries.

/// Sentences end at `.`, `!` or `?` followed by whitespace.
pub fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut iter = text.char_indices().peekable();
    while let Some((i, c)) = iter.next() {
        if matches!(c, '.' | '!' | '?') && iter.peek().is_some_and(|(_, next)| next.is_whitespace())
        {
            let end = i + c.len_utf8();
            let s = text[start..end].trim();
            if !s.is_empty() {
                out.push(s);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

// Break one oversized sentence on words, and oversized words on chars.
fn fit(sentence: &str, max_chars: usize) -> Vec<String> {
    if sentence.chars().count() <= max_chars {
        return vec![sentence.to_string()];
    }
    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        let words: Vec<String> = if word.chars().count() > max_chars {
            let chars: Vec<char> = word.chars().collect();
            chars.chunks(max_chars).map(|c| c.iter().collect()).collect()
        } else {
            vec![word.to_string()]
        };
        for w in words {
            if current.is_empty() {
                current = w;
            } else if current.chars().count() + 1 + w.chars().count() <= max_chars {
                current.push(' ');
                current.push_str(&w);
            } else {
                pieces.push(std::mem::replace(&mut current, w));
            }
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Greedily pack sentences into chunks of at most `max_chars` characters.
pub fn chunk_line(line: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    for piece in sentences(line.trim())
        .into_iter()
        .flat_map(|s| fit(s, max_chars))
    {
        if current.is_empty() {
            current = piece;
        } else if current.chars().count() + 1 + piece.chars().count() <= max_chars {
            current.push(' ');
            current.push_str(&piece);
        } else {
            chunks.push(std::mem::replace(&mut current, piece));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_lines_are_one_chunk() {
        assert_eq!(chunk_line("  I'll be back.  ", 400), vec!["I'll be back."]);
        assert!(chunk_line("   ", 400).is_empty());
    }

    #[test]
    fn sentences_pack_until_the_limit() {
        let line = "Do. Or do not. There is no try.";
        assert_eq!(sentences(line), vec!["Do.", "Or do not.", "There is no try."]);
        assert_eq!(chunk_line(line, 20), vec!["Do. Or do not.", "There is no try."]);
    }

    #[test]
    fn no_chunk_exceeds_the_limit() {
        let line = "Frankly, my dear, I don't give a damn! Supercalifragilisticexpialidocious is long.";
        for max in [5, 12, 30] {
            let chunks = chunk_line(line, max);
            assert!(!chunks.is_empty());
            assert!(chunks.iter().all(|c| c.chars().count() <= max), "{max}: {chunks:?}");
        }
    }

    #[test]
    fn decimals_do_not_split() {
        assert_eq!(sentences("It costs 3.50 today. Fine."), vec!["It costs 3.50 today.", "Fine."]);
    }
}
