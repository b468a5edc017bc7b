//! Splitting long text replies into a few chat-sized messages.

/// Maximum number of messages one reply is split into.
pub const MAX_PARTS: usize = 4;

const TERMINATORS: &[char] = &['。', '？', '！', '?', '!', ' '];

/// Split `text` after every sentence terminator, keeping the terminator.
///
/// Whitespace-only pieces are folded into the preceding sentence.
fn sentences(text: &str) -> Vec<&str> {
    fn push(bounds: &mut Vec<(usize, usize)>, text: &str, start: usize, end: usize) {
        match bounds.last_mut() {
            Some(last) if text[start..end].trim().is_empty() => last.1 = end,
            _ => bounds.push((start, end)),
        }
    }

    let mut bounds = Vec::new();
    let mut start = 0;
    for (idx, ch) in text.char_indices() {
        if TERMINATORS.contains(&ch) {
            let end = idx + ch.len_utf8();
            push(&mut bounds, text, start, end);
            start = end;
        }
    }
    if start < text.len() {
        push(&mut bounds, text, start, text.len());
    }
    bounds.into_iter().map(|(s, e)| &text[s..e]).collect()
}

/// Split a reply into at most [`MAX_PARTS`] messages.
///
/// Texts with fewer than [`MAX_PARTS`] sentences are returned one sentence
/// per message. Longer texts are packed greedily so each message holds
/// roughly a quarter of the characters; the last message absorbs the rest.
/// Concatenating the parts always yields the original text.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<String> {
    let pieces = sentences(text);
    if pieces.len() < MAX_PARTS {
        return pieces.into_iter().map(str::to_string).collect();
    }

    let total: usize = pieces.iter().map(|s| s.chars().count()).sum();
    let target = total / MAX_PARTS;

    let mut parts: Vec<String> = Vec::with_capacity(MAX_PARTS);
    let mut current = String::new();
    let mut current_len = 0;
    for piece in pieces {
        let len = piece.chars().count();
        let fits = current_len + len <= target;
        if fits || current.is_empty() || parts.len() >= MAX_PARTS - 1 {
            current.push_str(piece);
            current_len += len;
        } else {
            parts.push(std::mem::take(&mut current));
            current.push_str(piece);
            current_len = len;
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}
