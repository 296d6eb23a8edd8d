//! Boundary-preferring text chunker.
//!
//! Splits extracted markdown into overlapping chunks for embedding. Split
//! points are tried in order — paragraph break, line break, sentence break
//! (`". "`, then `"."`) — before falling back to a hard cut, so chunks
//! keep semantic coherence where the text allows it.
//!
//! Chunking is deterministic: the same text and policy always produce the
//! same chunk boundaries. Empty or whitespace-only input produces zero
//! chunks, which downstream stages treat as a successful no-op.

/// Split points tried in order before hard-cutting.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", "."];

/// Split `text` into chunks of at most `chunk_size` characters, carrying
/// `overlap` trailing characters of each chunk into the next.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let pieces = split_recursive(text, chunk_size, 0);
    merge_pieces(&pieces, chunk_size, overlap)
}

/// Break `text` into pieces no longer than `chunk_size` characters, trying
/// separators from `sep_index` onward and descending to finer separators
/// only when a piece is still too long.
fn split_recursive(text: &str, chunk_size: usize, sep_index: usize) -> Vec<String> {
    if text.chars().count() <= chunk_size {
        return vec![text.to_string()];
    }

    if sep_index >= SEPARATORS.len() {
        return hard_cut(text, chunk_size);
    }

    let sep = SEPARATORS[sep_index];
    if !text.contains(sep) {
        return split_recursive(text, chunk_size, sep_index + 1);
    }

    let mut pieces = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find(sep) {
        let end = pos + sep.len();
        let (piece, tail) = rest.split_at(end);
        if !piece.trim().is_empty() {
            if piece.chars().count() > chunk_size {
                pieces.extend(split_recursive(piece, chunk_size, sep_index + 1));
            } else {
                pieces.push(piece.to_string());
            }
        }
        rest = tail;
    }
    if !rest.trim().is_empty() {
        if rest.chars().count() > chunk_size {
            pieces.extend(split_recursive(rest, chunk_size, sep_index + 1));
        } else {
            pieces.push(rest.to_string());
        }
    }
    pieces
}

/// Cut `text` into fixed-size windows on char boundaries.
fn hard_cut(text: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|w| w.iter().collect())
        .collect()
}

/// Greedily pack pieces into chunks up to `chunk_size` characters, seeding
/// each new chunk with the tail `overlap` characters of the previous one.
fn merge_pieces(pieces: &[String], chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0usize;

    for piece in pieces {
        let piece_chars = piece.chars().count();
        if buf_chars > 0 && buf_chars + piece_chars > chunk_size {
            let tail = overlap_tail(&buf, overlap);
            push_chunk(&mut chunks, buf);
            // Seed the next chunk with the overlap, unless that would
            // push it past the size target.
            let tail_chars = tail.chars().count();
            if tail_chars + piece_chars <= chunk_size {
                buf = tail;
                buf_chars = tail_chars;
            } else {
                buf = String::new();
                buf_chars = 0;
            }
        }
        buf.push_str(piece);
        buf_chars += piece_chars;
    }
    push_chunk(&mut chunks, buf);
    chunks
}

fn push_chunk(chunks: &mut Vec<String>, buf: String) {
    let trimmed = buf.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// The last `overlap` characters of `buf`, on a char boundary.
fn overlap_tail(buf: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let chars: Vec<char> = buf.chars().collect();
    let start = chars.len().saturating_sub(overlap);
    chars[start..].iter().collect()
}
