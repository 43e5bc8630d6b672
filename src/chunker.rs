//! Fence-aware markdown splitting
//!
//! Documents are split into chunks of roughly [`CHUNK_TARGET`] characters for
//! independent encryption. Splits only happen at line boundaries and never
//! inside a fenced code block, so a chunk always renders standalone. Runs of
//! three or more newlines are collapsed to a blank line.

/// Target chunk size in characters.
pub const CHUNK_TARGET: usize = 2000;

fn toggles_fence(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

/// Collapse runs of three or more newlines down to exactly two.
fn collapse_blank_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0usize;
    for ch in text.chars() {
        if ch == '\n' {
            newlines += 1;
            if newlines <= 2 {
                out.push(ch);
            }
        } else {
            newlines = 0;
            out.push(ch);
        }
    }
    out
}

/// Split markdown into chunks of roughly `target` characters, keeping fenced
/// code blocks intact. Whitespace-only chunks are dropped.
pub fn split_markdown(markdown: &str, target: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buffer = String::new();
    let mut inside_fence = false;

    let lines: Vec<&str> = markdown.split('\n').collect();
    let last = lines.len().saturating_sub(1);

    for (index, line) in lines.iter().enumerate() {
        if toggles_fence(line) {
            inside_fence = !inside_fence;
        }
        buffer.push_str(line);
        if index != last {
            buffer.push('\n');
        }
        if !inside_fence && buffer.len() >= target {
            push_buffer(&mut chunks, &mut buffer);
        }
    }

    push_buffer(&mut chunks, &mut buffer);
    chunks
}

fn push_buffer(chunks: &mut Vec<String>, buffer: &mut String) {
    if !buffer.trim().is_empty() {
        chunks.push(collapse_blank_runs(buffer));
    }
    buffer.clear();
}
