use crate::restore::comment::CommentKey;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Load an ordered candidate batch from a JSONL file, one normalized
/// comment tuple per line. This is the hand-off point from the (out of
/// scope) capture-file validator: whatever produced the file owns XML
/// parsing and cleanup, this loader only enforces the tuple shape.
pub fn load_candidates(path: &Path) -> Result<Vec<CommentKey>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;

    let mut out = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let key: CommentKey = serde_json::from_str(trimmed).with_context(|| {
            format!("failed to parse candidate line {} in {}", lineno + 1, path.display())
        })?;
        if key.text.trim().is_empty() {
            anyhow::bail!(
                "candidate line {} in {} has empty text",
                lineno + 1,
                path.display()
            );
        }
        out.push(key);
    }
    Ok(out)
}
