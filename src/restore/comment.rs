use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Normalized content tuple of one danmaku. Equality on this tuple is the
/// dedup identity within a video part and the match key for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommentKey {
    pub text: String,
    pub progress_ms: u64,
    pub color: u32,
    pub font_size: u32,
}

/// One video part: the user-facing video id plus the part (page) id the
/// comment APIs are keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetId {
    pub bvid: String,
    pub cid: u64,
}

/// Deterministic digest of a comment on a video part.
///
/// The canonical encoding is newline-joined cid / progress / color / size
/// followed by the raw text bytes, so the same tuple always hashes to the
/// same value across runs and restarts. Comments are not deduplicated
/// across parts: the cid is part of the encoding.
pub fn fingerprint(cid: u64, key: &CommentKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{cid}\n{}\n{}\n{}\n",
        key.progress_ms, key.color, key.font_size
    ));
    hasher.update(key.text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::{CommentKey, fingerprint};

    fn key(text: &str, progress_ms: u64) -> CommentKey {
        CommentKey {
            text: text.to_string(),
            progress_ms,
            color: 16_777_215,
            font_size: 25,
        }
    }

    #[test]
    fn fingerprint_is_stable_across_calls() {
        let k = key("前方高能", 12_345);
        assert_eq!(fingerprint(99, &k), fingerprint(99, &k));
    }

    #[test]
    fn fingerprint_changes_with_every_tuple_field() {
        let base = key("同文", 1000);
        let fp = fingerprint(7, &base);

        assert_ne!(fp, fingerprint(8, &base));
        assert_ne!(fp, fingerprint(7, &key("异文", 1000)));
        assert_ne!(fp, fingerprint(7, &key("同文", 1001)));

        let mut recolored = base.clone();
        recolored.color = 0xFF0000;
        assert_ne!(fp, fingerprint(7, &recolored));

        let mut resized = base;
        resized.font_size = 18;
        assert_ne!(fp, fingerprint(7, &resized));
    }

    #[test]
    fn fingerprint_separator_cannot_be_forged_by_text() {
        // A text that embeds the separator must not collide with shifted fields.
        let a = key("1\n2", 3);
        let b = key("2", 31);
        assert_ne!(fingerprint(7, &a), fingerprint(7, &b));
    }
}
