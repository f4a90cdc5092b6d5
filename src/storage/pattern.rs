//! Glob matching for the `KEYS` command.
//!
//! Supports `*` (any run of bytes, including none) and `?` (exactly one byte).
//! Every other byte matches itself. Matching is a dynamic program over
//! pattern and key positions, so it runs in `O(|key| * |pattern|)` with no
//! backtracking blowup on patterns like `*a*a*a*b`.

/// A glob pattern over raw bytes.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    pattern: Vec<u8>,
}

impl GlobPattern {
    pub fn new(pattern: &[u8]) -> Self {
        // runs of stars behave like a single star
        let mut compact = Vec::with_capacity(pattern.len());
        for &b in pattern {
            if b == b'*' && compact.last() == Some(&b'*') {
                continue;
            }
            compact.push(b);
        }
        Self { pattern: compact }
    }

    /// Returns true for the pattern `*`, which matches every key.
    pub fn matches_all(&self) -> bool {
        self.pattern == b"*"
    }

    pub fn matches(&self, text: &[u8]) -> bool {
        let p = &self.pattern;

        // prev[j]: does p[..i] match text[..j]
        let mut prev = vec![false; text.len() + 1];
        let mut curr = vec![false; text.len() + 1];
        prev[0] = true;

        for i in 1..=p.len() {
            curr[0] = prev[0] && p[i - 1] == b'*';
            for j in 1..=text.len() {
                curr[j] = match p[i - 1] {
                    b'*' => curr[j - 1] || prev[j],
                    b'?' => prev[j - 1],
                    c => prev[j - 1] && c == text[j - 1],
                };
            }
            std::mem::swap(&mut prev, &mut curr);
        }

        prev[text.len()]
    }
}
