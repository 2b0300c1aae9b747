/// Location of the longest common contiguous run between two strings.
///
/// Offsets and length count `char`s, not bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommonSubstring {
    pub start_a: usize,
    pub start_b: usize,
    pub len: usize,
}

/// Longest common substring (contiguous, not subsequence) of `a` and `b`.
///
/// Dynamic programming over one rolling row indexed by position in `a`,
/// advanced once per character of `b`. The best run is only replaced by a
/// strictly longer one, so among equal-length runs the first found wins:
/// the one ending earliest in `b`, then the leftmost in `a`.
pub fn longest_common_substring(a: &str, b: &str) -> CommonSubstring {
    let a: Vec<char> = a.chars().collect();
    if a.is_empty() {
        return CommonSubstring::default();
    }

    let mut row = vec![0usize; a.len()];
    let mut best = CommonSubstring::default();
    for (j, cb) in b.chars().enumerate() {
        // row[i - 1] from the previous b position
        let mut diagonal = 0;
        for (i, ca) in a.iter().enumerate() {
            let above = row[i];
            row[i] = if *ca == cb { diagonal + 1 } else { 0 };
            diagonal = above;
            if row[i] > best.len {
                best = CommonSubstring {
                    start_a: i + 1 - row[i],
                    start_b: j + 1 - row[i],
                    len: row[i],
                };
            }
        }
    }
    best
}

/// The text of the longest common substring, taken from `a`.
pub fn lcs(a: &str, b: &str) -> String {
    let found = longest_common_substring(a, b);
    a.chars().skip(found.start_a).take(found.len).collect()
}
