use regex::{Regex, RegexBuilder};

use crate::database::error::StoreError;

/// Compiled include/exclude patterns of a boolean keyword search.
///
/// An entry matches when every include pattern finds at least one of its
/// keywords and no exclude pattern finds any of them. Patterns search
/// case-insensitively inside each keyword on its own.
#[derive(Debug, Clone)]
pub struct BooleanQuery {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

fn compile(pattern: &str) -> Result<Regex, StoreError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| StoreError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}

impl BooleanQuery {
    /// Fails on the first invalid pattern, before anything is matched.
    pub fn compile<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Result<Self, StoreError> {
        Ok(Self {
            include: include.iter().map(|p| compile(p.as_ref())).collect::<Result<_, _>>()?,
            exclude: exclude.iter().map(|p| compile(p.as_ref())).collect::<Result<_, _>>()?,
        })
    }

    pub fn matches<S: AsRef<str>>(&self, keywords: &[S]) -> bool {
        self.matches_all_includes(keywords) && !self.matches_any_exclude(keywords)
    }

    fn matches_all_includes<S: AsRef<str>>(&self, keywords: &[S]) -> bool {
        self.include
            .iter()
            .all(|re| keywords.iter().any(|kw| re.is_match(kw.as_ref())))
    }

    fn matches_any_exclude<S: AsRef<str>>(&self, keywords: &[S]) -> bool {
        keywords
            .iter()
            .any(|kw| self.exclude.iter().any(|re| re.is_match(kw.as_ref())))
    }
}
