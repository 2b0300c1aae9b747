//! Bracket-aware title tokenizer.
//!
//! Release titles usually carry bracketed annotations in front of the real
//! name: `(C89) [Circle Name] My Title`. The tokenizer splits such text into
//! the bracketed prefix components and the plain-text stem that follows them.

use thiserror::Error;

/// Opening and closing characters, pairwise.
const BRACKET_PAIRS: &[(char, char)] = &[
    ('(', ')'),
    ('[', ']'),
    ('{', '}'),
    ('“', '”'),
    ('‹', '›'),
    ('«', '»'),
    ('（', '）'),
    ('［', '］'),
    ('｛', '｝'),
    ('｟', '｠'),
    ('「', '」'),
    ('〈', '〉'),
    ('《', '》'),
    ('【', '】'),
    ('〔', '〕'),
    ('⦗', '⦘'),
    ('『', '』'),
    ('〖', '〗'),
    ('〘', '〙'),
    ('｢', '｣'),
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("brackets are not balanced")]
    Unbalanced,
    #[error("closing bracket '{0}' without an opening bracket")]
    UnexpectedClosing(char),
    #[error("closing bracket '{found}' does not match expected '{expected}'")]
    MismatchedClosing { expected: char, found: char },
    #[error("missing closing bracket")]
    Unclosed,
}

fn closing_for(ch: char) -> Option<char> {
    BRACKET_PAIRS
        .iter()
        .find(|(open, _)| *open == ch)
        .map(|(_, close)| *close)
}

fn is_opening(ch: char) -> bool {
    closing_for(ch).is_some()
}

fn is_closing(ch: char) -> bool {
    BRACKET_PAIRS.iter().any(|(_, close)| *close == ch)
}

/// Checks every bracket family against a single expectation stack, so
/// crossed families like `(a[b)c]` are rejected.
pub fn is_bracket_balanced(s: &str) -> bool {
    let mut expected = Vec::new();
    for ch in s.chars() {
        if let Some(close) = closing_for(ch) {
            expected.push(close);
        } else if is_closing(ch) {
            if expected.pop() != Some(ch) {
                return false;
            }
        }
    }
    expected.is_empty()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Component<'a> {
    pub text: &'a str,
    pub bracketed: bool,
}

/// Splits the next component off the front of `s`.
///
/// Returns `Ok(None)` once the input is exhausted. A bracketed component's
/// text excludes its outermost bracket pair but keeps any nested brackets.
pub fn next_component(s: &str) -> Result<Option<(Component<'_>, &str)>, ParseError> {
    let mut chars = s.char_indices();
    let first = match chars.next() {
        Some((_, ch)) => ch,
        None => return Ok(None),
    };

    let Some(first_close) = closing_for(first) else {
        let end = s.find(is_opening).unwrap_or(s.len());
        let component = Component { text: &s[..end], bracketed: false };
        return Ok(Some((component, &s[end..])));
    };

    let body_start = first.len_utf8();
    let mut expected = vec![first_close];
    for (idx, ch) in chars {
        if let Some(close) = closing_for(ch) {
            expected.push(close);
        } else if is_closing(ch) {
            match expected.pop() {
                None => return Err(ParseError::UnexpectedClosing(ch)),
                Some(want) if want != ch => {
                    return Err(ParseError::MismatchedClosing { expected: want, found: ch })
                }
                Some(_) => {}
            }
            if expected.is_empty() {
                let component = Component { text: &s[body_start..idx], bracketed: true };
                return Ok(Some((component, &s[idx + ch.len_utf8()..])));
            }
        }
    }
    Err(ParseError::Unclosed)
}

/// Breaks every component down to its innermost plain-text runs.
///
/// `"(a)(b)"` flattens to `["a", "b"]`; blank runs are dropped.
pub fn flatten_components<S: AsRef<str>>(components: &[S]) -> Result<Vec<String>, ParseError> {
    let mut out = Vec::new();
    for component in components {
        flatten_into(component.as_ref(), &mut out)?;
    }
    Ok(out)
}

fn flatten_into(mut s: &str, out: &mut Vec<String>) -> Result<(), ParseError> {
    while let Some((component, rest)) = next_component(s)? {
        if component.bracketed {
            flatten_into(component.text, out)?;
        } else {
            let text = component.text.trim();
            if !text.is_empty() {
                out.push(text.to_string());
            }
        }
        s = rest;
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixStem {
    pub prefixes: Vec<String>,
    pub stem: String,
}

/// Splits a title into its leading bracketed prefixes and the stem.
///
/// Bracketed components are collected until the first plain-text run, which
/// becomes the stem; anything after the stem is not part of the result.
pub fn parse_prefix_stem(s: &str) -> Result<PrefixStem, ParseError> {
    if !is_bracket_balanced(s) {
        return Err(ParseError::Unbalanced);
    }

    let mut raw_prefixes = Vec::new();
    let mut stem = String::new();
    let mut rest = s.trim();
    while let Some((component, tail)) = next_component(rest)? {
        if component.bracketed {
            raw_prefixes.push(component.text.trim());
        } else {
            stem = component.text.trim().to_string();
            break;
        }
        rest = tail.trim();
    }

    Ok(PrefixStem {
        prefixes: flatten_components(&raw_prefixes)?,
        stem,
    })
}
