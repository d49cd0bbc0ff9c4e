//! Glob Key Patterns
//!
//! Glob matching for cache keys, in the dialect Redis `SCAN MATCH` accepts:
//! `*` (any run), `?` (one char), `[abc]`, `[a-z]` and `[!abc]` / `[^abc]`
//! classes, and `\` to escape the next character. The same pattern string
//! therefore selects the same keys in both tiers.

use crate::error::{CacheError, CacheResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyOne,
    AnyRun,
    Class { negated: bool, items: Vec<ClassItem> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ClassItem {
    Char(char),
    Range(char, char),
}

impl ClassItem {
    fn contains(&self, c: char) -> bool {
        match *self {
            Self::Char(x) => x == c,
            Self::Range(lo, hi) => lo <= c && c <= hi,
        }
    }
}

/// A parsed glob pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    source: String,
    tokens: Vec<Token>,
}

impl KeyPattern {
    /// Parse a glob pattern
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidPattern`] for an empty pattern, an
    /// unterminated `[` class, or a trailing escape.
    pub fn parse(pattern: &str) -> CacheResult<Self> {
        let invalid = |reason| CacheError::InvalidPattern {
            pattern: pattern.to_string(),
            reason,
        };

        if pattern.is_empty() {
            return Err(invalid("pattern is empty"));
        }

        let mut tokens = Vec::new();
        let mut chars = pattern.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '*' => {
                    // Collapse runs of '*'
                    if tokens.last() != Some(&Token::AnyRun) {
                        tokens.push(Token::AnyRun);
                    }
                }
                '?' => tokens.push(Token::AnyOne),
                '\\' => match chars.next() {
                    Some(escaped) => tokens.push(Token::Literal(escaped)),
                    None => return Err(invalid("trailing escape character")),
                },
                '[' => {
                    let negated = matches!(chars.peek(), Some('!' | '^'));
                    if negated {
                        chars.next();
                    }

                    let mut items = Vec::new();
                    let mut closed = false;
                    // A ']' right after the opening bracket is a literal
                    let mut first = true;

                    while let Some(item) = chars.next() {
                        if item == ']' && !first {
                            closed = true;
                            break;
                        }
                        first = false;

                        let item = if item == '\\' {
                            chars.next().ok_or_else(|| invalid("trailing escape character"))?
                        } else {
                            item
                        };

                        let is_range = chars.peek() == Some(&'-');
                        if is_range {
                            let mut lookahead = chars.clone();
                            lookahead.next();
                            match lookahead.peek() {
                                Some(&hi) if hi != ']' => {
                                    chars.next();
                                    chars.next();
                                    let (lo, hi) = if item <= hi { (item, hi) } else { (hi, item) };
                                    items.push(ClassItem::Range(lo, hi));
                                    continue;
                                }
                                _ => {}
                            }
                        }
                        items.push(ClassItem::Char(item));
                    }

                    if !closed {
                        return Err(invalid("unterminated character class"));
                    }
                    tokens.push(Token::Class { negated, items });
                }
                other => tokens.push(Token::Literal(other)),
            }
        }

        Ok(Self {
            source: pattern.to_string(),
            tokens,
        })
    }

    /// The original pattern text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True when the pattern matches every key
    #[must_use]
    pub fn is_match_all(&self) -> bool {
        self.tokens == [Token::AnyRun]
    }

    /// Test a key against the pattern
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        let text: Vec<char> = key.chars().collect();
        let tokens = &self.tokens;

        // Iterative wildcard matching with single backtrack point
        let (mut t, mut k) = (0usize, 0usize);
        let mut star: Option<(usize, usize)> = None;

        while k < text.len() {
            let matched = match (tokens.get(t), text.get(k)) {
                (Some(Token::AnyRun), _) => {
                    star = Some((t, k));
                    t += 1;
                    continue;
                }
                (Some(Token::AnyOne), Some(_)) => true,
                (Some(Token::Literal(l)), Some(c)) => l == c,
                (Some(Token::Class { negated, items }), Some(c)) => {
                    items.iter().any(|i| i.contains(*c)) != *negated
                }
                _ => false,
            };

            if matched {
                t += 1;
                k += 1;
            } else if let Some((star_t, star_k)) = star {
                t = star_t + 1;
                k = star_k + 1;
                star = Some((star_t, star_k + 1));
            } else {
                return false;
            }
        }

        tokens.get(t..).is_some_and(|rest| rest.iter().all(|tok| *tok == Token::AnyRun))
    }
}

impl std::fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}
