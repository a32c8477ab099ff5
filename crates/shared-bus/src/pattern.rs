//! # Message Type Patterns
//!
//! Subscriptions select message types with a glob (`Event:*`, `Config?`).
//! Patterns are compiled once at subscribe time. Matching is ASCII
//! case-insensitive.

use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(Vec<char>),
    AnyOne,
    AnyMany,
}

/// A compiled message type pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypePattern {
    source: String,
    tokens: Vec<Token>,
}

impl TypePattern {
    /// Compile a glob. `*` matches any run of characters (including none),
    /// `?` matches exactly one.
    pub fn compile(pattern: &str) -> Self {
        let mut tokens: Vec<Token> = Vec::new();
        let mut literal: Vec<char> = Vec::new();

        for c in pattern.chars() {
            match c {
                '*' | '?' => {
                    if !literal.is_empty() {
                        tokens.push(Token::Literal(std::mem::take(&mut literal)));
                    }
                    let token = if c == '*' { Token::AnyMany } else { Token::AnyOne };
                    // Collapse runs of `*`.
                    if token == Token::AnyMany && tokens.last() == Some(&Token::AnyMany) {
                        continue;
                    }
                    tokens.push(token);
                }
                _ => literal.push(c.to_ascii_lowercase()),
            }
        }
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        Self {
            source: pattern.to_string(),
            tokens,
        }
    }

    /// Pattern matching every message type.
    pub fn any() -> Self {
        Self::compile("*")
    }

    /// The pattern as written by the subscriber.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_wildcard(&self) -> bool {
        self.tokens
            .iter()
            .any(|t| matches!(t, Token::AnyOne | Token::AnyMany))
    }

    pub fn matches(&self, message_type: &str) -> bool {
        let input: Vec<char> = message_type
            .chars()
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match_tokens(&self.tokens, &input)
    }
}

/// Iterative glob match with single-star backtracking.
fn match_tokens(tokens: &[Token], input: &[char]) -> bool {
    let mut t = 0;
    let mut i = 0;
    // (token index after the star, input index the star is currently absorbing up to)
    let mut backtrack: Option<(usize, usize)> = None;

    loop {
        if t < tokens.len() {
            match &tokens[t] {
                Token::AnyMany => {
                    backtrack = Some((t + 1, i));
                    t += 1;
                    continue;
                }
                Token::AnyOne if i < input.len() => {
                    t += 1;
                    i += 1;
                    continue;
                }
                Token::Literal(lit) if input[i..].starts_with(lit) => {
                    t += 1;
                    i += lit.len();
                    continue;
                }
                _ => {}
            }
        } else if i == input.len() {
            return true;
        }

        // Mismatch: let the last star absorb one more character.
        match backtrack {
            Some((star_next, absorbed)) if absorbed < input.len() => {
                backtrack = Some((star_next, absorbed + 1));
                t = star_next;
                i = absorbed + 1;
            }
            _ => return false,
        }
    }
}

impl fmt::Display for TypePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for TypePattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl From<&str> for TypePattern {
    fn from(pattern: &str) -> Self {
        Self::compile(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_exact_match() {
        let p = TypePattern::compile("Changed");
        assert!(p.matches("Changed"));
        assert!(p.matches("changed"));
        assert!(!p.matches("Changed2"));
        assert!(!p.matches("Change"));
        assert!(!p.is_wildcard());
    }

    #[test]
    fn test_prefix_wildcard() {
        let p = TypePattern::compile("Event:*");
        assert!(p.matches("Event:ModuleLoaded"));
        assert!(p.matches("Event:"));
        assert!(!p.matches("Events:ModuleLoaded"));
        assert!(!p.matches("Config:Changed"));
        assert!(p.is_wildcard());
    }

    #[test]
    fn test_inner_wildcards() {
        let p = TypePattern::compile("Lab*Started*");
        assert!(p.matches("LabVMStartedNow"));
        assert!(p.matches("LabStarted"));
        assert!(!p.matches("LabStopped"));

        let q = TypePattern::compile("Config?");
        assert!(q.matches("ConfigA"));
        assert!(!q.matches("Config"));
        assert!(!q.matches("ConfigAB"));
    }

    #[test]
    fn test_star_backtracking() {
        let p = TypePattern::compile("*ab*ab");
        assert!(p.matches("xxabyyab"));
        assert!(p.matches("abab"));
        assert!(!p.matches("abba"));
    }

    #[test]
    fn test_any() {
        let p = TypePattern::any();
        assert!(p.matches(""));
        assert!(p.matches("Anything:At:All"));
    }

    proptest! {
        #[test]
        fn prop_literal_pattern_matches_itself(s in "[A-Za-z0-9:._-]{0,24}") {
            prop_assert!(TypePattern::compile(&s).matches(&s));
        }

        #[test]
        fn prop_prefix_star_matches_any_suffix(prefix in "[a-z]{1,8}", suffix in "[a-z:]{0,12}") {
            let pattern = TypePattern::compile(&format!("{prefix}*"));
            let candidate = format!("{}{}", prefix, suffix);
            prop_assert!(pattern.matches(&candidate));
        }
    }
}
