//! SQL statement classification for the read-only gateway.
//!
//! This module decides whether an arbitrary, untrusted SQL string may run through
//! the read-only gateway. The check is lexical:
//!
//! 1. Comments are stripped first, so neither a forbidden keyword nor a statement
//!    terminator can hide inside one.
//! 2. The statement must start with `SELECT` or `WITH`.
//! 3. Forbidden keywords are matched as whole words (so `created_at` is fine,
//!    `create` is not).
//! 4. Exactly one statement is allowed.
//!
//! An accepted statement is returned as a [`ReadOnlyStatement`], which can only be
//! constructed here. The gateway executes that normalized text, never the raw input.

use crate::error::{GatewayError, GatewayResult};
use serde::Serialize;
use std::fmt;

/// Keywords that reject a statement in the read-only gateway.
///
/// Distinct from the destructive list in [`crate::tools::guard`]; the two gates
/// protect call sites with different trust levels.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "truncate", "alter", "grant", "revoke", "comment",
    "create", "attach", "replace", "vacuum", "merge", "call", "execute",
];

/// Why a statement was rejected by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionReason {
    /// Nothing left after stripping comments and whitespace
    EmptyStatement,
    /// Does not start with SELECT or WITH
    NotReadOnly,
    /// Contains a forbidden keyword as a whole word
    ForbiddenKeyword { keyword: &'static str },
    /// Contains a statement separator
    MultipleStatements,
}

impl RejectionReason {
    /// Stable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyStatement => "empty_statement",
            Self::NotReadOnly => "not_read_only",
            Self::ForbiddenKeyword { .. } => "forbidden_keyword",
            Self::MultipleStatements => "multiple_statements",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyStatement => write!(f, "empty statement"),
            Self::NotReadOnly => write!(f, "only SELECT or WITH statements are allowed"),
            Self::ForbiddenKeyword { keyword } => {
                write!(f, "forbidden keyword '{}'", keyword)
            }
            Self::MultipleStatements => write!(f, "exactly one statement is allowed"),
        }
    }
}

/// A single, comment-free, read-only statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOnlyStatement(String);

impl ReadOnlyStatement {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ReadOnlyStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of classifying one raw statement. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Accepted(ReadOnlyStatement),
    Rejected(RejectionReason),
}

impl Classification {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    /// The normalized statement, if accepted.
    pub fn normalized_statement(&self) -> Option<&str> {
        match self {
            Self::Accepted(stmt) => Some(stmt.as_str()),
            Self::Rejected(_) => None,
        }
    }

    pub fn rejection_reason(&self) -> Option<RejectionReason> {
        match self {
            Self::Accepted(_) => None,
            Self::Rejected(reason) => Some(*reason),
        }
    }

    pub fn into_result(self) -> GatewayResult<ReadOnlyStatement> {
        match self {
            Self::Accepted(stmt) => Ok(stmt),
            Self::Rejected(reason) => Err(GatewayError::rejected(reason)),
        }
    }
}

/// Classify a raw SQL string.
///
/// # Examples
///
/// ```
/// use sql_agent_gateway::tools::sql_validator::{classify, RejectionReason};
///
/// let accepted = classify("-- DROP TABLE x\nSELECT 1");
/// assert_eq!(accepted.normalized_statement(), Some("SELECT 1"));
///
/// let rejected = classify("SELECT 1; SELECT 2");
/// assert_eq!(rejected.rejection_reason(), Some(RejectionReason::MultipleStatements));
/// ```
pub fn classify(sql: &str) -> Classification {
    let stripped = strip_comments(sql);
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        return Classification::Rejected(RejectionReason::EmptyStatement);
    }

    // A lone terminator is not empty input; it fails the prefix check below.
    let statement = match trimmed.strip_suffix(';') {
        Some(rest) => rest.trim_end(),
        None => trimmed,
    };

    if !has_read_only_prefix(statement) {
        return Classification::Rejected(RejectionReason::NotReadOnly);
    }

    if let Some(keyword) = first_keyword_match(statement, FORBIDDEN_KEYWORDS) {
        return Classification::Rejected(RejectionReason::ForbiddenKeyword { keyword });
    }

    if statement.contains(';') {
        return Classification::Rejected(RejectionReason::MultipleStatements);
    }

    Classification::Accepted(ReadOnlyStatement(statement.to_string()))
}

/// Classify and convert a rejection into a [`GatewayError::Rejected`].
pub fn validate_readonly(sql: &str) -> GatewayResult<ReadOnlyStatement> {
    classify(sql).into_result()
}

/// Remove `-- ...` line comments and `/* ... */` block comments.
///
/// Quoted literals and identifiers are copied through untouched. A block comment
/// is replaced by a single space, as the engines treat it as a token separator.
/// An unterminated block comment swallows the rest of the input.
pub fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(open) = quote {
            out.push(c);
            if c == open {
                quote = None;
            }
            continue;
        }

        match c {
            '\'' | '"' => {
                quote = Some(c);
                out.push(c);
            }
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }

    out
}

pub(crate) fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Find the first whole-word, case-insensitive occurrence of any keyword.
pub(crate) fn first_keyword_match(
    sql: &str,
    keywords: &[&'static str],
) -> Option<&'static str> {
    sql.split(|c: char| !is_word_char(c))
        .filter(|word| !word.is_empty())
        .find_map(|word| {
            keywords
                .iter()
                .copied()
                .find(|keyword| word.eq_ignore_ascii_case(keyword))
        })
}

fn has_read_only_prefix(statement: &str) -> bool {
    starts_with_word(statement, "select") || starts_with_cte(statement)
}

fn starts_with_word(statement: &str, word: &str) -> bool {
    let Some(head) = statement.get(..word.len()) else {
        return false;
    };
    head.eq_ignore_ascii_case(word)
        && statement[word.len()..]
            .chars()
            .next()
            .is_none_or(|c| !is_word_char(c))
}

/// `WITH` must be followed by whitespace.
fn starts_with_cte(statement: &str) -> bool {
    let Some(head) = statement.get(..4) else {
        return false;
    };
    head.eq_ignore_ascii_case("with")
        && statement[4..]
            .chars()
            .next()
            .is_some_and(char::is_whitespace)
}
