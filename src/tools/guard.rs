//! Destructive-action guard for the write path.
//!
//! Blocks statements containing `DROP` or `TRUNCATE` unless the caller has
//! explicitly authorized destructive actions. Matching is whole-word and
//! case-insensitive over the raw text. Comments and string literals are
//! scanned too, so `'drop'` inside a literal is blocked.

use crate::error::{GatewayError, GatewayResult};
use crate::tools::sql_validator::first_keyword_match;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Keywords that require explicit authorization.
pub const DESTRUCTIVE_KEYWORDS: &[&str] = &["drop", "truncate"];

/// Per-request authorization supplied by the caller.
///
/// Immutable for the duration of a request. Defaults to non-destructive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationContext {
    #[serde(default)]
    pub allow_destructive: bool,
}

impl AuthorizationContext {
    pub const fn read_only() -> Self {
        Self {
            allow_destructive: false,
        }
    }

    pub const fn destructive() -> Self {
        Self {
            allow_destructive: true,
        }
    }

    pub const fn new(allow_destructive: bool) -> Self {
        Self { allow_destructive }
    }
}

/// Return the first destructive keyword in `sql`, if any.
///
/// # Examples
///
/// ```
/// use sql_agent_gateway::tools::guard::check_destructive;
///
/// assert_eq!(check_destructive("DROP TABLE users"), Some("drop"));
/// assert_eq!(check_destructive("SELECT * FROM backdrop"), None);
/// ```
pub fn check_destructive(sql: &str) -> Option<&'static str> {
    first_keyword_match(sql, DESTRUCTIVE_KEYWORDS)
}

/// True when `sql` may proceed under `ctx`.
pub fn guard(sql: &str, ctx: AuthorizationContext) -> bool {
    ctx.allow_destructive || check_destructive(sql).is_none()
}

/// Like [`guard`], but returns a `DestructiveActionBlocked` error naming the keyword.
pub fn enforce(sql: &str, ctx: AuthorizationContext) -> GatewayResult<()> {
    if ctx.allow_destructive {
        return Ok(());
    }
    match check_destructive(sql) {
        Some(keyword) => {
            warn!(keyword = keyword, "Destructive statement blocked");
            Err(GatewayError::destructive_action_blocked(keyword))
        }
        None => Ok(()),
    }
}
