//! Session token resolution.
//!
//! Derives the caller's session token from the carriers a request may bring:
//! a persistent client-side cookie first, a request header second. When
//! neither is present a fresh token is minted. Pure derivation — no storage,
//! no failure path; persisting the resolved identity is the store's job.

use uuid::Uuid;

/// A resolved session token, with provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedToken {
    pub token: String,
    /// True when no carrier held a token and a fresh one was minted.
    pub minted: bool,
}

/// Resolve a session token from the available carriers.
///
/// The cookie value takes priority over the header; blank values count as
/// absent.
pub fn resolve_token(cookie: Option<&str>, header: Option<&str>) -> ResolvedToken {
    if let Some(token) = non_empty(cookie) {
        return ResolvedToken {
            token: token.to_string(),
            minted: false,
        };
    }
    if let Some(token) = non_empty(header) {
        return ResolvedToken {
            token: token.to_string(),
            minted: false,
        };
    }
    ResolvedToken {
        token: Uuid::new_v4().to_string(),
        minted: true,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_wins_over_header() {
        let resolved = resolve_token(Some("cookie-token"), Some("header-token"));
        assert_eq!(resolved.token, "cookie-token");
        assert!(!resolved.minted);
    }

    #[test]
    fn header_used_when_cookie_absent() {
        let resolved = resolve_token(None, Some("header-token"));
        assert_eq!(resolved.token, "header-token");
        assert!(!resolved.minted);
    }

    #[test]
    fn blank_cookie_falls_through_to_header() {
        let resolved = resolve_token(Some("   "), Some("header-token"));
        assert_eq!(resolved.token, "header-token");
        assert!(!resolved.minted);
    }

    #[test]
    fn mints_when_no_carrier_present() {
        let resolved = resolve_token(None, None);
        assert!(resolved.minted);
        assert!(Uuid::parse_str(&resolved.token).is_ok());
    }

    #[test]
    fn minted_tokens_are_unique() {
        let a = resolve_token(None, None);
        let b = resolve_token(None, None);
        assert_ne!(a.token, b.token);
    }
}
