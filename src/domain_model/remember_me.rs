use crate::domain_model::UserId;
use chrono::{DateTime, Utc};
use std::fmt;

const COOKIE_SEPARATOR: char = ':';

/// Value stored in the remember-me cookie: a public selector and the
/// plaintext validator. Never persisted server side.
#[derive(Clone, PartialEq, Eq)]
pub struct RememberMeCookie {
    pub selector: String,
    pub validator: String,
}

impl RememberMeCookie {
    pub fn encode(&self) -> String {
        format!("{}{}{}", self.selector, COOKIE_SEPARATOR, self.validator)
    }

    /// Returns `None` for anything that does not look like `selector:validator`.
    pub fn decode(value: &str) -> Option<Self> {
        let (selector, validator) = value.split_once(COOKIE_SEPARATOR)?;
        if selector.is_empty() || validator.is_empty() || validator.contains(COOKIE_SEPARATOR) {
            return None;
        }
        Some(RememberMeCookie {
            selector: selector.to_string(),
            validator: validator.to_string(),
        })
    }
}

// The validator must not end up in logs through `{:?}`.
impl fmt::Debug for RememberMeCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RememberMeCookie")
            .field("selector", &self.selector)
            .field("validator", &"<redacted>")
            .finish()
    }
}

/// Persisted half of a remember-me token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RememberMeRecord {
    pub selector: String,
    pub user: UserId,
    pub validator_hash: String,
    pub expires_at: DateTime<Utc>,
}

impl RememberMeRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_value_splits_on_first_separator() {
        let cookie = RememberMeCookie {
            selector: "sel".to_string(),
            validator: "val".to_string(),
        };
        assert_eq!(cookie.encode(), "sel:val");
        assert_eq!(RememberMeCookie::decode("sel:val"), Some(cookie));
    }

    #[test]
    fn malformed_cookie_values_are_rejected() {
        for value in ["", "sel", ":val", "sel:", "a:b:c"] {
            assert!(RememberMeCookie::decode(value).is_none(), "{value}");
        }
    }

    #[test]
    fn debug_output_hides_validator() {
        let cookie = RememberMeCookie {
            selector: "sel".to_string(),
            validator: "top-secret".to_string(),
        };
        assert!(!format!("{:?}", cookie).contains("top-secret"));
    }
}
