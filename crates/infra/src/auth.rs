//! Credential providers

use std::fmt;

use async_trait::async_trait;
use conduit_core::TokenProvider;
use conduit_domain::constants::AUTH_SCHEME_BOT;
use conduit_domain::{ConduitError, Result};

/// Provider for a fixed bot token
///
/// Accepts the token with or without the `Bot ` scheme prefix.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        let trimmed = token.trim();
        let bare = trimmed
            .strip_prefix(AUTH_SCHEME_BOT)
            .and_then(|rest| rest.strip_prefix(' '))
            .unwrap_or(trimmed)
            .trim();
        if bare.is_empty() {
            return Err(ConduitError::Config("token must not be empty".to_string()));
        }
        Ok(Self { token: bare.to_string() })
    }
}

impl fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenProvider").field("token", &"<redacted>").finish()
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scheme_prefix_is_stripped() {
        let provider = StaticTokenProvider::new("Bot abc.def").expect("provider");
        assert_eq!(provider.token().await.expect("token"), "abc.def");

        let bare = StaticTokenProvider::new("  abc.def ").expect("provider");
        assert_eq!(bare.token().await.expect("token"), "abc.def");
    }

    #[test]
    fn blank_token_is_rejected() {
        assert!(matches!(StaticTokenProvider::new("Bot  "), Err(ConduitError::Config(_))));
        assert!(StaticTokenProvider::new("").is_err());
    }

    #[test]
    fn debug_never_prints_the_token() {
        let provider = StaticTokenProvider::new("very-secret").expect("provider");
        assert!(!format!("{provider:?}").contains("very-secret"));
    }
}
