//! Persisted credential record.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Server URL and bearer token stored for a single context.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Base URL of the Maestro API the token was issued by.
    #[serde(rename = "serverUrl")]
    pub server_url: String,
    /// Bearer token sent on authenticated requests.
    pub token: String,
}

impl Credential {
    /// Build a credential record.
    #[must_use]
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            token: token.into(),
        }
    }

    /// Value for the `Authorization` header.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credential")
            .field("server_url", &self.server_url)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_uses_camel_case_server_url() -> Result<(), serde_yaml::Error> {
        let credential = Credential::new("https://maestro.example.com", "t0ken");
        let text = serde_yaml::to_string(&credential)?;
        assert!(text.contains("serverUrl: https://maestro.example.com"));
        assert!(text.contains("token: t0ken"));

        let decoded: Credential = serde_yaml::from_str(&text)?;
        assert_eq!(decoded, credential);
        Ok(())
    }

    #[test]
    fn debug_output_redacts_token() {
        let credential = Credential::new("https://maestro.example.com", "secret-token");
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn bearer_header_prefixes_token() {
        assert_eq!(Credential::new("u", "abc").bearer(), "Bearer abc");
    }
}
