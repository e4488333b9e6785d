use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        ClientId(s.to_string())
    }
}

/// OAuth2 client as registered on the upstream authorization server.
/// Only the fields the consent page needs are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(alias = "client_id")]
    pub id: ClientId,
    #[serde(default, alias = "client_name")]
    pub name: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub policy_uri: String,
    #[serde(default)]
    pub tos_uri: String,
    #[serde(default)]
    pub client_uri: String,
    #[serde(default)]
    pub logo_uri: String,
}

impl ClientInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        ClientInfo {
            id: ClientId(id.into()),
            name: name.into(),
            redirect_uris: Vec::new(),
            scope: String::new(),
            owner: String::new(),
            policy_uri: String::new(),
            tos_uri: String::new(),
            client_uri: String::new(),
            logo_uri: String::new(),
        }
    }

    /// Name shown on the consent page, falls back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id.0
        } else {
            &self.name
        }
    }
}
