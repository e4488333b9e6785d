use crate::domain_model::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delegated authentication request received from the upstream server.
///
/// Built by the challenge service from a verified challenge token. The
/// persisted copy lives in the challenge store until it is granted, refused
/// or found expired, after which it is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub client: ClientInfo,
    pub expires: DateTime<Utc>,
    pub redirect: String,
    pub scopes: Vec<String>,
    pub user: UserId,
}

impl Challenge {
    pub fn client_id(&self) -> &ClientId {
        &self.client.id
    }

    /// `exp == now` is still valid, anything strictly before `now` is not.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires < now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn attach_user(&mut self, user: UserId) {
        self.user = user;
    }
}
