use crate::domain_model::ClientId;

/// Cache name of the key used to verify challenge tokens.
pub const VERIFY_PUBLIC_KEY: &str = "VerifyPublic";

/// Cache name of the key used to sign consent tokens.
pub const CONSENT_PRIVATE_KEY: &str = "ConsentPrivate";

pub fn client_info_key(client_id: &ClientId) -> String {
    format!("ClientInfo:{}", client_id)
}
