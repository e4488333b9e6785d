use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use crate::logger::*;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation, decode, decode_header, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Lifetime of a consent token.
pub const CONSENT_TOKEN_LIFETIME_SECS: i64 = 5 * 60;

const CHALLENGE_ALGORITHMS: [Algorithm; 3] = [Algorithm::RS256, Algorithm::RS384, Algorithm::RS512];

#[derive(Debug, Clone)]
pub struct ChallengeConfig {
    /// Session slot the challenge is stored under.
    pub slot: String,
    /// Cap on how long a challenge stays in the store.
    pub max_ttl: Duration,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        ChallengeConfig {
            slot: CHALLENGE_SLOT.to_string(),
            max_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawChallengeClaims {
    aud: Option<String>,
    exp: Option<i64>,
    redir: Option<String>,
    scp: Option<Vec<String>>,
}

/// Verified content of a challenge token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeClaims {
    pub client_id: ClientId,
    pub expires: DateTime<Utc>,
    pub redirect: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConsentClaims {
    pub aud: String,
    pub sub: String,
    pub scp: Vec<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Verify the signature of a challenge token and extract its claims.
///
/// Expiry is not checked here so the caller can report it as its own error.
/// A missing `scp` claim means no scopes were requested.
pub fn parse_challenge_token(raw: &str, key: &DecodingKey) -> Result<ChallengeClaims, TokenError> {
    let header = decode_header(raw).map_err(|e| TokenError::InvalidToken(e.to_string()))?;
    if !CHALLENGE_ALGORITHMS.contains(&header.alg) {
        return Err(TokenError::BadSigningMethod(format!("{:?}", header.alg)));
    }

    let mut validation = Validation::new(header.alg);
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<RawChallengeClaims>(raw, key, &validation).map_err(|e| match e.kind() {
        ErrorKind::InvalidSignature => TokenError::BadSignature,
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            TokenError::BadSigningMethod(format!("{:?}", header.alg))
        }
        _ => TokenError::InvalidToken(e.to_string()),
    })?;
    let claims = data.claims;

    let exp = claims.exp.ok_or(TokenError::MissingClaim("exp"))?;
    let expires = DateTime::from_timestamp(exp, 0)
        .ok_or_else(|| TokenError::InvalidToken(format!("exp {} out of range", exp)))?;
    let client_id = claims
        .aud
        .filter(|aud| !aud.is_empty())
        .ok_or(TokenError::MissingClaim("aud"))?;
    let redirect = claims
        .redir
        .filter(|redir| !redir.is_empty())
        .ok_or(TokenError::MissingClaim("redir"))?;

    Ok(ChallengeClaims {
        client_id: ClientId(client_id),
        expires,
        redirect,
        scopes: claims.scp.unwrap_or_default(),
    })
}

pub struct RealChallengeService {
    keys: Arc<dyn KeyProvider>,
    store: Arc<dyn ChallengeStore>,
    config: ChallengeConfig,
}

impl RealChallengeService {
    pub fn new(
        keys: Arc<dyn KeyProvider>,
        store: Arc<dyn ChallengeStore>,
        config: ChallengeConfig,
    ) -> Self {
        Self {
            keys,
            store,
            config,
        }
    }

    fn store_ttl(&self, challenge: &Challenge) -> Duration {
        let secs = (challenge.expires - Utc::now()).num_seconds();
        let remaining = if secs <= 0 {
            Duration::from_secs(1)
        } else {
            Duration::from_secs(secs as u64)
        };
        remaining.min(self.config.max_ttl)
    }

    fn sign_consent(
        &self,
        challenge: &Challenge,
        granted_scopes: &[String],
    ) -> Result<String, ChallengeError> {
        let iat = Utc::now();
        let exp = iat + ChronoDuration::seconds(CONSENT_TOKEN_LIFETIME_SECS);
        let claims = ConsentClaims {
            aud: challenge.client_id().0.clone(),
            sub: challenge.user.0.clone(),
            scp: granted_scopes.to_vec(),
            iat: iat.timestamp(),
            exp: exp.timestamp(),
        };

        let key = self.keys.consent_key()?;
        encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| ChallengeError::Signing(e.to_string()))
    }

    async fn consume(&self, session: &SessionId) -> Result<(), ChallengeError> {
        if !self.store.delete(session, &self.config.slot).await? {
            return Err(ChallengeError::NoChallenge);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChallengeService for RealChallengeService {
    async fn new_challenge(
        &self,
        raw_token: &str,
        user: UserId,
    ) -> Result<Challenge, ChallengeError> {
        if raw_token.trim().is_empty() {
            return Err(ChallengeError::BadRequest);
        }

        let key = self.keys.verification_key()?;
        let claims = parse_challenge_token(raw_token, &key)?;
        if claims.expires < Utc::now() {
            debug!(client = %claims.client_id, "challenge token already expired");
            return Err(ChallengeError::ChallengeExpired);
        }

        let client = self.keys.client(&claims.client_id).await?;

        Ok(Challenge {
            client,
            expires: claims.expires,
            redirect: claims.redirect,
            scopes: claims.scopes,
            user,
        })
    }

    async fn save(&self, session: &SessionId, challenge: &Challenge) -> Result<(), ChallengeError> {
        if challenge.is_expired() {
            return Err(ChallengeError::ChallengeExpired);
        }
        let ttl = self.store_ttl(challenge);
        self.store
            .save(session, &self.config.slot, challenge, ttl)
            .await?;
        Ok(())
    }

    async fn update(
        &self,
        session: &SessionId,
        challenge: &Challenge,
    ) -> Result<(), ChallengeError> {
        if self.store.get(session, &self.config.slot).await?.is_none() {
            return Err(ChallengeError::NoChallenge);
        }
        self.save(session, challenge).await
    }

    async fn load(&self, session: &SessionId) -> Result<Challenge, ChallengeError> {
        let challenge = self
            .store
            .get(session, &self.config.slot)
            .await?
            .ok_or(ChallengeError::NoChallenge)?;

        if challenge.is_expired() {
            self.store.delete(session, &self.config.slot).await?;
            return Err(ChallengeError::ChallengeExpired);
        }
        Ok(challenge)
    }

    async fn grant_access(
        &self,
        session: &SessionId,
        challenge: Challenge,
        granted_scopes: &[String],
    ) -> Result<String, ChallengeError> {
        let token = self.sign_consent(&challenge, granted_scopes)?;
        self.consume(session).await?;

        // Fetching the key may have taken a while.
        if challenge.is_expired() {
            return Err(ChallengeError::ChallengeExpired);
        }

        info!(
            client = %challenge.client_id(),
            user = %challenge.user,
            scopes = granted_scopes.len(),
            "consent granted"
        );
        Ok(format!("{}&consent={}", challenge.redirect, token))
    }

    async fn refuse_access(
        &self,
        session: &SessionId,
        challenge: Challenge,
    ) -> Result<String, ChallengeError> {
        self.consume(session).await?;
        info!(
            client = %challenge.client_id(),
            user = %challenge.user,
            "consent refused"
        );
        Ok(format!("{}&consent=false", challenge.redirect))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application_impl::{CachePolicy, UpstreamKeyConfig, UpstreamKeyProvider};
    use crate::infra_memory::{MemoryChallengeStore, StaticUpstream};
    use jsonwebtoken::EncodingKey;
    use serde_json::json;

    const CHALLENGE_PRIV: &[u8] = include_bytes!("../../tests/fixtures/challenge_rsa.pem");
    const CHALLENGE_PUB: &[u8] = include_bytes!("../../tests/fixtures/challenge_rsa.pub.pem");
    const CONSENT_PRIV: &[u8] = include_bytes!("../../tests/fixtures/consent_rsa.pem");
    const CONSENT_PUB: &[u8] = include_bytes!("../../tests/fixtures/consent_rsa.pub.pem");

    struct Fixture {
        service: RealChallengeService,
        store: Arc<MemoryChallengeStore>,
        session: SessionId,
    }

    async fn fixture(warm: bool) -> Fixture {
        let upstream = StaticUpstream::from_pem(
            "consent.challenge",
            CHALLENGE_PUB,
            "consent.endpoint",
            CONSENT_PRIV,
        )
        .unwrap();
        upstream.add_client(ClientInfo::new("app1", "App One"));

        let keys = UpstreamKeyProvider::new(
            Arc::new(upstream),
            UpstreamKeyConfig {
                challenge_key_set: "consent.challenge".to_string(),
                consent_key_set: "consent.endpoint".to_string(),
                cache: CachePolicy {
                    default_ttl: Duration::from_secs(3600),
                    retry_ttl: Duration::from_secs(30),
                    max_staleness: Duration::from_secs(600),
                    fetch_timeout: Duration::from_secs(5),
                },
                cleanup_interval: Duration::from_secs(30),
                client_ttl: Duration::from_secs(600),
                client_negative_ttl: Duration::from_secs(60),
            },
        );
        if warm {
            keys.warm_up().await.unwrap();
        }

        let store = Arc::new(MemoryChallengeStore::new());
        Fixture {
            service: RealChallengeService::new(
                Arc::new(keys),
                store.clone(),
                ChallengeConfig::default(),
            ),
            store,
            session: SessionId::generate(),
        }
    }

    fn sign(claims: serde_json::Value) -> String {
        let key = EncodingKey::from_rsa_pem(CHALLENGE_PRIV).unwrap();
        encode(&Header::new(Algorithm::RS256), &claims, &key).unwrap()
    }

    fn token(aud: &str, scp: &[&str], exp_offset: i64) -> String {
        sign(json!({
            "aud": aud,
            "scp": scp,
            "redir": "https://auth/cb",
            "exp": Utc::now().timestamp() + exp_offset,
        }))
    }

    fn decode_consent(url: &str) -> ConsentClaims {
        let token = url.split("&consent=").nth(1).unwrap();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&["app1"]);
        decode::<ConsentClaims>(
            token,
            &DecodingKey::from_rsa_pem(CONSENT_PUB).unwrap(),
            &validation,
        )
        .unwrap()
        .claims
    }

    #[tokio::test]
    async fn challenge_mirrors_token_claims() {
        let f = fixture(true).await;
        let raw = token("app1", &["read", "write", "read"], 300);

        let challenge = f
            .service
            .new_challenge(&raw, UserId::from("alice"))
            .await
            .unwrap();

        assert_eq!(challenge.client_id(), &ClientId::from("app1"));
        assert_eq!(challenge.client.name, "App One");
        assert_eq!(challenge.scopes, vec!["read", "write", "read"]);
        assert_eq!(challenge.redirect, "https://auth/cb");
        assert_eq!(challenge.user, UserId::from("alice"));
        assert!(!challenge.is_expired());
    }

    #[tokio::test]
    async fn empty_token_is_a_bad_request() {
        let f = fixture(true).await;
        let err = f
            .service
            .new_challenge("", UserId::from("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChallengeError::BadRequest));
    }

    #[tokio::test]
    async fn expired_token_is_rejected_and_nothing_is_stored() {
        let f = fixture(true).await;
        let raw = token("app1", &["read"], -5);

        let err = f
            .service
            .new_challenge(&raw, UserId::from("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChallengeError::ChallengeExpired));
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn token_signed_by_someone_else_is_rejected() {
        let f = fixture(true).await;
        let key = EncodingKey::from_rsa_pem(CONSENT_PRIV).unwrap();
        let claims = json!({"aud": "app1", "redir": "https://auth/cb", "exp": Utc::now().timestamp() + 60});
        let raw = encode(&Header::new(Algorithm::RS256), &claims, &key).unwrap();

        let err = f
            .service
            .new_challenge(&raw, UserId::from("alice"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChallengeError::BadChallengeToken(TokenError::BadSignature)
        ));
    }

    #[tokio::test]
    async fn hmac_signed_token_is_a_bad_signing_method() {
        let f = fixture(true).await;
        let claims = json!({"aud": "app1", "redir": "https://auth/cb", "exp": Utc::now().timestamp() + 60});
        let raw = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"shared"),
        )
        .unwrap();

        let err = f
            .service
            .new_challenge(&raw, UserId::from("alice"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChallengeError::BadChallengeToken(TokenError::BadSigningMethod(_))
        ));
    }

    #[tokio::test]
    async fn missing_claims_are_named() {
        let f = fixture(true).await;
        let raw = sign(json!({"aud": "app1", "exp": Utc::now().timestamp() + 60}));
        let err = f
            .service
            .new_challenge(&raw, UserId::from("alice"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChallengeError::BadChallengeToken(TokenError::MissingClaim("redir"))
        ));

        let raw = sign(json!({"aud": "app1", "redir": "https://auth/cb"}));
        let err = f
            .service
            .new_challenge(&raw, UserId::from("alice"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChallengeError::BadChallengeToken(TokenError::MissingClaim("exp"))
        ));
    }

    #[tokio::test]
    async fn mistyped_claim_is_an_invalid_token() {
        let f = fixture(true).await;
        let raw = sign(json!({"aud": 7, "redir": "https://auth/cb", "exp": Utc::now().timestamp() + 60}));
        let err = f
            .service
            .new_challenge(&raw, UserId::from("alice"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChallengeError::BadChallengeToken(TokenError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn unknown_client_is_reported() {
        let f = fixture(true).await;
        let raw = token("ghost", &["read"], 300);
        let err = f
            .service
            .new_challenge(&raw, UserId::from("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChallengeError::NoSuchClient(id) if id.0 == "ghost"));
    }

    #[tokio::test]
    async fn cold_cache_is_a_retryable_error() {
        let f = fixture(false).await;
        let raw = token("app1", &["read"], 300);
        let err = f
            .service
            .new_challenge(&raw, UserId::from("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChallengeError::Cache(e) if e.is_retryable()));
    }

    #[tokio::test]
    async fn grant_issues_a_five_minute_consent() {
        let f = fixture(true).await;
        let raw = token("app1", &["read"], 300);
        let challenge = f
            .service
            .new_challenge(&raw, UserId::from("alice"))
            .await
            .unwrap();
        f.service.save(&f.session, &challenge).await.unwrap();

        let loaded = f.service.load(&f.session).await.unwrap();
        assert_eq!(loaded, challenge);

        let url = f
            .service
            .grant_access(&f.session, loaded, &["read".to_string()])
            .await
            .unwrap();
        assert!(url.starts_with("https://auth/cb&consent="));

        let claims = decode_consent(&url);
        assert_eq!(claims.aud, "app1");
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.scp, vec!["read"]);
        assert_eq!(claims.exp - claims.iat, 300);
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn challenge_cannot_be_granted_twice() {
        let f = fixture(true).await;
        let raw = token("app1", &["read"], 300);
        let challenge = f
            .service
            .new_challenge(&raw, UserId::from("alice"))
            .await
            .unwrap();
        f.service.save(&f.session, &challenge).await.unwrap();

        f.service
            .grant_access(&f.session, challenge.clone(), &[])
            .await
            .unwrap();
        let err = f
            .service
            .grant_access(&f.session, challenge, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ChallengeError::NoChallenge));
    }

    #[tokio::test]
    async fn refusal_is_single_shot() {
        let f = fixture(true).await;
        let raw = token("app1", &["read"], 300);
        let challenge = f
            .service
            .new_challenge(&raw, UserId::from("alice"))
            .await
            .unwrap();
        f.service.save(&f.session, &challenge).await.unwrap();

        let url = f
            .service
            .refuse_access(&f.session, challenge.clone())
            .await
            .unwrap();
        assert_eq!(url, "https://auth/cb&consent=false");

        let err = f
            .service
            .refuse_access(&f.session, challenge)
            .await
            .unwrap_err();
        assert!(matches!(err, ChallengeError::NoChallenge));
    }

    #[tokio::test]
    async fn grant_after_expiry_fails_and_still_consumes() {
        let f = fixture(true).await;
        let challenge = Challenge {
            client: ClientInfo::new("app1", "App One"),
            expires: Utc::now() - ChronoDuration::seconds(1),
            redirect: "https://auth/cb".to_string(),
            scopes: vec!["read".to_string()],
            user: UserId::from("alice"),
        };
        f.store
            .save(&f.session, CHALLENGE_SLOT, &challenge, Duration::from_secs(60))
            .await
            .unwrap();

        let err = f
            .service
            .grant_access(&f.session, challenge, &["read".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ChallengeError::ChallengeExpired));
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn load_rejects_expired_challenge_still_in_store() {
        let f = fixture(true).await;
        let challenge = Challenge {
            client: ClientInfo::new("app1", "App One"),
            expires: Utc::now() - ChronoDuration::seconds(1),
            redirect: "https://auth/cb".to_string(),
            scopes: vec![],
            user: UserId::from("alice"),
        };
        f.store
            .save(&f.session, CHALLENGE_SLOT, &challenge, Duration::from_secs(60))
            .await
            .unwrap();

        let err = f.service.load(&f.session).await.unwrap_err();
        assert!(matches!(err, ChallengeError::ChallengeExpired));
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn load_without_challenge_fails() {
        let f = fixture(true).await;
        let err = f.service.load(&f.session).await.unwrap_err();
        assert!(matches!(err, ChallengeError::NoChallenge));
    }

    #[tokio::test]
    async fn update_replaces_stored_user() {
        let f = fixture(true).await;
        let raw = token("app1", &["read"], 300);
        let mut challenge = f
            .service
            .new_challenge(&raw, UserId::from(""))
            .await
            .unwrap();

        let err = f.service.update(&f.session, &challenge).await.unwrap_err();
        assert!(matches!(err, ChallengeError::NoChallenge));

        f.service.save(&f.session, &challenge).await.unwrap();
        challenge.attach_user(UserId::from("alice"));
        f.service.update(&f.session, &challenge).await.unwrap();

        let loaded = f.service.load(&f.session).await.unwrap();
        assert_eq!(loaded.user, UserId::from("alice"));
    }
}
