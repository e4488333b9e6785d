use chrono::Utc;
use idp_bridge::application_impl::*;
use idp_bridge::application_port::*;
use idp_bridge::domain_model::*;
use idp_bridge::infra_memory::*;
use idp_bridge::server::*;
use idp_bridge::settings::*;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde_json::json;
use std::sync::Arc;

const CHALLENGE_PRIV: &[u8] = include_bytes!("fixtures/challenge_rsa.pem");
const CHALLENGE_PUB: &[u8] = include_bytes!("fixtures/challenge_rsa.pub.pem");
const CONSENT_PRIV: &[u8] = include_bytes!("fixtures/consent_rsa.pem");
const CONSENT_PUB: &[u8] = include_bytes!("fixtures/consent_rsa.pub.pem");

fn settings(password_hash: &str) -> Settings {
    parse_settings_str(&format!(
        r#"
[upstream]
cluster_url = "https://hydra.test"
client_id = "idp"
client_secret = "secret"

[challenge]
backend = "memory"

[remember_me]
backend = "memory"
pepper = "pepper"
cookie_name = "remember"

[users]
backend = "memory"
entries = [{{ user = "alice", password_hash = "{}" }}]

[log]
filter = "debug"
"#,
        password_hash
    ))
    .unwrap()
}

fn upstream() -> Arc<StaticUpstream> {
    let upstream = StaticUpstream::from_pem(
        "consent.challenge",
        CHALLENGE_PUB,
        "consent.endpoint",
        CONSENT_PRIV,
    )
    .unwrap();
    upstream.add_client(ClientInfo::new("app1", "App One"));
    Arc::new(upstream)
}

fn challenge_token() -> String {
    let claims = json!({
        "aud": "app1",
        "scp": ["read", "write"],
        "redir": "https://hydra.test/oauth2/auth?client_id=app1",
        "exp": Utc::now().timestamp() + 300,
    });
    let key = EncodingKey::from_rsa_pem(CHALLENGE_PRIV).unwrap();
    encode(&Header::new(Algorithm::RS256), &claims, &key).unwrap()
}

#[tokio::test]
async fn login_challenge_and_consent() {
    let hash = hash_password("wonderland").unwrap();
    let server = Server::with_upstream(&settings(&hash), upstream())
        .await
        .unwrap();
    let session = SessionId::generate();

    // Login form
    let login = AuthRequest::new()
        .with_form_value(USERNAME_FIELD, "alice")
        .with_form_value(PASSWORD_FIELD, "wonderland");
    let user = server.auth_provider.check(&login).await.unwrap().user;
    assert_eq!(user, UserId::from("alice"));

    // Challenge from the authorization server
    let challenge = server
        .challenge_service
        .new_challenge(&challenge_token(), user.clone())
        .await
        .unwrap();
    assert_eq!(challenge.client.display_name(), "App One");
    server
        .challenge_service
        .save(&session, &challenge)
        .await
        .unwrap();

    // Consent page submitted
    let pending = server.challenge_service.load(&session).await.unwrap();
    let granted = vec!["read".to_string()];
    let url = server
        .challenge_service
        .grant_access(&session, pending, &granted)
        .await
        .unwrap();

    let (redirect, token) = url.split_once("&consent=").unwrap();
    assert_eq!(redirect, "https://hydra.test/oauth2/auth?client_id=app1");

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&["app1"]);
    let consent = decode::<ConsentClaims>(
        token,
        &DecodingKey::from_rsa_pem(CONSENT_PUB).unwrap(),
        &validation,
    )
    .unwrap()
    .claims;
    assert_eq!(consent.sub, "alice");
    assert_eq!(consent.scp, granted);
    assert_eq!(consent.exp - consent.iat, CONSENT_TOKEN_LIFETIME_SECS);

    assert!(matches!(
        server.challenge_service.load(&session).await,
        Err(ChallengeError::NoChallenge)
    ));

    server.shutdown().await;
    assert!(server.key_provider.cache().is_empty());
}

#[tokio::test]
async fn remembered_user_skips_the_password() {
    let hash = hash_password("wonderland").unwrap();
    let server = Server::with_upstream(&settings(&hash), upstream())
        .await
        .unwrap();

    let cookie = server
        .remember_me_service
        .issue(&UserId::from("alice"))
        .await
        .unwrap();

    let request = AuthRequest::new().with_cookie("remember", cookie.encode());
    let outcome = server.auth_provider.check(&request).await.unwrap();
    assert_eq!(outcome.user, UserId::from("alice"));
    let renewed = outcome.renewed_cookie.unwrap();

    // The cookie presented at login is spent.
    assert!(matches!(
        server.auth_provider.check(&request).await,
        Err(AuthError::AuthenticationFailure)
    ));

    server
        .remember_me_service
        .forget(&renewed.encode())
        .await
        .unwrap();
    let request = AuthRequest::new().with_cookie("remember", renewed.encode());
    assert!(matches!(
        server.auth_provider.check(&request).await,
        Err(AuthError::AuthenticationFailure)
    ));

    server.shutdown().await;
}

#[tokio::test]
async fn refused_consent_redirects_with_false() {
    let hash = hash_password("wonderland").unwrap();
    let server = Server::with_upstream(&settings(&hash), upstream())
        .await
        .unwrap();
    let session = SessionId::generate();

    let challenge = server
        .challenge_service
        .new_challenge(&challenge_token(), UserId::from("alice"))
        .await
        .unwrap();
    server
        .challenge_service
        .save(&session, &challenge)
        .await
        .unwrap();

    let url = server
        .challenge_service
        .refuse_access(&session, challenge)
        .await
        .unwrap();
    assert_eq!(
        url,
        "https://hydra.test/oauth2/auth?client_id=app1&consent=false"
    );

    server.shutdown().await;
}

#[tokio::test]
async fn startup_fails_without_upstream_keys() {
    let hash = hash_password("wonderland").unwrap();
    let result = Server::with_upstream(&settings(&hash), Arc::new(StaticUpstream::new())).await;
    assert!(result.is_err());
}
