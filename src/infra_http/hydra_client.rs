use crate::domain_model::*;
use crate::domain_port::*;
use crate::logger::*;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{DecodingKey, EncodingKey};
use reqwest::{StatusCode, Url};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::{BigUint, RsaPrivateKey};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::RwLock;

/// Scopes the helper needs on the authorization server.
pub const HYDRA_SCOPES: &str = "hydra.keys.get hydra.clients";

#[derive(Debug, Clone)]
pub struct HydraConfig {
    pub cluster_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub request_timeout: Duration,
    pub accept_invalid_certs: bool,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
pub struct JsonWebKeySet {
    #[serde(default)]
    pub keys: Vec<JsonWebKey>,
}

/// RSA members of a JWK. Private members are absent on public keys.
#[derive(Debug, Deserialize)]
pub struct JsonWebKey {
    pub kty: String,
    #[serde(default)]
    pub kid: Option<String>,
    pub n: Option<String>,
    pub e: Option<String>,
    pub d: Option<String>,
    pub p: Option<String>,
    pub q: Option<String>,
}

impl JsonWebKey {
    pub fn to_key_material(&self, kind: KeyKind) -> Result<KeyMaterial, UpstreamError> {
        match kind {
            KeyKind::Public => self.to_decoding_key().map(KeyMaterial::Verifying),
            KeyKind::Private => self.to_encoding_key().map(KeyMaterial::Signing),
        }
    }

    fn to_decoding_key(&self) -> Result<DecodingKey, UpstreamError> {
        let bad = |reason: &str| UpstreamError::BadPublicKey(reason.to_string());
        if self.kty != "RSA" {
            return Err(bad(&format!("unsupported key type {}", self.kty)));
        }
        let n = self.n.as_deref().ok_or_else(|| bad("missing n"))?;
        let e = self.e.as_deref().ok_or_else(|| bad("missing e"))?;
        DecodingKey::from_rsa_components(n, e).map_err(|err| bad(&err.to_string()))
    }

    fn to_encoding_key(&self) -> Result<EncodingKey, UpstreamError> {
        let bad = |reason: &str| UpstreamError::BadPrivateKey(reason.to_string());
        if self.kty != "RSA" {
            return Err(bad(&format!("unsupported key type {}", self.kty)));
        }
        let component = |name: &str, value: &Option<String>| -> Result<BigUint, UpstreamError> {
            let value = value
                .as_deref()
                .ok_or_else(|| bad(&format!("missing {}", name)))?;
            let bytes = URL_SAFE_NO_PAD
                .decode(value.trim_end_matches('='))
                .map_err(|err| bad(&format!("{}: {}", name, err)))?;
            Ok(BigUint::from_bytes_be(&bytes))
        };

        let key = RsaPrivateKey::from_components(
            component("n", &self.n)?,
            component("e", &self.e)?,
            component("d", &self.d)?,
            vec![component("p", &self.p)?, component("q", &self.q)?],
        )
        .map_err(|err| bad(&err.to_string()))?;
        let der = key.to_pkcs1_der().map_err(|err| bad(&err.to_string()))?;
        Ok(EncodingKey::from_rsa_der(der.as_bytes()))
    }
}

fn transport_error(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout
    } else {
        UpstreamError::Transport(err.to_string())
    }
}

fn status_error(status: StatusCode) -> UpstreamError {
    match status {
        StatusCode::NOT_FOUND => UpstreamError::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => UpstreamError::Unauthorized,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => UpstreamError::Timeout,
        s if s.is_server_error() => UpstreamError::Transport(format!("status {}", s)),
        s => UpstreamError::BadResponse(format!("status {}", s)),
    }
}

/// HTTP client for the authorization server's admin API.
pub struct HydraClient {
    http: reqwest::Client,
    config: HydraConfig,
    token: RwLock<Option<String>>,
}

impl HydraClient {
    pub fn new(config: HydraConfig) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            config,
            token: RwLock::new(None),
        })
    }

    /// Build the client and log in right away.
    pub async fn connect(config: HydraConfig) -> Result<Self, UpstreamError> {
        let client = Self::new(config)?;
        client.login().await?;
        info!(url = %client.config.cluster_url, "connected to authorization server");
        Ok(client)
    }

    /// Admin API URL below `cluster_url`. Each segment is percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, UpstreamError> {
        let cluster_url = &self.config.cluster_url;
        let bad = |reason: &str| UpstreamError::BadResponse(format!("{}: {}", cluster_url, reason));
        let mut url = Url::parse(cluster_url).map_err(|e| bad(&e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| bad("cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn login(&self) -> Result<String, UpstreamError> {
        let response = self
            .http
            .post(self.url(&["oauth2", "token"])?)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "client_credentials"),
                ("scope", HYDRA_SCOPES),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(status_error(response.status()));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::BadResponse(e.to_string()))?;

        *self.token.write().await = Some(body.access_token.clone());
        debug!(client_id = %self.config.client_id, "obtained upstream access token");
        Ok(body.access_token)
    }

    async fn current_token(&self) -> Result<String, UpstreamError> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.login().await
    }

    /// GET with the bearer token. A `401` triggers one fresh login and retry.
    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, UpstreamError> {
        let url = self.url(segments)?;
        let mut token = self.current_token().await?;
        let mut retried = false;

        loop {
            let response = self
                .http
                .get(url.clone())
                .bearer_auth(&token)
                .send()
                .await
                .map_err(transport_error)?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && !retried {
                warn!(path = url.path(), "upstream token rejected, logging in again");
                token = self.login().await?;
                retried = true;
                continue;
            }
            if !status.is_success() {
                return Err(status_error(status));
            }

            return response
                .json()
                .await
                .map_err(|e| UpstreamError::BadResponse(e.to_string()));
        }
    }
}

#[async_trait::async_trait]
impl UpstreamClient for HydraClient {
    async fn get_key(&self, key_set: &str, kind: KeyKind) -> Result<KeyMaterial, UpstreamError> {
        let set: JsonWebKeySet = self.get_json(&["keys", key_set, kind.as_str()]).await?;
        let jwk = set.keys.first().ok_or_else(|| match kind {
            KeyKind::Public => UpstreamError::BadPublicKey(format!("{} is empty", key_set)),
            KeyKind::Private => UpstreamError::BadPrivateKey(format!("{} is empty", key_set)),
        })?;
        debug!(key_set, kind = %kind, kid = ?jwk.kid, "fetched key");
        jwk.to_key_material(kind)
    }

    async fn get_client(&self, client_id: &ClientId) -> Result<ClientInfo, UpstreamError> {
        self.get_json(&["clients", &client_id.0]).await
    }
}
