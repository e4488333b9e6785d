use crate::domain_model::*;
use crate::domain_port::*;
use dashmap::DashMap;
use jsonwebtoken::{DecodingKey, EncodingKey};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Upstream served from memory: a fixed key pair and a registered client list.
/// Counts calls and can be switched offline.
pub struct StaticUpstream {
    keys: DashMap<String, KeyMaterial>,
    clients: DashMap<ClientId, ClientInfo>,
    offline: AtomicBool,
    key_calls: AtomicUsize,
    client_calls: AtomicUsize,
}

impl StaticUpstream {
    pub fn new() -> Self {
        StaticUpstream {
            keys: DashMap::new(),
            clients: DashMap::new(),
            offline: AtomicBool::new(false),
            key_calls: AtomicUsize::new(0),
            client_calls: AtomicUsize::new(0),
        }
    }

    /// Build from PEM encoded RSA keys.
    pub fn from_pem(
        challenge_key_set: &str,
        verification_pem: &[u8],
        consent_key_set: &str,
        consent_pem: &[u8],
    ) -> anyhow::Result<Self> {
        let upstream = Self::new();
        upstream.add_key(
            challenge_key_set,
            KeyMaterial::Verifying(DecodingKey::from_rsa_pem(verification_pem)?),
        );
        upstream.add_key(
            consent_key_set,
            KeyMaterial::Signing(EncodingKey::from_rsa_pem(consent_pem)?),
        );
        Ok(upstream)
    }

    pub fn add_key(&self, key_set: &str, material: KeyMaterial) {
        self.add_key_as(key_set, material.kind(), material);
    }

    /// Serve `material` for `(key_set, kind)` even if it is the wrong kind of key.
    pub fn add_key_as(&self, key_set: &str, kind: KeyKind, material: KeyMaterial) {
        self.keys.insert(format!("{}/{}", key_set, kind), material);
    }

    pub fn add_client(&self, client: ClientInfo) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Simulate a network outage: every call fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn key_calls(&self) -> usize {
        self.key_calls.load(Ordering::SeqCst)
    }

    pub fn client_calls(&self) -> usize {
        self.client_calls.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), UpstreamError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(UpstreamError::Transport("upstream offline".to_string()));
        }
        Ok(())
    }
}

impl Default for StaticUpstream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl UpstreamClient for StaticUpstream {
    async fn get_key(&self, key_set: &str, kind: KeyKind) -> Result<KeyMaterial, UpstreamError> {
        self.key_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.keys
            .get(&format!("{}/{}", key_set, kind))
            .map(|k| k.value().clone())
            .ok_or(UpstreamError::NotFound)
    }

    async fn get_client(&self, client_id: &ClientId) -> Result<ClientInfo, UpstreamError> {
        self.client_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.clients
            .get(client_id)
            .map(|c| c.value().clone())
            .ok_or(UpstreamError::NotFound)
    }
}
