use crate::application_impl::{CachePolicy, KeyCache, Refresher};
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use crate::logger::*;
use jsonwebtoken::{DecodingKey, EncodingKey};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Everything the upstream cache holds.
#[derive(Clone)]
pub enum CachedValue {
    Verifying(DecodingKey),
    Signing(EncodingKey),
    /// `None` records that the upstream does not know the client.
    Client(Option<ClientInfo>),
}

#[derive(Debug, Clone)]
pub struct UpstreamKeyConfig {
    pub challenge_key_set: String,
    pub consent_key_set: String,
    pub cache: CachePolicy,
    pub cleanup_interval: Duration,
    pub client_ttl: Duration,
    pub client_negative_ttl: Duration,
}

struct KeyRefresher {
    upstream: Arc<dyn UpstreamClient>,
    key_set: String,
    kind: KeyKind,
}

#[async_trait::async_trait]
impl Refresher<CachedValue> for KeyRefresher {
    async fn refresh(&self, name: &str) -> anyhow::Result<CachedValue> {
        debug!(name, key_set = %self.key_set, kind = %self.kind, "fetching key");
        let material = self.upstream.get_key(&self.key_set, self.kind).await?;
        match (self.kind, material) {
            (KeyKind::Public, KeyMaterial::Verifying(key)) => Ok(CachedValue::Verifying(key)),
            (KeyKind::Private, KeyMaterial::Signing(key)) => Ok(CachedValue::Signing(key)),
            (KeyKind::Public, _) => Err(UpstreamError::BadPublicKey(self.key_set.clone()).into()),
            (KeyKind::Private, _) => {
                Err(UpstreamError::BadPrivateKey(self.key_set.clone()).into())
            }
        }
    }
}

/// [`KeyProvider`] backed by the upstream server and a [`KeyCache`].
pub struct UpstreamKeyProvider {
    cache: Arc<KeyCache<CachedValue>>,
    upstream: Arc<dyn UpstreamClient>,
    cleanup_interval: Duration,
    client_ttl: Duration,
    client_negative_ttl: Duration,
    sweeper: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl UpstreamKeyProvider {
    pub fn new(upstream: Arc<dyn UpstreamClient>, config: UpstreamKeyConfig) -> Self {
        let cache = Arc::new(KeyCache::new(config.cache));
        cache.register(
            VERIFY_PUBLIC_KEY,
            Arc::new(KeyRefresher {
                upstream: upstream.clone(),
                key_set: config.challenge_key_set,
                kind: KeyKind::Public,
            }),
        );
        cache.register(
            CONSENT_PRIVATE_KEY,
            Arc::new(KeyRefresher {
                upstream: upstream.clone(),
                key_set: config.consent_key_set,
                kind: KeyKind::Private,
            }),
        );

        UpstreamKeyProvider {
            cache,
            upstream,
            cleanup_interval: config.cleanup_interval,
            client_ttl: config.client_ttl,
            client_negative_ttl: config.client_negative_ttl,
            sweeper: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &Arc<KeyCache<CachedValue>> {
        &self.cache
    }

    /// Load both keys. The service cannot verify or sign anything without them.
    pub async fn warm_up(&self) -> Result<(), CacheError> {
        self.cache.refresh(VERIFY_PUBLIC_KEY).await?;
        self.cache.refresh(CONSENT_PRIVATE_KEY).await?;
        info!("upstream keys cached");
        Ok(())
    }

    fn sweeper(&self) -> MutexGuard<'_, Option<(CancellationToken, JoinHandle<()>)>> {
        self.sweeper.lock().unwrap_or_else(|poisoned| {
            error!("key cache sweeper lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Start the background sweeper that refreshes expired keys.
    pub fn start(&self) {
        let mut sweeper = self.sweeper();
        if sweeper.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let handle = self
            .cache
            .spawn_sweeper(self.cleanup_interval, cancel.clone());
        *sweeper = Some((cancel, handle));
    }

    /// Stop the sweeper and drop everything cached.
    pub async fn close(&self) {
        let running = self.sweeper().take();
        if let Some((cancel, handle)) = running {
            cancel.cancel();
            let r = handle.await;
            debug!("key cache sweeper joined: {:?}", r);
        }
        self.cache.flush();
        info!("upstream key provider closed");
    }
}

#[async_trait::async_trait]
impl KeyProvider for UpstreamKeyProvider {
    fn verification_key(&self) -> Result<DecodingKey, CacheError> {
        match self.cache.lookup(VERIFY_PUBLIC_KEY)? {
            CachedValue::Verifying(key) => Ok(key),
            _ => Err(CacheError::BadKey(VERIFY_PUBLIC_KEY.to_string())),
        }
    }

    fn consent_key(&self) -> Result<EncodingKey, CacheError> {
        match self.cache.lookup(CONSENT_PRIVATE_KEY)? {
            CachedValue::Signing(key) => Ok(key),
            _ => Err(CacheError::BadKey(CONSENT_PRIVATE_KEY.to_string())),
        }
    }

    async fn client(&self, client_id: &ClientId) -> Result<ClientInfo, CacheError> {
        let name = client_info_key(client_id);
        let upstream = self.upstream.clone();
        let (client_ttl, negative_ttl) = (self.client_ttl, self.client_negative_ttl);

        let value = self
            .cache
            .get_or_load(&name, || async move {
                match upstream.get_client(client_id).await {
                    Ok(client) => Ok((CachedValue::Client(Some(client)), client_ttl)),
                    // Unknown or malformed client: cache the answer.
                    Err(e) if !e.is_transient() => {
                        debug!(client = %client_id, error = %e, "caching absent client");
                        Ok((CachedValue::Client(None), negative_ttl))
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await?;

        match value {
            CachedValue::Client(Some(client)) => Ok(client),
            CachedValue::Client(None) => Err(CacheError::NoSuchClient(client_id.clone())),
            _ => Err(CacheError::BadKey(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra_memory::StaticUpstream;

    const CHALLENGE_PUB: &[u8] = include_bytes!("../../tests/fixtures/challenge_rsa.pub.pem");
    const CONSENT_PRIV: &[u8] = include_bytes!("../../tests/fixtures/consent_rsa.pem");

    fn config() -> UpstreamKeyConfig {
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
        }
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

    #[tokio::test]
    async fn keys_are_missing_until_warm_up() {
        let provider = UpstreamKeyProvider::new(upstream(), config());
        assert!(matches!(
            provider.verification_key(),
            Err(CacheError::NotInCache(_))
        ));

        provider.warm_up().await.unwrap();
        assert!(provider.verification_key().is_ok());
        assert!(provider.consent_key().is_ok());
    }

    #[tokio::test]
    async fn wrong_kind_of_key_is_rejected() {
        let upstream = upstream();
        let signing = EncodingKey::from_rsa_pem(CONSENT_PRIV).unwrap();
        upstream.add_key_as(
            "consent.challenge",
            KeyKind::Public,
            KeyMaterial::Signing(signing),
        );
        let provider = UpstreamKeyProvider::new(upstream, config());

        let err = provider.warm_up().await.unwrap_err();
        match err {
            CacheError::RefreshFailed { reason, .. } => {
                assert!(reason.contains("public key"), "{reason}")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn clients_are_fetched_once() {
        let upstream = upstream();
        let provider = UpstreamKeyProvider::new(upstream.clone(), config());

        for _ in 0..3 {
            let client = provider.client(&ClientId::from("app1")).await.unwrap();
            assert_eq!(client.name, "App One");
        }
        assert_eq!(upstream.client_calls(), 1);
    }

    #[tokio::test]
    async fn unknown_client_is_negatively_cached() {
        let upstream = upstream();
        let provider = UpstreamKeyProvider::new(upstream.clone(), config());
        let id = ClientId::from("ghost");

        for _ in 0..3 {
            let err = provider.client(&id).await.unwrap_err();
            assert!(matches!(err, CacheError::NoSuchClient(_)));
        }
        assert_eq!(upstream.client_calls(), 1);
        let ttl = provider.cache().remaining_ttl(&client_info_key(&id)).unwrap();
        assert!(ttl <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn transient_client_failure_is_not_an_absent_client() {
        let upstream = upstream();
        upstream.set_offline(true);
        let provider = UpstreamKeyProvider::new(upstream.clone(), config());

        let err = provider.client(&ClientId::from("app1")).await.unwrap_err();
        assert!(matches!(err, CacheError::RefreshFailed { .. }));
        assert!(err.is_retryable());
        // The failure is cached too, the outage is not hammered.
        let _ = provider.client(&ClientId::from("app1")).await;
        assert_eq!(upstream.client_calls(), 1);
    }

    #[tokio::test]
    async fn close_flushes_cache() {
        let provider = UpstreamKeyProvider::new(upstream(), config());
        provider.warm_up().await.unwrap();
        provider.start();
        provider.close().await;
        assert!(provider.cache().is_empty());
        assert!(provider.consent_key().is_err());
    }

    #[tokio::test]
    async fn sweeper_starts_after_a_poisoned_lock() {
        let provider = UpstreamKeyProvider::new(upstream(), config());
        let poisoned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = provider.sweeper.lock().unwrap();
            panic!("panic while holding the sweeper lock");
        }));
        assert!(poisoned.is_err());
        assert!(provider.sweeper.is_poisoned());

        provider.start();
        assert!(provider.sweeper().is_some());

        provider.close().await;
        assert!(provider.sweeper().is_none());
    }
}
