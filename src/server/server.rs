use crate::application_impl::*;
use crate::application_port::*;
use crate::domain_port::*;
use crate::infra_http::*;
use crate::infra_memory::*;
use crate::infra_mysql::*;
use crate::infra_redis::*;
use crate::logger::*;
use crate::settings::Settings;
use sqlx::{MySql, Pool};
use std::sync::Arc;

pub struct Server {
    pub challenge_service: Arc<dyn ChallengeService>,
    pub remember_me_service: Arc<dyn RememberMeService>,
    pub auth_provider: Arc<dyn AuthProvider>,
    pub key_provider: Arc<UpstreamKeyProvider>,
    pool: Option<Pool<MySql>>,
}

impl Server {
    /// Connects to the authorization server and wires every backend.
    /// Fails when the upstream keys cannot be loaded.
    pub async fn try_new(settings: &Settings) -> anyhow::Result<Self> {
        let upstream = &settings.upstream;
        let hydra = HydraClient::connect(HydraConfig {
            cluster_url: upstream.cluster_url.clone(),
            client_id: upstream.client_id.clone(),
            client_secret: upstream.client_secret.expose().to_string(),
            request_timeout: upstream.request_timeout(),
            accept_invalid_certs: upstream.accept_invalid_certs,
        })
        .await?;

        Self::with_upstream(settings, Arc::new(hydra)).await
    }

    pub async fn with_upstream(
        settings: &Settings,
        upstream: Arc<dyn UpstreamClient>,
    ) -> anyhow::Result<Self> {
        let cache = &settings.cache;
        let key_provider = Arc::new(UpstreamKeyProvider::new(
            upstream,
            UpstreamKeyConfig {
                challenge_key_set: settings.upstream.challenge_key_set.clone(),
                consent_key_set: settings.upstream.consent_key_set.clone(),
                cache: CachePolicy {
                    default_ttl: cache.key_expiration(),
                    retry_ttl: cache.cleanup_interval(),
                    max_staleness: cache.max_staleness(),
                    fetch_timeout: cache.fetch_timeout(),
                },
                cleanup_interval: cache.cleanup_interval(),
                client_ttl: cache.client_expiration(),
                client_negative_ttl: cache.client_negative_expiration(),
            },
        ));
        key_provider.warm_up().await?;
        key_provider.start();

        let challenge_store: Arc<dyn ChallengeStore> = match settings.challenge.backend.as_str()
        {
            "memory" => Arc::new(MemoryChallengeStore::new()),
            "redis" => {
                let redis_client = redis::Client::open(settings.challenge.redis_url.expose())?;
                let redis_manager = redis_client.get_connection_manager().await?;
                Arc::new(RedisChallengeStore::new(
                    redis_manager,
                    settings.challenge.key_prefix.clone(),
                ))
            }
            other => return Err(anyhow::anyhow!("Unknown challenge backend: {}", other)),
        };

        let mut pool = None;
        let credential_store: Arc<dyn CredentialStore> =
            match settings.remember_me.backend.as_str() {
                "memory" => Arc::new(MemoryCredentialStore::new()),
                "mysql" => {
                    let mysql = Pool::<MySql>::connect(settings.remember_me.mysql_url.expose()).await?;
                    let store = MySqlCredentialStore::new(mysql.clone());
                    store.ensure_schema().await?;
                    pool = Some(mysql);
                    Arc::new(store)
                }
                other => return Err(anyhow::anyhow!("Unknown remember-me backend: {}", other)),
            };

        let password_checker: Arc<dyn PasswordChecker> = match settings.users.backend.as_str() {
            "memory" => {
                let db = MemoryUserDb::new();
                for entry in &settings.users.entries {
                    db.add_hashed(&entry.user, &entry.password_hash);
                }
                info!(users = settings.users.entries.len(), "user database loaded");
                Arc::new(db)
            }
            other => return Err(anyhow::anyhow!("Unknown users backend: {}", other)),
        };

        let challenge_service: Arc<dyn ChallengeService> = Arc::new(RealChallengeService::new(
            key_provider.clone(),
            challenge_store,
            ChallengeConfig {
                slot: CHALLENGE_SLOT.to_string(),
                max_ttl: settings.challenge.max_ttl(),
            },
        ));

        let remember_me_service: Arc<dyn RememberMeService> =
            Arc::new(RealRememberMeService::new(
                credential_store,
                settings.remember_me.pepper.expose(),
                chrono::Duration::days(settings.remember_me.ttl_days),
            ));

        let auth_provider: Arc<dyn AuthProvider> = Arc::new(ProviderChain::new(vec![
            Arc::new(CookieAuthProvider::new(
                remember_me_service.clone(),
                settings.remember_me.cookie_name.clone(),
            )),
            Arc::new(BasicAuthProvider::new(password_checker.clone())),
            Arc::new(FormAuthProvider::new(password_checker)),
        ]));

        info!("server started");

        Ok(Self {
            challenge_service,
            remember_me_service,
            auth_provider,
            key_provider,
            pool,
        })
    }

    pub async fn shutdown(&self) {
        info!("server shutting down...");

        self.key_provider.close().await;
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}
