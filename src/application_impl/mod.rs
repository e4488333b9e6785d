mod auth_provider_impl;
mod challenge_service_impl;
mod key_cache;
mod password_hasher;
mod remember_me_service_impl;
mod upstream_key_provider;

pub use auth_provider_impl::*;
pub use challenge_service_impl::*;
pub use key_cache::*;
pub use password_hasher::*;
pub use remember_me_service_impl::*;
pub use upstream_key_provider::*;
