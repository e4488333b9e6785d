mod auth_provider;
mod challenge_service;
mod key_provider;
mod remember_me_service;

pub use auth_provider::*;
pub use challenge_service::*;
pub use key_provider::*;
pub use remember_me_service::*;
