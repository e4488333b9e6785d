mod hydra_client;

pub use hydra_client::*;
