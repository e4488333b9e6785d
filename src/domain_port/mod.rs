mod store_error;

pub use store_error::*;

// store

mod challenge_store;
mod credential_store;

pub use challenge_store::*;
pub use credential_store::*;

// upstream

mod upstream;

pub use upstream::*;
