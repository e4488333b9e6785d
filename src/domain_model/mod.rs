mod challenge;
mod client;
mod key;
mod remember_me;
mod user;

pub use challenge::*;
pub use client::*;
pub use key::*;
pub use remember_me::*;
pub use user::*;
