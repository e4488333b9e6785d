mod challenge_store_memory;
mod credential_store_memory;
mod static_upstream;
mod user_db_memory;

pub use challenge_store_memory::*;
pub use credential_store_memory::*;
pub use static_upstream::*;
pub use user_db_memory::*;
