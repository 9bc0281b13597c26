pub mod credential_cache;
pub mod time;
