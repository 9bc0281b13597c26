pub mod api_key;
pub mod device;
pub mod middleware;
pub mod password;
