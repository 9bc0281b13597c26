pub mod clock;
pub mod crypto;
pub mod export;
pub mod mailer;
pub mod scheduler;
pub mod templates;
