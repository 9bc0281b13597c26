use chrono::{DateTime, Utc};

use crate::model::employee::Employee;

/// Sealed biometric template. At most one per employee.
#[derive(Debug, Clone)]
pub struct BiometricTemplate {
    pub employee_id: u64,
    /// `nonce || ciphertext || tag`
    pub ciphertext: Vec<u8>,
    pub key_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A template joined with its (active) owner, as read for kiosk sync.
#[derive(Debug, Clone)]
pub struct OwnedTemplate {
    pub employee: Employee,
    pub template: BiometricTemplate,
}
