use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, instrument};
use utoipa::ToSchema;

use crate::error::{AppError, AppResult};
use crate::model::employee::Employee;
use crate::service::crypto::TemplateCipher;
use crate::store::LedgerStore;

/// One decrypted template as shipped to a kiosk of the same location.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SyncTemplate {
    #[schema(example = "EMP-001")]
    pub employee_code: String,
    #[schema(example = "John Doe")]
    pub name: String,
    pub embedding: Vec<f32>,
}

/// At most one sealed template per employee.
#[derive(Clone)]
pub struct TemplateStore {
    store: Arc<dyn LedgerStore>,
    cipher: Arc<TemplateCipher>,
}

impl TemplateStore {
    pub fn new(store: Arc<dyn LedgerStore>, cipher: Arc<TemplateCipher>) -> Self {
        Self { store, cipher }
    }

    async fn owner(&self, employee_code: &str, location_id: u64) -> AppResult<Employee> {
        self.store
            .employee_by_code(location_id, employee_code)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Employee {} not found", employee_code)))
    }

    /// Seal `vector` and replace whatever template the employee had.
    #[instrument(skip(self, vector), fields(dim = vector.len()))]
    pub async fn upsert(&self, employee_code: &str, location_id: u64, vector: &[f32]) -> AppResult<()> {
        let employee = self.owner(employee_code, location_id).await?;
        let sealed = self.cipher.encrypt_vector(vector)?;
        self.store
            .upsert_template(employee.id, &sealed.ciphertext, &sealed.key_version)
            .await?;
        info!(employee_id = employee.id, key_version = %sealed.key_version, "Template stored");
        Ok(())
    }

    /// Decrypted templates of every active employee at the location.
    ///
    /// A single blob that fails to open fails the whole call; a partial list
    /// would silently drop employees from face matching on the kiosk.
    pub async fn list_for_sync(&self, location_id: u64) -> AppResult<Vec<SyncTemplate>> {
        let owned = self.store.templates_for_location(location_id).await?;
        let mut out = Vec::with_capacity(owned.len());

        for item in owned {
            let embedding = self
                .cipher
                .decrypt_vector(&item.template.ciphertext, &item.template.key_version)
                .map_err(|e| {
                    error!(employee_id = item.employee.id, error = %e, "Template failed to open");
                    e
                })?;
            out.push(SyncTemplate {
                employee_code: item.employee.employee_code,
                name: item.employee.name,
                embedding,
            });
        }

        Ok(out)
    }

    /// Idempotent. `true` if a template existed and was removed.
    pub async fn delete(&self, employee_code: &str, location_id: u64) -> AppResult<bool> {
        let employee = self.owner(employee_code, location_id).await?;
        Ok(self.store.delete_template(employee.id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::employee::{EmployeeUpdate, NewEmployee};
    use crate::model::location::NewLocation;
    use crate::service::crypto::{CryptoError, TEMPLATE_DIM};
    use crate::store::MemoryStore;
    use chrono::NaiveTime;

    async fn setup() -> (Arc<MemoryStore>, TemplateStore, u64) {
        let store = Arc::new(MemoryStore::new());
        let location = store
            .create_location(NewLocation {
                name: "Shop".into(),
                manager_email: String::new(),
                export_time: NaiveTime::MIN,
                timezone: "UTC".into(),
            })
            .await
            .unwrap();
        for (code, name) in [("E1", "Ada"), ("E2", "Bob")] {
            store
                .create_employee(NewEmployee {
                    location_id: location.id,
                    employee_code: code.into(),
                    name: name.into(),
                    pin_hash: "x".into(),
                })
                .await
                .unwrap();
        }
        let cipher = Arc::new(TemplateCipher::new("v1", "test master secret").unwrap());
        let templates = TemplateStore::new(store.clone(), cipher);
        (store, templates, location.id)
    }

    fn vector(seed: f32) -> Vec<f32> {
        (0..TEMPLATE_DIM).map(|i| seed + i as f32 * 0.001).collect()
    }

    #[actix_web::test]
    async fn upsert_replaces_and_sync_decrypts() {
        let (_, templates, loc) = setup().await;

        templates.upsert("E1", loc, &vector(0.1)).await.unwrap();
        templates.upsert("E1", loc, &vector(0.5)).await.unwrap();

        let synced = templates.list_for_sync(loc).await.unwrap();
        assert_eq!(synced.len(), 1);
        assert_eq!(synced[0].employee_code, "E1");
        assert_eq!(synced[0].name, "Ada");
        assert_eq!(synced[0].embedding, vector(0.5));
    }

    #[actix_web::test]
    async fn unknown_employee_is_not_found() {
        let (_, templates, loc) = setup().await;
        assert!(matches!(
            templates.upsert("nobody", loc, &vector(0.1)).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            templates.upsert("E1", loc + 99, &vector(0.1)).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            templates.delete("nobody", loc).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[actix_web::test]
    async fn delete_is_idempotent() {
        let (_, templates, loc) = setup().await;
        templates.upsert("E2", loc, &vector(0.2)).await.unwrap();

        assert!(templates.delete("E2", loc).await.unwrap());
        assert!(!templates.delete("E2", loc).await.unwrap());
        assert!(templates.list_for_sync(loc).await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn inactive_employees_are_not_synced() {
        let (store, templates, loc) = setup().await;
        templates.upsert("E1", loc, &vector(0.1)).await.unwrap();
        templates.upsert("E2", loc, &vector(0.2)).await.unwrap();

        let bob = store.employee_by_code(loc, "E2").await.unwrap().unwrap();
        store
            .update_employee(
                bob.id,
                EmployeeUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let synced = templates.list_for_sync(loc).await.unwrap();
        assert_eq!(synced.len(), 1);
        assert_eq!(synced[0].employee_code, "E1");
    }

    #[actix_web::test]
    async fn corrupt_blob_fails_the_sync() {
        let (store, templates, loc) = setup().await;
        templates.upsert("E1", loc, &vector(0.1)).await.unwrap();

        let ada = store.employee_by_code(loc, "E1").await.unwrap().unwrap();
        let mut blob = store.templates_for_location(loc).await.unwrap()[0]
            .template
            .ciphertext
            .clone();
        blob[20] ^= 0x01;
        store.upsert_template(ada.id, &blob, "v1").await.unwrap();

        assert!(matches!(
            templates.list_for_sync(loc).await,
            Err(AppError::Crypto(CryptoError::AuthenticationFailure))
        ));
    }
}
