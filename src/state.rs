use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::Config;
use crate::service::clock::ClockEngine;
use crate::service::crypto::{CryptoError, TemplateCipher};
use crate::service::export::ExportPipeline;
use crate::service::mailer::{MailTransport, SendGridTransport};
use crate::service::templates::TemplateStore;
use crate::store::LedgerStore;
use crate::utils::credential_cache::CredentialCache;

/// Shared handles injected into every handler through `web::Data<AppState>`.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn LedgerStore>,
    pub clock: ClockEngine,
    pub templates: TemplateStore,
    pub export: ExportPipeline,
    pub credentials: CredentialCache,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn LedgerStore>,
        mailer: Option<Arc<dyn MailTransport>>,
    ) -> Result<Self, CryptoError> {
        let mut cipher = TemplateCipher::new(&config.encryption_key_id, &config.secret_key)?;
        for (key_id, secret) in &config.retired_keys {
            cipher = cipher.with_retired(key_id, secret)?;
        }

        info!(
            key_version = cipher.key_version(),
            retired = config.retired_keys.len(),
            "Template cipher ready"
        );

        Ok(Self {
            clock: ClockEngine::new(store.clone()),
            templates: TemplateStore::new(store.clone(), Arc::new(cipher)),
            export: ExportPipeline::new(store.clone(), mailer, config.mail_from.clone()),
            credentials: CredentialCache::new(Duration::from_secs(config.credential_cache_ttl_secs)),
            store,
            config,
        })
    }

    /// SendGrid when an API key is configured, otherwise no transport at all.
    pub fn mailer_from_config(config: &Config) -> Option<Arc<dyn MailTransport>> {
        config.sendgrid_api_key.as_ref().map(|key| {
            Arc::new(SendGridTransport::new(key.clone(), config.sendgrid_url.clone()))
                as Arc<dyn MailTransport>
        })
    }
}
