// The `context_hub` module shares one Gmail authorization between all components.

use super::google_auth::{AuthError, GConf, GmailHubType, gmail_auth};
use google_gmail1::api::Scope;
use std::sync::{Mutex, PoisonError};
use tokio::sync::Mutex as TokioMutex;
use tracing::debug;

/// A hub for managing Google API authentication.
///
/// Components register the scopes they need (the transport needs read access
/// for polling and send access for acknowledgments). The first call to
/// [`ContextHub::get_hub`] runs the OAuth flow once with all of them and caches
/// the resulting hub.
pub struct ContextHub {
    gconf: GConf,
    scopes: Mutex<Vec<Scope>>,
    hub: TokioMutex<Option<GmailHubType>>,
}

impl ContextHub {
    pub fn new(gconf: GConf) -> Self {
        Self {
            gconf,
            scopes: Mutex::new(Vec::new()),
            hub: TokioMutex::new(None),
        }
    }

    /// Adds a scope to request at authentication time. Duplicates are ignored.
    pub fn add_scope(&self, scope: Scope) {
        let mut scopes = self.scopes.lock().unwrap_or_else(PoisonError::into_inner);
        if !scopes.contains(&scope) {
            scopes.push(scope);
        }
        debug!(scopes = ?scopes, "Registered Gmail scopes");
    }

    /// Returns the scopes registered so far.
    pub fn scopes(&self) -> Vec<Scope> {
        self.scopes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the authenticated hub, authenticating on first use.
    pub async fn get_hub(&self) -> Result<GmailHubType, AuthError> {
        let mut hub_guard = self.hub.lock().await;
        if let Some(hub) = hub_guard.as_ref() {
            return Ok(hub.clone());
        }

        // The std mutex must not be held across the await below.
        let scopes = self.scopes();
        let hub = gmail_auth(self.gconf.clone(), &scopes).await?;
        *hub_guard = Some(hub.clone());

        Ok(hub)
    }
}
