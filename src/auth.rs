//! Customer authentication with a local-first fallback.
//!
//! Credentials registered through this module are always kept locally
//! (bcrypt hashes under the `customerLogins` key) so a shop terminal keeps
//! working when the backend is down. Login checks the local credential set
//! first; unknown emails fall through to the backend's `/auth/login/`.
//! Either path links the session to a customer record, auto-creating one by
//! email when none exists. Failed attempts are lockout-tracked per email.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::RemoteStore;
use crate::cache::{self, LocalStore};
use crate::error::{Error, Result};
use crate::models::CustomerDraft;
use crate::store::Store;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAX_FAILED_ATTEMPTS: u32 = 5;
const LOCKOUT_MINUTES: i64 = 15;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A locally-stored credential. Only the bcrypt hash is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CustomerLogin {
    name: String,
    email: String,
    password_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    customer_id: Option<String>,
}

/// An authenticated session. Local-first logins carry a locally-minted
/// token; backend logins carry the backend's bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub is_staff: bool,
    pub login_time: DateTime<Utc>,
}

/// Failed-attempt tracking for one email.
struct LockoutEntry {
    attempts: u32,
    last_attempt: DateTime<Utc>,
}

impl LockoutEntry {
    fn locked_minutes_remaining(&self) -> Option<i64> {
        if self.attempts < MAX_FAILED_ATTEMPTS {
            return None;
        }
        let elapsed = Utc::now() - self.last_attempt;
        let window = Duration::minutes(LOCKOUT_MINUTES);
        if elapsed < window {
            Some((window - elapsed).num_minutes().max(1))
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Login, registration, and session state for one terminal.
pub struct AuthManager {
    remote: RemoteStore,
    local: Arc<LocalStore>,
    session: Option<AuthSession>,
    lockouts: HashMap<String, LockoutEntry>,
    bcrypt_cost: u32,
}

impl AuthManager {
    pub fn new(remote: RemoteStore, local: Arc<LocalStore>) -> Self {
        Self {
            remote,
            local,
            session: None,
            lockouts: HashMap::new(),
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }

    /// Lower the hash cost. Tests use this; production keeps the default.
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    pub fn session(&self) -> Option<&AuthSession> {
        self.session.as_ref()
    }

    pub fn logout(&mut self) {
        if let Some(session) = self.session.take() {
            info!(email = %session.email, "logged out");
        }
        self.remote.set_token(None);
    }

    /// Authenticate. Locally-registered emails are verified against the
    /// stored bcrypt hash without touching the network; anything else is
    /// forwarded to the backend.
    pub async fn login(&mut self, email: &str, password: &str) -> Result<AuthSession> {
        let email = email.trim().to_lowercase();
        self.check_lockout(&email)?;

        let mut logins = self.load_logins()?;
        if let Some(pos) = logins.iter().position(|l| l.email == email) {
            if !bcrypt::verify(password, &logins[pos].password_hash).unwrap_or(false) {
                return Err(self.record_failure(email));
            }
            self.lockouts.remove(&email);

            if logins[pos].customer_id.is_none() {
                logins[pos].customer_id =
                    ensure_customer_profile(&*self.local, &logins[pos].name, &email).await;
                self.store_logins(&logins)?;
            }

            let session = AuthSession {
                token: format!("customer-token-{}", Uuid::new_v4()),
                name: logins[pos].name.clone(),
                email,
                customer_id: logins[pos].customer_id.clone(),
                is_staff: false,
                login_time: Utc::now(),
            };
            info!(email = %session.email, "local login");
            self.session = Some(session.clone());
            return Ok(session);
        }

        match self.remote.login(&email, password).await {
            Ok(resp) => {
                self.lockouts.remove(&email);
                self.remote.set_token(Some(resp.token.clone()));
                let customer_id = if resp.user.is_staff {
                    None
                } else {
                    ensure_customer_profile(&self.remote, resp.user.display_name(), &email).await
                };
                let session = AuthSession {
                    token: resp.token,
                    name: resp.user.display_name().to_string(),
                    email,
                    customer_id,
                    is_staff: resp.user.is_staff,
                    login_time: Utc::now(),
                };
                info!(email = %session.email, is_staff = session.is_staff, "backend login");
                self.session = Some(session.clone());
                Ok(session)
            }
            Err(Error::Api { status, .. }) if status == 400 || status == 401 => {
                Err(self.record_failure(email))
            }
            Err(err) => Err(err),
        }
    }

    /// Register a new customer account. The credential always lands in the
    /// local set; the backend registration is best-effort, so an account
    /// created offline still works on this terminal.
    pub async fn register(
        &mut self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthSession> {
        let email = email.trim().to_lowercase();
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("name is required".into()));
        }
        if email.is_empty() || !email.contains('@') {
            return Err(Error::Validation("a valid email is required".into()));
        }
        if password.len() < 4 {
            return Err(Error::Validation("password is too short".into()));
        }

        let mut logins = self.load_logins()?;
        if logins.iter().any(|l| l.email == email) {
            return Err(Error::Validation(
                "an account with this email already exists".into(),
            ));
        }

        let password_hash = bcrypt::hash(password, self.bcrypt_cost)
            .map_err(|e| Error::Internal(format!("password hashing failed: {e}")))?;

        let (token, customer_id) = match self.remote.register(name, &email, password).await {
            Ok(resp) => {
                self.remote.set_token(Some(resp.token.clone()));
                let id = ensure_customer_profile(&self.remote, name, &email).await;
                (resp.token, id)
            }
            Err(err) => {
                warn!(error = %err, email, "backend registration failed, keeping local account");
                let id = ensure_customer_profile(&*self.local, name, &email).await;
                (format!("customer-token-{}", Uuid::new_v4()), id)
            }
        };

        logins.push(CustomerLogin {
            name: name.to_string(),
            email: email.clone(),
            password_hash,
            customer_id: customer_id.clone(),
        });
        self.store_logins(&logins)?;

        let session = AuthSession {
            token,
            name: name.to_string(),
            email: email.clone(),
            customer_id,
            is_staff: false,
            login_time: Utc::now(),
        };
        info!(email = %session.email, "registered");
        self.session = Some(session.clone());
        Ok(session)
    }

    // -- Lockout tracking ----------------------------------------------------

    fn check_lockout(&self, email: &str) -> Result<()> {
        if let Some(minutes) = self
            .lockouts
            .get(email)
            .and_then(LockoutEntry::locked_minutes_remaining)
        {
            return Err(Error::Validation(format!(
                "too many failed attempts; try again in {minutes} minutes"
            )));
        }
        Ok(())
    }

    fn record_failure(&mut self, email: String) -> Error {
        let entry = self.lockouts.entry(email.clone()).or_insert(LockoutEntry {
            attempts: 0,
            last_attempt: Utc::now(),
        });
        // A failure after an expired lockout window starts a fresh count.
        if entry.attempts >= MAX_FAILED_ATTEMPTS
            && Utc::now() - entry.last_attempt >= Duration::minutes(LOCKOUT_MINUTES)
        {
            entry.attempts = 0;
        }
        entry.attempts += 1;
        entry.last_attempt = Utc::now();
        if entry.attempts >= MAX_FAILED_ATTEMPTS {
            warn!(email, attempts = entry.attempts, "account locked out");
        }
        Error::Validation("invalid email or password".into())
    }

    // -- Credential storage --------------------------------------------------

    fn load_logins(&self) -> Result<Vec<CustomerLogin>> {
        self.local.get_list(cache::KEY_CUSTOMER_LOGINS)
    }

    fn store_logins(&self, logins: &[CustomerLogin]) -> Result<()> {
        self.local.put_list(cache::KEY_CUSTOMER_LOGINS, logins)
    }
}

/// Find the customer record for `email`, creating one when absent so every
/// login maps to exactly one customer. Failures are logged and tolerated;
/// a session without a profile link is still usable.
async fn ensure_customer_profile(store: &dyn Store, name: &str, email: &str) -> Option<String> {
    let customers = match store.list_customers().await {
        Ok(rows) => rows,
        Err(err) => {
            warn!(error = %err, email, "customer profile lookup failed");
            return None;
        }
    };
    if let Some(existing) = customers
        .iter()
        .find(|c| c.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)))
    {
        return Some(existing.id.clone());
    }

    let draft = CustomerDraft {
        name: name.to_string(),
        phone: String::new(),
        address: None,
        email: Some(email.to_string()),
        notes: "Auto-created customer profile".into(),
    };
    match store.create_customer(&draft).await {
        Ok(customer) => {
            info!(customer_id = %customer.id, email, "auto-created customer profile");
            Some(customer.id)
        }
        Err(err) => {
            warn!(error = %err, email, "failed to auto-create customer profile");
            None
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use std::time::Duration as StdDuration;

    /// Backend that is never reachable; everything exercises the local path.
    fn offline_manager() -> AuthManager {
        let config = StoreConfig::new("http://127.0.0.1:9")
            .with_timeout(StdDuration::from_millis(200));
        let remote = RemoteStore::new(config).unwrap();
        let local = Arc::new(LocalStore::open_in_memory().unwrap());
        AuthManager::new(remote, local).with_bcrypt_cost(4)
    }

    #[tokio::test]
    async fn test_register_then_login_offline() {
        let mut auth = offline_manager();

        let session = auth
            .register("Priya Sharma", "priya@example.com", "secret99")
            .await
            .unwrap();
        assert!(session.token.starts_with("customer-token-"));
        assert!(!session.is_staff);

        // The registration auto-created a linked customer profile.
        let customer_id = session.customer_id.expect("profile should be linked");
        let customers = auth.local.list_customers().await.unwrap();
        let profile = customers.iter().find(|c| c.id == customer_id).unwrap();
        assert_eq!(profile.email.as_deref(), Some("priya@example.com"));
        assert_eq!(profile.notes, "Auto-created customer profile");

        auth.logout();
        assert!(auth.session().is_none());

        // Email matching is case-insensitive on login.
        let session = auth
            .login("Priya@Example.com", "secret99")
            .await
            .unwrap();
        assert_eq!(session.email, "priya@example.com");
        assert_eq!(session.customer_id.as_deref(), Some(customer_id.as_str()));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let mut auth = offline_manager();
        auth.register("Priya", "priya@example.com", "secret99")
            .await
            .unwrap();
        let err = auth
            .register("Other", "priya@example.com", "different")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_wrong_password_and_lockout() {
        let mut auth = offline_manager();
        auth.register("Priya", "priya@example.com", "secret99")
            .await
            .unwrap();
        auth.logout();

        for _ in 0..MAX_FAILED_ATTEMPTS {
            let err = auth.login("priya@example.com", "nope").await.unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }

        // Locked out now, even with the right password.
        let err = auth
            .login("priya@example.com", "secret99")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("too many failed attempts"));
    }

    #[tokio::test]
    async fn test_unknown_email_offline_is_a_network_error() {
        let mut auth = offline_manager();
        let err = auth
            .login("nobody@example.com", "whatever")
            .await
            .unwrap_err();
        assert!(err.is_network());
    }

    #[tokio::test]
    async fn test_stored_credential_is_hashed() {
        let mut auth = offline_manager();
        auth.register("Priya", "priya@example.com", "secret99")
            .await
            .unwrap();

        let raw = auth
            .local
            .get_value(cache::KEY_CUSTOMER_LOGINS)
            .unwrap()
            .unwrap();
        let hash = raw[0]["password_hash"].as_str().unwrap();
        assert!(hash.starts_with("$2"));
        assert!(!raw.to_string().contains("secret99"));
    }
}
