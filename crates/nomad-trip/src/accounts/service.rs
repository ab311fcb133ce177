use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::mailer::Mailer;
use super::otp::{generate_code, OtpStore};
use super::password::{check_strength, hash_password, verify_password};
use super::tokens::{TokenKind, TokenPair, TokenService};
use crate::clock::Clock;
use crate::config::{AdminSeed, AuthConfig, MailConfig, MAX_OTP_TTL_SECONDS};
use crate::marketplace::domain::{NewUser, Role, User, UserId};
use crate::marketplace::{Actor, ServiceError};
use crate::repository::{RepositoryError, Store};
use crate::storage::{AssetGateway, ObjectStorage};

pub const OTP_SUBJECT: &str = "Nomad Trip OTP Code";

lazy_static! {
    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

/// Trimmed, lowercased address, or `InvalidInput` when it does not look like one.
pub fn normalize_email(email: &str) -> Result<String, ServiceError> {
    let email = email.trim().to_lowercase();
    if EMAIL_REGEX.is_match(&email) {
        Ok(email)
    } else {
        Err(ServiceError::invalid("email has an invalid format"))
    }
}

#[derive(Debug, Clone)]
pub struct AccountSettings {
    pub otp_ttl: Duration,
    pub mail_timeout: std::time::Duration,
}

impl AccountSettings {
    pub fn from_config(auth: &AuthConfig, mail: &MailConfig) -> Self {
        Self {
            otp_ttl: Duration::seconds(auth.otp_ttl_seconds.min(MAX_OTP_TTL_SECONDS) as i64),
            mail_timeout: mail.timeout,
        }
    }
}

/// Account as exposed over the API. The password hash never leaves the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserView {
    pub id: UserId,
    pub email: String,
    pub first_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role,
            avatar_url: user.avatar_url,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    pub code: String,
}

/// Partial profile edit. Changing the password needs the current one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProfileChanges {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
    pub password: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registered {
    pub user: UserView,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

/// Sign-up by emailed code, sign-in, token rotation, and profile upkeep.
pub struct AccountService<S, O, M> {
    store: Arc<S>,
    assets: AssetGateway<O>,
    mailer: Arc<M>,
    otp: Arc<dyn OtpStore>,
    tokens: Arc<TokenService>,
    clock: Arc<dyn Clock>,
    settings: AccountSettings,
}

impl<S, O, M> AccountService<S, O, M>
where
    S: Store,
    O: ObjectStorage + 'static,
    M: Mailer + 'static,
{
    pub fn new(
        store: Arc<S>,
        assets: AssetGateway<O>,
        mailer: Arc<M>,
        otp: Arc<dyn OtpStore>,
        tokens: Arc<TokenService>,
        clock: Arc<dyn Clock>,
        settings: AccountSettings,
    ) -> Self {
        Self {
            store,
            assets,
            mailer,
            otp,
            tokens,
            clock,
            settings,
        }
    }

    /// Mail a fresh code unless one is still live for this address. The code
    /// is stored only once the mail went out.
    pub async fn send_otp(&self, email: &str) -> Result<(), ServiceError> {
        let email = normalize_email(email)?;
        let now = self.clock.now();
        if let Some(remaining) = self.otp.remaining(&email, now) {
            return Err(ServiceError::conflict(format!(
                "OTP code already sent. Try again in {} seconds.",
                remaining.num_seconds()
            )));
        }

        let code = generate_code();
        let body = format!("OTP code: {code}");
        let delivery = tokio::time::timeout(
            self.settings.mail_timeout,
            self.mailer.send(&email, OTP_SUBJECT, &body),
        )
        .await;
        match delivery {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(error = %err, "otp mail failed");
                return Err(ServiceError::UpstreamFailure(err.to_string()));
            }
            Err(_) => {
                error!(timeout = ?self.settings.mail_timeout, "otp mail timed out");
                return Err(ServiceError::UpstreamFailure(format!(
                    "mail delivery timed out after {:?}",
                    self.settings.mail_timeout
                )));
            }
        }

        self.otp.put(&email, code, now, now + self.settings.otp_ttl);
        info!(%email, "otp code sent");
        Ok(())
    }

    /// Create a passenger account from a redeemed code.
    pub fn register(&self, registration: Registration) -> Result<Registered, ServiceError> {
        let email = normalize_email(&registration.email)?;
        if self.store.read(|tx| tx.user_by_email(&email))?.is_some() {
            return Err(email_taken(&email));
        }
        if registration.first_name.trim().is_empty() {
            return Err(ServiceError::invalid("First name is required"));
        }
        let last_name = match registration.last_name {
            Some(last_name) if !last_name.trim().is_empty() => last_name,
            _ => return Err(ServiceError::invalid("Last name is required")),
        };
        check_strength(&registration.password)?;

        let now = self.clock.now();
        if !self.otp.redeem(&email, registration.code.trim(), now) {
            return Err(ServiceError::invalid("Incorrect or expired OTP"));
        }

        let password_hash = hash_password(&registration.password)?;
        let user = self
            .store
            .write(|tx| {
                tx.insert_user(NewUser {
                    email: email.clone(),
                    first_name: registration.first_name,
                    last_name: Some(last_name),
                    password_hash,
                    role: Role::Passenger,
                    created_at: now,
                })
            })
            .map_err(|err| match err {
                RepositoryError::Conflict => email_taken(&email),
                other => other.into(),
            })?;

        let tokens = self.tokens.issue(&user)?;
        info!(user_id = %user.id, "account registered");
        Ok(Registered {
            user: user.into(),
            tokens,
        })
    }

    pub fn login(&self, email: &str, password: &str) -> Result<TokenPair, ServiceError> {
        let email = email.trim().to_lowercase();
        let user = self
            .store
            .read(|tx| tx.user_by_email(&email))?
            .ok_or_else(|| ServiceError::not_found(format!("User with {email} not found")))?;
        if !verify_password(password, &user.password_hash)? {
            return Err(ServiceError::unauthorized("Incorrect credentials"));
        }
        Ok(self.tokens.issue(&user)?)
    }

    /// Exchange a refresh token for a new pair.
    pub fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ServiceError> {
        let claims = self.tokens.verify(refresh_token, TokenKind::Refresh)?;
        let user = self
            .store
            .read(|tx| tx.user(claims.user_id))?
            .ok_or_else(|| ServiceError::unauthorized("Invalid token"))?;
        Ok(self.tokens.issue(&user)?)
    }

    pub fn profile(&self, user_id: UserId) -> Result<UserView, ServiceError> {
        self.load(user_id).map(UserView::from)
    }

    /// Someone else's profile. Admin accounts are not listed publicly.
    pub fn public_profile(&self, user_id: UserId) -> Result<UserView, ServiceError> {
        let user = self.load(user_id)?;
        if user.role == Role::Admin {
            return Err(ServiceError::forbidden("Access denied"));
        }
        Ok(user.into())
    }

    pub fn update_profile(
        &self,
        actor: &Actor,
        changes: ProfileChanges,
    ) -> Result<UserView, ServiceError> {
        if let Some(first_name) = &changes.first_name {
            if first_name.trim().is_empty() {
                return Err(ServiceError::invalid("First name must not be empty"));
            }
        }
        if let Some(last_name) = &changes.last_name {
            if last_name.trim().is_empty() {
                return Err(ServiceError::invalid("Last name must not be empty"));
            }
        }

        let current = self.load(actor.user_id)?;
        let new_hash = match &changes.new_password {
            Some(new_password) => {
                check_strength(new_password)?;
                let supplied = changes.password.as_deref().unwrap_or_default();
                if !verify_password(supplied, &current.password_hash)? {
                    return Err(ServiceError::unauthorized("Incorrect password"));
                }
                Some(hash_password(new_password)?)
            }
            None => None,
        };

        let now = self.clock.now();
        let user = self.store.write(|tx| {
            let mut user = tx
                .user(actor.user_id)?
                .ok_or_else(|| ServiceError::not_found("User not found"))?;
            if let Some(first_name) = changes.first_name {
                user.first_name = first_name;
            }
            if let Some(last_name) = changes.last_name {
                user.last_name = Some(last_name);
            }
            if let Some(avatar_url) = changes.avatar_url {
                user.avatar_url = Some(avatar_url);
            }
            if let Some(hash) = new_hash {
                user.password_hash = hash;
            }
            user.updated_at = now;
            tx.save_user(&user)?;
            Ok::<_, ServiceError>(user)
        })?;
        info!(user_id = %user.id, "profile updated");
        Ok(user.into())
    }

    /// Delete the caller together with their company or driver profile.
    /// Stored documents are discarded before the rows go, like a company or
    /// driver delete.
    pub async fn delete_account(&self, actor: &Actor) -> Result<(), ServiceError> {
        let assets = self.store.read(|tx| {
            if tx.user(actor.user_id)?.is_none() {
                return Err(ServiceError::not_found("User not found"));
            }
            let mut assets = Vec::new();
            if let Some(company) = tx.company_by_owner(actor.user_id)? {
                assets.push(company.logo_url);
            }
            if let Some(driver) = tx.driver_by_user(actor.user_id)? {
                assets.push(driver.id_photo_url);
                assets.push(driver.license_photo_url);
            }
            Ok(assets)
        })?;
        self.assets.discard(&assets).await;

        self.store.write(|tx| match tx.delete_user(actor.user_id) {
            Ok(_) => Ok(()),
            Err(RepositoryError::NotFound) => Err(ServiceError::not_found("User not found")),
            Err(other) => Err(other.into()),
        })?;
        info!(user_id = %actor.user_id, "account deleted");
        Ok(())
    }

    /// Create the bootstrap admin. Running it again for the same admin is a no-op.
    pub fn seed_admin(&self, seed: &AdminSeed) -> Result<UserView, ServiceError> {
        let email = normalize_email(&seed.email)?;
        if let Some(existing) = self.store.read(|tx| tx.user_by_email(&email))? {
            return if existing.role == Role::Admin {
                Ok(existing.into())
            } else {
                Err(email_taken(&email))
            };
        }

        let password_hash = hash_password(&seed.password)?;
        let now = self.clock.now();
        let admin = self.store.write(|tx| {
            tx.insert_user(NewUser {
                email: email.clone(),
                first_name: "Admin".to_string(),
                last_name: None,
                password_hash,
                role: Role::Admin,
                created_at: now,
            })
        })?;
        info!(user_id = %admin.id, "admin account seeded");
        Ok(admin.into())
    }

    fn load(&self, user_id: UserId) -> Result<User, ServiceError> {
        self.store
            .read(|tx| tx.user(user_id))?
            .ok_or_else(|| ServiceError::not_found(format!("User with {user_id} id not found")))
    }
}

fn email_taken(email: &str) -> ServiceError {
    ServiceError::conflict(format!("User with {email} already exists"))
}
