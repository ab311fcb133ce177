//! Accounts: email one-time codes, password sign-in, JWT access/refresh
//! tokens, and the request extractor that turns a bearer token into an
//! [`Actor`](crate::marketplace::Actor).

pub mod auth;
pub mod mailer;
pub mod otp;
pub mod password;
pub mod router;
pub mod service;
pub mod tokens;

#[cfg(test)]
mod tests;

pub use auth::{ActorResolver, Authenticated, SharedResolver, TokenAuthenticator};
pub use mailer::{LogMailer, MailError, Mailer, MemoryMailer};
pub use otp::{MemoryOtpStore, OtpStore};
pub use router::account_router;
pub use service::{
    AccountService, AccountSettings, ProfileChanges, Registered, Registration, UserView,
};
pub use tokens::{Claims, TokenError, TokenKind, TokenPair, TokenService};
