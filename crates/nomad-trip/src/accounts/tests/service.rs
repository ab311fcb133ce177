use std::sync::Arc;

use chrono::Duration;

use super::common::*;
use crate::accounts::service::OTP_SUBJECT;
use crate::accounts::{ProfileChanges, TokenKind};
use crate::config::{AdminSeed, StorageConfig};
use crate::marketplace::{Actor, ErrorKind, Role, ServiceError};
use crate::repository::Store;
use crate::storage::{AssetGateway, ImageUpload, ObjectStorage};

#[tokio::test]
async fn otp_is_mailed_and_registration_issues_tokens() {
    let h = harness();

    h.service
        .send_otp(" Aigerim@Example.com ")
        .await
        .expect("otp sent");

    let sent = h.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "aigerim@example.com");
    assert_eq!(sent[0].subject, OTP_SUBJECT);
    let code = h.mailer.last_code_for("aigerim@example.com").unwrap();
    assert_eq!(code.len(), 6);

    let registered = h
        .service
        .register(registration("aigerim@example.com", &code))
        .expect("registered");

    assert_eq!(registered.user.email, "aigerim@example.com");
    assert_eq!(registered.user.role, Role::Passenger);
    assert_eq!(registered.tokens.token_type, "bearer");
    let claims = h
        .tokens
        .verify(&registered.tokens.access_token, TokenKind::Access)
        .expect("valid access token");
    assert_eq!(claims.user_id, registered.user.id);
    assert_eq!(claims.sub, "aigerim@example.com");
}

#[tokio::test]
async fn resending_while_a_code_is_live_conflicts() {
    let h = harness();
    h.service.send_otp("a@example.com").await.unwrap();

    h.clock.advance(Duration::seconds(60));
    let err = h.service.send_otp("a@example.com").await.unwrap_err();
    assert_eq!(
        err,
        ServiceError::conflict("OTP code already sent. Try again in 240 seconds.")
    );

    h.clock.advance(Duration::seconds(240));
    h.service
        .send_otp("a@example.com")
        .await
        .expect("expired code can be replaced");
    assert_eq!(h.mailer.sent().len(), 2);
}

#[tokio::test]
async fn mail_failures_are_upstream_and_leave_no_code_behind() {
    let h = harness_with(Arc::new(BrokenMailer));
    let err = h.service.send_otp("a@example.com").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamFailure);

    // No live code was stored, so a retry is not throttled.
    let err = h.service.send_otp("a@example.com").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamFailure);

    let h = harness_with(Arc::new(StalledMailer));
    let err = h.service.send_otp("a@example.com").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamFailure);
    assert!(err.to_string().contains("timed out"));
}

#[tokio::test]
async fn registration_rejects_wrong_expired_or_reused_codes() {
    let h = harness();
    h.service.send_otp("a@example.com").await.unwrap();
    let code = h.mailer.last_code_for("a@example.com").unwrap();
    let wrong = if code == "000000" { "111111" } else { "000000" };

    let err = h
        .service
        .register(registration("a@example.com", wrong))
        .unwrap_err();
    assert_eq!(err, ServiceError::invalid("Incorrect or expired OTP"));

    h.clock.advance(Duration::seconds(301));
    let err = h
        .service
        .register(registration("a@example.com", &code))
        .unwrap_err();
    assert_eq!(err, ServiceError::invalid("Incorrect or expired OTP"));

    h.service.send_otp("a@example.com").await.unwrap();
    let code = h.mailer.last_code_for("a@example.com").unwrap();
    h.service
        .register(registration("a@example.com", &code))
        .expect("fresh code works");

    let err = h
        .service
        .register(registration("a@example.com", &code))
        .unwrap_err();
    assert_eq!(
        err,
        ServiceError::conflict("User with a@example.com already exists")
    );
}

#[tokio::test]
async fn field_errors_do_not_burn_the_code() {
    let h = harness();
    h.service.send_otp("a@example.com").await.unwrap();
    let code = h.mailer.last_code_for("a@example.com").unwrap();

    let mut missing_last_name = registration("a@example.com", &code);
    missing_last_name.last_name = None;
    let err = h.service.register(missing_last_name).unwrap_err();
    assert_eq!(err, ServiceError::invalid("Last name is required"));

    let mut weak = registration("a@example.com", &code);
    weak.password = "short".to_string();
    let err = h.service.register(weak).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    h.service
        .register(registration("a@example.com", &code))
        .expect("code still valid");
}

#[tokio::test]
async fn login_distinguishes_unknown_email_from_wrong_password() {
    let h = harness();
    h.sign_up("a@example.com").await;

    let err = h.service.login("nobody@example.com", PASSWORD).unwrap_err();
    assert_eq!(
        err,
        ServiceError::not_found("User with nobody@example.com not found")
    );

    let err = h.service.login("a@example.com", "wrong-password").unwrap_err();
    assert_eq!(err, ServiceError::unauthorized("Incorrect credentials"));

    let tokens = h
        .service
        .login("A@Example.com", PASSWORD)
        .expect("case-insensitive email");
    assert!(h
        .tokens
        .verify(&tokens.refresh_token, TokenKind::Refresh)
        .is_ok());
}

#[tokio::test]
async fn refresh_accepts_only_live_refresh_tokens() {
    let h = harness();
    let registered = h.sign_up("a@example.com").await;

    let err = h
        .service
        .refresh(&registered.tokens.access_token)
        .unwrap_err();
    assert_eq!(err, ServiceError::unauthorized("Invalid token"));

    h.clock.advance(Duration::hours(2));
    let rotated = h
        .service
        .refresh(&registered.tokens.refresh_token)
        .expect("refresh outlives access token");
    assert!(h
        .tokens
        .verify(&rotated.access_token, TokenKind::Access)
        .is_ok());

    h.clock.advance(Duration::days(200));
    let err = h
        .service
        .refresh(&registered.tokens.refresh_token)
        .unwrap_err();
    assert_eq!(err, ServiceError::unauthorized("Token has expired"));
}

#[tokio::test]
async fn password_change_requires_current_password() {
    let h = harness();
    let registered = h.sign_up("a@example.com").await;
    let actor = Actor::new(registered.user.id, registered.user.role);

    let err = h
        .service
        .update_profile(
            &actor,
            ProfileChanges {
                password: Some("guess-guess".to_string()),
                new_password: Some("new-steppe-wind".to_string()),
                ..ProfileChanges::default()
            },
        )
        .unwrap_err();
    assert_eq!(err, ServiceError::unauthorized("Incorrect password"));

    let view = h
        .service
        .update_profile(
            &actor,
            ProfileChanges {
                first_name: Some("Aika".to_string()),
                password: Some(PASSWORD.to_string()),
                new_password: Some("new-steppe-wind".to_string()),
                ..ProfileChanges::default()
            },
        )
        .expect("updated");
    assert_eq!(view.first_name, "Aika");
    assert!(h.service.login("a@example.com", "new-steppe-wind").is_ok());
    assert!(h.service.login("a@example.com", PASSWORD).is_err());
}

#[tokio::test]
async fn admin_profiles_are_not_public() {
    let h = harness();
    let seed = AdminSeed {
        email: "root@nomad-trip.kz".to_string(),
        password: "admin-password".to_string(),
    };
    let admin = h.service.seed_admin(&seed).expect("seeded");
    assert_eq!(admin.role, Role::Admin);
    assert_eq!(h.service.seed_admin(&seed).expect("idempotent").id, admin.id);

    let err = h.service.public_profile(admin.id).unwrap_err();
    assert_eq!(err, ServiceError::forbidden("Access denied"));

    let user = h.sign_up("a@example.com").await;
    let public = h.service.public_profile(user.user.id).expect("public");
    assert_eq!(public.email, "a@example.com");
    let json = serde_json::to_value(&public).unwrap();
    assert!(json.get("password_hash").is_none());
}

#[tokio::test]
async fn seeding_over_a_regular_account_conflicts() {
    let h = harness();
    h.sign_up("a@example.com").await;

    let err = h
        .service
        .seed_admin(&AdminSeed {
            email: "a@example.com".to_string(),
            password: "admin-password".to_string(),
        })
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn deleting_an_account_removes_profiles_and_documents() {
    let h = harness();
    let registered = h.sign_up("a@example.com").await;
    let logo = h
        .storage
        .upload(ImageUpload::new("logo.png", "image/png", vec![1]), "logos")
        .await
        .unwrap();
    h.store
        .write(|tx| {
            tx.insert_company(crate::marketplace::domain::NewCompany {
                owner_id: registered.user.id,
                name: "Steppe Shuttle".to_string(),
                bin: "990140000123".to_string(),
                description: "Transfers".to_string(),
                address: "Almaty".to_string(),
                logo_url: logo.clone(),
                created_at: start(),
            })
        })
        .unwrap();
    let actor = Actor::new(registered.user.id, Role::Company);

    h.service.delete_account(&actor).await.expect("deleted");

    assert!(!h.storage.contains(&logo));
    let company = h
        .store
        .read(|tx| tx.company_by_owner(registered.user.id))
        .unwrap();
    assert!(company.is_none());
    let err = h.service.profile(registered.user.id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn account_documents_are_discarded_before_the_rows() {
    let h = harness();
    let registered = h.sign_up("a@example.com").await;
    let storage = Arc::new(WatchingStorage::new(h.store.clone()));
    let service = crate::accounts::AccountService::new(
        h.store.clone(),
        AssetGateway::new(storage.clone(), &StorageConfig::default()),
        h.mailer.clone(),
        Arc::new(crate::accounts::MemoryOtpStore::new()),
        h.tokens.clone(),
        h.clock.clone(),
        settings(),
    );
    let logo = storage
        .upload(ImageUpload::new("logo.png", "image/png", vec![1]), "logos")
        .await
        .unwrap();
    h.store
        .write(|tx| {
            tx.insert_company(crate::marketplace::domain::NewCompany {
                owner_id: registered.user.id,
                name: "Steppe Shuttle".to_string(),
                bin: "990140000123".to_string(),
                description: "Transfers".to_string(),
                address: "Almaty".to_string(),
                logo_url: logo.clone(),
                created_at: start(),
            })
        })
        .unwrap();

    service
        .delete_account(&Actor::new(registered.user.id, Role::Company))
        .await
        .expect("deleted");

    assert_eq!(storage.companies_at_delete(), vec![1]);
    assert!(!storage.inner.contains(&logo));
    assert_eq!(
        h.service.profile(registered.user.id).unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[tokio::test]
async fn deleting_an_unknown_account_touches_no_documents() {
    let h = harness();
    let storage = Arc::new(WatchingStorage::new(h.store.clone()));
    let service = crate::accounts::AccountService::new(
        h.store.clone(),
        AssetGateway::new(storage.clone(), &StorageConfig::default()),
        h.mailer.clone(),
        Arc::new(crate::accounts::MemoryOtpStore::new()),
        h.tokens.clone(),
        h.clock.clone(),
        settings(),
    );

    let err = service
        .delete_account(&Actor::new(crate::marketplace::UserId(404), Role::Passenger))
        .await
        .unwrap_err();

    assert_eq!(err, ServiceError::not_found("User not found"));
    assert!(storage.companies_at_delete().is_empty());
}
