use crate::infra::Backend;
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::Args;
use nomad_trip::accounts::{MemoryMailer, Registration};
use nomad_trip::clock::ManualClock;
use nomad_trip::config::{AdminSeed, AppConfig};
use nomad_trip::error::AppError;
use nomad_trip::marketplace::{
    Actor, CompanyData, DriverData, DriverView, PageRequest, ServiceError, StatusChange,
    COOLDOWN_DAYS,
};
use nomad_trip::storage::ImageUpload;
use std::sync::Arc;

const DEMO_PASSWORD: &str = "steppe-wind-42";

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Day the walkthrough starts on (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) start: Option<NaiveDate>,
    /// Stop after company onboarding and skip the driver application cooldown.
    #[arg(long)]
    pub(crate) skip_affiliation: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        start,
        skip_affiliation,
    } = args;

    let start = start.unwrap_or_else(|| Local::now().date_naive());
    let start: DateTime<Utc> = Utc.from_utc_datetime(&start.and_time(NaiveTime::MIN));
    let clock = Arc::new(ManualClock::new(start));
    let mailer = Arc::new(MemoryMailer::new());
    let backend = Backend::in_memory(&AppConfig::local(), mailer.clone(), clock.clone());

    println!("Nomad Trip marketplace demo (starting {})", start.date_naive());

    let admin = backend.accounts.seed_admin(&AdminSeed {
        email: "admin@nomad-trip.local".to_string(),
        password: DEMO_PASSWORD.to_string(),
    })?;
    let admin = Actor::new(admin.id, admin.role);
    println!("- Seeded administrator {}", admin.user_id);

    println!("\nCompany onboarding");
    let owner = sign_up(&backend, &mailer, "owner@steppe-shuttle.kz", "Aigerim").await?;
    let company_id = backend
        .marketplace
        .companies
        .create(
            &owner,
            CompanyData {
                name: "Steppe Shuttle".to_string(),
                bin: "990140000123".to_string(),
                description: "Airport transfers across Almaty".to_string(),
                address: "Almaty, Abay ave 10".to_string(),
            },
            demo_image("logo.png"),
        )
        .await?;
    let owner = current_actor(&backend, owner)?;
    let company = backend.marketplace.companies.get_own(owner.user_id)?;
    println!(
        "- Company {} registered by {} -> status {}",
        company.id,
        owner.user_id,
        company.moderation.status()
    );
    println!("  Logo stored at {}", company.logo_url);

    let company = backend.marketplace.companies.update_status(
        &admin,
        company_id,
        StatusChange::reject("BIN does not match the registry"),
    )?;
    println!(
        "- Admin review -> {} ({})",
        company.moderation.status(),
        company.moderation.rejection_reason().unwrap_or("-")
    );
    let company = backend
        .marketplace
        .companies
        .update_status(&admin, company_id, StatusChange::approve())?;
    println!("- Admin review -> {}", company.moderation.status());

    if let Err(err) = backend.marketplace.companies.update_status(
        &admin,
        company_id,
        StatusChange::approve(),
    ) {
        println!("  Repeating the approval is refused: {}", err);
    }

    if skip_affiliation {
        return Ok(());
    }

    println!("\nDriver affiliation ({COOLDOWN_DAYS}-day cooldown)");
    let driver = sign_up(&backend, &mailer, "driver@example.kz", "Nurlan").await?;
    let driver_id = backend
        .marketplace
        .drivers
        .create(
            &driver,
            DriverData {
                phone_number: "+77011234567".to_string(),
                license_number: "KZ-0042".to_string(),
                license_issued_at: start.date_naive() - Duration::days(3 * 365),
                license_expires_at: start.date_naive() + Duration::days(7 * 365),
            },
            demo_image("id.png"),
            demo_image("license.png"),
        )
        .await?;
    let driver = current_actor(&backend, driver)?;
    println!("- Driver profile {} created", driver_id);

    let affiliation = backend.marketplace.affiliations.apply(&driver, company_id)?;
    println!(
        "- Day 0: applied to company {} -> {}",
        company_id,
        affiliation.moderation.status()
    );
    let profile = backend.marketplace.drivers.get_by_id(&owner, driver_id)?;
    render_driver_view("company", &profile);
    let profile = backend.marketplace.drivers.get_by_id(&driver, driver_id)?;
    render_driver_view("owner", &profile);
    let affiliation = backend.marketplace.affiliations.update_status(
        &owner,
        driver_id,
        company_id,
        StatusChange::reject("Fleet is full this season"),
    )?;
    println!(
        "- Day 0: company decision -> {} ({})",
        affiliation.moderation.status(),
        affiliation.moderation.rejection_reason().unwrap_or("-")
    );

    for day in [10, COOLDOWN_DAYS + 1] {
        clock.set(start + Duration::days(day));
        match backend.marketplace.affiliations.apply(&driver, company_id) {
            Ok(affiliation) => println!(
                "- Day {}: re-applied -> {}",
                day,
                affiliation.moderation.status()
            ),
            Err(ServiceError::Conflict(message)) => println!("- Day {}: {}", day, message),
            Err(err) => return Err(err.into()),
        }
    }

    let applications = backend
        .marketplace
        .affiliations
        .list_for_company(&owner, company_id, None, PageRequest::default())?;
    println!(
        "  Company sees {} application(s) on page {}",
        applications.total, applications.page
    );

    Ok(())
}

async fn sign_up(
    backend: &Backend<MemoryMailer>,
    mailer: &MemoryMailer,
    email: &str,
    first_name: &str,
) -> Result<Actor, ServiceError> {
    backend.accounts.send_otp(email).await?;
    let code = mailer
        .last_code_for(email)
        .ok_or_else(|| ServiceError::Internal(format!("no code was mailed to {email}")))?;
    let registered = backend.accounts.register(Registration {
        email: email.to_string(),
        password: DEMO_PASSWORD.to_string(),
        first_name: first_name.to_string(),
        last_name: Some("Demo".to_string()),
        code,
    })?;
    println!(
        "- {} signed up as {:?} (user {})",
        registered.user.email, registered.user.role, registered.user.id
    );
    Ok(Actor::new(registered.user.id, registered.user.role))
}

/// Profile creation flips the role; reload it the way a fresh token would.
fn current_actor(backend: &Backend<MemoryMailer>, actor: Actor) -> Result<Actor, ServiceError> {
    let profile = backend.accounts.profile(actor.user_id)?;
    Ok(Actor::new(profile.id, profile.role))
}

fn render_driver_view(viewer: &str, view: &DriverView) {
    println!(
        "  Seen by {}: id photo {} | license photo {}",
        viewer,
        if view.id_photo_url.is_some() { "visible" } else { "hidden" },
        if view.license_photo_url.is_some() { "visible" } else { "hidden" }
    );
}

fn demo_image(name: &str) -> ImageUpload {
    ImageUpload::new(name, "image/png", vec![0x89, b'P', b'N', b'G'])
}
