use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use super::affiliation::AffiliationService;
use super::company::{CompanyChanges, CompanyData, CompanySearch, CompanyService};
use super::domain::{CompanyId, DriverId, ModerationStatus, PageRequest, DEFAULT_PER_PAGE};
use super::driver::{DriverChanges, DriverData, DriverService};
use super::error::ServiceError;
use super::moderation::StatusChange;
use crate::accounts::Authenticated;
use crate::clock::Clock;
use crate::config::StorageConfig;
use crate::repository::Store;
use crate::storage::{AssetGateway, ImageUpload, ObjectStorage};

/// Extra room on top of the file size limit for form fields and boundaries.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// The marketplace services shared by every handler.
pub struct MarketplaceServices<S, O> {
    pub companies: Arc<CompanyService<S, O>>,
    pub drivers: Arc<DriverService<S, O>>,
    pub affiliations: Arc<AffiliationService<S>>,
    body_limit: usize,
}

impl<S, O> Clone for MarketplaceServices<S, O> {
    fn clone(&self) -> Self {
        Self {
            companies: self.companies.clone(),
            drivers: self.drivers.clone(),
            affiliations: self.affiliations.clone(),
            body_limit: self.body_limit,
        }
    }
}

impl<S, O> MarketplaceServices<S, O>
where
    S: Store,
    O: ObjectStorage + 'static,
{
    pub fn new(
        store: Arc<S>,
        storage: Arc<O>,
        config: &StorageConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let assets = AssetGateway::new(storage, config);
        Self {
            companies: Arc::new(CompanyService::new(
                store.clone(),
                assets.clone(),
                clock.clone(),
            )),
            drivers: Arc::new(DriverService::new(store.clone(), assets, clock.clone())),
            affiliations: Arc::new(AffiliationService::new(store, clock)),
            // Driver forms carry two files.
            body_limit: config.max_upload_bytes.saturating_mul(2) + FORM_OVERHEAD_BYTES,
        }
    }
}

/// Company, driver, application, and admin moderation routes.
pub fn marketplace_router<S, O>(services: MarketplaceServices<S, O>) -> Router
where
    S: Store,
    O: ObjectStorage + 'static,
{
    let body_limit = services.body_limit;
    Router::new()
        .route(
            "/api/v1/companies",
            post(create_company_handler::<S, O>).get(search_companies_handler::<S, O>),
        )
        .route(
            "/api/v1/companies/me",
            get(own_company_handler::<S, O>)
                .put(update_company_handler::<S, O>)
                .delete(delete_company_handler::<S, O>),
        )
        .route(
            "/api/v1/companies/me/applications",
            get(company_applications_handler::<S, O>),
        )
        .route(
            "/api/v1/companies/me/applications/:driver_id",
            patch(company_decide_handler::<S, O>),
        )
        .route("/api/v1/companies/:company_id", get(company_handler::<S, O>))
        .route("/api/v1/drivers", post(create_driver_handler::<S, O>))
        .route(
            "/api/v1/drivers/me",
            get(own_driver_handler::<S, O>)
                .put(update_driver_handler::<S, O>)
                .delete(delete_driver_handler::<S, O>),
        )
        .route(
            "/api/v1/drivers/me/applications",
            get(driver_applications_handler::<S, O>),
        )
        .route(
            "/api/v1/drivers/me/applications/:company_id",
            post(apply_handler::<S, O>),
        )
        .route("/api/v1/drivers/:driver_id", get(driver_handler::<S, O>))
        .route(
            "/api/v1/applications/:driver_id/:company_id",
            get(application_handler::<S, O>),
        )
        .route(
            "/api/v1/admin/companies/:company_id/status",
            patch(admin_company_status_handler::<S, O>),
        )
        .route(
            "/api/v1/admin/companies/:company_id/applications",
            get(admin_company_applications_handler::<S, O>),
        )
        .route("/api/v1/admin/drivers", get(admin_drivers_handler::<S, O>))
        .route(
            "/api/v1/admin/drivers/:driver_id/status",
            patch(admin_driver_status_handler::<S, O>),
        )
        .route(
            "/api/v1/admin/drivers/:driver_id/applications",
            get(admin_driver_applications_handler::<S, O>),
        )
        .route(
            "/api/v1/admin/applications/:driver_id/:company_id/status",
            patch(admin_application_status_handler::<S, O>),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(services)
}

/// Unwrap a JSON body, reporting malformed input as `INVALID_INPUT`.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ServiceError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ServiceError::invalid(rejection.body_text()))
}

fn query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ServiceError> {
    query
        .map(|Query(value)| value)
        .map_err(|rejection| ServiceError::invalid(rejection.body_text()))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<ModerationStatus>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ListQuery {
    fn page(&self) -> PageRequest {
        PageRequest::new(
            self.page.unwrap_or(1),
            self.per_page.unwrap_or(DEFAULT_PER_PAGE),
        )
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub text: Option<String>,
    pub status: Option<ModerationStatus>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Text fields and files of a multipart form.
#[derive(Debug, Default)]
struct Form {
    fields: HashMap<String, String>,
    files: HashMap<String, ImageUpload>,
}

impl Form {
    async fn read(mut multipart: Multipart) -> Result<Self, ServiceError> {
        let mut form = Form::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| ServiceError::invalid(err.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let content_type = field
                        .content_type()
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|err| ServiceError::invalid(err.body_text()))?;
                    form.files
                        .insert(name, ImageUpload::new(file_name, content_type, bytes.to_vec()));
                }
                None => {
                    let text = field
                        .text()
                        .await
                        .map_err(|err| ServiceError::invalid(err.body_text()))?;
                    form.fields.insert(name, text);
                }
            }
        }
        Ok(form)
    }

    fn text(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name)
    }

    fn required_text(&mut self, name: &str) -> Result<String, ServiceError> {
        self.text(name)
            .ok_or_else(|| ServiceError::invalid(format!("{name} is required")))
    }

    fn date(&mut self, name: &str) -> Result<Option<NaiveDate>, ServiceError> {
        self.text(name)
            .map(|raw| {
                NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
                    ServiceError::invalid(format!("{name} must be a date in YYYY-MM-DD format"))
                })
            })
            .transpose()
    }

    fn required_date(&mut self, name: &str) -> Result<NaiveDate, ServiceError> {
        self.date(name)?
            .ok_or_else(|| ServiceError::invalid(format!("{name} is required")))
    }

    fn file(&mut self, name: &str) -> Option<ImageUpload> {
        self.files.remove(name)
    }

    fn required_file(&mut self, name: &str) -> Result<ImageUpload, ServiceError> {
        self.file(name)
            .ok_or_else(|| ServiceError::invalid(format!("{name} file is required")))
    }
}

pub(crate) async fn create_company_handler<S, O>(
    State(services): State<MarketplaceServices<S, O>>,
    Authenticated(actor): Authenticated,
    multipart: Multipart,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
{
    let mut form = Form::read(multipart).await?;
    let data = CompanyData {
        name: form.required_text("name")?,
        bin: form.required_text("bin")?,
        description: form.required_text("description")?,
        address: form.required_text("address")?,
    };
    let logo = form.required_file("logo")?;

    let company_id = services.companies.create(&actor, data, logo).await?;
    let payload = json!({
        "detail": "Company created successfully",
        "company_id": company_id,
    });
    Ok((StatusCode::CREATED, Json(payload)).into_response())
}

pub(crate) async fn search_companies_handler<S, O>(
    State(services): State<MarketplaceServices<S, O>>,
    Authenticated(actor): Authenticated,
    params: Result<Query<SearchQuery>, QueryRejection>,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
{
    let params = query(params)?;
    let search = CompanySearch {
        text: params.text,
        status: params.status,
        page: PageRequest::new(
            params.page.unwrap_or(1),
            params.per_page.unwrap_or(DEFAULT_PER_PAGE),
        ),
    };
    Ok(Json(services.companies.search(&actor, search)?).into_response())
}

pub(crate) async fn own_company_handler<S, O>(
    State(services): State<MarketplaceServices<S, O>>,
    Authenticated(actor): Authenticated,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
{
    Ok(Json(services.companies.get_own(actor.user_id)?).into_response())
}

pub(crate) async fn update_company_handler<S, O>(
    State(services): State<MarketplaceServices<S, O>>,
    Authenticated(actor): Authenticated,
    multipart: Multipart,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
{
    let mut form = Form::read(multipart).await?;
    let changes = CompanyChanges {
        name: form.text("name"),
        description: form.text("description"),
        address: form.text("address"),
    };
    let logo = form.file("logo");

    let company = services.companies.update(&actor, changes, logo).await?;
    Ok(Json(company).into_response())
}

pub(crate) async fn delete_company_handler<S, O>(
    State(services): State<MarketplaceServices<S, O>>,
    Authenticated(actor): Authenticated,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
{
    services.companies.delete(&actor).await?;
    Ok(Json(json!({ "detail": "Company deleted successfully" })).into_response())
}

pub(crate) async fn company_handler<S, O>(
    State(services): State<MarketplaceServices<S, O>>,
    Authenticated(actor): Authenticated,
    Path(company_id): Path<u64>,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
{
    let company = services
        .companies
        .get_by_id(&actor, CompanyId(company_id))?;
    Ok(Json(company).into_response())
}

pub(crate) async fn company_applications_handler<S, O>(
    State(services): State<MarketplaceServices<S, O>>,
    Authenticated(actor): Authenticated,
    params: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
{
    let params = query(params)?;
    let company_id = services.affiliations.own_company_id(&actor)?;
    let page = services.affiliations.list_for_company(
        &actor,
        company_id,
        params.status,
        params.page(),
    )?;
    Ok(Json(page).into_response())
}

pub(crate) async fn company_decide_handler<S, O>(
    State(services): State<MarketplaceServices<S, O>>,
    Authenticated(actor): Authenticated,
    Path(driver_id): Path<u64>,
    payload: Result<Json<StatusChange>, JsonRejection>,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
{
    let change = json_body(payload)?;
    let company_id = services.affiliations.own_company_id(&actor)?;
    let affiliation = services.affiliations.update_status(
        &actor,
        DriverId(driver_id),
        company_id,
        change,
    )?;
    Ok(Json(affiliation).into_response())
}

pub(crate) async fn create_driver_handler<S, O>(
    State(services): State<MarketplaceServices<S, O>>,
    Authenticated(actor): Authenticated,
    multipart: Multipart,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
{
    let mut form = Form::read(multipart).await?;
    let data = DriverData {
        phone_number: form.required_text("phone_number")?,
        license_number: form.required_text("license_number")?,
        license_issued_at: form.required_date("license_issued_at")?,
        license_expires_at: form.required_date("license_expires_at")?,
    };
    let id_photo = form.required_file("id_photo")?;
    let license_photo = form.required_file("license_photo")?;

    let driver_id = services
        .drivers
        .create(&actor, data, id_photo, license_photo)
        .await?;
    let payload = json!({
        "detail": "Driver profile created successfully",
        "driver_id": driver_id,
    });
    Ok((StatusCode::CREATED, Json(payload)).into_response())
}

pub(crate) async fn own_driver_handler<S, O>(
    State(services): State<MarketplaceServices<S, O>>,
    Authenticated(actor): Authenticated,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
{
    Ok(Json(services.drivers.get_own(actor.user_id)?).into_response())
}

pub(crate) async fn update_driver_handler<S, O>(
    State(services): State<MarketplaceServices<S, O>>,
    Authenticated(actor): Authenticated,
    multipart: Multipart,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
{
    let mut form = Form::read(multipart).await?;
    let changes = DriverChanges {
        phone_number: form.text("phone_number"),
        license_number: form.text("license_number"),
        license_issued_at: form.date("license_issued_at")?,
        license_expires_at: form.date("license_expires_at")?,
    };
    let id_photo = form.file("id_photo");
    let license_photo = form.file("license_photo");

    let driver = services
        .drivers
        .update(&actor, changes, id_photo, license_photo)
        .await?;
    Ok(Json(driver).into_response())
}

pub(crate) async fn delete_driver_handler<S, O>(
    State(services): State<MarketplaceServices<S, O>>,
    Authenticated(actor): Authenticated,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
{
    services.drivers.delete(&actor).await?;
    Ok(Json(json!({ "detail": "Driver profile deleted successfully" })).into_response())
}

pub(crate) async fn driver_handler<S, O>(
    State(services): State<MarketplaceServices<S, O>>,
    Authenticated(actor): Authenticated,
    Path(driver_id): Path<u64>,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
{
    let view = services.drivers.get_by_id(&actor, DriverId(driver_id))?;
    Ok(Json(view).into_response())
}

pub(crate) async fn apply_handler<S, O>(
    State(services): State<MarketplaceServices<S, O>>,
    Authenticated(actor): Authenticated,
    Path(company_id): Path<u64>,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
{
    let affiliation = services.affiliations.apply(&actor, CompanyId(company_id))?;
    Ok((StatusCode::CREATED, Json(affiliation)).into_response())
}

pub(crate) async fn driver_applications_handler<S, O>(
    State(services): State<MarketplaceServices<S, O>>,
    Authenticated(actor): Authenticated,
    params: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
{
    let params = query(params)?;
    let driver_id = services.affiliations.own_driver_id(&actor)?;
    let page = services.affiliations.list_for_driver(
        &actor,
        driver_id,
        params.status,
        params.page(),
    )?;
    Ok(Json(page).into_response())
}

pub(crate) async fn application_handler<S, O>(
    State(services): State<MarketplaceServices<S, O>>,
    Authenticated(actor): Authenticated,
    Path((driver_id, company_id)): Path<(u64, u64)>,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
{
    let affiliation =
        services
            .affiliations
            .get_one(&actor, DriverId(driver_id), CompanyId(company_id))?;
    Ok(Json(affiliation).into_response())
}

pub(crate) async fn admin_company_status_handler<S, O>(
    State(services): State<MarketplaceServices<S, O>>,
    Authenticated(actor): Authenticated,
    Path(company_id): Path<u64>,
    payload: Result<Json<StatusChange>, JsonRejection>,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
{
    let change = json_body(payload)?;
    let company = services
        .companies
        .update_status(&actor, CompanyId(company_id), change)?;
    Ok(Json(company).into_response())
}

pub(crate) async fn admin_company_applications_handler<S, O>(
    State(services): State<MarketplaceServices<S, O>>,
    Authenticated(actor): Authenticated,
    Path(company_id): Path<u64>,
    params: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
{
    let params = query(params)?;
    super::access::require_admin(&actor)?;
    let page = services.affiliations.list_for_company(
        &actor,
        CompanyId(company_id),
        params.status,
        params.page(),
    )?;
    Ok(Json(page).into_response())
}

pub(crate) async fn admin_drivers_handler<S, O>(
    State(services): State<MarketplaceServices<S, O>>,
    Authenticated(actor): Authenticated,
    params: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
{
    let params = query(params)?;
    let page = services
        .drivers
        .list(&actor, params.status, params.page())?;
    Ok(Json(page).into_response())
}

pub(crate) async fn admin_driver_status_handler<S, O>(
    State(services): State<MarketplaceServices<S, O>>,
    Authenticated(actor): Authenticated,
    Path(driver_id): Path<u64>,
    payload: Result<Json<StatusChange>, JsonRejection>,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
{
    let change = json_body(payload)?;
    let driver = services
        .drivers
        .update_status(&actor, DriverId(driver_id), change)?;
    Ok(Json(driver).into_response())
}

pub(crate) async fn admin_driver_applications_handler<S, O>(
    State(services): State<MarketplaceServices<S, O>>,
    Authenticated(actor): Authenticated,
    Path(driver_id): Path<u64>,
    params: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
{
    let params = query(params)?;
    super::access::require_admin(&actor)?;
    let page = services.affiliations.list_for_driver(
        &actor,
        DriverId(driver_id),
        params.status,
        params.page(),
    )?;
    Ok(Json(page).into_response())
}

pub(crate) async fn admin_application_status_handler<S, O>(
    State(services): State<MarketplaceServices<S, O>>,
    Authenticated(actor): Authenticated,
    Path((driver_id, company_id)): Path<(u64, u64)>,
    payload: Result<Json<StatusChange>, JsonRejection>,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
{
    let change = json_body(payload)?;
    super::access::require_admin(&actor)?;
    let affiliation = services.affiliations.update_status(
        &actor,
        DriverId(driver_id),
        CompanyId(company_id),
        change,
    )?;
    Ok(Json(affiliation).into_response())
}
