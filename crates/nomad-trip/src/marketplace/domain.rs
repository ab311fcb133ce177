use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(
    /// Identity store key for an account.
    UserId
);
numeric_id!(CompanyId);
numeric_id!(DriverId);

/// Account role. Everything except `Admin` is derived from profile ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Passenger,
    Driver,
    Company,
    Admin,
}

impl Role {
    pub const fn label(self) -> &'static str {
        match self {
            Role::Passenger => "passenger",
            Role::Driver => "driver",
            Role::Company => "company",
            Role::Admin => "admin",
        }
    }
}

/// Review state shared by companies, drivers, and affiliations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStatus {
    Waiting,
    Approved,
    Rejected,
}

impl ModerationStatus {
    pub const ALL: [ModerationStatus; 3] = [
        ModerationStatus::Waiting,
        ModerationStatus::Approved,
        ModerationStatus::Rejected,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            ModerationStatus::Waiting => "waiting",
            ModerationStatus::Approved => "approved",
            ModerationStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ModerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Status together with its rejection reason. Only `Rejected` carries one, so a
/// reason can never linger on an approved or waiting entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Moderation {
    #[default]
    Waiting,
    Approved,
    Rejected { rejection_reason: String },
}

impl Moderation {
    pub fn status(&self) -> ModerationStatus {
        match self {
            Moderation::Waiting => ModerationStatus::Waiting,
            Moderation::Approved => ModerationStatus::Approved,
            Moderation::Rejected { .. } => ModerationStatus::Rejected,
        }
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        match self {
            Moderation::Rejected { rejection_reason } => Some(rejection_reason.as_str()),
            _ => None,
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Moderation::Approved)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub first_name: String,
    pub last_name: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub owner_id: UserId,
    pub name: String,
    pub bin: String,
    pub description: String,
    pub address: String,
    pub logo_url: String,
    #[serde(flatten)]
    pub moderation: Moderation,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCompany {
    pub owner_id: UserId,
    pub name: String,
    pub bin: String,
    pub description: String,
    pub address: String,
    pub logo_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Driver {
    pub id: DriverId,
    pub user_id: UserId,
    pub phone_number: String,
    pub license_number: String,
    pub license_photo_url: String,
    pub id_photo_url: String,
    pub license_issued_at: NaiveDate,
    pub license_expires_at: NaiveDate,
    #[serde(flatten)]
    pub moderation: Moderation,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDriver {
    pub user_id: UserId,
    pub phone_number: String,
    pub license_number: String,
    pub license_photo_url: String,
    pub id_photo_url: String,
    pub license_issued_at: NaiveDate,
    pub license_expires_at: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// A driver's application to (and, once approved, membership of) a company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affiliation {
    pub driver_id: DriverId,
    pub company_id: CompanyId,
    #[serde(flatten)]
    pub moderation: Moderation,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Affiliation {
    pub fn key(&self) -> (DriverId, CompanyId) {
        (self.driver_id, self.company_id)
    }
}

pub const DEFAULT_PER_PAGE: u32 = 10;
pub const MAX_PER_PAGE: u32 = 100;

/// Requested window of a paginated listing. `page` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self { page, per_page }
    }

    pub fn is_valid(&self) -> bool {
        self.page >= 1 && (1..=MAX_PER_PAGE).contains(&self.per_page)
    }

    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize).saturating_mul(self.per_page as usize)
    }

    /// Cut one page out of an already filtered and ordered result set.
    pub fn slice<T>(&self, matches: Vec<T>) -> Page<T> {
        let total = matches.len() as u64;
        let items = matches
            .into_iter()
            .skip(self.offset())
            .take(self.per_page as usize)
            .collect();
        Page {
            page: self.page,
            per_page: self.per_page,
            total,
            items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            page: self.page,
            per_page: self.per_page,
            total: self.total,
            items: self.items.into_iter().map(f).collect(),
        }
    }
}
