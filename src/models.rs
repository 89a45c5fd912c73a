use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dispatch::{PageMeta, PageToken},
    selection::Selectable,
};

// --- Entities (as served by the university backend) ---

/// Student
///
/// A student record as listed in the console. `class_id` and
/// `department_id` are the backend's short codes (e.g. `10A1`, `cntt`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct Student {
    pub id: Uuid,
    pub student_code: String,
    pub full_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub class_id: Option<String>,
    #[serde(default)]
    pub department_id: Option<String>,
    #[serde(default)]
    pub wallet_address: Option<String>,
}

impl Selectable for Student {
    type Key = Uuid;

    fn selection_key(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct Class {
    pub id: String,
    pub name: String,
    pub department_id: String,
    #[serde(default)]
    pub student_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct Department {
    pub id: String,
    pub name: String,
}

/// IssueStatus
///
/// Lifecycle of a degree or certificate on the issuing side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum IssueStatus {
    #[default]
    Pending,
    Issued,
    Revoked,
}

/// Degree
///
/// Only pending degrees can be picked for bulk issuance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct Degree {
    pub id: Uuid,
    pub student_id: Uuid,
    pub student_name: String,
    pub degree_type: String,
    pub major: String,
    pub graduation_year: i32,
    #[serde(default)]
    pub status: IssueStatus,
    #[serde(default)]
    #[ts(type = "string | null")]
    pub issued_at: Option<DateTime<Utc>>,
}

impl Selectable for Degree {
    type Key = Uuid;

    fn selection_key(&self) -> Uuid {
        self.id
    }

    fn is_selectable(&self) -> bool {
        self.status == IssueStatus::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct Certificate {
    pub id: Uuid,
    pub student_id: Uuid,
    pub student_name: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: IssueStatus,
    #[serde(default)]
    #[ts(type = "string | null")]
    pub issued_at: Option<DateTime<Utc>>,
}

impl Selectable for Certificate {
    type Key = Uuid;

    fn selection_key(&self) -> Uuid {
        self.id
    }

    fn is_selectable(&self) -> bool {
        self.status == IssueStatus::Pending
    }
}

/// Wallet
///
/// On-chain wallet bound to a student. Listed by administrators only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct Wallet {
    pub id: Uuid,
    pub student_id: Uuid,
    pub address: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub is_read: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

// --- Request Payloads ---

/// CreateCertificateRequest
///
/// Input payload for issuing a certificate (POST /{locale}/certificates).
/// Forwarded to the backend unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateCertificateRequest {
    pub student_id: Uuid,
    #[schema(example = "IELTS 7.5")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// --- Response Schemas ---

/// NotificationFeed
///
/// One page of the infinite notification list. `next_cursor` is absent on
/// the last page.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct NotificationFeed {
    pub items: Vec<Notification>,
    pub meta: PageMeta,
    pub next_cursor: Option<PageToken>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum LoginAudience {
    Staff,
    Student,
}

/// LoginEntry
///
/// Describes a login entry point; the guard redirects anonymous callers
/// here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginEntry {
    pub locale: String,
    pub audience: LoginAudience,
    pub path: String,
}
