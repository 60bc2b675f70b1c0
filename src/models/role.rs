use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::UserRole;

/// Staff title layered over a coarse [`UserRole`], e.g. "Senior Nurse" on
/// top of `receptionist`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffTitle {
    pub id: Uuid,
    pub name: String,
    pub base_role: UserRole,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
