//! Read-only contracts for data owned outside the forum core.

use anyhow::Result;

use kelas_db::Database;
use kelas_types::models::{Tenant, UserId, UserProfile};

/// Enrolment lookups, owned by class management.
pub trait ClassRoster: Send + Sync {
    /// Student ids currently enrolled in the class. Unknown classes are empty.
    fn students(&self, class_id: &str) -> Result<Vec<UserId>>;
}

/// Profile and tenant lookups, owned by the auth and admin subsystems.
pub trait ProfileStore: Send + Sync {
    fn profile(&self, uid: &str) -> Result<Option<UserProfile>>;
    fn tenant(&self, tenant_id: &str) -> Result<Option<Tenant>>;
}

impl ClassRoster for Database {
    fn students(&self, class_id: &str) -> Result<Vec<UserId>> {
        self.get_class_roster(class_id)
    }
}

impl ProfileStore for Database {
    fn profile(&self, uid: &str) -> Result<Option<UserProfile>> {
        self.get_profile(uid)
    }

    fn tenant(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        self.get_tenant(tenant_id)
    }
}
