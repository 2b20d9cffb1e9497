use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use kelas_types::views::TenantInfo;

use crate::collaborators::ProfileStore;

/// Maps a user to the school that owns them.
#[derive(Clone)]
pub struct TenantResolver {
    profiles: Arc<dyn ProfileStore>,
}

impl TenantResolver {
    pub fn new(profiles: Arc<dyn ProfileStore>) -> Self {
        Self { profiles }
    }

    /// `None` for unknown users and for users not attached to a school.
    /// A tenant id without a tenant record still resolves, with no tier.
    pub async fn resolve(&self, uid: &str) -> Result<Option<TenantInfo>> {
        let profiles = self.profiles.clone();
        let uid = uid.to_string();
        tokio::task::spawn_blocking(move || resolve_blocking(profiles.as_ref(), &uid)).await?
    }
}

fn resolve_blocking(profiles: &dyn ProfileStore, uid: &str) -> Result<Option<TenantInfo>> {
    let Some(tenant_id) = profiles.profile(uid)?.and_then(|p| p.tenant_id) else {
        debug!("{} has no tenant", uid);
        return Ok(None);
    };

    let tier = profiles.tenant(&tenant_id)?.and_then(|t| t.tier);
    Ok(Some(TenantInfo { id: tenant_id, tier }))
}

#[cfg(test)]
mod tests {
    use kelas_db::Database;
    use kelas_types::models::{Role, Tenant, UserProfile};

    use super::*;

    fn profile(uid: &str, tenant: Option<&str>) -> UserProfile {
        UserProfile {
            uid: uid.into(),
            display_name: uid.into(),
            role: Role::Student,
            tenant_id: tenant.map(Into::into),
            photo_url: None,
        }
    }

    #[tokio::test]
    async fn resolves_tenant_and_tier() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.upsert_tenant(&Tenant {
            id: "sma-1".into(),
            name: "SMA Negeri 1".into(),
            tier: Some("SMA".into()),
        })
        .unwrap();
        db.upsert_profile(&profile("s1", Some("sma-1"))).unwrap();
        db.upsert_profile(&profile("s2", Some("ghost"))).unwrap();
        db.upsert_profile(&profile("g1", None)).unwrap();

        let resolver = TenantResolver::new(db);
        assert_eq!(
            resolver.resolve("s1").await.unwrap(),
            Some(TenantInfo { id: "sma-1".into(), tier: Some("SMA".into()) })
        );
        assert_eq!(
            resolver.resolve("s2").await.unwrap(),
            Some(TenantInfo { id: "ghost".into(), tier: None })
        );
        assert_eq!(resolver.resolve("g1").await.unwrap(), None);
        assert_eq!(resolver.resolve("unknown").await.unwrap(), None);
    }
}
