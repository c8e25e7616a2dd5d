use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Bot credentials recorded for one workspace or org-wide install.
pub struct Installation {
    pub enterprise_id: Option<String>,
    pub team_id: Option<String>,
    pub bot_token: String,
    pub bot_refresh_token: Option<String>,
    pub bot_id: Option<String>,
    pub bot_user_id: String,
    pub user_id: Option<String>,
    /// Unix seconds at which `bot_token` stops working, when rotation is
    /// enabled for the app.
    pub token_expires_at: Option<u64>,
}

/// Workspace installs key by team, org-wide installs fall back to the
/// enterprise id.
pub fn storage_key(team_id: Option<&str>, enterprise_id: Option<&str>) -> Option<String> {
    if let Some(team_id) = team_id.map(str::trim).filter(|value| !value.is_empty()) {
        return Some(format!("team_{team_id}"));
    }
    enterprise_id
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| format!("ent_{value}"))
}

#[derive(Default)]
/// In-memory store of installations, keyed by [`storage_key`].
pub struct InstallationStore {
    installations: Mutex<HashMap<String, Installation>>,
}

impl InstallationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&self, installation: Installation) -> Result<()> {
        let key = storage_key(
            installation.team_id.as_deref(),
            installation.enterprise_id.as_deref(),
        )
        .ok_or_else(|| anyhow!("installation is missing both team_id and enterprise_id"))?;
        let mut installations = self.lock()?;
        installations.insert(key, installation);
        Ok(())
    }

    pub fn find(
        &self,
        team_id: Option<&str>,
        enterprise_id: Option<&str>,
    ) -> Result<Option<Installation>> {
        let Some(key) = storage_key(team_id, enterprise_id) else {
            return Ok(None);
        };
        let installations = self.lock()?;
        Ok(installations.get(&key).cloned())
    }

    pub fn delete(&self, team_id: Option<&str>, enterprise_id: Option<&str>) -> Result<()> {
        let Some(key) = storage_key(team_id, enterprise_id) else {
            return Ok(());
        };
        let mut installations = self.lock()?;
        installations.remove(&key);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Installation>>> {
        self.installations
            .lock()
            .map_err(|_| anyhow!("installation store mutex is poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::{storage_key, Installation, InstallationStore};

    fn test_installation(team_id: Option<&str>, enterprise_id: Option<&str>) -> Installation {
        Installation {
            enterprise_id: enterprise_id.map(str::to_string),
            team_id: team_id.map(str::to_string),
            bot_token: "xoxb-test".to_string(),
            bot_refresh_token: Some("xoxe-refresh".to_string()),
            bot_id: Some("B123".to_string()),
            bot_user_id: "UBOT".to_string(),
            user_id: Some("U9".to_string()),
            token_expires_at: Some(1_700_000_000),
        }
    }

    #[test]
    fn unit_storage_key_prefers_team_scope() {
        assert_eq!(storage_key(Some("T1"), None).as_deref(), Some("team_T1"));
        assert_eq!(
            storage_key(Some("T1"), Some("E1")).as_deref(),
            Some("team_T1")
        );
        assert_eq!(storage_key(None, Some("E1")).as_deref(), Some("ent_E1"));
        assert_eq!(storage_key(None, None), None);
        assert_eq!(storage_key(Some("  "), Some("E1")).as_deref(), Some("ent_E1"));
    }

    #[test]
    fn functional_save_find_delete_round_trip() {
        let store = InstallationStore::new();
        let installation = test_installation(Some("T1"), None);

        store.save(installation.clone()).expect("save");
        let found = store.find(Some("T1"), None).expect("find");
        assert_eq!(found, Some(installation));

        store.delete(Some("T1"), None).expect("delete");
        assert_eq!(store.find(Some("T1"), None).expect("find"), None);
    }

    #[test]
    fn functional_enterprise_install_round_trip() {
        let store = InstallationStore::new();
        let installation = test_installation(None, Some("E1"));

        store.save(installation.clone()).expect("save");
        assert_eq!(store.find(None, Some("E1")).expect("find"), Some(installation));
    }

    #[test]
    fn unit_find_without_scope_returns_none() {
        let store = InstallationStore::new();
        assert_eq!(store.find(None, None).expect("find"), None);
    }

    #[test]
    fn unit_save_requires_a_scope() {
        let store = InstallationStore::new();
        let error = store
            .save(test_installation(None, None))
            .expect_err("must reject unscoped install");
        assert!(error.to_string().contains("missing both"));
    }

    #[test]
    fn regression_save_overwrites_existing_installation() {
        let store = InstallationStore::new();
        store
            .save(test_installation(Some("T1"), None))
            .expect("save");

        let mut updated = test_installation(Some("T1"), None);
        updated.bot_token = "xoxb-rotated".to_string();
        store.save(updated.clone()).expect("save updated");

        assert_eq!(store.find(Some("T1"), None).expect("find"), Some(updated));
    }
}
