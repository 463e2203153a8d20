//! Durable status store
//!
//! Maps target name to its lifecycle record, scoped to one environment.
//! One read-write lock guards both the map and the document write, so a
//! reader never observes a record the file does not (eventually) reflect.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::errors::ControllerError;
use crate::filesys::file::File;
use crate::inventory::models::Target;
use crate::status::models::{ActionKind, ReadyChecks, ServerState, StatusRecord};
use crate::storage::layout::StateLayout;
use crate::utils::expand_tilde;

/// Durable per-target status, keyed by target name
pub struct StatusStore {
    file: File,
    records: RwLock<HashMap<String, StatusRecord>>,
}

impl StatusStore {
    /// Open the store for one environment, loading any persisted document.
    pub async fn open(layout: &StateLayout, environment: &str) -> Result<Self, ControllerError> {
        let store = Self {
            file: layout.status_file(environment),
            records: RwLock::new(HashMap::new()),
        };
        store.load().await?;
        Ok(store)
    }

    async fn load(&self) -> Result<(), ControllerError> {
        if !self.file.exists().await {
            return Ok(());
        }

        let mut loaded: HashMap<String, StatusRecord> = self.file.read_json().await?;

        // In-flight and failed states left behind by a previous run demote to
        // unknown; reconciliation re-discovers the truth.
        let mut demoted = false;
        for record in loaded.values_mut() {
            if record.state.is_transient() {
                debug!("resetting state for {} from {} to unknown", record.name, record.state);
                record.state = ServerState::Unknown;
                record.error_message.clear();
                demoted = true;
            }
        }

        let mut records = self.records.write().await;
        *records = loaded;
        if demoted {
            self.file.write_json(&*records).await?;
        }
        Ok(())
    }

    /// Get a target's record, synthesising an unknown one when absent.
    pub async fn get(&self, name: &str) -> StatusRecord {
        let records = self.records.read().await;
        records
            .get(name)
            .cloned()
            .unwrap_or_else(|| StatusRecord::unknown(name))
    }

    /// Snapshot of every record.
    pub async fn all(&self) -> HashMap<String, StatusRecord> {
        self.records.read().await.clone()
    }

    /// Replace a target's record and persist the document.
    pub async fn update(
        &self,
        name: &str,
        state: ServerState,
        action: ActionKind,
        message: &str,
    ) -> Result<(), ControllerError> {
        debug!("updating status for {name}: state={state} action={action} message={message:?}");

        let mut records = self.records.write().await;
        records.insert(
            name.to_string(),
            StatusRecord {
                name: name.to_string(),
                state,
                last_action: Some(action),
                last_update: Utc::now(),
                error_message: message.to_string(),
                ready_checks: ReadyChecks::default(),
            },
        );
        self.file.write_json(&*records).await
    }

    /// Merge readiness checks into a target's record.
    ///
    /// Readiness is a pre-provision gate: once a target is provisioned or
    /// deployed, a re-check never rewrites its state.
    pub async fn update_readiness(
        &self,
        name: &str,
        checks: ReadyChecks,
    ) -> Result<(), ControllerError> {
        let mut records = self.records.write().await;
        let record = records
            .entry(name.to_string())
            .or_insert_with(|| StatusRecord::unknown(name));

        record.ready_checks = checks;
        record.last_update = Utc::now();

        if record.state != ServerState::Provisioned && record.state != ServerState::Deployed {
            record.state = if checks.is_ready() {
                ServerState::Ready
            } else {
                ServerState::NotReady
            };
        }

        self.file.write_json(&*records).await
    }

    /// Compute readiness checks for a target's declared configuration.
    pub fn validate_target(target: &Target) -> ReadyChecks {
        ReadyChecks {
            address_valid: target.address.parse::<std::net::Ipv4Addr>().is_ok(),
            key_file_present: !target.key_path.is_empty()
                && expand_tilde(&target.key_path).exists(),
            port_valid: target.port >= 1,
            fields_complete: !target.name.is_empty()
                && !target.address.is_empty()
                && !target.user.is_empty()
                && !target.key_path.is_empty(),
        }
    }

    /// Run readiness checks across a whole target set, persisting each result.
    pub async fn validate_inventory(&self, targets: &[Target]) {
        for target in targets {
            let checks = Self::validate_target(target);
            if let Err(err) = self.update_readiness(&target.name, checks).await {
                warn!("could not persist readiness for {}: {err}", target.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::models::TargetKind;

    fn target_with(address: &str, port: u16, key_path: &str) -> Target {
        Target {
            name: "alpha".to_string(),
            address: address.to_string(),
            port,
            user: "root".to_string(),
            key_path: key_path.to_string(),
            kind: TargetKind::Web,
            app_port: 3000,
            http_port: 0,
            escalate: false,
        }
    }

    #[test]
    fn test_address_boundaries() {
        for good in ["0.0.0.0", "255.255.255.255", "127.0.0.1"] {
            let checks = StatusStore::validate_target(&target_with(good, 22, "/dev/null"));
            assert!(checks.address_valid, "{good} should parse");
        }
        for bad in ["256.1.1.1", "1.2.3", "1.2.3.4.5", ""] {
            let checks = StatusStore::validate_target(&target_with(bad, 22, "/dev/null"));
            assert!(!checks.address_valid, "{bad} should not parse");
        }
    }

    #[test]
    fn test_port_boundaries() {
        assert!(!StatusStore::validate_target(&target_with("10.0.0.5", 0, "/dev/null")).port_valid);
        assert!(StatusStore::validate_target(&target_with("10.0.0.5", 1, "/dev/null")).port_valid);
        assert!(
            StatusStore::validate_target(&target_with("10.0.0.5", 65535, "/dev/null")).port_valid
        );
    }

    #[test]
    fn test_missing_key_file() {
        let checks =
            StatusStore::validate_target(&target_with("10.0.0.5", 22, "/no/such/key/anywhere"));
        assert!(!checks.key_file_present);
        assert!(checks.fields_complete);
    }
}
