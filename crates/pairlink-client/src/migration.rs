//! One-time upgrades of persisted state between SDK versions.

use async_trait::async_trait;
use semver::Version;
use tracing::{debug, info, warn};

use pairlink_protocol::codec::SDK_VERSION;

use crate::error::MigrationError;
use crate::storage::{PersistedState, StorageError};

/// Part of the persisted state a migration applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationTarget {
    RelayServer { nodes: Vec<String> },
}

impl MigrationTarget {
    pub fn identifier(&self) -> &'static str {
        match self {
            Self::RelayServer { .. } => "relay_server",
        }
    }
}

#[async_trait]
pub trait Migration: Send + Sync {
    /// SDK version that introduced the change this migration repairs.
    fn from_version(&self) -> &Version;

    fn targets(&self, target: &MigrationTarget) -> bool;

    async fn perform(&self, state: &PersistedState, target: &MigrationTarget) -> anyhow::Result<()>;

    fn identifier(&self, target: &MigrationTarget) -> String {
        format!("from_{}@{}", self.from_version(), target.identifier())
    }
}

/// Pins clients paired before relay selection existed to the node they
/// always used: the first default node. Devices with no earlier session
/// have nothing to keep and go through normal selection.
pub struct RelayServerMigration {
    from: Version,
    default_nodes: Vec<String>,
}

impl RelayServerMigration {
    pub fn new(default_nodes: Vec<String>) -> Self {
        Self {
            from: Version::new(1, 0, 4),
            default_nodes,
        }
    }
}

#[async_trait]
impl Migration for RelayServerMigration {
    fn from_version(&self) -> &Version {
        &self.from
    }

    fn targets(&self, target: &MigrationTarget) -> bool {
        matches!(target, MigrationTarget::RelayServer { .. })
    }

    async fn perform(&self, state: &PersistedState, target: &MigrationTarget) -> anyhow::Result<()> {
        let MigrationTarget::RelayServer { nodes } = target;
        if state.relay_server().await?.is_some() {
            debug!("relay server already stored");
            return Ok(());
        }
        if *nodes != self.default_nodes {
            debug!("custom relay nodes configured, nothing to pin");
            return Ok(());
        }
        if !state.has_session_state().await? {
            debug!("no earlier session on this device, nothing to pin");
            return Ok(());
        }
        let Some(first) = self.default_nodes.first() else {
            return Ok(());
        };
        state.set_relay_server(Some(first)).await?;
        info!(relay = %first, "pinned legacy relay server");
        Ok(())
    }
}

pub struct MigrationRunner {
    persisted: PersistedState,
    migrations: Vec<Box<dyn Migration>>,
}

impl MigrationRunner {
    pub fn new(persisted: PersistedState) -> Self {
        Self {
            persisted,
            migrations: Vec::new(),
        }
    }

    /// Runner with the built-in migrations registered.
    pub fn with_defaults(persisted: PersistedState, default_nodes: Vec<String>) -> Self {
        let mut runner = Self::new(persisted);
        runner.register(RelayServerMigration::new(default_nodes));
        runner
    }

    pub fn register(&mut self, migration: impl Migration + 'static) {
        self.migrations.push(Box::new(migration));
    }

    /// Apply every pending migration for `target`, in registration order.
    ///
    /// Returns the identifiers that were actually performed. Completed
    /// migrations stay recorded when a later one fails.
    pub async fn migrate(&self, target: &MigrationTarget) -> Result<Vec<String>, MigrationError> {
        let completed = self.persisted.migrations().await?;
        let last_known = match self.persisted.sdk_version().await? {
            Some(raw) => match Version::parse(&raw) {
                Ok(version) => Some(version),
                Err(e) => {
                    warn!(version = %raw, "ignoring unparsable stored SDK version: {}", e);
                    None
                }
            },
            None => None,
        };

        let mut performed = Vec::new();
        for migration in self.migrations.iter().filter(|m| m.targets(target)) {
            let identifier = migration.identifier(target);
            if completed.contains(&identifier) {
                continue;
            }

            if last_known.as_ref().is_some_and(|v| v > migration.from_version()) {
                debug!(migration = %identifier, "state already newer, skipping");
                self.persisted.add_migration(&identifier).await?;
                continue;
            }

            migration
                .perform(&self.persisted, target)
                .await
                .map_err(|source| MigrationError::Failed {
                    identifier: identifier.clone(),
                    source,
                })?;
            self.persisted.add_migration(&identifier).await?;
            info!(migration = %identifier, "migration applied");
            performed.push(identifier);
        }

        Ok(performed)
    }

    /// Remember the running SDK version for future migrations.
    pub async fn record_sdk_version(&self) -> Result<(), StorageError> {
        self.persisted.set_sdk_version(SDK_VERSION).await
    }
}
