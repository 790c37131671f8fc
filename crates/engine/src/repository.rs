//! Deployments of definition resources and the versioned definitions they
//! produce.

use std::collections::{BTreeMap, BTreeSet};

use procflow_model::{from_resource, parse_resource, validate_deployment, Definition, DefinitionKind};
use procflow_storage::{DefinitionRecord, DeploymentRecord, EngineStorage, Record, StorageError};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::authorization::{Permission, Required, Resource, ANY};
use crate::engine::{CommandContext, ProcessEngine};
use crate::error::EngineError;
use crate::identity::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub id: String,
    pub name: String,
    /// Hex SHA-256 over the deployment's resources.
    pub checksum: String,
    pub definition_ids: Vec<String>,
}

impl From<DeploymentRecord> for Deployment {
    fn from(r: DeploymentRecord) -> Self {
        Self {
            id: r.id,
            name: r.name,
            checksum: r.checksum,
            definition_ids: r.definition_ids,
        }
    }
}

/// A definition as stored by the engine, with its parsed model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedDefinition {
    /// `key:version:deployment_id`
    pub id: String,
    pub key: String,
    pub version: u32,
    pub kind: DefinitionKind,
    pub deployment_id: String,
    pub model: Definition,
}

impl DeployedDefinition {
    pub(crate) fn from_record(r: DefinitionRecord) -> Result<Self, EngineError> {
        let model = from_resource(&r.model)?;
        Ok(Self {
            id: r.id,
            key: r.key,
            version: r.version,
            kind: model.kind(),
            deployment_id: r.deployment_id,
            model,
        })
    }
}

/// Hash resource names and contents in name order.
fn checksum(resources: &BTreeMap<String, Vec<u8>>) -> String {
    let mut hasher = Sha256::new();
    for (name, bytes) in resources {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(bytes);
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Latest version of the definition `key` of the given kind.
pub(crate) fn latest_definition<S: EngineStorage>(
    ctx: &CommandContext<'_, S>,
    key: &str,
    kind: DefinitionKind,
) -> Result<DeployedDefinition, EngineError> {
    let latest = ctx
        .scan_where::<DefinitionRecord>(|d| d.key == key && d.kind == kind.as_str())?
        .into_iter()
        .max_by_key(|d| d.version);
    match latest {
        Some(record) => DeployedDefinition::from_record(record),
        None => Err(EngineError::not_found(
            match kind {
                DefinitionKind::Process => "process definition",
                DefinitionKind::Case => "case definition",
            },
            key,
        )),
    }
}

/// Collects resources for one deployment.
pub struct DeploymentBuilder<'e, S: EngineStorage> {
    engine: &'e ProcessEngine<S>,
    name: Option<String>,
    resources: BTreeMap<String, Vec<u8>>,
    duplicate_filtering: Option<bool>,
}

impl<'e, S: EngineStorage> DeploymentBuilder<'e, S> {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn add_resource(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.resources.insert(name.into(), bytes.into());
        self
    }

    pub fn add_json_resource(self, name: impl Into<String>, resource: &serde_json::Value) -> Self {
        self.add_resource(name, resource.to_string())
    }

    /// Override the engine's `deployment_duplicate_filtering` setting.
    pub fn enable_duplicate_filtering(mut self, enabled: bool) -> Self {
        self.duplicate_filtering = Some(enabled);
        self
    }

    /// Parse, validate and store the deployment.
    ///
    /// With duplicate filtering on, a named deployment whose resources equal
    /// those of the latest deployment of the same name is not stored again;
    /// that earlier deployment is returned instead.
    pub fn deploy(self, session: &Session) -> Result<Deployment, EngineError> {
        if self.resources.is_empty() {
            return Err(EngineError::invalid("deployment contains no resources"));
        }
        let definitions = self
            .resources
            .iter()
            .map(|(name, bytes)| parse_resource(name, bytes))
            .collect::<Result<Vec<_>, _>>()?;
        let checksum = checksum(&self.resources);
        let name = self.name.unwrap_or_default();
        let duplicate_filtering = self.duplicate_filtering;

        self.engine.execute(session, |ctx| {
            ctx.check_any(&[Required::new(Permission::Create, Resource::Deployment, ANY)])?;

            let deployments = ctx.scan::<DeploymentRecord>()?;
            let filtering =
                duplicate_filtering.unwrap_or(ctx.config().deployment_duplicate_filtering);
            if filtering && !name.is_empty() {
                let previous = deployments
                    .iter()
                    .filter(|d| d.name == name)
                    .max_by_key(|d| d.sequence);
                if let Some(previous) = previous.filter(|d| d.checksum == checksum) {
                    info!(deployment_id = %previous.id, name = %name, "duplicate deployment filtered");
                    return Ok(Deployment::from(previous.clone()));
                }
            }

            let existing = ctx.scan::<DefinitionRecord>()?;
            let deployed_case_keys: BTreeSet<String> = existing
                .iter()
                .filter(|d| d.kind == DefinitionKind::Case.as_str())
                .map(|d| d.key.clone())
                .collect();
            if let Err(errors) = validate_deployment(&definitions, &deployed_case_keys) {
                let mut errors = errors.into_iter();
                let first = errors.next();
                for extra in errors {
                    warn!(error = %extra, "deployment rejected");
                }
                return Err(match first {
                    Some(e) => e.into(),
                    None => EngineError::invalid("deployment rejected"),
                });
            }

            let deployment_id = ctx.next_id();
            let sequence = deployments.iter().map(|d| d.sequence).max().unwrap_or(0) + 1;
            let mut definition_ids = Vec::with_capacity(definitions.len());
            for def in &definitions {
                let version = existing
                    .iter()
                    .filter(|d| d.key == def.key() && d.kind == def.kind().as_str())
                    .map(|d| d.version)
                    .max()
                    .unwrap_or(0)
                    + 1;
                let id = format!("{}:{}:{}", def.key(), version, deployment_id);
                let model =
                    serde_json::to_value(def).map_err(|e| StorageError::Serialization {
                        table: DefinitionRecord::TABLE.to_string(),
                        message: e.to_string(),
                    })?;
                ctx.insert(&DefinitionRecord {
                    id: id.clone(),
                    key: def.key().to_string(),
                    version,
                    kind: def.kind().as_str().to_string(),
                    deployment_id: deployment_id.clone(),
                    model,
                })?;
                definition_ids.push(id);
            }

            let record = DeploymentRecord {
                id: deployment_id,
                name: name.clone(),
                checksum: checksum.clone(),
                sequence,
                definition_ids,
            };
            ctx.insert(&record)?;
            info!(
                deployment_id = %record.id,
                name = %record.name,
                definitions = record.definition_ids.len(),
                "deployment created"
            );
            Ok(record.into())
        })
    }
}

/// Deployments and definitions.
pub struct RepositoryService<'e, S: EngineStorage> {
    engine: &'e ProcessEngine<S>,
}

impl<'e, S: EngineStorage> RepositoryService<'e, S> {
    pub(crate) fn new(engine: &'e ProcessEngine<S>) -> Self {
        Self { engine }
    }

    pub fn create_deployment(&self) -> DeploymentBuilder<'e, S> {
        DeploymentBuilder {
            engine: self.engine,
            name: None,
            resources: BTreeMap::new(),
            duplicate_filtering: None,
        }
    }

    pub fn deployment(&self, deployment_id: &str) -> Result<Option<Deployment>, EngineError> {
        self.engine.execute(&Session::new(), |ctx| {
            Ok(ctx.get::<DeploymentRecord>(deployment_id)?.map(Deployment::from))
        })
    }

    /// All deployments, oldest first.
    pub fn deployments(&self) -> Result<Vec<Deployment>, EngineError> {
        self.engine.execute(&Session::new(), |ctx| {
            let mut records = ctx.scan::<DeploymentRecord>()?;
            records.sort_by_key(|d| d.sequence);
            Ok(records.into_iter().map(Deployment::from).collect())
        })
    }

    /// Latest version of the definition `key`, of either kind.
    pub fn definition(&self, key: &str) -> Result<DeployedDefinition, EngineError> {
        self.engine.execute(&Session::new(), |ctx| {
            let latest = ctx
                .scan_where::<DefinitionRecord>(|d| d.key == key)?
                .into_iter()
                .max_by_key(|d| d.version)
                .ok_or_else(|| EngineError::not_found("definition", key))?;
            DeployedDefinition::from_record(latest)
        })
    }

    pub fn definition_by_id(&self, definition_id: &str) -> Result<DeployedDefinition, EngineError> {
        self.engine.execute(&Session::new(), |ctx| {
            DeployedDefinition::from_record(ctx.require("definition", definition_id)?)
        })
    }

    /// Every version of every process definition, by key then version.
    pub fn process_definitions(&self) -> Result<Vec<DeployedDefinition>, EngineError> {
        self.definitions_of(DefinitionKind::Process)
    }

    pub fn case_definitions(&self) -> Result<Vec<DeployedDefinition>, EngineError> {
        self.definitions_of(DefinitionKind::Case)
    }

    fn definitions_of(&self, kind: DefinitionKind) -> Result<Vec<DeployedDefinition>, EngineError> {
        self.engine.execute(&Session::new(), |ctx| {
            let mut records = ctx.scan_where::<DefinitionRecord>(|d| d.kind == kind.as_str())?;
            records.sort_by(|a, b| a.key.cmp(&b.key).then(a.version.cmp(&b.version)));
            records
                .into_iter()
                .map(DeployedDefinition::from_record)
                .collect()
        })
    }
}
