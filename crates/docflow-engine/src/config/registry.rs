//! Loads workflow-definitions and parameter-sets from disk and serves them
//! from memory, reloading a directory on a lookup miss before giving up
//! (SPEC_FULL.md §4.2, §9 — "no global singleton, `Arc`-shared via
//! `AppState`").

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use docflow_core::{Error, Result};
use tokio::sync::RwLock;

use super::model::{ParamSet, WorkflowDefinition};

/// One workflow definition or parameter-set per `*.yaml`/`*.yml` file in the
/// configured directory. Held behind a `RwLock` rather than re-read from disk
/// on every lookup, with an explicit `reload()` for operators to pick up new
/// files without restarting the process.
pub struct ConfigRegistry {
    workflow_dir: PathBuf,
    param_dir: PathBuf,
    workflows: RwLock<HashMap<String, WorkflowDefinition>>,
    param_sets: RwLock<HashMap<String, ParamSet>>,
}

impl ConfigRegistry {
    /// Loads both directories eagerly; fails fast on a malformed file or a
    /// duplicate id within a directory rather than surfacing it lazily at
    /// first use.
    pub async fn load(workflow_dir: impl Into<PathBuf>, param_dir: impl Into<PathBuf>) -> Result<Self> {
        let workflow_dir = workflow_dir.into();
        let param_dir = param_dir.into();
        let workflows = load_workflows(&workflow_dir).await?;
        let param_sets = load_param_sets(&param_dir).await?;
        Ok(Self {
            workflow_dir,
            param_dir,
            workflows: RwLock::new(workflows),
            param_sets: RwLock::new(param_sets),
        })
    }

    /// Looks up a workflow definition by id, reloading the directory once on
    /// a miss (a file may have been dropped in after startup) before
    /// returning `NotFound`.
    pub async fn get_workflow(&self, id: &str) -> Result<WorkflowDefinition> {
        if let Some(def) = self.workflows.read().await.get(id).cloned() {
            return Ok(def);
        }
        let reloaded = load_workflows(&self.workflow_dir).await?;
        let found = reloaded.get(id).cloned();
        *self.workflows.write().await = reloaded;
        found.ok_or_else(|| Error::not_found(format!("workflow definition {id}")))
    }

    /// Looks up a parameter-set by id, same reload-on-miss behaviour as
    /// `get_workflow`.
    pub async fn get_param_set(&self, id: &str) -> Result<ParamSet> {
        if let Some(ps) = self.param_sets.read().await.get(id).cloned() {
            return Ok(ps);
        }
        let reloaded = load_param_sets(&self.param_dir).await?;
        let found = reloaded.get(id).cloned();
        *self.param_sets.write().await = reloaded;
        found.ok_or_else(|| Error::not_found(format!("parameter set {id}")))
    }

    pub async fn list_workflows(&self) -> Vec<WorkflowDefinition> {
        self.workflows.read().await.values().cloned().collect()
    }

    pub async fn list_param_sets(&self) -> Vec<ParamSet> {
        self.param_sets.read().await.values().cloned().collect()
    }

    /// Re-reads both directories from scratch, replacing the in-memory maps
    /// wholesale. Used by the CLI's config-reload path and by operators who
    /// don't want to wait for a lookup miss.
    pub async fn reload(&self) -> Result<()> {
        let workflows = load_workflows(&self.workflow_dir).await?;
        let param_sets = load_param_sets(&self.param_dir).await?;
        *self.workflows.write().await = workflows;
        *self.param_sets.write().await = param_sets;
        Ok(())
    }

    /// Persists a user-uploaded parameter-set as `<param_dir>/<id>.yaml` and
    /// reloads. Rejects an id already present (built-in or user), matching
    /// `POST /workflow/param-sets`' 409-on-duplicate contract.
    pub async fn save_param_set(&self, param_set: &ParamSet) -> Result<()> {
        if self.param_sets.read().await.contains_key(&param_set.id) {
            return Err(Error::duplicate(format!("parameter set {} already exists", param_set.id)));
        }
        let text = serde_yaml::to_string(param_set).map_err(|e| Error::invalid_input(e.to_string()))?;
        let path = self.param_dir.join(format!("{}.yaml", param_set.id));
        tokio::fs::write(&path, text)
            .await
            .map_err(|e| Error::invalid_input(format!("writing {}: {e}", path.display())))?;
        self.reload().await
    }

    /// Removes a user-authored parameter-set's backing file and reloads.
    /// Rejects deleting a built-in (`source: app`) set with `Forbidden`.
    pub async fn delete_param_set(&self, id: &str) -> Result<()> {
        let ps = self.get_param_set(id).await?;
        if ps.source != docflow_core::ParamSetSource::User {
            return Err(Error::forbidden(format!("parameter set {id} is built-in")));
        }
        let path = self.param_dir.join(format!("{id}.yaml"));
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let alt = self.param_dir.join(format!("{id}.yml"));
                tokio::fs::remove_file(&alt)
                    .await
                    .map_err(|e| Error::invalid_input(format!("removing {}: {e}", alt.display())))?;
            }
            Err(e) => return Err(Error::invalid_input(format!("removing {}: {e}", path.display()))),
        }
        self.reload().await
    }
}

async fn load_workflows(dir: &Path) -> Result<HashMap<String, WorkflowDefinition>> {
    let mut out = HashMap::new();
    for path in yaml_files(dir).await? {
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::invalid_input(format!("reading {}: {e}", path.display())))?;
        let def: WorkflowDefinition = serde_yaml::from_str(&text)
            .map_err(|e| Error::invalid_input(format!("parsing {}: {e}", path.display())))?;
        if out.insert(def.id.clone(), def).is_some() {
            return Err(Error::duplicate(format!(
                "duplicate workflow definition id in {}",
                dir.display()
            )));
        }
    }
    Ok(out)
}

async fn load_param_sets(dir: &Path) -> Result<HashMap<String, ParamSet>> {
    let mut out = HashMap::new();
    for path in yaml_files(dir).await? {
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::invalid_input(format!("reading {}: {e}", path.display())))?;
        let ps: ParamSet = serde_yaml::from_str(&text)
            .map_err(|e| Error::invalid_input(format!("parsing {}: {e}", path.display())))?;
        if out.insert(ps.id.clone(), ps).is_some() {
            return Err(Error::duplicate(format!(
                "duplicate parameter set id in {}",
                dir.display()
            )));
        }
    }
    Ok(out)
}

async fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::invalid_input(format!("reading directory {}: {e}", dir.display())))?;
    let mut out = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::invalid_input(format!("reading directory {}: {e}", dir.display())))?
    {
        let path = entry.path();
        let is_yaml = matches!(path.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml"));
        if is_yaml {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn loads_workflows_and_param_sets_from_directories() {
        let workflow_dir = tempfile::tempdir().unwrap();
        let param_dir = tempfile::tempdir().unwrap();
        write_file(
            workflow_dir.path(),
            "ingest.yaml",
            "id: ingest\nname: Ingest\nitem_steps:\n  - step_type: validate\n    handler: validate\n",
        );
        write_file(param_dir.path(), "default.yaml", "id: default\nconfig: {}\n");

        let registry = ConfigRegistry::load(workflow_dir.path(), param_dir.path()).await.unwrap();
        let def = registry.get_workflow("ingest").await.unwrap();
        assert_eq!(def.item_steps.len(), 1);
        let ps = registry.get_param_set("default").await.unwrap();
        assert_eq!(ps.id, "default");
    }

    #[tokio::test]
    async fn duplicate_id_in_directory_is_rejected() {
        let workflow_dir = tempfile::tempdir().unwrap();
        let param_dir = tempfile::tempdir().unwrap();
        write_file(workflow_dir.path(), "a.yaml", "id: dup\nname: A\nitem_steps: []\n");
        write_file(workflow_dir.path(), "b.yaml", "id: dup\nname: B\nitem_steps: []\n");

        let err = ConfigRegistry::load(workflow_dir.path(), param_dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::Duplicate(_)));
    }

    #[tokio::test]
    async fn missing_id_reloads_then_fails() {
        let workflow_dir = tempfile::tempdir().unwrap();
        let param_dir = tempfile::tempdir().unwrap();
        let registry = ConfigRegistry::load(workflow_dir.path(), param_dir.path()).await.unwrap();
        let err = registry.get_workflow("nope").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn reload_picks_up_new_file() {
        let workflow_dir = tempfile::tempdir().unwrap();
        let param_dir = tempfile::tempdir().unwrap();
        let registry = ConfigRegistry::load(workflow_dir.path(), param_dir.path()).await.unwrap();
        assert!(registry.get_workflow("later").await.is_err());

        write_file(workflow_dir.path(), "later.yaml", "id: later\nname: Later\nitem_steps: []\n");
        registry.reload().await.unwrap();
        let def = registry.get_workflow("later").await.unwrap();
        assert_eq!(def.id, "later");
    }
}
