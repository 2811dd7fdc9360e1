//! Scope-model declarations and catalog validation.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating the scope-model catalog.
#[derive(Debug)]
pub enum ConfigError {
    /// Catalog file could not be read.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Catalog content is not valid JSON for the expected shape.
    Parse(serde_json::Error),
    EmptyModelId,
    DuplicateModelId(String),
    /// Lookup of a model id the catalog does not declare.
    UnknownModel(String),
    UnknownParent {
        model: String,
        parent: String,
    },
    SelfParent(String),
    /// Non-root model without a default parent.
    MissingDefaultParent(String),
    DefaultParentNotDeclared {
        model: String,
        default_parent: String,
    },
    /// Root model declaring a default parent.
    DefaultParentOnRoot(String),
    /// Model reaches itself through its parent links.
    Cycle(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read scope model config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid scope model config: {err}"),
            Self::EmptyModelId => write!(f, "scope model id must not be blank"),
            Self::DuplicateModelId(id) => write!(f, "duplicate scope model id `{id}`"),
            Self::UnknownModel(id) => write!(f, "unknown scope model `{id}`"),
            Self::UnknownParent { model, parent } => {
                write!(f, "scope model `{model}` declares unknown parent `{parent}`")
            }
            Self::SelfParent(id) => write!(f, "scope model `{id}` cannot be its own parent"),
            Self::MissingDefaultParent(id) => {
                write!(f, "scope model `{id}` has parents but no default parent")
            }
            Self::DefaultParentNotDeclared {
                model,
                default_parent,
            } => write!(
                f,
                "default parent `{default_parent}` of scope model `{model}` is not among its parents"
            ),
            Self::DefaultParentOnRoot(id) => {
                write!(f, "root scope model `{id}` cannot declare a default parent")
            }
            Self::Cycle(id) => write!(f, "scope model `{id}` is its own ancestor"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Configuration-level type of a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeModel {
    pub id: String,
    /// Models a scope of this model may be attached under.
    #[serde(default)]
    pub parent_ids: Vec<String>,
    /// Parent model used for the primary lineage.
    #[serde(default)]
    pub default_parent_id: Option<String>,
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
    /// Global ceiling on scopes of this model; `None` or `0` means unlimited.
    #[serde(default)]
    pub max_number: Option<u32>,
}

impl ScopeModel {
    /// Root models have no parent models.
    pub fn is_root(&self) -> bool {
        self.parent_ids.is_empty()
    }

    /// Returns whether `parent` is a declared parent model of this model.
    pub fn is_child_of(&self, parent: &ScopeModel) -> bool {
        self.parent_ids.iter().any(|id| id == &parent.id)
    }

    /// Returns the effective global ceiling, ignoring the `0` sentinel.
    pub fn effective_max_number(&self) -> Option<u32> {
        self.max_number.filter(|max| *max > 0)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    scope_models: Vec<ScopeModel>,
}

/// Validated, immutable set of scope models keyed by id.
#[derive(Debug, Clone)]
pub struct ScopeModelCatalog {
    models: Vec<ScopeModel>,
    index: HashMap<String, usize>,
}

impl ScopeModelCatalog {
    /// Builds and validates a catalog.
    ///
    /// # Errors
    /// - Returns the first validation failure found, in declaration order.
    pub fn new(models: Vec<ScopeModel>) -> ConfigResult<Self> {
        let mut index = HashMap::with_capacity(models.len());
        for (position, model) in models.iter().enumerate() {
            if model.id.trim().is_empty() {
                return Err(ConfigError::EmptyModelId);
            }
            if index.insert(model.id.clone(), position).is_some() {
                return Err(ConfigError::DuplicateModelId(model.id.clone()));
            }
        }

        let catalog = Self { models, index };
        for model in &catalog.models {
            catalog.validate_links(model)?;
        }
        for model in &catalog.models {
            if catalog.reaches(&model.id, &model.id) {
                return Err(ConfigError::Cycle(model.id.clone()));
            }
        }
        Ok(catalog)
    }

    /// Parses `{ "scope_models": [...] }` JSON into a validated catalog.
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let document: CatalogDocument = serde_json::from_str(json)?;
        Self::new(document.scope_models)
    }

    /// Reads and validates a catalog file.
    pub fn from_path(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn models(&self) -> &[ScopeModel] {
        &self.models
    }

    pub fn get(&self, id: &str) -> Option<&ScopeModel> {
        self.index.get(id).map(|position| &self.models[*position])
    }

    /// Like [`Self::get`], failing with `UnknownModel`.
    pub fn require(&self, id: &str) -> ConfigResult<&ScopeModel> {
        self.get(id)
            .ok_or_else(|| ConfigError::UnknownModel(id.to_string()))
    }

    /// Leaf models are declared as parent by no other model.
    pub fn is_leaf(&self, id: &str) -> bool {
        !self
            .models
            .iter()
            .any(|model| model.parent_ids.iter().any(|parent| parent == id))
    }

    /// Returns whether `child_id` declares `parent_id` as a parent model.
    pub fn is_child_of(&self, child_id: &str, parent_id: &str) -> bool {
        self.get(child_id)
            .is_some_and(|child| child.parent_ids.iter().any(|id| id == parent_id))
    }

    /// Models declaring `id` as one of their parents.
    pub fn children_of(&self, id: &str) -> Vec<&ScopeModel> {
        self.models
            .iter()
            .filter(|model| model.parent_ids.iter().any(|parent| parent == id))
            .collect()
    }

    /// Returns whether `ancestor_id` is reachable through parent links.
    pub fn is_descendant_of(&self, id: &str, ancestor_id: &str) -> bool {
        self.reaches(id, ancestor_id)
    }

    /// Number of default-parent hops up to a root model.
    pub fn depth(&self, id: &str) -> Option<usize> {
        let mut depth = 0;
        let mut current = self.get(id)?;
        while let Some(parent_id) = current.default_parent_id.as_deref() {
            current = self.get(parent_id)?;
            depth += 1;
            if depth > self.models.len() {
                return None;
            }
        }
        Some(depth)
    }

    fn validate_links(&self, model: &ScopeModel) -> ConfigResult<()> {
        for parent in &model.parent_ids {
            if parent == &model.id {
                return Err(ConfigError::SelfParent(model.id.clone()));
            }
            if !self.index.contains_key(parent) {
                return Err(ConfigError::UnknownParent {
                    model: model.id.clone(),
                    parent: parent.clone(),
                });
            }
        }

        match (&model.default_parent_id, model.is_root()) {
            (Some(_), true) => Err(ConfigError::DefaultParentOnRoot(model.id.clone())),
            (None, false) => Err(ConfigError::MissingDefaultParent(model.id.clone())),
            (Some(default_parent), false) if !model.parent_ids.contains(default_parent) => {
                Err(ConfigError::DefaultParentNotDeclared {
                    model: model.id.clone(),
                    default_parent: default_parent.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Breadth-first walk over parent links starting at the parents of `from`.
    fn reaches(&self, from: &str, target: &str) -> bool {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        if let Some(model) = self.get(from) {
            queue.extend(model.parent_ids.iter().map(String::as_str));
        }
        while let Some(current) = queue.pop_front() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(model) = self.get(current) {
                queue.extend(model.parent_ids.iter().map(String::as_str));
            }
        }
        false
    }
}
