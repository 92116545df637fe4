use crate::dashboard::config::WidgetConfig;
use crate::dashboard::error::{DashboardError, DashboardResult};
use crate::dashboard::widgets::WidgetFactory;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Serializable part of a widget definition. Instances carry a copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WidgetMetadata {
    #[serde(rename = "type")]
    pub widget_type: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub lazy: bool,
}

impl WidgetMetadata {
    pub fn new(widget_type: &str, name: &str, category: &str) -> Self {
        Self {
            widget_type: widget_type.to_string(),
            name: name.to_string(),
            description: String::new(),
            category: category.to_string(),
            tags: Vec::new(),
            dependencies: Vec::new(),
            lazy: false,
        }
    }
}

/// Deferred component resolution, invoked on every load.
pub type ComponentLoader = Arc<dyn Fn() -> anyhow::Result<WidgetFactory> + Send + Sync>;

/// Catalog entry for a widget type.
#[derive(Clone)]
pub struct WidgetDefinition {
    pub metadata: WidgetMetadata,
    pub default_config: Option<WidgetConfig>,
    pub component: Option<WidgetFactory>,
    pub loader: Option<ComponentLoader>,
}

impl WidgetDefinition {
    pub fn new(widget_type: &str, name: &str, category: &str) -> Self {
        Self {
            metadata: WidgetMetadata::new(widget_type, name, category),
            default_config: None,
            component: None,
            loader: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.metadata.description = description.to_string();
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.metadata.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_dependencies(mut self, deps: &[&str]) -> Self {
        self.metadata.dependencies = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_default_config(mut self, config: WidgetConfig) -> Self {
        self.default_config = Some(config);
        self
    }

    pub fn with_component(mut self, factory: WidgetFactory) -> Self {
        self.component = Some(factory);
        self
    }

    /// Marks the definition lazy.
    pub fn with_loader(
        mut self,
        loader: impl Fn() -> anyhow::Result<WidgetFactory> + Send + Sync + 'static,
    ) -> Self {
        self.loader = Some(Arc::new(loader));
        self.metadata.lazy = true;
        self
    }

    pub fn widget_type(&self) -> &str {
        &self.metadata.widget_type
    }

    fn validate(&self) -> DashboardResult<()> {
        let missing = if self.metadata.widget_type.trim().is_empty() {
            Some("type")
        } else if self.metadata.name.trim().is_empty() {
            Some("name")
        } else if self.metadata.category.trim().is_empty() {
            Some("category")
        } else if self.default_config.is_none() {
            Some("defaultConfig")
        } else if self.component.is_none() && self.loader.is_none() {
            Some("component")
        } else {
            None
        };
        match missing {
            Some(field) => Err(DashboardError::InvalidDefinition { field }),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for WidgetDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidgetDefinition")
            .field("metadata", &self.metadata)
            .field("default_config", &self.default_config)
            .field("component", &self.component)
            .field("loader", &self.loader.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyCheck {
    pub satisfied: bool,
    pub missing: Vec<String>,
}

/// Full-catalog snapshot produced by [`WidgetRegistry::export`].
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub definitions: Vec<WidgetDefinition>,
}

#[derive(Clone, Default)]
pub struct WidgetRegistry {
    map: HashMap<String, WidgetDefinition>,
    categories: BTreeMap<String, BTreeSet<String>>,
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and insert. Re-registering a type replaces it with a warning.
    pub fn register(&mut self, definition: WidgetDefinition) -> DashboardResult<()> {
        definition.validate()?;
        let widget_type = definition.widget_type().to_string();
        if let Some(previous) = self.map.remove(&widget_type) {
            tracing::warn!(widget = %widget_type, "widget type already registered; overwriting");
            self.unindex(&previous);
        }
        self.categories
            .entry(definition.metadata.category.clone())
            .or_default()
            .insert(widget_type.clone());
        self.map.insert(widget_type, definition);
        Ok(())
    }

    /// Registers in order and stops at the first invalid definition; the
    /// ones before it stay registered.
    pub fn register_many(
        &mut self,
        definitions: impl IntoIterator<Item = WidgetDefinition>,
    ) -> DashboardResult<usize> {
        let mut count = 0;
        for definition in definitions {
            self.register(definition)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn unregister(&mut self, widget_type: &str) -> bool {
        match self.map.remove(widget_type) {
            Some(previous) => {
                self.unindex(&previous);
                true
            }
            None => false,
        }
    }

    fn unindex(&mut self, definition: &WidgetDefinition) {
        let category = &definition.metadata.category;
        if let Some(types) = self.categories.get_mut(category) {
            types.remove(definition.widget_type());
            if types.is_empty() {
                self.categories.remove(category);
            }
        }
    }

    pub fn contains(&self, widget_type: &str) -> bool {
        self.map.contains_key(widget_type)
    }

    pub fn get_widget(&self, widget_type: &str) -> Option<&WidgetDefinition> {
        self.map.get(widget_type)
    }

    /// All definitions sorted by type.
    pub fn get_all_widgets(&self) -> Vec<&WidgetDefinition> {
        let mut all: Vec<&WidgetDefinition> = self.map.values().collect();
        all.sort_by(|a, b| a.widget_type().cmp(b.widget_type()));
        all
    }

    pub fn get_widgets_by_category(&self, category: &str) -> Vec<&WidgetDefinition> {
        self.categories
            .get(category)
            .map(|types| types.iter().filter_map(|t| self.map.get(t)).collect())
            .unwrap_or_default()
    }

    pub fn get_categories(&self) -> Vec<String> {
        self.categories.keys().cloned().collect()
    }

    /// Definitions carrying at least one of `tags`.
    pub fn search_by_tags(&self, tags: &[&str]) -> Vec<&WidgetDefinition> {
        self.get_all_widgets()
            .into_iter()
            .filter(|d| d.metadata.tags.iter().any(|t| tags.contains(&t.as_str())))
            .collect()
    }

    /// Case-insensitive substring match over name, description and tags.
    pub fn search(&self, query: &str) -> Vec<&WidgetDefinition> {
        let needle = query.to_lowercase();
        self.get_all_widgets()
            .into_iter()
            .filter(|d| {
                let meta = &d.metadata;
                meta.name.to_lowercase().contains(&needle)
                    || meta.description.to_lowercase().contains(&needle)
                    || meta.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            })
            .collect()
    }

    /// Resolve the component for `widget_type`, invoking the lazy loader
    /// when the definition is lazy.
    pub fn load_component(&self, widget_type: &str) -> DashboardResult<WidgetFactory> {
        let definition = self
            .map
            .get(widget_type)
            .ok_or_else(|| DashboardError::WidgetNotFound(widget_type.to_string()))?;
        let use_loader = definition.metadata.lazy || definition.component.is_none();
        match (&definition.loader, &definition.component) {
            (Some(loader), _) if use_loader => loader().map_err(|e| {
                tracing::warn!(widget = %widget_type, error = %e, "component loader failed");
                DashboardError::ComponentLoadFailed {
                    widget_type: widget_type.to_string(),
                    reason: e.to_string(),
                }
            }),
            (_, Some(component)) => Ok(component.clone()),
            _ => Err(DashboardError::ComponentLoadFailed {
                widget_type: widget_type.to_string(),
                reason: "definition has no component".into(),
            }),
        }
    }

    /// Unknown types report themselves as the missing dependency.
    pub fn check_dependencies(&self, widget_type: &str) -> DependencyCheck {
        let Some(definition) = self.map.get(widget_type) else {
            return DependencyCheck {
                satisfied: false,
                missing: vec![widget_type.to_string()],
            };
        };
        let missing: Vec<String> = definition
            .metadata
            .dependencies
            .iter()
            .filter(|dep| !self.map.contains_key(dep.as_str()))
            .cloned()
            .collect();
        DependencyCheck {
            satisfied: missing.is_empty(),
            missing,
        }
    }

    pub fn export(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            definitions: self.get_all_widgets().into_iter().cloned().collect(),
        }
    }

    /// Replace the catalog. Invalid entries are skipped with a warning.
    pub fn import(&mut self, snapshot: RegistrySnapshot) -> usize {
        self.map.clear();
        self.categories.clear();
        let mut imported = 0;
        for definition in snapshot.definitions {
            let widget_type = definition.widget_type().to_string();
            match self.register(definition) {
                Ok(()) => imported += 1,
                Err(e) => {
                    tracing::warn!(
                        widget = %widget_type,
                        error = %e,
                        "skipping imported definition"
                    );
                }
            }
        }
        imported
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.map.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn metadata(&self) -> Vec<WidgetMetadata> {
        self.get_all_widgets()
            .into_iter()
            .map(|d| d.metadata.clone())
            .collect()
    }

    pub fn default_config(&self, widget_type: &str) -> Option<WidgetConfig> {
        self.map
            .get(widget_type)
            .and_then(|d| d.default_config.clone())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
