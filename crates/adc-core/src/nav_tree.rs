//! Sidebar navigation model: modules, their lazily fetched submodules, and the
//! fixed settings tree.
//!
//! The controller performs no I/O. Operations return [`NavCommand`]s for a
//! driver to execute, and the driver feeds fetch outcomes back through
//! [`NavTreeController::apply_modules`] and
//! [`NavTreeController::apply_submodules`]. Every fetch carries a generation
//! tag; only the latest generation requested for a key may write state.

use crate::resource::ResourceError;
use crate::{Destination, NavModule, NavSubmodule, DASHBOARD_LABEL, SETTINGS_LABEL, SETTINGS_LEAVES};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Which node of the sidebar is open. One at most.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Expansion {
    #[default]
    Collapsed,
    Module(String),
    Settings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreePhase {
    Empty,
    ModulesLoaded,
    ModuleExpanded(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavCommand {
    FetchModules { generation: u64 },
    FetchSubmodules { module_id: String, generation: u64 },
    Navigate(Destination),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavRowKind {
    Leaf(Destination),
    Module(String),
    SettingsGroup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavRow {
    pub kind: NavRowKind,
    pub label: String,
    pub depth: usize,
    pub expanded: bool,
    pub active: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ModuleDiff {
    added: usize,
    removed: usize,
    renamed: usize,
}

fn diff_modules(old: &[NavModule], new: &[NavModule]) -> ModuleDiff {
    let old_by_id: HashMap<&str, &str> = old
        .iter()
        .map(|module| (module.id.as_str(), module.name.as_str()))
        .collect();
    let new_ids: HashSet<&str> = new.iter().map(|module| module.id.as_str()).collect();

    let mut diff = ModuleDiff::default();
    for module in new {
        match old_by_id.get(module.id.as_str()) {
            None => diff.added += 1,
            Some(name) if *name != module.name => diff.renamed += 1,
            Some(_) => {}
        }
    }
    diff.removed = old_by_id
        .keys()
        .filter(|id| !new_ids.contains(*id))
        .count();
    diff
}

#[derive(Debug)]
pub struct NavTreeController {
    mounted: bool,
    loaded: bool,
    modules: Vec<NavModule>,
    submodules_by_module: HashMap<String, Vec<NavSubmodule>>,
    expansion: Expansion,
    active_label: String,
    next_generation: u64,
    pending_modules: Option<u64>,
    pending_submodules: HashMap<String, u64>,
    last_refresh: u64,
    last_error: Option<ResourceError>,
}

impl Default for NavTreeController {
    fn default() -> Self {
        Self::new()
    }
}

impl NavTreeController {
    pub fn new() -> Self {
        Self {
            mounted: false,
            loaded: false,
            modules: Vec::new(),
            submodules_by_module: HashMap::new(),
            expansion: Expansion::Collapsed,
            active_label: DASHBOARD_LABEL.to_string(),
            next_generation: 0,
            pending_modules: None,
            pending_submodules: HashMap::new(),
            last_refresh: 0,
            last_error: None,
        }
    }

    pub fn mount(&mut self) -> Vec<NavCommand> {
        if self.mounted {
            return Vec::new();
        }
        self.reset();
        self.mounted = true;
        info!(event = "nav_tree_mounted");
        vec![self.request_modules()]
    }

    /// Discards the whole model. Results arriving afterwards are ignored.
    pub fn unmount(&mut self) {
        if !self.mounted {
            return;
        }
        self.reset();
        info!(event = "nav_tree_unmounted");
    }

    fn reset(&mut self) {
        self.mounted = false;
        self.loaded = false;
        self.modules.clear();
        self.submodules_by_module.clear();
        self.expansion = Expansion::Collapsed;
        self.active_label = DASHBOARD_LABEL.to_string();
        self.pending_modules = None;
        self.pending_submodules.clear();
        self.last_error = None;
    }

    pub fn on_refresh(&mut self, counter: u64) -> Vec<NavCommand> {
        if !self.mounted {
            return Vec::new();
        }
        self.last_refresh = counter;
        debug!(event = "nav_tree_refresh_requested", counter);
        vec![self.request_modules()]
    }

    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn request_modules(&mut self) -> NavCommand {
        let generation = self.bump_generation();
        self.pending_modules = Some(generation);
        NavCommand::FetchModules { generation }
    }

    fn request_submodules(&mut self, module_id: &str) -> NavCommand {
        let generation = self.bump_generation();
        self.pending_submodules
            .insert(module_id.to_string(), generation);
        NavCommand::FetchSubmodules {
            module_id: module_id.to_string(),
            generation,
        }
    }

    pub fn apply_modules(
        &mut self,
        generation: u64,
        result: Result<Vec<NavModule>, ResourceError>,
    ) -> Vec<NavCommand> {
        if !self.mounted || self.pending_modules != Some(generation) {
            debug!(event = "nav_modules_discarded", generation, mounted = self.mounted);
            return Vec::new();
        }
        self.pending_modules = None;

        let modules = match result {
            Ok(modules) => modules,
            Err(err) => {
                warn!(event = "nav_modules_fetch_failed", generation, error = %err);
                if !self.loaded {
                    self.modules.clear();
                    self.submodules_by_module.clear();
                    if matches!(self.expansion, Expansion::Module(_)) {
                        self.expansion = Expansion::Collapsed;
                    }
                }
                self.last_error = Some(err);
                return Vec::new();
            }
        };

        let diff = diff_modules(&self.modules, &modules);
        info!(
            event = "nav_modules_loaded",
            generation,
            count = modules.len(),
            added = diff.added,
            removed = diff.removed,
            renamed = diff.renamed
        );
        self.modules = modules;
        self.loaded = true;
        self.last_error = None;
        // A new load invalidates every cached submodule list and every
        // outstanding fetch; only the expanded module is refetched.
        self.pending_submodules.clear();

        let mut commands = Vec::new();
        match self.expansion.clone() {
            Expansion::Module(id) if self.has_module(&id) => {
                self.submodules_by_module.retain(|module_id, _| *module_id == id);
                commands.push(self.request_submodules(&id));
            }
            Expansion::Module(id) => {
                info!(event = "nav_expanded_module_removed", module_id = %id);
                self.submodules_by_module.clear();
                self.expansion = Expansion::Collapsed;
            }
            _ => self.submodules_by_module.clear(),
        }
        commands
    }

    pub fn apply_submodules(
        &mut self,
        module_id: &str,
        generation: u64,
        result: Result<Vec<NavSubmodule>, ResourceError>,
    ) -> Vec<NavCommand> {
        if !self.mounted || self.pending_submodules.get(module_id) != Some(&generation) {
            debug!(
                event = "nav_submodules_discarded",
                module_id,
                generation,
                mounted = self.mounted
            );
            return Vec::new();
        }
        self.pending_submodules.remove(module_id);
        if !self.has_module(module_id) {
            return Vec::new();
        }

        match result {
            Ok(submodules) => {
                debug!(
                    event = "nav_submodules_loaded",
                    module_id,
                    generation,
                    count = submodules.len()
                );
                self.submodules_by_module
                    .insert(module_id.to_string(), submodules);
            }
            Err(err) => {
                warn!(event = "nav_submodules_fetch_failed", module_id, generation, error = %err);
                self.last_error = Some(err);
            }
        }
        Vec::new()
    }

    pub fn toggle_module(&mut self, module_id: &str) -> Vec<NavCommand> {
        if !self.mounted {
            return Vec::new();
        }
        let Some(module) = self.modules.iter().find(|module| module.id == module_id) else {
            debug!(event = "nav_toggle_unknown_module", module_id);
            return Vec::new();
        };
        self.active_label = module.name.clone();

        if self.expansion == Expansion::Module(module_id.to_string()) {
            self.expansion = Expansion::Collapsed;
            return Vec::new();
        }

        self.expansion = Expansion::Module(module_id.to_string());
        if self.submodules_by_module.contains_key(module_id) {
            return Vec::new();
        }
        vec![self.request_submodules(module_id)]
    }

    pub fn toggle_settings(&mut self) {
        self.active_label = SETTINGS_LABEL.to_string();
        self.expansion = if self.expansion == Expansion::Settings {
            Expansion::Collapsed
        } else {
            Expansion::Settings
        };
    }

    /// Leaf selection ends the interaction: submenus close and the router moves.
    pub fn select_leaf(&mut self, label: impl Into<String>, destination: Destination) -> Vec<NavCommand> {
        self.active_label = label.into();
        self.expansion = Expansion::Collapsed;
        vec![NavCommand::Navigate(destination)]
    }

    /// Records where the router actually landed, including gate redirects.
    pub fn note_navigation(&mut self, destination: &Destination) {
        let label = match destination {
            Destination::Submodule {
                module_id,
                submodule_id,
            } => self
                .submodules_by_module
                .get(module_id)
                .and_then(|subs| subs.iter().find(|sub| sub.id == *submodule_id))
                .map(|sub| sub.name.clone())
                .unwrap_or_else(|| submodule_id.clone()),
            other => other.fixed_label().unwrap_or(DASHBOARD_LABEL).to_string(),
        };
        self.active_label = label;
    }

    pub fn rows(&self) -> Vec<NavRow> {
        let mut rows = Vec::new();
        rows.push(self.leaf_row(DASHBOARD_LABEL.to_string(), Destination::Dashboard, 0));

        for module in &self.modules {
            let expanded = self.expansion == Expansion::Module(module.id.clone());
            rows.push(NavRow {
                kind: NavRowKind::Module(module.id.clone()),
                label: module.name.clone(),
                depth: 0,
                expanded,
                active: self.active_label == module.name,
            });
            if !expanded {
                continue;
            }
            if let Some(submodules) = self.submodules_by_module.get(&module.id) {
                for sub in submodules {
                    rows.push(self.leaf_row(
                        sub.name.clone(),
                        Destination::Submodule {
                            module_id: module.id.clone(),
                            submodule_id: sub.id.clone(),
                        },
                        1,
                    ));
                }
            }
        }

        let settings_open = self.expansion == Expansion::Settings;
        rows.push(NavRow {
            kind: NavRowKind::SettingsGroup,
            label: SETTINGS_LABEL.to_string(),
            depth: 0,
            expanded: settings_open,
            active: self.active_label == SETTINGS_LABEL,
        });
        if settings_open {
            for leaf in SETTINGS_LEAVES.iter() {
                let label = leaf.fixed_label().unwrap_or_default().to_string();
                rows.push(self.leaf_row(label, leaf.clone(), 1));
            }
        }
        rows
    }

    fn leaf_row(&self, label: String, destination: Destination, depth: usize) -> NavRow {
        NavRow {
            active: self.active_label == label,
            kind: NavRowKind::Leaf(destination),
            label,
            depth,
            expanded: false,
        }
    }

    pub fn phase(&self) -> TreePhase {
        if !self.loaded {
            return TreePhase::Empty;
        }
        match &self.expansion {
            Expansion::Module(id) => TreePhase::ModuleExpanded(id.clone()),
            _ => TreePhase::ModulesLoaded,
        }
    }

    fn has_module(&self, module_id: &str) -> bool {
        self.modules.iter().any(|module| module.id == module_id)
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn modules(&self) -> &[NavModule] {
        &self.modules
    }

    pub fn module(&self, module_id: &str) -> Option<&NavModule> {
        self.modules.iter().find(|module| module.id == module_id)
    }

    pub fn submodules(&self, module_id: &str) -> Option<&[NavSubmodule]> {
        self.submodules_by_module.get(module_id).map(Vec::as_slice)
    }

    pub fn cached_submodule_count(&self) -> usize {
        self.submodules_by_module.values().map(Vec::len).sum()
    }

    pub fn expansion(&self) -> &Expansion {
        &self.expansion
    }

    pub fn expanded_module_id(&self) -> Option<&str> {
        match &self.expansion {
            Expansion::Module(id) => Some(id.as_str()),
            _ => None,
        }
    }

    pub fn settings_open(&self) -> bool {
        self.expansion == Expansion::Settings
    }

    pub fn active_label(&self) -> &str {
        &self.active_label
    }

    pub fn is_loading_modules(&self) -> bool {
        self.pending_modules.is_some()
    }

    pub fn is_loading_submodules(&self, module_id: &str) -> bool {
        self.pending_submodules.contains_key(module_id)
    }

    pub fn last_refresh(&self) -> u64 {
        self.last_refresh
    }

    pub fn last_error(&self) -> Option<&ResourceError> {
        self.last_error.as_ref()
    }
}
