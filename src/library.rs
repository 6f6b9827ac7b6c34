/// Pattern library: action costs and combo sequences.
///
/// The definitions document is JSON with two top-level tables:
///
///   {
///     "actions": { "Épée de Iop": { "cost": { "PA": 3 }, "icon": "epee.png" } },
///     "combos":  { "combo_1": { "name": "Vol de Vie", "sequence": [ { "PM": 1 }, { "PA": 3 } ] } }
///   }
///
/// The legacy French keys (`sorts`, `cout`, `icone`, `nom`) are accepted as
/// aliases so older definition files keep loading.
///
/// Loading is fail-soft: `PatternLibrary::load_or_default` is the one place a
/// missing or broken document collapses to the built-in five-combo set.
/// The library is read-only after load and shared behind an `Arc`.
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Embedded defaults
// ---------------------------------------------------------------------------

const BUILTIN_DEFINITIONS: &str = include_str!("../data/default_combos.json");

// ---------------------------------------------------------------------------
// Cost
// ---------------------------------------------------------------------------

/// Resource dimensions a cost can draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Resource {
    #[serde(rename = "PA")]
    Action,
    #[serde(rename = "PM")]
    Movement,
    #[serde(rename = "PW")]
    Wakfu,
}

impl Resource {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Action   => "PA",
            Self::Movement => "PM",
            Self::Wakfu    => "PW",
        }
    }
}

/// Immutable resource cost. Zero amounts are never stored, so two costs are
/// equal exactly when their non-zero dimension → amount mappings are equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "BTreeMap<Resource, u32>")]
pub struct Cost(BTreeMap<Resource, u32>);

impl Cost {
    pub fn new(pairs: impl IntoIterator<Item = (Resource, u32)>) -> Self {
        Self(pairs.into_iter().filter(|(_, amount)| *amount > 0).collect())
    }

    pub fn single(resource: Resource, amount: u32) -> Self {
        Self::new([(resource, amount)])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<Resource, u32>> for Cost {
    fn from(map: BTreeMap<Resource, u32>) -> Self {
        Self::new(map)
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (resource, amount)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", resource.tag(), amount)?;
        }
        write!(f, "}}")
    }
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActionDefinition {
    #[serde(alias = "cout", default)]
    pub cost: Cost,
    /// Opaque display reference; the engine never interprets it.
    #[serde(alias = "icone", default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ComboDefinition {
    #[serde(alias = "nom", default)]
    pub name:     String,
    pub sequence: Vec<Cost>,
}

impl ComboDefinition {
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Expected cost at zero-based `step`, or `None` past the end.
    pub fn step(&self, step: usize) -> Option<&Cost> {
        self.sequence.get(step)
    }
}

#[derive(Deserialize)]
struct DefinitionsFile {
    #[serde(alias = "sorts", default)]
    actions: HashMap<String, ActionDefinition>,
    #[serde(default)]
    combos:  BTreeMap<String, ComboDefinition>,
}

#[derive(Debug, Error)]
pub enum DefinitionsError {
    #[error("cannot read definitions: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed definitions: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("combo '{0}' has an empty sequence")]
    EmptySequence(String),
}

// ---------------------------------------------------------------------------
// PatternLibrary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct PatternLibrary {
    actions: HashMap<String, ActionDefinition>,
    /// BTreeMap so iteration follows the sorted identifier order used for
    /// every primary-candidate tie-break.
    combos:  BTreeMap<String, ComboDefinition>,
}

impl PatternLibrary {
    pub fn from_json(raw: &str) -> Result<Self, DefinitionsError> {
        let file: DefinitionsFile = serde_json::from_str(raw)?;
        if let Some((id, _)) = file.combos.iter().find(|(_, c)| c.is_empty()) {
            return Err(DefinitionsError::EmptySequence(id.clone()));
        }
        Ok(Self { actions: file.actions, combos: file.combos })
    }

    pub fn load(path: &Path) -> Result<Self, DefinitionsError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Fallback policy: any failure to load `path` yields the built-in set.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(lib) => {
                tracing::info!(
                    "Definitions loaded from {:?}: {} actions, {} combos",
                    path, lib.actions.len(), lib.combos.len()
                );
                lib
            }
            Err(e) => {
                tracing::warn!("Definitions unavailable ({}), using built-in combos", e);
                Self::builtin()
            }
        }
    }

    /// The five built-in example combos, no actions.
    pub fn builtin() -> Self {
        Self::from_json(BUILTIN_DEFINITIONS).unwrap_or_else(|e| {
            tracing::error!("Embedded definitions are invalid: {}", e);
            Self::default()
        })
    }

    pub fn cost_of(&self, action: &str) -> Option<&Cost> {
        self.actions.get(action).map(|a| &a.cost)
    }

    pub fn icon_of(&self, action: &str) -> Option<&str> {
        self.actions.get(action)?.icon.as_deref()
    }

    pub fn definition(&self, combo_id: &str) -> Option<&ComboDefinition> {
        self.combos.get(combo_id)
    }

    /// All combo ids in sorted order.
    pub fn combo_ids(&self) -> Vec<String> {
        self.combos.keys().cloned().collect()
    }

    /// Ids of every combo whose first step is exactly `cost`, in sorted order.
    pub fn combos_starting_with(&self, cost: &Cost) -> Vec<String> {
        self.combos
            .iter()
            .filter(|(_, c)| c.step(0) == Some(cost))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Every combo id not contained in `shown`, in sorted order.
    pub fn complement_of(&self, shown: &[String]) -> Vec<String> {
        let shown: BTreeSet<&str> = shown.iter().map(String::as_str).collect();
        self.combos
            .keys()
            .filter(|id| !shown.contains(id.as_str()))
            .cloned()
            .collect()
    }
}
