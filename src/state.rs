/// Gauge model. Owned by the extractor on the poll worker, copied into
/// every snapshot for the consumer.
///
/// Gauges are absolute: the log reports the current value ("+20 Niv." means
/// the gauge now reads 20), so an update always replaces, never adds.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Character classes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharacterClass {
    Iop,
    Cra,
}

impl CharacterClass {
    pub const ALL: [CharacterClass; 2] = [Self::Iop, Self::Cra];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Iop => "iop",
            Self::Cra => "cra",
        }
    }

    /// Gauges tracked for this class, in detection priority order.
    pub fn gauges(self) -> &'static [&'static str] {
        match self {
            Self::Iop => &[CONCENTRATION, COURROUX, PREPARATION],
            Self::Cra => &[AFFUTAGE, PRECISION],
        }
    }
}

impl fmt::Display for CharacterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CharacterClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "iop"         => Ok(Self::Iop),
            "cra" | "crâ" => Ok(Self::Cra),
            other         => Err(format!("unknown class '{}'", other)),
        }
    }
}

pub const CONCENTRATION: &str = "Concentration";
pub const COURROUX:      &str = "Courroux";
pub const PREPARATION:   &str = "Préparation";
pub const AFFUTAGE:      &str = "Affûtage";
pub const PRECISION:     &str = "Précision";

// ---------------------------------------------------------------------------
// GaugeState
// ---------------------------------------------------------------------------

pub type GaugeValues = BTreeMap<CharacterClass, BTreeMap<String, u32>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GaugeState {
    values: GaugeValues,
}

impl Default for GaugeState {
    fn default() -> Self {
        Self::new()
    }
}

impl GaugeState {
    /// Every known gauge of every class at 0.
    pub fn new() -> Self {
        let values = CharacterClass::ALL
            .iter()
            .map(|class| {
                let gauges = class.gauges().iter().map(|g| ((*g).to_owned(), 0)).collect();
                (*class, gauges)
            })
            .collect();
        Self { values }
    }

    pub fn get(&self, class: CharacterClass, gauge: &str) -> Option<u32> {
        self.values.get(&class)?.get(gauge).copied()
    }

    /// Replace a gauge's value, returning the previous one. Unknown gauges are ignored.
    pub fn set(&mut self, class: CharacterClass, gauge: &str, value: u32) -> Option<u32> {
        let slot = self.values.get_mut(&class)?.get_mut(gauge)?;
        Some(std::mem::replace(slot, value))
    }

    pub fn reset_all(&mut self) {
        for gauges in self.values.values_mut() {
            gauges.values_mut().for_each(|v| *v = 0);
        }
    }

    pub fn reset_class(&mut self, class: CharacterClass) {
        if let Some(gauges) = self.values.get_mut(&class) {
            gauges.values_mut().for_each(|v| *v = 0);
        }
    }

    /// Returns false when the gauge is unknown for `class`.
    pub fn reset_gauge(&mut self, class: CharacterClass, gauge: &str) -> bool {
        self.set(class, gauge, 0).is_some()
    }

    pub fn values(&self) -> &GaugeValues {
        &self.values
    }
}

// ---------------------------------------------------------------------------
// SignalBoard: consumer-side toggles and counters
// ---------------------------------------------------------------------------

/// Buff flag and counter kept by the consumer. The extractor only reports
/// triggers; applying them (including the decrement) happens here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SignalBoard {
    pub buff_ready: bool,
    pub counter:    u32,
}

impl SignalBoard {
    pub fn buff_on(&mut self) {
        self.buff_ready = true;
    }

    pub fn buff_off(&mut self) {
        self.buff_ready = false;
    }

    pub fn set_counter(&mut self, value: u32) {
        self.counter = value;
    }

    pub fn decrement_counter(&mut self) {
        self.counter = self.counter.saturating_sub(1);
    }

    pub fn combat_ended(&mut self) {
        self.buff_ready = false;
        self.counter    = 0;
    }
}
