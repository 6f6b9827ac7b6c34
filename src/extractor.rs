/// Turns de-duplicated log lines into typed `Signal`s.
///
/// Game log format (French client):
///
///   "18:39:43,129 - [Information (combat)] Nemen-Arc: Affûtage (+20 Niv.)"
///   "18:40:02,511 - [Information (combat)] Goultard lance le sort Épée de Iop"
///   "18:40:02,530 - [Information (combat)] Goultard se rapproche de 2 cases"
///
/// Every rule is evaluated against every line, so one line can yield several
/// signals. Rules never fail: a line nothing recognises yields nothing.
///
/// Charge is special: its cost depends on how far the caster moved, which the
/// client logs on a later line ("se rapproche de N cases"). The cast is held
/// as a `PendingDeferredAction` until that line shows up or three lines go by,
/// whichever comes first.
use crate::{
    library::{Cost, PatternLibrary, Resource},
    patterns::{self, MatcherChain, VALUE_RANGE},
    state::{CharacterClass, GaugeState, AFFUTAGE, CONCENTRATION, COURROUX, PRECISION, PREPARATION},
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Action whose cost is resolved from a follow-up line.
pub const DEFERRED_ACTION: &str = "Charge";
/// Lines a deferred action may wait before falling back to its default cost.
pub const DEFERRED_LOOKAHEAD: usize = 3;
/// Substring that marks an action name as part of the combo class.
const DOMAIN_MARKER: &str = "iop";
/// Class whose casts feed the combo matcher.
pub const COMBO_CLASS: CharacterClass = CharacterClass::Iop;

const DEBUFF_PENALTY: u32 = 100;
const CLOSES_RANGE: RangeInclusive<u32> = 1..=3;

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    GaugeUpdate {
        class:     CharacterClass,
        gauge:     String,
        old_value: u32,
        new_value: u32,
    },
    ClassDetected {
        class: CharacterClass,
    },
    CombatEnd,
    TurnAdvance,
    /// Debuff penalty applied to a gauge.
    GaugeAdjusted {
        class:     CharacterClass,
        gauge:     String,
        old_value: u32,
        new_value: u32,
    },
    BuffReady {
        class: CharacterClass,
    },
    BuffConsumed {
        class: CharacterClass,
    },
    CounterSet {
        class: CharacterClass,
        value: u32,
    },
    /// One counter unit used; the consumer applies the decrement.
    CounterDecrement {
        class: CharacterClass,
    },
    Cast {
        class:  CharacterClass,
        caster: String,
        action: String,
        /// `None` when the pattern library does not know the action.
        cost:   Option<Cost>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDeferredAction {
    pub action:     String,
    pub caster:     String,
    pub lines_seen: usize,
}

// ---------------------------------------------------------------------------
// Gauge rules
// ---------------------------------------------------------------------------

struct GaugeRule {
    class: CharacterClass,
    gauge: &'static str,
    chain: MatcherChain,
}

static GAUGE_RULES: Lazy<Vec<GaugeRule>> = Lazy::new(|| {
    let spellings: [(CharacterClass, &'static str, &[&str]); 5] = [
        (CharacterClass::Iop, CONCENTRATION, &["Concentration"]),
        (CharacterClass::Iop, COURROUX,      &["Courroux"]),
        (CharacterClass::Iop, PREPARATION,   &["Préparation", "Preparation"]),
        (CharacterClass::Cra, AFFUTAGE,      &["Affûtage", "Affutage"]),
        (CharacterClass::Cra, PRECISION,     &["Précision", "Precision"]),
    ];
    spellings
        .iter()
        .map(|(class, gauge, names)| GaugeRule {
            class: *class,
            gauge: *gauge,
            chain: patterns::gauge_chain(names),
        })
        .collect()
});

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

pub struct Extractor {
    library:       Arc<PatternLibrary>,
    gauges:        GaugeState,
    current_class: Option<CharacterClass>,
    pending:       Option<PendingDeferredAction>,
}

impl Extractor {
    pub fn new(library: Arc<PatternLibrary>) -> Self {
        Self {
            library,
            gauges:        GaugeState::new(),
            current_class: None,
            pending:       None,
        }
    }

    pub fn gauges(&self) -> &GaugeState {
        &self.gauges
    }

    pub fn current_class(&self) -> Option<CharacterClass> {
        self.current_class
    }

    pub fn pending(&self) -> Option<&PendingDeferredAction> {
        self.pending.as_ref()
    }

    /// Extract signals from a single line.
    pub fn extract(&mut self, line: &str) -> Vec<Signal> {
        self.process_batch(&[line])
    }

    /// Extract signals from one poll's worth of lines, in order.
    pub fn process_batch<S: AsRef<str>>(&mut self, lines: &[S]) -> Vec<Signal> {
        let mut out = Vec::new();
        self.advance_pending(lines, &mut out);
        for (idx, line) in lines.iter().enumerate() {
            self.extract_line(line.as_ref(), &lines[idx + 1..], &mut out);
        }
        out
    }

    // -- Manual resets -------------------------------------------------------

    /// Zero every gauge and drop any pending deferred action.
    pub fn reset_all(&mut self) {
        self.gauges.reset_all();
        self.pending = None;
    }

    pub fn reset_class(&mut self, class: CharacterClass) {
        self.gauges.reset_class(class);
        self.pending = None;
    }

    pub fn reset_gauge(&mut self, class: CharacterClass, gauge: &str) -> bool {
        self.pending = None;
        self.gauges.reset_gauge(class, gauge)
    }

    // -- Deferred action -----------------------------------------------------

    /// Age a deferred action carried over from an earlier batch and try to
    /// resolve it against this batch.
    fn advance_pending<S: AsRef<str>>(&mut self, lines: &[S], out: &mut Vec<Signal>) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        pending.lines_seen += lines.len();

        if let Some(squares) = find_closes_distance(lines) {
            self.resolve_pending(Some(squares), out);
        } else if pending.lines_seen >= DEFERRED_LOOKAHEAD {
            tracing::debug!("{} unresolved after {} lines, using default cost", pending.action, pending.lines_seen);
            self.resolve_pending(None, out);
        }
    }

    fn resolve_pending(&mut self, squares: Option<u32>, out: &mut Vec<Signal>) {
        if let Some(pending) = self.pending.take() {
            let cost = deferred_cost(squares);
            self.emit_cast(pending.caster, pending.action, Some(cost), out);
        }
    }

    // -- Per-line rules ------------------------------------------------------

    fn extract_line<S: AsRef<str>>(&mut self, line: &str, rest: &[S], out: &mut Vec<Signal>) {
        if patterns::COMBAT_END.is_match(line) {
            self.reset_all();
            out.push(Signal::CombatEnd);
        }

        if patterns::TURN_ADVANCE.is_match(line) {
            out.push(Signal::TurnAdvance);
        }

        if patterns::DEBUFF_THRESHOLD.is_match(line) {
            self.apply_debuff(out);
        }

        if patterns::BUFF_READY.is_match(line) {
            out.push(Signal::BuffReady { class: CharacterClass::Cra });
        }

        if patterns::BUFF_CONSUMED.is_match(line) {
            out.push(Signal::BuffConsumed { class: CharacterClass::Cra });
        }

        if let Some(value) = patterns::COUNTER_SET.capture_value(line, &VALUE_RANGE) {
            out.push(Signal::CounterSet { class: CharacterClass::Cra, value });
        }

        if patterns::COUNTER_DECREMENT.is_match(line) {
            out.push(Signal::CounterDecrement { class: CharacterClass::Cra });
        } else if let Some((caster, action)) = parse_cast(line) {
            self.handle_cast(caster, action, rest, out);
        }

        self.detect_class_and_gauge(line, out);
    }

    fn apply_debuff(&mut self, out: &mut Vec<Signal>) {
        let class = CharacterClass::Cra;
        let Some(old_value) = self.gauges.get(class, AFFUTAGE) else {
            return;
        };
        if old_value <= DEBUFF_PENALTY {
            return;
        }
        let new_value = old_value - DEBUFF_PENALTY;
        self.gauges.set(class, AFFUTAGE, new_value);
        out.push(Signal::GaugeAdjusted { class, gauge: AFFUTAGE.to_owned(), old_value, new_value });
    }

    fn handle_cast<S: AsRef<str>>(&mut self, caster: String, action: String, rest: &[S], out: &mut Vec<Signal>) {
        if action.eq_ignore_ascii_case(DEFERRED_ACTION) {
            if let Some(prev) = self.pending.take() {
                tracing::debug!("Dropping unresolved {} by {}, superseded", prev.action, prev.caster);
            }
            match find_closes_distance(rest) {
                Some(squares) => self.emit_cast(caster, action, Some(deferred_cost(Some(squares))), out),
                None => {
                    self.pending = Some(PendingDeferredAction { action, caster, lines_seen: 0 });
                }
            }
            return;
        }

        if !self.is_domain_action(&action) {
            return;
        }
        let cost = self.library.cost_of(&action).cloned();
        self.emit_cast(caster, action, cost, out);
    }

    fn is_domain_action(&self, action: &str) -> bool {
        action.to_lowercase().contains(DOMAIN_MARKER) || self.library.cost_of(action).is_some()
    }

    /// Emit a combo-class cast. Casting consumes Préparation, so that gauge
    /// drops to 0 right after the cast.
    fn emit_cast(&mut self, caster: String, action: String, cost: Option<Cost>, out: &mut Vec<Signal>) {
        out.push(Signal::Cast { class: COMBO_CLASS, caster, action, cost });
        if let Some(old_value) = self.gauges.set(COMBO_CLASS, PREPARATION, 0) {
            if old_value != 0 {
                out.push(Signal::GaugeUpdate {
                    class:     COMBO_CLASS,
                    gauge:     PREPARATION.to_owned(),
                    old_value,
                    new_value: 0,
                });
            }
        }
    }

    /// First (class, gauge) rule with an in-range capture wins; one gauge per
    /// line. A gauge names its class outright, so it overrides a class marker
    /// on the same line and at most one `ClassDetected` is emitted.
    fn detect_class_and_gauge(&mut self, line: &str, out: &mut Vec<Signal>) {
        let hit = GAUGE_RULES.iter().find_map(|rule| {
            rule.chain
                .capture_value(line, &VALUE_RANGE)
                .map(|value| (rule.class, rule.gauge, value))
        });

        let class = match hit {
            Some((class, _, _)) => Some(class),
            None => marker_class(line),
        };
        if let Some(class) = class {
            self.set_current_class(class, out);
        }

        if let Some((class, gauge, new_value)) = hit {
            let old_value = self.gauges.set(class, gauge, new_value).unwrap_or(0);
            out.push(Signal::GaugeUpdate { class, gauge: gauge.to_owned(), old_value, new_value });
        }
    }

    fn set_current_class(&mut self, class: CharacterClass, out: &mut Vec<Signal>) {
        if self.current_class != Some(class) {
            self.current_class = Some(class);
            out.push(Signal::ClassDetected { class });
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Caster and cleaned action name of a "lance le sort" line. Parenthesised
/// qualifiers such as "(Critiques)" are dropped; an empty name yields `None`.
pub fn parse_cast(line: &str) -> Option<(String, String)> {
    let caps = patterns::CAST.captures(line)?;
    let caster = caps.get(1).map(|m| m.as_str()).filter(|s| !s.is_empty()).unwrap_or("Unknown");
    let raw = caps.get(2)?.as_str();

    let stripped = patterns::PARENTHESIZED.replace_all(raw, " ");
    let action = stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(|c: char| ".,;:!?".contains(c) || c.is_whitespace())
        .to_owned();

    if action.is_empty() {
        return None;
    }
    Some((caster.to_owned(), action))
}

fn marker_class(line: &str) -> Option<CharacterClass> {
    if patterns::CLASS_IOP.is_match(line) {
        Some(CharacterClass::Iop)
    } else if patterns::CLASS_CRA.is_match(line) {
        Some(CharacterClass::Cra)
    } else {
        None
    }
}

fn find_closes_distance<S: AsRef<str>>(lines: &[S]) -> Option<u32> {
    lines
        .iter()
        .find_map(|l| patterns::CLOSES_DISTANCE.capture_value(l.as_ref(), &CLOSES_RANGE))
}

/// Closing N squares costs N+1 action points; no movement costs 1.
fn deferred_cost(squares: Option<u32>) -> Cost {
    Cost::single(Resource::Action, squares.map_or(1, |n| n + 1))
}
