/// State tracker: the poll worker that drives the whole pipeline.
///
/// On every tick it pulls new lines from the reader, drops duplicates,
/// extracts signals, routes casts into the combo matcher and hands one
/// `StateSnapshot` per productive cycle to the consumer. Manual controls
/// arrive on the same task through a channel, so they are serialised with
/// poll cycles and never mutate state concurrently.
///
/// Routing (per signal, in line order):
///   cast                      → forwarded, then matched (combo lifecycle event)
///   combat end / turn advance → forwarded, then matcher reset (`combo_reset`)
///   anything else             → forwarded as-is
use crate::{
    combo::{ComboEvent, ComboMatcher},
    config::AppConfig,
    dedup::LineDeduplicator,
    extractor::{Extractor, Signal, COMBO_CLASS},
    ipc::StateSnapshot,
    library::PatternLibrary,
    state::CharacterClass,
    tailer::LogReader,
};
use anyhow::Result;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::time::MissedTickBehavior;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// One entry of a snapshot's ordered event list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", content = "event", rename_all = "snake_case")]
pub enum TrackerEvent {
    Log(Signal),
    Combo(ComboEvent),
    Manual(ManualReset),
}

/// A user-initiated reset. No class means everything, no gauge means the
/// whole class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManualReset {
    pub class: Option<CharacterClass>,
    pub gauge: Option<String>,
}

/// Operations marshalled onto the poll worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    ResetAll,
    ResetClass(CharacterClass),
    ResetGauge { class: CharacterClass, gauge: String },
    SetLogPath(PathBuf),
    Shutdown,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    reader:    LogReader,
    dedup:     LineDeduplicator,
    extractor: Extractor,
    matcher:   ComboMatcher,
}

impl Engine {
    pub fn new(library: Arc<PatternLibrary>, reader: LogReader, dedup_window: Duration) -> Self {
        Self {
            reader,
            dedup:     LineDeduplicator::new(dedup_window),
            extractor: Extractor::new(Arc::clone(&library)),
            matcher:   ComboMatcher::new(library),
        }
    }

    pub fn from_config(cfg: &AppConfig, library: Arc<PatternLibrary>) -> Self {
        let reader = if cfg.start_at_end {
            LogReader::at_end(&cfg.log_path)
        } else {
            LogReader::new(&cfg.log_path)
        };
        Self::new(library, reader, cfg.dedup_window())
    }

    pub fn log_path(&self) -> &Path {
        self.reader.path()
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    pub fn matcher(&self) -> &ComboMatcher {
        &self.matcher
    }

    /// Point the reader at another existing file. Tracking state is kept.
    pub fn set_log_path(&mut self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        let ok = self.reader.set_path(&path);
        if !ok {
            tracing::warn!("Log path {:?} does not exist, keeping {:?}", path, self.reader.path());
        }
        ok
    }

    /// One poll cycle. `None` when the cycle produced no events.
    pub fn poll(&mut self) -> Option<StateSnapshot> {
        let lines = match self.reader.read_new_lines() {
            Ok(lines) => lines,
            Err(e) => {
                tracing::warn!("Log read error: {}", e);
                Vec::new()
            }
        };
        if lines.is_empty() {
            return None;
        }
        let events = self.process_lines(&lines, Instant::now());
        (!events.is_empty()).then(|| self.snapshot(events))
    }

    /// Run one batch of raw lines through dedup, extraction and matching.
    pub fn process_lines<S: AsRef<str>>(&mut self, lines: &[S], now: Instant) -> Vec<TrackerEvent> {
        let fresh: Vec<&str> = lines
            .iter()
            .map(AsRef::as_ref)
            .filter(|line| {
                let dup = self.dedup.is_duplicate(line, now);
                if dup {
                    tracing::debug!("Duplicate line dropped: {}", line);
                }
                !dup
            })
            .collect();

        let mut events = Vec::new();
        for signal in self.extractor.process_batch(&fresh) {
            let follow_up = match &signal {
                Signal::Cast { action, cost, .. } => {
                    Some(self.matcher.process_cast(action, cost.as_ref()))
                }
                Signal::CombatEnd | Signal::TurnAdvance => {
                    self.matcher.reset();
                    Some(ComboEvent::ComboReset)
                }
                _ => None,
            };
            events.push(TrackerEvent::Log(signal));
            events.extend(follow_up.map(TrackerEvent::Combo));
        }
        events
    }

    /// Apply a manual control. Resets always yield a snapshot, exactly like
    /// an organically detected reset.
    pub fn apply(&mut self, control: Control) -> Option<StateSnapshot> {
        let mut events = Vec::new();
        match control {
            Control::ResetAll => {
                self.extractor.reset_all();
                self.matcher.reset();
                events.push(TrackerEvent::Manual(ManualReset { class: None, gauge: None }));
                events.push(TrackerEvent::Combo(ComboEvent::ComboReset));
            }
            Control::ResetClass(class) => {
                self.extractor.reset_class(class);
                events.push(TrackerEvent::Manual(ManualReset { class: Some(class), gauge: None }));
                if class == COMBO_CLASS {
                    self.matcher.reset();
                    events.push(TrackerEvent::Combo(ComboEvent::ComboReset));
                }
            }
            Control::ResetGauge { class, gauge } => {
                if !self.extractor.reset_gauge(class, &gauge) {
                    tracing::warn!("Unknown gauge {}/{}", class, gauge);
                }
                events.push(TrackerEvent::Manual(ManualReset { class: Some(class), gauge: Some(gauge) }));
            }
            Control::SetLogPath(path) => {
                self.set_log_path(path);
                return None;
            }
            Control::Shutdown => return None,
        }
        tracing::info!("Manual reset applied");
        Some(self.snapshot(events))
    }

    pub fn snapshot(&self, events: Vec<TrackerEvent>) -> StateSnapshot {
        StateSnapshot {
            gauges:        self.extractor.gauges().values().clone(),
            current_class: self.extractor.current_class(),
            events,
        }
    }
}

// ---------------------------------------------------------------------------
// Poll worker
// ---------------------------------------------------------------------------

/// Poll on a fixed interval until `Shutdown`, until the control channel
/// closes, or until the consumer goes away. A failing cycle is logged and
/// skipped; the loop itself never dies because of one.
pub async fn run(
    mut engine:     Engine,
    mut control_rx: Receiver<Control>,
    snap_tx:        Sender<StateSnapshot>,
    poll_interval:  Duration,
) -> Result<()> {
    tracing::info!("Tracker starting: {:?} every {:?}", engine.log_path(), poll_interval);

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let snap = tokio::select! {
            _ = ticker.tick() => guarded("poll", || engine.poll()),
            control = control_rx.recv() => match control {
                None | Some(Control::Shutdown) => break,
                Some(control) => guarded("control", || engine.apply(control)),
            },
        };

        if let Some(snap) = snap {
            if snap_tx.send(snap).await.is_err() {
                tracing::info!("Snapshot consumer closed");
                break;
            }
        }
    }

    tracing::info!("Tracker stopped");
    Ok(())
}

fn guarded<F>(what: &str, cycle: F) -> Option<StateSnapshot>
where
    F: FnOnce() -> Option<StateSnapshot>,
{
    match catch_unwind(AssertUnwindSafe(cycle)) {
        Ok(snap) => snap,
        Err(_) => {
            tracing::warn!("{} cycle failed, continuing on next tick", what);
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AFFUTAGE, CONCENTRATION, PREPARATION};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const DEFS: &str = r#"{
        "actions": {
            "Bond":           { "cost": { "PM": 1 } },
            "Épée de Iop":    { "cost": { "PA": 3 } },
            "Colère de Iop":  { "cost": { "PA": 3 } }
        },
        "combos": {
            "combo_1": { "name": "Vol de Vie", "sequence": [ {"PM":1}, {"PA":3}, {"PA":3} ] }
        }
    }"#;

    fn engine_on(path: &Path) -> Engine {
        let library = Arc::new(PatternLibrary::from_json(DEFS).unwrap());
        Engine::new(library, LogReader::new(path), Duration::from_millis(500))
    }

    fn kinds(events: &[TrackerEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| match e {
                TrackerEvent::Log(s)    => serde_json::to_value(s).unwrap()["type"].as_str().unwrap().to_owned(),
                TrackerEvent::Combo(c)  => c.kind().to_owned(),
                TrackerEvent::Manual(_) => "manual_reset".to_owned(),
            })
            .collect()
    }

    #[test]
    fn casts_flow_into_matcher_in_line_order() {
        let f = NamedTempFile::new().unwrap();
        let mut engine = engine_on(f.path());
        let events = engine.process_lines(
            &[
                "10:00:00,000 - [Information (combat)] Goultard lance le sort Bond",
                "10:00:01,000 - [Information (combat)] Goultard lance le sort Épée de Iop",
                "10:00:02,000 - [Information (combat)] Goultard lance le sort Colère de Iop",
            ],
            Instant::now(),
        );
        let combo: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                TrackerEvent::Combo(c) => Some(c.kind()),
                _ => None,
            })
            .collect();
        assert_eq!(combo, vec!["combo_started", "combo_progress", "combo_completed_no_next"]);
    }

    #[test]
    fn duplicate_lines_are_extracted_once() {
        let f = NamedTempFile::new().unwrap();
        let mut engine = engine_on(f.path());
        let t0 = Instant::now();
        let events = engine.process_lines(
            &[
                "18:39:43,129 - [Information (combat)] Nemen-Arc: Affûtage (+20 Niv.)",
                "18:39:43,131 - [Information (combat)] Nemen-Arc: Affûtage (+20 Niv.)",
            ],
            t0,
        );
        assert_eq!(kinds(&events), vec!["class_detected", "gauge_update"]);

        let later = engine.process_lines(
            &["18:39:44,000 - [Information (combat)] Nemen-Arc: Affûtage (+20 Niv.)"],
            t0 + Duration::from_millis(600),
        );
        assert_eq!(kinds(&later), vec!["gauge_update"]);
        assert_eq!(engine.extractor().gauges().get(CharacterClass::Cra, AFFUTAGE), Some(20));
    }

    #[test]
    fn turn_advance_resets_matcher() {
        let f = NamedTempFile::new().unwrap();
        let mut engine = engine_on(f.path());
        let t0 = Instant::now();
        engine.process_lines(&["a - Goultard lance le sort Bond"], t0);
        assert!(!engine.matcher().snapshot().is_idle());

        let events = engine.process_lines(&["b - 2 secondes reportées pour le tour suivant"], t0);
        assert_eq!(kinds(&events), vec!["turn_advance", "combo_reset"]);
        assert!(engine.matcher().snapshot().is_idle());
    }

    #[test]
    fn poll_reads_file_and_snapshots() {
        let mut f = NamedTempFile::new().unwrap();
        let mut engine = engine_on(f.path());
        assert!(engine.poll().is_none());

        writeln!(f, "10:00:00,000 - [Information (combat)] Goultard: Concentration (+40 Niv.)").unwrap();
        f.flush().unwrap();
        let snap = engine.poll().unwrap();
        assert_eq!(snap.current_class, Some(CharacterClass::Iop));
        assert_eq!(snap.gauges[&CharacterClass::Iop][CONCENTRATION], 40);
        assert_eq!(kinds(&snap.events), vec!["class_detected", "gauge_update"]);

        // Nothing new, nothing published
        assert!(engine.poll().is_none());

        writeln!(f, "10:00:01,000 - unrelated chatter").unwrap();
        f.flush().unwrap();
        assert!(engine.poll().is_none());
    }

    #[test]
    fn manual_resets() {
        let f = NamedTempFile::new().unwrap();
        let mut engine = engine_on(f.path());
        let t0 = Instant::now();
        engine.process_lines(
            &[
                "a - Goultard: Préparation (+30 Niv.)",
                "b - Goultard lance le sort Bond",
                "c - Nemen-Arc: Affûtage (+50 Niv.)",
            ],
            t0,
        );

        let snap = engine.apply(Control::ResetGauge { class: CharacterClass::Cra, gauge: AFFUTAGE.into() }).unwrap();
        assert_eq!(kinds(&snap.events), vec!["manual_reset"]);
        assert_eq!(snap.gauges[&CharacterClass::Cra][AFFUTAGE], 0);
        assert!(!engine.matcher().snapshot().is_idle());

        let snap = engine.apply(Control::ResetClass(CharacterClass::Cra)).unwrap();
        assert_eq!(kinds(&snap.events), vec!["manual_reset"]);
        assert!(!engine.matcher().snapshot().is_idle());

        let snap = engine.apply(Control::ResetClass(CharacterClass::Iop)).unwrap();
        assert_eq!(kinds(&snap.events), vec!["manual_reset", "combo_reset"]);
        assert!(engine.matcher().snapshot().is_idle());
        assert_eq!(snap.gauges[&CharacterClass::Iop][PREPARATION], 0);

        let snap = engine.apply(Control::ResetAll).unwrap();
        match &snap.events[0] {
            TrackerEvent::Manual(reset) => assert_eq!(reset, &ManualReset { class: None, gauge: None }),
            other => panic!("Wrong event: {:?}", other),
        }

        assert!(engine.apply(Control::Shutdown).is_none());
    }

    #[test]
    fn manual_reset_drops_pending_charge() {
        let f = NamedTempFile::new().unwrap();
        let mut engine = engine_on(f.path());
        engine.process_lines(&["a - Goultard lance le sort Charge"], Instant::now());
        assert!(engine.extractor().pending().is_some());
        engine.apply(Control::ResetGauge { class: CharacterClass::Iop, gauge: CONCENTRATION.into() });
        assert!(engine.extractor().pending().is_none());
    }

    #[test]
    fn set_log_path_requires_existing_file() {
        let f = NamedTempFile::new().unwrap();
        let mut engine = engine_on(f.path());
        let dir = tempfile::tempdir().unwrap();
        assert!(engine.apply(Control::SetLogPath(dir.path().join("nope.txt"))).is_none());
        assert_eq!(engine.log_path(), f.path());

        let other = dir.path().join("other.txt");
        std::fs::write(&other, "x - Nemen-Arc: Précision (+5 Niv.)\n").unwrap();
        assert!(engine.set_log_path(&other));
        assert!(engine.poll().is_some());
    }

    #[test]
    fn events_serialize_with_source_tag() {
        let json = serde_json::to_value(TrackerEvent::Combo(ComboEvent::ComboReset)).unwrap();
        assert_eq!(json["source"], "combo");
        assert_eq!(json["event"]["type"], "combo_reset");

        let json = serde_json::to_value(TrackerEvent::Manual(ManualReset {
            class: Some(CharacterClass::Iop),
            gauge: None,
        }))
        .unwrap();
        assert_eq!(json["source"], "manual");
        assert_eq!(json["event"]["class"], "iop");
    }

    #[tokio::test]
    async fn worker_publishes_and_stops_on_shutdown() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "10:00:00,000 - Goultard: Courroux (+2 Niv.)").unwrap();
        f.flush().unwrap();

        let engine = engine_on(f.path());
        let (control_tx, control_rx) = tokio::sync::mpsc::channel(8);
        let (snap_tx, mut snap_rx) = tokio::sync::mpsc::channel(8);
        let worker = tokio::spawn(run(engine, control_rx, snap_tx, Duration::from_millis(10)));

        let snap = snap_rx.recv().await.unwrap();
        assert_eq!(kinds(&snap.events), vec!["class_detected", "gauge_update"]);

        control_tx.send(Control::ResetAll).await.unwrap();
        let snap = snap_rx.recv().await.unwrap();
        assert_eq!(kinds(&snap.events), vec!["manual_reset", "combo_reset"]);

        control_tx.send(Control::Shutdown).await.unwrap();
        worker.await.unwrap().unwrap();
        assert!(snap_rx.recv().await.is_none());
    }
}
