/// Consumer side of the snapshot channel.
///
/// The poll worker never touches consumer state: it only sends copies. This
/// task owns the `SignalBoard` (buff flag + counter), applies each snapshot's
/// signals to it in order, and writes one JSON object per snapshot to the
/// given sink (stdout for the binary). Anything that wants to render the
/// tracker's state reads those lines.
use crate::{
    combo::ComboEvent,
    engine::TrackerEvent,
    extractor::Signal,
    state::{CharacterClass, GaugeValues, SignalBoard},
};
use anyhow::Result;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::Receiver;

// ---------------------------------------------------------------------------
// Payload types (serialised as JSON lines)
// ---------------------------------------------------------------------------

/// Everything a consumer needs after one productive poll cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    pub gauges:        GaugeValues,
    pub current_class: Option<CharacterClass>,
    /// This cycle's events, in processing order.
    pub events:        Vec<TrackerEvent>,
}

#[derive(Serialize)]
struct Frame<'a> {
    #[serde(flatten)]
    snapshot: &'a StateSnapshot,
    signals:  &'a SignalBoard,
}

// ---------------------------------------------------------------------------
// Consumer task
// ---------------------------------------------------------------------------

/// Drain snapshots until the worker hangs up. Returns the final board.
pub async fn run<W>(mut snap_rx: Receiver<StateSnapshot>, out: &mut W) -> Result<SignalBoard>
where
    W: AsyncWrite + Unpin,
{
    let mut board = SignalBoard::default();

    while let Some(snap) = snap_rx.recv().await {
        for event in &snap.events {
            apply(&mut board, event);
        }

        let mut line = serde_json::to_vec(&Frame { snapshot: &snap, signals: &board })?;
        line.push(b'\n');
        out.write_all(&line).await?;
        out.flush().await?;
    }

    tracing::info!("Snapshot channel closed, consumer exiting");
    Ok(board)
}

pub fn apply(board: &mut SignalBoard, event: &TrackerEvent) {
    match event {
        TrackerEvent::Log(signal) => match signal {
            Signal::BuffReady { .. }          => board.buff_on(),
            Signal::BuffConsumed { .. }       => board.buff_off(),
            Signal::CounterSet { value, .. }  => board.set_counter(*value),
            Signal::CounterDecrement { .. }   => board.decrement_counter(),
            Signal::CombatEnd                 => board.combat_ended(),
            _ => {}
        },
        TrackerEvent::Manual(_) => board.buff_off(),
        TrackerEvent::Combo(combo) => log_combo(combo),
    }
}

fn log_combo(event: &ComboEvent) {
    match event {
        ComboEvent::ComboStarted { combo_name, active_ids, .. } => {
            tracing::info!("Combo started: {} ({} candidates)", combo_name, active_ids.len());
        }
        ComboEvent::ComboCompleted { combo_name, next_candidate_ids, .. } => {
            tracing::info!("Combo completed: {} (next: {:?})", combo_name, next_candidate_ids);
        }
        ComboEvent::ComboCompletedNoNext { combo_name, .. } => {
            tracing::info!("Combo completed: {}", combo_name);
        }
        ComboEvent::ComboBroken { message } => tracing::info!("Combo broken: {}", message),
        other => tracing::debug!("Combo event: {}", other.kind()),
    }
}
