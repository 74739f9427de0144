// Plain-text rendering of game events for the terminal.

use std::time::Duration;

use trivia_core::model::PlayerId;
use trivia_core::rank::Rank;
use trivia_game::protocol::{GameEvent, GameState, RoundSnapshot, StateMessage};

const HIDDEN: &str = "__________";

/// Whole seconds, rounded up so "0s left" only shows once time is out.
pub fn format_time_left(time_left: Duration) -> String {
    let secs = time_left.as_secs() + u64::from(time_left.subsec_nanos() > 0);
    format!("{secs}s")
}

/// Question header followed by one numbered line per slot. Hidden slots are
/// rendered as blanks.
pub fn format_snapshot(snapshot: &RoundSnapshot) -> String {
    let mut out = format!("[{}] {}?\n", snapshot.question_id, snapshot.question_text);
    for (i, slot) in snapshot.slots.iter().enumerate() {
        let text = slot.text.as_deref().unwrap_or(HIDDEN);
        let line = match (&slot.player_name, slot.text.is_some()) {
            (Some(name), _) => format!("{:>2}. {} ({}) - {}", i + 1, text, slot.score, name),
            (None, true) => format!("{:>2}. {} ({})", i + 1, text, slot.score),
            (None, false) => format!("{:>2}. {}", i + 1, text),
        };
        out.push_str(&line);
        if slot.highlight {
            out.push_str(" *");
        }
        out.push('\n');
    }
    out
}

/// Numbered ranking lines. An empty rank renders as a single notice.
pub fn format_rank(rank: &Rank) -> String {
    if rank.is_empty() {
        return "No scores yet.\n".to_string();
    }
    rank.iter()
        .map(|ps| format!("{:>2}. {:<16} {:>5}\n", ps.position, ps.name, ps.score))
        .collect()
}

/// Text to show for an event, from the point of view of `me`. Events with
/// nothing to show return `None`.
pub fn render_event(event: &GameEvent, me: &PlayerId) -> Option<String> {
    match event {
        GameEvent::State(msg) => Some(render_state(msg)),
        GameEvent::Snapshot(snapshot) => Some(format_snapshot(snapshot)),
        GameEvent::Tick { time_left, .. } => {
            Some(format!("{} left\n", format_time_left(*time_left)))
        }
        GameEvent::WrongAnswer { time_left, .. } => {
            Some(format!("wrong, {} left\n", format_time_left(*time_left)))
        }
        GameEvent::Rank(msg) => {
            let heading = if msg.is_final {
                "Final ranking".to_string()
            } else {
                format!("Ranking after round {}", msg.round)
            };
            let mut out = format!("{heading}\n{}", format_rank(&msg.rank));
            if let Some(mine) = msg.rank.get(me) {
                out.push_str(&format!("Your score: {}\n", mine.score));
            }
            Some(out)
        }
        _ => None,
    }
}

fn render_state(msg: &StateMessage) -> String {
    match msg.state {
        GameState::Created => String::new(),
        GameState::Started => "Game started!\n".to_string(),
        GameState::RoundStarted => {
            let mut out = format!("\nRound {}\n", msg.round);
            if let Some(snapshot) = &msg.snapshot {
                out.push_str(&format_snapshot(snapshot));
                out.push_str(&format!("{} to answer\n", format_time_left(snapshot.time_left)));
            }
            out
        }
        GameState::RoundFinished | GameState::RoundTimeout => {
            let heading = if msg.state == GameState::RoundTimeout {
                "Time's up!"
            } else {
                "All answers found!"
            };
            let mut out = format!("{heading}\n");
            if let Some(snapshot) = &msg.snapshot {
                out.push_str(&format_snapshot(snapshot));
            }
            out
        }
        GameState::Finished => "Game over.\n".to_string(),
    }
}
