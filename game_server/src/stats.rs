//! Statistics text: the `/stats` panel, round summaries and trivia.
//!
//! Everything here only formats; the context decides who receives it.

use crate::player::{PlayerStats, Players};

/// Names listed in a "best players" line before it is cut short.
pub const MAX_LISTED_NAMES: usize = 10;
/// Number of trivia categories.
pub const TRIVIA_KINDS: u32 = 8;

/// World units per map tile.
const TILE_SIZE: f32 = 32.0;

/// Full statistics panel sent as a MOTD.
pub fn stats_panel(stats: &PlayerStats) -> String {
    format!(
        "╔════════ Statistics ════════\n\
         ║\n\
         ║Kills(weapon): {}\n\
         ║Hits(By opponent's weapon): {}\n\
         ║\n\
         ║Kills/Deaths: {:4.2}\n\
         ║Shots | Kills/Shots: {} | {:3.1}%\n\
         ║\n\
         ╠═════════ Spikes ═════════\n\
         ║\n\
         ║Kills(normal spikes): {}\n\
         ║Kills(team spikes): {}\n\
         ║Kills(golden spikes): {}\n\
         ║Kills(false spikes): {}\n\
         ║Spike deaths(while frozen): {}\n\
         ║\n\
         ╠══════════ Misc ═════════\n\
         ║\n\
         ║Mates hammer-/unfrozen: {}/{}\n\
         ║\n\
         ╚════════════════════════",
        stats.kills,
        stats.hits,
        stats.kd_ratio(),
        stats.shots,
        stats.accuracy() * 100.0,
        stats.grabs_normal,
        stats.grabs_team,
        stats.grabs_gold,
        stats.grabs_false,
        stats.deaths,
        stats.unfreezing_hammer_hits,
        stats.unfreezes,
    )
}

/// Chat lines each playing client receives when a round ends.
pub fn round_summary(stats: &PlayerStats) -> Vec<String> {
    vec![
        "╔═════════ Statistics ═════════".to_string(),
        "║".to_string(),
        format!("║Kills(weapon): {}", stats.kills),
        format!("║Hits(By opponent's weapon): {}", stats.hits),
        "║".to_string(),
        format!("║Kills/Deaths: {:4.2}", stats.kd_ratio()),
        format!(
            "║Shots | Kills/Shots: {} | {:3.1}%",
            stats.shots,
            stats.accuracy() * 100.0
        ),
        "║".to_string(),
        "╠══════════ Spikes ══════════".to_string(),
        "║".to_string(),
        format!("║Kills(normal spikes): {}", stats.grabs_normal),
        format!("║Kills(team spikes): {}", stats.grabs_team),
        format!("║Kills(golden spikes): {}", stats.grabs_gold),
        format!("║Kills(false spikes): {}", stats.grabs_false),
        format!("║Spike deaths(while frozen): {}", stats.deaths),
        "║".to_string(),
        "╠═══════════ Misc ══════════".to_string(),
        "║".to_string(),
        format!(
            "║Teammates hammered/unfrozen: {} / {}",
            stats.unfreezing_hammer_hits, stats.unfreezes
        ),
        "║".to_string(),
        "╚══════════════════════════".to_string(),
        "Press F1 to view stats now!!".to_string(),
    ]
}

/// Names sharing the highest value. Starts from zero, so an all-zero round
/// lists every player.
fn best_names(players: &Players, value: impl Fn(&PlayerStats) -> f32) -> (f32, Vec<&str>) {
    let mut best = 0.0;
    let mut names = Vec::new();
    for p in players.iter().filter(|p| !p.is_spectator()) {
        let v = value(&p.stats);
        if v > best {
            best = v;
            names.clear();
            names.push(p.name.as_str());
        } else if v == best {
            names.push(p.name.as_str());
        }
    }
    (best, names)
}

fn join_names(names: &[&str]) -> String {
    let mut out = names
        .iter()
        .take(MAX_LISTED_NAMES)
        .copied()
        .collect::<Vec<_>>()
        .join(", ");
    if names.len() > MAX_LISTED_NAMES {
        out.push_str(" and others");
    }
    out
}

/// "Best player(s)" line by K/D ratio.
pub fn best_kd_line(players: &Players) -> Option<String> {
    let (best, names) = best_names(players, PlayerStats::kd_ratio);
    match names.as_slice() {
        [] => None,
        [one] => Some(format!("Best player: {} with a K/D of {:.3}", one, best)),
        many => Some(format!(
            "Best players: {} with a K/D of {:.3}",
            join_names(many),
            best
        )),
    }
}

/// "Best accuracy" line.
pub fn best_accuracy_line(players: &Players) -> Option<String> {
    let (best, names) = best_names(players, PlayerStats::accuracy);
    if names.is_empty() {
        return None;
    }
    Some(format!(
        "Best accuracy: {} with {:3.1}%",
        join_names(&names),
        best * 100.0
    ))
}

fn plural(n: i32) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// First playing client with the strictly highest positive value.
fn top<T: PartialOrd + Default + Copy>(
    players: &Players,
    value: impl Fn(&PlayerStats) -> T,
) -> Option<(&str, T)> {
    let mut best: Option<(&str, T)> = None;
    for p in players.iter().filter(|p| !p.is_spectator()) {
        let v = value(&p.stats);
        let current = best.map_or(T::default(), |(_, b)| b);
        if current < v {
            best = Some((p.name.as_str(), v));
        }
    }
    best
}

/// Trivia line for category `draw` (taken modulo [`TRIVIA_KINDS`]).
pub fn trivia_line(players: &Players, draw: u32, tick_speed: u64) -> String {
    let line = match draw % TRIVIA_KINDS {
        0 => top(players, |s| s.num_jumped).map(|(name, n)| {
            format!("Trivia: {} jumped {} time{} in this round.", name, n, plural(n))
        }),
        1 => top(players, |s| s.num_tiles_moved).map(|(name, d)| {
            format!("Trivia: {} moved {:5.2} tiles in this round.", name, d / TILE_SIZE)
        }),
        2 => top(players, |s| s.num_hooks).map(|(name, n)| {
            format!("Trivia: {} hooked {} time{} in this round.", name, n, plural(n))
        }),
        3 => top(players, |s| s.max_speed).map(|(name, v)| {
            format!(
                "Trivia: {} was the fastest player with {:4.2} tiles per second(no fallspeed).",
                name,
                v * tick_speed as f32 / TILE_SIZE
            )
        }),
        4 => top(players, |s| s.num_tee_collisions).map(|(name, n)| {
            format!("Trivia: {} bounced {} time{} from other players.", name, n, plural(n))
        }),
        5 => top(players, |s| s.num_freeze_ticks).map(|(name, n)| {
            format!(
                "Trivia: {} was frozen for {:4.2} seconds total this round.",
                name,
                n as f32 / tick_speed.max(1) as f32
            )
        }),
        6 => top(players, |s| s.unfreezing_hammer_hits).map(|(name, n)| {
            format!("Trivia: {} hammered {} frozen teammate{}.", name, n, plural(n))
        }),
        _ => top(players, |s| s.num_emotes)
            .map(|(name, n)| format!("Trivia: {} emoted {} time{}.", name, n, plural(n))),
    };
    line.unwrap_or_else(|| {
        "Trivia: Press F1 and use PageUp and PageDown to scroll in the console window".to_string()
    })
}
