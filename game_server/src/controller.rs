//! Game mode rules.
//!
//! The context talks to the rules only through [`GameController`]. One
//! implementation, [`RoundController`], covers every mode; the mode tag
//! switches teamplay, explosive weapons and the pure-tuning rule.

use game_shared::{
    config::GameConfig,
    event::{ClientMask, EventQueue, GameEvent},
    math::Vec2,
    net::ClientId,
    protocol::{GameMsgId, ServerMsg, Team},
    snapshot::{GameStateFlags, SnapItem},
};
use tracing::{debug, info, warn};

use crate::{
    outbox::{Outbox, Recipient},
    player::{PlayerStats, Players},
    snapshot::SnapshotBuilder,
    world::{weapon, GameWorld},
};

/// Supported game modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameMode {
    Fng2,
    Fng2Solo,
    Fng2Boom,
    Fng2BoomSolo,
    Dm,
    Tdm,
    Ctf,
    Lms,
    Lts,
}

impl GameMode {
    pub fn from_name(name: &str) -> Option<GameMode> {
        let mode = match name.trim().to_ascii_lowercase().as_str() {
            "fng2" => GameMode::Fng2,
            "fng2solo" => GameMode::Fng2Solo,
            "fng2boom" => GameMode::Fng2Boom,
            "fng2boomsolo" => GameMode::Fng2BoomSolo,
            "dm" => GameMode::Dm,
            "tdm" => GameMode::Tdm,
            "ctf" => GameMode::Ctf,
            "lms" => GameMode::Lms,
            "lts" => GameMode::Lts,
            _ => return None,
        };
        Some(mode)
    }

    /// Game type string shown to clients.
    pub fn game_type(self, emote_wheel: bool) -> &'static str {
        match (self, emote_wheel) {
            (GameMode::Fng2, false) => "fng2",
            (GameMode::Fng2, true) => "fng2+",
            (GameMode::Fng2Solo, false) => "fng2solo",
            (GameMode::Fng2Solo, true) => "fng2solo+",
            (GameMode::Fng2Boom, false) => "fng2boom",
            (GameMode::Fng2Boom, true) => "fng2boom+",
            (GameMode::Fng2BoomSolo, false) => "fng2boomsolo",
            (GameMode::Fng2BoomSolo, true) => "fng2boomsolo+",
            (GameMode::Dm, _) => "DM",
            (GameMode::Tdm, _) => "TDM",
            (GameMode::Ctf, _) => "CTF",
            (GameMode::Lms, _) => "LMS",
            (GameMode::Lts, _) => "LTS",
        }
    }

    pub fn is_teamplay(self) -> bool {
        matches!(
            self,
            GameMode::Fng2 | GameMode::Fng2Boom | GameMode::Tdm | GameMode::Ctf | GameMode::Lts
        )
    }

    /// Weapons fire grenades.
    pub fn is_boom(self) -> bool {
        matches!(self, GameMode::Fng2Boom | GameMode::Fng2BoomSolo)
    }

    /// Vanilla modes run with default tuning only.
    pub fn is_pure(self) -> bool {
        matches!(
            self,
            GameMode::Dm | GameMode::Tdm | GameMode::Ctf | GameMode::Lms | GameMode::Lts
        )
    }
}

bitflags::bitflags! {
    /// Things the context must react to after a controller tick.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ControllerSignal: u32 {
        const ROUND_STARTED = 1 << 0;
        const ROUND_ENDED = 1 << 1;
        const MAP_CHANGE = 1 << 2;
    }
}

/// Mutable game state lent to the controller for one call.
pub struct ControllerView<'a> {
    pub now: u64,
    pub tick_speed: u64,
    pub config: &'a GameConfig,
    pub players: &'a mut Players,
    pub world: &'a mut GameWorld,
    pub events: &'a mut EventQueue,
    pub outbox: &'a mut Outbox,
    /// Players whose team changed during the call.
    pub team_changes: &'a mut Vec<ClientId>,
}

/// Game mode rules.
pub trait GameController: Send {
    fn mode(&self) -> GameMode;
    fn game_type(&self) -> &'static str;
    fn is_teamplay(&self) -> bool {
        self.mode().is_teamplay()
    }

    fn is_game_running(&self) -> bool;
    fn is_game_over(&self) -> bool;
    fn is_paused(&self) -> bool;
    fn is_team_change_allowed(&self) -> bool;

    fn tick(&mut self, view: &mut ControllerView<'_>) -> ControllerSignal;
    fn snap(&self, builder: &mut SnapshotBuilder);

    fn on_player_connect(&mut self, view: &mut ControllerView<'_>, cid: ClientId);
    fn on_player_disconnect(&mut self, view: &mut ControllerView<'_>, cid: ClientId, reason: &str);
    fn on_player_info_change(&mut self, view: &mut ControllerView<'_>, cid: ClientId);
    fn on_player_ready_change(&mut self, view: &mut ControllerView<'_>, cid: ClientId);
    fn on_player_command(
        &mut self,
        view: &mut ControllerView<'_>,
        cid: ClientId,
        name: &str,
        args: &str,
    );
    /// A weapon hit froze `victim`.
    fn on_character_hit(&mut self, view: &mut ControllerView<'_>, attacker: ClientId, victim: ClientId);
    fn on_character_death(
        &mut self,
        view: &mut ControllerView<'_>,
        victim: ClientId,
        killer: Option<ClientId>,
        weapon: i32,
    );

    fn start_team(&self, players: &Players, config: &GameConfig) -> Team;
    fn can_join_team(&self, players: &Players, config: &GameConfig, cid: ClientId, team: Team) -> bool;
    fn can_change_team(&self, players: &Players, cid: ClientId, team: Team) -> bool;
    fn do_team_change(&mut self, view: &mut ControllerView<'_>, cid: ClientId, team: Team, announce: bool);
    fn swap_team_score(&mut self);
    fn force_team_balance(&mut self, view: &mut ControllerView<'_>);
    fn real_player_num(&self, players: &Players) -> usize {
        players.iter().filter(|p| !p.is_spectator()).count()
    }

    /// `seconds`: 0 resumes, -1 pauses until resumed.
    fn do_pause(&mut self, view: &mut ControllerView<'_>, seconds: i32);
    /// `seconds`: 0 starts a round right away.
    fn do_warmup(&mut self, view: &mut ControllerView<'_>, seconds: i32);
    fn change_map(&mut self, map: &str);
    fn take_map_change(&mut self) -> Option<String>;
    fn check_game_info(&mut self, config: &GameConfig);
}

/// Builds the controller for `sv_gametype`. Unknown names fall back to fng2.
pub fn create_controller(config: &GameConfig) -> Box<dyn GameController> {
    let mode = GameMode::from_name(&config.sv_gametype).unwrap_or_else(|| {
        warn!(gametype = %config.sv_gametype, "unknown game type, using fng2");
        GameMode::Fng2
    });
    Box::new(RoundController::new(mode, config))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GameState {
    Warmup,
    Running,
    Paused,
    RoundOver,
    GameOver,
}

pub struct RoundController {
    mode: GameMode,
    game_type: &'static str,
    state: GameState,
    /// `None` while the current state has no timer.
    state_end: Option<u64>,
    /// State to return to when a pause ends.
    resume_state: GameState,
    round_start_tick: u64,
    score: [i32; 2],
    rounds_played: i32,
    unbalanced_since: Option<u64>,
    pending_map: Option<String>,
    score_limit: i32,
    time_limit: i32,
    matches_per_map: i32,
    teambalance_time: i32,
}

fn team_index(team: Team) -> Option<usize> {
    match team {
        Team::Red => Some(0),
        Team::Blue => Some(1),
        Team::Spectators => None,
    }
}

fn team_name(team: Team, teamplay: bool) -> &'static str {
    match team {
        Team::Spectators => "spectators",
        _ if !teamplay => "game",
        Team::Red => "red team",
        Team::Blue => "blue team",
    }
}

impl RoundController {
    pub fn new(mode: GameMode, config: &GameConfig) -> Self {
        Self {
            mode,
            game_type: mode.game_type(config.sv_emote_wheel != 0),
            state: GameState::Running,
            state_end: None,
            resume_state: GameState::Running,
            round_start_tick: 0,
            score: [0, 0],
            rounds_played: 0,
            unbalanced_since: None,
            pending_map: None,
            score_limit: config.sv_scorelimit,
            time_limit: config.sv_timelimit,
            matches_per_map: config.sv_matches_per_map,
            teambalance_time: config.sv_teambalance_time,
        }
    }

    pub fn team_score(&self, team: Team) -> i32 {
        team_index(team).map_or(0, |i| self.score[i])
    }

    fn timer_done(&self, now: u64) -> bool {
        self.state_end.is_some_and(|end| now >= end)
    }

    fn start_round(&mut self, view: &mut ControllerView<'_>) {
        info!(scope = "game", mode = self.game_type, "start round");
        self.state = GameState::Running;
        self.state_end = None;
        self.round_start_tick = view.now;
        self.score = [0, 0];
        self.unbalanced_since = None;
        view.world.reset();
        view.world.paused = false;
        for p in view.players.iter_mut() {
            p.score = 0;
            p.stats = PlayerStats::default();
            p.ready = false;
            p.respawn_tick = view.now;
            p.was_frozen = false;
        }
    }

    fn end_round(&mut self, view: &mut ControllerView<'_>) {
        info!(scope = "game", red = self.score[0], blue = self.score[1], "round over");
        self.state = GameState::RoundOver;
        self.state_end = Some(view.now + view.tick_speed * view.config.sv_round_end_delay.max(0) as u64);
        view.world.paused = true;
    }

    fn round_finished(&self, view: &ControllerView<'_>) -> bool {
        if self.time_limit > 0
            && view.now >= self.round_start_tick + view.tick_speed * 60 * self.time_limit as u64
        {
            return true;
        }
        if self.score_limit <= 0 {
            return false;
        }
        if self.is_teamplay() {
            self.score.iter().any(|s| *s >= self.score_limit)
        } else {
            view.players.iter().any(|p| p.score >= self.score_limit)
        }
    }

    fn respawn_players(&self, view: &mut ControllerView<'_>) {
        let weapon = if self.mode.is_boom() {
            weapon::GRENADE
        } else {
            weapon::LASER
        };
        for p in view.players.iter_mut() {
            if p.is_spectator() || view.world.has_character(p.cid) || p.respawn_tick > view.now {
                continue;
            }
            let pos = Vec2::new(64.0 * (p.cid.0 as f32 + 1.0), 0.0);
            view.world.spawn_character(p.cid, pos);
            view.events.create(
                GameEvent::Spawn {
                    x: pos.x as i32,
                    y: pos.y as i32,
                },
                ClientMask::ALL,
            );
            view.outbox
                .send(Recipient::Client(p.cid), ServerMsg::WeaponPickup { weapon });
        }
    }

    fn team_counts(players: &Players, exclude: Option<ClientId>) -> [usize; 2] {
        let mut counts = [0, 0];
        for p in players.iter() {
            if Some(p.cid) == exclude {
                continue;
            }
            if let Some(i) = team_index(p.team()) {
                counts[i] += 1;
            }
        }
        counts
    }

    fn check_team_balance(&mut self, view: &mut ControllerView<'_>) {
        if !self.is_teamplay() || self.teambalance_time <= 0 {
            self.unbalanced_since = None;
            return;
        }
        let [red, blue] = Self::team_counts(view.players, None);
        if red.abs_diff(blue) < 2 {
            self.unbalanced_since = None;
            return;
        }
        let since = *self.unbalanced_since.get_or_insert(view.now);
        if view.now >= since + view.tick_speed * 60 * self.teambalance_time as u64 {
            self.force_team_balance(view);
        }
    }

    fn kill(&mut self, view: &mut ControllerView<'_>, cid: ClientId, killer: Option<ClientId>, weapon: i32) {
        if let Some(pos) = view.world.kill_character(cid) {
            view.events.create(
                GameEvent::Death {
                    x: pos.x as i32,
                    y: pos.y as i32,
                    client_id: cid,
                },
                ClientMask::ALL,
            );
            self.on_character_death(view, cid, killer, weapon);
        }
    }
}

impl GameController for RoundController {
    fn mode(&self) -> GameMode {
        self.mode
    }

    fn game_type(&self) -> &'static str {
        self.game_type
    }

    fn is_game_running(&self) -> bool {
        self.state == GameState::Running
    }

    fn is_game_over(&self) -> bool {
        matches!(self.state, GameState::RoundOver | GameState::GameOver)
    }

    fn is_paused(&self) -> bool {
        self.state == GameState::Paused
    }

    fn is_team_change_allowed(&self) -> bool {
        self.state != GameState::GameOver
    }

    fn tick(&mut self, view: &mut ControllerView<'_>) -> ControllerSignal {
        let mut signal = ControllerSignal::empty();
        match self.state {
            GameState::Warmup => {
                if self.timer_done(view.now) {
                    self.start_round(view);
                    signal |= ControllerSignal::ROUND_STARTED;
                }
            }
            GameState::Paused => {
                if self.timer_done(view.now) {
                    self.state = self.resume_state;
                    self.state_end = None;
                    view.world.paused = false;
                }
            }
            GameState::RoundOver => {
                if self.timer_done(view.now) {
                    self.rounds_played += 1;
                    if self.matches_per_map > 0 && self.rounds_played >= self.matches_per_map {
                        self.state = GameState::GameOver;
                        self.state_end = None;
                        if self.pending_map.is_none() {
                            self.pending_map = Some(view.config.sv_map.clone());
                        }
                    } else {
                        self.start_round(view);
                        signal |= ControllerSignal::ROUND_STARTED;
                    }
                }
            }
            GameState::GameOver => {}
            GameState::Running => {
                self.respawn_players(view);
                if self.round_finished(view) {
                    self.end_round(view);
                    signal |= ControllerSignal::ROUND_ENDED;
                } else {
                    self.check_team_balance(view);
                }
            }
        }
        if self.pending_map.is_some() {
            signal |= ControllerSignal::MAP_CHANGE;
        }
        signal
    }

    fn snap(&self, builder: &mut SnapshotBuilder) {
        let mut flags = GameStateFlags::empty();
        match self.state {
            GameState::Warmup => flags |= GameStateFlags::WARMUP,
            GameState::Paused => flags |= GameStateFlags::PAUSED,
            GameState::RoundOver => flags |= GameStateFlags::ROUND_OVER,
            GameState::GameOver => flags |= GameStateFlags::GAME_OVER,
            GameState::Running => {}
        }
        if self.is_teamplay() {
            flags |= GameStateFlags::TEAMPLAY;
        }
        builder.add(SnapItem::GameData {
            flags,
            round_start_tick: self.round_start_tick,
            state_end_tick: self.state_end,
            score_red: self.score[0],
            score_blue: self.score[1],
        });
    }

    fn on_player_connect(&mut self, view: &mut ControllerView<'_>, cid: ClientId) {
        let Some(p) = view.players.get_mut(cid) else {
            return;
        };
        p.respawn_tick = view.now;
        info!(scope = "game", "team_join player='{}:{}' team={}", cid, p.name, p.team().as_i32());
        if !(p.is_spectator() && view.config.sv_silent_spectator_mode != 0) {
            let text = format!(
                "'{}' entered and joined the {}",
                p.name,
                team_name(p.team(), self.is_teamplay())
            );
            view.outbox.chat_all(text);
        }
    }

    fn on_player_disconnect(&mut self, view: &mut ControllerView<'_>, cid: ClientId, reason: &str) {
        self.kill(view, cid, None, weapon::GAME);
        if let Some(p) = view.players.get(cid) {
            info!(scope = "game", "leave player='{}:{}' reason='{}'", cid, p.name, reason);
        }
    }

    fn on_player_info_change(&mut self, view: &mut ControllerView<'_>, cid: ClientId) {
        if let Some(p) = view.players.get(cid) {
            debug!(client_id = %cid, name = %p.name, "player info changed");
        }
    }

    fn on_player_ready_change(&mut self, view: &mut ControllerView<'_>, cid: ClientId) {
        let Some(p) = view.players.get_mut(cid) else {
            return;
        };
        if p.is_spectator() {
            return;
        }
        p.ready = !p.ready;

        let waiting = matches!(self.state, GameState::Warmup | GameState::Paused)
            && self.state_end.is_none();
        let all_ready = view
            .players
            .iter()
            .filter(|p| !p.is_spectator())
            .all(|p| p.ready);
        if waiting && all_ready {
            if self.state == GameState::Warmup {
                self.start_round(view);
            } else {
                self.state = self.resume_state;
                view.world.paused = false;
            }
        }
    }

    fn on_player_command(
        &mut self,
        _view: &mut ControllerView<'_>,
        cid: ClientId,
        name: &str,
        args: &str,
    ) {
        debug!(client_id = %cid, command = name, args, "unhandled player command");
    }

    fn on_character_hit(&mut self, view: &mut ControllerView<'_>, attacker: ClientId, victim: ClientId) {
        let attacker_team = view.players.get(attacker).map(|p| p.team());
        if let Some(p) = view.players.get_mut(attacker) {
            p.score += 1;
        }
        if self.is_teamplay() {
            if let Some(i) = attacker_team.and_then(team_index) {
                self.score[i] += 1;
            }
        }
        debug!(attacker = %attacker, victim = %victim, "freeze hit");
    }

    fn on_character_death(
        &mut self,
        view: &mut ControllerView<'_>,
        victim: ClientId,
        killer: Option<ClientId>,
        weapon: i32,
    ) {
        if let Some(p) = view.players.get_mut(victim) {
            p.respawn_tick = view.now + view.tick_speed / 2;
        }
        if weapon == weapon::GAME {
            return;
        }
        match killer {
            Some(k) if k != victim => {
                if let Some(p) = view.players.get_mut(k) {
                    p.score += 1;
                }
            }
            _ => {
                if let Some(p) = view.players.get_mut(victim) {
                    p.score -= 1;
                }
            }
        }
        info!(
            scope = "game",
            "kill killer='{}' victim='{}' weapon={}",
            killer.map_or(-1, |k| k.0 as i64),
            victim,
            weapon
        );
    }

    fn start_team(&self, players: &Players, config: &GameConfig) -> Team {
        if config.sv_tournament_mode != 0 {
            return Team::Spectators;
        }
        let [red, blue] = Self::team_counts(players, None);
        if red + blue >= config.sv_player_slots.max(0) as usize {
            return Team::Spectators;
        }
        if self.is_teamplay() && blue < red {
            Team::Blue
        } else {
            Team::Red
        }
    }

    fn can_join_team(&self, players: &Players, config: &GameConfig, cid: ClientId, team: Team) -> bool {
        if team.is_spectator() {
            return true;
        }
        let [red, blue] = Self::team_counts(players, Some(cid));
        red + blue < config.sv_player_slots.max(0) as usize
    }

    fn can_change_team(&self, players: &Players, cid: ClientId, team: Team) -> bool {
        let Some(join) = team_index(team) else {
            return true;
        };
        if !self.is_teamplay() {
            return true;
        }
        let counts = Self::team_counts(players, Some(cid));
        counts[join] <= counts[join ^ 1]
    }

    fn do_team_change(&mut self, view: &mut ControllerView<'_>, cid: ClientId, team: Team, announce: bool) {
        let Some(p) = view.players.get(cid) else {
            return;
        };
        if p.team() == team {
            return;
        }
        self.kill(view, cid, None, weapon::GAME);

        let teamplay = self.is_teamplay();
        let Some(p) = view.players.get_mut(cid) else {
            return;
        };
        p.set_team(team);
        view.team_changes.push(cid);
        p.ready = false;
        p.respawn_tick = view.now + view.tick_speed / 2;
        info!(scope = "game", "team_join player='{}:{}' team={}", cid, p.name, team.as_i32());
        if announce {
            let text = format!("'{}' joined the {}", p.name, team_name(team, teamplay));
            view.outbox.chat_all(text);
        }
    }

    fn swap_team_score(&mut self) {
        self.score.swap(0, 1);
    }

    fn force_team_balance(&mut self, view: &mut ControllerView<'_>) {
        if !self.is_teamplay() {
            return;
        }
        loop {
            let [red, blue] = Self::team_counts(view.players, None);
            if red.abs_diff(blue) < 2 {
                break;
            }
            let (from, to) = if red > blue {
                (Team::Red, Team::Blue)
            } else {
                (Team::Blue, Team::Red)
            };
            let Some(victim) = view
                .players
                .iter()
                .filter(|p| p.team() == from)
                .min_by_key(|p| p.score)
                .map(|p| p.cid)
            else {
                break;
            };
            self.do_team_change(view, victim, to, false);
            view.outbox.send(
                Recipient::Client(victim),
                ServerMsg::GameMsg {
                    id: GameMsgId::TeamBalanceVictim,
                    params: vec![to.as_i32()],
                },
            );
        }
        self.unbalanced_since = None;
        view.outbox.send(
            Recipient::All,
            ServerMsg::GameMsg {
                id: GameMsgId::TeamBalance,
                params: vec![],
            },
        );
    }

    fn do_pause(&mut self, view: &mut ControllerView<'_>, seconds: i32) {
        if seconds == 0 {
            if self.state == GameState::Paused {
                self.state = self.resume_state;
                self.state_end = None;
                view.world.paused = false;
            }
            return;
        }
        if matches!(self.state, GameState::Running | GameState::Warmup) {
            self.resume_state = self.state;
        } else if self.state != GameState::Paused {
            return;
        }
        self.state = GameState::Paused;
        self.state_end = (seconds > 0).then(|| view.now + view.tick_speed * seconds as u64);
        view.world.paused = true;
        view.outbox.send(
            Recipient::All,
            ServerMsg::GameMsg {
                id: GameMsgId::GamePaused,
                params: vec![seconds],
            },
        );
    }

    fn do_warmup(&mut self, view: &mut ControllerView<'_>, seconds: i32) {
        if seconds <= 0 {
            self.start_round(view);
            return;
        }
        self.state = GameState::Warmup;
        self.state_end = Some(view.now + view.tick_speed * seconds as u64);
        view.world.paused = false;
    }

    fn change_map(&mut self, map: &str) {
        self.pending_map = Some(map.to_string());
    }

    fn take_map_change(&mut self) -> Option<String> {
        self.pending_map.take()
    }

    fn check_game_info(&mut self, config: &GameConfig) {
        self.score_limit = config.sv_scorelimit;
        self.time_limit = config.sv_timelimit;
        self.matches_per_map = config.sv_matches_per_map;
        self.teambalance_time = config.sv_teambalance_time;
    }
}
