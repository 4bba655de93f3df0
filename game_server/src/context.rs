//! The game context: owner of every game subsystem.
//!
//! A [`GameContext`] holds the players, the world, the active game mode, the
//! vote machine and everything queued for the network. The network layer
//! feeds it messages and ticks; nothing in here blocks or touches sockets.
//!
//! Behaviour is split over several files that all extend this type:
//! - `router`: inbound client messages
//! - `chat_commands`: slash commands typed into chat
//! - `console`: the admin console
//! - `tick`: the per-tick schedule and snapshots

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::net::IpAddr;

use game_shared::{
    config::GameConfig,
    event::{sound, ClientMask, EventQueue, GameEvent},
    math::{mix, Vec2},
    net::ClientId,
    protocol::{
        ChatMode, Emoticon, GameMsgId, ServerMsg, ServerSettings, Team, VoteSetKind,
    },
    tuning::TuningParams,
    MAX_CLIENTS,
};
use rand::{rngs::StdRng, SeedableRng};
use tracing::{debug, info};

use crate::{
    bans::BanList,
    chat_commands::{self, ChatCommandFn},
    command::CommandTable,
    console::ExecSource,
    controller::{create_controller, GameController},
    outbox::{Outbox, Outgoing, Recipient},
    player::{Player, Players},
    snapshot::SnapshotBuilder,
    vote::VoteState,
    vote_options::VoteOptionCatalog,
    world::GameWorld,
};

/// Lines kept from the admin console output.
pub const CONSOLE_BACKLOG: usize = 256;

/// Explosion reach and strength.
const EXPLOSION_RADIUS: f32 = 135.0;
const EXPLOSION_INNER_RADIUS: f32 = 48.0;
const EXPLOSION_MAX_FORCE: f32 = 12.0;

/// Builds a [`ControllerView`] from the context's fields, leaving
/// `controller` free to be borrowed alongside it.
macro_rules! controller_view {
    ($ctx:expr) => {
        $crate::controller::ControllerView {
            now: $ctx.tick,
            tick_speed: $ctx.tick_speed,
            config: &$ctx.config,
            players: &mut $ctx.players,
            world: &mut $ctx.world,
            events: &mut $ctx.events,
            outbox: &mut $ctx.outbox,
            team_changes: &mut $ctx.team_changes,
        }
    };
}
pub(crate) use controller_view;

fn recipient(to: Option<ClientId>) -> Recipient {
    to.map_or(Recipient::All, Recipient::Client)
}

pub struct GameContext {
    pub(crate) config: GameConfig,
    pub(crate) tick_speed: u64,
    pub(crate) tick: u64,

    pub(crate) players: Players,
    pub(crate) world: GameWorld,
    pub(crate) controller: Box<dyn GameController>,
    pub(crate) events: EventQueue,
    pub(crate) tuning: TuningParams,

    pub(crate) vote: VoteState,
    pub(crate) vote_options: VoteOptionCatalog,
    pub(crate) commands: CommandTable<ChatCommandFn>,

    pub(crate) outbox: Outbox,
    pub(crate) snap: SnapshotBuilder,
    pub(crate) team_changes: Vec<ClientId>,
    /// Scratch list for area queries.
    pub(crate) hit_scratch: Vec<(ClientId, Vec2)>,

    pub(crate) lock_teams: bool,
    /// A demo recorder consumes the shared view.
    pub(crate) recording: bool,
    pub(crate) bans: BanList,
    /// Players whose drop was refused; retried by the network layer.
    pub(crate) pending_drops: Vec<(ClientId, String)>,

    pub(crate) console_output: VecDeque<String>,
    pub(crate) exec_source: ExecSource,
    pub(crate) invalid_messages: u64,
    pub(crate) last_invalid_log: Option<u64>,
    pub(crate) rng: StdRng,
}

impl GameContext {
    pub fn new(config: GameConfig, tick_speed: u64) -> Self {
        Self::with_rng(config, tick_speed, StdRng::from_entropy())
    }

    /// Deterministic context for tests and replays.
    pub fn with_seed(config: GameConfig, tick_speed: u64, seed: u64) -> Self {
        Self::with_rng(config, tick_speed, StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut config: GameConfig, tick_speed: u64, rng: StdRng) -> Self {
        config.sv_player_slots = config.sv_player_slots.min(config.sv_max_clients);
        let controller = create_controller(&config);
        let mut ctx = Self {
            tick_speed: tick_speed.max(1),
            tick: 0,
            players: Players::default(),
            world: GameWorld::default(),
            controller,
            events: EventQueue::default(),
            tuning: TuningParams::default(),
            vote: VoteState::default(),
            vote_options: VoteOptionCatalog::default(),
            commands: CommandTable::default(),
            outbox: Outbox::default(),
            snap: SnapshotBuilder::default(),
            team_changes: Vec::with_capacity(MAX_CLIENTS),
            hit_scratch: Vec::with_capacity(MAX_CLIENTS),
            lock_teams: false,
            recording: false,
            bans: BanList::default(),
            pending_drops: Vec::new(),
            console_output: VecDeque::with_capacity(CONSOLE_BACKLOG),
            exec_source: ExecSource::Server,
            invalid_messages: 0,
            last_invalid_log: None,
            rng,
            config,
        };
        chat_commands::register(&mut ctx.commands, &ctx.config);
        info!(
            scope = "server",
            gametype = ctx.controller.game_type(),
            map = %ctx.config.sv_map,
            "game context ready"
        );
        ctx.spawn_debug_dummies();
        ctx
    }

    /// Rebuilds the game for a new map. Vote options, tuning and bans
    /// survive; connected clients are put back in the handshake and must
    /// enter again.
    pub fn reset(&mut self) {
        let vote_options = std::mem::take(&mut self.vote_options);
        let tuning = self.tuning;
        let returning: Vec<(ClientId, Option<IpAddr>, bool)> = self
            .players
            .iter()
            .filter(|p| !p.dummy)
            .map(|p| (p.cid, p.addr, p.authed))
            .collect();

        let mut fresh = Self::with_rng(
            self.config.clone(),
            self.tick_speed,
            StdRng::from_rng(&mut self.rng).unwrap_or_else(|_| StdRng::seed_from_u64(self.tick)),
        );
        fresh.vote_options = vote_options;
        fresh.tuning = tuning;
        fresh.bans = std::mem::take(&mut self.bans);
        fresh.recording = self.recording;
        fresh.lock_teams = false;
        fresh.console_output = std::mem::take(&mut self.console_output);
        *self = fresh;

        for (cid, addr, authed) in returning {
            self.on_client_connected(cid, addr, false, false);
            if let Some(p) = self.players.get_mut(cid) {
                p.authed = authed;
            }
        }
    }

    fn spawn_debug_dummies(&mut self) {
        let max = self.config.sv_max_clients.clamp(1, MAX_CLIENTS as i32) as u32;
        let count = (self.config.dbg_dummies.max(0) as u32).min(max);
        for i in 0..count {
            let cid = ClientId(max - i - 1);
            self.on_client_connected(cid, None, true, false);
            if let Some(p) = self.players.get_mut(cid) {
                p.name = format!("dummy {}", i + 1);
                p.ready_to_enter = true;
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn tick_speed(&self) -> u64 {
        self.tick_speed
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn players(&self) -> &Players {
        &self.players
    }

    pub fn player(&self, cid: ClientId) -> Option<&Player> {
        self.players.get(cid)
    }

    pub fn world(&self) -> &GameWorld {
        &self.world
    }

    pub fn controller(&self) -> &dyn GameController {
        self.controller.as_ref()
    }

    pub fn tuning(&self) -> &TuningParams {
        &self.tuning
    }

    pub fn vote(&self) -> &VoteState {
        &self.vote
    }

    pub fn vote_options(&self) -> &VoteOptionCatalog {
        &self.vote_options
    }

    pub fn commands(&self) -> &CommandTable<ChatCommandFn> {
        &self.commands
    }

    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    pub fn bans(&self) -> &BanList {
        &self.bans
    }

    pub fn teams_locked(&self) -> bool {
        self.lock_teams
    }

    /// Messages dropped because they failed validation.
    pub fn invalid_messages(&self) -> u64 {
        self.invalid_messages
    }

    pub fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
    }

    pub fn set_authed(&mut self, cid: ClientId, authed: bool) {
        if let Some(p) = self.players.get_mut(cid) {
            p.authed = authed;
        }
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Hands everything queued since the last call to the network layer.
    pub fn drain_outgoing(&mut self) -> Vec<Outgoing> {
        self.outbox.drain().collect()
    }

    /// Drops refused earlier, to be retried.
    pub fn take_pending_drops(&mut self) -> Vec<(ClientId, String)> {
        std::mem::take(&mut self.pending_drops)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Output helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Console print: logged and kept for the console caller.
    pub(crate) fn print(&mut self, scope: &'static str, line: impl Into<String>) {
        let line = line.into();
        info!(scope, "{}", line);
        if self.console_output.len() >= CONSOLE_BACKLOG {
            self.console_output.pop_front();
        }
        self.console_output.push_back(line);
    }

    /// Server chat line to one client, or everyone for `None`.
    pub fn send_chat_target(&mut self, to: Option<ClientId>, text: impl Into<String>) {
        let text = text.into();
        match to {
            Some(cid) => self.outbox.chat_to(cid, text),
            None => self.outbox.chat_all(text),
        }
    }

    /// Chat from a player (`Some`) or the server (`None`).
    pub fn send_chat(
        &mut self,
        chatter: Option<ClientId>,
        mode: ChatMode,
        target: Option<ClientId>,
        text: &str,
    ) {
        match chatter {
            Some(cid) => {
                let name = self.players.get(cid).map_or("", |p| p.name.as_str());
                info!(scope = "chat", "{}:{}:{}: {}", cid, mode as i32, name, text);
            }
            None => info!(scope = "chat", "*** {}", text),
        }

        let msg = ServerMsg::Chat {
            mode,
            client_id: chatter,
            target_id: None,
            message: text.to_string(),
        };
        match mode {
            ChatMode::All | ChatMode::None => self.outbox.send(Recipient::All, msg),
            ChatMode::Team => {
                let team = chatter.and_then(|c| self.players.get(c)).map(|p| p.team());
                let mates: Vec<ClientId> = self
                    .players
                    .iter()
                    .filter(|p| Some(p.team()) == team)
                    .map(|p| p.cid)
                    .collect();
                for cid in mates {
                    self.outbox.send(Recipient::Client(cid), msg.clone());
                }
                if self.recording {
                    self.outbox.send(Recipient::Demo, msg);
                }
            }
            ChatMode::Whisper => {
                let msg = ServerMsg::Chat {
                    mode,
                    client_id: chatter,
                    target_id: target,
                    message: text.to_string(),
                };
                for cid in [chatter, target].into_iter().flatten() {
                    self.outbox.send(Recipient::Client(cid), msg.clone());
                }
            }
        }
    }

    pub fn send_broadcast(&mut self, text: &str, to: Option<ClientId>) {
        self.outbox.send(
            recipient(to),
            ServerMsg::Broadcast {
                message: text.to_string(),
            },
        );
    }

    pub fn send_emoticon(&mut self, cid: ClientId, emoticon: Emoticon) {
        self.outbox.send(
            Recipient::All,
            ServerMsg::Emoticon {
                client_id: cid,
                emoticon,
            },
        );
    }

    pub fn send_motd(&mut self, to: Option<ClientId>) {
        let message = self.config.sv_motd.clone();
        self.outbox.send(recipient(to), ServerMsg::Motd { message });
    }

    pub fn send_settings(&mut self, to: Option<ClientId>) {
        let settings = ServerSettings {
            kick_vote: self.config.sv_vote_kick != 0,
            kick_min: self.config.sv_vote_kick_min,
            spec_vote: self.config.sv_vote_spectate != 0,
            team_lock: self.lock_teams,
            team_balance: self.config.sv_teambalance_time != 0,
            player_slots: self.config.sv_player_slots,
        };
        self.outbox
            .send(recipient(to), ServerMsg::ServerSettings(settings));
    }

    pub fn send_game_msg(&mut self, id: GameMsgId, params: Vec<i32>, to: Option<ClientId>) {
        self.outbox
            .send(recipient(to), ServerMsg::GameMsg { id, params });
    }

    /// Current vote state, or an empty `VoteSet` once it closed.
    pub fn send_vote_set(&mut self, kind: VoteSetKind, to: Option<ClientId>) {
        let msg = match self.vote.active() {
            Some(active) => ServerMsg::VoteSet {
                client_id: self.vote.creator,
                kind,
                timeout: self.vote.timeout_secs(self.tick, self.tick_speed),
                description: active.description.clone(),
                reason: active.reason.clone(),
            },
            None => ServerMsg::VoteSet {
                client_id: self.vote.creator,
                kind,
                timeout: 0,
                description: String::new(),
                reason: String::new(),
            },
        };
        self.outbox.send(recipient(to), msg);
    }

    pub fn send_tuning_params(&mut self, to: Option<ClientId>) {
        let params = self.tuning.to_wire().to_vec();
        self.outbox.send(recipient(to), ServerMsg::TuneParams { params });
    }

    /// Movement-free tuning for a frozen player.
    pub fn send_fake_tuning_params(&mut self, cid: ClientId) {
        let params = TuningParams::frozen().to_wire().to_vec();
        self.outbox
            .send(Recipient::Client(cid), ServerMsg::TuneParams { params });
    }

    /// Pure modes run with default tuning only.
    pub fn check_pure_tuning(&mut self) {
        if self.controller.mode().is_pure() && !self.tuning.is_default() {
            self.tuning = TuningParams::default();
            self.print("server", "resetting tuning due to pure server");
            self.send_tuning_params(None);
        }
    }

    pub(crate) fn client_info_msg(&self, p: &Player, local: bool) -> ServerMsg {
        ServerMsg::ClientInfo {
            client_id: p.cid,
            local,
            team: p.team(),
            name: p.name.clone(),
            clan: p.clan.clone(),
            country: p.country,
            silent: self.config.sv_silent_spectator_mode != 0 && p.is_spectator(),
            skin: p.skin.clone(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────────

    /// Players on `team`, as an event mask.
    fn team_mask(&self, team: Team, exclude: Option<ClientId>) -> ClientMask {
        let mut mask = ClientMask::NONE;
        for p in self.players.iter() {
            if p.team() == team && Some(p.cid) != exclude {
                mask.insert(p.cid);
            }
        }
        mask
    }

    /// Damage indicator fanned out around `angle`.
    pub fn create_damage_ind(
        &mut self,
        pos: Vec2,
        angle: f32,
        amount: i32,
        team: Team,
        from: Option<ClientId>,
    ) {
        let a = 3.0 * PI / 2.0 + angle;
        let s = a - PI / 3.0;
        let e = a + PI / 3.0;
        let f = mix(s, e, (amount as f32 / 2.0 + 1.0) / (amount as f32 + 2.0));

        let mask = if self.controller.is_teamplay() {
            self.team_mask(team, None)
        } else {
            from.map_or(ClientMask::NONE, ClientMask::one)
        };
        self.events.create(
            GameEvent::Damage {
                x: pos.x as i32,
                y: pos.y as i32,
                angle: (f * 256.0) as i32,
                amount,
                from,
            },
            mask,
        );
    }

    pub fn create_hammer_hit(&mut self, pos: Vec2) {
        self.events.create(
            GameEvent::HammerHit {
                x: pos.x as i32,
                y: pos.y as i32,
            },
            ClientMask::ALL,
        );
    }

    /// Explosion with radial push and freeze falloff.
    pub fn create_explosion(&mut self, pos: Vec2, owner: Option<ClientId>, weapon: i32, max_damage: i32) {
        self.events.create(
            GameEvent::Explosion {
                x: pos.x as i32,
                y: pos.y as i32,
            },
            ClientMask::ALL,
        );

        let mut hits = std::mem::take(&mut self.hit_scratch);
        hits.clear();
        hits.extend(self.world.characters_in_radius(pos, EXPLOSION_RADIUS));
        for &(victim, at) in &hits {
            let diff = at - pos;
            let l = diff.length();
            let factor = 1.0
                - ((l - EXPLOSION_INNER_RADIUS) / (EXPLOSION_RADIUS - EXPLOSION_INNER_RADIUS))
                    .clamp(0.0, 1.0);
            if (factor * max_damage as f32) as i32 == 0 {
                continue;
            }
            let force = if l > 0.0 {
                diff.normalize() * EXPLOSION_MAX_FORCE * factor
            } else {
                Vec2::new(0.0, EXPLOSION_MAX_FORCE)
            };
            self.hit_character(owner, victim, force, weapon);
        }
        self.hit_scratch = hits;
    }

    pub fn create_player_spawn(&mut self, pos: Vec2) {
        self.events.create(
            GameEvent::Spawn {
                x: pos.x as i32,
                y: pos.y as i32,
            },
            ClientMask::ALL,
        );
    }

    pub fn create_death(&mut self, pos: Vec2, cid: ClientId) {
        self.events.create(
            GameEvent::Death {
                x: pos.x as i32,
                y: pos.y as i32,
                client_id: cid,
            },
            ClientMask::ALL,
        );
    }

    pub fn create_sound(&mut self, pos: Vec2, sound: i32, mask: ClientMask) {
        self.events.create(
            GameEvent::Sound {
                x: pos.x as i32,
                y: pos.y as i32,
                sound,
            },
            mask,
        );
    }

    /// Sound for `team`; the source hears it everywhere.
    pub fn create_sound_team(&mut self, pos: Vec2, sound: i32, team: Team, source: Option<ClientId>) {
        if self.controller.is_teamplay() {
            let mask = self.team_mask(team, source);
            self.create_sound(pos, sound, mask);
        } else {
            self.create_sound(pos, sound, ClientMask::ALL);
        }
        if let Some(cid) = source {
            self.create_sound_global(sound, Some(cid));
        }
    }

    /// Sound without a position, heard by `target` or everyone.
    pub fn create_sound_global(&mut self, sound: i32, target: Option<ClientId>) {
        let mask = target.map_or(ClientMask::ALL, ClientMask::one);
        self.create_sound(Vec2::ZERO, sound, mask);
    }

    /// Floating points text above `pos`, visible for three seconds.
    pub fn make_laser_text_points(&mut self, pos: Vec2, points: i32) {
        let pos = Vec2::new(pos.x, pos.y - 50.0);
        let expires = self.tick + self.tick_speed * 3;
        self.world.spawn_laser_text(pos, points, expires);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Combat
    // ─────────────────────────────────────────────────────────────────────────

    /// A weapon hit `victim`. Opponents are frozen and the attacker scores;
    /// teammates and self-hits only push.
    pub fn hit_character(
        &mut self,
        attacker: Option<ClientId>,
        victim: ClientId,
        force: Vec2,
        weapon: i32,
    ) {
        let victim_team = self.players.get(victim).map(|p| p.team());
        let attacker_team = attacker.and_then(|a| self.players.get(a)).map(|p| p.team());
        let friendly = attacker == Some(victim)
            || (self.controller.is_teamplay() && attacker_team.is_some() && attacker_team == victim_team);

        let freeze_ticks = if friendly {
            0
        } else {
            self.tick_speed * self.config.sv_freeze_time.max(0) as u64
        };
        let Some(outcome) = self.world.apply_hit(victim, force, freeze_ticks, self.tick) else {
            return;
        };
        if !outcome.froze {
            return;
        }

        if let Some(p) = self.players.get_mut(victim) {
            p.stats.hits += 1;
        }
        let Some(attacker) = attacker else {
            return;
        };
        if let Some(p) = self.players.get_mut(attacker) {
            p.stats.kills += 1;
        }
        {
            let mut view = controller_view!(self);
            self.controller.on_character_hit(&mut view, attacker, victim);
        }
        self.flush_team_changes();

        let team = attacker_team.unwrap_or(Team::Red);
        self.make_laser_text_points(outcome.pos, 1);
        self.create_sound_team(outcome.pos, sound::HIT, team, Some(attacker));
        let angle = force.y.atan2(force.x);
        self.create_damage_ind(outcome.pos, angle, 1, team, Some(attacker));
        debug!(attacker = %attacker, victim = %victim, weapon, "character frozen");
    }

    /// Kills a character outside of combat, e.g. a self kill.
    pub fn kill_character(&mut self, cid: ClientId, weapon: i32) {
        let Some(pos) = self.world.kill_character(cid) else {
            return;
        };
        self.create_death(pos, cid);
        self.create_sound(pos, sound::PLAYER_DIE, ClientMask::ALL);
        let mut view = controller_view!(self);
        self.controller
            .on_character_death(&mut view, cid, Some(cid), weapon);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Client lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// A client took slot `cid`. Dummies occupying the slot are removed.
    pub fn on_client_connected(&mut self, cid: ClientId, addr: Option<IpAddr>, dummy: bool, as_spec: bool) {
        if cid.index() >= MAX_CLIENTS {
            return;
        }
        if self.players.get(cid).is_some_and(|p| p.dummy) {
            self.on_client_drop(cid, "removing dummy", true);
        }

        let team = if as_spec {
            Team::Spectators
        } else {
            self.controller.start_team(&self.players, &self.config)
        };
        self.players
            .insert(Player::new(cid, team, dummy, addr, self.tick));
        debug!(client_id = %cid, dummy, team = team.as_i32(), "player slot taken");
        if dummy {
            return;
        }

        if self.vote.is_open() {
            let kind = self.vote.kind;
            self.send_vote_set(kind, Some(cid));
        }
        self.send_motd(Some(cid));
        self.send_settings(Some(cid));
    }

    /// The client finished loading and joins the game.
    pub fn on_client_enter(&mut self, cid: ClientId) {
        match self.players.get_mut(cid) {
            Some(p) if !p.ingame => p.ingame = true,
            _ => return,
        }
        {
            let mut view = controller_view!(self);
            self.controller.on_player_connect(&mut view, cid);
        }
        self.send_player_commands(cid);
        self.vote.needs_tally = true;

        let Some(new) = self.players.get(cid) else {
            return;
        };
        let announce = self.client_info_msg(new, false);
        let local = self.client_info_msg(new, true);
        let (name, team) = (new.name.clone(), new.team());

        let mut infos = Vec::new();
        for p in self.players.iter().filter(|p| p.cid != cid && p.is_active()) {
            if p.ingame {
                infos.push((Recipient::Client(p.cid), announce.clone()));
            }
            infos.push((Recipient::Client(cid), self.client_info_msg(p, false)));
        }
        for (to, msg) in infos {
            self.outbox.send(to, msg);
        }
        self.outbox.send(Recipient::Client(cid), local);

        if self.recording {
            self.outbox.send(
                Recipient::Demo,
                ServerMsg::DemoClientEnter {
                    name,
                    client_id: cid,
                    team,
                },
            );
        }
    }

    fn send_player_commands(&mut self, cid: ClientId) {
        let infos: Vec<ServerMsg> = self
            .commands
            .iter()
            .map(|c| ServerMsg::CommandInfo {
                name: c.name.clone(),
                help: c.help.clone(),
                args_format: c.args_format.clone(),
            })
            .collect();
        for msg in infos {
            self.outbox.send(Recipient::Client(cid), msg);
        }
    }

    /// Removes a player. Frozen players may not leave while a round runs
    /// unless `force` is set; returns `false` when refused.
    pub fn on_client_drop(&mut self, cid: ClientId, reason: &str, force: bool) -> bool {
        let Some(p) = self.players.get(cid) else {
            return true;
        };
        if !force && self.world.is_frozen(cid) && !self.controller.is_game_over() {
            debug!(client_id = %cid, "drop refused while frozen");
            return false;
        }

        let banned = p.addr.is_some_and(|a| self.bans.is_banned(a));
        let (ingame, name, silent) = (
            p.ingame,
            p.name.clone(),
            self.config.sv_silent_spectator_mode != 0 && p.is_spectator(),
        );
        self.vote.abort_on_disconnect(cid, banned);
        {
            let mut view = controller_view!(self);
            self.controller
                .on_player_disconnect(&mut view, cid, reason);
        }

        if ingame {
            if self.recording {
                self.outbox.send(
                    Recipient::Demo,
                    ServerMsg::DemoClientLeave {
                        name,
                        reason: reason.to_string(),
                    },
                );
            }
            self.outbox.send(
                Recipient::All,
                ServerMsg::ClientDrop {
                    client_id: cid,
                    reason: reason.to_string(),
                    silent,
                },
            );
        }

        self.world.projectiles_lose_owner(cid);
        self.players.remove(cid);
        self.vote.needs_tally = true;
        true
    }

    /// Queues a disconnect and drops the player right away.
    pub(crate) fn force_disconnect(&mut self, cid: ClientId, reason: &str) {
        self.outbox.disconnect(cid, reason);
        self.on_client_drop(cid, reason, true);
    }

    pub fn on_client_team_change(&mut self, cid: ClientId) {
        if self.players.get(cid).is_some_and(|p| p.is_spectator()) {
            self.vote.abort_on_team_change(cid);
        }
        self.world.projectiles_lose_owner(cid);
    }

    /// Team change through the game rules, with the context's hooks.
    pub(crate) fn change_team(&mut self, cid: ClientId, team: Team, announce: bool) {
        {
            let mut view = controller_view!(self);
            self.controller
                .do_team_change(&mut view, cid, team, announce);
        }
        self.flush_team_changes();
    }

    /// Runs [`Self::on_client_team_change`] for moves made by the rules.
    pub(crate) fn flush_team_changes(&mut self) {
        if self.team_changes.is_empty() {
            return;
        }
        let mut changed = std::mem::take(&mut self.team_changes);
        for &cid in &changed {
            self.on_client_team_change(cid);
        }
        changed.clear();
        self.team_changes = changed;
        self.vote.needs_tally = true;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Team operations
    // ─────────────────────────────────────────────────────────────────────────

    pub fn swap_teams(&mut self) {
        if !self.controller.is_teamplay() {
            return;
        }
        self.send_game_msg(GameMsgId::TeamSwap, vec![], None);
        let ids: Vec<(ClientId, Team)> = self
            .players
            .iter()
            .filter(|p| !p.is_spectator())
            .map(|p| (p.cid, p.team()))
            .collect();
        for (cid, team) in ids {
            self.change_team(cid, team.opposite(), false);
        }
        self.controller.swap_team_score();
    }

    /// Random split of the playing clients, the odd one out by coin flip.
    pub fn shuffle_teams(&mut self) {
        use rand::Rng;

        if !self.controller.is_teamplay() {
            return;
        }
        self.send_game_msg(GameMsgId::TeamShuffle, vec![], None);

        let mut ids: Vec<ClientId> = self
            .players
            .iter()
            .filter(|p| !p.is_spectator())
            .map(|p| p.cid)
            .collect();
        let n = ids.len();
        for i in (1..n).rev() {
            let j = self.rng.gen_range(0..=i);
            ids.swap(i, j);
        }
        let rnd = if n % 2 == 1 {
            self.rng.gen_range(0..2)
        } else {
            0
        };
        for (i, cid) in ids.into_iter().enumerate() {
            let team = if i < (n + rnd) / 2 { Team::Red } else { Team::Blue };
            self.change_team(cid, team, false);
        }
    }

    pub fn force_team_balance(&mut self) {
        {
            let mut view = controller_view!(self);
            self.controller.force_team_balance(&mut view);
        }
        self.flush_team_changes();
    }

    /// Active-player count as the rules see it.
    pub fn real_player_num(&self) -> usize {
        self.controller.real_player_num(&self.players)
    }

    /// Vote command execution with vote-sourced privilege.
    pub(crate) fn run_vote_command(&mut self, command: &str) {
        self.execute_line(command, ExecSource::Vote);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::weapon;
    use std::net::Ipv4Addr;

    fn ctx() -> GameContext {
        GameContext::with_seed(GameConfig::default(), 50, 7)
    }

    fn join(ctx: &mut GameContext, id: u32) -> ClientId {
        let cid = ClientId(id);
        ctx.on_client_connected(cid, Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, id as u8))), false, false);
        ctx.on_client_enter(cid);
        cid
    }

    #[test]
    fn connect_sends_motd_and_settings() {
        let mut ctx = ctx();
        ctx.on_client_connected(ClientId(0), None, false, false);
        let msgs: Vec<_> = ctx.outbox.messages_for(ClientId(0)).collect();
        assert!(matches!(msgs[0], ServerMsg::Motd { .. }));
        assert!(matches!(msgs[1], ServerMsg::ServerSettings(s) if s.player_slots == 8));
    }

    #[test]
    fn enter_exchanges_client_infos() {
        let mut ctx = ctx();
        join(&mut ctx, 0);
        ctx.outbox.clear();
        join(&mut ctx, 1);

        let to_old: Vec<_> = ctx
            .outbox
            .iter()
            .filter_map(|o| match o {
                Outgoing::Message {
                    to: Recipient::Client(ClientId(0)),
                    msg: ServerMsg::ClientInfo { client_id, local, .. },
                } => Some((*client_id, *local)),
                _ => None,
            })
            .collect();
        assert_eq!(to_old, vec![(ClientId(1), false)]);

        let to_new: Vec<_> = ctx
            .outbox
            .iter()
            .filter_map(|o| match o {
                Outgoing::Message {
                    to: Recipient::Client(ClientId(1)),
                    msg: ServerMsg::ClientInfo { client_id, local, .. },
                } => Some((*client_id, *local)),
                _ => None,
            })
            .collect();
        assert_eq!(to_new, vec![(ClientId(0), false), (ClientId(1), true)]);
    }

    #[test]
    fn frozen_player_cannot_leave_unless_forced() {
        let mut ctx = ctx();
        let cid = join(&mut ctx, 0);
        ctx.world.spawn_character(cid, Vec2::ZERO);
        ctx.world.apply_hit(cid, Vec2::ZERO, 100, 0);
        assert!(!ctx.on_client_drop(cid, "bye", false));
        assert!(ctx.players.contains(cid));
        assert!(ctx.on_client_drop(cid, "bye", true));
        assert!(!ctx.players.contains(cid));
    }

    #[test]
    fn dummy_slot_is_taken_over() {
        let config = GameConfig {
            dbg_dummies: 2,
            sv_max_clients: 4,
            ..Default::default()
        };
        let mut ctx = GameContext::with_seed(config, 50, 1);
        assert!(ctx.players.get(ClientId(3)).is_some_and(|p| p.dummy));
        assert!(ctx.players.get(ClientId(2)).is_some_and(|p| p.dummy));
        ctx.on_client_connected(ClientId(3), None, false, false);
        assert!(ctx.players.get(ClientId(3)).is_some_and(|p| !p.dummy));
    }

    #[test]
    fn damage_indicator_goes_to_attacker_outside_teamplay() {
        let config = GameConfig {
            sv_gametype: "fng2solo".into(),
            ..Default::default()
        };
        let mut ctx = GameContext::with_seed(config, 50, 1);
        ctx.create_damage_ind(Vec2::ZERO, 0.0, 1, Team::Red, Some(ClientId(4)));
        assert_eq!(ctx.events.visible_to(Some(ClientId(4))).count(), 1);
        assert_eq!(ctx.events.visible_to(Some(ClientId(5))).count(), 0);
    }

    #[test]
    fn laser_hit_freezes_opponent_and_scores() {
        let mut ctx = ctx();
        let a = join(&mut ctx, 0);
        let b = join(&mut ctx, 1);
        assert_ne!(ctx.players.get(a).unwrap().team(), ctx.players.get(b).unwrap().team());
        ctx.world.spawn_character(a, Vec2::new(0.0, 0.0));
        ctx.world.spawn_character(b, Vec2::new(100.0, 0.0));

        ctx.hit_character(Some(a), b, Vec2::new(1.0, 0.0), weapon::LASER);
        assert!(ctx.world.is_frozen(b));
        assert_eq!(ctx.players.get(a).unwrap().stats.kills, 1);
        assert_eq!(ctx.players.get(b).unwrap().stats.hits, 1);
        assert_eq!(ctx.players.get(a).unwrap().score, 1);
        assert_eq!(ctx.world.laser_texts().count(), 1);

        // a second hit on a frozen tee does not score again
        ctx.hit_character(Some(a), b, Vec2::new(1.0, 0.0), weapon::LASER);
        assert_eq!(ctx.players.get(a).unwrap().score, 1);
    }

    #[test]
    fn teammates_are_only_pushed() {
        let mut ctx = ctx();
        let a = join(&mut ctx, 0);
        let b = join(&mut ctx, 1);
        ctx.change_team(b, ctx.players.get(a).unwrap().team(), false);
        ctx.world.spawn_character(b, Vec2::new(40.0, 0.0));
        ctx.hit_character(Some(a), b, Vec2::new(1.0, 0.0), weapon::LASER);
        assert!(!ctx.world.is_frozen(b));
    }

    #[test]
    fn explosion_reaches_inner_radius_only_with_falloff() {
        let config = GameConfig {
            sv_gametype: "fng2boomsolo".into(),
            ..Default::default()
        };
        let mut ctx = GameContext::with_seed(config, 50, 1);
        let a = join(&mut ctx, 0);
        let near = join(&mut ctx, 1);
        let far = join(&mut ctx, 2);
        ctx.world.spawn_character(near, Vec2::new(30.0, 0.0));
        ctx.world.spawn_character(far, Vec2::new(150.0, 0.0));
        ctx.create_explosion(Vec2::ZERO, Some(a), weapon::GRENADE, 6);
        assert!(ctx.world.is_frozen(near));
        assert!(!ctx.world.is_frozen(far));
        assert!(ctx
            .events
            .visible_to(None)
            .any(|e| matches!(e, GameEvent::Explosion { .. })));
    }

    #[test]
    fn swap_teams_swaps_every_player() {
        let mut ctx = ctx();
        let a = join(&mut ctx, 0);
        let b = join(&mut ctx, 1);
        let (ta, tb) = (
            ctx.players.get(a).unwrap().team(),
            ctx.players.get(b).unwrap().team(),
        );
        ctx.swap_teams();
        assert_eq!(ctx.players.get(a).unwrap().team(), tb);
        assert_eq!(ctx.players.get(b).unwrap().team(), ta);
    }

    #[test]
    fn shuffle_keeps_teams_even() {
        let mut ctx = ctx();
        for id in 0..6 {
            join(&mut ctx, id);
        }
        ctx.shuffle_teams();
        assert_eq!(ctx.players.team_size(Team::Red), 3);
        assert_eq!(ctx.players.team_size(Team::Blue), 3);
    }

    #[test]
    fn reset_keeps_options_and_returning_clients() {
        let mut ctx = ctx();
        let cid = join(&mut ctx, 0);
        ctx.set_authed(cid, true);
        ctx.vote_options.add("Restart", "restart", |_| true).unwrap();
        ctx.tuning.set("gravity", 1.0);
        ctx.reset();
        assert_eq!(ctx.vote_options.len(), 1);
        assert_eq!(ctx.tuning.get("gravity"), Some(1.0));
        let p = ctx.players.get(cid).unwrap();
        assert!(p.authed);
        assert!(!p.ingame);
    }
}
