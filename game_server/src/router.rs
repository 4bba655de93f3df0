//! Inbound client messages.
//!
//! Every message is validated before it is looked at. Clients that have not
//! entered the game may only send `StartInfo`; everything else is dropped.
//! Rate limits are silent: a rejected message leaves no trace.

use game_shared::{
    chat::{sanitize_line, slash_command, ChatVerdict},
    net::ClientId,
    protocol::{
        truncate_chars, ChatMode, ClientMsg, Emoticon, GameMsgId, PlayerInput, ProtocolError,
        ServerMsg, SkinInfo, Team, VoteSetKind, MAX_CLAN_CHARS, MAX_NAME_CHARS,
    },
};
use tracing::debug;

use crate::{
    console::ExecSource,
    context::{controller_view, GameContext},
    controller::GameMode,
    outbox::Recipient,
    player::{Player, SpectatorMode},
    vote::{CastResult, VOTE_COOLDOWN},
};

/// Longest argument line accepted by a `Command` message.
const MAX_COMMAND_LINE: usize = 128;

/// Seconds between two vote calls of one player, successful or not.
const VOTE_TRY_DELAY: u64 = 3;
const SET_TEAM_DELAY: u64 = 3;
const SPECTATOR_MODE_DELAY: u64 = 1;
const READY_CHANGE_DELAY: u64 = 1;
const SKIN_CHANGE_DELAY: u64 = 5;
/// Seconds an emoticon's face stays on the tee.
const EMOTICON_FACE_SECONDS: u64 = 2;

impl GameContext {
    /// Applies one message from `cid`.
    pub fn on_message(&mut self, cid: ClientId, msg: ClientMsg) {
        if let Err(e) = msg.validate() {
            self.note_invalid(cid, &e);
            return;
        }
        let Some(p) = self.players.get(cid) else {
            return;
        };

        if !p.ingame {
            if let ClientMsg::StartInfo {
                name,
                clan,
                country,
                skin,
            } = msg
            {
                self.on_start_info(cid, &name, &clan, country, &skin);
            }
            return;
        }

        match msg {
            ClientMsg::Say {
                mode,
                target,
                message,
            } => self.on_say(cid, mode, target, &message),
            ClientMsg::CallVote {
                kind,
                value,
                reason,
                force,
            } => self.on_call_vote(cid, &kind, &value, &reason, force),
            ClientMsg::Vote { vote } => self.on_vote(cid, vote),
            ClientMsg::SetTeam { team } => self.on_set_team(cid, team),
            ClientMsg::SetSpectatorMode { mode, spectator_id } => {
                self.on_set_spectator_mode(cid, mode, spectator_id)
            }
            ClientMsg::Emoticon { emoticon } => self.on_emoticon(cid, emoticon),
            ClientMsg::Kill => self.on_kill(cid),
            ClientMsg::ReadyChange => self.on_ready_change(cid),
            ClientMsg::SkinChange { skin } => self.on_skin_change(cid, &skin),
            ClientMsg::Command { name, arguments } => self.on_command(cid, &name, &arguments),
            ClientMsg::Input { input, predicted } => self.on_input(cid, input, predicted),
            ClientMsg::StartInfo { .. } => {}
        }
    }

    fn note_invalid(&mut self, cid: ClientId, err: &ProtocolError) {
        self.invalid_messages += 1;
        if self.config.debug == 0 {
            return;
        }
        let quiet = self
            .last_invalid_log
            .is_some_and(|t| t + self.tick_speed > self.tick);
        if !quiet {
            self.last_invalid_log = Some(self.tick);
            debug!(
                client_id = %cid,
                error = %err,
                dropped = self.invalid_messages,
                "dropped weird message"
            );
        }
    }

    fn spam_protection(&self) -> bool {
        self.config.sv_spamprotection != 0
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Handshake
    // ─────────────────────────────────────────────────────────────────────────

    fn on_start_info(&mut self, cid: ClientId, name: &str, clan: &str, country: i32, skin: &SkinInfo) {
        let now = self.tick;
        let Some(p) = self.players.get_mut(cid) else {
            return;
        };
        if p.ready_to_enter {
            return;
        }
        p.last_change_info = Some(now);
        let name = truncate_chars(name.trim(), MAX_NAME_CHARS);
        if !name.is_empty() {
            p.name = name;
        }
        p.clan = truncate_chars(clan.trim(), MAX_CLAN_CHARS);
        p.country = country;
        p.skin = skin.clamped();
        {
            let mut view = controller_view!(self);
            self.controller.on_player_info_change(&mut view, cid);
        }

        let to = Recipient::Client(cid);
        self.outbox.send(to, ServerMsg::VoteClearOptions);
        let chunks: Vec<Vec<String>> = self.vote_options.description_chunks().collect();
        for descriptions in chunks {
            self.outbox
                .send(to, ServerMsg::VoteOptionListAdd { descriptions });
        }
        self.send_tuning_params(Some(cid));

        if let Some(p) = self.players.get_mut(cid) {
            p.ready_to_enter = true;
        }
        self.outbox.send(to, ServerMsg::ReadyToEnter);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Chat
    // ─────────────────────────────────────────────────────────────────────────

    fn on_say(&mut self, cid: ClientId, mode: ChatMode, target: Option<ClientId>, message: &str) {
        let (now, ts, spam) = (self.tick, self.tick_speed, self.spam_protection());
        let Some(p) = self.players.get_mut(cid) else {
            return;
        };
        if spam && p.chat.in_cooldown(now, ts) {
            return;
        }
        let line = sanitize_line(message);
        if p.chat.check(&line, now, ts, spam) == ChatVerdict::Drop {
            return;
        }
        let (spectator, authed) = (p.is_spectator(), p.authed);

        if let Some(command) = slash_command(&line) {
            self.dispatch_chat_command(cid, command.trim_start());
            return;
        }

        let mut mode = mode;
        if self.config.sv_tournament_mode == 2
            && spectator
            && self.controller.is_game_running()
            && !authed
        {
            if mode != ChatMode::Whisper {
                mode = ChatMode::Team;
            } else if target
                .and_then(|t| self.players.get(t))
                .is_some_and(|t| !t.is_spectator())
            {
                mode = ChatMode::None;
            }
        }
        if mode != ChatMode::None {
            self.send_chat(Some(cid), mode, target, &line.text);
        }
    }

    fn on_command(&mut self, cid: ClientId, name: &str, arguments: &str) {
        let line = format!("{} {}", name, arguments);
        let line = line.trim();
        let handled = !line.is_empty()
            && line.len() <= MAX_COMMAND_LINE
            && self.dispatch_chat_command(cid, line);
        if !handled {
            let mut view = controller_view!(self);
            self.controller
                .on_player_command(&mut view, cid, name, arguments);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Votes
    // ─────────────────────────────────────────────────────────────────────────

    fn on_call_vote(&mut self, cid: ClientId, kind: &str, value: &str, reason: &str, force: bool) {
        let (now, ts, spam) = (self.tick, self.tick_speed, self.spam_protection());
        let vote_open = self.vote.is_open();
        let Some(p) = self.players.get_mut(cid) else {
            return;
        };
        if force {
            if !p.authed {
                return;
            }
        } else {
            let throttled = spam
                && (Player::within(p.last_vote_try, VOTE_TRY_DELAY, ts, now)
                    || Player::within(p.last_vote_call, VOTE_COOLDOWN, ts, now));
            if throttled || p.is_spectator() || vote_open {
                return;
            }
            p.last_vote_try = Some(now);
        }
        let caller = p.name.clone();
        let reason = if reason.is_empty() {
            "No reason given"
        } else {
            reason
        };

        let (set_kind, description, command, subject) = if kind.eq_ignore_ascii_case("option") {
            let Some(option) = self.vote_options.find(value) else {
                return;
            };
            let (description, command) = (option.description.clone(), option.command.clone());
            self.print(
                "server",
                format!(
                    "'{}:{}' voted {} '{}' reason='{}' cmd='{}' force={}",
                    cid, caller, kind, description, reason, command, force as i32
                ),
            );
            if force {
                self.execute_line(&command, ExecSource::Client(cid));
                self.force_vote(VoteSetKind::StartOption, &description, reason);
                return;
            }
            (VoteSetKind::StartOption, description, command, None)
        } else if kind.eq_ignore_ascii_case("kick") {
            if self.config.sv_vote_kick == 0
                || self.real_player_num() < self.config.sv_vote_kick_min.max(0) as usize
            {
                return;
            }
            let Some(target) = self.vote_subject(cid, value) else {
                return;
            };
            let Some(t) = self.players.get(target).filter(|t| !t.authed) else {
                return;
            };
            let target_name = t.name.clone();
            let description = format!("{:2}: {}", target.0, target_name);
            let bantime = self.config.sv_vote_kick_bantime;
            let command = match t.addr {
                Some(addr) if bantime != 0 => format!("ban {} {} Banned by vote", addr, bantime),
                _ => format!("kick {} Kicked by vote", target),
            };
            self.print(
                "server",
                format!(
                    "'{}:{}' voted {} '{}:{}' reason='{}' cmd='{}' force={}",
                    cid, caller, kind, target, target_name, reason, command, force as i32
                ),
            );
            if force {
                self.execute_line(&command, ExecSource::Client(cid));
                return;
            }
            (VoteSetKind::StartKick, description, command, Some(target))
        } else if kind.eq_ignore_ascii_case("spectate") {
            if self.config.sv_vote_spectate == 0 {
                return;
            }
            let Some(target) = self.vote_subject(cid, value) else {
                return;
            };
            let Some(t) = self.players.get(target).filter(|t| !t.is_spectator()) else {
                return;
            };
            let target_name = t.name.clone();
            let description = format!("{:2}: {}", target.0, target_name);
            let command = format!(
                "set_team {} -1 {}",
                target, self.config.sv_vote_spectate_rejoindelay
            );
            self.print(
                "server",
                format!(
                    "'{}:{}' voted {} '{}:{}' reason='{}' cmd='{}' force={}",
                    cid, caller, kind, target, target_name, reason, command, force as i32
                ),
            );
            if force {
                self.execute_line(&command, ExecSource::Client(cid));
                self.force_vote(VoteSetKind::StartSpectate, &description, reason);
                return;
            }
            (VoteSetKind::StartSpectate, description, command, Some(target))
        } else {
            return;
        };

        let started = self.vote.start(
            &mut self.players,
            set_kind,
            cid,
            subject,
            &description,
            &command,
            reason,
            now,
            ts,
        );
        if started {
            self.send_vote_set(set_kind, None);
        }
    }

    /// Parses a kick/spectate target: another connected player.
    fn vote_subject(&self, caller: ClientId, value: &str) -> Option<ClientId> {
        let id: u32 = value.trim().parse().ok()?;
        let target = ClientId(id);
        (target != caller && self.players.contains(target)).then_some(target)
    }

    /// Tells everyone a vote went through without a poll.
    fn force_vote(&mut self, kind: VoteSetKind, description: &str, reason: &str) {
        self.outbox.send(
            Recipient::All,
            ServerMsg::VoteSet {
                client_id: None,
                kind,
                timeout: 0,
                description: description.to_string(),
                reason: reason.to_string(),
            },
        );
    }

    fn on_vote(&mut self, cid: ClientId, vote: i32) {
        if self.vote.cast(&mut self.players, cid, vote, self.tick) == CastResult::Aborted {
            debug!(client_id = %cid, "vote withdrawn by its creator");
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Teams and spectating
    // ─────────────────────────────────────────────────────────────────────────

    fn on_set_team(&mut self, cid: ClientId, team: i32) {
        if !self.controller.is_team_change_allowed() {
            return;
        }
        let Some(team) = Team::from_i32(team) else {
            return;
        };
        let (now, ts, spam) = (self.tick, self.tick_speed, self.spam_protection());
        let frozen = self.world.is_frozen(cid);
        let Some(p) = self.players.get_mut(cid) else {
            return;
        };
        if frozen
            || p.team() == team
            || (spam && Player::within(p.last_set_team, SET_TEAM_DELAY, ts, now))
            || p.team_change_tick > now
        {
            return;
        }
        p.last_set_team = Some(now);

        if !self.controller.can_join_team(&self.players, &self.config, cid, team)
            || !self.controller.can_change_team(&self.players, cid, team)
        {
            return;
        }
        if let Some(p) = self.players.get_mut(cid) {
            if p.is_spectator() || team.is_spectator() {
                self.vote.needs_tally = true;
            }
            p.team_change_tick = now + ts * SET_TEAM_DELAY;
        }
        self.change_team(cid, team, true);
    }

    fn on_set_spectator_mode(&mut self, cid: ClientId, mode: i32, spectator_id: Option<ClientId>) {
        if self.world.paused {
            return;
        }
        let (now, ts, spam) = (self.tick, self.tick_speed, self.spam_protection());
        let Some(p) = self.players.get_mut(cid) else {
            return;
        };
        if spam && Player::within(p.last_set_spectator_mode, SPECTATOR_MODE_DELAY, ts, now) {
            return;
        }
        p.last_set_spectator_mode = Some(now);

        let flags = self.controller.mode() == GameMode::Ctf;
        let wanted = match (mode, spectator_id) {
            (0, _) => Some(SpectatorMode::FreeView),
            (1, Some(target)) => self
                .players
                .get(target)
                .filter(|t| t.cid != cid && !t.is_spectator())
                .map(|_| SpectatorMode::Player(target)),
            (2, _) if flags => Some(SpectatorMode::FlagRed),
            (3, _) if flags => Some(SpectatorMode::FlagBlue),
            _ => None,
        };
        let spectator = self.players.get(cid).is_some_and(Player::is_spectator);
        match (wanted, self.players.get_mut(cid)) {
            (Some(wanted), Some(p)) if spectator => p.spectator_mode = wanted,
            _ => self.send_game_msg(GameMsgId::SpecInvalidId, vec![], Some(cid)),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Character actions
    // ─────────────────────────────────────────────────────────────────────────

    fn on_emoticon(&mut self, cid: ClientId, emoticon: i32) {
        if self.world.paused {
            return;
        }
        let Some(emoticon) = Emoticon::from_index(emoticon) else {
            return;
        };
        let (now, ts, spam) = (self.tick, self.tick_speed, self.spam_protection());
        let delay = self.config.sv_emoticon_delay.max(0) as u64;
        let Some(p) = self.players.get_mut(cid) else {
            return;
        };
        if spam && Player::within(p.last_emote, delay, ts, now) {
            return;
        }
        p.last_emote = Some(now);
        p.stats.num_emotes += 1;

        self.send_emoticon(cid, emoticon);
        self.world
            .set_emote(cid, emoticon.emote(), now + ts * EMOTICON_FACE_SECONDS);
    }

    fn on_kill(&mut self, cid: ClientId) {
        if self.world.paused || self.config.sv_kill_delay == -1 || self.world.is_frozen(cid) {
            return;
        }
        let (now, ts) = (self.tick, self.tick_speed);
        let delay = self.config.sv_kill_delay.max(0) as u64;
        let Some(p) = self.players.get_mut(cid) else {
            return;
        };
        if Player::within(p.last_kill, delay, ts, now) {
            return;
        }
        p.last_kill = Some(now);
        self.kill_character(cid, crate::world::weapon::SELF);
    }

    fn on_ready_change(&mut self, cid: ClientId) {
        let (now, ts) = (self.tick, self.tick_speed);
        let Some(p) = self.players.get_mut(cid) else {
            return;
        };
        if Player::within(p.last_ready_change, READY_CHANGE_DELAY, ts, now) {
            return;
        }
        p.last_ready_change = Some(now);
        let mut view = controller_view!(self);
        self.controller.on_player_ready_change(&mut view, cid);
    }

    fn on_skin_change(&mut self, cid: ClientId, skin: &SkinInfo) {
        let (now, ts) = (self.tick, self.tick_speed);
        let Some(p) = self.players.get_mut(cid) else {
            return;
        };
        if Player::within(p.last_change_info, SKIN_CHANGE_DELAY, ts, now) {
            return;
        }
        p.last_change_info = Some(now);
        p.skin = skin.clamped();
        let skin = p.skin.clone();

        let receivers: Vec<ClientId> = self
            .players
            .iter()
            .filter(|p| p.ingame && !p.dummy)
            .map(|p| p.cid)
            .collect();
        for to in receivers {
            self.outbox.send(
                Recipient::Client(to),
                ServerMsg::SkinChange {
                    client_id: cid,
                    skin: skin.clone(),
                },
            );
        }
        let mut view = controller_view!(self);
        self.controller.on_player_info_change(&mut view, cid);
    }

    fn on_input(&mut self, cid: ClientId, input: PlayerInput, predicted: bool) {
        if predicted {
            if !self.world.paused {
                self.world.set_input(cid, input);
            }
            return;
        }
        if let Some(p) = self.players.get_mut(cid) {
            p.input = input;
        }
        if !self.world.paused {
            self.world.set_input(cid, input);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use game_shared::config::GameConfig;
    use std::net::{IpAddr, Ipv4Addr};

    use crate::outbox::Outgoing;

    fn ctx() -> GameContext {
        GameContext::with_seed(GameConfig::default(), 50, 5)
    }

    fn join(ctx: &mut GameContext, id: u32, last: u8) -> ClientId {
        let cid = ClientId(id);
        let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, last));
        ctx.on_client_connected(cid, Some(addr), false, false);
        ctx.on_message(
            cid,
            ClientMsg::StartInfo {
                name: format!("p{id}"),
                clan: String::new(),
                country: -1,
                skin: SkinInfo::default(),
            },
        );
        ctx.on_client_enter(cid);
        cid
    }

    fn say(ctx: &mut GameContext, cid: ClientId, text: &str) {
        ctx.on_message(
            cid,
            ClientMsg::Say {
                mode: ChatMode::All,
                target: None,
                message: text.to_string(),
            },
        );
    }

    fn chats_from(ctx: &GameContext, cid: ClientId) -> Vec<String> {
        ctx.outbox
            .iter()
            .filter_map(|o| match o {
                Outgoing::Message {
                    msg:
                        ServerMsg::Chat {
                            client_id: Some(from),
                            message,
                            ..
                        },
                    ..
                } if *from == cid => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn start_info_finishes_handshake() {
        let mut ctx = ctx();
        ctx.exec_console("add_vote a restart");
        let cid = ClientId(0);
        ctx.on_client_connected(cid, None, false, false);
        ctx.on_message(
            cid,
            ClientMsg::StartInfo {
                name: "  nameless tee  ".to_string(),
                clan: "clan".to_string(),
                country: 276,
                skin: SkinInfo::default(),
            },
        );
        let p = ctx.player(cid).unwrap();
        assert_eq!(p.name, "nameless tee");
        assert!(p.ready_to_enter);
        let msgs: Vec<&ServerMsg> = ctx.outbox.messages_for(cid).collect();
        assert!(msgs.contains(&&ServerMsg::VoteClearOptions));
        assert!(msgs.contains(&&ServerMsg::VoteOptionListAdd {
            descriptions: vec!["a".to_string()]
        }));
        assert_eq!(msgs.last(), Some(&&ServerMsg::ReadyToEnter));
    }

    #[test]
    fn messages_before_entering_are_dropped() {
        let mut ctx = ctx();
        let cid = ClientId(3);
        ctx.on_client_connected(cid, None, false, false);
        ctx.outbox.clear();
        say(&mut ctx, cid, "hello");
        assert!(ctx.outbox.is_empty());
    }

    #[test]
    fn invalid_messages_are_counted() {
        let mut ctx = ctx();
        let cid = join(&mut ctx, 0, 1);
        ctx.on_message(cid, ClientMsg::SetTeam { team: 7 });
        ctx.on_message(cid, ClientMsg::Emoticon { emoticon: 99 });
        assert_eq!(ctx.invalid_messages(), 2);
    }

    #[test]
    fn chat_is_rate_limited_and_truncated() {
        let mut ctx = ctx();
        let cid = join(&mut ctx, 0, 1);
        ctx.tick = 1000;
        let long = format!("{}   ", "x".repeat(130));
        say(&mut ctx, cid, &long);
        say(&mut ctx, cid, "too soon");
        let lines = chats_from(&ctx, cid);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].chars().count(), 127);
    }

    #[test]
    fn slash_lines_run_commands() {
        let mut ctx = ctx();
        let cid = join(&mut ctx, 0, 1);
        ctx.tick = 1000;
        ctx.outbox.clear();
        say(&mut ctx, cid, "/nothing");
        assert!(chats_from(&ctx, cid).is_empty());
        assert!(ctx.outbox.messages_for(cid).any(|m| matches!(
            m,
            ServerMsg::Chat { message, .. } if message == "Server command not found"
        )));
    }

    #[test]
    fn tournament_spectators_chat_to_their_team() {
        let config = GameConfig {
            sv_tournament_mode: 2,
            ..Default::default()
        };
        let mut ctx = GameContext::with_seed(config, 50, 1);
        let spec = join(&mut ctx, 0, 1);
        assert!(ctx.player(spec).unwrap().is_spectator());
        ctx.tick = 10_000;
        ctx.exec_console("restart");
        assert!(ctx.controller.is_game_running());
        ctx.outbox.clear();

        say(&mut ctx, spec, "psst");
        assert!(ctx.outbox.iter().any(|o| matches!(
            o,
            Outgoing::Message {
                msg: ServerMsg::Chat { mode: ChatMode::Team, .. },
                ..
            }
        )));
    }

    #[test]
    fn call_vote_opens_poll_once() {
        let mut ctx = ctx();
        let a = join(&mut ctx, 0, 1);
        let b = join(&mut ctx, 1, 2);
        ctx.exec_console("add_vote \"Restart\" restart");
        ctx.tick = 10_000;
        let call = ClientMsg::CallVote {
            kind: "option".to_string(),
            value: "restart".to_string(),
            reason: String::new(),
            force: false,
        };
        ctx.on_message(a, call.clone());
        assert!(ctx.vote.is_open());
        let active = ctx.vote.active().unwrap();
        assert_eq!(active.reason, "No reason given");
        assert_eq!(ctx.vote.creator, Some(a));

        ctx.tick += 200;
        ctx.on_message(b, call);
        assert_eq!(ctx.vote.creator, Some(a));
    }

    #[test]
    fn kick_vote_targets_other_players_only() {
        let mut ctx = ctx();
        let a = join(&mut ctx, 0, 1);
        let b = join(&mut ctx, 1, 2);
        ctx.tick = 10_000;
        ctx.set_authed(b, true);
        let kick = |value: &str| ClientMsg::CallVote {
            kind: "kick".to_string(),
            value: value.to_string(),
            reason: "afk".to_string(),
            force: false,
        };
        ctx.on_message(a, kick("0"));
        assert!(!ctx.vote.is_open());
        ctx.on_message(a, kick("1"));
        assert!(!ctx.vote.is_open());

        ctx.set_authed(b, false);
        ctx.tick += 200;
        ctx.on_message(a, kick("1"));
        let active = ctx.vote.active().unwrap();
        assert_eq!(active.command, "ban 10.0.0.2 5 Banned by vote");
        assert_eq!(active.description, " 1: p1");
        assert_eq!(active.subject, Some(b));
    }

    #[test]
    fn forced_vote_needs_auth_and_runs_now() {
        let mut ctx = ctx();
        let a = join(&mut ctx, 0, 1);
        ctx.exec_console("add_vote slow sv_scorelimit 50");
        let forced = ClientMsg::CallVote {
            kind: "option".to_string(),
            value: "SLOW".to_string(),
            reason: String::new(),
            force: true,
        };
        ctx.on_message(a, forced.clone());
        assert_eq!(ctx.config.sv_scorelimit, 800);

        ctx.set_authed(a, true);
        ctx.on_message(a, forced);
        assert_eq!(ctx.config.sv_scorelimit, 50);
        assert!(!ctx.vote.is_open());
    }

    #[test]
    fn forced_vote_leaves_open_poll_alone() {
        let mut ctx = ctx();
        let a = join(&mut ctx, 0, 1);
        let b = join(&mut ctx, 1, 2);
        ctx.exec_console("add_vote r restart");
        ctx.exec_console("add_vote lim sv_scorelimit 7");
        ctx.tick = 10_000;
        ctx.on_message(
            b,
            ClientMsg::CallVote {
                kind: "option".to_string(),
                value: "r".to_string(),
                reason: String::new(),
                force: false,
            },
        );
        assert!(ctx.vote.is_open());

        ctx.set_authed(a, true);
        ctx.outbox.clear();
        ctx.on_message(
            a,
            ClientMsg::CallVote {
                kind: "option".to_string(),
                value: "lim".to_string(),
                reason: "now".to_string(),
                force: true,
            },
        );
        assert_eq!(ctx.config.sv_scorelimit, 7);
        assert!(ctx.vote.is_open());
        assert_eq!(ctx.vote.creator, Some(b));
        assert_eq!(ctx.vote.active().map(|v| v.description.as_str()), Some("r"));
        assert!(ctx.outbox.iter().any(|o| matches!(
            o,
            Outgoing::Message {
                to: Recipient::All,
                msg: ServerMsg::VoteSet {
                    client_id: None,
                    kind: VoteSetKind::StartOption,
                    timeout: 0,
                    description,
                    reason,
                },
            } if description == "lim" && reason == "now"
        )));
    }

    #[test]
    fn set_team_respects_cooldowns() {
        let mut ctx = ctx();
        let cid = join(&mut ctx, 0, 1);
        ctx.tick = 10_000;
        ctx.on_message(cid, ClientMsg::SetTeam { team: -1 });
        assert!(ctx.player(cid).unwrap().is_spectator());

        ctx.tick += 10;
        ctx.on_message(cid, ClientMsg::SetTeam { team: 0 });
        assert!(ctx.player(cid).unwrap().is_spectator());

        ctx.tick += 200;
        ctx.on_message(cid, ClientMsg::SetTeam { team: 0 });
        assert_eq!(ctx.player(cid).unwrap().team(), Team::Red);
    }

    #[test]
    fn emoticons_are_throttled_and_counted() {
        let mut ctx = ctx();
        let cid = join(&mut ctx, 0, 1);
        ctx.tick = 10_000;
        ctx.outbox.clear();
        ctx.on_message(cid, ClientMsg::Emoticon { emoticon: 2 });
        ctx.on_message(cid, ClientMsg::Emoticon { emoticon: 2 });
        let sent = ctx
            .outbox
            .iter()
            .filter(|o| matches!(o, Outgoing::Message { msg: ServerMsg::Emoticon { .. }, .. }))
            .count();
        assert_eq!(sent, 1);
        assert_eq!(ctx.player(cid).unwrap().stats.num_emotes, 1);
    }

    #[test]
    fn spectator_mode_needs_a_valid_target() {
        let mut ctx = ctx();
        let spec = join(&mut ctx, 0, 1);
        let other = join(&mut ctx, 1, 2);
        ctx.tick = 10_000;
        ctx.on_message(spec, ClientMsg::SetTeam { team: -1 });
        ctx.outbox.clear();

        ctx.on_message(
            spec,
            ClientMsg::SetSpectatorMode {
                mode: 1,
                spectator_id: Some(other),
            },
        );
        assert_eq!(
            ctx.player(spec).unwrap().spectator_mode,
            SpectatorMode::Player(other)
        );

        ctx.tick += 100;
        ctx.on_message(
            spec,
            ClientMsg::SetSpectatorMode {
                mode: 2,
                spectator_id: None,
            },
        );
        assert!(ctx.outbox.messages_for(spec).any(|m| matches!(
            m,
            ServerMsg::GameMsg { id: GameMsgId::SpecInvalidId, .. }
        )));
    }

    #[test]
    fn command_message_falls_back_to_controller() {
        let mut ctx = ctx();
        let cid = join(&mut ctx, 0, 1);
        ctx.outbox.clear();
        ctx.on_message(
            cid,
            ClientMsg::Command {
                name: "me".to_string(),
                arguments: "jumps".to_string(),
            },
        );
        assert!(ctx.outbox.iter().any(|o| matches!(
            o,
            Outgoing::Message { msg: ServerMsg::Chat { message, .. }, .. } if message == "# {jumps}"
        )));
    }
}
