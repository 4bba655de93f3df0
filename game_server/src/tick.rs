//! Per-tick simulation and snapshots.
//!
//! One tick runs, in order: the pure-tuning check, the world, the
//! controller, every player (slot order), then the vote. Snapshots are built
//! afterwards, one per viewer, and [`GameContext::post_snap`] closes the
//! cycle by dropping the tick's events.

use game_shared::{
    event::{sound, ClientMask},
    net::ClientId,
    protocol::{PlayerInput, ServerMsg, VoteSetKind},
    snapshot::{SnapItem, Snapshot},
    MAX_CLIENTS,
};
use rand::Rng;
use tracing::{debug, info};

use crate::{
    context::{controller_view, GameContext},
    controller::ControllerSignal,
    outbox::Recipient,
    stats::{self, TRIVIA_KINDS},
    vote::VoteDecision,
    world::{weapon, Explosion, Shot, Triggers, PHYS_SIZE},
};

/// Push of a hammer swing on anyone in reach.
const HAMMER_FORCE: f32 = 5.0;
/// Damage budget of an explosion at its centre.
const EXPLOSION_DAMAGE: i32 = 6;

impl GameContext {
    /// Advances the game by one tick.
    pub fn on_tick(&mut self) {
        self.tick += 1;
        self.check_pure_tuning();

        let tuning = self.tuning;
        self.world.tick(&tuning, self.tick);
        self.resolve_world_report();

        let signal = {
            let mut view = controller_view!(self);
            self.controller.tick(&mut view)
        };
        self.flush_team_changes();
        if signal.contains(ControllerSignal::ROUND_ENDED) {
            self.send_round_stats();
        }

        for i in 0..MAX_CLIENTS {
            let cid = ClientId(i as u32);
            if self.players.contains(cid) {
                self.player_tick(cid);
            }
        }

        self.update_vote();

        if self.config.dbg_dummies > 0 {
            self.drive_dummies();
        }
    }

    /// Resolves shots and expired explosives reported by the world.
    fn resolve_world_report(&mut self) {
        let report = self.world.take_report();
        for shot in &report.shots {
            self.fire(shot);
        }
        for explosion in &report.explosions {
            self.explode(explosion);
        }
        self.world.recycle_report(report);
    }

    fn fire(&mut self, shot: &Shot) {
        let owner = shot.owner;
        if let Some(p) = self.players.get_mut(owner) {
            p.stats.shots += 1;
        }

        if shot.weapon == weapon::HAMMER {
            self.swing_hammer(shot);
            return;
        }
        if self.controller.mode().is_boom() || shot.weapon == weapon::GRENADE {
            let speed = self.tuning.grenade_speed.as_f32() / self.tick_speed as f32;
            let lifetime = (self.tuning.grenade_lifetime.as_f32() * self.tick_speed as f32) as u64;
            self.world.spawn_projectile(
                Some(owner),
                shot.pos,
                shot.dir * speed,
                weapon::GRENADE,
                self.tick,
                lifetime,
                true,
            );
            return;
        }

        let reach = self.tuning.laser_reach.as_f32();
        if let Some(victim) = self.world.hit_scan(shot.pos, shot.dir, reach, owner) {
            self.hit_character(Some(owner), victim, shot.dir, weapon::LASER);
        }
    }

    /// Hammer: teammates are thawed, everyone else is pushed.
    fn swing_hammer(&mut self, shot: &Shot) {
        let owner = shot.owner;
        let center = shot.pos + shot.dir * PHYS_SIZE;
        let owner_team = self.players.get(owner).map(|p| p.team());
        let teamplay = self.controller.is_teamplay();

        let mut hits = std::mem::take(&mut self.hit_scratch);
        hits.clear();
        hits.extend(
            self.world
                .characters_in_radius(center, PHYS_SIZE * 0.5)
                .filter(|(cid, _)| *cid != owner),
        );
        for &(victim, at) in &hits {
            self.create_hammer_hit(at);
            let mate = teamplay && self.players.get(victim).map(|p| p.team()) == owner_team;
            if mate && self.world.is_frozen(victim) {
                if self.world.unfreeze(victim) {
                    if let Some(p) = self.players.get_mut(owner) {
                        p.stats.unfreezing_hammer_hits += 1;
                    }
                    if let Some(p) = self.players.get_mut(victim) {
                        p.stats.unfreezes += 1;
                    }
                }
            } else {
                self.world
                    .apply_hit(victim, shot.dir * HAMMER_FORCE, 0, self.tick);
            }
        }
        self.hit_scratch = hits;
    }

    fn explode(&mut self, explosion: &Explosion) {
        self.create_explosion(explosion.pos, explosion.owner, explosion.weapon, EXPLOSION_DAMAGE);
        self.create_sound(explosion.pos, sound::GRENADE_EXPLODE, ClientMask::ALL);
    }

    /// Player bookkeeping after the world moved.
    fn player_tick(&mut self, cid: ClientId) {
        let now = self.tick;
        let paused = self.world.paused;
        let triggers = self.world.triggers(cid);
        let frozen = self.world.is_frozen(cid);
        let vel = self.world.character_vel(cid);
        let Some(p) = self.players.get_mut(cid) else {
            return;
        };
        p.tick();

        if triggers.contains(Triggers::JUMPED) {
            p.stats.num_jumped += 1;
        }
        if triggers.contains(Triggers::HOOKED) {
            p.stats.num_hooks += 1;
        }
        if triggers.contains(Triggers::COLLIDED) {
            p.stats.num_tee_collisions += 1;
        }
        if frozen {
            p.stats.num_freeze_ticks += 1;
        }
        if let Some(v) = vel.filter(|_| !paused) {
            p.stats.num_tiles_moved += v.length();
            p.stats.max_speed = p.stats.max_speed.max(v.x.abs());
        }

        let emotion = p.emotion;
        let dummy = p.dummy;
        let thawed_or_frozen = frozen != p.was_frozen;
        p.was_frozen = frozen;

        if let Some(emote) = emotion.filter(|_| !frozen) {
            self.world.set_emote(cid, emote, now + 1);
        }
        if thawed_or_frozen && !dummy {
            if frozen {
                self.send_fake_tuning_params(cid);
            } else {
                self.send_tuning_params(Some(cid));
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Votes
    // ─────────────────────────────────────────────────────────────────────────

    fn update_vote(&mut self) {
        if !self.vote.is_open() {
            return;
        }
        match self.vote.decide(&self.players, self.tick) {
            VoteDecision::Abort => self.end_vote(VoteSetKind::EndAbort, false),
            VoteDecision::Pass { forced } => {
                let command = self
                    .vote
                    .active()
                    .map(|a| a.command.clone())
                    .unwrap_or_default();
                info!(scope = "server", command = %command, forced, "vote passed");
                self.run_vote_command(&command);
                if let Some(p) = self.vote.creator.and_then(|c| self.players.get_mut(c)) {
                    p.last_vote_call = None;
                }
                self.end_vote(VoteSetKind::EndPass, forced);
            }
            VoteDecision::Fail { forced } => self.end_vote(VoteSetKind::EndFail, forced),
            VoteDecision::Status(count) => self.outbox.send(
                Recipient::All,
                ServerMsg::VoteStatus {
                    total: count.total,
                    yes: count.yes,
                    no: count.no,
                    pass: count.total - count.yes - count.no,
                },
            ),
            VoteDecision::Pending => {}
        }
    }

    fn end_vote(&mut self, kind: VoteSetKind, forced: bool) {
        if let Some(closed) = self.vote.end(forced) {
            debug!(description = %closed.description, ?kind, "vote closed");
        }
        self.send_vote_set(kind, None);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Round end
    // ─────────────────────────────────────────────────────────────────────────

    fn send_round_stats(&mut self) {
        let summaries: Vec<(ClientId, Vec<String>)> = self
            .players
            .iter()
            .filter(|p| p.ingame && !p.dummy && !p.is_spectator())
            .map(|p| (p.cid, stats::round_summary(&p.stats)))
            .collect();
        for (cid, lines) in summaries {
            for line in lines {
                self.outbox.chat_to(cid, line);
            }
        }

        let best_kd = stats::best_kd_line(&self.players);
        let best_accuracy = stats::best_accuracy_line(&self.players);
        for line in [best_kd, best_accuracy].into_iter().flatten() {
            self.outbox.chat_all(line);
        }
        if self.config.sv_trivia != 0 {
            let draw = self.rng.gen_range(0..TRIVIA_KINDS);
            let line = stats::trivia_line(&self.players, draw, self.tick_speed);
            self.outbox.chat_all(line);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Debug dummies
    // ─────────────────────────────────────────────────────────────────────────

    fn drive_dummies(&mut self) {
        for i in 0..MAX_CLIENTS {
            let cid = ClientId(i as u32);
            if !self.players.get(cid).is_some_and(|p| p.dummy) {
                continue;
            }
            let input = PlayerInput {
                direction: if i & 1 == 1 { -1 } else { 1 },
                ..Default::default()
            };
            if !self.world.paused {
                self.world.set_input(cid, input);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Snapshots
    // ─────────────────────────────────────────────────────────────────────────

    /// Builds the view of `viewer`, or the shared view for `None`.
    pub fn snapshot(&mut self, viewer: Option<ClientId>) -> Snapshot {
        self.snap.begin(viewer);
        if viewer.is_none() && self.recording && !self.tuning.is_default() {
            self.snap.add(SnapItem::Tuning(self.tuning));
        }
        self.world.snap(&mut self.snap);
        self.controller.snap(&mut self.snap);
        for event in self.events.visible_to(viewer) {
            self.snap.add(SnapItem::Event(event.clone()));
        }
        for p in self.players.iter().filter(|p| p.is_active()) {
            self.snap.add(SnapItem::PlayerInfo {
                client_id: p.cid,
                local: Some(p.cid) == viewer,
                team: p.team(),
                score: p.score,
                ready: p.ready,
            });
        }
        self.snap.finish(self.tick)
    }

    /// Ends the snapshot cycle of this tick.
    pub fn post_snap(&mut self) {
        self.world.post_snap();
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use game_shared::{config::GameConfig, event::GameEvent, math::Vec2, protocol::ClientMsg};
    use std::net::{IpAddr, Ipv4Addr};

    use crate::outbox::Outgoing;

    fn ctx() -> GameContext {
        GameContext::with_seed(GameConfig::default(), 50, 9)
    }

    fn join(ctx: &mut GameContext, id: u32, last: u8) -> ClientId {
        let cid = ClientId(id);
        let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, last));
        ctx.on_client_connected(cid, Some(addr), false, false);
        ctx.on_client_enter(cid);
        cid
    }

    fn vote_sets(ctx: &GameContext) -> Vec<VoteSetKind> {
        ctx.outbox
            .iter()
            .filter_map(|o| match o {
                Outgoing::Message {
                    msg: ServerMsg::VoteSet { kind, .. },
                    ..
                } => Some(*kind),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn live_tuning_is_reset_in_pure_modes() {
        let config = GameConfig {
            sv_gametype: "ctf".to_string(),
            ..Default::default()
        };
        let mut ctx = GameContext::with_seed(config, 50, 1);
        ctx.exec_console("tune gravity 0.1");
        ctx.on_tick();
        assert!(ctx.tuning().is_default());
        assert!(ctx
            .console_output
            .iter()
            .any(|l| l == "resetting tuning due to pure server"));
    }

    #[test]
    fn majority_passes_and_runs_command() {
        let mut ctx = ctx();
        let a = join(&mut ctx, 0, 1);
        let b = join(&mut ctx, 1, 2);
        join(&mut ctx, 2, 3);
        ctx.exec_console("add_vote limit sv_scorelimit 42");
        ctx.tick = 10_000;
        ctx.on_message(
            a,
            ClientMsg::CallVote {
                kind: "option".to_string(),
                value: "limit".to_string(),
                reason: String::new(),
                force: false,
            },
        );
        ctx.on_tick();
        assert!(ctx.vote.is_open());

        ctx.on_message(b, ClientMsg::Vote { vote: 1 });
        ctx.outbox.clear();
        ctx.on_tick();
        assert!(!ctx.vote.is_open());
        assert_eq!(ctx.config.sv_scorelimit, 42);
        assert_eq!(vote_sets(&ctx), vec![VoteSetKind::EndPass]);
        assert_eq!(ctx.player(a).unwrap().last_vote_call, None);
    }

    #[test]
    fn enforced_no_fails_and_clears_creator() {
        let mut ctx = ctx();
        let a = join(&mut ctx, 0, 1);
        join(&mut ctx, 1, 2);
        join(&mut ctx, 2, 3);
        ctx.exec_console("add_vote r restart");
        ctx.tick = 10_000;
        ctx.on_message(
            a,
            ClientMsg::CallVote {
                kind: "option".to_string(),
                value: "r".to_string(),
                reason: String::new(),
                force: false,
            },
        );
        ctx.exec_console("vote no");
        ctx.outbox.clear();
        ctx.on_tick();
        assert!(!ctx.vote.is_open());
        assert_eq!(ctx.vote.creator, None);
        assert_eq!(vote_sets(&ctx), vec![VoteSetKind::EndFail]);
    }

    #[test]
    fn kick_vote_aborts_when_subject_leaves() {
        let mut ctx = ctx();
        let a = join(&mut ctx, 0, 1);
        let b = join(&mut ctx, 1, 2);
        join(&mut ctx, 2, 3);
        ctx.config.sv_vote_kick_bantime = 0;
        ctx.tick = 10_000;
        ctx.on_message(
            a,
            ClientMsg::CallVote {
                kind: "kick".to_string(),
                value: "1".to_string(),
                reason: String::new(),
                force: false,
            },
        );
        assert!(ctx.vote.is_open());
        assert!(ctx.on_client_drop(b, "quit", false));
        ctx.outbox.clear();
        ctx.on_tick();
        assert!(!ctx.vote.is_open());
        assert_eq!(vote_sets(&ctx), vec![VoteSetKind::EndAbort]);
    }

    #[test]
    fn snapshot_orders_items_and_filters_events() {
        let mut ctx = ctx();
        let a = join(&mut ctx, 0, 1);
        let b = join(&mut ctx, 1, 2);
        ctx.events.create(
            GameEvent::HammerHit { x: 1, y: 2 },
            ClientMask::one(a),
        );

        let snap_a = ctx.snapshot(Some(a));
        let snap_b = ctx.snapshot(Some(b));
        let events = |s: &Snapshot| {
            s.items
                .iter()
                .filter(|i| matches!(i, SnapItem::Event(_)))
                .count()
        };
        assert_eq!(events(&snap_a), 1);
        assert_eq!(events(&snap_b), 0);
        assert!(matches!(
            snap_a.items.last(),
            Some(SnapItem::PlayerInfo { client_id, local: false, .. }) if *client_id == b
        ));

        ctx.post_snap();
        assert!(ctx.events().is_empty());
    }

    #[test]
    fn recorded_view_starts_with_custom_tuning() {
        let mut ctx = ctx();
        ctx.set_recording(true);
        ctx.exec_console("tune gravity 0.3");
        let snap = ctx.snapshot(None);
        assert!(matches!(snap.items.first(), Some(SnapItem::Tuning(_))));

        ctx.exec_console("tune_reset");
        let snap = ctx.snapshot(None);
        assert!(!matches!(snap.items.first(), Some(SnapItem::Tuning(_))));
    }

    #[test]
    fn freezing_switches_to_fake_tuning() {
        let mut ctx = ctx();
        let a = join(&mut ctx, 0, 1);
        let b = join(&mut ctx, 1, 2);
        ctx.world.spawn_character(a, Vec2::new(0.0, 0.0));
        ctx.world.spawn_character(b, Vec2::new(100.0, 0.0));
        ctx.hit_character(Some(a), b, Vec2::new(1.0, 0.0), weapon::LASER);
        ctx.outbox.clear();
        ctx.on_tick();
        let frozen_params = game_shared::tuning::TuningParams::frozen().to_wire().to_vec();
        assert!(ctx
            .outbox
            .messages_for(b)
            .any(|m| matches!(m, ServerMsg::TuneParams { params } if *params == frozen_params)));
        assert!(ctx.player(b).unwrap().was_frozen);
        assert_eq!(ctx.player(b).unwrap().stats.num_freeze_ticks, 1);
    }

    #[test]
    fn dummies_are_spawned_and_driven() {
        let config = GameConfig {
            dbg_dummies: 2,
            ..Default::default()
        };
        let mut ctx = GameContext::with_seed(config, 50, 4);
        let dummies: Vec<_> = ctx.players().iter().filter(|p| p.dummy).map(|p| p.cid).collect();
        assert_eq!(dummies, vec![ClientId(14), ClientId(15)]);
        for _ in 0..3 {
            ctx.on_tick();
        }
        assert!(ctx.world().has_character(ClientId(15)));
        assert_eq!(
            ctx.world().character(ClientId(15)).map(|c| c.input.direction),
            Some(-1)
        );
    }
}
