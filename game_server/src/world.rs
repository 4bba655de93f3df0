//! Game world: characters, projectiles and laser texts.
//!
//! Entities live in the shared ECS. Movement is a plain integration step
//! driven by the current tuning; there is no map collision beyond a flat
//! floor at `y = 0`.
//!
//! The world never reaches into players or the controller. Shots fired and
//! expired explosives are reported through [`TickReport`] and resolved by the
//! game context.

use game_shared::{
    ecs::{EntityId, Position, Velocity, World},
    math::Vec2,
    net::ClientId,
    protocol::{Emote, PlayerInput},
    snapshot::SnapItem,
    tuning::TuningParams,
    MAX_CLIENTS,
};

use crate::snapshot::SnapshotBuilder;

/// Radius of a tee.
pub const PHYS_SIZE: f32 = 28.0;
/// Floor height.
const GROUND_Y: f32 = 0.0;

pub mod weapon {
    pub const HAMMER: i32 = 0;
    pub const GUN: i32 = 1;
    pub const SHOTGUN: i32 = 2;
    pub const GRENADE: i32 = 3;
    pub const LASER: i32 = 4;
    pub const NINJA: i32 = 5;
    /// Self kill.
    pub const SELF: i32 = -1;
    /// Left the game or changed team.
    pub const GAME: i32 = -3;
}

bitflags::bitflags! {
    /// What happened to a character this tick; cleared after each snapshot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Triggers: u32 {
        const JUMPED = 1 << 0;
        const HOOKED = 1 << 1;
        const FIRED = 1 << 2;
        const FROZE = 1 << 3;
        const UNFROZE = 1 << 4;
        const COLLIDED = 1 << 5;
    }
}

#[derive(Debug, Clone)]
pub struct Character {
    pub cid: ClientId,
    pub frozen_until: Option<u64>,
    pub emote: Emote,
    pub emote_until: u64,
    pub triggers: Triggers,
    pub input: PlayerInput,
    prev_input: PlayerInput,
    air_jumped: bool,
}

impl Character {
    pub fn is_frozen(&self) -> bool {
        self.frozen_until.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Projectile {
    pub owner: Option<ClientId>,
    pub weapon: i32,
    pub start_tick: u64,
    pub expires: u64,
    pub explosive: bool,
}

/// Floating score text.
#[derive(Debug, Clone)]
pub struct LaserText {
    pub points: i32,
    pub expires: u64,
}

/// A weapon trigger pulled this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shot {
    pub owner: ClientId,
    pub pos: Vec2,
    pub dir: Vec2,
    pub weapon: i32,
}

/// An explosive projectile that ran out of lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Explosion {
    pub pos: Vec2,
    pub owner: Option<ClientId>,
    pub weapon: i32,
}

/// Outcomes of one world tick.
#[derive(Debug, Default)]
pub struct TickReport {
    pub shots: Vec<Shot>,
    pub explosions: Vec<Explosion>,
}

impl TickReport {
    pub fn clear(&mut self) {
        self.shots.clear();
        self.explosions.clear();
    }
}

/// Result of hitting a character.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitOutcome {
    pub pos: Vec2,
    /// The hit froze a character that was moving freely.
    pub froze: bool,
}

pub struct GameWorld {
    ecs: World,
    characters: [Option<EntityId>; MAX_CLIENTS],
    pub paused: bool,
    report: TickReport,
    scratch: Vec<EntityId>,
}

impl Default for GameWorld {
    fn default() -> Self {
        Self {
            ecs: World::default(),
            characters: [None; MAX_CLIENTS],
            paused: false,
            report: TickReport::default(),
            scratch: Vec::with_capacity(MAX_CLIENTS),
        }
    }
}

impl GameWorld {
    /// Drops every entity.
    pub fn reset(&mut self) {
        self.ecs = World::default();
        self.characters = [None; MAX_CLIENTS];
        self.report.clear();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Characters
    // ─────────────────────────────────────────────────────────────────────────

    pub fn spawn_character(&mut self, cid: ClientId, pos: Vec2) -> Option<EntityId> {
        let slot = self.characters.get_mut(cid.index())?;
        if let Some(old) = slot.take() {
            self.ecs.despawn(old);
        }
        let id = self.ecs.spawn();
        self.ecs.insert(id, Position(pos));
        self.ecs.insert(id, Velocity(Vec2::ZERO));
        self.ecs.insert(
            id,
            Character {
                cid,
                frozen_until: None,
                emote: Emote::Normal,
                emote_until: 0,
                triggers: Triggers::empty(),
                input: PlayerInput::default(),
                prev_input: PlayerInput::default(),
                air_jumped: false,
            },
        );
        self.characters[cid.index()] = Some(id);
        Some(id)
    }

    /// Removes a character. Returns where it was.
    pub fn kill_character(&mut self, cid: ClientId) -> Option<Vec2> {
        let id = self.characters.get_mut(cid.index())?.take()?;
        let pos = self.ecs.get::<Position>(id).map(|p| p.0);
        self.ecs.despawn(id);
        pos
    }

    pub fn character(&self, cid: ClientId) -> Option<&Character> {
        let id = (*self.characters.get(cid.index())?)?;
        self.ecs.get::<Character>(id)
    }

    fn character_mut(&mut self, cid: ClientId) -> Option<&mut Character> {
        let id = (*self.characters.get(cid.index())?)?;
        self.ecs.get_mut::<Character>(id)
    }

    pub fn has_character(&self, cid: ClientId) -> bool {
        self.character(cid).is_some()
    }

    pub fn character_pos(&self, cid: ClientId) -> Option<Vec2> {
        let id = (*self.characters.get(cid.index())?)?;
        self.ecs.get::<Position>(id).map(|p| p.0)
    }

    pub fn character_vel(&self, cid: ClientId) -> Option<Vec2> {
        let id = (*self.characters.get(cid.index())?)?;
        self.ecs.get::<Velocity>(id).map(|v| v.0)
    }

    pub fn is_frozen(&self, cid: ClientId) -> bool {
        self.character(cid).is_some_and(Character::is_frozen)
    }

    pub fn set_input(&mut self, cid: ClientId, input: PlayerInput) {
        if let Some(ch) = self.character_mut(cid) {
            ch.input = input;
        }
    }

    pub fn set_emote(&mut self, cid: ClientId, emote: Emote, until: u64) {
        if let Some(ch) = self.character_mut(cid) {
            ch.emote = emote;
            ch.emote_until = until;
        }
    }

    pub fn triggers(&self, cid: ClientId) -> Triggers {
        self.character(cid).map_or(Triggers::empty(), |c| c.triggers)
    }

    /// Characters within `radius` of `pos`, in slot order.
    pub fn characters_in_radius(
        &self,
        pos: Vec2,
        radius: f32,
    ) -> impl Iterator<Item = (ClientId, Vec2)> + '_ {
        self.characters.iter().flatten().filter_map(move |&id| {
            let ch = self.ecs.get::<Character>(id)?;
            let p = self.ecs.get::<Position>(id)?.0;
            (p.distance(pos) < radius + PHYS_SIZE).then_some((ch.cid, p))
        })
    }

    /// First character along a ray, ignoring `exclude`.
    pub fn hit_scan(&self, from: Vec2, dir: Vec2, reach: f32, exclude: ClientId) -> Option<ClientId> {
        let dir = dir.normalize();
        let mut best: Option<(f32, ClientId)> = None;
        for &id in self.characters.iter().flatten() {
            let (Some(ch), Some(p)) = (self.ecs.get::<Character>(id), self.ecs.get::<Position>(id))
            else {
                continue;
            };
            if ch.cid == exclude {
                continue;
            }
            let rel = p.0 - from;
            let along = rel.dot(dir);
            if along < 0.0 || along > reach {
                continue;
            }
            let closest = from + dir * along;
            if closest.distance(p.0) <= PHYS_SIZE && best.map_or(true, |(d, _)| along < d) {
                best = Some((along, ch.cid));
            }
        }
        best.map(|(_, cid)| cid)
    }

    /// Pushes a character and freezes it for `freeze_ticks` if it was free.
    pub fn apply_hit(
        &mut self,
        cid: ClientId,
        force: Vec2,
        freeze_ticks: u64,
        now: u64,
    ) -> Option<HitOutcome> {
        let id = (*self.characters.get(cid.index())?)?;
        if let Some(vel) = self.ecs.get_mut::<Velocity>(id) {
            vel.0 += force;
        }
        let pos = self.ecs.get::<Position>(id).map(|p| p.0)?;
        let ch = self.ecs.get_mut::<Character>(id)?;
        let froze = freeze_ticks > 0 && ch.frozen_until.is_none();
        if froze {
            ch.frozen_until = Some(now + freeze_ticks);
            ch.triggers |= Triggers::FROZE;
            ch.emote = Emote::Blink;
            ch.emote_until = now + freeze_ticks;
        }
        Some(HitOutcome { pos, froze })
    }

    /// Thaws a frozen character. Returns `false` if it was not frozen.
    pub fn unfreeze(&mut self, cid: ClientId) -> bool {
        match self.character_mut(cid) {
            Some(ch) if ch.frozen_until.is_some() => {
                ch.frozen_until = None;
                ch.triggers |= Triggers::UNFROZE;
                ch.emote = Emote::Normal;
                true
            }
            _ => false,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Other entities
    // ─────────────────────────────────────────────────────────────────────────

    pub fn spawn_projectile(
        &mut self,
        owner: Option<ClientId>,
        pos: Vec2,
        vel: Vec2,
        weapon: i32,
        now: u64,
        lifetime: u64,
        explosive: bool,
    ) -> EntityId {
        let id = self.ecs.spawn();
        self.ecs.insert(id, Position(pos));
        self.ecs.insert(id, Velocity(vel));
        self.ecs.insert(
            id,
            Projectile {
                owner,
                weapon,
                start_tick: now,
                expires: now + lifetime,
                explosive,
            },
        );
        id
    }

    pub fn spawn_laser_text(&mut self, pos: Vec2, points: i32, expires: u64) -> EntityId {
        let id = self.ecs.spawn();
        self.ecs.insert(id, Position(pos));
        self.ecs.insert(id, LaserText { points, expires });
        id
    }

    /// Detaches projectiles from a player that left or changed team.
    pub fn projectiles_lose_owner(&mut self, cid: ClientId) {
        for (_, proj) in self.ecs.iter_mut::<Projectile>() {
            if proj.owner == Some(cid) {
                proj.owner = None;
            }
        }
    }

    pub fn projectile_count(&self) -> usize {
        self.ecs.count::<Projectile>()
    }

    pub fn projectiles(&self) -> impl Iterator<Item = (EntityId, &Projectile)> {
        self.ecs.iter::<Projectile>()
    }

    pub fn laser_texts(&self) -> impl Iterator<Item = (EntityId, &LaserText)> {
        self.ecs.iter::<LaserText>()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Simulation
    // ─────────────────────────────────────────────────────────────────────────

    /// Advances one tick. Nothing moves while paused.
    pub fn tick(&mut self, tuning: &TuningParams, now: u64) -> &TickReport {
        self.report.clear();
        if self.paused {
            return &self.report;
        }

        self.scratch.clear();
        self.scratch.extend(self.characters.iter().flatten().copied());
        for i in 0..self.scratch.len() {
            let id = self.scratch[i];
            self.tick_character(id, tuning, now);
        }
        self.collide_characters(tuning);
        self.tick_projectiles(tuning, now);
        self.expire_laser_texts(now);
        &self.report
    }

    /// Takes the last tick's report; hand it back with [`Self::recycle_report`].
    pub fn take_report(&mut self) -> TickReport {
        std::mem::take(&mut self.report)
    }

    pub fn recycle_report(&mut self, mut report: TickReport) {
        report.clear();
        self.report = report;
    }

    fn tick_character(&mut self, id: EntityId, tuning: &TuningParams, now: u64) {
        let (Some(mut pos), Some(mut vel)) = (
            self.ecs.get::<Position>(id).map(|p| p.0),
            self.ecs.get::<Velocity>(id).map(|v| v.0),
        ) else {
            return;
        };
        let Some(ch) = self.ecs.get_mut::<Character>(id) else {
            return;
        };

        if ch.frozen_until.is_some_and(|t| t <= now) {
            ch.frozen_until = None;
            ch.triggers |= Triggers::UNFROZE;
        }
        if ch.emote_until <= now && ch.emote != Emote::Normal && ch.frozen_until.is_none() {
            ch.emote = Emote::Normal;
        }

        let grounded = pos.y >= GROUND_Y;
        let input = if ch.is_frozen() {
            PlayerInput::default()
        } else {
            ch.input
        };

        vel.y += tuning.gravity.as_f32();

        let (max_speed, accel, friction) = if grounded {
            (
                tuning.ground_control_speed.as_f32(),
                tuning.ground_control_accel.as_f32(),
                tuning.ground_friction.as_f32(),
            )
        } else {
            (
                tuning.air_control_speed.as_f32(),
                tuning.air_control_accel.as_f32(),
                tuning.air_friction.as_f32(),
            )
        };
        if input.direction != 0 {
            let wanted = input.direction as f32 * max_speed;
            vel.x = if vel.x < wanted {
                (vel.x + accel).min(wanted)
            } else {
                (vel.x - accel).max(wanted)
            };
        } else {
            vel.x *= friction;
        }

        if input.jump && !ch.prev_input.jump {
            if grounded {
                vel.y = -tuning.ground_jump_impulse.as_f32();
                ch.triggers |= Triggers::JUMPED;
            } else if !ch.air_jumped {
                vel.y = -tuning.air_jump_impulse.as_f32();
                ch.air_jumped = true;
                ch.triggers |= Triggers::JUMPED;
            }
        }
        if input.hook && !ch.prev_input.hook {
            ch.triggers |= Triggers::HOOKED;
        }
        if input.fire & 1 != 0 && ch.prev_input.fire & 1 == 0 {
            ch.triggers |= Triggers::FIRED;
            let dir = Vec2::new(input.target_x as f32, input.target_y as f32);
            let dir = if dir.len_sq() > 0.0 {
                dir.normalize()
            } else {
                Vec2::new(1.0, 0.0)
            };
            self.report.shots.push(Shot {
                owner: ch.cid,
                pos,
                dir,
                weapon: input.wanted_weapon,
            });
        }
        ch.prev_input = input;

        pos += vel;
        if pos.y > GROUND_Y {
            pos.y = GROUND_Y;
            vel.y = 0.0;
            ch.air_jumped = false;
        }

        self.ecs.insert(id, Position(pos));
        self.ecs.insert(id, Velocity(vel));
    }

    fn collide_characters(&mut self, tuning: &TuningParams) {
        if tuning.player_collision.0 == 0 {
            return;
        }
        for i in 0..self.scratch.len() {
            for j in (i + 1)..self.scratch.len() {
                let (a, b) = (self.scratch[i], self.scratch[j]);
                let (Some(pa), Some(pb)) = (
                    self.ecs.get::<Position>(a).map(|p| p.0),
                    self.ecs.get::<Position>(b).map(|p| p.0),
                ) else {
                    continue;
                };
                if pa.distance(pb) < PHYS_SIZE * 1.25 {
                    for id in [a, b] {
                        if let Some(ch) = self.ecs.get_mut::<Character>(id) {
                            ch.triggers |= Triggers::COLLIDED;
                        }
                    }
                }
            }
        }
    }

    fn tick_projectiles(&mut self, tuning: &TuningParams, now: u64) {
        let gravity = tuning.gravity.as_f32();
        let mut expired = Vec::new();
        for (id, proj) in self.ecs.iter::<Projectile>() {
            if proj.expires <= now {
                expired.push(id);
            }
        }
        for id in expired {
            if let (Some(proj), Some(pos)) =
                (self.ecs.get::<Projectile>(id), self.ecs.get::<Position>(id))
            {
                if proj.explosive {
                    self.report.explosions.push(Explosion {
                        pos: pos.0,
                        owner: proj.owner,
                        weapon: proj.weapon,
                    });
                }
            }
            self.ecs.despawn(id);
        }

        let ids: Vec<EntityId> = self.ecs.iter::<Projectile>().map(|(id, _)| id).collect();
        for id in ids {
            let Some(mut vel) = self.ecs.get::<Velocity>(id).map(|v| v.0) else {
                continue;
            };
            vel.y += gravity;
            if let Some(pos) = self.ecs.get_mut::<Position>(id) {
                pos.0 += vel;
            }
            self.ecs.insert(id, Velocity(vel));
        }
    }

    fn expire_laser_texts(&mut self, now: u64) {
        let expired: Vec<EntityId> = self
            .ecs
            .iter::<LaserText>()
            .filter(|(_, t)| t.expires <= now)
            .map(|(id, _)| id)
            .collect();
        for id in expired {
            self.ecs.despawn(id);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Snapshots
    // ─────────────────────────────────────────────────────────────────────────

    /// Adds every world entity to the viewer's snapshot.
    pub fn snap(&self, builder: &mut SnapshotBuilder) {
        for &id in self.characters.iter().flatten() {
            let (Some(ch), Some(pos), Some(vel)) = (
                self.ecs.get::<Character>(id),
                self.ecs.get::<Position>(id),
                self.ecs.get::<Velocity>(id),
            ) else {
                continue;
            };
            builder.add(SnapItem::Character {
                client_id: ch.cid,
                x: pos.0.x as i32,
                y: pos.0.y as i32,
                vel_x: (vel.0.x * 256.0) as i32,
                vel_y: (vel.0.y * 256.0) as i32,
                frozen: ch.is_frozen(),
                emote: ch.emote,
                triggered: ch.triggers.bits(),
            });
        }
        for (id, proj) in self.ecs.iter::<Projectile>() {
            let (Some(pos), Some(vel)) = (
                self.ecs.get::<Position>(id),
                self.ecs.get::<Velocity>(id),
            ) else {
                continue;
            };
            builder.add(SnapItem::Projectile {
                id: id.0,
                x: pos.0.x as i32,
                y: pos.0.y as i32,
                vel_x: (vel.0.x * 100.0) as i32,
                vel_y: (vel.0.y * 100.0) as i32,
                weapon: proj.weapon,
                start_tick: proj.start_tick,
            });
        }
        for (id, text) in self.ecs.iter::<LaserText>() {
            if let Some(pos) = self.ecs.get::<Position>(id) {
                builder.add(SnapItem::LaserText {
                    id: id.0,
                    x: pos.0.x as i32,
                    y: pos.0.y as i32,
                    points: text.points,
                });
            }
        }
    }

    /// Clears one-tick triggers once every viewer has been snapped.
    pub fn post_snap(&mut self) {
        for (_, ch) in self.ecs.iter_mut::<Character>() {
            ch.triggers = Triggers::empty();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuning() -> TuningParams {
        TuningParams::default()
    }

    #[test]
    fn gravity_pulls_to_floor() {
        let mut world = GameWorld::default();
        world.spawn_character(ClientId(0), Vec2::new(0.0, -100.0));
        for t in 0..200 {
            world.tick(&tuning(), t);
        }
        let pos = world.character_pos(ClientId(0)).unwrap();
        assert_eq!(pos.y, 0.0);
    }

    #[test]
    fn paused_world_does_not_move() {
        let mut world = GameWorld::default();
        world.spawn_character(ClientId(1), Vec2::new(0.0, -100.0));
        world.paused = true;
        world.tick(&tuning(), 1);
        assert_eq!(world.character_pos(ClientId(1)), Some(Vec2::new(0.0, -100.0)));
    }

    #[test]
    fn freeze_expires_and_ignores_input() {
        let mut world = GameWorld::default();
        let cid = ClientId(2);
        world.spawn_character(cid, Vec2::ZERO);
        let hit = world.apply_hit(cid, Vec2::ZERO, 10, 0).unwrap();
        assert!(hit.froze);
        // a second hit while frozen does not refreeze
        assert!(!world.apply_hit(cid, Vec2::ZERO, 10, 1).unwrap().froze);

        world.set_input(
            cid,
            PlayerInput {
                direction: 1,
                ..Default::default()
            },
        );
        world.tick(&tuning(), 5);
        assert_eq!(world.character_vel(cid).map(|v| v.x), Some(0.0));
        assert!(world.is_frozen(cid));

        world.tick(&tuning(), 10);
        assert!(!world.is_frozen(cid));
        assert!(world.triggers(cid).contains(Triggers::UNFROZE));
    }

    #[test]
    fn jump_is_edge_triggered() {
        let mut world = GameWorld::default();
        let cid = ClientId(3);
        world.spawn_character(cid, Vec2::ZERO);
        world.set_input(
            cid,
            PlayerInput {
                jump: true,
                ..Default::default()
            },
        );
        world.tick(&tuning(), 1);
        assert!(world.triggers(cid).contains(Triggers::JUMPED));
        world.post_snap();
        world.tick(&tuning(), 2);
        // still holding jump, in the air: no second trigger
        assert!(!world.triggers(cid).contains(Triggers::JUMPED));
    }

    #[test]
    fn hit_scan_finds_nearest_in_line() {
        let mut world = GameWorld::default();
        world.spawn_character(ClientId(0), Vec2::ZERO);
        world.spawn_character(ClientId(1), Vec2::new(300.0, 0.0));
        world.spawn_character(ClientId(2), Vec2::new(150.0, 10.0));
        let hit = world.hit_scan(Vec2::ZERO, Vec2::new(1.0, 0.0), 800.0, ClientId(0));
        assert_eq!(hit, Some(ClientId(2)));
        let miss = world.hit_scan(Vec2::ZERO, Vec2::new(-1.0, 0.0), 800.0, ClientId(0));
        assert_eq!(miss, None);
    }

    #[test]
    fn explosive_projectiles_report_on_expiry() {
        let mut world = GameWorld::default();
        world.spawn_projectile(
            Some(ClientId(4)),
            Vec2::new(0.0, -50.0),
            Vec2::ZERO,
            weapon::GRENADE,
            0,
            3,
            true,
        );
        world.projectiles_lose_owner(ClientId(4));
        assert_eq!(world.tick(&tuning(), 1).explosions.len(), 0);
        let report = world.tick(&tuning(), 3);
        assert_eq!(report.explosions.len(), 1);
        assert_eq!(report.explosions[0].owner, None);
        assert_eq!(world.projectile_count(), 0);
    }

    #[test]
    fn snapshot_lists_characters_and_texts() {
        let mut world = GameWorld::default();
        world.spawn_character(ClientId(0), Vec2::ZERO);
        world.spawn_laser_text(Vec2::new(0.0, -50.0), 3, 100);
        let mut builder = SnapshotBuilder::default();
        builder.begin(None);
        world.snap(&mut builder);
        assert_eq!(builder.items().len(), 2);
        assert!(matches!(builder.items()[1], SnapItem::LaserText { points: 3, .. }));
    }

    #[test]
    fn kill_removes_character() {
        let mut world = GameWorld::default();
        world.spawn_character(ClientId(5), Vec2::new(10.0, 0.0));
        assert_eq!(world.kill_character(ClientId(5)), Some(Vec2::new(10.0, 0.0)));
        assert!(!world.has_character(ClientId(5)));
        assert_eq!(world.kill_character(ClientId(5)), None);
    }
}
