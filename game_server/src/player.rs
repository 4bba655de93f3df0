//! Player slots.
//!
//! One [`Player`] per connected client (or debug dummy), stored in a fixed
//! array indexed by [`ClientId`]. Slots are reused after a disconnect.

use std::net::IpAddr;

use game_shared::{
    chat::ChatSpamGuard,
    net::ClientId,
    protocol::{Emote, PlayerInput, SkinInfo, Team},
    MAX_CLIENTS,
};

/// Per-match statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerStats {
    /// Opponents frozen by this player's weapon.
    pub kills: i32,
    /// Times this player was hit by an opponent's weapon.
    pub hits: i32,
    /// Spike deaths while frozen.
    pub deaths: i32,
    pub shots: i32,
    pub grabs_normal: i32,
    pub grabs_team: i32,
    pub grabs_gold: i32,
    pub grabs_false: i32,
    pub unfreezing_hammer_hits: i32,
    pub unfreezes: i32,
    pub num_jumped: i32,
    pub num_hooks: i32,
    /// World units travelled.
    pub num_tiles_moved: f32,
    /// Highest horizontal speed in units per tick.
    pub max_speed: f32,
    pub num_tee_collisions: i32,
    pub num_freeze_ticks: i32,
    pub num_emotes: i32,
}

impl PlayerStats {
    /// Kills per hit taken; plain kills when never hit.
    pub fn kd_ratio(&self) -> f32 {
        if self.hits != 0 {
            self.kills as f32 / self.hits as f32
        } else {
            self.kills as f32
        }
    }

    /// Kills per shot.
    pub fn accuracy(&self) -> f32 {
        self.kills as f32 / self.shots.max(1) as f32
    }
}

/// A recorded vote choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ballot {
    /// -1, 0 (none) or +1.
    pub choice: i32,
    /// Global submission order; 0 when no ballot.
    pub seq: u32,
}

/// What a spectator is watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectatorMode {
    FreeView,
    Player(ClientId),
    FlagRed,
    FlagBlue,
}

/// One connected client.
#[derive(Debug, Clone)]
pub struct Player {
    pub cid: ClientId,
    team: Team,
    pub dummy: bool,
    pub authed: bool,
    /// Source address; dummies have none.
    pub addr: Option<IpAddr>,
    pub name: String,
    pub clan: String,
    pub country: i32,
    pub skin: SkinInfo,

    pub ready_to_enter: bool,
    pub ingame: bool,
    /// Round "ready" toggle.
    pub ready: bool,

    pub chat: ChatSpamGuard,
    pub last_vote_try: Option<u64>,
    pub last_vote_call: Option<u64>,
    pub last_set_team: Option<u64>,
    pub last_set_spectator_mode: Option<u64>,
    pub last_emote: Option<u64>,
    pub last_kill: Option<u64>,
    pub last_ready_change: Option<u64>,
    pub last_change_info: Option<u64>,
    /// Team changes are refused before this tick.
    pub team_change_tick: u64,

    pub stats: PlayerStats,
    pub ballot: Ballot,
    pub score: i32,

    /// Emotion override from `/emote` and the ticks it has left.
    pub emotion: Option<Emote>,
    pub emotion_ticks: u64,

    pub spectator_mode: SpectatorMode,
    pub respawn_tick: u64,
    pub input: PlayerInput,
    /// Whether the last tick saw this player's character frozen.
    pub was_frozen: bool,
}

impl Player {
    pub fn new(cid: ClientId, team: Team, dummy: bool, addr: Option<IpAddr>, now: u64) -> Self {
        Self {
            cid,
            team,
            dummy,
            authed: false,
            addr,
            name: format!("({})", cid.0),
            clan: String::new(),
            country: -1,
            skin: SkinInfo::default(),
            ready_to_enter: false,
            ingame: false,
            ready: false,
            chat: ChatSpamGuard::default(),
            last_vote_try: None,
            last_vote_call: None,
            last_set_team: None,
            last_set_spectator_mode: None,
            last_emote: None,
            last_kill: None,
            last_ready_change: None,
            last_change_info: None,
            team_change_tick: now,
            stats: PlayerStats::default(),
            ballot: Ballot::default(),
            score: 0,
            emotion: None,
            emotion_ticks: 0,
            spectator_mode: SpectatorMode::FreeView,
            respawn_tick: now,
            input: PlayerInput::default(),
            was_frozen: false,
        }
    }

    pub fn team(&self) -> Team {
        self.team
    }

    pub(crate) fn set_team(&mut self, team: Team) {
        self.team = team;
        self.spectator_mode = SpectatorMode::FreeView;
    }

    pub fn is_spectator(&self) -> bool {
        self.team.is_spectator()
    }

    /// Connected through the network and in the game, or a dummy.
    pub fn is_active(&self) -> bool {
        self.ingame || self.dummy
    }

    /// `true` once `start` plus `seconds` has not yet passed.
    pub fn within(start: Option<u64>, seconds: u64, tick_speed: u64, now: u64) -> bool {
        start.is_some_and(|t| t + tick_speed * seconds > now)
    }

    /// Per-tick bookkeeping that does not depend on the world.
    pub fn tick(&mut self) {
        if self.emotion_ticks > 0 {
            self.emotion_ticks -= 1;
            if self.emotion_ticks == 0 {
                self.emotion = None;
            }
        }
    }
}

/// Fixed array of player slots.
#[derive(Debug)]
pub struct Players {
    slots: [Option<Player>; MAX_CLIENTS],
}

impl Default for Players {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }
}

impl Players {
    pub fn get(&self, cid: ClientId) -> Option<&Player> {
        self.slots.get(cid.index())?.as_ref()
    }

    pub fn get_mut(&mut self, cid: ClientId) -> Option<&mut Player> {
        self.slots.get_mut(cid.index())?.as_mut()
    }

    pub fn contains(&self, cid: ClientId) -> bool {
        self.get(cid).is_some()
    }

    pub(crate) fn insert(&mut self, player: Player) {
        let idx = player.cid.index();
        if let Some(slot) = self.slots.get_mut(idx) {
            *slot = Some(player);
        }
    }

    pub(crate) fn remove(&mut self, cid: ClientId) -> Option<Player> {
        self.slots.get_mut(cid.index())?.take()
    }

    /// Occupied slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Player> {
        self.slots.iter_mut().flatten()
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }

    /// Players on the given team.
    pub fn team_size(&self, team: Team) -> usize {
        self.iter().filter(|p| p.team() == team).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_reused() {
        let mut players = Players::default();
        players.insert(Player::new(ClientId(0), Team::Red, false, None, 0));
        players.insert(Player::new(ClientId(1), Team::Blue, false, None, 0));
        assert!(!players.contains(ClientId(2)));

        players.remove(ClientId(0));
        assert!(!players.contains(ClientId(0)));
        assert_eq!(players.count(), 1);
        players.insert(Player::new(ClientId(0), Team::Red, false, None, 5));
        assert_eq!(players.get(ClientId(0)).map(|p| p.team()), Some(Team::Red));
        assert_eq!(players.count(), 2);
    }

    #[test]
    fn out_of_range_ids_are_absent() {
        let players = Players::default();
        assert!(players.get(ClientId(400)).is_none());
    }

    #[test]
    fn kd_ratio_without_hits_is_kills() {
        let stats = PlayerStats {
            kills: 4,
            shots: 8,
            ..Default::default()
        };
        assert_eq!(stats.kd_ratio(), 4.0);
        assert_eq!(stats.accuracy(), 0.5);
    }

    #[test]
    fn emotion_expires() {
        let mut p = Player::new(ClientId(0), Team::Red, false, None, 0);
        p.emotion = Some(Emote::Happy);
        p.emotion_ticks = 2;
        p.tick();
        assert_eq!(p.emotion, Some(Emote::Happy));
        p.tick();
        assert_eq!(p.emotion, None);
    }
}
