//! Vote state machine.
//!
//! At most one vote is open at a time. Ballots live on the players; this
//! module owns the deadlines, the enforcement override and the tally.
//!
//! # Tally
//! Players sharing an address count once. The first non-spectator slot of an
//! address leads the group; later slots with the same address, spectators
//! included, fold in. The group's choice is the earliest non-zero ballot.
//! Spectators never start a group of their own.

use std::net::IpAddr;

use game_shared::{
    net::ClientId,
    protocol::{truncate_chars, VoteSetKind},
    MAX_CLIENTS,
};

use crate::{
    player::{Ballot, Players},
    vote_options::{VOTE_CMD_LENGTH, VOTE_DESC_LENGTH},
};

/// Seconds a vote stays open.
pub const VOTE_TIME: u64 = 25;
/// Seconds during which the creator may withdraw.
pub const VOTE_CANCEL_TIME: u64 = 10;
/// Seconds between successful vote calls of one player.
pub const VOTE_COOLDOWN: u64 = 60;
/// Reason length limit (exclusive).
pub const VOTE_REASON_LENGTH: usize = 16;

/// When an open vote closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    At(u64),
    /// Close as aborted on the next update.
    Abort,
}

/// Admin override of the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Enforce {
    #[default]
    Unknown,
    Yes,
    No,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveVote {
    pub close: Deadline,
    pub cancel_tick: u64,
    pub description: String,
    pub command: String,
    pub reason: String,
    /// Player the vote is about (kick/spectate).
    pub subject: Option<ClientId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoteCount {
    pub total: i32,
    pub yes: i32,
    pub no: i32,
}

/// What the update step should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteDecision {
    Abort,
    Pass { forced: bool },
    Fail { forced: bool },
    /// Still open; broadcast the new count.
    Status(VoteCount),
    Pending,
}

/// Outcome of a ballot message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastResult {
    Recorded,
    /// The creator withdrew.
    Aborted,
    Ignored,
}

struct Group {
    addr: Option<IpAddr>,
    ballot: Ballot,
}

pub struct VoteState {
    active: Option<ActiveVote>,
    pub kind: VoteSetKind,
    pub creator: Option<ClientId>,
    pub enforce: Enforce,
    pub needs_tally: bool,
    seq: u32,
    groups: Vec<Group>,
}

impl Default for VoteState {
    fn default() -> Self {
        Self {
            active: None,
            kind: VoteSetKind::Unknown,
            creator: None,
            enforce: Enforce::Unknown,
            needs_tally: false,
            seq: 0,
            groups: Vec::with_capacity(MAX_CLIENTS),
        }
    }
}

impl VoteState {
    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self) -> Option<&ActiveVote> {
        self.active.as_ref()
    }

    /// Opens a vote. Returns `false` if one is already open.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        &mut self,
        players: &mut Players,
        kind: VoteSetKind,
        creator: ClientId,
        subject: Option<ClientId>,
        description: &str,
        command: &str,
        reason: &str,
        now: u64,
        tick_speed: u64,
    ) -> bool {
        if self.active.is_some() {
            return false;
        }
        self.enforce = Enforce::Unknown;
        for p in players.iter_mut() {
            p.ballot = Ballot::default();
        }
        self.seq = 0;
        self.kind = kind;
        self.creator = Some(creator);
        self.active = Some(ActiveVote {
            close: Deadline::At(now + tick_speed * VOTE_TIME),
            cancel_tick: now + tick_speed * VOTE_CANCEL_TIME,
            description: truncate_chars(description, VOTE_DESC_LENGTH - 1),
            command: truncate_chars(command, VOTE_CMD_LENGTH - 1),
            reason: truncate_chars(reason, VOTE_REASON_LENGTH - 1),
            subject,
        });
        self.needs_tally = true;

        // the creator votes yes
        if let Some(p) = players.get_mut(creator) {
            self.seq += 1;
            p.ballot = Ballot {
                choice: 1,
                seq: self.seq,
            };
            p.last_vote_call = Some(now);
        }
        true
    }

    /// Seconds left, for `VoteSet`.
    pub fn timeout_secs(&self, now: u64, tick_speed: u64) -> i32 {
        match self.active.as_ref().map(|a| a.close) {
            Some(Deadline::At(close)) if tick_speed > 0 => {
                (close.saturating_sub(now) / tick_speed) as i32
            }
            _ => 0,
        }
    }

    /// Applies a ballot message from `cid`.
    pub fn cast(&mut self, players: &mut Players, cid: ClientId, choice: i32, now: u64) -> CastResult {
        let Some(active) = self.active.as_mut() else {
            return CastResult::Ignored;
        };
        let Some(player) = players.get_mut(cid) else {
            return CastResult::Ignored;
        };

        if player.ballot.choice == 0 {
            if choice == 0 {
                return CastResult::Ignored;
            }
            self.seq += 1;
            player.ballot = Ballot {
                choice,
                seq: self.seq,
            };
            self.needs_tally = true;
            CastResult::Recorded
        } else if self.creator == Some(cid) && choice == -1 && now <= active.cancel_tick {
            active.close = Deadline::Abort;
            CastResult::Aborted
        } else {
            CastResult::Ignored
        }
    }

    /// Counts ballots grouped by address.
    pub fn tally(&mut self, players: &Players) -> VoteCount {
        self.groups.clear();
        for p in players.iter() {
            match self.groups.iter_mut().find(|g| g.addr == p.addr) {
                Some(group) => {
                    let b = p.ballot;
                    if b.choice != 0 && (group.ballot.choice == 0 || group.ballot.seq > b.seq) {
                        group.ballot = b;
                    }
                }
                None if !p.is_spectator() => self.groups.push(Group {
                    addr: p.addr,
                    ballot: p.ballot,
                }),
                None => {}
            }
        }

        let mut count = VoteCount {
            total: self.groups.len() as i32,
            ..Default::default()
        };
        for g in &self.groups {
            match g.ballot.choice {
                c if c > 0 => count.yes += 1,
                c if c < 0 => count.no += 1,
                _ => {}
            }
        }
        count
    }

    /// Decides the next step for an open vote.
    pub fn decide(&mut self, players: &Players, now: u64) -> VoteDecision {
        let Some(active) = self.active.as_ref() else {
            return VoteDecision::Pending;
        };
        let close = match active.close {
            Deadline::Abort => return VoteDecision::Abort,
            Deadline::At(t) => t,
        };

        let count = if self.needs_tally {
            self.tally(players)
        } else {
            VoteCount::default()
        };

        if self.enforce == Enforce::Yes || (self.needs_tally && count.yes >= count.total / 2 + 1) {
            VoteDecision::Pass {
                forced: self.enforce == Enforce::Yes,
            }
        } else if self.enforce == Enforce::No
            || (self.needs_tally && count.no >= (count.total + 1) / 2)
            || now > close
        {
            VoteDecision::Fail {
                forced: self.enforce == Enforce::No,
            }
        } else if self.needs_tally {
            self.needs_tally = false;
            VoteDecision::Status(count)
        } else {
            VoteDecision::Pending
        }
    }

    /// Closes the vote. Returns the closed vote.
    pub fn end(&mut self, forced: bool) -> Option<ActiveVote> {
        if forced {
            self.creator = None;
        }
        self.active.take()
    }

    /// The subject left: kick, spectate and ban-of-banned votes are void.
    pub fn abort_on_disconnect(&mut self, cid: ClientId, subject_banned: bool) {
        if let Some(active) = self.active.as_mut() {
            let cmd = active.command.as_str();
            if active.subject == Some(cid)
                && (cmd.starts_with("kick ")
                    || cmd.starts_with("set_team ")
                    || (cmd.starts_with("ban ") && subject_banned))
            {
                active.close = Deadline::Abort;
            }
        }
    }

    /// The subject moved to spectators: spectate votes are void.
    pub fn abort_on_team_change(&mut self, cid: ClientId) {
        if let Some(active) = self.active.as_mut() {
            if active.subject == Some(cid) && active.command.starts_with("set_team ") {
                active.close = Deadline::Abort;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::Player;
    use game_shared::protocol::Team;
    use std::net::Ipv4Addr;

    const TS: u64 = 50;

    fn ip(last: u8) -> Option<IpAddr> {
        Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)))
    }

    fn players(specs: &[(u32, Team, Option<IpAddr>)]) -> Players {
        let mut players = Players::default();
        for &(id, team, addr) in specs {
            players.insert(Player::new(ClientId(id), team, false, addr, 0));
        }
        players
    }

    fn start(vote: &mut VoteState, players: &mut Players, creator: u32) {
        assert!(vote.start(
            players,
            VoteSetKind::StartOption,
            ClientId(creator),
            None,
            "Restart",
            "restart",
            "No reason given",
            0,
            TS,
        ));
    }

    #[test]
    fn creator_votes_yes_and_second_start_is_noop() {
        let mut ps = players(&[(0, Team::Red, ip(1)), (1, Team::Blue, ip(2))]);
        let mut vote = VoteState::default();
        start(&mut vote, &mut ps, 0);
        assert_eq!(ps.get(ClientId(0)).unwrap().ballot, Ballot { choice: 1, seq: 1 });
        assert_eq!(ps.get(ClientId(0)).unwrap().last_vote_call, Some(0));
        assert!(!vote.start(
            &mut ps,
            VoteSetKind::StartKick,
            ClientId(1),
            None,
            "x",
            "y",
            "z",
            5,
            TS
        ));
        assert_eq!(vote.active().unwrap().command, "restart");
        assert_eq!(vote.timeout_secs(0, TS), 25);
    }

    #[test]
    fn majority_passes() {
        let mut ps = players(&[
            (0, Team::Red, ip(1)),
            (1, Team::Red, ip(2)),
            (2, Team::Blue, ip(3)),
        ]);
        let mut vote = VoteState::default();
        start(&mut vote, &mut ps, 0);
        assert_eq!(
            vote.decide(&ps, 1),
            VoteDecision::Status(VoteCount { total: 3, yes: 1, no: 0 })
        );
        assert_eq!(vote.cast(&mut ps, ClientId(1), 1, 2), CastResult::Recorded);
        assert_eq!(vote.decide(&ps, 2), VoteDecision::Pass { forced: false });
    }

    #[test]
    fn same_address_counts_once() {
        let mut ps = players(&[
            (0, Team::Red, ip(1)),
            (1, Team::Red, ip(7)),
            (2, Team::Blue, ip(7)),
            (3, Team::Blue, ip(7)),
        ]);
        let mut vote = VoteState::default();
        start(&mut vote, &mut ps, 0);
        vote.cast(&mut ps, ClientId(2), 1, 1);
        vote.cast(&mut ps, ClientId(3), 1, 2);
        let count = vote.tally(&ps);
        assert_eq!(count, VoteCount { total: 2, yes: 2, no: 0 });
    }

    #[test]
    fn group_uses_earliest_ballot() {
        let mut ps = players(&[
            (0, Team::Red, ip(1)),
            (1, Team::Red, ip(9)),
            (2, Team::Blue, ip(9)),
        ]);
        let mut vote = VoteState::default();
        start(&mut vote, &mut ps, 0);
        vote.cast(&mut ps, ClientId(2), -1, 1);
        vote.cast(&mut ps, ClientId(1), 1, 2);
        assert_eq!(vote.tally(&ps), VoteCount { total: 2, yes: 1, no: 1 });
    }

    #[test]
    fn spectators_only_fold_into_later_groups() {
        let mut ps = players(&[
            (0, Team::Red, ip(1)),
            (1, Team::Spectators, ip(5)),
            (2, Team::Red, ip(5)),
            (3, Team::Spectators, ip(5)),
            (4, Team::Spectators, ip(6)),
        ]);
        let mut vote = VoteState::default();
        start(&mut vote, &mut ps, 0);
        // slot 1 precedes its group's leader and is ignored
        vote.cast(&mut ps, ClientId(1), -1, 1);
        // slot 3 follows the leader and counts for the group
        vote.cast(&mut ps, ClientId(3), 1, 2);
        // slot 4 has no group at all
        vote.cast(&mut ps, ClientId(4), -1, 3);
        assert_eq!(vote.tally(&ps), VoteCount { total: 2, yes: 2, no: 0 });
    }

    #[test]
    fn no_majority_fails_and_timeout_fails() {
        let mut ps = players(&[(0, Team::Red, ip(1)), (1, Team::Red, ip(2))]);
        let mut vote = VoteState::default();
        start(&mut vote, &mut ps, 0);
        vote.cast(&mut ps, ClientId(1), -1, 1);
        // 1 no of 2 total: (2+1)/2 = 1
        assert_eq!(vote.decide(&ps, 1), VoteDecision::Fail { forced: false });

        let mut ps = players(&[(0, Team::Red, ip(1)), (1, Team::Red, ip(2)), (2, Team::Red, ip(3))]);
        let mut vote = VoteState::default();
        start(&mut vote, &mut ps, 0);
        assert!(matches!(vote.decide(&ps, 1), VoteDecision::Status(_)));
        assert_eq!(vote.decide(&ps, TS * VOTE_TIME), VoteDecision::Pending);
        assert_eq!(
            vote.decide(&ps, TS * VOTE_TIME + 1),
            VoteDecision::Fail { forced: false }
        );
    }

    #[test]
    fn enforce_overrides() {
        let mut ps = players(&[(0, Team::Red, ip(1)), (1, Team::Red, ip(2)), (2, Team::Red, ip(3))]);
        let mut vote = VoteState::default();
        start(&mut vote, &mut ps, 0);
        vote.needs_tally = false;
        vote.enforce = Enforce::No;
        assert_eq!(vote.decide(&ps, 1), VoteDecision::Fail { forced: true });
        vote.enforce = Enforce::Yes;
        assert_eq!(vote.decide(&ps, 1), VoteDecision::Pass { forced: true });
        vote.end(true);
        assert_eq!(vote.creator, None);
        assert!(!vote.is_open());
    }

    #[test]
    fn creator_can_withdraw_only_early() {
        let mut ps = players(&[(0, Team::Red, ip(1)), (1, Team::Red, ip(2))]);
        let mut vote = VoteState::default();
        start(&mut vote, &mut ps, 0);
        // another player's no is just a ballot
        assert_eq!(vote.cast(&mut ps, ClientId(1), -1, 1), CastResult::Recorded);
        // changing a ballot is ignored
        assert_eq!(vote.cast(&mut ps, ClientId(1), 1, 2), CastResult::Ignored);
        assert_eq!(
            vote.cast(&mut ps, ClientId(0), -1, TS * VOTE_CANCEL_TIME + 1),
            CastResult::Ignored
        );
        assert_eq!(
            vote.cast(&mut ps, ClientId(0), -1, TS * VOTE_CANCEL_TIME),
            CastResult::Aborted
        );
        assert_eq!(vote.decide(&ps, 3), VoteDecision::Abort);
    }

    #[test]
    fn subject_leaving_aborts_matching_commands() {
        let mut ps = players(&[(0, Team::Red, ip(1)), (1, Team::Red, ip(2))]);
        let mut vote = VoteState::default();
        vote.start(
            &mut ps,
            VoteSetKind::StartKick,
            ClientId(0),
            Some(ClientId(1)),
            " 1: bob",
            "ban 10.0.0.2 5 Banned by vote",
            "",
            0,
            TS,
        );
        vote.abort_on_disconnect(ClientId(1), false);
        assert_eq!(vote.active().unwrap().close, Deadline::At(TS * VOTE_TIME));
        vote.abort_on_team_change(ClientId(1));
        assert_eq!(vote.active().unwrap().close, Deadline::At(TS * VOTE_TIME));
        vote.abort_on_disconnect(ClientId(1), true);
        assert_eq!(vote.active().unwrap().close, Deadline::Abort);
    }
}
