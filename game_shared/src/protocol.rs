//! Game protocol messages.
//!
//! Inbound messages carry raw integers for every ranged field; nothing is
//! interpreted before [`ClientMsg::validate`] has accepted the message.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{net::ClientId, snapshot::Snapshot};

/// Number of skin parts per tee.
pub const NUM_SKIN_PARTS: usize = 6;
/// Longest skin part name, in characters.
pub const MAX_SKIN_PART_NAME: usize = 23;
/// Number of emoticons.
pub const NUM_EMOTICONS: i32 = 16;
pub const MAX_NAME_CHARS: usize = 15;
pub const MAX_CLAN_CHARS: usize = 11;
pub const NUM_WEAPONS: i32 = 6;
/// Longest inbound chat payload accepted before sanitation.
pub const MAX_SAY_BYTES: usize = 1024;

/// Team affiliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
    Spectators,
    Red,
    Blue,
}

impl Team {
    pub fn from_i32(v: i32) -> Option<Team> {
        match v {
            -1 => Some(Team::Spectators),
            0 => Some(Team::Red),
            1 => Some(Team::Blue),
            _ => None,
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            Team::Spectators => -1,
            Team::Red => 0,
            Team::Blue => 1,
        }
    }

    /// Red <-> Blue; spectators stay.
    pub fn opposite(self) -> Team {
        match self {
            Team::Red => Team::Blue,
            Team::Blue => Team::Red,
            Team::Spectators => Team::Spectators,
        }
    }

    pub fn is_spectator(self) -> bool {
        self == Team::Spectators
    }
}

/// Chat scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatMode {
    None,
    All,
    Team,
    Whisper,
}

/// Facial expression of a tee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Emote {
    Normal,
    Pain,
    Happy,
    Surprise,
    Angry,
    Blink,
}

impl Emote {
    /// Parses the names accepted by `/emote`.
    pub fn from_name(name: &str) -> Option<Emote> {
        let name = name.trim();
        [
            ("angry", Emote::Angry),
            ("blink", Emote::Blink),
            ("close", Emote::Blink),
            ("happy", Emote::Happy),
            ("pain", Emote::Pain),
            ("surprise", Emote::Surprise),
            ("normal", Emote::Normal),
        ]
        .into_iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, e)| e)
    }
}

/// Emoticon bubble shown above a tee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Emoticon {
    Oop,
    Exclamation,
    Hearts,
    Drop,
    DotDot,
    Music,
    Sorry,
    Ghost,
    Sushi,
    SplatTee,
    DevilTee,
    Zomg,
    Zzz,
    Wtf,
    Eyes,
    Question,
}

impl Emoticon {
    const ALL: [Emoticon; NUM_EMOTICONS as usize] = [
        Emoticon::Oop,
        Emoticon::Exclamation,
        Emoticon::Hearts,
        Emoticon::Drop,
        Emoticon::DotDot,
        Emoticon::Music,
        Emoticon::Sorry,
        Emoticon::Ghost,
        Emoticon::Sushi,
        Emoticon::SplatTee,
        Emoticon::DevilTee,
        Emoticon::Zomg,
        Emoticon::Zzz,
        Emoticon::Wtf,
        Emoticon::Eyes,
        Emoticon::Question,
    ];

    pub fn from_index(i: i32) -> Option<Emoticon> {
        usize::try_from(i).ok().and_then(|i| Self::ALL.get(i).copied())
    }

    /// Face the tee makes while the bubble is shown.
    pub fn emote(self) -> Emote {
        match self {
            Emoticon::Oop | Emoticon::Sorry | Emoticon::Sushi => Emote::Pain,
            Emoticon::Exclamation | Emoticon::Ghost | Emoticon::Wtf | Emoticon::Question => {
                Emote::Surprise
            }
            Emoticon::Hearts | Emoticon::Music | Emoticon::Eyes => Emote::Happy,
            Emoticon::Drop | Emoticon::DotDot | Emoticon::Zzz => Emote::Blink,
            Emoticon::SplatTee | Emoticon::DevilTee | Emoticon::Zomg => Emote::Angry,
        }
    }
}

/// One skin part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SkinPart {
    pub name: String,
    pub use_custom_color: bool,
    pub color: u32,
}

/// Full skin descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SkinInfo {
    pub parts: [SkinPart; NUM_SKIN_PARTS],
}

impl SkinInfo {
    /// Copy with every part name cut to [`MAX_SKIN_PART_NAME`] characters.
    pub fn clamped(&self) -> SkinInfo {
        let mut out = self.clone();
        for part in &mut out.parts {
            part.name = truncate_chars(&part.name, MAX_SKIN_PART_NAME);
        }
        out
    }
}

/// Returns the first `max` characters of `s`.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Player input for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PlayerInput {
    pub direction: i32,
    pub target_x: i32,
    pub target_y: i32,
    pub jump: bool,
    pub fire: i32,
    pub hook: bool,
    pub player_flags: i32,
    pub wanted_weapon: i32,
    pub next_weapon: i32,
    pub prev_weapon: i32,
}

impl PlayerInput {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        check_range("player_input", "direction", self.direction, -1, 1)?;
        check_range("player_input", "wanted_weapon", self.wanted_weapon, 0, NUM_WEAPONS)?;
        check_range("player_input", "player_flags", self.player_flags, 0, 0xff)?;
        Ok(())
    }
}

/// Client -> server game messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMsg {
    Say {
        mode: ChatMode,
        target: Option<ClientId>,
        message: String,
    },
    SetTeam {
        team: i32,
    },
    SetSpectatorMode {
        mode: i32,
        spectator_id: Option<ClientId>,
    },
    StartInfo {
        name: String,
        clan: String,
        country: i32,
        skin: SkinInfo,
    },
    Kill,
    ReadyChange,
    Emoticon {
        emoticon: i32,
    },
    Vote {
        vote: i32,
    },
    CallVote {
        kind: String,
        value: String,
        reason: String,
        force: bool,
    },
    SkinChange {
        skin: SkinInfo,
    },
    Command {
        name: String,
        arguments: String,
    },
    Input {
        input: PlayerInput,
        predicted: bool,
    },
}

/// Protocol validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("'{msg}' field '{field}' out of range: {value}")]
    OutOfRange {
        msg: &'static str,
        field: &'static str,
        value: i64,
    },
    #[error("'{msg}' field '{field}' too long")]
    TooLong {
        msg: &'static str,
        field: &'static str,
    },
    #[error("'{msg}' field '{field}' contains control characters")]
    ControlCharacters {
        msg: &'static str,
        field: &'static str,
    },
}

fn check_range(
    msg: &'static str,
    field: &'static str,
    value: i32,
    min: i32,
    max: i32,
) -> Result<(), ProtocolError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ProtocolError::OutOfRange {
            msg,
            field,
            value: value as i64,
        })
    }
}

fn check_text(
    msg: &'static str,
    field: &'static str,
    value: &str,
    max_bytes: usize,
) -> Result<(), ProtocolError> {
    if value.len() > max_bytes {
        return Err(ProtocolError::TooLong { msg, field });
    }
    if value.chars().any(|c| c.is_control() && c != '\n') {
        return Err(ProtocolError::ControlCharacters { msg, field });
    }
    Ok(())
}

fn check_client(msg: &'static str, field: &'static str, id: Option<ClientId>) -> Result<(), ProtocolError> {
    match id {
        Some(id) if id.index() >= crate::MAX_CLIENTS => Err(ProtocolError::OutOfRange {
            msg,
            field,
            value: id.0 as i64,
        }),
        _ => Ok(()),
    }
}

impl ClientMsg {
    /// Message name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ClientMsg::Say { .. } => "say",
            ClientMsg::SetTeam { .. } => "set_team",
            ClientMsg::SetSpectatorMode { .. } => "set_spectator_mode",
            ClientMsg::StartInfo { .. } => "start_info",
            ClientMsg::Kill => "kill",
            ClientMsg::ReadyChange => "ready_change",
            ClientMsg::Emoticon { .. } => "emoticon",
            ClientMsg::Vote { .. } => "vote",
            ClientMsg::CallVote { .. } => "call_vote",
            ClientMsg::SkinChange { .. } => "skin_change",
            ClientMsg::Command { .. } => "command",
            ClientMsg::Input { .. } => "input",
        }
    }

    /// Schema check run before any interpretation.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let msg = self.name();
        match self {
            ClientMsg::Say {
                mode,
                target,
                message,
            } => {
                if *mode == ChatMode::None {
                    return Err(ProtocolError::OutOfRange {
                        msg,
                        field: "mode",
                        value: 0,
                    });
                }
                check_client(msg, "target", *target)?;
                check_text(msg, "message", message, MAX_SAY_BYTES)
            }
            ClientMsg::SetTeam { team } => check_range(msg, "team", *team, -1, 1),
            ClientMsg::SetSpectatorMode { mode, spectator_id } => {
                check_range(msg, "mode", *mode, 0, 3)?;
                check_client(msg, "spectator_id", *spectator_id)
            }
            ClientMsg::StartInfo {
                name,
                clan,
                country,
                skin,
            } => {
                check_text(msg, "name", name, 4 * MAX_NAME_CHARS)?;
                check_text(msg, "clan", clan, 4 * MAX_CLAN_CHARS)?;
                check_range(msg, "country", *country, -1, 999)?;
                check_skin(msg, skin)
            }
            ClientMsg::Kill | ClientMsg::ReadyChange => Ok(()),
            ClientMsg::Emoticon { emoticon } => {
                check_range(msg, "emoticon", *emoticon, 0, NUM_EMOTICONS - 1)
            }
            ClientMsg::Vote { vote } => check_range(msg, "vote", *vote, -1, 1),
            ClientMsg::CallVote {
                kind,
                value,
                reason,
                ..
            } => {
                check_text(msg, "type", kind, 32)?;
                check_text(msg, "value", value, 256)?;
                check_text(msg, "reason", reason, 256)
            }
            ClientMsg::SkinChange { skin } => check_skin(msg, skin),
            ClientMsg::Command { name, arguments } => {
                check_text(msg, "name", name, 256)?;
                check_text(msg, "arguments", arguments, 256)
            }
            ClientMsg::Input { input, .. } => input.validate(),
        }
    }
}

fn check_skin(msg: &'static str, skin: &SkinInfo) -> Result<(), ProtocolError> {
    for part in &skin.parts {
        check_text(msg, "skin_part_name", &part.name, 4 * MAX_SKIN_PART_NAME)?;
    }
    Ok(())
}

/// Vote state sent with `VoteSet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteSetKind {
    Unknown,
    StartOption,
    StartKick,
    StartSpectate,
    EndAbort,
    EndPass,
    EndFail,
}

/// Parameterized game messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameMsgId {
    TeamSwap,
    SpecInvalidId,
    TeamShuffle,
    TeamBalance,
    TeamAll,
    TeamBalanceVictim,
    GamePaused,
}

/// Server settings summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    pub kick_vote: bool,
    pub kick_min: i32,
    pub spec_vote: bool,
    pub team_lock: bool,
    pub team_balance: bool,
    pub player_slots: i32,
}

/// Server -> client game messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMsg {
    Chat {
        mode: ChatMode,
        client_id: Option<ClientId>,
        target_id: Option<ClientId>,
        message: String,
    },
    Broadcast {
        message: String,
    },
    Emoticon {
        client_id: ClientId,
        emoticon: Emoticon,
    },
    WeaponPickup {
        weapon: i32,
    },
    Motd {
        message: String,
    },
    ServerSettings(ServerSettings),
    SkinChange {
        client_id: ClientId,
        skin: SkinInfo,
    },
    GameMsg {
        id: GameMsgId,
        params: Vec<i32>,
    },
    VoteSet {
        client_id: Option<ClientId>,
        kind: VoteSetKind,
        timeout: i32,
        description: String,
        reason: String,
    },
    VoteStatus {
        total: i32,
        yes: i32,
        no: i32,
        pass: i32,
    },
    VoteOptionAdd {
        description: String,
    },
    VoteOptionRemove {
        description: String,
    },
    VoteOptionListAdd {
        descriptions: Vec<String>,
    },
    VoteClearOptions,
    TuneParams {
        params: Vec<i32>,
    },
    ReadyToEnter,
    ClientInfo {
        client_id: ClientId,
        local: bool,
        team: Team,
        name: String,
        clan: String,
        country: i32,
        silent: bool,
        skin: SkinInfo,
    },
    ClientDrop {
        client_id: ClientId,
        reason: String,
        silent: bool,
    },
    CommandInfo {
        name: String,
        help: String,
        args_format: String,
    },
    DemoClientEnter {
        name: String,
        client_id: ClientId,
        team: Team,
    },
    DemoClientLeave {
        name: String,
        reason: String,
    },
    Snapshot(Snapshot),
}
