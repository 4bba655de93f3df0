//! Configuration system.
//!
//! Loads server configuration from JSON strings (file IO left to the app).
//! Game variables are also reachable by name from the admin console.

use serde::{Deserialize, Serialize};

use crate::{
    console::{ConsoleError, CvarValue},
    protocol::truncate_chars,
};

/// Root server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, e.g. `127.0.0.1:8303`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Fixed simulation tick rate.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// Game variables.
    #[serde(default)]
    pub game: GameConfig,
}

fn default_server_addr() -> String {
    "127.0.0.1:8303".to_string()
}

fn default_tick_hz() -> u32 {
    50
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            tick_hz: default_tick_hz(),
            game: GameConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

/// Which broadcast a variable change should trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarChain {
    None,
    Motd,
    Settings,
    GameInfo,
}

macro_rules! game_config {
    (
        ints { $( $iname:ident = $idef:expr, $imin:expr, $imax:expr, $ichain:ident, $idesc:literal; )* }
        strs { $( $sname:ident = $sdef:expr, $slen:expr, $schain:ident, $sdesc:literal; )* }
    ) => {
        /// Game variables (`sv_*`).
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct GameConfig {
            $( #[doc = $idesc] pub $iname: i32, )*
            $( #[doc = $sdesc] pub $sname: String, )*
        }

        impl Default for GameConfig {
            fn default() -> Self {
                Self {
                    $( $iname: $idef, )*
                    $( $sname: String::from($sdef), )*
                }
            }
        }

        impl GameConfig {
            /// Every variable name.
            pub const VAR_NAMES: &'static [&'static str] = &[
                $( stringify!($iname), )*
                $( stringify!($sname), )*
            ];

            pub fn get_var(&self, name: &str) -> Option<CvarValue> {
                match name {
                    $( stringify!($iname) => Some(CvarValue::Int(self.$iname as i64)), )*
                    $( stringify!($sname) => Some(CvarValue::String(self.$sname.clone())), )*
                    _ => None,
                }
            }

            /// Sets a variable from console text. Integers are clamped to
            /// their range; strings are cut to their maximum length.
            pub fn set_var(&mut self, name: &str, raw: &str) -> Result<CvarValue, ConsoleError> {
                match name {
                    $( stringify!($iname) => {
                        let v: i32 = raw.trim().parse().map_err(|_| ConsoleError::InvalidInteger {
                            command: name.to_string(),
                            value: raw.to_string(),
                        })?;
                        self.$iname = v.clamp($imin, $imax);
                        Ok(CvarValue::Int(self.$iname as i64))
                    } )*
                    $( stringify!($sname) => {
                        let raw = raw.trim();
                        let raw = raw
                            .strip_prefix('"')
                            .and_then(|s| s.strip_suffix('"'))
                            .unwrap_or(raw);
                        self.$sname = truncate_chars(raw, $slen);
                        Ok(CvarValue::String(self.$sname.clone()))
                    } )*
                    _ => Err(ConsoleError::UnknownCommand(name.to_string())),
                }
            }

            pub fn chain_of(name: &str) -> VarChain {
                match name {
                    $( stringify!($iname) => VarChain::$ichain, )*
                    $( stringify!($sname) => VarChain::$schain, )*
                    _ => VarChain::None,
                }
            }

            pub fn describe(name: &str) -> Option<&'static str> {
                match name {
                    $( stringify!($iname) => Some($idesc), )*
                    $( stringify!($sname) => Some($sdesc), )*
                    _ => None,
                }
            }
        }
    };
}

game_config! {
    ints {
        sv_spamprotection = 1, 0, 1, None, "Spam protection";
        sv_vote_kick = 1, 0, 1, Settings, "Allow voting to kick players";
        sv_vote_kick_min = 0, 0, 64, Settings, "Minimum number of players required to start a kick vote";
        sv_vote_kick_bantime = 5, 0, 1440, None, "The time to ban a player if kicked by vote. 0 makes it just use kick";
        sv_vote_spectate = 1, 0, 1, Settings, "Allow voting to move players to spectators";
        sv_vote_spectate_rejoindelay = 3, 0, 1000, None, "How many minutes to wait before a player can rejoin after being moved to spectators by vote";
        sv_tournament_mode = 0, 0, 2, None, "Tournament mode. When enabled, players joins the server as spectator (2=additional restricted spectator chat)";
        sv_emoticon_delay = 3, 0, 60, None, "Seconds between emoticons";
        sv_kill_delay = 1, -1, 9999, None, "Seconds between self kills (-1 disables self kill)";
        sv_player_slots = 8, 0, 64, Settings, "Number of slots to reserve for players";
        sv_max_clients = 16, 1, 64, None, "Number of clients that can connect";
        sv_teambalance_time = 1, 0, 1000, Settings, "How many minutes to wait before autobalancing teams";
        sv_silent_spectator_mode = 1, 0, 1, None, "Mute join/leave message of spectator";
        sv_emote_wheel = 1, 0, 1, None, "Enable the emote wheel and the /emote command";
        sv_emotional_tees = 1, 0, 1, None, "Enable the /emote command";
        sv_trivia = 1, 0, 1, None, "Send a random trivia line after each round";
        sv_scorelimit = 800, 0, 100000, GameInfo, "Score limit (0 disables)";
        sv_timelimit = 0, 0, 1000, GameInfo, "Time limit in minutes (0 disables)";
        sv_matches_per_map = 0, 0, 100, GameInfo, "Number of matches on each map before rotating";
        sv_round_end_delay = 10, 0, 60, None, "Seconds the scoreboard stays up after a round";
        sv_freeze_time = 10, 0, 60, None, "Seconds a hit tee stays frozen";
        dbg_dummies = 0, 0, 63, None, "Number of debug dummies";
        debug = 0, 0, 1, None, "Debug mode";
    }
    strs {
        sv_motd = "", 899, Motd, "Message of the day to display for the clients";
        sv_gametype = "fng2", 31, None, "Game type (fng2, fng2solo, fng2boom, fng2boomsolo, dm, tdm, ctf, lms, lts)";
        sv_map = "fng_default", 127, None, "Map to use on the server";
    }
}
