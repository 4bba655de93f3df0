//! Admin console.
//!
//! Lines are split into `;`-separated statements. Each statement is either
//! a registered command, parsed against the command's argument format, or a
//! config variable (`sv_motd "hi"` sets, a bare name prints the value).
//!
//! Passed votes run their command through here too. Those calls carry
//! [`ExecSource::Vote`] and may only use commands flagged
//! [`CommandFlags::VOTE_SAFE`], which is also what `add_vote` accepts.

use std::net::IpAddr;

use anyhow::{bail, Context};
use game_shared::{
    config::{GameConfig, VarChain},
    console::{parse_args, split_command, split_statements, CommandFlags, ConsoleArgs, ConsoleError},
    net::ClientId,
    protocol::{ChatMode, GameMsgId, ServerMsg, Team},
    tuning::{TuningParams, NUM_TUNING_PARAMS},
    MAX_CLIENTS,
};
use tracing::debug;

use crate::{
    context::{controller_view, GameContext},
    outbox::Recipient,
    vote::Enforce,
};

/// Who issued a console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecSource {
    /// Local operator.
    Server,
    /// A vote that passed.
    Vote,
    /// An authenticated client forcing a vote.
    Client(ClientId),
}

pub type ConsoleHandler = fn(&mut GameContext, &ConsoleArgs) -> anyhow::Result<()>;

pub struct ConsoleCommand {
    pub name: &'static str,
    pub format: &'static str,
    pub flags: CommandFlags,
    pub help: &'static str,
    handler: ConsoleHandler,
}

const GAME: CommandFlags = CommandFlags::SERVER.union(CommandFlags::VOTE_SAFE);
const ADMIN: CommandFlags = CommandFlags::SERVER;
const BAN_MINUTES_DEFAULT: i32 = 30;

macro_rules! commands {
    ($( $name:literal, $format:literal, $flags:expr, $handler:ident, $help:literal; )*) => {
        static COMMANDS: &[ConsoleCommand] = &[
            $( ConsoleCommand {
                name: $name,
                format: $format,
                flags: $flags,
                help: $help,
                handler: $handler,
            }, )*
        ];
    };
}

commands! {
    "tune", "sf", GAME, con_tune, "Tune variable to value";
    "tune_reset", "", GAME, con_tune_reset, "Reset tuning";
    "tune_dump", "", GAME, con_tune_dump, "Dump tuning";
    "pause", "?i", GAME, con_pause, "Pause/unpause game";
    "change_map", "?r", GAME, con_change_map, "Change map";
    "restart", "?i", GAME, con_restart, "Restart in x seconds (0 = abort)";
    "say", "r", GAME, con_say, "Say in chat";
    "broadcast", "r", GAME, con_broadcast, "Broadcast message";
    "set_team", "ii?i", GAME, con_set_team, "Set team of player to team";
    "set_team_all", "i", GAME, con_set_team_all, "Set team of all players to team";
    "swap_teams", "", GAME, con_swap_teams, "Swap the current teams";
    "shuffle_teams", "", GAME, con_shuffle_teams, "Shuffle the current teams";
    "lock_teams", "", GAME, con_lock_teams, "Lock/unlock teams";
    "force_teambalance", "", GAME, con_force_teambalance, "Force team balance";
    "add_vote", "sr", ADMIN, con_add_vote, "Add a voting option";
    "remove_vote", "s", ADMIN, con_remove_vote, "remove a voting option";
    "clear_votes", "", ADMIN, con_clear_votes, "Clears the voting options";
    "vote", "r", ADMIN, con_vote, "Force a vote to yes/no";
    "kick", "i?r", GAME, con_kick, "Kick player with specified id for any reason";
    "ban", "s?i?r", GAME, con_ban, "Ban an address or client id for x minutes for any reason";
    "unban", "s", ADMIN, con_unban, "Unban an address";
    "bans", "", ADMIN, con_bans, "Show the ban list";
    "status", "", ADMIN, con_status, "List players";
    "auth", "i?i", ADMIN, con_auth, "Grant (1) or revoke (0) admin rights of a client";
}

/// Looks a command up by name, ignoring ASCII case.
pub fn find_command(name: &str) -> Option<&'static ConsoleCommand> {
    COMMANDS.iter().find(|c| c.name.eq_ignore_ascii_case(name))
}

pub fn commands() -> impl Iterator<Item = &'static ConsoleCommand> {
    COMMANDS.iter()
}

/// Whether every statement of `line` would run from a passed vote.
pub fn line_is_valid(line: &str) -> bool {
    let Ok(statements) = split_statements(line) else {
        return false;
    };
    !statements.is_empty()
        && statements.iter().all(|statement| {
            let (name, rest) = split_command(statement);
            match find_command(name) {
                Some(cmd) => {
                    cmd.flags.contains(CommandFlags::VOTE_SAFE)
                        && parse_args(cmd.name, cmd.format, rest).is_ok()
                }
                None => GameConfig::VAR_NAMES.contains(&name),
            }
        })
}

impl GameContext {
    /// Runs an operator line and returns what it printed.
    pub fn exec_console(&mut self, line: &str) -> Vec<String> {
        self.console_output.clear();
        self.execute_line(line, ExecSource::Server);
        self.console_output.drain(..).collect()
    }

    pub(crate) fn execute_line(&mut self, line: &str, source: ExecSource) {
        let previous = std::mem::replace(&mut self.exec_source, source);
        match split_statements(line) {
            Ok(statements) => {
                for statement in statements {
                    if let Err(e) = self.execute_statement(statement) {
                        self.print("console", e.to_string());
                    }
                }
            }
            Err(e) => self.print("console", e.to_string()),
        }
        self.exec_source = previous;
    }

    fn execute_statement(&mut self, statement: &str) -> anyhow::Result<()> {
        let (name, rest) = split_command(statement);
        if let Some(cmd) = find_command(name) {
            if self.exec_source == ExecSource::Vote && !cmd.flags.contains(CommandFlags::VOTE_SAFE) {
                return Err(ConsoleError::AccessDenied(cmd.name.to_string()).into());
            }
            let args = parse_args(cmd.name, cmd.format, rest)?;
            debug!(command = cmd.name, source = ?self.exec_source, "console command");
            return (cmd.handler)(self, &args);
        }
        if GameConfig::VAR_NAMES.contains(&name) {
            return self.exec_var(name, rest);
        }
        Err(ConsoleError::UnknownCommand(name.to_string()).into())
    }

    fn exec_var(&mut self, name: &str, value: &str) -> anyhow::Result<()> {
        if value.is_empty() {
            if let Some(current) = self.config.get_var(name) {
                self.print("console", format!("Value: {}", current.as_string()));
            }
            return Ok(());
        }

        let set = self.config.set_var(name, value)?;
        debug!(var = name, value = %set, "config variable set");
        match GameConfig::chain_of(name) {
            VarChain::Motd => self.send_motd(None),
            VarChain::Settings => {
                if self.config.sv_player_slots > self.config.sv_max_clients {
                    self.config.sv_player_slots = self.config.sv_max_clients;
                }
                self.send_settings(None);
            }
            VarChain::GameInfo => self.controller.check_game_info(&self.config),
            VarChain::None => {}
        }
        Ok(())
    }
}

fn client_arg(args: &ConsoleArgs, index: usize) -> anyhow::Result<ClientId> {
    let id = args.get_int(index).context("missing client id")?;
    Ok(ClientId(id.clamp(0, MAX_CLIENTS as i32 - 1) as u32))
}

fn team_arg(args: &ConsoleArgs, index: usize) -> anyhow::Result<Team> {
    let team = args.get_int(index).context("missing team")?;
    Team::from_i32(team.clamp(-1, 1)).context("invalid team")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tuning
// ─────────────────────────────────────────────────────────────────────────────

fn con_tune(ctx: &mut GameContext, args: &ConsoleArgs) -> anyhow::Result<()> {
    let name = args.get_str(0).context("missing parameter name")?;
    let value = args.get_float(1).context("missing value")?;
    if ctx.tuning.set(name, value) {
        ctx.print("tuning", format!("{} changed to {:.2}", name, value));
        ctx.send_tuning_params(None);
    } else {
        ctx.print("tuning", "No such tuning parameter");
    }
    Ok(())
}

fn con_tune_reset(ctx: &mut GameContext, _args: &ConsoleArgs) -> anyhow::Result<()> {
    ctx.tuning = TuningParams::default();
    ctx.send_tuning_params(None);
    ctx.print("tuning", "Tuning reset");
    Ok(())
}

fn con_tune_dump(ctx: &mut GameContext, _args: &ConsoleArgs) -> anyhow::Result<()> {
    let lines: Vec<String> = (0..NUM_TUNING_PARAMS)
        .filter_map(|i| ctx.tuning.get_index(i))
        .map(|(name, value)| format!("{} {:.2}", name, value))
        .collect();
    for line in lines {
        ctx.print("tuning", line);
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Game flow
// ─────────────────────────────────────────────────────────────────────────────

fn con_pause(ctx: &mut GameContext, args: &ConsoleArgs) -> anyhow::Result<()> {
    let seconds = match args.get_int(0) {
        Some(v) => v.clamp(-1, 1000),
        None if ctx.controller.is_paused() => 0,
        None => -1,
    };
    let mut view = controller_view!(ctx);
    ctx.controller.do_pause(&mut view, seconds);
    Ok(())
}

fn con_change_map(ctx: &mut GameContext, args: &ConsoleArgs) -> anyhow::Result<()> {
    let map = args
        .get_str(0)
        .filter(|m| !m.is_empty())
        .map_or_else(|| ctx.config.sv_map.clone(), str::to_string);
    ctx.print("server", format!("changing map to '{}'", map));
    ctx.controller.change_map(&map);
    Ok(())
}

fn con_restart(ctx: &mut GameContext, args: &ConsoleArgs) -> anyhow::Result<()> {
    let seconds = args.get_int(0).map_or(0, |v| v.clamp(-1, 1000));
    let mut view = controller_view!(ctx);
    ctx.controller.do_warmup(&mut view, seconds);
    Ok(())
}

fn con_say(ctx: &mut GameContext, args: &ConsoleArgs) -> anyhow::Result<()> {
    let text = args.get_str(0).context("missing text")?;
    ctx.send_chat(None, ChatMode::All, None, text);
    Ok(())
}

fn con_broadcast(ctx: &mut GameContext, args: &ConsoleArgs) -> anyhow::Result<()> {
    let text = args.get_str(0).context("missing text")?;
    ctx.send_broadcast(text, None);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Teams
// ─────────────────────────────────────────────────────────────────────────────

fn con_set_team(ctx: &mut GameContext, args: &ConsoleArgs) -> anyhow::Result<()> {
    let cid = client_arg(args, 0)?;
    let team = team_arg(args, 1)?;
    let delay = args.get_int(2).unwrap_or(0).max(0) as u64;
    if !ctx.players.contains(cid) || !ctx.controller.can_join_team(&ctx.players, &ctx.config, cid, team) {
        return Ok(());
    }

    ctx.print("server", format!("moved client {} to team {}", cid, team.as_i32()));
    if let Some(p) = ctx.players.get_mut(cid) {
        p.team_change_tick = ctx.tick + ctx.tick_speed * delay * 60;
    }
    ctx.change_team(cid, team, true);
    Ok(())
}

fn con_set_team_all(ctx: &mut GameContext, args: &ConsoleArgs) -> anyhow::Result<()> {
    let team = team_arg(args, 0)?;
    ctx.send_game_msg(GameMsgId::TeamAll, vec![team.as_i32()], None);

    let ids: Vec<ClientId> = ctx.players.iter().map(|p| p.cid).collect();
    for cid in ids {
        if ctx.controller.can_join_team(&ctx.players, &ctx.config, cid, team) {
            ctx.change_team(cid, team, false);
        }
    }
    Ok(())
}

fn con_swap_teams(ctx: &mut GameContext, _args: &ConsoleArgs) -> anyhow::Result<()> {
    ctx.swap_teams();
    Ok(())
}

fn con_shuffle_teams(ctx: &mut GameContext, _args: &ConsoleArgs) -> anyhow::Result<()> {
    ctx.shuffle_teams();
    Ok(())
}

fn con_lock_teams(ctx: &mut GameContext, _args: &ConsoleArgs) -> anyhow::Result<()> {
    ctx.lock_teams = !ctx.lock_teams;
    ctx.send_settings(None);
    Ok(())
}

fn con_force_teambalance(ctx: &mut GameContext, _args: &ConsoleArgs) -> anyhow::Result<()> {
    ctx.force_team_balance();
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Vote options
// ─────────────────────────────────────────────────────────────────────────────

fn con_add_vote(ctx: &mut GameContext, args: &ConsoleArgs) -> anyhow::Result<()> {
    let description = args.get_str(0).context("missing description")?;
    let command = args.get_str(1).context("missing command")?;

    let added = ctx
        .vote_options
        .add(description, command, line_is_valid)
        .map(|o| (o.description.clone(), o.command.clone()));
    match added {
        Ok((description, command)) => {
            ctx.print("server", format!("added option '{}' '{}'", description, command));
            ctx.outbox
                .send(Recipient::All, ServerMsg::VoteOptionAdd { description });
        }
        Err(e) => ctx.print("server", e.to_string()),
    }
    Ok(())
}

fn con_remove_vote(ctx: &mut GameContext, args: &ConsoleArgs) -> anyhow::Result<()> {
    let description = args.get_str(0).context("missing description")?;
    match ctx.vote_options.remove(description) {
        Ok(removed) => {
            ctx.outbox.send(
                Recipient::All,
                ServerMsg::VoteOptionRemove {
                    description: removed.description.clone(),
                },
            );
            ctx.print(
                "server",
                format!("removed option '{}' '{}'", removed.description, removed.command),
            );
        }
        Err(e) => ctx.print("server", e.to_string()),
    }
    Ok(())
}

fn con_clear_votes(ctx: &mut GameContext, _args: &ConsoleArgs) -> anyhow::Result<()> {
    ctx.print("server", "cleared votes");
    ctx.outbox.send(Recipient::All, ServerMsg::VoteClearOptions);
    ctx.vote_options.clear();
    Ok(())
}

fn con_vote(ctx: &mut GameContext, args: &ConsoleArgs) -> anyhow::Result<()> {
    if !ctx.vote.is_open() {
        return Ok(());
    }
    let choice = args.get_str(0).context("missing choice")?;
    if choice.eq_ignore_ascii_case("yes") {
        ctx.vote.enforce = Enforce::Yes;
    } else if choice.eq_ignore_ascii_case("no") {
        ctx.vote.enforce = Enforce::No;
    }
    ctx.print("server", format!("forcing vote {}", choice));
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Clients and bans
// ─────────────────────────────────────────────────────────────────────────────

fn con_kick(ctx: &mut GameContext, args: &ConsoleArgs) -> anyhow::Result<()> {
    let id = args.get_int(0).context("missing client id")?;
    let cid = ClientId(u32::try_from(id).unwrap_or(u32::MAX));
    if !ctx.players.contains(cid) {
        bail!("invalid client id {} to kick", id);
    }
    let reason = args.get_str(1).unwrap_or("Kicked by console").to_string();
    ctx.print("server", format!("kicked client {} ({})", cid, reason));
    ctx.force_disconnect(cid, &reason);
    Ok(())
}

fn con_ban(ctx: &mut GameContext, args: &ConsoleArgs) -> anyhow::Result<()> {
    let target = args.get_str(0).context("missing address")?;
    let addr: IpAddr = match target.parse::<u32>() {
        Ok(id) => {
            let Some(p) = ctx.players.get(ClientId(id)) else {
                bail!("invalid client id {} to ban", id);
            };
            p.addr
                .with_context(|| format!("client {} has no address", id))?
        }
        Err(_) => target
            .parse()
            .with_context(|| format!("invalid network address '{}'", target))?,
    };
    let minutes = args.get_int(1).unwrap_or(BAN_MINUTES_DEFAULT).max(0) as u32;
    let reason = args.get_str(2).unwrap_or("No reason given").to_string();

    ctx.bans.ban(addr, minutes, &reason);
    let (line, kick_reason) = if minutes == 0 {
        (
            format!("banned {} for life ({})", addr, reason),
            format!("You have been banned for life ({})", reason),
        )
    } else {
        (
            format!("banned {} for {} minutes ({})", addr, minutes, reason),
            format!("You have been banned for {} minutes ({})", minutes, reason),
        )
    };
    ctx.print("server", line);

    let targets: Vec<ClientId> = ctx
        .players
        .iter()
        .filter(|p| p.addr == Some(addr))
        .map(|p| p.cid)
        .collect();
    for cid in targets {
        ctx.force_disconnect(cid, &kick_reason);
    }
    Ok(())
}

fn con_unban(ctx: &mut GameContext, args: &ConsoleArgs) -> anyhow::Result<()> {
    let target = args.get_str(0).context("missing address")?;
    let addr: IpAddr = target
        .parse()
        .with_context(|| format!("invalid network address '{}'", target))?;
    if !ctx.bans.unban(addr) {
        bail!("no ban for {}", addr);
    }
    ctx.print("server", format!("unbanned {}", addr));
    Ok(())
}

fn con_bans(ctx: &mut GameContext, _args: &ConsoleArgs) -> anyhow::Result<()> {
    let now = chrono::Utc::now();
    ctx.bans.purge_at(now);
    let mut lines: Vec<String> = ctx
        .bans
        .iter()
        .map(|b| match b.minutes_left(now) {
            Some(m) => format!("{} for {} minutes ({})", b.addr, m, b.reason),
            None => format!("{} for life ({})", b.addr, b.reason),
        })
        .collect();
    lines.push(format!("{} ban(s)", ctx.bans.len()));
    for line in lines {
        ctx.print("server", line);
    }
    Ok(())
}

fn con_status(ctx: &mut GameContext, _args: &ConsoleArgs) -> anyhow::Result<()> {
    let lines: Vec<String> = ctx
        .players
        .iter()
        .map(|p| {
            let addr = p.addr.map_or_else(|| "-".to_string(), |a| a.to_string());
            let mut line = format!(
                "id={} addr={} name='{}' score={} team={}",
                p.cid,
                addr,
                p.name,
                p.score,
                p.team().as_i32()
            );
            if p.dummy {
                line.push_str(" (dummy)");
            }
            if p.authed {
                line.push_str(" (Admin)");
            }
            line
        })
        .collect();
    for line in lines {
        ctx.print("server", line);
    }
    Ok(())
}

fn con_auth(ctx: &mut GameContext, args: &ConsoleArgs) -> anyhow::Result<()> {
    let cid = client_arg(args, 0)?;
    let grant = args.get_int(1).unwrap_or(1) != 0;
    if !ctx.players.contains(cid) {
        bail!("invalid client id {}", cid);
    }
    ctx.set_authed(cid, grant);
    if grant {
        ctx.print("server", format!("authed client {}", cid));
    } else {
        ctx.print("server", format!("revoked admin rights of client {}", cid));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ctx() -> GameContext {
        GameContext::with_seed(GameConfig::default(), 50, 11)
    }

    fn join(ctx: &mut GameContext, id: u32, last: u8) -> ClientId {
        let cid = ClientId(id);
        ctx.on_client_connected(cid, Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))), false, false);
        ctx.on_client_enter(cid);
        cid
    }

    #[test]
    fn vote_lines_are_validated() {
        assert!(line_is_valid("restart"));
        assert!(line_is_valid("sv_scorelimit 500; restart 5"));
        assert!(line_is_valid("set_team 3 -1 3"));
        assert!(!line_is_valid("set_team x"));
        assert!(!line_is_valid("add_vote a b"));
        assert!(!line_is_valid("dance"));
        assert!(!line_is_valid(""));
    }

    #[test]
    fn tune_and_dump() {
        let mut ctx = ctx();
        assert_eq!(ctx.exec_console("tune gravity 0.25"), vec!["gravity changed to 0.25"]);
        assert_eq!(ctx.exec_console("tune nothing 1"), vec!["No such tuning parameter"]);
        let dump = ctx.exec_console("tune_dump");
        assert_eq!(dump.len(), NUM_TUNING_PARAMS);
        assert!(dump.contains(&"gravity 0.25".to_string()));
        assert_eq!(ctx.exec_console("tune_reset"), vec!["Tuning reset"]);
        assert!(ctx.tuning.is_default());
    }

    #[test]
    fn usage_errors_are_printed() {
        let mut ctx = ctx();
        let out = ctx.exec_console("set_team");
        assert_eq!(out, vec!["Invalid arguments... Usage: set_team ii?i"]);
        assert_eq!(ctx.exec_console("nope"), vec!["No such command: nope"]);
    }

    #[test]
    fn vote_options_round_trip_through_console() {
        let mut ctx = ctx();
        assert_eq!(
            ctx.exec_console("add_vote \"Restart round\" restart 10"),
            vec!["added option 'Restart round' 'restart 10'"]
        );
        assert_eq!(
            ctx.exec_console("add_vote x dance"),
            vec!["skipped invalid command 'dance'"]
        );
        assert_eq!(
            ctx.exec_console("remove_vote \"restart ROUND\""),
            vec!["removed option 'Restart round' 'restart 10'"]
        );
        assert_eq!(
            ctx.exec_console("remove_vote gone"),
            vec!["option 'gone' does not exist"]
        );
        assert_eq!(ctx.exec_console("clear_votes"), vec!["cleared votes"]);
    }

    #[test]
    fn removed_option_command_never_comes_back() {
        let mut ctx = ctx();
        ctx.exec_console("add_vote x sv_scorelimit 1");
        ctx.exec_console("remove_vote x");
        assert_eq!(
            ctx.exec_console("add_vote X sv_scorelimit 2"),
            vec!["added option 'X' 'sv_scorelimit 2'"]
        );
        let commands: Vec<_> = ctx.vote_options.iter().map(|o| o.command.as_str()).collect();
        assert_eq!(commands, vec!["sv_scorelimit 2"]);
        assert_eq!(ctx.vote_options.find("x").map(|o| o.description.as_str()), Some("X"));
    }

    #[test]
    fn set_team_moves_and_locks() {
        let mut ctx = ctx();
        let cid = join(&mut ctx, 0, 1);
        assert_eq!(ctx.exec_console("set_team 0 -1 2"), vec!["moved client 0 to team -1"]);
        let p = ctx.players.get(cid).unwrap();
        assert!(p.is_spectator());
        assert_eq!(p.team_change_tick, 50 * 2 * 60);
    }

    #[test]
    fn variables_get_set_and_chain() {
        let mut ctx = ctx();
        assert_eq!(ctx.exec_console("sv_player_slots"), vec!["Value: 8"]);
        ctx.exec_console("sv_max_clients 4; sv_player_slots 12");
        assert_eq!(ctx.config.sv_player_slots, 4);
        assert!(ctx.outbox.iter().any(|o| matches!(
            o,
            crate::outbox::Outgoing::Message {
                msg: ServerMsg::ServerSettings(s),
                ..
            } if s.player_slots == 4
        )));
    }

    #[test]
    fn kick_and_ban_drop_clients() {
        let mut ctx = ctx();
        let a = join(&mut ctx, 0, 1);
        let b = join(&mut ctx, 1, 2);
        let c = join(&mut ctx, 2, 2);

        ctx.exec_console("kick 0 bye");
        assert!(!ctx.players.contains(a));
        assert!(ctx.outbox.iter().any(|o| matches!(
            o,
            crate::outbox::Outgoing::Disconnect { client, reason } if *client == a && reason == "bye"
        )));

        let out = ctx.exec_console("ban 10.0.0.2 5 griefing");
        assert_eq!(out, vec!["banned 10.0.0.2 for 5 minutes (griefing)"]);
        assert!(!ctx.players.contains(b));
        assert!(!ctx.players.contains(c));
        assert!(ctx.bans.is_banned(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))));

        assert_eq!(ctx.exec_console("kick 9"), vec!["invalid client id 9 to kick"]);
    }

    #[test]
    fn passed_votes_cannot_edit_options() {
        let mut ctx = ctx();
        ctx.execute_line("add_vote a restart", ExecSource::Vote);
        assert!(ctx.vote_options.is_empty());
        ctx.execute_line("sv_scorelimit 5", ExecSource::Vote);
        assert_eq!(ctx.config.sv_scorelimit, 5);
    }
}
