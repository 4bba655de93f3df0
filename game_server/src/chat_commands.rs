//! Slash commands typed into chat.

use game_shared::{config::GameConfig, net::ClientId, protocol::Emote, protocol::ServerMsg};
use tracing::warn;

use crate::{
    command::{split_line, CommandTable},
    context::GameContext,
    outbox::Recipient,
    stats,
};

pub type ChatCommandFn = fn(&mut GameContext, ClientId, &[&str]);

/// Emote length when `/emote` is given no duration.
const DEFAULT_EMOTE_SECONDS: u64 = 1;

pub(crate) fn register(table: &mut CommandTable<ChatCommandFn>, config: &GameConfig) {
    let mut commands: Vec<(&str, &str, &str, ChatCommandFn)> = vec![
        ("stats", "show the stats of the current game", "", cmd_stats),
        ("s", "show the stats of the current game", "", cmd_stats),
        (
            "help",
            "show the cmd list or get more information to any command",
            "<command>",
            cmd_help,
        ),
        ("cmdlist", "show the cmd list", "", cmd_help),
        ("me", "sending message to chat", "<text>", cmd_me),
    ];
    if config.sv_emote_wheel != 0 || config.sv_emotional_tees != 0 {
        commands.push((
            "emote",
            "enable custom emotes",
            "<emote type> <time in seconds>",
            cmd_emote,
        ));
    }
    for (name, help, args, handler) in commands {
        if let Err(e) = table.register(name, help, args, handler) {
            warn!(error = %e, "chat command not registered");
        }
    }
}

impl GameContext {
    /// Runs a slash command line (without the `/`). Replies and returns
    /// `false` when no command matches.
    pub fn dispatch_chat_command(&mut self, cid: ClientId, line: &str) -> bool {
        let Some(handler) = self.commands.find(line).map(|c| c.handler) else {
            self.outbox.chat_to(cid, "Server command not found");
            return false;
        };
        let (_, args) = split_line(line);
        handler(self, cid, &args);
        true
    }
}

fn cmd_stats(ctx: &mut GameContext, cid: ClientId, _args: &[&str]) {
    let Some(p) = ctx.players.get(cid) else {
        return;
    };
    let message = stats::stats_panel(&p.stats);
    ctx.outbox
        .send(Recipient::Client(cid), ServerMsg::Motd { message });
}

fn cmd_help(ctx: &mut GameContext, cid: ClientId, args: &[&str]) {
    if let Some(name) = args.first() {
        if let Some(cmd) = ctx.commands.find(name) {
            let line = format!("[/{}] {}", cmd.name, cmd.help);
            ctx.outbox.chat_to(cid, line);
        }
        return;
    }
    ctx.outbox.chat_to(
        cid,
        "command list: type /help <command> for more information",
    );
    let lines: Vec<String> = ctx
        .commands
        .iter()
        .map(|c| format!("/{} {}", c.name, c.args_format))
        .collect();
    for line in lines {
        ctx.outbox.chat_to(cid, line);
    }
}

fn cmd_me(ctx: &mut GameContext, cid: ClientId, args: &[&str]) {
    if args.is_empty() || !ctx.players.contains(cid) {
        return;
    }
    ctx.outbox.chat_all(format!("# {{{}}}", args.join(" ")));
}

fn cmd_emote(ctx: &mut GameContext, cid: ClientId, args: &[&str]) {
    let Some(name) = args.first() else {
        ctx.outbox.chat_to(
            cid,
            "Emote commands are: /emote surprise /emote blink /emote close /emote angry /emote happy /emote pain",
        );
        ctx.outbox.chat_to(
            cid,
            "Example: /emote surprise 10 for 10 seconds or /emote surprise (default 1 second)",
        );
        return;
    };
    let Some(emote) = Emote::from_name(name) else {
        ctx.outbox.chat_to(cid, "Unknown emote... Say /emote");
        return;
    };
    let seconds = args
        .get(1)
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_EMOTE_SECONDS);

    let ticks = seconds.saturating_mul(ctx.tick_speed);
    if let Some(p) = ctx.players.get_mut(cid) {
        p.emotion = (emote != Emote::Normal).then_some(emote);
        p.emotion_ticks = ticks;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use game_shared::protocol::ChatMode;

    fn ctx_with_player() -> (GameContext, ClientId) {
        let mut ctx = GameContext::with_seed(GameConfig::default(), 50, 3);
        let cid = ClientId(0);
        ctx.on_client_connected(cid, None, false, false);
        ctx.on_client_enter(cid);
        ctx.outbox.clear();
        (ctx, cid)
    }

    fn chat_lines(ctx: &GameContext, cid: ClientId) -> Vec<String> {
        ctx.outbox
            .messages_for(cid)
            .filter_map(|m| match m {
                ServerMsg::Chat { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn emote_command_depends_on_config() {
        let config = GameConfig {
            sv_emote_wheel: 0,
            sv_emotional_tees: 0,
            ..Default::default()
        };
        let ctx = GameContext::with_seed(config, 50, 1);
        assert!(ctx.commands.find("emote").is_none());
        assert!(ctx.commands.find("s").is_some());
    }

    #[test]
    fn unknown_command_replies() {
        let (mut ctx, cid) = ctx_with_player();
        assert!(!ctx.dispatch_chat_command(cid, "dance now"));
        assert_eq!(chat_lines(&ctx, cid), vec!["Server command not found"]);
    }

    #[test]
    fn help_for_one_command() {
        let (mut ctx, cid) = ctx_with_player();
        assert!(ctx.dispatch_chat_command(cid, "HELP me"));
        assert_eq!(chat_lines(&ctx, cid), vec!["[/me] sending message to chat"]);

        ctx.outbox.clear();
        ctx.dispatch_chat_command(cid, "help nothing");
        assert!(chat_lines(&ctx, cid).is_empty());
    }

    #[test]
    fn help_lists_sorted_commands() {
        let (mut ctx, cid) = ctx_with_player();
        ctx.dispatch_chat_command(cid, "help");
        let lines = chat_lines(&ctx, cid);
        assert_eq!(lines[0], "command list: type /help <command> for more information");
        assert_eq!(lines[1], "/cmdlist ");
        assert_eq!(lines.len(), 1 + ctx.commands.len());
    }

    #[test]
    fn me_goes_to_everyone() {
        let (mut ctx, cid) = ctx_with_player();
        ctx.dispatch_chat_command(cid, "me waves around");
        assert!(ctx.outbox.iter().any(|o| matches!(
            o,
            crate::outbox::Outgoing::Message {
                to: Recipient::All,
                msg: ServerMsg::Chat { mode: ChatMode::All, client_id: None, message, .. },
            } if message == "# {waves around}"
        )));
    }

    #[test]
    fn emote_sets_override() {
        let (mut ctx, cid) = ctx_with_player();
        ctx.dispatch_chat_command(cid, "emote happy 3");
        let p = ctx.players.get(cid).unwrap();
        assert_eq!(p.emotion, Some(Emote::Happy));
        assert_eq!(p.emotion_ticks, 150);

        ctx.dispatch_chat_command(cid, "emote surprise");
        assert_eq!(ctx.players.get(cid).unwrap().emotion_ticks, 50);

        ctx.outbox.clear();
        ctx.dispatch_chat_command(cid, "emote dance");
        assert_eq!(chat_lines(&ctx, cid), vec!["Unknown emote... Say /emote"]);
    }

    #[test]
    fn huge_emote_duration_saturates() {
        let (mut ctx, cid) = ctx_with_player();
        assert!(ctx.dispatch_chat_command(cid, "emote happy 400000000000000000"));
        let p = ctx.players.get(cid).unwrap();
        assert_eq!(p.emotion, Some(Emote::Happy));
        assert_eq!(p.emotion_ticks, u64::MAX);
    }

    #[test]
    fn stats_sends_panel_as_motd() {
        let (mut ctx, cid) = ctx_with_player();
        ctx.dispatch_chat_command(cid, "s");
        assert!(ctx
            .outbox
            .messages_for(cid)
            .any(|m| matches!(m, ServerMsg::Motd { message } if message.contains("Statistics"))));
    }
}
