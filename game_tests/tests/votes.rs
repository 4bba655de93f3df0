//! Vote flows through the message router and the tick schedule.

use std::net::{IpAddr, Ipv4Addr};

use game_server::outbox::Outgoing;
use game_shared::{
    config::GameConfig,
    net::ClientId,
    protocol::{ClientMsg, ServerMsg, VoteSetKind},
};
use game_tests::{call_vote, context, join, queued_messages, run_ticks, start_info};

fn vote_ends(msgs: &[ServerMsg]) -> Vec<VoteSetKind> {
    msgs.iter()
        .filter_map(|m| match m {
            ServerMsg::VoteSet { kind, .. } => Some(*kind),
            _ => None,
        })
        .filter(|k| matches!(k, VoteSetKind::EndAbort | VoteSetKind::EndPass | VoteSetKind::EndFail))
        .collect()
}

#[test]
fn option_vote_changes_settings() {
    let mut ctx = context(GameConfig::default());
    let a = join(&mut ctx, 0, "alice");
    let b = join(&mut ctx, 1, "bob");
    join(&mut ctx, 2, "carol");
    ctx.exec_console("add_vote \"Four slots\" sv_player_slots 4");
    run_ticks(&mut ctx, 500);

    ctx.on_message(a, call_vote("option", "Four slots"));
    assert!(ctx.vote().is_open());
    ctx.on_message(b, ClientMsg::Vote { vote: 1 });
    ctx.drain_outgoing();
    ctx.on_tick();

    assert!(!ctx.vote().is_open());
    assert_eq!(ctx.config().sv_player_slots, 4);
    let msgs = queued_messages(&ctx);
    assert!(msgs
        .iter()
        .any(|m| matches!(m, ServerMsg::ServerSettings(s) if s.player_slots == 4)));
    assert_eq!(vote_ends(&msgs), vec![VoteSetKind::EndPass]);
}

#[test]
fn kick_vote_bans_the_subject() {
    let mut ctx = context(GameConfig::default());
    let a = join(&mut ctx, 0, "alice");
    let b = join(&mut ctx, 1, "bob");
    let c = join(&mut ctx, 2, "carol");
    run_ticks(&mut ctx, 500);

    ctx.on_message(a, call_vote("kick", "2"));
    assert_eq!(
        ctx.vote().active().map(|v| v.command.as_str()),
        Some("ban 10.0.0.3 5 Banned by vote")
    );
    ctx.on_message(b, ClientMsg::Vote { vote: 1 });
    ctx.drain_outgoing();
    ctx.on_tick();

    assert!(ctx.bans().is_banned(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3))));
    assert!(ctx.player(c).is_none());
    assert!(ctx
        .outbox()
        .iter()
        .any(|o| matches!(o, Outgoing::Disconnect { client, .. } if *client == c)));
}

#[test]
fn subject_cannot_be_kicked_by_itself_or_when_authed() {
    let mut ctx = context(GameConfig::default());
    let a = join(&mut ctx, 0, "alice");
    let b = join(&mut ctx, 1, "bob");
    run_ticks(&mut ctx, 500);

    ctx.on_message(a, call_vote("kick", "0"));
    assert!(!ctx.vote().is_open());

    ctx.set_authed(b, true);
    ctx.on_message(a, call_vote("kick", "1"));
    assert!(!ctx.vote().is_open());
}

#[test]
fn spectate_vote_moves_subject() {
    let mut ctx = context(GameConfig::default());
    let a = join(&mut ctx, 0, "alice");
    let b = join(&mut ctx, 1, "bob");
    let c = join(&mut ctx, 2, "carol");
    run_ticks(&mut ctx, 500);

    ctx.on_message(a, call_vote("spectate", "2"));
    ctx.on_message(b, ClientMsg::Vote { vote: 1 });
    ctx.on_tick();

    let carol = ctx.player(c).expect("carol stays connected");
    assert!(carol.is_spectator());
    assert!(carol.team_change_tick > ctx.tick());
}

#[test]
fn unanswered_vote_times_out_and_blocks_recall() {
    let mut ctx = context(GameConfig::default());
    let a = join(&mut ctx, 0, "alice");
    join(&mut ctx, 1, "bob");
    join(&mut ctx, 2, "carol");
    ctx.exec_console("add_vote Restart restart");
    run_ticks(&mut ctx, 500);

    ctx.on_message(a, call_vote("option", "Restart"));
    ctx.drain_outgoing();
    run_ticks(&mut ctx, 25 * 50 + 1);
    assert!(!ctx.vote().is_open());
    assert_eq!(vote_ends(&queued_messages(&ctx)), vec![VoteSetKind::EndFail]);

    // the caller waits out the cooldown
    ctx.on_message(a, call_vote("option", "Restart"));
    assert!(!ctx.vote().is_open());
}

#[test]
fn creator_can_withdraw_early() {
    let mut ctx = context(GameConfig::default());
    let a = join(&mut ctx, 0, "alice");
    join(&mut ctx, 1, "bob");
    join(&mut ctx, 2, "carol");
    ctx.exec_console("add_vote Restart restart");
    run_ticks(&mut ctx, 500);

    ctx.on_message(a, call_vote("option", "Restart"));
    ctx.on_message(a, ClientMsg::Vote { vote: -1 });
    ctx.drain_outgoing();
    ctx.on_tick();
    assert!(!ctx.vote().is_open());
    assert_eq!(vote_ends(&queued_messages(&ctx)), vec![VoteSetKind::EndAbort]);
    assert!(ctx.player(ClientId(1)).is_some());
}

#[test]
fn clients_behind_one_address_count_once_by_their_first_ballot() {
    let mut ctx = context(GameConfig::default());
    let a = join(&mut ctx, 0, "alice");
    let b = join(&mut ctx, 1, "bob");
    let c = join(&mut ctx, 2, "carol");
    join(&mut ctx, 3, "dave");
    let shared = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9));
    for (id, name) in [(4, "eve"), (5, "eve's sister")] {
        let cid = ClientId(id);
        ctx.on_client_connected(cid, Some(shared), false, false);
        ctx.on_message(cid, start_info(name));
        ctx.on_client_enter(cid);
    }
    ctx.exec_console("add_vote Restart restart");
    run_ticks(&mut ctx, 500);

    // five voters: four addresses plus the shared one
    ctx.on_message(a, call_vote("option", "Restart"));
    ctx.on_message(ClientId(5), ClientMsg::Vote { vote: -1 });
    ctx.on_message(ClientId(4), ClientMsg::Vote { vote: 1 });
    ctx.on_message(b, ClientMsg::Vote { vote: 1 });
    ctx.drain_outgoing();
    ctx.on_tick();
    assert!(ctx.vote().is_open());
    assert!(queued_messages(&ctx).iter().any(|m| matches!(
        m,
        ServerMsg::VoteStatus { total: 5, yes: 2, no: 1, .. }
    )));

    ctx.on_message(c, ClientMsg::Vote { vote: 1 });
    ctx.drain_outgoing();
    ctx.on_tick();
    assert!(!ctx.vote().is_open());
    assert_eq!(vote_ends(&queued_messages(&ctx)), vec![VoteSetKind::EndPass]);
}
