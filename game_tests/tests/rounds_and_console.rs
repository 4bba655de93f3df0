//! Round flow, admin console and tuning, driven in-process.

use game_server::world::weapon;
use game_shared::{
    config::GameConfig,
    math::Vec2,
    protocol::{ChatMode, ClientMsg, GameMsgId, ServerMsg},
};
use game_tests::{chat_lines, context, join, queued_messages, run_ticks};

#[test]
fn round_end_sends_stats_and_best_player() {
    let config = GameConfig {
        sv_scorelimit: 1,
        ..Default::default()
    };
    let mut ctx = context(config);
    let a = join(&mut ctx, 0, "alice");
    let b = join(&mut ctx, 1, "bob");
    run_ticks(&mut ctx, 2);
    assert!(ctx.world().has_character(a));
    assert!(ctx.world().has_character(b));

    ctx.hit_character(Some(a), b, Vec2::new(1.0, 0.0), weapon::LASER);
    ctx.drain_outgoing();
    ctx.on_tick();

    let lines = chat_lines(&ctx, a);
    assert!(lines.iter().any(|l| l == "║Kills(weapon): 1"));
    assert!(lines.iter().any(|l| l == "Press F1 to view stats now!!"));
    assert!(lines
        .iter()
        .any(|l| l == "Best player: alice with a K/D of 1.000"));
    assert!(lines.iter().any(|l| l.starts_with("Trivia: ")));
    assert!(ctx.world().paused);
}

#[test]
fn pause_stops_the_world_and_is_announced() {
    let mut ctx = context(GameConfig::default());
    join(&mut ctx, 0, "alice");
    ctx.drain_outgoing();

    ctx.exec_console("pause");
    assert!(ctx.world().paused);
    assert!(queued_messages(&ctx).iter().any(|m| matches!(
        m,
        ServerMsg::GameMsg { id: GameMsgId::GamePaused, params } if params == &vec![-1]
    )));

    ctx.exec_console("pause");
    assert!(!ctx.world().paused);
}

#[test]
fn tuning_changes_reach_clients() {
    let mut ctx = context(GameConfig::default());
    let a = join(&mut ctx, 0, "alice");
    ctx.drain_outgoing();

    assert_eq!(
        ctx.exec_console("tune laser_reach 200"),
        vec!["laser_reach changed to 200.00"]
    );
    assert!(ctx
        .outbox()
        .messages_for(a)
        .any(|m| matches!(m, ServerMsg::TuneParams { .. })));
    assert_eq!(ctx.tuning().laser_reach.as_f32(), 200.0);
}

#[test]
fn admin_lines_are_chained_and_errors_reported() {
    let mut ctx = context(GameConfig::default());
    let out = ctx.exec_console("sv_scorelimit 20; sv_scorelimit");
    assert_eq!(out, vec!["Value: 20"]);

    let out = ctx.exec_console("no_such_thing");
    assert_eq!(out, vec!["No such command: no_such_thing"]);
}

#[test]
fn chat_reaches_team_only_when_asked() {
    let mut ctx = context(GameConfig::default());
    let a = join(&mut ctx, 0, "alice");
    let b = join(&mut ctx, 1, "bob");
    let c = join(&mut ctx, 2, "carol");
    let team_a = ctx.player(a).map(|p| p.team());
    let mate = [b, c]
        .into_iter()
        .find(|cid| ctx.player(*cid).map(|p| p.team()) == team_a)
        .expect("three players split two to one");
    let other = if mate == b { c } else { b };
    ctx.drain_outgoing();

    ctx.on_message(
        a,
        ClientMsg::Say {
            mode: ChatMode::Team,
            target: None,
            message: "push left".into(),
        },
    );
    assert_eq!(chat_lines(&ctx, mate), vec!["push left"]);
    assert!(chat_lines(&ctx, other).is_empty());
}

#[test]
fn slash_stats_opens_the_panel() {
    let mut ctx = context(GameConfig::default());
    let a = join(&mut ctx, 0, "alice");
    ctx.drain_outgoing();
    ctx.on_message(
        a,
        ClientMsg::Say {
            mode: ChatMode::All,
            target: None,
            message: "/stats".into(),
        },
    );
    assert!(ctx
        .outbox()
        .messages_for(a)
        .any(|m| matches!(m, ServerMsg::Motd { message } if message.contains("Statistics"))));
}
