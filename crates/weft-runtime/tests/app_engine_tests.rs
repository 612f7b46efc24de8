//! App/engine authority: graph lifecycle over connections and proxies,
//! timers, routing, and remote replies.

mod common;

use common::{init_tracing, wait_until};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use weft_msg::{
    Command, DataMessage, JsonCodec, Message, MessageHeader, StartGraphCommand, TimerCommand,
};
use weft_runtime::testing::{CollectingExtension, MemoryTransport};
use weft_runtime::{App, AppConfig, AppState};
use weft_types::{GraphDefinition, GraphId, GraphNode, Location, PredefinedGraph, RouteRule};

const APP_URI: &str = "weft://app-a";

fn voice_graph(id: &str) -> GraphDefinition {
    GraphDefinition {
        graph_id: GraphId::from(id),
        nodes: vec![
            GraphNode::new("mic", "builtin_mic"),
            GraphNode::new("echo", "builtin_echo"),
        ],
        routes: vec![RouteRule {
            msg_name: "chunk".into(),
            src_extension: "mic".into(),
            dest_extensions: vec!["echo".into()],
        }],
    }
}

fn app_with_predefined(graphs: Vec<PredefinedGraph>) -> weft_runtime::AppHandle {
    App::spawn(AppConfig {
        uri: APP_URI.into(),
        predefined_graphs: graphs,
        ..AppConfig::default()
    })
    .expect("spawn app")
}

fn predefined(name: &str, graph: &str) -> PredefinedGraph {
    PredefinedGraph {
        name: name.into(),
        auto_start: false,
        definition: voice_graph(graph),
    }
}

struct Wire {
    transport: MemoryTransport,
    conn: Arc<weft_runtime::Connection>,
}

fn wire(app: &weft_runtime::AppHandle) -> Wire {
    let transport = MemoryTransport::new();
    let conn = app.open_connection(
        "peer:7000",
        Box::new(transport.clone()),
        Arc::new(JsonCodec),
    );
    Wire { transport, conn }
}

fn replies(transport: &MemoryTransport) -> Vec<weft_msg::CommandResult> {
    transport
        .decoded(&JsonCodec)
        .into_iter()
        .filter_map(|m| match m {
            Message::CmdResult(r) => Some(r),
            _ => None,
        })
        .collect()
}

#[test]
fn start_graph_by_predefined_name_over_a_connection() {
    init_tracing();
    let app = app_with_predefined(vec![predefined("voice", "voice-g")]);
    let w = wire(&app);

    let cmd = Command::start_graph(
        Location::for_app("weft://client"),
        StartGraphCommand {
            predefined_graph_name: Some("voice".into()),
            graph_json: None,
        },
    );
    let cmd_id = cmd.id();
    w.conn.on_message_received(Message::Cmd(cmd));

    assert!(wait_until(Duration::from_secs(2), || {
        !replies(&w.transport).is_empty()
    }));
    let reply = &replies(&w.transport)[0];
    assert!(reply.is_success());
    assert_eq!(reply.original_cmd_id, cmd_id);
    assert_eq!(reply.property("graph_id"), Some(&json!("voice-g")));
    app.with_app(|a| {
        assert!(a.has_engine(&GraphId::from("voice-g")));
        assert_eq!(a.engine_count(), 1);
    });

    app.shutdown();
}

#[test]
fn start_graph_twice_fails_with_already_exists() {
    init_tracing();
    let app = app_with_predefined(vec![predefined("voice", "voice-g")]);
    let w = wire(&app);

    for _ in 0..2 {
        let cmd = Command::start_graph(
            Location::for_app("weft://client"),
            StartGraphCommand {
                predefined_graph_name: Some("voice".into()),
                graph_json: None,
            },
        );
        w.conn.on_message_received(Message::Cmd(cmd));
    }

    assert!(wait_until(Duration::from_secs(2), || {
        replies(&w.transport).len() == 2
    }));
    let replies = replies(&w.transport);
    assert!(replies[0].is_success());
    assert!(!replies[1].is_success());
    assert!(
        replies[1]
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("already exists"))
    );
    app.with_app(|a| assert_eq!(a.engine_count(), 1));

    app.shutdown();
}

#[test]
fn start_graph_from_an_inline_definition() {
    let app = app_with_predefined(Vec::new());
    let w = wire(&app);

    let cmd = Command::start_graph(
        Location::for_app("weft://client"),
        StartGraphCommand {
            predefined_graph_name: None,
            graph_json: Some(serde_json::to_value(voice_graph("inline-g")).expect("definition")),
        },
    );
    w.conn.on_message_received(Message::Cmd(cmd));

    assert!(wait_until(Duration::from_secs(2), || {
        !replies(&w.transport).is_empty()
    }));
    assert!(replies(&w.transport)[0].is_success());
    app.with_app(|a| assert!(a.has_engine(&GraphId::from("inline-g"))));

    app.shutdown();
}

#[test]
fn start_graph_without_any_definition_source_fails() {
    let app = app_with_predefined(Vec::new());
    let w = wire(&app);

    let cmd = Command::start_graph(
        Location::for_app("weft://client"),
        StartGraphCommand::default(),
    );
    w.conn.on_message_received(Message::Cmd(cmd));

    assert!(wait_until(Duration::from_secs(2), || {
        !replies(&w.transport).is_empty()
    }));
    let reply = &replies(&w.transport)[0];
    assert!(!reply.is_success());
    assert!(
        reply
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("graph definition not found"))
    );
    app.with_app(|a| assert_eq!(a.engine_count(), 0));

    app.shutdown();
}

#[test]
fn stop_graph_on_an_unknown_graph_fails_and_changes_nothing() {
    let app = app_with_predefined(vec![predefined("voice", "voice-g")]);
    let w = wire(&app);

    let cmd = Command::stop_graph(Location::for_app("weft://client"), GraphId::from("nope"));
    w.conn.on_message_received(Message::Cmd(cmd));

    assert!(wait_until(Duration::from_secs(2), || {
        !replies(&w.transport).is_empty()
    }));
    assert!(!replies(&w.transport)[0].is_success());
    app.with_app(|a| assert_eq!(a.engine_count(), 0));

    app.shutdown();
}

#[test]
fn stop_graph_removes_the_engine() {
    let app = app_with_predefined(vec![predefined("voice", "voice-g")]);
    let w = wire(&app);

    let start = Command::start_graph(
        Location::for_app("weft://client"),
        StartGraphCommand {
            predefined_graph_name: Some("voice".into()),
            graph_json: None,
        },
    );
    w.conn.on_message_received(Message::Cmd(start));
    assert!(wait_until(Duration::from_secs(2), || {
        app.with_app(|a| a.engine_count() == 1)
    }));

    let stop = Command::stop_graph(Location::for_app("weft://client"), GraphId::from("voice-g"));
    w.conn.on_message_received(Message::Cmd(stop));

    assert!(wait_until(Duration::from_secs(2), || {
        replies(&w.transport).len() == 2
    }));
    assert!(replies(&w.transport)[1].is_success());
    app.with_app(|a| {
        assert_eq!(a.engine_count(), 0);
        assert!(!a.has_engine(&GraphId::from("voice-g")));
    });

    app.shutdown();
}

#[test]
fn close_app_stops_every_engine() {
    init_tracing();
    let app = app_with_predefined(vec![
        predefined("one", "g-1"),
        predefined("two", "g-2"),
    ]);

    for name in ["one", "two"] {
        let cmd = Command::start_graph(
            Location::for_app("weft://client"),
            StartGraphCommand {
                predefined_graph_name: Some(name.into()),
                graph_json: None,
            },
        );
        let handle = app.proxy().send_cmd(cmd).expect("send start");
        assert!(
            handle
                .recv_timeout(Duration::from_secs(2))
                .expect("start result")
                .is_success()
        );
    }
    app.with_app(|a| assert_eq!(a.engine_count(), 2));

    let close = Command::close_app(Location::for_app("weft://client"));
    let handle = app.proxy().send_cmd(close).expect("send close");
    assert!(
        handle
            .recv_timeout(Duration::from_secs(2))
            .expect("close result")
            .is_success()
    );
    app.with_app(|a| {
        assert_eq!(a.state(), AppState::Stopped);
        assert_eq!(a.engine_count(), 0);
    });

    app.shutdown();
}

#[test]
fn predefined_graphs_auto_start_with_the_app() {
    let app = app_with_predefined(vec![PredefinedGraph {
        name: "always-on".into(),
        auto_start: true,
        definition: voice_graph("auto-g"),
    }]);

    assert!(wait_until(Duration::from_secs(2), || {
        app.with_app(|a| a.has_engine(&GraphId::from("auto-g")))
    }));
    app.shutdown();
}

#[test]
fn engine_timers_fire_repeatedly_then_stop() {
    init_tracing();
    let app = app_with_predefined(vec![predefined("voice", "timer-g")]);
    let graph_id = GraphId::from("timer-g");

    let start = Command::start_graph(
        Location::for_app("weft://client"),
        StartGraphCommand {
            predefined_graph_name: Some("voice".into()),
            graph_json: None,
        },
    );
    app.proxy()
        .send_cmd(start)
        .expect("send start")
        .recv_timeout(Duration::from_secs(2))
        .expect("start result");

    let (ext, log) = CollectingExtension::new();
    app.register_extension(&graph_id, "ear", Box::new(ext))
        .expect("register extension");

    let engine = app.engine_proxy(&graph_id).expect("engine proxy");
    let src = Location::for_extension(APP_URI, graph_id.clone(), "ear");
    let timer = Command::timer(
        src,
        TimerCommand {
            timer_id: 1,
            interval_ms: 25,
            repeat: 2,
            cancel: false,
        },
    );
    let result = engine
        .send_cmd(timer)
        .expect("send timer")
        .recv_timeout(Duration::from_secs(2))
        .expect("timer started");
    assert!(result.is_success(), "start is acknowledged before any fire");

    let timeout_count =
        || log.lock().iter().filter(|e| e.kind == "cmd" && e.name == "timeout").count();
    assert!(wait_until(Duration::from_secs(2), || timeout_count() == 2));

    // repeat = 2: no third fire.
    std::thread::sleep(Duration::from_millis(120));
    assert_eq!(timeout_count(), 2);

    app.shutdown();
}

#[test]
fn cancelled_timers_stop_firing() {
    let app = app_with_predefined(vec![predefined("voice", "cancel-g")]);
    let graph_id = GraphId::from("cancel-g");

    app.proxy()
        .send_cmd(Command::start_graph(
            Location::for_app("weft://client"),
            StartGraphCommand {
                predefined_graph_name: Some("voice".into()),
                graph_json: None,
            },
        ))
        .expect("send start")
        .recv_timeout(Duration::from_secs(2))
        .expect("start result");

    let (ext, log) = CollectingExtension::new();
    app.register_extension(&graph_id, "ear", Box::new(ext))
        .expect("register extension");

    let engine = app.engine_proxy(&graph_id).expect("engine proxy");
    let src = Location::for_extension(APP_URI, graph_id.clone(), "ear");
    engine
        .send_cmd(Command::timer(
            src.clone(),
            TimerCommand {
                timer_id: 3,
                interval_ms: 25,
                repeat: 0,
                cancel: false,
            },
        ))
        .expect("send timer")
        .recv_timeout(Duration::from_secs(2))
        .expect("timer started");

    let timeout_count =
        || log.lock().iter().filter(|e| e.kind == "cmd" && e.name == "timeout").count();
    assert!(wait_until(Duration::from_secs(2), || timeout_count() >= 1));

    let cancel = engine
        .send_cmd(Command::timer(
            src,
            TimerCommand {
                timer_id: 3,
                interval_ms: 25,
                repeat: 0,
                cancel: true,
            },
        ))
        .expect("send cancel")
        .recv_timeout(Duration::from_secs(2))
        .expect("cancel result");
    assert!(cancel.is_success());

    let after_cancel = timeout_count();
    std::thread::sleep(Duration::from_millis(120));
    assert!(
        timeout_count() <= after_cancel + 1,
        "at most one already-scheduled fire may land after cancel"
    );

    app.shutdown();
}

#[test]
fn data_plane_messages_follow_graph_routes_or_drop() {
    init_tracing();
    let app = app_with_predefined(vec![predefined("voice", "route-g")]);
    let graph_id = GraphId::from("route-g");

    app.proxy()
        .send_cmd(Command::start_graph(
            Location::for_app("weft://client"),
            StartGraphCommand {
                predefined_graph_name: Some("voice".into()),
                graph_json: None,
            },
        ))
        .expect("send start")
        .recv_timeout(Duration::from_secs(2))
        .expect("start result");

    let (ext, log) = CollectingExtension::new();
    app.register_extension(&graph_id, "echo", Box::new(ext))
        .expect("register extension");

    let engine = app.engine_proxy(&graph_id).expect("engine proxy");

    // Matches the "chunk from mic" rule: delivered to echo.
    engine
        .send_msg(Message::Data(DataMessage {
            header: MessageHeader::new(
                "chunk",
                Location::for_extension(APP_URI, graph_id.clone(), "mic"),
            ),
            payload: vec![1],
        }))
        .expect("send routed data");
    assert!(wait_until(Duration::from_secs(2), || {
        log.lock().iter().any(|e| e.kind == "data" && e.name == "chunk")
    }));

    // No rule matches: logged and dropped, echo sees nothing new.
    engine
        .send_msg(Message::Data(DataMessage {
            header: MessageHeader::new(
                "unrouted",
                Location::for_extension(APP_URI, graph_id.clone(), "mic"),
            ),
            payload: vec![2],
        }))
        .expect("send unrouted data");
    std::thread::sleep(Duration::from_millis(80));
    assert!(!log.lock().iter().any(|e| e.name == "unrouted"));

    app.shutdown();
}

#[test]
fn engine_bound_command_over_a_connection_replies_through_it() {
    init_tracing();
    let app = app_with_predefined(vec![predefined("voice", "remote-g")]);
    let graph_id = GraphId::from("remote-g");

    app.proxy()
        .send_cmd(Command::start_graph(
            Location::for_app("weft://client"),
            StartGraphCommand {
                predefined_graph_name: Some("voice".into()),
                graph_json: None,
            },
        ))
        .expect("send start")
        .recv_timeout(Duration::from_secs(2))
        .expect("start result");

    let (ext, log) = CollectingExtension::new();
    app.register_extension(&graph_id, "ear", Box::new(ext))
        .expect("register extension");
    // Let the registration land before traffic arrives.
    assert!(wait_until(Duration::from_secs(2), || {
        app.engine_proxy(&graph_id).is_some()
    }));
    std::thread::sleep(Duration::from_millis(30));

    let w = wire(&app);
    let mut cmd = Command::new(
        weft_msg::CommandKind::Unknown("ping".into()),
        Location::for_engine("weft://client-b", GraphId::from("their-g")),
    );
    cmd.header.dests = vec![Location::for_extension(APP_URI, graph_id.clone(), "ear")];
    let cmd_id = cmd.id();
    w.conn.on_message_received(Message::Cmd(cmd));

    // The command rides the migration to the engine loop, reaches the
    // extension, and its reply leaves through the same connection.
    assert!(wait_until(Duration::from_secs(2), || {
        !replies(&w.transport).is_empty()
    }));
    let reply = &replies(&w.transport)[0];
    assert!(reply.is_success());
    assert_eq!(reply.original_cmd_id, cmd_id);
    assert_eq!(
        w.conn.migration_state(),
        weft_runtime::MigrationState::Migrated
    );
    assert!(log.lock().iter().any(|e| e.kind == "cmd" && e.name == "ping"));

    app.shutdown();
}

#[test]
fn messages_with_no_resolvable_graph_are_refused() {
    let app = app_with_predefined(Vec::new());
    let w = wire(&app);

    // An engine-scope command with no destination graph: the app cannot
    // route it and answers with an explicit failure.
    let cmd = Command::timer(
        Location::for_app("weft://client"),
        TimerCommand {
            timer_id: 1,
            interval_ms: 10,
            repeat: 1,
            cancel: false,
        },
    );
    w.conn.on_message_received(Message::Cmd(cmd));

    assert!(wait_until(Duration::from_secs(2), || {
        !replies(&w.transport).is_empty()
    }));
    let reply = &replies(&w.transport)[0];
    assert!(!reply.is_success());
    assert!(
        reply
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("no route"))
    );

    app.shutdown();
}

#[test]
fn engines_can_run_on_their_own_loops() {
    init_tracing();
    let app = App::spawn(AppConfig {
        uri: APP_URI.into(),
        one_loop_per_engine: true,
        predefined_graphs: vec![predefined("voice", "own-loop-g")],
        ..AppConfig::default()
    })
    .expect("spawn app");
    let graph_id = GraphId::from("own-loop-g");

    app.proxy()
        .send_cmd(Command::start_graph(
            Location::for_app("weft://client"),
            StartGraphCommand {
                predefined_graph_name: Some("voice".into()),
                graph_json: None,
            },
        ))
        .expect("send start")
        .recv_timeout(Duration::from_secs(2))
        .expect("start result");

    let engine = app.engine_proxy(&graph_id).expect("engine proxy");
    assert_ne!(engine.target_loop().name(), app.runloop().name());

    // Stop tears the dedicated loop down with the engine.
    app.proxy()
        .send_cmd(Command::stop_graph(
            Location::for_app("weft://client"),
            graph_id.clone(),
        ))
        .expect("send stop")
        .recv_timeout(Duration::from_secs(2))
        .expect("stop result");
    app.with_app(|a| assert_eq!(a.engine_count(), 0));

    app.shutdown();
}
