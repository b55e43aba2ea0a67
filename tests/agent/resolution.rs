use crate::common::{agent, agent_with, capture_at, test_config, SERVER_JS};
use livebug::agent::breakpoint::{Action, Breakpoint, Reference, SourceLocation};
use livebug::agent::engine::heap::HeapEngine;
use livebug::agent::format;
use livebug::agent::Phase;

struct TestCase {
    breakpoint: Breakpoint,
    refers_to: Reference,
    description: String,
}

#[test]
fn test_rejected_breakpoints() {
    let test_cases = vec![
        TestCase {
            breakpoint: capture_at("bp-1", "missing.js", 3),
            refers_to: Reference::BreakpointSourceLocation,
            description: format::SOURCE_FILE_NOT_FOUND.to_string(),
        },
        TestCase {
            breakpoint: capture_at("bp-2", "index.js", 101),
            refers_to: Reference::BreakpointSourceLocation,
            description: format!("{}index.js:101", format::INVALID_LINE_NUMBER),
        },
        TestCase {
            breakpoint: capture_at("bp-3", "index.js", 0),
            refers_to: Reference::BreakpointSourceLocation,
            description: format!("{}index.js:0", format::INVALID_LINE_NUMBER),
        },
        TestCase {
            breakpoint: capture_at("bp-4", "index.js", 5).with_condition("x = 1"),
            refers_to: Reference::BreakpointCondition,
            description: format::DISALLOWED_EXPRESSION.to_string(),
        },
        TestCase {
            breakpoint: capture_at("bp-5", "index.js", 5).with_condition("a +"),
            refers_to: Reference::BreakpointCondition,
            description: format::ERROR_COMPILING_CONDITION.to_string(),
        },
        TestCase {
            breakpoint: capture_at("bp-6", "index.js", 5).with_expressions(["ok", "i++"]),
            refers_to: Reference::BreakpointExpression,
            description: format::DISALLOWED_EXPRESSION.to_string(),
        },
        TestCase {
            breakpoint: capture_at("bp-7", "index.js", 5)
                .with_action(Action::Unsupported("TRACE".to_string())),
            refers_to: Reference::Unspecified,
            description: format!("{}TRACE", format::UNSUPPORTED_ACTION),
        },
        TestCase {
            breakpoint: Breakpoint {
                id: None,
                location: Some(SourceLocation::new("index.js", 5)),
                ..Default::default()
            },
            refers_to: Reference::Unspecified,
            description: format::INVALID_BREAKPOINT.to_string(),
        },
        TestCase {
            breakpoint: Breakpoint {
                id: Some("bp-9".to_string()),
                location: None,
                ..Default::default()
            },
            refers_to: Reference::Unspecified,
            description: format::INVALID_BREAKPOINT.to_string(),
        },
    ];

    for tc in test_cases {
        let (mut agent, _) = agent();
        let id = tc.breakpoint.id.clone();
        assert_eq!(agent.set(tc.breakpoint).unwrap(), Phase::Rejected);

        let updates = agent.control_plane().updates();
        assert_eq!(updates.len(), 1, "breakpoint {id:?}");
        let bp = &updates[0];
        assert!(bp.is_final_state);
        assert!(bp.final_time.is_some());
        let status = bp.status.as_ref().unwrap();
        assert!(status.is_error);
        assert_eq!(status.refers_to, tc.refers_to, "breakpoint {id:?}");
        assert_eq!(status.description.format, tc.description, "breakpoint {id:?}");

        assert_eq!(agent.engine().native_breakpoint_count(), 0);
        if let Some(id) = id {
            assert_eq!(agent.phase(&id), Some(Phase::Rejected));
        }
    }
}

#[test]
fn test_ambiguous_location() {
    let (mut agent, _) = agent();
    assert_eq!(
        agent.set(capture_at("bp-1", "util.js", 3)).unwrap(),
        Phase::Rejected
    );

    let updates = agent.control_plane().updates();
    let status = updates[0].status.as_ref().unwrap();
    assert_eq!(status.refers_to, Reference::BreakpointSourceLocation);
    assert!(status
        .description
        .format
        .starts_with("Unable to unambiguously find util.js"));
    assert_eq!(
        status.description.parameters,
        vec!["/srv/app/lib/util.js", "/srv/app/test/util.js"]
    );

    // longer suffix is enough to disambiguate
    assert_eq!(
        agent.set(capture_at("bp-2", "lib/util.js", 3)).unwrap(),
        Phase::Waiting
    );
}

#[test]
fn test_expressions_disabled() {
    let mut config = test_config();
    config.allow_expressions = false;
    let (mut agent, _) = agent_with(config, HeapEngine::new());

    agent
        .set(capture_at("bp-1", "index.js", 5).with_condition("ready"))
        .unwrap();
    agent
        .set(capture_at("bp-2", "index.js", 5).with_expressions(["user"]))
        .unwrap();
    assert_eq!(agent.set(capture_at("bp-3", "index.js", 5)).unwrap(), Phase::Waiting);

    let updates = agent.control_plane().updates();
    assert_eq!(updates.len(), 2);
    for bp in updates {
        assert_eq!(
            bp.status.unwrap().description.format,
            format::EXPRESSIONS_DISABLED
        );
    }
}

#[test]
fn test_wrapped_module_first_line() {
    let (mut agent, _) = agent();
    agent.set(capture_at("bp-1", "lib/server.js", 1)).unwrap();
    agent
        .set(Breakpoint::new(
            "bp-2",
            SourceLocation::new("lib/server.js", 2).with_column(5),
        ))
        .unwrap();

    let prefix = agent.config().module_wrapper_prefix_len;
    let mut natives = agent
        .engine()
        .native_breakpoints()
        .map(|(_, bp)| (bp.url.clone(), bp.line, bp.column))
        .collect::<Vec<_>>();
    natives.sort();
    assert_eq!(
        natives,
        vec![
            (SERVER_JS.to_string(), 0, prefix),
            (SERVER_JS.to_string(), 1, 4),
        ]
    );
}

#[test]
fn test_scripts_loaded_later() {
    let (mut agent, _) = agent();
    assert_eq!(
        agent.set(capture_at("bp-1", "late.js", 3)).unwrap(),
        Phase::Rejected
    );

    agent
        .scripts_mut()
        .insert("/srv/app/late.js", livebug::agent::location::ScriptInfo::new(10));
    assert_eq!(
        agent.set(capture_at("bp-2", "late.js", 3)).unwrap(),
        Phase::Waiting
    );
}
