//! Session state-machine tests. These live in their own integration
//! binary (own process) because the interpreter session is a one-shot
//! process-wide singleton: once stopped, it stays stopped.
//!
//! Everything runs inside a single test function to keep the lifecycle
//! transitions strictly ordered.

use std::io::Write;
use std::sync::mpsc;
use std::time::Duration;

use pybridge::{BridgeError, HostValue, InterpreterSession, SessionState};

#[test]
fn test_session_lifecycle_end_to_end() {
    pybridge::logging::init_bridge_logging();
    let session = InterpreterSession::global();

    // Before start: everything but `start` fails with NotRunning.
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert!(matches!(
        pybridge::evaluate("1 + 1"),
        Err(BridgeError::NotRunning)
    ));
    assert!(matches!(
        pybridge::import_module("math"),
        Err(BridgeError::NotRunning)
    ));
    assert!(matches!(
        pybridge::append_sys_path("./nowhere"),
        Err(BridgeError::NotRunning)
    ));
    assert!(matches!(
        pybridge::open_file("./nowhere.py"),
        Err(BridgeError::NotRunning)
    ));
    assert!(matches!(session.stop(), Err(BridgeError::NotRunning)));

    // Start, exactly once.
    pybridge::start_interpreter(None).unwrap();
    assert_eq!(session.state(), SessionState::Running);
    assert!(matches!(
        pybridge::start_interpreter(None),
        Err(BridgeError::AlreadyRunning)
    ));

    // Expression evaluation.
    assert_eq!(pybridge::evaluate("2.5 * 4").unwrap(), 10.0);
    match pybridge::evaluate("1/0") {
        Err(BridgeError::Eval(message)) => assert!(message.contains("division")),
        other => panic!("expected Eval, got {other:?}"),
    }
    assert!(matches!(
        pybridge::evaluate("'abc'"),
        Err(BridgeError::Eval(_))
    ));

    // Loading a source file as a module object.
    let dir = tempfile::tempdir().unwrap();
    let module_path = dir.path().join("greeter.py");
    let mut file = std::fs::File::create(&module_path).unwrap();
    writeln!(file, "def greet(name):").unwrap();
    writeln!(file, "    return 'hello ' + name").unwrap();
    drop(file);

    let module = pybridge::open_file(module_path.to_str().unwrap()).unwrap();
    assert_eq!(module.type_tag(), "module");
    let greet = module
        .get_attribute("greet")
        .unwrap()
        .as_object()
        .cloned()
        .unwrap();
    assert_eq!(
        greet.call(&[HostValue::Str("bridge".into())]).unwrap(),
        HostValue::Str("hello bridge".into())
    );
    assert!(session.live_handles() >= 2);

    // Load failures.
    let broken_path = dir.path().join("broken.py");
    std::fs::write(&broken_path, "def broken(:\n").unwrap();
    assert!(matches!(
        pybridge::open_file(broken_path.to_str().unwrap()),
        Err(BridgeError::Load(_))
    ));
    assert!(matches!(
        pybridge::open_file(dir.path().join("absent.py").to_str().unwrap()),
        Err(BridgeError::Load(_))
    ));
    assert!(matches!(
        pybridge::import_module("definitely_not_a_module_xyz"),
        Err(BridgeError::Load(_))
    ));

    // Stop is terminal.
    session.stop().unwrap();
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(matches!(session.stop(), Err(BridgeError::NotRunning)));
    assert!(matches!(
        pybridge::start_interpreter(None),
        Err(BridgeError::AlreadyRunning)
    ));

    // Handles outlive the session only as inert host-side data.
    assert_eq!(greet.type_tag(), "function");
    assert!(matches!(
        greet.call(&[HostValue::Str("late".into())]),
        Err(BridgeError::NotRunning)
    ));
    assert!(matches!(
        greet.get_attribute("__name__"),
        Err(BridgeError::NotRunning)
    ));
    assert!(matches!(greet.repr(), Err(BridgeError::NotRunning)));
    assert!(matches!(
        pybridge::evaluate("1 + 1"),
        Err(BridgeError::NotRunning)
    ));

    // An async call submitted after stop still resolves, exactly once,
    // with a lifecycle error.
    let (tx, rx) = mpsc::channel();
    greet.call_async(vec![HostValue::Str("late".into())], move |result| {
        tx.send(result).unwrap();
    });
    match rx.recv_timeout(Duration::from_secs(10)).unwrap() {
        Err(BridgeError::NotRunning) => {}
        other => panic!("expected NotRunning, got {other:?}"),
    }
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}
