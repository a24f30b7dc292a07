use plughost_core::{
    BundleSource, BundleStore, Extension, ExtensionEvent, ExtensionEventKind, ExtensionFactories,
    ExtensionResult, LifecycleController, ListenerResult, Params,
};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

const INSTALLERS: usize = 16;

/// Blocks each call until `expected` calls are in flight at once.
struct Rendezvous {
    arrivals: Arc<(Mutex<usize>, Condvar)>,
    expected: usize,
}

impl Extension for Rendezvous {
    fn execute(&self, _params: &Params) -> ExtensionResult<Value> {
        let (count, ready) = &*self.arrivals;
        let mut arrived = count.lock().map_err(|_| "rendezvous lock poisoned")?;
        *arrived += 1;
        ready.notify_all();
        let (arrived, timeout) = ready
            .wait_timeout_while(arrived, Duration::from_secs(5), |arrived| {
                *arrived < self.expected
            })
            .map_err(|_| "rendezvous lock poisoned")?;
        Ok(json!({"met": !timeout.timed_out(), "arrived": *arrived}))
    }
}

fn controller(root: &std::path::Path, expected: usize) -> LifecycleController {
    let mut factories = ExtensionFactories::with_builtins();
    let arrivals = Arc::new((Mutex::new(0), Condvar::new()));
    factories
        .register("rendezvous", "", move |_ctx| {
            Ok(Box::new(Rendezvous {
                arrivals: arrivals.clone(),
                expected,
            }))
        })
        .expect("register rendezvous");
    LifecycleController::from_parts(BundleStore::new(root.join("plugins"), "bundle"), factories)
}

#[test]
fn concurrent_installs_of_distinct_names_are_all_registered() {
    let root = tempfile::tempdir().expect("temp dir");
    let controller = controller(root.path(), 1);

    thread::scope(|scope| {
        for index in 0..INSTALLERS {
            let controller = &controller;
            scope.spawn(move || {
                let result = controller.install(BundleSource::from_bytes(
                    format!("ext{index}.bundle"),
                    r#"{"factory": "echo"}"#,
                ));
                assert!(result.is_success(), "{}", result.message);
            });
        }
    });

    let names: BTreeSet<String> = controller.list().into_iter().map(|info| info.name).collect();
    let expected: BTreeSet<String> = (0..INSTALLERS).map(|index| format!("ext{index}")).collect();
    assert_eq!(names, expected);
    assert_eq!(
        controller.store().list_artifacts().expect("list").len(),
        INSTALLERS
    );
}

#[test]
fn concurrent_installs_of_one_name_leave_exactly_one_instance() {
    let root = tempfile::tempdir().expect("temp dir");
    let controller = controller(root.path(), 1);

    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                let result = controller.install(BundleSource::from_bytes("echo.bundle", ""));
                assert!(result.is_success(), "{}", result.message);
            });
        }
    });

    let listed = controller.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "echo");
    assert_eq!(
        controller.store().list_artifacts().expect("list").len(),
        1
    );
}

fn versioned(version: &str) -> BundleSource {
    BundleSource::from_bytes("echo.bundle", format!(r#"{{"version": "{version}"}}"#))
}

#[test]
fn stalled_replacement_cannot_shadow_a_later_install() {
    let root = tempfile::tempdir().expect("temp dir");
    let controller = controller(root.path(), 1);
    assert!(controller.install(versioned("1.0.0")).is_success());

    // The first replacement parks while announcing the 1.0.0 retirement.
    let (stalled_tx, stalled_rx) = mpsc::channel::<()>();
    let (resume_tx, resume_rx) = mpsc::channel::<()>();
    let stalled_tx = Mutex::new(stalled_tx);
    let resume_rx = Mutex::new(resume_rx);
    controller.subscribe(move |event: &ExtensionEvent| -> ListenerResult {
        let retiring_first = matches!(event.kind, ExtensionEventKind::Unloaded)
            && event.extension.version == "1.0.0";
        if retiring_first {
            stalled_tx.lock().expect("stalled lock").send(()).expect("signal stall");
            resume_rx
                .lock()
                .expect("resume lock")
                .recv_timeout(Duration::from_secs(5))
                .expect("resume signal");
        }
        Ok(())
    });

    thread::scope(|scope| {
        let first = scope.spawn(|| controller.install(versioned("2.0.0")));
        stalled_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("first replacement stalls");

        let second = controller.install(versioned("3.0.0"));
        assert!(second.is_success(), "{}", second.message);
        resume_tx.send(()).expect("resume first replacement");

        let first = first.join().expect("first installer thread");
        assert!(first.is_success(), "{}", first.message);
    });

    let registered = controller.get("echo").expect("echo registered").version;
    let stored = std::fs::read_to_string(controller.store().path_of("echo.bundle"))
        .expect("read stored bundle");
    let stored: Value = serde_json::from_str(&stored).expect("stored manifest");
    assert_eq!(registered, "3.0.0");
    assert_eq!(stored["version"], json!(registered));
    assert_eq!(controller.list().len(), 1);
}

#[test]
fn executions_on_one_extension_are_not_serialized() {
    let root = tempfile::tempdir().expect("temp dir");
    let controller = controller(root.path(), 2);
    controller.install(BundleSource::from_bytes(
        "meet.bundle",
        r#"{"factory": "rendezvous"}"#,
    ));

    let results: Vec<Value> = thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| scope.spawn(|| controller.execute("meet", Params::new())))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                let result = handle.join().expect("executor thread");
                assert!(result.is_success(), "{}", result.message);
                result.data.expect("payload")
            })
            .collect()
    });

    for payload in results {
        assert_eq!(payload["met"], json!(true));
    }
}

#[test]
fn controller_is_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<LifecycleController>();

    let root = tempfile::tempdir().expect("temp dir");
    let controller = Arc::new(controller(root.path(), 1));
    controller.install(BundleSource::from_bytes("echo.bundle", ""));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let controller = Arc::clone(&controller);
            thread::spawn(move || {
                for _ in 0..25 {
                    assert!(controller.execute("echo", Params::new()).is_success());
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker thread");
    }

    let last = controller.execute("echo", Params::new());
    assert_eq!(last.data.expect("payload")["invocation"], json!(101));
}
