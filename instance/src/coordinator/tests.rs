use std::cell::{Cell, RefCell};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::UnixListener;

use super::*;

fn config(dir: &Path, app: &str) -> InstanceConfig {
    let mut cfg = InstanceConfig::new(app, "tests");
    cfg.runtime_dir = Some(dir.to_path_buf());
    cfg.handshake_timeout_ms = 300;
    cfg.disconnect_grace_ms = 100;
    cfg
}

/// Holds the lock and accepts connections without ever answering them.
fn silent_master(inst: &SingleInstance) -> (InstanceLock, tokio::task::JoinHandle<()>) {
    let mut lock = InstanceLock::new(inst.paths().lock.clone());
    assert!(lock.try_acquire().unwrap());
    let listener = UnixListener::bind(&inst.paths().socket).unwrap();
    let task = tokio::spawn(async move {
        loop {
            let Ok((mut s, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut sink = Vec::new();
                let _ = s.read_to_end(&mut sink).await;
            });
        }
    });
    (lock, task)
}

#[tokio::test]
async fn exactly_one_master_per_identity() {
    let dir = tempfile::tempdir().unwrap();
    let mut all: Vec<SingleInstance> = (0..4)
        .map(|_| SingleInstance::new(config(dir.path(), "single")))
        .collect();

    let masters = all.iter_mut().map(|i| i.start()).filter(|m| *m).count();
    assert_eq!(masters, 1);
    assert!(all[0].is_master());
    assert!(all[0].is_listening());
    for other in &all[1..] {
        assert_eq!(other.state(), CoordinatorState::Secondary);
        assert!(!other.is_listening());
    }
}

#[tokio::test]
async fn different_apps_do_not_contend() {
    let dir = tempfile::tempdir().unwrap();
    let mut a = SingleInstance::new(config(dir.path(), "alpha"));
    let mut b = SingleInstance::new(config(dir.path(), "beta"));
    assert!(a.start());
    assert!(b.start());
    assert_ne!(a.instance_id(), b.instance_id());
}

#[tokio::test]
async fn forwarded_arguments_arrive_once_and_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut master = SingleInstance::new(config(dir.path(), "fwd"));
    let mut second = SingleInstance::new(config(dir.path(), "fwd"));
    assert!(master.start());

    let args = ["second", "--open", "a file.txt", ""];
    assert!(second.process(&args).await);
    assert_eq!(second.state(), CoordinatorState::Delivered);
    assert!(!second.is_master());

    let got = master.next_message().await.expect("message");
    assert_eq!(got, args);
    assert!(master.inbox_rx.try_recv().is_err());
}

#[tokio::test]
async fn master_loop_dispatches_and_quits_on_request() {
    let dir = tempfile::tempdir().unwrap();
    let mut master = SingleInstance::new(config(dir.path(), "loop"));
    let mut second = SingleInstance::new(config(dir.path(), "loop"));

    let startups = Rc::new(Cell::new(0));
    let received = Rc::new(RefCell::new(Vec::new()));
    {
        let startups = startups.clone();
        master.set_startup_function(move || {
            startups.set(startups.get() + 1);
            0
        });
        let received = received.clone();
        let quit = master.quit_handle();
        master.on_message(move |args| {
            if args.get(1).map(String::as_str) == Some("--quit") {
                quit.quit(0);
            }
            received.borrow_mut().push(args);
        });
    }

    let master_args = ["master"];
    let second_args = ["second", "--quit", "extra arg"];
    let (code, delivered) = tokio::join!(
        master.single_exec(&master_args, true),
        second.single_exec(&second_args, true),
    );

    assert_eq!(code, 0);
    assert_eq!(delivered, 0);
    assert_eq!(second.state(), CoordinatorState::Delivered);
    assert_eq!(startups.get(), 1);
    assert_eq!(
        *received.borrow(),
        vec![vec![
            "second".to_string(),
            "--quit".to_string(),
            "extra arg".to_string()
        ]]
    );

    // auto_close released everything.
    assert!(!master.is_master());
    assert!(!master.paths().socket.exists());
    let mut next = SingleInstance::new(config(dir.path(), "loop"));
    assert!(next.start());
}

#[tokio::test]
async fn failed_startup_closes_and_returns_its_code() {
    let dir = tempfile::tempdir().unwrap();
    let mut master = SingleInstance::new(config(dir.path(), "fails"));
    master.set_startup_function(|| 3);
    let args: [&str; 0] = [];
    assert_eq!(master.single_exec(&args, true).await, 3);
    assert_eq!(master.state(), CoordinatorState::Idle);
}

#[tokio::test]
async fn no_startup_function_is_a_no_op_master() {
    let dir = tempfile::tempdir().unwrap();
    let mut master = SingleInstance::new(config(dir.path(), "noop"));
    master.quit_handle().quit(7);
    let args = ["noop"];
    assert_eq!(master.single_exec(&args, false).await, 7);
    // Without auto_close the instance stays master.
    assert!(master.is_master());
    master.close_instance();
    assert!(!master.is_master());
}

#[tokio::test]
async fn timeout_without_recovery_reports_code_and_leaves_lock_alone() {
    let dir = tempfile::tempdir().unwrap();
    let mut second = SingleInstance::new(config(dir.path(), "silent"));
    let (held, task) = silent_master(&second);

    let args = ["second", "x"];
    let code = second.single_exec(&args, true).await;
    assert_eq!(code, HandshakeError::Timeout(Duration::ZERO).code());
    assert_eq!(second.state(), CoordinatorState::Failed);
    assert!(!second.is_master());

    assert!(held.is_held());
    assert!(second.paths().lock.exists());
    let mut probe = InstanceLock::new(second.paths().lock.clone());
    assert!(!probe.try_acquire().unwrap());
    task.abort();
}

#[tokio::test]
async fn recovery_gives_up_while_a_live_master_holds_the_lock() {
    let dir = tempfile::tempdir().unwrap();
    let mut second = SingleInstance::new(config(dir.path(), "alive"));
    second.set_auto_recovery(true);
    let (held, task) = silent_master(&second);

    let args = ["second"];
    assert!(!second.process(&args).await);
    assert_eq!(second.state(), CoordinatorState::Failed);
    assert!(held.is_held());
    assert!(second.paths().lock.exists());
    task.abort();
}

#[tokio::test]
async fn crashed_master_is_replaced_at_election() {
    let dir = tempfile::tempdir().unwrap();
    let mut second = SingleInstance::new(config(dir.path(), "crashed"));
    second.set_auto_recovery(true);

    // A crashed master leaves an unlocked lock file and a dead socket behind.
    std::fs::write(&second.paths().lock, b"").unwrap();
    drop(std::os::unix::net::UnixListener::bind(&second.paths().socket).unwrap());

    let startups = Rc::new(Cell::new(0));
    let received = Rc::new(RefCell::new(Vec::<Vec<String>>::new()));
    {
        let startups = startups.clone();
        let quit = second.quit_handle();
        second.set_startup_function(move || {
            startups.set(startups.get() + 1);
            quit.quit(0);
            0
        });
        let received = received.clone();
        second.on_message(move |args| received.borrow_mut().push(args));
    }

    let args = ["second", "--own"];
    assert_eq!(second.single_exec(&args, false).await, 0);
    assert!(second.is_master());
    assert!(second.is_listening());
    assert_eq!(startups.get(), 1);
    assert!(received.borrow().is_empty(), "own arguments are not looped back");

    // The promoted master serves later launches.
    let mut third = SingleInstance::new(config(dir.path(), "crashed"));
    let third_args = ["third"];
    assert!(third.process(&third_args).await);
    assert_eq!(second.next_message().await.expect("message"), vec!["third"]);
}

#[tokio::test]
async fn recovery_promotes_when_master_releases_before_the_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let mut second = SingleInstance::new(config(dir.path(), "leaving"));
    second.set_auto_recovery(true);
    let (mut held, task) = silent_master(&second);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        held.release();
    });

    let startups = Rc::new(Cell::new(0));
    let received = Rc::new(RefCell::new(Vec::<Vec<String>>::new()));
    {
        let startups = startups.clone();
        let quit = second.quit_handle();
        second.set_startup_function(move || {
            startups.set(startups.get() + 1);
            quit.quit(0);
            0
        });
        let received = received.clone();
        second.on_message(move |args| received.borrow_mut().push(args));
    }

    // A concurrent launch that opened the lock file before the takeover.
    let opened_early = std::fs::File::open(&second.paths().lock).unwrap();

    let args = ["second"];
    assert_eq!(second.single_exec(&args, false).await, 0);
    assert!(second.is_master());
    assert!(second.is_listening());
    assert_eq!(startups.get(), 1);
    assert!(received.borrow().is_empty(), "own arguments are not looped back");

    let rc = unsafe { libc::flock(opened_early.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    assert_ne!(rc, 0, "the early opener must not become a second master");
    task.abort();
}

#[tokio::test]
async fn master_without_listener_still_holds_the_lock() {
    let dir = tempfile::tempdir().unwrap();
    let mut master = SingleInstance::new(config(dir.path(), "nolisten"));
    // Something that is not a socket sits on the endpoint path.
    std::fs::create_dir(&master.paths().socket).unwrap();

    assert!(master.start());
    assert!(master.is_master());
    assert!(!master.is_listening());

    let mut second = SingleInstance::new(config(dir.path(), "nolisten"));
    second.set_auto_recovery(true);
    let args = ["second"];
    assert!(!second.process(&args).await);
    assert_eq!(second.state(), CoordinatorState::Failed);
}

#[tokio::test]
async fn close_instance_is_a_no_op_when_not_master() {
    let dir = tempfile::tempdir().unwrap();
    let mut master = SingleInstance::new(config(dir.path(), "close"));
    let mut other = SingleInstance::new(config(dir.path(), "close"));
    assert!(master.start());
    assert!(!other.start());

    other.close_instance();
    other.close_instance();
    assert_eq!(other.state(), CoordinatorState::Secondary);
    assert!(master.is_master());
    assert!(master.paths().socket.exists());
    assert!(!other.start(), "lock still held by the master");

    let args = ["other"];
    assert!(other.process(&args).await);
    assert_eq!(master.next_message().await.expect("message"), vec!["other"]);

    master.close_instance();
    master.close_instance();
    assert_eq!(master.state(), CoordinatorState::Idle);
    assert!(!master.paths().socket.exists());
}

#[tokio::test]
async fn identity_is_frozen_while_master() {
    let dir = tempfile::tempdir().unwrap();
    let mut inst = SingleInstance::new(config(dir.path(), "ident"));
    let derived = inst.instance_id().clone();
    assert!(inst.start());

    assert_eq!(inst.set_instance_id("other"), Err(InstanceError::Busy));
    assert_eq!(inst.set_global(true, true), Err(InstanceError::Busy));
    assert_eq!(inst.reset_instance_id(), Err(InstanceError::Busy));
    assert_eq!(inst.instance_id(), &derived);

    inst.close_instance();
    inst.set_instance_id("custom id").unwrap();
    assert_eq!(inst.instance_id().as_str(), "custom_id");
    assert_eq!(inst.paths().socket, dir.path().join("custom_id"));
    assert_eq!(
        inst.set_instance_id(""),
        Err(InstanceError::InvalidId(String::new()))
    );

    inst.reset_instance_id().unwrap();
    assert_eq!(inst.instance_id(), &derived);

    inst.set_global(true, true).unwrap();
    assert!(inst.is_global());
    assert_ne!(inst.instance_id(), &derived);
    assert!(derived.as_str().starts_with(inst.instance_id().as_str()));
}

struct Window {
    raised: AtomicUsize,
}

impl NotifyTarget for Window {
    fn activate(&self) {
        self.raised.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn notify_target_is_raised_and_never_kept_alive() {
    let dir = tempfile::tempdir().unwrap();
    let mut master = SingleInstance::new(config(dir.path(), "notify"));
    let window = Arc::new(Window {
        raised: AtomicUsize::new(0),
    });
    master.set_notify_target(&window);
    assert!(master.start());

    let mut second = SingleInstance::new(config(dir.path(), "notify"));
    let args = ["second"];
    assert!(second.process(&args).await);
    master.next_message().await.expect("message");
    assert_eq!(window.raised.load(Ordering::SeqCst), 1);

    assert_eq!(Arc::strong_count(&window), 1);
    drop(window);
    let mut third = SingleInstance::new(config(dir.path(), "notify"));
    let args = ["third"];
    assert!(third.process(&args).await);
    assert_eq!(master.next_message().await.expect("message"), vec!["third"]);
}
