//! Idle connections are reaped by the deadline timer.

use server::users::FixedUserStore;
use std::fs;
use std::io::Read;
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

fn scratch_root(tag: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!("hearth-timeout-{}-{}", tag, std::process::id()));
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("index.html"), "<html>index</html>").unwrap();
    root
}

fn start_server(root: &PathBuf, timeout_ms: u64) -> (SocketAddr, Arc<AtomicUsize>) {
    let doc = format!(
        r#"
        [listener]
        port = 0
        trigger_mode = 3
        timeout_ms = {}
        root = "{}"

        [workers]
        threads = 2
        "#,
        timeout_ms,
        root.display()
    );
    let config: server::Config = toml::from_str(&doc).unwrap();
    let mut reactor = server::Reactor::new(&config, FixedUserStore::new(false)).unwrap();
    let addr = reactor.local_addr().unwrap();
    let users = reactor.user_counter();
    std::thread::spawn(move || {
        reactor.run(&AtomicBool::new(false));
    });
    (addr, users)
}

#[test]
fn test_idle_connections_are_closed_and_counted_out() {
    let root = scratch_root("reap");
    let (addr, users) = start_server(&root, 300);

    let mut conns: Vec<TcpStream> = (0..20)
        .map(|_| TcpStream::connect(addr).unwrap())
        .collect();

    // Wait for every accept to land.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while users.load(Ordering::Relaxed) < 20 {
        assert!(std::time::Instant::now() < deadline, "accepts did not land");
        std::thread::sleep(Duration::from_millis(10));
    }

    // Well past the idle deadline every connection is gone.
    std::thread::sleep(Duration::from_millis(1000));
    assert_eq!(users.load(Ordering::Relaxed), 0);

    for stream in conns.iter_mut() {
        stream
            .set_read_timeout(Some(Duration::from_secs(1)))
            .unwrap();
        let mut buf = Vec::new();
        assert_eq!(stream.read_to_end(&mut buf).unwrap(), 0, "expected EOF");
    }

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn test_zero_timeout_disables_reaping() {
    let root = scratch_root("disabled");
    let (addr, users) = start_server(&root, 0);

    let _conn = TcpStream::connect(addr).unwrap();
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while users.load(Ordering::Relaxed) < 1 {
        assert!(std::time::Instant::now() < deadline, "accept did not land");
        std::thread::sleep(Duration::from_millis(10));
    }

    std::thread::sleep(Duration::from_millis(500));
    assert_eq!(users.load(Ordering::Relaxed), 1);

    let _ = fs::remove_dir_all(&root);
}
