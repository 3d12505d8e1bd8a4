//! Shutdown through termination signals and the `serve` entry point.
//!
//! Signals are process-wide, so everything that raises one lives in this
//! test binary and nowhere else.

use std::net::{Ipv4Addr, SocketAddr, TcpListener as StdListener};
use std::sync::Arc;
use std::time::Duration;

use linelog_core::{Level, LogRecord, Reporter};
use linelogd::config::DaemonConfig;
use linelogd::daemon::{self, DaemonError};
use linelogd::lock::{self, LockFile, LockStatus};
use linelogd::server::{Multiplexer, ServerConfig, ServerError};
use linelogd::shutdown::{spawn_signal_listener, ShutdownFlag};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

const STOP_TIMEOUT: Duration = Duration::from_secs(3);

fn open_reporter(temp_dir: &TempDir) -> Arc<Reporter> {
    Arc::new(Reporter::open(temp_dir.path().join("linelogd.log")).expect("open log"))
}

fn has_record(records: &[LogRecord], level: Level, message: &str) -> bool {
    records
        .iter()
        .any(|r| r.level == level && r.message == message)
}

fn test_config(temp_dir: &TempDir) -> DaemonConfig {
    DaemonConfig {
        port: 0,
        poll_interval_ms: 100,
        lock_path: temp_dir.path().join("linelogd.lock"),
        log_path: temp_dir.path().join("linelogd.log"),
        detach: false,
        require_root: false,
        ..DaemonConfig::default()
    }
}

#[tokio::test]
async fn test_signal_drains_and_releases_lock() {
    let temp_dir = tempfile::tempdir().unwrap();
    let lock_path = temp_dir.path().join("linelogd.lock");
    let reporter = open_reporter(&temp_dir);
    let shutdown = ShutdownFlag::new();

    let config = ServerConfig {
        port: 0,
        poll_interval: Duration::from_millis(100),
        ..ServerConfig::default()
    };
    let mut server = Multiplexer::new(config, Arc::clone(&reporter), shutdown.clone())
        .with_lock(LockFile::acquire(&lock_path).unwrap());
    let bound = server.bind().unwrap();
    let handle = tokio::spawn(server.run());

    let _signals = spawn_signal_listener(shutdown.clone(), Arc::clone(&reporter)).unwrap();

    let mut client = TcpStream::connect(SocketAddr::from((Ipv4Addr::LOCALHOST, bound.port())))
        .await
        .unwrap();

    // SAFETY: raise has no memory-safety preconditions; the handler is installed.
    assert_eq!(unsafe { libc::raise(libc::SIGHUP) }, 0);

    let result = timeout(STOP_TIMEOUT, handle).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert!(shutdown.is_requested());

    // Connected clients are closed by the drain.
    let mut buf = [0u8; 8];
    let n = timeout(STOP_TIMEOUT, client.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);

    assert!(!lock_path.exists());
    assert_eq!(lock::probe(&lock_path).unwrap(), LockStatus::Free);

    // The listener task logs the delivery itself; give it a moment.
    let mut records = reporter.records().unwrap();
    for _ in 0..100 {
        if has_record(&records, Level::Info, "linelogd: Signal handler (SIGHUP).") {
            break;
        }
        sleep(Duration::from_millis(10)).await;
        records = reporter.records().unwrap();
    }
    assert!(has_record(&records, Level::Info, "linelogd: Signal handler (SIGHUP)."));
    assert!(has_record(&records, Level::Info, "linelogd: Quitting."));

    // A second signal after the drain is tolerated.
    // SAFETY: as above.
    assert_eq!(unsafe { libc::raise(libc::SIGTERM) }, 0);
    sleep(Duration::from_millis(50)).await;
    let quitting = reporter
        .records()
        .unwrap()
        .iter()
        .filter(|r| r.message == "linelogd: Quitting.")
        .count();
    assert_eq!(quitting, 1);
}

#[tokio::test]
async fn test_serve_returns_after_requested_shutdown() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(&temp_dir);
    let reporter = open_reporter(&temp_dir);
    let lock = LockFile::acquire(&config.lock_path).unwrap();

    let shutdown = ShutdownFlag::new();
    shutdown.request();

    let result = timeout(
        STOP_TIMEOUT,
        daemon::serve(&config, Arc::clone(&reporter), Some(lock), None, shutdown),
    )
    .await
    .unwrap();
    assert!(result.is_ok());

    let records = reporter.records().unwrap();
    assert!(has_record(&records, Level::Info, "linelogd: Server created."));
    assert!(has_record(&records, Level::Info, "linelogd: Quitting."));
    assert!(!config.lock_path.exists());
}

#[tokio::test]
async fn test_serve_bind_failure_releases_lock() {
    let temp_dir = tempfile::tempdir().unwrap();
    let occupied = StdListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();

    let mut config = test_config(&temp_dir);
    config.port = occupied.local_addr().unwrap().port();
    let reporter = open_reporter(&temp_dir);
    let lock = LockFile::acquire(&config.lock_path).unwrap();

    let result = daemon::serve(
        &config,
        Arc::clone(&reporter),
        Some(lock),
        None,
        ShutdownFlag::new(),
    )
    .await;

    assert!(matches!(
        result,
        Err(DaemonError::Server(ServerError::Bind { .. }))
    ));
    assert!(result.unwrap_err().already_running().is_none());
    assert!(!config.lock_path.exists());

    let records = reporter.records().unwrap();
    assert!(records.iter().any(|r| r.level == Level::Error));
    assert!(has_record(&records, Level::Info, "linelogd: Quitting."));
}
