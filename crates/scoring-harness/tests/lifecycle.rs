//! Process lifecycle tests: readiness, process-group teardown, launch flags.
//!
//! Liveness is read from `/proc`, so these only run on Linux.

#![cfg(target_os = "linux")]

use scoring_harness::{
    HarnessError, LaunchConfig, ReadinessProbe, ServerEndpoint, ServerLauncher, ServerState,
};
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::tempdir;
use tokio::net::TcpListener;

const PATIENCE: Duration = Duration::from_secs(5);

/// A pid counts as gone once `/proc` drops it or it is a zombie.
fn is_alive(pid: i32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => {
            let state = stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.trim_start().chars().next());
            !matches!(state, Some('Z') | Some('X') | None)
        }
        Err(_) => false,
    }
}

async fn wait_dead(pid: i32) -> bool {
    let start = Instant::now();
    while start.elapsed() < PATIENCE {
        if !is_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

async fn wait_for_file(path: &Path) -> String {
    let start = Instant::now();
    loop {
        if let Ok(content) = std::fs::read_to_string(path) {
            if content.ends_with('\n') {
                return content;
            }
        }
        assert!(start.elapsed() < PATIENCE, "{} never written", path.display());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn shell(script: &str, readiness: ReadinessProbe) -> ServerLauncher {
    ServerLauncher::new(
        LaunchConfig::new("sh").with_args(["-c", script]),
        readiness,
        Duration::ZERO,
    )
}

/// Test: TCP readiness passes as soon as the endpoint accepts connections
#[tokio::test]
async fn test_tcp_readiness_succeeds_when_port_listens() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = ServerEndpoint::new("127.0.0.1", listener.local_addr().unwrap().port());

    let launcher = shell(
        "sleep 30",
        ReadinessProbe::tcp(PATIENCE, Duration::from_millis(20)),
    );
    let mut handle = launcher.start(None, &endpoint).await.expect("not ready");
    assert_eq!(handle.state(), ServerState::Running);

    handle.stop().await.unwrap();
    assert!(wait_dead(handle.pid() as i32).await);
}

/// Test: an endpoint that never listens fails with NotReady and kills the server
#[tokio::test]
async fn test_tcp_readiness_times_out() {
    let dir = tempdir().unwrap();
    let pidfile = dir.path().join("server.pid");
    let endpoint = ServerEndpoint::new("127.0.0.1", free_port().await);

    let launcher = shell(
        &format!("echo $$ > {}; sleep 30", pidfile.display()),
        ReadinessProbe::tcp(Duration::from_millis(300), Duration::from_millis(50)),
    );
    let err = launcher.start(None, &endpoint).await.unwrap_err();
    match err {
        HarnessError::NotReady { endpoint: e, waited_ms } => {
            assert_eq!(e, endpoint);
            assert!(waited_ms >= 300);
        }
        other => panic!("unexpected error: {other}"),
    }

    let pid: i32 = wait_for_file(&pidfile).await.trim().parse().unwrap();
    assert!(wait_dead(pid).await, "server {pid} survived a failed start");
}

/// Test: a launcher that backgrounds the server and exits 0 is not a failure
#[tokio::test]
async fn test_launcher_exiting_zero_is_tolerated() {
    let launcher = shell("exit 0", ReadinessProbe::fixed(Duration::from_millis(100)));
    let mut handle = launcher
        .start(None, &ServerEndpoint::new("127.0.0.1", free_port().await))
        .await
        .expect("exit 0 treated as failure");
    handle.stop().await.expect("stop after exit");
    assert_eq!(handle.state(), ServerState::Stopped);
}

/// Test: stop kills workers forked by the server, not just the leader
#[tokio::test]
async fn test_stop_kills_whole_process_group() {
    let dir = tempdir().unwrap();
    let pidfile = dir.path().join("worker.pid");

    let launcher = shell(
        &format!("sleep 30 & echo $! > {}; wait", pidfile.display()),
        ReadinessProbe::fixed(Duration::ZERO),
    );
    let mut handle = launcher.start(None, &ServerEndpoint::default()).await.unwrap();
    let worker: i32 = wait_for_file(&pidfile).await.trim().parse().unwrap();
    assert!(is_alive(worker));

    handle.stop().await.unwrap();

    assert!(wait_dead(worker).await, "worker {worker} survived teardown");
    assert!(wait_dead(handle.pid() as i32).await);
}

/// Test: repeated stop of a finished handle leaves a newer server alone
#[tokio::test]
async fn test_repeated_stop_does_not_touch_new_server() {
    let launcher = shell("sleep 30", ReadinessProbe::fixed(Duration::ZERO));
    let endpoint = ServerEndpoint::default();

    let mut first = launcher.start(None, &endpoint).await.unwrap();
    first.stop().await.unwrap();

    let mut second = launcher.start(None, &endpoint).await.unwrap();
    first.stop().await.unwrap();
    first.stop().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(is_alive(second.pid() as i32), "second server was killed");

    second.stop().await.unwrap();
}

/// Test: dropping a running handle still kills its process group
#[tokio::test]
async fn test_drop_kills_process_group() {
    let dir = tempdir().unwrap();
    let pidfile = dir.path().join("worker.pid");

    let launcher = shell(
        &format!("sleep 30 & echo $! > {}; wait", pidfile.display()),
        ReadinessProbe::fixed(Duration::ZERO),
    );
    let handle = launcher.start(None, &ServerEndpoint::default()).await.unwrap();
    let worker: i32 = wait_for_file(&pidfile).await.trim().parse().unwrap();

    drop(handle);

    assert!(wait_dead(worker).await, "worker {worker} survived drop");
}

/// Test: the working directory and generated flags reach the server
#[tokio::test]
async fn test_launch_flags_and_working_dir() {
    let root = tempdir().unwrap();
    std::fs::create_dir(root.path().join("bin")).unwrap();
    std::fs::write(
        root.path().join("bin/scoring-server.sh"),
        "printf '%s\\n' \"$@\" > args.txt\npwd > cwd.txt\nsleep 30\n",
    )
    .unwrap();
    let model = root.path().join("Kmeans.mar");

    let endpoint = ServerEndpoint::new("127.0.0.1", 9155);
    let launcher = ServerLauncher::new(
        LaunchConfig::new("sh")
            .with_working_dir(root.path())
            .with_args(["./bin/scoring-server.sh"]),
        ReadinessProbe::fixed(Duration::ZERO),
        Duration::ZERO,
    );
    let mut handle = launcher.start(Some(&model), &endpoint).await.unwrap();

    let args = wait_for_file(&root.path().join("args.txt")).await;
    let args: Vec<&str> = args.lines().collect();
    assert_eq!(
        args,
        vec![
            format!(
                "-Dtrustedanalytics.scoring-engine.archive-mar={}",
                model.display()
            )
            .as_str(),
            "-Dtrustedanalytics.scoring.host=127.0.0.1",
            "-Dtrustedanalytics.scoring.port=9155",
        ]
    );

    let cwd = wait_for_file(&root.path().join("cwd.txt")).await;
    assert_eq!(
        Path::new(cwd.trim()).canonicalize().unwrap(),
        root.path().canonicalize().unwrap()
    );

    handle.stop().await.unwrap();
}

/// Test: a missing launcher script is a launch error
#[tokio::test]
async fn test_missing_launcher_is_launch_error() {
    let root = tempdir().unwrap();
    let launcher = ServerLauncher::new(
        LaunchConfig::default().with_working_dir(root.path()),
        ReadinessProbe::fixed(Duration::ZERO),
        Duration::ZERO,
    );

    let err = launcher
        .start(None, &ServerEndpoint::default())
        .await
        .unwrap_err();
    match err {
        HarnessError::Launch { program, .. } => {
            assert!(program.ends_with("bin/scoring-server.sh"), "{program}")
        }
        other => panic!("unexpected error: {other}"),
    }
}
