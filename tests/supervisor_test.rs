//! 进程监管集成测试
//!
//! 使用 shell 脚本模拟各服务的可执行文件

#![cfg(unix)]

use stack_supervisor::catalog::ServiceId;
use stack_supervisor::config::Config;
use stack_supervisor::error::SupervisorError;
use stack_supervisor::notification::{BroadcastSink, ProcessErrorKind, SupervisorNotification};
use stack_supervisor::pool::{StaticPoolConfigSource, UpstreamConfig};
use stack_supervisor::process::ServiceState;
use stack_supervisor::supervisor::Supervisor;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

fn write_script(path: &Path, body: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.paths.root = Some(root.to_path_buf());
    config.supervisor.settle_delay_ms = 100;
    config.supervisor.stop_timeout_ms = 2000;
    config
}

fn memcached_path(root: &Path) -> PathBuf {
    root.join("bin").join("memcached").join("memcached")
}

/// 长时间运行的 memcached，启动时记录自身 PID
fn install_memcached(root: &Path) {
    write_script(
        &memcached_path(root),
        r#"echo $$ > "$(dirname "$0")/memcached.pid"
exec sleep 30"#,
    );
}

/// pg_ctl：start 写入 postmaster.pid 后退出，stop 删除该文件
fn install_pg_ctl(root: &Path) -> PathBuf {
    let dir = root.join("bin").join("pgsql");
    write_script(
        &dir.join("bin").join("pg_ctl"),
        r#"case "$1" in
  stop) rm -f "$3/postmaster.pid" ;;
  *) [ "$5" = start ] && echo 4242 > "$2/postmaster.pid" ;;
esac
exit 0"#,
    );
    let data = dir.join("data");
    std::fs::create_dir_all(&data).unwrap();
    data
}

/// pg_ctl：start 在启动器退出后才写入 postmaster.pid
fn install_slow_pg_ctl(root: &Path) -> PathBuf {
    let dir = root.join("bin").join("pgsql");
    write_script(
        &dir.join("bin").join("pg_ctl"),
        r#"case "$1" in
  stop) rm -f "$3/postmaster.pid" ;;
  *) [ "$5" = start ] && (sleep 0.5; echo 4242 > "$2/postmaster.pid") & ;;
esac
exit 0"#,
    );
    let data = dir.join("data");
    std::fs::create_dir_all(&data).unwrap();
    data
}

/// nginx：`-s stop` 终止前台实例，`-s reload` 直接成功
fn install_nginx(root: &Path) {
    write_script(
        &root.join("bin").join("nginx").join("nginx"),
        r#"dir="$(dirname "$0")"
case "$*" in
  *"-s stop"*) kill "$(cat "$dir/nginx.pid")" ; exit 0 ;;
  *"-s reload"*) exit 0 ;;
esac
echo $$ > "$dir/nginx.pid"
exec sleep 30"#,
    );
}

/// php-cgi：记录监听地址和子进程数
fn install_php_cgi(root: &Path) -> PathBuf {
    let dir = root.join("bin").join("php");
    write_script(
        &dir.join("php-cgi"),
        r#"echo "$2 $PHP_FCGI_CHILDREN" >> "$(dirname "$0")/spawned.txt"
exec sleep 30"#,
    );
    dir.join("spawned.txt")
}

/// 等待 php-cgi 记录的启动行数达到预期
async fn spawned_lines(spawned: &Path, expected: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for _ in 0..50 {
        if let Ok(content) = std::fs::read_to_string(spawned) {
            lines = content.lines().map(str::to_string).collect::<Vec<_>>();
            if lines.len() == expected {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    lines.sort();
    lines
}

fn install_php(root: &Path, pools: &str) {
    install_php_cgi(root);
    let upstreams = root
        .join("bin")
        .join("stack-supervisor")
        .join("nginx-upstreams.json");
    std::fs::create_dir_all(upstreams.parent().unwrap()).unwrap();
    std::fs::write(upstreams, pools).unwrap();
}

fn subscribe(supervisor: &Supervisor) -> broadcast::Receiver<SupervisorNotification> {
    let sink = Arc::new(BroadcastSink::new(128));
    supervisor.subscribe(sink.clone());
    supervisor.subscribe_errors(sink.clone());
    sink.subscribe()
}

fn drain(rx: &mut broadcast::Receiver<SupervisorNotification>) -> Vec<SupervisorNotification> {
    let mut received = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        received.push(notification);
    }
    received
}

fn states_of(notifications: &[SupervisorNotification], id: ServiceId) -> Vec<ServiceState> {
    notifications
        .iter()
        .filter_map(|n| match n {
            SupervisorNotification::ServiceStatus { service, state, .. } if *service == id => {
                Some(*state)
            }
            _ => None,
        })
        .collect()
}

fn tooling_flips(notifications: &[SupervisorNotification]) -> Vec<bool> {
    notifications
        .iter()
        .filter_map(|n| match n {
            SupervisorNotification::ToolingChanged { enabled, .. } => Some(*enabled),
            _ => None,
        })
        .collect()
}

fn process_alive(pid: i32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

#[tokio::test]
async fn test_installed_services_follow_executables() {
    let temp = TempDir::new().unwrap();
    let supervisor = Supervisor::from_config(&test_config(temp.path())).unwrap();

    assert_eq!(
        supervisor.installed_services(),
        vec![ServiceId::Nginx, ServiceId::Php, ServiceId::MariaDb]
    );

    install_memcached(temp.path());
    install_pg_ctl(temp.path());

    assert_eq!(
        supervisor.installed_services(),
        vec![
            ServiceId::Nginx,
            ServiceId::Php,
            ServiceId::MariaDb,
            ServiceId::Memcached,
            ServiceId::PostgreSql,
        ]
    );
}

#[tokio::test]
async fn test_restart_emits_full_state_sequence() {
    let temp = TempDir::new().unwrap();
    install_memcached(temp.path());
    let mut supervisor = Supervisor::from_config(&test_config(temp.path())).unwrap();
    let mut rx = subscribe(&supervisor);

    supervisor.start(ServiceId::Memcached).await.unwrap();
    assert_eq!(
        supervisor.state_of(ServiceId::Memcached).unwrap(),
        ServiceState::Running
    );
    let first_pid = supervisor
        .controller(ServiceId::Memcached)
        .unwrap()
        .pids()[0];

    supervisor.restart(ServiceId::Memcached).await.unwrap();
    supervisor.process_pending_events().await;

    let notifications = drain(&mut rx);
    assert_eq!(
        states_of(&notifications, ServiceId::Memcached),
        vec![
            ServiceState::Starting,
            ServiceState::Running,
            ServiceState::Stopping,
            ServiceState::Stopped,
            ServiceState::Starting,
            ServiceState::Running,
        ]
    );
    // 旧进程的退出不会被当作崩溃
    assert!(!notifications
        .iter()
        .any(|n| matches!(n, SupervisorNotification::ProcessError { .. })));

    let pids = supervisor.controller(ServiceId::Memcached).unwrap().pids();
    assert_eq!(pids.len(), 1);
    assert_ne!(pids[0], first_pid);

    supervisor.stop(ServiceId::Memcached).await.unwrap();
    assert_eq!(
        supervisor.state_of(ServiceId::Memcached).unwrap(),
        ServiceState::Stopped
    );
}

#[tokio::test]
async fn test_second_start_reports_already_running() {
    let temp = TempDir::new().unwrap();
    install_memcached(temp.path());
    let mut supervisor = Supervisor::from_config(&test_config(temp.path())).unwrap();
    let mut rx = subscribe(&supervisor);

    supervisor.start(ServiceId::Memcached).await.unwrap();
    let err = supervisor.start(ServiceId::Memcached).await.unwrap_err();
    assert!(matches!(err, SupervisorError::AlreadyRunning { .. }));

    let notifications = drain(&mut rx);
    assert!(notifications.iter().any(|n| matches!(
        n,
        SupervisorNotification::Notice {
            service: ServiceId::Memcached,
            ..
        }
    )));

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_unexpected_exit_is_reported_as_crash() {
    let temp = TempDir::new().unwrap();
    write_script(&memcached_path(temp.path()), "sleep 0.2\nexit 3");
    let mut supervisor = Supervisor::from_config(&test_config(temp.path())).unwrap();
    let mut rx = subscribe(&supervisor);

    supervisor.start(ServiceId::Memcached).await.unwrap();
    assert!(supervisor.next_event(Duration::from_secs(5)).await);

    assert_eq!(
        supervisor.state_of(ServiceId::Memcached).unwrap(),
        ServiceState::Crashed
    );

    let notifications = drain(&mut rx);
    assert!(notifications.iter().any(|n| matches!(
        n,
        SupervisorNotification::ProcessError {
            service: ServiceId::Memcached,
            kind: ProcessErrorKind::Crashed,
            ..
        }
    )));

    // 崩溃后可以重新启动
    write_script(&memcached_path(temp.path()), "exec sleep 30");
    supervisor.start(ServiceId::Memcached).await.unwrap();
    assert_eq!(
        supervisor.state_of(ServiceId::Memcached).unwrap(),
        ServiceState::Running
    );
    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_artifact_service_lifecycle() {
    let temp = TempDir::new().unwrap();
    let data = install_pg_ctl(temp.path());
    let pid_file = data.join("postmaster.pid");
    let mut supervisor = Supervisor::from_config(&test_config(temp.path())).unwrap();

    supervisor.start(ServiceId::PostgreSql).await.unwrap();
    assert_eq!(
        supervisor.controller(ServiceId::PostgreSql).unwrap().state(),
        ServiceState::Starting
    );

    // 启动器退出后等待确认延迟再检查 PID 文件
    assert!(supervisor.next_event(Duration::from_secs(5)).await);
    assert!(pid_file.exists());
    assert_eq!(
        supervisor.state_of(ServiceId::PostgreSql).unwrap(),
        ServiceState::Running
    );

    supervisor.stop(ServiceId::PostgreSql).await.unwrap();
    assert!(!pid_file.exists());
    assert_eq!(
        supervisor.state_of(ServiceId::PostgreSql).unwrap(),
        ServiceState::Stopped
    );
}

/// 启动器退出后等待确认延迟，返回此时的状态（不做额外对账）
async fn state_after_launcher_exit(settle_delay_ms: u64) -> (ServiceState, bool) {
    let temp = TempDir::new().unwrap();
    let data = install_slow_pg_ctl(temp.path());
    let mut config = test_config(temp.path());
    config.supervisor.settle_delay_ms = settle_delay_ms;
    let mut supervisor = Supervisor::from_config(&config).unwrap();

    supervisor.start(ServiceId::PostgreSql).await.unwrap();
    assert!(supervisor.next_event(Duration::from_secs(5)).await);

    let state = supervisor.controller(ServiceId::PostgreSql).unwrap().state();
    let artifact_present = data.join("postmaster.pid").exists();
    supervisor.stop_all().await;
    (state, artifact_present)
}

#[tokio::test]
async fn test_settle_delay_covers_late_artifact() {
    let (state, artifact_present) = state_after_launcher_exit(1250).await;
    assert_eq!(state, ServiceState::Running);
    assert!(artifact_present);
}

#[tokio::test]
async fn test_late_artifact_without_settle_delay_is_stopped() {
    let (state, artifact_present) = state_after_launcher_exit(0).await;
    assert_eq!(state, ServiceState::Stopped);
    assert!(!artifact_present);
}

#[tokio::test]
async fn test_artifact_service_adopts_running_instance() {
    let temp = TempDir::new().unwrap();
    let data = install_pg_ctl(temp.path());
    std::fs::write(data.join("postmaster.pid"), "4242\n").unwrap();
    let mut supervisor = Supervisor::from_config(&test_config(temp.path())).unwrap();

    assert_eq!(
        supervisor.state_of(ServiceId::PostgreSql).unwrap(),
        ServiceState::Running
    );
    let err = supervisor.start(ServiceId::PostgreSql).await.unwrap_err();
    assert!(matches!(err, SupervisorError::AlreadyRunning { .. }));

    // PID 文件被外部删除后视为已停止
    std::fs::remove_file(data.join("postmaster.pid")).unwrap();
    assert_eq!(
        supervisor.state_of(ServiceId::PostgreSql).unwrap(),
        ServiceState::Stopped
    );
}

#[tokio::test]
async fn test_php_pools_and_tooling_flag() {
    let temp = TempDir::new().unwrap();
    install_nginx(temp.path());
    install_php(
        temp.path(),
        r#"{
  "pools": {
    "app": { "servers": [
      { "address": "127.0.0.1", "port": 9001, "workerCount": 4 },
      { "address": "203.0.113.5", "port": 9002, "workerCount": 8 }
    ] },
    "api": { "servers": { "0": { "address": "localhost", "port": "9003", "phpchildren": "2" } } }
  }
}"#,
    );
    let mut config = test_config(temp.path());
    config.php.native_pooling = Some(true);
    let mut supervisor = Supervisor::from_config(&config).unwrap();
    let mut rx = subscribe(&supervisor);

    supervisor.start(ServiceId::Nginx).await.unwrap();
    assert!(!supervisor.hub().tooling_enabled());

    supervisor.start(ServiceId::Php).await.unwrap();
    assert!(supervisor.hub().tooling_enabled());
    assert_eq!(supervisor.controller(ServiceId::Php).unwrap().pids().len(), 2);

    let spawned = temp.path().join("bin").join("php").join("spawned.txt");
    assert_eq!(
        spawned_lines(&spawned, 2).await,
        vec!["127.0.0.1:9001 4", "127.0.0.1:9003 2"]
    );

    supervisor.reload(ServiceId::Nginx).await.unwrap();
    assert_eq!(
        supervisor.state_of(ServiceId::Nginx).unwrap(),
        ServiceState::Running
    );

    supervisor.stop(ServiceId::Nginx).await.unwrap();
    assert!(!supervisor.hub().tooling_enabled());
    supervisor.stop_all().await;
    supervisor.process_pending_events().await;

    let notifications = drain(&mut rx);
    assert_eq!(tooling_flips(&notifications), vec![true, false]);
    assert_eq!(
        states_of(&notifications, ServiceId::Php).last(),
        Some(&ServiceState::Stopped)
    );
    assert!(!notifications
        .iter()
        .any(|n| matches!(n, SupervisorNotification::ProcessError { .. })));
}

#[tokio::test]
async fn test_php_pools_from_injected_source() {
    let temp = TempDir::new().unwrap();
    let spawned = install_php_cgi(temp.path());
    let mut config = test_config(temp.path());
    config.php.native_pooling = Some(true);
    let mut supervisor = Supervisor::from_config(&config).unwrap();

    // 磁盘上没有上游配置文件，进程池完全来自注入的配置
    let upstreams = UpstreamConfig::from_json(
        r#"{ "pools": { "app": { "servers": [
            { "address": "127.0.0.1", "port": 9005, "workerCount": 3 },
            { "address": "198.51.100.7", "port": 9006, "workerCount": 5 }
        ] } } }"#,
    )
    .unwrap();
    supervisor.set_pool_source(
        ServiceId::Php,
        Arc::new(StaticPoolConfigSource::new(upstreams)),
    );

    supervisor.start(ServiceId::Php).await.unwrap();
    assert_eq!(
        supervisor.state_of(ServiceId::Php).unwrap(),
        ServiceState::Running
    );
    assert_eq!(supervisor.controller(ServiceId::Php).unwrap().pids().len(), 1);
    assert_eq!(spawned_lines(&spawned, 1).await, vec!["127.0.0.1:9005 3"]);

    supervisor.stop_all().await;
    assert_eq!(
        supervisor.state_of(ServiceId::Php).unwrap(),
        ServiceState::Stopped
    );
}

#[tokio::test]
async fn test_handle_drives_background_supervisor() {
    let temp = TempDir::new().unwrap();
    install_memcached(temp.path());
    let supervisor = Supervisor::from_config(&test_config(temp.path())).unwrap();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let (handle, task) = supervisor.spawn(shutdown_rx);

    handle.start(ServiceId::Memcached).await.unwrap();
    assert_eq!(
        handle.state(ServiceId::Memcached).await.unwrap(),
        ServiceState::Running
    );

    let states = handle.states().await.unwrap();
    assert_eq!(
        states.keys().copied().collect::<Vec<_>>(),
        vec![
            ServiceId::Nginx,
            ServiceId::Php,
            ServiceId::MariaDb,
            ServiceId::Memcached,
        ]
    );
    assert_eq!(states[&ServiceId::Nginx], ServiceState::Stopped);
    assert!(!states.contains_key(&ServiceId::Redis));

    // 停止未运行的服务不报错
    handle.stop(ServiceId::Redis).await.unwrap();

    let pid_file = memcached_path(temp.path()).with_file_name("memcached.pid");
    let mut pid = None;
    for _ in 0..50 {
        if let Some(value) = std::fs::read_to_string(&pid_file)
            .ok()
            .and_then(|s| s.trim().parse::<i32>().ok())
        {
            pid = Some(value);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let pid = pid.unwrap();
    assert!(process_alive(pid));

    // 关闭信号会停止所有服务
    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .unwrap()
        .unwrap();
    assert!(!process_alive(pid));

    let err = handle.state(ServiceId::Memcached).await.unwrap_err();
    assert_eq!(err, SupervisorError::Unavailable);
}
