//! Lifecycle behaviour exercised against scripted stand-ins for the MySQL
//! programs, so these run without a MySQL installation.

#![cfg(unix)]

use std::{collections::BTreeSet, env, fs, path::PathBuf, thread};

use mysqltest::{
    HarnessConfig,
    HarnessError,
    MySqlServer,
    Readiness,
    ReadinessError,
    State,
    basedir,
};
use rstest::rstest;
use test_util::{
    Panic,
    fake::{FakeMysql, InitBehaviour, ServerBehaviour, process_alive},
    fixtures::fake_mysql,
    new_started_server_with,
};

fn fake(init: InitBehaviour, server: ServerBehaviour) -> FakeMysql {
    FakeMysql::new(&init, &server).expect("fake programs should be written")
}

/// Config whose data directories carry a prefix unique to the test, so
/// leftovers can be looked for afterwards.
fn isolated(config: HarnessConfig, tag: &str) -> HarnessConfig {
    HarnessConfig {
        data_dir_prefix: format!("mysqltest-{tag}-{}-", std::process::id()),
        ..config
    }
}

fn leftover_dirs(config: &HarnessConfig) -> Vec<PathBuf> {
    fs::read_dir(env::temp_dir())
        .expect("temp dir should be listable")
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with(&config.data_dir_prefix)
        })
        .map(|entry| entry.path())
        .collect()
}

#[rstest]
fn start_waits_for_the_readiness_marker(fake_mysql: FakeMysql) {
    let server = MySqlServer::launch(fake_mysql.config()).expect("fake server should start");
    assert_eq!(server.state(), State::Ready);
    let pid = server.pid().expect("running server has a pid");
    assert!(process_alive(pid));
    assert!(
        server
            .recent_output()
            .iter()
            .any(|line| line.contains("ready for connections"))
    );
}

#[rstest]
fn both_programs_receive_the_rendered_defaults_file(fake_mysql: FakeMysql) {
    let server = MySqlServer::launch(fake_mysql.config()).expect("fake server should start");
    let expected = format!("--defaults-file={}", server.defaults_file().display());
    assert_eq!(fake_mysql.init_invocations(), vec![expected.clone()]);
    assert_eq!(fake_mysql.server_invocations(), vec![expected]);
    let cnf = fs::read_to_string(server.defaults_file()).expect("my.cnf should exist");
    assert!(cnf.contains(&format!("= {}", server.port())));
    assert!(cnf.contains(&server.socket().display().to_string()));
}

#[rstest]
fn configured_basedir_is_forwarded(fake_mysql: FakeMysql) {
    let config = HarnessConfig {
        basedir: Some(PathBuf::from("/opt/mysql")),
        ..fake_mysql.config()
    };
    let _server = MySqlServer::launch(config).expect("fake server should start");
    let invocations = fake_mysql.server_invocations();
    let line = invocations.first().expect("server should have been started");
    assert!(line.ends_with("--basedir /opt/mysql"), "{line}");
}

#[rstest]
fn discovered_basedir_is_forwarded(fake_mysql: FakeMysql) {
    assert_eq!(
        basedir::discover(&fake_mysql.server_binary()),
        Ok(fake_mysql.basedir().to_path_buf())
    );
    // The only test in this binary that consults the process-wide cache.
    let config = HarnessConfig {
        discover_basedir: true,
        ..fake_mysql.config()
    };
    let _server = MySqlServer::launch(config).expect("fake server should start");
    let expected = format!("--basedir {}", fake_mysql.basedir().display());
    for line in fake_mysql
        .init_invocations()
        .iter()
        .chain(&fake_mysql.server_invocations())
    {
        assert!(line.ends_with(&expected), "{line}");
    }
}

#[rstest]
fn stop_kills_the_process_and_removes_the_directory(fake_mysql: FakeMysql) {
    let mut server = MySqlServer::launch(fake_mysql.config()).expect("fake server should start");
    let pid = server.pid().expect("running server has a pid");
    let dir = server.data_dir().to_path_buf();
    server.stop();
    assert_eq!(server.state(), State::Stopped);
    assert_eq!(server.pid(), None);
    assert!(!process_alive(pid));
    assert!(!dir.exists());
}

#[rstest]
fn stopping_twice_is_harmless(fake_mysql: FakeMysql) {
    let mut server = MySqlServer::launch(fake_mysql.config()).expect("fake server should start");
    server.stop();
    server.stop();
    assert_eq!(server.state(), State::Stopped);
}

#[rstest]
fn dropping_tears_down(fake_mysql: FakeMysql) {
    let server = MySqlServer::launch(fake_mysql.config()).expect("fake server should start");
    let pid = server.pid().expect("running server has a pid");
    let dir = server.data_dir().to_path_buf();
    drop(server);
    assert!(!process_alive(pid));
    assert!(!dir.exists());
}

#[rstest]
fn a_running_server_cannot_be_started_again(fake_mysql: FakeMysql) {
    let mut server = MySqlServer::new(fake_mysql.config()).expect("instance should provision");
    assert_eq!(server.state(), State::Unstarted);
    server.start().expect("fake server should start");
    let err = server.start().expect_err("second start should be refused");
    assert!(matches!(
        err,
        HarnessError::InvalidState {
            state: State::Ready,
            ..
        }
    ));
    assert_eq!(server.state(), State::Ready);
}

#[rstest]
fn initialization_failure_is_reported_with_output() {
    let fake = fake(
        InitBehaviour::Fail {
            code: 2,
            message: "could not create system tables".to_owned(),
        },
        ServerBehaviour::Ready,
    );
    let config = isolated(fake.config(), "initfail");
    let err = MySqlServer::launch(config.clone()).expect_err("init failure should abort");
    match err {
        HarnessError::Initialization { status, output, .. } => {
            assert_eq!(status.code(), Some(2));
            assert!(output.contains("could not create system tables"), "{output}");
        }
        other => panic!("expected an initialization error, got {other}"),
    }
    assert!(fake.server_invocations().is_empty(), "server must not start");
    assert!(leftover_dirs(&config).is_empty());
}

#[rstest]
fn missing_server_program_is_a_start_error(fake_mysql: FakeMysql) {
    let config = HarnessConfig {
        server_binary: PathBuf::from("/nonexistent/mysqld"),
        ..fake_mysql.config()
    };
    let err = MySqlServer::launch(config).expect_err("missing server should fail");
    assert!(matches!(err, HarnessError::Start { .. }), "{err}");
}

#[rstest]
fn missing_init_program_is_a_spawn_error(fake_mysql: FakeMysql) {
    let config = HarnessConfig {
        init_binary: PathBuf::from("/nonexistent/mysql_install_db"),
        ..fake_mysql.config()
    };
    let err = MySqlServer::launch(config).expect_err("missing init should fail");
    assert!(matches!(err, HarnessError::Spawn { .. }), "{err}");
}

#[rstest]
fn crash_before_ready_reports_the_last_lines() {
    let fake = fake(InitBehaviour::Succeed, ServerBehaviour::Crash);
    let config = isolated(fake.config(), "crash");
    let err = MySqlServer::launch(config.clone()).expect_err("crash should abort startup");
    match err {
        HarnessError::Readiness(ReadinessError::StreamClosed { tail }) => {
            assert!(tail.iter().any(|line| line.contains("Aborting")), "{tail:?}");
        }
        other => panic!("expected a closed stream, got {other}"),
    }
    assert!(leftover_dirs(&config).is_empty());
}

#[rstest]
fn silent_server_times_out_when_bounded() {
    let fake = fake(InitBehaviour::Succeed, ServerBehaviour::Silent);
    let config = isolated(
        HarnessConfig {
            startup_timeout_ms: Some(200),
            ..fake.config()
        },
        "silent",
    );
    let err = MySqlServer::launch(config.clone()).expect_err("silent server should time out");
    assert!(
        matches!(err, HarnessError::Readiness(ReadinessError::TimedOut { .. })),
        "{err}"
    );
    assert!(leftover_dirs(&config).is_empty());
}

#[rstest]
fn chatty_startup_does_not_stall_the_server() {
    // Far more than a pipe buffer holds before the marker appears.
    let fake = fake(
        InitBehaviour::Succeed,
        ServerBehaviour::ReadyAfterNoise { lines: 5_000 },
    );
    let server = MySqlServer::launch(fake.config()).expect("noisy server should start");
    assert_eq!(server.state(), State::Ready);
}

#[rstest]
fn connect_strategy_notices_an_exited_server() {
    let fake = fake(InitBehaviour::Succeed, ServerBehaviour::Crash);
    let config = HarnessConfig {
        readiness: Readiness::Connect,
        ..fake.config()
    };
    let err = MySqlServer::launch(config).expect_err("crash should abort startup");
    assert!(
        matches!(err, HarnessError::Readiness(ReadinessError::Exited { .. })),
        "{err}"
    );
}

#[rstest]
fn connect_strategy_honours_the_startup_bound() {
    let fake = fake(InitBehaviour::Succeed, ServerBehaviour::Silent);
    let config = HarnessConfig {
        readiness: Readiness::Connect,
        startup_timeout_ms: Some(200),
        ..fake.config()
    };
    let err = MySqlServer::launch(config).expect_err("nothing ever listens");
    assert!(
        matches!(err, HarnessError::Readiness(ReadinessError::TimedOut { .. })),
        "{err}"
    );
}

#[rstest]
fn concurrent_instances_never_share_ports_or_directories(fake_mysql: FakeMysql) {
    let config = fake_mysql.config();
    let servers: Vec<MySqlServer> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let config = config.clone();
                scope.spawn(move || MySqlServer::launch(config))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .expect("launch thread should not panic")
                    .expect("fake server should start")
            })
            .collect()
    });
    let ports: BTreeSet<u16> = servers.iter().map(MySqlServer::port).collect();
    let dirs: BTreeSet<PathBuf> = servers.iter().map(|s| s.data_dir().to_path_buf()).collect();
    assert_eq!(ports.len(), servers.len());
    assert_eq!(dirs.len(), servers.len());
}

#[rstest]
fn glue_layer_returns_a_ready_server(fake_mysql: FakeMysql) {
    let mut server = new_started_server_with(&Panic, fake_mysql.config());
    assert_eq!(server.state(), State::Ready);
    assert_eq!(
        server.dsn("metadb?prefer_socket=false"),
        format!("root@tcp(127.0.0.1:{})/metadb?prefer_socket=false", server.port())
    );
    server.stop();
}

#[rstest]
#[should_panic(expected = "could not create system tables")]
fn glue_layer_aborts_on_failure() {
    let fake = fake(
        InitBehaviour::Fail {
            code: 1,
            message: "could not create system tables".to_owned(),
        },
        ServerBehaviour::Ready,
    );
    let _server = new_started_server_with(&Panic, fake.config());
}
