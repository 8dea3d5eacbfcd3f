//! Behavioural tests for the driver lifecycle against a scripted cloud.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use camino::Utf8PathBuf;
use hetzner_machine::credential::KeyPairGenerator;
use hetzner_machine::hcloud::{PowerAction, ServerStatus};
use hetzner_machine::test_support::{
    CloudCall, ScriptedCloud, ScriptedKeygen, failed_action, server,
};
use hetzner_machine::{
    ConfigError, Driver, DriverError, DriverState, HetznerConfig, HetznerDriver, MachineState,
    ProviderError, WaitContext, WaitError,
};
use rstest::{fixture, rstest};
use tempfile::TempDir;

const ADDRESS: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 7);

type TestDriver = HetznerDriver<ScriptedCloud, ScriptedKeygen>;

struct Harness {
    cloud: ScriptedCloud,
    keygen: ScriptedKeygen,
    key_path: Utf8PathBuf,
    _tmp: TempDir,
}

impl Harness {
    fn driver(&self, config: HetznerConfig) -> TestDriver {
        HetznerDriver::new(
            config,
            "alpha",
            self.key_path.clone(),
            self.cloud.clone(),
            self.keygen.clone(),
        )
        .unwrap_or_else(|err| panic!("driver: {err}"))
        .with_wait_context(WaitContext::new(Duration::from_millis(1)))
    }

    fn default_driver(&self) -> TestDriver {
        self.driver(HetznerConfig::with_access_token("token"))
    }

    fn push_running(&self) {
        self.cloud
            .push_server(server(4711, ServerStatus::Running, Some(ADDRESS)));
    }

    fn created_driver(&self) -> TestDriver {
        self.default_driver().with_driver_state(DriverState {
            server_id: Some(4711),
            ssh_key_id: Some(1),
            ip_address: Some(ADDRESS.to_string()),
            ..DriverState::new("alpha")
        })
    }
}

#[fixture]
fn harness() -> Harness {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp dir should be utf8: {}", path.display()));
    Harness {
        cloud: ScriptedCloud::new(),
        keygen: ScriptedKeygen::new(),
        key_path: root.join("machines").join("alpha").join("id_rsa"),
        _tmp: tmp,
    }
}

#[rstest]
fn empty_token_fails_before_any_provider_call(harness: Harness) {
    let result = HetznerDriver::new(
        HetznerConfig::with_access_token(""),
        "alpha",
        harness.key_path.clone(),
        harness.cloud.clone(),
        harness.keygen.clone(),
    );

    let Err(DriverError::Config(ConfigError::MissingField(message))) = result else {
        panic!("expected a missing field error");
    };
    assert!(message.contains("HETZNER_ACCESS_TOKEN"), "{message}");
    assert!(harness.cloud.calls().is_empty());
    assert_eq!(harness.keygen.generated(), 0);
}

#[rstest]
#[tokio::test]
async fn create_polls_until_running_and_takes_address_from_that_response(harness: Harness) {
    let earlier = Some(Ipv4Addr::new(198, 51, 100, 1));
    let cloud = &harness.cloud;
    cloud.push_server(server(4711, ServerStatus::Initializing, earlier));
    cloud.push_server(server(4711, ServerStatus::Initializing, earlier));
    cloud.push_server(server(4711, ServerStatus::Running, Some(ADDRESS)));
    let mut driver = harness.default_driver();

    driver
        .create()
        .await
        .unwrap_or_else(|err| panic!("create: {err}"));

    assert_eq!(cloud.server_polls(), 3);
    let ip = driver
        .ip()
        .await
        .unwrap_or_else(|err| panic!("ip: {err}"));
    assert_eq!(ip, IpAddr::V4(ADDRESS));
    assert_eq!(driver.driver_state().server_id, Some(4711));
    assert_eq!(driver.driver_state().ssh_key_id, Some(1));
    assert_eq!(harness.keygen.generated(), 1);
}

#[rstest]
#[tokio::test]
async fn create_registers_key_before_resolving_resources(harness: Harness) {
    harness
        .cloud
        .push_server(server(4711, ServerStatus::Running, Some(ADDRESS)));
    let mut driver = harness.default_driver();

    driver
        .create()
        .await
        .unwrap_or_else(|err| panic!("create: {err}"));

    let calls = harness.cloud.calls();
    assert!(matches!(calls.first(), Some(CloudCall::CreateSshKey(_))));
    assert_eq!(calls.get(1), Some(&CloudCall::SshKey(1)));
    assert_eq!(calls.get(2), Some(&CloudCall::Image(String::from("debian-9"))));
    assert_eq!(calls.get(3), Some(&CloudCall::Location(String::from("fsn1"))));
    assert_eq!(calls.get(4), Some(&CloudCall::ServerType(String::from("cx11"))));
    assert!(matches!(calls.get(5), Some(CloudCall::CreateServer(_))));
}

#[rstest]
#[tokio::test]
async fn failed_start_action_surfaces_provider_detail(harness: Harness) {
    harness.push_running();
    let driver = harness.created_driver();
    harness
        .cloud
        .push_action(failed_action(100, "server_error", "host is on fire"));

    let err = driver.start().await.expect_err("start fails");

    let DriverError::Wait(WaitError::ActionFailed { code, message, .. }) = err else {
        panic!("expected ActionFailed, got {err:?}");
    };
    assert_eq!(code, "server_error");
    assert_eq!(message, "host is on fire");
}

#[rstest]
#[tokio::test]
async fn remove_submits_one_delete_and_does_not_poll(harness: Harness) {
    harness.push_running();
    let mut driver = harness.created_driver();

    driver
        .remove()
        .await
        .unwrap_or_else(|err| panic!("remove: {err}"));

    let cloud = &harness.cloud;
    assert_eq!(
        cloud.count(|call| matches!(call, CloudCall::DeleteServer(4711))),
        1
    );
    assert_eq!(cloud.action_polls(), 0);
    assert_eq!(
        cloud.count(|call| matches!(call, CloudCall::DeleteSshKey(_))),
        0
    );
    assert_eq!(driver.driver_state().server_id, None);
    assert_eq!(driver.driver_state().ip_address, None);
}

#[rstest]
#[case::start(PowerAction::PowerOn)]
#[case::stop(PowerAction::PowerOff)]
#[case::restart(PowerAction::Reboot)]
#[case::kill(PowerAction::Shutdown)]
#[tokio::test]
async fn lifecycle_calls_submit_the_matching_power_action(
    harness: Harness,
    #[case] expected: PowerAction,
) {
    harness.push_running();
    let driver = harness.created_driver();

    let result = match expected {
        PowerAction::PowerOn => driver.start().await,
        PowerAction::PowerOff => driver.stop().await,
        PowerAction::Reboot => driver.restart().await,
        PowerAction::Shutdown => driver.kill().await,
    };

    result.unwrap_or_else(|err| panic!("{expected:?}: {err}"));
    assert_eq!(
        harness.cloud.calls(),
        vec![
            CloudCall::Server(4711),
            CloudCall::Power(4711, expected),
            CloudCall::Action(100),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn rejected_power_submission_is_not_waited_on(harness: Harness) {
    harness.push_running();
    harness.cloud.set_power_response(Err(ProviderError::Api {
        status: 409,
        code: String::from("locked"),
        message: String::from("server is locked"),
    }));
    let driver = harness.created_driver();

    let err = driver.stop().await.expect_err("power off rejected");

    assert!(matches!(
        err,
        DriverError::Provider(ProviderError::Api { status: 409, .. })
    ));
    assert_eq!(harness.cloud.action_polls(), 0);
}

#[rstest]
#[tokio::test]
async fn failed_server_lookup_stops_a_transition_before_submission(harness: Harness) {
    harness.cloud.push_server_error(ProviderError::Transport {
        message: String::from("connection reset"),
    });
    let driver = harness.created_driver();

    let err = driver.restart().await.expect_err("lookup fails");

    assert!(matches!(err, DriverError::Provider(ProviderError::Transport { .. })));
    assert_eq!(harness.cloud.calls(), vec![CloudCall::Server(4711)]);
}

#[rstest]
#[tokio::test]
async fn failed_server_lookup_keeps_the_server_id_on_remove(harness: Harness) {
    harness.cloud.push_server_error(ProviderError::Api {
        status: 503,
        code: String::from("unavailable"),
        message: String::from("maintenance"),
    });
    let mut driver = harness.created_driver();

    let err = driver.remove().await.expect_err("lookup fails");

    assert!(matches!(
        err,
        DriverError::Provider(ProviderError::Api { status: 503, .. })
    ));
    assert_eq!(
        harness
            .cloud
            .count(|call| matches!(call, CloudCall::DeleteServer(_))),
        0
    );
    assert_eq!(driver.driver_state().server_id, Some(4711));
}

#[rstest]
#[tokio::test]
async fn failed_state_query_reports_error_state_and_cause(harness: Harness) {
    harness.cloud.push_server_error(ProviderError::Transport {
        message: String::from("connection reset"),
    });
    let driver = harness.created_driver();

    let report = driver.state_or_error().await;
    assert_eq!(report.state, MachineState::Error);
    assert!(matches!(
        report.error,
        Some(DriverError::Provider(ProviderError::Transport { .. }))
    ));
}

#[rstest]
#[tokio::test]
async fn operations_before_create_fail_without_network_calls(harness: Harness) {
    let mut driver = harness.default_driver();
    let not_created = DriverError::NotCreated {
        machine: String::from("alpha"),
    };

    assert_eq!(driver.state().await, Err(not_created.clone()));
    assert_eq!(driver.ip().await, Err(not_created.clone()));
    assert_eq!(driver.url().await, Err(not_created.clone()));
    assert_eq!(driver.start().await, Err(not_created.clone()));
    assert_eq!(driver.stop().await, Err(not_created.clone()));
    assert_eq!(driver.restart().await, Err(not_created.clone()));
    assert_eq!(driver.kill().await, Err(not_created.clone()));
    assert_eq!(driver.remove().await, Err(not_created));
    assert!(harness.cloud.calls().is_empty());
}

#[rstest]
#[case(ServerStatus::Initializing, MachineState::Starting)]
#[case(ServerStatus::Running, MachineState::Running)]
#[case(ServerStatus::Off, MachineState::Stopped)]
#[case(ServerStatus::Migrating, MachineState::None)]
#[tokio::test]
async fn state_reflects_the_current_server_status(
    harness: Harness,
    #[case] status: ServerStatus,
    #[case] expected: MachineState,
) {
    let driver = harness.created_driver();
    harness.cloud.push_server(server(4711, status, Some(ADDRESS)));

    let state = driver
        .state()
        .await
        .unwrap_or_else(|err| panic!("state: {err}"));
    assert_eq!(state, expected);
}

#[rstest]
#[tokio::test]
async fn ip_and_url_are_stable_across_calls(harness: Harness) {
    let driver = harness.created_driver();

    let first = driver.ip().await.unwrap_or_else(|err| panic!("ip: {err}"));
    let second = driver.ip().await.unwrap_or_else(|err| panic!("ip: {err}"));
    let url = driver.url().await.unwrap_or_else(|err| panic!("url: {err}"));

    assert_eq!(first, second);
    assert_eq!(url, "tcp://203.0.113.7:2376");
}

#[rstest]
#[tokio::test]
async fn failed_create_keeps_key_and_leaves_server_unset_by_default(harness: Harness) {
    harness.cloud.fail_create_server(ProviderError::Api {
        status: 403,
        code: String::from("forbidden"),
        message: String::from("insufficient permissions"),
    });
    let mut driver = harness.default_driver();

    let err = driver.create().await.expect_err("create fails");

    assert!(matches!(err, DriverError::Provider(ProviderError::Api { status: 403, .. })));
    assert_eq!(driver.driver_state().server_id, None);
    assert_eq!(driver.driver_state().ssh_key_id, Some(1));
    assert_eq!(
        harness
            .cloud
            .count(|call| matches!(call, CloudCall::DeleteSshKey(_))),
        0
    );
}

#[rstest]
#[tokio::test]
async fn retried_create_reuses_the_recorded_key(harness: Harness) {
    harness
        .keygen
        .generate(&harness.key_path)
        .unwrap_or_else(|err| panic!("seed key: {err}"));
    harness.push_running();
    let mut driver = harness.default_driver().with_driver_state(DriverState {
        ssh_key_id: Some(1),
        ..DriverState::new("alpha")
    });

    driver
        .create()
        .await
        .unwrap_or_else(|err| panic!("create: {err}"));

    let cloud = &harness.cloud;
    assert_eq!(cloud.count(|call| matches!(call, CloudCall::CreateSshKey(_))), 0);
    assert_eq!(driver.driver_state().ssh_key_id, Some(1));
    assert_eq!(driver.driver_state().server_id, Some(4711));
    assert_eq!(harness.keygen.generated(), 1);
}

#[rstest]
#[tokio::test]
async fn cleanup_policy_deletes_the_registered_key(harness: Harness) {
    harness.cloud.fail_create_server(ProviderError::Transport {
        message: String::from("connection reset"),
    });
    let mut driver = harness.driver(HetznerConfig {
        cleanup_on_failure: true,
        ..HetznerConfig::with_access_token("token")
    });

    let err = driver.create().await.expect_err("create fails");

    assert!(matches!(err, DriverError::Provider(ProviderError::Transport { .. })));
    let cloud = &harness.cloud;
    assert_eq!(cloud.count(|call| matches!(call, CloudCall::DeleteSshKey(1))), 1);
    assert_eq!(cloud.count(|call| matches!(call, CloudCall::DeleteServer(_))), 0);
    assert_eq!(driver.driver_state().ssh_key_id, None);
}

#[rstest]
#[tokio::test]
async fn cleanup_policy_deletes_a_server_that_never_got_an_address(harness: Harness) {
    harness
        .cloud
        .push_server(server(4711, ServerStatus::Running, None));
    let mut driver = harness.driver(HetznerConfig {
        cleanup_on_failure: true,
        ..HetznerConfig::with_access_token("token")
    });

    let err = driver.create().await.expect_err("create fails");

    assert_eq!(err, DriverError::MissingPublicIp { server_id: 4711 });
    let cloud = &harness.cloud;
    assert_eq!(cloud.count(|call| matches!(call, CloudCall::DeleteServer(4711))), 1);
    assert_eq!(cloud.count(|call| matches!(call, CloudCall::DeleteSshKey(1))), 1);
    assert_eq!(driver.driver_state().server_id, None);
}

#[rstest]
#[tokio::test]
async fn cancelled_readiness_wait_reports_cancellation(harness: Harness) {
    harness
        .cloud
        .push_server(server(4711, ServerStatus::Initializing, None));
    let wait = WaitContext::new(Duration::from_millis(1));
    wait.cancellation_token().cancel();
    let mut driver = harness.default_driver().with_wait_context(wait);

    let err = driver.create().await.expect_err("wait cancelled");

    assert!(matches!(err, DriverError::Wait(WaitError::Cancelled { .. })));
    assert_eq!(driver.driver_state().server_id, None);
}
