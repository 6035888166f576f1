//! Unit tests for the deployment lifecycle.

use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};

use super::*;
use crate::remote::RemoteConfig;
use crate::test_support::{CommandInvocation, ScriptedRunner};

const STOP: &str =
    "(sudo systemctl stop ferry.service && sudo systemctl reset-failed ferry.service) || true";

#[derive(Debug)]
struct FixedArtifacts;

impl ArtifactStore for FixedArtifacts {
    fn resolve(&self, destination: &str) -> Result<Utf8PathBuf, DeploymentError> {
        Ok(Utf8PathBuf::from("/tmp/artifacts").join(destination))
    }
}

fn remote_config() -> RemoteConfig {
    RemoteConfig {
        ssh_bin: String::from("ssh"),
        scp_bin: String::from("scp"),
        ssh_user: String::from("ubuntu"),
        connect_timeout_secs: 5,
        known_hosts_file: String::from("/dev/null"),
    }
}

#[fixture]
fn deployment_config() -> DeploymentConfig {
    DeploymentConfig {
        unit_name: String::from("ferry"),
        payload_path: String::from("/home/ubuntu/entry.js"),
        proxy_payload_path: String::from("/home/ubuntu/proxy-entry.js"),
        runtime_bin: String::from("node"),
        liveness_command: String::from("node -v"),
        runtime_source_path: String::from("/usr/bin/node"),
        relayed_runtime_path: String::from("/home/ubuntu/node"),
        relay_key_dir: String::from("/home/ubuntu/.ssh"),
        teardown_timeout_secs: 15,
    }
}

#[fixture]
fn harness(
    deployment_config: DeploymentConfig,
) -> (Deployment<ScriptedRunner, FixedArtifacts>, ScriptedRunner) {
    let runner = ScriptedRunner::new();
    let executor =
        RemoteExecutor::new(remote_config(), runner.clone()).expect("remote config should validate");
    let deployment = Deployment::new(deployment_config, executor, FixedArtifacts)
        .expect("deployment config should validate");
    (deployment, runner)
}

fn direct_request(bundle: &str) -> DeploymentRequest {
    DeploymentRequest::new(Bundle::new(bundle), "10.0.0.5", "out/keys/web")
}

fn proxied_request() -> DeploymentRequest {
    DeploymentRequest::new(Bundle::new("builds/bundle-abc.js"), "10.0.2.7", "out/keys/interior")
        .via(ProxyTarget::new("10.0.1.9", "out/keys/bastion"))
}

fn running_state(fingerprint: &str) -> DeploymentState {
    DeploymentState {
        address: String::from("10.0.0.5"),
        key_path: Utf8PathBuf::from("out/keys/web"),
        payload_fingerprint: fingerprint.to_owned(),
        proxy: None,
    }
}

fn last_args(invocations: &[CommandInvocation]) -> Vec<String> {
    invocations.iter().map(CommandInvocation::last_arg).collect()
}

fn script_direct_create(runner: &ScriptedRunner) {
    runner.push_success();
    runner.push_stdout("v22.11.0\n");
    runner.push_success();
}

fn proxied_state() -> DeploymentState {
    DeploymentState {
        address: String::from("10.0.2.7"),
        key_path: Utf8PathBuf::from("out/keys/interior"),
        payload_fingerprint: String::from("bundle-abc.js"),
        proxy: Some(ProxyTarget::new("10.0.1.9", "out/keys/bastion")),
    }
}

fn relayed_key_removals(invocations: &[CommandInvocation]) -> usize {
    invocations
        .iter()
        .filter(|invocation| invocation.last_arg() == "rm -f /home/ubuntu/.ssh/interior")
        .count()
}

/// Checks a relay session: key onto the proxy, one wrapped command, removal.
fn assert_relayed_session(invocations: &[CommandInvocation], remote_command: &str) {
    let args = last_args(invocations);
    assert_eq!(args.len(), 3, "{args:?}");
    for invocation in invocations {
        assert!(
            invocation.command_string().contains("out/keys/bastion"),
            "every step should connect to the proxy: {}",
            invocation.command_string()
        );
        assert!(
            !invocation.args.iter().any(|arg| arg == "ubuntu@10.0.2.7"),
            "no step may reach the interior host directly: {}",
            invocation.command_string()
        );
    }
    assert_eq!(
        args.first().map(String::as_str),
        Some("ubuntu@10.0.1.9:/home/ubuntu/.ssh/interior")
    );
    let wrapped = args.get(1).expect("wrapped command");
    assert!(wrapped.starts_with("ssh "), "{wrapped}");
    assert!(wrapped.contains("/home/ubuntu/.ssh/interior"), "{wrapped}");
    assert!(wrapped.contains("10.0.2.7"), "{wrapped}");
    assert!(wrapped.contains(remote_command), "{wrapped}");
    assert_eq!(
        args.get(2).map(String::as_str),
        Some("rm -f /home/ubuntu/.ssh/interior")
    );
}

#[rstest]
#[case("builds/bundle-abc.js", "bundle-abc.js")]
#[case("bundle-abc.js", "bundle-abc.js")]
#[case("s3://artifacts/releases/app-42.js", "app-42.js")]
fn fingerprint_is_final_path_component(#[case] destination: &str, #[case] expected: &str) {
    let fingerprint = Bundle::new(destination)
        .fingerprint()
        .expect("handle should have a file name");

    assert_eq!(fingerprint, expected);
}

#[rstest]
#[case("")]
#[case("/")]
fn fingerprint_rejects_handles_without_file_name(#[case] destination: &str) {
    let err = Bundle::new(destination)
        .fingerprint()
        .expect_err("handle should be rejected");

    assert!(matches!(err, DeploymentError::InvalidBundle { .. }));
}

#[rstest]
fn supervisor_commands_target_the_unit(deployment_config: DeploymentConfig) {
    assert_eq!(
        deployment_config.start_command("node"),
        "sudo systemd-run --unit=ferry node /home/ubuntu/entry.js"
    );
    assert_eq!(deployment_config.stop_command(), STOP);
    assert_eq!(
        deployment_config.status_command(),
        "systemctl status ferry.service --no-pager"
    );
}

#[rstest]
fn validate_rejects_blank_unit_name(deployment_config: DeploymentConfig) {
    let cfg = DeploymentConfig {
        unit_name: String::from(" "),
        ..deployment_config
    };

    let err = cfg.validate().expect_err("blank unit should fail");
    assert!(err.to_string().contains("FERRY_DEPLOY_UNIT_NAME"), "{err}");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn direct_create_copies_checks_and_starts(
    harness: (Deployment<ScriptedRunner, FixedArtifacts>, ScriptedRunner),
) {
    let (deployment, runner) = harness;
    script_direct_create(&runner);

    let state = deployment
        .create(&direct_request("builds/bundle-abc.js"))
        .await
        .expect("create should succeed");

    assert_eq!(state, running_state("bundle-abc.js"));
    let invocations = runner.invocations();
    let programs: Vec<&str> = invocations.iter().map(|i| i.program.as_str()).collect();
    assert_eq!(programs, vec!["scp", "ssh", "ssh"]);
    assert_eq!(
        last_args(&invocations),
        vec![
            "ubuntu@10.0.0.5:/home/ubuntu/entry.js",
            "node -v",
            "sudo systemd-run --unit=ferry node /home/ubuntu/entry.js",
        ]
    );
    let copy = invocations.first().expect("copy invocation");
    assert!(
        copy.command_string()
            .contains("/tmp/artifacts/builds/bundle-abc.js"),
        "{}",
        copy.command_string()
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn liveness_is_retried_until_runtime_answers(
    harness: (Deployment<ScriptedRunner, FixedArtifacts>, ScriptedRunner),
) {
    let (deployment, runner) = harness;
    runner.push_success();
    runner.push_failure(127);
    runner.push_failure(255);
    runner.push_stdout("v22.11.0\n");
    runner.push_success();

    deployment
        .deploy(&direct_request("bundle-abc.js"))
        .await
        .expect("create should succeed once runtime answers");

    assert_eq!(runner.invocations().len(), 5);
    assert_eq!(runner.pending_responses(), 0);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn exhausted_copy_budget_surfaces_last_error(
    harness: (Deployment<ScriptedRunner, FixedArtifacts>, ScriptedRunner),
) {
    let (base, runner) = harness;
    runner.set_fallback_failure(255);
    let deployment = base.with_budgets(DeploymentBudgets {
        payload_copy: Duration::from_secs(2),
        ..DeploymentBudgets::default()
    });
    let started = tokio::time::Instant::now();

    let err = deployment
        .deploy(&direct_request("bundle-abc.js"))
        .await
        .expect_err("copy should give up");

    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(
        matches!(err, DeploymentError::Remote(RemoteError::CommandFailure { status: Some(255), .. })),
        "unexpected error: {err}"
    );
    assert!(runner.invocations().iter().all(|i| i.program == "scp"));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn unit_start_failure_is_not_retried(
    harness: (Deployment<ScriptedRunner, FixedArtifacts>, ScriptedRunner),
) {
    let (deployment, runner) = harness;
    runner.push_success();
    runner.push_stdout("v22.11.0\n");
    runner.push_failure(1);
    runner.push_success();

    let err = deployment
        .deploy(&direct_request("bundle-abc.js"))
        .await
        .expect_err("start failure should surface");

    assert!(matches!(
        err,
        DeploymentError::Remote(RemoteError::CommandFailure { status: Some(1), .. })
    ));
    assert_eq!(runner.invocations().len(), 3);
    assert_eq!(runner.pending_responses(), 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn proxied_create_relays_key_and_runtime(
    harness: (Deployment<ScriptedRunner, FixedArtifacts>, ScriptedRunner),
) {
    let (deployment, runner) = harness;
    for _ in 0..6 {
        runner.push_success();
    }

    let state = deployment
        .create(&proxied_request())
        .await
        .expect("proxied create should succeed");

    assert_eq!(state.address, "10.0.2.7");
    assert_eq!(
        state.proxy,
        Some(ProxyTarget::new("10.0.1.9", "out/keys/bastion"))
    );
    let invocations = runner.invocations();
    let args = last_args(&invocations);
    assert_eq!(args.len(), 6, "{args:?}");
    let expected_prefixes = [
        "ubuntu@10.0.1.9:/home/ubuntu/proxy-entry.js",
        "ubuntu@10.0.1.9:/home/ubuntu/.ssh/interior",
        "scp ",
        "scp ",
        "ssh ",
        "rm -f /home/ubuntu/.ssh/interior",
    ];
    for (arg, prefix) in args.iter().zip(expected_prefixes) {
        assert!(arg.starts_with(prefix), "{arg} should start with {prefix}");
    }
    let interior: Vec<&String> = args.iter().skip(2).take(3).collect();
    assert!(interior.iter().all(|arg| arg.contains("/home/ubuntu/.ssh/interior")));
    assert!(interior.first().is_some_and(|arg| arg.contains("/home/ubuntu/proxy-entry.js")));
    assert!(interior.get(1).is_some_and(|arg| arg.contains("/usr/bin/node")));
    assert!(interior.get(2).is_some_and(|arg| arg.contains("/home/ubuntu/node")));
    assert!(
        invocations
            .iter()
            .skip(2)
            .all(|i| i.command_string().contains("out/keys/bastion")),
        "every interior step should connect to the proxy"
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn proxied_failure_still_removes_relayed_key(
    harness: (Deployment<ScriptedRunner, FixedArtifacts>, ScriptedRunner),
) {
    let (deployment, runner) = harness;
    for _ in 0..4 {
        runner.push_success();
    }
    runner.push_failure(1);
    runner.push_success();

    let err = deployment
        .deploy(&proxied_request())
        .await
        .expect_err("start failure should surface");

    assert!(matches!(
        err,
        DeploymentError::Remote(RemoteError::CommandFailure { status: Some(1), .. })
    ));
    let last = runner.invocations().pop().expect("cleanup invocation");
    assert_eq!(last.last_arg(), "rm -f /home/ubuntu/.ssh/interior");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn unchanged_update_runs_nothing(
    harness: (Deployment<ScriptedRunner, FixedArtifacts>, ScriptedRunner),
) {
    let (deployment, runner) = harness;
    let state = running_state("bundle-abc.js");

    let next = deployment
        .update(&state, &direct_request("builds/bundle-abc.js"))
        .await
        .expect("update should succeed");

    assert_eq!(next, state);
    assert!(runner.invocations().is_empty());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn changed_payload_stops_then_redeploys(
    harness: (Deployment<ScriptedRunner, FixedArtifacts>, ScriptedRunner),
) {
    let (deployment, runner) = harness;
    runner.push_success();
    script_direct_create(&runner);

    let next = deployment
        .update(&running_state("bundle-abc.js"), &direct_request("builds/bundle-def.js"))
        .await
        .expect("update should succeed");

    assert_eq!(next.payload_fingerprint, "bundle-def.js");
    let args = last_args(&runner.invocations());
    assert_eq!(args.first().map(String::as_str), Some(STOP));
    assert_eq!(args.len(), 4);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn failed_stop_does_not_block_redeploy(
    harness: (Deployment<ScriptedRunner, FixedArtifacts>, ScriptedRunner),
) {
    let (deployment, runner) = harness;
    runner.push_failure(255);
    script_direct_create(&runner);

    let next = deployment
        .redeploy(&running_state("bundle-abc.js"), &direct_request("bundle-def.js"))
        .await
        .expect("redeploy should proceed after a failed stop");

    assert_eq!(next.payload_fingerprint, "bundle-def.js");
    assert_eq!(runner.invocations().len(), 4);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn address_change_skips_stop(
    harness: (Deployment<ScriptedRunner, FixedArtifacts>, ScriptedRunner),
) {
    let (deployment, runner) = harness;
    script_direct_create(&runner);
    let previous = DeploymentState {
        address: String::from("10.0.0.99"),
        ..running_state("bundle-abc.js")
    };

    let next = deployment
        .update(&previous, &direct_request("bundle-abc.js"))
        .await
        .expect("update should succeed");

    assert_eq!(next.address, "10.0.0.5");
    let invocations = runner.invocations();
    assert_eq!(invocations.len(), 3);
    assert!(last_args(&invocations).iter().all(|arg| arg != STOP));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn delete_is_bounded_by_teardown_timeout(
    harness: (Deployment<ScriptedRunner, FixedArtifacts>, ScriptedRunner),
) {
    let (deployment, runner) = harness;
    runner.push_hang();
    let started = tokio::time::Instant::now();

    deployment
        .delete(&running_state("bundle-abc.js"))
        .await
        .expect("delete never fails");

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(15), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(16), "{elapsed:?}");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn delete_swallows_remote_failure(
    harness: (Deployment<ScriptedRunner, FixedArtifacts>, ScriptedRunner),
) {
    let (deployment, runner) = harness;
    runner.push_failure(255);

    deployment
        .delete(&running_state("bundle-abc.js"))
        .await
        .expect("delete never fails");

    assert_eq!(last_args(&runner.invocations()), vec![STOP]);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn status_returns_supervisor_report(
    harness: (Deployment<ScriptedRunner, FixedArtifacts>, ScriptedRunner),
) {
    let (deployment, runner) = harness;
    runner.push_stdout("Active: active (running)\n");

    let report = deployment
        .status(&running_state("bundle-abc.js"))
        .await
        .expect("status should succeed");

    assert!(report.contains("active (running)"));
    assert_eq!(
        last_args(&runner.invocations()),
        vec!["systemctl status ferry.service --no-pager"]
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn direct_create_starts_the_configured_unit(deployment_config: DeploymentConfig) {
    let runner = ScriptedRunner::new();
    script_direct_create(&runner);
    let executor =
        RemoteExecutor::new(remote_config(), runner.clone()).expect("remote config should validate");
    let config = DeploymentConfig {
        unit_name: String::from("test"),
        ..deployment_config
    };
    let deployment =
        Deployment::new(config, executor, FixedArtifacts).expect("deployment config should validate");

    let state = deployment
        .create(&DeploymentRequest::new(
            Bundle::new("builds/abc"),
            "10.0.0.5",
            "out/keys/web",
        ))
        .await
        .expect("create should succeed");

    assert_eq!(
        state,
        DeploymentState {
            address: String::from("10.0.0.5"),
            key_path: Utf8PathBuf::from("out/keys/web"),
            payload_fingerprint: String::from("abc"),
            proxy: None,
        }
    );
    assert_eq!(
        last_args(&runner.invocations()).last().map(String::as_str),
        Some("sudo systemd-run --unit=test node /home/ubuntu/entry.js")
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn proxied_delete_stops_through_the_relay(
    harness: (Deployment<ScriptedRunner, FixedArtifacts>, ScriptedRunner),
) {
    let (deployment, runner) = harness;
    for _ in 0..3 {
        runner.push_success();
    }

    deployment
        .delete(&proxied_state())
        .await
        .expect("delete never fails");

    assert_relayed_session(&runner.invocations(), "sudo systemctl stop ferry.service");
    assert_eq!(runner.pending_responses(), 0);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn proxied_status_queries_through_the_relay(
    harness: (Deployment<ScriptedRunner, FixedArtifacts>, ScriptedRunner),
) {
    let (deployment, runner) = harness;
    runner.push_success();
    runner.push_stdout("Active: active (running)\n");
    runner.push_success();

    let report = deployment
        .status(&proxied_state())
        .await
        .expect("status should succeed");

    assert!(report.contains("active (running)"));
    assert_relayed_session(&runner.invocations(), "systemctl status ferry.service --no-pager");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn timed_out_proxied_delete_still_removes_relayed_key(
    harness: (Deployment<ScriptedRunner, FixedArtifacts>, ScriptedRunner),
) {
    let (deployment, runner) = harness;
    runner.push_success();
    runner.push_hang();
    runner.push_success();
    let started = tokio::time::Instant::now();

    deployment
        .delete(&proxied_state())
        .await
        .expect("delete never fails");

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(15), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(16), "{elapsed:?}");

    tokio::time::sleep(Duration::from_secs(60)).await;
    let invocations = runner.invocations();
    assert_eq!(invocations.len(), 3, "{:?}", last_args(&invocations));
    assert_eq!(relayed_key_removals(&invocations), 1);
    assert_eq!(runner.pending_responses(), 0);
}

#[test]
fn local_store_resolves_existing_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 tempdir");
    std::fs::write(root.join("bundle-abc.js"), "console.log(1)").expect("write bundle");
    let store = LocalArtifactStore::new(root.clone());

    let resolved = store.resolve("bundle-abc.js").expect("bundle should resolve");
    assert_eq!(resolved, root.join("bundle-abc.js"));

    let err = store.resolve("missing.js").expect_err("missing bundle");
    assert!(matches!(err, DeploymentError::Artifact { .. }));
}

#[rstest]
#[tokio::test]
async fn unresolvable_bundle_touches_no_host(deployment_config: DeploymentConfig) {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 tempdir");
    let runner = ScriptedRunner::new();
    let executor =
        RemoteExecutor::new(remote_config(), runner.clone()).expect("remote config should validate");
    let deployment = Deployment::new(deployment_config, executor, LocalArtifactStore::new(root))
        .expect("deployment config should validate");

    let err = deployment
        .deploy(&direct_request("missing.js"))
        .await
        .expect_err("missing artifact should fail");

    assert!(matches!(err, DeploymentError::Artifact { .. }));
    assert!(runner.invocations().is_empty());
}
