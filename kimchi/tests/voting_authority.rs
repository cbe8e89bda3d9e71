#![forbid(unsafe_code)]

//! Full runs of the reference topology: 3 authorities, 2 providers, 6 mixes.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{ensure, Context};
use kimchi::tail::TailRegistry;
use kimchi::{Kimchi, KimchiConfig, ManagementError, Supervisor};
use nyx_sdk::Client;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().with_env_filter("info").try_init();
}

fn reference(base_port: u16) -> KimchiConfig {
    KimchiConfig {
        base_port,
        tail_poll_ms: 20,
        shutdown_deadline_secs: Some(30),
        ..KimchiConfig::default()
    }
}

#[test]
fn reference_configs_are_consistent() -> anyhow::Result<()> {
    let mut k = Kimchi::new(reference(40000))?;
    k.generate_configs()?;

    let auths = k.authority_configs();
    ensure!(auths.len() == 3);
    for a in auths {
        let peers = a.authorities.len();
        ensure!(peers == 2, "{} has {peers} peers", a.authority.identifier);
        ensure!(a.providers.len() == 2 && a.mixes.len() == 6);
    }
    let nodes = k.node_configs();
    ensure!(nodes.iter().filter(|n| n.is_provider()).count() == 2);
    ensure!(nodes.iter().filter(|n| !n.is_provider()).count() == 6);
    for n in nodes {
        ensure!(n.voting_peers()?.len() == 3);
    }

    let client = k.client_config("aLiCe");
    ensure!(client.voting.peers.len() == 3);
    ensure!(client.proxy.data_dir == k.base_dir().join("client_aLiCe"));

    let ports: BTreeSet<_> = auths
        .iter()
        .flat_map(|a| a.authority.addresses.iter())
        .chain(nodes.iter().flat_map(|n| n.server.addresses.iter()))
        .collect();
    ensure!(ports.len() == 11, "ports collide");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn voting_authority_run() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let cfg = KimchiConfig { base_dir: Some(dir.path().to_path_buf()), ..reference(41000) };

    let summary = Kimchi::new(cfg)?.run().await.context("harness run")?;

    ensure!(summary.authorities == 3);
    ensure!(summary.providers == 2);
    ensure!(summary.mixes == 6);
    ensure!(summary.service.name == "+loop");
    ensure!(summary.service.provider.starts_with("provider-"), "{}", summary.service.provider);
    ensure!(summary.tailed_lines > 0, "no server log lines were relayed");

    for i in 0..3 {
        ensure!(dir.path().join(format!("authority{i}")).join("nyx.log").exists());
    }
    ensure!(!dir.path().join("provider-0").join("management_sock").exists(), "socket left behind");
    Ok(())
}

/// Drives the pieces by hand so the user registration can be checked twice.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_registration_of_a_user_is_refused() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let cfg = KimchiConfig { base_dir: Some(dir.path().to_path_buf()), ..reference(42000) };
    let mut k = Kimchi::new(cfg)?;
    k.generate_configs()?;

    let tails = TailRegistry::new(Duration::from_millis(20));
    let mut sup = Supervisor::new();
    for a in k.authority_configs() {
        tails.follow(a.authority.identifier.clone(), a.log_path());
        sup.start_authority(a.clone()).await?;
    }
    for n in k.node_configs() {
        tails.follow(n.server.identifier.clone(), n.log_path());
        sup.start_node(n.clone()).await?;
    }
    ensure!(sup.len() == 11);

    k.register_user("bOb").await?;
    let again = k.register_user("bOb").await;
    let refused = matches!(
        &again,
        Err(kimchi::KimchiError::Management(ManagementError::UnexpectedStatus { got: 554, .. }))
    );

    let session = Client::new(k.client_config("bOb"))?.new_session().await?;
    let providers = session.consensus().providers.len();

    ensure!(sup.shutdown_all().await == 11);
    tails.stop_at_eof_all();
    tails.wait_with_deadline(Some(Duration::from_secs(30))).await?;
    tails.close().await;

    ensure!(refused, "second ADD_USER should fail, got {:?}", again.map(|_| ()));
    ensure!(providers == 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn occupied_authority_port_aborts_the_run() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    // authority-0 gets 43001, authority-1 would get 43002.
    let squatter = std::net::TcpListener::bind("127.0.0.1:43002")?;
    let cfg = KimchiConfig { base_dir: Some(dir.path().to_path_buf()), ..reference(43000) };

    let res = tokio::time::timeout(Duration::from_secs(30), Kimchi::new(cfg)?.run())
        .await
        .context("run did not return after a failed start")?;

    match res {
        Err(kimchi::KimchiError::ProcessStart { server, .. }) => {
            ensure!(server.starts_with("authority-1"), "failed server was {server}")
        }
        other => anyhow::bail!("expected a start failure, got {:?}", other.map(|_| ())),
    }
    ensure!(dir.path().join("authority0").join("nyx.log").exists());
    ensure!(!dir.path().join("provider-0").exists(), "no node should have been configured to run");
    // The authority that did start was halted and released its port.
    std::net::TcpListener::bind("127.0.0.1:43001").context("authority-0 still bound")?;
    drop(squatter);
    Ok(())
}
