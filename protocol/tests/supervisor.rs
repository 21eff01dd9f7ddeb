//! Supervisor integration tests: both run modes, the lifecycle, and startup
//! failures. No process signals are involved; shutdown is driven through
//! [`NodeHandle::stop`] or a plain future.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use kvchain_protocol::abci::types::*;
use kvchain_protocol::abci::{AppError, ConsensusEngine, EngineContext, LocalClient, SocketClient};
use kvchain_protocol::home::{ConfigError, Home};
use kvchain_protocol::supervisor::{
    Lifecycle, RunMode, Supervisor, SupervisorError, SupervisorOptions,
};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const VALIDATOR_KEY: &str = r#"{
    "address": "5B7C2D1E0F9A8B7C6D5E4F3A2B1C0D9E8F7A6B5C",
    "pub_key": {"type": "tendermint/PubKeyEd25519", "value": "cHViLWtleQ=="},
    "priv_key": {"type": "tendermint/PrivKeyEd25519", "value": "cHJpdi1rZXk="}
}"#;

const NODE_KEY: &str =
    r#"{"priv_key": {"type": "tendermint/PrivKeyEd25519", "value": "bm9kZS1rZXk="}}"#;

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn write_full_home(root: &Path) {
    write(root, "config/config.toml", "moniker = \"embedded-test\"\n");
    write(root, "config/priv_validator_key.json", VALIDATOR_KEY);
    write(root, "config/node_key.json", NODE_KEY);
}

fn socket_options(root: &Path) -> SupervisorOptions {
    SupervisorOptions {
        home: Home::new(root),
        mode: RunMode::Socket {
            listen: "tcp://127.0.0.1:0".parse().unwrap(),
        },
        settings: None,
    }
}

/// Observations recorded by [`ScriptedEngine`].
#[derive(Default)]
struct Journal {
    validator_address: Option<String>,
    moniker: Option<String>,
    commits: Vec<ResponseCommit>,
    stopped: bool,
}

/// A stand-in consensus engine: on start it spawns a thread that drives
/// `blocks` through the client, then idles until stopped.
struct ScriptedEngine {
    blocks: Vec<Vec<&'static str>>,
    journal: Arc<Mutex<Journal>>,
    halt: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl ScriptedEngine {
    fn new(blocks: Vec<Vec<&'static str>>, journal: Arc<Mutex<Journal>>) -> Self {
        Self {
            blocks,
            journal,
            halt: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl ConsensusEngine for ScriptedEngine {
    fn start(&mut self, ctx: EngineContext) -> anyhow::Result<()> {
        {
            let mut journal = self.journal.lock().unwrap();
            journal.validator_address = Some(ctx.keys.validator.address.clone());
            journal.moniker = Some(ctx.settings.moniker.clone());
        }

        let info = ctx.client.info(&RequestInfo::default())?;
        let blocks = self.blocks.clone();
        let journal = Arc::clone(&self.journal);
        let halt = Arc::clone(&self.halt);
        let client = ctx.client;

        self.worker = Some(thread::spawn(move || {
            let mut height = info.last_block_height;
            for txs in blocks {
                height += 1;
                client
                    .begin_block(&RequestBeginBlock {
                        height,
                        ..Default::default()
                    })
                    .unwrap();
                for tx in txs {
                    client
                        .deliver_tx(&RequestDeliverTx {
                            tx: tx.as_bytes().to_vec(),
                        })
                        .unwrap();
                }
                client.end_block(&RequestEndBlock { height }).unwrap();
                let commit = client.commit().unwrap();
                journal.lock().unwrap().commits.push(commit);
            }
            while !halt.load(Ordering::Acquire) {
                thread::yield_now();
            }
        }));
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.halt.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| anyhow::anyhow!("engine worker panicked"))?;
        }
        self.journal.lock().unwrap().stopped = true;
        Ok(())
    }
}

/// An engine whose start always fails.
struct BrokenEngine;

impl ConsensusEngine for BrokenEngine {
    fn start(&mut self, _ctx: EngineContext) -> anyhow::Result<()> {
        anyhow::bail!("p2p listener unavailable")
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// An engine that hands its client to the test and does nothing else.
struct PassiveEngine {
    client: Arc<Mutex<Option<LocalClient>>>,
}

impl ConsensusEngine for PassiveEngine {
    fn start(&mut self, ctx: EngineContext) -> anyhow::Result<()> {
        *self.client.lock().unwrap() = Some(ctx.client);
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Socket Mode
// ---------------------------------------------------------------------------

#[tokio::test]
async fn socket_mode_serves_until_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let node = Supervisor::bootstrap(socket_options(dir.path()))
        .unwrap()
        .start()
        .await
        .unwrap();
    let handle = node.handle();
    let addr = node.listen_addr().cloned().expect("socket mode has an address");
    assert_eq!(handle.state(), Lifecycle::Running);

    let run = tokio::spawn(node.run_until(std::future::pending()));

    let mut client = SocketClient::connect(&addr).await.unwrap();
    client.begin_block(1).await.unwrap();
    client.deliver_tx(b"persist=me").await.unwrap();
    client.end_block(1).await.unwrap();
    let commit = client.commit().await.unwrap();

    handle.stop();
    handle.stop();
    run.await.unwrap().unwrap();
    handle.stopped().await;
    assert_eq!(handle.state(), Lifecycle::Stopped);

    // Restart on the same home: state and checkpoint carried over.
    let supervisor = Supervisor::bootstrap(socket_options(dir.path())).unwrap();
    let info = supervisor.app().info(&RequestInfo::default()).unwrap();
    assert_eq!(info.last_block_height, 1);
    assert_eq!(info.last_block_app_hash, commit.app_hash);
}

#[test]
fn malformed_settings_abort_before_store_opens() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "config/config.toml", "log_level = [oops");

    let err = Supervisor::bootstrap(socket_options(dir.path()))
        .err()
        .expect("bootstrap must fail");
    assert!(matches!(err, SupervisorError::Config(ConfigError::Parse { .. })));
    assert!(!dir.path().join("kvstore").exists());
}

// ---------------------------------------------------------------------------
// Embedded Mode
// ---------------------------------------------------------------------------

#[tokio::test]
async fn embedded_engine_drives_the_application() {
    let dir = tempfile::tempdir().unwrap();
    write_full_home(dir.path());
    let journal = Arc::new(Mutex::new(Journal::default()));

    let engine = ScriptedEngine::new(
        vec![vec!["a=1", "b=2"], vec![], vec!["a=3", "junk"]],
        Arc::clone(&journal),
    );
    let supervisor = Supervisor::bootstrap(SupervisorOptions {
        home: Home::new(dir.path()),
        mode: RunMode::Embedded {
            engine: Box::new(engine),
        },
        settings: None,
    })
    .unwrap();
    let app = Arc::clone(supervisor.app());

    let node = supervisor.start().await.unwrap();
    assert!(node.listen_addr().is_none());
    let handle = node.handle();
    let run = tokio::spawn(node.run_until(std::future::pending()));

    // Wait for the scripted blocks to land.
    while journal.lock().unwrap().commits.len() < 3 {
        tokio::task::yield_now().await;
    }

    handle.stop();
    run.await.unwrap().unwrap();
    assert_eq!(handle.state(), Lifecycle::Stopped);

    let journal = journal.lock().unwrap();
    assert!(journal.stopped);
    assert_eq!(journal.moniker.as_deref(), Some("embedded-test"));
    assert_eq!(
        journal.validator_address.as_deref(),
        Some("5B7C2D1E0F9A8B7C6D5E4F3A2B1C0D9E8F7A6B5C")
    );
    let heights: Vec<u64> = journal.commits.iter().map(|c| c.height).collect();
    assert_eq!(heights, vec![1, 2, 3]);
    assert!(app.store().is_closed());
}

#[test]
fn embedded_mode_requires_key_material() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "config/config.toml", "moniker = \"no-keys\"\n");

    let err = Supervisor::bootstrap(SupervisorOptions {
        home: Home::new(dir.path()),
        mode: RunMode::Embedded {
            engine: Box::new(BrokenEngine),
        },
        settings: None,
    })
    .err()
    .expect("bootstrap must fail");
    assert!(matches!(err, SupervisorError::Config(ConfigError::Missing(_))));
    assert!(!dir.path().join("kvstore").exists());
}

#[test]
fn embedded_mode_requires_settings_document() {
    let dir = tempfile::tempdir().unwrap();
    let err = Supervisor::bootstrap(SupervisorOptions {
        home: Home::new(dir.path()),
        mode: RunMode::Embedded {
            engine: Box::new(BrokenEngine),
        },
        settings: None,
    })
    .err()
    .expect("bootstrap must fail");
    assert!(matches!(err, SupervisorError::Config(ConfigError::Missing(_))));
}

#[tokio::test]
async fn engine_start_failure_closes_the_store() {
    let dir = tempfile::tempdir().unwrap();
    write_full_home(dir.path());

    let supervisor = Supervisor::bootstrap(SupervisorOptions {
        home: Home::new(dir.path()),
        mode: RunMode::Embedded {
            engine: Box::new(BrokenEngine),
        },
        settings: None,
    })
    .unwrap();
    let handle = supervisor.handle();
    let app = Arc::clone(supervisor.app());

    let err = supervisor.start().await.err().expect("start must fail");
    assert!(matches!(err, SupervisorError::Engine(_)));
    assert_eq!(handle.state(), Lifecycle::Stopped);
    assert!(app.store().is_closed());
}

#[tokio::test]
async fn embedded_commit_failure_stops_the_node() {
    let dir = tempfile::tempdir().unwrap();
    write_full_home(dir.path());
    let slot = Arc::new(Mutex::new(None));

    let supervisor = Supervisor::bootstrap(SupervisorOptions {
        home: Home::new(dir.path()),
        mode: RunMode::Embedded {
            engine: Box::new(PassiveEngine {
                client: Arc::clone(&slot),
            }),
        },
        settings: None,
    })
    .unwrap();
    let app = Arc::clone(supervisor.app());
    let node = supervisor.start().await.unwrap();
    let handle = node.handle();
    let run = tokio::spawn(node.run_until(std::future::pending()));

    let client = slot.lock().unwrap().take().expect("engine received a client");
    client
        .begin_block(&RequestBeginBlock {
            height: 1,
            ..Default::default()
        })
        .unwrap();
    client
        .deliver_tx(&RequestDeliverTx { tx: b"k=v".to_vec() })
        .unwrap();
    client.end_block(&RequestEndBlock { height: 1 }).unwrap();

    // Pull the store out from under the commit.
    app.store().close().unwrap();
    let err = client.commit().unwrap_err();
    assert!(err.is_fatal());

    let outcome = tokio::time::timeout(std::time::Duration::from_secs(5), run)
        .await
        .expect("node stops after a fatal commit")
        .unwrap();
    assert!(matches!(
        outcome,
        Err(SupervisorError::App(AppError::CommitFailed(_)))
    ));
    assert_eq!(handle.state(), Lifecycle::Stopped);
    assert!(client.is_closed());
}
