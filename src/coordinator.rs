//! Starts one worker thread per account and holds them at a gate until every
//! account has its credentials.
//!
//! Setup runs in two phases. First each worker obtains its credentials, taking
//! turns at the [`CredentialDesk`] when they are typed in, and reports
//! [`Setup::Ready`]. Once all of them have reported, every worker receives "go"
//! on its own channel and only then touches the network. A worker that fails
//! setup reports [`Setup::Failed`]; the coordinator then triggers shutdown and
//! drops the go channels so nobody starts.

use crate::{
    canvas::{Authorizer, Credentials},
    clock::{Clock, Shutdown},
    config::Settings,
    credentials::CredentialDesk,
    worker::{Worker, WorkerError, sign_in},
};
use anyhow::Context;
use placer_common::{Share, SourceImage};
use std::{
    sync::{
        Arc,
        mpsc::{self, Receiver, Sender},
    },
    thread::{self, JoinHandle},
};

pub enum CredentialSource {
    Supplied(Vec<Credentials>),
    Interactive { accounts: usize },
}

impl CredentialSource {
    fn accounts(&self) -> usize {
        match self {
            Self::Supplied(credentials) => credentials.len(),
            Self::Interactive { accounts } => *accounts,
        }
    }

    fn into_slots(self) -> Vec<Option<Credentials>> {
        match self {
            Self::Supplied(credentials) => credentials.into_iter().map(Some).collect(),
            Self::Interactive { accounts } => vec![None; accounts],
        }
    }
}

enum Setup {
    Ready(usize),
    Failed(usize, String),
}

/// Everything a worker thread needs, cloned per account.
struct Kit<A, C> {
    authorizer: A,
    clock: C,
    desk: CredentialDesk,
    image: Arc<SourceImage>,
    settings: Arc<Settings>,
    shutdown: Shutdown,
}

impl<A: Clone, C: Clone> Clone for Kit<A, C> {
    fn clone(&self) -> Self {
        Self {
            authorizer: self.authorizer.clone(),
            clock: self.clock.clone(),
            desk: self.desk.clone(),
            image: Arc::clone(&self.image),
            settings: Arc::clone(&self.settings),
            shutdown: self.shutdown.clone(),
        }
    }
}

fn worker_main<A, C>(
    slot: usize,
    share: Share,
    preset: Option<Credentials>,
    kit: Kit<A, C>,
    ready: Sender<Setup>,
    go: Receiver<()>,
) -> Result<(), WorkerError>
where
    A: Authorizer,
    C: Clock,
{
    let credentials = match preset {
        Some(credentials) => credentials,
        None => match kit.desk.enter(slot) {
            Ok(credentials) => credentials,
            Err(error) => {
                let _ = ready.send(Setup::Failed(slot, error.to_string()));
                return Err(error.into());
            }
        },
    };

    let _ = ready.send(Setup::Ready(slot));
    drop(ready);

    if go.recv().is_err() {
        debug!("setup aborted");
        return Ok(());
    }

    let mut runtime = monoio::RuntimeBuilder::<monoio::FusionDriver>::new()
        .enable_timer()
        .build()
        .map_err(WorkerError::Runtime)?;
    runtime.block_on(async move {
        let session = sign_in(
            slot,
            credentials,
            &kit.authorizer,
            &kit.desk,
            &kit.clock,
            &kit.shutdown,
            &kit.settings,
        )
        .await?;

        Worker::new(session, share, kit.image, kit.settings, kit.clock, kit.shutdown)
            .run()
            .await
    })
}

pub struct Crew {
    handles: Vec<JoinHandle<Result<(), WorkerError>>>,
    shutdown: Shutdown,
}

impl Crew {
    /// Block until every worker has stopped. Returns the first fatal error.
    pub fn wait(self) -> anyhow::Result<()> {
        let mut first_error = None;

        for (slot, handle) in self.handles.into_iter().enumerate() {
            let result = match handle.join() {
                Ok(result) => result.map_err(anyhow::Error::from),
                Err(_) => Err(anyhow::anyhow!("worker panicked")),
            };

            if let Err(error) = result {
                self.shutdown.trigger();
                first_error.get_or_insert(error.context(format!("worker {slot} failed")));
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

/// Spawn one worker per account and run the setup protocol.
pub fn launch<A, C>(
    source: CredentialSource,
    image: Arc<SourceImage>,
    settings: Arc<Settings>,
    authorizer: A,
    clock: C,
    desk: CredentialDesk,
    shutdown: Shutdown,
) -> anyhow::Result<Crew>
where
    A: Authorizer,
    C: Clock + Clone + Send + 'static,
{
    let accounts = source.accounts();
    anyhow::ensure!(accounts > 0, "at least one account is required");

    let kit = Kit {
        authorizer,
        clock,
        desk,
        image,
        settings,
        shutdown: shutdown.clone(),
    };

    let (ready_tx, ready_rx) = mpsc::channel();
    let mut go = Vec::with_capacity(accounts);
    let mut handles = Vec::with_capacity(accounts);

    for (slot, preset) in source.into_slots().into_iter().enumerate() {
        let share = if kit.settings.disjoint {
            Share::Rows { slot, of: accounts }
        } else {
            Share::Full
        };

        let (go_tx, go_rx) = mpsc::channel();
        go.push(go_tx);

        let kit = kit.clone();
        let ready_tx = ready_tx.clone();
        let handle = thread::Builder::new()
            .name(format!("worker-{slot}"))
            .spawn(move || {
                let _span = info_span!("worker", slot).entered();

                let shutdown = kit.shutdown.clone();
                let result = worker_main(slot, share, preset, kit, ready_tx, go_rx);

                match result {
                    Err(WorkerError::Stopped(_)) => {
                        info!("stopped");
                        Ok(())
                    }
                    Err(error) => {
                        error!(?error, "worker failed");
                        shutdown.trigger();
                        Err(error)
                    }
                    Ok(()) => Ok(()),
                }
            })
            .with_context(|| format!("failed to spawn worker {slot}"))?;

        handles.push(handle);
    }
    drop(ready_tx);

    let mut ready = 0;
    while ready < accounts {
        match ready_rx.recv() {
            Ok(Setup::Ready(slot)) => {
                ready += 1;
                debug!(slot, ready, accounts, "account ready");
            }
            Ok(Setup::Failed(slot, reason)) => {
                error!(slot, %reason, "account setup failed, aborting");
                shutdown.trigger();
                go.clear();
                break;
            }
            Err(_) => {
                shutdown.trigger();
                go.clear();
                break;
            }
        }
    }

    if !go.is_empty() {
        info!(accounts, "all accounts ready, releasing workers");
        for tx in go {
            let _ = tx.send(());
        }
    }

    Ok(Crew { handles, shutdown })
}
