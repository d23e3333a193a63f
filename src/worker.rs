//! One account walking the image forever.

use crate::{
    canvas::{Absolute, AuthError, Authorizer, CanvasApi, Credentials},
    clock::{Clock, Shutdown, Stopped, countdown},
    config::Settings,
    credentials::CredentialDesk,
    placement::{PlacementOutcome, Placer},
};
use placer_common::{Share, SourceImage, quantize_with, traversal};
use rand::{SeedableRng, rngs::StdRng};
use std::{io, sync::Arc, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("malformed response from the canvas service: {0}")]
    Malformed(String),
    #[error("credential entry failed")]
    Input(#[from] io::Error),
    #[error("failed to start the worker runtime")]
    Runtime(#[source] io::Error),
    #[error(transparent)]
    Stopped(#[from] Stopped),
}

/// Opaque pixels handled so far in the current pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct WorkerProgress {
    done: usize,
    total: usize,
    placed: usize,
    skipped: usize,
    abandoned: usize,
    waited: Duration,
}

impl WorkerProgress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn record(&mut self, outcome: &PlacementOutcome) {
        match outcome {
            PlacementOutcome::Skipped { .. } => self.skipped += 1,
            PlacementOutcome::Placed { wait } => {
                self.placed += 1;
                self.waited += *wait;
            }
            PlacementOutcome::CooldownRejected { wait } => {
                self.abandoned += 1;
                self.waited += *wait;
            }
        }

        self.done = (self.done + 1).min(self.total);
    }

    /// Rounded to two decimals. An empty pass is complete.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }

        (self.done as f64 / self.total as f64 * 10_000.0).round() / 100.0
    }
}

/// Authorize `credentials`, asking for corrections at the desk while the
/// service rejects them.
pub async fn sign_in<A, C>(
    slot: usize,
    mut credentials: Credentials,
    authorizer: &A,
    desk: &CredentialDesk,
    clock: &C,
    shutdown: &Shutdown,
    settings: &Settings,
) -> Result<A::Session, WorkerError>
where
    A: Authorizer,
    C: Clock,
{
    loop {
        shutdown.check()?;

        match authorizer.authorize(&credentials).await {
            Ok(session) => {
                info!(user = %credentials.username, "signed in");
                return Ok(session);
            }
            Err(AuthError::BadCredentials(reason)) => {
                warn!(user = %credentials.username, %reason, "bad login info, verify the username/password combination");
                credentials = desk.correct(slot, &credentials)?;
            }
            Err(AuthError::Transient(reason)) => {
                warn!(user = %credentials.username, %reason, "sign-in failed, retrying");
                countdown(clock, shutdown, settings.timings.probe_retry).await?;
            }
            Err(AuthError::Malformed(reason)) => return Err(WorkerError::Malformed(reason)),
        }
    }
}

pub struct Worker<S, C> {
    session: S,
    share: Share,
    image: Arc<SourceImage>,
    settings: Arc<Settings>,
    clock: C,
    shutdown: Shutdown,
    rng: StdRng,
}

impl<S, C> Worker<S, C>
where
    S: CanvasApi,
    C: Clock,
{
    pub fn new(
        session: S,
        share: Share,
        image: Arc<SourceImage>,
        settings: Arc<Settings>,
        clock: C,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            session,
            share,
            image,
            settings,
            clock,
            shutdown,
            rng: StdRng::from_entropy(),
        }
    }

    #[cfg(test)]
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// One walk over every opaque pixel this worker covers, in a fresh order.
    pub async fn run_pass(&mut self) -> Result<WorkerProgress, WorkerError> {
        let order = traversal(self.image.width(), self.image.height(), self.share, &mut self.rng);
        let mut progress = WorkerProgress::new(self.image.opaque_among(&order));

        info!(
            width = self.image.width(),
            height = self.image.height(),
            pixels = progress.total,
            "starting image placement"
        );

        let placer = Placer::new(&self.session, &self.clock, &self.shutdown, &self.settings);
        for at in order {
            self.shutdown.check()?;

            let Some(color) = self.image.opaque(at) else {
                continue;
            };

            let code = quantize_with(self.settings.metric, color);
            let target = Absolute::of(at, self.settings.origin);
            let outcome = placer.place(target, code, &progress).await?;

            if let PlacementOutcome::Skipped { owner } = &outcome {
                debug!(
                    x = target.x,
                    y = target.y,
                    code,
                    owner = owner.as_deref().unwrap_or("<nobody>"),
                    "skipping, color already set"
                );
            }

            progress.record(&outcome);
        }

        Ok(progress)
    }

    /// Repaint forever; returns only on shutdown or a fatal error.
    pub async fn run(mut self) -> Result<(), WorkerError> {
        loop {
            self.shutdown.check()?;

            let progress = self.run_pass().await?;
            info!(
                placed = progress.placed,
                skipped = progress.skipped,
                abandoned = progress.abandoned,
                waited_secs = progress.waited.as_secs(),
                sleep_secs = self.settings.timings.pass_sleep.as_secs(),
                "all pixels placed, sleeping"
            );

            countdown(&self.clock, &self.shutdown, self.settings.timings.pass_sleep).await?;
        }
    }
}
