//! Probe, decide, write, wait: the life of one pixel.

use crate::{
    canvas::{Absolute, ApiError, CanvasApi, PixelState, WriteReceipt},
    clock::{Clock, Shutdown, countdown},
    config::Settings,
    worker::{WorkerError, WorkerProgress},
};
use placer_common::PaletteCode;
use std::time::Duration;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PlacementOutcome {
    /// Already the right color.
    Skipped { owner: Option<String> },
    /// Write accepted; `wait` has been slept out.
    Placed { wait: Duration },
    /// Write flagged by the service; `wait` has been slept out.
    CooldownRejected { wait: Duration },
}

pub struct Placer<'a, S, C> {
    session: &'a S,
    clock: &'a C,
    shutdown: &'a Shutdown,
    settings: &'a Settings,
}

impl<'a, S, C> Placer<'a, S, C>
where
    S: CanvasApi,
    C: Clock,
{
    pub fn new(session: &'a S, clock: &'a C, shutdown: &'a Shutdown, settings: &'a Settings) -> Self {
        Self {
            session,
            clock,
            shutdown,
            settings,
        }
    }

    async fn pause(&self, duration: Duration) -> Result<(), WorkerError> {
        countdown(self.clock, self.shutdown, duration).await?;
        Ok(())
    }

    /// Current state of `at`. Retries until the canvas answers.
    pub async fn probe(&self, at: Absolute) -> Result<PixelState, WorkerError> {
        loop {
            self.shutdown.check()?;

            match self.session.probe(at).await {
                Ok(state) => return Ok(state),
                Err(ApiError::Transient(reason)) => {
                    warn!(x = at.x, y = at.y, %reason, "probe failed, retrying");
                    self.pause(self.settings.timings.probe_retry).await?;
                }
                Err(ApiError::Malformed(reason)) => return Err(WorkerError::Malformed(reason)),
            }
        }
    }

    async fn write(&self, at: Absolute, code: PaletteCode) -> Result<WriteReceipt, WorkerError> {
        loop {
            self.shutdown.check()?;

            match self.session.place(at, code).await {
                Ok(receipt) => return Ok(receipt),
                Err(ApiError::Transient(reason)) => {
                    warn!(x = at.x, y = at.y, %reason, "place request failed, retrying");
                    self.pause(self.settings.timings.probe_retry).await?;
                }
                Err(ApiError::Malformed(reason)) => return Err(WorkerError::Malformed(reason)),
            }
        }
    }

    /// One probe and, if needed, one write, including the wait that follows.
    pub async fn attempt(
        &self,
        at: Absolute,
        code: PaletteCode,
        progress: &WorkerProgress,
    ) -> Result<PlacementOutcome, WorkerError> {
        let state = self.probe(at).await?;

        if state.color == code {
            trace!(x = at.x, y = at.y, code, "already set");
            self.pause(self.settings.timings.skip_pause).await?;
            return Ok(PlacementOutcome::Skipped { owner: state.owner });
        }

        debug!(x = at.x, y = at.y, code, previous = state.color, "placing");
        let receipt = self.write(at, code).await?;
        let wait = receipt.wait + self.settings.timings.cooldown_margin;

        let outcome = if receipt.rejected {
            info!(
                x = at.x,
                y = at.y,
                wait_secs = wait.as_secs_f32(),
                percent = progress.percent(),
                "cooldown is active"
            );
            PlacementOutcome::CooldownRejected { wait }
        } else {
            info!(
                x = at.x,
                y = at.y,
                code,
                wait_secs = wait.as_secs_f32(),
                percent = progress.percent(),
                "placed"
            );
            PlacementOutcome::Placed { wait }
        };

        self.pause(wait).await?;
        Ok(outcome)
    }

    /// Attempt `at` until the pixel is placed or found already correct.
    /// With a retry limit configured, a pixel that keeps getting rejected is
    /// left for the next pass.
    pub async fn place(
        &self,
        at: Absolute,
        code: PaletteCode,
        progress: &WorkerProgress,
    ) -> Result<PlacementOutcome, WorkerError> {
        let mut rejections = 0_u32;

        loop {
            let outcome = self.attempt(at, code, progress).await?;
            if !matches!(outcome, PlacementOutcome::CooldownRejected { .. }) {
                return Ok(outcome);
            }

            rejections += 1;
            if self
                .settings
                .cooldown_retries
                .is_some_and(|limit| rejections > limit)
            {
                warn!(x = at.x, y = at.y, rejections, "giving up on pixel for this pass");
                return Ok(outcome);
            }
        }
    }
}
