use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use thiserror::Error;

/// Longest single sleep; shutdown is noticed at least this often.
pub const TICK: Duration = Duration::from_secs(1);

pub trait Clock {
    async fn sleep(&self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MonoioClock;

impl Clock for MonoioClock {
    async fn sleep(&self, duration: Duration) {
        monoio::time::sleep(duration).await;
    }
}

#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[error("shutdown requested")]
pub struct Stopped;

/// Process-wide stop flag, observed by every worker.
#[derive(Clone, Debug, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    pub fn check(&self) -> Result<(), Stopped> {
        if self.is_triggered() { Err(Stopped) } else { Ok(()) }
    }
}

/// Raise `shutdown` once `signal` fires.
pub async fn trigger_on(signal: impl Future<Output = ()>, shutdown: Shutdown) {
    signal.await;
    info!("shutdown requested, stopping workers");
    shutdown.trigger();
}

/// Sleep out `total` in ticks of at most [`TICK`].
pub async fn countdown<C>(clock: &C, shutdown: &Shutdown, total: Duration) -> Result<(), Stopped>
where
    C: Clock,
{
    let mut remaining = total;
    while !remaining.is_zero() {
        shutdown.check()?;

        let step = remaining.min(TICK);
        clock.sleep(step).await;
        remaining -= step;

        trace!(remaining_secs = remaining.as_secs_f32(), "waiting");
    }

    Ok(())
}
