#[macro_use]
extern crate tracing;

mod canvas;
mod clock;
mod config;
mod coordinator;
mod credentials;
mod http;
mod placement;
#[cfg(test)]
mod testing;
mod worker;

use self::{
    clock::{MonoioClock, Shutdown},
    config::Config,
    coordinator::CredentialSource,
    credentials::{Console, CredentialDesk},
    http::{Endpoint, HttpAuthorizer, HttpClient},
};
use anyhow::Context;
use placer_common::{ImageLoadError, SourceImage};
use std::{sync::Arc, thread};
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = Config::from_env()?;
    let endpoint: Endpoint = config.endpoint.parse()?;

    info!("loading image..");
    let image = match SourceImage::open(&config.image) {
        Ok(image) => image,
        Err(error @ ImageLoadError::NotFound(_)) => {
            return Err(error).context("re-check the command line arguments and try again");
        }
        Err(error) => return Err(error.into()),
    };

    let origin = config.settings.origin;
    anyhow::ensure!(
        origin.x.checked_add(image.width()).is_some() && origin.y.checked_add(image.height()).is_some(),
        "image does not fit on the canvas at ({},{})",
        origin.x,
        origin.y,
    );

    info!(
        width = image.width(),
        height = image.height(),
        opaque = image.opaque_count(),
        "loaded image successfully"
    );

    let mut console = Console;
    let source = match config.accounts {
        Some(accounts) => CredentialSource::Supplied(accounts),
        None => CredentialSource::Interactive {
            accounts: credentials::ask_account_count(&mut console)?,
        },
    };

    let client = HttpClient::new(
        endpoint,
        config.user_agent,
        config.settings.timings.request_timeout,
    );

    info!("starting placer");
    let shutdown = Shutdown::default();
    let crew = coordinator::launch(
        source,
        Arc::new(image),
        Arc::new(config.settings),
        HttpAuthorizer::new(client),
        MonoioClock,
        CredentialDesk::new(console),
        shutdown.clone(),
    )?;

    // installed after setup so ctrl-c still kills a stuck credential prompt
    watch_ctrl_c(shutdown)?;

    crew.wait()
}

fn watch_ctrl_c(shutdown: Shutdown) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("signal".into())
        .spawn(move || {
            let mut runtime = match monoio::RuntimeBuilder::<monoio::FusionDriver>::new()
                .enable_timer()
                .build()
            {
                Ok(runtime) => runtime,
                Err(error) => {
                    warn!(%error, "cannot listen for ctrl-c");
                    return;
                }
            };

            runtime.block_on(async move {
                match monoio::utils::CtrlC::new() {
                    Ok(ctrl_c) => clock::trigger_on(ctrl_c, shutdown).await,
                    Err(error) => warn!(%error, "cannot listen for ctrl-c"),
                }
            });
        })
        .context("failed to spawn the signal thread")?;

    Ok(())
}
