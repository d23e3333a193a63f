use crate::canvas::Credentials;
use anyhow::bail;
use placer_common::{Coordinate, Metric};
use std::{path::PathBuf, time::Duration};

pub const DEFAULT_ENDPOINT: &str = "http://www.reddit.com";
pub const DEFAULT_USER_AGENT: &str = "PlacePlacer";

#[derive(argh::FromArgs)]
/// Paint an image onto a shared, rate-limited pixel canvas using many accounts
struct Args {
    #[argh(positional)]
    /// path to the target image
    image: PathBuf,

    #[argh(positional)]
    /// canvas x coordinate of the image's top-left pixel
    x: u32,

    #[argh(positional)]
    /// canvas y coordinate of the image's top-left pixel
    y: u32,

    #[argh(positional)]
    /// username/password pairs; prompted for interactively when absent
    credentials: Vec<String>,

    #[argh(option, default = "DEFAULT_ENDPOINT.into()")]
    /// base url of the canvas service (plain http)
    endpoint: String,

    #[argh(option, default = "DEFAULT_USER_AGENT.into()")]
    /// user agent sent with every request
    user_agent: String,

    #[argh(option, default = "5")]
    /// seconds between attempts when the canvas does not answer
    probe_retry_secs: u64,

    #[argh(option, default = "5")]
    /// seconds before a request is given up on
    request_timeout_secs: u64,

    #[argh(option, default = "500")]
    /// pause after skipping an already-correct pixel, in milliseconds
    skip_pause_ms: u64,

    #[argh(option, default = "2")]
    /// seconds added to every cooldown the service reports
    cooldown_margin_secs: u64,

    #[argh(option, default = "60")]
    /// seconds to sleep between two passes over the image
    pass_sleep_secs: u64,

    #[argh(option)]
    /// give up on a pixel for the pass after this many cooldown rejections
    cooldown_retries: Option<u32>,

    #[argh(option, default = "Metric::Euclidean")]
    /// color distance used for quantization: euclidean or weighted
    metric: Metric,

    #[argh(switch)]
    /// split the image rows between accounts instead of every account walking all of it
    disjoint: bool,
}

/// Every wait the engine performs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timings {
    pub probe_retry: Duration,
    pub request_timeout: Duration,
    pub skip_pause: Duration,
    pub cooldown_margin: Duration,
    pub pass_sleep: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            probe_retry: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            skip_pause: Duration::from_millis(500),
            cooldown_margin: Duration::from_secs(2),
            pass_sleep: Duration::from_secs(60),
        }
    }
}

/// Run-wide settings, read-only once the workers start.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Settings {
    pub origin: Coordinate,
    pub metric: Metric,
    pub disjoint: bool,
    pub cooldown_retries: Option<u32>,
    pub timings: Timings,
}

pub struct Config {
    pub image: PathBuf,
    pub endpoint: String,
    pub user_agent: String,
    /// `None` when the accounts have to be entered interactively
    pub accounts: Option<Vec<Credentials>>,
    pub settings: Settings,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let args: Args = argh::from_env();
        Self::from_args(args)
    }

    fn from_args(args: Args) -> anyhow::Result<Self> {
        let accounts = credential_pairs(args.credentials)?;

        Ok(Self {
            image: args.image,
            endpoint: args.endpoint,
            user_agent: args.user_agent,
            accounts,
            settings: Settings {
                origin: Coordinate::new(args.x, args.y),
                metric: args.metric,
                disjoint: args.disjoint,
                cooldown_retries: args.cooldown_retries,
                timings: Timings {
                    probe_retry: Duration::from_secs(args.probe_retry_secs),
                    request_timeout: Duration::from_secs(args.request_timeout_secs),
                    skip_pause: Duration::from_millis(args.skip_pause_ms),
                    cooldown_margin: Duration::from_secs(args.cooldown_margin_secs),
                    pass_sleep: Duration::from_secs(args.pass_sleep_secs),
                },
            },
        })
    }
}

fn credential_pairs(raw: Vec<String>) -> anyhow::Result<Option<Vec<Credentials>>> {
    if raw.is_empty() {
        return Ok(None);
    }

    if raw.len() % 2 != 0 {
        bail!("credentials must come in username/password pairs, got {} values", raw.len());
    }

    let pairs = raw
        .chunks_exact(2)
        .map(|pair| Credentials::new(pair[0].clone(), pair[1].clone()))
        .collect();

    Ok(Some(pairs))
}
