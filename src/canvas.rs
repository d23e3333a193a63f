//! What the engine needs from the remote canvas service.
//!
//! The HTTP client in [`crate::http`] is the production implementation; tests
//! swap in scripted fakes.

use placer_common::{Coordinate, PaletteCode};
use std::{fmt, time::Duration};
use thiserror::Error;

/// Canvas position: an image [`Coordinate`] shifted by the run's origin.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Absolute {
    pub x: u32,
    pub y: u32,
}

impl Absolute {
    pub fn of(at: Coordinate, origin: Coordinate) -> Self {
        Self {
            x: origin.x.saturating_add(at.x),
            y: origin.y.saturating_add(at.y),
        }
    }
}

impl fmt::Display for Absolute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// Current remote state of one pixel.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PixelState {
    pub color: PaletteCode,
    pub owner: Option<String>,
}

/// Answer to a place request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WriteReceipt {
    pub wait: Duration,
    /// the service flagged the write (cooldown still running or rejected)
    pub rejected: bool,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request did not complete: {0}")]
    Transient(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credentials rejected: {0}")]
    BadCredentials(String),
    #[error("authorization did not complete: {0}")]
    Transient(String),
    #[error("malformed authorization response: {0}")]
    Malformed(String),
}

#[derive(Clone, Eq, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An authorized session. Owned by exactly one worker.
pub trait CanvasApi {
    async fn probe(&self, at: Absolute) -> Result<PixelState, ApiError>;

    async fn place(&self, at: Absolute, code: PaletteCode) -> Result<WriteReceipt, ApiError>;
}

/// Turns credentials into a session. Cloned into every worker thread; the
/// session it hands out never leaves that thread.
pub trait Authorizer: Clone + Send + 'static {
    type Session: CanvasApi;

    async fn authorize(&self, credentials: &Credentials) -> Result<Self::Session, AuthError>;
}
