//! In-memory stand-ins for the network, the clock and the keyboard.

use crate::{
    canvas::{
        Absolute, ApiError, AuthError, Authorizer, CanvasApi, Credentials, PixelState, WriteReceipt,
    },
    clock::{Clock, Shutdown},
    credentials::Prompter,
};
use placer_common::PaletteCode;
use std::{
    cell::RefCell,
    collections::VecDeque,
    future::Future,
    io,
    rc::Rc,
    sync::{Arc, Mutex},
    time::Duration,
};

pub fn block_on<F: Future>(future: F) -> F::Output {
    monoio::RuntimeBuilder::<monoio::FusionDriver>::new()
        .enable_timer()
        .build()
        .expect("failed to build test runtime")
        .block_on(future)
}

/// Records every sleep and returns immediately.
#[derive(Clone, Debug, Default)]
pub struct InstantClock(Arc<Mutex<Vec<Duration>>>);

impl InstantClock {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.0.lock().unwrap().clone()
    }

    pub fn total(&self) -> Duration {
        self.0.lock().unwrap().iter().sum()
    }
}

impl Clock for InstantClock {
    async fn sleep(&self, duration: Duration) {
        self.0.lock().unwrap().push(duration);
    }
}

pub fn rejected(wait_secs: u64) -> Result<WriteReceipt, ApiError> {
    Ok(WriteReceipt {
        wait: Duration::from_secs(wait_secs),
        rejected: true,
    })
}

pub fn transient() -> Result<PixelState, ApiError> {
    Err(ApiError::Transient("503".into()))
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Call {
    Probe(Absolute),
    Place(Absolute, PaletteCode),
}

#[derive(Default)]
struct CanvasScript {
    probes: VecDeque<Result<PixelState, ApiError>>,
    places: VecDeque<Result<WriteReceipt, ApiError>>,
    color: PaletteCode,
    wait: Duration,
    stop_after_probes: Option<(usize, Shutdown)>,
    calls: Vec<Call>,
}

/// Answers from a script, then with defaults: every pixel has `color`, every
/// write is accepted with `wait`.
#[derive(Clone, Default)]
pub struct ScriptedCanvas(Rc<RefCell<CanvasScript>>);

impl ScriptedCanvas {
    pub fn probe_color(self, color: PaletteCode) -> Self {
        self.0.borrow_mut().color = color;
        self
    }

    pub fn wait_secs(self, secs: u64) -> Self {
        self.0.borrow_mut().wait = Duration::from_secs(secs);
        self
    }

    pub fn then_probe(self, result: Result<PixelState, ApiError>) -> Self {
        self.0.borrow_mut().probes.push_back(result);
        self
    }

    pub fn then_place(self, result: Result<WriteReceipt, ApiError>) -> Self {
        self.0.borrow_mut().places.push_back(result);
        self
    }

    pub fn stop_after_probes(self, probes: usize, shutdown: Shutdown) -> Self {
        self.0.borrow_mut().stop_after_probes = Some((probes, shutdown));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.borrow().calls.clone()
    }

    pub fn placed(&self) -> Vec<(Absolute, PaletteCode)> {
        self.0
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Place(at, code) => Some((*at, *code)),
                Call::Probe(_) => None,
            })
            .collect()
    }

    pub fn place_count(&self) -> usize {
        self.placed().len()
    }
}

impl CanvasApi for ScriptedCanvas {
    async fn probe(&self, at: Absolute) -> Result<PixelState, ApiError> {
        let mut script = self.0.borrow_mut();
        script.calls.push(Call::Probe(at));

        let probes = script
            .calls
            .iter()
            .filter(|call| matches!(call, Call::Probe(_)))
            .count();
        if let Some((limit, shutdown)) = &script.stop_after_probes {
            if probes >= *limit {
                shutdown.trigger();
            }
        }

        let color = script.color;
        script.probes.pop_front().unwrap_or(Ok(PixelState { color, owner: None }))
    }

    async fn place(&self, at: Absolute, code: PaletteCode) -> Result<WriteReceipt, ApiError> {
        let mut script = self.0.borrow_mut();
        script.calls.push(Call::Place(at, code));

        let wait = script.wait;
        script.places.pop_front().unwrap_or(Ok(WriteReceipt {
            wait,
            rejected: false,
        }))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    Asked(String),
    Authorized(String),
}

/// Shared, ordered record of prompts and remote calls across threads.
#[derive(Clone, Debug, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Clone, Default)]
pub struct ScriptedPrompter {
    answers: Arc<Mutex<VecDeque<String>>>,
    questions: Arc<Mutex<Vec<String>>>,
    log: Option<EventLog>,
}

impl ScriptedPrompter {
    pub fn new<I>(answers: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            answers: Arc::new(Mutex::new(answers.into_iter().map(Into::into).collect())),
            ..Self::default()
        }
    }

    pub fn logging(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().unwrap().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&mut self, question: &str) -> io::Result<String> {
        self.questions.lock().unwrap().push(question.to_owned());

        let answer = self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "script exhausted"))?;

        if let Some(log) = &self.log {
            log.push(Event::Asked(question.to_owned()));
        }

        Ok(answer)
    }
}

/// Accepts everything unless scripted otherwise; sessions are fresh
/// [`ScriptedCanvas`]es.
#[derive(Clone, Default)]
pub struct RecordingAuthorizer {
    script: Arc<Mutex<VecDeque<Result<(), AuthError>>>>,
    attempts: Arc<Mutex<Vec<Credentials>>>,
    log: Option<EventLog>,
    stop_after: Option<(usize, Shutdown)>,
}

impl RecordingAuthorizer {
    pub fn then(self, result: Result<(), AuthError>) -> Self {
        self.script.lock().unwrap().push_back(result);
        self
    }

    pub fn logging(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn stop_after(mut self, attempts: usize, shutdown: Shutdown) -> Self {
        self.stop_after = Some((attempts, shutdown));
        self
    }

    pub fn attempts(&self) -> Vec<Credentials> {
        self.attempts.lock().unwrap().clone()
    }
}

impl Authorizer for RecordingAuthorizer {
    type Session = ScriptedCanvas;

    async fn authorize(&self, credentials: &Credentials) -> Result<ScriptedCanvas, AuthError> {
        let attempts = {
            let mut attempts = self.attempts.lock().unwrap();
            attempts.push(credentials.clone());
            attempts.len()
        };

        if let Some(log) = &self.log {
            log.push(Event::Authorized(credentials.username.clone()));
        }

        if let Some((limit, shutdown)) = &self.stop_after {
            if attempts >= *limit {
                shutdown.trigger();
            }
        }

        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or(Ok(())).map(|()| ScriptedCanvas::default())
    }
}
