//! Interactive credential entry, one account at a time.

use crate::canvas::Credentials;
use std::{
    io::{self, BufRead, Write},
    sync::{Arc, Mutex, PoisonError},
};

pub trait Prompter: Send {
    /// Show `question` and return the answer without its line ending.
    fn ask(&mut self, question: &str) -> io::Result<String>;
}

/// stdin / stdout
#[derive(Clone, Copy, Debug, Default)]
pub struct Console;

impl Prompter for Console {
    fn ask(&mut self, question: &str) -> io::Result<String> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(question.as_bytes())?;
        stdout.flush()?;

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "input closed"));
        }

        Ok(line.trim_end_matches(['\r', '\n']).to_owned())
    }
}

/// Shared access to the one prompter. Whoever holds the desk gets to ask
/// both questions for their account before anyone else can type.
#[derive(Clone)]
pub struct CredentialDesk(Arc<Mutex<Box<dyn Prompter>>>);

impl CredentialDesk {
    pub fn new(prompter: impl Prompter + 'static) -> Self {
        Self(Arc::new(Mutex::new(Box::new(prompter))))
    }

    fn with_prompter<T>(&self, f: impl FnOnce(&mut dyn Prompter) -> io::Result<T>) -> io::Result<T> {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut **guard)
    }

    /// First entry for account `slot` (shown 1-based).
    pub fn enter(&self, slot: usize) -> io::Result<Credentials> {
        self.with_prompter(|prompter| {
            let username = prompter.ask(&format!("[{}] Username: ", slot + 1))?;
            let password = prompter.ask(&format!("[{}] Password: ", slot + 1))?;
            Ok(Credentials::new(username, password))
        })
    }

    /// Re-entry after the service rejected `previous`. A blank username keeps
    /// the previous one.
    pub fn correct(&self, slot: usize, previous: &Credentials) -> io::Result<Credentials> {
        self.with_prompter(|prompter| {
            let username = prompter.ask(&format!(
                "[{}] Re-enter username (prev='{}'): ",
                slot + 1,
                previous.username
            ))?;
            let password = prompter.ask(&format!("[{}] Re-enter password: ", slot + 1))?;

            let username = if username.trim().is_empty() {
                previous.username.clone()
            } else {
                username
            };

            Ok(Credentials::new(username, password))
        })
    }
}

/// Keep asking until the answer is a positive number.
pub fn ask_account_count(prompter: &mut dyn Prompter) -> io::Result<usize> {
    loop {
        let answer = prompter.ask("Please enter the number of accounts you would like to use: ")?;
        match answer.trim().parse::<usize>() {
            Ok(0) => warn!("number of accounts must be at least 1"),
            Ok(count) => return Ok(count),
            Err(error) => warn!(%answer, %error, "not a number"),
        }
    }
}
