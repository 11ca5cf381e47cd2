//! Simulated device interface for testing instruments without hardware.
//!
//! A `MockTransport` is a cheap handle onto shared state: keep one clone for
//! inspection and hand another (boxed) to an adapter. It provides:
//! - scripted replies for exact commands, and a queue of replies for queries
//! - an echo mode that remembers `HEADER value` settings and answers `HEADER?`
//! - optional acknowledgement replies to non-query commands
//! - simulated response latency
//! - one-shot write failure injection
//! - a log of every command written and a count of handle releases

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::DeviceInterface;
use crate::error::{InstrResult, InstrumentError};

struct MockState {
    echo: bool,
    latency: Duration,
    reply_termination: String,
    acknowledgement: Option<String>,
    replies: HashMap<String, String>,
    queued: VecDeque<String>,
    registers: HashMap<String, String>,
    pending: VecDeque<(Instant, Vec<u8>)>,
    written: Vec<String>,
    fail_next_write: bool,
    closed: bool,
    close_count: usize,
}

impl Default for MockState {
    fn default() -> Self {
        MockState {
            echo: false,
            latency: Duration::ZERO,
            reply_termination: "\n".to_owned(),
            acknowledgement: None,
            replies: HashMap::new(),
            queued: VecDeque::new(),
            registers: HashMap::new(),
            pending: VecDeque::new(),
            written: Vec::new(),
            fail_next_write: false,
            closed: false,
            close_count: 0,
        }
    }
}

#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

fn normalise(header: &str) -> String {
    header.trim().trim_start_matches(':').to_ascii_uppercase()
}

fn split_header(segment: &str) -> (&str, &str) {
    match segment.split_once(char::is_whitespace) {
        Some((header, args)) => (header, args.trim()),
        None => (segment, ""),
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock that answers queries with the last value set for the same header
    pub fn echo() -> Self {
        let mock = Self::new();
        mock.state().echo = true;
        mock
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.state().latency = latency;
        self
    }

    /// Line ending appended to every reply
    pub fn with_reply_termination(self, termination: &str) -> Self {
        self.state().reply_termination = termination.to_owned();
        self
    }

    /// Reply `ack` to every command that is not a query
    pub fn with_acknowledgement(self, ack: &str) -> Self {
        self.state().acknowledgement = Some(ack.to_owned());
        self
    }

    /// Always answer `command` (matched exactly) with `reply`
    pub fn respond_to(&self, command: &str, reply: &str) {
        self.state()
            .replies
            .insert(command.trim().to_owned(), reply.to_owned());
    }

    /// Answer the next unscripted query with `reply`
    pub fn push_response(&self, reply: &str) {
        self.state().queued.push_back(reply.to_owned());
    }

    /// Preload the echo register behind `header`
    pub fn store(&self, header: &str, value: &str) {
        self.state()
            .registers
            .insert(normalise(header), value.to_owned());
    }

    pub fn fail_next_write(&self) {
        self.state().fail_next_write = true;
    }

    /// Every command successfully written, without its termination
    pub fn written(&self) -> Vec<String> {
        self.state().written.clone()
    }

    pub fn write_count(&self) -> usize {
        self.state().written.len()
    }

    pub fn close_count(&self) -> usize {
        self.state().close_count
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn boxed(&self) -> Box<dyn DeviceInterface> {
        Box::new(self.clone())
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the log from the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MockState {
    fn answer(&mut self, command: &str) -> Option<String> {
        if let Some(reply) = self.replies.get(command) {
            return Some(reply.clone());
        }

        let mut answers = Vec::new();
        for segment in command.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (header, args) = split_header(segment);
            if header.contains('?') {
                let key = normalise(header.trim_end_matches('?'));
                let key = if args.is_empty() {
                    key
                } else {
                    format!("{} {}", key, args)
                };
                let reply = self
                    .replies
                    .get(segment)
                    .cloned()
                    .or_else(|| self.queued.pop_front())
                    .or_else(|| {
                        if self.echo {
                            self.registers.get(&key).cloned()
                        } else {
                            None
                        }
                    });
                answers.extend(reply);
            } else if self.echo {
                self.registers.insert(normalise(header), args.to_owned());
            }
        }

        if answers.is_empty() {
            let is_query = command.contains('?');
            if is_query {
                None
            } else {
                self.acknowledgement.clone()
            }
        } else {
            Some(answers.join(";"))
        }
    }
}

impl DeviceInterface for MockTransport {
    fn send(&mut self, bytes: &[u8]) -> InstrResult<()> {
        let mut state = self.state();
        if state.closed {
            return Err(InstrumentError::Connection("Mock device is closed".to_owned()));
        }
        if state.fail_next_write {
            state.fail_next_write = false;
            return Err(InstrumentError::Communication(
                "Simulated write failure".to_owned(),
            ));
        }

        let text = String::from_utf8_lossy(bytes);
        let command = text.trim_end_matches(['\r', '\n']).trim().to_owned();
        state.written.push(command.clone());

        if let Some(reply) = state.answer(&command) {
            let ready_at = Instant::now() + state.latency;
            let mut payload = reply.into_bytes();
            payload.extend_from_slice(state.reply_termination.as_bytes());
            state.pending.push_back((ready_at, payload));
        }
        Ok(())
    }

    fn receive(&mut self, buffer: &mut [u8], wait: Duration) -> InstrResult<usize> {
        let now = Instant::now();
        let mut state = self.state();
        if state.closed {
            return Err(InstrumentError::Connection("Mock device is closed".to_owned()));
        }

        let sleep = match state.pending.front_mut() {
            Some((ready_at, payload)) if *ready_at <= now => {
                let size = payload.len().min(buffer.len());
                buffer[..size].copy_from_slice(&payload[..size]);
                payload.drain(..size);
                if payload.is_empty() {
                    state.pending.pop_front();
                }
                return Ok(size);
            }
            Some((ready_at, _)) => (*ready_at - now).min(wait),
            None => wait,
        };

        drop(state);
        std::thread::sleep(sleep);
        Ok(0)
    }

    fn flush_buffers(&mut self) -> InstrResult<()> {
        self.state().pending.clear();
        Ok(())
    }

    fn close(&mut self) -> InstrResult<()> {
        let mut state = self.state();
        if state.closed {
            return Err(InstrumentError::Communication(
                "Mock device released twice".to_owned(),
            ));
        }
        state.closed = true;
        state.close_count += 1;
        Ok(())
    }
}
