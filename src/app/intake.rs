//! Intake: requests from the endpoints to the coordinator.
//!
//! ```text
//! ┌──────────────┐  IntakeEnvelope  ┌──────────────────┐
//! │ HTTP workers │────────────────▶│ Coordinator task │
//! │ (blocking)   │◀────────────────│ (step loop)      │
//! └──────────────┘   reply signal   └──────────────────┘
//! ```
//!
//! HTTP handlers run on the server's own task and must never touch the
//! state machine, so each request is posted into an `embassy-sync` channel
//! and the handler waits (bounded) on a reply signal.  Callers are
//! serialized by a gate so exactly one exchange owns the signal at a time;
//! a ticket number discards a reply that arrives after its caller gave up.
//!
//! BLE writes do not use the mailbox: the BLE endpoint is pumped from the
//! coordinator task itself.

use core::sync::atomic::{AtomicU32, Ordering};
use core::time::Duration;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use log::warn;

use super::ports::ProvisioningApi;
use super::status::{ScanSnapshot, StatusProjection};
use crate::error::{Error, Result};
use crate::store::record::{Secret, Ssid};

/// Channel depth for pending requests.
const INTAKE_DEPTH: usize = 8;

/// How long an HTTP exchange waits for the coordinator.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

const REPLY_POLL: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Requests and replies
// ---------------------------------------------------------------------------

/// Which endpoint a request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Ble,
    Http,
}

/// Everything an endpoint can ask of the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeRequest {
    Scan,
    ConnectExplicit { ssid: Ssid, secret: Option<Secret> },
    ConnectSaved { ssid: Ssid },
    Forget { ssid: Ssid },
    ForgetAt { index: usize },
    Disconnect,
    ListSaved,
    StatusQuery,
}

/// One saved network as handed to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedEntry {
    pub index: usize,
    pub ssid: Ssid,
    pub secret: Secret,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeReply {
    Ack,
    Status(StatusProjection),
    Saved(Vec<SavedEntry>),
    Scan(Arc<ScanSnapshot>),
}

/// A request in flight through the mailbox.
#[derive(Debug)]
pub struct IntakeEnvelope {
    pub origin: Origin,
    pub request: IntakeRequest,
    ticket: u32,
}

impl IntakeEnvelope {
    pub fn ticket(&self) -> u32 {
        self.ticket
    }
}

// ---------------------------------------------------------------------------
// Mailbox
// ---------------------------------------------------------------------------

pub struct IntakeMailbox {
    requests: Channel<CriticalSectionRawMutex, IntakeEnvelope, INTAKE_DEPTH>,
    reply: Signal<CriticalSectionRawMutex, (u32, Result<IntakeReply>)>,
    gate: Mutex<()>,
    next_ticket: AtomicU32,
    timeout: Duration,
}

impl IntakeMailbox {
    pub const fn new() -> Self {
        Self::with_timeout(REPLY_TIMEOUT)
    }

    pub const fn with_timeout(timeout: Duration) -> Self {
        Self {
            requests: Channel::new(),
            reply: Signal::new(),
            gate: Mutex::new(()),
            next_ticket: AtomicU32::new(1),
            timeout,
        }
    }

    /// Post a request and block until the coordinator answers.
    pub fn submit_blocking(&self, origin: Origin, request: IntakeRequest) -> Result<IntakeReply> {
        let _gate = match self.gate.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        self.reply.reset();
        self.requests
            .try_send(IntakeEnvelope {
                origin,
                request,
                ticket,
            })
            .map_err(|_| Error::InvalidState("intake queue full"))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some((t, result)) = self.reply.try_take() {
                if t == ticket {
                    return result;
                }
                // Stale reply for a caller that already timed out.
                continue;
            }
            if Instant::now() >= deadline {
                warn!("IntakeMailbox: request #{} timed out", ticket);
                return Err(Error::Timeout);
            }
            std::thread::sleep(REPLY_POLL);
        }
    }

    /// Coordinator side: next pending request, if any.
    pub fn try_next(&self) -> Option<IntakeEnvelope> {
        self.requests.try_receive().ok()
    }

    /// Coordinator side: answer a request taken with [`try_next`](Self::try_next).
    pub fn reply(&self, envelope_ticket: u32, result: Result<IntakeReply>) {
        self.reply.signal((envelope_ticket, result));
    }
}

impl Default for IntakeMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvisioningApi for IntakeMailbox {
    fn submit(&self, origin: Origin, request: IntakeRequest) -> Result<IntakeReply> {
        self.submit_blocking(origin, request)
    }
}

impl<T: ProvisioningApi + ?Sized> ProvisioningApi for &T {
    fn submit(&self, origin: Origin, request: IntakeRequest) -> Result<IntakeReply> {
        (**self).submit(origin, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_answered_through_the_signal() {
        let mailbox = Arc::new(IntakeMailbox::new());
        let worker = Arc::clone(&mailbox);
        let coord = std::thread::spawn(move || {
            loop {
                if let Some(env) = worker.try_next() {
                    assert_eq!(env.request, IntakeRequest::ListSaved);
                    worker.reply(env.ticket(), Ok(IntakeReply::Saved(Vec::new())));
                    break;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        });
        let reply = mailbox.submit_blocking(Origin::Http, IntakeRequest::ListSaved);
        coord.join().unwrap();
        assert_eq!(reply, Ok(IntakeReply::Saved(Vec::new())));
    }

    #[test]
    fn unanswered_request_times_out() {
        let mailbox = IntakeMailbox::with_timeout(Duration::from_millis(30));
        assert_eq!(
            mailbox.submit_blocking(Origin::Http, IntakeRequest::StatusQuery),
            Err(Error::Timeout)
        );
        // The abandoned request is still queued for the coordinator.
        assert!(mailbox.try_next().is_some());
    }

    #[test]
    fn errors_are_passed_through() {
        let mailbox = Arc::new(IntakeMailbox::new());
        let worker = Arc::clone(&mailbox);
        let coord = std::thread::spawn(move || {
            loop {
                if let Some(env) = worker.try_next() {
                    worker.reply(env.ticket(), Err(Error::NotFound));
                    break;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        });
        let ssid = Ssid::try_from("x").unwrap();
        let reply = mailbox.submit_blocking(Origin::Http, IntakeRequest::ConnectSaved { ssid });
        coord.join().unwrap();
        assert_eq!(reply, Err(Error::NotFound));
    }
}
