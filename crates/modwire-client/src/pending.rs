//! In-flight requests keyed by transaction id.

use crate::ClientError;
use modwire_core::pdu::{ExceptionResponse, Request, Response};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

pub(crate) type Reply = oneshot::Sender<Result<Completion, ClientError>>;

/// Roughly thirty years; stands in for "never" when a delay does not fit.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + delay`, saturating to a far-future instant instead of overflowing.
pub(crate) fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Timestamps of one request, taken from the tokio clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestMetrics {
    /// When the caller issued the request.
    pub created_at: Instant,
    /// When its frame was handed to the transport.
    pub started_at: Instant,
    /// When the matching response frame arrived.
    pub received_at: Instant,
}

impl RequestMetrics {
    /// Time spent queued before the frame was written.
    pub fn wait_time(&self) -> Duration {
        self.started_at.saturating_duration_since(self.created_at)
    }

    /// Time between writing the frame and receiving the answer.
    pub fn transfer_time(&self) -> Duration {
        self.received_at.saturating_duration_since(self.started_at)
    }
}

/// A successfully answered request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub request: Request,
    pub response: Response,
    pub metrics: RequestMetrics,
}

impl Completion {
    /// Coil or discrete-input values, trimmed to the requested quantity.
    pub fn coils(&self) -> Option<Vec<bool>> {
        match &self.response {
            Response::ReadCoils(status) | Response::ReadDiscreteInputs(status) => {
                Some(status.bits(usize::from(self.request.quantity())))
            }
            _ => None,
        }
    }

    /// Register values of a holding or input register read.
    pub fn registers(&self) -> Option<&[u16]> {
        match &self.response {
            Response::ReadHoldingRegisters(data) | Response::ReadInputRegisters(data) => {
                Some(data.values())
            }
            _ => None,
        }
    }
}

/// A request together with the channel its outcome is delivered on.
///
/// Consumed by [`UserRequest::finish`], so an outcome is delivered at most
/// once.
#[derive(Debug)]
pub struct UserRequest {
    request: Request,
    unit_id: u8,
    timeout: Duration,
    created_at: Instant,
    reply: Reply,
}

impl UserRequest {
    pub(crate) fn new(
        request: Request,
        unit_id: u8,
        timeout: Duration,
        created_at: Instant,
        reply: Reply,
    ) -> Self {
        Self {
            request,
            unit_id,
            timeout,
            created_at,
            reply,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub(crate) fn finish(self, outcome: Result<Completion, ClientError>) {
        // The caller may have dropped its handle.
        let _ = self.reply.send(outcome);
    }

    pub(crate) fn fail(self, err: ClientError) {
        self.finish(Err(err));
    }
}

#[derive(Debug)]
struct Entry {
    user: UserRequest,
    started_at: Instant,
    deadline: Instant,
}

#[derive(Debug, Default)]
pub struct PendingTable {
    entries: HashMap<u16, Entry>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, transaction_id: u16) -> bool {
        self.entries.contains_key(&transaction_id)
    }

    /// Track `user` under `transaction_id`; its timeout starts at `now`.
    ///
    /// An id that is already pending is never overwritten: the new request
    /// fails with a protocol error instead.
    pub fn register(&mut self, transaction_id: u16, user: UserRequest, now: Instant) {
        if self.contains(transaction_id) {
            user.fail(ClientError::Protocol("transaction id already pending"));
            return;
        }
        let deadline = deadline_after(now, user.timeout);
        self.entries.insert(
            transaction_id,
            Entry {
                user,
                started_at: now,
                deadline,
            },
        );
    }

    /// Complete the request waiting on `transaction_id` with `pdu`.
    ///
    /// Returns `false` when nothing is waiting, e.g. for a response that
    /// arrives after its request timed out.
    pub fn resolve(&mut self, transaction_id: u16, unit_id: u8, pdu: &[u8], now: Instant) -> bool {
        let Some(entry) = self.entries.remove(&transaction_id) else {
            trace!(transaction_id, unit_id, pdu_len = pdu.len(), "discarding stale frame");
            return false;
        };

        let Entry {
            user, started_at, ..
        } = entry;
        let outcome = interpret(&user.request, user.unit_id, unit_id, pdu).map(|response| {
            Completion {
                request: user.request.clone(),
                response,
                metrics: RequestMetrics {
                    created_at: user.created_at,
                    started_at,
                    received_at: now,
                },
            }
        });
        debug!(
            transaction_id,
            unit_id,
            function = user.request.function_code().name(),
            ok = outcome.is_ok(),
            "request completed"
        );
        user.finish(outcome);
        true
    }

    /// Fail every request whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> usize {
        let expired: Vec<u16> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for transaction_id in &expired {
            if let Some(entry) = self.entries.remove(transaction_id) {
                debug!(
                    transaction_id = *transaction_id,
                    unit_id = entry.user.unit_id,
                    "request timed out"
                );
                entry.user.fail(ClientError::Timeout);
            }
        }
        expired.len()
    }

    /// Fail everything still pending with `err`.
    pub fn reject_all(&mut self, err: ClientError) {
        for (_, entry) in self.entries.drain() {
            entry.user.fail(err.clone());
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|entry| entry.deadline).min()
    }
}

fn interpret(
    request: &Request,
    expected_unit: u8,
    unit_id: u8,
    pdu: &[u8],
) -> Result<Response, ClientError> {
    if unit_id != expected_unit {
        return Err(ClientError::Protocol("unit id mismatch"));
    }
    let function = request.function_code();
    if let Some(exception) = ExceptionResponse::decode_expected(pdu, function)? {
        return Err(ClientError::Exception(exception));
    }
    let response = Response::decode_expected(pdu, function)?
        .ok_or(ClientError::Protocol("unexpected function code in response"))?;
    check_answer(request, &response)?;
    Ok(response)
}

fn check_answer(request: &Request, response: &Response) -> Result<(), ClientError> {
    let quantity = usize::from(request.quantity());
    match response {
        Response::ReadCoils(status) | Response::ReadDiscreteInputs(status) => {
            if status.capacity() < quantity {
                return Err(ClientError::Protocol("coil payload shorter than requested"));
            }
        }
        Response::ReadHoldingRegisters(data) | Response::ReadInputRegisters(data) => {
            if data.len() != quantity {
                return Err(ClientError::Protocol("register count mismatch"));
            }
        }
        _ => {
            if Response::from_request(request).as_ref() != Some(response) {
                return Err(ClientError::Protocol("write echo mismatch"));
            }
        }
    }
    Ok(())
}
