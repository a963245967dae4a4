//! Requests waiting for a reply, oldest first
use std::collections::VecDeque;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::errors::VexAckType;
use crate::responses::{HostFrame, ReplyFilter, Response};

pub(crate) struct PendingRequest {
    pub id: u64,
    pub filter: ReplyFilter,
    responder: oneshot::Sender<Response>,
    timer: Option<JoinHandle<()>>,
}

impl PendingRequest {
    /// Hands the response to the waiting caller and stops the timer
    pub fn resolve(self, response: Response) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        // The caller may have given up waiting
        let _ = self.responder.send(response);
    }

    /// Resolves the request with a timeout and leaves its timer running.
    ///
    /// Timers expire the oldest request, not their own, so every timer
    /// has to fire for every queued request to be expired.
    pub fn expire(mut self) {
        // Dropping the handle detaches the task
        drop(self.timer.take());
        let _ = self.responder.send(Response::Ack(VexAckType::Timeout));
    }
}

#[derive(Default)]
pub(crate) struct PendingQueue {
    next_id: u64,
    entries: VecDeque<PendingRequest>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a request and returns its id
    pub fn push(&mut self, filter: ReplyFilter, responder: oneshot::Sender<Response>) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.entries.push_back(PendingRequest {
            id,
            filter,
            responder,
            timer: None,
        });
        id
    }

    /// Attaches the timeout timer of a request. A request that is
    /// already gone gets its timer cancelled.
    pub fn set_timer(&mut self, id: u64, timer: JoinHandle<()>) {
        match self.entries.iter_mut().find(|entry| entry.id == id) {
            Some(entry) => entry.timer = Some(timer),
            None => timer.abort(),
        }
    }

    /// Removes the oldest request that accepts `frame`
    pub fn take_match(&mut self, frame: &HostFrame) -> Option<PendingRequest> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.filter.matches(frame))?;
        self.entries.remove(index)
    }

    pub fn pop_oldest(&mut self) -> Option<PendingRequest> {
        self.entries.pop_front()
    }

    pub fn remove(&mut self, id: u64) -> Option<PendingRequest> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        self.entries.remove(index)
    }

    pub fn drain(&mut self) -> Vec<PendingRequest> {
        self.entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
