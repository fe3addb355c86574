//! Scripted transport for unit tests.

use super::transport::{RawResponse, Transport, TransportError, TransportFuture, WireRequest};
use crate::config::TransportKind;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// What the transport does for one attempt.
#[derive(Clone)]
pub(crate) enum Step {
    Respond(u16, String),
    Fail(TransportError),
    /// Never completes; only a timeout or cancellation ends the attempt.
    Hang,
}

/// Plays back a script of steps, repeating the last one when exhausted.
pub(crate) struct ScriptedTransport {
    kind: TransportKind,
    script: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    pub(crate) seen: Mutex<Vec<(tokio::time::Instant, WireRequest)>>,
}

impl ScriptedTransport {
    pub(crate) fn new(kind: TransportKind, steps: Vec<Step>) -> Self {
        Self {
            kind,
            script: Mutex::new(steps.into()),
            last: Mutex::new(None),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn always(status: u16, body: &str) -> Self {
        Self::new(
            TransportKind::Buffered,
            vec![Step::Respond(status, body.to_string())],
        )
    }

    pub(crate) fn attempts(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub(crate) fn requests(&self) -> Vec<WireRequest> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub(crate) fn instants(&self) -> Vec<tokio::time::Instant> {
        self.seen.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    fn next_step(&self) -> Step {
        let mut script = self.script.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        if let Some(step) = script.pop_front() {
            *last = Some(step.clone());
            step
        } else {
            last.clone().unwrap_or(Step::Hang)
        }
    }
}

impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn execute<'a>(
        &'a self,
        request: &'a WireRequest,
        _cancel: &'a CancellationToken,
    ) -> TransportFuture<'a> {
        self.seen
            .lock()
            .unwrap()
            .push((tokio::time::Instant::now(), request.clone()));
        let step = self.next_step();
        Box::pin(async move {
            match step {
                Step::Respond(status, body) => Ok(RawResponse { status, body }),
                Step::Fail(e) => Err(e),
                Step::Hang => futures::future::pending().await,
            }
        })
    }
}

pub(crate) const OK_BODY: &str = r#"{"success":true,"data":{"enhancedPrompt":"better prompt","additionalContext":"ctx","suggestions":["a","b"]}}"#;
