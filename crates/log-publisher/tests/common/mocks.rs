// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock endpoint clients and observers

use log_publisher::client::{AsyncClient, BulkAck, BulkResult, EventAck};
use log_publisher::errors::ClientError;
use log_publisher::{Event, Observer, PipelineEvent};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// How the endpoint answers one bulk request.
pub struct Response {
    pub delay: Duration,
    pub result: BulkResult,
}

#[allow(dead_code)]
impl Response {
    pub fn ok() -> Self {
        Self {
            delay: Duration::ZERO,
            result: BulkResult::ok(),
        }
    }

    pub fn fail_all(events: &[Event], error: ClientError) -> Self {
        Self {
            delay: Duration::ZERO,
            result: BulkResult::failed(events.to_vec(), Some(error)),
        }
    }

    /// An acknowledgement that never arrives in test time.
    pub fn never() -> Self {
        Self {
            delay: Duration::from_secs(3600),
            result: BulkResult::ok(),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Decides the response from the requested events and how many earlier
/// requests started with the same source.
pub type Responder = Arc<dyn Fn(&[Event], usize) -> Response + Send + Sync>;

/// Calls seen by every client sharing the log.
#[derive(Clone, Default)]
pub struct ClientLog {
    calls: Arc<Mutex<Vec<Vec<Event>>>>,
    documents: Arc<Mutex<Vec<Value>>>,
    connects: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl ClientLog {
    fn record(&self, events: &[Event]) -> usize {
        let mut calls = self.calls.lock().expect("lock");
        let source = events.first().map(|e| e.source.clone());
        let attempt = calls
            .iter()
            .filter(|call| call.first().map(|e| e.source.clone()) == source)
            .count();
        calls.push(events.to_vec());
        self.documents
            .lock()
            .expect("lock")
            .extend(events.iter().map(Event::to_document));
        attempt
    }

    pub fn calls(&self) -> Vec<Vec<Event>> {
        self.calls.lock().expect("lock").clone()
    }

    /// Every event as encoded on the wire, in send order.
    pub fn documents(&self) -> Vec<Value> {
        self.documents.lock().expect("lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("lock").len()
    }

    /// Sources of the first event of each request, in request order.
    pub fn call_sources(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|call| call.first().map(|e| e.source.clone()))
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Scripted endpoint client
pub struct MockClient {
    connected: bool,
    connect_failures: usize,
    dispatch_failures: usize,
    responder: Responder,
    log: ClientLog,
}

#[allow(dead_code)]
impl MockClient {
    pub fn new(
        log: ClientLog,
        responder: impl Fn(&[Event], usize) -> Response + Send + Sync + 'static,
    ) -> Self {
        Self {
            connected: false,
            connect_failures: 0,
            dispatch_failures: 0,
            responder: Arc::new(responder),
            log,
        }
    }

    pub fn accepting(log: ClientLog) -> Self {
        Self::new(log, |_, _| Response::ok())
    }

    /// Fails the first `n` connects.
    pub fn with_connect_failures(mut self, n: usize) -> Self {
        self.connect_failures = n;
        self
    }

    /// Fails the first `n` dispatches before anything is sent.
    pub fn with_dispatch_failures(mut self, n: usize) -> Self {
        self.dispatch_failures = n;
        self
    }

    pub fn boxed(self) -> Box<dyn AsyncClient> {
        Box::new(self)
    }

    fn check_dispatch(&mut self) -> Result<(), ClientError> {
        if !self.connected {
            return Err(ClientError::NotConnected);
        }
        if self.dispatch_failures > 0 {
            self.dispatch_failures -= 1;
            return Err(ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "connection reset",
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl AsyncClient for MockClient {
    async fn connect(&mut self, _timeout: Duration) -> Result<(), ClientError> {
        self.log.connects.fetch_add(1, Ordering::SeqCst);
        if self.connect_failures > 0 {
            self.connect_failures -= 1;
            return Err(ClientError::Connection("connection refused".to_string()));
        }
        self.connected = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn publish_event(&mut self, event: &Event) -> Result<EventAck, ClientError> {
        self.check_dispatch()?;
        let events = std::slice::from_ref(event);
        let attempt = self.log.record(events);
        let Response { delay, result } = (self.responder)(events, attempt);

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let ack = match result.error {
                Some(err) if !result.failed.is_empty() => Err(err),
                _ => Ok(()),
            };
            let _ = tx.send(ack);
        });
        Ok(rx)
    }

    async fn publish_events(&mut self, events: &[Event]) -> Result<BulkAck, ClientError> {
        self.check_dispatch()?;
        let attempt = self.log.record(events);
        let Response { delay, result } = (self.responder)(events, attempt);

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(result);
        });
        Ok(rx)
    }
}

/// Observer keeping every pipeline event
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<PipelineEvent>>,
}

#[allow(dead_code)]
impl RecordingObserver {
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().expect("lock").clone()
    }

    pub fn count(&self, predicate: impl Fn(&PipelineEvent) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }

    pub fn connect_delays(&self) -> Vec<Duration> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::ConnectFailed { retry_in, .. } => Some(retry_in),
                _ => None,
            })
            .collect()
    }
}

impl Observer for RecordingObserver {
    fn observe(&self, event: &PipelineEvent) {
        self.events.lock().expect("lock").push(event.clone());
    }
}
