//! Scripted HTTP client for unit tests

use super::transport::{HttpClient, Response, TransportError};
use std::collections::HashMap;
use std::sync::Mutex;

/// One scripted answer to a GET
#[derive(Debug, Clone)]
pub enum Scripted {
    Chunks(u16, Vec<Vec<u8>>),
    Network(String),
}

impl Scripted {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::Chunks(200, vec![body.into()])
    }

    pub fn status(status: u16) -> Self {
        Self::Chunks(status, Vec::new())
    }

    pub fn chunks(chunks: Vec<Vec<u8>>) -> Self {
        Self::Chunks(200, chunks)
    }

    pub fn network(message: &str) -> Self {
        Self::Network(message.to_string())
    }

    fn respond(&self) -> Result<Response, TransportError> {
        match self {
            Self::Chunks(status, chunks) => Ok(Response::from_chunks(
                *status,
                chunks.iter().filter(|c| !c.is_empty()).cloned().collect(),
            )),
            Self::Network(message) => Err(TransportError::Network(message.clone())),
        }
    }
}

/// Answers are consumed in order per URL; the last one repeats.
/// Unknown URLs get a 404.
#[derive(Default)]
pub struct FakeClient {
    routes: Mutex<HashMap<String, Vec<Scripted>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, url: &str, answer: Scripted) -> Self {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push(answer);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

impl HttpClient for FakeClient {
    async fn get(&self, url: &str, _headers: &[(&str, &str)]) -> Result<Response, TransportError> {
        self.calls.lock().unwrap().push(url.to_string());

        let answer = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(url) {
                Some(queue) if queue.len() > 1 => Some(queue.remove(0)),
                Some(queue) => queue.first().cloned(),
                None => None,
            }
        };

        match answer {
            Some(answer) => answer.respond(),
            None => Ok(Response::from_bytes(404, "404: Not Found")),
        }
    }
}
