//! Helpers shared by unit and integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::TransportError;
use crate::request::{Method, Request, Response};
use crate::transport::Transport;


/// One canned reply.
#[derive(Debug, Clone)]
pub enum Scripted {
    Status(u16, Value),
    Fail(String),
}

impl Scripted {
    pub fn ok(body: Value) -> Self {
        Scripted::Status(200, body)
    }

    pub fn unauthorized() -> Self {
        Scripted::Status(401, json!({ "message": "Unauthorized" }))
    }
}

/// A request as the transport saw it.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub path: String,
    pub request_id: Uuid,
    pub retried: bool,
}

/// Keeps a route's requests parked until [`Gate::open`] is called or the gate is dropped.
pub struct Gate {
    tx: watch::Sender<bool>,
}

impl Gate {
    pub fn open(&self) {
        let _ = self.tx.send(true);
    }
}

type Route = (Method, String);

/// In-memory [`Transport`] answering from per-route scripts.
///
/// Replies are consumed in order; the last one stays in place and answers every later
/// call. Unscripted routes answer 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<Route, VecDeque<Scripted>>>,
    gates: Mutex<HashMap<Route, watch::Receiver<bool>>>,
    calls: Mutex<Vec<Call>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append replies for `method path`.
    pub fn script<I>(&self, method: Method, path: &str, replies: I) -> &Self
    where
        I: IntoIterator<Item = Scripted>,
    {
        lock(&self.routes)
            .entry((method, path.to_string()))
            .or_default()
            .extend(replies);
        self
    }

    pub fn gate(&self, method: Method, path: &str) -> Gate {
        let (tx, rx) = watch::channel(false);
        lock(&self.gates).insert((method, path.to_string()), rx);
        Gate { tx }
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn calls_to(&self, method: Method, path: &str) -> Vec<Call> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .cloned()
            .collect()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.calls_to(method, path).len()
    }

    fn next_reply(&self, route: &Route) -> Option<Scripted> {
        let mut routes = lock(&self.routes);
        let queue = routes.get_mut(route)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, req: &Request) -> Result<Response, TransportError> {
        let route = (req.method, req.path.clone());
        lock(&self.calls).push(Call {
            method: req.method,
            path: req.path.clone(),
            request_id: req.id(),
            retried: req.is_retried(),
        });

        let gate = lock(&self.gates).get(&route).cloned();
        if let Some(mut rx) = gate {
            // A dropped sender counts as open.
            let _ = rx.wait_for(|open| *open).await;
        }

        match self.next_reply(&route) {
            Some(Scripted::Status(status, body)) => Ok(Response::new(status, body)),
            Some(Scripted::Fail(reason)) => Err(TransportError(reason)),
            None => Ok(Response::new(404, json!({ "message": "Route not found" }))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn last_reply_is_sticky() {
        let transport = ScriptedTransport::new();
        transport.script(
            Method::Get,
            "/user/me",
            [Scripted::unauthorized(), Scripted::ok(json!({"user": {}}))],
        );
        let req = Request::get("/user/me");
        assert_eq!(transport.send(&req).await.unwrap().status, 401);
        assert_eq!(transport.send(&req).await.unwrap().status, 200);
        assert_eq!(transport.send(&req).await.unwrap().status, 200);
        assert_eq!(transport.count(Method::Get, "/user/me"), 3);
        assert_eq!(
            transport.send(&Request::get("/nope")).await.unwrap().status,
            404
        );
    }
}
