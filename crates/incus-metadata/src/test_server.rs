//! In-process guest API server for tests
//!
//! Serves canned replies on a Unix socket inside a temporary directory.
//! A route configured with several replies answers them in order and then
//! keeps repeating the last one.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::HOST;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
struct Reply {
    status: u16,
    body: String,
}

#[derive(Default)]
struct State {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<(String, String)>>,
    connections: AtomicUsize,
}

impl State {
    fn respond(&self, req: &Request<Incoming>) -> Response<Full<Bytes>> {
        let path = req.uri().path().to_string();
        let host = req
            .headers()
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.requests.lock().unwrap().push((path.clone(), host));

        let reply = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&path) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };
        let reply = reply.unwrap_or(Reply {
            status: 404,
            body: "not found".to_string(),
        });

        Response::builder()
            .status(StatusCode::from_u16(reply.status).unwrap())
            .body(Full::new(Bytes::from(reply.body)))
            .unwrap()
    }
}

/// Fake guest API listening on a temporary socket
pub(crate) struct FakeGuestApi {
    _dir: TempDir,
    path: PathBuf,
    state: Arc<State>,
    accept: JoinHandle<()>,
}

impl FakeGuestApi {
    pub(crate) async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sock");
        let listener = UnixListener::bind(&path).unwrap();
        let state = Arc::new(State::default());

        let accept_state = state.clone();
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                let state = accept_state.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let response = state.respond(&req);
                        async move { Ok::<_, Infallible>(response) }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self {
            _dir: dir,
            path,
            state,
            accept,
        }
    }

    /// Queue a reply for a route
    pub(crate) fn route(self, path: &str, status: u16, body: &str) -> Self {
        self.state
            .routes
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(Reply {
                status,
                body: body.to_string(),
            });
        self
    }

    /// Socket path
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Requested paths, in arrival order
    pub(crate) fn requests(&self) -> Vec<String> {
        self.state
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Host headers, in arrival order
    pub(crate) fn host_headers(&self) -> Vec<String> {
        self.state
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, host)| host.clone())
            .collect()
    }

    /// Number of requests received for a path
    pub(crate) fn hits(&self, path: &str) -> usize {
        self.requests().iter().filter(|p| *p == path).count()
    }

    /// Number of accepted connections
    pub(crate) fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }
}

impl Drop for FakeGuestApi {
    fn drop(&mut self) {
        self.accept.abort();
    }
}
