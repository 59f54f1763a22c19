#![allow(dead_code)]

mod ranges;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use hyper::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use rangecache_http_range::ByteRange;
use ranges::{interpret_range, RangeRequest};
use tokio::sync::oneshot;
use url::Url;

pub const BOUNDARY: &str = "3d6b6a416f9b5";
pub const CONTENT_TYPE_VALUE: &str = "video/mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One range → single part, several → `multipart/byteranges`.
    Ranges,
    /// Only the first requested range is served.
    FirstRangeOnly,
    /// `Range` is ignored; every `GET` gets `200` and the whole body.
    IgnoreRange,
}

#[derive(Default)]
pub struct Counters {
    pub head: AtomicUsize,
    pub get_range: AtomicUsize,
    pub get_full: AtomicUsize,
    pub multipart: AtomicUsize,
    pub with_token: AtomicUsize,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        for counter in [
            &self.head,
            &self.get_range,
            &self.get_full,
            &self.multipart,
            &self.with_token,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }
}

/// A local HTTP/1.1 server on its own thread and runtime, so blocking clients can talk to it from
/// plain `#[test]` functions.
///
/// The cache is keyed by the full URL, port included, so sessions that should share a cache must
/// talk to the same server; [`TestServer::set_mode`] and [`Counters::reset`] let one server play
/// several roles.
pub struct TestServer {
    pub url: Url,
    pub counters: Arc<Counters>,
    mode: Arc<Mutex<Mode>>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn start(data: Vec<u8>, mode: Mode) -> Self {
        let data = Arc::new(data);
        let counters = Arc::new(Counters::default());
        let mode = Arc::new(Mutex::new(mode));
        let (addr_tx, addr_rx) = std::sync::mpsc::channel::<SocketAddr>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = {
            let counters = counters.clone();
            let mode = mode.clone();
            std::thread::spawn(move || {
                let rt = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(2)
                    .enable_all()
                    .build()
                    .expect("runtime");
                rt.block_on(async move {
                    let make_svc = make_service_fn(move |_conn| {
                        let data = data.clone();
                        let counters = counters.clone();
                        let mode = mode.clone();
                        async move {
                            Ok::<_, Infallible>(service_fn(move |req| {
                                let mode = *mode.lock().unwrap();
                                handle_request(req, data.clone(), counters.clone(), mode)
                            }))
                        }
                    });

                    let addr: SocketAddr = ([127, 0, 0, 1], 0).into();
                    let builder = Server::try_bind(&addr).expect("bind");
                    addr_tx.send(builder.local_addr()).expect("report addr");
                    builder
                        .serve(make_svc)
                        .with_graceful_shutdown(async move {
                            let _ = shutdown_rx.await;
                        })
                        .await
                        .expect("serve");
                });
            })
        };

        let local_addr = addr_rx.recv().expect("server address");
        let url = Url::parse(&format!("http://{local_addr}/media/clip.mp4")).expect("url");
        Self {
            url,
            counters,
            mode,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        }
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.mode.lock().unwrap() = mode;
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Deterministic pseudo-random content so misplaced bytes are caught.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(2_654_435_761).rotate_left(7) as u8)
        .collect()
}

async fn handle_request(
    req: Request<Body>,
    data: Arc<Vec<u8>>,
    counters: Arc<Counters>,
    mode: Mode,
) -> Result<Response<Body>, Infallible> {
    if req.headers().contains_key("x-rangecache-token") {
        counters.with_token.fetch_add(1, Ordering::SeqCst);
    }

    let len = data.len() as u64;
    match *req.method() {
        Method::HEAD => {
            counters.head.fetch_add(1, Ordering::SeqCst);
            let resp = Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_LENGTH, len)
                .header(CONTENT_TYPE, CONTENT_TYPE_VALUE)
                .body(Body::empty())
                .unwrap();
            Ok(resp)
        }
        Method::GET => {
            let header = req.headers().get(RANGE).and_then(|v| v.to_str().ok());
            let request = match mode {
                Mode::IgnoreRange => RangeRequest::Whole,
                Mode::Ranges | Mode::FirstRangeOnly => interpret_range(header, len),
            };
            let mut ranges = match request {
                RangeRequest::Ranges(ranges) => ranges,
                RangeRequest::Whole => {
                    counters.get_full.fetch_add(1, Ordering::SeqCst);
                    return Ok(Response::builder()
                        .status(StatusCode::OK)
                        .header(CONTENT_LENGTH, len)
                        .header(CONTENT_TYPE, CONTENT_TYPE_VALUE)
                        .body(Body::from(data.as_ref().clone()))
                        .unwrap());
                }
                RangeRequest::Unsatisfiable => {
                    counters.get_range.fetch_add(1, Ordering::SeqCst);
                    return Ok(Response::builder()
                        .status(StatusCode::RANGE_NOT_SATISFIABLE)
                        .header(CONTENT_RANGE, format!("bytes */{len}"))
                        .body(Body::empty())
                        .unwrap());
                }
            };
            counters.get_range.fetch_add(1, Ordering::SeqCst);

            if mode == Mode::FirstRangeOnly {
                ranges.truncate(1);
            }

            if let [r] = ranges[..] {
                let body = data[r.start as usize..=r.end as usize].to_vec();
                return Ok(Response::builder()
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(CONTENT_LENGTH, body.len())
                    .header(CONTENT_TYPE, CONTENT_TYPE_VALUE)
                    .header(CONTENT_RANGE, format!("bytes {}-{}/{len}", r.start, r.end))
                    .body(Body::from(body))
                    .unwrap());
            }

            counters.multipart.fetch_add(1, Ordering::SeqCst);
            let body = multipart_body(&data, &ranges);
            Ok(Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(CONTENT_LENGTH, body.len())
                .header(
                    CONTENT_TYPE,
                    format!("multipart/byteranges; boundary={BOUNDARY}"),
                )
                .body(Body::from(body))
                .unwrap())
        }
        _ => Ok(Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .body(Body::empty())
            .unwrap()),
    }
}

fn multipart_body(data: &[u8], ranges: &[ByteRange]) -> Vec<u8> {
    let mut body = Vec::new();
    for r in ranges {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Type: {CONTENT_TYPE_VALUE}\r\nContent-Range: bytes {}-{}/{}\r\n\r\n",
                r.start,
                r.end,
                data.len()
            )
            .as_bytes(),
        );
        body.extend_from_slice(&data[r.start as usize..=r.end as usize]);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}
