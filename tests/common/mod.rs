//! Helpers shared by the engine integration suites.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use switchyard::{AxumEngine, Engine, EngineConfig, HyperEngine, Router};
use tokio::task::JoinHandle;

/// A started engine plus the task driving `start`.
pub struct Running {
    pub engine: Arc<dyn Engine>,
    pub addr: SocketAddr,
    pub serving: JoinHandle<switchyard::Result<()>>,
}

impl Running {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Stops the engine and returns what `start` returned.
    pub async fn shutdown(self) -> switchyard::Result<()> {
        self.engine.stop(Duration::from_secs(5)).await?;
        self.serving.await.expect("serving task panicked")
    }
}

pub fn config() -> EngineConfig {
    EngineConfig::default().with_addr(([127, 0, 0, 1], 0).into())
}

/// One engine of each backend, each with its own router built by `routes`.
pub fn engines(routes: impl Fn(&Router)) -> Vec<Arc<dyn Engine>> {
    let hyper = Router::new();
    routes(&hyper);
    let axum = Router::new();
    routes(&axum);
    vec![Arc::new(HyperEngine::new(config(), hyper)), Arc::new(AxumEngine::new(config(), axum))]
}

/// Spawns `start` and waits until the engine reports its bound address.
pub async fn spawn(engine: Arc<dyn Engine>) -> Running {
    let serving = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.start().await }
    });

    for _ in 0..400 {
        if let Some(addr) = engine.local_addr() {
            return Running { engine, addr, serving };
        }
        if serving.is_finished() {
            panic!("{} engine exited during start: {:?}", engine.name(), serving.await);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{} engine did not start", engine.name());
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().redirect(reqwest::redirect::Policy::none()).build().unwrap()
}

/// The parts of a response that must agree across backends.
#[derive(Debug, PartialEq)]
pub struct Observed {
    pub status: u16,
    pub json: Option<serde_json::Value>,
    /// `type/subtype` without parameters.
    pub content_type: Option<String>,
    pub location: Option<String>,
    pub has_request_id: bool,
    /// `name=value` of every `Set-Cookie`, attributes dropped.
    pub cookies: Vec<String>,
}

pub async fn observe(res: reqwest::Response) -> Observed {
    let header = |name: &str| res.headers().get(name).and_then(|v| v.to_str().ok()).map(str::to_owned);

    let status = res.status().as_u16();
    let content_type = header("content-type").map(|ct| ct.split(';').next().unwrap_or_default().trim().to_owned());
    let location = header("location");
    let has_request_id = res.headers().contains_key("x-request-id");
    let mut cookies: Vec<String> = res
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or_default().trim().to_owned())
        .collect();
    cookies.sort();

    let body = res.bytes().await.unwrap();
    let json = serde_json::from_slice(&body).ok();
    Observed { status, json, content_type, location, has_request_id, cookies }
}

/// Sends the same request to every running engine and asserts the observed
/// responses agree. Returns the agreed observation.
pub async fn equivalent<F>(running: &[Running], request: F) -> Observed
where
    F: Fn(&reqwest::Client, &Running) -> reqwest::RequestBuilder,
{
    let client = client();
    let mut seen: Vec<(&'static str, Observed)> = Vec::new();
    for run in running {
        let res = request(&client, run).send().await.unwrap();
        seen.push((run.engine.name(), observe(res).await));
    }

    let (first_name, first) = seen.remove(0);
    for (name, other) in &seen {
        assert_eq!(&first, other, "{first_name} and {name} disagree");
    }
    first
}
