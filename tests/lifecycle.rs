//! Start/stop behaviour shared by every backend.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{config, engines, spawn};
use switchyard::{
    AxumEngine, Capability, Engine, Error, HyperEngine, Method, Router, StatusCode, boxed, handler_fn,
};

fn hello(router: &Router) {
    router.get("/hello", handler_fn(|ctx| {
        Box::pin(async move {
            ctx.text(StatusCode::OK, "hello");
            Ok(())
        })
    }));
}

fn slow(router: &Router) {
    router.get("/slow", handler_fn(|ctx| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            ctx.text(StatusCode::OK, "late");
            Ok(())
        })
    }));
}

#[tokio::test]
async fn stop_right_after_start_returns_cleanly() {
    for engine in engines(hello) {
        let serving = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.start().await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;

        engine.stop(Duration::from_secs(1)).await.unwrap();
        serving.await.unwrap().unwrap();
        assert!(!engine.is_running(), "{}", engine.name());
        assert_eq!(engine.local_addr(), None);
    }
}

#[tokio::test]
async fn stop_is_idempotent() {
    for engine in engines(hello) {
        engine.stop(Duration::from_millis(10)).await.unwrap();

        let running = spawn(engine).await;
        assert!(running.engine.is_running());
        running.engine.stop(Duration::from_secs(1)).await.unwrap();
        running.engine.stop(Duration::from_secs(1)).await.unwrap();
        running.serving.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn second_start_is_rejected() {
    for engine in engines(hello) {
        let running = spawn(engine).await;
        assert!(matches!(running.engine.start().await, Err(Error::Shutdown(_))));

        let res = reqwest::get(running.url("/hello")).await.unwrap();
        assert_eq!(res.text().await.unwrap(), "hello");
        running.shutdown().await.unwrap();
    }
}

#[tokio::test]
async fn in_flight_requests_finish_within_grace() {
    for engine in engines(slow) {
        let running = spawn(engine).await;
        let url = running.url("/slow");
        let request = tokio::spawn(async move { reqwest::get(url).await.unwrap().text().await.unwrap() });
        tokio::time::sleep(Duration::from_millis(200)).await;

        running.engine.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(request.await.unwrap(), "late");
        running.serving.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn expired_grace_is_reported_per_backend() {
    let hyper = Router::new();
    slow(&hyper);
    let hyper = spawn(Arc::new(HyperEngine::new(config(), hyper))).await;
    let url = hyper.url("/slow");
    let pending = tokio::spawn(async move { reqwest::get(url).await });
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(matches!(hyper.engine.stop(Duration::from_millis(50)).await, Err(Error::Shutdown(_))));
    assert!(pending.await.unwrap().is_err());
    hyper.serving.await.unwrap().unwrap();

    let axum = Router::new();
    slow(&axum);
    let axum = spawn(Arc::new(AxumEngine::new(config(), axum))).await;
    let url = axum.url("/slow");
    let pending = tokio::spawn(async move { reqwest::get(url).await });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stopped = axum.engine.stop(Duration::from_millis(50)).await;
    assert!(matches!(
        stopped,
        Err(Error::AdapterLimitation { adapter: "axum", capability: Capability::ForceClose })
    ));
    assert!(!axum.engine.is_running());
    assert_eq!(pending.await.unwrap().unwrap().text().await.unwrap(), "late");
    axum.serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn extended_methods_need_the_capability() {
    let webdav = |router: &Router| {
        router.on(Method::Propfind, "/dav", handler_fn(|ctx| {
            Box::pin(async move {
                ctx.text(StatusCode::MULTI_STATUS, "props");
                Ok(())
            })
        }));
    };

    let axum = AxumEngine::new(config(), Router::new());
    webdav(axum.router());
    assert!(!axum.supports(Capability::ExtendedMethods));
    assert!(matches!(
        axum.start().await,
        Err(Error::AdapterLimitation { adapter: "axum", capability: Capability::ExtendedMethods })
    ));
    assert!(!axum.is_running());

    let hyper = Arc::new(HyperEngine::new(config(), Router::new()));
    webdav(hyper.router());
    hyper.require(Capability::ExtendedMethods).unwrap();
    let running = spawn(hyper).await;
    let propfind = reqwest::Method::from_bytes(b"PROPFIND").unwrap();
    let res = common::client().request(propfind, running.url("/dav")).send().await.unwrap();
    assert_eq!(res.status(), 207);
    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn middleware_is_fixed_once_started() {
    for engine in engines(hello) {
        let running = spawn(engine).await;
        let late = boxed(handler_fn(|ctx| Box::pin(async move { ctx.next().await })));
        assert!(matches!(running.engine.use_middleware(late), Err(Error::Config(_))));
        running.shutdown().await.unwrap();
    }
}

#[tokio::test]
async fn parameter_names_must_agree_on_every_backend() {
    let items = |router: &Router| {
        router
            .get("/items/:id", handler_fn(|ctx| Box::pin(async move { ctx.next().await })))
            .post("/items/:item", handler_fn(|ctx| Box::pin(async move { ctx.next().await })));
    };

    for engine in engines(items) {
        assert!(matches!(engine.start().await, Err(Error::Config(_))), "{}", engine.name());
        assert!(!engine.is_running());
    }
}
