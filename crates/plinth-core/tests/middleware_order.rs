mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{Routes, http};
use plinth_core::types::Scope;
use plinth_core::{Api, ApiError, App, AppConfig, Middleware, Request, Response, Result};
use proptest::prelude::*;

struct Layer {
    index: usize,
    fail_before: bool,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Middleware for Layer {
    async fn before_http(&self, _request: &mut Request) -> Result<()> {
        self.log.lock().unwrap().push(format!("before:{}", self.index));
        if self.fail_before {
            Err(ApiError::forbidden().into())
        } else {
            Ok(())
        }
    }

    async fn after_http(&self, _response: &mut Response) -> Result<()> {
        self.log.lock().unwrap().push(format!("after:{}", self.index));
        Ok(())
    }
}

fn expected(n: usize, fail_at: Option<usize>) -> Vec<String> {
    let ran = fail_at.map_or(n, |k| k + 1);
    let completed = fail_at.unwrap_or(n);
    let mut log: Vec<String> = (0..ran).map(|i| format!("before:{}", i)).collect();
    log.extend((0..completed).rev().map(|i| format!("after:{}", i)));
    log
}

fn run(n: usize, fail_at: Option<usize>) -> (u16, Vec<String>, usize, usize) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut builder = App::builder(AppConfig::default()).resolver(Routes::new().route(
        "/",
        Api::new("root", |_request: Request| async { Ok(Response::new("ok")) }),
    ));
    for index in 0..n {
        builder = builder.middleware(Layer {
            index,
            fail_before: fail_at == Some(index),
            log: log.clone(),
        });
    }
    let app = builder.build().unwrap();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let reply = runtime.block_on(http(&app, Scope::http("GET", "/"), b""));
    let content_length: usize = reply.header("Content-Length").unwrap().parse().unwrap();
    let entries = log.lock().unwrap().clone();
    (reply.status, entries, content_length, reply.body.len())
}

proptest! {
    #[test]
    fn prop_after_sweep_mirrors_completed_before_hooks(
        (n, fail_at) in (0usize..6).prop_flat_map(|n| {
            let fail = if n == 0 {
                Just(None).boxed()
            } else {
                proptest::option::of(0..n).boxed()
            };
            (Just(n), fail)
        })
    ) {
        let (status, log, content_length, body_len) = run(n, fail_at);
        prop_assert_eq!(log, expected(n, fail_at));
        prop_assert_eq!(status, if fail_at.is_some() { 403 } else { 200 });
        prop_assert_eq!(content_length, body_len);
    }
}

#[test]
fn test_every_completed_layer_runs_after_exactly_once() {
    let (_, log, _, _) = run(3, Some(2));
    assert_eq!(
        log,
        vec!["before:0", "before:1", "before:2", "after:1", "after:0"]
    );
}
