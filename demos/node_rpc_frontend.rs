//! Minimal standalone embedding: wires up the HTTP front-end the way a node
//! binary would — register handlers, init, start, serve, interrupt, stop.
//!
//! Run with `cargo run --example node_rpc_frontend`, then from another shell:
//!
//!     curl http://127.0.0.1:18332/status
//!     curl -X POST http://127.0.0.1:18332/wallet/balance -d '{}'

use std::sync::Arc;
use std::time::Duration;

use httpserver::{HttpRequest, HttpServer, HttpServerConfig};

fn status_handler(_config: &HttpServerConfig, request: HttpRequest, _path_tail: String) {
    request.write_reply(http::StatusCode::OK, "ok");
}

fn wallet_handler(_config: &HttpServerConfig, request: HttpRequest, path_tail: String) {
    let body = format!("wallet endpoint, tail = {path_tail:?}");
    request.write_reply(http::StatusCode::OK, body);
}

fn main() {
    env_logger::init();

    let config = HttpServerConfig {
        rpc_port: 18332,
        ..HttpServerConfig::default()
    };

    let mut server = HttpServer::new(config);
    server.init().expect("failed to init HTTP server");

    server
        .register_handler("/status", true, Arc::new(status_handler))
        .expect("register_handler must succeed before start");
    server
        .register_handler("/wallet/", false, Arc::new(wallet_handler))
        .expect("register_handler must succeed before start");

    server.start().expect("failed to start HTTP server");
    log::info!("listening on 127.0.0.1:18332 and [::1]:18332; Ctrl-C to stop");

    // A real node binary would wait on its own shutdown sentinel here.
    std::thread::sleep(Duration::from_secs(60));

    server.interrupt().expect("interrupt failed");
    server.stop().expect("stop failed");
}
