//! End-to-end over a real socket: startup wiring, peer address and shutdown.

use std::time::Duration;

use api_engine::config::AppConfig;
use api_engine::http::{adapt, Json, RemoteAddr, RequestId};
use api_engine::lifecycle::{build_engines, build_server, Shutdown};
use api_engine::session::Session;
use serde_json::{json, Value};
use tokio::net::TcpListener;

#[tokio::test]
async fn test_serves_over_tcp_and_stops_on_shutdown() {
    let config = AppConfig::default();
    let engines = build_engines(&config).unwrap();
    let mut server = build_server(&config, &engines);
    server
        .get(
            "/whoami",
            vec![adapt(|RemoteAddr(addr): RemoteAddr, RequestId(id): RequestId| async move {
                Json(json!({
                    "ip": addr.map(|a| a.ip().to_string()),
                    "request_id": id,
                }))
            })],
        )
        .unwrap();
    server
        .post(
            "/visit",
            vec![adapt(|session: Session| async move {
                let visits = session.get_as::<i64>("visits").unwrap_or(0) + 1;
                session.set("visits", visits);
                Json(json!({ "visits": visits }))
            })],
        )
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let stop = shutdown.clone();
    let task = tokio::spawn(async move { server.into_service().run(listener, &stop).await });

    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let response = client
        .get(format!("{base}/whoami"))
        .header("x-request-id", "req-42")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("x-request-id").unwrap().to_str().unwrap(),
        "req-42"
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"ip": "127.0.0.1", "request_id": "req-42"}));

    // The first visit issues the session cookie; echo it back by hand.
    let response = client.post(format!("{base}/visit")).send().await.unwrap();
    let cookie = response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|line| line.starts_with("_session_id="))
        .and_then(|line| line.split(';').next())
        .unwrap()
        .to_string();
    assert_eq!(response.json::<Value>().await.unwrap(), json!({"visits": 1}));

    let response = client
        .post(format!("{base}/visit"))
        .header("cookie", cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(response.json::<Value>().await.unwrap(), json!({"visits": 2}));

    let response = client.get(format!("{base}/nowhere")).send().await.unwrap();
    assert_eq!(response.status(), 404);

    drop(client);
    shutdown.trigger();
    let stopped = tokio::time::timeout(Duration::from_secs(5), task).await;
    assert!(matches!(stopped, Ok(Ok(Ok(())))));
}
