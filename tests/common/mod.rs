#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use petchat::{app, db, AppState, Config};
use serde_json::{json, Value};
use tokio::{net::{TcpListener, TcpStream}, task::JoinHandle};
use tower::ServiceExt;
use uuid::Uuid;

pub const ADMIN: &str = "moderator";

pub struct TestApp {
    pub state: AppState,
    router: Router,
}

/// Loopback TCP relay in front of a served app. [`Proxy::sever`] cuts every
/// connection made so far while new ones keep working.
pub struct Proxy {
    pub url: String,
    links: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Proxy {
    pub fn sever(&self) {
        for link in self.links.lock().unwrap().drain(..) {
            link.abort();
        }
    }
}

pub struct TestUser {
    pub id: Uuid,
    pub token: String,
}

impl TestApp {
    pub async fn new() -> TestApp {
        let config = Config {
            admin_handles: vec![ADMIN.to_owned()],
            ..Config::default()
        };
        let db_pool = db::connect(&config.database_url).await.unwrap();
        let state = AppState::new(db_pool, config);
        TestApp { router: app(state.clone()), state }
    }

    pub async fn call(&self, method: Method, uri: &str, user: Option<&TestUser>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", user.token));
        }
        let body = match body {
            Some(body) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };

        let response = self.router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }

    /// Sends a GET and hands back the response with its body unread.
    pub async fn open(&self, uri: &str, user: &TestUser) -> Response {
        let request = Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", user.token))
            .body(Body::empty())
            .unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str, user: &TestUser) -> (StatusCode, Value) {
        self.call(Method::GET, uri, Some(user), None).await
    }

    pub async fn post(&self, uri: &str, user: &TestUser, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, Some(user), Some(body)).await
    }

    /// Serves the app on a loopback port and returns its base url.
    pub async fn serve(&self) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = self.router.clone();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    pub async fn serve_behind_proxy(&self) -> Proxy {
        let upstream = self.serve().await.trim_start_matches("http://").to_owned();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let links = Arc::new(Mutex::new(Vec::new()));

        let accepted = links.clone();
        tokio::spawn(async move {
            while let Ok((mut inbound, _)) = listener.accept().await {
                let upstream = upstream.clone();
                let link = tokio::spawn(async move {
                    if let Ok(mut outbound) = TcpStream::connect(&upstream).await {
                        let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                    }
                });
                accepted.lock().unwrap().push(link);
            }
        });

        Proxy { url: format!("http://{addr}"), links }
    }

    pub async fn login(&self, handle: &str) -> TestUser {
        let (status, body) = self.call(Method::POST, "/login", None, Some(json!({ "handle": handle }))).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        TestUser {
            id: id_of(&body),
            token: body["token"].as_str().unwrap().to_owned(),
        }
    }

    /// Registers a lost pet owned by `owner` and returns its id.
    pub async fn lost_pet(&self, owner: &TestUser) -> Uuid {
        let (status, body) = self.post("/pets", owner, json!({
            "name": "Biscuit",
            "species": "dog",
            "status": "lost",
            "description": "brown terrier, red collar",
        })).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        id_of(&body)
    }

    /// Submits a request from `requester` to the owner of `pet_id`.
    pub async fn submit(&self, requester: &TestUser, pet_id: Uuid) -> Uuid {
        let (status, body) = self.post("/requests", requester, json!({
            "pet_id": pet_id,
            "message": "I think I saw your dog near the park",
        })).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        id_of(&body)
    }

    pub async fn approve(&self, admin: &TestUser, request_id: Uuid) -> (StatusCode, Value) {
        self.post(&format!("/admin/requests/{request_id}/approve"), admin, json!({})).await
    }
}

pub fn id_of(body: &Value) -> Uuid {
    body["id"].as_str().unwrap().parse().unwrap()
}
