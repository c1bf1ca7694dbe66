// fake_pd.rs
//
// Placement rule and store label endpoints of the metadata service, served
// by axum on a random local port.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;

use br_core::StoreId;

#[derive(Default)]
pub struct FakePd {
    pub rules: Mutex<HashMap<(String, String), serde_json::Value>>,
    /// Current labels per store
    pub labels: Mutex<HashMap<StoreId, HashMap<String, String>>>,
    /// Label requests in arrival order
    pub label_requests: Mutex<Vec<StoreId>>,
}

impl FakePd {
    pub fn label(&self, store_id: StoreId, key: &str) -> Option<String> {
        self.labels
            .lock()
            .get(&store_id)
            .and_then(|labels| labels.get(key).cloned())
    }

    pub fn rule(&self, group: &str, id: &str) -> Option<serde_json::Value> {
        self.rules
            .lock()
            .get(&(group.to_string(), id.to_string()))
            .cloned()
    }

    pub fn has_rule(&self, group: &str, id: &str) -> bool {
        self.rules
            .lock()
            .contains_key(&(group.to_string(), id.to_string()))
    }
}

async fn post_rule(
    State(pd): State<Arc<FakePd>>,
    Json(rule): Json<serde_json::Value>,
) -> impl IntoResponse {
    let key = (
        rule["group_id"].as_str().unwrap_or_default().to_string(),
        rule["id"].as_str().unwrap_or_default().to_string(),
    );
    pd.rules.lock().insert(key, rule);
    StatusCode::OK
}

async fn get_rule(
    State(pd): State<Arc<FakePd>>,
    Path((group, id)): Path<(String, String)>,
) -> impl IntoResponse {
    match pd.rules.lock().get(&(group, id)) {
        Some(rule) => (StatusCode::OK, Json(rule.clone())),
        None => (StatusCode::NOT_FOUND, Json(serde_json::Value::Null)),
    }
}

async fn delete_rule(
    State(pd): State<Arc<FakePd>>,
    Path((group, id)): Path<(String, String)>,
) -> impl IntoResponse {
    pd.rules.lock().remove(&(group, id));
    StatusCode::OK
}

async fn post_label(
    State(pd): State<Arc<FakePd>>,
    Path(store_id): Path<StoreId>,
    Json(body): Json<HashMap<String, String>>,
) -> impl IntoResponse {
    pd.label_requests.lock().push(store_id);
    let mut labels = pd.labels.lock();
    let store_labels = labels.entry(store_id).or_default();
    for (key, value) in body {
        if value.is_empty() {
            store_labels.remove(&key);
        } else {
            store_labels.insert(key, value);
        }
    }
    StatusCode::OK
}

/// Start the server, returning its `host:port`
pub async fn serve(pd: Arc<FakePd>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let app = Router::new()
        .route("/pd/api/v1/config/rule", post(post_rule))
        .route(
            "/pd/api/v1/config/rule/:group/:id",
            get(get_rule).delete(delete_rule),
        )
        .route("/pd/api/v1/store/:id/label", post(post_label))
        .with_state(pd);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
