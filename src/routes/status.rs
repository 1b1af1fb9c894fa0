use axum::response::Json;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Serialize)]
pub struct Health {
    status: &'static str,
}

pub async fn greeting() -> Json<Value> {
    Json(json!({ "Hello": "World" }))
}

pub async fn healthcheck() -> Json<Health> {
    Json(Health {
        status: "Available",
    })
}
