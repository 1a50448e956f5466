use axum::Json;

/// Gateway discovery: where clients should open their WebSocket.
pub async fn get_gateway() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "data": {
            "url": "wss://gateway.chorus.local/ws?v=1&encoding=json"
        }
    }))
}
