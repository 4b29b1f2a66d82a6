use serde_json::{Map, Value};
use std::future::Future;
use std::time::Duration;

/// Process variables from a JSON object; anything else gives no variable
pub fn variables(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Poll `check` until it returns true or `timeout` elapses.
/// Returns whether the condition was met.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let poll = async {
        loop {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(timeout, poll).await.is_ok()
}
