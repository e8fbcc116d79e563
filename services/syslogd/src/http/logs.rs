use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};

use syslogd_protocol::Message;

use crate::state::AppState;

#[derive(Deserialize)]
pub struct LogQuery {
    md5: String,
    #[serde(default)]
    max: usize,
}

/// JSON wire form of a [`Message`], used by both `/log` and `/stream`.
#[derive(Serialize)]
pub struct MessageDto {
    pub received_epoch_millis: i64,
    pub priority: u8,
    pub severity: &'static str,
    pub facility: &'static str,
    pub hostname: String,
    pub tag: String,
    pub pid: u32,
    pub raw: String,
}

impl From<&Message> for MessageDto {
    fn from(m: &Message) -> Self {
        MessageDto {
            received_epoch_millis: m.received_epoch_millis,
            priority: m.priority,
            severity: m.severity(),
            facility: m.facility(),
            hostname: m.hostname.clone(),
            tag: m.tag.clone(),
            pid: m.pid,
            raw: String::from_utf8_lossy(&m.raw).into_owned(),
        }
    }
}

/// `GET /log?md5=<fingerprint>&max=<int>`: newest-first JSON array for the
/// bucket, or 404 if the fingerprint has never been written to.
pub async fn get_log(State(state): State<AppState>, Query(query): Query<LogQuery>) -> impl IntoResponse {
    match state.ring.query_last_fingerprint(&query.md5, query.max) {
        Some(messages) => {
            let dtos: Vec<MessageDto> = messages.iter().map(|m| MessageDto::from(m.as_ref())).collect();
            Json(dtos).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
