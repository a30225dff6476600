//! Stream ingress endpoints
//!
//! Contracts consumed by the gateway:
//! - POST   /streams/whip                                  start a WHIP publish
//! - DELETE /streams/whip                                  stop a WHIP publish
//! - GET    /streams/whip                                  service status (unauthenticated)
//! - POST   /streams/children/{child_id}/sessions          start a session (webrtc|rtmps)
//! - DELETE /streams/children/{child_id}/sessions/{id}     end a session
//! - POST   /streams/children/{child_id}/ingest            realtime ingest credentials
//! - GET    /streams/children/{child_id}/playback          viewer credentials (webrtc|hls)
//! - GET    /streams/children/{child_id}/vods              completed sessions

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use substream_core::models::{
    ChildId, MediaConstraints, PageRequest, PoolStatus, SessionId, StreamId,
};
use substream_core::service::{
    IngestDetails, PlaybackInfo, PlaybackMode, ProvisionMode, StartedSession,
};

use super::{auth::Caller, AppError, AppResult, AppState};

/// Create the streams router
pub fn create_streams_router() -> Router<AppState> {
    Router::new()
        .route(
            "/streams/whip",
            post(start_whip).delete(stop_whip).get(whip_status),
        )
        .route(
            "/streams/children/{child_id}/sessions",
            post(create_session),
        )
        .route(
            "/streams/children/{child_id}/sessions/{session_id}",
            delete(end_session),
        )
        .route("/streams/children/{child_id}/ingest", post(provision_ingest))
        .route("/streams/children/{child_id}/playback", get(get_playback))
        .route("/streams/children/{child_id}/vods", get(get_vods))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWhipRequest {
    pub child_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWhipResponse {
    pub stream_id: String,
    pub stage_arn: String,
    pub whip_url: String,
    pub publish_token: String,
    pub participant_id: String,
    pub expires_at: DateTime<Utc>,
    pub region: String,
    pub media_constraints: MediaConstraints,
}

/// POST /streams/whip
async fn start_whip(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<StartWhipRequest>,
) -> AppResult<(StatusCode, Json<StartWhipResponse>)> {
    let child_id = request
        .child_id
        .filter(|id| !id.is_empty())
        .map(ChildId::from_string)
        .ok_or_else(|| AppError::bad_request("childId is required"))?;

    state
        .session_manager
        .authorize_publisher(&child_id, &caller.0)
        .await?;

    let stream_id = StreamId::new();
    let allocation = state
        .stage_pool
        .allocate(stream_id.clone(), &caller.0, &child_id)
        .await?;

    if let Err(e) = state
        .session_manager
        .record_whip_start(&child_id, &caller.0, &allocation.stage_arn)
        .await
    {
        // Same treatment as a failed token mint: the entry goes back to
        // idle and the stage stays reusable
        state.stage_pool.rollback_allocation(&stream_id);
        return Err(e.into());
    }

    info!(stream_id = %allocation.stream_id, child_id = %child_id, "WHIP stream started");
    Ok((
        StatusCode::CREATED,
        Json(StartWhipResponse {
            stream_id: allocation.stream_id.to_string(),
            stage_arn: allocation.stage_arn,
            whip_url: allocation.whip_url,
            publish_token: allocation.publish_token,
            participant_id: allocation.participant_id,
            expires_at: allocation.expires_at,
            region: allocation.region,
            media_constraints: MediaConstraints::advertised(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopWhipRequest {
    pub stream_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopWhipResponse {
    pub success: bool,
    pub stream_id: String,
}

/// DELETE /streams/whip
async fn stop_whip(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<StopWhipRequest>,
) -> AppResult<Json<StopWhipResponse>> {
    let stream_id = request
        .stream_id
        .filter(|id| !id.is_empty())
        .map(StreamId::from_string)
        .ok_or_else(|| AppError::bad_request("streamId is required"))?;

    let entry = state
        .stage_pool
        .find_by_stream_id(&stream_id)
        .ok_or_else(|| AppError::not_found(format!("Unknown stream: {stream_id}")))?;

    state
        .session_manager
        .record_whip_stop(&entry.arn, &caller.0)
        .await?;
    state.stage_pool.release(&entry.arn).await;

    info!(stream_id = %stream_id, "WHIP stream stopped");
    Ok(Json(StopWhipResponse {
        success: true,
        stream_id: stream_id.to_string(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhipStatusResponse {
    pub enabled: bool,
    pub pool_status: PoolStatus,
    pub whip_endpoint: String,
    pub region: String,
    pub media_constraints: MediaConstraints,
}

/// GET /streams/whip (unauthenticated)
async fn whip_status(State(state): State<AppState>) -> Json<WhipStatusResponse> {
    Json(WhipStatusResponse {
        enabled: true,
        pool_status: state.stage_pool.status(),
        whip_endpoint: state.issuer.whip_url().to_string(),
        region: state.issuer.region().to_string(),
        media_constraints: MediaConstraints::advertised(),
    })
}

#[derive(Debug, Deserialize)]
pub struct ModeQuery {
    pub mode: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantTokenBody {
    pub token: String,
    pub participant_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_token: Option<ParticipantTokenBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webrtc_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingest_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_key: Option<String>,
}

fn session_response(started: StartedSession) -> CreateSessionResponse {
    match (started.webrtc, started.rtmps) {
        (Some(webrtc), _) => CreateSessionResponse {
            session_id: started.session.id.to_string(),
            mode: "webrtc",
            stage_arn: Some(started.stage_arn),
            participant_token: Some(ParticipantTokenBody {
                token: webrtc.grant.token,
                participant_id: webrtc.grant.participant_id,
                expires_at: webrtc.grant.expires_at,
            }),
            webrtc_url: Some(webrtc.webrtc_url),
            ingest_endpoint: None,
            stream_key: None,
        },
        (None, Some(rtmps)) => CreateSessionResponse {
            session_id: started.session.id.to_string(),
            mode: "rtmps",
            stage_arn: None,
            participant_token: None,
            webrtc_url: None,
            ingest_endpoint: Some(rtmps.ingest_endpoint),
            stream_key: Some(rtmps.stream_key),
        },
        (None, None) => CreateSessionResponse {
            session_id: started.session.id.to_string(),
            mode: "webrtc",
            stage_arn: Some(started.stage_arn),
            participant_token: None,
            webrtc_url: None,
            ingest_endpoint: None,
            stream_key: None,
        },
    }
}

/// POST /streams/children/{child_id}/sessions?mode=webrtc|rtmps
async fn create_session(
    State(state): State<AppState>,
    caller: Caller,
    Path(child_id): Path<String>,
    Query(query): Query<ModeQuery>,
) -> AppResult<(StatusCode, Json<CreateSessionResponse>)> {
    let child_id = ChildId::from_string(child_id);
    let mode = match query.mode.as_deref() {
        Some(mode) => ProvisionMode::parse(mode)?,
        None => ProvisionMode::default(),
    };

    let started = state
        .provisioner
        .for_mode(mode)
        .create_session(&child_id, &caller.0)
        .await?;

    Ok((StatusCode::CREATED, Json(session_response(started))))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionResponse {
    pub success: bool,
    pub session_id: String,
}

/// DELETE /streams/children/{child_id}/sessions/{session_id}
async fn end_session(
    State(state): State<AppState>,
    caller: Caller,
    Path((_child_id, session_id)): Path<(String, String)>,
) -> AppResult<Json<EndSessionResponse>> {
    let session_id = SessionId::from_string(session_id);
    let session = state
        .session_manager
        .end_session(&session_id, &caller.0)
        .await?;

    Ok(Json(EndSessionResponse {
        success: true,
        session_id: session.id.to_string(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionIngestResponse {
    pub mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webrtc_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingest_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_key: Option<String>,
}

/// POST /streams/children/{child_id}/ingest?mode=webrtc|rtmps
async fn provision_ingest(
    State(state): State<AppState>,
    caller: Caller,
    Path(child_id): Path<String>,
    Query(query): Query<ModeQuery>,
) -> AppResult<Json<ProvisionIngestResponse>> {
    let child_id = ChildId::from_string(child_id);
    let mode = match query.mode.as_deref() {
        Some(mode) => ProvisionMode::parse(mode)?,
        None => ProvisionMode::default(),
    };

    let details = state
        .provisioner
        .for_mode(mode)
        .provision_ingest(&child_id, &caller.0)
        .await?;

    Ok(Json(match details {
        IngestDetails::Webrtc(ingest) => ProvisionIngestResponse {
            mode: "webrtc",
            stage_arn: Some(ingest.stage_arn),
            participant_token: Some(ingest.grant.token),
            participant_id: Some(ingest.grant.participant_id),
            expiration_time: Some(ingest.grant.expires_at),
            webrtc_url: Some(ingest.webrtc_url),
            ingest_endpoint: None,
            stream_key: None,
        },
        IngestDetails::Rtmps(ingest) => ProvisionIngestResponse {
            mode: "rtmps",
            stage_arn: None,
            participant_token: None,
            participant_id: None,
            expiration_time: None,
            webrtc_url: None,
            ingest_endpoint: Some(ingest.ingest_endpoint),
            stream_key: Some(ingest.stream_key),
        },
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hls_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer_participant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatusBody {
    pub is_live: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_live_at: Option<DateTime<Utc>>,
    pub participant_count: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackResponse {
    pub child_id: String,
    pub stage_arn: String,
    pub playback: PlaybackBody,
    pub status: PlaybackStatusBody,
}

impl From<PlaybackInfo> for PlaybackResponse {
    fn from(info: PlaybackInfo) -> Self {
        Self {
            child_id: info.child_id.to_string(),
            stage_arn: info.stage_arn,
            playback: PlaybackBody {
                hls_url: info.playback.hls_url,
                viewer_token: info.playback.viewer_token,
                viewer_participant_id: info.playback.viewer_participant_id,
                expires_at: info.playback.expires_at,
            },
            status: PlaybackStatusBody {
                is_live: info.status.is_live,
                current_session_id: info.status.current_session_id.map(|id| id.to_string()),
                last_live_at: info.status.last_live_at,
                participant_count: info.status.participant_count,
            },
        }
    }
}

/// GET /streams/children/{child_id}/playback?mode=webrtc|hls
async fn get_playback(
    State(state): State<AppState>,
    caller: Caller,
    Path(child_id): Path<String>,
    Query(query): Query<ModeQuery>,
) -> AppResult<Json<PlaybackResponse>> {
    let child_id = ChildId::from_string(child_id);
    let mode = match query.mode.as_deref() {
        Some(mode) => PlaybackMode::parse(mode)?,
        None => PlaybackMode::default(),
    };

    let info = state
        .provisioner
        .for_playback(mode)
        .get_playback(&child_id, &caller.0)
        .await?;

    Ok(Json(info.into()))
}

#[derive(Debug, Deserialize)]
pub struct VodsQuery {
    pub limit: Option<u32>,
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VodSessionBody {
    pub session_id: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VodsResponse {
    pub sessions: Vec<VodSessionBody>,
    pub pagination: substream_core::models::PageInfo,
}

/// GET /streams/children/{child_id}/vods?limit&cursor
async fn get_vods(
    State(state): State<AppState>,
    caller: Caller,
    Path(child_id): Path<String>,
    Query(query): Query<VodsQuery>,
) -> AppResult<Json<VodsResponse>> {
    let child_id = ChildId::from_string(child_id);
    let page = PageRequest::new(query.limit, query.cursor);

    let (sessions, pagination) = state
        .session_manager
        .list_vods(&child_id, &caller.0, page)
        .await?;

    Ok(Json(VodsResponse {
        sessions: sessions
            .into_iter()
            .map(|s| VodSessionBody {
                session_id: s.id.to_string(),
                status: s.status.as_str().to_string(),
                started_at: s.started_at,
                ended_at: s.ended_at,
            })
            .collect(),
        pagination,
    }))
}
