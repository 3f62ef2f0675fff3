use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use convoy_core::{
    ConvoyId, ConvoySnapshot, Coordinate, DestinationInput, PositionRecord, UserId,
};

use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

/// Coordinate in the short `{lat, lon}` wire form
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl From<Coordinate> for LatLon {
    fn from(value: Coordinate) -> Self {
        Self {
            lat: value.latitude,
            lon: value.longitude,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub convoy_id: String,
    pub user_id: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub convoy_id: ConvoyId,
    pub destination: Option<LatLon>,
    pub members: Vec<UserId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRequest {
    pub convoy_id: String,
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRequest {
    pub convoy_id: String,
    pub user_id: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Serialize)]
pub struct PositionResponse {
    pub status: &'static str,
    pub record: PositionRecord,
}

/// Either free text (`text`) or a literal `lat`/`lon` pair
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRequest {
    pub convoy_id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
}

impl DestinationRequest {
    fn input(&self) -> AppResult<DestinationInput> {
        match (&self.text, self.lat, self.lon) {
            (Some(text), None, None) => Ok(DestinationInput::parse(text)?),
            (None, Some(lat), Some(lon)) => Ok(Coordinate::new(lat, lon)?.into()),
            _ => Err(AppError::bad_request(
                "destination needs either `text` or both `lat` and `lon`",
            )),
        }
    }
}

pub async fn join_convoy_handler(
    State(state): State<AppState>,
    Json(request): Json<JoinRequest>,
) -> AppResult<Json<JoinResponse>> {
    let convoy_id = ConvoyId::parse(request.convoy_id)?;
    let user_id = UserId::parse(request.user_id)?;

    let snapshot = state
        .service
        .join(&convoy_id, &user_id, &request.display_name)
        .await?;

    Ok(Json(JoinResponse {
        members: snapshot.member_ids(),
        destination: snapshot.destination.map(LatLon::from),
        convoy_id: snapshot.convoy_id,
    }))
}

pub async fn leave_convoy_handler(
    State(state): State<AppState>,
    Json(request): Json<MemberRequest>,
) -> AppResult<Json<Value>> {
    let convoy_id = ConvoyId::parse(request.convoy_id)?;
    let user_id = UserId::parse(request.user_id)?;

    let removed = state.service.leave(&convoy_id, &user_id).await?;
    if !removed {
        debug!(convoy = %convoy_id, user = %user_id, "leave for non-member ignored");
    }

    Ok(Json(json!({ "status": "ok" })))
}

pub async fn update_position_handler(
    State(state): State<AppState>,
    Json(request): Json<PositionRequest>,
) -> AppResult<Json<PositionResponse>> {
    let convoy_id = ConvoyId::parse(request.convoy_id)?;
    let user_id = UserId::parse(request.user_id)?;

    let record = state
        .service
        .update_position(&convoy_id, &user_id, request.lat, request.lon)
        .await?;

    Ok(Json(PositionResponse {
        status: "ok",
        record,
    }))
}

pub async fn set_destination_handler(
    State(state): State<AppState>,
    Json(request): Json<DestinationRequest>,
) -> AppResult<Json<LatLon>> {
    let convoy_id = ConvoyId::parse(request.convoy_id.clone())?;
    let input = request.input()?;

    let coordinate = state.service.set_destination(&convoy_id, input).await?;
    Ok(Json(coordinate.into()))
}

pub async fn get_convoy_handler(
    State(state): State<AppState>,
    Path(convoy_id): Path<String>,
) -> AppResult<Json<ConvoySnapshot>> {
    let convoy_id = ConvoyId::parse(convoy_id)?;
    Ok(Json(state.service.snapshot(&convoy_id)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(text: Option<&str>, lat: Option<f64>, lon: Option<f64>) -> DestinationRequest {
        DestinationRequest {
            convoy_id: "roadtrip".into(),
            text: text.map(str::to_string),
            lat,
            lon,
        }
    }

    #[test]
    fn destination_request_accepts_one_form() {
        assert!(matches!(
            request(Some("Eiffel Tower"), None, None).input(),
            Ok(DestinationInput::Text(_))
        ));
        assert!(matches!(
            request(None, Some(48.8566), Some(2.3522)).input(),
            Ok(DestinationInput::Coordinate(_))
        ));

        let mixed = request(Some("Eiffel Tower"), Some(1.0), Some(2.0))
            .input()
            .unwrap_err();
        assert_eq!(mixed.status, axum::http::StatusCode::BAD_REQUEST);

        let half = request(None, Some(1.0), None).input().unwrap_err();
        assert_eq!(half.code, "invalid_argument");

        let out_of_range = request(None, Some(91.0), Some(0.0)).input().unwrap_err();
        assert_eq!(out_of_range.status, axum::http::StatusCode::BAD_REQUEST);
    }
}
