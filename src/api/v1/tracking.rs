use axum::{
    extract::{Path, State},
    Json,
};
use bson::oid::ObjectId;
use mongodb::options::FindOptions;
use serde::{Deserialize, Serialize};
use tap::TapFallible;

use crate::{
    error::Error,
    mongo_ext::Collection,
    util::{FormattedDateTime, ObjectIdString},
};

use super::parcel::{Parcel, ParcelCollection};

#[derive(Clone)]
pub struct TrackingEventCollection(pub Collection<TrackingEventModel>);

impl std::ops::Deref for TrackingEventCollection {
    type Target = Collection<TrackingEventModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Waypoint written by delivery instrumentation. This service only reads
/// them back, ordered by time.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TrackingEventModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub parcel_id: ObjectId,
    pub tracking_id: String,
    pub status: String,
    pub location: Option<String>,
    pub time: bson::DateTime,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TrackingEvent {
    pub id: ObjectIdString,
    pub status: String,
    pub location: Option<String>,
    pub time: FormattedDateTime,
}

impl From<TrackingEventModel> for TrackingEvent {
    fn from(value: TrackingEventModel) -> Self {
        Self {
            id: value.id.into(),
            status: value.status,
            location: value.location,
            time: value.time.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TrackingResponse {
    pub parcel: Parcel,
    pub events: Vec<TrackingEvent>,
}

/// Joins a parcel with its ordered event history. Zero events is a valid
/// history, an unknown tracking id is not.
pub async fn show(
    State(parcels): State<ParcelCollection>,
    State(events): State<TrackingEventCollection>,
    Path(tracking_id): Path<String>,
) -> Result<Json<TrackingResponse>, Error> {
    if tracking_id.is_empty() {
        return Err(Error::InvalidArgument("tracking_id"));
    }

    let parcel = parcels
        .find_one(bson::doc! { "tracking_id": &tracking_id }, None)
        .await?
        .ok_or(Error::NotFound("parcel"))
        .tap_err(|_| tracing::debug!("tried tracking unknown id"))?;

    let options = FindOptions::builder().sort(bson::doc! { "time": 1 }).build();

    let events = events
        .find_to_vec(bson::doc! { "tracking_id": &tracking_id }, options)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(TrackingResponse {
        parcel: parcel.into(),
        events,
    }))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::{extract::Path, Json};

    use crate::{api::v1::tests::bootstrap, error::Error};

    #[tokio::test]
    #[ignore = "requires a running MongoDB (set MONGODB_URI)"]
    async fn test_unknown_tracking_id() {
        let bootstrap = bootstrap().await;

        let error = super::show(
            bootstrap.parcel_collection(),
            bootstrap.tracking_collection(),
            Path("TRK-UNKNOWN".to_string()),
        )
        .await
        .unwrap_err();

        assert_matches!(error, Error::NotFound("parcel"));
    }

    #[tokio::test]
    #[ignore = "requires a running MongoDB (set MONGODB_URI)"]
    async fn test_known_parcel_with_no_events() {
        let bootstrap = bootstrap().await;

        let Json(parcel) = crate::api::v1::parcel::create(
            bootstrap.parcel_collection(),
            bootstrap.auth_user(),
            Json(crate::api::v1::parcel::CreateRequest {
                tracking_id: Some("TRK-EMPTY".to_string()),
                delivery_cost: None,
                rider_district: None,
                receiver_district: None,
                payment_status: None,
                extra: bson::Document::new(),
            }),
        )
        .await
        .unwrap();

        let Json(tracked) = super::show(
            bootstrap.parcel_collection(),
            bootstrap.tracking_collection(),
            Path(parcel.tracking_id.clone()),
        )
        .await
        .unwrap();

        assert_eq!(tracked.parcel.tracking_id, "TRK-EMPTY");
        assert!(tracked.events.is_empty());
    }
}
