use std::str::FromStr;

use axum::{
    extract::{Query, State},
    Json,
};
use bson::oid::ObjectId;
use mongodb::options::FindOptions;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::OffsetDateTime;
use validator::Validate;

use crate::{
    error::Error,
    mongo_ext::Collection,
    util::{regex_escape, FormattedDateTime, ObjectIdString, PathObjectId},
};

use super::{
    parcel::{Parcel, ParcelCollection, ParcelStatus},
    user::{UserCollection, UserRole},
};

#[derive(Clone)]
pub struct RiderCollection(pub Collection<RiderModel>);

impl std::ops::Deref for RiderCollection {
    type Target = Collection<RiderModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Approval state of a rider. Entering `active` promotes the linked user to
/// the rider role; entering `pending` or `rejected` demotes it back.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiderStatus {
    #[default]
    Pending,
    Active,
    Rejected,
}

impl RiderStatus {
    pub fn linked_role(&self) -> UserRole {
        match self {
            Self::Active => UserRole::Rider,
            Self::Pending | Self::Rejected => UserRole::User,
        }
    }
}

impl FromStr for RiderStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if s.eq_ignore_ascii_case("pending") {
            Ok(Self::Pending)
        } else if s.eq_ignore_ascii_case("active") || s.eq_ignore_ascii_case("approved") {
            Ok(Self::Active)
        } else if s.eq_ignore_ascii_case("rejected") {
            Ok(Self::Rejected)
        } else {
            Err(Error::InvalidArgument("status"))
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkStatus {
    #[default]
    Available,
    Delivery,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RiderModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub name: String,
    pub email: String,
    pub district: String,

    #[serde(default)]
    pub status: RiderStatus,
    #[serde(default)]
    pub work_status: WorkStatus,

    pub last_assigned_parcel: Option<ObjectId>,
    pub last_assigned_at: Option<bson::DateTime>,

    pub created_at: bson::DateTime,

    #[serde(flatten)]
    pub extra: bson::Document,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Rider {
    pub id: ObjectIdString,
    pub name: String,
    pub email: String,
    pub district: String,
    pub status: RiderStatus,
    pub work_status: WorkStatus,
    pub last_assigned_parcel: Option<ObjectIdString>,
    pub last_assigned_at: Option<FormattedDateTime>,
    pub created_at: FormattedDateTime,

    #[serde(flatten)]
    pub extra: bson::Document,
}

impl From<RiderModel> for Rider {
    fn from(value: RiderModel) -> Self {
        Self {
            id: value.id.into(),
            name: value.name,
            email: value.email,
            district: value.district,
            status: value.status,
            work_status: value.work_status,
            last_assigned_parcel: value.last_assigned_parcel.map(Into::into),
            last_assigned_at: value.last_assigned_at.map(Into::into),
            created_at: value.created_at.into(),
            extra: value.extra,
        }
    }
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 124))]
    pub name: String,

    #[validate(email)]
    pub email: String,

    #[validate(length(min = 1))]
    pub district: String,

    pub status: Option<RiderStatus>,

    #[serde(flatten)]
    pub extra: bson::Document,
}

pub async fn register(
    State(riders): State<RiderCollection>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<Rider>, Error> {
    request.validate()?;

    let model = RiderModel {
        id: ObjectId::new(),
        name: request.name,
        email: request.email,
        district: request.district,
        status: request.status.unwrap_or_default(),
        work_status: WorkStatus::Available,
        last_assigned_parcel: None,
        last_assigned_at: None,
        created_at: OffsetDateTime::now_utc().into(),
        extra: request.extra,
    };

    tracing::debug!("registering rider {}", model.email);
    riders.insert_one(&model, None).await?;

    Ok(Json(model.into()))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RiderIndexResponse {
    pub riders: Vec<Rider>,
}

async fn list_by_status(
    riders: &RiderCollection,
    status: RiderStatus,
) -> Result<RiderIndexResponse, Error> {
    let options = FindOptions::builder()
        .sort(bson::doc! { "created_at": -1 })
        .build();

    let riders = riders
        .find_to_vec(bson::doc! { "status": bson::to_bson(&status)? }, options)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(RiderIndexResponse { riders })
}

pub async fn index_pending(
    State(riders): State<RiderCollection>,
) -> Result<Json<RiderIndexResponse>, Error> {
    list_by_status(&riders, RiderStatus::Pending).await.map(Json)
}

pub async fn index_active(
    State(riders): State<RiderCollection>,
) -> Result<Json<RiderIndexResponse>, Error> {
    list_by_status(&riders, RiderStatus::Active).await.map(Json)
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct SetStatusRequest {
    #[validate(length(min = 1))]
    pub status: String,

    #[validate(email)]
    pub email: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SetStatusResponse {
    pub id: ObjectIdString,
    pub status: RiderStatus,
    pub user_role_updated: bool,
}

/// Approval transition. The linked user's role follows the rider status,
/// but only best-effort: a missing user account is logged, never fatal.
#[tracing::instrument(skip_all, fields(rider = %id.0, status = %request.status))]
pub async fn set_status(
    State(riders): State<RiderCollection>,
    State(users): State<UserCollection>,
    id: PathObjectId,
    Json(request): Json<SetStatusRequest>,
) -> Result<Json<SetStatusResponse>, Error> {
    request.validate()?;

    let status = RiderStatus::from_str(&request.status)?;

    let update = riders
        .update_one_by_id(id.0, bson::doc! { "$set": { "status": bson::to_bson(&status)? } })
        .await?;

    if update.matched_count == 0 {
        return Err(Error::NotFound("rider"))
            .tap_err(|_| tracing::debug!("tried transitioning non existing rider"));
    }

    let role = status.linked_role();

    let user_role_updated = match users
        .update_one(
            bson::doc! { "email": &request.email },
            bson::doc! { "$set": { "role": bson::to_bson(&role)? } },
            None,
        )
        .await
    {
        Ok(result) => {
            if result.matched_count == 0 {
                tracing::warn!("no user record linked to rider email {}", request.email);
            }
            result.modified_count > 0
        }
        Err(err) => {
            tracing::warn!("failed to update linked user role: {}", err);
            false
        }
    };

    Ok(Json(SetStatusResponse {
        id: id.0.into(),
        status,
        user_role_updated,
    }))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DistrictQuery {
    pub district: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DistrictResponse {
    pub count: usize,
    pub riders: Vec<Rider>,
}

/// Active riders whose district contains the query, ignoring case. No match
/// is an ordinary empty response with `count = 0`, not an error.
pub async fn index_by_district(
    State(riders): State<RiderCollection>,
    Query(query): Query<DistrictQuery>,
) -> Result<Json<DistrictResponse>, Error> {
    let district = match query.district.as_deref() {
        Some(district) if !district.is_empty() => regex_escape(district),
        _ => return Err(Error::InvalidArgument("district")),
    };

    let filter = bson::doc! {
        "status": bson::to_bson(&RiderStatus::Active)?,
        "district": { "$regex": district, "$options": "i" },
    };

    let riders: Vec<Rider> = riders
        .find_to_vec(filter, None)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(DistrictResponse {
        count: riders.len(),
        riders,
    }))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RiderEmailQuery {
    pub email: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TaskIndexResponse {
    pub parcels: Vec<Parcel>,
}

/// Parcels still in flight for a rider: assigned to them and Pending or
/// In-Transit.
pub async fn index_tasks(
    State(parcels): State<ParcelCollection>,
    Query(query): Query<RiderEmailQuery>,
) -> Result<Json<TaskIndexResponse>, Error> {
    let email = match query.email.as_deref() {
        Some(email) if !email.is_empty() => email,
        _ => return Err(Error::InvalidArgument("email")),
    };

    let filter = bson::doc! {
        "assigned_rider_email": email,
        "status": {
            "$in": [ParcelStatus::Pending.as_str(), ParcelStatus::InTransit.as_str()]
        },
    };

    let parcels = parcels
        .find_to_vec(filter, None)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(TaskIndexResponse { parcels }))
}

pub async fn index_completed(
    State(parcels): State<ParcelCollection>,
    Query(query): Query<RiderEmailQuery>,
) -> Result<Json<TaskIndexResponse>, Error> {
    let email = match query.email.as_deref() {
        Some(email) if !email.is_empty() => email,
        _ => return Err(Error::InvalidArgument("email")),
    };

    let filter = bson::doc! {
        "assigned_rider_email": email,
        "status": ParcelStatus::Delivered.as_str(),
    };

    let options = FindOptions::builder()
        .sort(bson::doc! { "created_at": -1 })
        .build();

    let parcels = parcels
        .find_to_vec(filter, options)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(TaskIndexResponse { parcels }))
}
