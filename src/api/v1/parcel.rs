use std::str::FromStr;

use axum::{
    extract::{Query, State},
    Json,
};
use bson::oid::ObjectId;
use mongodb::options::FindOptions;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::OffsetDateTime;

use crate::{
    error::Error,
    mongo_ext::{transaction_options, Collection},
    util::{FormattedDateTime, ObjectIdString, PathObjectId},
};

use super::{
    auth::AuthUser,
    rider::{RiderCollection, WorkStatus},
};

#[derive(Clone)]
pub struct ParcelCollection(pub Collection<ParcelModel>);

impl std::ops::Deref for ParcelCollection {
    type Target = Collection<ParcelModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Delivery progress of a parcel. Incoming status strings are normalized
/// into this closed set at the boundary; arbitrary strings are rejected.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ParcelStatus {
    #[default]
    Pending,
    #[serde(rename = "In-Transit")]
    InTransit,
    Delivered,
}

impl ParcelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::InTransit => "In-Transit",
            Self::Delivered => "Delivered",
        }
    }
}

impl FromStr for ParcelStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if s.eq_ignore_ascii_case("pending") {
            Ok(Self::Pending)
        } else if s.eq_ignore_ascii_case("in-transit")
            || s.eq_ignore_ascii_case("in_transit")
            || s.eq_ignore_ascii_case("in transit")
        {
            Ok(Self::InTransit)
        } else if s.eq_ignore_ascii_case("delivered") {
            Ok(Self::Delivered)
        } else {
            Err(Error::InvalidArgument("status"))
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Paid,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ParcelModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub tracking_id: String,
    pub created_by: String,

    #[serde(default)]
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub status: ParcelStatus,

    #[serde(default)]
    pub delivery_cost: Decimal,
    pub rider_district: Option<String>,
    pub receiver_district: Option<String>,

    pub assigned_rider_id: Option<ObjectId>,
    pub assigned_rider_name: Option<String>,
    pub assigned_rider_email: Option<String>,

    pub rider_earning: Option<Decimal>,

    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,

    /// Caller-supplied fields we do not model (receiver contact, weight,
    /// notes, ...) are carried through verbatim.
    #[serde(flatten)]
    pub extra: bson::Document,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Parcel {
    pub id: ObjectIdString,
    pub tracking_id: String,
    pub created_by: String,
    pub payment_status: PaymentStatus,
    pub status: ParcelStatus,
    pub delivery_cost: Decimal,
    pub rider_district: Option<String>,
    pub receiver_district: Option<String>,
    pub assigned_rider_id: Option<ObjectIdString>,
    pub assigned_rider_name: Option<String>,
    pub assigned_rider_email: Option<String>,
    pub rider_earning: Option<Decimal>,
    pub created_at: FormattedDateTime,
    pub updated_at: FormattedDateTime,

    #[serde(flatten)]
    pub extra: bson::Document,
}

impl From<ParcelModel> for Parcel {
    fn from(value: ParcelModel) -> Self {
        Self {
            id: value.id.into(),
            tracking_id: value.tracking_id,
            created_by: value.created_by,
            payment_status: value.payment_status,
            status: value.status,
            delivery_cost: value.delivery_cost,
            rider_district: value.rider_district,
            receiver_district: value.receiver_district,
            assigned_rider_id: value.assigned_rider_id.map(Into::into),
            assigned_rider_name: value.assigned_rider_name,
            assigned_rider_email: value.assigned_rider_email,
            rider_earning: value.rider_earning,
            created_at: value.created_at.into(),
            updated_at: value.updated_at.into(),
            extra: value.extra,
        }
    }
}

/// Earning rule applied when a parcel reaches Delivered: 30% of the
/// delivery cost when rider and receiver districts match (ignoring case),
/// 80% otherwise.
pub fn delivered_earning(
    delivery_cost: Decimal,
    rider_district: Option<&str>,
    receiver_district: Option<&str>,
) -> Decimal {
    let same_district = match (rider_district, receiver_district) {
        (Some(rider), Some(receiver)) => rider.trim().eq_ignore_ascii_case(receiver.trim()),
        _ => false,
    };

    let rate = if same_district {
        Decimal::new(3, 1)
    } else {
        Decimal::new(8, 1)
    };

    delivery_cost * rate
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateRequest {
    pub tracking_id: Option<String>,

    pub delivery_cost: Option<Decimal>,
    pub rider_district: Option<String>,
    pub receiver_district: Option<String>,

    pub payment_status: Option<PaymentStatus>,

    #[serde(flatten)]
    pub extra: bson::Document,
}

#[tracing::instrument(skip_all, fields(creator = ?user.email))]
pub async fn create(
    State(parcels): State<ParcelCollection>,
    user: AuthUser,
    Json(request): Json<CreateRequest>,
) -> Result<Json<Parcel>, Error> {
    let created_by = user.email.ok_or(Error::InvalidArgument("email"))?;

    let id = ObjectId::new();

    let model = ParcelModel {
        id,
        tracking_id: request
            .tracking_id
            .filter(|it| !it.is_empty())
            .unwrap_or_else(|| format!("TRK-{}", id.to_hex().to_uppercase())),
        created_by,
        payment_status: request.payment_status.unwrap_or_default(),
        status: ParcelStatus::Pending,
        delivery_cost: request.delivery_cost.unwrap_or_default(),
        rider_district: request.rider_district,
        receiver_district: request.receiver_district,
        assigned_rider_id: None,
        assigned_rider_name: None,
        assigned_rider_email: None,
        rider_earning: None,
        created_at: OffsetDateTime::now_utc().into(),
        updated_at: OffsetDateTime::now_utc().into(),
        extra: request.extra,
    };

    tracing::debug!("creating parcel {}", model.tracking_id);
    parcels.insert_one(&model, None).await?;

    Ok(Json(model.into()))
}

pub async fn show(
    State(parcels): State<ParcelCollection>,
    id: PathObjectId,
) -> Result<Json<Parcel>, Error> {
    let parcel = parcels
        .find_one_by_id(id.0)
        .await?
        .ok_or(Error::NotFound("parcel"))
        .tap_err(|_| tracing::debug!("tried accessing non existing parcel"))?;

    Ok(Json(parcel.into()))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IndexQuery {
    pub email: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IndexResponse {
    pub parcels: Vec<Parcel>,
}

pub async fn index(
    State(parcels): State<ParcelCollection>,
    _user: AuthUser,
    Query(query): Query<IndexQuery>,
) -> Result<Json<IndexResponse>, Error> {
    let filter = query
        .email
        .filter(|it| !it.is_empty())
        .map(|email| bson::doc! { "created_by": email });

    let options = FindOptions::builder()
        .sort(bson::doc! { "created_at": -1 })
        .build();

    let parcels = parcels
        .find_to_vec(filter, options)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(IndexResponse { parcels }))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AssignRequest {
    pub rider_id: ObjectIdString,
    pub rider_name: String,
    pub rider_email: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AssignResponse {
    pub parcel_modified: u64,
    pub rider_modified: u64,
}

/// Pins a rider to a parcel and forces the parcel In-Transit, while marking
/// the rider as out on delivery. Both documents are written in one
/// transaction; the caller still gets both modified-counts and must not
/// assume the parcel side matched.
#[tracing::instrument(skip_all, fields(parcel = %id.0, rider = %request.rider_id))]
pub async fn assign_rider(
    State(parcels): State<ParcelCollection>,
    State(riders): State<RiderCollection>,
    State(mongo): State<mongodb::Client>,
    id: PathObjectId,
    Json(request): Json<AssignRequest>,
) -> Result<Json<AssignResponse>, Error> {
    if request.rider_name.is_empty() {
        return Err(Error::InvalidArgument("rider_name"));
    }

    let now = bson::DateTime::from(OffsetDateTime::now_utc());

    let mut session = mongo.start_session(None).await?;
    session.start_transaction(transaction_options()).await?;

    let parcel = parcels
        .update_one_with_session(
            bson::doc! { "_id": id.0 },
            bson::doc! {
                "$set": {
                    "assigned_rider_id": request.rider_id.0,
                    "assigned_rider_name": &request.rider_name,
                    "assigned_rider_email": request.rider_email.as_deref(),
                    "status": ParcelStatus::InTransit.as_str(),
                    "updated_at": now,
                }
            },
            None,
            &mut session,
        )
        .await?;

    let rider = riders
        .update_one_with_session(
            bson::doc! { "_id": request.rider_id.0 },
            bson::doc! {
                "$set": {
                    "work_status": bson::to_bson(&WorkStatus::Delivery)?,
                    "last_assigned_parcel": id.0,
                    "last_assigned_at": now,
                }
            },
            None,
            &mut session,
        )
        .await?;

    session.commit_transaction().await?;

    if parcel.matched_count == 0 {
        tracing::warn!("rider assignment targeted a non existing parcel");
    }

    Ok(Json(AssignResponse {
        parcel_modified: parcel.modified_count,
        rider_modified: rider.modified_count,
    }))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SetStatusRequest {
    pub status: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SetStatusResponse {
    pub status: ParcelStatus,
    pub rider_earning: Option<Decimal>,
}

/// Status transition; reaching Delivered also settles the rider's earning
/// from the delivery cost and the district rule, in the same transaction.
#[tracing::instrument(skip_all, fields(parcel = %id.0, status = %request.status))]
pub async fn set_status(
    State(parcels): State<ParcelCollection>,
    State(mongo): State<mongodb::Client>,
    id: PathObjectId,
    Json(request): Json<SetStatusRequest>,
) -> Result<Json<SetStatusResponse>, Error> {
    let status = ParcelStatus::from_str(&request.status)?;

    let parcel = parcels
        .find_one_by_id(id.0)
        .await?
        .ok_or(Error::NotFound("parcel"))
        .tap_err(|_| tracing::debug!("tried transitioning non existing parcel"))?;

    let now = bson::DateTime::from(OffsetDateTime::now_utc());

    let mut session = mongo.start_session(None).await?;
    session.start_transaction(transaction_options()).await?;

    parcels
        .update_one_with_session(
            bson::doc! { "_id": id.0 },
            bson::doc! {
                "$set": {
                    "status": status.as_str(),
                    "updated_at": now,
                }
            },
            None,
            &mut session,
        )
        .await?;

    let mut rider_earning = None;

    if let ParcelStatus::Delivered = status {
        let earning = delivered_earning(
            parcel.delivery_cost,
            parcel.rider_district.as_deref(),
            parcel.receiver_district.as_deref(),
        );

        parcels
            .update_one_with_session(
                bson::doc! { "_id": id.0 },
                bson::doc! {
                    "$set": {
                        "rider_earning": bson::to_bson(&earning)?,
                    }
                },
                None,
                &mut session,
            )
            .await?;

        rider_earning = Some(earning);
    }

    session.commit_transaction().await?;

    Ok(Json(SetStatusResponse {
        status,
        rider_earning,
    }))
}
