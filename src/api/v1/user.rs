use std::str::FromStr;

use axum::{
    extract::{Query, State},
    http::StatusCode,
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

use super::auth::AuthUser;

#[derive(Clone)]
pub struct UserCollection(pub Collection<UserModel>);

impl std::ops::Deref for UserCollection {
    type Target = Collection<UserModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Admin,
    Rider,
}

impl FromStr for UserRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if s.eq_ignore_ascii_case("user") {
            Ok(Self::User)
        } else if s.eq_ignore_ascii_case("admin") {
            Ok(Self::Admin)
        } else if s.eq_ignore_ascii_case("rider") {
            Ok(Self::Rider)
        } else {
            Err(Error::InvalidArgument("role"))
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub email: String,
    pub uid: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub provider: Option<String>,

    #[serde(default)]
    pub role: UserRole,

    pub created_at: bson::DateTime,
    pub last_login: bson::DateTime,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub id: ObjectIdString,
    pub email: String,
    pub name: Option<String>,
    pub image: Option<String>,
    pub role: UserRole,
    pub created_at: FormattedDateTime,
    pub last_login: FormattedDateTime,
}

impl From<UserModel> for User {
    fn from(value: UserModel) -> Self {
        Self {
            id: value.id.into(),
            email: value.email,
            name: value.name,
            image: value.image,
            role: value.role,
            created_at: value.created_at.into(),
            last_login: value.last_login.into(),
        }
    }
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct UpsertRequest {
    #[validate(email)]
    pub email: String,

    pub uid: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub provider: Option<String>,
    pub role: Option<UserRole>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UpsertResponse {
    pub created: bool,
    pub user: User,
}

/// Login upsert: first sight of an email inserts a directory record, a
/// repeat only refreshes `last_login`. A concurrent first-insert race is
/// caught by the unique email index and reported as a conflict.
pub async fn upsert_on_login(
    State(users): State<UserCollection>,
    Json(request): Json<UpsertRequest>,
) -> Result<(StatusCode, Json<UpsertResponse>), Error> {
    request.validate()?;

    let existing = users
        .find_one(bson::doc! { "email": &request.email }, None)
        .await?;

    if let Some(mut user) = existing {
        let now = bson::DateTime::from(OffsetDateTime::now_utc());

        users
            .update_one_by_id(user.id, bson::doc! { "$set": { "last_login": now } })
            .await?;
        user.last_login = now;

        return Ok((
            StatusCode::OK,
            Json(UpsertResponse {
                created: false,
                user: user.into(),
            }),
        ));
    }

    let model = UserModel {
        id: ObjectId::new(),
        email: request.email,
        uid: request.uid,
        name: request.name,
        image: request.image,
        provider: request.provider,
        role: request.role.unwrap_or_default(),
        created_at: OffsetDateTime::now_utc().into(),
        last_login: OffsetDateTime::now_utc().into(),
    };

    users
        .insert_one(&model, None)
        .await
        .map_err(|err| Error::from(err).or_unique("email"))
        .tap_err(|_| tracing::debug!("login upsert insert failed"))?;

    Ok((
        StatusCode::CREATED,
        Json(UpsertResponse {
            created: true,
            user: model.into(),
        }),
    ))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SearchQuery {
    pub query: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SearchResponse {
    pub users: Vec<User>,
}

pub async fn search(
    State(users): State<UserCollection>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, Error> {
    let query = match query.query.as_deref() {
        Some(query) if !query.is_empty() => regex_escape(query),
        _ => return Err(Error::InvalidArgument("query")),
    };

    let filter = bson::doc! {
        "$or": [
            { "email": { "$regex": &query, "$options": "i" } },
            { "name": { "$regex": &query, "$options": "i" } },
        ]
    };

    let options = FindOptions::builder().limit(10).build();

    let users = users
        .find_to_vec(filter, options)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(SearchResponse { users }))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SetRoleRequest {
    pub role: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SetRoleResponse {
    pub id: ObjectIdString,
    pub role: UserRole,
}

#[tracing::instrument(skip_all, fields(id = %id.0, role = %request.role))]
pub async fn set_role(
    State(users): State<UserCollection>,
    _user: AuthUser,
    id: PathObjectId,
    Json(request): Json<SetRoleRequest>,
) -> Result<Json<SetRoleResponse>, Error> {
    let role = UserRole::from_str(&request.role)?;

    let update = users
        .update_one_by_id(id.0, bson::doc! { "$set": { "role": bson::to_bson(&role)? } })
        .await?;

    if update.matched_count == 0 {
        return Err(Error::NotFound("user"))
            .tap_err(|_| tracing::debug!("tried setting role of unknown user"));
    }

    Ok(Json(SetRoleResponse {
        id: id.0.into(),
        role,
    }))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RoleQuery {
    pub email: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RoleResponse {
    pub role: UserRole,
}

pub async fn get_role(
    State(users): State<UserCollection>,
    Query(query): Query<RoleQuery>,
) -> Result<Json<RoleResponse>, Error> {
    let email = match query.email.as_deref() {
        Some(email) if !email.is_empty() => email,
        _ => return Err(Error::InvalidArgument("email")),
    };

    let user = users
        .find_one(bson::doc! { "email": email }, None)
        .await?
        .ok_or(Error::NotFound("user"))?;

    Ok(Json(RoleResponse { role: user.role }))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IndexResponse {
    pub users: Vec<User>,
}

pub async fn index(
    State(users): State<UserCollection>,
    _user: AuthUser,
) -> Result<Json<IndexResponse>, Error> {
    let options = FindOptions::builder()
        .sort(bson::doc! { "created_at": -1 })
        .build();

    let users = users
        .find_to_vec(None, options)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(IndexResponse { users }))
}
