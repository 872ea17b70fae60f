use axum::{extract::State, Json};
use bson::oid::ObjectId;
use mongodb::options::FindOptions;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tap::TapFallible;
use time::OffsetDateTime;

use crate::{
    error::Error,
    mongo_ext::{transaction_options, Collection},
    util::{FormattedDateTime, ObjectIdString},
};

use super::{auth::AuthUser, parcel::ParcelCollection};

/// Settlement state of an external payment intent. Anything the processor
/// adds later lands in `Unknown` instead of failing deserialization.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Succeeded,
    Processing,
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    RequiresCapture,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl IntentStatus {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Processing => "processing",
            Self::RequiresPaymentMethod => "requires_payment_method",
            Self::RequiresConfirmation => "requires_confirmation",
            Self::RequiresAction => "requires_action",
            Self::RequiresCapture => "requires_capture",
            Self::Canceled => "canceled",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub status: IntentStatus,
    pub amount: i64,
}

#[derive(Debug, Clone)]
pub struct CreateIntent {
    pub amount_in_cents: i64,
    pub currency: String,
    pub parcel_id: String,
    pub payer_email: String,
}

#[axum::async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, request: CreateIntent) -> Result<PaymentIntent, Error>;

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, Error>;
}

/// Stripe-compatible gateway speaking the form-encoded payment-intent API.
#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

#[derive(Deserialize)]
struct GatewayErrorBody {
    error: GatewayErrorMessage,
}

#[derive(Deserialize)]
struct GatewayErrorMessage {
    message: String,
}

impl StripeGateway {
    pub fn new(base_url: String, secret_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            secret_key,
        }
    }

    pub fn new_from_env() -> Self {
        let secret_key = std::env::var("PAYMENT_SECRET_KEY")
            .expect("Cannot retrieve PAYMENT_SECRET_KEY from environment variable.");
        let base_url = std::env::var("PAYMENT_API_BASE")
            .unwrap_or_else(|_| "https://api.stripe.com".to_string());

        Self::new(base_url, secret_key)
    }

    async fn into_intent(response: reqwest::Response) -> Result<PaymentIntent, Error> {
        if !response.status().is_success() {
            let message = response
                .json::<GatewayErrorBody>()
                .await
                .map(|body| body.error.message)
                .unwrap_or_else(|_| "unparseable payment processor error".to_string());

            return Err(Error::UpstreamFailure(message))
                .tap_err(|err| tracing::error!("payment processor call failed: {}", err));
        }

        response.json().await.map_err(Into::into)
    }
}

#[axum::async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_intent(&self, request: CreateIntent) -> Result<PaymentIntent, Error> {
        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&[
                ("amount", request.amount_in_cents.to_string()),
                ("currency", request.currency),
                ("receipt_email", request.payer_email),
                ("metadata[parcel_id]", request.parcel_id),
                ("automatic_payment_methods[enabled]", "true".to_string()),
            ])
            .send()
            .await?;

        Self::into_intent(response).await
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, Error> {
        let response = self
            .client
            .get(format!("{}/v1/payment_intents/{}", self.base_url, intent_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        Self::into_intent(response).await
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaymentModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub payer_email: String,
    pub parcel_id: String,
    pub payment_intent_id: String,
    pub amount_in_cents: i64,

    pub created_at: bson::DateTime,
}

#[derive(Clone)]
pub struct PaymentCollection(pub Collection<PaymentModel>);

impl std::ops::Deref for PaymentCollection {
    type Target = Collection<PaymentModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Payment {
    pub id: ObjectIdString,
    pub payer_email: String,
    pub parcel_id: String,
    pub payment_intent_id: String,
    pub amount_in_cents: i64,
    pub created_at: FormattedDateTime,
}

impl From<PaymentModel> for Payment {
    fn from(value: PaymentModel) -> Self {
        Self {
            id: value.id.into(),
            payer_email: value.payer_email,
            parcel_id: value.parcel_id,
            payment_intent_id: value.payment_intent_id,
            amount_in_cents: value.amount_in_cents,
            created_at: value.created_at.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateIntentRequest {
    pub amount_in_cents: i64,
    pub parcel_id: String,
    pub payer_email: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateIntentResponse {
    pub payment_intent_id: String,
    pub client_secret: String,
}

pub async fn create_intent(
    State(gateway): State<Arc<dyn PaymentGateway>>,
    Json(request): Json<CreateIntentRequest>,
) -> Result<Json<CreateIntentResponse>, Error> {
    if request.amount_in_cents <= 0 {
        return Err(Error::InvalidArgument("amount_in_cents"))
            .tap_err(|_| tracing::debug!("rejected non-positive intent amount"));
    }

    let intent = gateway
        .create_intent(CreateIntent {
            amount_in_cents: request.amount_in_cents,
            currency: "usd".to_string(),
            parcel_id: request.parcel_id,
            payer_email: request.payer_email,
        })
        .await?;

    let client_secret = intent.client_secret.ok_or_else(|| {
        Error::UpstreamFailure("payment processor returned no client secret".to_string())
    })?;

    Ok(Json(CreateIntentResponse {
        payment_intent_id: intent.id,
        client_secret,
    }))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConfirmRequest {
    pub parcel_id: String,
    pub payment_intent_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConfirmResponse {
    pub parcel_modified: u64,
    pub payment_intent_id: String,
}

/// Marks the parcel paid once the processor reports the intent settled, and
/// records the payment. Both writes share one transaction; a replayed intent
/// id trips the unique index and surfaces as a conflict.
#[tracing::instrument(skip_all, fields(intent = %request.payment_intent_id))]
pub async fn confirm(
    State(parcels): State<ParcelCollection>,
    State(payments): State<PaymentCollection>,
    State(gateway): State<Arc<dyn PaymentGateway>>,
    State(mongo): State<mongodb::Client>,
    Json(request): Json<ConfirmRequest>,
) -> Result<Json<ConfirmResponse>, Error> {
    if request.parcel_id.is_empty() {
        return Err(Error::InvalidArgument("parcel_id"));
    }
    if request.payment_intent_id.is_empty() {
        return Err(Error::InvalidArgument("payment_intent_id"));
    }

    let intent = gateway.retrieve_intent(&request.payment_intent_id).await?;

    if !intent.status.is_succeeded() {
        return Err(Error::InvalidState(intent.status.as_str().to_string()))
            .tap_err(|_| tracing::debug!("tried confirming an unsettled intent"));
    }

    // The parcel id may arrive as a native ObjectId or as its literal string
    // form, depending on which client produced it.
    let filter = match request.parcel_id.parse::<ObjectId>() {
        Ok(id) => bson::doc! { "$or": [ { "_id": id }, { "_id": &request.parcel_id } ] },
        Err(_) => bson::doc! { "_id": &request.parcel_id },
    };

    let mut session = mongo.start_session(None).await?;
    session.start_transaction(transaction_options()).await?;

    let parcel = parcels
        .find_one_and_update_with_session(
            filter,
            bson::doc! {
                "$set": {
                    "payment_status": "Paid",
                    "updated_at": bson::DateTime::from(OffsetDateTime::now_utc()),
                }
            },
            None,
            &mut session,
        )
        .await?;

    let parcel_modified = u64::from(parcel.is_some());

    let parcel = match parcel {
        Some(parcel) => parcel,
        None => {
            session.abort_transaction().await?;
            return Err(Error::NotFound("parcel"));
        }
    };

    let payment = PaymentModel {
        id: ObjectId::new(),
        payer_email: parcel.created_by,
        parcel_id: request.parcel_id.clone(),
        payment_intent_id: request.payment_intent_id.clone(),
        amount_in_cents: intent.amount,
        created_at: OffsetDateTime::now_utc().into(),
    };

    if let Err(err) = payments
        .insert_one_with_session(&payment, None, &mut session)
        .await
    {
        session.abort_transaction().await?;
        return Err(Error::from(err).or_unique("payment_intent_id"));
    }

    session.commit_transaction().await?;

    Ok(Json(ConfirmResponse {
        parcel_modified,
        payment_intent_id: request.payment_intent_id,
    }))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaymentQuery {
    pub email: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaymentIndexResponse {
    pub payments: Vec<Payment>,
}

pub async fn index(
    State(payments): State<PaymentCollection>,
    user: AuthUser,
    axum::extract::Query(query): axum::extract::Query<PaymentQuery>,
) -> Result<Json<PaymentIndexResponse>, Error> {
    // Scoped to one payer: either the requested email or the caller's own.
    let email = query
        .email
        .or(user.email)
        .filter(|it| !it.is_empty())
        .ok_or(Error::InvalidArgument("email"))
        .tap_err(|_| tracing::debug!("payment listing without a payer email"))?;

    let filter = bson::doc! { "payer_email": email };

    let options = FindOptions::builder()
        .sort(bson::doc! { "created_at": -1 })
        .build();

    let payments = payments
        .find_to_vec(filter, options)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(PaymentIndexResponse { payments }))
}

#[cfg(test)]
pub mod test_support {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::error::Error;

    use super::{CreateIntent, IntentStatus, PaymentGateway, PaymentIntent};

    /// In-memory processor double. Created intents are retrievable and their
    /// settlement state can be seeded per test.
    #[derive(Default)]
    pub struct StaticGateway {
        intents: Mutex<HashMap<String, PaymentIntent>>,
    }

    impl StaticGateway {
        pub fn with_intent(self, id: &str, status: IntentStatus, amount: i64) -> Self {
            self.intents.lock().unwrap().insert(
                id.to_string(),
                PaymentIntent {
                    id: id.to_string(),
                    client_secret: Some(format!("{id}_secret")),
                    status,
                    amount,
                },
            );
            self
        }
    }

    #[axum::async_trait]
    impl PaymentGateway for StaticGateway {
        async fn create_intent(&self, request: CreateIntent) -> Result<PaymentIntent, Error> {
            let mut intents = self.intents.lock().unwrap();
            let id = format!("pi_test_{}", intents.len() + 1);
            let intent = PaymentIntent {
                id: id.clone(),
                client_secret: Some(format!("{id}_secret")),
                status: IntentStatus::RequiresPaymentMethod,
                amount: request.amount_in_cents,
            };
            intents.insert(id, intent.clone());
            Ok(intent)
        }

        async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, Error> {
            self.intents
                .lock()
                .unwrap()
                .get(intent_id)
                .cloned()
                .ok_or(Error::NotFound("payment intent"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use axum::{extract::State, Json};

    use crate::error::Error;

    use super::test_support::StaticGateway;
    use super::{IntentStatus, PaymentGateway};

    #[test]
    fn intent_status_parses_processor_wire_values() {
        let status: IntentStatus = serde_json::from_str("\"succeeded\"").unwrap();
        assert!(status.is_succeeded());

        let status: IntentStatus = serde_json::from_str("\"requires_payment_method\"").unwrap();
        assert_matches!(status, IntentStatus::RequiresPaymentMethod);

        // forward compatibility with statuses this build does not know
        let status: IntentStatus = serde_json::from_str("\"partially_funded\"").unwrap();
        assert_matches!(status, IntentStatus::Unknown);
        assert!(!status.is_succeeded());
    }

    #[tokio::test]
    async fn test_create_intent_rejects_non_positive_amount() {
        let gateway: Arc<dyn PaymentGateway> = Arc::new(StaticGateway::default());

        for amount in [0, -1, -2500] {
            let error = super::create_intent(
                State(gateway.clone()),
                Json(super::CreateIntentRequest {
                    amount_in_cents: amount,
                    parcel_id: "parcel".to_string(),
                    payer_email: "payer@test.com".to_string(),
                }),
            )
            .await
            .expect_err("non-positive amount should be rejected");

            assert_matches!(error, Error::InvalidArgument("amount_in_cents"));
        }
    }

    #[tokio::test]
    #[ignore = "requires a running MongoDB (set MONGODB_URI)"]
    async fn test_confirm_settled_intent_marks_paid_and_records_payment() {
        use crate::api::v1::{parcel, tests::bootstrap};
        use crate::util::PathObjectId;

        let bootstrap = bootstrap().await;

        let Json(parcel) = parcel::create(
            bootstrap.parcel_collection(),
            bootstrap.auth_user(),
            Json(parcel::CreateRequest {
                tracking_id: None,
                delivery_cost: None,
                rider_district: None,
                receiver_district: None,
                payment_status: None,
                extra: bson::Document::new(),
            }),
        )
        .await
        .unwrap();

        let Json(response) = super::confirm(
            bootstrap.parcel_collection(),
            bootstrap.payment_collection(),
            bootstrap.gateway(),
            bootstrap.db(),
            Json(super::ConfirmRequest {
                parcel_id: parcel.id.to_string(),
                payment_intent_id: "pi_settled".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.parcel_modified, 1);

        let Json(shown) = parcel::show(bootstrap.parcel_collection(), PathObjectId(parcel.id.0))
            .await
            .unwrap();
        assert_eq!(shown.payment_status, parcel::PaymentStatus::Paid);

        let recorded = bootstrap
            .app_state
            .payment_collection
            .find_one(bson::doc! { "payment_intent_id": "pi_settled" }, None)
            .await
            .unwrap()
            .expect("payment record should exist after confirm");
        assert_eq!(recorded.payer_email, bootstrap.user_email());
        assert_eq!(recorded.amount_in_cents, 10_000);

        // replaying the same intent trips the unique index
        let error = super::confirm(
            bootstrap.parcel_collection(),
            bootstrap.payment_collection(),
            bootstrap.gateway(),
            bootstrap.db(),
            Json(super::ConfirmRequest {
                parcel_id: parcel.id.to_string(),
                payment_intent_id: "pi_settled".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_matches!(error, Error::MustUniqueError(field) if field == "payment_intent_id");
    }

    #[tokio::test]
    #[ignore = "requires a running MongoDB (set MONGODB_URI)"]
    async fn test_confirm_unsettled_intent_leaves_parcel_unpaid() {
        use crate::api::v1::{parcel, tests::bootstrap};
        use crate::util::PathObjectId;

        let bootstrap = bootstrap().await;

        let Json(parcel) = parcel::create(
            bootstrap.parcel_collection(),
            bootstrap.auth_user(),
            Json(parcel::CreateRequest {
                tracking_id: None,
                delivery_cost: None,
                rider_district: None,
                receiver_district: None,
                payment_status: None,
                extra: bson::Document::new(),
            }),
        )
        .await
        .unwrap();

        let error = super::confirm(
            bootstrap.parcel_collection(),
            bootstrap.payment_collection(),
            bootstrap.gateway(),
            bootstrap.db(),
            Json(super::ConfirmRequest {
                parcel_id: parcel.id.to_string(),
                payment_intent_id: "pi_pending".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_matches!(error, Error::InvalidState(status) if status == "requires_payment_method");

        let Json(shown) = parcel::show(bootstrap.parcel_collection(), PathObjectId(parcel.id.0))
            .await
            .unwrap();
        assert_eq!(shown.payment_status, parcel::PaymentStatus::Unpaid);
    }

    #[tokio::test]
    async fn test_index_requires_a_payer_email() {
        use crate::api::v1::{auth::AuthUser, tests::offline_state};
        use axum::extract::Query;

        let state = offline_state().await;

        // claims without an email and no query fall through to a rejection
        // instead of an unscoped listing
        let error = super::index(
            State(state.payment_collection.clone()),
            AuthUser {
                uid: "uid-anon".to_string(),
                email: None,
            },
            Query(super::PaymentQuery { email: None }),
        )
        .await
        .unwrap_err();
        assert_matches!(error, Error::InvalidArgument("email"));

        let error = super::index(
            State(state.payment_collection.clone()),
            AuthUser {
                uid: "uid-anon".to_string(),
                email: None,
            },
            Query(super::PaymentQuery {
                email: Some(String::new()),
            }),
        )
        .await
        .unwrap_err();
        assert_matches!(error, Error::InvalidArgument("email"));
    }

    #[tokio::test]
    async fn test_create_intent_returns_client_secret() {
        let gateway: Arc<dyn PaymentGateway> = Arc::new(StaticGateway::default());

        let Json(response) = super::create_intent(
            State(gateway),
            Json(super::CreateIntentRequest {
                amount_in_cents: 2500,
                parcel_id: "parcel".to_string(),
                payer_email: "payer@test.com".to_string(),
            }),
        )
        .await
        .unwrap();

        assert_eq!(
            response.client_secret,
            format!("{}_secret", response.payment_intent_id)
        );
    }
}
