use std::sync::Arc;

use axum::extract::FromRef;

use crate::api::v1::{
    auth::{HttpIdentityVerifier, IdentityVerifier},
    parcel::ParcelCollection,
    payment::{PaymentCollection, PaymentGateway, StripeGateway},
    rider::RiderCollection,
    tracking::TrackingEventCollection,
    user::UserCollection,
};
use crate::migrate::MigrationCollection;

/// Everything a request handler can reach: the store handle, one typed
/// wrapper per collection, and the two external-service adapters. Built
/// once at startup and cloned per request.
#[derive(FromRef, Clone)]
pub struct AppState {
    pub mongo_client: mongodb::Client,

    pub user_collection: UserCollection,
    pub parcel_collection: ParcelCollection,
    pub rider_collection: RiderCollection,
    pub payment_collection: PaymentCollection,
    pub tracking_event_collection: TrackingEventCollection,
    pub migrate_collection: MigrationCollection,

    pub identity_verifier: Arc<dyn IdentityVerifier>,
    pub payment_gateway: Arc<dyn PaymentGateway>,
}

impl AppState {
    pub async fn new(
        mongo_url: &str,
        database_name: &str,
        identity_verifier: Arc<dyn IdentityVerifier>,
        payment_gateway: Arc<dyn PaymentGateway>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let mongo_client_opt = mongodb::options::ClientOptions::parse(mongo_url).await?;
        let mongo_client = mongodb::Client::with_options(mongo_client_opt)?;

        let db = mongo_client.database(database_name);

        Ok(Self {
            mongo_client,

            user_collection: UserCollection(db.collection("users").into()),
            parcel_collection: ParcelCollection(db.collection("parcels").into()),
            rider_collection: RiderCollection(db.collection("riders").into()),
            payment_collection: PaymentCollection(db.collection("payments").into()),
            tracking_event_collection: TrackingEventCollection(
                db.collection("tracking_events").into(),
            ),
            migrate_collection: MigrationCollection(db.collection("migrations").into()),

            identity_verifier,
            payment_gateway,
        })
    }

    pub async fn new_from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let mongodb_url = std::env::var("MONGODB_URI")
            .expect("Cannot retrieve MONGODB_URI from environment variable.");
        let database_name =
            std::env::var("MONGODB_DATABASE").unwrap_or_else(|_| "parcelhub".to_string());

        Self::new(
            &mongodb_url,
            &database_name,
            Arc::new(HttpIdentityVerifier::new_from_env()),
            Arc::new(StripeGateway::new_from_env()),
        )
        .await
    }
}
