pub mod auth;
pub mod parcel;
pub mod payment;
pub mod rider;
pub mod tracking;
pub mod user;

#[cfg(test)]
pub mod tests {
    use std::sync::Arc;

    use axum::extract::State;
    use bson::oid::ObjectId;
    use time::OffsetDateTime;

    use crate::app::AppState;

    use super::auth::{test_support::StaticVerifier, AuthUser, IdentityVerifier};
    use super::parcel::ParcelCollection;
    use super::payment::{test_support::StaticGateway, PaymentCollection, PaymentGateway};
    use super::rider::{RiderCollection, RiderModel, RiderStatus, WorkStatus};
    use super::tracking::TrackingEventCollection;
    use super::user::UserCollection;

    const TEST_TOKEN: &str = "test-token";
    const TEST_EMAIL: &str = "admin@test.com";

    fn static_verifier() -> Arc<dyn IdentityVerifier> {
        Arc::new(StaticVerifier::default().with_token(TEST_TOKEN, "uid-admin", TEST_EMAIL))
    }

    /// State wired with in-memory identity and payment doubles. The mongo
    /// client inside is lazy, so this needs no running database as long as
    /// no collection is touched.
    pub async fn offline_state() -> AppState {
        AppState::new(
            "mongodb://localhost:27017",
            &test_database_name(),
            static_verifier(),
            Arc::new(StaticGateway::default()),
        )
        .await
        .unwrap()
    }

    fn test_database_name() -> String {
        format!("parcelhub-test-{}", ObjectId::new())
    }

    pub struct Bootstrap {
        pub app_state: AppState,
    }

    impl Bootstrap {
        pub fn db(&self) -> State<mongodb::Client> {
            State(self.app_state.mongo_client.clone())
        }

        pub fn auth_user(&self) -> AuthUser {
            AuthUser {
                uid: "uid-admin".to_string(),
                email: Some(TEST_EMAIL.to_string()),
            }
        }

        pub fn user_email(&self) -> String {
            TEST_EMAIL.to_string()
        }

        pub fn user_collection(&self) -> State<UserCollection> {
            State(self.app_state.user_collection.clone())
        }

        pub fn parcel_collection(&self) -> State<ParcelCollection> {
            State(self.app_state.parcel_collection.clone())
        }

        pub fn rider_collection(&self) -> State<RiderCollection> {
            State(self.app_state.rider_collection.clone())
        }

        pub fn payment_collection(&self) -> State<PaymentCollection> {
            State(self.app_state.payment_collection.clone())
        }

        pub fn tracking_collection(&self) -> State<TrackingEventCollection> {
            State(self.app_state.tracking_event_collection.clone())
        }

        pub fn gateway(&self) -> State<Arc<dyn PaymentGateway>> {
            State(self.app_state.payment_gateway.clone())
        }

        pub async fn seeded_rider_id(&self) -> ObjectId {
            let model = RiderModel {
                id: ObjectId::new(),
                name: "Seed Rider".to_string(),
                email: "seed-rider@test.com".to_string(),
                district: "Dhaka".to_string(),
                status: RiderStatus::Active,
                work_status: WorkStatus::Available,
                last_assigned_parcel: None,
                last_assigned_at: None,
                created_at: OffsetDateTime::now_utc().into(),
                extra: bson::Document::new(),
            };

            self.app_state
                .rider_collection
                .insert_one(&model, None)
                .await
                .unwrap();

            model.id
        }
    }

    /// Handler tests marked `#[ignore]` run against the MongoDB named by
    /// MONGODB_URI, each in a throwaway database.
    pub async fn bootstrap() -> Bootstrap {
        dotenvy::dotenv().ok();
        let mongodb_url = std::env::var("MONGODB_URI")
            .expect("Cannot retrieve MONGODB_URI from environment variable.");

        let gateway = StaticGateway::default()
            .with_intent("pi_settled", super::payment::IntentStatus::Succeeded, 10_000)
            .with_intent(
                "pi_pending",
                super::payment::IntentStatus::RequiresPaymentMethod,
                10_000,
            );

        let app_state = AppState::new(
            &mongodb_url,
            &test_database_name(),
            static_verifier(),
            Arc::new(gateway),
        )
        .await
        .unwrap();

        app_state.run_migration().await.unwrap();

        let _ = super::user::upsert_on_login(
            State(app_state.user_collection.clone()),
            axum::Json(super::user::UpsertRequest {
                email: TEST_EMAIL.to_string(),
                uid: Some("uid-admin".to_string()),
                name: Some("Admin".to_string()),
                image: None,
                provider: None,
                role: Some(super::user::UserRole::Admin),
            }),
        )
        .await
        .unwrap();

        Bootstrap { app_state }
    }
}
