use std::ops::{Deref, DerefMut};

use bson::oid::ObjectId;
use serde::de::DeserializeOwned;

use crate::error::Error;

pub struct Collection<T>(pub mongodb::Collection<T>);

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Collection<T> {
    type Target = mongodb::Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for Collection<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<T> From<mongodb::Collection<T>> for Collection<T> {
    fn from(value: mongodb::Collection<T>) -> Self {
        Self(value)
    }
}

/// Options shared by every multi-document mutation: snapshot reads and
/// majority-acknowledged writes against the primary.
pub fn transaction_options() -> mongodb::options::TransactionOptions {
    mongodb::options::TransactionOptions::builder()
        .read_concern(mongodb::options::ReadConcern::snapshot())
        .write_concern(
            mongodb::options::WriteConcern::builder()
                .w(mongodb::options::Acknowledgment::Majority)
                .build(),
        )
        .selection_criteria(mongodb::options::SelectionCriteria::ReadPreference(
            mongodb::options::ReadPreference::Primary,
        ))
        .build()
}

impl<T> Collection<T>
where
    T: DeserializeOwned + Send + Sync + Unpin,
{
    pub async fn find_one_by_id(&self, id: ObjectId) -> Result<Option<T>, Error> {
        self.find_one(
            bson::doc! {
                "_id": id,
            },
            None,
        )
        .await
        .map_err(Into::into)
    }

    pub async fn update_one_by_id(
        &self,
        id: ObjectId,
        update: impl Into<mongodb::options::UpdateModifications>,
    ) -> Result<mongodb::results::UpdateResult, Error> {
        self.update_one(
            bson::doc! {
                "_id": id,
            },
            update,
            None,
        )
        .await
        .map_err(Into::into)
    }

    /// Drain a filtered cursor into a vec. Every list endpoint goes through
    /// here, so sort/limit options are passed straight to the driver.
    pub async fn find_to_vec(
        &self,
        filter: impl Into<Option<bson::Document>>,
        options: impl Into<Option<mongodb::options::FindOptions>>,
    ) -> Result<Vec<T>, Error> {
        let mut cursor = self.find(filter, options).await?;

        let mut items = vec![];

        while cursor.advance().await? {
            items.push(cursor.deserialize_current()?);
        }

        Ok(items)
    }
}
