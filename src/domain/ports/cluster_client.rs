use async_trait::async_trait;

use crate::domain::errors::ClientError;
use crate::domain::models::{
    ClusterObject, ClusterResource, LabelSelector, ObjectKind, ObjectRef, PropagationPolicy,
};

/// Port for reading and writing platform objects.
///
/// Implementations map their own failures onto [`ClientError`] so that the
/// convergence waiter can tell transient read failures from fatal ones.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List objects of `kind`, optionally restricted to a namespace, whose
    /// labels match `selector`.
    async fn list_objects(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<ClusterObject>, ClientError>;

    /// Fetch one object by name.
    async fn get_object(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<ClusterObject, ClientError>;

    /// Create an object and return it as stored (generated names resolved).
    async fn create_object(&self, object: ClusterObject) -> Result<ClusterObject, ClientError>;

    /// Replace an existing object and return it as stored.
    async fn update_object(&self, object: ClusterObject) -> Result<ClusterObject, ClientError>;

    async fn delete_object(
        &self,
        target: &ObjectRef,
        propagation: PropagationPolicy,
    ) -> Result<(), ClientError>;
}

/// Typed helpers over [`ClusterClient`].
#[async_trait]
pub trait ClusterClientExt: ClusterClient {
    async fn list<T: ClusterResource>(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<T>, ClientError> {
        self.list_objects(T::KIND, namespace, selector)
            .await?
            .into_iter()
            .map(T::try_from)
            .collect()
    }

    async fn get<T: ClusterResource>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<T, ClientError> {
        T::try_from(self.get_object(T::KIND, namespace, name).await?)
    }

    async fn create<T: ClusterResource>(&self, object: T) -> Result<T, ClientError> {
        T::try_from(self.create_object(object.into()).await?)
    }

    async fn update<T: ClusterResource>(&self, object: T) -> Result<T, ClientError> {
        T::try_from(self.update_object(object.into()).await?)
    }
}

impl<C: ClusterClient + ?Sized> ClusterClientExt for C {}
