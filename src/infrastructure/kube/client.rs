use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::config::KubeConfigOptions;
use kube::{Client, Config as KubeConfig};
use tracing::{debug, instrument};

use super::codec::{api_resource, decode, encode};
use crate::domain::errors::ClientError;
use crate::domain::models::{
    ClusterConfig, ClusterObject, LabelSelector, ObjectKind, ObjectRef, PropagationPolicy,
};
use crate::domain::ports::ClusterClient;

const FIELD_MANAGER: &str = "settle";

/// Map a kube error onto the port's error type.
pub(crate) fn map_error(kind: ObjectKind, name: &str, err: kube::Error) -> ClientError {
    match err {
        kube::Error::Api(response) => match response.code {
            404 => ClientError::NotFound {
                kind,
                name: name.to_string(),
            },
            409 => ClientError::Conflict(response.message),
            403 => ClientError::Forbidden(response.message),
            400 | 422 => ClientError::Invalid(response.message),
            408 | 504 => ClientError::Timeout,
            code => ClientError::Api {
                code,
                message: response.message,
            },
        },
        kube::Error::SerdeError(e) => ClientError::Invalid(e.to_string()),
        other => ClientError::Connection(other.to_string()),
    }
}

fn propagation(policy: PropagationPolicy) -> kube::api::PropagationPolicy {
    match policy {
        PropagationPolicy::Foreground => kube::api::PropagationPolicy::Foreground,
        PropagationPolicy::Background => kube::api::PropagationPolicy::Background,
        PropagationPolicy::Orphan => kube::api::PropagationPolicy::Orphan,
    }
}

/// `ClusterClient` and `NotificationSource` backed by a live API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Connect using the kubeconfig context named in `cluster`, or the
    /// inferred environment when none is set.
    pub async fn connect(cluster: &ClusterConfig) -> Result<Self, ClientError> {
        let config = match &cluster.kube_context {
            Some(context) => {
                let options = KubeConfigOptions {
                    context: Some(context.clone()),
                    ..KubeConfigOptions::default()
                };
                KubeConfig::from_kubeconfig(&options)
                    .await
                    .map_err(|e| ClientError::Connection(e.to_string()))?
            }
            None => KubeConfig::infer()
                .await
                .map_err(|e| ClientError::Connection(e.to_string()))?,
        };
        let client = Client::try_from(config).map_err(|e| ClientError::Connection(e.to_string()))?;
        debug!(context = ?cluster.kube_context, "Connected to cluster");
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    pub(crate) fn client(&self) -> Client {
        self.client.clone()
    }

    fn api(&self, kind: ObjectKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = api_resource(kind);
        match namespace {
            Some(ns) if kind.is_namespaced() => {
                Api::namespaced_with(self.client.clone(), ns, &resource)
            }
            _ => Api::all_with(self.client.clone(), &resource),
        }
    }

    fn api_for(&self, object: &ClusterObject) -> Result<Api<DynamicObject>, ClientError> {
        let kind = object.kind();
        let namespace = object.meta().namespace.as_deref();
        if kind.is_namespaced() && namespace.is_none() {
            return Err(ClientError::Invalid(format!("{kind} needs a namespace")));
        }
        Ok(self.api(kind, namespace))
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    #[instrument(skip(self, selector), fields(selector = %selector), level = "debug")]
    async fn list_objects(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<ClusterObject>, ClientError> {
        let mut params = ListParams::default();
        let selector = selector.to_string();
        if !selector.is_empty() {
            params = params.labels(&selector);
        }
        let list = self
            .api(kind, namespace)
            .list(&params)
            .await
            .map_err(|e| map_error(kind, "", e))?;
        list.items.into_iter().map(|o| decode(kind, o)).collect()
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_object(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<ClusterObject, ClientError> {
        let object = self
            .api(kind, namespace)
            .get(name)
            .await
            .map_err(|e| map_error(kind, name, e))?;
        decode(kind, object)
    }

    async fn create_object(&self, object: ClusterObject) -> Result<ClusterObject, ClientError> {
        let kind = object.kind();
        let api = self.api_for(&object)?;
        let created = api
            .create(&PostParams::default(), &encode(&object))
            .await
            .map_err(|e| map_error(kind, &object.meta().name, e))?;
        debug!(%kind, name = ?created.metadata.name, "Created object");
        decode(kind, created)
    }

    /// Writes the modelled fields as a JSON merge patch; fields the models
    /// do not carry are left untouched on the server.
    async fn update_object(&self, object: ClusterObject) -> Result<ClusterObject, ClientError> {
        let kind = object.kind();
        let name = object.meta().name.clone();
        let api = self.api_for(&object)?;
        let mut body = encode(&object);
        body.metadata.owner_references = None;
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..PatchParams::default()
        };
        let updated = api
            .patch(&name, &params, &Patch::Merge(&body))
            .await
            .map_err(|e| map_error(kind, &name, e))?;
        decode(kind, updated)
    }

    async fn delete_object(
        &self,
        target: &ObjectRef,
        policy: PropagationPolicy,
    ) -> Result<(), ClientError> {
        let params = DeleteParams {
            propagation_policy: Some(propagation(policy)),
            ..DeleteParams::default()
        };
        self.api(target.kind, target.namespace.as_deref())
            .delete(&target.name, &params)
            .await
            .map_err(|e| map_error(target.kind, &target.name, e))?;
        debug!(%target, "Deleted object");
        Ok(())
    }
}
