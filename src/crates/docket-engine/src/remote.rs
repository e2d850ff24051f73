//! HTTP-backed collaborator implementations
//!
//! The classifier, drafter, executors, and notifier are separate services in
//! production. Each implementation here POSTs the structured context for its
//! contract as JSON to a configured URL and decodes the schema-tagged JSON
//! reply. Transport and non-2xx failures surface as
//! [`EngineError::Collaborator`]; schema-tag validation stays with the graph
//! nodes, which reject mismatched output the same way for every backend.

use crate::collaborators::{
    Classification, Classifier, ClassifyContext, Collaborators, Dispatch, Draft, DraftContext,
    Drafter, EmailExecutor, LogNotifier, Notifier, NotifyEvent, PortalExecutor, PortalTaskStatus,
    SendRequest,
};
use crate::config::CollaboratorEndpoints;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

async fn post_json<Req, Resp>(
    client: &reqwest::Client,
    url: &str,
    service: &str,
    request: &Req,
) -> Result<Resp>
where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    let response = client
        .post(url)
        .json(request)
        .send()
        .await
        .map_err(|e| EngineError::Collaborator {
            service: service.to_string(),
            message: e.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(EngineError::Collaborator {
            service: service.to_string(),
            message: format!("{} returned {}", url, status),
        });
    }

    response.json().await.map_err(|e| EngineError::Collaborator {
        service: service.to_string(),
        message: format!("invalid response body: {}", e),
    })
}

/// Classifier service reached over HTTP
pub struct RemoteClassifier {
    client: reqwest::Client,
    url: String,
}

#[async_trait]
impl Classifier for RemoteClassifier {
    async fn classify(&self, ctx: &ClassifyContext) -> Result<Classification> {
        debug!(url = %self.url, message_id = %ctx.message_id, "Calling remote classifier");
        post_json(&self.client, &self.url, "classifier", ctx).await
    }
}

/// Drafter service reached over HTTP
pub struct RemoteDrafter {
    client: reqwest::Client,
    url: String,
}

#[async_trait]
impl Drafter for RemoteDrafter {
    async fn draft(&self, ctx: &DraftContext) -> Result<Draft> {
        debug!(url = %self.url, action = %ctx.action_type, "Calling remote drafter");
        post_json(&self.client, &self.url, "drafter", ctx).await
    }
}

/// Reply body expected from the email executor service
#[derive(Debug, Deserialize)]
struct DispatchReply {
    provider_ref: Option<String>,
    #[serde(default)]
    deduplicated: bool,
}

/// Email executor service reached over HTTP
///
/// The service owns deduplication on `execution_key`; a deduplicated send
/// answers success with `deduplicated = true`.
pub struct RemoteEmailExecutor {
    client: reqwest::Client,
    url: String,
}

#[async_trait]
impl EmailExecutor for RemoteEmailExecutor {
    async fn send(&self, request: &SendRequest) -> Result<Dispatch> {
        debug!(url = %self.url, execution_key = %request.execution_key, "Dispatching send");
        let reply: DispatchReply = post_json(&self.client, &self.url, "email", request).await?;
        Ok(Dispatch {
            provider_ref: reply.provider_ref,
            deduplicated: reply.deduplicated,
        })
    }
}

#[derive(Debug, Serialize)]
struct PortalTaskRequest<'a> {
    case_id: &'a str,
    portal_url: &'a str,
    attempt: i64,
}

#[derive(Debug, Deserialize)]
struct PortalTaskReply {
    status: PortalTaskStatus,
}

/// Portal-task executor service reached over HTTP
pub struct RemotePortalExecutor {
    client: reqwest::Client,
    url: String,
}

#[async_trait]
impl PortalExecutor for RemotePortalExecutor {
    async fn submit(
        &self,
        case_id: &str,
        portal_url: &str,
        attempt: i64,
    ) -> Result<PortalTaskStatus> {
        let request = PortalTaskRequest {
            case_id,
            portal_url,
            attempt,
        };
        let reply: PortalTaskReply = post_json(&self.client, &self.url, "portal", &request).await?;
        Ok(reply.status)
    }
}

/// Notifier relay reached over HTTP
pub struct RemoteNotifier {
    client: reqwest::Client,
    url: String,
}

#[async_trait]
impl Notifier for RemoteNotifier {
    async fn notify(&self, event: NotifyEvent) -> Result<()> {
        // Callers route through notify_best_effort, so a relay failure is
        // logged and swallowed there; the reply body is ignored
        let response = self
            .client
            .post(&self.url)
            .json(&event)
            .send()
            .await
            .map_err(|e| EngineError::Collaborator {
                service: "notifier".to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Collaborator {
                service: "notifier".to_string(),
                message: format!("{} returned {}", self.url, status),
            });
        }
        Ok(())
    }
}

impl Collaborators {
    /// Wire every collaborator against its configured HTTP endpoint
    ///
    /// A missing `notify_url` falls back to log-only notifications.
    pub fn remote(endpoints: &CollaboratorEndpoints) -> Self {
        let client = reqwest::Client::new();

        let notifier: Arc<dyn Notifier> = match &endpoints.notify_url {
            Some(url) => Arc::new(RemoteNotifier {
                client: client.clone(),
                url: url.clone(),
            }),
            None => Arc::new(LogNotifier),
        };

        Self {
            classifier: Arc::new(RemoteClassifier {
                client: client.clone(),
                url: endpoints.classifier_url.clone(),
            }),
            drafter: Arc::new(RemoteDrafter {
                client: client.clone(),
                url: endpoints.drafter_url.clone(),
            }),
            email: Arc::new(RemoteEmailExecutor {
                client: client.clone(),
                url: endpoints.email_url.clone(),
            }),
            portal: Arc::new(RemotePortalExecutor {
                client,
                url: endpoints.portal_url.clone(),
            }),
            notifier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn endpoints() -> CollaboratorEndpoints {
        CollaboratorEndpoints {
            classifier_url: "http://llm.internal/classify".to_string(),
            drafter_url: "http://llm.internal/draft".to_string(),
            email_url: "http://mailer.internal/send".to_string(),
            portal_url: "http://portal.internal/tasks".to_string(),
            notify_url: None,
        }
    }

    #[test]
    fn test_remote_wiring_constructs() {
        // No network traffic: construction only
        let _collaborators = Collaborators::remote(&endpoints());
    }

    #[test]
    fn test_dispatch_reply_decoding() {
        let reply: DispatchReply =
            serde_json::from_value(json!({"provider_ref": "msg-77"})).unwrap();
        assert_eq!(reply.provider_ref.as_deref(), Some("msg-77"));
        assert!(!reply.deduplicated);

        let deduped: DispatchReply =
            serde_json::from_value(json!({"provider_ref": null, "deduplicated": true})).unwrap();
        assert!(deduped.deduplicated);
    }

    #[test]
    fn test_portal_reply_decoding() {
        let reply: PortalTaskReply =
            serde_json::from_value(json!({"status": "in_progress"})).unwrap();
        assert_eq!(reply.status, PortalTaskStatus::InProgress);
    }

    #[test]
    fn test_unreachable_classifier_is_collaborator_error() {
        // A refused connection must map to the collaborator error kind,
        // which fails the run without retrying inside it
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let err = runtime
            .block_on(async {
                let classifier = RemoteClassifier {
                    client: reqwest::Client::new(),
                    url: "http://127.0.0.1:1/classify".to_string(),
                };
                classifier
                    .classify(&ClassifyContext {
                        case_id: "c-1".to_string(),
                        message_id: "m-1".to_string(),
                        subject: None,
                        body: "body".to_string(),
                        constraints: vec![],
                        request_text: "req".to_string(),
                    })
                    .await
            })
            .unwrap_err();

        assert!(matches!(err, EngineError::Collaborator { .. }));
    }
}
