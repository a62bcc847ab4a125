use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use hearth_shared::{
    ActorRequest, AnswerRequest, CallId, CallSession, CreateGroupRequest, DeletedResponse,
    DirectMessage, ErrorResponse, GroupChat, GroupId, GroupMessage, GroupMessageRequest,
    IceCandidate, IceCandidateRequest, InitiateCallRequest, LeaveResponse, MessageId,
    SendMessageRequest, SessionDescription, UserId,
};

use crate::error::ClientError;
use crate::ports::{CallSignaling, MessageFeed};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub stale_call_secs: u64,
}

/// HTTP client for the Hearth REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new(server_url: &str) -> Result<Self, ClientError> {
        let base = Url::parse(server_url)
            .map_err(|e| ClientError::Invalid(format!("Invalid server URL {server_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::Invalid(format!(
                "Invalid server URL {server_url}"
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("hearth/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { http, base })
    }

    /// Join path segments onto the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn request<B, T>(&self, method: Method, segments: &[&str], body: Option<&B>) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.endpoint(segments);
        debug!(%method, %url, "API request");

        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let message = match response.json::<ErrorResponse>().await {
            Ok(body) => body.error,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("Unexpected response")
                .to_string(),
        };
        Err(ClientError::from_status(status.as_u16(), message))
    }

    async fn fetch_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ClientError> {
        self.request::<(), T>(Method::GET, segments, None).await
    }

    pub async fn info(&self) -> Result<ServerInfo, ClientError> {
        self.fetch_json(&["info"]).await
    }

    // ─── Direct messages ───

    pub async fn send_message(
        &self,
        from: &UserId,
        to: &UserId,
        content: &str,
    ) -> Result<DirectMessage, ClientError> {
        let body = SendMessageRequest {
            from: from.to_string(),
            to: to.to_string(),
            content: content.to_string(),
        };
        self.request(Method::POST, &["messages"], Some(&body)).await
    }

    pub async fn delete_message(&self, id: MessageId, requester: &UserId) -> Result<(), ClientError> {
        let body = ActorRequest {
            username: requester.to_string(),
        };
        let _: DeletedResponse = self
            .request(Method::DELETE, &["messages", &id.to_string()], Some(&body))
            .await?;
        Ok(())
    }

    // ─── Group chats ───

    pub async fn create_group(
        &self,
        name: &str,
        members: &[UserId],
        created_by: &UserId,
    ) -> Result<GroupChat, ClientError> {
        let body = CreateGroupRequest {
            name: name.to_string(),
            members: members.iter().map(ToString::to_string).collect(),
            created_by: created_by.to_string(),
        };
        self.request(Method::POST, &["groupchats"], Some(&body)).await
    }

    pub async fn post_group_message(
        &self,
        group: GroupId,
        from: &UserId,
        content: &str,
    ) -> Result<GroupMessage, ClientError> {
        let body = GroupMessageRequest {
            from: from.to_string(),
            content: content.to_string(),
        };
        self.request(
            Method::POST,
            &["groupchats", &group.to_string(), "messages"],
            Some(&body),
        )
        .await
    }

    pub async fn leave_group(&self, group: GroupId, user: &UserId) -> Result<LeaveResponse, ClientError> {
        let body = ActorRequest {
            username: user.to_string(),
        };
        self.request(
            Method::POST,
            &["groupchats", &group.to_string(), "leave"],
            Some(&body),
        )
        .await
    }

    pub async fn delete_group(&self, group: GroupId, requester: &UserId) -> Result<(), ClientError> {
        let body = ActorRequest {
            username: requester.to_string(),
        };
        let _: DeletedResponse = self
            .request(Method::DELETE, &["groupchats", &group.to_string()], Some(&body))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageFeed for ApiClient {
    async fn direct_messages(&self, user: &UserId) -> Result<Vec<DirectMessage>, ClientError> {
        self.fetch_json(&["messages", user.as_str()]).await
    }

    async fn groups_for(&self, user: &UserId) -> Result<Vec<GroupChat>, ClientError> {
        self.fetch_json(&["groupchats", user.as_str()]).await
    }

    async fn mark_read(&self, id: MessageId, reader: &UserId) -> Result<(), ClientError> {
        let body = ActorRequest {
            username: reader.to_string(),
        };
        let _: DirectMessage = self
            .request(Method::PUT, &["messages", &id.to_string(), "read"], Some(&body))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CallSignaling for ApiClient {
    async fn initiate(
        &self,
        from: &UserId,
        to: &UserId,
        offer: &SessionDescription,
    ) -> Result<CallSession, ClientError> {
        let body = InitiateCallRequest {
            from: from.to_string(),
            to: to.to_string(),
            offer: offer.clone(),
        };
        self.request(Method::POST, &["calls", "initiate"], Some(&body)).await
    }

    async fn fetch_incoming(&self, user: &UserId) -> Result<Option<CallSession>, ClientError> {
        self.fetch_json(&["calls", "incoming", user.as_str()]).await
    }

    async fn get(&self, id: CallId) -> Result<CallSession, ClientError> {
        self.fetch_json(&["calls", &id.to_string()]).await
    }

    async fn submit_answer(
        &self,
        id: CallId,
        answer: &SessionDescription,
    ) -> Result<CallSession, ClientError> {
        let body = AnswerRequest {
            answer: answer.clone(),
        };
        self.request(
            Method::POST,
            &["calls", &id.to_string(), "answer"],
            Some(&body),
        )
        .await
    }

    async fn add_ice(
        &self,
        id: CallId,
        candidate: &IceCandidate,
    ) -> Result<CallSession, ClientError> {
        let body = IceCandidateRequest {
            candidate: candidate.clone(),
        };
        self.request(Method::POST, &["calls", &id.to_string(), "ice"], Some(&body))
            .await
    }

    async fn terminate(&self, id: CallId) -> Result<(), ClientError> {
        let _: DeletedResponse = self
            .request::<(), _>(Method::DELETE, &["calls", &id.to_string()], None)
            .await?;
        Ok(())
    }
}
