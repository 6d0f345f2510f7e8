use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::http::{HttpClient, RequestOptions};

use super::api_types::{ApiCompany, ApiConversation, ApiList, ApiMessage, ApiUserEnvelope};
use super::types::{Company, Conversation, Message, NewMessage, ProfileUpdate, User};

/// Marketplace REST API
#[derive(Clone, Debug)]
pub struct NaturApi {
  http: HttpClient,
}

impl NaturApi {
  pub fn new(http: HttpClient) -> Self {
    Self { http }
  }

  pub fn http(&self) -> &HttpClient {
    &self.http
  }

  fn get_options(signal: CancellationToken) -> RequestOptions {
    RequestOptions::default().with_signal(signal)
  }

  /// Companies with map data
  pub async fn companies_map(&self, signal: CancellationToken) -> Result<Vec<Company>, FetchError> {
    let list: ApiList<ApiCompany> = self
      .http
      .request("/api/companies/map", Self::get_options(signal))
      .await?;
    Ok(list.into_vec().into_iter().map(Company::from).collect())
  }

  /// Full company directory
  pub async fn companies(&self, signal: CancellationToken) -> Result<Vec<Company>, FetchError> {
    let list: ApiList<ApiCompany> = self
      .http
      .request("/api/companies", Self::get_options(signal))
      .await?;
    Ok(list.into_vec().into_iter().map(Company::from).collect())
  }

  /// The signed-in user
  pub async fn me(&self, signal: CancellationToken) -> Result<User, FetchError> {
    let envelope: ApiUserEnvelope = self
      .http
      .request("/api/auth/me", Self::get_options(signal))
      .await?;
    Ok(envelope.into_user().into())
  }

  pub async fn user(&self, id: u64, signal: CancellationToken) -> Result<User, FetchError> {
    let envelope: ApiUserEnvelope = self
      .http
      .request(&format!("/api/users/{}", id), Self::get_options(signal))
      .await?;
    Ok(envelope.into_user().into())
  }

  pub async fn conversations(
    &self,
    signal: CancellationToken,
  ) -> Result<Vec<Conversation>, FetchError> {
    let list: ApiList<ApiConversation> = self
      .http
      .request("/api/conversations", Self::get_options(signal))
      .await?;
    Ok(list.into_vec().into_iter().map(Conversation::from).collect())
  }

  /// Messages of one conversation, oldest first
  pub async fn messages(
    &self,
    conversation_id: u64,
    signal: CancellationToken,
  ) -> Result<Vec<Message>, FetchError> {
    let path = format!("/api/messages?conversationId={}", conversation_id);
    let list: ApiList<ApiMessage> = self.http.request(&path, Self::get_options(signal)).await?;
    let mut messages: Vec<Message> = list.into_vec().into_iter().map(Message::from).collect();
    messages.sort_by_key(|m| m.created_at);
    Ok(messages)
  }

  pub async fn send_message(&self, message: &NewMessage) -> Result<Message, FetchError> {
    let body = json!({
      "conversationId": message.conversation_id,
      "content": message.content,
    });
    let sent: ApiMessage = self.http.post("/api/messages", body).await?;
    Ok(sent.into())
  }

  /// Open (or reuse) a conversation with another user
  pub async fn start_conversation(&self, participant_id: u64) -> Result<Conversation, FetchError> {
    let body = json!({ "participantId": participant_id });
    let conversation: ApiConversation = self.http.post("/api/conversations", body).await?;
    Ok(conversation.into())
  }

  pub async fn update_user(&self, id: u64, update: &ProfileUpdate) -> Result<User, FetchError> {
    let body = serde_json::to_value(update)
      .map_err(|e| FetchError::InvalidRequest(format!("failed to encode profile update: {}", e)))?;
    let envelope: ApiUserEnvelope = self.http.put(&format!("/api/users/{}", id), body).await?;
    Ok(envelope.into_user().into())
  }
}
