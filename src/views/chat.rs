use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::api::keys;
use crate::api::types::{Conversation, Message, NewMessage};
use crate::api::{CachedNaturClient, Method, Resource};
use crate::cache::{CacheKey, QueryObserver};
use crate::filter::search_conversations;
use crate::mutation::{Mutation, MutationRequest, Rollback};

use super::{View, ViewError, ViewStatus};

/// A message on its way out, with the compose box text it came from.
#[derive(Debug, Clone)]
struct Outgoing {
  message: NewMessage,
  draft: String,
}

/// Conversation sidebar plus the open thread and its compose box.
pub struct ChatView {
  client: CachedNaturClient,
  conversations: QueryObserver<Vec<Conversation>>,
  /// Only exists once a conversation is selected
  messages: Option<QueryObserver<Vec<Message>>>,
  selected: Option<u64>,
  search: String,
  draft: Arc<Mutex<String>>,
  send: Mutation<Outgoing, Message>,
  start: Mutation<u64, Conversation>,
}

impl ChatView {
  pub fn new(client: &CachedNaturClient) -> Self {
    let draft = Arc::new(Mutex::new(String::new()));

    let api = client.api().clone();
    let cleared = draft.clone();
    let restored = draft.clone();
    let send = Mutation::new(
      client.cache().clone(),
      move |request: MutationRequest<Outgoing>| {
        let api = api.clone();
        async move { api.send_message(&request.payload.message).await }
      },
      // The draft is cleared as soon as the message is sent; put it back
      // unless something new was typed meanwhile
      Rollback::with(move |request: &MutationRequest<Outgoing>, _error| {
        let mut draft = lock(&restored);
        if draft.is_empty() {
          *draft = request.payload.draft.clone();
        }
      }),
    )
    .on_mutate(move |_| lock(&cleared).clear());

    let api = client.api().clone();
    let start = Mutation::new(
      client.cache().clone(),
      move |request: MutationRequest<u64>| {
        let api = api.clone();
        async move { api.start_conversation(request.payload).await }
      },
      Rollback::none(),
    );

    Self {
      client: client.clone(),
      conversations: client.conversations(),
      messages: None,
      selected: None,
      search: String::new(),
      draft,
      send,
      start,
    }
  }

  /// Open a conversation; its messages start loading now.
  pub fn select(&mut self, conversation_id: u64) {
    if self.selected == Some(conversation_id) {
      return;
    }
    debug!(conversation_id, "conversation selected");
    self.selected = Some(conversation_id);
    self.messages = Some(self.client.messages(conversation_id, true));
  }

  /// Wait until the sidebar and the open thread have loaded.
  pub async fn settled(&mut self) -> ViewStatus {
    self.conversations.settled().await;
    if let Some(messages) = self.messages.as_mut() {
      messages.settled().await;
    }
    self.status()
  }

  pub fn selected(&self) -> Option<u64> {
    self.selected
  }

  pub fn set_search(&mut self, term: &str) {
    self.search = term.to_string();
  }

  /// Sidebar entries matching the search box.
  pub fn conversations(&self) -> Vec<Conversation> {
    let Some(all) = self.conversations.data() else {
      return Vec::new();
    };
    search_conversations(&all, &self.search)
      .into_iter()
      .cloned()
      .collect()
  }

  pub fn unread_total(&self) -> u32 {
    self
      .conversations
      .data()
      .map_or(0, |all| all.iter().map(|c| c.unread_count).sum())
  }

  /// Messages of the open conversation, oldest first.
  pub fn messages(&self) -> Vec<Message> {
    self
      .messages
      .as_ref()
      .and_then(|m| m.data())
      .map(|m| m.as_ref().clone())
      .unwrap_or_default()
  }

  pub fn draft(&self) -> String {
    lock(&self.draft).clone()
  }

  pub fn set_draft(&self, text: &str) {
    *lock(&self.draft) = text.to_string();
  }

  pub fn is_sending(&self) -> bool {
    self.send.is_pending()
  }

  /// Send the draft to the open conversation.
  ///
  /// Returns `Ok(None)` for a blank draft. On failure the draft is restored.
  pub async fn send(&self) -> Result<Option<Message>, ViewError> {
    let Some(conversation_id) = self.selected else {
      return Err(ViewError::Fatal("no conversation selected".to_string()));
    };
    let draft = self.draft();
    let content = draft.trim().to_string();
    if content.is_empty() {
      return Ok(None);
    }

    let request = MutationRequest::new(
      Resource::Message { conversation_id },
      Method::Create,
      Outgoing {
        message: NewMessage {
          conversation_id,
          content,
        },
        draft,
      },
    );
    match self.send.mutate(request).await {
      Ok(message) => Ok(Some(message)),
      Err(e) => Err(ViewError::from(&e)),
    }
  }

  /// Open (or reuse) a conversation with another user and select it.
  pub async fn start_conversation(&mut self, participant_id: u64) -> Result<Conversation, ViewError> {
    let request = MutationRequest::new(Resource::Conversation { id: None }, Method::Create, participant_id);
    let conversation = self
      .start
      .mutate(request)
      .await
      .map_err(|e| ViewError::from(&e))?;
    self.select(conversation.id);
    Ok(conversation)
  }
}

fn lock(draft: &Mutex<String>) -> std::sync::MutexGuard<'_, String> {
  draft.lock().unwrap_or_else(PoisonError::into_inner)
}

impl View for ChatView {
  fn label(&self) -> String {
    match self.unread_total() {
      0 => "Mensajes".to_string(),
      n => format!("Mensajes ({} sin leer)", n),
    }
  }

  fn keys(&self) -> Vec<CacheKey> {
    let mut keys = vec![keys::conversations()];
    if let Some(id) = self.selected {
      keys.push(keys::messages(id));
    }
    keys
  }

  fn status(&self) -> ViewStatus {
    ViewStatus::of(&self.conversations.state())
  }

  fn tick(&mut self) -> bool {
    let conversations = self.conversations.poll();
    let messages = self.messages.as_mut().is_some_and(|m| m.poll());
    conversations || messages
  }

  fn refresh(&mut self) {
    self.conversations.refetch();
    if let Some(messages) = &self.messages {
      messages.refetch();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::NaturApi;
  use crate::cache::{QueryClient, QueryOptions, QueryStatus, RetryPolicy};
  use crate::http::HttpClient;
  use httpmock::MockServer;
  use std::time::Duration;

  const CONVERSATIONS: &str = r#"[
    {"id": 7, "participant": {"id": 20, "name": "Ana Gómez"}, "lastMessage": {"content": "¿Hay cupo?", "createdAt": "2024-05-01T10:00:00Z"}, "unreadCount": 2},
    {"id": 8, "participant": {"id": 21, "name": "Luis Pérez"}, "unreadCount": 1}
  ]"#;

  const THREAD: &str = r#"[
    {"id": 1, "conversationId": 7, "senderId": 20, "content": "¿Hay cupo?", "createdAt": "2024-05-01T10:00:00Z"}
  ]"#;

  const SENT: &str = r#"{"id": 2, "conversationId": 7, "senderId": 3, "content": "Sí, dos cupos", "createdAt": "2024-05-01T10:05:00Z"}"#;

  fn client(server: &MockServer) -> CachedNaturClient {
    let api = NaturApi::new(HttpClient::new(&server.base_url()).unwrap());
    let options = QueryOptions::default()
      .with_stale_time(Duration::from_secs(60))
      .with_retry(RetryPolicy::Never);
    CachedNaturClient::new(api, QueryClient::new(), options)
  }

  async fn mock_reads(server: &MockServer) -> (httpmock::Mock<'_>, httpmock::Mock<'_>) {
    let list = server
      .mock_async(|when, then| {
        when.method("GET").path("/api/conversations");
        then.status(200).body(CONVERSATIONS);
      })
      .await;
    let thread = server
      .mock_async(|when, then| {
        when
          .method("GET")
          .path("/api/messages")
          .query_param("conversationId", "7");
        then.status(200).body(THREAD);
      })
      .await;
    (list, thread)
  }

  #[tokio::test]
  async fn test_messages_wait_for_selection() {
    let server = MockServer::start_async().await;
    let (_list, thread) = mock_reads(&server).await;

    let mut view = ChatView::new(&client(&server));
    view.conversations.settled().await;
    assert_eq!(view.conversations().len(), 2);
    assert_eq!(view.unread_total(), 3);
    assert!(view.messages().is_empty());
    assert_eq!(view.keys(), vec![keys::conversations()]);
    thread.assert_calls_async(0).await;

    view.select(7);
    view.messages.as_mut().unwrap().settled().await;
    assert_eq!(view.messages().len(), 1);
    assert_eq!(view.keys().len(), 2);
    thread.assert_calls_async(1).await;
  }

  #[tokio::test]
  async fn test_send_clears_draft_and_refreshes_thread() {
    let server = MockServer::start_async().await;
    let (list, thread) = mock_reads(&server).await;
    let post = server
      .mock_async(|when, then| {
        when
          .method("POST")
          .path("/api/messages")
          .json_body(serde_json::json!({"conversationId": 7, "content": "Sí, dos cupos"}));
        then
          .status(201)
          .delay(Duration::from_millis(200))
          .body(SENT);
      })
      .await;

    let client = client(&server);
    let mut view = ChatView::new(&client);
    view.select(7);
    view.conversations.settled().await;
    view.messages.as_mut().unwrap().settled().await;

    view.set_draft("  Sí, dos cupos ");
    let while_sending = async {
      tokio::time::sleep(Duration::from_millis(50)).await;
      (view.draft(), view.is_sending())
    };
    let (sent, (draft_while_sending, sending)) = tokio::join!(view.send(), while_sending);

    assert_eq!(sent.unwrap().unwrap().id, 2);
    assert_eq!(draft_while_sending, "");
    assert!(sending);
    assert_eq!(view.draft(), "");
    assert_eq!(client.cache().status(&keys::messages(7)), Some(QueryStatus::Loading));
    post.assert_async().await;

    view.messages.as_mut().unwrap().settled().await;
    view.conversations.settled().await;
    thread.assert_calls_async(2).await;
    list.assert_calls_async(2).await;
  }

  #[tokio::test]
  async fn test_failed_send_restores_draft() {
    let server = MockServer::start_async().await;
    let (list, _thread) = mock_reads(&server).await;
    server
      .mock_async(|when, then| {
        when.method("POST").path("/api/messages");
        then.status(500).body("boom");
      })
      .await;

    let mut view = ChatView::new(&client(&server));
    view.select(7);
    view.conversations.settled().await;
    view.set_draft("  Hola\n");

    let err = view.send().await.unwrap_err();
    assert!(matches!(err, ViewError::Retryable(_)));
    assert_eq!(view.draft(), "  Hola\n");
    list.assert_calls_async(1).await;
  }

  #[tokio::test]
  async fn test_failed_send_keeps_text_typed_meanwhile() {
    let server = MockServer::start_async().await;
    let _reads = mock_reads(&server).await;
    server
      .mock_async(|when, then| {
        when.method("POST").path("/api/messages");
        then.status(500).delay(Duration::from_millis(200)).body("boom");
      })
      .await;

    let mut view = ChatView::new(&client(&server));
    view.select(7);
    view.set_draft("Hola");

    let type_more = async {
      tokio::time::sleep(Duration::from_millis(50)).await;
      view.set_draft("¿Sigue abierto?");
    };
    let (sent, ()) = tokio::join!(view.send(), type_more);

    assert!(sent.is_err());
    assert_eq!(view.draft(), "¿Sigue abierto?");
  }

  #[tokio::test]
  async fn test_send_needs_selection_and_text() {
    let server = MockServer::start_async().await;
    let view = ChatView::new(&client(&server));
    view.set_draft("Hola");
    assert!(matches!(view.send().await, Err(ViewError::Fatal(_))));

    let mut view = view;
    view.select(7);
    view.set_draft("   ");
    assert_eq!(view.send().await, Ok(None));
  }

  #[tokio::test]
  async fn test_start_conversation_selects_it() {
    let server = MockServer::start_async().await;
    let _reads = mock_reads(&server).await;
    server
      .mock_async(|when, then| {
        when
          .method("POST")
          .path("/api/conversations")
          .json_body(serde_json::json!({"participantId": 20}));
        then
          .status(201)
          .body(r#"{"id": 7, "participant": {"id": 20, "name": "Ana Gómez"}}"#);
      })
      .await;

    let mut view = ChatView::new(&client(&server));
    let conversation = view.start_conversation(20).await.unwrap();
    assert_eq!(conversation.id, 7);
    assert_eq!(view.selected(), Some(7));
  }
}
