use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::info;

use natur::api::{CachedNaturClient, NaturApi};
use natur::cache::QueryClient;
use natur::config::Config;
use natur::http::HttpClient;
use natur::session::{AuthState, Session};
use natur::storage::{NoopStore, SnapshotStore, SqliteStore};
use natur::views::{ChatView, DirectoryView, MapView, ProfileEditor, View, ViewError, ViewStatus};

use crate::Command;

/// Main application state
pub struct App {
  config: Config,
  client: CachedNaturClient,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let http = HttpClient::new(&config.api.base_url)?
      .with_timeout(config.timeout())
      .with_token(Config::api_token());
    let client = CachedNaturClient::new(NaturApi::new(http), QueryClient::new(), config.query_options());
    info!(base_url = %config.api.base_url, "client ready");

    Ok(Self { config, client })
  }

  pub async fn run(self, command: Command) -> Result<()> {
    if !self.config.storage.enabled {
      return self.execute(command, Arc::new(NoopStore)).await;
    }
    let store = match &self.config.storage.path {
      Some(path) => SqliteStore::open(path)?,
      None => SqliteStore::open_default()?,
    };
    self.execute(command, Arc::new(store)).await
  }

  async fn execute<S: SnapshotStore>(&self, command: Command, store: Arc<S>) -> Result<()> {
    match command {
      Command::Map { search, category } => self.map(search, category).await,
      Command::Directory { search, category } => self.directory(search, category).await,
      Command::Conversations { search } => self.conversations(search).await,
      Command::Messages { conversation_id } => self.messages(conversation_id).await,
      Command::Send {
        conversation_id,
        text,
      } => self.send(conversation_id, &text).await,
      Command::Contact { user_id } => self.contact(user_id).await,
      Command::Whoami => self.whoami(Session::new(self.client.clone(), store)).await,
      Command::Profile {
        name,
        bio,
        phone,
        website,
        avatar_url,
      } => {
        let mut editor = ProfileEditor::new(&self.client);
        check(editor.settled().await)?;
        let form = editor.form_mut();
        for (field, value) in [
          (&mut form.name, name),
          (&mut form.bio, bio),
          (&mut form.phone, phone),
          (&mut form.website, website),
          (&mut form.avatar_url, avatar_url),
        ] {
          if let Some(value) = value {
            *field = value;
          }
        }
        self.profile(editor).await
      }
    }
  }

  async fn map(&self, search: Option<String>, category: Option<String>) -> Result<()> {
    let mut view = MapView::new(&self.client, Config::map_token());
    if view.settled().await == ViewStatus::Disabled {
      println!("Map disabled: set NATUR_MAP_TOKEN to enable it.");
      return Ok(());
    }
    check(view.status())?;

    view.set_search(search.as_deref().unwrap_or_default());
    view.set_category(category.as_deref().unwrap_or_default());
    println!("{}  [{}]", view.label(), view.categories().join(", "));
    for marker in view.markers() {
      println!(
        "{:>6}  {:<40} {:<16} {:>9.5}, {:>10.5}",
        marker.company_id,
        truncate(&marker.title, 40),
        truncate(&marker.category, 16),
        marker.position.lat,
        marker.position.lng
      );
    }
    Ok(())
  }

  async fn directory(&self, search: Option<String>, category: Option<String>) -> Result<()> {
    let mut view = DirectoryView::new(&self.client);
    check(view.settled().await)?;

    view.set_search(search.as_deref().unwrap_or_default());
    view.set_category(category.as_deref().unwrap_or_default());
    println!("{}  [{}]", view.label(), view.categories().join(", "));
    for company in view.listing() {
      println!(
        "{:>6}  {:<40} {:<16} {}",
        company.id,
        truncate(&company.name, 40),
        truncate(&company.category, 16),
        company.city.as_deref().unwrap_or("-")
      );
    }
    Ok(())
  }

  async fn conversations(&self, search: Option<String>) -> Result<()> {
    let mut view = ChatView::new(&self.client);
    check(view.settled().await)?;

    view.set_search(search.as_deref().unwrap_or_default());
    println!("{}", view.label());
    for conversation in view.conversations() {
      let unread = match conversation.unread_count {
        0 => String::new(),
        n => format!("({})", n),
      };
      println!(
        "{:>6}  {:<30} {:>4}  {}",
        conversation.id,
        truncate(&conversation.participant.name, 30),
        unread,
        truncate(conversation.last_message.as_deref().unwrap_or(""), 50)
      );
    }
    Ok(())
  }

  async fn messages(&self, conversation_id: u64) -> Result<()> {
    let mut view = ChatView::new(&self.client);
    view.select(conversation_id);
    check(view.settled().await)?;

    for message in view.messages() {
      println!(
        "{}  #{:<6} {}",
        message.created_at.format("%Y-%m-%d %H:%M"),
        message.sender_id,
        message.content
      );
    }
    Ok(())
  }

  async fn send(&self, conversation_id: u64, text: &str) -> Result<()> {
    let mut view = ChatView::new(&self.client);
    view.select(conversation_id);
    view.set_draft(text);

    match view.send().await.map_err(view_error)? {
      Some(message) => println!("Sent message {}", message.id),
      None => println!("Nothing to send."),
    }
    Ok(())
  }

  async fn contact(&self, user_id: u64) -> Result<()> {
    let mut view = ChatView::new(&self.client);
    let conversation = view.start_conversation(user_id).await.map_err(view_error)?;
    println!(
      "Conversation {} with {}",
      conversation.id, conversation.participant.name
    );
    Ok(())
  }

  async fn whoami<S: SnapshotStore>(&self, session: Session<S>) -> Result<()> {
    match session.resolve().await.map_err(|e| view_error((&e).into()))? {
      AuthState::Authenticated(user) => println!("{} <{}>", user.name, user.email),
      AuthState::Offline { user, cached_at } => println!(
        "{} <{}> (offline, last confirmed {})",
        user.name,
        user.email,
        cached_at.format("%Y-%m-%d %H:%M")
      ),
      AuthState::Anonymous => println!("Not signed in."),
    }
    Ok(())
  }

  async fn profile(&self, mut editor: ProfileEditor) -> Result<()> {
    if editor.is_dirty() {
      if let Err(e) = editor.save().await {
        for (field, message) in editor.field_errors().iter() {
          eprintln!("{}: {}", field, message);
        }
        return Err(view_error(e));
      }
      println!("Profile saved.");
    }

    let form = editor.form();
    println!("{}", editor.label());
    for (label, value) in [
      ("name", &form.name),
      ("bio", &form.bio),
      ("phone", &form.phone),
      ("website", &form.website),
      ("avatar", &form.avatar_url),
    ] {
      println!("{:>8}: {}", label, value);
    }
    Ok(())
  }
}

fn check(status: ViewStatus) -> Result<()> {
  match status {
    ViewStatus::Failed(e) => Err(view_error(e)),
    _ => Ok(()),
  }
}

fn view_error(error: ViewError) -> color_eyre::Report {
  match error {
    ViewError::NotAuthenticated => eyre!("Not signed in. Set NATUR_API_TOKEN and try again."),
    other => eyre!("{}", other),
  }
}

fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", head)
  }
}
