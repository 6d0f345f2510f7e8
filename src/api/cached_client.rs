//! Marketplace client with every read going through the query cache.

use crate::cache::{FetchContext, QueryClient, QueryObserver, QueryOptions};

use super::client::NaturApi;
use super::keys;
use super::types::{Company, Conversation, Message, User};

/// API client paired with the shared query cache.
///
/// Each read method registers an observer under the resource's key, so
/// views created from the same client share fetches and cached values.
#[derive(Clone)]
pub struct CachedNaturClient {
  api: NaturApi,
  cache: QueryClient,
  options: QueryOptions,
}

impl CachedNaturClient {
  pub fn new(api: NaturApi, cache: QueryClient, options: QueryOptions) -> Self {
    Self {
      api,
      cache,
      options,
    }
  }

  pub fn api(&self) -> &NaturApi {
    &self.api
  }

  pub fn cache(&self) -> &QueryClient {
    &self.cache
  }

  pub fn options(&self) -> &QueryOptions {
    &self.options
  }

  pub fn companies_map(&self, enabled: bool) -> QueryObserver<Vec<Company>> {
    let api = self.api.clone();
    self.cache.observe(
      keys::companies_map(),
      move |ctx: FetchContext| {
        let api = api.clone();
        async move { api.companies_map(ctx.signal).await }
      },
      self.options.clone().with_enabled(enabled),
    )
  }

  pub fn directory(&self) -> QueryObserver<Vec<Company>> {
    let api = self.api.clone();
    self.cache.observe(
      keys::companies_directory(),
      move |ctx: FetchContext| {
        let api = api.clone();
        async move { api.companies(ctx.signal).await }
      },
      self.options.clone(),
    )
  }

  pub fn me(&self) -> QueryObserver<User> {
    let api = self.api.clone();
    self.cache.observe(
      keys::me(),
      move |ctx: FetchContext| {
        let api = api.clone();
        async move { api.me(ctx.signal).await }
      },
      self.options.clone(),
    )
  }

  pub fn user(&self, id: u64) -> QueryObserver<User> {
    let api = self.api.clone();
    self.cache.observe(
      keys::user(id),
      move |ctx: FetchContext| {
        let api = api.clone();
        async move { api.user(id, ctx.signal).await }
      },
      self.options.clone(),
    )
  }

  pub fn conversations(&self) -> QueryObserver<Vec<Conversation>> {
    let api = self.api.clone();
    self.cache.observe(
      keys::conversations(),
      move |ctx: FetchContext| {
        let api = api.clone();
        async move { api.conversations(ctx.signal).await }
      },
      self.options.clone(),
    )
  }

  /// Messages of one conversation; stays idle while `enabled` is false.
  pub fn messages(&self, conversation_id: u64, enabled: bool) -> QueryObserver<Vec<Message>> {
    let api = self.api.clone();
    self.cache.observe(
      keys::messages(conversation_id),
      move |ctx: FetchContext| {
        let api = api.clone();
        async move { api.messages(conversation_id, ctx.signal).await }
      },
      self.options.clone().with_enabled(enabled),
    )
  }
}
