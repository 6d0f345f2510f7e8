use crate::api::keys;
use crate::api::types::Company;
use crate::api::CachedNaturClient;
use crate::cache::{CacheKey, QueryObserver};
use crate::filter::{unique_categories, CompanyFilter};

use super::{View, ViewError, ViewStatus};

/// Company directory with search and category tabs
pub struct DirectoryView {
  companies: QueryObserver<Vec<Company>>,
  filter: CompanyFilter,
}

impl DirectoryView {
  pub fn new(client: &CachedNaturClient) -> Self {
    Self {
      companies: client.directory(),
      filter: CompanyFilter::default(),
    }
  }

  pub async fn settled(&mut self) -> ViewStatus {
    self.companies.settled().await;
    self.status()
  }

  pub fn set_search(&mut self, term: &str) {
    self.filter.search = term.to_string();
  }

  /// Empty string selects the "All" tab.
  pub fn set_category(&mut self, category: &str) {
    self.filter.category = category.to_string();
  }

  pub fn listing(&self) -> Vec<Company> {
    let Some(companies) = self.companies.data() else {
      return Vec::new();
    };
    self.filter.apply(&companies).into_iter().cloned().collect()
  }

  pub fn categories(&self) -> Vec<String> {
    self
      .companies
      .data()
      .map(|companies| unique_categories(&companies))
      .unwrap_or_default()
  }

  /// Error of the last fetch, shown as a banner over possibly stale rows.
  pub fn error(&self) -> Option<ViewError> {
    self.companies.error().as_ref().map(ViewError::from)
  }
}

impl View for DirectoryView {
  fn label(&self) -> String {
    match self.companies.data() {
      Some(companies) => format!("Directorio ({})", companies.len()),
      None => "Directorio".to_string(),
    }
  }

  fn keys(&self) -> Vec<CacheKey> {
    vec![keys::companies_directory()]
  }

  fn status(&self) -> ViewStatus {
    ViewStatus::of(&self.companies.state())
  }

  fn tick(&mut self) -> bool {
    self.companies.poll()
  }

  fn refresh(&mut self) {
    self.companies.refetch();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::NaturApi;
  use crate::cache::{QueryClient, QueryOptions, RetryPolicy};
  use crate::http::HttpClient;
  use httpmock::MockServer;
  use std::time::Duration;

  fn client(server: &MockServer) -> CachedNaturClient {
    let api = NaturApi::new(HttpClient::new(&server.base_url()).unwrap());
    let options = QueryOptions::default()
      .with_stale_time(Duration::from_secs(60))
      .with_retry(RetryPolicy::Never);
    CachedNaturClient::new(api, QueryClient::new(), options)
  }

  #[tokio::test]
  async fn test_listing_and_tabs() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method("GET").path("/api/companies");
        then.status(200).body(
          r#"{"data": [
            {"id": 1, "name": "Reserva El Paraíso", "category": "Ecoturismo", "description": "Avistamiento de aves"},
            {"id": 2, "name": "Café de la Sierra", "category": "gastronomía"},
            {"id": 3, "name": "Senderos", "category": "ecoturismo"}
          ]}"#,
        );
      })
      .await;

    let client = client(&server);
    let mut view = DirectoryView::new(&client);
    view.companies.settled().await;

    assert_eq!(view.status(), ViewStatus::Ready);
    assert_eq!(view.label(), "Directorio (3)");
    assert_eq!(view.categories(), vec!["Ecoturismo", "gastronomía"]);

    view.set_category("ecoturismo");
    assert_eq!(view.listing().len(), 2);

    view.set_search("aves");
    let ids: Vec<u64> = view.listing().iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![1]);
  }

  #[tokio::test]
  async fn test_two_views_share_one_fetch() {
    let server = MockServer::start_async().await;
    let mock = server
      .mock_async(|when, then| {
        when.path("/api/companies");
        then.status(200).body("[]");
      })
      .await;

    let client = client(&server);
    let mut first = DirectoryView::new(&client);
    let mut second = DirectoryView::new(&client);
    first.companies.settled().await;
    second.companies.settled().await;

    assert!(first.listing().is_empty());
    mock.assert_calls_async(1).await;
  }

  #[tokio::test]
  async fn test_server_error_fails_view() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.path("/api/companies");
        then.status(404).body("not found");
      })
      .await;

    let client = client(&server);
    let mut view = DirectoryView::new(&client);
    view.companies.settled().await;

    assert!(matches!(view.status(), ViewStatus::Failed(ViewError::Fatal(_))));
    assert!(view.error().is_some());
    assert!(view.listing().is_empty());
  }
}
