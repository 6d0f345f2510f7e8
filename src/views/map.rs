use std::sync::Arc;
use tracing::info;

use crate::api::keys;
use crate::api::types::{Company, Coordinates};
use crate::api::CachedNaturClient;
use crate::cache::{CacheKey, QueryObserver};
use crate::filter::{unique_categories, CompanyFilter};

use super::{View, ViewStatus};

/// A company pin on the map.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
  pub company_id: u64,
  pub title: String,
  pub category: String,
  pub position: Coordinates,
}

/// Interactive map of registered businesses.
///
/// Without a map-provider token the view stays disabled: it never fetches
/// and shows no markers.
pub struct MapView {
  companies: QueryObserver<Vec<Company>>,
  filter: CompanyFilter,
  map_token: Option<String>,
}

impl MapView {
  pub fn new(client: &CachedNaturClient, map_token: Option<String>) -> Self {
    let map_token = map_token.filter(|t| !t.trim().is_empty());
    if map_token.is_none() {
      info!("map token missing, map view disabled");
    }
    Self {
      companies: client.companies_map(map_token.is_some()),
      filter: CompanyFilter::for_map(),
      map_token,
    }
  }

  pub fn is_enabled(&self) -> bool {
    self.map_token.is_some()
  }

  /// Wait for the in-flight fetch, if any.
  pub async fn settled(&mut self) -> ViewStatus {
    if self.is_enabled() {
      self.companies.settled().await;
    }
    self.status()
  }

  pub fn map_token(&self) -> Option<&str> {
    self.map_token.as_deref()
  }

  pub fn set_search(&mut self, term: &str) {
    self.filter.search = term.to_string();
  }

  pub fn set_category(&mut self, category: &str) {
    self.filter.category = category.to_string();
  }

  pub fn filter(&self) -> &CompanyFilter {
    &self.filter
  }

  fn companies(&self) -> Option<Arc<Vec<Company>>> {
    if !self.is_enabled() {
      return None;
    }
    self.companies.data()
  }

  /// Pins for every company passing the current filter.
  pub fn markers(&self) -> Vec<Marker> {
    let Some(companies) = self.companies() else {
      return Vec::new();
    };
    self
      .filter
      .apply(&companies)
      .into_iter()
      .filter_map(|c| {
        Some(Marker {
          company_id: c.id,
          title: c.name.clone(),
          category: c.category.clone(),
          position: c.coordinates?,
        })
      })
      .collect()
  }

  /// Category tabs, taken from companies that can be placed on the map.
  pub fn categories(&self) -> Vec<String> {
    let Some(companies) = self.companies() else {
      return Vec::new();
    };
    let located: Vec<Company> = CompanyFilter::for_map()
      .apply(&companies)
      .into_iter()
      .cloned()
      .collect();
    unique_categories(&located)
  }
}

impl View for MapView {
  fn label(&self) -> String {
    "Mapa".to_string()
  }

  fn keys(&self) -> Vec<CacheKey> {
    if self.is_enabled() {
      vec![keys::companies_map()]
    } else {
      Vec::new()
    }
  }

  fn status(&self) -> ViewStatus {
    if !self.is_enabled() {
      return ViewStatus::Disabled;
    }
    ViewStatus::of(&self.companies.state())
  }

  fn tick(&mut self) -> bool {
    self.companies.poll()
  }

  fn refresh(&mut self) {
    if self.is_enabled() {
      self.companies.refetch();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::NaturApi;
  use crate::cache::{QueryClient, QueryOptions};
  use crate::http::HttpClient;
  use httpmock::MockServer;

  const COMPANIES: &str = r#"[
    {"id": 1, "name": "Reserva El Paraíso", "category": "ecoturismo", "coordinates": {"lat": 4.60, "lng": -74.08}},
    {"id": 2, "name": "Café de la Sierra", "category": "gastronomía", "coordinates": {"lat": 11.24, "lng": -74.20}},
    {"id": 3, "name": "Senderos del Quindío", "category": "ecoturismo", "coordinates": {"latitude": "4.53", "longitude": "-75.68"}},
    {"id": 4, "name": "Hostal Verde", "category": "ecoturismo", "coordinates": null},
    {"id": 5, "name": "Artesanías Wayuu", "category": "artesanías", "coordinates": null}
  ]"#;

  fn client(server: &MockServer) -> CachedNaturClient {
    let api = NaturApi::new(HttpClient::new(&server.base_url()).unwrap());
    CachedNaturClient::new(api, QueryClient::new(), QueryOptions::default())
  }

  #[tokio::test]
  async fn test_markers_for_located_category() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method("GET").path("/api/companies/map");
        then.status(200).body(COMPANIES);
      })
      .await;

    let client = client(&server);
    let mut view = MapView::new(&client, Some("pk.test".to_string()));
    view.companies.settled().await;
    assert_eq!(view.status(), ViewStatus::Ready);

    view.set_category("ecoturismo");
    let ids: Vec<u64> = view.markers().iter().map(|m| m.company_id).collect();
    assert_eq!(ids, vec![1, 3]);
    assert_eq!(view.categories(), vec!["ecoturismo", "gastronomía"]);
  }

  #[tokio::test]
  async fn test_missing_token_disables_silently() {
    let server = MockServer::start_async().await;
    let mock = server
      .mock_async(|when, then| {
        when.path("/api/companies/map");
        then.status(200).body(COMPANIES);
      })
      .await;

    let client = client(&server);
    let mut view = MapView::new(&client, Some("  ".to_string()));
    tokio::task::yield_now().await;
    view.refresh();

    assert_eq!(view.status(), ViewStatus::Disabled);
    assert!(view.markers().is_empty());
    assert!(view.keys().is_empty());
    assert!(!view.tick());
    assert_eq!(client.cache().is_fetching(), 0);
    mock.assert_calls_async(0).await;
  }
}
