//! View-local filtering over cached lists.
//!
//! Predicates are pure and synchronous; they never touch the cache. Views
//! re-run them on every render against whatever the observer currently holds.

use std::collections::BTreeMap;

use crate::api::types::{Company, Conversation, Coordinates};

/// A test applied to one item of a list.
pub trait Predicate<T> {
  fn matches(&self, item: &T) -> bool;
}

/// Items that free-text search looks into.
pub trait Searchable {
  /// Fields a search term is matched against.
  fn search_fields(&self) -> Vec<&str>;
}

/// Items grouped under a category tab.
pub trait Categorized {
  fn category(&self) -> &str;
}

/// Items that may be placed on the map.
pub trait Locatable {
  fn coordinates(&self) -> Option<Coordinates>;
}

impl Searchable for Company {
  fn search_fields(&self) -> Vec<&str> {
    let mut fields = vec![self.name.as_str(), self.category.as_str()];
    if let Some(description) = &self.description {
      fields.push(description);
    }
    fields
  }
}

impl Categorized for Company {
  fn category(&self) -> &str {
    &self.category
  }
}

impl Locatable for Company {
  fn coordinates(&self) -> Option<Coordinates> {
    self.coordinates
  }
}

impl Searchable for Conversation {
  fn search_fields(&self) -> Vec<&str> {
    let mut fields = vec![self.participant.name.as_str()];
    if let Some(last) = &self.last_message {
      fields.push(last);
    }
    fields
  }
}

/// Case-insensitive substring search. A blank term matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextSearch {
  needle: String,
}

impl TextSearch {
  pub fn new(term: &str) -> Self {
    Self {
      needle: term.trim().to_lowercase(),
    }
  }

  pub fn is_active(&self) -> bool {
    !self.needle.is_empty()
  }
}

impl<T: Searchable> Predicate<T> for TextSearch {
  fn matches(&self, item: &T) -> bool {
    !self.is_active()
      || item
        .search_fields()
        .iter()
        .any(|field| field.to_lowercase().contains(&self.needle))
  }
}

/// Case-insensitive category equality. An empty category means "All".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryIs {
  category: String,
}

impl CategoryIs {
  pub fn new(category: &str) -> Self {
    Self {
      category: category.trim().to_lowercase(),
    }
  }

  pub fn is_active(&self) -> bool {
    !self.category.is_empty()
  }
}

impl<T: Categorized> Predicate<T> for CategoryIs {
  fn matches(&self, item: &T) -> bool {
    !self.is_active() || item.category().trim().to_lowercase() == self.category
  }
}

/// Keeps items whose coordinates can be drawn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HasValidCoordinates;

impl<T: Locatable> Predicate<T> for HasValidCoordinates {
  fn matches(&self, item: &T) -> bool {
    item.coordinates().is_some_and(|c| c.is_valid())
  }
}

/// Conjunction of predicates.
pub struct Filter<T> {
  predicates: Vec<Box<dyn Predicate<T> + Send + Sync>>,
}

impl<T> Default for Filter<T> {
  fn default() -> Self {
    Self {
      predicates: Vec::new(),
    }
  }
}

impl<T> Filter<T> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with<P>(mut self, predicate: P) -> Self
  where
    P: Predicate<T> + Send + Sync + 'static,
  {
    self.predicates.push(Box::new(predicate));
    self
  }

  pub fn len(&self) -> usize {
    self.predicates.len()
  }

  pub fn is_empty(&self) -> bool {
    self.predicates.is_empty()
  }

  /// Items passing every predicate, in their original order.
  pub fn apply<'a>(&self, items: &'a [T]) -> Vec<&'a T> {
    items
      .iter()
      .filter(|item| self.predicates.iter().all(|p| p.matches(item)))
      .collect()
  }
}

impl<T> Predicate<T> for Filter<T> {
  fn matches(&self, item: &T) -> bool {
    self.predicates.iter().all(|p| p.matches(item))
  }
}

/// Search box, category tab and map toggle shared by the map and the
/// directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompanyFilter {
  pub search: String,
  pub category: String,
  pub require_coordinates: bool,
}

impl CompanyFilter {
  pub fn for_map() -> Self {
    Self {
      require_coordinates: true,
      ..Self::default()
    }
  }

  pub fn build(&self) -> Filter<Company> {
    let mut filter = Filter::new()
      .with(TextSearch::new(&self.search))
      .with(CategoryIs::new(&self.category));
    if self.require_coordinates {
      filter = filter.with(HasValidCoordinates);
    }
    filter
  }

  pub fn apply<'a>(&self, companies: &'a [Company]) -> Vec<&'a Company> {
    self.build().apply(companies)
  }
}

/// Distinct categories for the tab bar, case-insensitively merged and sorted.
///
/// The first spelling seen wins.
pub fn unique_categories<T: Categorized>(items: &[T]) -> Vec<String> {
  let mut seen: BTreeMap<String, String> = BTreeMap::new();
  for item in items {
    let category = item.category().trim();
    if category.is_empty() {
      continue;
    }
    seen
      .entry(category.to_lowercase())
      .or_insert_with(|| category.to_string());
  }
  seen.into_values().collect()
}

/// Sidebar search over participant name and last message.
pub fn search_conversations<'a>(conversations: &'a [Conversation], term: &str) -> Vec<&'a Conversation> {
  Filter::new().with(TextSearch::new(term)).apply(conversations)
}
