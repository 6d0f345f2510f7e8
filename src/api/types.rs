use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Geographic position of a company
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
  pub lat: f64,
  pub lng: f64,
}

impl Coordinates {
  /// Finite, in range, and not the (0, 0) placeholder the backend writes for
  /// companies that never set an address.
  pub fn is_valid(&self) -> bool {
    self.lat.is_finite()
      && self.lng.is_finite()
      && (-90.0..=90.0).contains(&self.lat)
      && (-180.0..=180.0).contains(&self.lng)
      && self.lat != 0.0
      && self.lng != 0.0
  }
}

/// Registered business shown in the directory and on the map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
  pub id: u64,
  pub name: String,
  pub category: String,
  pub description: Option<String>,
  pub city: Option<String>,
  pub coordinates: Option<Coordinates>,
  pub website: Option<String>,
  pub logo_url: Option<String>,
}

/// Marketplace account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: u64,
  pub name: String,
  pub email: String,
  pub role: Option<String>,
  pub avatar_url: Option<String>,
  pub bio: Option<String>,
  pub phone: Option<String>,
  pub website: Option<String>,
  pub company_id: Option<u64>,
}

/// The other side of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
  pub id: u64,
  pub name: String,
  pub avatar_url: Option<String>,
}

/// Conversation summary for the chat sidebar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
  pub id: u64,
  pub participant: Participant,
  pub last_message: Option<String>,
  pub last_message_at: Option<DateTime<Utc>>,
  pub unread_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
  pub id: u64,
  pub conversation_id: u64,
  pub sender_id: u64,
  pub content: String,
  pub created_at: DateTime<Utc>,
}

/// Payload for `POST /api/messages`
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
  pub conversation_id: u64,
  pub content: String,
}

/// Partial profile update; unset fields are left untouched server-side
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub bio: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub website: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub avatar_url: Option<String>,
}

impl ProfileUpdate {
  pub fn is_empty(&self) -> bool {
    *self == Self::default()
  }
}
