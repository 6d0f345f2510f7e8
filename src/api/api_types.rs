//! Serde-deserializable types matching the marketplace API responses.
//!
//! These types are separate from domain types so that every quirk of the
//! wire format (wrapped lists, string-encoded numbers, null coordinates) is
//! resolved here, at the boundary. A body that does not fit these schemas is
//! rejected by the HTTP wrapper as a parse error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use super::types::{Company, Conversation, Coordinates, Message, Participant, User};

// ============================================================================
// Envelopes
// ============================================================================

/// List endpoints answer either a bare array or `{"data": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiList<T> {
  Bare(Vec<T>),
  Wrapped { data: Vec<T> },
}

impl<T> ApiList<T> {
  pub fn into_vec(self) -> Vec<T> {
    match self {
      ApiList::Bare(items) | ApiList::Wrapped { data: items } => items,
    }
  }
}

/// `/api/auth/me` answers either the user or `{"user": {...}}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiUserEnvelope {
  Wrapped { user: ApiUser },
  Bare(ApiUser),
}

impl ApiUserEnvelope {
  pub fn into_user(self) -> ApiUser {
    match self {
      ApiUserEnvelope::Wrapped { user } | ApiUserEnvelope::Bare(user) => user,
    }
  }
}

// ============================================================================
// Companies
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiCoordinates {
  #[serde(alias = "latitude", deserialize_with = "number_or_string")]
  pub lat: f64,
  #[serde(alias = "longitude", alias = "lon", deserialize_with = "number_or_string")]
  pub lng: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCompany {
  pub id: u64,
  pub name: String,
  #[serde(default)]
  pub category: Option<String>,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub city: Option<String>,
  #[serde(default)]
  pub coordinates: Option<ApiCoordinates>,
  #[serde(default)]
  pub website: Option<String>,
  #[serde(default)]
  pub logo_url: Option<String>,
}

impl From<ApiCompany> for Company {
  fn from(c: ApiCompany) -> Self {
    Company {
      id: c.id,
      name: c.name,
      category: c.category.unwrap_or_default(),
      description: non_empty(c.description),
      city: non_empty(c.city),
      coordinates: c.coordinates.map(|p| Coordinates {
        lat: p.lat,
        lng: p.lng,
      }),
      website: non_empty(c.website),
      logo_url: non_empty(c.logo_url),
    }
  }
}

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiUser {
  pub id: u64,
  pub name: String,
  pub email: String,
  #[serde(default)]
  pub role: Option<String>,
  #[serde(default)]
  pub avatar_url: Option<String>,
  #[serde(default)]
  pub bio: Option<String>,
  #[serde(default)]
  pub phone: Option<String>,
  #[serde(default)]
  pub website: Option<String>,
  #[serde(default)]
  pub company_id: Option<u64>,
}

impl From<ApiUser> for User {
  fn from(u: ApiUser) -> Self {
    User {
      id: u.id,
      name: u.name,
      email: u.email,
      role: non_empty(u.role),
      avatar_url: non_empty(u.avatar_url),
      bio: non_empty(u.bio),
      phone: non_empty(u.phone),
      website: non_empty(u.website),
      company_id: u.company_id,
    }
  }
}

// ============================================================================
// Conversations and messages
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiParticipant {
  pub id: u64,
  pub name: String,
  #[serde(default)]
  pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiLastMessage {
  pub content: String,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConversation {
  pub id: u64,
  pub participant: ApiParticipant,
  #[serde(default)]
  pub last_message: Option<ApiLastMessage>,
  #[serde(default)]
  pub unread_count: u32,
}

impl From<ApiConversation> for Conversation {
  fn from(c: ApiConversation) -> Self {
    let (last_message, last_message_at) = match c.last_message {
      Some(m) => (Some(m.content), Some(m.created_at)),
      None => (None, None),
    };
    Conversation {
      id: c.id,
      participant: Participant {
        id: c.participant.id,
        name: c.participant.name,
        avatar_url: non_empty(c.participant.avatar_url),
      },
      last_message,
      last_message_at,
      unread_count: c.unread_count,
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMessage {
  pub id: u64,
  pub conversation_id: u64,
  pub sender_id: u64,
  pub content: String,
  pub created_at: DateTime<Utc>,
}

impl From<ApiMessage> for Message {
  fn from(m: ApiMessage) -> Self {
    Message {
      id: m.id,
      conversation_id: m.conversation_id,
      sender_id: m.sender_id,
      content: m.content,
      created_at: m.created_at,
    }
  }
}

// ============================================================================
// Helpers
// ============================================================================

fn non_empty(value: Option<String>) -> Option<String> {
  value.filter(|s| !s.trim().is_empty())
}

/// Coordinates arrive as numbers from newer endpoints and as decimal strings
/// from older ones.
fn number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Raw {
    Number(f64),
    Text(String),
  }

  match Raw::deserialize(deserializer)? {
    Raw::Number(n) => Ok(n),
    Raw::Text(s) => s
      .trim()
      .parse()
      .map_err(|_| serde::de::Error::custom(format!("invalid coordinate '{}'", s))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_company_with_null_coordinates() {
    let json = r#"{"id": 1, "name": "Casa Verde", "category": "ecoturismo", "coordinates": null}"#;
    let company: Company = serde_json::from_str::<ApiCompany>(json).unwrap().into();
    assert_eq!(company.coordinates, None);
    assert_eq!(company.category, "ecoturismo");
  }

  #[test]
  fn test_company_with_string_coordinates() {
    let json = r#"{"id": 2, "name": "Finca", "coordinates": {"latitude": "4.61", "longitude": -74.08}}"#;
    let company: Company = serde_json::from_str::<ApiCompany>(json).unwrap().into();
    assert_eq!(company.coordinates, Some(Coordinates { lat: 4.61, lng: -74.08 }));
    assert_eq!(company.category, "");
  }

  #[test]
  fn test_invalid_coordinate_text_is_rejected() {
    let json = r#"{"id": 3, "name": "X", "coordinates": {"lat": "north", "lng": 1}}"#;
    assert!(serde_json::from_str::<ApiCompany>(json).is_err());
  }

  #[test]
  fn test_list_envelopes() {
    let bare: ApiList<ApiParticipant> = serde_json::from_str(r#"[{"id": 1, "name": "Ana"}]"#).unwrap();
    let wrapped: ApiList<ApiParticipant> =
      serde_json::from_str(r#"{"data": [{"id": 1, "name": "Ana"}, {"id": 2, "name": "Luis"}]}"#).unwrap();
    assert_eq!(bare.into_vec().len(), 1);
    assert_eq!(wrapped.into_vec().len(), 2);
  }

  #[test]
  fn test_user_envelope_and_blank_fields() {
    let json = r#"{"user": {"id": 9, "name": "Ana", "email": "ana@example.com", "bio": "  ", "companyId": 4}}"#;
    let user: User = serde_json::from_str::<ApiUserEnvelope>(json).unwrap().into_user().into();
    assert_eq!(user.id, 9);
    assert_eq!(user.bio, None);
    assert_eq!(user.company_id, Some(4));
  }

  #[test]
  fn test_conversation_flattens_last_message() {
    let json = r#"{
      "id": 7,
      "participant": {"id": 2, "name": "Luis"},
      "lastMessage": {"content": "¿Hay cupos?", "createdAt": "2024-05-01T10:00:00Z"},
      "unreadCount": 3
    }"#;
    let conversation: Conversation = serde_json::from_str::<ApiConversation>(json).unwrap().into();
    assert_eq!(conversation.last_message.as_deref(), Some("¿Hay cupos?"));
    assert!(conversation.last_message_at.is_some());
    assert_eq!(conversation.unread_count, 3);
  }
}
