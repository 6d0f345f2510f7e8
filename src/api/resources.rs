//! Static dependency table from written resources to the cache keys they
//! make stale.
//!
//! Every mutation names its target [`Resource`]; the mutation executor looks
//! the resource up here instead of each call site listing keys by hand.

use crate::cache::{CacheKey, KeyMatch, KeyPart};

/// Kind of write a mutation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Create,
  Update,
  Delete,
}

impl Method {
  pub const ALL: [Method; 3] = [Method::Create, Method::Update, Method::Delete];
}

/// Target of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
  /// A message inside a conversation
  Message { conversation_id: u64 },
  /// A conversation; `None` when creating one
  Conversation { id: Option<u64> },
  User { id: u64 },
  /// A company; `None` when registering one
  Company { id: Option<u64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
  Message,
  Conversation,
  User,
  Company,
}

impl ResourceKind {
  pub const ALL: [ResourceKind; 4] = [
    ResourceKind::Message,
    ResourceKind::Conversation,
    ResourceKind::User,
    ResourceKind::Company,
  ];
}

impl Resource {
  pub fn kind(&self) -> ResourceKind {
    match self {
      Resource::Message { .. } => ResourceKind::Message,
      Resource::Conversation { .. } => ResourceKind::Conversation,
      Resource::User { .. } => ResourceKind::User,
      Resource::Company { .. } => ResourceKind::Company,
    }
  }

  /// Identifier substituted into `Seg::Id` slots of the table.
  fn id(&self) -> Option<u64> {
    match self {
      Resource::Message { conversation_id } => Some(*conversation_id),
      Resource::Conversation { id } | Resource::Company { id } => *id,
      Resource::User { id } => Some(*id),
    }
  }

  /// Keys to invalidate once a write to this resource succeeds.
  pub fn invalidations(&self, method: Method) -> Vec<KeyMatch> {
    let id = self.id();
    templates(self.kind())
      .iter()
      .filter(|t| t.applies_to(method))
      .filter_map(|t| t.instantiate(id))
      .collect()
  }
}

#[derive(Debug, Clone, Copy)]
enum Seg {
  Lit(&'static str),
  Id,
}

#[derive(Debug)]
struct Template {
  segs: &'static [Seg],
  exact: bool,
  /// Empty means every method
  methods: &'static [Method],
}

impl Template {
  const fn exact(segs: &'static [Seg]) -> Self {
    Self {
      segs,
      exact: true,
      methods: &[],
    }
  }

  const fn prefix(segs: &'static [Seg]) -> Self {
    Self {
      segs,
      exact: false,
      methods: &[],
    }
  }

  const fn only(mut self, methods: &'static [Method]) -> Self {
    self.methods = methods;
    self
  }

  fn applies_to(&self, method: Method) -> bool {
    self.methods.is_empty() || self.methods.contains(&method)
  }

  fn instantiate(&self, id: Option<u64>) -> Option<KeyMatch> {
    let parts = self
      .segs
      .iter()
      .map(|seg| match seg {
        Seg::Lit(s) => Some(KeyPart::from(*s)),
        Seg::Id => id.map(KeyPart::from),
      })
      .collect::<Option<Vec<_>>>()?;
    let key = CacheKey::new(parts);
    Some(if self.exact {
      KeyMatch::Exact(key)
    } else {
      KeyMatch::Prefix(key)
    })
  }
}

use Seg::{Id, Lit};

const MESSAGE: &[Template] = &[
  // Sidebar shows last message and unread counts
  Template::exact(&[Lit("conversations")]),
  Template::exact(&[Lit("conversations"), Id, Lit("messages")]),
];

const CONVERSATION: &[Template] = &[
  Template::exact(&[Lit("conversations")]),
  Template::prefix(&[Lit("conversations"), Id]).only(&[Method::Update, Method::Delete]),
];

const USER: &[Template] = &[
  Template::prefix(&[Lit("users"), Id]),
  Template::exact(&[Lit("auth"), Lit("me")]),
];

const COMPANY: &[Template] = &[
  // Map, directory and detail all live under "companies"
  Template::prefix(&[Lit("companies")]),
];

const TABLE: &[(ResourceKind, &[Template])] = &[
  (ResourceKind::Message, MESSAGE),
  (ResourceKind::Conversation, CONVERSATION),
  (ResourceKind::User, USER),
  (ResourceKind::Company, COMPANY),
];

fn templates(kind: ResourceKind) -> &'static [Template] {
  TABLE
    .iter()
    .find(|(k, _)| *k == kind)
    .map(|(_, t)| *t)
    .unwrap_or(&[])
}
