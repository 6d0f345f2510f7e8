use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::api::keys;
use crate::api::types::{ProfileUpdate, User};
use crate::api::{CachedNaturClient, Method, Resource};
use crate::cache::{CacheKey, QueryObserver};
use crate::error::FieldErrors;
use crate::mutation::{Mutation, MutationRequest, MutationStatus, Rollback};

use super::{View, ViewError, ViewStatus};

/// Editable profile fields, as typed by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileForm {
  pub name: String,
  pub bio: String,
  pub phone: String,
  pub website: String,
  pub avatar_url: String,
}

impl ProfileForm {
  pub fn from_user(user: &User) -> Self {
    Self {
      name: user.name.clone(),
      bio: user.bio.clone().unwrap_or_default(),
      phone: user.phone.clone().unwrap_or_default(),
      website: user.website.clone().unwrap_or_default(),
      avatar_url: user.avatar_url.clone().unwrap_or_default(),
    }
  }

  /// Fields that differ from `user`, trimmed.
  pub fn changes(&self, user: &User) -> ProfileUpdate {
    fn changed(edited: &str, current: Option<&str>) -> Option<String> {
      let edited = edited.trim();
      (edited != current.unwrap_or("").trim()).then(|| edited.to_string())
    }

    ProfileUpdate {
      name: changed(&self.name, Some(user.name.as_str())),
      bio: changed(&self.bio, user.bio.as_deref()),
      phone: changed(&self.phone, user.phone.as_deref()),
      website: changed(&self.website, user.website.as_deref()),
      avatar_url: changed(&self.avatar_url, user.avatar_url.as_deref()),
    }
  }
}

/// Profile form for the signed-in user.
pub struct ProfileEditor {
  me: QueryObserver<User>,
  form: ProfileForm,
  /// Set once the form was filled from the server copy
  loaded: bool,
  field_errors: Arc<Mutex<FieldErrors>>,
  save: Mutation<ProfileUpdate, User>,
}

impl ProfileEditor {
  pub fn new(client: &CachedNaturClient) -> Self {
    let field_errors = Arc::new(Mutex::new(FieldErrors::default()));

    let api = client.api().clone();
    let rejected = field_errors.clone();
    let save = Mutation::new(
      client.cache().clone(),
      move |request: MutationRequest<ProfileUpdate>| {
        let api = api.clone();
        async move {
          let Resource::User { id } = request.target else {
            return Err(crate::error::FetchError::Parse(format!(
              "profile update aimed at {:?}",
              request.target
            )));
          };
          api.update_user(id, &request.payload).await
        }
      },
      // The form is only replaced after the server confirms
      Rollback::none(),
    )
    .on_mutate({
      let cleared = field_errors.clone();
      move |_: &MutationRequest<ProfileUpdate>| *lock(&cleared) = FieldErrors::default()
    })
    .on_error(move |error| {
      if let Some(fields) = error.field_errors() {
        *lock(&rejected) = fields;
      }
    });

    let mut editor = Self {
      me: client.me(),
      form: ProfileForm::default(),
      loaded: false,
      field_errors,
      save,
    };
    editor.sync_form();
    editor
  }

  fn sync_form(&mut self) -> bool {
    if self.loaded {
      return false;
    }
    let Some(user) = self.me.data() else {
      return false;
    };
    self.form = ProfileForm::from_user(&user);
    self.loaded = true;
    true
  }

  pub async fn settled(&mut self) -> ViewStatus {
    self.me.settled().await;
    self.sync_form();
    self.status()
  }

  pub fn user(&self) -> Option<Arc<User>> {
    self.me.data()
  }

  pub fn form(&self) -> &ProfileForm {
    &self.form
  }

  pub fn form_mut(&mut self) -> &mut ProfileForm {
    &mut self.form
  }

  pub fn field_errors(&self) -> FieldErrors {
    lock(&self.field_errors).clone()
  }

  pub fn is_saving(&self) -> bool {
    self.save.is_pending()
  }

  pub fn save_status(&self) -> MutationStatus {
    self.save.status()
  }

  /// Unsaved edits
  pub fn is_dirty(&self) -> bool {
    self
      .me
      .data()
      .is_some_and(|user| !self.form.changes(&user).is_empty())
  }

  /// Submit changed fields. Returns the updated user, or the current one
  /// when nothing changed.
  pub async fn save(&mut self) -> Result<User, ViewError> {
    let user = match self.me.data() {
      Some(user) => user,
      None => {
        return Err(match self.me.error() {
          Some(e) => ViewError::from(&e),
          None => ViewError::NotAuthenticated,
        })
      }
    };

    let update = self.form.changes(&user);
    if update.is_empty() {
      return Ok(user.as_ref().clone());
    }
    debug!(user_id = user.id, "saving profile");

    let request = MutationRequest::new(Resource::User { id: user.id }, Method::Update, update);
    match self.save.mutate(request).await {
      Ok(updated) => {
        self.form = ProfileForm::from_user(&updated);
        Ok(updated)
      }
      Err(e) => Err(ViewError::from(&e)),
    }
  }

  /// Throw away edits and show the server copy again.
  pub fn reset(&mut self) {
    self.loaded = false;
    self.sync_form();
  }
}

fn lock(errors: &Mutex<FieldErrors>) -> std::sync::MutexGuard<'_, FieldErrors> {
  errors.lock().unwrap_or_else(PoisonError::into_inner)
}

impl View for ProfileEditor {
  fn label(&self) -> String {
    match self.me.data() {
      Some(user) => format!("Perfil [{}]", user.name),
      None => "Perfil".to_string(),
    }
  }

  fn keys(&self) -> Vec<CacheKey> {
    vec![keys::me()]
  }

  fn status(&self) -> ViewStatus {
    ViewStatus::of(&self.me.state())
  }

  fn tick(&mut self) -> bool {
    let changed = self.me.poll();
    self.sync_form() || changed
  }

  fn refresh(&mut self) {
    self.me.refetch();
  }
}
