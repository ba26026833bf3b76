//! Per-visitor form state for the two search forms.
//!
//! Each visitor gets a session (idle timeout [`SESSION_IDLE_TIMEOUT`]) that
//! remembers the last values submitted in the client and car forms. The
//! client form additionally round-trips through a `FormData` cookie whose
//! value is `id;full_name;license_number;phone_number`.
//!
//! The dropdowns on both forms come from the page cache under their own
//! keys; when that page is empty the latest rows are loaded straight from
//! the store instead.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::{CacheError, Clock, Gateway, PageCache, SystemClock};
use crate::types::{Car, Client, Record};

pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub const FORM_COOKIE: &str = "FormData";
pub const FORM_COOKIE_LIFETIME_DAYS: i64 = 30;

/// Cache key of the client dropdown.
pub const CLIENT_OPTIONS_KEY: &str = "cachedClients";
/// Cache key of the car dropdown.
pub const CAR_OPTIONS_KEY: &str = "cachedCars";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientForm {
    pub id: i64,
    pub full_name: String,
    pub license_number: String,
    pub phone_number: String,
}

impl ClientForm {
    /// Encode as a `FormData` cookie value. `;` inside a field would break
    /// the format, so it is replaced with `,`.
    pub fn to_cookie(&self) -> String {
        let clean = |s: &str| s.replace(';', ",");
        format!(
            "{};{};{};{}",
            self.id,
            clean(&self.full_name),
            clean(&self.license_number),
            clean(&self.phone_number)
        )
    }

    /// Decode a `FormData` cookie value. Needs at least four fields; an
    /// unparsable id becomes 0.
    pub fn from_cookie(value: &str) -> Option<Self> {
        let fields: Vec<&str> = value.split(';').collect();
        if fields.len() < 4 {
            return None;
        }
        Some(Self {
            id: fields[0].trim().parse().unwrap_or(0),
            full_name: fields[1].to_string(),
            license_number: fields[2].to_string(),
            phone_number: fields[3].to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CarForm {
    pub id: i64,
    pub model: String,
    pub year: i32,
}

/// A cookie the caller should hand back to the visitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetCookie {
    pub name: &'static str,
    pub value: String,
    pub expires: DateTime<Utc>,
}

/// One `<option>` of a dropdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormOption {
    pub value: i64,
    pub label: String,
}

/// Raw client form submission. Absent fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct ClientSubmission {
    pub id: Option<String>,
    pub full_name: Option<String>,
    pub license_number: Option<String>,
    pub phone_number: Option<String>,
    /// `FormData` cookie presented by the visitor, if any.
    pub form_data: Option<String>,
}

/// Raw car form submission. Absent or unparsable fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct CarSubmission {
    pub id: Option<String>,
    pub model: Option<String>,
    pub year: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientFormView {
    pub form: ClientForm,
    pub options: Vec<FormOption>,
    pub set_cookie: SetCookie,
}

#[derive(Debug, Clone, Serialize)]
pub struct CarFormView {
    pub form: CarForm,
    pub options: Vec<FormOption>,
}

#[derive(Debug, Default)]
struct Session {
    client: Option<ClientForm>,
    car: Option<CarForm>,
}

struct SessionSlot {
    session: Session,
    last_seen: Instant,
}

/// Process-local visitor sessions.
pub struct SessionStore {
    sessions: DashMap<String, SessionSlot>,
    clock: Arc<dyn Clock>,
    idle_timeout: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: DashMap::new(),
            clock,
            idle_timeout: SESSION_IDLE_TIMEOUT,
        }
    }

    pub fn client_form(&self, visitor: &str) -> Option<ClientForm> {
        self.with_session(visitor, |s| s.client.clone())
    }

    pub fn car_form(&self, visitor: &str) -> Option<CarForm> {
        self.with_session(visitor, |s| s.car.clone())
    }

    pub fn save_client_form(&self, visitor: &str, form: ClientForm) {
        self.update(visitor, |s| s.client = Some(form));
    }

    pub fn save_car_form(&self, visitor: &str, form: CarForm) {
        self.update(visitor, |s| s.car = Some(form));
    }

    /// Drop sessions idle for longer than the timeout. Returns how many were removed.
    pub fn purge_idle(&self) -> usize {
        let now = self.clock.now();
        let before = self.sessions.len();
        self.sessions
            .retain(|_, slot| now.duration_since(slot.last_seen) < self.idle_timeout);
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            debug!(removed, "purged idle sessions");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Read from a live session, refreshing its idle timer. An idle-expired
    /// session is discarded and reads as absent.
    fn with_session<T>(&self, visitor: &str, read: impl FnOnce(&Session) -> Option<T>) -> Option<T> {
        let now = self.clock.now();
        let mut slot = self.sessions.get_mut(visitor)?;
        if now.duration_since(slot.last_seen) >= self.idle_timeout {
            drop(slot);
            // Re-checked under the shard lock: a concurrent save may have revived it.
            self.sessions.remove_if(visitor, |_, slot| {
                now.duration_since(slot.last_seen) >= self.idle_timeout
            });
            debug!(visitor, "session expired");
            return None;
        }
        slot.last_seen = now;
        read(&slot.session)
    }

    fn update(&self, visitor: &str, write: impl FnOnce(&mut Session)) {
        let now = self.clock.now();
        let mut slot = self
            .sessions
            .entry(visitor.to_string())
            .or_insert_with(|| SessionSlot {
                session: Session::default(),
                last_seen: now,
            });
        if now.duration_since(slot.last_seen) >= self.idle_timeout {
            slot.session = Session::default();
        }
        slot.last_seen = now;
        write(&mut slot.session);
    }
}

/// Cached dropdown page under `key`, or the latest rows when that page is empty.
fn dropdown<G: Gateway, R: Record>(pages: &PageCache<G>, key: &str) -> Result<Vec<R>, CacheError> {
    let cached = pages.get_page::<R>(key)?;
    if !cached.is_empty() {
        return Ok(cached.to_vec());
    }
    info!(kind = %R::KIND, key, "no cached rows for dropdown, loading latest from store");
    pages.get_fresh_reverse_page::<R>()
}

/// Client search form: restore, apply the submission, persist, and build the dropdown.
pub fn client_form<G: Gateway>(
    pages: &PageCache<G>,
    sessions: &SessionStore,
    visitor: &str,
    submission: ClientSubmission,
) -> Result<ClientFormView, CacheError> {
    let mut form = sessions.client_form(visitor).unwrap_or_default();

    let options = dropdown::<G, Client>(pages, CLIENT_OPTIONS_KEY)?
        .into_iter()
        .map(|c| FormOption {
            value: c.client_id,
            label: c.full_name,
        })
        .collect();

    if let Some(prefill) = submission.form_data.as_deref().and_then(ClientForm::from_cookie) {
        form = prefill;
    }

    if let Some(id) = submission.id {
        form.id = id.trim().parse().unwrap_or(0);
    }
    if let Some(full_name) = submission.full_name {
        form.full_name = full_name;
    }
    if let Some(license_number) = submission.license_number {
        form.license_number = license_number;
    }
    if let Some(phone_number) = submission.phone_number {
        form.phone_number = phone_number;
    }

    let set_cookie = SetCookie {
        name: FORM_COOKIE,
        value: form.to_cookie(),
        expires: Utc::now() + chrono::Duration::days(FORM_COOKIE_LIFETIME_DAYS),
    };
    sessions.save_client_form(visitor, form.clone());

    Ok(ClientFormView {
        form,
        options,
        set_cookie,
    })
}

/// Car search form: restore, apply the submission, persist, and build the dropdown.
pub fn car_form<G: Gateway>(
    pages: &PageCache<G>,
    sessions: &SessionStore,
    visitor: &str,
    submission: CarSubmission,
) -> Result<CarFormView, CacheError> {
    let mut form = sessions.car_form(visitor).unwrap_or_default();

    let options = dropdown::<G, Car>(pages, CAR_OPTIONS_KEY)?
        .into_iter()
        .map(|c| FormOption {
            value: c.car_id,
            label: c.model,
        })
        .collect();

    if let Some(id) = submission.id.and_then(|s| s.trim().parse().ok()) {
        form.id = id;
    }
    if let Some(year) = submission.year.and_then(|s| s.trim().parse().ok()) {
        form.year = year;
    }
    if let Some(model) = submission.model {
        form.model = model;
    }

    sessions.save_car_form(visitor, form.clone());

    Ok(CarFormView { form, options })
}
