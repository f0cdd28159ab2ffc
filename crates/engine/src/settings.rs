//! User preferences.
//!
//! Every preference is persisted in the `preferences` table and mirrored in a
//! `watch` channel, so readers can either take the current value or observe
//! it as a stream. Setters write to the database first and publish after the
//! write succeeded. Writes are serialized so the published value always
//! matches the stored row.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::{StreamExt, stream::BoxStream};
use sea_orm::{ActiveValue, DatabaseConnection, EntityTrait, sea_query::OnConflict};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::{Mutex, watch};

use crate::{
    CategoryType, CurrencyPreference, DateRange, EngineError, FilterType, ResultEngine,
    filter_type::filter_range_at,
    preferences,
    repository::{SettingsRepository, watch_stream},
};

const KEY_FILTER_ENABLED: &str = "filter_enabled";
const KEY_FILTER_TYPE: &str = "filter_type";
const KEY_CUSTOM_RANGE: &str = "filter_custom_range";
const KEY_ACCOUNTS: &str = "filter_accounts";
const KEY_CATEGORIES: &str = "filter_categories";
const KEY_CATEGORY_TYPES: &str = "filter_category_types";
const KEY_CURRENCY: &str = "currency";
const KEY_REMINDER: &str = "reminder";

/// Source of "now" used to resolve date ranges.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Daily reminder preference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub enabled: bool,
    pub hour: u8,
    pub minute: u8,
}

impl Default for Reminder {
    fn default() -> Self {
        Self {
            enabled: false,
            hour: 20,
            minute: 0,
        }
    }
}

/// Current values of all the filter preferences.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterPreferences {
    pub enabled: bool,
    pub filter_type: FilterType,
    pub custom_range: Option<DateRange>,
    pub accounts: Option<BTreeSet<String>>,
    pub categories: Option<BTreeSet<String>>,
    pub category_types: Option<BTreeSet<CategoryType>>,
}

pub struct Settings {
    database: DatabaseConnection,
    timezone: Tz,
    clock: Clock,
    writes: Mutex<()>,
    filter_enabled: watch::Sender<bool>,
    filter_type: watch::Sender<FilterType>,
    custom_range: watch::Sender<Option<DateRange>>,
    accounts: watch::Sender<Option<BTreeSet<String>>>,
    categories: watch::Sender<Option<BTreeSet<String>>>,
    category_types: watch::Sender<Option<BTreeSet<CategoryType>>>,
    currency: watch::Sender<CurrencyPreference>,
    reminder: watch::Sender<Reminder>,
}

impl Settings {
    /// Return a builder for `Settings`.
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn now(&self) -> DateTime<Tz> {
        (self.clock)().with_timezone(&self.timezone)
    }

    pub fn filter(&self) -> FilterPreferences {
        FilterPreferences {
            enabled: *self.filter_enabled.borrow(),
            filter_type: *self.filter_type.borrow(),
            custom_range: *self.custom_range.borrow(),
            accounts: self.accounts.borrow().clone(),
            categories: self.categories.borrow().clone(),
            category_types: self.category_types.borrow().clone(),
        }
    }

    pub async fn set_filter_enabled(&self, enabled: bool) -> ResultEngine<()> {
        self.store(KEY_FILTER_ENABLED, &self.filter_enabled, enabled)
            .await
    }

    pub async fn set_filter_type(&self, filter_type: FilterType) -> ResultEngine<()> {
        self.store(KEY_FILTER_TYPE, &self.filter_type, filter_type)
            .await
    }

    /// Stores the range used by `FilterType::Custom`.
    ///
    /// The filter type is published again so observers pick up the new
    /// bounds when custom is already selected.
    pub async fn set_custom_range(&self, range: DateRange) -> ResultEngine<()> {
        DateRange::new(range.start, range.end)?;
        let _guard = self.writes.lock().await;
        self.persist(KEY_CUSTOM_RANGE, &Some(range)).await?;
        self.custom_range.send_replace(Some(range));
        if *self.filter_type.borrow() == FilterType::Custom {
            self.filter_type.send_replace(FilterType::Custom);
        }
        Ok(())
    }

    /// Restricts the filter to `accounts`; `None` or an empty set clears it.
    pub async fn set_accounts(&self, accounts: Option<BTreeSet<String>>) -> ResultEngine<()> {
        let accounts = accounts.filter(|ids| !ids.is_empty());
        self.store(KEY_ACCOUNTS, &self.accounts, accounts).await
    }

    /// Restricts the filter to `categories`; `None` or an empty set clears it.
    pub async fn set_categories(&self, categories: Option<BTreeSet<String>>) -> ResultEngine<()> {
        let categories = categories.filter(|ids| !ids.is_empty());
        self.store(KEY_CATEGORIES, &self.categories, categories)
            .await
    }

    pub async fn set_category_types(
        &self,
        category_types: Option<BTreeSet<CategoryType>>,
    ) -> ResultEngine<()> {
        let category_types = category_types.filter(|types| !types.is_empty());
        self.store(KEY_CATEGORY_TYPES, &self.category_types, category_types)
            .await
    }

    pub fn currency(&self) -> CurrencyPreference {
        *self.currency.borrow()
    }

    pub fn currency_changes(&self) -> BoxStream<'static, CurrencyPreference> {
        watch_stream(self.currency.subscribe())
    }

    pub async fn set_currency(&self, currency: CurrencyPreference) -> ResultEngine<()> {
        self.store(KEY_CURRENCY, &self.currency, currency).await
    }

    pub fn reminder(&self) -> Reminder {
        *self.reminder.borrow()
    }

    /// Whether the daily reminder is on, as a stream.
    pub fn reminder_status(&self) -> BoxStream<'static, bool> {
        watch_stream(self.reminder.subscribe())
            .map(|reminder| reminder.enabled)
            .boxed()
    }

    pub async fn set_reminder(&self, reminder: Reminder) -> ResultEngine<()> {
        if reminder.hour > 23 || reminder.minute > 59 {
            return Err(EngineError::InvalidPreference(format!(
                "invalid reminder time {:02}:{:02}",
                reminder.hour, reminder.minute
            )));
        }
        self.store(KEY_REMINDER, &self.reminder, reminder).await
    }

    /// Persists `value` under `key` and publishes it on `sender`, holding the
    /// write lock across both steps.
    async fn store<T: Serialize>(
        &self,
        key: &str,
        sender: &watch::Sender<T>,
        value: T,
    ) -> ResultEngine<()> {
        let _guard = self.writes.lock().await;
        self.persist(key, &value).await?;
        sender.send_replace(value);
        Ok(())
    }

    async fn persist<T: Serialize>(&self, key: &str, value: &T) -> ResultEngine<()> {
        let value = serde_json::to_string(value)
            .map_err(|err| EngineError::InvalidPreference(format!("{key}: {err}")))?;
        let model = preferences::ActiveModel {
            key: ActiveValue::Set(key.to_string()),
            value: ActiveValue::Set(value),
        };
        preferences::Entity::insert(model)
            .on_conflict(
                OnConflict::column(preferences::Column::Key)
                    .update_column(preferences::Column::Value)
                    .to_owned(),
            )
            .exec(&self.database)
            .await?;
        tracing::debug!(key, "preference saved");
        Ok(())
    }
}

impl SettingsRepository for Settings {
    fn is_filter_enabled(&self) -> BoxStream<'static, bool> {
        watch_stream(self.filter_enabled.subscribe())
    }

    fn filter_type(&self) -> BoxStream<'static, FilterType> {
        watch_stream(self.filter_type.subscribe())
    }

    fn categories(&self) -> BoxStream<'static, Option<BTreeSet<String>>> {
        watch_stream(self.categories.subscribe())
    }

    fn accounts(&self) -> BoxStream<'static, Option<BTreeSet<String>>> {
        watch_stream(self.accounts.subscribe())
    }

    fn category_types(&self) -> BoxStream<'static, Option<BTreeSet<CategoryType>>> {
        watch_stream(self.category_types.subscribe())
    }

    fn filter_range(&self, filter_type: FilterType) -> DateRange {
        filter_range_at(filter_type, &self.now(), *self.custom_range.borrow())
    }
}

/// The builder for `Settings`
pub struct SettingsBuilder {
    database: DatabaseConnection,
    timezone: Tz,
    clock: Clock,
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self {
            database: DatabaseConnection::default(),
            timezone: Tz::UTC,
            clock: Arc::new(Utc::now),
        }
    }
}

impl SettingsBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> SettingsBuilder {
        self.database = db;
        self
    }

    /// Time zone used for day, week, month and year boundaries.
    pub fn timezone(mut self, timezone: Tz) -> SettingsBuilder {
        self.timezone = timezone;
        self
    }

    pub fn clock(mut self, clock: Clock) -> SettingsBuilder {
        self.clock = clock;
        self
    }

    /// Load the stored preferences and construct `Settings`
    pub async fn build(self) -> ResultEngine<Settings> {
        let stored: HashMap<String, String> = preferences::Entity::find()
            .all(&self.database)
            .await?
            .into_iter()
            .map(|model| (model.key, model.value))
            .collect();

        let filter_enabled = decode::<bool>(&stored, KEY_FILTER_ENABLED)?.unwrap_or(false);
        let filter_type = decode::<FilterType>(&stored, KEY_FILTER_TYPE)?.unwrap_or_default();
        let custom_range = decode::<Option<DateRange>>(&stored, KEY_CUSTOM_RANGE)?.flatten();
        let accounts = decode::<Option<BTreeSet<String>>>(&stored, KEY_ACCOUNTS)?.flatten();
        let categories = decode::<Option<BTreeSet<String>>>(&stored, KEY_CATEGORIES)?.flatten();
        let category_types =
            decode::<Option<BTreeSet<CategoryType>>>(&stored, KEY_CATEGORY_TYPES)?.flatten();
        let currency = decode::<CurrencyPreference>(&stored, KEY_CURRENCY)?.unwrap_or_default();
        let reminder = decode::<Reminder>(&stored, KEY_REMINDER)?.unwrap_or_default();

        Ok(Settings {
            database: self.database,
            timezone: self.timezone,
            clock: self.clock,
            writes: Mutex::new(()),
            filter_enabled: watch::Sender::new(filter_enabled),
            filter_type: watch::Sender::new(filter_type),
            custom_range: watch::Sender::new(custom_range),
            accounts: watch::Sender::new(accounts),
            categories: watch::Sender::new(categories),
            category_types: watch::Sender::new(category_types),
            currency: watch::Sender::new(currency),
            reminder: watch::Sender::new(reminder),
        })
    }
}

fn decode<T: DeserializeOwned>(
    stored: &HashMap<String, String>,
    key: &str,
) -> ResultEngine<Option<T>> {
    stored
        .get(key)
        .map(|raw| {
            serde_json::from_str(raw)
                .map_err(|_| EngineError::InvalidPreference(format!("corrupted value for {key}")))
        })
        .transpose()
}
