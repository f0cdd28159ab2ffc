//! The transaction filter pipeline.
//!
//! Five filter preferences change independently: whether the filter is
//! enabled, the category types, the categories, the accounts and the date
//! bucket. Every time any of them changes a new [`FilterSnapshot`] is built,
//! the matching [`TransactionQuery`] is selected and the consumer is moved
//! over to that query's stream. Only the query of the latest snapshot ever
//! reaches the consumer.

use std::{
    collections::BTreeSet,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::{
    Stream, StreamExt, future,
    stream::{self, BoxStream},
};

use crate::{
    CategoryType, DateRange, FilterType, ResultEngine, Transaction,
    repository::{SettingsRepository, TransactionQuery, TransactionRepository, TransactionStream},
};

/// Point-in-time combination of the filter preferences.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterSnapshot {
    pub is_enabled: bool,
    pub filter_type: FilterType,
    /// Resolved bounds of `filter_type`; ignored when it is `All`.
    pub date_range: DateRange,
    pub accounts: Option<BTreeSet<String>>,
    /// Carried along but never consulted when selecting the query.
    pub categories: Option<BTreeSet<String>>,
    /// Carried along but never consulted when selecting the query.
    pub category_types: Option<BTreeSet<CategoryType>>,
}

impl FilterSnapshot {
    /// Selects the query for this snapshot.
    ///
    /// Accounts restrict the result only while the filter is enabled; the
    /// date range applies whenever the filter type is not `All`, enabled or
    /// not.
    pub fn query(&self) -> TransactionQuery {
        let accounts = self.accounts.as_ref().filter(|_| self.is_enabled);
        match (self.filter_type, accounts) {
            (FilterType::All, None) => TransactionQuery::All,
            (FilterType::All, Some(ids)) => TransactionQuery::Accounts(ids.clone()),
            (_, None) => TransactionQuery::DateRange(self.date_range),
            (_, Some(ids)) => TransactionQuery::AccountsAndDateRange(ids.clone(), self.date_range),
        }
    }
}

enum SettingUpdate {
    Enabled(bool),
    CategoryTypes(Option<BTreeSet<CategoryType>>),
    Categories(Option<BTreeSet<String>>),
    Accounts(Option<BTreeSet<String>>),
    FilterType(FilterType),
}

/// Latest value of each input; a snapshot exists once all five are known.
#[derive(Default)]
struct LatestSettings {
    is_enabled: Option<bool>,
    category_types: Option<Option<BTreeSet<CategoryType>>>,
    categories: Option<Option<BTreeSet<String>>>,
    accounts: Option<Option<BTreeSet<String>>>,
    filter_type: Option<FilterType>,
}

impl LatestSettings {
    fn apply(&mut self, update: SettingUpdate) {
        match update {
            SettingUpdate::Enabled(value) => self.is_enabled = Some(value),
            SettingUpdate::CategoryTypes(value) => self.category_types = Some(value),
            SettingUpdate::Categories(value) => self.categories = Some(value),
            SettingUpdate::Accounts(value) => self.accounts = Some(value),
            SettingUpdate::FilterType(value) => self.filter_type = Some(value),
        }
    }

    fn snapshot(&self, settings: &dyn SettingsRepository) -> Option<FilterSnapshot> {
        let is_enabled = self.is_enabled?;
        let filter_type = self.filter_type?;
        let accounts = self.accounts.clone()?;
        let categories = self.categories.clone()?;
        let category_types = self.category_types.clone()?;
        Some(FilterSnapshot {
            is_enabled,
            filter_type,
            // Resolved on every snapshot: the bounds move with the clock.
            date_range: settings.filter_range(filter_type),
            accounts,
            categories,
            category_types,
        })
    }
}

/// Combines the five preference streams into a stream of snapshots, one per
/// upstream emission once every input has produced a value.
fn snapshots(settings: Arc<dyn SettingsRepository>) -> BoxStream<'static, FilterSnapshot> {
    let updates = stream::select_all([
        settings.is_filter_enabled().map(SettingUpdate::Enabled).boxed(),
        settings
            .category_types()
            .map(SettingUpdate::CategoryTypes)
            .boxed(),
        settings.categories().map(SettingUpdate::Categories).boxed(),
        settings.accounts().map(SettingUpdate::Accounts).boxed(),
        settings.filter_type().map(SettingUpdate::FilterType).boxed(),
    ]);

    updates
        .scan(LatestSettings::default(), move |latest, update| {
            latest.apply(update);
            future::ready(Some(latest.snapshot(settings.as_ref())))
        })
        .filter_map(future::ready)
        .boxed()
}

/// Builds the live list of transactions visible under the current filter
/// preferences.
#[derive(Clone)]
pub struct TransactionFilter {
    settings: Arc<dyn SettingsRepository>,
    transactions: Arc<dyn TransactionRepository>,
}

impl TransactionFilter {
    pub fn new(
        settings: Arc<dyn SettingsRepository>,
        transactions: Arc<dyn TransactionRepository>,
    ) -> Self {
        Self {
            settings,
            transactions,
        }
    }

    /// Subscribes to the filtered transactions.
    ///
    /// Nothing is emitted until every preference has a value and the first
    /// query has produced a result.
    pub fn transactions(&self) -> FilteredTransactions {
        FilteredTransactions {
            snapshots: snapshots(Arc::clone(&self.settings)),
            transactions: Arc::clone(&self.transactions),
            generation: 0,
            snapshot: None,
            active: None,
            snapshots_done: false,
        }
    }
}

struct ActiveQuery {
    generation: u64,
    results: TransactionStream,
}

/// Stream of the transactions matching the latest filter snapshot.
///
/// Each snapshot bumps the generation and replaces the active query stream.
/// The replaced stream is dropped, which ends its subscription, so results
/// it had in flight are never delivered. Store errors are passed through
/// as `Err` items.
///
/// The stream ends once the preference streams have ended and the last
/// query stream has ended too.
pub struct FilteredTransactions {
    snapshots: BoxStream<'static, FilterSnapshot>,
    transactions: Arc<dyn TransactionRepository>,
    generation: u64,
    snapshot: Option<FilterSnapshot>,
    active: Option<ActiveQuery>,
    snapshots_done: bool,
}

impl FilteredTransactions {
    /// The snapshot the current results belong to.
    pub fn snapshot(&self) -> Option<&FilterSnapshot> {
        self.snapshot.as_ref()
    }

    /// Number of snapshots seen so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn switch_to(&mut self, snapshot: FilterSnapshot) {
        self.generation += 1;
        let query = snapshot.query();
        tracing::debug!(generation = self.generation, ?query, "filter changed");
        let results = query.subscribe(self.transactions.as_ref());
        self.active = Some(ActiveQuery {
            generation: self.generation,
            results,
        });
        self.snapshot = Some(snapshot);
    }
}

impl Stream for FilteredTransactions {
    type Item = ResultEngine<Vec<Transaction>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        // Drain every pending snapshot before reading results, so a result
        // is never taken from a query that a newer snapshot already replaced.
        while !this.snapshots_done {
            match this.snapshots.poll_next_unpin(cx) {
                Poll::Ready(Some(snapshot)) => this.switch_to(snapshot),
                Poll::Ready(None) => this.snapshots_done = true,
                Poll::Pending => break,
            }
        }

        if let Some(active) = this.active.as_mut() {
            match active.results.poll_next_unpin(cx) {
                Poll::Ready(Some(item)) => return Poll::Ready(Some(item)),
                Poll::Ready(None) => {
                    tracing::debug!(generation = active.generation, "query stream ended");
                    this.active = None;
                }
                Poll::Pending => {}
            }
        }

        if this.snapshots_done && this.active.is_none() {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use tokio::sync::{mpsc, watch};

    use super::*;
    use crate::{EngineError, repository::watch_stream};

    fn range_of(filter_type: FilterType) -> DateRange {
        match filter_type {
            FilterType::All => DateRange { start: 0, end: 0 },
            FilterType::Last30Days => DateRange {
                start: 1_000,
                end: 2_000,
            },
            _ => DateRange {
                start: 5_000,
                end: 9_000,
            },
        }
    }

    struct FakeSettings {
        enabled: watch::Sender<bool>,
        filter_type: watch::Sender<FilterType>,
        accounts: watch::Sender<Option<BTreeSet<String>>>,
        categories: watch::Sender<Option<BTreeSet<String>>>,
        category_types: watch::Sender<Option<BTreeSet<CategoryType>>>,
        range_calls: Mutex<Vec<FilterType>>,
    }

    impl FakeSettings {
        fn new(
            enabled: bool,
            filter_type: FilterType,
            accounts: Option<BTreeSet<String>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                enabled: watch::Sender::new(enabled),
                filter_type: watch::Sender::new(filter_type),
                accounts: watch::Sender::new(accounts),
                categories: watch::Sender::new(None),
                category_types: watch::Sender::new(None),
                range_calls: Mutex::new(Vec::new()),
            })
        }

        fn range_calls(&self) -> Vec<FilterType> {
            self.range_calls.lock().unwrap().clone()
        }
    }

    impl SettingsRepository for FakeSettings {
        fn is_filter_enabled(&self) -> BoxStream<'static, bool> {
            watch_stream(self.enabled.subscribe())
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
            self.range_calls.lock().unwrap().push(filter_type);
            range_of(filter_type)
        }
    }

    type Results = mpsc::UnboundedSender<ResultEngine<Vec<Transaction>>>;

    /// Records every query and hands out a channel to feed its results.
    #[derive(Default)]
    struct FakeTransactions {
        calls: Mutex<Vec<(TransactionQuery, Results)>>,
    }

    impl FakeTransactions {
        fn open(&self, query: TransactionQuery) -> TransactionStream {
            let (tx, rx) = mpsc::unbounded_channel();
            self.calls.lock().unwrap().push((query, tx));
            stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
                .boxed()
        }

        fn queries(&self) -> Vec<TransactionQuery> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(query, _)| query.clone())
                .collect()
        }

        fn results(&self, call: usize) -> Results {
            self.calls.lock().unwrap()[call].1.clone()
        }
    }

    impl TransactionRepository for FakeTransactions {
        fn all_transactions(&self) -> TransactionStream {
            self.open(TransactionQuery::All)
        }

        fn transactions_by_account_ids(&self, ids: &BTreeSet<String>) -> TransactionStream {
            self.open(TransactionQuery::Accounts(ids.clone()))
        }

        fn transactions_by_date_range(&self, range: DateRange) -> TransactionStream {
            self.open(TransactionQuery::DateRange(range))
        }

        fn transactions_by_account_ids_and_date_range(
            &self,
            ids: &BTreeSet<String>,
            range: DateRange,
        ) -> TransactionStream {
            self.open(TransactionQuery::AccountsAndDateRange(ids.clone(), range))
        }
    }

    fn ids(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn snapshot(
        is_enabled: bool,
        filter_type: FilterType,
        accounts: Option<BTreeSet<String>>,
    ) -> FilterSnapshot {
        FilterSnapshot {
            is_enabled,
            filter_type,
            date_range: range_of(filter_type),
            accounts,
            categories: None,
            category_types: None,
        }
    }

    fn fixture(
        enabled: bool,
        filter_type: FilterType,
        accounts: Option<BTreeSet<String>>,
    ) -> (Arc<FakeSettings>, Arc<FakeTransactions>, FilteredTransactions) {
        let settings = FakeSettings::new(enabled, filter_type, accounts);
        let transactions = Arc::new(FakeTransactions::default());
        let feed = TransactionFilter::new(settings.clone(), transactions.clone()).transactions();
        (settings, transactions, feed)
    }

    /// Polls the feed until it goes idle; returns the item if one arrived.
    async fn settle(
        feed: &mut FilteredTransactions,
    ) -> Option<ResultEngine<Vec<Transaction>>> {
        tokio::time::timeout(Duration::from_millis(50), feed.next())
            .await
            .ok()
            .flatten()
    }

    fn transaction(amount_minor: i64) -> Transaction {
        Transaction::new(
            crate::TransactionKind::Expense,
            amount_minor,
            uuid::Uuid::new_v4(),
            None,
            Some(uuid::Uuid::new_v4()),
            None,
            chrono::Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn disabled_all_selects_every_transaction() {
        let query = snapshot(false, FilterType::All, Some(ids(&["acc1"]))).query();
        assert_eq!(query, TransactionQuery::All);
    }

    #[test]
    fn disabled_dated_selects_date_range() {
        let query = snapshot(false, FilterType::ThisMonth, None).query();
        assert_eq!(query, TransactionQuery::DateRange(range_of(FilterType::ThisMonth)));
    }

    #[test]
    fn enabled_without_accounts_and_all_selects_every_transaction() {
        let query = snapshot(true, FilterType::All, None).query();
        assert_eq!(query, TransactionQuery::All);
    }

    #[test]
    fn enabled_without_accounts_and_dated_selects_date_range() {
        let query = snapshot(true, FilterType::LastMonth, None).query();
        assert_eq!(query, TransactionQuery::DateRange(range_of(FilterType::LastMonth)));
    }

    #[test]
    fn enabled_with_accounts_and_all_selects_accounts() {
        let query = snapshot(true, FilterType::All, Some(ids(&["acc1", "acc2"]))).query();
        assert_eq!(query, TransactionQuery::Accounts(ids(&["acc1", "acc2"])));
    }

    #[test]
    fn enabled_with_accounts_and_dated_selects_both() {
        let query = snapshot(true, FilterType::Today, Some(ids(&["acc1"]))).query();
        assert_eq!(
            query,
            TransactionQuery::AccountsAndDateRange(ids(&["acc1"]), range_of(FilterType::Today))
        );
    }

    #[test]
    fn disabled_filter_ignores_accounts_and_categories() {
        for filter_type in [FilterType::All, FilterType::Last30Days] {
            let plain = snapshot(false, filter_type, None);
            let mut restricted = snapshot(false, filter_type, Some(ids(&["acc1"])));
            restricted.categories = Some(ids(&["food"]));
            restricted.category_types = Some(BTreeSet::from([CategoryType::Expense]));
            assert_eq!(plain.query(), restricted.query());
        }
    }

    #[tokio::test]
    async fn account_filter_with_all_queries_by_account() {
        let (_settings, transactions, mut feed) =
            fixture(true, FilterType::All, Some(ids(&["acc1"])));
        assert!(settle(&mut feed).await.is_none());
        assert_eq!(
            transactions.queries(),
            vec![TransactionQuery::Accounts(ids(&["acc1"]))]
        );
    }

    #[tokio::test]
    async fn enabled_without_accounts_queries_by_date() {
        let (settings, transactions, mut feed) = fixture(true, FilterType::Last30Days, None);
        settle(&mut feed).await;
        assert_eq!(
            transactions.queries(),
            vec![TransactionQuery::DateRange(DateRange {
                start: 1_000,
                end: 2_000
            })]
        );
        assert_eq!(settings.range_calls(), vec![FilterType::Last30Days]);
    }

    #[tokio::test]
    async fn disabled_filter_queries_by_date_ignoring_accounts() {
        let (settings, transactions, mut feed) =
            fixture(false, FilterType::Last30Days, Some(ids(&["acc1"])));
        settle(&mut feed).await;

        settings.accounts.send_replace(Some(ids(&["acc2"])));
        settle(&mut feed).await;
        settings.categories.send_replace(Some(ids(&["food"])));
        settle(&mut feed).await;

        let expected = TransactionQuery::DateRange(range_of(FilterType::Last30Days));
        assert_eq!(transactions.queries(), vec![expected; 3]);
    }

    #[tokio::test]
    async fn delivers_results_of_the_current_query() {
        let (_settings, transactions, mut feed) = fixture(false, FilterType::All, None);
        settle(&mut feed).await;

        let first = vec![transaction(100)];
        transactions.results(0).send(Ok(first.clone())).unwrap();
        assert_eq!(feed.next().await, Some(Ok(first)));
        assert_eq!(feed.generation(), 1);
        assert_eq!(feed.snapshot().map(|s| s.filter_type), Some(FilterType::All));

        let second = vec![transaction(100), transaction(250)];
        transactions.results(0).send(Ok(second.clone())).unwrap();
        assert_eq!(feed.next().await, Some(Ok(second)));
    }

    #[tokio::test]
    async fn stale_results_are_discarded() {
        let (settings, transactions, mut feed) = fixture(true, FilterType::All, None);
        settle(&mut feed).await;

        // The old query completes late, after the filter already moved on.
        let _ = transactions.results(0).send(Ok(vec![transaction(1)]));
        settings.filter_type.send_replace(FilterType::Last30Days);
        assert!(settle(&mut feed).await.is_none());

        assert_eq!(transactions.queries().len(), 2);
        let fresh = vec![transaction(2)];
        transactions.results(1).send(Ok(fresh.clone())).unwrap();
        assert_eq!(settle(&mut feed).await, Some(Ok(fresh)));
        assert_eq!(feed.generation(), 2);
    }

    #[tokio::test]
    async fn range_is_resolved_on_every_snapshot() {
        let (settings, _transactions, mut feed) = fixture(true, FilterType::ThisMonth, None);
        settle(&mut feed).await;
        settings.filter_type.send_replace(FilterType::Last30Days);
        settle(&mut feed).await;
        settings.enabled.send_replace(false);
        settle(&mut feed).await;
        settings.filter_type.send_replace(FilterType::All);
        settle(&mut feed).await;

        assert_eq!(
            settings.range_calls(),
            vec![
                FilterType::ThisMonth,
                FilterType::Last30Days,
                FilterType::Last30Days,
                FilterType::All,
            ]
        );
    }

    #[tokio::test]
    async fn store_errors_pass_through() {
        let (_settings, transactions, mut feed) = fixture(false, FilterType::All, None);
        settle(&mut feed).await;
        transactions
            .results(0)
            .send(Err(EngineError::KeyNotFound("transactions".to_string())))
            .unwrap();
        assert_eq!(
            feed.next().await,
            Some(Err(EngineError::KeyNotFound("transactions".to_string())))
        );
    }
}
