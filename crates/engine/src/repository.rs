//! Contracts consumed by the transaction filter.
//!
//! [`TransactionRepository`] is implemented by [`Engine`](crate::Engine) and
//! [`SettingsRepository`] by [`Settings`](crate::Settings); both can be
//! replaced by any other source of live values.

use std::collections::BTreeSet;

use futures::{
    StreamExt,
    stream::{self, BoxStream},
};
use tokio::sync::watch;

use crate::{CategoryType, DateRange, FilterType, ResultEngine, Transaction};

/// Live result of a transaction query: the first item is the current
/// result, every later item follows a change of the underlying data.
pub type TransactionStream = BoxStream<'static, ResultEngine<Vec<Transaction>>>;

/// Observable transaction queries.
pub trait TransactionRepository: Send + Sync {
    fn all_transactions(&self) -> TransactionStream;

    /// Transactions moving money in or out of any of `ids`.
    fn transactions_by_account_ids(&self, ids: &BTreeSet<String>) -> TransactionStream;

    fn transactions_by_date_range(&self, range: DateRange) -> TransactionStream;

    fn transactions_by_account_ids_and_date_range(
        &self,
        ids: &BTreeSet<String>,
        range: DateRange,
    ) -> TransactionStream;
}

/// Observable filter preferences.
///
/// Each stream emits the current value on subscription, then every change.
pub trait SettingsRepository: Send + Sync {
    fn is_filter_enabled(&self) -> BoxStream<'static, bool>;

    fn filter_type(&self) -> BoxStream<'static, FilterType>;

    fn categories(&self) -> BoxStream<'static, Option<BTreeSet<String>>>;

    fn accounts(&self) -> BoxStream<'static, Option<BTreeSet<String>>>;

    fn category_types(&self) -> BoxStream<'static, Option<BTreeSet<CategoryType>>>;

    /// Concrete bounds of `filter_type` as of now.
    fn filter_range(&self, filter_type: FilterType) -> DateRange;
}

/// One of the four transaction queries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionQuery {
    All,
    Accounts(BTreeSet<String>),
    DateRange(DateRange),
    AccountsAndDateRange(BTreeSet<String>, DateRange),
}

impl TransactionQuery {
    pub fn accounts(&self) -> Option<&BTreeSet<String>> {
        match self {
            Self::Accounts(ids) | Self::AccountsAndDateRange(ids, _) => Some(ids),
            Self::All | Self::DateRange(_) => None,
        }
    }

    pub fn date_range(&self) -> Option<DateRange> {
        match self {
            Self::DateRange(range) | Self::AccountsAndDateRange(_, range) => Some(*range),
            Self::All | Self::Accounts(_) => None,
        }
    }

    /// Subscribes to the matching query of `repository`.
    pub fn subscribe(&self, repository: &dyn TransactionRepository) -> TransactionStream {
        match self {
            Self::All => repository.all_transactions(),
            Self::Accounts(ids) => repository.transactions_by_account_ids(ids),
            Self::DateRange(range) => repository.transactions_by_date_range(*range),
            Self::AccountsAndDateRange(ids, range) => {
                repository.transactions_by_account_ids_and_date_range(ids, *range)
            }
        }
    }
}

/// Turns a `watch` receiver into a stream of its values.
///
/// Values published faster than they are consumed are conflated: only the
/// latest one is observed.
pub(crate) fn watch_stream<T>(rx: watch::Receiver<T>) -> BoxStream<'static, T>
where
    T: Clone + Send + Sync + 'static,
{
    stream::unfold((rx, true), |(mut rx, first)| async move {
        if !first && rx.changed().await.is_err() {
            return None;
        }
        let value = rx.borrow_and_update().clone();
        Some((value, (rx, false)))
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parts() {
        let ids = BTreeSet::from(["acc1".to_string()]);
        let range = DateRange::new(1, 2).unwrap();

        assert_eq!(TransactionQuery::All.accounts(), None);
        assert_eq!(TransactionQuery::All.date_range(), None);
        assert_eq!(TransactionQuery::Accounts(ids.clone()).accounts(), Some(&ids));
        assert_eq!(TransactionQuery::DateRange(range).date_range(), Some(range));
        let both = TransactionQuery::AccountsAndDateRange(ids.clone(), range);
        assert_eq!(both.accounts(), Some(&ids));
        assert_eq!(both.date_range(), Some(range));
    }

    #[tokio::test]
    async fn watch_stream_emits_current_then_changes() {
        let (tx, rx) = watch::channel(1);
        let mut values = watch_stream(rx);
        assert_eq!(values.next().await, Some(1));
        tx.send_replace(2);
        assert_eq!(values.next().await, Some(2));
        drop(tx);
        assert_eq!(values.next().await, None);
    }
}
