use std::collections::BTreeSet;

use futures::{StreamExt, stream};
use sea_orm::{Condition, DatabaseConnection, QueryFilter, QueryOrder, prelude::*};

use crate::{
    DateRange, ResultEngine, Transaction, TransactionQuery, TransactionRepository,
    TransactionStream, changes::ChangeTracker,
};

mod accounts;
mod budgets;
mod categories;
mod transactions;

/// Run a block inside a DB transaction, committing on success and rolling back on error.
macro_rules! with_tx {
    ($self:expr, |$tx:ident| $body:expr) => {{
        let $tx = $self.database.begin().await?;
        let result = $body;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }};
}

pub(crate) use with_tx;

/// Store of accounts, categories, transactions and budgets.
///
/// Cloning is cheap: clones share the database connection and the change
/// notifications, so a write through one clone re-runs the queries observed
/// through any other.
#[derive(Clone, Debug)]
pub struct Engine {
    database: DatabaseConnection,
    changes: ChangeTracker,
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Live result of `query`: emitted once now, then after every write.
    fn observe(&self, query: TransactionQuery) -> TransactionStream {
        let database = self.database.clone();
        let changes = self.changes.subscribe();
        stream::unfold(
            (database, changes, query, true),
            |(database, mut changes, query, first)| async move {
                if !first && changes.changed().await.is_err() {
                    return None;
                }
                changes.borrow_and_update();
                let result = fetch(&database, &query).await;
                if let Err(err) = &result {
                    tracing::warn!(?query, %err, "transaction query failed");
                }
                Some((result, (database, changes, query, false)))
            },
        )
        .boxed()
    }
}

trait ApplyQueryFilters: QueryFilter + Sized {
    fn apply_query_filters(self, query: &TransactionQuery) -> ResultEngine<Self>;
}

impl<T> ApplyQueryFilters for T
where
    T: QueryFilter + Sized,
{
    fn apply_query_filters(mut self, query: &TransactionQuery) -> ResultEngine<Self> {
        if let Some(ids) = query.accounts() {
            let ids: Vec<String> = ids.iter().cloned().collect();
            self = self.filter(
                Condition::any()
                    .add(crate::transactions::Column::AccountId.is_in(ids.clone()))
                    .add(crate::transactions::Column::ToAccountId.is_in(ids)),
            );
        }
        if let Some(range) = query.date_range() {
            let (start, end) = range.bounds()?;
            self = self
                .filter(crate::transactions::Column::OccurredAt.gte(start))
                .filter(crate::transactions::Column::OccurredAt.lte(end));
        }
        Ok(self)
    }
}

async fn fetch(
    database: &DatabaseConnection,
    query: &TransactionQuery,
) -> ResultEngine<Vec<Transaction>> {
    let models = crate::transactions::Entity::find()
        .apply_query_filters(query)?
        .order_by_desc(crate::transactions::Column::OccurredAt)
        .order_by_desc(crate::transactions::Column::Id)
        .all(database)
        .await?;
    models.into_iter().map(Transaction::try_from).collect()
}

impl TransactionRepository for Engine {
    fn all_transactions(&self) -> TransactionStream {
        self.observe(TransactionQuery::All)
    }

    fn transactions_by_account_ids(&self, ids: &BTreeSet<String>) -> TransactionStream {
        self.observe(TransactionQuery::Accounts(ids.clone()))
    }

    fn transactions_by_date_range(&self, range: DateRange) -> TransactionStream {
        self.observe(TransactionQuery::DateRange(range))
    }

    fn transactions_by_account_ids_and_date_range(
        &self,
        ids: &BTreeSet<String>,
        range: DateRange,
    ) -> TransactionStream {
        self.observe(TransactionQuery::AccountsAndDateRange(ids.clone(), range))
    }
}

/// The builder for `Engine`
#[derive(Default)]
pub struct EngineBuilder {
    database: DatabaseConnection,
}

impl EngineBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> EngineBuilder {
        self.database = db;
        self
    }

    /// Construct `Engine`
    pub async fn build(self) -> ResultEngine<Engine> {
        Ok(Engine {
            database: self.database,
            changes: ChangeTracker::new(),
        })
    }
}
