use chrono::{DateTime, Utc};
use uuid::Uuid;

use sea_orm::{DatabaseTransaction, TransactionTrait, prelude::*};

use crate::{
    CategoryType, EngineError, ResultEngine, Transaction, TransactionKind, TransactionQuery,
    accounts, categories, transactions, util::normalize_optional_text,
};

use super::{Engine, fetch, with_tx};

impl Engine {
    /// Record money coming into `account_id`.
    pub async fn income(
        &self,
        account_id: Uuid,
        category_id: Uuid,
        amount_minor: i64,
        occurred_at: DateTime<Utc>,
        note: Option<&str>,
    ) -> ResultEngine<Uuid> {
        let tx = Transaction::new(
            TransactionKind::Income,
            amount_minor,
            account_id,
            None,
            Some(category_id),
            normalize_optional_text(note),
            occurred_at,
        )?;
        self.record(tx).await
    }

    /// Record money leaving `account_id`.
    pub async fn expense(
        &self,
        account_id: Uuid,
        category_id: Uuid,
        amount_minor: i64,
        occurred_at: DateTime<Utc>,
        note: Option<&str>,
    ) -> ResultEngine<Uuid> {
        let tx = Transaction::new(
            TransactionKind::Expense,
            amount_minor,
            account_id,
            None,
            Some(category_id),
            normalize_optional_text(note),
            occurred_at,
        )?;
        self.record(tx).await
    }

    /// Move money between two accounts. Transfers have no category.
    pub async fn transfer(
        &self,
        from_account_id: Uuid,
        to_account_id: Uuid,
        amount_minor: i64,
        occurred_at: DateTime<Utc>,
        note: Option<&str>,
    ) -> ResultEngine<Uuid> {
        let tx = Transaction::new(
            TransactionKind::Transfer,
            amount_minor,
            from_account_id,
            Some(to_account_id),
            None,
            normalize_optional_text(note),
            occurred_at,
        )?;
        self.record(tx).await
    }

    pub async fn transaction(&self, transaction_id: Uuid) -> ResultEngine<Transaction> {
        let model = transactions::Entity::find_by_id(transaction_id.to_string())
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("transaction not exists".to_string()))?;
        Transaction::try_from(model)
    }

    /// Current result of `query`, without observing later changes.
    pub async fn list_transactions(
        &self,
        query: &TransactionQuery,
    ) -> ResultEngine<Vec<Transaction>> {
        fetch(&self.database, query).await
    }

    pub async fn delete_transaction(&self, transaction_id: Uuid) -> ResultEngine<()> {
        let result = transactions::Entity::delete_by_id(transaction_id.to_string())
            .exec(&self.database)
            .await?;
        if result.rows_affected == 0 {
            return Err(EngineError::KeyNotFound(
                "transaction not exists".to_string(),
            ));
        }
        self.changes.notify("transactions");
        tracing::info!(%transaction_id, "transaction deleted");
        Ok(())
    }

    async fn record(&self, tx: Transaction) -> ResultEngine<Uuid> {
        let recorded: ResultEngine<Uuid> = with_tx!(self, |db_tx| {
            require_account(&db_tx, tx.account_id).await?;
            if let Some(to_account_id) = tx.to_account_id {
                require_account(&db_tx, to_account_id).await?;
            }
            if let (Some(category_id), Some(expected)) = (tx.category_id, tx.kind.category_type())
            {
                require_category(&db_tx, category_id, expected).await?;
            }
            transactions::ActiveModel::from(&tx).insert(&db_tx).await?;
            Ok(tx.id)
        });
        let transaction_id = recorded?;
        self.changes.notify("transactions");
        tracing::info!(
            %transaction_id,
            kind = tx.kind.as_str(),
            amount_minor = tx.amount_minor,
            "transaction recorded"
        );
        Ok(transaction_id)
    }
}

async fn require_account(db_tx: &DatabaseTransaction, account_id: Uuid) -> ResultEngine<()> {
    accounts::Entity::find_by_id(account_id.to_string())
        .one(db_tx)
        .await?
        .ok_or_else(|| EngineError::KeyNotFound("account not exists".to_string()))?;
    Ok(())
}

async fn require_category(
    db_tx: &DatabaseTransaction,
    category_id: Uuid,
    expected: CategoryType,
) -> ResultEngine<()> {
    let model = categories::Entity::find_by_id(category_id.to_string())
        .one(db_tx)
        .await?
        .ok_or_else(|| EngineError::KeyNotFound("category not exists".to_string()))?;
    if model.kind != expected.as_str() {
        return Err(EngineError::InvalidId(format!(
            "category is not an {} category",
            expected.as_str()
        )));
    }
    Ok(())
}
