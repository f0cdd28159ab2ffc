use uuid::Uuid;

use sea_orm::{QueryFilter, QueryOrder, TransactionTrait, prelude::*};

use crate::{
    Account, AccountKind, EngineError, ResultEngine, accounts,
    util::{normalize_key, normalize_required_name},
};

use super::{Engine, with_tx};

impl Engine {
    /// Add a new account. Names are unique ignoring case and accents.
    pub async fn new_account(&self, name: &str, kind: AccountKind) -> ResultEngine<Uuid> {
        let name = normalize_required_name(name, "account")?;
        let created: ResultEngine<Uuid> = with_tx!(self, |db_tx| {
            let exists = accounts::Entity::find()
                .filter(accounts::Column::NameNorm.eq(normalize_key(&name)))
                .one(&db_tx)
                .await?
                .is_some();
            if exists {
                return Err(EngineError::ExistingKey(name));
            }

            let account = Account::new(name, kind);
            accounts::ActiveModel::from(&account).insert(&db_tx).await?;
            Ok(account.id)
        });
        let account_id = created?;
        self.changes.notify("accounts");
        tracing::info!(%account_id, "account created");
        Ok(account_id)
    }

    /// Return every account, sorted by name.
    pub async fn accounts(&self) -> ResultEngine<Vec<Account>> {
        accounts::Entity::find()
            .order_by_asc(accounts::Column::NameNorm)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Account::try_from)
            .collect()
    }

    pub async fn account(&self, account_id: Uuid) -> ResultEngine<Account> {
        let model = accounts::Entity::find_by_id(account_id.to_string())
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("account not exists".to_string()))?;
        Account::try_from(model)
    }
}
