use std::collections::BTreeSet;

use chrono::TimeZone;
use uuid::Uuid;

use sea_orm::{PaginatorTrait, QueryFilter, TransactionTrait, prelude::*};

use crate::{
    Budget, BudgetProgress, CategoryType, EngineError, NewBudget, ResultEngine, TransactionQuery,
    accounts, budgets, categories, util::normalize_required_name, validate_budget,
};

use super::{Engine, fetch, with_tx};

impl Engine {
    /// Store a new budget.
    ///
    /// Every referenced account must exist and every referenced category must
    /// be an expense category.
    pub async fn add_budget(&self, budget: NewBudget) -> ResultEngine<Uuid> {
        validate_budget(&budget)?;
        let budget = Budget {
            id: Uuid::new_v4(),
            name: normalize_required_name(&budget.name, "budget")?,
            amount_minor: budget.amount_minor,
            month: budget.month,
            accounts: budget.accounts,
            categories: budget.categories,
        };
        let model = budgets::ActiveModel::try_from(&budget)?;

        let added: ResultEngine<Uuid> = with_tx!(self, |db_tx| {
            if let Some(ids) = &budget.accounts {
                let found = accounts::Entity::find()
                    .filter(accounts::Column::Id.is_in(to_strings(ids)))
                    .count(&db_tx)
                    .await?;
                if found != ids.len() as u64 {
                    return Err(EngineError::KeyNotFound("account not exists".to_string()));
                }
            }
            if let Some(ids) = &budget.categories {
                let found = categories::Entity::find()
                    .filter(categories::Column::Id.is_in(to_strings(ids)))
                    .filter(categories::Column::Kind.eq(CategoryType::Expense.as_str()))
                    .count(&db_tx)
                    .await?;
                if found != ids.len() as u64 {
                    return Err(EngineError::KeyNotFound(
                        "expense category not exists".to_string(),
                    ));
                }
            }
            model.insert(&db_tx).await?;
            Ok(budget.id)
        });
        let budget_id = added?;
        tracing::info!(%budget_id, month = %budget.month, "budget added");
        Ok(budget_id)
    }

    /// Return every budget, most recent month first.
    pub async fn budgets(&self) -> ResultEngine<Vec<Budget>> {
        let mut budgets = budgets::Entity::find()
            .all(&self.database)
            .await?
            .into_iter()
            .map(Budget::try_from)
            .collect::<ResultEngine<Vec<_>>>()?;
        budgets.sort_by(|a, b| b.month.cmp(&a.month).then_with(|| a.name.cmp(&b.name)));
        Ok(budgets)
    }

    pub async fn delete_budget(&self, budget_id: Uuid) -> ResultEngine<()> {
        let result = budgets::Entity::delete_by_id(budget_id.to_string())
            .exec(&self.database)
            .await?;
        if result.rows_affected == 0 {
            return Err(EngineError::KeyNotFound("budget not exists".to_string()));
        }
        tracing::info!(%budget_id, "budget deleted");
        Ok(())
    }

    /// Progress of every budget, months resolved in `tz`.
    pub async fn budget_progress<Tz: TimeZone>(
        &self,
        tz: &Tz,
    ) -> ResultEngine<Vec<(Budget, BudgetProgress)>> {
        let budgets = self.budgets().await?;
        if budgets.is_empty() {
            return Ok(Vec::new());
        }
        let transactions = fetch(&self.database, &TransactionQuery::All).await?;
        Ok(budgets
            .into_iter()
            .map(|budget| {
                let progress = BudgetProgress::compute(&budget, &transactions, tz);
                (budget, progress)
            })
            .collect())
    }
}

fn to_strings(ids: &BTreeSet<Uuid>) -> Vec<String> {
    ids.iter().map(Uuid::to_string).collect()
}
