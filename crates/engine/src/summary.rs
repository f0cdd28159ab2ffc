//! Totals computed over a list of transactions.

use std::collections::BTreeMap;

use chrono::TimeZone;
use uuid::Uuid;

use crate::{Budget, BudgetMonth, MoneyCents, Transaction, TransactionKind};

/// Income and expense totals of a list of transactions.
///
/// Transfers move money between accounts: they are counted but do not
/// change any total.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransactionSummary {
    pub count: usize,
    pub income: MoneyCents,
    pub expense: MoneyCents,
    pub expense_by_category: BTreeMap<Uuid, MoneyCents>,
}

impl TransactionSummary {
    pub fn from_transactions(transactions: &[Transaction]) -> Self {
        let mut summary = Self {
            count: transactions.len(),
            ..Self::default()
        };
        for tx in transactions {
            let amount = MoneyCents::new(tx.amount_minor);
            match tx.kind {
                TransactionKind::Income => summary.income += amount,
                TransactionKind::Expense => {
                    summary.expense += amount;
                    if let Some(category_id) = tx.category_id {
                        *summary
                            .expense_by_category
                            .entry(category_id)
                            .or_default() += amount;
                    }
                }
                TransactionKind::Transfer => {}
            }
        }
        summary
    }

    /// Income minus expense.
    pub fn balance(&self) -> MoneyCents {
        self.income - self.expense
    }
}

/// How much of a budget has been spent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BudgetProgress {
    pub budget_id: Uuid,
    pub limit: MoneyCents,
    pub spent: MoneyCents,
}

impl BudgetProgress {
    /// Sums the expenses matching `budget`: same month in `tz`, one of its
    /// accounts and one of its categories (when restricted).
    pub fn compute<Tz: TimeZone>(budget: &Budget, transactions: &[Transaction], tz: &Tz) -> Self {
        let spent = transactions
            .iter()
            .filter(|tx| tx.kind == TransactionKind::Expense)
            .filter(|tx| BudgetMonth::of(&tx.occurred_at.with_timezone(tz)) == budget.month)
            .filter(|tx| {
                budget
                    .accounts
                    .as_ref()
                    .is_none_or(|ids| ids.contains(&tx.account_id))
            })
            .filter(|tx| {
                budget.categories.as_ref().is_none_or(|ids| {
                    tx.category_id.is_some_and(|category_id| ids.contains(&category_id))
                })
            })
            .fold(MoneyCents::ZERO, |acc, tx| acc + MoneyCents::new(tx.amount_minor));

        Self {
            budget_id: budget.id,
            limit: MoneyCents::new(budget.amount_minor),
            spent,
        }
    }

    pub fn remaining(&self) -> MoneyCents {
        self.limit - self.spent
    }

    pub fn is_exceeded(&self) -> bool {
        self.spent > self.limit
    }
}
