//! Monthly budgets.
//!
//! A budget caps the expenses of one month, optionally restricted to a set of
//! accounts and/or categories. `None` means "all of them".

use std::{collections::BTreeSet, fmt};

use chrono::{DateTime, Datelike, TimeZone};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, ResultEngine, util::parse_uuid};

/// A calendar month, written `MM/YYYY`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BudgetMonth {
    pub year: i32,
    pub month: u32,
}

impl BudgetMonth {
    pub fn new(year: i32, month: u32) -> ResultEngine<Self> {
        if !(1..=12).contains(&month) {
            return Err(EngineError::InvalidBudget(format!(
                "invalid month: {month}"
            )));
        }
        Ok(Self { year, month })
    }

    /// The month `at` falls in, in the time zone of `at`.
    pub fn of<Tz: TimeZone>(at: &DateTime<Tz>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }
}

impl fmt::Display for BudgetMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}/{:04}", self.month, self.year)
    }
}

impl std::str::FromStr for BudgetMonth {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EngineError::InvalidBudget(format!("invalid month: {s}"));
        let (month, year) = s.trim().split_once('/').ok_or_else(invalid)?;
        let month: u32 = month.trim().parse().map_err(|_| invalid())?;
        let year: i32 = year.trim().parse().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub id: Uuid,
    pub name: String,
    pub amount_minor: i64,
    pub month: BudgetMonth,
    pub accounts: Option<BTreeSet<Uuid>>,
    pub categories: Option<BTreeSet<Uuid>>,
}

/// Input of `Engine::add_budget`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewBudget {
    pub name: String,
    pub amount_minor: i64,
    pub month: BudgetMonth,
    pub accounts: Option<BTreeSet<Uuid>>,
    pub categories: Option<BTreeSet<Uuid>>,
}

/// Checks a budget before it is stored.
pub fn validate_budget(budget: &NewBudget) -> ResultEngine<()> {
    if budget.name.trim().is_empty() {
        return Err(EngineError::InvalidBudget(
            "budget name must not be empty".to_string(),
        ));
    }
    if budget.amount_minor <= 0 {
        return Err(EngineError::InvalidBudget(
            "budget amount must be > 0".to_string(),
        ));
    }
    if budget.accounts.as_ref().is_some_and(BTreeSet::is_empty) {
        return Err(EngineError::InvalidBudget(
            "select at least one account".to_string(),
        ));
    }
    if budget.categories.as_ref().is_some_and(BTreeSet::is_empty) {
        return Err(EngineError::InvalidBudget(
            "select at least one category".to_string(),
        ));
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "budgets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    pub amount_minor: i64,
    pub month: String,
    /// JSON array of account ids, `NULL` for all accounts.
    pub accounts: Option<String>,
    /// JSON array of category ids, `NULL` for all categories.
    pub categories: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

fn encode_ids(ids: &Option<BTreeSet<Uuid>>) -> ResultEngine<Option<String>> {
    ids.as_ref()
        .map(|ids| {
            serde_json::to_string(ids)
                .map_err(|err| EngineError::InvalidBudget(format!("cannot encode ids: {err}")))
        })
        .transpose()
}

fn decode_ids(raw: Option<&str>, label: &str) -> ResultEngine<Option<BTreeSet<Uuid>>> {
    raw.map(|raw| -> ResultEngine<BTreeSet<Uuid>> {
        let ids: Vec<String> = serde_json::from_str(raw)
            .map_err(|_| EngineError::InvalidBudget(format!("corrupted {label} list")))?;
        ids.iter().map(|id| parse_uuid(id, label)).collect()
    })
    .transpose()
}

impl TryFrom<&Budget> for ActiveModel {
    type Error = EngineError;

    fn try_from(budget: &Budget) -> Result<Self, Self::Error> {
        Ok(Self {
            id: ActiveValue::Set(budget.id.to_string()),
            name: ActiveValue::Set(budget.name.clone()),
            amount_minor: ActiveValue::Set(budget.amount_minor),
            month: ActiveValue::Set(budget.month.to_string()),
            accounts: ActiveValue::Set(encode_ids(&budget.accounts)?),
            categories: ActiveValue::Set(encode_ids(&budget.categories)?),
        })
    }
}

impl TryFrom<Model> for Budget {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "budget")?,
            name: model.name,
            amount_minor: model.amount_minor,
            month: model.month.parse()?,
            accounts: decode_ids(model.accounts.as_deref(), "account")?,
            categories: decode_ids(model.categories.as_deref(), "category")?,
        })
    }
}
