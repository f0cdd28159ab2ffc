//! Transaction primitives.
//!
//! A `Transaction` moves money into, out of, or between accounts.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CategoryType, EngineError, ResultEngine, util::parse_uuid};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Income,
    Expense,
    Transfer,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
            Self::Transfer => "transfer",
        }
    }

    /// The category type a transaction of this kind must reference.
    pub fn category_type(self) -> Option<CategoryType> {
        match self {
            Self::Income => Some(CategoryType::Income),
            Self::Expense => Some(CategoryType::Expense),
            Self::Transfer => None,
        }
    }
}

impl TryFrom<&str> for TransactionKind {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            "transfer" => Ok(Self::Transfer),
            other => Err(EngineError::InvalidId(format!(
                "invalid transaction kind: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub kind: TransactionKind,
    pub amount_minor: i64,
    pub account_id: Uuid,
    /// Destination account, only set for transfers.
    pub to_account_id: Option<Uuid>,
    /// Always set for income/expense, never for transfers.
    pub category_id: Option<Uuid>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        kind: TransactionKind,
        amount_minor: i64,
        account_id: Uuid,
        to_account_id: Option<Uuid>,
        category_id: Option<Uuid>,
        note: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> ResultEngine<Self> {
        if amount_minor <= 0 {
            return Err(EngineError::InvalidAmount(
                "amount_minor must be > 0".to_string(),
            ));
        }
        match (kind, to_account_id, category_id) {
            (TransactionKind::Transfer, Some(to), None) => {
                if to == account_id {
                    return Err(EngineError::InvalidId(
                        "from and to accounts must differ".to_string(),
                    ));
                }
            }
            (TransactionKind::Transfer, None, _) => {
                return Err(EngineError::InvalidId(
                    "transfer requires a destination account".to_string(),
                ));
            }
            (TransactionKind::Transfer, Some(_), Some(_)) => {
                return Err(EngineError::InvalidId(
                    "transfers do not take a category".to_string(),
                ));
            }
            (_, Some(_), _) => {
                return Err(EngineError::InvalidId(format!(
                    "{} does not take a destination account",
                    kind.as_str()
                )));
            }
            (_, None, None) => {
                return Err(EngineError::InvalidId(format!(
                    "{} requires a category",
                    kind.as_str()
                )));
            }
            (_, None, Some(_)) => {}
        }
        Ok(Self {
            id: Uuid::new_v4(),
            kind,
            amount_minor,
            account_id,
            to_account_id,
            category_id,
            note,
            occurred_at,
        })
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub kind: String,
    pub amount_minor: i64,
    pub account_id: String,
    pub to_account_id: Option<String>,
    pub category_id: Option<String>,
    pub note: Option<String>,
    pub occurred_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Transaction> for ActiveModel {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: ActiveValue::Set(tx.id.to_string()),
            kind: ActiveValue::Set(tx.kind.as_str().to_string()),
            amount_minor: ActiveValue::Set(tx.amount_minor),
            account_id: ActiveValue::Set(tx.account_id.to_string()),
            to_account_id: ActiveValue::Set(tx.to_account_id.map(|id| id.to_string())),
            category_id: ActiveValue::Set(tx.category_id.map(|id| id.to_string())),
            note: ActiveValue::Set(tx.note.clone()),
            occurred_at: ActiveValue::Set(tx.occurred_at),
        }
    }
}

impl TryFrom<Model> for Transaction {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "transaction")?,
            kind: TransactionKind::try_from(model.kind.as_str())?,
            amount_minor: model.amount_minor,
            account_id: parse_uuid(&model.account_id, "account")?,
            to_account_id: model
                .to_account_id
                .as_deref()
                .map(|id| parse_uuid(id, "account"))
                .transpose()?,
            category_id: model
                .category_id
                .as_deref()
                .map(|id| parse_uuid(id, "category"))
                .transpose()?,
            note: model.note,
            occurred_at: model.occurred_at,
        })
    }
}
