//! Expense tracking engine.
//!
//! The engine stores accounts, categories, transactions and budgets in a
//! sea-orm database and exposes transaction queries as live streams that
//! re-run whenever the data changes. [`Settings`] keeps the user
//! preferences, and [`TransactionFilter`] combines the filter preferences
//! into the list of transactions currently visible to the user.

pub use accounts::{Account, AccountKind};
pub use budgets::{Budget, BudgetMonth, NewBudget, validate_budget};
pub use categories::{Category, CategoryType};
pub use currency::{Currency, CurrencyPreference, SymbolPosition};
pub use error::EngineError;
pub use filter::{FilterSnapshot, FilteredTransactions, TransactionFilter};
pub use filter_type::{DateRange, FilterType, filter_range_at};
pub use money::MoneyCents;
pub use ops::{Engine, EngineBuilder};
pub use repository::{
    SettingsRepository, TransactionQuery, TransactionRepository, TransactionStream,
};
pub use settings::{Clock, FilterPreferences, Reminder, Settings, SettingsBuilder};
pub use summary::{BudgetProgress, TransactionSummary};
pub use transactions::{Transaction, TransactionKind};

mod accounts;
mod budgets;
mod categories;
mod changes;
mod currency;
mod error;
mod filter;
mod filter_type;
mod money;
mod ops;
mod preferences;
mod repository;
mod settings;
mod summary;
mod transactions;
mod util;

pub type ResultEngine<T> = Result<T, EngineError>;
