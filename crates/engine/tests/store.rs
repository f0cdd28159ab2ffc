use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sea_orm::{Database, DatabaseConnection};

use engine::{
    AccountKind, BudgetMonth, CategoryType, Engine, EngineError, MoneyCents, NewBudget,
    TransactionKind, TransactionQuery,
};
use migration::MigratorTrait;
use uuid::Uuid;

async fn engine_with_db() -> (Engine, DatabaseConnection) {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let engine = Engine::builder()
        .database(db.clone())
        .build()
        .await
        .unwrap();
    (engine, db)
}

fn at(raw: &str) -> DateTime<Utc> {
    raw.parse().unwrap()
}

#[tokio::test]
async fn account_names_are_unique_ignoring_case_and_accents() {
    let (engine, _db) = engine_with_db().await;

    let id = engine
        .new_account("  Conto   Corrente ", AccountKind::Bank)
        .await
        .unwrap();
    let account = engine.account(id).await.unwrap();
    assert_eq!(account.name, "Conto Corrente");
    assert_eq!(account.kind, AccountKind::Bank);

    let err = engine
        .new_account("CONTO CORRENTE", AccountKind::Cash)
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::ExistingKey("CONTO CORRENTE".to_string()));

    let err = engine.new_account("   ", AccountKind::Cash).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::InvalidName("account name must not be empty".to_string())
    );

    engine.new_account("Wallet", AccountKind::Cash).await.unwrap();
    let names: Vec<String> = engine
        .accounts()
        .await
        .unwrap()
        .into_iter()
        .map(|account| account.name)
        .collect();
    assert_eq!(names, vec!["Conto Corrente", "Wallet"]);
}

#[tokio::test]
async fn category_names_are_unique_per_kind() {
    let (engine, _db) = engine_with_db().await;

    engine
        .new_category("Gifts", CategoryType::Income)
        .await
        .unwrap();
    engine
        .new_category("gifts", CategoryType::Expense)
        .await
        .unwrap();
    let err = engine
        .new_category("Gifts", CategoryType::Expense)
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::ExistingKey("Gifts".to_string()));
    assert_eq!(engine.categories().await.unwrap().len(), 2);
}

#[tokio::test]
async fn find_category_rejects_missing_ids() {
    let (engine, _db) = engine_with_db().await;
    let id = engine
        .new_category("Food", CategoryType::Expense)
        .await
        .unwrap();

    let expected = EngineError::InvalidId("provide a valid category id".to_string());
    assert_eq!(engine.find_category(None).await.unwrap_err(), expected);
    assert_eq!(engine.find_category(Some("  ")).await.unwrap_err(), expected);
    assert_eq!(
        engine.find_category(Some("nope")).await.unwrap_err(),
        EngineError::InvalidId("invalid category id".to_string())
    );
    assert_eq!(
        engine
            .find_category(Some(&Uuid::new_v4().to_string()))
            .await
            .unwrap_err(),
        EngineError::KeyNotFound("category not exists".to_string())
    );

    let category = engine.find_category(Some(&id.to_string())).await.unwrap();
    assert_eq!(category.name, "Food");
}

#[tokio::test]
async fn transactions_check_accounts_and_categories() {
    let (engine, _db) = engine_with_db().await;
    let cash = engine.new_account("Cash", AccountKind::Cash).await.unwrap();
    let bank = engine.new_account("Bank", AccountKind::Bank).await.unwrap();
    let salary = engine
        .new_category("Salary", CategoryType::Income)
        .await
        .unwrap();
    let food = engine
        .new_category("Food", CategoryType::Expense)
        .await
        .unwrap();
    let now = Utc::now();

    let err = engine
        .expense(cash, salary, 1_000, now, None)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::InvalidId("category is not an expense category".to_string())
    );

    let err = engine
        .income(Uuid::new_v4(), salary, 1_000, now, None)
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::KeyNotFound("account not exists".to_string()));

    let err = engine.transfer(cash, cash, 1_000, now, None).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::InvalidId("from and to accounts must differ".to_string())
    );

    let err = engine.expense(cash, food, 0, now, None).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidAmount(_)));

    let id = engine
        .transfer(bank, cash, 5_000, now, Some("  atm  "))
        .await
        .unwrap();
    let tx = engine.transaction(id).await.unwrap();
    assert_eq!(tx.kind, TransactionKind::Transfer);
    assert_eq!(tx.to_account_id, Some(cash));
    assert_eq!(tx.category_id, None);
    assert_eq!(tx.note.as_deref(), Some("atm"));
}

#[tokio::test]
async fn delete_transaction_removes_it() {
    let (engine, _db) = engine_with_db().await;
    let cash = engine.new_account("Cash", AccountKind::Cash).await.unwrap();
    let food = engine
        .new_category("Food", CategoryType::Expense)
        .await
        .unwrap();
    let id = engine
        .expense(cash, food, 1_250, Utc::now(), None)
        .await
        .unwrap();

    engine.delete_transaction(id).await.unwrap();
    assert_eq!(
        engine.transaction(id).await.unwrap_err(),
        EngineError::KeyNotFound("transaction not exists".to_string())
    );
    assert_eq!(
        engine.delete_transaction(id).await.unwrap_err(),
        EngineError::KeyNotFound("transaction not exists".to_string())
    );
}

#[tokio::test]
async fn list_transactions_orders_newest_first_and_matches_both_accounts() {
    let (engine, _db) = engine_with_db().await;
    let cash = engine.new_account("Cash", AccountKind::Cash).await.unwrap();
    let bank = engine.new_account("Bank", AccountKind::Bank).await.unwrap();
    let card = engine.new_account("Card", AccountKind::Credit).await.unwrap();
    let food = engine
        .new_category("Food", CategoryType::Expense)
        .await
        .unwrap();

    let old = engine
        .expense(card, food, 100, at("2024-01-10T10:00:00Z"), None)
        .await
        .unwrap();
    let transfer = engine
        .transfer(bank, cash, 200, at("2024-02-10T10:00:00Z"), None)
        .await
        .unwrap();
    let recent = engine
        .expense(cash, food, 300, at("2024-03-10T10:00:00Z"), None)
        .await
        .unwrap();

    let all = engine
        .list_transactions(&TransactionQuery::All)
        .await
        .unwrap();
    let ids: Vec<Uuid> = all.iter().map(|tx| tx.id).collect();
    assert_eq!(ids, vec![recent, transfer, old]);

    // The transfer lands on cash through `to_account_id`.
    let by_cash = engine
        .list_transactions(&TransactionQuery::Accounts(BTreeSet::from([
            cash.to_string()
        ])))
        .await
        .unwrap();
    let ids: Vec<Uuid> = by_cash.iter().map(|tx| tx.id).collect();
    assert_eq!(ids, vec![recent, transfer]);

    let february = engine::DateRange::from_datetimes(
        at("2024-02-01T00:00:00Z"),
        at("2024-02-29T23:59:59.999Z"),
    )
    .unwrap();
    let in_february = engine
        .list_transactions(&TransactionQuery::DateRange(february))
        .await
        .unwrap();
    assert_eq!(in_february.len(), 1);
    assert_eq!(in_february[0].id, transfer);

    let none = engine
        .list_transactions(&TransactionQuery::AccountsAndDateRange(
            BTreeSet::from([card.to_string()]),
            february,
        ))
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn range_bounds_are_inclusive() {
    let (engine, _db) = engine_with_db().await;
    let cash = engine.new_account("Cash", AccountKind::Cash).await.unwrap();
    let food = engine
        .new_category("Food", CategoryType::Expense)
        .await
        .unwrap();
    let start = at("2024-03-01T00:00:00Z");
    let end = at("2024-03-31T23:59:59.999Z");
    engine.expense(cash, food, 1, start, None).await.unwrap();
    engine.expense(cash, food, 2, end, None).await.unwrap();
    engine
        .expense(cash, food, 3, at("2024-04-01T00:00:00Z"), None)
        .await
        .unwrap();

    let range = engine::DateRange::from_datetimes(start, end).unwrap();
    let amounts: Vec<i64> = engine
        .list_transactions(&TransactionQuery::DateRange(range))
        .await
        .unwrap()
        .iter()
        .map(|tx| tx.amount_minor)
        .collect();
    assert_eq!(amounts, vec![2, 1]);
}

#[tokio::test]
async fn budgets_are_validated_and_tracked() {
    let (engine, _db) = engine_with_db().await;
    let cash = engine.new_account("Cash", AccountKind::Cash).await.unwrap();
    let food = engine
        .new_category("Food", CategoryType::Expense)
        .await
        .unwrap();
    let salary = engine
        .new_category("Salary", CategoryType::Income)
        .await
        .unwrap();
    let march = BudgetMonth::new(2024, 3).unwrap();

    let err = engine
        .add_budget(NewBudget {
            name: "Food".to_string(),
            amount_minor: 10_000,
            month: march,
            accounts: Some(BTreeSet::new()),
            categories: None,
        })
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::InvalidBudget("select at least one account".to_string())
    );

    let err = engine
        .add_budget(NewBudget {
            name: "Salary".to_string(),
            amount_minor: 10_000,
            month: march,
            accounts: None,
            categories: Some(BTreeSet::from([salary])),
        })
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::KeyNotFound("expense category not exists".to_string())
    );

    let budget_id = engine
        .add_budget(NewBudget {
            name: "Food".to_string(),
            amount_minor: 10_000,
            month: march,
            accounts: Some(BTreeSet::from([cash])),
            categories: Some(BTreeSet::from([food])),
        })
        .await
        .unwrap();

    engine
        .expense(cash, food, 6_000, at("2024-03-05T12:00:00Z"), None)
        .await
        .unwrap();
    engine
        .expense(cash, food, 6_000, at("2024-03-25T12:00:00Z"), None)
        .await
        .unwrap();
    engine
        .expense(cash, food, 6_000, at("2024-04-02T12:00:00Z"), None)
        .await
        .unwrap();

    let progress = engine.budget_progress(&Utc).await.unwrap();
    assert_eq!(progress.len(), 1);
    let (budget, progress) = &progress[0];
    assert_eq!(budget.id, budget_id);
    assert_eq!(budget.categories, Some(BTreeSet::from([food])));
    assert_eq!(progress.spent, MoneyCents::new(12_000));
    assert!(progress.is_exceeded());

    engine.delete_budget(budget_id).await.unwrap();
    assert!(engine.budgets().await.unwrap().is_empty());
    assert_eq!(
        engine.delete_budget(budget_id).await.unwrap_err(),
        EngineError::KeyNotFound("budget not exists".to_string())
    );
}
