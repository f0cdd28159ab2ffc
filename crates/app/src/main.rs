use std::{collections::BTreeSet, error::Error, sync::Arc};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use clap::{Args, Parser, Subcommand};
use engine::{
    AccountKind, BudgetMonth, CategoryType, Currency, CurrencyPreference, DateRange, Engine,
    FilterType, MoneyCents, NewBudget, Reminder, SettingsRepository, SymbolPosition, Transaction,
    TransactionFilter, TransactionKind, TransactionRepository, TransactionSummary,
};
use futures::StreamExt;
use migration::{Migrator, MigratorTrait};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use uuid::Uuid;

use settings::Database;

mod feed;
mod settings;

type AppResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

#[derive(Parser, Debug)]
#[command(name = "expenses")]
#[command(about = "Track income, expenses and budgets")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Account(Account),
    Category(Category),
    Tx(Tx),
    Budget(Budget),
    Filter(Filter),
    Currency(CurrencyCmd),
    Reminder(ReminderCmd),
    /// Totals of the transactions visible under the current filter.
    Summary,
    /// Follow the filtered transactions; commands typed on stdin are applied live.
    Watch,
}

#[derive(Args, Debug)]
struct Account {
    #[command(subcommand)]
    command: AccountCommand,
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    Add {
        name: String,
        #[arg(long, value_parser = parse_account_kind, default_value = "cash")]
        kind: AccountKind,
    },
    List,
}

#[derive(Args, Debug)]
struct Category {
    #[command(subcommand)]
    command: CategoryCommand,
}

#[derive(Subcommand, Debug)]
enum CategoryCommand {
    Add {
        name: String,
        #[arg(long, value_parser = parse_category_type)]
        kind: CategoryType,
    },
    List,
    Show { id: Option<String> },
}

#[derive(Args, Debug)]
struct Tx {
    #[command(subcommand)]
    command: TxCommand,
}

#[derive(Args, Debug)]
struct When {
    /// `YYYY-MM-DD` or `YYYY-MM-DD HH:MM` in the configured time zone.
    #[arg(long)]
    at: Option<String>,
    #[arg(long)]
    note: Option<String>,
}

#[derive(Subcommand, Debug)]
enum TxCommand {
    Income {
        amount: String,
        #[arg(long)]
        account: Uuid,
        #[arg(long)]
        category: Uuid,
        #[command(flatten)]
        when: When,
    },
    Expense {
        amount: String,
        #[arg(long)]
        account: Uuid,
        #[arg(long)]
        category: Uuid,
        #[command(flatten)]
        when: When,
    },
    Transfer {
        amount: String,
        #[arg(long)]
        from: Uuid,
        #[arg(long)]
        to: Uuid,
        #[command(flatten)]
        when: When,
    },
    Delete {
        id: Uuid,
    },
    /// Transactions visible under the current filter.
    List,
}

#[derive(Args, Debug)]
struct Budget {
    #[command(subcommand)]
    command: BudgetCommand,
}

#[derive(Subcommand, Debug)]
enum BudgetCommand {
    Add {
        name: String,
        amount: String,
        /// `MM/YYYY`
        #[arg(long)]
        month: BudgetMonth,
        #[arg(long = "account")]
        accounts: Vec<Uuid>,
        #[arg(long = "category")]
        categories: Vec<Uuid>,
    },
    List,
    Delete {
        id: Uuid,
    },
}

#[derive(Args, Debug)]
struct Filter {
    #[command(subcommand)]
    command: FilterCommand,
}

#[derive(Subcommand, Debug)]
enum FilterCommand {
    Show,
    Enable,
    Disable,
    Type {
        #[arg(value_parser = parse_filter_type)]
        filter_type: FilterType,
    },
    /// Restrict to these accounts; no ids clears the restriction.
    Accounts { ids: Vec<Uuid> },
    /// Restrict to these categories; no ids clears the restriction.
    Categories {
        ids: Vec<Uuid>,
        #[arg(long = "type", value_parser = parse_category_type)]
        types: Vec<CategoryType>,
    },
    /// Set the range used by the `custom` filter type.
    Range {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
}

#[derive(Args, Debug)]
struct CurrencyCmd {
    #[command(subcommand)]
    command: CurrencyCommand,
}

#[derive(Subcommand, Debug)]
enum CurrencyCommand {
    Set {
        #[arg(value_parser = parse_currency)]
        currency: Currency,
        #[arg(long, value_parser = parse_symbol_position, default_value = "prefix")]
        position: SymbolPosition,
    },
    Show,
}

#[derive(Args, Debug)]
struct ReminderCmd {
    #[command(subcommand)]
    command: ReminderCommand,
}

#[derive(Subcommand, Debug)]
enum ReminderCommand {
    On {
        /// `HH:MM`
        #[arg(long, default_value = "20:00")]
        at: String,
    },
    Off,
    Show,
}

fn parse_account_kind(raw: &str) -> Result<AccountKind, String> {
    AccountKind::try_from(raw).map_err(|err| err.to_string())
}

fn parse_category_type(raw: &str) -> Result<CategoryType, String> {
    CategoryType::try_from(raw).map_err(|err| err.to_string())
}

fn parse_filter_type(raw: &str) -> Result<FilterType, String> {
    FilterType::try_from(raw).map_err(|err| err.to_string())
}

fn parse_currency(raw: &str) -> Result<Currency, String> {
    Currency::try_from(raw).map_err(|err| err.to_string())
}

fn parse_symbol_position(raw: &str) -> Result<SymbolPosition, String> {
    SymbolPosition::try_from(raw).map_err(|err| err.to_string())
}

/// Everything a command needs.
struct Context {
    engine: Engine,
    settings: Arc<engine::Settings>,
    timezone: Tz,
}

impl Context {
    fn filter(&self) -> TransactionFilter {
        let settings: Arc<dyn SettingsRepository> = self.settings.clone();
        let transactions: Arc<dyn TransactionRepository> = Arc::new(self.engine.clone());
        TransactionFilter::new(settings, transactions)
    }

    fn money(&self, amount: MoneyCents) -> String {
        amount.format(self.settings.currency())
    }

    fn amount(&self, raw: &str) -> AppResult<i64> {
        let currency = self.settings.currency().currency;
        Ok(MoneyCents::parse_in(raw, currency)?.cents())
    }

    fn occurred_at(&self, raw: Option<&str>) -> AppResult<DateTime<Utc>> {
        let Some(raw) = raw else {
            return Ok(Utc::now());
        };
        let raw = raw.trim();
        let local = match NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M") {
            Ok(local) => local,
            Err(_) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|_| format!("invalid date: {raw}"))?
                .and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default()),
        };
        self.timezone
            .from_local_datetime(&local)
            .earliest()
            .map(|at| at.with_timezone(&Utc))
            .ok_or_else(|| format!("{raw} does not exist in {}", self.timezone).into())
    }

    /// Current result of the transaction filter.
    async fn filtered(&self) -> AppResult<Vec<Transaction>> {
        let mut transactions = self.filter().transactions();
        match transactions.next().await {
            Some(result) => Ok(result?),
            None => Ok(Vec::new()),
        }
    }

    fn print_transactions(&self, transactions: &[Transaction]) {
        for tx in transactions {
            let at = tx.occurred_at.with_timezone(&self.timezone);
            let target = match (tx.kind, tx.to_account_id, tx.category_id) {
                (TransactionKind::Transfer, Some(to), _) => format!("{} -> {to}", tx.account_id),
                (_, _, Some(category)) => format!("{} [{category}]", tx.account_id),
                _ => tx.account_id.to_string(),
            };
            println!(
                "{} {} {:>8} {:>14} {target} {}",
                tx.id,
                at.format("%Y-%m-%d %H:%M"),
                tx.kind.as_str(),
                self.money(MoneyCents::new(tx.amount_minor)),
                tx.note.as_deref().unwrap_or("")
            );
        }
    }

    fn print_summary(&self, summary: &TransactionSummary) {
        println!("transactions: {}", summary.count);
        println!("income:       {}", self.money(summary.income));
        println!("expense:      {}", self.money(summary.expense));
        println!("balance:      {}", self.money(summary.balance()));
    }
}

async fn run(ctx: &Context, command: Command) -> AppResult<()> {
    match command {
        Command::Account(Account { command }) => match command {
            AccountCommand::Add { name, kind } => {
                let id = ctx.engine.new_account(&name, kind).await?;
                println!("created account: {name} ({id})");
            }
            AccountCommand::List => {
                for account in ctx.engine.accounts().await? {
                    println!("{} {:<6} {}", account.id, account.kind.as_str(), account.name);
                }
            }
        },
        Command::Category(Category { command }) => match command {
            CategoryCommand::Add { name, kind } => {
                let id = ctx.engine.new_category(&name, kind).await?;
                println!("created category: {name} ({id})");
            }
            CategoryCommand::List => {
                for category in ctx.engine.categories().await? {
                    println!(
                        "{} {:<7} {}",
                        category.id,
                        category.kind.as_str(),
                        category.name
                    );
                }
            }
            CategoryCommand::Show { id } => {
                let category = ctx.engine.find_category(id.as_deref()).await?;
                println!("{} {} {}", category.id, category.kind.as_str(), category.name);
            }
        },
        Command::Tx(Tx { command }) => match command {
            TxCommand::Income {
                amount,
                account,
                category,
                when,
            } => {
                let id = ctx
                    .engine
                    .income(
                        account,
                        category,
                        ctx.amount(&amount)?,
                        ctx.occurred_at(when.at.as_deref())?,
                        when.note.as_deref(),
                    )
                    .await?;
                println!("recorded income: {id}");
            }
            TxCommand::Expense {
                amount,
                account,
                category,
                when,
            } => {
                let id = ctx
                    .engine
                    .expense(
                        account,
                        category,
                        ctx.amount(&amount)?,
                        ctx.occurred_at(when.at.as_deref())?,
                        when.note.as_deref(),
                    )
                    .await?;
                println!("recorded expense: {id}");
            }
            TxCommand::Transfer {
                amount,
                from,
                to,
                when,
            } => {
                let id = ctx
                    .engine
                    .transfer(
                        from,
                        to,
                        ctx.amount(&amount)?,
                        ctx.occurred_at(when.at.as_deref())?,
                        when.note.as_deref(),
                    )
                    .await?;
                println!("recorded transfer: {id}");
            }
            TxCommand::Delete { id } => {
                ctx.engine.delete_transaction(id).await?;
                println!("deleted transaction: {id}");
            }
            TxCommand::List => {
                let transactions = ctx.filtered().await?;
                ctx.print_transactions(&transactions);
            }
        },
        Command::Budget(Budget { command }) => match command {
            BudgetCommand::Add {
                name,
                amount,
                month,
                accounts,
                categories,
            } => {
                let budget = NewBudget {
                    name: name.clone(),
                    amount_minor: ctx.amount(&amount)?,
                    month,
                    accounts: (!accounts.is_empty()).then(|| accounts.into_iter().collect()),
                    categories: (!categories.is_empty()).then(|| categories.into_iter().collect()),
                };
                let id = ctx.engine.add_budget(budget).await?;
                println!("created budget: {name} ({id})");
            }
            BudgetCommand::List => {
                for (budget, progress) in ctx.engine.budget_progress(&ctx.timezone).await? {
                    let status = if progress.is_exceeded() {
                        "exceeded"
                    } else {
                        "ok"
                    };
                    println!(
                        "{} {} {:<20} {} / {} ({} left, {status})",
                        budget.id,
                        budget.month,
                        budget.name,
                        ctx.money(progress.spent),
                        ctx.money(progress.limit),
                        ctx.money(progress.remaining())
                    );
                }
            }
            BudgetCommand::Delete { id } => {
                ctx.engine.delete_budget(id).await?;
                println!("deleted budget: {id}");
            }
        },
        Command::Filter(Filter { command }) => run_filter(ctx, command).await?,
        Command::Currency(CurrencyCmd { command }) => match command {
            CurrencyCommand::Set { currency, position } => {
                ctx.settings
                    .set_currency(CurrencyPreference { currency, position })
                    .await?;
                println!("currency: {currency}");
            }
            CurrencyCommand::Show => {
                let pref = ctx.settings.currency();
                println!(
                    "currency: {} (e.g. {})",
                    pref.currency,
                    MoneyCents::new(123_456).format(pref)
                );
            }
        },
        Command::Reminder(ReminderCmd { command }) => {
            let current = ctx.settings.reminder();
            match command {
                ReminderCommand::On { at } => {
                    let time = NaiveTime::parse_from_str(at.trim(), "%H:%M")
                        .map_err(|_| format!("invalid time: {at}"))?;
                    let hour = u8::try_from(chrono::Timelike::hour(&time))?;
                    let minute = u8::try_from(chrono::Timelike::minute(&time))?;
                    ctx.settings
                        .set_reminder(Reminder {
                            enabled: true,
                            hour,
                            minute,
                        })
                        .await?;
                    println!("reminder on at {hour:02}:{minute:02}");
                }
                ReminderCommand::Off => {
                    ctx.settings
                        .set_reminder(Reminder {
                            enabled: false,
                            ..current
                        })
                        .await?;
                    println!("reminder off");
                }
                ReminderCommand::Show => {
                    let state = if current.enabled { "on" } else { "off" };
                    println!(
                        "reminder {state} at {:02}:{:02}",
                        current.hour, current.minute
                    );
                }
            }
        }
        Command::Summary => {
            let transactions = ctx.filtered().await?;
            let summary = TransactionSummary::from_transactions(&transactions);
            ctx.print_summary(&summary);
            if !summary.expense_by_category.is_empty() {
                let names: std::collections::HashMap<Uuid, String> = ctx
                    .engine
                    .categories()
                    .await?
                    .into_iter()
                    .map(|category| (category.id, category.name))
                    .collect();
                for (category_id, amount) in &summary.expense_by_category {
                    let name = names
                        .get(category_id)
                        .cloned()
                        .unwrap_or_else(|| category_id.to_string());
                    println!("  {name:<20} {}", ctx.money(*amount));
                }
            }
        }
        Command::Watch => watch(ctx).await?,
    }
    Ok(())
}

async fn run_filter(ctx: &Context, command: FilterCommand) -> AppResult<()> {
    let settings = &ctx.settings;
    match command {
        FilterCommand::Show => {
            let filter = settings.filter();
            let range = settings.filter_range(filter.filter_type);
            let (start, end) = range.bounds()?;
            println!("enabled:        {}", filter.enabled);
            println!("type:           {}", filter.filter_type.as_str());
            println!(
                "range:          {} .. {}",
                start.with_timezone(&ctx.timezone).format("%Y-%m-%d %H:%M"),
                end.with_timezone(&ctx.timezone).format("%Y-%m-%d %H:%M")
            );
            println!("accounts:       {}", join(filter.accounts.as_ref()));
            println!("categories:     {}", join(filter.categories.as_ref()));
            let types = filter
                .category_types
                .map(|types| types.iter().map(|t| t.as_str().to_string()).collect());
            println!("category types: {}", join(types.as_ref()));
        }
        FilterCommand::Enable => settings.set_filter_enabled(true).await?,
        FilterCommand::Disable => settings.set_filter_enabled(false).await?,
        FilterCommand::Type { filter_type } => settings.set_filter_type(filter_type).await?,
        FilterCommand::Accounts { ids } => {
            for id in &ids {
                ctx.engine.account(*id).await?;
            }
            settings.set_accounts(Some(to_strings(&ids))).await?;
        }
        FilterCommand::Categories { ids, types } => {
            for id in &ids {
                ctx.engine.category(*id).await?;
            }
            settings.set_categories(Some(to_strings(&ids))).await?;
            settings
                .set_category_types(Some(types.into_iter().collect()))
                .await?;
        }
        FilterCommand::Range { from, to } => {
            let start = local_bound(ctx.timezone, from, NaiveTime::MIN)?;
            let end = local_bound(
                ctx.timezone,
                to,
                NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN),
            )?;
            settings
                .set_custom_range(DateRange::from_datetimes(start, end)?)
                .await?;
        }
    }
    Ok(())
}

fn local_bound(tz: Tz, date: NaiveDate, time: NaiveTime) -> AppResult<DateTime<Utc>> {
    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|at| at.with_timezone(&Utc))
        .ok_or_else(|| format!("{date} {time} does not exist in {tz}").into())
}

fn to_strings(ids: &[Uuid]) -> BTreeSet<String> {
    ids.iter().map(Uuid::to_string).collect()
}

fn join(values: Option<&BTreeSet<String>>) -> String {
    match values {
        Some(values) => values.iter().cloned().collect::<Vec<_>>().join(", "),
        None => "all".to_string(),
    }
}

/// Print the filtered transactions on every change until Ctrl-C.
///
/// Each stdin line is run as a command, so writes and filter changes made
/// here show up in the feed.
async fn watch(ctx: &Context) -> AppResult<()> {
    watch_until(
        ctx,
        BufReader::new(tokio::io::stdin()),
        tokio::signal::ctrl_c(),
    )
    .await
}

/// Prints every feed update and runs `input` lines as commands until
/// `shutdown` completes.
async fn watch_until<R, S>(ctx: &Context, input: R, shutdown: S) -> AppResult<()>
where
    R: AsyncBufRead + Unpin,
    S: Future,
{
    let (mut feed, task) = feed::spawn(&ctx.filter());
    let mut lines = input.lines();
    let mut stdin_open = true;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = feed.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = feed.borrow_and_update().clone();
                if let Some(transactions) = latest {
                    let summary = TransactionSummary::from_transactions(&transactions);
                    tracing::info!(
                        count = summary.count,
                        income = summary.income.cents(),
                        expense = summary.expense.cents(),
                        "transactions updated"
                    );
                    ctx.print_transactions(&transactions);
                    ctx.print_summary(&summary);
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line? {
                    Some(line) => run_line(ctx, &line).await,
                    None => stdin_open = false,
                }
            }
        }
    }

    task.abort();
    Ok(())
}

async fn run_line(ctx: &Context, line: &str) {
    if line.trim().is_empty() {
        return;
    }
    let args = std::iter::once("expenses").chain(line.split_whitespace());
    match Cli::try_parse_from(args) {
        Ok(Cli {
            command: Command::Watch,
        }) => eprintln!("already watching"),
        Ok(cli) => {
            if let Err(err) = Box::pin(run(ctx, cli.command)).await {
                eprintln!("error: {err}");
            }
        }
        Err(err) => eprintln!("{err}"),
    }
}

async fn parse_database(database: &Database) -> AppResult<sea_orm::DatabaseConnection> {
    let url = match database {
        Database::Memory => String::from("sqlite::memory:"),
        Database::Sqlite(path) => format!("sqlite:{}?mode=rwc", path),
    };

    let database = sea_orm::Database::connect(url).await?;
    Migrator::up(&database, None).await?;
    Ok(database)
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse();
    let settings = settings::Settings::new()?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "expenses={level},engine={level}",
            level = settings.app.level
        ))
        .with_writer(std::io::stderr)
        .init();

    let timezone = settings.timezone()?;
    let db = parse_database(&settings.database()).await?;
    let engine = Engine::builder().database(db.clone()).build().await?;
    let preferences = engine::Settings::builder()
        .database(db)
        .timezone(timezone)
        .build()
        .await?;
    tracing::debug!(%timezone, "storage ready");

    let ctx = Context {
        engine,
        settings: Arc::new(preferences),
        timezone,
    };
    run(&ctx, cli.command).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{io::AsyncWriteExt, sync::oneshot};

    use super::*;

    async fn context() -> Context {
        let db = parse_database(&Database::Memory).await.unwrap();
        let engine = Engine::builder().database(db.clone()).build().await.unwrap();
        let settings = engine::Settings::builder().database(db).build().await.unwrap();
        Context {
            engine,
            settings: Arc::new(settings),
            timezone: Tz::UTC,
        }
    }

    #[tokio::test]
    async fn watch_stops_on_shutdown_after_running_a_command() {
        let ctx = context().await;
        let (mut writer, reader) = tokio::io::duplex(256);
        writer.write_all(b"account add Cash\n").await.unwrap();

        let (stop, stopped) = oneshot::channel::<()>();
        let engine = ctx.engine.clone();
        tokio::spawn(async move {
            while engine.accounts().await.unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            let _ = stop.send(());
        });

        // The writer stays open, so only the shutdown future can end the loop.
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            watch_until(&ctx, BufReader::new(reader), stopped),
        )
        .await
        .expect("watch did not stop");
        assert!(result.is_ok());

        let names: Vec<String> = ctx
            .engine
            .accounts()
            .await
            .unwrap()
            .into_iter()
            .map(|account| account.name)
            .collect();
        assert_eq!(names, vec!["Cash"]);
        drop(writer);
    }
}
