//! economy-admin: headless maintenance runner for the economy core.
//!
//! Usage:
//!   economy-admin seed         --db econ.db [--data-dir ./data]
//!   economy-admin summary      --db econ.db --user <id>
//!   economy-admin grant-coins  --db econ.db --user <id> --amount <n>
//!   economy-admin sweep-potions --db econ.db [--user <id>]
//!   economy-admin reset-usage  --db econ.db --resource <name>

use anyhow::{bail, Context, Result};
use economy_core::{
    clock::{SharedClock, SystemClock},
    config::EconomyConfig,
    service::EconomyService,
    store::EconomyStore,
    usage::UsageResource,
    wallet::{HistoryFilter, LedgerKind},
};
use std::env;
use std::sync::Arc;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");

    if command == "help" || command == "--help" {
        print_usage();
        return Ok(());
    }

    let db = flag_value(&args, "--db").unwrap_or(":memory:");
    let data_dir = flag_value(&args, "--data-dir").unwrap_or("./data");

    let store = EconomyStore::open(db).context("open store")?;
    store.migrate().context("migrate store")?;

    let config = EconomyConfig::load(data_dir).context("load config")?;
    let clock: SharedClock = Arc::new(SystemClock);
    let service = EconomyService::build(store, config, clock).context("build service")?;

    match command {
        "seed" => {
            let seeded = service.seed_catalog()?;
            println!("seeded {seeded} bundles into {db}");
        }

        "summary" => {
            let user = required_flag(&args, "--user")?;
            print_summary(&service, user)?;
        }

        "grant-coins" => {
            let user = required_flag(&args, "--user")?;
            let amount: i64 = required_flag(&args, "--amount")?
                .parse()
                .context("parse --amount")?;
            service.ensure_account(user)?;
            let balance = service.wallet().credit(
                user,
                amount,
                LedgerKind::Reward,
                "promotional grant",
                serde_json::json!({ "source": "economy-admin" }),
            )?;
            println!("granted {amount} coins to {user}; balance is now {balance}");
        }

        "sweep-potions" => {
            let user = flag_value(&args, "--user");
            let removed = service.sweep_expired_potions(user)?;
            println!("removed {removed} expired potion effects");
        }

        "reset-usage" => {
            let name = required_flag(&args, "--resource")?;
            let resource = UsageResource::parse(name)
                .with_context(|| format!("unknown resource '{name}'"))?;
            let reset = service.usage().reset_all(resource)?;
            println!("reset {reset} {resource} counters");
        }

        other => {
            print_usage();
            bail!("unknown command '{other}'");
        }
    }

    Ok(())
}

fn print_summary(service: &EconomyService, user: &str) -> Result<()> {
    let balance = service.wallet().balance(user)?;
    let stats = service.wallet().stats(user)?;
    let entitlements = service.entitlements().balances(user)?;
    let effects = service.potions().effects(user)?;
    let recent = service
        .wallet()
        .history(user, &HistoryFilter { limit: 5, ..Default::default() })?;

    println!("user:      {user}");
    println!("balance:   {balance}");
    println!(
        "ledger:    {} entries (+{} / -{})",
        stats.entry_count, stats.total_credited, stats.total_debited
    );

    println!("entitlements:");
    if entitlements.is_empty() {
        println!("  (none)");
    }
    for (entitlement, count) in &entitlements {
        println!("  {entitlement}: {count}");
    }

    println!("potion effects:");
    if effects.is_empty() {
        println!("  (none)");
    }
    for view in &effects {
        let state = if view.is_active {
            format!("active, {}d remaining", view.days_remaining)
        } else {
            "expired".to_string()
        };
        println!("  {}: {state}", view.effect.effect_id());
    }

    println!("recent ledger entries:");
    for entry in &recent {
        println!(
            "  {} {} {:+} ({} -> {})",
            entry.created_at.format("%Y-%m-%d %H:%M"),
            entry.kind.as_str(),
            entry.amount,
            entry.balance_before,
            entry.balance_after
        );
    }

    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn required_flag<'a>(args: &'a [String], flag: &str) -> Result<&'a str> {
    flag_value(args, flag).with_context(|| format!("missing required flag {flag}"))
}

fn print_usage() {
    println!("economy-admin — maintenance runner for the economy core");
    println!();
    println!("commands:");
    println!("  seed          --db <path> [--data-dir <dir>]   seed the bundle catalog");
    println!("  summary       --db <path> --user <id>          print a user's wallet summary");
    println!("  grant-coins   --db <path> --user <id> --amount <n>");
    println!("  sweep-potions --db <path> [--user <id>]        remove expired potion effects");
    println!("  reset-usage   --db <path> --resource <name>    bulk window reset for a resource");
}
