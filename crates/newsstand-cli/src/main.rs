// Newsstand CLI - command-line client for the settlement server

mod client;
mod settings;
mod watch;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

use client::ApiClient;
use settings::Settings;

/// Newsstand - pay, watch invoices and manage withdrawals
#[derive(Parser)]
#[command(name = "newsstand")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server base URL (overrides the saved setting)
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage saved settings (set, show)
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Register a new account
    Register {
        /// Display name
        name: String,

        /// Register as a creator who can sell and withdraw
        #[arg(long)]
        creator: bool,
    },
    /// Show an account balance and recent ledger entries
    Balance {
        #[arg(short, long)]
        account: Option<Uuid>,
    },
    /// Request a QR invoice for a product, a recharge or a membership
    Invoice {
        #[command(subcommand)]
        target: InvoiceTarget,

        /// Keep polling until the invoice settles
        #[arg(short, long)]
        watch: bool,

        /// Give up watching after this many seconds
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },
    /// Poll an invoice every few seconds until it settles
    Watch {
        invoice_id: String,

        /// The invoice is for a membership
        #[arg(long)]
        membership: bool,

        /// Give up after this many seconds
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },
    /// Cancel an unpaid invoice
    Cancel {
        invoice_id: String,

        /// The invoice is for a membership
        #[arg(long)]
        membership: bool,
    },
    /// Pay from the account balance
    PayWallet {
        #[command(subcommand)]
        target: WalletTarget,

        #[arg(short, long)]
        account: Option<Uuid>,
    },
    /// Request a withdrawal of earnings
    Withdraw {
        /// Amount as a decimal string, e.g. 3000.00
        amount: String,

        #[arg(short, long)]
        account: Option<Uuid>,
    },
    /// List withdrawal requests
    Withdrawals {
        #[arg(short, long)]
        account: Option<Uuid>,
    },
    /// Move a withdrawal request to approved, rejected or completed
    Review {
        withdrawal_id: Uuid,

        /// approved, rejected or completed
        status: String,

        #[arg(long)]
        notes: Option<String>,

        #[arg(long)]
        admin: Option<Uuid>,
    },
    /// Show membership plan, window and post quota
    Membership {
        #[arg(short, long)]
        account: Option<Uuid>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Save server URL and default ids
    Set {
        #[arg(long)]
        server_url: Option<String>,

        #[arg(long)]
        account: Option<Uuid>,

        #[arg(long)]
        admin: Option<Uuid>,
    },
    /// Show saved settings
    Show,
}

#[derive(Subcommand)]
enum InvoiceTarget {
    /// Buy a product (as a guest unless --account is given)
    Product {
        product_id: Uuid,

        #[arg(short, long)]
        account: Option<Uuid>,
    },
    /// Top up the account balance
    Recharge {
        amount: String,

        #[arg(short, long)]
        account: Option<Uuid>,
    },
    /// Buy or renew a membership plan
    Membership {
        membership_id: Uuid,

        #[arg(short, long)]
        account: Option<Uuid>,
    },
}

#[derive(Subcommand)]
enum WalletTarget {
    Product { product_id: Uuid },
    Membership { membership_id: Uuid },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings_path = settings::default_path()?;
    let saved = settings::load(&settings_path)?;
    let client = ApiClient::new(&saved.server_url(cli.server.as_deref()));

    match cli.command {
        Commands::Config { action } => handle_config(action, &settings_path, saved),
        Commands::Register { name, creator } => {
            let account = client.post(
                "/accounts",
                json!({ "displayName": name, "isCreator": creator }),
            )?;
            println!("Account registered!");
            println!("  ID:     {}", str_field(&account, "id"));
            println!("  Number: {}", account["accountNumber"]);
            Ok(())
        }
        Commands::Balance { account } => {
            let account = saved.account(account)?;
            let body = client.get(&format!("/accounts/{}/balance", account))?;
            print_balance(&body);
            Ok(())
        }
        Commands::Invoice {
            target,
            watch,
            timeout,
        } => handle_invoice(&client, &saved, target, watch, timeout),
        Commands::Watch {
            invoice_id,
            membership,
            timeout,
        } => watch_invoice(&client, &invoice_id, membership, timeout),
        Commands::Cancel {
            invoice_id,
            membership,
        } => {
            let path = if membership {
                format!("/membership/invoice/{}/cancel", invoice_id)
            } else {
                format!("/invoice/{}/cancel", invoice_id)
            };
            let order = client.post(&path, Value::Null)?;
            println!("Invoice {} is now {}", invoice_id, colored_status(&order["status"]));
            Ok(())
        }
        Commands::PayWallet { target, account } => {
            let buyer = saved.account(account)?;
            let body = match target {
                WalletTarget::Product { product_id } => {
                    json!({ "buyerId": buyer, "productId": product_id })
                }
                WalletTarget::Membership { membership_id } => {
                    json!({ "buyerId": buyer, "membershipId": membership_id })
                }
            };
            let paid = client.post("/wallet/pay", body)?;
            println!("{}", "Payment completed".green().bold());
            println!("  Order:   {}", str_field(&paid, "orderId"));
            println!("  Amount:  {}", str_field(&paid, "amount"));
            println!("  Balance: {}", str_field(&paid, "balance"));
            if let Some(url) = paid["download"]["url"].as_str() {
                println!("  Download: {}", url);
            }
            Ok(())
        }
        Commands::Withdraw { amount, account } => {
            let creator = saved.account(account)?;
            let request = client.post(
                "/withdrawals",
                json!({ "creatorId": creator, "amount": amount }),
            )?;
            println!("Withdrawal requested: {}", str_field(&request, "id"));
            println!("  Amount: {}", str_field(&request, "amount"));
            println!("  Status: {}", colored_status(&request["status"]));
            Ok(())
        }
        Commands::Withdrawals { account } => {
            let creator = saved.account(account)?;
            let list = client.get(&format!("/withdrawals?creatorId={}", creator))?;
            let requests = list.as_array().cloned().unwrap_or_default();
            if requests.is_empty() {
                println!("No withdrawal requests.");
            }
            for request in requests {
                println!(
                    "{}  {:>12}  {}",
                    str_field(&request, "id"),
                    str_field(&request, "amount"),
                    colored_status(&request["status"])
                );
            }
            Ok(())
        }
        Commands::Review {
            withdrawal_id,
            status,
            notes,
            admin,
        } => {
            let admin = saved.admin(admin)?;
            let updated = client.put(
                &format!("/withdrawals/{}/status", withdrawal_id),
                json!({ "status": status, "adminId": admin, "notes": notes }),
            )?;
            println!(
                "Withdrawal {}: {} -> {}",
                withdrawal_id,
                str_field(&updated, "previousStatus"),
                colored_status(&updated["status"])
            );
            println!("  Creator balance: {}", str_field(&updated, "creatorBalance"));
            Ok(())
        }
        Commands::Membership { account } => {
            let creator = saved.account(account)?;
            let status = client.get(&format!("/membership/status/{}", creator))?;
            let plan = status["membership"]["name"].as_str().unwrap_or("none");
            let active = if status["active"].as_bool() == Some(true) {
                "active".green()
            } else {
                "inactive".yellow()
            };
            println!("Plan:   {} ({})", plan, active);
            if let Some(end) = status["subscriptionEnd"].as_str() {
                println!("Until:  {}", end);
            }
            println!(
                "Posts:  {} used, {} remaining of {}",
                status["postsUsed"], status["postsRemaining"], status["postQuota"]
            );
            Ok(())
        }
    }
}

fn handle_config(action: ConfigAction, path: &std::path::Path, mut saved: Settings) -> Result<()> {
    match action {
        ConfigAction::Set {
            server_url,
            account,
            admin,
        } => {
            if server_url.is_some() {
                saved.server_url = server_url;
            }
            if account.is_some() {
                saved.account_id = account;
            }
            if admin.is_some() {
                saved.admin_id = admin;
            }
            settings::save(path, &saved)?;
            println!("Settings saved to {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(&saved)?);
            Ok(())
        }
    }
}

fn handle_invoice(
    client: &ApiClient,
    saved: &Settings,
    target: InvoiceTarget,
    watch: bool,
    timeout: u64,
) -> Result<()> {
    let (path, body, membership) = match target {
        InvoiceTarget::Product {
            product_id,
            account,
        } => {
            let buyer = account.or(saved.account_id);
            ("/invoice", json!({ "productId": product_id, "buyerId": buyer }), false)
        }
        InvoiceTarget::Recharge { amount, account } => {
            let buyer = saved.account(account)?;
            ("/invoice", json!({ "amount": amount, "buyerId": buyer }), false)
        }
        InvoiceTarget::Membership {
            membership_id,
            account,
        } => {
            let creator = saved.account(account)?;
            (
                "/membership/invoice",
                json!({ "membershipId": membership_id, "creatorId": creator }),
                true,
            )
        }
    };

    let invoice = client.post(path, body)?;
    let invoice_id = str_field(&invoice, "invoiceId");
    println!("Invoice created: {}", invoice_id.bold());
    println!("  Amount: {}", str_field(&invoice, "amount"));
    if let Some(qr) = invoice["qrText"].as_str() {
        println!("  QR:     {}", qr);
    }

    if watch {
        watch_invoice(client, &invoice_id, membership, timeout)?;
    } else {
        println!();
        println!("Run `newsstand watch {}` to follow the payment.", invoice_id);
    }
    Ok(())
}

fn watch_invoice(client: &ApiClient, invoice_id: &str, membership: bool, timeout: u64) -> Result<()> {
    let path = if membership {
        format!("/membership/check/{}", invoice_id)
    } else {
        format!("/check/{}", invoice_id)
    };

    println!("Waiting for payment of {}...", invoice_id);
    let result = watch::watch(client, &path, Duration::from_secs(timeout), |_| {
        eprint!(".");
    })?;
    eprintln!();

    println!("Invoice {} is {}", invoice_id, colored_status(&result["status"]));
    if let Some(url) = result["downloadUrl"].as_str() {
        println!("  Download: {}", url);
        if let Some(expires) = result["downloadExpiresAt"].as_str() {
            println!("  Expires:  {}", expires);
        }
    }
    if let Some(end) = result["subscription"]["end"].as_str() {
        println!("  Subscribed until: {}", end);
    }
    Ok(())
}

fn print_balance(body: &Value) {
    println!("Account #{}", body["accountNumber"]);
    println!("Balance: {}", str_field(body, "balance").bold());

    let entries = body["recentEntries"].as_array().cloned().unwrap_or_default();
    if entries.is_empty() {
        return;
    }
    println!();
    println!("Recent entries:");
    for entry in entries {
        let kind = str_field(&entry, "entryType");
        let sign = match kind.as_str() {
            "wallet_debit" | "withdrawal_debit" => "-".red(),
            _ => "+".green(),
        };
        println!(
            "  {} {}{:>12}  {}",
            str_field(&entry, "createdAt"),
            sign,
            str_field(&entry, "amount"),
            kind
        );
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value[key].as_str().unwrap_or("-").to_string()
}

fn colored_status(status: &Value) -> colored::ColoredString {
    let status = status.as_str().unwrap_or("unknown");
    match status {
        "completed" | "approved" => status.green(),
        "pending" => status.yellow(),
        "failed" | "cancelled" | "rejected" => status.red(),
        other => other.normal(),
    }
}
