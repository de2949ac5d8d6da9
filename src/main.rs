mod config;
mod drive_auth;
mod error;
mod issue;
mod order;
mod pdf;
mod po_id;
mod register;
mod simple_refresh;
mod storage;
mod token_store;
mod web;

use clap::{Parser, Subcommand};
use comfy_table::Table;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::Config;
use issue::Issuer;
use order::OrderDraft;
use register::Register;

type BoxResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(name = "po", version, about = "Purchase order generator")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Issue a purchase order from a draft file
    Issue {
        draft: PathBuf,
        /// Keep the PDF local even if drive uploads are enabled
        #[arg(long)]
        no_upload: bool,
    },
    /// Print line and order totals for a draft
    Totals { draft: PathBuf },
    /// Print the ID the next purchase order would get
    NextId,
    /// List recently issued purchase orders
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Run the purchase order form
    Serve {
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Authorize drive access, or refresh the stored token
    Auth {
        #[arg(long)]
        refresh: bool,
    },
}

#[tokio::main]
async fn main() -> BoxResult<()> {
    let cli = Cli::parse();

    // init tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(filter)
        .init();

    // Install crypto provider
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "failed to install rustls crypto provider")?;

    if let Err(e) = run(cli).await {
        error!(error = %e, "Command failed");
        return Err(e);
    }
    Ok(())
}

async fn run(cli: Cli) -> BoxResult<()> {
    let cfg = Config::load(&cli.config)?;

    match cli.command {
        Command::Issue { draft, no_upload } => {
            let draft = OrderDraft::load(&draft)?;
            let issuer = Issuer::from_config(cfg, &cli.config).await?;
            let issued = issuer.issue(&draft, !no_upload).await?;
            print_totals(&draft);
            println!("PO ID:      {}", issued.po_id);
            println!("Issued on:  {}", issued.issued_on);
            println!("Saved to:   {} ({} bytes)", issued.local_path.display(), issued.pdf.len());
            if let Some(id) = &issued.drive_file_id {
                println!("Drive file: {id}");
            }
        }
        Command::Totals { draft } => {
            let draft = OrderDraft::load(&draft)?;
            print_totals(&draft);
        }
        Command::NextId => {
            let issuer = Issuer::from_config(cfg, &cli.config).await?;
            println!("{}", issuer.preview_id().await?);
        }
        Command::History { limit } => {
            let register = Register::open(&cfg.register_path)?;
            print_history(&register, limit)?;
        }
        Command::Serve { bind } => {
            let bind = bind.unwrap_or(cfg.server.bind);
            let issuer = Issuer::from_config(cfg, &cli.config).await?;
            web::serve(issuer, bind).await?;
        }
        Command::Auth { refresh } => authorize(&cfg, &cli.config, refresh).await?,
    }
    Ok(())
}

async fn authorize(cfg: &Config, config_path: &Path, refresh: bool) -> BoxResult<()> {
    if refresh {
        let token = simple_refresh::manual_refresh(cfg.oauth()?).await?;
        Config::update_tokens(
            config_path,
            Some(&token.access_token),
            None,
            token.expires_at().as_deref(),
        )?;
        info!(expires_in = token.expires_in, "Stored refreshed access token");
        return Ok(());
    }

    let auth = drive_auth::create_authenticator(cfg, config_path).await?;
    drive_auth::access_token(&auth).await?;
    info!(config = %config_path.display(), "Drive access authorized");
    Ok(())
}

fn print_totals(draft: &OrderDraft) {
    let mut table = Table::new();
    table.set_header(vec![
        "S.No",
        "Item Name",
        "Description",
        "HSN/SAC",
        "Qty",
        "Amount",
        "IGST%",
        "Amount with GST",
    ]);
    for (idx, item) in draft.items.iter().enumerate() {
        table.add_row(vec![
            (idx + 1).to_string(),
            item.name.clone(),
            item.description.clone(),
            item.hsn_sac.clone(),
            item.qty.to_string(),
            format!("{:.2}", item.unit_amount),
            format!("{:.1}", item.igst),
            format!("{:.2}", item.totals().amount_with_tax),
        ]);
    }
    println!("{table}");

    let totals = draft.totals();
    println!("Sub Total:   {:.2}", totals.subtotal);
    println!("Total IGST:  {:.2}", totals.tax);
    println!("Grand Total: {:.2}", totals.grand_total);
}

fn print_history(register: &Register, limit: usize) -> BoxResult<()> {
    let rows = register.recent(limit)?;
    if rows.is_empty() {
        println!("No purchase orders issued yet.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["PO ID", "Issued", "Vendor", "Items", "Grand Total", "Drive File"]);
    for rec in rows {
        table.add_row(vec![
            rec.po_id,
            rec.issued_on,
            rec.vendor,
            rec.item_count.to_string(),
            format!("{:.2}", rec.grand_total),
            rec.drive_file_id.unwrap_or_default(),
        ]);
    }
    println!("{table}");
    info!(total = register.count()?, "Register statistics");
    Ok(())
}
