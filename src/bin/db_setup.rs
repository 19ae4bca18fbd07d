//! db_setup - create the Road Sentinel database schema and seed the admin user

use anyhow::Result;
use clap::Parser;

use road_sentinel::{now_s, SqliteAlertStore};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Database path.
    #[arg(long, env = "SENTINEL_DB_PATH", default_value = "sentinel.db")]
    db: String,
    /// Admin account email.
    #[arg(long, default_value = "admin@sentinel.local")]
    admin_email: String,
    /// Delete any existing database file first.
    #[arg(long)]
    fresh: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.fresh && std::path::Path::new(&args.db).exists() {
        std::fs::remove_file(&args.db)?;
        log::info!("removed existing database {}", args.db);
    }

    let now = now_s()? as i64;
    let mut store = SqliteAlertStore::open(&args.db)?;
    let admin_uid = format!("admin-{now}");
    let admin_id = store.seed_admin(&admin_uid, &args.admin_email, now)?;

    log::info!("database ready at {}", args.db);
    log::info!("tables: users, alerts, user_sessions");
    log::info!(
        "admin account: {} (uid {}, id {})",
        args.admin_email,
        admin_uid,
        admin_id
    );
    Ok(())
}
