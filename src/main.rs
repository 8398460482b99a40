use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use gymslot::model::format_clock;
use gymslot::{Engine, FacilityConfig};

#[derive(Parser)]
#[command(name = "gymslot", about = "Maintenance tool for a gymslot data directory")]
struct Args {
    #[arg(long, env = "GYMSLOT_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Facility config (JSON). Built-in defaults when absent.
    #[arg(long, env = "GYMSLOT_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "GYMSLOT_METRICS_PORT")]
    metrics_port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print record counts and WAL growth since the last compaction.
    Stats,
    /// Rewrite the WAL as a minimal snapshot of live records.
    Compact,
    /// Remaining units of every catalog item for one equipment session.
    Availability {
        #[arg(long)]
        date: String,
        #[arg(long)]
        start: String,
    },
    /// A member's slots, and whether they are in one right now.
    Slots {
        #[arg(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    gymslot::observability::init(args.metrics_port)?;

    let config = match &args.config {
        Some(path) => FacilityConfig::from_json_file(path)?,
        None => FacilityConfig::default(),
    };

    std::fs::create_dir_all(&args.data_dir)?;
    let wal_path = args.data_dir.join("gymslot.wal");
    info!("data_dir: {}", args.data_dir.display());
    for category in &config.categories {
        info!("  hours: {category}");
    }

    let engine = Engine::new(wal_path, config)?;

    match args.command {
        Command::Stats => {
            println!("slots:        {}", engine.slot_count());
            println!("reservations: {}", engine.reservation_count());
            println!("wal appends since compaction: {}", engine.wal_appends_since_compact().await);
        }
        Command::Compact => {
            let before = engine.wal_appends_since_compact().await;
            engine.compact_wal().await?;
            println!("compacted ({before} appends folded)");
        }
        Command::Availability { date, start } => {
            for a in engine.catalog_availability(&date, &start).await? {
                println!("{:<20} {}", a.equipment, a.remaining);
            }
        }
        Command::Slots { user } => {
            for s in engine.list_slots(&user) {
                println!(
                    "{}  {}  {} - {}  {}",
                    s.id,
                    s.date,
                    format_clock(s.start),
                    format_clock(s.end),
                    s.category
                );
            }
            println!("active now: {}", engine.is_user_active_now(&user));
        }
    }
    Ok(())
}
