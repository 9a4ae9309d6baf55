//! `roomslot` command-line host.
//!
//! ```sh
//! roomslot --user 01J... --admin building add Main --floors 4
//! roomslot --user 01J... --admin room add 01J... M-101 --capacity 30 --floor 1
//! roomslot --user 01J... --admin class add 01J... Physics mon 10:00 11:30
//! roomslot week 01J... --date 2024-06-03
//! roomslot --user 01J... book 01J... 2024-06-03 09:00 11:00 --attendees 10
//! roomslot --user 01J... mine --json
//! ```

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Weekday};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

use roomslot::booking::{ReservationDraft, ReservationManager};
use roomslot::clock::{Clock, SystemClock};
use roomslot::compactor::compact_if_needed;
use roomslot::config::Config;
use roomslot::identity::{Principal, Role};
use roomslot::model::Span;
use roomslot::signal::SignalHub;
use roomslot::store::WalStore;

#[derive(Parser)]
#[command(name = "roomslot", version, about = "Campus room reservations")]
struct Cli {
    /// Acting principal id
    #[arg(long, global = true)]
    user: Option<Ulid>,

    /// Login name shown in logs
    #[arg(long, global = true, default_value = "cli")]
    identifier: String,

    /// Act with the administrator role
    #[arg(long, global = true, requires = "user")]
    admin: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage buildings
    Building {
        #[command(subcommand)]
        action: BuildingAction,
    },
    /// Manage rooms
    Room {
        #[command(subcommand)]
        action: RoomAction,
    },
    /// Manage weekly recurring classes
    Class {
        #[command(subcommand)]
        action: ClassAction,
    },
    /// Show a room's availability for one week
    Week {
        room: Ulid,
        /// Any day in the week (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Reserve a room
    Book {
        room: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        #[arg(long)]
        attendees: u32,
        #[arg(long)]
        note: Option<String>,
    },
    /// Change one of your reservations
    Edit {
        id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        #[arg(long)]
        attendees: u32,
        /// Move to another room
        #[arg(long)]
        room: Option<Ulid>,
        #[arg(long)]
        note: Option<String>,
    },
    /// Cancel one of your reservations
    Cancel { id: Ulid },
    /// List your reservations, newest first
    Mine {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum BuildingAction {
    Add {
        name: String,
        #[arg(long, default_value_t = 1)]
        floors: u32,
    },
    List,
}

#[derive(Subcommand)]
enum RoomAction {
    Add {
        building: Ulid,
        name: String,
        #[arg(long)]
        capacity: u32,
        #[arg(long, default_value_t = 0)]
        floor: u32,
    },
    List { building: Ulid },
}

#[derive(Subcommand)]
enum ClassAction {
    Add {
        room: Ulid,
        name: String,
        weekday: Weekday,
        start: NaiveTime,
        end: NaiveTime,
    },
    Rm { id: Ulid },
    List { room: Ulid },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    roomslot::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(WalStore::open(config.wal_path())?);
    let clock = Arc::new(SystemClock::new(config.utc_offset));
    let manager = ReservationManager::new(
        store.clone(),
        clock.clone(),
        Arc::new(SignalHub::new()),
        config.selection_policy,
    );
    info!("data_dir: {}", config.data_dir.display());

    if let Some(id) = cli.user {
        let role = if cli.admin { Role::Admin } else { Role::Member };
        manager
            .sign_in(Principal {
                id,
                identifier: cli.identifier.clone(),
                role,
            })
            .await?;
    }

    run(cli.command, &manager, clock.as_ref()).await?;

    compact_if_needed(&store, config.compact_threshold).await;
    Ok(())
}

async fn run(
    command: Commands,
    manager: &ReservationManager,
    clock: &dyn Clock,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Building { action } => match action {
            BuildingAction::Add { name, floors } => {
                let building = manager.add_building(name, floors).await?;
                println!("{}", building.id);
            }
            BuildingAction::List => {
                for b in manager.load_buildings().await? {
                    println!("{}  {} ({} floors)", b.id, b.name, b.floors);
                }
            }
        },
        Commands::Room { action } => match action {
            RoomAction::Add {
                building,
                name,
                capacity,
                floor,
            } => {
                let room = manager.add_room(building, name, capacity, floor).await?;
                println!("{}", room.id);
            }
            RoomAction::List { building } => {
                for r in manager.select_building(building).await? {
                    println!(
                        "{}  {} floor {} capacity {} (min {})",
                        r.id,
                        r.name,
                        r.floor,
                        r.capacity,
                        r.min_attendees()
                    );
                }
            }
        },
        Commands::Class { action } => match action {
            ClassAction::Add {
                room,
                name,
                weekday,
                start,
                end,
            } => {
                let class = manager
                    .add_recurring_class(room, name, weekday, start, end)
                    .await?;
                println!("{}", class.id);
            }
            ClassAction::Rm { id } => manager.remove_recurring_class(id).await?,
            ClassAction::List { room } => {
                for c in manager.list_recurring_classes(room).await? {
                    println!(
                        "{}  {:?} {}-{} {}",
                        c.id,
                        c.weekday,
                        c.start.format("%H:%M"),
                        c.end.format("%H:%M"),
                        c.name
                    );
                }
            }
        },
        Commands::Week { room, date } => {
            manager.select_room(room).await?;
            let grid = manager
                .show_week(date.unwrap_or_else(|| clock.now().date()))
                .await?;
            print!("{}", grid.render(None));
        }
        Commands::Book {
            room,
            date,
            start,
            end,
            attendees,
            note,
        } => {
            manager.select_room(room).await?;
            let span = Span::on(date, start, end);
            let reservation = manager
                .create(ReservationDraft {
                    start: span.start,
                    end: span.end,
                    attendees,
                    note,
                })
                .await?;
            println!("{}", reservation.id);
        }
        Commands::Edit {
            id,
            date,
            start,
            end,
            attendees,
            room,
            note,
        } => {
            manager.begin_edit(id).await?;
            if let Some(room) = room {
                manager.select_room(room).await?;
            }
            let span = Span::on(date, start, end);
            manager
                .update(
                    id,
                    ReservationDraft {
                        start: span.start,
                        end: span.end,
                        attendees,
                        note,
                    },
                )
                .await?;
            println!("{id}");
        }
        Commands::Cancel { id } => manager.cancel(id).await?,
        Commands::Mine { json } => {
            let mine = manager.refresh_my_reservations().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&mine)?);
            } else {
                for r in mine {
                    println!(
                        "{}  {} {}-{} room {} ({} attendees, {:?})",
                        r.id,
                        r.date(),
                        r.span.start.format("%H:%M"),
                        r.span.end.format("%H:%M"),
                        r.room_id,
                        r.attendees,
                        r.status
                    );
                }
            }
        }
    }
    Ok(())
}
