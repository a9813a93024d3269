//! cortex-cache: manage shared-memory KV-cache pools.
//!
//! Pools are created once, then attached by any process that wants to
//! read or write them. This binary covers the operator surface: pool
//! lifecycle, inspection, eviction, and disk snapshots.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use cortex_kv_cache::cache::CacheManager;
use cortex_kv_cache::config::{parse_size, CacheConfig, CachePolicy, CacheTier};

#[derive(Parser)]
#[command(name = "cortex-cache", version, about = "Shared-memory KV cache manager")]
struct Cli {
    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new cache pool.
    Create {
        /// Pool name.
        name: String,

        /// Pool data size, e.g. 512M or 16G.
        #[arg(long, default_value = "1G")]
        size: String,

        /// Eviction policy: lru, lfu, fifo, or priority.
        #[arg(long, default_value = "lru")]
        policy: CachePolicy,

        /// Placement tier: cpu, gpu, or disk.
        #[arg(long, default_value = "cpu")]
        tier: CacheTier,

        /// Soft ceiling on live entries.
        #[arg(long, default_value_t = cortex_kv_cache::config::DEFAULT_MAX_SEQUENCES)]
        max_sequences: u64,

        /// Allocation block size in bytes.
        #[arg(long, default_value_t = cortex_kv_cache::config::DEFAULT_BLOCK_SIZE)]
        block_size: u64,
    },

    /// Destroy a pool: unlink its segment and drop its metadata.
    Destroy { name: String },

    /// Attach this process to an existing pool.
    Attach { name: String },

    /// Detach this process from a pool.
    Detach { name: String },

    /// Show status for one pool, or all pools.
    Status { name: Option<String> },

    /// List all known pools.
    List,

    /// List entries in a pool.
    Entries { name: String },

    /// Evict a percentage of entries in policy order.
    Evict {
        name: String,

        /// Percentage of live entries to evict.
        #[arg(long, default_value_t = 25.0)]
        percent: f64,
    },

    /// Write a pool snapshot to disk.
    Persist {
        name: String,

        /// Snapshot path; defaults to the pool's configured location.
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Rebuild a pool from a disk snapshot.
    Restore {
        name: String,

        /// Snapshot path; defaults to the pool's configured location.
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Probe a pool and report live statistics.
    Health { name: String },
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn print_status(manager: &CacheManager, name: Option<&str>) -> anyhow::Result<()> {
    let rows = manager.status(name)?;
    if rows.is_empty() {
        println!("No cache pools found");
        return Ok(());
    }

    println!(
        "{:<20} {:>10} {:>10} {:>8} {:>9} {:>10} {:>6}",
        "POOL", "SIZE", "USED", "ENTRIES", "HIT RATE", "EVICTIONS", "LIVE"
    );
    for row in rows {
        let used = row
            .used_bytes
            .map(human_size)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:>10} {:>10} {:>8} {:>8.1}% {:>10} {:>6}",
            row.name,
            human_size(row.size_bytes),
            used,
            row.entry_count,
            row.hit_rate * 100.0,
            row.eviction_count,
            if row.live { "yes" } else { "no" },
        );
    }
    Ok(())
}

fn run(manager: &CacheManager, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Create {
            name,
            size,
            policy,
            tier,
            max_sequences,
            block_size,
        } => {
            let size_bytes = parse_size(&size).with_context(|| format!("invalid size {size:?}"))?;
            let config = CacheConfig {
                name: name.clone(),
                size_bytes,
                policy,
                tier,
                max_sequences,
                block_size,
                persist_path: None,
            };
            if manager.create_pool(&config) {
                println!("Created pool {name} ({})", human_size(size_bytes));
            } else {
                anyhow::bail!("failed to create pool {name}");
            }
        }

        Command::Destroy { name } => {
            if manager.destroy_pool(&name)? {
                println!("Destroyed pool {name}");
            } else {
                println!("Pool {name} did not exist");
            }
        }

        Command::Attach { name } => {
            if manager.attach_pool(&name)? {
                println!("Attached to pool {name}");
            } else {
                anyhow::bail!("pool {name} not found");
            }
        }

        Command::Detach { name } => {
            manager.detach_pool(&name);
            println!("Detached from pool {name}");
        }

        Command::Status { name } => print_status(manager, name.as_deref())?,

        Command::List => {
            let pools = manager.store().list_pools()?;
            if pools.is_empty() {
                println!("No cache pools found");
            }
            for config in pools {
                println!(
                    "{:<20} {:>10}  policy={} tier={} block_size={}",
                    config.name,
                    human_size(config.size_bytes),
                    config.policy,
                    config.tier,
                    config.block_size,
                );
            }
        }

        Command::Entries { name } => {
            let entries = manager.list_entries(&name)?;
            if entries.is_empty() {
                println!("No entries in pool {name}");
                return Ok(());
            }
            println!(
                "{:<12} {:<18} {:>10} {:>8} {:>8} {:>10}",
                "SEQUENCE", "PREFIX", "SIZE", "TOKENS", "HITS", "OFFSET"
            );
            for e in entries {
                let prefix = if e.prefix_hash.is_empty() {
                    "-"
                } else {
                    &e.prefix_hash
                };
                println!(
                    "{:<12} {:<18} {:>10} {:>8} {:>8} {:>10}",
                    e.sequence_id,
                    prefix,
                    human_size(e.size_bytes),
                    e.token_count,
                    e.access_count,
                    e.offset,
                );
            }
        }

        Command::Evict { name, percent } => {
            let evicted = manager.evict(&name, percent);
            println!("Evicted {evicted} entries from pool {name}");
        }

        Command::Persist { name, path } => {
            let written = manager.persist(&name, path.as_deref())?;
            println!("Persisted pool {name} to {}", written.display());
        }

        Command::Restore { name, path } => {
            let restored = manager.restore(&name, path.as_deref())?;
            println!("Restored {restored} entries into pool {name}");
        }

        Command::Health { name } => {
            let health = manager.health(&name)?;
            let s = &health.stats;
            println!("Pool:       {}", health.pool);
            println!("Segment:    {}", health.shm_name);
            println!("Policy:     {}", s.policy);
            println!(
                "Capacity:   {} used / {} total ({} free)",
                human_size(s.used_bytes),
                human_size(s.total_bytes),
                human_size(s.free_bytes),
            );
            println!("Entries:    {}", s.entry_count);
            println!(
                "Accesses:   {} hits, {} misses ({:.1}% hit rate)",
                s.hit_count,
                s.miss_count,
                s.hit_rate * 100.0
            );
            println!("Evictions:  {}", s.eviction_count);
            println!("Attached:   {} process(es)", s.attached_processes);
            if !health.attached_pids.is_empty() {
                let pids: Vec<String> =
                    health.attached_pids.iter().map(u32::to_string).collect();
                println!("PIDs:       {}", pids.join(", "));
            }
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "cortex_kv_cache=debug,cortex_cache=debug"
    } else {
        "cortex_kv_cache=info,cortex_cache=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("cortex-cache v{}", env!("CARGO_PKG_VERSION"));

    let manager = CacheManager::new()?;
    let result = run(&manager, cli.command);
    manager.cleanup();
    result
}
