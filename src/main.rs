use std::error::Error;

use addrmatch::{try_normalize_address_pair, AddrMatchConfig, MatchIndex, NormalizeConfig};
use chrono::Utc;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage:
  addrmatch normalize <line> <city>
  addrmatch check-config <config.yaml>
  addrmatch purge-tombstones <config.yaml>";

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .json()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["normalize", line, city] => normalize(line, city),
        ["check-config", path] => check_config(path),
        ["purge-tombstones", path] => purge_tombstones(path),
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
}

fn normalize(line: &str, city: &str) -> Result<(), Box<dyn Error>> {
    let normalized = try_normalize_address_pair(line, city, &NormalizeConfig::default())?;
    println!("line:        {}", normalized.line);
    println!("city:        {}", normalized.city);
    println!("fingerprint: {}", normalized.fingerprint);
    if !normalized.is_matchable() {
        println!("(not matchable: line or city is empty)");
    }
    Ok(())
}

fn check_config(path: &str) -> Result<(), Box<dyn Error>> {
    let cfg = AddrMatchConfig::from_file(path)?;
    println!(
        "config {} ok (version {}, backend {:?})",
        cfg.name.as_deref().unwrap_or(path),
        cfg.version,
        cfg.index.backend
    );
    Ok(())
}

fn purge_tombstones(path: &str) -> Result<(), Box<dyn Error>> {
    let cfg = AddrMatchConfig::from_file(path)?;
    let index = MatchIndex::new(&cfg.index)?;
    let retention = chrono::Duration::days(i64::from(cfg.maintenance.tombstone_retention_days));
    let purged = index.purge_tombstones(Utc::now() - retention)?;
    println!("purged {purged} tombstones older than {} days", retention.num_days());
    Ok(())
}
