use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::{Local, NaiveDate, NaiveTime};
use log::info;

use pitchcast::ingest::JsonDirIngestor;
use pitchcast::resolver::{ElevationProvider, Geocoder, HttpResolver};
use pitchcast::sim::{self, SimulationParams};
use pitchcast::store::Store;
use pitchcast::{extract, prematch};

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(|s| s.as_str()) {
        Some("train") => cmd_train(&args[1..]),
        Some("team") => cmd_team(&args[1..]),
        Some("schedule") => cmd_schedule(&args[1..]),
        Some("simulate") => cmd_simulate(&args[1..]),
        Some("prune") => cmd_prune(&args[1..]),
        _ => {
            eprintln!(
                "usage: pitchcast <command>\n\
                 \n\
                 commands:\n\
                 \x20 train    --upto YYYY-MM-DD [--ingest-dir DIR]\n\
                 \x20 team     --league ID --name TEAM --venue PLACE [--fixtures-url URL]\n\
                 \x20 schedule --league ID --home TEAM --away TEAM --date YYYY-MM-DD --time HH:MM\n\
                 \x20          [--referee NAME] [--home-players a,b,..] [--away-players a,b,..]\n\
                 \x20 simulate --schedule ID [--minute N] [--home-goals N] [--away-goals N]\n\
                 \x20          [--home-subs N] [--away-subs N] [--seed N] [--workers N]\n\
                 \x20 prune    --league ID"
            );
            std::process::exit(2);
        }
    }
}

fn open_store() -> Result<Store> {
    let path = std::env::var("PITCHCAST_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("pitchcast.sqlite"));
    Store::open(&path)
}

fn cmd_train(args: &[String]) -> Result<()> {
    let upto = match arg_value(args, "--upto") {
        Some(raw) => parse_date(&raw)?,
        None => Local::now().date_naive(),
    };
    let ingest_dir = arg_value(args, "--ingest-dir").unwrap_or_else(|| "ingest".to_string());

    let mut store = open_store()?;
    let ingestor = JsonDirIngestor::new(ingest_dir);
    let summary = extract::train_and_extract(&mut store, &ingestor, upto)?;
    println!(
        "trained on {} leagues: {} matches recorded, {} skipped",
        summary.leagues, summary.matches_recorded, summary.matches_skipped
    );
    Ok(())
}

/// Registers (or refreshes) a team: the venue is geocoded and its elevation
/// looked up, so every later schedule build has coordinates to work with.
fn cmd_team(args: &[String]) -> Result<()> {
    let league_id = required_i64(args, "--league")?;
    let name = required(args, "--name")?;
    let venue = required(args, "--venue")?;
    let fixtures_url = arg_value(args, "--fixtures-url").unwrap_or_default();

    let store = open_store()?;
    store.ensure_league(league_id)?;

    let resolver = HttpResolver::new()?;
    let (lat, lon) = resolver.coordinates(&venue)?;
    let elevation = resolver.elevation_m(lat, lon)?;
    let team_id = store.upsert_team(league_id, &name, elevation, lat, lon, &fixtures_url)?;
    println!("team {team_id}: {name} at ({lat:.4}, {lon:.4}), {elevation:.0}m");
    Ok(())
}

fn cmd_schedule(args: &[String]) -> Result<()> {
    let league_id = required_i64(args, "--league")?;
    let home = required(args, "--home")?;
    let away = required(args, "--away")?;
    let date = parse_date(&required(args, "--date")?)?;
    let time = NaiveTime::parse_from_str(&required(args, "--time")?, "%H:%M")
        .context("parse --time (HH:MM)")?;
    let referee = arg_value(args, "--referee").unwrap_or_default();

    let store = open_store()?;
    let resolver = HttpResolver::new()?;
    let mut row = prematch::build_schedule_row(
        &store,
        league_id,
        &home,
        &away,
        date.and_time(time),
        &referee,
        &resolver,
    )?;
    // Pasted lineup names are resolved against the players we track for
    // each side; unresolvable names are kept as-is.
    row.home_players = resolve_lineup(
        &store,
        row.home_team_id,
        parse_players(arg_value(args, "--home-players")),
    )?;
    row.away_players = resolve_lineup(
        &store,
        row.away_team_id,
        parse_players(arg_value(args, "--away-players")),
    )?;
    let schedule_id = store.upsert_schedule(&row)?;
    if !row.home_players.is_empty() || !row.away_players.is_empty() {
        store.set_schedule_lineups(schedule_id, &row.home_players, &row.away_players)?;
    }

    prematch::transfer_finished(&store, Local::now().date_naive())?;
    println!("schedule {schedule_id}: {home} vs {away} on {date}");
    Ok(())
}

fn cmd_simulate(args: &[String]) -> Result<()> {
    let schedule_id = required_i64(args, "--schedule")?;
    let seed = arg_value(args, "--seed")
        .and_then(|s| s.parse().ok())
        .or_else(|| {
            std::env::var("PITCHCAST_SEED")
                .ok()
                .and_then(|s| s.trim().parse().ok())
        })
        .unwrap_or_else(rand::random);
    let workers = arg_value(args, "--workers")
        .and_then(|s| s.parse().ok())
        .or_else(|| {
            std::env::var("PITCHCAST_SIM_WORKERS")
                .ok()
                .and_then(|s| s.trim().parse().ok())
        });

    let params = SimulationParams {
        schedule_id,
        initial_minute: arg_u32(args, "--minute").unwrap_or(0),
        home_goals: arg_u32(args, "--home-goals").unwrap_or(0),
        away_goals: arg_u32(args, "--away-goals").unwrap_or(0),
        home_subs_available: arg_u32(args, "--home-subs").unwrap_or(5),
        away_subs_available: arg_u32(args, "--away-subs").unwrap_or(5),
        seed,
        workers,
    };

    let mut store = open_store()?;
    info!("simulating schedule {schedule_id} with seed {seed}");
    let run = sim::run_schedule(&mut store, params)?;
    println!(
        "{} sims: {} shots, {} cards, mean goals {:.2} - {:.2}",
        run.n_sims,
        run.shot_rows,
        run.card_rows.len(),
        run.mean_home_goals,
        run.mean_away_goals
    );
    Ok(())
}

fn cmd_prune(args: &[String]) -> Result<()> {
    let league_id = required_i64(args, "--league")?;
    let mut store = open_store()?;
    prematch::prune_league(&mut store, league_id, Local::now().date_naive())?;
    println!("pruned league {league_id}");
    Ok(())
}

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    for (idx, arg) in args.iter().enumerate() {
        if let Some(v) = arg.strip_prefix(&format!("{flag}=")) {
            if !v.trim().is_empty() {
                return Some(v.to_string());
            }
        }
        if arg == flag
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.clone());
        }
    }
    None
}

fn required(args: &[String], flag: &str) -> Result<String> {
    arg_value(args, flag).ok_or_else(|| anyhow!("missing required flag {flag}"))
}

fn required_i64(args: &[String], flag: &str) -> Result<i64> {
    required(args, flag)?
        .parse()
        .with_context(|| format!("parse {flag} as integer"))
}

fn arg_u32(args: &[String], flag: &str) -> Option<u32> {
    arg_value(args, flag).and_then(|s| s.parse().ok())
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").context("parse date (YYYY-MM-DD)")
}

fn parse_players(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

fn resolve_lineup(store: &Store, team_id: i64, names: Vec<String>) -> Result<Vec<String>> {
    if names.is_empty() {
        return Ok(names);
    }
    let known = store.players_for_team(team_id)?;
    let resolved = pitchcast::players::match_names(&names, &known);
    if resolved.len() < names.len() {
        log::warn!(
            "resolved {}/{} lineup names for team {team_id}",
            resolved.len(),
            names.len()
        );
    }
    Ok(if resolved.is_empty() { names } else { resolved })
}
