//! # Hasshahyo (発車標)
//!
//! A command-line train departure board. It loads a JSON timetable,
//! advances every visible row through a per-row state machine as wall-clock
//! time passes, and redraws a clean tabular board once per second. A
//! low-frequency poller watches the timetable file and reloads it when it
//! changes, so edits show up live.
//!
//! All lifecycle decisions live in the board engine; this file only parses
//! arguments, projects engine state into a table and maps fired cues to
//! the terminal bell.

use clap::Parser;
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table,
    modifiers::{UTF8_ROUND_CORNERS, UTF8_SOLID_INNER_BORDERS},
    presets::UTF8_FULL,
};
use dotenvy::dotenv;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::{signal, time};

mod board;
mod config;
mod error;
mod schedule;

use board::{Badges, BoardEngine, Cue, RowStatus, StatusCategory, TrainKind};
use chrono::{DateTime, Local};
use config::BoardConfig;
use error::AppError;
use schedule::DepartureRecord;

/// The interval in seconds at which the board re-evaluates row states.
const TICK_INTERVAL_SECS: u64 = 1;
/// The interval in seconds at which the schedule file is polled for changes.
const WATCH_INTERVAL_SECS: u64 = 3;

/// Defines the command-line arguments for the departure board.
#[derive(Parser, Debug)]
#[command(
    name = "hasshahyo",
    version,
    about = "A terminal departure board driven by a JSON timetable.",
    long_about = None
)]
struct Cli {
    /// Path to the timetable JSON. Overrides the configured path.
    #[arg(help = "Path to the timetable JSON file.")]
    schedule: Option<PathBuf>,

    /// Optional: path to the configuration file.
    #[arg(short, long, help = "Path to the configuration file.")]
    config: Option<PathBuf>,
}

/// Creates and configures a new `comfy_table::Table` with default styling.
///
/// This function initializes a new table with UTF-8 presets for borders and
/// corners, and styles the headers to be bold and center-aligned.
fn create_table(headers: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .apply_modifier(UTF8_SOLID_INNER_BORDERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.into_iter().map(|h| {
            Cell::new(h)
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Center)
        }));
    table
}

/// Formats the time column: the delay-adjusted time, with the original
/// scheduled time beneath it when the service is delayed.
fn format_time_cell(effective: DateTime<Local>, delay_secs: u32) -> String {
    let adjusted = effective.format("%H:%M");
    if delay_secs == 0 {
        return adjusted.to_string();
    }
    let scheduled = effective - chrono::Duration::seconds(i64::from(delay_secs));
    format!("{adjusted}\n(予定 {})", scheduled.format("%H:%M"))
}

/// Joins the active badges (次発 / 始発 / 終電 / 遅延 +N分) into a prefix
/// for the destination column. Delay minutes round up.
fn format_badges(badges: Badges, delay_secs: u32) -> String {
    let mut parts: Vec<String> = Vec::new();
    if badges.next {
        parts.push("次発".to_string());
    }
    if badges.first {
        parts.push("始発".to_string());
    }
    if badges.last {
        parts.push("終電".to_string());
    }
    if delay_secs > 0 {
        parts.push(format!("遅延 +{}分", delay_secs.div_ceil(60)));
    }
    parts.join(" ")
}

/// Formats the destination column: badges, destination, and optional
/// 経由 / 停車駅 sub-lines. Calling points are suppressed for services
/// that terminate here.
fn format_destination_cell(record: &DepartureRecord, badges: Badges, terminal: bool) -> String {
    let mut text = String::new();
    let prefix = format_badges(badges, record.delay_secs);
    if !prefix.is_empty() {
        text.push_str(&prefix);
        text.push(' ');
    }
    text.push_str(&record.destination);
    if let Some(via) = record
        .via
        .as_deref()
        .map(str::trim)
        .filter(|via| !via.is_empty())
    {
        text.push_str(&format!("\n経由: {via}"));
    }
    if !record.stops.is_empty() && !terminal {
        text.push_str(&format!("\n停車駅: {}", record.stops.join("・")));
    }
    text
}

/// Background colour for a train category badge, following the usual
/// Japanese service-type palette. Unlisted categories render unstyled.
fn category_color(name: &str) -> Option<Color> {
    let (r, g, b) = match name {
        "普通" => (0x00, 0x00, 0x00),
        "区間快速" => (0x66, 0x99, 0x66),
        "快速" => (0x1a, 0x4d, 0x1a),
        "急行" => (0xcc, 0x66, 0x33),
        "特急" => (0xb3, 0x1a, 0x1a),
        "空港線" => (0x4d, 0x80, 0x80),
        "通勤特急" => (0x1a, 0x4d, 0x4d),
        "直通特急" => (0x80, 0x66, 0xcc),
        "新快速" => (0x1a, 0x33, 0x99),
        _ => return None,
    };
    Some(Color::Rgb { r, g, b })
}

fn category_cell(name: &str) -> Cell {
    let name = name.trim();
    let mut cell = Cell::new(name).set_alignment(CellAlignment::Center);
    if let Some(color) = category_color(name) {
        cell = cell
            .bg(color)
            .fg(Color::White)
            .add_attribute(Attribute::Bold);
    }
    cell
}

/// Applies colour to the status cell based on its coarse category, giving
/// a quick visual cue for each lifecycle stage.
fn colourise_status(status: RowStatus) -> Cell {
    let color = match status.category() {
        StatusCategory::Scheduled => Color::Green,
        StatusCategory::Delayed => Color::Red,
        StatusCategory::Approaching => Color::Blue,
        StatusCategory::Arrived => Color::Cyan,
        StatusCategory::Stopped => Color::Yellow,
        StatusCategory::Departed => Color::DarkYellow,
        StatusCategory::Passing => Color::Magenta,
    };
    Cell::new(status.label())
        .add_attribute(Attribute::Bold)
        .set_alignment(CellAlignment::Center)
        .fg(color)
}

/// Clears the screen and projects the engine's current state: header,
/// departures table, pass-through notice and the bottom banner.
fn render_board(engine: &BoardEngine, config: &BoardConfig) -> Result<(), AppError> {
    clearscreen::clear()?;

    println!("出発案内");
    let station = config.station_name.trim();
    if !station.is_empty() {
        println!("現在: {station}");
    }
    println!("{}", Local::now().format("%Y/%m/%d %H:%M:%S"));
    println!();

    if engine.rows().is_empty() {
        println!("表示する列車はありません。");
    } else {
        let mut table = create_table(vec!["時刻", "種別", "行先", "路線", "番線", "状態"]);
        for entry in engine.rows() {
            table.add_row(vec![
                Cell::new(format_time_cell(entry.effective_time, entry.record.delay_secs))
                    .set_alignment(CellAlignment::Right),
                category_cell(&entry.record.category),
                Cell::new(format_destination_cell(
                    &entry.record,
                    entry.badges,
                    entry.kind == TrainKind::TerminalHere,
                )),
                Cell::new(&entry.record.line),
                Cell::new(&entry.record.platform).set_alignment(CellAlignment::Center),
                colourise_status(entry.status),
            ]);
        }
        println!("{table}");
    }

    if let Some(notice) = engine.notice() {
        println!("\n!! {notice}");
    }

    if engine.is_service_ended() {
        println!("\n本日の営業は終了いたしました");
    } else {
        let ticker = config.ticker_message.trim();
        if !ticker.is_empty() {
            println!("\n{ticker}");
        }
    }

    println!(
        "\nAuto-refreshing every {}s. Press Ctrl+C to exit.",
        TICK_INTERVAL_SECS
    );
    Ok(())
}

/// Maps fired cues to a terminal effect. A real installation routes each
/// cue identifier to its own sound; a terminal front end gets the bell.
fn emit_cues(cues: &[Cue]) {
    if cues.is_empty() {
        return;
    }
    print!("\x07");
    let _ = std::io::stdout().flush();
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok()?.modified().ok()
}

/// Polls the schedule file's mtime and reloads on change. An unreadable or
/// vanished file leaves the last good schedule in place.
fn maybe_reload(engine: &mut BoardEngine, path: &Path, last_mtime: &mut Option<SystemTime>) {
    let Some(mtime) = file_mtime(path) else {
        return;
    };
    if *last_mtime == Some(mtime) {
        return;
    }
    *last_mtime = Some(mtime);
    match schedule::load_records(path) {
        Ok(records) => {
            let _ = engine.load(records, Local::now());
        }
        Err(e) => {
            eprintln!("Error reloading schedule: {e}");
        }
    }
}

/// A small demo timetable relative to `now`, used when no schedule file is
/// available at startup.
#[cfg(feature = "sample-fallback")]
fn sample_records(now: DateTime<Local>) -> Vec<DepartureRecord> {
    let t = |minutes: i64| (now + chrono::Duration::minutes(minutes)).format("%H:%M").to_string();
    vec![
        DepartureRecord {
            time: t(2),
            destination: "成田空港".to_string(),
            line: "JR 総武快速線".to_string(),
            platform: "3".to_string(),
            category: "快速".to_string(),
            stops: vec!["日暮里".to_string(), "空港第2ビル".to_string()],
            ..Default::default()
        },
        DepartureRecord {
            time: t(7),
            destination: "秋葉原".to_string(),
            line: "JR 中央・総武各駅停車".to_string(),
            platform: "1".to_string(),
            category: "普通".to_string(),
            ..Default::default()
        },
        DepartureRecord {
            time: t(12),
            destination: "横浜・大船".to_string(),
            line: "JR 成田エクスプレス".to_string(),
            platform: "5".to_string(),
            category: "特急".to_string(),
            delay_secs: 600,
            ..Default::default()
        },
        DepartureRecord {
            time: t(18),
            destination: "逗子".to_string(),
            line: "JR 横須賀線".to_string(),
            platform: "4".to_string(),
            category: "快速".to_string(),
            via: Some("武蔵小杉".to_string()),
            ..Default::default()
        },
        DepartureRecord {
            time: t(25),
            destination: "千葉".to_string(),
            line: "JR 総武線快速".to_string(),
            platform: "3".to_string(),
            category: "快速".to_string(),
            ..Default::default()
        },
    ]
}

/// Loads the timetable for startup. With the `sample-fallback` feature a
/// missing or unreadable file degrades to the built-in demo timetable;
/// without it the error is fatal.
fn initial_records(path: &Path) -> Result<Vec<DepartureRecord>, AppError> {
    match schedule::load_records(path) {
        Ok(records) => Ok(records),
        #[cfg(feature = "sample-fallback")]
        Err(e) => {
            eprintln!("Schedule unavailable ({e}); showing the built-in sample timetable.");
            Ok(sample_records(Local::now()))
        }
        #[cfg(not(feature = "sample-fallback"))]
        Err(e) => Err(e),
    }
}

/// The main entry point for the application.
///
/// Startup: load `.env`, parse arguments, load and validate configuration,
/// load the timetable, then enter the main loop. The loop multiplexes
/// three events: the 1 Hz state tick (evaluate, emit cues, redraw), the
/// schedule-file poll, and Ctrl+C for shutdown. Engine mutation only ever
/// happens on this task, so a tick and a reload can never interleave.
#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load environment variables from a .env file, if it exists.
    let _ = dotenv();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .unwrap_or_else(|| config::config_path().to_path_buf());
    let config = config::load_config(&config_path)?;
    // Fail fast on an inverted threshold ladder.
    config.thresholds.validate()?;

    let schedule_path = config::resolve_schedule_path(cli.schedule, &config);

    let mut engine = BoardEngine::new(config.thresholds);
    let records = initial_records(&schedule_path)?;
    let _ = engine.load(records, Local::now());
    let mut last_mtime = file_mtime(&schedule_path);

    render_board(&engine, &config)?;

    let mut tick = time::interval(Duration::from_secs(TICK_INTERVAL_SECS));
    let mut watch = time::interval(Duration::from_secs(WATCH_INTERVAL_SECS));

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                break;
            }
            _ = tick.tick() => {
                let outcome = engine.tick(Local::now());
                emit_cues(&outcome.cues);
                if let Err(e) = render_board(&engine, &config) {
                    eprintln!("Error rendering board: {e}");
                }
            }
            _ = watch.tick() => {
                maybe_reload(&mut engine, &schedule_path, &mut last_mtime);
            }
        }
    }

    println!("\nExiting...");

    Ok(())
}
