mod parse;

use crate::parse::{Args, Command};
use chrono::{DateTime, Utc};
use clap::Parser;
use csv::Writer;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::error::Error;
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use vigil::config::{MapSettings, Settings};
use vigil::feed::{ChangeFeed, PollingFeed};
use vigil::filter::{TimeWindow, filter};
use vigil::geo::LngLat;
use vigil::i18n::Locale;
use vigil::push::{PushPayload, PushRelay, broadcast_all};
use vigil::record::{Sighting, sightings_from_records};
use vigil::report::{ManualLocation, ReportSubmission, user_message};
use vigil::state::StateFile;
use vigil::storage::{RestStorage, SightingStore};
use vigil::terminal::TerminalSurface;
use vigil::translate::{CachedTranslator, MyMemoryTranslator};
use vigil::util::print_hms;
use vigil::{LiveMap, SightingId, Trigger};

type CliResult<T> = Result<T, Box<dyn Error>>;

pub fn print_summary(sightings: &[Sighting], now: DateTime<Utc>, locale: Locale) {
    if sightings.is_empty() {
        println!("{}", locale.messages().no_sightings);
        return;
    }

    println!("\nSummary:");
    println!("Total sightings: {}", sightings.len());
    for window in TimeWindow::OPTIONS.iter().skip(1) {
        println!(
            "  {:>4}: {}",
            locale.window_label(*window),
            filter(sightings, now, *window).len()
        );
    }

    let with_photos = sightings.iter().filter(|s| s.image_ref.is_some()).count();
    println!("With photos: {}", with_photos);

    if let Some(newest) = sightings.iter().max_by_key(|s| s.created_at) {
        println!(
            "{}: {}",
            locale.messages().latest,
            locale.relative_age(now - newest.created_at)
        );
    }
}

pub fn save_to_csv(sightings: &[&Sighting], filename: &str) -> CliResult<()> {
    let file = File::create(filename)?;
    let mut writer = Writer::from_writer(file);

    for sighting in sightings {
        writer.serialize(sighting.to_record())?;
    }

    writer.flush()?;
    info!("Saved {} sightings to {}", sightings.len(), filename);
    Ok(())
}

fn spinner(message: &str) -> CliResult<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} [{elapsed_precise}] {msg}")?);
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    Ok(spinner)
}

fn rest_storage(settings: &Settings) -> CliResult<RestStorage> {
    let s = &settings.storage;
    let storage = RestStorage::with_timeout(
        settings.storage_url()?,
        &s.api_key,
        Duration::from_secs(s.timeout_secs),
    )?
    .with_delay(s.base_delay_ms)
    .with_max_retries(s.max_retries)
    .with_bucket(&s.bucket);
    Ok(storage)
}

fn relays(settings: &Settings) -> CliResult<Vec<PushRelay>> {
    let secret = settings.push.secret.as_deref().unwrap_or("");
    let relays = settings
        .push
        .endpoints
        .iter()
        .map(|url| PushRelay::new(url, secret))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(relays)
}

/// An explicit `--locale` wins and is remembered; otherwise the stored one.
fn resolve_locale(requested: Option<Locale>, state: &StateFile) -> Locale {
    match requested {
        Some(locale) => {
            if let Err(e) = state.save_locale(locale) {
                warn!("Could not remember locale: {}", e);
            }
            locale
        }
        None => state.load().locale.unwrap_or_default(),
    }
}

fn watch_settings(
    base: &MapSettings,
    window: Option<TimeWindow>,
    lat: Option<f64>,
    lng: Option<f64>,
    zoom: Option<f64>,
    size: Option<(f64, f64)>,
) -> MapSettings {
    let mut map = base.clone();
    if let Some(window) = window {
        map.window = window;
    }
    if let (Some(lat), Some(lng)) = (lat, lng) {
        map.center = LngLat::new(lng, lat);
    }
    if let Some(zoom) = zoom {
        map.zoom = zoom;
    }
    if let Some((width, height)) = size {
        map.width = width;
        map.height = height;
    }
    map
}

async fn watch(
    settings: &Settings,
    map_settings: MapSettings,
    locale: Locale,
    popup: Option<String>,
    duration: Option<u64>,
) -> CliResult<()> {
    let storage = Arc::new(rest_storage(settings)?);
    let translator = Arc::new(CachedTranslator::new(
        MyMemoryTranslator::new(&settings.translate.endpoint)?,
        settings.translate.cache_capacity,
    ));
    let mut map = LiveMap::new(
        Arc::clone(&storage),
        translator,
        TerminalSurface::new(io::stdout()),
        &map_settings,
        locale,
    );

    let start = Instant::now();
    let progress = spinner("Loading sightings")?;
    let loaded = map.start().await;
    progress.finish_and_clear();
    match loaded {
        Ok(stats) => info!(
            "Loaded {} sightings, {} in the {} window",
            map.store().len(),
            stats.visible_sightings,
            map.window()
        ),
        Err(e) => warn!("{}; waiting for live updates", e),
    }
    print_hms(&start);

    let feed = PollingFeed::new(storage, map_settings.poll());
    let (control, control_rx) = mpsc::channel(16);
    if let Some(id) = popup {
        control.send(Trigger::PopupOpened(SightingId(id))).await?;
    }
    let running = tokio::spawn(map.run(feed.subscribe(), control_rx));

    match duration {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => tokio::signal::ctrl_c().await?,
    }
    drop(control);
    running.await?;
    info!("Stopped watching after {}s", start.elapsed().as_secs());
    Ok(())
}

async fn report(
    settings: &Settings,
    locale: Locale,
    position: LngLat,
    description: &str,
    photo: Option<&Path>,
) -> CliResult<()> {
    let storage = Arc::new(rest_storage(settings)?);
    let ledger = StateFile::new(settings.state_path());
    let mut flow = ReportSubmission::new(storage, ManualLocation(Some(position)), ledger);
    flow.set_description(description);
    if let Some(path) = photo {
        flow.attach_photo(std::fs::read(path)?);
    }

    match flow.submit(Utc::now()).await {
        Ok(record) => {
            println!("{} ({})", locale.messages().report_success, record.id);
            Ok(())
        }
        Err(e) => {
            println!("{}", user_message(&e, locale));
            Err(e.into())
        }
    }
}

async fn export(settings: &Settings, locale: Locale, output: &str, window: TimeWindow) -> CliResult<()> {
    let storage = rest_storage(settings)?;
    let progress = spinner("Fetching sightings")?;
    let records = storage.fetch_recent().await;
    progress.finish_and_clear();

    let sightings = sightings_from_records(records?);
    let now = Utc::now();
    let relevant = filter(&sightings, now, window);
    save_to_csv(&relevant, output)?;
    print_summary(&sightings, now, locale);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::try_parse()?;
    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let settings = Settings::load(args.config.as_deref())?;
    let state = StateFile::new(settings.state_path());
    let locale = resolve_locale(args.locale, &state);

    match args.command {
        Command::Watch { window, lat, lng, zoom, size, popup, duration } => {
            let map_settings = watch_settings(&settings.map, window, lat, lng, zoom, size);
            watch(&settings, map_settings, locale, popup, duration).await?;
        }
        Command::Report { lat, lng, description, photo } => {
            report(&settings, locale, LngLat::new(lng, lat), &description, photo.as_deref()).await?;
        }
        Command::Export { output, window } => {
            export(&settings, locale, &output, window).await?;
        }
        Command::Notify { title, body } => {
            let payload = PushPayload::new(title.as_deref(), body.as_deref());
            let sent = broadcast_all(&relays(&settings)?, &payload).await?;
            println!("Sent {} notifications", sent);
        }
        Command::Subscribe { file } => {
            let subscription: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&file)?)?;
            let mut registered = 0;
            for relay in relays(&settings)? {
                match relay.register(&subscription).await {
                    Ok(()) => registered += 1,
                    Err(e) => warn!("Relay {} rejected subscription: {}", relay.base_url(), e),
                }
            }
            println!("Registered with {} relays", registered);
        }
    }

    Ok(())
}
