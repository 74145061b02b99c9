mod bot;
mod channel;
mod clock;
mod config;
mod notify;
mod scheduler;
mod server;
mod timetable;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use bot::{build_dispatcher, Timetable};
use channel::SecureChannel;
use clock::{Clock, SystemClock};
use config::Config;
use notify::NotificationSink;
use scheduler::{CourseWatcher, ReminderScheduler, ReminderSettings};
use server::AppState;
use timetable::{render, CourseStore, WeekCounter};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("course-herald.log"))
    {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Failed to open log file in {}: {e}", log_dir.display());
            std::process::exit(1);
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    info!("🚀 Starting course-herald...");
    info!("Loaded config from {config_path}");
    info!(
        "Week {}, reminders {} min ahead to {}, delivery via {:?}",
        config.current_week, config.reminder_minutes, config.notify_to, config.sink
    );

    if let Err(e) = run(config).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let (store, report) = CourseStore::open(&config.course_file).await?;
    if !report.rejected.is_empty() {
        warn!("{} course entr(ies) rejected, see above", report.rejected.len());
    }
    let store = Arc::new(store);
    let week = Arc::new(WeekCounter::persisted(config.current_week, &config.config_path));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.timezone));
    let sink = notify::from_config(&config)?;

    let scheduler = Arc::new(ReminderScheduler::new(
        store.clone(),
        week.clone(),
        clock.clone(),
        sink.clone(),
        ReminderSettings {
            lead_minutes: config.reminder_minutes,
            recipient: config.notify_to.clone(),
            salutation: config.salutation.clone(),
        },
    ));
    scheduler.install_week_rollover().await;
    scheduler.reschedule().await;
    for job in scheduler.jobs().await {
        info!("  {} [{}] next at {:?}", job.name, job.cron, job.next);
    }

    if config.announce_on_startup {
        announce(&config, &store, &week, sink.as_ref()).await;
    }

    let scheduler_task = tokio::spawn(scheduler.clone().run());
    if config.reload_interval_secs > 0 {
        CourseWatcher::new(store.clone(), week.clone(), scheduler.clone())
            .await
            .spawn(Duration::from_secs(config.reload_interval_secs));
    }

    let state = Arc::new(AppState {
        channel: SecureChannel::new(config.token.clone(), config.aes_key.clone(), config.corp_id.clone()),
        dispatcher: build_dispatcher(Timetable::new(store, week, clock)),
        sink,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🌐 Listening on {}", addr);
    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutting down...");
        })
        .await?;

    scheduler.shutdown();
    scheduler_task.await?;
    Ok(())
}

/// Sends the "online" notice and the loaded course digest.
async fn announce(config: &Config, store: &CourseStore, week: &WeekCounter, sink: &dyn NotificationSink) {
    let courses = store.snapshot();
    let messages = [
        render::startup_notice(
            config.salutation.as_deref(),
            week.current(),
            config.reminder_minutes,
            courses.len(),
        ),
        render::course_digest(&courses),
    ];
    for text in messages {
        if let Err(e) = sink.send(&config.notify_to, &text).await {
            warn!("Startup announcement failed: {}", e);
            return;
        }
    }
    info!("📣 Startup announcement sent to {}", config.notify_to);
}
