use std::{
    str::FromStr,
    sync::{Arc, RwLock},
};
use tag_gateway_error::{GatewayError, GatewayResult};
use tag_gateway_models::settings::Log;
use tracing::{subscriber::set_global_default, Level, Metadata};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{filter::DynFilterFn, fmt, layer::SubscriberExt, Layer, Registry};

const LOG_FILE_NAME: &str = "tag-gateway.log";

pub struct Logger {
    level: Arc<RwLock<Level>>,
    dir: String,
    _file_guard: Option<WorkerGuard>,
}

impl Logger {
    /// Unknown level names fall back to `info`.
    pub fn new(settings: &Log) -> Self {
        let level = Level::from_str(settings.level.trim()).unwrap_or(Level::INFO);
        Logger {
            level: Arc::new(RwLock::new(level)),
            dir: settings.dir.clone(),
            _file_guard: None,
        }
    }

    /// Sets the new logging level.
    pub fn set_level(&self, new_level: Level) {
        if let Ok(mut level) = self.level.write() {
            *level = new_level;
        }
    }

    pub fn level(&self) -> Level {
        self.level.read().map(|l| *l).unwrap_or(Level::INFO)
    }

    fn enabled(level: &Arc<RwLock<Level>>, metadata: &Metadata<'_>) -> bool {
        level
            .read()
            .map(|l| metadata.level() <= &*l)
            .unwrap_or(true)
    }

    /// Installs console and daily-rolling file output as the global subscriber.
    pub fn initialize(&mut self) -> GatewayResult<()> {
        let file_appender = rolling::daily(&self.dir, LOG_FILE_NAME);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        self._file_guard = Some(guard);

        let console_filter = {
            let level = Arc::clone(&self.level);
            DynFilterFn::new(move |metadata, _| Self::enabled(&level, metadata))
        };
        let file_filter = {
            let level = Arc::clone(&self.level);
            DynFilterFn::new(move |metadata, _| Self::enabled(&level, metadata))
        };

        let console_layer = {
            #[cfg(debug_assertions)]
            let layer = fmt::layer()
                .with_writer(std::io::stdout)
                .with_file(true)
                .with_line_number(true);

            #[cfg(not(debug_assertions))]
            let layer = fmt::layer().with_writer(std::io::stdout).with_target(false);

            layer.with_filter(console_filter)
        };

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_filter(file_filter);

        let subscriber = Registry::default().with(console_layer).with(file_layer);
        set_global_default(subscriber).map_err(|_| GatewayError::from("Failed to set logger"))?;
        Ok(())
    }
}
