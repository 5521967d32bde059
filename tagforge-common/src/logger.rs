use crate::settings::LogSettings;
use std::sync::{Arc, Mutex};
use tagforge_error::{TFError, TFResult};
use tracing::{subscriber::set_global_default, Level};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    filter::DynFilterFn,
    fmt::{self},
    layer::SubscriberExt,
    Layer, Registry,
};

/// Parse a textual level (`"debug"`, `"INFO"`, ...) into a tracing `Level`.
pub fn parse_level(raw: &str) -> TFResult<Level> {
    raw.trim()
        .parse::<Level>()
        .map_err(|_| TFError::Configuration(format!("unknown log level '{raw}'")))
}

pub struct Logger {
    level: Arc<Mutex<Level>>,
    dir: String,
    file_name: String,
    _file_guard: Option<WorkerGuard>,
}

impl Logger {
    pub fn new(level: Option<Level>) -> Self {
        Logger {
            level: Arc::new(Mutex::new(level.unwrap_or(Level::INFO))),
            dir: "logs".into(),
            file_name: "tagforge.log".into(),
            _file_guard: None,
        }
    }

    /// Build a logger from the `[log]` settings section.
    pub fn from_settings(settings: &LogSettings) -> TFResult<Self> {
        let level = parse_level(&settings.level)?;
        Ok(Logger {
            level: Arc::new(Mutex::new(level)),
            dir: settings.dir.clone(),
            file_name: settings.file_name.clone(),
            _file_guard: None,
        })
    }

    #[inline]
    /// Sets the new logging level. Takes effect for both layers immediately.
    pub fn set_level(&self, new_level: Level) {
        if let Ok(mut level) = self.level.lock() {
            *level = new_level;
        }
    }

    #[inline]
    pub fn get_level(&self) -> Level {
        self.level.lock().map(|l| *l).unwrap_or(Level::INFO)
    }

    /// Installs the global subscriber: a console layer plus a daily rolling
    /// file layer, both gated by the shared runtime level.
    pub fn initialize(&mut self) -> TFResult<()> {
        let file_appender = rolling::daily(&self.dir, &self.file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        self._file_guard = Some(guard);

        let console_filter = {
            let level = Arc::clone(&self.level);
            DynFilterFn::new(move |metadata, _| {
                level
                    .lock()
                    .map(|l| metadata.level() <= &*l)
                    .unwrap_or(true)
            })
        };

        let file_filter = {
            let level = Arc::clone(&self.level);
            DynFilterFn::new(move |metadata, _| {
                level
                    .lock()
                    .map(|l| metadata.level() <= &*l)
                    .unwrap_or(true)
            })
        };

        let console_layer = {
            #[cfg(debug_assertions)]
            let layer = fmt::layer()
                .with_writer(std::io::stdout)
                .with_file(true)
                .with_line_number(true);

            #[cfg(not(debug_assertions))]
            let layer = fmt::layer().with_writer(std::io::stdout);

            layer.with_filter(console_filter)
        };

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_filter(file_filter);

        let subscriber = Registry::default().with(console_layer).with(file_layer);

        set_global_default(subscriber).map_err(|_| TFError::from("Failed to set logger"))?;
        Ok(())
    }
}
