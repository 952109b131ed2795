use once_cell::sync::OnceCell;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

/// Target every HTTP exchange is logged on.
pub const ACCESS_TARGET: &str = "http.access";

static ACCESS_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Minutely,
    Hourly,
    Daily,
}

impl Rotation {
    /// Unknown values fall back to daily.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "hourly" => Rotation::Hourly,
            "minutely" => Rotation::Minutely,
            _ => Rotation::Daily,
        }
    }
}

/// Where the access log goes when `SBRAIN_ACCESS_LOG_ROLL=1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLog {
    pub dir: String,
    pub prefix: String,
    pub rotation: Rotation,
}

impl AccessLog {
    pub fn from_env() -> Option<Self> {
        if std::env::var("SBRAIN_ACCESS_LOG_ROLL").ok().as_deref() != Some("1") {
            return None;
        }
        let dir = std::env::var("SBRAIN_ACCESS_LOG_DIR")
            .ok()
            .or_else(|| std::env::var("SBRAIN_LOGS_DIR").ok())
            .unwrap_or_else(|| "logs".to_string());
        let prefix =
            std::env::var("SBRAIN_ACCESS_LOG_PREFIX").unwrap_or_else(|_| "http-access".into());
        let rotation = std::env::var("SBRAIN_ACCESS_LOG_ROTATION")
            .map(|r| Rotation::parse(&r))
            .unwrap_or(Rotation::Daily);
        Some(Self {
            dir,
            prefix,
            rotation,
        })
    }

    fn appender(&self) -> RollingFileAppender {
        if std::fs::create_dir_all(&self.dir).is_err() {
            tracing::warn!(directory = %self.dir, "failed to create access log directory");
        }
        match self.rotation {
            Rotation::Hourly => tracing_appender::rolling::hourly(&self.dir, &self.prefix),
            Rotation::Minutely => tracing_appender::rolling::minutely(&self.dir, &self.prefix),
            Rotation::Daily => tracing_appender::rolling::daily(&self.dir, &self.prefix),
        }
    }
}

/// Install the global subscriber: `RUST_LOG` filtered console output, plus the
/// rolling access log when enabled. Safe to call more than once.
pub fn init() {
    init_with_default("info");
}

/// Like [`init`], with the filter used when `RUST_LOG` is unset.
pub fn init_with_default(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let fmt_layer = fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(fmt_layer.with_filter(filter));
    match AccessLog::from_env() {
        Some(access) => {
            let (nb, guard) = tracing_appender::non_blocking(access.appender());
            let _ = ACCESS_GUARD.set(guard);
            let targets = Targets::new().with_target(ACCESS_TARGET, tracing::Level::INFO);
            let access_layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(nb)
                .with_filter(targets);
            let _ = registry.with(access_layer).try_init();
        }
        None => {
            let _ = registry.try_init();
        }
    }
}
