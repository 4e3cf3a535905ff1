fn env_truthy(var: &str) -> Option<bool> {
    std::env::var(var).map(|v| v != "0" && !v.is_empty()).ok()
}

pub mod logging {
    use clap::{Args, ValueEnum};
    use std::fs::OpenOptions;
    use std::path::{Path, PathBuf};
    use std::sync::OnceLock;
    use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
    use tracing_subscriber::EnvFilter;

    /// Full `EnvFilter` directive string; replaces the computed filter entirely.
    pub const FILTER_ENV: &str = "MESH_LOG_FILTER";
    /// Lifts the `warn` cap on dependency targets at debug and trace.
    pub const TRACE_DEPS_ENV: &str = "MESH_TRACE_DEPS";

    const MESH_TARGETS: &[&str] = &["peer_mesh", "mesh_relay", "mesh_chat"];

    // ICE and SCTP are chatty well below trace.
    const NOISY_DEP_TARGETS: &[&str] = &[
        "webrtc",
        "webrtc_ice",
        "webrtc_sctp",
        "webrtc_dtls",
        "webrtc_srtp",
        "webrtc_mdns",
        "tokio_tungstenite",
        "tungstenite",
        "hyper",
        "tower_http",
        "rustls",
        "mio",
    ];

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum Verbosity {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    impl Verbosity {
        /// Level name as `EnvFilter` spells it.
        pub fn directive(self) -> &'static str {
            match self {
                Verbosity::Error => "error",
                Verbosity::Warn => "warn",
                Verbosity::Info => "info",
                Verbosity::Debug => "debug",
                Verbosity::Trace => "trace",
            }
        }

        fn is_verbose(self) -> bool {
            self >= Verbosity::Debug
        }
    }

    /// Logging flags shared by the binaries; flatten into a clap parser.
    #[derive(Args, Debug, Clone, Default)]
    pub struct LoggingArgs {
        #[arg(
            long = "log-level",
            value_enum,
            env = "MESH_LOG_LEVEL",
            default_value_t = Verbosity::Warn,
            help = "Minimum log level (error, warn, info, debug, trace)"
        )]
        pub level: Verbosity,

        #[arg(
            long = "log-file",
            value_name = "PATH",
            env = "MESH_LOG_FILE",
            help = "Append logs to this file instead of stderr"
        )]
        pub file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("cannot open log file {path:?}: {source}")]
        OpenFile {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("cannot install log subscriber: {0}")]
        Install(String),
    }

    // Holding the guard keeps the background writer flushing until exit.
    static INSTALLED: OnceLock<WorkerGuard> = OnceLock::new();

    /// Installs the process-wide subscriber described by `args`. Later calls are no-ops.
    pub fn init(args: &LoggingArgs) -> Result<(), InitError> {
        if INSTALLED.get().is_some() {
            return Ok(());
        }

        let explicit = std::env::var(FILTER_ENV).ok();
        let allow_deps = super::env_truthy(TRACE_DEPS_ENV).unwrap_or(false);
        let capped = explicit.is_none() && args.level.is_verbose() && !allow_deps;
        let filter = explicit.unwrap_or_else(|| directives(args.level, allow_deps));

        let (writer, guard) = open_sink(args.file.as_deref())?;
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(filter))
            .with_target(args.level.is_verbose())
            .with_thread_names(args.level == Verbosity::Trace)
            .with_ansi(args.file.is_none())
            .with_writer(writer)
            .try_init()
            .map_err(|err| InitError::Install(err.to_string()))?;
        let _ = INSTALLED.set(guard);

        if capped {
            tracing::debug!(
                env = TRACE_DEPS_ENV,
                "dependency logs capped at warn"
            );
        }
        Ok(())
    }

    fn open_sink(file: Option<&Path>) -> Result<(NonBlocking, WorkerGuard), InitError> {
        let Some(path) = file else {
            return Ok(tracing_appender::non_blocking(std::io::stderr()));
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| InitError::OpenFile {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(tracing_appender::non_blocking(file))
    }

    /// Quiet levels apply globally. Verbose levels apply to mesh crates only, over an `info`
    /// baseline, with dependency targets held at `warn` unless `allow_deps`.
    fn directives(level: Verbosity, allow_deps: bool) -> String {
        if !level.is_verbose() {
            return level.directive().to_owned();
        }
        let mut parts = vec![Verbosity::Info.directive().to_owned()];
        parts.extend(
            MESH_TARGETS
                .iter()
                .map(|target| format!("{target}={}", level.directive())),
        );
        if !allow_deps {
            parts.extend(NOISY_DEP_TARGETS.iter().map(|target| format!("{target}=warn")));
        }
        parts.join(",")
    }

}
