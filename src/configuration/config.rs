use super::types::*;
use crate::error_handling::types::ConfigError;
use crate::resolver::ResolverSettings;
use clap::builder::BoolishValueParser;
use clap::Args;
use log::{debug, warn};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Process-wide tunables accepted on the command line.
///
/// Every option can also be supplied through the environment variable named
/// next to it, and through the TOML file given with `--config`. Precedence is
/// flag, then environment, then file, then the built-in default.
///
/// Values are read once at startup by [`Config::load`] and frozen for the
/// lifetime of the process.
#[derive(Args, Debug, Clone, Default)]
pub struct TunableArgs {
    /// TOML configuration file
    #[arg(long, global = true, env = "TCPSPLIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Reverse-resolve stream endpoints to hostnames
    ///
    /// Accepts true/false, yes/no, on/off, 1/0.
    #[arg(long, global = true, env = "TCPSPLIT_RESOLVE_HOSTNAMES", value_parser = BoolishValueParser::new())]
    pub resolve_hostnames: Option<bool>,

    /// Disable hostname resolution entirely (no network lookups)
    #[arg(long, global = true, action = clap::ArgAction::SetTrue)]
    pub no_resolve: bool,

    /// Per-address resolution budget in milliseconds (200-10000)
    #[arg(long, global = true, env = "TCPSPLIT_RESOLVE_TIMEOUT_MS")]
    pub resolve_timeout_ms: Option<u64>,

    /// Number of addresses resolved in parallel (1-32)
    #[arg(long, global = true, env = "TCPSPLIT_RESOLVE_CONCURRENCY")]
    pub resolve_concurrency: Option<usize>,

    /// Default bytes kept per packet in split files; 0 keeps whole packets
    #[arg(long = "default-snaplen", global = true, env = "TCPSPLIT_SNAPLEN")]
    pub default_snaplen: Option<u32>,

    /// Directory receiving new captures
    #[arg(long, global = true, env = "TCPSPLIT_DUMP_DIR")]
    pub dump_dir: Option<PathBuf>,

    #[arg(long, global = true, env = "TCPSPLIT_TSHARK")]
    pub tshark: Option<PathBuf>,

    #[arg(long, global = true, env = "TCPSPLIT_EDITCAP")]
    pub editcap: Option<PathBuf>,

    #[arg(long, global = true, env = "TCPSPLIT_CAPINFOS")]
    pub capinfos: Option<PathBuf>,

    #[arg(long, global = true, env = "TCPSPLIT_DUMPCAP")]
    pub dumpcap: Option<PathBuf>,
}

/// Resolved, validated configuration shared by every component.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub dump_dir: PathBuf,
    pub resolver: ResolverSettings,
    /// Truncation applied to split files when a request does not specify one.
    pub default_snaplen: u32,
    pub tools: ToolPaths,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dump_dir: PathBuf::from(DEFAULT_DUMP_DIR),
            resolver: ResolverSettings::default(),
            default_snaplen: DEFAULT_SNAPLEN,
            tools: ToolPaths::default(),
        }
    }
}

impl Config {
    /// Builds the configuration from `args`, reading the file it points to.
    pub fn load(args: &TunableArgs) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => Self::read_file(path)?,
            None => FileConfig::default(),
        };
        Self::merge(args, file)
    }

    /// Parses a TOML configuration file.
    pub fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
        debug!("Reading configuration file {}", path.display());
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    /// Combines command-line/environment values with the file values.
    pub fn merge(args: &TunableArgs, file: FileConfig) -> Result<Self, ConfigError> {
        let enabled = if args.no_resolve {
            false
        } else {
            args.resolve_hostnames
                .or(file.resolver.enabled)
                .unwrap_or(true)
        };

        let timeout_ms = clamp_with_warning(
            "resolver timeout (ms)",
            args.resolve_timeout_ms
                .or(file.resolver.timeout_ms)
                .unwrap_or(DEFAULT_RESOLVER_TIMEOUT_MS),
            MIN_RESOLVER_TIMEOUT_MS,
            MAX_RESOLVER_TIMEOUT_MS,
        );

        let concurrency = clamp_with_warning(
            "resolver concurrency",
            args.resolve_concurrency
                .or(file.resolver.concurrency)
                .unwrap_or(DEFAULT_RESOLVER_CONCURRENCY),
            MIN_RESOLVER_CONCURRENCY,
            MAX_RESOLVER_CONCURRENCY,
        );

        let default_snaplen = args
            .default_snaplen
            .or(file.split.snaplen)
            .unwrap_or(DEFAULT_SNAPLEN);
        if !is_valid_snaplen(default_snaplen) {
            return Err(ConfigError::NotInRange(format!(
                "snaplen {} must be 0 or within {}..={}",
                default_snaplen, MIN_SNAPLEN, MAX_SNAPLEN
            )));
        }

        let dump_dir = args
            .dump_dir
            .clone()
            .or(file.dump_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DUMP_DIR));
        if dump_dir.exists() && !dump_dir.is_dir() {
            return Err(ConfigError::DirectoryDoesNotExist(format!(
                "dump dir {} is not a directory",
                dump_dir.display()
            )));
        }

        let cli_tools = ToolPaths {
            tshark: args.tshark.clone(),
            editcap: args.editcap.clone(),
            capinfos: args.capinfos.clone(),
            dumpcap: args.dumpcap.clone(),
        };

        Ok(Self {
            dump_dir,
            resolver: ResolverSettings {
                enabled,
                concurrency,
                per_ip_timeout: Duration::from_millis(timeout_ms),
            },
            default_snaplen,
            tools: cli_tools.or(file.tools),
        })
    }
}

fn clamp_with_warning<T: Ord + Copy + Display>(name: &str, value: T, min: T, max: T) -> T {
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!(
            "{} {} is outside {}..={}, using {}",
            name, value, min, max, clamped
        );
    }
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serial_test::serial;
    use std::io::Write;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        tunables: TunableArgs,
    }

    fn parse(args: &[&str]) -> TunableArgs {
        let mut argv = vec!["tcpsplit"];
        argv.extend_from_slice(args);
        TestCli::try_parse_from(argv)
            .unwrap_or_else(|e| panic!("{}", e))
            .tunables
    }

    fn clear_env() {
        for var in [
            "TCPSPLIT_CONFIG",
            "TCPSPLIT_RESOLVE_HOSTNAMES",
            "TCPSPLIT_RESOLVE_TIMEOUT_MS",
            "TCPSPLIT_RESOLVE_CONCURRENCY",
            "TCPSPLIT_SNAPLEN",
            "TCPSPLIT_DUMP_DIR",
            "TCPSPLIT_TSHARK",
            "TCPSPLIT_EDITCAP",
            "TCPSPLIT_CAPINFOS",
            "TCPSPLIT_DUMPCAP",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn defaults_when_nothing_is_set() {
        clear_env();
        let config = Config::load(&parse(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.resolver.enabled);
        assert_eq!(config.resolver.concurrency, 8);
        assert_eq!(config.resolver.per_ip_timeout, Duration::from_millis(2000));
        assert_eq!(config.default_snaplen, 0);
    }

    #[test]
    #[serial]
    fn environment_overrides_defaults() {
        clear_env();
        std::env::set_var("TCPSPLIT_RESOLVE_HOSTNAMES", "off");
        std::env::set_var("TCPSPLIT_RESOLVE_TIMEOUT_MS", "500");
        std::env::set_var("TCPSPLIT_SNAPLEN", "128");
        let config = Config::load(&parse(&[])).unwrap();
        clear_env();

        assert!(!config.resolver.enabled);
        assert_eq!(config.resolver.per_ip_timeout, Duration::from_millis(500));
        assert_eq!(config.default_snaplen, 128);
    }

    #[test]
    #[serial]
    fn out_of_range_resolver_values_are_clamped() {
        clear_env();
        let config = Config::load(&parse(&[
            "--resolve-timeout-ms",
            "50",
            "--resolve-concurrency",
            "100",
        ]))
        .unwrap();
        assert_eq!(config.resolver.per_ip_timeout, Duration::from_millis(200));
        assert_eq!(config.resolver.concurrency, 32);
    }

    #[test]
    #[serial]
    fn degenerate_snaplen_is_rejected() {
        clear_env();
        let err = Config::load(&parse(&["--default-snaplen", "10"])).unwrap_err();
        assert!(matches!(err, ConfigError::NotInRange(_)));
    }

    #[test]
    #[serial]
    fn file_values_sit_below_flags() {
        clear_env();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "dump_dir = \"/var/tmp/caps\"\n\n[resolver]\nenabled = false\nconcurrency = 4\n\n[split]\nsnaplen = 256\n\n[tools]\ntshark = \"/opt/ws/tshark\""
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = Config::load(&parse(&["--config", &path, "--resolve-concurrency", "16"])).unwrap();
        assert_eq!(config.dump_dir, PathBuf::from("/var/tmp/caps"));
        assert!(!config.resolver.enabled);
        assert_eq!(config.resolver.concurrency, 16);
        assert_eq!(config.default_snaplen, 256);
        assert_eq!(config.tools.tshark, Some(PathBuf::from("/opt/ws/tshark")));
        assert_eq!(config.tools.editcap, None);
    }

    #[test]
    #[serial]
    fn no_resolve_flag_wins_over_file() {
        clear_env();
        let args = parse(&["--no-resolve"]);
        let file = FileConfig {
            resolver: ResolverFileConfig {
                enabled: Some(true),
                ..Default::default()
            },
            ..Default::default()
        };
        let config = Config::merge(&args, file).unwrap();
        assert!(!config.resolver.enabled);
    }
}
