use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tcpsplit::configuration::{Config, TunableArgs};
use tcpsplit::network::connection_snapshot::DEFAULT_INTERVAL;
use tcpsplit::network::ConnectionWatcher;
use tcpsplit::session_management::session_manager::DEFAULT_CAPTURE_SECONDS;
use tcpsplit::session_management::{CaptureController, CaptureRequest, ImportRequest, Outcome};
use tcpsplit::storage::types::{SplitProgress, StreamIndex};
use tcpsplit::web_interface::web_server::{parse_bind, DEFAULT_BIND};
use tcpsplit::web_interface::WebServer;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Parser)]
#[command(name = "tcpsplit")]
#[command(version)]
#[command(about = "Capture traffic and split it into one file per TCP stream")]
struct Args {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    tunables: TunableArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture from an interface, then split the result
    Capture {
        #[arg(short, long)]
        iface: String,
        /// Capture filter (BPF syntax)
        #[arg(short, long)]
        filter: Option<String>,
        /// Seconds to capture before stopping on its own
        #[arg(short, long, default_value_t = DEFAULT_CAPTURE_SECONDS)]
        duration: u64,
        /// Bytes kept per packet in split files; 0 keeps whole packets
        #[arg(long)]
        snaplen: Option<u32>,
    },
    /// Split a capture file, or load or rebuild a split folder
    Import {
        path: PathBuf,
        #[arg(long)]
        snaplen: Option<u32>,
    },
    /// Rebuild the stream index of a split folder from its files
    Rebuild { dir: PathBuf },
    /// Print the stream index of a split folder
    Show { dir: PathBuf },
    /// Serve the JSON control API
    Serve {
        #[arg(long, default_value = DEFAULT_BIND)]
        bind: String,
    },
    /// Print live TCP connection snapshots
    Connections {
        /// tcpwatch executable
        #[arg(long, env = "TCPSPLIT_TCPWATCH")]
        tcpwatch: Option<PathBuf>,
        /// Refresh interval in milliseconds
        #[arg(long, default_value_t = DEFAULT_INTERVAL.as_millis() as u64)]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .parse_default_env()
        .format_target(false)
        .init();

    let config = match Config::load(&args.tunables) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Unable to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Dump directory {}, hostname resolution {}",
        config.dump_dir.display(),
        if config.resolver.enabled { "on" } else { "off" }
    );

    let controller = CaptureController::from_config(config);
    if let Err(e) = run(args.command, controller).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(command: Command, controller: CaptureController) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Capture {
            iface,
            filter,
            duration,
            snaplen,
        } => {
            let request = CaptureRequest {
                iface_id: iface,
                capture_filter: filter,
                duration_seconds: duration,
                snap_len: snaplen,
                // --dump-dir is already folded into the configuration
                dump_dir: None,
            };
            capture(&controller, request).await?;
        }
        Command::Import { path, snaplen } => {
            let printer = ProgressPrinter::spawn(&controller);
            let result = controller
                .import(ImportRequest {
                    path,
                    snap_len: snaplen,
                })
                .await;
            printer.finish().await;
            print_index(&result?);
        }
        Command::Rebuild { dir } => {
            let index = controller.rebuild(&dir).await?;
            print_index(&index);
        }
        Command::Show { dir } => {
            let index = controller.read_index(&dir)?;
            print_index(&index);
        }
        Command::Serve { bind } => {
            let addr = parse_bind(&bind)?;
            WebServer::new(controller).start(addr).await?;
        }
        Command::Connections {
            tcpwatch,
            interval_ms,
        } => {
            let mut watcher =
                ConnectionWatcher::spawn(tcpwatch, Duration::from_millis(interval_ms.max(1)))?;
            loop {
                tokio::select! {
                    snapshot = watcher.next() => match snapshot? {
                        Some(snapshot) => println!("{}", snapshot.render_table()),
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            watcher.stop().await?;
        }
    }
    Ok(())
}

async fn capture(
    controller: &CaptureController,
    request: CaptureRequest,
) -> Result<(), Box<dyn std::error::Error>> {
    let printer = ProgressPrinter::spawn(controller);
    let session = controller.start_capture(request)?;
    if let Some(file) = &session.file_path {
        println!("Capturing into {} (Ctrl-C to stop)", file.display());
    }

    let mut stop_requested = false;
    loop {
        tokio::select! {
            _ = controller.wait_until_idle() => break,
            signal = tokio::signal::ctrl_c(), if !stop_requested => {
                signal?;
                stop_requested = true;
                if let Err(e) = controller.stop_capture() {
                    warn!("{}", e);
                }
            }
        }
    }
    printer.finish().await;

    match controller.last_outcome() {
        Some(Outcome::Completed {
            index_path,
            streams,
            ..
        }) => {
            println!("{} streams indexed in {}", streams, index_path.display());
            Ok(())
        }
        Some(Outcome::Failed { message }) => Err(message.into()),
        None => Ok(()),
    }
}

/// Prints split progress until finished, then whatever is still buffered.
struct ProgressPrinter {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ProgressPrinter {
    fn spawn(controller: &CaptureController) -> Self {
        let mut rx = controller.subscribe_progress();
        let (stop, mut stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    msg = rx.recv() => match msg {
                        Ok(p) => print_step(&p),
                        Err(RecvError::Lagged(n)) => warn!("{} progress events dropped", n),
                        Err(RecvError::Closed) => break,
                    },
                    _ = &mut stopped => {
                        loop {
                            match rx.try_recv() {
                                Ok(p) => print_step(&p),
                                Err(TryRecvError::Lagged(n)) => warn!("{} progress events dropped", n),
                                Err(_) => break,
                            }
                        }
                        break;
                    }
                }
            }
        });
        Self { stop, task }
    }

    async fn finish(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            warn!("Progress printer ended abnormally: {}", e);
        }
    }
}

fn print_step(p: &SplitProgress) {
    println!("[{}/{}] stream {} -> {}", p.current, p.total, p.stream_id, p.file);
}

fn print_index(index: &StreamIndex) {
    println!("Capture: {}", index.capture_file);
    println!("Split folder: {}", index.split_dir.display());
    println!("Created: {}", index.created_at.to_rfc3339());
    for stream in &index.streams {
        println!(
            "{:>6}  {:<24} {:>10} bytes {:>8} packets  {}",
            stream.id,
            stream.file,
            stream.size_label(),
            stream.packet_count_label(),
            stream.description.as_deref().unwrap_or("")
        );
    }
    println!("{} streams", index.streams.len());
}
