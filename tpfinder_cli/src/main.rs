//! # tpfinder_cli
//!
//! Part of the tpfinder crate family.
//!
//! This is the command line application which feeds a stream of WIB superchunks through
//! the trigger primitive finder.
//!
//! ## Use
//!
//! Make a template configuration with
//!
//! ```bash
//! tpfinder_cli -p config.yml new
//! ```
//!
//! then run the finder over a raw capture (superchunks written back to back)
//!
//! ```bash
//! tpfinder_cli -p config.yml run --input frames.bin --hits hits.yml
//! ```
//!
//! Without `--input` a seeded synthetic stream of `--superchunks` superchunks is generated
//! instead. Status is logged to the terminal and to `tpfinder.log`.
use clap::{value_parser, Arg, ArgMatches, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::error::Error;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use libtpfinder::config::Config;
use libtpfinder::constants::SUPERCHUNK_SIZE;
use libtpfinder::finder::TriggerPrimitiveFinder;
use libtpfinder::frame_file::FrameFileReader;
use libtpfinder::generator::{GeneratorSettings, SuperchunkGenerator};
use libtpfinder::metrics::MetricsSnapshot;

type SuperchunkSource = Box<dyn Iterator<Item = Result<Vec<u8>, Box<dyn Error>>>>;

const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Terminal log target which prints above the progress bars instead of through them
struct ProgressWriter {
    bars: MultiProgress,
    line: Vec<u8>,
}

impl ProgressWriter {
    fn emit(&mut self) -> std::io::Result<()> {
        let line = std::mem::take(&mut self.line);
        self.bars.suspend(|| std::io::stdout().write_all(&line))
    }
}

impl Write for ProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.line.extend_from_slice(buf);
        if self.line.ends_with(b"\n") {
            self.emit()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.line.is_empty() {
            self.emit()?;
        }
        std::io::stdout().flush()
    }
}

fn init_logging(bars: &MultiProgress) -> Result<(), Box<dyn Error>> {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from("./tpfinder.log"))
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(true)
            .build()?,
    );
    let terminal_sink = Arc::new(
        spdlog::sink::WriteSink::builder()
            .target(ProgressWriter {
                bars: bars.clone(),
                line: Vec::new(),
            })
            .build()?,
    );
    let logger = Arc::new(
        spdlog::Logger::builder()
            .sink(terminal_sink)
            .sink(file_sink)
            .flush_level_filter(spdlog::LevelFilter::All)
            .build()?,
    );
    spdlog::set_default_logger(logger);
    Ok(())
}

fn log_metrics(metrics: &MetricsSnapshot, elapsed: Duration) {
    let bytes = metrics.frames_received as f64 * SUPERCHUNK_SIZE as f64;
    spdlog::info!(
        "Processed {} superchunks ({}) in {:.2?} ({}/s)",
        metrics.frames_received,
        human_bytes::human_bytes(bytes),
        elapsed,
        human_bytes::human_bytes(bytes / elapsed.as_secs_f64().max(1e-9))
    );
    spdlog::info!(
        "Rejected: {} Malformed: {} Timestamp gaps: {}",
        metrics.frames_rejected,
        metrics.frames_malformed,
        metrics.timestamp_gaps
    );
    spdlog::info!(
        "Windows: {} Hits: {} Worker faults: {}",
        metrics.windows_processed,
        metrics.hits_found,
        metrics.worker_faults
    );
    spdlog::info!(
        "Queue latency last: {:?} max: {:?} mean: {:?} Lagging items: {}",
        metrics.last_queue_latency,
        metrics.max_queue_latency,
        metrics.mean_queue_latency,
        metrics.lagging_items
    );
    for worker in metrics.workers.iter() {
        spdlog::info!(
            "Worker {} (registers {}..{}): {} windows, {} hits, {} faults",
            worker.worker_id,
            worker.first_register,
            worker.last_register,
            worker.windows_processed,
            worker.hits_found,
            worker.faults
        );
    }
}

/// Open the superchunk source: a capture file if given, otherwise the generator
fn open_source(args: &ArgMatches) -> Result<(SuperchunkSource, u64), Box<dyn Error>> {
    if let Some(input) = args.get_one::<String>("input") {
        let reader = FrameFileReader::open(Path::new(input))?;
        spdlog::info!(
            "Reading {} superchunks ({}) from {}",
            reader.n_superchunks(),
            human_bytes::human_bytes(reader.size_bytes() as f64),
            input
        );
        let total = reader.n_superchunks();
        let source: SuperchunkSource =
            Box::new(reader.map(|r| r.map_err(|e| Box::new(e) as Box<dyn Error>)));
        Ok((source, total))
    } else {
        let total = *args.get_one::<u64>("superchunks").unwrap_or(&1000);
        let seed = *args.get_one::<u64>("seed").unwrap_or(&0);
        spdlog::info!("Generating {total} synthetic superchunks with seed {seed}");
        let generator = SuperchunkGenerator::new(GeneratorSettings::default(), seed)?;
        let source: SuperchunkSource = Box::new(
            generator
                .take(total as usize)
                .map(|r| r.map_err(|e| Box::new(e) as Box<dyn Error>)),
        );
        Ok((source, total))
    }
}

fn run(config: Config, args: &ArgMatches, bars: &MultiProgress) -> Result<(), Box<dyn Error>> {
    let (source, total) = open_source(args)?;
    let mut finder = TriggerPrimitiveFinder::new(config)?;

    let pb = bars.add(ProgressBar::new(total));
    pb.set_style(ProgressStyle::with_template(
        "{bar:40.cyan/blue} {pos}/{len} superchunks [{elapsed_precise}]",
    )?);

    let start = Instant::now();
    let mut retries: u64 = 0;
    for chunk in source {
        let mut chunk = chunk?;
        // the queue is fail-fast by default; keep offering the chunk until it fits
        while let Err(returned) = finder.offer_frame(chunk)? {
            chunk = returned;
            retries += 1;
            std::thread::sleep(Duration::from_micros(200));
        }
        pb.inc(1);
    }
    pb.finish();

    if !finder.wait_idle(IDLE_TIMEOUT)? {
        spdlog::warn!("Finder did not drain within {:?}", IDLE_TIMEOUT);
    }
    let elapsed = start.elapsed();
    if retries > 0 {
        spdlog::info!("Resubmitted rejected superchunks {retries} times");
    }
    log_metrics(&finder.metrics(), elapsed);

    if let Some(hits_path) = args.get_one::<String>("hits") {
        let hits = finder.hits_in_range(0, u64::MAX)?;
        std::fs::write(hits_path, serde_yaml::to_string(&hits)?)?;
        spdlog::info!("Wrote {} trigger primitives to {}", hits.len(), hits_path);
    }

    finder.shutdown()?;
    Ok(())
}

fn main() {
    // Create a cli
    let matches = Command::new("tpfinder_cli")
        .arg_required_else_help(true)
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .required(true)
                .help("Path to the configuration file"),
        )
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(
            Command::new("run")
                .about("Find trigger primitives in a capture or a synthetic stream")
                .arg(
                    Arg::new("input")
                        .short('i')
                        .long("input")
                        .help("File of raw superchunks; synthetic data is used if absent"),
                )
                .arg(
                    Arg::new("superchunks")
                        .short('n')
                        .long("superchunks")
                        .value_parser(value_parser!(u64))
                        .default_value("1000")
                        .help("Number of synthetic superchunks"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .value_parser(value_parser!(u64))
                        .default_value("0")
                        .help("Seed of the synthetic stream"),
                )
                .arg(
                    Arg::new("hits")
                        .long("hits")
                        .help("Write the trigger primitives to this YAML file"),
                ),
        )
        .get_matches();

    // Initialize feedback
    let bars = MultiProgress::new();
    if let Err(e) = init_logging(&bars) {
        spdlog::error!("Could not create the log file: {e}");
    }

    // Parse the cli
    let config_path = match matches.get_one::<String>("path") {
        Some(path) => PathBuf::from(path),
        None => {
            spdlog::error!("A configuration path is required");
            return;
        }
    };

    match matches.subcommand() {
        Some(("new", _)) => {
            spdlog::info!(
                "Making a template config at {}...",
                config_path.to_string_lossy()
            );
            match Config::default().write_config_file(&config_path) {
                Ok(()) => spdlog::info!("Done."),
                Err(e) => spdlog::error!("{e}"),
            }
        }
        Some(("run", args)) => {
            // Load our config
            spdlog::info!("Loading config from {}...", config_path.to_string_lossy());
            let config = match Config::read_config_file(&config_path) {
                Ok(c) => c,
                Err(e) => {
                    spdlog::error!("{e}");
                    return;
                }
            };
            spdlog::info!("Config successfully loaded.");
            spdlog::info!(
                "Window: {} frames Workers: {} Kernel: {:?}",
                config.window_size_in_frames,
                config.n_workers,
                config.kernel
            );
            spdlog::info!(
                "Threshold factor: {} FIR taps: {} Submit policy: {:?}",
                config.threshold_factor,
                config.fir_tap_count,
                config.submit_policy
            );

            match run(config, args, &bars) {
                Ok(()) => spdlog::info!("Done."),
                Err(e) => spdlog::error!("Finder failed with error: {e}"),
            }
        }
        _ => spdlog::error!("Expected a subcommand: new or run"),
    }
}
