mod simulator;

use clap::{Parser, Subcommand};
use std::{env::current_dir, path::PathBuf, sync::Arc, time::Duration};
use tagforge_common::{Logger, Settings, DEFAULT_CONFIG_FILE_NAME};
use tagforge_core::{CsvFileResultSink, ResultSink, TFCoordinator, TracingResultSink};
use tagforge_epc::{
    ChipRegistry, EpcGenerator, EpcList, EpcValue, Sgtin96, TagIdentifier, TidParser,
    UsedSerialSet,
};
use tagforge_error::{TFError, TFResult};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// TagForge - RFID tag serialization toolkit
///
/// Encodes and decodes SGTIN-96 EPCs, identifies chips from their TID and
/// generates session-unique EPCs.
#[derive(Parser)]
#[command(name = "tagforge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "TagForge", long_about = None)]
struct Cli {
    /// Sets a custom config file with full path
    ///
    /// If not specified, 'tagforge.toml' in the current working directory is
    /// used when present.
    #[arg(short, long, env = "TF_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Encode a GTIN and serial as SGTIN-96
    Encode {
        #[arg(long)]
        gtin: String,
        #[arg(long, default_value_t = 7)]
        company_prefix_length: usize,
        #[arg(long, default_value_t = 0)]
        serial: u64,
    },
    /// Decode a 24-character EPC
    Decode { epc: String },
    /// Identify the chip behind a TID and print its serial
    Tid { tid: String },
    /// Generate EPC candidates
    Generate {
        #[command(subcommand)]
        mode: GenerateMode,
    },
    /// Run the write/verify lifecycle against a simulated tag field
    Simulate {
        #[arg(long, default_value_t = 10)]
        tags: usize,
        /// Drop every n-th write to exercise verification retries (0 disables)
        #[arg(long, default_value_t = 4)]
        flaky_every: usize,
        #[arg(long, default_value = "3034257BF400B7800004CB2F")]
        seed_epc: String,
        /// Also append result lines to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum GenerateMode {
    /// SGTIN-96 EPCs with serials 1..=quantity
    Sequential {
        #[arg(long)]
        gtin: String,
        #[arg(long, default_value_t = 7)]
        company_prefix_length: usize,
        #[arg(long)]
        quantity: u64,
    },
    /// header(4) + middle(14) + 6-digit counter
    Fixed {
        #[arg(long)]
        header: String,
        #[arg(long)]
        middle: String,
        #[arg(long)]
        quantity: u32,
    },
    /// header(4) + middle(4) + TID serial
    Tid {
        #[arg(long)]
        tid: String,
        #[arg(long)]
        header: String,
        #[arg(long)]
        middle: String,
    },
    /// Random 40-bit serials, unique within this run
    Random {
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Print the EPCs of a flat-file list in order
    List { file: PathBuf },
}

fn config_path(cli: &Cli) -> TFResult<String> {
    let path = match &cli.config {
        Some(p) => p.clone(),
        None => {
            let dir = current_dir()
                .map_err(|e| TFError::from(format!("Failed to get current directory: {e}")))?;
            dir.join(DEFAULT_CONFIG_FILE_NAME)
        }
    };
    Ok(path.to_string_lossy().to_string())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> TFResult<()> {
    let cli = Cli::parse();
    let settings = Settings::new(&config_path(&cli)?)?;

    let mut logger = Logger::from_settings(&settings.log)?;
    logger.initialize()?;

    let registry = ChipRegistry::builtin();
    match cli.command {
        Command::Encode {
            gtin,
            company_prefix_length,
            serial,
        } => {
            let sgtin = Sgtin96::from_gtin(&gtin, company_prefix_length)?.with_serial(serial)?;
            println!("{}", sgtin.to_epc());
            println!("{}", sgtin.to_uri());
        }
        Command::Decode { epc } => match EpcValue::parse(&epc)? {
            EpcValue::Sgtin(sgtin) => {
                println!("{}", to_json(&sgtin)?);
                println!("gtin: {}", sgtin.to_upc());
            }
            EpcValue::Raw(hex) => println!("raw EPC {hex} (not SGTIN-96)"),
        },
        Command::Tid { tid } => {
            let mut parser = TidParser::new(&tid, registry)?;
            println!("{}", to_json(parser.profile()?)?);
            println!(
                "serial: {} ({})",
                parser.serial_hex()?,
                parser.serial_decimal()?
            );
            parser.dispose();
        }
        Command::Generate { mode } => {
            let generator = EpcGenerator::new(
                registry,
                UsedSerialSet::new(),
                settings.coordinator.random_attempts,
                &settings.coordinator.default_vendor_prefix,
            )?;
            generate(&generator, mode)?;
        }
        Command::Simulate {
            tags,
            flaky_every,
            seed_epc,
            csv,
        } => simulate(&settings, registry, tags, flaky_every, &seed_epc, csv).await?,
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> TFResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| TFError::Format(e.to_string()))
}

fn generate(generator: &EpcGenerator, mode: GenerateMode) -> TFResult<()> {
    match mode {
        GenerateMode::Sequential {
            gtin,
            company_prefix_length,
            quantity,
        } => generator
            .sequential(&gtin, company_prefix_length, quantity)?
            .for_each(|epc| println!("{epc}")),
        GenerateMode::Fixed {
            header,
            middle,
            quantity,
        } => generator
            .fixed_header(&header, &middle, quantity)?
            .for_each(|epc| println!("{epc}")),
        GenerateMode::Tid { tid, header, middle } => {
            println!("{}", generator.tid_derived(&tid, &header, &middle)?)
        }
        GenerateMode::Random { count } => {
            for _ in 0..count {
                println!("{}", generator.random_serial()?);
            }
        }
        GenerateMode::List { file } => {
            let mut list = EpcList::from_file(&file)?;
            while !list.is_empty() {
                println!("{}", list.next()?);
            }
        }
    }
    Ok(())
}

async fn simulate(
    settings: &Settings,
    registry: Arc<ChipRegistry>,
    tags: usize,
    flaky_every: usize,
    seed_epc: &str,
    csv: Option<PathBuf>,
) -> TFResult<()> {
    let field: Vec<(TagIdentifier, String)> = (0..tags)
        .map(|i| {
            // Monza R6 TIDs with distinct serial bits
            let tid = TagIdentifier::parse(&format!("E2801160200074{:010X}", 0x10_0000 + i * 7919))?;
            Ok((tid, seed_epc.to_ascii_uppercase()))
        })
        .collect::<TFResult<_>>()?;

    let sink: Arc<dyn ResultSink> = match csv {
        Some(path) => Arc::new(CsvFileResultSink::open(path).await?),
        None => Arc::new(TracingResultSink),
    };
    let token = CancellationToken::new();
    let (channel, device) = simulator::field(&field, flaky_every);
    let coordinator = TFCoordinator::spawn(
        settings.coordinator.clone(),
        registry,
        Arc::new(channel),
        sink,
        token.child_token(),
    )?;
    tokio::spawn(device.run(coordinator.clone(), token.child_token()));

    let fresh = coordinator
        .on_read_reported(simulator::inventory(&field))
        .await;
    for tid in &fresh {
        match coordinator.next_epc_for_tag(seed_epc, tid.as_str()).await {
            Ok(_) => {
                coordinator.trigger_write_and_verify(tid.as_str()).await?;
            }
            Err(e) => warn!(tid = %tid, error = %e, "No EPC assigned"),
        }
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let mut done = 0;
        for (tid, _) in &field {
            if coordinator.is_processed(tid.as_str()).await? {
                done += 1;
            }
        }
        if done == field.len() || tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let successes = coordinator.success_count().await?;
    info!(tags = field.len(), successes, "Simulation finished");
    println!("{successes}/{} tags verified", field.len());
    token.cancel();
    Ok(())
}
