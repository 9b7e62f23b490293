//! Main entry point for the discdec CLI app

use std::io::Write;
use std::path::PathBuf;

use discdec::cli::{self, Commands};
use discdec::common::CancelToken;
use discdec::crypto::Key;
use discdec::decrypt::{self, DecryptionEngine};
use discdec::hash;
use discdec::pipeline::{ItemChange, ItemEvent, Pipeline, ProcessingItem};
use discdec::titledb::{KeyLookup, TitleDb};

fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run_app() {
        if e.downcast_ref::<clap::Error>().is_none() {
            eprintln!("Error: {}", e);
        }
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

fn run_app() -> Result<(), Box<dyn std::error::Error>> {
    let command = cli::run()?;

    match command {
        Commands::Process { inputs, db, threads } => run_process(inputs, db, threads),
        Commands::Decrypt { input, key, db, threads } => run_decrypt(input, key, db, threads),
        Commands::Hash { file } => {
            let digest = hash::hash_file(&file, &CancelToken::new(), None)?;
            println!("{digest}  {}", file.display());
            Ok(())
        }
        Commands::Info { image } => run_info(image),
    }
}

fn make_engine(threads: usize) -> Result<DecryptionEngine, discdec::DiscError> {
    if threads == 0 {
        DecryptionEngine::new()
    } else {
        DecryptionEngine::with_threads(threads)
    }
}

fn run_process(
    inputs: Vec<PathBuf>,
    db_path: PathBuf,
    threads: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = TitleDb::load(&db_path)?;
    println!("Loaded {} titles from {}", db.len(), db_path.display());

    let mut items: Vec<ProcessingItem> = inputs.iter().map(ProcessingItem::new).collect();
    let names: Vec<String> = items.iter().map(|i| i.file_name.clone()).collect();

    let (tx, rx) = crossbeam_channel::unbounded::<ItemEvent>();
    let printer = std::thread::spawn(move || {
        for event in rx {
            let name = &names[event.index];
            match event.change {
                ItemChange::Status { message, .. } => {
                    println!("\r{name}: {message}");
                }
                ItemChange::Progress { percent } => {
                    print!("\r{name}: {percent:5.1}%");
                    let _ = std::io::stdout().flush();
                }
            }
        }
    });

    let pipeline = Pipeline::new(make_engine(threads)?).with_events(tx);
    let cancel = CancelToken::new();
    let total = items.len();
    let completed = pipeline.process_batch(&mut items, &db, None, &cancel);

    drop(pipeline);
    printer.join().expect("printer thread panicked");

    println!("{completed} of {total} file(s) processed");
    if completed < total {
        return Err(format!("{} file(s) failed", total - completed).into());
    }
    Ok(())
}

fn run_decrypt(
    input: PathBuf,
    key: Option<String>,
    db: Option<PathBuf>,
    threads: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancelToken::new();

    let key = match (key, db) {
        (Some(hex_key), _) => Key::parse(&hex_key)?,
        (None, Some(db_path)) => {
            let db = TitleDb::load(&db_path)?;
            println!("Hashing {}...", input.display());
            let digest = hash::hash_file(&input, &cancel, None)?;
            let title = db.lookup(&digest).ok_or(discdec::DiscError::LookupMiss)?;
            println!("Matched: {}", title.name);
            Key::parse(&title.hex_key)?
        }
        (None, None) => return Err("either --key or --db is required".into()),
    };

    let engine = make_engine(threads)?;
    let progress = |fraction: f64| {
        print!("\r{:5.1}%", fraction * 100.0);
        let _ = std::io::stdout().flush();
    };
    let dest = engine.decrypt_file(&input, &key, &cancel, Some(&progress))?;
    println!("\rDecrypted to {}", dest.display());
    Ok(())
}

fn run_info(image: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let regions = decrypt::read_region_table(&image)?;
    let total = discdec::region::total_sectors(&regions);

    println!("Region table ({} regions, {} sectors):", regions.len(), total);
    for (i, region) in regions.iter().enumerate() {
        let kind = if region.is_encrypted() { "encrypted" } else { "plain" };
        println!(
            "  {i:3}  {kind:<9}  sectors {}..{}  ({} sectors)",
            region.start,
            region.end,
            region.sectors()
        );
    }
    Ok(())
}
