use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Result, Context, bail};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use tracing::info;

use gallery_catalog::database::repo::Catalog;
use gallery_catalog::database::schema::{FolderPreview, FolderTag};
use gallery_catalog::ingest::{backup, importer};
use gallery_catalog::metadata::source::JsonFileSource;
use gallery_catalog::utils::config;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Catalog database; overrides CATALOG_DB_PATH from catalog.env
    #[arg(short, long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import every new image folder below a directory
    Import {
        input_dir: PathBuf,
        #[arg(short, long, default_value_t = 4)]
        workers: usize,
    },
    /// Import the galleries downloaded by EhViewer from its backup databases
    ImportBackup {
        #[arg(required = true)]
        backups: Vec<PathBuf>,
        /// EhViewer download directory holding the gallery folders
        #[arg(long)]
        download_dir: PathBuf,
    },
    /// Boolean keyword search with regex patterns
    Search {
        /// Every pattern must match some keyword
        #[arg(short, long = "include")]
        include: Vec<String>,
        /// No pattern may match any keyword
        #[arg(short = 'x', long = "exclude")]
        exclude: Vec<String>,
    },
    /// Find folders with a title similar to the given one
    Similar { title: String },
    /// Add a local `namespace:stem` tag to a folder
    Tag { fid: i64, tag: String },
    /// Attach stored gallery metadata to a folder
    Link { fid: i64, gid: String },
    /// Detach gallery metadata from a folder
    Unlink { fid: i64 },
    /// Store gallery metadata from a gallery API response and link it
    Refresh {
        fid: i64,
        #[arg(long)]
        gid: i64,
        #[arg(long)]
        token: String,
        #[arg(long)]
        json: PathBuf,
    },
    /// Show one folder with its tags and gallery metadata
    Show { fid: i64 },
}

fn format_time(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

fn print_previews(previews: &[FolderPreview]) {
    for p in previews {
        println!("{}\t{}\t{}", p.fid, p.title, p.folder_path);
    }
    println!("{} folders", previews.len());
}

fn show(catalog: &Catalog, fid: i64) -> Result<()> {
    let Some(folder) = catalog.query_folder(fid)? else {
        bail!("No folder with fid {}", fid);
    };
    println!("fid: {}", folder.fid);
    println!("title: {}", folder.title);
    println!("path: {}", folder.folder_path);
    println!("recorded: {}", format_time(folder.record_time));
    if let Some(cover) = catalog.query_cover(fid)? {
        println!("cover: {}", cover.cover_fname);
    }

    println!("tags:");
    for tag in catalog.query_folder_tags(fid)? {
        println!("  {}", tag.keyword());
    }

    if let Some(meta) = catalog.query_external_by_fid(fid)? {
        println!("gallery: {} ({})", meta.gid, meta.token);
        println!("  title: {}", meta.title);
        println!("  title_jpn: {}", meta.title_jpn);
        println!("  category: {}", meta.category);
        println!("  rating: {}", meta.rating);
        println!("  uploader: {}", meta.uploader);
        println!("  posted: {}", format_time(meta.posted));
        println!("  updated: {}", format_time(meta.meta_updated));
        for tag in catalog.query_external_tags(&meta.gid)? {
            println!("  {}", tag);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let settings = config::get_settings()?;
    let db_path = args.db_path.unwrap_or(settings.db_path);
    info!("DB: {:?}", db_path);

    match args.command {
        Command::Import { input_dir, workers } => {
            let summary = importer::import_dir(&db_path, &input_dir, workers)?;
            println!("Import complete: {} new folders imported", summary.imported);
        }
        Command::ImportBackup { backups, download_dir } => {
            let summary = backup::import_backups(&db_path, &backups, &download_dir)?;
            println!("Import complete: {} new folders imported", summary.imported);
        }
        Command::Search { include, exclude } => {
            let catalog = Catalog::open(&db_path)?;
            let results = catalog
                .search(include.as_slice(), exclude.as_slice())
                .context("Search failed")?;
            print_previews(&results);
        }
        Command::Similar { title } => {
            let catalog = Catalog::open(&db_path)?;
            let results = catalog
                .search_similar(&title, &settings.fuzzy)
                .context("Similar-title search failed")?;
            print_previews(&results);
        }
        Command::Tag { fid, tag } => {
            let catalog = Catalog::open(&db_path)?;
            if catalog.query_folder(fid)?.is_none() {
                bail!("No folder with fid {}", fid);
            }
            let tag = FolderTag::parse(fid, &tag);
            if tag.stem.is_empty() {
                bail!("Tag stem must not be empty");
            }
            catalog.insert_tag(&tag)?;
            println!("Tagged {} with {}", fid, tag.keyword());
        }
        Command::Link { fid, gid } => {
            let catalog = Catalog::open(&db_path)?;
            if !catalog.link_external(fid, &gid)? {
                bail!("No folder with fid {}", fid);
            }
        }
        Command::Unlink { fid } => {
            let catalog = Catalog::open(&db_path)?;
            if !catalog.unlink_external(fid)? {
                bail!("No folder with fid {}", fid);
            }
        }
        Command::Refresh { fid, gid, token, json } => {
            let mut catalog = Catalog::open(&db_path)?;
            let source = Arc::new(JsonFileSource::new(json));
            catalog
                .refresh_metadata(fid, gid, &token, source)
                .context("Metadata refresh failed")?;
            println!("Refreshed gallery {} for folder {}", gid, fid);
        }
        Command::Show { fid } => {
            let catalog = Catalog::open(&db_path)?;
            show(&catalog, fid)?;
        }
    }

    Ok(())
}
