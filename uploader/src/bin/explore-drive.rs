use clap::{ArgGroup, Parser};
use drive_youtube_uploader::config::DriveAccess;
use drive_youtube_uploader::drive::{self, DriveClient, SIDECAR_FILES};
use drive_youtube_uploader::explore::{Explorer, format_size};
use drive_youtube_uploader::google::{self, GoogleAuth};
use drive_youtube_uploader::{Config, check, logging};
use std::path::PathBuf;

/// Look around Google Drive to find the folder to upload from, and see which videos are ready.
///
/// With no mode given, suggests candidate folders for `DRIVE_FOLDER_ID`.
#[derive(Debug, Parser)]
#[command(version, about)]
#[command(group(ArgGroup::new("mode").multiple(false)))]
struct Cli {
    /// Print the folder tree with every file.
    #[arg(long, group = "mode")]
    list_all: bool,

    /// List every video in the Drive with its folder and sidecar files.
    #[arg(long, group = "mode")]
    find_videos: bool,

    /// Find folders whose name contains NAME.
    #[arg(long, group = "mode", value_name = "NAME")]
    find_folder: Option<String>,

    /// Split the videos into ready to upload and missing sidecar files.
    #[arg(long, group = "mode")]
    evaluate: bool,

    /// Rank folders as candidates for `DRIVE_FOLDER_ID`.
    #[arg(long, group = "mode")]
    suggest: bool,

    /// Check the whole configuration: service account, Drive, Telegram and channel credentials.
    #[arg(long, group = "mode")]
    check: bool,

    /// Folder to start from.
    #[arg(long, value_name = "ID", default_value = "root")]
    root: String,

    /// How many folder levels to show with --list-all.
    #[arg(long, default_value_t = 3)]
    max_depth: usize,

    /// Read environment variables from this file instead of `./.env`.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
}

async fn explorer(cli: &Cli) -> eyre::Result<Explorer> {
    let access = DriveAccess::load(cli.env_file.as_deref())?;
    let auth = GoogleAuth::new(
        &access.drive.api_key,
        access.service_account_file.as_deref(),
        &[drive::DRIVE_SCOPE],
    )
    .await?;
    let drive = DriveClient::new(
        google::http_client()?,
        auth,
        cli.root.clone(),
        cli.max_depth,
        access.request_timeout,
    );
    Ok(Explorer::new(drive))
}

async fn run_check(cli: &Cli) -> eyre::Result<()> {
    let config = Config::load(cli.env_file.as_deref())?;
    let items = check::check(&config).await?;
    for item in &items {
        println!("{item}");
    }
    let broken = items.iter().filter(|i| i.status.is_broken()).count();
    if broken > 0 {
        eyre::bail!("{broken} check(s) failed");
    }
    println!("\nReady to run upload-videos.");
    Ok(())
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    logging::init(None)?;

    if cli.check {
        return run_check(&cli).await;
    }
    let explorer = explorer(&cli).await?;

    if cli.list_all {
        for line in explorer.tree(&cli.root, cli.max_depth).await? {
            println!("{line}");
        }
    } else if cli.find_videos {
        let videos = explorer.find_videos().await?;
        println!("Found {} video(s)\n", videos.len());
        for found in &videos {
            let size = found.video.size_bytes().map(format_size).unwrap_or_default();
            println!("🎬 {} ({size})", found.video.name);
            println!("   folder: {} ({})", found.folder_path, found.folder_id);
            for sidecar in SIDECAR_FILES {
                let mark = if found.sidecars.contains(&sidecar) { "✅" } else { "❌" };
                println!("   {mark} {sidecar}");
            }
        }
    } else if let Some(name) = &cli.find_folder {
        let matches = explorer.find_folders(name).await?;
        if matches.is_empty() {
            println!("No folder name contains {name:?}");
        }
        for found in &matches {
            println!("📁 {} ({})", found.path, found.folder.id);
            println!("   {} video(s) directly inside", found.direct_videos);
            for (sub, n) in &found.video_subfolders {
                println!("   📁 {}: {n} video(s)", sub.name);
            }
        }
    } else if cli.evaluate {
        let videos = explorer.find_videos().await?;
        let (ready, incomplete): (Vec<_>, Vec<_>) = videos.iter().partition(|v| v.is_ready());
        println!("✅ Ready to upload: {}", ready.len());
        for found in &ready {
            println!("   {}/{}", found.folder_path, found.video.name);
        }
        println!("❌ Missing sidecar files: {}", incomplete.len());
        for found in &incomplete {
            println!(
                "   {}/{}: missing {}",
                found.folder_path,
                found.video.name,
                found.missing().join(", ")
            );
        }
    } else {
        let ranked = explorer.suggest(&cli.root).await?;
        if ranked.is_empty() {
            println!("No folder looks like it holds videos; try --find-videos.");
        }
        for (i, candidate) in ranked.iter().enumerate() {
            println!(
                "{}. {} (score {}, {} video(s))",
                i + 1,
                candidate.folder.name,
                candidate.score,
                candidate.total_videos()
            );
            println!("   DRIVE_FOLDER_ID={}", candidate.folder.id);
            for (sub, n) in &candidate.video_subfolders {
                println!("   📁 {sub}: {n} video(s)");
            }
        }
    }
    Ok(())
}
