//! modplay CLI: load a module file (or pick one from a directory) and play
//! it, printing the playback position until the song ends.

use std::env;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use mp_ir::Format;
use mp_player::{PlayMode, Player, Song};

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let arg = env::args().nth(1).unwrap_or_else(|| ".".to_string());
    let files = find_modules(Path::new(&arg));
    if files.is_empty() {
        eprintln!("no module files found at {}", arg);
        return ExitCode::FAILURE;
    }
    let Some(path) = pick(&files) else {
        return ExitCode::FAILURE;
    };

    let song = match mp_formats::load_path(&path) {
        Ok(song) => song,
        Err(err) => {
            eprintln!("failed to load {}: {}", path.display(), err);
            return ExitCode::FAILURE;
        }
    };

    let mut player = Player::new(song);
    print_info(&path, player.song());
    if let Err(err) = player.start() {
        eprintln!("audio device error: {}", err);
        return ExitCode::FAILURE;
    }

    while player.is_playing() {
        let status = player.status();
        let mode = match status.mode {
            PlayMode::Playing => "PLAY",
            PlayMode::Paused => "PAUSED",
            PlayMode::Ended => "ENDED",
        };
        print!(
            "\r{:6}  ord:{:02}  pat:{:03}  row:{:03}  spd:{}  bpm:{} ",
            mode, status.order, status.pattern, status.row, status.speed, status.bpm
        );
        let _ = std::io::stdout().flush();
        std::thread::sleep(Duration::from_millis(120));
    }
    player.stop();
    println!("\ndone");
    ExitCode::SUCCESS
}

/// A single file, or every module under a directory (recursive, sorted).
fn find_modules(path: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    if path.is_file() {
        if mp_formats::is_module_path(path) {
            found.push(path.to_path_buf());
        }
    } else if path.is_dir() {
        walk(path, &mut found);
        found.sort();
    }
    found
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(&path, found);
        } else if mp_formats::is_module_path(&path) {
            found.push(path);
        }
    }
}

/// Numbered picker over the first 50 candidates; bad input means the first.
fn pick(files: &[PathBuf]) -> Option<PathBuf> {
    if files.len() == 1 {
        return Some(files[0].clone());
    }
    for (i, file) in files.iter().take(50).enumerate() {
        let name = file.file_name().and_then(|n| n.to_str()).unwrap_or("?");
        println!("  {:2}  {}", i + 1, name);
    }
    if files.len() > 50 {
        println!("  ...{} more", files.len() - 50);
    }
    print!("\n  # ");
    let _ = std::io::stdout().flush();

    let mut line = String::new();
    std::io::stdin().read_line(&mut line).ok()?;
    let choice = line.trim().parse::<usize>().unwrap_or(1);
    let index = choice
        .checked_sub(1)
        .filter(|&i| i < files.len())
        .unwrap_or(0);
    Some(files[index].clone())
}

fn print_info(path: &Path, song: &Song) {
    let format = match song.format {
        Format::Mod => "MOD",
        Format::S3m => "S3M",
        Format::Xm => "XM",
        Format::It => "IT",
    };
    let slide_mode = if song.linear { "linear" } else { "amiga" };
    println!("File:     {}", path.display());
    println!("Title:    {}", song.title);
    println!(
        "Format:   {} ({} channels, {} mode)",
        format, song.num_channels, slide_mode
    );
    println!("Patterns: {}, orders: {}", song.patterns.len(), song.orders.len());
    println!(
        "Tempo:    {} BPM, speed {}",
        song.initial_tempo, song.initial_speed
    );
    let with_data = song.samples.iter().filter(|s| !s.is_empty()).count();
    println!("Samples:  {} with data", with_data);
    println!();
}
