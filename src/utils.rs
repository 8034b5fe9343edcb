use std::env;
use std::path::PathBuf;
use std::process::Command;

use crate::constants::SNAPSHOT_FILE;

/// Returns the cross-platform directory for application data
pub fn get_app_data_dir() -> PathBuf {
    if cfg!(target_os = "macos") {
        let home_dir = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let mut path = PathBuf::from(home_dir);
        path.push("Library");
        path.push("Application Support");
        path.push("PokeFinder");
        path
    } else if cfg!(target_os = "windows") {
        match env::var("APPDATA") {
            Ok(appdata) => PathBuf::from(appdata).join("PokeFinder"),
            Err(_) => PathBuf::from(".").join("PokeFinder"),
        }
    } else if let Ok(xdg_data_home) = env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg_data_home).join("PokeFinder")
    } else {
        // Fallback to ~/.local/share/PokeFinder
        let home_dir = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let mut path = PathBuf::from(home_dir);
        path.push(".local");
        path.push("share");
        path.push("PokeFinder");
        path
    }
}

/// Location of the sighting index snapshot
pub fn snapshot_path() -> PathBuf {
    get_app_data_dir().join(SNAPSHOT_FILE)
}

/// Opens the specified URL in the default browser using native commands
pub fn open_browser(url: &str) -> Result<(), std::io::Error> {
    let os = env::consts::OS;
    match os {
        "macos" => {
            Command::new("open").arg(url).spawn()?;
        }
        "windows" => {
            Command::new("cmd").args(["/C", "start", url]).spawn()?;
        }
        "linux" => {
            Command::new("xdg-open").arg(url).spawn()?;
        }
        _ => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                format!("Unsupported OS: {}", os),
            ));
        }
    }
    Ok(())
}
