//! Per-OS knowledge for server detection and install
//!
//! Everything the lifecycle manager needs to know about the host OS lives
//! here, so the orchestration logic stays platform-agnostic.

use std::path::PathBuf;

/// Name of the server binary on this platform
pub fn server_binary_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "ollama.exe"
    } else {
        "ollama"
    }
}

/// File suffix the downloaded installer must carry
pub fn installer_suffix() -> &'static str {
    if cfg!(target_os = "windows") {
        ".exe"
    } else if cfg!(target_os = "macos") {
        ".pkg"
    } else {
        ".run"
    }
}

/// Download URL for the server installer
pub fn installer_url() -> &'static str {
    if cfg!(target_os = "windows") {
        "https://ollama.com/download/OllamaSetup.exe"
    } else if cfg!(target_os = "macos") {
        "https://ollama.com/download/Ollama.pkg"
    } else {
        "https://ollama.com/download/ollama-linux-amd64.run"
    }
}

/// Directory downloaded installers are staged in before execution.
/// Install requests referencing files outside this directory are refused.
pub fn staging_dir() -> PathBuf {
    std::env::temp_dir().join("wyrm-installer")
}

/// Location of a server binary bundled with the application, if the
/// application ships one next to its own executable.
pub fn bundled_server_path() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let dir = exe.parent()?;
    Some(dir.join("resources").join(server_binary_name()))
}

/// Well-known install locations to check before falling back to PATH
#[cfg(target_os = "windows")]
pub fn install_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Ok(local) = std::env::var("LOCALAPPDATA") {
        locations.push(
            PathBuf::from(local)
                .join("Programs")
                .join("Ollama")
                .join("ollama.exe"),
        );
    }
    if let Ok(program_files) = std::env::var("ProgramFiles") {
        locations.push(PathBuf::from(program_files).join("Ollama").join("ollama.exe"));
    }
    locations
}

#[cfg(target_os = "macos")]
pub fn install_locations() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/local/bin/ollama"),
        PathBuf::from("/opt/homebrew/bin/ollama"),
        PathBuf::from("/Applications/Ollama.app/Contents/Resources/ollama"),
    ]
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub fn install_locations() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/local/bin/ollama"),
        PathBuf::from("/usr/bin/ollama"),
        PathBuf::from("/usr/share/ollama/ollama"),
    ]
}

/// Command used to locate a binary on PATH
pub fn path_lookup_command() -> &'static str {
    if cfg!(target_os = "windows") {
        "where"
    } else {
        "which"
    }
}
