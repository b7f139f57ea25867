use chrono::{DateTime, Utc};
use ratatui::style::Color;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

pub const APP_VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

const CONFIG_FILE: &str = "config.toml";
const CREDENTIALS_FILE: &str = "credentials.json";

pub const DEFAULT_AUTH_URL: &str = "https://identitytoolkit.googleapis.com/v1";
pub const DEFAULT_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1";
pub const DEFAULT_FIRESTORE_URL: &str = "https://firestore.googleapis.com/v1";

/// `$TODO_HOME`, or `~/.todo`.
pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TODO_HOME") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".todo");
    path
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub firebase: FirebaseConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub theme: ThemeConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct FirebaseConfig {
    pub api_key: String,
    pub project_id: String,
    pub auth_url: String,
    pub token_url: String,
    pub firestore_url: String,
    pub request_timeout_secs: u64,
}

impl Default for FirebaseConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            project_id: String::new(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            firestore_url: DEFAULT_FIRESTORE_URL.to_string(),
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DisplayConfig {
    /// Offset from UTC used for creation dates. Asia/Tokyo by default.
    pub utc_offset_minutes: i32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 9 * 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ThemeConfig {
    pub background: Color,
    pub foreground: Color,
    pub header: Color,
    pub border_active: Color,
    pub border_inactive: Color,
    pub selection_bg: Color,
    pub selection_fg: Color,
    pub placeholder: Color,
    pub date: Color,
    pub notice: Color,
    pub error: Color,
    pub disabled: Color,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            background: Color::Reset,
            foreground: Color::Rgb(248, 248, 242),
            header: Color::Rgb(88, 86, 214),
            border_active: Color::Rgb(88, 86, 214),
            border_inactive: Color::Rgb(98, 114, 164),
            selection_bg: Color::Rgb(68, 71, 90),
            selection_fg: Color::Rgb(189, 147, 249),
            placeholder: Color::DarkGray,
            date: Color::Gray,
            notice: Color::Rgb(80, 250, 123),
            error: Color::Rgb(255, 85, 85),
            disabled: Color::DarkGray,
        }
    }
}

impl AppConfig {
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var("TODO_FIREBASE_API_KEY") {
            self.firebase.api_key = key;
        }
        if let Ok(project) = std::env::var("TODO_FIREBASE_PROJECT_ID") {
            self.firebase.project_id = project;
        }
        self
    }
}

/// Reads `config.toml` from `dir`, writing the defaults on first run. A file
/// that does not parse is moved to `config.toml.bak` and the defaults win.
pub fn load_config(dir: &Path) -> AppConfig {
    fs::create_dir_all(dir).ok();
    let path = dir.join(CONFIG_FILE);

    if !path.exists() {
        let default_config = AppConfig::default();
        if let Ok(toml_str) = toml::to_string_pretty(&default_config) {
            if let Err(e) = write_private(&path, toml_str.as_bytes()) {
                warn!("Failed to write default config: {}", e);
            }
        }
        return default_config;
    }

    match fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to parse config.toml: {}.", e);
                let backup_path = path.with_extension("toml.bak");
                if let Err(backup_err) = fs::rename(&path, &backup_path) {
                    warn!("Failed to backup corrupted config: {}", backup_err);
                } else {
                    warn!("Corrupted config backed up to {:?}", backup_path);
                }
                AppConfig::default()
            }
        },
        Err(e) => {
            warn!("Failed to read config file: {}. Using default.", e);
            AppConfig::default()
        }
    }
}

/// What the auth service needs to keep a user signed in across launches.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: String,
    pub email: String,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

pub fn load_credentials(dir: &Path) -> Option<Credentials> {
    let path = dir.join(CREDENTIALS_FILE);
    let content = fs::read_to_string(&path).ok()?;
    match serde_json::from_str::<Credentials>(&content) {
        Ok(credentials) => {
            info!("load_credentials: restored session for {}", credentials.email);
            Some(credentials)
        }
        Err(e) => {
            warn!("load_credentials: ignoring unreadable {}: {}", CREDENTIALS_FILE, e);
            None
        }
    }
}

pub fn save_credentials(dir: &Path, credentials: &Credentials) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let json = serde_json::to_string(credentials)?;
    write_private(&dir.join(CREDENTIALS_FILE), json.as_bytes())
}

pub fn delete_credentials(dir: &Path) -> io::Result<()> {
    let path = dir.join(CREDENTIALS_FILE);
    if path.exists() {
        fs::remove_file(path)?;
        info!("delete_credentials: {} deleted", CREDENTIALS_FILE);
    }
    Ok(())
}

fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn credentials() -> Credentials {
        Credentials {
            user_id: "uid-1".to_string(),
            email: "a@b.com".to_string(),
            id_token: "id".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn first_run_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(dir.path());
        assert_eq!(config.firebase.auth_url, DEFAULT_AUTH_URL);
        assert_eq!(config.display.utc_offset_minutes, 540);
        assert!(dir.path().join(CONFIG_FILE).exists());

        let reread = load_config(dir.path());
        assert_eq!(reread.firebase.firestore_url, DEFAULT_FIRESTORE_URL);
    }

    #[test]
    fn partial_config_keeps_defaults_for_missing_keys() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "[firebase]\napi_key = \"k\"\nproject_id = \"p\"\n",
        )
        .unwrap();
        let config = load_config(dir.path());
        assert_eq!(config.firebase.api_key, "k");
        assert_eq!(config.firebase.project_id, "p");
        assert_eq!(config.firebase.token_url, DEFAULT_TOKEN_URL);
        assert_eq!(config.firebase.request_timeout_secs, 10);
        assert_eq!(config.display.utc_offset_minutes, 540);
    }

    #[test]
    fn corrupted_config_is_backed_up() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "this is = = not toml").unwrap();
        let config = load_config(dir.path());
        assert!(config.firebase.api_key.is_empty());
        assert!(dir.path().join("config.toml.bak").exists());
    }

    #[test]
    fn credentials_round_trip_and_delete() {
        let dir = TempDir::new().unwrap();
        assert!(load_credentials(dir.path()).is_none());

        save_credentials(dir.path(), &credentials()).unwrap();
        assert_eq!(load_credentials(dir.path()), Some(credentials()));

        delete_credentials(dir.path()).unwrap();
        assert!(load_credentials(dir.path()).is_none());
        delete_credentials(dir.path()).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn credentials_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        save_credentials(dir.path(), &credentials()).unwrap();
        let mode = fs::metadata(dir.path().join(CREDENTIALS_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn garbage_credentials_are_ignored() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CREDENTIALS_FILE), "{not json").unwrap();
        assert!(load_credentials(dir.path()).is_none());
    }
}
