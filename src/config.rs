use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::{fs, net::SocketAddr};
use toml_edit::{DocumentMut, Item, Table, value};

use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_PATH: &str = ".config/po_cli.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub company: CompanyConfig,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_register_path")]
    pub register_path: PathBuf,
    #[serde(default)]
    pub counter: CounterConfig,
    #[serde(default)]
    pub tax: TaxConfig,
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(rename = "drive_oauth")]
    pub oauth: Option<OAuthConfig>,
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("purchase_orders")
}

fn default_register_path() -> PathBuf {
    PathBuf::from("purchase_orders/register.db")
}

/// The issuing company, printed in the top-left block of every PO.
#[derive(Debug, Clone, Deserialize)]
pub struct CompanyConfig {
    pub name: String,
    #[serde(default)]
    pub address_lines: Vec<String>,
    pub gstin: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
}

impl CompanyConfig {
    /// Lines under the bold company name.
    pub fn detail_lines(&self) -> Vec<String> {
        let mut lines = self.address_lines.clone();
        if let Some(gstin) = &self.gstin {
            lines.push(format!("GSTIN {gstin}"));
        }
        lines.extend(self.phone.iter().cloned());
        lines.extend(self.email.iter().cloned());
        lines.extend(self.website.iter().cloned());
        lines
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterBackend {
    #[default]
    Local,
    Drive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterModeConfig {
    #[default]
    Increment,
    Reserve,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CounterConfig {
    #[serde(default)]
    pub backend: CounterBackend,
    #[serde(default)]
    pub mode: CounterModeConfig,
    #[serde(default = "default_counter_path")]
    pub path: PathBuf,
    #[serde(default = "default_counter_file_name")]
    pub file_name: String,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            backend: CounterBackend::default(),
            mode: CounterModeConfig::default(),
            path: default_counter_path(),
            file_name: default_counter_file_name(),
        }
    }
}

fn default_counter_path() -> PathBuf {
    PathBuf::from("purchase_orders/last_po_id.txt")
}

fn default_counter_file_name() -> String {
    "last_po_id.txt".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaxConfig {
    #[serde(default = "default_igst")]
    pub default_igst: f64,
}

impl Default for TaxConfig {
    fn default() -> Self {
        Self {
            default_igst: default_igst(),
        }
    }
}

fn default_igst() -> f64 {
    18.0
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DriveConfig {
    /// Upload each issued PO to the drive folder tree.
    #[serde(default)]
    pub upload: bool,
    /// ID of the "Purchase Orders" root folder.
    pub root_folder_id: Option<String>,
    /// Overrides the Google API host.
    pub api_base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default)]
    pub tokens: Option<Tokens>,
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tokens {
    pub refresh_token: Option<String>,
    pub access_token: Option<String>,
    /// RFC 3339 timestamp.
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8501))
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| Error::ConfigLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&content).map_err(|message| Error::ConfigLoad {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn parse(content: &str) -> std::result::Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    pub fn oauth(&self) -> Result<&OAuthConfig> {
        self.oauth.as_ref().ok_or_else(|| {
            Error::OAuth("no [drive_oauth] section in the configuration".to_string())
        })
    }

    /// Rewrite `[drive_oauth.tokens]` in place, leaving the rest of the file untouched.
    pub fn update_tokens(
        path: impl AsRef<Path>,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
        expires_at: Option<&str>,
    ) -> Result<()> {
        let content = fs::read_to_string(&path)?;
        let mut doc = content.parse::<DocumentMut>().map_err(|e| Error::ConfigLoad {
            path: path.as_ref().to_path_buf(),
            message: e.to_string(),
        })?;

        let oauth = doc["drive_oauth"].or_insert(Item::Table(Table::new()));
        let tokens = oauth["tokens"].or_insert(Item::Table(Table::new()));
        if let Some(token) = access_token {
            tokens["access_token"] = value(token);
        }
        if let Some(token) = refresh_token {
            tokens["refresh_token"] = value(token);
        }
        if let Some(at) = expires_at {
            tokens["expires_at"] = value(at);
        }

        fs::write(&path, doc.to_string())?;
        Ok(())
    }
}
