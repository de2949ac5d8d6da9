// src/issue.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::{Date, OffsetDateTime, macros::format_description};
use tracing::{info, info_span, warn, Instrument};

use crate::config::{Config, CounterBackend, CounterModeConfig};
use crate::drive_auth::{self, TokenSource};
use crate::error::{Error, Result};
use crate::order::{OrderDraft, Totals};
use crate::pdf::PoDocument;
use crate::po_id::{CounterMode, FileCounter, PoCounter, PoId};
use crate::register::{IssuedRecord, Register};
use crate::storage::{DocumentStore, DriveClient, DriveCounter, LocalStore, PDF_MIME};

/// Result of one "Generate Purchase Order" action.
#[derive(Debug, Clone)]
pub struct IssuedOrder {
    pub po_id: PoId,
    pub issued_on: String,
    pub totals: Totals,
    pub local_path: PathBuf,
    pub drive_file_id: Option<String>,
    pub pdf: Vec<u8>,
}

/// Name offered to the browser on download.
pub fn download_name(po_id: &str) -> String {
    format!("purchase_order_{po_id}.pdf")
}

/// Name the PDF is filed under in the vendor folder.
pub fn archive_file_name(issued_on: &str, po_id: &PoId) -> String {
    format!("{issued_on}_{po_id}.pdf")
}

/// Local date; falls back to UTC when the offset cannot be determined.
pub fn today() -> Date {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .date()
}

pub fn format_date(date: Date) -> String {
    date.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| date.to_string())
}

/// Runs the full issue sequence: ID, PDF, archive, register, upload.
pub struct Issuer {
    config: Config,
    counter: PoCounter,
    archive: LocalStore,
    uploader: Option<Box<dyn DocumentStore>>,
}

impl Issuer {
    pub fn new(
        config: Config,
        counter: PoCounter,
        uploader: Option<Box<dyn DocumentStore>>,
    ) -> Self {
        let archive = LocalStore::new(&config.output_dir);
        Self {
            config,
            counter,
            archive,
            uploader,
        }
    }

    /// Wires counter and uploader from the config. Drive access is only
    /// set up (and the OAuth flow only run) when something needs it.
    pub async fn from_config(config: Config, config_path: &Path) -> Result<Self> {
        let needs_drive = config.drive.upload || config.counter.backend == CounterBackend::Drive;
        let drive = if needs_drive {
            let root = config.drive.root_folder_id.clone().ok_or_else(|| Error::ConfigLoad {
                path: config_path.to_path_buf(),
                message: "drive is in use but [drive].root_folder_id is not set".into(),
            })?;
            let auth = drive_auth::create_authenticator(&config, config_path).await?;
            let source: Arc<dyn TokenSource> = Arc::new(auth);
            let client = DriveClient::new(source, root);
            Some(match &config.drive.api_base_url {
                Some(base) => client.with_base_url(base.clone()),
                None => client,
            })
        } else {
            None
        };

        let mode = match config.counter.mode {
            CounterModeConfig::Increment => CounterMode::Increment,
            CounterModeConfig::Reserve => CounterMode::Reserve,
        };
        let counter = match (&config.counter.backend, &drive) {
            (CounterBackend::Drive, Some(client)) => PoCounter::new(
                Box::new(DriveCounter::new(
                    client.clone(),
                    client.root().to_string(),
                    config.counter.file_name.clone(),
                )),
                mode,
            ),
            _ => PoCounter::new(Box::new(FileCounter::new(&config.counter.path)), mode),
        };

        let uploader: Option<Box<dyn DocumentStore>> = match drive {
            Some(client) if config.drive.upload => Some(Box::new(client)),
            _ => None,
        };

        Ok(Self::new(config, counter, uploader))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn uploads_enabled(&self) -> bool {
        self.uploader.is_some()
    }

    pub fn register(&self) -> Result<Register> {
        Register::open(&self.config.register_path)
    }

    /// The ID the next issue would get. Does not consume it.
    pub async fn preview_id(&self) -> Result<PoId> {
        self.counter.peek(today().year()).await
    }

    pub async fn issue(&self, draft: &OrderDraft, upload: bool) -> Result<IssuedOrder> {
        let span = info_span!("issue", vendor = %draft.vendor.name);
        self.issue_on(draft, today(), upload).instrument(span).await
    }

    /// `issue` with an explicit date.
    pub async fn issue_on(&self, draft: &OrderDraft, date: Date, upload: bool) -> Result<IssuedOrder> {
        draft.validate()?;

        let po_id = self.counter.next(date.year()).await?;
        let issued_on = format_date(date);
        let totals = draft.totals();

        let pdf = PoDocument {
            company: &self.config.company,
            order: draft,
            po_id,
            issued_on: &issued_on,
        }
        .render()?;

        // Refuse before the archive copy of the earlier PO can be overwritten.
        let register = self.register()?;
        if register.get(&po_id.to_string())?.is_some() {
            return Err(Error::DuplicatePoId(po_id.to_string()));
        }

        let file_name = archive_file_name(&issued_on, &po_id);
        let vendor = draft.vendor.name.trim();
        let folder = self.archive.folder(self.archive.root(), vendor).await?;
        let local_path = self.archive.upload(&folder, &file_name, &pdf, PDF_MIME).await?;

        register.record(&IssuedRecord {
            uid: Register::generate_uid(&po_id.to_string(), vendor, &issued_on),
            po_id: po_id.to_string(),
            vendor: vendor.to_string(),
            issued_on: issued_on.clone(),
            item_count: draft.items.len(),
            subtotal: totals.subtotal,
            tax: totals.tax,
            grand_total: totals.grand_total,
            pdf_sha256: Register::digest(&pdf),
            local_path: local_path.clone(),
            drive_file_id: None,
        })?;

        let drive_file_id = match (&self.uploader, upload) {
            (Some(store), true) => {
                let folder = store.folder(store.root(), vendor).await?;
                let id = store.upload(&folder, &file_name, &pdf, PDF_MIME).await?;
                register.set_drive_file_id(&po_id.to_string(), &id)?;
                Some(id)
            }
            (None, true) => {
                warn!("Upload requested but drive uploads are not configured");
                None
            }
            _ => None,
        };

        info!(
            po_id = %po_id,
            grand_total = totals.grand_total,
            local = %local_path,
            drive_file_id = ?drive_file_id,
            "Purchase order issued"
        );

        Ok(IssuedOrder {
            po_id,
            issued_on,
            totals,
            local_path: PathBuf::from(local_path),
            drive_file_id,
            pdf,
        })
    }
}
