// src/web.rs

use axum::extract::{Form, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tera::{Context, Tera};
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::issue::{self, IssuedOrder, Issuer};
use crate::order::{LineItem, OrderDraft, Party, Totals};

const FORM_TEMPLATE: &str = include_str!("../templates/form.html");
const ISSUED_TEMPLATE: &str = include_str!("../templates/issued.html");
const FAILURE_TEMPLATE: &str = include_str!("../templates/failure.html");

/// What the submit button asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FormAction {
    #[default]
    Recalculate,
    Add,
    Remove(usize),
    Generate,
}

impl FormAction {
    fn parse(value: &str) -> Self {
        match value {
            "add" => Self::Add,
            "generate" => Self::Generate,
            other => other
                .strip_prefix("remove_")
                .and_then(|idx| idx.parse().ok())
                .map_or(Self::Recalculate, Self::Remove),
        }
    }
}

/// One item row exactly as typed, so bad input can be shown back.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FormRow {
    pub name: String,
    pub description: String,
    pub hsn_sac: String,
    pub qty: String,
    pub amount: String,
    pub igst: String,
    pub amount_with_tax: String,
}

impl FormRow {
    fn blank(default_igst: f64) -> Self {
        let item = LineItem::blank(default_igst);
        Self {
            qty: item.qty.to_string(),
            amount: format!("{:.2}", item.unit_amount),
            igst: format!("{:.1}", item.igst),
            ..Self::default()
        }
    }
}

/// The posted form. Item rows only live here, so the list lasts exactly one
/// form session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FormState {
    pub vendor: Party,
    pub deliver_to: Party,
    pub notes: String,
    pub rows: Vec<FormRow>,
    pub upload: bool,
    #[serde(skip)]
    pub action: FormAction,
}

#[derive(Debug, Serialize)]
struct TotalsView {
    subtotal: String,
    tax: String,
    grand_total: String,
}

impl From<Totals> for TotalsView {
    fn from(t: Totals) -> Self {
        Self {
            subtotal: format!("{:.2}", t.subtotal),
            tax: format!("{:.2}", t.tax),
            grand_total: format!("{:.2}", t.grand_total),
        }
    }
}

fn parse_field<T: std::str::FromStr>(
    raw: &str,
    item: usize,
    field: &str,
    problems: &mut Vec<String>,
) -> Option<T> {
    let parsed = raw.trim().parse().ok();
    if parsed.is_none() {
        problems.push(format!("item {item}: {field} is not a number ({raw:?})"));
    }
    parsed
}

impl FormState {
    pub fn new(default_igst: f64) -> Self {
        Self {
            rows: vec![FormRow::blank(default_igst)],
            upload: true,
            ..Self::default()
        }
    }

    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        let mut form = Self::default();
        let mut rows: BTreeMap<usize, FormRow> = BTreeMap::new();

        for (key, value) in pairs {
            match key.as_str() {
                "vendor_name" => form.vendor.name = value.clone(),
                "vendor_line1" => form.vendor.address_line1 = value.clone(),
                "vendor_line2" => form.vendor.address_line2 = value.clone(),
                "vendor_gstin" => form.vendor.gstin = value.clone(),
                "vendor_contact" => form.vendor.contact = value.clone(),
                "deliver_name" => form.deliver_to.name = value.clone(),
                "deliver_line1" => form.deliver_to.address_line1 = value.clone(),
                "deliver_line2" => form.deliver_to.address_line2 = value.clone(),
                "deliver_gstin" => form.deliver_to.gstin = value.clone(),
                "deliver_contact" => form.deliver_to.contact = value.clone(),
                "notes" => form.notes = value.clone(),
                "upload" => form.upload = true,
                "action" => form.action = FormAction::parse(value),
                _ => {
                    let Some((field, idx)) = key.rsplit_once('_') else {
                        continue;
                    };
                    let Ok(idx) = idx.parse::<usize>() else {
                        continue;
                    };
                    let row = rows.entry(idx).or_default();
                    match field {
                        "item_name" => row.name = value.clone(),
                        "description" => row.description = value.clone(),
                        "hsn" => row.hsn_sac = value.clone(),
                        "qty" => row.qty = value.clone(),
                        "amount" => row.amount = value.clone(),
                        "igst" => row.igst = value.clone(),
                        _ => {}
                    }
                }
            }
        }

        form.rows = rows.into_values().collect();
        form
    }

    /// Applies add/remove and refreshes the per-row totals column.
    pub fn apply_action(&mut self, default_igst: f64) {
        match self.action {
            FormAction::Add => self.rows.push(FormRow::blank(default_igst)),
            FormAction::Remove(idx) if idx < self.rows.len() => {
                self.rows.remove(idx);
            }
            _ => {}
        }
    }

    /// Parses the typed rows. Unparseable numbers count as zero and are
    /// reported under the same `item N: field` prefix validation uses.
    fn parse_rows(&self) -> (Vec<LineItem>, Vec<String>) {
        let mut problems = Vec::new();
        let mut items = Vec::with_capacity(self.rows.len());

        for (idx, row) in self.rows.iter().enumerate() {
            let n = idx + 1;
            let qty = parse_field(&row.qty, n, "quantity", &mut problems).unwrap_or(0);
            let unit_amount = parse_field(&row.amount, n, "amount", &mut problems).unwrap_or(0.0);
            let igst = parse_field(&row.igst, n, "IGST%", &mut problems).unwrap_or(0.0);
            items.push(LineItem {
                name: row.name.trim().to_string(),
                description: row.description.trim().to_string(),
                hsn_sac: row.hsn_sac.trim().to_string(),
                qty,
                unit_amount,
                igst,
            });
        }
        (items, problems)
    }

    fn draft(&self) -> (OrderDraft, Vec<String>) {
        let (items, problems) = self.parse_rows();
        let notes = Some(self.notes.trim().to_string()).filter(|n| !n.is_empty());
        let draft = OrderDraft {
            vendor: self.vendor.clone(),
            deliver_to: Some(self.deliver_to.clone()),
            items,
            notes,
        };
        (draft, problems)
    }

    /// The draft to issue, or every problem found in the form.
    pub fn to_draft(&self) -> Result<OrderDraft> {
        let (draft, mut problems) = self.draft();
        if let Err(Error::Validation(found)) = draft.validate() {
            // A field that failed to parse is already reported once.
            let unparsed: Vec<String> = problems
                .iter()
                .filter_map(|p| p.split_once(" is not ").map(|(head, _)| head.to_string()))
                .collect();
            for problem in found {
                if !unparsed.iter().any(|head| problem.starts_with(head.as_str())) {
                    problems.push(problem);
                }
            }
        }
        if problems.is_empty() {
            Ok(draft)
        } else {
            Err(Error::Validation(problems))
        }
    }

    fn refresh_totals(&mut self) -> Totals {
        let (draft, _) = self.draft();
        for (row, item) in self.rows.iter_mut().zip(&draft.items) {
            row.amount_with_tax = format!("{:.2}", item.totals().amount_with_tax);
        }
        draft.totals()
    }
}

pub struct AppState {
    issuer: Issuer,
    templates: Tera,
}

impl AppState {
    pub fn new(issuer: Issuer) -> Result<Self> {
        let mut templates = Tera::default();
        templates.add_raw_templates(vec![
            ("form.html", FORM_TEMPLATE),
            ("issued.html", ISSUED_TEMPLATE),
            ("failure.html", FAILURE_TEMPLATE),
        ])?;
        Ok(Self { issuer, templates })
    }

    fn default_igst(&self) -> f64 {
        self.issuer.config().tax.default_igst
    }

    async fn form_page(&self, form: &mut FormState, problems: &[String]) -> Result<String> {
        let po_id = self.issuer.preview_id().await?;
        let totals = form.refresh_totals();
        let mut ctx = Context::new();
        ctx.insert("form", &*form);
        ctx.insert("problems", problems);
        ctx.insert("totals", &TotalsView::from(totals));
        ctx.insert("uploads_enabled", &self.issuer.uploads_enabled());
        ctx.insert("po_id", &po_id.to_string());
        Ok(self.templates.render("form.html", &ctx)?)
    }

    fn issued_page(&self, issued: &IssuedOrder, vendor: &str) -> Result<String> {
        let mut ctx = Context::new();
        ctx.insert("po_id", &issued.po_id.to_string());
        ctx.insert("issued_on", &issued.issued_on);
        ctx.insert("vendor", vendor);
        ctx.insert("totals", &TotalsView::from(issued.totals));
        ctx.insert("drive_file_id", &issued.drive_file_id);
        Ok(self.templates.render("issued.html", &ctx)?)
    }

    /// Logs the real error; the user only sees the generic notice.
    fn failure(&self, err: &Error) -> Response {
        error!(error = %err, "Request failed");
        let body = self
            .templates
            .render("failure.html", &Context::new())
            .unwrap_or_else(|_| "Something went wrong.".to_string());
        (StatusCode::INTERNAL_SERVER_ERROR, Html(body)).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(show_form).post(submit_form))
        .route("/orders/{po_id}/pdf", get(download_pdf))
        .with_state(state)
}

pub async fn serve(issuer: Issuer, bind: SocketAddr) -> Result<()> {
    let state = Arc::new(AppState::new(issuer)?);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %bind, "Purchase order form listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn show_form(State(state): State<Arc<AppState>>) -> Response {
    let mut form = FormState::new(state.default_igst());
    match state.form_page(&mut form, &[]).await {
        Ok(html) => Html(html).into_response(),
        Err(e) => state.failure(&e),
    }
}

async fn submit_form(
    State(state): State<Arc<AppState>>,
    Form(pairs): Form<Vec<(String, String)>>,
) -> Response {
    let mut form = FormState::from_pairs(&pairs);

    if form.action != FormAction::Generate {
        form.apply_action(state.default_igst());
        return match state.form_page(&mut form, &[]).await {
            Ok(html) => Html(html).into_response(),
            Err(e) => state.failure(&e),
        };
    }

    let result = match form.to_draft() {
        Ok(draft) => state
            .issuer
            .issue(&draft, form.upload)
            .await
            .map(|issued| (issued, draft.vendor.name)),
        Err(e) => Err(e),
    };

    match result {
        Ok((issued, vendor)) => match state.issued_page(&issued, &vendor) {
            Ok(html) => Html(html).into_response(),
            Err(e) => state.failure(&e),
        },
        Err(Error::Validation(problems)) => {
            warn!(problems = problems.len(), "Order rejected");
            match state.form_page(&mut form, &problems).await {
                Ok(html) => (StatusCode::UNPROCESSABLE_ENTITY, Html(html)).into_response(),
                Err(e) => state.failure(&e),
            }
        }
        Err(e) => state.failure(&e),
    }
}

async fn download_pdf(
    State(state): State<Arc<AppState>>,
    Path(po_id): Path<String>,
) -> Response {
    let record = match state.issuer.register().and_then(|r| r.get(&po_id)) {
        Ok(Some(record)) => record,
        Ok(None) => return (StatusCode::NOT_FOUND, "No such purchase order").into_response(),
        Err(e) => return state.failure(&e),
    };

    match tokio::fs::read(&record.local_path).await {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, "application/pdf".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", issue::download_name(&record.po_id)),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => state.failure(&e.into()),
    }
}
