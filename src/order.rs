// src/order.rs

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::error::{Error, Result};

/// A name-and-address block: the vendor, or the deliver-to party.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    #[serde(default)]
    pub address_line1: String,
    #[serde(default)]
    pub address_line2: String,
    #[serde(default)]
    pub gstin: String,
    #[serde(default)]
    pub contact: String,
}

impl Party {
    /// Lines printed under the block heading. Empty fields are skipped.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for line in [&self.name, &self.address_line1, &self.address_line2] {
            if !line.trim().is_empty() {
                lines.push(line.trim().to_string());
            }
        }
        if !self.gstin.trim().is_empty() {
            lines.push(format!("GSTIN {}", self.gstin.trim()));
        }
        if !self.contact.trim().is_empty() {
            lines.push(format!("Contact: {}", self.contact.trim()));
        }
        lines
    }

    fn is_blank(&self) -> bool {
        self.lines().is_empty()
    }
}

/// A single purchase order line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hsn_sac: String,
    pub qty: u32,
    pub unit_amount: f64,
    /// IGST rate in percent.
    #[serde(default = "default_igst")]
    pub igst: f64,
}

fn default_igst() -> f64 {
    18.0
}

impl LineItem {
    /// The blank row the form adds on "Add New Item Row".
    pub fn blank(igst: f64) -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            hsn_sac: String::new(),
            qty: 1,
            unit_amount: 0.0,
            igst,
        }
    }

    pub fn totals(&self) -> LineTotals {
        let amount = f64::from(self.qty) * self.unit_amount;
        let tax = amount * self.igst / 100.0;
        LineTotals {
            amount,
            tax,
            amount_with_tax: amount + tax,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LineTotals {
    /// qty × unit amount
    pub amount: f64,
    pub tax: f64,
    pub amount_with_tax: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Totals {
    pub subtotal: f64,
    pub tax: f64,
    pub grand_total: f64,
}

/// Everything the user entered for one purchase order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub vendor: Party,
    #[serde(default)]
    pub deliver_to: Option<Party>,
    #[serde(default)]
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl OrderDraft {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::DraftLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn totals(&self) -> Totals {
        let mut totals = Totals::default();
        for line in self.items.iter().map(LineItem::totals) {
            totals.subtotal += line.amount;
            totals.tax += line.tax;
        }
        totals.grand_total = totals.subtotal + totals.tax;
        totals
    }

    /// Deliver-to block, if one was entered with any content.
    pub fn deliver_to(&self) -> Option<&Party> {
        self.deliver_to.as_ref().filter(|p| !p.is_blank())
    }

    /// Collects every problem with the draft instead of stopping at the first.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.vendor.name.trim().is_empty() {
            problems.push("vendor name is empty".to_string());
        }
        if self.items.is_empty() {
            problems.push("the order has no line items".to_string());
        }
        for (idx, item) in self.items.iter().enumerate() {
            let row = idx + 1;
            if item.qty == 0 {
                problems.push(format!("item {row}: quantity must be at least 1"));
            }
            if !item.unit_amount.is_finite() || item.unit_amount < 0.0 {
                problems.push(format!("item {row}: amount must be zero or more"));
            }
            if !(0.0..=100.0).contains(&item.igst) {
                problems.push(format!("item {row}: IGST% must be between 0 and 100"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(problems))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, qty: u32, unit_amount: f64, igst: f64) -> LineItem {
        LineItem {
            name: name.to_string(),
            description: String::new(),
            hsn_sac: "8471".to_string(),
            qty,
            unit_amount,
            igst,
        }
    }

    fn draft(items: Vec<LineItem>) -> OrderDraft {
        OrderDraft {
            vendor: Party {
                name: "Soft Source Pte Ltd".into(),
                ..Party::default()
            },
            items,
            ..OrderDraft::default()
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_line_totals() {
        let line = item("Monitor", 2, 20000.0, 18.0).totals();
        assert!(close(line.amount, 40000.0));
        assert!(close(line.tax, 7200.0));
        assert!(close(line.amount_with_tax, 47200.0));
    }

    #[test]
    fn test_order_totals_sum_across_items() {
        let order = draft(vec![
            item("Laptop", 1, 80000.0, 18.0),
            item("Monitor", 2, 20000.0, 18.0),
            item("Mouse", 5, 500.0, 5.0),
        ]);
        let totals = order.totals();
        assert!(close(totals.subtotal, 80000.0 + 40000.0 + 2500.0));
        assert!(close(totals.tax, 14400.0 + 7200.0 + 125.0));
        assert!(close(totals.grand_total, totals.subtotal + totals.tax));
    }

    #[test]
    fn test_uniform_rate_matches_subtotal_times_rate() {
        let order = draft(vec![
            item("A", 3, 99.99, 18.0),
            item("B", 7, 12.5, 18.0),
        ]);
        let totals = order.totals();
        assert!(close(totals.tax, totals.subtotal * 0.18));
    }

    #[test]
    fn test_empty_order_totals_are_zero() {
        assert_eq!(draft(vec![]).totals(), Totals::default());
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let mut order = draft(vec![item("", 0, -1.0, 120.0)]);
        order.vendor.name = "  ".into();
        let Err(Error::Validation(problems)) = order.validate() else {
            panic!("expected validation error");
        };
        assert_eq!(problems.len(), 4);
        assert_eq!(problems[0], "vendor name is empty");
        assert!(problems.iter().any(|p| p.contains("IGST%")));
    }

    #[test]
    fn test_validate_rejects_empty_order() {
        let err = draft(vec![]).validate().unwrap_err();
        assert!(err.to_string().contains("no line items"));
    }

    #[test]
    fn test_validate_accepts_good_order() {
        assert!(draft(vec![item("Laptop", 1, 80000.0, 18.0)]).validate().is_ok());
    }

    #[test]
    fn test_party_lines_skip_blank_fields() {
        let party = Party {
            name: "Acme".into(),
            address_line1: "1 Main Road".into(),
            address_line2: "".into(),
            gstin: "03AAAAA0000A1Z5".into(),
            contact: "9876543210".into(),
        };
        assert_eq!(
            party.lines(),
            vec![
                "Acme".to_string(),
                "1 Main Road".to_string(),
                "GSTIN 03AAAAA0000A1Z5".to_string(),
                "Contact: 9876543210".to_string(),
            ]
        );
    }

    #[test]
    fn test_blank_deliver_to_is_ignored() {
        let mut order = draft(vec![]);
        order.deliver_to = Some(Party::default());
        assert!(order.deliver_to().is_none());
    }

    #[test]
    fn test_load_draft_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("draft.toml");
        fs::write(
            &path,
            r#"
notes = "Deliver before month end"

[vendor]
name = "Soft Source Pte Ltd"
gstin = "XXXXXXXXXXX"

[[items]]
name = "Laptop"
description = "Intel i7, 16GB RAM"
hsn_sac = "8471"
qty = 1
unit_amount = 80000.0

[[items]]
name = "Mouse"
qty = 5
unit_amount = 500.0
igst = 5.0
"#,
        )
        .unwrap();

        let order = OrderDraft::load(&path).unwrap();
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.items[0].igst, 18.0);
        assert_eq!(order.items[1].igst, 5.0);
        assert_eq!(order.notes.as_deref(), Some("Deliver before month end"));
    }

    #[test]
    fn test_blank_item_name_is_accepted() {
        let order = draft(vec![item("", 1, 0.0, 18.0)]);
        assert!(order.validate().is_ok());
    }

    #[test]
    fn test_bad_draft_file_names_the_draft() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("draft.toml");
        fs::write(&path, "[vendor]\nname = 42\n").unwrap();

        let err = OrderDraft::load(&path).unwrap_err();
        assert!(matches!(&err, Error::DraftLoad { path: p, .. } if *p == path));
        assert!(err.to_string().starts_with("failed to read order draft"));
    }
}
