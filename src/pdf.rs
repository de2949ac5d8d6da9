// src/pdf.rs

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream, dictionary};
use tracing::{debug, info};

use crate::config::CompanyConfig;
use crate::error::Result;
use crate::order::OrderDraft;
use crate::po_id::PoId;

/// A4 in points.
const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 20.0;
/// Content never goes below this line; the page footer sits under it.
const BOTTOM_LIMIT: f32 = 45.0;

const REGULAR: &str = "F1";
const BOLD: &str = "F2";

const BODY_SIZE: f32 = 9.0;
const LINE_HEIGHT: f32 = 11.0;
const CELL_PADDING: f32 = 4.0;
const HEADER_ROW_HEIGHT: f32 = 20.0;
const TOTAL_ROW_HEIGHT: f32 = 18.0;

const HEADERS: [&str; 8] = [
    "S.No",
    "Item",
    "Description",
    "HSN/SAC",
    "Qty",
    "Amount",
    "IGST%",
    "Amount with GST",
];
const COLUMN_WIDTHS: [f32; 8] = [30.0, 80.0, 150.0, 55.0, 35.0, 65.0, 45.0, 95.0];

#[derive(Debug, Clone, Copy, PartialEq)]
enum Align {
    Left,
    Center,
    Right,
}

const COLUMN_ALIGN: [Align; 8] = [
    Align::Center,
    Align::Left,
    Align::Left,
    Align::Center,
    Align::Center,
    Align::Right,
    Align::Center,
    Align::Right,
];

/// Helvetica advance widths for ASCII 32..=126, in 1/1000 em.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // '0'..'9'
    278, 278, 584, 584, 584, 556, 1015, // ':'..'@'
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // 'A'..'M'
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // 'N'..'Z'
    278, 278, 278, 469, 556, 333, // '['..'`'
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // 'a'..'m'
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // 'n'..'z'
    334, 260, 334, 584, // '{'..'~'
];

/// Approximate rendered width of `text` in points.
fn text_width(text: &str, font: &str, size: f32) -> f32 {
    let units: u32 = text
        .chars()
        .map(|c| match c as u32 {
            code @ 32..=126 => u32::from(HELVETICA_WIDTHS[(code - 32) as usize]),
            _ => 556,
        })
        .sum();
    let bold_factor = if font == BOLD { 1.06 } else { 1.0 };
    units as f32 / 1000.0 * size * bold_factor
}

/// Greedy word wrap; words wider than the column are split by character.
fn wrap(text: &str, font: &str, size: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{current} {word}")
            };
            if text_width(&candidate, font, size) <= max_width {
                current = candidate;
                continue;
            }
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            for c in word.chars() {
                current.push(c);
                if text_width(&current, font, size) > max_width && current.chars().count() > 1 {
                    current.pop();
                    lines.push(std::mem::take(&mut current));
                    current.push(c);
                }
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

/// WinAnsi bytes 0x80..=0x9F, which differ from Latin-1.
fn winansi_extra(c: char) -> Option<u8> {
    let byte = match c {
        '€' => 0x80,
        '‚' => 0x82,
        'ƒ' => 0x83,
        '„' => 0x84,
        '…' => 0x85,
        '†' => 0x86,
        '‡' => 0x87,
        'ˆ' => 0x88,
        '‰' => 0x89,
        'Š' => 0x8A,
        '‹' => 0x8B,
        'Œ' => 0x8C,
        'Ž' => 0x8E,
        '‘' => 0x91,
        '’' => 0x92,
        '“' => 0x93,
        '”' => 0x94,
        '•' => 0x95,
        '–' => 0x96,
        '—' => 0x97,
        '˜' => 0x98,
        '™' => 0x99,
        'š' => 0x9A,
        '›' => 0x9B,
        'œ' => 0x9C,
        'ž' => 0x9E,
        'Ÿ' => 0x9F,
        _ => return None,
    };
    Some(byte)
}

/// Base-14 fonts use WinAnsi; anything it cannot show becomes `?`.
fn encode_text(text: &str) -> Vec<u8> {
    text.replace('₹', "Rs.")
        .chars()
        .map(|c| match u32::from(c) {
            // C1 controls have no glyph; WinAnsi reuses these bytes.
            0x80..=0x9F => b'?',
            code @ 0..=0xFF => code as u8,
            _ => winansi_extra(c).unwrap_or(b'?'),
        })
        .collect()
}

fn money(value: f64) -> String {
    format!("{value:.2}")
}

/// Accumulates drawing operations page by page.
struct PageWriter {
    finished: Vec<Vec<Operation>>,
    ops: Vec<Operation>,
    y: f32,
}

impl PageWriter {
    fn new() -> Self {
        Self {
            finished: Vec::new(),
            ops: Vec::new(),
            y: PAGE_HEIGHT - MARGIN,
        }
    }

    fn text(&mut self, font: &str, size: f32, x: f32, y: f32, text: &str) {
        self.ops.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(font.as_bytes().to_vec()), size.into()]),
            Operation::new("Td", vec![x.into(), y.into()]),
            Operation::new("Tj", vec![Object::string_literal(encode_text(text))]),
            Operation::new("ET", vec![]),
        ]);
    }

    fn aligned_text(&mut self, font: &str, size: f32, x: f32, width: f32, y: f32, text: &str, align: Align) {
        let w = text_width(text, font, size);
        let x = match align {
            Align::Left => x + CELL_PADDING,
            Align::Center => x + (width - w) / 2.0,
            Align::Right => x + width - CELL_PADDING - w,
        };
        self.text(font, size, x, y, text);
    }

    fn rect(&mut self, x: f32, y: f32, w: f32, h: f32, fill_gray: Option<f32>) {
        self.ops.push(Operation::new("w", vec![0.5_f32.into()]));
        if let Some(gray) = fill_gray {
            self.ops.extend([
                Operation::new("g", vec![gray.into()]),
                Operation::new("re", vec![x.into(), y.into(), w.into(), h.into()]),
                Operation::new("B", vec![]),
                Operation::new("g", vec![0.into()]),
            ]);
        } else {
            self.ops.extend([
                Operation::new("re", vec![x.into(), y.into(), w.into(), h.into()]),
                Operation::new("S", vec![]),
            ]);
        }
    }

    fn hline(&mut self, x1: f32, x2: f32, y: f32) {
        self.ops.extend([
            Operation::new("w", vec![0.5_f32.into()]),
            Operation::new("m", vec![x1.into(), y.into()]),
            Operation::new("l", vec![x2.into(), y.into()]),
            Operation::new("S", vec![]),
        ]);
    }

    fn fits(&self, height: f32) -> bool {
        self.y - height >= BOTTOM_LIMIT
    }

    fn new_page(&mut self) {
        self.finished.push(std::mem::take(&mut self.ops));
        self.y = PAGE_HEIGHT - MARGIN;
    }

    fn finish(mut self) -> Vec<Vec<Operation>> {
        self.finished.push(self.ops);
        self.finished
    }
}

/// Everything printed on one purchase order.
pub struct PoDocument<'a> {
    pub company: &'a CompanyConfig,
    pub order: &'a OrderDraft,
    pub po_id: PoId,
    pub issued_on: &'a str,
}

impl PoDocument<'_> {
    /// Lays out the purchase order and returns the PDF bytes.
    pub fn render(&self) -> Result<Vec<u8>> {
        let mut page = PageWriter::new();

        self.draw_heading(&mut page);
        self.draw_items(&mut page);
        self.draw_totals(&mut page);
        self.draw_notes(&mut page);
        self.draw_signature(&mut page);

        let pages = page.finish();
        info!(po_id = %self.po_id, pages = pages.len(), items = self.order.items.len(), "PO laid out");
        assemble(pages)
    }

    fn draw_heading(&self, page: &mut PageWriter) {
        let right = PAGE_WIDTH - MARGIN;
        let top = page.y;

        let title = "PURCHASE ORDER";
        page.text(BOLD, 20.0, right - text_width(title, BOLD, 20.0), top - 20.0, title);
        let id_line = format!("PO ID: {}", self.po_id);
        page.text(REGULAR, 11.0, right - text_width(&id_line, REGULAR, 11.0), top - 36.0, &id_line);
        let date_line = format!("Date: {}", self.issued_on);
        page.text(REGULAR, 10.0, right - text_width(&date_line, REGULAR, 10.0), top - 50.0, &date_line);

        // Issuing company, then the optional deliver-to block, down the left side.
        let left_x = MARGIN;
        let block_width = 270.0;
        let mut left_y = top - 20.0;
        page.text(BOLD, 10.0, left_x, left_y, &self.company.name);
        for line in self.company.detail_lines() {
            for wrapped in wrap(&line, REGULAR, BODY_SIZE, block_width) {
                left_y -= LINE_HEIGHT;
                page.text(REGULAR, BODY_SIZE, left_x, left_y, &wrapped);
            }
        }
        if let Some(deliver_to) = self.order.deliver_to() {
            left_y -= LINE_HEIGHT * 1.6;
            page.text(BOLD, 10.0, left_x, left_y, "Deliver to:");
            for line in deliver_to.lines() {
                for wrapped in wrap(&line, REGULAR, BODY_SIZE, block_width) {
                    left_y -= LINE_HEIGHT;
                    page.text(REGULAR, BODY_SIZE, left_x, left_y, &wrapped);
                }
            }
        }

        let right_x = 320.0;
        let mut right_y = top - 72.0;
        page.text(BOLD, 10.0, right_x, right_y, "Vendor:");
        for line in self.order.vendor.lines() {
            for wrapped in wrap(&line, REGULAR, BODY_SIZE, right - right_x) {
                right_y -= LINE_HEIGHT;
                page.text(REGULAR, BODY_SIZE, right_x, right_y, &wrapped);
            }
        }

        page.y = left_y.min(right_y) - 20.0;
    }

    fn draw_table_header(page: &mut PageWriter) {
        let y = page.y - HEADER_ROW_HEIGHT;
        let mut x = MARGIN;
        for (header, width) in HEADERS.iter().zip(COLUMN_WIDTHS) {
            page.rect(x, y, width, HEADER_ROW_HEIGHT, Some(0.8));
            let lines = wrap(header, BOLD, 8.0, width - 2.0 * CELL_PADDING);
            let text_y = y + HEADER_ROW_HEIGHT - 8.0 - (lines.len() as f32 - 1.0) * 4.0;
            for (i, line) in lines.iter().enumerate() {
                page.aligned_text(BOLD, 8.0, x, width, text_y - i as f32 * 8.0, line, Align::Center);
            }
            x += width;
        }
        page.y = y;
    }

    fn draw_items(&self, page: &mut PageWriter) {
        Self::draw_table_header(page);

        for (idx, item) in self.order.items.iter().enumerate() {
            let line = item.totals();
            let cells = [
                (idx + 1).to_string(),
                item.name.clone(),
                item.description.clone(),
                item.hsn_sac.clone(),
                item.qty.to_string(),
                money(line.amount),
                format!("{:.1}", item.igst),
                money(line.amount_with_tax),
            ];
            let wrapped: Vec<Vec<String>> = cells
                .iter()
                .zip(COLUMN_WIDTHS)
                .map(|(cell, width)| wrap(cell, REGULAR, BODY_SIZE, width - 2.0 * CELL_PADDING))
                .collect();
            let max_lines = wrapped.iter().map(Vec::len).max().unwrap_or(1);
            let row_height = max_lines as f32 * LINE_HEIGHT + 2.0 * CELL_PADDING;

            if !page.fits(row_height) {
                debug!(row = idx + 1, "Page break before item row");
                page.new_page();
                Self::draw_table_header(page);
            }

            let y = page.y - row_height;
            let mut x = MARGIN;
            for (col, lines) in wrapped.iter().enumerate() {
                let width = COLUMN_WIDTHS[col];
                page.rect(x, y, width, row_height, None);
                for (i, text) in lines.iter().enumerate() {
                    let text_y = page.y - CELL_PADDING - BODY_SIZE - i as f32 * LINE_HEIGHT;
                    page.aligned_text(REGULAR, BODY_SIZE, x, width, text_y, text, COLUMN_ALIGN[col]);
                }
                x += width;
            }
            page.y = y;
        }
    }

    fn draw_totals(&self, page: &mut PageWriter) {
        let totals = self.order.totals();
        let rows = [
            ("Sub Total", totals.subtotal),
            ("Total IGST", totals.tax),
            ("Grand Total", totals.grand_total),
        ];
        if !page.fits(TOTAL_ROW_HEIGHT * rows.len() as f32) {
            page.new_page();
        }

        let value_width = COLUMN_WIDTHS[7];
        let value_x = MARGIN + COLUMN_WIDTHS[..7].iter().sum::<f32>();
        let label_width = COLUMN_WIDTHS[5] + COLUMN_WIDTHS[6];
        let label_x = value_x - label_width;

        for (label, value) in rows {
            let y = page.y - TOTAL_ROW_HEIGHT;
            let text_y = y + (TOTAL_ROW_HEIGHT - BODY_SIZE) / 2.0 + 1.0;
            page.rect(value_x, y, value_width, TOTAL_ROW_HEIGHT, None);
            page.aligned_text(BOLD, BODY_SIZE, label_x, label_width, text_y, label, Align::Right);
            page.aligned_text(REGULAR, BODY_SIZE, value_x, value_width, text_y, &money(value), Align::Right);
            page.y = y;
        }
    }

    fn draw_notes(&self, page: &mut PageWriter) {
        let Some(notes) = self.order.notes.as_deref().filter(|n| !n.trim().is_empty()) else {
            return;
        };
        page.y -= 14.0;
        if !page.fits(LINE_HEIGHT * 2.0) {
            page.new_page();
        }
        page.y -= LINE_HEIGHT;
        page.text(BOLD, 10.0, MARGIN, page.y, "Notes:");
        for line in wrap(notes, REGULAR, BODY_SIZE, PAGE_WIDTH - 2.0 * MARGIN) {
            if !page.fits(LINE_HEIGHT) {
                page.new_page();
            }
            page.y -= LINE_HEIGHT;
            page.text(REGULAR, BODY_SIZE, MARGIN, page.y, &line);
        }
    }

    fn draw_signature(&self, page: &mut PageWriter) {
        let needed = 60.0;
        if !page.fits(needed) {
            page.new_page();
        }
        page.y -= 45.0;
        page.hline(MARGIN, MARGIN + 150.0, page.y);
        page.y -= 14.0;
        page.text(BOLD, 11.0, MARGIN, page.y, "Authorized Signature");
    }
}

fn footer(page_no: usize, page_count: usize) -> Vec<Operation> {
    let label = format!("Page {page_no} of {page_count}");
    let x = (PAGE_WIDTH - text_width(&label, REGULAR, 8.0)) / 2.0;
    vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![Object::Name(REGULAR.as_bytes().to_vec()), 8.0_f32.into()]),
        Operation::new("Td", vec![x.into(), 20.0_f32.into()]),
        Operation::new("Tj", vec![Object::string_literal(label)]),
        Operation::new("ET", vec![]),
    ]
}

fn font(doc: &mut Document, base: &str) -> ObjectId {
    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => base,
        "Encoding" => "WinAnsiEncoding",
    })
}

/// Wraps per-page operations into a PDF file.
fn assemble(pages: Vec<Vec<Operation>>) -> Result<Vec<u8>> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular_id = font(&mut doc, "Helvetica");
    let bold_id = font(&mut doc, "Helvetica-Bold");
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            REGULAR => regular_id,
            BOLD => bold_id,
        },
    });

    let page_count = pages.len();
    let mut kids: Vec<Object> = Vec::with_capacity(page_count);
    for (idx, mut operations) in pages.into_iter().enumerate() {
        operations.extend(footer(idx + 1, page_count));
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => page_count as i64,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf)?;
    Ok(buf)
}
