//! Printable invoice.

use std::io::BufWriter;

use printpdf::*;

use super::{format_cents, BillingError};
use crate::models::{Branch, Invoice, InvoiceItem, Patient, Payment};

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const TOP: f32 = 280.0;
const BOTTOM: f32 = 20.0;
const LEFT: f32 = 20.0;

/// Column x positions for the line table.
const COL_QTY: f32 = 120.0;
const COL_UNIT: f32 = 140.0;
const COL_TOTAL: f32 = 170.0;

fn pdf_err(context: &str) -> impl Fn(printpdf::Error) -> BillingError + '_ {
    move |e| BillingError::Pdf(format!("{context}: {e}"))
}

/// Text cursor that starts a new page when it runs off the bottom.
struct PageWriter<'a> {
    doc: &'a PdfDocumentReference,
    layer: PdfLayerReference,
    y: Mm,
    pages: usize,
}

impl<'a> PageWriter<'a> {
    fn new(doc: &'a PdfDocumentReference, layer: PdfLayerReference) -> Self {
        Self {
            doc,
            layer,
            y: Mm(TOP),
            pages: 1,
        }
    }

    fn ensure_room(&mut self, needed: f32) {
        if self.y.0 - needed >= BOTTOM {
            return;
        }
        self.pages += 1;
        let (page, layer) = self.doc.add_page(
            Mm(PAGE_WIDTH),
            Mm(PAGE_HEIGHT),
            format!("Layer {}", self.pages),
        );
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.y = Mm(TOP);
    }

    fn text(&self, text: &str, size: f32, x: f32, font: &IndirectFontRef) {
        self.layer.use_text(text, size, Mm(x), self.y, font);
    }

    fn advance(&mut self, mm: f32) {
        self.y -= Mm(mm);
    }
}

/// Render an invoice with its lines and payment history. Returns PDF bytes.
pub fn render_invoice_pdf(
    invoice: &Invoice,
    items: &[InvoiceItem],
    payments: &[Payment],
    patient: &Patient,
    branch: &Branch,
) -> Result<Vec<u8>, BillingError> {
    let title = format!("Invoice {}", invoice.invoice_number);
    let (doc, page1, layer1) = PdfDocument::new(&title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(pdf_err("PDF font error"))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(pdf_err("PDF font error"))?;

    let mut w = PageWriter::new(&doc, doc.get_page(page1).get_layer(layer1));

    // Header
    w.text(&branch.name, 16.0, LEFT, &bold);
    w.advance(6.0);
    w.text(&branch.address, 9.0, LEFT, &font);
    w.advance(4.5);
    if let Some(phone) = &branch.phone {
        w.text(phone, 9.0, LEFT, &font);
        w.advance(4.5);
    }
    w.advance(6.0);

    w.text(&title, 14.0, LEFT, &bold);
    w.advance(6.0);
    w.text(
        &format!("Issued: {}", invoice.created_at.format("%Y-%m-%d")),
        9.0,
        LEFT,
        &font,
    );
    w.advance(4.5);
    w.text(&format!("Due: {}", invoice.due_date), 9.0, LEFT, &font);
    w.advance(4.5);
    w.text(&format!("Status: {}", invoice.status), 9.0, LEFT, &font);
    w.advance(8.0);

    w.text("BILL TO:", 11.0, LEFT, &bold);
    w.advance(5.0);
    w.text(&patient.full_name(), 10.0, LEFT, &font);
    w.advance(4.5);
    for line in [&patient.address, &patient.phone, &patient.email].into_iter().flatten() {
        w.text(line, 9.0, LEFT, &font);
        w.advance(4.5);
    }
    w.advance(6.0);

    // Lines
    w.text("Description", 10.0, LEFT, &bold);
    w.text("Qty", 10.0, COL_QTY, &bold);
    w.text("Unit", 10.0, COL_UNIT, &bold);
    w.text("Total", 10.0, COL_TOTAL, &bold);
    w.advance(6.0);
    for item in items {
        let wrapped = wrap_text(&item.description, 55);
        w.ensure_room(4.5 * wrapped.len() as f32 + 1.5);
        w.text(&item.quantity.to_string(), 9.0, COL_QTY, &font);
        w.text(&format_cents(item.unit_price_cents), 9.0, COL_UNIT, &font);
        w.text(&format_cents(item.line_total_cents), 9.0, COL_TOTAL, &font);
        for line in wrapped {
            w.text(&line, 9.0, LEFT, &font);
            w.advance(4.5);
        }
        w.advance(1.5);
    }
    w.advance(4.0);

    // Totals
    let mut totals = vec![
        ("Subtotal", invoice.subtotal_cents),
        ("Discount", -invoice.discount_cents),
        ("Tax", invoice.tax_cents),
        ("Total", invoice.total_cents),
    ];
    if invoice.insurance_covered_cents > 0 {
        totals.push(("Insurance", -invoice.insurance_covered_cents));
    }
    totals.push(("Paid", -invoice.amount_paid_cents));
    totals.push(("Balance due", invoice.balance_cents()));
    w.ensure_room(5.0 * totals.len() as f32);
    for (label, cents) in totals {
        let face = if matches!(label, "Total" | "Balance due") { &bold } else { &font };
        w.text(label, 10.0, COL_UNIT - 20.0, face);
        w.text(&format_cents(cents), 10.0, COL_TOTAL, face);
        w.advance(5.0);
    }

    // Payment history
    if !payments.is_empty() {
        w.advance(6.0);
        w.ensure_room(12.0);
        w.text("PAYMENTS:", 11.0, LEFT, &bold);
        w.advance(6.0);
        for p in payments {
            w.ensure_room(4.5);
            let mut text = format!(
                "  {}  {}  {}",
                p.paid_at.format("%Y-%m-%d"),
                p.method,
                format_cents(p.amount_cents)
            );
            if let Some(reference) = &p.reference {
                text.push_str(&format!("  ({reference})"));
            }
            w.text(&text, 9.0, LEFT, &font);
            w.advance(4.5);
        }
    }

    if let Some(notes) = invoice.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        w.advance(6.0);
        w.ensure_room(10.0);
        w.text("NOTES:", 11.0, LEFT, &bold);
        w.advance(6.0);
        for line in wrap_text(notes, 90) {
            w.ensure_room(4.5);
            w.text(&line, 9.0, LEFT, &font);
            w.advance(4.5);
        }
    }

    drop(w);
    let mut buf = BufWriter::new(Vec::new());
    doc.save(&mut buf).map_err(pdf_err("PDF save error"))?;
    buf.into_inner()
        .map_err(|e| BillingError::Pdf(format!("PDF buffer error: {e}")))
}

/// Greedy word wrap on character count.
fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + word.chars().count() + 1 > max_chars {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Gender, InvoiceStatus, PaymentMethod};
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    fn sample() -> (Invoice, Patient, Branch) {
        let now = Utc::now();
        let branch = Branch {
            id: Uuid::new_v4(),
            name: "Downtown Clinic".into(),
            address: "1 Main St".into(),
            phone: Some("+15550100".into()),
            email: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let patient = Patient {
            id: Uuid::new_v4(),
            user_id: None,
            branch_id: Some(branch.id),
            first_name: "Ana".into(),
            last_name: "Lopez".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            gender: Gender::Female,
            phone: None,
            email: Some("ana@example.com".into()),
            address: None,
            blood_type: None,
            allergies: None,
            medical_history: None,
            emergency_contact_name: None,
            emergency_contact_phone: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let invoice = Invoice {
            id: Uuid::new_v4(),
            invoice_number: "INV-20300402-0001".into(),
            patient_id: patient.id,
            branch_id: branch.id,
            appointment_id: None,
            subtotal_cents: 15000,
            discount_cents: 0,
            tax_cents: 0,
            total_cents: 15000,
            insurance_covered_cents: 0,
            amount_paid_cents: 5000,
            status: InvoiceStatus::PartiallyPaid,
            due_date: NaiveDate::from_ymd_opt(2030, 5, 2).unwrap(),
            notes: Some("Thank you".into()),
            created_by: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        };
        (invoice, patient, branch)
    }

    fn item(invoice: &Invoice, description: &str) -> InvoiceItem {
        InvoiceItem {
            id: Uuid::new_v4(),
            invoice_id: invoice.id,
            treatment_id: None,
            description: description.into(),
            quantity: 1,
            unit_price_cents: 15000,
            line_total_cents: 15000,
        }
    }

    #[test]
    fn renders_pdf_bytes() {
        let (invoice, patient, branch) = sample();
        let items = vec![item(&invoice, "Consultation")];
        let payments = vec![Payment {
            id: Uuid::new_v4(),
            invoice_id: invoice.id,
            amount_cents: 5000,
            method: PaymentMethod::Card,
            reference: Some("POS-1".into()),
            received_by: None,
            paid_at: Utc::now(),
        }];
        let bytes = render_invoice_pdf(&invoice, &items, &payments, &patient, &branch).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn long_invoices_spill_onto_more_pages() {
        let (invoice, patient, branch) = sample();
        let items: Vec<_> = (0..120).map(|i| item(&invoice, &format!("Line {i}"))).collect();
        let bytes = render_invoice_pdf(&invoice, &items, &[], &patient, &branch).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn wrap_text_breaks_on_words() {
        assert_eq!(wrap_text("one two three", 7), vec!["one two", "three"]);
        assert_eq!(wrap_text("", 10), vec![String::new()]);
    }
}
