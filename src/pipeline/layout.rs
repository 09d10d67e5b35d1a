//! Signature-page layout: an amount table above a two-column signature block.
//!
//! # Coordinate System
//!
//! PDF user space has its origin at the bottom-left corner, X to the right and
//! Y upward. Every position below is derived from the page width and height,
//! so the same layout works on Letter, A4 or any other single-column size the
//! source document uses.
//!
//! ```text
//!  ┌──────────────────────────────────────────────┐
//!  │ Investment Summary                           │
//!  │ Window Installation - Acme        $1,000.00  │
//!  │ ──────────────────────────────────────────── │
//!  │ Window Installation - Acme (...)    $850.00  │
//!  │ ──────────────────────────────────────────── │
//!  │                                              │
//!  │ <sign anchor>                                │
//!  │ ───────────────────    ───────────────────   │
//!  │ Customer Signature     Sales Office          │
//!  │ <date anchor>                                │
//!  │ ───────────────────    ───────────────────   │
//!  │ Date                   Date                  │
//!  │ Jane Doe                                     │
//!  │ ───────────────────                          │
//!  │ Printed Name                                 │
//!  └──────────────────────────────────────────────┘
//! ```

use crate::config::AnchorStyle;
use lopdf::content::{Content, Operation};
use lopdf::{Object, StringFormat};

/// Resource name of the Helvetica font on rendered pages.
pub const FONT_RESOURCE: &str = "F1";

/// Resource name of the ExtGState used for translucent anchors.
pub const ANCHOR_GS_RESOURCE: &str = "GSAnchor";

/// Label used when the request carries no manufacturer.
pub const DEFAULT_MANUFACTURER: &str = "Standard Product";

/// Reference width (US Letter) the point sizes below are tuned for.
const REFERENCE_WIDTH: f32 = 612.0;

const MARGIN_RATIO: f32 = 0.08;
const COLUMN_GAP_RATIO: f32 = 0.06;
const TABLE_TOP_RATIO: f32 = 0.12;

const HEADING_SIZE: f32 = 14.0;
const BODY_SIZE: f32 = 11.0;
const CAPTION_SIZE: f32 = 9.0;
const ROW_HEIGHT: f32 = 28.0;
const RULE_DROP: f32 = 8.0;
const BLOCK_GAP: f32 = 64.0;
const FIELD_GAP: f32 = 52.0;
const TEXT_LIFT: f32 = 5.0;
const CAPTION_DROP: f32 = 13.0;

/// Data printed on a signature page.
#[derive(Debug, Clone, Default)]
pub struct SignaturePageContent {
    /// Printed under the customer signature. Blank when absent.
    pub customer_name: Option<String>,
    /// Row 1 amount.
    pub total_amount: f64,
    /// Subtracted from the total for row 2.
    pub permit_fee: f64,
    pub manufacturer: Option<String>,
    /// Service description, e.g. "Window Installation".
    pub service_label: String,
}

impl SignaturePageContent {
    fn manufacturer_label(&self) -> &str {
        match self.manufacturer.as_deref().map(str::trim) {
            Some(m) if !m.is_empty() => m,
            _ => DEFAULT_MANUFACTURER,
        }
    }

    fn line_item_label(&self) -> String {
        let service = self.service_label.trim();
        if service.is_empty() {
            self.manufacturer_label().to_string()
        } else {
            format!("{} - {}", service, self.manufacturer_label())
        }
    }

    /// Total minus permit fee.
    pub fn net_amount(&self) -> f64 {
        self.total_amount - self.permit_fee
    }
}

/// Build the content stream of one signature page.
pub fn render_signature_page(
    width: f32,
    height: f32,
    content: &SignaturePageContent,
    sign_anchor: &str,
    date_anchor: &str,
    style: &AnchorStyle,
) -> Content {
    let scale = (width / REFERENCE_WIDTH).clamp(0.5, 2.5);
    let margin = width * MARGIN_RATIO;
    let gap = width * COLUMN_GAP_RATIO;
    let column = (width - 2.0 * margin - gap) / 2.0;
    let left_x = margin;
    let right_x = margin + column + gap;
    let right_edge = width - margin;

    let mut page = PageBuilder::default();

    // ---------- AMOUNT TABLE ----------
    let heading_y = height - height * TABLE_TOP_RATIO;
    page.text(left_x, heading_y, HEADING_SIZE * scale, "Investment Summary", BLACK);

    let label = content.line_item_label();
    let rows = [
        (label.clone(), content.total_amount),
        (format!("{label} (less permit fee)"), content.net_amount()),
    ];
    let body = BODY_SIZE * scale;
    let mut row_y = heading_y;
    for (text, amount) in &rows {
        row_y -= ROW_HEIGHT * scale;
        let amount = format_currency(*amount);
        let amount_width = text_width(&amount, body);
        let label_room = (right_edge - left_x) - amount_width - 12.0 * scale;
        page.text(left_x, row_y, body, &fit_text(text, body, label_room), BLACK);
        page.text(right_edge - amount_width, row_y, body, &amount, BLACK);
        page.rule(left_x, right_edge, row_y - RULE_DROP * scale);
    }

    // ---------- SIGNATURE BLOCK ----------
    let caption = CAPTION_SIZE * scale;
    let sign_y = row_y - BLOCK_GAP * scale;
    let date_y = sign_y - FIELD_GAP * scale;
    let name_y = date_y - FIELD_GAP * scale;
    let lift = TEXT_LIFT * scale;
    let drop = CAPTION_DROP * scale;

    // Left column: customer
    page.anchor(left_x, sign_y + lift, sign_anchor, style, scale);
    page.rule(left_x, left_x + column, sign_y);
    page.text(left_x, sign_y - drop, caption, "Customer Signature", BLACK);

    page.anchor(left_x, date_y + lift, date_anchor, style, scale);
    page.rule(left_x, left_x + column, date_y);
    page.text(left_x, date_y - drop, caption, "Date", BLACK);

    let name = content.customer_name.as_deref().unwrap_or("").trim();
    if !name.is_empty() {
        page.text(left_x, name_y + lift, body, &fit_text(name, body, column), BLACK);
    }
    page.rule(left_x, left_x + column, name_y);
    page.text(left_x, name_y - drop, caption, "Printed Name", BLACK);

    // Right column: sales office, no anchors
    page.rule(right_x, right_x + column, sign_y);
    page.text(right_x, sign_y - drop, caption, "Sales Office", BLACK);
    page.rule(right_x, right_x + column, date_y);
    page.text(right_x, date_y - drop, caption, "Date", BLACK);

    Content {
        operations: page.ops,
    }
}

// ── Content-stream builder ──────────────────────────────────────────────────

const BLACK: [f32; 3] = [0.0, 0.0, 0.0];

#[derive(Default)]
struct PageBuilder {
    ops: Vec<Operation>,
}

impl PageBuilder {
    fn text(&mut self, x: f32, y: f32, size: f32, text: &str, color: [f32; 3]) {
        self.ops.extend([
            Operation::new("BT", vec![]),
            Operation::new(
                "Tf",
                vec![Object::Name(FONT_RESOURCE.as_bytes().to_vec()), real(size)],
            ),
            Operation::new("rg", color.iter().map(|&c| real(c)).collect()),
            Operation::new("Td", vec![real(x), real(y)]),
            Operation::new(
                "Tj",
                vec![Object::String(encode_win_ansi(text), StringFormat::Literal)],
            ),
            Operation::new("ET", vec![]),
        ]);
    }

    fn anchor(&mut self, x: f32, y: f32, text: &str, style: &AnchorStyle, scale: f32) {
        let translucent = style.opacity < 1.0;
        self.ops.push(Operation::new("q", vec![]));
        if translucent {
            self.ops.push(Operation::new(
                "gs",
                vec![Object::Name(ANCHOR_GS_RESOURCE.as_bytes().to_vec())],
            ));
        }
        self.text(x, y, style.font_size * scale, text, style.color);
        self.ops.push(Operation::new("Q", vec![]));
    }

    fn rule(&mut self, x1: f32, x2: f32, y: f32) {
        self.ops.extend([
            Operation::new("w", vec![real(1.0)]),
            Operation::new("RG", vec![real(0.0), real(0.0), real(0.0)]),
            Operation::new("m", vec![real(x1), real(y)]),
            Operation::new("l", vec![real(x2), real(y)]),
            Operation::new("S", vec![]),
        ]);
    }
}

fn real(v: f32) -> Object {
    Object::Real((v * 100.0).round() / 100.0)
}

// ── Text helpers ────────────────────────────────────────────────────────────

/// Format an amount as US currency: `$1,234.50`, `-$12.00`.
///
/// Rounds half away from zero to whole cents.
pub fn format_currency(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let dollars = cents / 100;
    let digits = dollars.to_string();

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}${grouped}.{:02}", cents % 100)
}

/// Helvetica advance widths (1/1000 em) for ASCII 32..=126.
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

/// Width of `text` in points when set in Helvetica at `size`.
pub fn text_width(text: &str, size: f32) -> f32 {
    let units: u32 = text
        .chars()
        .map(|c| match c as u32 {
            code @ 32..=126 => u32::from(HELVETICA_WIDTHS[(code - 32) as usize]),
            // Latin-1 letters: close enough to a lowercase average
            _ => 556,
        })
        .sum();
    units as f32 * size / 1000.0
}

/// Shorten `text` with a trailing "..." until it fits `max_width`.
fn fit_text(text: &str, size: f32, max_width: f32) -> String {
    if text_width(text, size) <= max_width {
        return text.to_string();
    }
    let mut chars: Vec<char> = text.chars().collect();
    while !chars.is_empty() {
        chars.pop();
        let candidate: String = chars.iter().collect::<String>() + "...";
        if text_width(&candidate, size) <= max_width {
            return candidate;
        }
    }
    String::new()
}

/// Encode for a WinAnsi Type1 font. Characters outside Latin-1 become `?`.
fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            0x20..=0x7E | 0xA0..=0xFF => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SignaturePageContent {
        SignaturePageContent {
            customer_name: Some("Jane Doe".into()),
            total_amount: 1000.0,
            permit_fee: 150.0,
            manufacturer: Some("Acme".into()),
            service_label: "Window Installation".into(),
        }
    }

    fn encoded(content: &Content) -> String {
        String::from_utf8_lossy(&content.encode().unwrap()).into_owned()
    }

    #[test]
    fn currency_formatting() {
        assert_eq!(format_currency(0.0), "$0.00");
        assert_eq!(format_currency(850.0), "$850.00");
        assert_eq!(format_currency(1000.0), "$1,000.00");
        assert_eq!(format_currency(1234567.891), "$1,234,567.89");
        assert_eq!(format_currency(0.005), "$0.01");
        assert_eq!(format_currency(999.999), "$1,000.00");
        assert_eq!(format_currency(-50.0), "-$50.00");
        assert_eq!(format_currency(-0.001), "$0.00");
    }

    #[test]
    fn renders_amounts_and_anchors() {
        let style = AnchorStyle::default();
        let c = render_signature_page(612.0, 792.0, &sample(), "##SIGN_X##", "##DATE_HERE##", &style);
        let s = encoded(&c);
        assert!(s.contains("($1,000.00)"), "{s}");
        assert!(s.contains("($850.00)"), "{s}");
        assert!(s.contains("(##SIGN_X##)"));
        assert!(s.contains("(##DATE_HERE##)"));
        assert!(s.contains("(Sales Office)"));
        assert!(s.contains("(Jane Doe)"));
        assert!(s.contains("Acme"));
    }

    #[test]
    fn anchors_use_configured_colour() {
        let style = AnchorStyle::default();
        let c = render_signature_page(612.0, 792.0, &sample(), "##S##", "##D##", &style);
        let ops = &c.operations;
        let anchor_at = ops
            .iter()
            .position(|op| {
                op.operator == "Tj"
                    && matches!(op.operands.first(), Some(Object::String(s, _)) if s == b"##S##")
            })
            .unwrap();
        let rg = ops[..anchor_at]
            .iter()
            .rev()
            .find(|op| op.operator == "rg")
            .unwrap();
        let components: Vec<f32> = rg
            .operands
            .iter()
            .map(|o| match o {
                Object::Real(v) => *v,
                other => panic!("unexpected operand {other:?}"),
            })
            .collect();
        assert_eq!(components, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn translucent_anchor_uses_graphics_state() {
        let style = AnchorStyle {
            opacity: 0.0,
            ..AnchorStyle::default()
        };
        let c = render_signature_page(612.0, 792.0, &sample(), "##S##", "##D##", &style);
        let gs_count = c.operations.iter().filter(|op| op.operator == "gs").count();
        assert_eq!(gs_count, 2);

        let opaque = render_signature_page(612.0, 792.0, &sample(), "##S##", "##D##", &AnchorStyle::default());
        assert!(opaque.operations.iter().all(|op| op.operator != "gs"));
    }

    #[test]
    fn missing_fields_fall_back() {
        let content = SignaturePageContent {
            customer_name: None,
            manufacturer: Some("   ".into()),
            ..sample()
        };
        let s = encoded(&render_signature_page(595.0, 842.0, &content, "##S##", "##D##", &AnchorStyle::default()));
        assert!(s.contains(DEFAULT_MANUFACTURER));
        assert!(!s.contains("Jane"));
        assert!(s.contains("(Printed Name)"));
    }

    #[test]
    fn layout_scales_with_page_size() {
        let small = render_signature_page(300.0, 400.0, &sample(), "##S##", "##D##", &AnchorStyle::default());
        let large = render_signature_page(1224.0, 1584.0, &sample(), "##S##", "##D##", &AnchorStyle::default());
        let max_x = |c: &Content| {
            c.operations
                .iter()
                .filter(|op| op.operator == "l")
                .filter_map(|op| match op.operands[0] {
                    Object::Real(x) => Some(x),
                    _ => None,
                })
                .fold(0.0_f32, f32::max)
        };
        assert!(max_x(&small) <= 300.0);
        assert!(max_x(&large) > 1000.0);
    }

    #[test]
    fn right_alignment_uses_font_metrics() {
        assert!((text_width("0", 10.0) - 5.56).abs() < 1e-4);
        assert!(text_width("$1,000.00", 11.0) > text_width("$850.00", 11.0));
    }

    #[test]
    fn long_labels_are_truncated() {
        let fitted = fit_text(&"W".repeat(200), 11.0, 100.0);
        assert!(fitted.ends_with("..."));
        assert!(text_width(&fitted, 11.0) <= 100.0);
    }

    #[test]
    fn win_ansi_encoding() {
        assert_eq!(encode_win_ansi("Zoë"), vec![b'Z', b'o', 0xEB]);
        assert_eq!(encode_win_ansi("李"), vec![b'?']);
    }
}
