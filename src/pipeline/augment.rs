//! Document augmentation: insert and append rendered signature pages.
//!
//! The algorithm:
//! 1. Load the source bytes (parse failure or zero pages → `DocumentParse`)
//! 2. Push inherited page attributes down to every leaf page
//! 3. Read page geometry from the first page's MediaBox
//! 4. Generate one signature anchor for the whole operation
//! 5. With a 1-based index `i`: pad with blank pages until there are at least
//!    `i - 1` pages, then insert a rendered page at 0-based `i - 1`
//! 6. Append a rendered page
//! 7. Rewrite the root page tree as a flat list, drop unreachable objects
//!    and serialise
//!
//! Streams are written uncompressed so anchors stay greppable in the output.

use crate::config::AnchorStyle;
use crate::error::SignPagesError;
use crate::pipeline::anchor;
use crate::pipeline::layout::{self, SignaturePageContent, ANCHOR_GS_RESOURCE, FONT_RESOURCE};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

/// Page attributes a leaf page may inherit from its ancestors.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Guard against cyclic `Parent` chains in malformed files.
const MAX_TREE_DEPTH: usize = 64;

/// US Letter, used when the first page carries no usable MediaBox.
const FALLBACK_GEOMETRY: (f32, f32) = (612.0, 792.0);

/// Output of [`augment`].
#[derive(Debug, Clone)]
pub struct AugmentedDocument {
    /// Serialised merged PDF.
    pub bytes: Vec<u8>,
    /// Signature anchor shared by every rendered page of this document.
    pub sign_anchor: String,
    /// The fixed date anchor.
    pub date_anchor: String,
    /// Pages in the merged document.
    pub page_count: usize,
    /// 1-based positions of the rendered signature pages, ascending.
    pub rendered_pages: Vec<usize>,
}

/// Insert (optionally) and append a signature page to `source`.
///
/// `insert_at` is the 1-based position the inserted page should occupy;
/// `None` skips insertion. The input slice is never modified.
pub fn augment(
    source: &[u8],
    insert_at: Option<usize>,
    content: &SignaturePageContent,
    style: &AnchorStyle,
) -> Result<AugmentedDocument, SignPagesError> {
    let mut doc = Document::load_mem(source)
        .map_err(|e| SignPagesError::DocumentParse(format!("Failed to load PDF: {}", e)))?;

    if doc.is_encrypted() {
        return Err(SignPagesError::DocumentParse(
            "Encrypted documents are not supported".into(),
        ));
    }

    let original: Vec<ObjectId> = doc.get_pages().values().copied().collect();
    if original.is_empty() {
        return Err(SignPagesError::DocumentParse("Document has no pages".into()));
    }

    let pages_id = root_pages_id(&doc)?;
    for &page_id in &original {
        push_down_inherited(&mut doc, page_id);
    }

    let (width, height) = page_geometry(&doc, original[0]);
    let sign_anchor = anchor::sign_anchor();
    let date_anchor = anchor::date_anchor().to_string();
    debug!(
        "Augmenting {}-page document ({}x{} pt), insert_at={:?}",
        original.len(),
        width,
        height,
        insert_at
    );

    let resources_id = add_signature_resources(&mut doc, style);
    let page_content = layout::render_signature_page(
        width,
        height,
        content,
        &sign_anchor,
        &date_anchor,
        style,
    )
    .encode()
    .map_err(|e| SignPagesError::DocumentSerialize(format!("Failed to encode page: {}", e)))?;

    let mut kids = original;
    let mut rendered_pages = Vec::with_capacity(2);

    if let Some(index) = insert_at.filter(|&i| i > 0) {
        let position = index - 1;
        while kids.len() < position {
            let blank = add_blank_page(&mut doc, pages_id, width, height);
            kids.push(blank);
        }
        let page = add_rendered_page(&mut doc, pages_id, width, height, resources_id, &page_content);
        kids.insert(position, page);
        rendered_pages.push(index);
    }

    let page = add_rendered_page(&mut doc, pages_id, width, height, resources_id, &page_content);
    kids.push(page);
    rendered_pages.push(kids.len());

    let page_count = kids.len();
    rewrite_page_tree(&mut doc, pages_id, &kids)?;
    // Intermediate Pages nodes are unreachable after flattening.
    let pruned = doc.prune_objects();
    debug!("Pruned {} unreachable objects", pruned.len());

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| SignPagesError::DocumentSerialize(format!("Failed to save PDF: {}", e)))?;

    Ok(AugmentedDocument {
        bytes,
        sign_anchor,
        date_anchor,
        page_count,
        rendered_pages,
    })
}

// ── Page tree ───────────────────────────────────────────────────────────────

fn root_pages_id(doc: &Document) -> Result<ObjectId, SignPagesError> {
    let parse = |msg: &str| SignPagesError::DocumentParse(msg.to_string());

    let catalog_id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|_| parse("No Root reference in trailer"))?;
    let catalog = doc
        .get_object(catalog_id)
        .and_then(Object::as_dict)
        .map_err(|_| parse("Catalog is not a dictionary"))?;
    catalog
        .get(b"Pages")
        .and_then(Object::as_reference)
        .map_err(|_| parse("Catalog has no Pages reference"))
}

/// Copy attributes the page inherits from its ancestors onto the page itself,
/// so it keeps rendering the same once re-parented to the root.
fn push_down_inherited(doc: &mut Document, page_id: ObjectId) {
    let mut found: Vec<(&[u8], Object)> = Vec::new();

    if let Ok(page) = doc.get_object(page_id).and_then(Object::as_dict) {
        let mut missing: Vec<&[u8]> = INHERITABLE
            .iter()
            .copied()
            .filter(|key| !page.has(key))
            .collect();

        let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
        let mut depth = 0;
        while let (Some(node_id), false) = (parent, missing.is_empty()) {
            depth += 1;
            if depth > MAX_TREE_DEPTH {
                break;
            }
            let Ok(node) = doc.get_object(node_id).and_then(Object::as_dict) else {
                break;
            };
            missing.retain(|key| match node.get(key) {
                Ok(value) => {
                    found.push((*key, value.clone()));
                    false
                }
                Err(_) => true,
            });
            parent = node.get(b"Parent").and_then(Object::as_reference).ok();
        }
    }

    if found.is_empty() {
        return;
    }
    if let Ok(Object::Dictionary(page)) = doc.get_object_mut(page_id) {
        for (key, value) in found {
            page.set(key, value);
        }
    }
}

fn rewrite_page_tree(
    doc: &mut Document,
    pages_id: ObjectId,
    kids: &[ObjectId],
) -> Result<(), SignPagesError> {
    for &kid in kids {
        if let Ok(Object::Dictionary(page)) = doc.get_object_mut(kid) {
            page.set("Parent", Object::Reference(pages_id));
        }
    }

    match doc.get_object_mut(pages_id) {
        Ok(Object::Dictionary(pages)) => {
            pages.set(
                "Kids",
                Object::Array(kids.iter().map(|&id| Object::Reference(id)).collect()),
            );
            pages.set("Count", Object::Integer(kids.len() as i64));
            Ok(())
        }
        _ => Err(SignPagesError::DocumentParse(
            "Root Pages node is not a dictionary".into(),
        )),
    }
}

// ── Geometry ────────────────────────────────────────────────────────────────

fn page_geometry(doc: &Document, page_id: ObjectId) -> (f32, f32) {
    let media_box = doc
        .get_object(page_id)
        .and_then(Object::as_dict)
        .and_then(|page| page.get(b"MediaBox"))
        .map(|obj| resolve(doc, obj));

    let Ok(Object::Array(values)) = media_box else {
        return FALLBACK_GEOMETRY;
    };
    let numbers: Vec<f32> = values
        .iter()
        .filter_map(|v| number(resolve(doc, v)))
        .collect();
    match numbers.as_slice() {
        [x0, y0, x1, y1] if (x1 - x0).abs() > 1.0 && (y1 - y0).abs() > 1.0 => {
            ((x1 - x0).abs(), (y1 - y0).abs())
        }
        _ => FALLBACK_GEOMETRY,
    }
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        other => other,
    }
}

fn number(obj: &Object) -> Option<f32> {
    match *obj {
        Object::Integer(i) => Some(i as f32),
        Object::Real(r) => Some(r),
        _ => None,
    }
}

fn media_box(width: f32, height: f32) -> Object {
    Object::Array(vec![
        Object::Integer(0),
        Object::Integer(0),
        Object::Real(width),
        Object::Real(height),
    ])
}

// ── New pages ───────────────────────────────────────────────────────────────

/// Font (and, for translucent anchors, ExtGState) resources shared by the
/// rendered pages.
fn add_signature_resources(doc: &mut Document, style: &AnchorStyle) -> ObjectId {
    let mut font = Dictionary::new();
    font.set("Type", Object::Name(b"Font".to_vec()));
    font.set("Subtype", Object::Name(b"Type1".to_vec()));
    font.set("BaseFont", Object::Name(b"Helvetica".to_vec()));
    font.set("Encoding", Object::Name(b"WinAnsiEncoding".to_vec()));
    let font_id = doc.add_object(font);

    let mut fonts = Dictionary::new();
    fonts.set(FONT_RESOURCE, Object::Reference(font_id));

    let mut resources = Dictionary::new();
    resources.set("Font", Object::Dictionary(fonts));

    if style.opacity < 1.0 {
        let mut gs = Dictionary::new();
        gs.set("Type", Object::Name(b"ExtGState".to_vec()));
        gs.set("ca", Object::Real(style.opacity));
        gs.set("CA", Object::Real(style.opacity));
        let gs_id = doc.add_object(gs);

        let mut states = Dictionary::new();
        states.set(ANCHOR_GS_RESOURCE, Object::Reference(gs_id));
        resources.set("ExtGState", Object::Dictionary(states));
    }

    doc.add_object(resources)
}

fn add_rendered_page(
    doc: &mut Document,
    parent: ObjectId,
    width: f32,
    height: f32,
    resources_id: ObjectId,
    content: &[u8],
) -> ObjectId {
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content.to_vec()));

    let mut page = Dictionary::new();
    page.set("Type", Object::Name(b"Page".to_vec()));
    page.set("Parent", Object::Reference(parent));
    page.set("MediaBox", media_box(width, height));
    page.set("Resources", Object::Reference(resources_id));
    page.set("Contents", Object::Reference(content_id));
    doc.add_object(page)
}

fn add_blank_page(doc: &mut Document, parent: ObjectId, width: f32, height: f32) -> ObjectId {
    let mut page = Dictionary::new();
    page.set("Type", Object::Name(b"Page".to_vec()));
    page.set("Parent", Object::Reference(parent));
    page.set("MediaBox", media_box(width, height));
    page.set("Resources", Object::Dictionary(Dictionary::new()));
    doc.add_object(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content() -> SignaturePageContent {
        SignaturePageContent {
            customer_name: Some("Jane Doe".into()),
            total_amount: 1000.0,
            permit_fee: 150.0,
            manufacturer: Some("Acme".into()),
            service_label: "Window Installation".into(),
        }
    }

    /// A PDF whose pages carry identifiable text `Page-N`.
    fn create_test_pdf(num_pages: u32, width: i64, height: i64) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();

        for n in 1..=num_pages {
            let content = format!("BT /F1 12 Tf 50 700 Td (Page-{n}) Tj ET");
            let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
            let mut page = Dictionary::new();
            page.set("Type", Object::Name(b"Page".to_vec()));
            page.set("Parent", Object::Reference(pages_id));
            page.set("Contents", Object::Reference(content_id));
            page.set(
                "MediaBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(width),
                    Object::Integer(height),
                ]),
            );
            kids.push(Object::Reference(doc.add_object(page)));
        }

        let mut pages = Dictionary::new();
        pages.set("Type", Object::Name(b"Pages".to_vec()));
        pages.set("Count", Object::Integer(num_pages as i64));
        pages.set("Kids", Object::Array(kids));
        doc.objects.insert(pages_id, Object::Dictionary(pages));

        let mut catalog = Dictionary::new();
        catalog.set("Type", Object::Name(b"Catalog".to_vec()));
        catalog.set("Pages", Object::Reference(pages_id));
        let catalog_id = doc.add_object(catalog);
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    /// Two pages under an intermediate Pages node; MediaBox and Resources
    /// live only on the root.
    fn create_nested_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let root_id = doc.new_object_id();
        let mid_id = doc.new_object_id();

        let mut kids = Vec::new();
        for n in 1..=2 {
            let content = format!("BT /F1 12 Tf 50 700 Td (Nested-{n}) Tj ET");
            let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
            let mut page = Dictionary::new();
            page.set("Type", Object::Name(b"Page".to_vec()));
            page.set("Parent", Object::Reference(mid_id));
            page.set("Contents", Object::Reference(content_id));
            kids.push(Object::Reference(doc.add_object(page)));
        }

        let mut mid = Dictionary::new();
        mid.set("Type", Object::Name(b"Pages".to_vec()));
        mid.set("Parent", Object::Reference(root_id));
        mid.set("Count", Object::Integer(2));
        mid.set("Kids", Object::Array(kids));
        doc.objects.insert(mid_id, Object::Dictionary(mid));

        let mut font = Dictionary::new();
        font.set("Type", Object::Name(b"Font".to_vec()));
        font.set("Subtype", Object::Name(b"Type1".to_vec()));
        font.set("BaseFont", Object::Name(b"Courier".to_vec()));
        let font_id = doc.add_object(font);
        let mut fonts = Dictionary::new();
        fonts.set("F1", Object::Reference(font_id));
        let mut resources = Dictionary::new();
        resources.set("Font", Object::Dictionary(fonts));

        let mut root = Dictionary::new();
        root.set("Type", Object::Name(b"Pages".to_vec()));
        root.set("Count", Object::Integer(2));
        root.set("Kids", Object::Array(vec![Object::Reference(mid_id)]));
        root.set(
            "MediaBox",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(595),
                Object::Integer(842),
            ]),
        );
        root.set("Resources", Object::Dictionary(resources));
        doc.objects.insert(root_id, Object::Dictionary(root));

        let mut catalog = Dictionary::new();
        catalog.set("Type", Object::Name(b"Catalog".to_vec()));
        catalog.set("Pages", Object::Reference(root_id));
        let catalog_id = doc.add_object(catalog);
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    fn page_texts(bytes: &[u8]) -> Vec<String> {
        let doc = Document::load_mem(bytes).unwrap();
        doc.get_pages()
            .values()
            .map(|&id| String::from_utf8_lossy(&doc.get_page_content(id).unwrap()).into_owned())
            .collect()
    }

    fn run(pages: u32, insert_at: Option<usize>) -> AugmentedDocument {
        let pdf = create_test_pdf(pages, 612, 792);
        augment(&pdf, insert_at, &content(), &AnchorStyle::default()).unwrap()
    }

    #[test]
    fn append_only_adds_one_page() {
        let out = run(3, None);
        assert_eq!(out.page_count, 4);
        assert_eq!(out.rendered_pages, vec![4]);

        let texts = page_texts(&out.bytes);
        assert_eq!(texts.len(), 4);
        assert!(texts[0].contains("Page-1"));
        assert!(texts[2].contains("Page-3"));
        assert!(texts[3].contains(&out.sign_anchor));
        assert!(texts[3].contains(&out.date_anchor));
    }

    #[test]
    fn insert_and_append_share_anchor() {
        let out = run(3, Some(2));
        assert_eq!(out.page_count, 5);
        assert_eq!(out.rendered_pages, vec![2, 5]);

        let texts = page_texts(&out.bytes);
        assert!(texts[0].contains("Page-1"));
        assert!(texts[1].contains(&out.sign_anchor));
        assert!(texts[2].contains("Page-2"));
        assert!(texts[3].contains("Page-3"));
        assert!(texts[4].contains(&out.sign_anchor));
        let anchored = texts.iter().filter(|t| t.contains(&out.sign_anchor)).count();
        assert_eq!(anchored, 2);
    }

    #[test]
    fn insert_at_front_and_just_past_end() {
        let front = run(3, Some(1));
        assert_eq!(front.rendered_pages, vec![1, 5]);
        assert!(page_texts(&front.bytes)[0].contains(&front.sign_anchor));

        let past_end = run(3, Some(4));
        assert_eq!(past_end.page_count, 5);
        assert_eq!(past_end.rendered_pages, vec![4, 5]);
    }

    #[test]
    fn far_index_pads_with_blank_pages() {
        let out = run(3, Some(10));
        // max(3, 9) + 2
        assert_eq!(out.page_count, 11);
        assert_eq!(out.rendered_pages, vec![10, 11]);

        let texts = page_texts(&out.bytes);
        for blank in &texts[3..9] {
            assert!(blank.is_empty(), "padding page has content: {blank}");
        }
        assert!(texts[9].contains(&out.sign_anchor));
    }

    #[test]
    fn page_count_property() {
        for original in 1..=4u32 {
            for i in 1..=(original as usize + 3) {
                let out = run(original, Some(i));
                let expected = (original as usize).max(i - 1) + 2;
                assert_eq!(out.page_count, expected, "original={original} i={i}");
                assert_eq!(page_texts(&out.bytes).len(), expected);
            }
        }
    }

    #[test]
    fn anchors_differ_between_calls() {
        let a = run(1, None);
        let b = run(1, None);
        assert_ne!(a.sign_anchor, b.sign_anchor);
        assert_eq!(a.date_anchor, b.date_anchor);
    }

    #[test]
    fn garbage_is_parse_error() {
        let err = augment(b"not a pdf", None, &content(), &AnchorStyle::default()).unwrap_err();
        assert!(matches!(err, SignPagesError::DocumentParse(_)), "{err}");
    }

    #[test]
    fn input_is_untouched() {
        let pdf = create_test_pdf(2, 612, 792);
        let copy = pdf.clone();
        let _ = augment(&pdf, Some(1), &content(), &AnchorStyle::default()).unwrap();
        assert_eq!(pdf, copy);
    }

    #[test]
    fn rendered_pages_match_source_geometry() {
        let pdf = create_test_pdf(1, 595, 842);
        let out = augment(&pdf, None, &content(), &AnchorStyle::default()).unwrap();
        let doc = Document::load_mem(&out.bytes).unwrap();
        let last = *doc.get_pages().values().last().unwrap();
        assert_eq!(page_geometry(&doc, last), (595.0, 842.0));
    }

    #[test]
    fn inherited_attributes_survive_flattening() {
        let pdf = create_nested_pdf();
        let out = augment(&pdf, Some(2), &content(), &AnchorStyle::default()).unwrap();
        assert_eq!(out.page_count, 4);

        let doc = Document::load_mem(&out.bytes).unwrap();
        let pages: Vec<ObjectId> = doc.get_pages().values().copied().collect();
        let first = doc.get_object(pages[0]).unwrap().as_dict().unwrap();
        assert!(first.has(b"MediaBox"));
        assert!(first.has(b"Resources"));
        assert_eq!(page_geometry(&doc, pages[1]), (595.0, 842.0));

        let texts = page_texts(&out.bytes);
        assert!(texts[0].contains("Nested-1"));
        assert!(texts[1].contains(&out.sign_anchor));
        assert!(texts[2].contains("Nested-2"));
    }

    #[test]
    fn flattening_leaves_no_orphaned_page_nodes() {
        let out = augment(&create_nested_pdf(), Some(2), &content(), &AnchorStyle::default()).unwrap();
        let doc = Document::load_mem(&out.bytes).unwrap();

        let pages_nodes = doc
            .objects
            .values()
            .filter(|obj| match obj {
                Object::Dictionary(d) => matches!(d.get(b"Type"), Ok(Object::Name(n)) if n == b"Pages"),
                _ => false,
            })
            .count();
        assert_eq!(pages_nodes, 1);
        assert_eq!(doc.get_pages().len(), 4);
    }

    #[test]
    fn translucent_style_adds_graphics_state() {
        let pdf = create_test_pdf(1, 612, 792);
        let style = AnchorStyle {
            opacity: 0.0,
            ..AnchorStyle::default()
        };
        let out = augment(&pdf, None, &content(), &style).unwrap();
        let raw = String::from_utf8_lossy(&out.bytes);
        assert!(raw.contains("ExtGState"));
        assert!(raw.contains(ANCHOR_GS_RESOURCE));
    }
}
