mod common;

use bytes::Bytes;
use lopdf::Object;
use pretty_assertions::assert_eq;
use serde_json::json;

use common::{
    count_ops, load, page_font, page_ops, page_strings, png_bytes, template_pdf, A4_HEIGHT_PT, MONO_FONT,
};
use report_fill::chart::ChartImage;
use report_fill::font::Font;
use report_fill::payload::ReportPayload;
use report_fill::report::{render_report, ReportFonts};
use report_fill::report_layout::ReportLayout;

fn payload(value: serde_json::Value) -> ReportPayload {
    ReportPayload::from_value(&value)
}

#[test]
fn text_lands_on_its_pages() {
    let p = payload(json!({
        "fullName": "Ana Example",
        "dateLbl": "March 2025",
        "P": { "p3_exec_tldr": "Calm under pressure • Plans ahead" },
        "collab_R": "Pairs well with planners."
    }));
    let pdf = render_report(&template_pdf(9), &p, &ReportLayout::default(), ReportFonts::default(), None)
        .unwrap();
    let doc = load(&pdf);

    assert_eq!(doc.get_pages().len(), 9);
    assert_eq!(page_strings(&doc, 0), vec!["Ana Example", "March 2025"]);
    assert_eq!(
        page_strings(&doc, 2),
        vec!["\u{95} Calm under pressure", "\u{95} Plans ahead"]
    );
    assert_eq!(page_strings(&doc, 7), vec!["Pairs well with planners."]);
    assert!(page_strings(&doc, 1).is_empty());
}

#[test]
fn baselines_are_converted_to_bottom_left() {
    let p = payload(json!({ "fullName": "Ana" }));
    let pdf = render_report(&template_pdf(1), &p, &ReportLayout::default(), ReportFonts::default(), None)
        .unwrap();
    let doc = load(&pdf);
    let td = page_ops(&doc, 0)
        .into_iter()
        .find(|op| op.operator == "Td")
        .unwrap();
    let y = td.operands[1].as_float().unwrap();
    // Name box: y = 520, size 24, top aligned, so the baseline sits 544pt down.
    assert!((y - (A4_HEIGHT_PT - 544.0)).abs() < 0.05, "baseline at {y}");
}

#[test]
fn short_template_keeps_its_pages() {
    let p = payload(json!({
        "fullName": "Ana",
        "tips": ["Take breaks"],
        "domKey": "C",
        "secondKey": "T"
    }));
    let pdf = render_report(&template_pdf(1), &p, &ReportLayout::default(), ReportFonts::default(), None)
        .unwrap();
    let doc = load(&pdf);
    assert_eq!(doc.get_pages().len(), 1);
    assert_eq!(page_strings(&doc, 0), vec!["Ana"]);
}

#[test]
fn highlights_mark_dominant_and_second_state() {
    let p = payload(json!({ "domKey": "R", "secondKey": "L" }));
    let pdf = render_report(&template_pdf(9), &p, &ReportLayout::default(), ReportFonts::default(), None)
        .unwrap();
    let doc = load(&pdf);
    let widths: Vec<f32> = page_ops(&doc, 3)
        .into_iter()
        .filter(|op| op.operator == "w")
        .map(|op| op.operands[0].as_float().unwrap())
        .collect();
    assert_eq!(widths, vec![2.5, 1.0]);
    assert_eq!(count_ops(&doc, 3, "re"), 2);
}

#[test]
fn chart_is_fitted_into_its_slot() {
    let chart = ChartImage::from_bytes(Bytes::from(png_bytes())).unwrap();
    let p = payload(json!({ "counts": { "C": 2 } }));
    let pdf = render_report(
        &template_pdf(9),
        &p,
        &ReportLayout::default(),
        ReportFonts::default(),
        Some(&chart),
    )
    .unwrap();
    let doc = load(&pdf);
    assert_eq!(count_ops(&doc, 3, "Do"), 1);

    // 4x2 image in a 200x200 slot: full width, half height, vertically centred.
    let cm = page_ops(&doc, 3)
        .into_iter()
        .find(|op| op.operator == "cm")
        .unwrap();
    let nums: Vec<f32> = cm.operands.iter().map(|o| o.as_float().unwrap()).collect();
    assert_eq!(nums[0], 200.0);
    assert_eq!(nums[3], 100.0);
    assert_eq!(nums[4], 335.0);
    assert!((nums[5] - (A4_HEIGHT_PT - 530.0)).abs() < 0.05);

    let page_id = doc.get_pages()[&4];
    let resources = doc.get_dictionary(page_id).unwrap().get(b"Resources").unwrap();
    let xobjects = resources.as_dict().unwrap().get(b"XObject").unwrap();
    assert!(xobjects.as_dict().unwrap().has(b"IRpt0"));
}

#[test]
fn undecodable_chart_leaves_region_blank() {
    let mut bytes = vec![0x89, b'P', b'N', b'G'];
    bytes.extend_from_slice(b"definitely not a png");
    let chart = ChartImage::from_bytes(Bytes::from(bytes)).unwrap();
    let p = payload(json!({ "fullName": "Ana" }));
    let pdf = render_report(
        &template_pdf(9),
        &p,
        &ReportLayout::default(),
        ReportFonts::default(),
        Some(&chart),
    )
    .unwrap();
    let doc = load(&pdf);
    assert_eq!(count_ops(&doc, 3, "Do"), 0);
    assert_eq!(page_strings(&doc, 0), vec!["Ana"]);
}

#[test]
fn layout_override_moves_a_slot() {
    let p = payload(json!({
        "fullName": "Ana",
        "layout": { "fullName": { "page": 1, "align": "left", "x": 10 } }
    }));
    let layout = ReportLayout::default().with_override(p.layout_override.as_ref().unwrap());
    let pdf = render_report(&template_pdf(2), &p, &layout, ReportFonts::default(), None).unwrap();
    let doc = load(&pdf);
    assert!(page_strings(&doc, 0).is_empty());
    assert_eq!(page_strings(&doc, 1), vec!["Ana"]);
    let td = page_ops(&doc, 1)
        .into_iter()
        .find(|op| op.operator == "Td")
        .unwrap();
    assert_eq!(td.operands[0].as_float().unwrap(), 10.0);
}

#[test]
fn fonts_are_only_written_when_used() {
    let p = payload(json!({ "dateLbl": "2025" }));
    let pdf = render_report(&template_pdf(1), &p, &ReportLayout::default(), ReportFonts::default(), None)
        .unwrap();
    let doc = load(&pdf);
    let page_id = doc.get_pages()[&1];
    let resources = doc.get_dictionary(page_id).unwrap().get(b"Resources").unwrap();
    let fonts = resources.as_dict().unwrap().get(b"Font").unwrap().as_dict().unwrap();
    assert!(fonts.has(b"FRpt0"));
    assert!(!fonts.has(b"FRpt1"));
    let font = match fonts.get(b"FRpt0").unwrap() {
        Object::Reference(id) => doc.get_dictionary(*id).unwrap(),
        other => panic!("unexpected font entry {other:?}"),
    };
    assert_eq!(font.get(b"BaseFont").unwrap().as_name().unwrap(), b"Helvetica");
}

#[test]
fn embedded_truetype_font_is_written_as_type0() {
    let fonts = ReportFonts {
        regular: Font::from_bytes(MONO_FONT.to_vec(), "regular").unwrap(),
        bold: Font::helvetica_bold(),
    };
    let p = payload(json!({ "dateLbl": "Ölz ✓ März" }));
    let pdf = render_report(&template_pdf(1), &p, &ReportLayout::default(), fonts, None).unwrap();
    let doc = load(&pdf);

    let font = page_font(&doc, 0, b"FRpt0");
    assert_eq!(font.get(b"Subtype").unwrap().as_name().unwrap(), b"Type0");
    assert_eq!(font.get(b"Encoding").unwrap().as_name().unwrap(), b"Identity-H");
    assert_eq!(font.get(b"BaseFont").unwrap().as_name().unwrap(), b"DejaVuSansMono");
    assert!(font.has(b"ToUnicode"));

    let descendants = font.get(b"DescendantFonts").unwrap().as_array().unwrap();
    let cid_font = doc.get_dictionary(descendants[0].as_reference().unwrap()).unwrap();
    assert_eq!(cid_font.get(b"Subtype").unwrap().as_name().unwrap(), b"CIDFontType2");
    // Eight distinct chars drawn (space included), each a `gid [width]` pair.
    assert_eq!(cid_font.get(b"W").unwrap().as_array().unwrap().len(), 16);

    // Two bytes per glyph id.
    let tj = page_ops(&doc, 0)
        .into_iter()
        .find(|op| op.operator == "Tj")
        .unwrap();
    assert_eq!(tj.operands[0].as_str().unwrap().len(), 2 * "Ölz ✓ März".chars().count());

    let text = doc.extract_text(&[1]).unwrap();
    assert!(text.contains("Ölz ✓ März"), "extracted {text:?}");
}

#[test]
fn garbage_template_is_an_error() {
    let p = payload(json!({ "fullName": "Ana" }));
    let err = render_report(b"not a pdf", &p, &ReportLayout::default(), ReportFonts::default(), None);
    assert!(err.is_err());
}
