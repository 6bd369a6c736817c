#![allow(dead_code)]

use std::io::{BufWriter, Cursor};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object};
use printpdf::{Mm, PdfDocument};
use reqwest::Url;

use report_fill::chart::{ChartImage, ChartSource};

/// A4 height in points, as printpdf writes it.
pub const A4_HEIGHT_PT: f32 = 297.0 / 25.4 * 72.0;

/// DejaVu Sans Mono: every glyph advances 1233 of 2048 units.
pub const MONO_FONT: &[u8] = include_bytes!("../fixtures/DejaVuSansMono.ttf");

/// Blank A4 template with `pages` pages.
pub fn template_pdf(pages: usize) -> Vec<u8> {
    let (doc, _page, _layer) = PdfDocument::new("Report template", Mm(210.0), Mm(297.0), "Layer 1");
    for i in 1..pages {
        doc.add_page(Mm(210.0), Mm(297.0), format!("Page {}", i + 1));
    }
    let mut buf: Vec<u8> = Vec::new();
    {
        let mut writer = BufWriter::new(&mut buf);
        doc.save(&mut writer).expect("save fixture template");
    }
    buf
}

/// Small semi-transparent PNG.
pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(4, 2, image::Rgba([200, 40, 40, 128]));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .expect("encode png");
    buf
}

/// Fresh directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("report-fill-{}-{}", name, std::process::id()));
    std::fs::remove_dir_all(&dir).ok();
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

/// Chart source that never touches the network.
pub struct StubCharts {
    pub image: Option<ChartImage>,
    pub requested: Mutex<Vec<String>>,
}

impl StubCharts {
    pub fn with_png() -> Self {
        Self {
            image: Some(ChartImage::from_bytes(Bytes::from(png_bytes())).expect("stub png")),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            image: None,
            requested: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChartSource for StubCharts {
    async fn fetch(&self, url: &Url) -> Option<ChartImage> {
        self.requested.lock().unwrap().push(url.to_string());
        self.image.clone()
    }
}

pub fn load(pdf: &[u8]) -> Document {
    Document::load_mem(pdf).expect("rendered output parses")
}

pub fn page_ops(doc: &Document, page: usize) -> Vec<Operation> {
    let page_id = *doc.get_pages().get(&(page as u32 + 1)).expect("page exists");
    let content = doc.get_page_content(page_id).expect("page content");
    Content::decode(&content).expect("content decodes").operations
}

/// Decoded `Tj` strings on a page (WinAnsi bytes read as Latin-1).
pub fn page_strings(doc: &Document, page: usize) -> Vec<String> {
    page_ops(doc, page)
        .into_iter()
        .filter(|op| op.operator == "Tj")
        .filter_map(|op| match op.operands.first() {
            Some(Object::String(bytes, _)) => Some(bytes.iter().map(|&b| b as char).collect()),
            _ => None,
        })
        .collect()
}

/// Font dictionary registered under `resource` on a page.
pub fn page_font<'a>(doc: &'a Document, page: usize, resource: &[u8]) -> &'a Dictionary {
    let page_id = doc.get_pages()[&(page as u32 + 1)];
    let resources = doc
        .get_dictionary(page_id)
        .and_then(|page| page.get(b"Resources"))
        .and_then(Object::as_dict)
        .expect("page resources");
    let fonts = resources.get(b"Font").and_then(Object::as_dict).expect("font resources");
    match fonts.get(resource).expect("font registered") {
        Object::Reference(id) => doc.get_dictionary(*id).expect("font dictionary"),
        Object::Dictionary(dict) => dict,
        other => panic!("unexpected font entry {other:?}"),
    }
}

pub fn count_ops(doc: &Document, page: usize, operator: &str) -> usize {
    page_ops(doc, page)
        .iter()
        .filter(|op| op.operator == operator)
        .count()
}
