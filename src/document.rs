//! A loaded PDF template plus everything drawn on top of it.
//!
//! Drawing calls take PDF-native coordinates (bottom-left origin); callers
//! convert with [`crate::geometry::PageFrame`] first. Nothing touches the
//! underlying document until [`ReportDocument::finish`], which wraps each
//! page's original content in `q`/`Q` and appends one stream with our
//! operations.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;

use image::{GenericImageView, ImageReader};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::chart::{ChartImage, ImageFormat};
use crate::font::Font;
use crate::geometry::{PageFrame, Rect};

/// Walking `Parent` links deeper than this means a broken page tree.
const MAX_TREE_DEPTH: usize = 32;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("page {index} out of range (document has {count} pages)")]
    PageOutOfRange { index: usize, count: usize },
    #[error("page {0} has no usable MediaBox")]
    MissingMediaBox(usize),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An RGB colour with components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    fn operands(self) -> Vec<Object> {
        vec![self.r.into(), self.g.into(), self.b.into()]
    }
}

/// Fill and/or stroke for [`ReportDocument::draw_rect`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RectStyle {
    pub fill: Option<Rgb>,
    pub stroke: Option<Rgb>,
    pub line_width: f32,
}

/// Index of a font registered with [`ReportDocument::register_font`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FontHandle(usize);

struct RegisteredFont {
    resource: String,
    font: Font,
    used: BTreeSet<char>,
}

#[derive(Default)]
struct PageCanvas {
    ops: Vec<Operation>,
    fonts: BTreeSet<FontHandle>,
    images: Vec<(String, ObjectId)>,
}

pub struct ReportDocument {
    inner: Document,
    pages: Vec<ObjectId>,
    fonts: Vec<RegisteredFont>,
    canvases: BTreeMap<usize, PageCanvas>,
    image_count: usize,
}

impl ReportDocument {
    pub fn load(bytes: &[u8]) -> Result<Self, DocumentError> {
        let inner = Document::load_mem(bytes)?;
        let pages = inner.get_pages().into_values().collect();
        Ok(Self {
            inner,
            pages,
            fonts: Vec::new(),
            canvases: BTreeMap::new(),
            image_count: 0,
        })
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_id(&self, index: usize) -> Result<ObjectId, DocumentError> {
        self.pages
            .get(index)
            .copied()
            .ok_or(DocumentError::PageOutOfRange {
                index,
                count: self.pages.len(),
            })
    }

    /// Looks `key` up on the page and then up its `Parent` chain.
    fn inherited(&self, page_id: ObjectId, key: &[u8]) -> Result<Option<&Object>, DocumentError> {
        let mut node_id = page_id;
        for _ in 0..MAX_TREE_DEPTH {
            let node = self.inner.get_dictionary(node_id)?;
            if let Ok(value) = node.get(key) {
                return Ok(Some(self.resolve(value)?));
            }
            match node.get(b"Parent").and_then(Object::as_reference) {
                Ok(parent) => node_id = parent,
                Err(_) => return Ok(None),
            }
        }
        Ok(None)
    }

    fn resolve<'a>(&'a self, object: &'a Object) -> Result<&'a Object, DocumentError> {
        match object {
            Object::Reference(id) => Ok(self.inner.get_object(*id)?),
            other => Ok(other),
        }
    }

    pub fn page_frame(&self, index: usize) -> Result<PageFrame, DocumentError> {
        let page_id = self.page_id(index)?;
        let media_box = self
            .inherited(page_id, b"MediaBox")?
            .and_then(|obj| obj.as_array().ok())
            .ok_or(DocumentError::MissingMediaBox(index))?;
        let nums: Vec<f32> = media_box
            .iter()
            .filter_map(|obj| match self.resolve(obj).ok()? {
                Object::Integer(i) => Some(*i as f32),
                Object::Real(r) => Some(*r as f32),
                _ => None,
            })
            .collect();
        let &[x0, y0, x1, y1] = nums.as_slice() else {
            return Err(DocumentError::MissingMediaBox(index));
        };
        Ok(PageFrame {
            origin_x: x0.min(x1),
            origin_y: y0.min(y1),
            width: (x1 - x0).abs(),
            height: (y1 - y0).abs(),
        })
    }

    pub fn register_font(&mut self, font: Font) -> FontHandle {
        let handle = FontHandle(self.fonts.len());
        self.fonts.push(RegisteredFont {
            resource: format!("FRpt{}", handle.0),
            font,
            used: BTreeSet::new(),
        });
        handle
    }

    pub fn font(&self, handle: FontHandle) -> &Font {
        &self.fonts[handle.0].font
    }

    fn canvas(&mut self, page: usize) -> Result<&mut PageCanvas, DocumentError> {
        self.page_id(page)?;
        Ok(self.canvases.entry(page).or_default())
    }

    /// Draws a single run with its baseline at `(x, y)`.
    pub fn draw_text(
        &mut self,
        page: usize,
        handle: FontHandle,
        text: &str,
        x: f32,
        y: f32,
        size: f32,
        color: Rgb,
    ) -> Result<(), DocumentError> {
        if text.is_empty() {
            return Ok(());
        }
        let registered = &mut self.fonts[handle.0];
        registered.used.extend(text.chars());
        let encoded = registered.font.encode(text);
        let resource = registered.resource.clone();

        let canvas = self.canvas(page)?;
        canvas.fonts.insert(handle);
        canvas.ops.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(resource.into_bytes()), size.into()]),
            Operation::new("rg", color.operands()),
            Operation::new("Td", vec![x.into(), y.into()]),
            Operation::new("Tj", vec![Object::String(encoded, StringFormat::Hexadecimal)]),
            Operation::new("ET", vec![]),
        ]);
        Ok(())
    }

    pub fn draw_rect(&mut self, page: usize, rect: Rect, style: RectStyle) -> Result<(), DocumentError> {
        let paint = match (style.fill, style.stroke) {
            (Some(_), Some(_)) => "B",
            (Some(_), None) => "f",
            (None, Some(_)) => "S",
            (None, None) => return Ok(()),
        };
        let canvas = self.canvas(page)?;
        canvas.ops.push(Operation::new("q", vec![]));
        if let Some(fill) = style.fill {
            canvas.ops.push(Operation::new("rg", fill.operands()));
        }
        if let Some(stroke) = style.stroke {
            canvas.ops.push(Operation::new("RG", stroke.operands()));
            canvas.ops.push(Operation::new("w", vec![style.line_width.into()]));
        }
        canvas.ops.extend([
            Operation::new(
                "re",
                vec![rect.x.into(), rect.y.into(), rect.w.into(), rect.h.into()],
            ),
            Operation::new(paint, vec![]),
            Operation::new("Q", vec![]),
        ]);
        Ok(())
    }

    /// Pixel size of an image without drawing it.
    pub fn image_dimensions(image: &ChartImage) -> Result<(u32, u32), DocumentError> {
        Ok(ImageReader::new(Cursor::new(&image.bytes[..]))
            .with_guessed_format()?
            .into_dimensions()?)
    }

    /// Embeds `image` as an XObject and paints it stretched over `rect`.
    pub fn draw_image(&mut self, page: usize, image: &ChartImage, rect: Rect) -> Result<(), DocumentError> {
        self.page_id(page)?;
        let xobject = image_xobject(&mut self.inner, image)?;
        let resource = format!("IRpt{}", self.image_count);
        self.image_count += 1;

        let canvas = self.canvas(page)?;
        canvas.images.push((resource.clone(), xobject));
        canvas.ops.extend([
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    rect.w.into(),
                    0.into(),
                    0.into(),
                    rect.h.into(),
                    rect.x.into(),
                    rect.y.into(),
                ],
            ),
            Operation::new("Do", vec![Object::Name(resource.into_bytes())]),
            Operation::new("Q", vec![]),
        ]);
        Ok(())
    }

    /// Writes fonts, resources and content streams, and serialises the PDF.
    pub fn finish(mut self) -> Result<Vec<u8>, DocumentError> {
        let used_fonts: BTreeSet<FontHandle> = self
            .canvases
            .values()
            .flat_map(|c| c.fonts.iter().copied())
            .collect();
        let mut font_ids = BTreeMap::new();
        for handle in used_fonts {
            let registered = &self.fonts[handle.0];
            let id = registered.font.write_objects(&mut self.inner, &registered.used);
            font_ids.insert(handle, (registered.resource.clone(), id));
        }

        let canvases = std::mem::take(&mut self.canvases);
        for (index, canvas) in canvases {
            if canvas.ops.is_empty() {
                continue;
            }
            let page_id = self.page_id(index)?;
            let fonts: Vec<(String, ObjectId)> = canvas
                .fonts
                .iter()
                .filter_map(|h| font_ids.get(h).cloned())
                .collect();
            self.merge_resources(page_id, &fonts, &canvas.images)?;
            self.append_content(page_id, canvas.ops)?;
        }

        let mut out = Vec::new();
        self.inner.save_to(&mut out)?;
        Ok(out)
    }

    /// Copies the page's effective resources (possibly inherited) onto the
    /// page itself and adds our fonts and images.
    fn merge_resources(
        &mut self,
        page_id: ObjectId,
        fonts: &[(String, ObjectId)],
        images: &[(String, ObjectId)],
    ) -> Result<(), DocumentError> {
        let mut resources = match self.inherited(page_id, b"Resources")? {
            Some(Object::Dictionary(dict)) => dict.clone(),
            _ => Dictionary::new(),
        };
        for (category, entries) in [(&b"Font"[..], fonts), (&b"XObject"[..], images)] {
            if entries.is_empty() {
                continue;
            }
            let mut sub = match resources.get(category) {
                Ok(obj) => match self.resolve(obj)? {
                    Object::Dictionary(dict) => dict.clone(),
                    _ => Dictionary::new(),
                },
                Err(_) => Dictionary::new(),
            };
            for (name, id) in entries {
                sub.set(name.as_bytes().to_vec(), Object::Reference(*id));
            }
            resources.set(category.to_vec(), Object::Dictionary(sub));
        }
        self.inner
            .get_object_mut(page_id)?
            .as_dict_mut()?
            .set("Resources", resources);
        Ok(())
    }

    fn append_content(&mut self, page_id: ObjectId, ops: Vec<Operation>) -> Result<(), DocumentError> {
        let existing: Vec<Object> = match self.inner.get_dictionary(page_id)?.get(b"Contents") {
            Ok(Object::Reference(id)) => match self.inner.get_object(*id)? {
                Object::Array(items) => items.clone(),
                _ => vec![Object::Reference(*id)],
            },
            Ok(Object::Array(items)) => items.clone(),
            _ => Vec::new(),
        };

        let save = self.inner.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
        let mut ours = vec![Operation::new("Q", vec![])];
        ours.extend(ops);
        let mut stream = Stream::new(dictionary! {}, Content { operations: ours }.encode()?);
        compress_stream(&mut stream, "page content");
        let drawn = self.inner.add_object(stream);

        let mut contents = Vec::with_capacity(existing.len() + 2);
        contents.push(Object::Reference(save));
        contents.extend(existing);
        contents.push(Object::Reference(drawn));

        self.inner
            .get_object_mut(page_id)?
            .as_dict_mut()?
            .set("Contents", contents);
        Ok(())
    }
}

/// JPEG bytes pass through as `DCTDecode`; PNG is decoded to RGB with its
/// alpha channel (if any) as a soft mask.
fn image_xobject(doc: &mut Document, image: &ChartImage) -> Result<ObjectId, DocumentError> {
    match image.format {
        ImageFormat::Jpeg => {
            let decoded = image::load_from_memory_with_format(&image.bytes, image::ImageFormat::Jpeg)?;
            let (width, height) = decoded.dimensions();
            let color_space = if decoded.color().channel_count() == 1 {
                "DeviceGray"
            } else {
                "DeviceRGB"
            };
            Ok(doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => width as i64,
                    "Height" => height as i64,
                    "ColorSpace" => color_space,
                    "BitsPerComponent" => 8,
                    "Filter" => "DCTDecode",
                },
                image.bytes.to_vec(),
            )))
        }
        ImageFormat::Png => {
            let decoded = image::load_from_memory_with_format(&image.bytes, image::ImageFormat::Png)?;
            let (width, height) = decoded.dimensions();
            let has_alpha = decoded.color().has_alpha();
            let rgba = decoded.to_rgba8();

            let mut rgb = Vec::with_capacity((width * height * 3) as usize);
            let mut alpha = Vec::with_capacity((width * height) as usize);
            for px in rgba.pixels() {
                rgb.extend_from_slice(&px.0[..3]);
                alpha.push(px.0[3]);
            }

            let mut dict = dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            };
            if has_alpha {
                let mut mask = Stream::new(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Image",
                        "Width" => width as i64,
                        "Height" => height as i64,
                        "ColorSpace" => "DeviceGray",
                        "BitsPerComponent" => 8,
                    },
                    alpha,
                );
                compress_stream(&mut mask, "image mask");
                dict.set("SMask", doc.add_object(mask));
            }
            let mut stream = Stream::new(dict, rgb);
            compress_stream(&mut stream, "image");
            Ok(doc.add_object(stream))
        }
    }
}

/// Flate-compresses `stream` in place. On failure the stream stays
/// uncompressed, which is still valid output.
pub(crate) fn compress_stream(stream: &mut Stream, what: &str) {
    if let Err(err) = stream.compress() {
        debug!(%err, what, "Stream left uncompressed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressible_stream_gets_flate_filter() {
        let content = b"0 0 m 10 10 l S\n".repeat(64);
        let mut stream = Stream::new(dictionary! {}, content.clone());
        compress_stream(&mut stream, "test");
        assert_eq!(stream.dict.get(b"Filter").unwrap().as_name().unwrap(), b"FlateDecode");
        assert!(stream.content.len() < content.len());
        assert_eq!(stream.decompressed_content().unwrap(), content);
    }

    #[test]
    fn already_filtered_stream_is_untouched() {
        let mut stream = Stream::new(dictionary! { "Filter" => "DCTDecode" }, vec![0xFF; 256]);
        compress_stream(&mut stream, "test");
        assert_eq!(stream.content, vec![0xFF; 256]);
    }
}
