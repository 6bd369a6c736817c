//! Fonts: width measurement for layout and the PDF objects needed to draw with
//! them.
//!
//! Two flavours exist. Base-14 Helvetica needs no font file and draws with
//! WinAnsi bytes. TrueType/OpenType files are embedded whole as a Type0
//! composite font with Identity-H encoding, so text is written as glyph ids.

use std::collections::{BTreeSet, HashMap};

use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use thiserror::Error;
use ttf_parser::Face;

use crate::document::compress_stream;
use crate::layout::Measure;

#[derive(Debug, Error)]
pub enum FontError {
    #[error("failed to parse font {name}: {source}")]
    Parse {
        name: String,
        #[source]
        source: ttf_parser::FaceParsingError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardFont {
    Helvetica,
    HelveticaBold,
}

impl StandardFont {
    fn base_font(self) -> &'static str {
        match self {
            StandardFont::Helvetica => "Helvetica",
            StandardFont::HelveticaBold => "Helvetica-Bold",
        }
    }

    /// AFM advance widths in 1000 units/em for ASCII 32..=126.
    fn ascii_widths(self) -> &'static [u16; 95] {
        match self {
            StandardFont::Helvetica => &HELVETICA_ASCII,
            StandardFont::HelveticaBold => &HELVETICA_BOLD_ASCII,
        }
    }

    /// AFM advance widths for WinAnsi bytes 0x80..=0xFF. Codes the encoding
    /// leaves undefined (0x81, 0x8D, 0x8F, 0x90, 0x9D) are never emitted.
    fn high_widths(self) -> &'static [u16; 128] {
        match self {
            StandardFont::Helvetica => &HELVETICA_HIGH,
            StandardFont::HelveticaBold => &HELVETICA_BOLD_HIGH,
        }
    }

    fn width_1000(self, byte: u8) -> f32 {
        let w = match byte {
            32..=126 => self.ascii_widths()[(byte - 32) as usize],
            0x80..=0xFF => self.high_widths()[(byte - 0x80) as usize],
            _ => 556,
        };
        w as f32
    }
}

#[rustfmt::skip]
const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556,
    278, 278, 584, 584, 584, 556, 1015,
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833,
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611,
    278, 278, 278, 469, 556, 333,
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833,
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500,
    334, 260, 334, 584,
];

#[rustfmt::skip]
const HELVETICA_BOLD_ASCII: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556,
    333, 333, 584, 584, 584, 611, 975,
    722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833,
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611,
    333, 278, 333, 584, 556, 333,
    556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889,
    611, 611, 611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500,
    389, 280, 389, 584,
];

#[rustfmt::skip]
const HELVETICA_HIGH: [u16; 128] = [
    556, 750, 222, 556, 333, 1000, 556, 556, 333, 1000, 667, 333, 1000, 750, 611, 750,
    750, 222, 222, 333, 333, 350, 556, 1000, 333, 1000, 500, 333, 944, 750, 500, 667,
    278, 333, 556, 556, 556, 556, 260, 556, 333, 737, 370, 556, 584, 333, 737, 333,
    400, 584, 333, 333, 333, 556, 537, 278, 333, 333, 365, 556, 834, 834, 834, 611,
    667, 667, 667, 667, 667, 667, 1000, 722, 667, 667, 667, 667, 278, 278, 278, 278,
    722, 722, 778, 778, 778, 778, 778, 584, 778, 722, 722, 722, 722, 667, 667, 611,
    556, 556, 556, 556, 556, 556, 889, 500, 556, 556, 556, 556, 278, 278, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 584, 611, 556, 556, 556, 556, 500, 556, 500,
];

#[rustfmt::skip]
const HELVETICA_BOLD_HIGH: [u16; 128] = [
    556, 750, 278, 556, 500, 1000, 556, 556, 333, 1000, 667, 333, 1000, 750, 611, 750,
    750, 278, 278, 500, 500, 350, 556, 1000, 333, 1000, 556, 333, 944, 750, 500, 667,
    278, 333, 556, 556, 556, 556, 280, 556, 333, 737, 370, 556, 584, 333, 737, 333,
    400, 584, 333, 333, 333, 611, 556, 278, 333, 333, 365, 556, 834, 834, 834, 611,
    722, 722, 722, 722, 722, 722, 1000, 722, 667, 667, 667, 667, 278, 278, 278, 278,
    722, 722, 778, 778, 778, 778, 778, 584, 778, 722, 722, 722, 722, 667, 667, 611,
    556, 556, 556, 556, 556, 556, 889, 556, 556, 556, 556, 556, 278, 278, 278, 278,
    611, 611, 611, 611, 611, 611, 611, 584, 611, 611, 611, 611, 611, 556, 611, 556,
];

/// Maps a char to its WinAnsiEncoding byte. Anything outside the encoding
/// becomes `?`.
pub(crate) fn to_winansi(ch: char) -> u8 {
    let cp = ch as u32;
    match cp {
        0x20..=0x7E | 0xA0..=0xFF => cp as u8,
        _ => match ch {
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
            _ => b'?',
        },
    }
}

/// Metrics and cmap pulled out of a parsed face, plus the raw file for
/// embedding.
#[derive(Debug)]
struct TrueTypeFace {
    data: Vec<u8>,
    units_per_em: f32,
    ascent: i16,
    descent: i16,
    cap_height: i16,
    bbox: [i16; 4],
    /// char -> (glyph id, horizontal advance in font units)
    glyphs: HashMap<char, (u16, u16)>,
    notdef_advance: u16,
}

impl TrueTypeFace {
    fn parse(data: Vec<u8>, name: &str) -> Result<(Self, Option<String>), FontError> {
        let face = Face::parse(&data, 0).map_err(|source| FontError::Parse {
            name: name.to_string(),
            source,
        })?;

        let mut glyphs = HashMap::new();
        if let Some(cmap) = face.tables().cmap {
            for subtable in cmap.subtables {
                if !subtable.is_unicode() {
                    continue;
                }
                subtable.codepoints(|cp| {
                    let (Some(ch), Some(gid)) = (char::from_u32(cp), subtable.glyph_index(cp))
                    else {
                        return;
                    };
                    let advance = face.glyph_hor_advance(gid).unwrap_or(0);
                    glyphs.entry(ch).or_insert((gid.0, advance));
                });
            }
        }

        let postscript_name = face
            .names()
            .into_iter()
            .find(|n| n.name_id == ttf_parser::name_id::POST_SCRIPT_NAME && n.is_unicode())
            .and_then(|n| n.to_string());

        let bb = face.global_bounding_box();
        let units_per_em = f32::from(face.units_per_em());
        let ascent = face.ascender();
        let descent = face.descender();
        let cap_height = face.capital_height().unwrap_or(ascent);
        let notdef_advance = face.glyph_hor_advance(ttf_parser::GlyphId(0)).unwrap_or(0);

        Ok((
            TrueTypeFace {
                data,
                units_per_em,
                ascent,
                descent,
                cap_height,
                bbox: [bb.x_min, bb.y_min, bb.x_max, bb.y_max],
                glyphs,
                notdef_advance,
            },
            postscript_name,
        ))
    }

    fn to_1000(&self, units: impl Into<f32>) -> f32 {
        units.into() * 1000.0 / self.units_per_em
    }

    fn gid(&self, ch: char) -> u16 {
        self.glyphs.get(&ch).map(|&(gid, _)| gid).unwrap_or(0)
    }

    fn width_1000(&self, ch: char) -> f32 {
        let advance = self
            .glyphs
            .get(&ch)
            .map(|&(_, adv)| adv)
            .unwrap_or(self.notdef_advance);
        self.to_1000(advance)
    }
}

#[derive(Debug)]
enum FontKind {
    Standard(StandardFont),
    TrueType(Box<TrueTypeFace>),
}

/// A font usable for both measuring and drawing.
#[derive(Debug)]
pub struct Font {
    name: String,
    kind: FontKind,
}

impl Font {
    pub fn standard(font: StandardFont) -> Self {
        Self {
            name: font.base_font().to_string(),
            kind: FontKind::Standard(font),
        }
    }

    pub fn helvetica() -> Self {
        Self::standard(StandardFont::Helvetica)
    }

    pub fn helvetica_bold() -> Self {
        Self::standard(StandardFont::HelveticaBold)
    }

    /// Parses a TrueType/OpenType file. `label` names the font in errors and is
    /// the fallback base name when the file has no PostScript name.
    pub fn from_bytes(data: Vec<u8>, label: &str) -> Result<Self, FontError> {
        let (face, postscript_name) = TrueTypeFace::parse(data, label)?;
        let name: String = postscript_name
            .as_deref()
            .unwrap_or(label)
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect();
        Ok(Self {
            name: if name.is_empty() { "Embedded".into() } else { name },
            kind: FontKind::TrueType(Box::new(face)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self.kind, FontKind::TrueType(_))
    }

    fn char_width_1000(&self, ch: char) -> f32 {
        match &self.kind {
            FontKind::Standard(font) => font.width_1000(to_winansi(ch)),
            FontKind::TrueType(face) => face.width_1000(ch),
        }
    }

    /// Bytes for a `Tj` operand.
    pub(crate) fn encode(&self, text: &str) -> Vec<u8> {
        match &self.kind {
            FontKind::Standard(_) => text.chars().map(to_winansi).collect(),
            FontKind::TrueType(face) => text
                .chars()
                .flat_map(|ch| face.gid(ch).to_be_bytes())
                .collect(),
        }
    }

    /// Adds the font dictionary (and for embedded fonts, the descriptor, font
    /// program, CID font and ToUnicode map) to `doc`. `used` limits the width
    /// and ToUnicode tables to chars actually drawn.
    pub(crate) fn write_objects(&self, doc: &mut Document, used: &BTreeSet<char>) -> ObjectId {
        match &self.kind {
            FontKind::Standard(font) => doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => font.base_font(),
                "Encoding" => "WinAnsiEncoding",
            }),
            FontKind::TrueType(face) => self.write_type0(doc, face, used),
        }
    }

    fn write_type0(&self, doc: &mut Document, face: &TrueTypeFace, used: &BTreeSet<char>) -> ObjectId {
        let mut program = Stream::new(
            dictionary! { "Length1" => face.data.len() as i64 },
            face.data.clone(),
        );
        compress_stream(&mut program, "font program");
        let program_id = doc.add_object(program);

        let bbox: Vec<Object> = face
            .bbox
            .iter()
            .map(|&v| Object::from(face.to_1000(v)))
            .collect();
        let descriptor_id = doc.add_object(dictionary! {
            "Type" => "FontDescriptor",
            "FontName" => self.name.as_str(),
            "Flags" => 32,
            "FontBBox" => bbox,
            "ItalicAngle" => 0,
            "Ascent" => face.to_1000(face.ascent),
            "Descent" => face.to_1000(face.descent),
            "CapHeight" => face.to_1000(face.cap_height),
            "StemV" => 80,
            "FontFile2" => program_id,
        });

        let mut gid_widths: Vec<(u16, f32)> = used
            .iter()
            .map(|&ch| (face.gid(ch), face.width_1000(ch)))
            .collect();
        gid_widths.sort_by_key(|&(gid, _)| gid);
        gid_widths.dedup_by_key(|&mut (gid, _)| gid);
        let widths: Vec<Object> = gid_widths
            .iter()
            .flat_map(|&(gid, w)| [Object::from(i64::from(gid)), Object::Array(vec![w.into()])])
            .collect();

        let cid_font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "CIDFontType2",
            "BaseFont" => self.name.as_str(),
            "CIDSystemInfo" => dictionary! {
                "Registry" => Object::string_literal("Adobe"),
                "Ordering" => Object::string_literal("Identity"),
                "Supplement" => 0,
            },
            "FontDescriptor" => descriptor_id,
            "DW" => 0,
            "W" => widths,
            "CIDToGIDMap" => "Identity",
        });

        let mut to_unicode = Stream::new(dictionary! {}, to_unicode_cmap(face, used).into_bytes());
        compress_stream(&mut to_unicode, "ToUnicode map");
        let to_unicode_id = doc.add_object(to_unicode);

        doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => self.name.as_str(),
            "Encoding" => "Identity-H",
            "DescendantFonts" => vec![Object::Reference(cid_font_id)],
            "ToUnicode" => to_unicode_id,
        })
    }
}

impl Measure for Font {
    fn text_width(&self, text: &str, size: f32) -> f32 {
        text.chars().map(|ch| self.char_width_1000(ch)).sum::<f32>() * size / 1000.0
    }
}

fn to_unicode_cmap(face: &TrueTypeFace, used: &BTreeSet<char>) -> String {
    let mut pairs: Vec<(u16, char)> = used
        .iter()
        .filter_map(|&ch| face.glyphs.get(&ch).map(|&(gid, _)| (gid, ch)))
        .collect();
    pairs.sort();
    pairs.dedup_by_key(|&mut (gid, _)| gid);

    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n/CMapType 2 def\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );
    // bfchar blocks are limited to 100 entries
    for chunk in pairs.chunks(100) {
        cmap.push_str(&format!("{} beginbfchar\n", chunk.len()));
        for &(gid, ch) in chunk {
            let mut units = [0u16; 2];
            let utf16: String = ch
                .encode_utf16(&mut units)
                .iter()
                .map(|u| format!("{u:04X}"))
                .collect();
            cmap.push_str(&format!("<{gid:04X}> <{utf16}>\n"));
        }
        cmap.push_str("endbfchar\n");
    }
    cmap.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");
    cmap
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn helvetica_widths_match_afm() {
        let font = Font::helvetica();
        // H=722 e=556 l=222 l=222 o=556
        assert_eq!(font.text_width("Hello", 10.0), 22.78);
        assert_eq!(font.text_width("", 10.0), 0.0);
        assert!(Font::helvetica_bold().text_width("Hello", 10.0) > font.text_width("Hello", 10.0));
    }

    #[test]
    fn bullet_and_ellipsis_have_widths() {
        let font = Font::helvetica();
        assert_eq!(font.text_width("•", 10.0), 3.5);
        assert_eq!(font.text_width("…", 10.0), 10.0);
    }

    #[test]
    fn latin1_and_symbol_widths_match_afm() {
        let font = Font::helvetica();
        for (text, width) in [("Ö", 778.0), ("Á", 667.0), ("©", 737.0), ("ß", 611.0), ("™", 1000.0)] {
            assert_eq!(font.text_width(text, 1000.0), width, "{text}");
        }
        let bold = Font::helvetica_bold();
        assert_eq!(bold.text_width("Ö", 1000.0), 778.0);
        assert_eq!(bold.text_width("ü", 1000.0), 611.0);
        assert_eq!(bold.text_width("é", 1000.0), 556.0);
    }

    #[test]
    fn accented_word_wraps_at_its_true_width() {
        use crate::layout::wrap_paragraph;

        let font = Font::helvetica();
        // Two words of five Ö at 10pt plus a space are 80.58pt wide.
        assert!((font.text_width("ÖÖÖÖÖ", 10.0) - 38.9).abs() < 1e-3);
        let lines = wrap_paragraph("ÖÖÖÖÖ ÖÖÖÖÖ", 60.0, 10.0, &font);
        assert_eq!(lines, vec!["ÖÖÖÖÖ", "ÖÖÖÖÖ"]);
    }

    #[test]
    fn winansi_encoding() {
        let font = Font::helvetica();
        assert_eq!(font.encode("A•…é"), vec![b'A', 0x95, 0x85, 0xE9]);
        assert_eq!(font.encode("✓"), vec![b'?']);
    }

    #[test]
    fn unencodable_chars_measure_as_question_mark() {
        let font = Font::helvetica();
        assert_eq!(font.text_width("✓", 12.0), font.text_width("?", 12.0));
    }

    const MONO: &[u8] = include_bytes!("../tests/fixtures/DejaVuSansMono.ttf");

    #[test]
    fn truetype_metrics_come_from_hmtx() {
        let font = Font::from_bytes(MONO.to_vec(), "mono").unwrap();
        assert_eq!(font.name(), "DejaVuSansMono");
        assert!(font.is_embedded());
        let advance = 1233.0 * 1000.0 / 2048.0;
        assert!((font.text_width("Ö", 1000.0) - advance).abs() < 1e-3);
        assert!((font.text_width("✓ ä", 1000.0) - 3.0 * advance).abs() < 1e-2);
    }

    #[test]
    fn truetype_text_is_encoded_as_glyph_ids() {
        let font = Font::from_bytes(MONO.to_vec(), "mono").unwrap();
        let bytes = font.encode("A\u{1F600}");
        assert_eq!(bytes.len(), 4);
        assert_ne!(&bytes[..2], &[0, 0]);
        // No glyph for the emoji, so it falls back to .notdef.
        assert_eq!(&bytes[2..], &[0, 0]);
    }

    #[test]
    fn type0_objects_carry_widths_and_to_unicode() {
        let font = Font::from_bytes(MONO.to_vec(), "mono").unwrap();
        let mut doc = Document::with_version("1.5");
        let used: BTreeSet<char> = "Ölz".chars().collect();
        let id = font.write_objects(&mut doc, &used);

        let dict = doc.get_dictionary(id).unwrap();
        assert_eq!(dict.get(b"Subtype").unwrap().as_name().unwrap(), b"Type0");
        assert_eq!(dict.get(b"Encoding").unwrap().as_name().unwrap(), b"Identity-H");

        let cid_id = dict.get(b"DescendantFonts").unwrap().as_array().unwrap()[0]
            .as_reference()
            .unwrap();
        let widths = doc.get_dictionary(cid_id).unwrap().get(b"W").unwrap().as_array().unwrap();
        assert_eq!(widths.len(), 6);

        let cmap_id = dict.get(b"ToUnicode").unwrap().as_reference().unwrap();
        let cmap = doc.get_object(cmap_id).unwrap().as_stream().unwrap();
        let cmap = cmap.decompressed_content().unwrap_or_else(|_| cmap.content.clone());
        let cmap = String::from_utf8(cmap).unwrap();
        assert!(cmap.contains("3 beginbfchar"));
        assert!(cmap.contains("<00D6>"));
    }

    #[test]
    fn cmap_splits_into_blocks_of_one_hundred() {
        let (face, _) = TrueTypeFace::parse(MONO.to_vec(), "mono").unwrap();
        let used: BTreeSet<char> = (0x21u8..=0x7E).map(char::from).chain('À'..='ÿ').collect();
        let cmap = to_unicode_cmap(&face, &used);
        assert!(cmap.contains("100 beginbfchar"));
        assert_eq!(cmap.matches("endbfchar").count(), 2);
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        let err = Font::from_bytes(b"not a font".to_vec(), "Broken").unwrap_err();
        assert!(err.to_string().contains("Broken"));
    }

    #[test]
    fn standard_font_dictionary() {
        let mut doc = Document::with_version("1.5");
        let id = Font::helvetica_bold().write_objects(&mut doc, &BTreeSet::new());
        let dict = doc.get_dictionary(id).unwrap();
        assert_eq!(dict.get(b"BaseFont").unwrap().as_name().unwrap(), b"Helvetica-Bold");
    }
}
