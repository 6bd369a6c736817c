//! Assembles one report: template, fonts, text slots, highlights and chart.

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Serialize;
use serde_with::skip_serializing_none;
use tracing::{debug, info, warn};

use crate::chart::{self, ChartImage, ChartSource};
use crate::config::AppConfig;
use crate::document::{DocumentError, RectStyle, ReportDocument, Rgb};
use crate::error::RenderError;
use crate::font::Font;
use crate::geometry::{fit_within, PageFrame};
use crate::layout::layout_box;
use crate::payload::{decode_base64, format_tldr, Field, ReportPayload};
use crate::report_layout::{FontRole, ImageSlot, ReportLayout};
use crate::template::{self, select_combo, template_file_name, Combo};

const HIGHLIGHT: Rgb = Rgb::new(0.87, 0.36, 0.12);

const DOMINANT_STYLE: RectStyle = RectStyle {
    fill: None,
    stroke: Some(HIGHLIGHT),
    line_width: 2.5,
};

const SECOND_STYLE: RectStyle = RectStyle {
    fill: None,
    stroke: Some(HIGHLIGHT),
    line_width: 1.0,
};

const PREVIEW_CHARS: usize = 80;

pub struct ReportFonts {
    pub regular: Font,
    pub bold: Font,
}

impl Default for ReportFonts {
    fn default() -> Self {
        Self {
            regular: Font::helvetica(),
            bold: Font::helvetica_bold(),
        }
    }
}

/// Where the chart image comes from, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartOrigin {
    Supplied,
    Bands,
    Counts,
    None,
}

pub fn chart_origin(payload: &ReportPayload) -> ChartOrigin {
    if payload.chart_url.is_some() {
        ChartOrigin::Supplied
    } else if payload.bands.is_some() {
        ChartOrigin::Bands
    } else if !payload.counts.is_empty() {
        ChartOrigin::Counts
    } else {
        ChartOrigin::None
    }
}

/// A supplied URL wins (with a cache buster), then band scores, then counts.
pub fn resolve_chart_url(payload: &ReportPayload, base: &str) -> Option<Url> {
    let resolved = match chart_origin(payload) {
        ChartOrigin::Supplied => payload
            .chart_url
            .as_deref()
            .map(chart::with_cache_buster)?,
        ChartOrigin::Bands => chart::spider_chart_url_bands(base, payload.bands.as_ref()?),
        ChartOrigin::Counts => chart::spider_chart_url_counts(base, &payload.counts),
        ChartOrigin::None => return None,
    };
    resolved
        .map_err(|e| warn!("⚠️ No chart for this report: {}", e))
        .ok()
}

/// Draws everything onto the template and serialises it.
pub fn render_report(
    template: &[u8],
    payload: &ReportPayload,
    layout: &ReportLayout,
    fonts: ReportFonts,
    chart: Option<&ChartImage>,
) -> Result<Vec<u8>, RenderError> {
    let mut doc = ReportDocument::load(template)?;
    let pages = doc.page_count();
    let regular = doc.register_font(fonts.regular);
    let bold = doc.register_font(fonts.bold);
    info!("📝 Filling template with {} pages", pages);

    for slot in &layout.text {
        let Some(raw) = payload.text(slot.field) else {
            debug!(field = slot.field.key(), "no text, slot left empty");
            continue;
        };
        if slot.page >= pages {
            debug!(field = slot.field.key(), page = slot.page, "page missing from template, skipped");
            continue;
        }
        let text = if slot.bullets {
            format_tldr(raw)
        } else {
            raw.to_string()
        };
        let handle = match slot.font {
            FontRole::Regular => regular,
            FontRole::Bold => bold,
        };
        let frame = doc.page_frame(slot.page)?;
        let lines = layout_box(&text, &slot.text_box, doc.font(handle));
        debug!(field = slot.field.key(), lines = lines.len(), "slot laid out");
        for line in lines {
            doc.draw_text(
                slot.page,
                handle,
                &line.text,
                frame.x_to_native(line.x),
                frame.baseline_to_native(line.baseline),
                slot.text_box.size,
                slot.color,
            )?;
        }
    }

    for slot in &layout.highlights {
        let style = if payload.dom_key == Some(slot.state) {
            DOMINANT_STYLE
        } else if payload.second_key == Some(slot.state) {
            SECOND_STYLE
        } else {
            continue;
        };
        if slot.page >= pages {
            debug!(state = %slot.state, page = slot.page, "highlight page missing, skipped");
            continue;
        }
        let frame = doc.page_frame(slot.page)?;
        doc.draw_rect(slot.page, frame.rect_to_native(slot.rect), style)?;
    }

    if let Some(image) = chart {
        if layout.chart.page >= pages {
            debug!(page = layout.chart.page, "chart page missing, skipped");
        } else if let Err(e) = draw_chart(&mut doc, image, layout.chart) {
            warn!("⚠️ Chart could not be placed, leaving region blank: {}", e);
        }
    }

    let bytes = doc.finish()?;
    info!("✅ Report rendered ({} bytes)", bytes.len());
    Ok(bytes)
}

fn draw_chart(doc: &mut ReportDocument, image: &ChartImage, slot: ImageSlot) -> Result<(), DocumentError> {
    let frame: PageFrame = doc.page_frame(slot.page)?;
    let (w, h) = ReportDocument::image_dimensions(image)?;
    let placed = fit_within(slot.rect, w as f32, h as f32);
    doc.draw_image(slot.page, image, frame.rect_to_native(placed))
}

async fn load_template(config: &AppConfig, payload: &ReportPayload, combo: Combo) -> Result<Vec<u8>, RenderError> {
    if let Some(inline) = payload.inline_template.as_deref() {
        debug!("using inline template");
        return decode_base64(inline)
            .map_err(|e| RenderError::InvalidInput(format!("inline template: {e}")));
    }
    let name = template_file_name(&config.template_prefix, combo);
    let (_, bytes) = template::read_asset(&config.template_dirs, &name).await?;
    Ok(bytes)
}

/// Resolves one font: inline payload bytes, then the configured file, then
/// the standard fallback.
async fn load_font(
    inline: Option<&str>,
    configured: Option<&std::path::Path>,
    dirs: &[std::path::PathBuf],
    fallback: fn() -> Font,
    label: &str,
) -> Result<Font, RenderError> {
    if let Some(inline) = inline {
        let bytes = decode_base64(inline)
            .map_err(|e| RenderError::InvalidInput(format!("inline font: {e}")))?;
        return Font::from_bytes(bytes, label)
            .map_err(|e| RenderError::InvalidInput(e.to_string()));
    }
    match configured {
        Some(path) => {
            let bytes = template::read_configured(path, dirs).await?;
            Ok(Font::from_bytes(bytes, label)?)
        }
        None => Ok(fallback()),
    }
}

pub async fn load_fonts(config: &AppConfig, payload: &ReportPayload) -> Result<ReportFonts, RenderError> {
    let regular = load_font(
        payload.inline_font.as_deref(),
        config.font_path.as_deref(),
        &config.template_dirs,
        Font::helvetica,
        "regular",
    )
    .await?;
    let bold = load_font(
        payload.inline_bold_font.as_deref(),
        config.font_bold_path.as_deref(),
        &config.template_dirs,
        Font::helvetica_bold,
        "bold",
    )
    .await?;
    Ok(ReportFonts { regular, bold })
}

/// Full pipeline for one request. Template and font reads and the chart
/// fetch are awaited in turn; layout itself is synchronous.
pub async fn generate(
    config: &AppConfig,
    base_layout: &ReportLayout,
    charts: &dyn ChartSource,
    payload: &ReportPayload,
) -> Result<Vec<u8>, RenderError> {
    let combo = select_combo(payload.dom_key, payload.second_key, config.default_combo);
    info!("🧩 Template combination {}", combo);
    let layout = match &payload.layout_override {
        Some(overrides) => base_layout.with_override(overrides),
        None => base_layout.clone(),
    };
    let template = load_template(config, payload, combo).await?;
    let fonts = load_fonts(config, payload).await?;
    let chart = match resolve_chart_url(payload, &config.chart_base_url) {
        Some(url) => charts.fetch(&url).await,
        None => None,
    };
    render_report(&template, payload, &layout, fonts, chart.as_ref())
}

#[derive(Debug, Serialize)]
struct FieldReport {
    key: &'static str,
    present: bool,
    length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    preview: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    ok: bool,
    generated_at: DateTime<Utc>,
    combo: String,
    template: String,
    inline_template: bool,
    dom_key: Option<String>,
    second_key: Option<String>,
    second_key_ranked: bool,
    chart: ChartOrigin,
    chart_url: Option<String>,
    layout_overrides: Option<Vec<String>>,
    fields: Vec<FieldReport>,
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        text.to_string()
    } else {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{head}…")
    }
}

/// What a render would use, without rendering.
pub fn diagnostics(config: &AppConfig, payload: &ReportPayload) -> Diagnostics {
    let combo = select_combo(payload.dom_key, payload.second_key, config.default_combo);
    let fields = Field::ALL
        .into_iter()
        .map(|field| {
            let text = payload.text(field);
            FieldReport {
                key: field.key(),
                present: text.is_some(),
                length: text.map_or(0, |t| t.chars().count()),
                preview: text.map(preview),
            }
        })
        .collect();
    Diagnostics {
        ok: true,
        generated_at: Utc::now(),
        combo: combo.to_string(),
        template: template_file_name(&config.template_prefix, combo),
        inline_template: payload.inline_template.is_some(),
        dom_key: payload.dom_key.map(|k| k.to_string()),
        second_key: payload.second_key.map(|k| k.to_string()),
        second_key_ranked: payload.second_key_ranked,
        chart: chart_origin(payload),
        chart_url: resolve_chart_url(payload, &config.chart_base_url).map(String::from),
        layout_overrides: payload
            .layout_override
            .as_ref()
            .map(|m| m.keys().cloned().collect()),
        fields,
    }
}

/// `<name>_<date>.pdf` reduced to header-safe ASCII.
pub fn attachment_file_name(full_name: &str, date_label: &str) -> String {
    let sanitize = |raw: &str| {
        raw.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect::<String>()
            .split('_')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("_")
    };
    let parts: Vec<String> = [full_name, date_label]
        .into_iter()
        .map(sanitize)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        "report.pdf".to_string()
    } else {
        format!("{}.pdf", parts.join("_"))
    }
}
