//! Segment planner: turns a document outline into bounded page-range segments.
//!
//! Oversized outline sections are split into fixed-width parts, undersized
//! ones are carried over and merged with their small neighbours. A carry-over
//! is emitted as a segment of its own when a full-size section follows; it is
//! never folded into that section, so [`validate`] reports it as small. An
//! empty outline falls back to fixed-width paging. [`validate`] checks the result
//! before it is persisted.

use serde::Serialize;
use tracing::{debug, instrument, warn};

use coursebuilder_shared::{
    CourseBuilderError, Outline, OutlineSection, Result, Segment, SegmentationConfig,
};

/// Page-size bounds for planning.
#[derive(Debug, Clone, Copy)]
pub struct PlannerConfig {
    pub max_segment_size: u32,
    pub min_segment_size: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_segment_size: 20,
            min_segment_size: 3,
        }
    }
}

impl From<&SegmentationConfig> for PlannerConfig {
    fn from(config: &SegmentationConfig) -> Self {
        Self {
            max_segment_size: config.max_segment_size.max(1),
            min_segment_size: config.min_segment_size,
        }
    }
}

/// The document facts the planner needs.
#[derive(Debug, Clone, Copy)]
pub struct PlanInput<'a> {
    pub document_id: &'a str,
    pub title: &'a str,
    pub page_count: u32,
}

/// Plan segments for a document from its outline.
///
/// Returned segments are sorted by start page and numbered `1..=N`.
#[instrument(skip_all, fields(document_id = input.document_id, sections = outline.sections.len()))]
pub fn plan(input: PlanInput<'_>, outline: &Outline, config: &PlannerConfig) -> Result<Vec<Segment>> {
    let mut segments = if outline.sections.is_empty() {
        plan_fixed_width(input, config)?
    } else {
        plan_from_sections(input.document_id, &outline.sections, config)?
    };

    segments.sort_by_key(|s| (s.p_start, s.p_end));
    renumber(&mut segments);

    debug!(count = segments.len(), "segments planned");
    Ok(segments)
}

/// Assign `seg_no` sequentially in list order. Idempotent.
pub fn renumber(segments: &mut [Segment]) {
    for (i, segment) in segments.iter_mut().enumerate() {
        segment.seg_no = i as u32 + 1;
    }
}

fn plan_from_sections(
    document_id: &str,
    sections: &[OutlineSection],
    config: &PlannerConfig,
) -> Result<Vec<Segment>> {
    let mut result = Vec::new();
    let mut carry: Option<Segment> = None;

    for section in sections {
        if section.start_page == 0 || section.end_page < section.start_page {
            return Err(CourseBuilderError::validation(format!(
                "outline section '{}' has invalid page range {}-{}",
                section.title, section.start_page, section.end_page
            )));
        }

        let size = section.end_page - section.start_page + 1;

        if size < config.min_segment_size {
            carry = Some(match carry.take() {
                Some(mut pending) => {
                    pending.p_end = pending.p_end.max(section.end_page);
                    pending.title = format!("{} + {}", pending.title, section.title);
                    pending.source_sections.push(section.title.clone());
                    pending
                }
                None => Segment::planned(
                    document_id,
                    section.title.clone(),
                    section.start_page,
                    section.end_page,
                    section.content_type.clone(),
                    vec![section.title.clone()],
                ),
            });
            continue;
        }

        if let Some(pending) = carry.take() {
            result.push(pending);
        }

        if size > config.max_segment_size {
            let parts = size.div_ceil(config.max_segment_size);
            for part in 0..parts {
                let p_start = section.start_page + part * config.max_segment_size;
                let p_end = (p_start + config.max_segment_size - 1).min(section.end_page);
                result.push(Segment::planned(
                    document_id,
                    format!("{} - Bölüm {}", section.title, part + 1),
                    p_start,
                    p_end,
                    section.content_type.clone(),
                    vec![section.title.clone()],
                ));
            }
        } else {
            result.push(Segment::planned(
                document_id,
                section.title.clone(),
                section.start_page,
                section.end_page,
                section.content_type.clone(),
                vec![section.title.clone()],
            ));
        }
    }

    if let Some(pending) = carry.take() {
        result.push(pending);
    }

    Ok(result)
}

fn plan_fixed_width(input: PlanInput<'_>, config: &PlannerConfig) -> Result<Vec<Segment>> {
    if input.page_count == 0 {
        return Err(CourseBuilderError::validation(
            "document has no pages and no outline sections",
        ));
    }

    warn!(
        document_id = input.document_id,
        "outline has no sections, falling back to fixed-width paging"
    );

    let parts = input.page_count.div_ceil(config.max_segment_size);
    Ok((0..parts)
        .map(|part| {
            let p_start = part * config.max_segment_size + 1;
            let p_end = (p_start + config.max_segment_size - 1).min(input.page_count);
            Segment::planned(
                input.document_id,
                format!("{} (Sayfa {p_start}-{p_end})", input.title),
                p_start,
                p_end,
                "text",
                vec![],
            )
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Outcome of [`validate`]. Errors block persistence; warnings do not.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Check a segment list against a document's page count.
pub fn validate(segments: &[Segment], total_pages: u32, config: &PlannerConfig) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if segments.is_empty() {
        errors.push("segment listesi boş".to_string());
        return ValidationReport {
            is_valid: false,
            errors,
            warnings,
        };
    }

    for segment in segments {
        if segment.p_start < 1 || segment.p_end > total_pages || segment.p_start > segment.p_end {
            errors.push(format!(
                "segment {} ({}) sayfa aralığı {}-{} geçersiz (toplam {total_pages} sayfa)",
                segment.seg_no, segment.title, segment.p_start, segment.p_end
            ));
        }
        if segment.page_count() < config.min_segment_size {
            warnings.push(format!(
                "segment {} ({}) çok küçük: {} sayfa",
                segment.seg_no,
                segment.title,
                segment.page_count()
            ));
        }
    }

    for pair in segments.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.p_start <= prev.p_end {
            errors.push(format!(
                "segment {} ile {} çakışıyor ({}-{} / {}-{})",
                prev.seg_no, next.seg_no, prev.p_start, prev.p_end, next.p_start, next.p_end
            ));
        } else if next.p_start > prev.p_end + 1 {
            warnings.push(format!(
                "segment {} ile {} arasında boşluk var (sayfa {}-{})",
                prev.seg_no,
                next.seg_no,
                prev.p_end + 1,
                next.p_start - 1
            ));
        }
        if next.seg_no != prev.seg_no + 1 {
            warnings.push(format!(
                "segment numaraları ardışık değil: {} → {}",
                prev.seg_no, next.seg_no
            ));
        }
    }

    if let Some(first) = segments.first() {
        if first.p_start != 1 {
            warnings.push(format!("ilk segment sayfa 1'den başlamıyor ({})", first.p_start));
        }
    }
    if let Some(last) = segments.last() {
        if last.p_end != total_pages {
            warnings.push(format!(
                "son segment son sayfada bitmiyor ({} / {total_pages})",
                last.p_end
            ));
        }
    }

    ValidationReport {
        is_valid: errors.is_empty(),
        errors,
        warnings,
    }
}
