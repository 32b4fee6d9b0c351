//! Lesson narration as WAV audio.

use std::path::Path;

use tracing::{info, instrument, warn};

use coursebuilder_services::SpeechSynthesizer;
use coursebuilder_shared::{CourseBuilderError, EnhancedLesson, Result};
use coursebuilder_storage::Storage;

use crate::worker::BatchReport;

const WAV_HEADER_LEN: usize = 44;
const BITS_PER_SAMPLE: u16 = 16;
const CHANNELS: u16 = 1;

/// Text read aloud for a lesson.
pub fn lesson_script(lesson: &EnhancedLesson) -> String {
    let mut parts = Vec::new();
    if !lesson.title.is_empty() {
        parts.push(format!("{}.", lesson.title.trim_end_matches('.')));
    }
    if !lesson.explanatory_text.is_empty() {
        parts.push(lesson.explanatory_text.clone());
    }
    if !lesson.key_points.is_empty() {
        parts.push(format!("Önemli noktalar: {}.", lesson.key_points.join(". ")));
    }
    if !lesson.summary.is_empty() {
        parts.push(format!("Özet: {}", lesson.summary));
    }
    parts.join("\n\n")
}

/// 44-byte RIFF/WAVE header for 16-bit mono PCM.
pub fn wav_header(data_len: u32, sample_rate: u32) -> [u8; WAV_HEADER_LEN] {
    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate * u32::from(block_align);

    let mut header = [0u8; WAV_HEADER_LEN];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&(36 + data_len).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes());
    header[22..24].copy_from_slice(&CHANNELS.to_le_bytes());
    header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_len.to_le_bytes());
    header
}

/// Prefix raw PCM with a WAV header.
pub fn wrap_pcm(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    let data_len = u32::try_from(pcm.len())
        .ok()
        .filter(|len| len.checked_add(36).is_some())
        .ok_or_else(|| CourseBuilderError::validation("audio too long for a WAV container"))?;
    let mut wav = Vec::with_capacity(WAV_HEADER_LEN + pcm.len());
    wav.extend_from_slice(&wav_header(data_len, sample_rate));
    wav.extend_from_slice(pcm);
    Ok(wav)
}

/// Synthesize a lesson into a WAV file image.
pub async fn narrate_lesson(
    speech: &dyn SpeechSynthesizer,
    lesson: &EnhancedLesson,
    voice: &str,
) -> Result<Vec<u8>> {
    let script = lesson_script(lesson);
    if script.trim().is_empty() {
        return Err(CourseBuilderError::validation(format!(
            "lesson {} has no text to narrate",
            lesson.lesson_id
        )));
    }
    let pcm = speech.synthesize(&script, voice).await?;
    wrap_pcm(&pcm, speech.sample_rate())
}

/// Narrate every generated lesson of a document into `out_dir/<lesson>.wav`.
#[instrument(skip_all, fields(document_id = %document_id))]
pub async fn narrate_document(
    storage: &Storage,
    speech: &dyn SpeechSynthesizer,
    document_id: &str,
    voice: &str,
    out_dir: &Path,
) -> Result<BatchReport> {
    let document = storage.require_document(document_id).await?;
    let content = document.enhanced_content.ok_or_else(|| {
        CourseBuilderError::validation(format!("document {document_id} has no generated content"))
    })?;
    tokio::fs::create_dir_all(out_dir)
        .await
        .map_err(|e| CourseBuilderError::io(out_dir, e))?;

    let mut report = BatchReport::default();
    for lesson in content.chapters.iter().flat_map(|c| &c.lessons) {
        match narrate_lesson(speech, lesson, voice).await {
            Ok(wav) => {
                let path = out_dir.join(format!("{}.wav", lesson.lesson_id));
                tokio::fs::write(&path, &wav)
                    .await
                    .map_err(|e| CourseBuilderError::io(&path, e))?;
                report.record_success(&lesson.lesson_id);
            }
            Err(e) => {
                warn!(lesson = %lesson.lesson_id, error = %e, "narration failed");
                report.record_failure(&lesson.lesson_id, e.to_string());
            }
        }
    }
    info!(succeeded = report.succeeded, failed = report.failed, "narration finished");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeSpeech, seeded_segments, temp_storage};
    use coursebuilder_shared::{ChapterContent, EnhancedContent};
    use uuid::Uuid;

    fn lesson(id: &str, text: &str) -> EnhancedLesson {
        EnhancedLesson {
            lesson_id: id.into(),
            title: "Değişkenler".into(),
            explanatory_text: text.into(),
            key_points: vec!["Tür".into(), "Kapsam".into()],
            ..EnhancedLesson::default()
        }
    }

    #[test]
    fn header_fields() {
        let h = wav_header(1000, 24_000);
        assert_eq!(&h[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(h[4..8].try_into().unwrap()), 1036);
        assert_eq!(&h[8..16], b"WAVEfmt ");
        assert_eq!(u16::from_le_bytes(h[22..24].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(h[24..28].try_into().unwrap()), 24_000);
        assert_eq!(u32::from_le_bytes(h[28..32].try_into().unwrap()), 48_000);
        assert_eq!(u16::from_le_bytes(h[34..36].try_into().unwrap()), 16);
        assert_eq!(&h[36..40], b"data");
        assert_eq!(u32::from_le_bytes(h[40..44].try_into().unwrap()), 1000);
    }

    #[test]
    fn script_reads_key_points() {
        let script = lesson_script(&lesson("l", "Açıklama."));
        assert!(script.starts_with("Değişkenler.\n\nAçıklama."));
        assert!(script.contains("Önemli noktalar: Tür. Kapsam."));
    }

    #[tokio::test]
    async fn narration_wraps_pcm() {
        let wav = narrate_lesson(&FakeSpeech, &lesson("l", "Metin"), "alloy").await.unwrap();
        let script_len = lesson_script(&lesson("l", "Metin")).chars().count();
        assert_eq!(wav.len(), 44 + script_len * 2);
        assert_eq!(&wav[0..4], b"RIFF");
    }

    #[tokio::test]
    async fn empty_lesson_is_rejected() {
        let err = narrate_lesson(&FakeSpeech, &EnhancedLesson::default(), "alloy")
            .await
            .unwrap_err();
        assert!(matches!(err, CourseBuilderError::Validation { .. }));
    }

    #[tokio::test]
    async fn document_narration_writes_files() {
        let storage = temp_storage().await;
        let (doc, _) = seeded_segments(&storage, &[(1, 10)]).await;
        let content = EnhancedContent {
            chapters: vec![ChapterContent {
                chapter_id: "ch-1".into(),
                lessons: vec![lesson("ch-1-l-1", "Bir"), EnhancedLesson::default()],
                ..ChapterContent::default()
            }],
            ..EnhancedContent::default()
        };
        storage.set_enhanced_content(&doc.id, &content).await.unwrap();

        let out = std::env::temp_dir().join(format!("cb_audio_{}", Uuid::now_v7()));
        let report = narrate_document(&storage, &FakeSpeech, &doc.id, "alloy", &out)
            .await
            .unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert!(out.join("ch-1-l-1.wav").exists());
    }
}
