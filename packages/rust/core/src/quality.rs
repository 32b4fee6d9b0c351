//! Advisory quality scoring of generated content.

use coursebuilder_shared::{ChapterContent, ChapterQuality, QualityReport};
use coursebuilder_text::char_len;

const MIN_EXPLANATORY_CHARS: usize = 100;
const MIN_SUMMARY_CHARS: usize = 50;
const DEDUCTION: u32 = 5;

/// Score one chapter on 0–100. Chapters without lessons score 0.
pub fn assess_chapter(chapter: &ChapterContent) -> ChapterQuality {
    let mut issues = Vec::new();

    if chapter.lessons.is_empty() {
        issues.push("Bölümde hiç ders yok".to_string());
        return ChapterQuality {
            chapter_id: chapter.chapter_id.clone(),
            score: 0,
            issues,
        };
    }

    let mut deductions = 0u32;
    for lesson in &chapter.lessons {
        let name = if lesson.title.is_empty() {
            lesson.lesson_id.as_str()
        } else {
            lesson.title.as_str()
        };
        if char_len(&lesson.explanatory_text) < MIN_EXPLANATORY_CHARS {
            deductions += DEDUCTION;
            issues.push(format!("{name}: açıklayıcı metin eksik veya kısa"));
        }
        if lesson.key_points.is_empty() {
            deductions += DEDUCTION;
            issues.push(format!("{name}: anahtar noktalar eksik"));
        }
        if char_len(&lesson.summary) < MIN_SUMMARY_CHARS {
            deductions += DEDUCTION;
            issues.push(format!("{name}: özet eksik veya kısa"));
        }
    }

    ChapterQuality {
        chapter_id: chapter.chapter_id.clone(),
        score: 100u32.saturating_sub(deductions),
        issues,
    }
}

/// Score every chapter; the overall score is the mean.
pub fn assess_content(chapters: &[ChapterContent]) -> QualityReport {
    let chapters: Vec<ChapterQuality> = chapters.iter().map(assess_chapter).collect();
    let overall_score = if chapters.is_empty() {
        0.0
    } else {
        chapters.iter().map(|c| f64::from(c.score)).sum::<f64>() / chapters.len() as f64
    };
    QualityReport {
        overall_score,
        chapters,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursebuilder_shared::EnhancedLesson;

    fn complete_lesson() -> EnhancedLesson {
        EnhancedLesson {
            lesson_id: "l-1".into(),
            title: "Değişkenler".into(),
            explanatory_text: "a".repeat(100),
            key_points: vec!["nokta".into()],
            summary: "ö".repeat(50),
            ..EnhancedLesson::default()
        }
    }

    fn chapter(lessons: Vec<EnhancedLesson>) -> ChapterContent {
        ChapterContent {
            chapter_id: "ch-1".into(),
            chapter_title: "Bölüm".into(),
            lessons,
            ..ChapterContent::default()
        }
    }

    #[test]
    fn empty_chapter_scores_zero() {
        let q = assess_chapter(&chapter(vec![]));
        assert_eq!(q.score, 0);
        assert_eq!(q.issues.len(), 1);
    }

    #[test]
    fn lesson_at_thresholds_scores_full() {
        let q = assess_chapter(&chapter(vec![complete_lesson()]));
        assert_eq!(q.score, 100);
        assert!(q.issues.is_empty());
    }

    #[test]
    fn deductions_accumulate_per_lesson() {
        let mut weak = complete_lesson();
        weak.explanatory_text = "kısa".into();
        weak.key_points.clear();
        weak.summary.clear();
        let q = assess_chapter(&chapter(vec![complete_lesson(), weak]));
        assert_eq!(q.score, 85);
        assert_eq!(q.issues.len(), 3);
    }

    #[test]
    fn score_never_goes_negative() {
        let lessons = vec![EnhancedLesson::default(); 10];
        assert_eq!(assess_chapter(&chapter(lessons)).score, 0);
    }

    #[test]
    fn overall_is_mean_of_chapters() {
        let report = assess_content(&[chapter(vec![complete_lesson()]), chapter(vec![])]);
        assert!((report.overall_score - 50.0).abs() < f64::EPSILON);
        assert_eq!(assess_content(&[]).overall_score, 0.0);
    }
}
