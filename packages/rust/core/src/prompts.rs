//! Prompt templates for every completion and image call.
//!
//! All prompts are Turkish; the course material they produce is Turkish.

use coursebuilder_shared::{Chapter, Lesson, Outline, Segment};

pub const MIN_EXPLANATORY_CHARS: usize = 400;
pub const MIN_KEY_POINTS: usize = 6;
pub const MIN_SUMMARY_CHARS: usize = 200;

/// Outline extraction from the first pages of a book.
pub fn outline_prompt(first_pages: &str, page_count: u32) -> String {
    format!(
        r#"Aşağıda {page_count} sayfalık bir ders kitabının ilk sayfaları var.
Kitabın içindekiler bölümünü ve başlıklarını kullanarak bir ana hat çıkar.

Yanıtı yalnızca şu şemaya uyan tek bir JSON nesnesi olarak ver:
{{
  "title": "kitap başlığı",
  "author": "yazar (bilinmiyorsa null)",
  "headings": ["ana başlık", "..."],
  "sections": [
    {{"title": "bölüm başlığı", "start_page": 1, "end_page": 12, "content_type": "text"}}
  ]
}}

Kurallar:
- Sayfa numaraları 1 ile {page_count} arasında olmalı ve start_page <= end_page olmalı.
- Bölümler sayfa sırasıyla verilmeli.
- content_type şu değerlerden biri olmalı: text, code, exercise, table.

Sayfalar:
{first_pages}"#
    )
}

/// Course structure from the outline and the planned segments.
pub fn structure_prompt(outline: &Outline, segments: &[Segment]) -> String {
    let sections = outline
        .sections
        .iter()
        .map(|s| format!("- {} (s. {}-{})", s.title, s.start_page, s.end_page))
        .collect::<Vec<_>>()
        .join("\n");
    let segment_list = segments
        .iter()
        .map(|s| {
            format!(
                "- id: {} | #{} {} (s. {}-{}, {})",
                s.id, s.seg_no, s.title, s.p_start, s.p_end, s.content_type
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#""{title}" adlı kitaptan bir e-öğrenme kursu tasarla.

Kitabın ana hattı:
{sections}

Kitap şu segmentlere ayrıldı:
{segment_list}

Bölümlerden ve derslerden oluşan bir kurs yapısı üret. Her ders bir veya daha fazla
segmente dayanmalı; segment_ids alanına yukarıdaki id değerlerini yaz.

Yanıtı yalnızca şu şemaya uyan tek bir JSON nesnesi olarak ver:
{{
  "title": "kurs başlığı",
  "description": "kısa kurs açıklaması",
  "chapters": [
    {{
      "title": "bölüm başlığı",
      "description": "bölüm açıklaması",
      "lessons": [
        {{
          "title": "ders başlığı",
          "segment_ids": ["segment id"],
          "content_type": "text",
          "learning_points": ["öğrenme hedefi"]
        }}
      ]
    }}
  ]
}}"#,
        title = outline.title,
    )
}

/// One call for all lessons of a chapter.
pub fn chapter_content_prompt(chapter: &Chapter, source_text: &str, context: &str) -> String {
    let lessons = chapter
        .lessons
        .iter()
        .map(|l| lesson_line(l))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Bir e-öğrenme kursunun "{chapter_title}" bölümü için ders içeriği yazıyorsun.

# Bağlam
{context}

# Dersler
{lessons}

# Kaynak metin
{source_text}

# Görev
Bölümdeki TÜM dersler için içeriği tek seferde üret. Yanıtı yalnızca şu şemaya uyan
tek bir JSON nesnesi olarak ver, derslerin sırası yukarıdaki sırayla aynı olsun:
{{
  "lessons": [
    {{
      "lesson_id": "ders id",
      "title": "ders başlığı",
      "explanatory_text": "en az {MIN_EXPLANATORY_CHARS} karakterlik açıklayıcı metin",
      "key_points": ["en az {MIN_KEY_POINTS} anahtar nokta"],
      "tables": [{{"title": "tablo başlığı", "headers": ["..."], "rows": [["..."]]}}],
      "code_examples": [{{"title": "...", "language": "...", "code": "...", "explanation": "..."}}],
      "practical_examples": [{{"title": "...", "description": "..."}}],
      "cross_references": [{{"target": "bölüm adı", "description": "..."}}],
      "summary": "en az {MIN_SUMMARY_CHARS} karakterlik özet"
    }}
  ]
}}

tables, code_examples, practical_examples ve cross_references isteğe bağlıdır; gerekmiyorsa boş liste ver."#,
        chapter_title = chapter.title,
    )
}

fn lesson_line(lesson: &Lesson) -> String {
    if lesson.learning_points.is_empty() {
        format!("- [{}] {}", lesson.id, lesson.title)
    } else {
        format!(
            "- [{}] {} (hedefler: {})",
            lesson.id,
            lesson.title,
            lesson.learning_points.join("; ")
        )
    }
}

/// Illustration prompt for one lesson.
pub fn image_prompt(course_title: &str, chapter: &Chapter, lesson: &Lesson) -> String {
    let mut prompt = format!(
        "\"{course_title}\" kursunun \"{}\" bölümündeki \"{}\" dersi için eğitici bir illüstrasyon. \
         Sade, modern, düz renkli çizim; metin içermesin.",
        chapter.title, lesson.title
    );
    if !lesson.learning_points.is_empty() {
        prompt.push_str(&format!(" Vurgulanacak fikirler: {}.", lesson.learning_points.join(", ")));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_structure;

    #[test]
    fn chapter_prompt_lists_every_lesson_and_minimums() {
        let structure = sample_structure(&[]);
        let chapter = &structure.chapters[1];
        let prompt = chapter_content_prompt(chapter, "kaynak", "bağlam");
        for lesson in &chapter.lessons {
            assert!(prompt.contains(&format!("[{}]", lesson.id)));
        }
        assert!(prompt.contains("en az 400 karakterlik"));
        assert!(prompt.contains("en az 6 anahtar nokta"));
        assert!(prompt.contains("en az 200 karakterlik özet"));
        assert!(prompt.contains("# Bağlam\nbağlam"));
    }

    #[test]
    fn structure_prompt_carries_segment_ids() {
        let mut seg = Segment::planned("doc", "Giriş", 1, 10, "text", vec![]);
        seg.seg_no = 1;
        let outline = Outline {
            title: "Kitap".into(),
            ..Outline::default()
        };
        let prompt = structure_prompt(&outline, std::slice::from_ref(&seg));
        assert!(prompt.contains(&format!("id: {}", seg.id)));
        assert!(prompt.starts_with("\"Kitap\""));
    }

    #[test]
    fn image_prompt_mentions_lesson() {
        let structure = sample_structure(&[]);
        let chapter = &structure.chapters[0];
        let prompt = image_prompt("Kurs", chapter, &chapter.lessons[0]);
        assert!(prompt.contains("Giriş 1"));
        assert!(!prompt.contains("Vurgulanacak"));
    }
}
